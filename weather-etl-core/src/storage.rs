use crate::{
    config::SinkConfig,
    secrets::{SecretProvider, StorageCredentials},
    storage::{local::LocalStore, s3::S3Store},
};
use async_trait::async_trait;
use std::{convert::TryFrom, fmt::Debug, path::PathBuf};

pub mod local;
pub mod s3;
pub mod sigv4;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("invalid storage uri: {0}")]
    InvalidUri(String),

    #[error("I/O error writing {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("object already exists: {0}")]
    AlreadyExists(String),

    #[error("storage request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("storage rejected the upload with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("request signing failed: {0}")]
    Signing(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SinkScheme {
    S3,
    File,
}

impl SinkScheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            SinkScheme::S3 => "s3",
            SinkScheme::File => "file",
        }
    }

    pub const fn all() -> &'static [SinkScheme] {
        &[SinkScheme::S3, SinkScheme::File]
    }
}

impl std::fmt::Display for SinkScheme {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<&str> for SinkScheme {
    type Error = StorageError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value.to_lowercase().as_str() {
            "s3" => Ok(SinkScheme::S3),
            "file" => Ok(SinkScheme::File),
            _ => Err(StorageError::InvalidUri(format!(
                "unknown scheme '{value}'. Supported schemes: s3, file."
            ))),
        }
    }
}

/// Parsed `<scheme>://<bucket>[/<prefix>]`.
///
/// For `file://` the bucket is the target directory and there is no prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageUri {
    pub scheme: SinkScheme,
    pub bucket: String,
    pub prefix: Option<String>,
}

impl StorageUri {
    pub fn parse(uri: &str) -> Result<Self, StorageError> {
        let (scheme, rest) = uri
            .split_once("://")
            .ok_or_else(|| StorageError::InvalidUri(format!("'{uri}' has no scheme")))?;
        let scheme = SinkScheme::try_from(scheme)?;

        match scheme {
            SinkScheme::File => {
                if rest.is_empty() {
                    return Err(StorageError::InvalidUri(format!("'{uri}' has no directory")));
                }
                Ok(Self { scheme, bucket: rest.to_string(), prefix: None })
            }
            SinkScheme::S3 => {
                let (bucket, prefix) = match rest.split_once('/') {
                    Some((bucket, prefix)) => (bucket, prefix.trim_matches('/')),
                    None => (rest, ""),
                };
                if bucket.is_empty() {
                    return Err(StorageError::InvalidUri(format!("'{uri}' has no bucket")));
                }
                Ok(Self {
                    scheme,
                    bucket: bucket.to_string(),
                    prefix: (!prefix.is_empty()).then(|| prefix.to_string()),
                })
            }
        }
    }

    /// Object key for `name` under this uri's prefix.
    pub fn key(&self, name: &str) -> String {
        match &self.prefix {
            Some(prefix) => format!("{prefix}/{name}"),
            None => name.to_string(),
        }
    }
}

#[async_trait]
pub trait ObjectStore: Send + Sync + Debug {
    /// Write a new object and return its full uri.
    async fn put(&self, name: &str, body: &[u8], content_type: &str)
    -> Result<String, StorageError>;
}

/// Construct a store from the sink section of the config.
///
/// Storage credentials are only required for `s3://` sinks.
pub fn store_from_config(
    sink: &SinkConfig,
    secrets: &dyn SecretProvider,
    http: reqwest::Client,
) -> anyhow::Result<Box<dyn ObjectStore>> {
    let uri = StorageUri::parse(&sink.uri)?;

    let boxed: Box<dyn ObjectStore> = match uri.scheme {
        SinkScheme::File => Box::new(LocalStore::new(uri)),
        SinkScheme::S3 => {
            let credentials = StorageCredentials::resolve(secrets)?;
            Box::new(S3Store::new(
                uri,
                sink.region.clone(),
                sink.endpoint.clone(),
                credentials,
                http,
            )?)
        }
    };

    Ok(boxed)
}
