use async_trait::async_trait;
use chrono::Utc;
use log::{debug, info};
use reqwest::{Client, Url};

use super::{
    ObjectStore, StorageError, StorageUri,
    sigv4::{PutRequest, encode_key, sign_put},
};
use crate::{error::truncate_body, secrets::StorageCredentials};

/// S3 (or S3-compatible) bucket written with signed `PUT` requests.
#[derive(Debug, Clone)]
pub struct S3Store {
    uri: StorageUri,
    region: String,
    /// Set for path-style addressing against a custom endpoint.
    endpoint: Option<Url>,
    credentials: StorageCredentials,
    http: Client,
}

impl S3Store {
    pub fn new(
        uri: StorageUri,
        region: String,
        endpoint: Option<String>,
        credentials: StorageCredentials,
        http: Client,
    ) -> Result<Self, StorageError> {
        let endpoint = endpoint
            .map(|e| {
                Url::parse(&e)
                    .map_err(|err| StorageError::InvalidUri(format!("endpoint '{e}': {err}")))
            })
            .transpose()?;

        Ok(Self { uri, region, endpoint, credentials, http })
    }

    /// Request URL and encoded canonical path for `key`.
    fn object_url(&self, key: &str) -> Result<(Url, String), StorageError> {
        let encoded = encode_key(key);

        let (base, path) = match &self.endpoint {
            Some(endpoint) => {
                let root = endpoint.path().trim_end_matches('/');
                let path = format!("{root}/{}/{encoded}", self.uri.bucket);
                (endpoint.origin().ascii_serialization(), path)
            }
            None => (
                format!("https://{}.s3.{}.amazonaws.com", self.uri.bucket, self.region),
                format!("/{encoded}"),
            ),
        };

        let url = Url::parse(&format!("{base}{path}"))
            .map_err(|e| StorageError::InvalidUri(format!("object url for '{key}': {e}")))?;
        Ok((url, path))
    }
}

fn host_header(url: &Url) -> Result<String, StorageError> {
    let host = url
        .host_str()
        .ok_or_else(|| StorageError::InvalidUri(format!("'{url}' has no host")))?;
    Ok(match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    })
}

/// Error body of a rejected upload, or why it could not be read.
fn rejection_body(body: reqwest::Result<String>) -> String {
    match body {
        Ok(body) => truncate_body(&body),
        Err(e) => format!("<unreadable response body: {}>", e.without_url()),
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn put(
        &self,
        name: &str,
        body: &[u8],
        content_type: &str,
    ) -> Result<String, StorageError> {
        let key = self.uri.key(name);
        let (url, canonical_uri) = self.object_url(&key)?;
        let host = host_header(&url)?;

        let headers = sign_put(
            &PutRequest {
                host: &host,
                canonical_uri: &canonical_uri,
                content_type,
                payload: body,
                region: &self.region,
                timestamp: Utc::now(),
            },
            &self.credentials,
        )?;

        debug!("PUT {url} ({} bytes)", body.len());

        let mut request = self.http.put(url).body(body.to_vec());
        for (name, value) in headers {
            request = request.header(name, value);
        }

        let res = request.send().await?;
        let status = res.status();
        if !status.is_success() {
            return Err(StorageError::Rejected {
                status: status.as_u16(),
                body: rejection_body(res.text().await),
            });
        }

        let uri = format!("s3://{}/{key}", self.uri.bucket);
        info!("Uploaded {uri}");
        Ok(uri)
    }
}
