use std::path::PathBuf;

use async_trait::async_trait;
use log::info;
use tokio::{fs, io::AsyncWriteExt};

use super::{ObjectStore, StorageError, StorageUri};

/// Directory-backed store for `file://` sinks. Never overwrites.
#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
    uri: StorageUri,
}

impl LocalStore {
    pub fn new(uri: StorageUri) -> Self {
        Self { root: PathBuf::from(&uri.bucket), uri }
    }
}

#[async_trait]
impl ObjectStore for LocalStore {
    async fn put(
        &self,
        name: &str,
        body: &[u8],
        _content_type: &str,
    ) -> Result<String, StorageError> {
        let path = self.root.join(self.uri.key(name));
        let io_err = |source| StorageError::Io { path: path.clone(), source };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.map_err(io_err)?;
        }

        let mut file = match fs::OpenOptions::new().write(true).create_new(true).open(&path).await
        {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(StorageError::AlreadyExists(path.display().to_string()));
            }
            Err(e) => return Err(io_err(e)),
        };
        file.write_all(body).await.map_err(io_err)?;
        file.flush().await.map_err(io_err)?;

        let uri = format!("file://{}", path.display());
        info!("Wrote {uri}");
        Ok(uri)
    }
}
