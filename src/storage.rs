use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use rand::{rngs::OsRng, RngCore};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("invalid storage key: {0}")]
    InvalidKey(String),
    #[error("object {0} not found")]
    NotFound(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

#[async_trait]
pub trait ObjectStorage: Send + Sync + 'static {
    async fn put_object(&self, key: &str, bytes: Vec<u8>) -> StorageResult<()>;

    async fn get_object(&self, key: &str) -> StorageResult<Vec<u8>>;

    async fn delete_object(&self, key: &str) -> StorageResult<()>;
}

/// Stores uploads as flat files under a single directory.
pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> StorageResult<PathBuf> {
        validate_key(key)?;
        Ok(self.root.join(key))
    }
}

#[async_trait]
impl ObjectStorage for LocalStorage {
    async fn put_object(&self, key: &str, bytes: Vec<u8>) -> StorageResult<()> {
        let path = self.path_for(key)?;
        tokio::fs::create_dir_all(&self.root).await?;
        tokio::fs::write(&path, bytes).await?;
        Ok(())
    }

    async fn get_object(&self, key: &str) -> StorageResult<Vec<u8>> {
        let path = self.path_for(key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(key.to_string()))
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn delete_object(&self, key: &str) -> StorageResult<()> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

/// Builds a key of the form `<millis>_<32 hex>[.ext]`, keeping a short
/// alphanumeric extension from the uploaded file name.
pub fn generate_storage_key(file_name: &str) -> String {
    let mut random = [0u8; 16];
    OsRng.fill_bytes(&mut random);
    let stem = format!("{}_{}", Utc::now().timestamp_millis(), hex::encode(random));

    match extension_of(file_name) {
        Some(ext) => format!("{stem}.{ext}"),
        None => stem,
    }
}

fn extension_of(file_name: &str) -> Option<String> {
    let (_, ext) = file_name.rsplit_once('.')?;
    let ext = ext.to_ascii_lowercase();
    (!ext.is_empty() && ext.len() <= 10 && ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .then_some(ext)
}

pub fn validate_key(key: &str) -> StorageResult<()> {
    let valid = !key.is_empty()
        && key.len() <= 128
        && !key.contains("..")
        && !key.starts_with('.')
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
    if valid {
        Ok(())
    } else {
        Err(StorageError::InvalidKey(key.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_keys_are_valid() {
        let key = generate_storage_key("Assembly Map.PDF");
        assert!(key.ends_with(".pdf"));
        let (millis, rest) = key.split_once('_').expect("separator");
        assert!(millis.chars().all(|c| c.is_ascii_digit()));
        assert_eq!(rest.trim_end_matches(".pdf").len(), 32);
        validate_key(&key).expect("valid key");
    }

    #[test]
    fn odd_extensions_are_dropped() {
        let key = generate_storage_key("notes.tar/../x");
        assert!(!key.contains('.'));
        assert!(!generate_storage_key("README").contains('.'));
    }

    #[test]
    fn rejects_traversal_and_separators() {
        for key in ["../etc/passwd", "a/b", "a\\b", "..", ".hidden", "", "x..y"] {
            assert!(validate_key(key).is_err(), "{key} should be rejected");
        }
    }

    #[tokio::test]
    async fn local_storage_round_trip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let storage = LocalStorage::new(dir.path().join("uploads"));
        let key = generate_storage_key("schedule.txt");

        storage
            .put_object(&key, b"shift list".to_vec())
            .await
            .expect("put");
        assert_eq!(storage.get_object(&key).await.expect("get"), b"shift list");

        storage.delete_object(&key).await.expect("delete");
        assert!(matches!(
            storage.get_object(&key).await,
            Err(StorageError::NotFound(_))
        ));
        storage.delete_object(&key).await.expect("idempotent delete");
    }

    #[tokio::test]
    async fn local_storage_refuses_escaping_keys() {
        let dir = tempfile::tempdir().expect("tempdir");
        let storage = LocalStorage::new(dir.path());
        assert!(matches!(
            storage.get_object("../secret").await,
            Err(StorageError::InvalidKey(_))
        ));
    }
}
