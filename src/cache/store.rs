//! Blob stores backing the response cache

use std::{
    fs, io,
    path::{Path, PathBuf},
};

use bytes::Bytes;
use dashmap::DashMap;
use log::{debug, warn};

use super::metadata::CacheMetadata;
use crate::core::traits::BlobStore;

/// Process-local store, lost on drop
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    blobs: DashMap<String, Bytes>,
    metadata: DashMap<String, CacheMetadata>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }
}

impl BlobStore for MemoryBlobStore {
    fn read_blob(&self, key: &str) -> io::Result<Option<Bytes>> {
        Ok(self.blobs.get(key).map(|entry| entry.value().clone()))
    }

    fn write_blob(&self, key: &str, data: &[u8]) -> io::Result<()> {
        self.blobs
            .insert(key.to_string(), Bytes::copy_from_slice(data));
        Ok(())
    }

    fn read_metadata(&self, key: &str) -> io::Result<Option<CacheMetadata>> {
        Ok(self.metadata.get(key).map(|entry| entry.value().clone()))
    }

    fn write_metadata(&self, key: &str, metadata: &CacheMetadata) -> io::Result<()> {
        self.metadata.insert(key.to_string(), metadata.clone());
        Ok(())
    }

    fn remove(&self, key: &str) -> io::Result<()> {
        self.blobs.remove(key);
        self.metadata.remove(key);
        Ok(())
    }
}

/// One directory holding `<key>` body files and `<key>.metadata` JSON files
#[derive(Debug, Clone)]
pub struct FileBlobStore {
    directory: PathBuf,
}

impl FileBlobStore {
    /// Open the store, creating the directory when needed.
    ///
    /// A plain file squatting on the path is removed first.
    pub fn new(directory: impl Into<PathBuf>) -> io::Result<Self> {
        let directory = directory.into();
        match fs::metadata(&directory) {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => {
                warn!(
                    "Cache path {} is not a directory, replacing it",
                    directory.display()
                );
                fs::remove_file(&directory)?;
                fs::create_dir_all(&directory)?;
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("Creating cache directory {}", directory.display());
                fs::create_dir_all(&directory)?;
            }
            Err(e) => return Err(e),
        }
        Ok(Self { directory })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn blob_path(&self, key: &str) -> PathBuf {
        self.directory.join(key)
    }

    fn metadata_path(&self, key: &str) -> PathBuf {
        self.directory.join(format!("{key}.metadata"))
    }
}

fn read_optional(path: &Path) -> io::Result<Option<Vec<u8>>> {
    match fs::read(path) {
        Ok(data) => Ok(Some(data)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

fn remove_optional(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

impl BlobStore for FileBlobStore {
    fn read_blob(&self, key: &str) -> io::Result<Option<Bytes>> {
        Ok(read_optional(&self.blob_path(key))?.map(Bytes::from))
    }

    fn write_blob(&self, key: &str, data: &[u8]) -> io::Result<()> {
        fs::write(self.blob_path(key), data)
    }

    fn read_metadata(&self, key: &str) -> io::Result<Option<CacheMetadata>> {
        let Some(raw) = read_optional(&self.metadata_path(key))? else {
            return Ok(None);
        };
        serde_json::from_slice(&raw)
            .map(Some)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }

    fn write_metadata(&self, key: &str, metadata: &CacheMetadata) -> io::Result<()> {
        let raw = serde_json::to_vec(metadata)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        fs::write(self.metadata_path(key), raw)
    }

    fn remove(&self, key: &str) -> io::Result<()> {
        remove_optional(&self.blob_path(key))?;
        remove_optional(&self.metadata_path(key))
    }
}
