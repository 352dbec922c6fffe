//! Storage abstraction used to dump and open indexes.
//!
//! Indexes never touch the file system directly. A [`Storage`] resolves file
//! names to [`StorageInput`] and [`StorageOutput`] streams, so the same index
//! bytes can live on disk ([`file::FileStorage`]) or in memory
//! ([`memory::MemoryStorage`]).
//!
//! # Example
//!
//! ```
//! use std::io::{Read, Write};
//! use sagitta::storage::{StorageConfig, StorageFactory};
//!
//! # fn main() -> sagitta::error::Result<()> {
//! let storage = StorageFactory::create(StorageConfig::default())?;
//!
//! let mut output = storage.create_output("index.sgt")?;
//! output.write_all(b"bytes")?;
//! output.close()?;
//!
//! let mut input = storage.open_input("index.sgt")?;
//! let mut buffer = Vec::new();
//! input.read_to_end(&mut buffer)?;
//! assert_eq!(buffer, b"bytes");
//! # Ok(())
//! # }
//! ```

use std::io::{Read, Write};
use std::sync::Arc;

use crate::error::{Result, SagittaError};

pub mod file;
pub mod memory;
pub mod structured;

/// Resolves file names to byte streams.
pub trait Storage: Send + Sync + std::fmt::Debug {
    /// Open an existing file for reading.
    fn open_input(&self, name: &str) -> Result<Box<dyn StorageInput>>;

    /// Create (or truncate) a file for writing.
    fn create_output(&self, name: &str) -> Result<Box<dyn StorageOutput>>;

    fn file_exists(&self, name: &str) -> bool;

    /// Delete a file. Deleting a missing file is not an error.
    fn delete_file(&self, name: &str) -> Result<()>;

    /// List all file names, sorted.
    fn list_files(&self) -> Result<Vec<String>>;

    fn file_size(&self, name: &str) -> Result<u64>;

    /// Rename a file, replacing `new_name` if it exists.
    fn rename_file(&self, old_name: &str, new_name: &str) -> Result<()>;

    /// Create a uniquely named temporary file next to the others.
    fn create_temp_output(&self, prefix: &str) -> Result<(String, Box<dyn StorageOutput>)> {
        let name = format!("{prefix}.{}.tmp", uuid::Uuid::new_v4().simple());
        let output = self.create_output(&name)?;
        Ok((name, output))
    }
}

/// A readable file.
pub trait StorageInput: Read + Send + std::fmt::Debug {
    /// Total size of the file in bytes.
    fn size(&self) -> Result<u64>;
}

/// A writable file.
pub trait StorageOutput: Write + Send + std::fmt::Debug {
    /// Flush buffered bytes and make them durable.
    fn flush_and_sync(&mut self) -> Result<()>;

    /// Number of bytes written so far.
    fn position(&self) -> u64;

    /// Publish the written bytes. Writing after close fails.
    fn close(&mut self) -> Result<()>;
}

impl StorageOutput for Box<dyn StorageOutput> {
    fn flush_and_sync(&mut self) -> Result<()> {
        self.as_mut().flush_and_sync()
    }

    fn position(&self) -> u64 {
        self.as_ref().position()
    }

    fn close(&mut self) -> Result<()> {
        self.as_mut().close()
    }
}

impl StorageInput for Box<dyn StorageInput> {
    fn size(&self) -> Result<u64> {
        self.as_ref().size()
    }
}

/// Configuration for the supported storage backends.
#[derive(Debug, Clone)]
pub enum StorageConfig {
    File(file::FileStorageConfig),
    Memory(memory::MemoryStorageConfig),
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::Memory(memory::MemoryStorageConfig::default())
    }
}

/// Builds storage instances from a [`StorageConfig`].
pub struct StorageFactory;

impl StorageFactory {
    pub fn create(config: StorageConfig) -> Result<Arc<dyn Storage>> {
        match config {
            StorageConfig::Memory(mem_config) => Ok(Arc::new(memory::MemoryStorage::new(mem_config))),
            StorageConfig::File(file_config) => {
                let path = file_config.path.clone();
                Ok(Arc::new(file::FileStorage::new(&path, file_config)?))
            }
        }
    }
}

/// Storage failures, converted into [`SagittaError`] at the trait boundary.
#[derive(Debug, Clone)]
pub enum StorageError {
    FileNotFound(String),
    IoError(String),
    OutputClosed(String),
}

impl std::fmt::Display for StorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageError::FileNotFound(name) => write!(f, "File not found: {name}"),
            StorageError::IoError(msg) => write!(f, "I/O error: {msg}"),
            StorageError::OutputClosed(name) => write!(f, "Output already closed: {name}"),
        }
    }
}

impl std::error::Error for StorageError {}

impl From<StorageError> for SagittaError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::FileNotFound(name) => {
                SagittaError::not_found(format!("Index file not found: {name}"))
            }
            other => SagittaError::storage(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::storage::file::FileStorageConfig;

    #[test]
    fn test_storage_config_default() {
        match StorageConfig::default() {
            StorageConfig::Memory(_) => {}
            _ => panic!("Expected Memory config"),
        }
    }

    #[test]
    fn test_storage_error_mapping() {
        let err: SagittaError = StorageError::FileNotFound("a.sgt".to_string()).into();
        assert_eq!(err.code(), ErrorCode::NotFound);

        let err: SagittaError = StorageError::IoError("disk full".to_string()).into();
        assert_eq!(err.code(), ErrorCode::Io);
        assert_eq!(err.to_string(), "Storage error: I/O error: disk full");
    }

    #[test]
    fn test_storage_factory_file() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let storage =
            StorageFactory::create(StorageConfig::File(FileStorageConfig::new(temp_dir.path())))
                .unwrap();

        let (name, mut output) = storage.create_temp_output("index").unwrap();
        output.write_all(b"abc").unwrap();
        output.close().unwrap();

        assert!(name.starts_with("index.") && name.ends_with(".tmp"));
        assert_eq!(storage.file_size(&name).unwrap(), 3);
        assert!(storage.open_input("missing").is_err());
    }
}
