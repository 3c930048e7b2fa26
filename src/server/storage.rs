use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Component, Path, PathBuf};

use thiserror::Error;

use crate::core::ErrorCode;

/// Byte source for a download, opened by a [`Storage`] implementation
pub type Source = Box<dyn Read + Send + Sync>;

/// Byte sink for an upload
pub type Sink = Box<dyn Write + Send + Sync>;

/// Why a request filename could not be opened
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("empty filename")]
    EmptyFilename,
    #[error("filename {0:?} escapes the served directory")]
    OutsideRoot(String),
    #[error("file {0:?} not found")]
    NotFound(String),
    #[error("file {0:?} already exists")]
    AlreadyExists(String),
    #[error("writes are disabled")]
    ReadOnly,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl StorageError {
    /// Protocol error code reported to the peer
    pub fn error_code(&self) -> ErrorCode {
        match self {
            StorageError::EmptyFilename => ErrorCode::IllegalOperation,
            StorageError::OutsideRoot(_) => ErrorCode::AccessViolation,
            StorageError::NotFound(_) => ErrorCode::FileNotFound,
            StorageError::AlreadyExists(_) => ErrorCode::FileExists,
            StorageError::ReadOnly => ErrorCode::AccessViolation,
            StorageError::Io(e) => ErrorCode::from_io(e),
        }
    }
}

/// Opens request filenames on behalf of transfer sessions
///
/// Sessions never see paths; the dispatcher validates the request and
/// hands them an already-opened source or sink keyed by the filename.
pub trait Storage: Send + Sync {
    /// Open `filename` for a download (RRQ)
    fn open_source(&self, filename: &str) -> Result<Source, StorageError>;
    /// Create `filename` for an upload (WRQ)
    fn open_sink(&self, filename: &str) -> Result<Sink, StorageError>;
}

/// Storage rooted at a single directory
///
/// Request filenames are resolved strictly inside the root: absolute
/// names and any path component other than a plain name (`..`, a drive
/// prefix) are refused before the filesystem is touched.
pub struct DirStorage {
    root: PathBuf,
    read_only: bool,
    overwrite: bool,
}

impl DirStorage {
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            read_only: false,
            overwrite: false,
        }
    }

    /// Refuse all write requests
    pub fn with_read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    /// Let uploads replace existing files
    pub fn with_overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    fn resolve(&self, filename: &str) -> Result<PathBuf, StorageError> {
        if filename.is_empty() {
            return Err(StorageError::EmptyFilename);
        }
        let relative = Path::new(filename);
        if relative.is_absolute() {
            return Err(StorageError::OutsideRoot(filename.to_string()));
        }
        for component in relative.components() {
            match component {
                Component::Normal(_) => {}
                _ => return Err(StorageError::OutsideRoot(filename.to_string())),
            }
        }
        Ok(self.root.join(relative))
    }
}

impl Storage for DirStorage {
    fn open_source(&self, filename: &str) -> Result<Source, StorageError> {
        let path = self.resolve(filename)?;
        if !path.is_file() {
            return Err(StorageError::NotFound(filename.to_string()));
        }
        let file = File::open(&path)?;
        Ok(Box::new(file))
    }

    fn open_sink(&self, filename: &str) -> Result<Sink, StorageError> {
        if self.read_only {
            return Err(StorageError::ReadOnly);
        }
        let path = self.resolve(filename)?;
        let open = if self.overwrite {
            OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&path)
        } else {
            OpenOptions::new().write(true).create_new(true).open(&path)
        };
        let file = open.map_err(|e| match e.kind() {
            std::io::ErrorKind::AlreadyExists => StorageError::AlreadyExists(filename.to_string()),
            _ => StorageError::Io(e),
        })?;
        Ok(Box::new(file))
    }
}
