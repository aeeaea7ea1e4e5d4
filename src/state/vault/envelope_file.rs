//! The credential envelope on disk.
//!
//! The file's absence is the only signal that this system never initialized
//! the backend, so it is written exactly once per initialization and always
//! replaced atomically.

use std::path::Path;
use std::path::PathBuf;

use rand::distr::Alphanumeric;
use rand::distr::SampleString;
use tokio::io::AsyncWriteExt;

/// handle to the envelope file location
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvelopeFile {
    path: PathBuf,
}

impl EnvelopeFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// true if the envelope file exists.
    ///
    /// an unreadable directory counts as absent.
    pub async fn exists(&self) -> bool {
        tokio::fs::try_exists(&self.path).await.unwrap_or(false)
    }

    /// read the raw envelope bytes
    pub async fn read(&self) -> Result<Vec<u8>, error::EnvelopeFileError> {
        tokio::fs::read(&self.path)
            .await
            .map_err(|e| error::EnvelopeFileError {
                path: self.path.clone(),
                source_file: file!(),
                source_line: line!(),
                error: e,
            })
    }

    /// write the envelope, replacing any existing file
    ///
    /// The blob goes to a temp file in the same directory which is synced and
    /// then renamed over the target, so readers see either the old or the new
    /// envelope. On unix the file is created with mode 0600.
    ///
    /// note: will create missing directories in path if necessary.
    pub async fn write_atomic(&self, blob: &[u8]) -> Result<(), error::EnvelopeFileError> {
        let path = &self.path;

        let mut path_tmp = path.clone();
        let extension = Alphanumeric.sample_string(&mut rand::rng(), 16);
        path_tmp.set_extension(extension);

        if let Some(parent_dir) = path.parent() {
            tokio::fs::create_dir_all(&parent_dir)
                .await
                .map_err(|e| error::EnvelopeFileError {
                    path: path.clone(),
                    source_file: file!(),
                    source_line: line!(),
                    error: e,
                })?;
        }

        let result = Self::write_and_rename(&path_tmp, path, blob).await;
        if result.is_err() {
            let _ = tokio::fs::remove_file(&path_tmp).await;
        }
        result
    }

    async fn write_and_rename(
        path_tmp: &Path,
        path: &Path,
        blob: &[u8],
    ) -> Result<(), error::EnvelopeFileError> {
        let tmp_error = |e| error::EnvelopeFileError {
            path: path_tmp.to_path_buf(),
            source_file: file!(),
            source_line: line!(),
            error: e,
        };

        let mut options = tokio::fs::OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        options.mode(0o600);

        let mut file = options.open(path_tmp).await.map_err(tmp_error)?;
        file.write_all(blob).await.map_err(tmp_error)?;
        file.sync_all().await.map_err(tmp_error)?;
        drop(file);

        // rename is atomic on the filesystems we support
        tokio::fs::rename(path_tmp, path)
            .await
            .map_err(|e| error::EnvelopeFileError {
                path: path.to_path_buf(),
                source_file: file!(),
                source_line: line!(),
                error: e,
            })
    }
}

pub mod error {
    use std::path::PathBuf;

    /// a failed envelope file operation
    #[derive(Debug, thiserror::Error)]
    #[error("envelope file error: {}, path: {}", self.error, self.path.display())]
    pub struct EnvelopeFileError {
        /// file path
        pub path: PathBuf,

        /// source file
        pub source_file: &'static str,

        /// source line
        pub source_line: u32,

        /// filesystem error
        #[source]
        pub error: tokio::io::Error,
    }
}
