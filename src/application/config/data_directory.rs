use std::fmt::Display;
use std::path::Path;
use std::path::PathBuf;

use anyhow::Context;
use anyhow::Result;
use directories::ProjectDirs;
use serde::Deserialize;
use serde::Serialize;

const SECURITY_DIRECTORY_NAME: &str = "security";
const ENVELOPE_FILE_NAME: &str = "vault_keys.enc";

/// Root of everything lyndrix-core keeps on disk.
///
/// ```text
/// <root>/
///   security/
///     vault_keys.enc
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataDirectory {
    root: PathBuf,
}

impl DataDirectory {
    /// an explicit `root_dir` is used as is; otherwise the platform data
    /// directory, e.g. `~/.local/share/lyndrix` on linux.
    pub fn get(root_dir: Option<PathBuf>) -> Result<Self> {
        let root = match root_dir {
            Some(explicit_root) => explicit_root,
            None => ProjectDirs::from("org", "lyndrix", "lyndrix")
                .context("Could not determine data directory")?
                .data_dir()
                .to_path_buf(),
        };

        Ok(Self { root })
    }

    /// Create directory if it does not exist
    pub async fn create_dir_if_not_exists(dir: &Path) -> Result<()> {
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("Failed to create data directory {}", dir.to_string_lossy()))
    }

    ///////////////////////////////////////////////////////////////////////////
    ///
    /// The data directory that contains everything this process stores
    pub fn root_dir_path(&self) -> PathBuf {
        self.root.clone()
    }

    ///////////////////////////////////////////////////////////////////////////
    ///
    /// Directory holding key material at rest
    pub fn security_dir_path(&self) -> PathBuf {
        self.root.join(Path::new(SECURITY_DIRECTORY_NAME))
    }

    ///////////////////////////////////////////////////////////////////////////
    ///
    /// Default location of the encrypted credential envelope
    pub fn envelope_file_path(&self) -> PathBuf {
        self.security_dir_path().join(Path::new(ENVELOPE_FILE_NAME))
    }
}

impl Display for DataDirectory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.root.display())
    }
}
