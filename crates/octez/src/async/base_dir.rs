use std::{
    fmt::{self, Display},
    path::{Path, PathBuf},
};

use anyhow::{anyhow, bail, Result};
use tempfile::TempDir;

/// Client state directory (`--base-dir`): keys, aliases and contract
/// aliases live here.
#[derive(Debug)]
pub enum BaseDir {
    /// Scratch directory removed when the client is dropped
    Temp(TempDir),
    /// User provided directory, kept across runs
    Path(PathBuf),
}

impl BaseDir {
    pub fn temp() -> Result<Self> {
        Ok(Self::Temp(TempDir::new()?))
    }

    pub fn path(&self) -> &Path {
        match self {
            BaseDir::Temp(dir) => dir.path(),
            BaseDir::Path(path) => path,
        }
    }

    pub fn to_utf8(&self) -> Result<&str> {
        self.path()
            .to_str()
            .ok_or_else(|| anyhow!("base dir path must be a valid utf-8 path"))
    }
}

impl Display for BaseDir {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path().to_string_lossy())
    }
}

impl TryFrom<PathBuf> for BaseDir {
    type Error = anyhow::Error;

    fn try_from(dir: PathBuf) -> Result<Self> {
        if !dir.exists() {
            bail!("Directory '{}' does not exist", dir.to_string_lossy());
        }
        if !dir.is_dir() {
            bail!("Path '{}' is not a directory", dir.to_string_lossy());
        }
        Ok(BaseDir::Path(dir))
    }
}
