use std::env;
use std::fmt::Display;
use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DirError {
    #[error("Directory not found: {0}")]
    DirNotFound(String),
    #[error("IO Error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type DirResult<T> = Result<T, DirError>;

/// Application name used to namespace directories.
pub static APP_NAME: &str = "topic-atlas";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirType {
    Data,
    Config,
    Cache,
}

impl Display for DirType {
    /// Pretty-print the default directory path hint for this dir type.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DirType::Data => write!(f, "~/.local/share/")?,
            DirType::Config => write!(f, "~/.config/")?,
            DirType::Cache => write!(f, "~/.cache/")?,
        };
        write!(f, "{}", APP_NAME)
    }
}

impl DirType {
    /// XDG environment variable key for this directory type.
    fn xdg_key(&self) -> &'static str {
        match self {
            DirType::Data => "XDG_DATA_HOME",
            DirType::Config => "XDG_CONFIG_HOME",
            DirType::Cache => "XDG_CACHE_HOME",
        }
    }

    /// Relative default path under HOME when XDG is not set.
    fn rel_path(&self) -> &'static str {
        match self {
            DirType::Data => ".local/share",
            DirType::Config => ".config",
            DirType::Cache => ".cache",
        }
    }

    /// Resolve the directory path from XDG or fallback environment hints.
    pub fn get_dir(&self) -> DirResult<PathBuf> {
        if let Some(dir) = env::var_os(self.xdg_key()).filter(|d| !d.is_empty()) {
            Ok(PathBuf::from(dir).join(APP_NAME))
        } else if let Some(home_dir) = env::home_dir() {
            Ok(home_dir.join(self.rel_path()).join(APP_NAME))
        } else if let Ok(userprofile) = env::var("USERPROFILE") {
            Ok(PathBuf::from(userprofile)
                .join(self.rel_path())
                .join(APP_NAME))
        } else {
            Err(DirError::DirNotFound(self.to_string()))
        }
    }

    /// Resolve a named subdirectory, e.g. `Cache.subdir("models")`.
    pub fn subdir<P: AsRef<Path>>(&self, name: P) -> DirResult<PathBuf> {
        Ok(self.get_dir()?.join(name))
    }
}

/// Create `dir` (and parents) if it does not exist yet.
pub fn ensure<P: AsRef<Path>>(dir: P) -> DirResult<PathBuf> {
    let dir = dir.as_ref();
    std::fs::create_dir_all(dir)?;
    Ok(dir.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_hints_include_app_name() {
        assert_eq!(DirType::Cache.to_string(), "~/.cache/topic-atlas");
        assert_eq!(DirType::Config.to_string(), "~/.config/topic-atlas");
    }

    #[test]
    fn subdir_is_namespaced_under_app_dir() {
        let base = DirType::Data.get_dir().unwrap();
        let sub = DirType::Data.subdir("models").unwrap();
        assert_eq!(sub, base.join("models"));
        assert!(base.ends_with(APP_NAME));
    }

    #[test]
    fn ensure_creates_nested_directories() {
        let tmp = tempfile::tempdir().unwrap();
        let target = tmp.path().join("a").join("b");
        let created = ensure(&target).unwrap();
        assert!(created.is_dir());
        assert_eq!(created, target);
    }
}
