//! Central path resolution for Robodock data files.
//!
//! Resolved once at startup from: CLI `--data-dir` > `ROBODOCK_DATA_DIR` env > `~/.robodock`.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

pub const DATA_DIR_ENV: &str = "ROBODOCK_DATA_DIR";

static DATA_DIR: RwLock<Option<PathBuf>> = RwLock::new(None);

fn resolve(explicit: Option<&Path>) -> io::Result<PathBuf> {
    if let Some(p) = explicit {
        return Ok(p.to_path_buf());
    }
    if let Ok(env_val) = std::env::var(DATA_DIR_ENV) {
        if !env_val.trim().is_empty() {
            return Ok(PathBuf::from(env_val));
        }
    }
    dirs::home_dir()
        .map(|home| home.join(".robodock"))
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "HOME directory not found"))
}

/// Initialize the global data directory. Returns the resolved path.
pub fn init_data_dir(explicit: Option<&Path>) -> io::Result<PathBuf> {
    let dir = resolve(explicit)?;
    let mut guard = DATA_DIR.write().unwrap_or_else(PoisonError::into_inner);
    *guard = Some(dir.clone());
    Ok(dir)
}

/// The data directory set by `init_data_dir`, or the default resolution if
/// it was never called.
pub fn data_dir() -> io::Result<PathBuf> {
    let current = DATA_DIR
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .clone();
    match current {
        Some(dir) => Ok(dir),
        None => resolve(None),
    }
}

pub fn db_path() -> io::Result<PathBuf> {
    Ok(data_dir()?.join("robodock.db"))
}

pub fn config_path() -> io::Result<PathBuf> {
    Ok(data_dir()?.join("config.toml"))
}

pub fn log_dir() -> io::Result<PathBuf> {
    Ok(data_dir()?.join("logs"))
}

/// Create all required subdirectories under the data dir.
pub fn ensure_dirs() -> io::Result<()> {
    let base = data_dir()?;
    std::fs::create_dir_all(&base)?;
    std::fs::create_dir_all(base.join("logs"))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_dir_wins_and_derives_file_paths() {
        let dir = tempfile::tempdir().unwrap();
        let resolved = init_data_dir(Some(dir.path())).unwrap();
        assert_eq!(resolved, dir.path());
        assert_eq!(db_path().unwrap(), dir.path().join("robodock.db"));
        assert_eq!(config_path().unwrap(), dir.path().join("config.toml"));

        ensure_dirs().unwrap();
        assert!(dir.path().join("logs").is_dir());
    }
}
