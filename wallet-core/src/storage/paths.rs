use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;

use crate::errors::{WalletError, WalletResult};

/// Filesystem layout of a wallet data directory.
#[derive(Debug, Clone)]
pub struct WalletPaths {
    root_dir: PathBuf,
    keystore_file: PathBuf,
    backup_dir: PathBuf,
    config_file: PathBuf,
}

impl WalletPaths {
    pub const KEYSTORE_FILENAME: &'static str = "wallet.keystore";
    pub const CONFIG_FILENAME: &'static str = "wallet.config";
    /// Suffix of timestamped keystore backups.
    pub const BACKUP_EXTENSION: &'static str = "keystore.bak";

    pub fn new(root: impl AsRef<Path>) -> WalletResult<Self> {
        let root_dir = root.as_ref().to_path_buf();
        if root_dir.as_os_str().is_empty() {
            return Err(WalletError::StorageError(
                "Wallet root directory cannot be empty".to_string(),
            ));
        }

        Ok(Self {
            keystore_file: root_dir.join(Self::KEYSTORE_FILENAME),
            backup_dir: root_dir.join("backups"),
            config_file: root_dir.join(Self::CONFIG_FILENAME),
            root_dir,
        })
    }

    pub fn ensure_directories(&self) -> WalletResult<()> {
        fs::create_dir_all(&self.root_dir)?;
        fs::create_dir_all(&self.backup_dir)?;
        Ok(())
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    pub fn keystore_file(&self) -> &Path {
        &self.keystore_file
    }

    pub fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }

    pub fn config_file(&self) -> &Path {
        &self.config_file
    }

    /// Copy the current keystore into the backup directory.
    ///
    /// Backup names embed a microsecond timestamp so they sort chronologically.
    pub fn create_keystore_backup(&self) -> WalletResult<PathBuf> {
        if !self.keystore_file.exists() {
            return Err(WalletError::NotFound(
                "Keystore file does not exist, cannot create backup".to_string(),
            ));
        }
        fs::create_dir_all(&self.backup_dir)?;

        let timestamp = Utc::now().format("%Y%m%d_%H%M%S_%6f");
        let backup_path = self
            .backup_dir
            .join(format!("keystore_{}.{}", timestamp, Self::BACKUP_EXTENSION));
        fs::copy(&self.keystore_file, &backup_path)?;

        let original_size = fs::metadata(&self.keystore_file)?.len();
        let backup_size = fs::metadata(&backup_path)?.len();
        if original_size != backup_size {
            fs::remove_file(&backup_path)?;
            return Err(WalletError::StorageError(
                "Backup verification failed: size mismatch".to_string(),
            ));
        }

        log::debug!("Keystore backed up to {}", backup_path.display());
        Ok(backup_path)
    }

    /// Replace the keystore with a backup copy, rolling back on failure.
    pub fn restore_keystore_from_backup(&self, backup_path: impl AsRef<Path>) -> WalletResult<()> {
        let backup_path = backup_path.as_ref();
        if !backup_path.exists() {
            return Err(WalletError::NotFound(format!(
                "Backup file does not exist: {}",
                backup_path.display()
            )));
        }

        let rollback = if self.keystore_file.exists() {
            let path = self.keystore_file.with_extension("pre-restore");
            fs::copy(&self.keystore_file, &path)?;
            Some(path)
        } else {
            None
        };

        match fs::copy(backup_path, &self.keystore_file) {
            Ok(_) => {
                if let Some(path) = rollback {
                    let _ = fs::remove_file(path);
                }
                log::info!("Keystore restored from {}", backup_path.display());
                Ok(())
            }
            Err(err) => {
                if let Some(path) = rollback {
                    let _ = fs::copy(&path, &self.keystore_file);
                    let _ = fs::remove_file(path);
                }
                Err(WalletError::StorageError(format!(
                    "Failed to restore keystore from backup: {}",
                    err
                )))
            }
        }
    }

    /// Backup files, newest first.
    pub fn list_backups(&self) -> WalletResult<Vec<PathBuf>> {
        if !self.backup_dir.exists() {
            return Ok(Vec::new());
        }

        let mut backups: Vec<PathBuf> = fs::read_dir(&self.backup_dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_file())
            .filter(|path| {
                path.file_name()
                    .and_then(|name| name.to_str())
                    .map(|name| name.ends_with(Self::BACKUP_EXTENSION))
                    .unwrap_or(false)
            })
            .collect();

        backups.sort_by(|a, b| b.file_name().cmp(&a.file_name()));
        Ok(backups)
    }

    /// Delete all but the `keep_count` newest backups.
    pub fn prune_old_backups(&self, keep_count: usize) -> WalletResult<usize> {
        let backups = self.list_backups()?;
        let mut deleted = 0;
        for path in backups.iter().skip(keep_count) {
            fs::remove_file(path)?;
            deleted += 1;
        }
        Ok(deleted)
    }
}

/// Rename an unreadable file to `<name>.corrupt-<timestamp>` next to it so a
/// fresh one can take its place.
pub fn set_aside(file: &Path) -> WalletResult<PathBuf> {
    let name = file
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| WalletError::FileNotFound(file.display().to_string()))?;
    let timestamp = Utc::now().format("%Y%m%d_%H%M%S_%6f");
    let target = file.with_file_name(format!("{}.corrupt-{}", name, timestamp));
    fs::rename(file, &target)?;
    log::warn!("Moved unreadable {} to {}", file.display(), target.display());
    Ok(target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn set_aside_keeps_the_original_bytes() {
        let temp = TempDir::new().unwrap();
        let paths = WalletPaths::new(temp.path()).unwrap();
        write_keystore(&paths, b"{truncated");

        let moved = set_aside(paths.keystore_file()).unwrap();
        assert!(!paths.keystore_file().exists());
        assert_eq!(fs::read(&moved).unwrap(), b"{truncated");
        assert!(moved
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("wallet.keystore.corrupt-"));
        assert!(paths.list_backups().unwrap().is_empty());
    }

    fn write_keystore(paths: &WalletPaths, content: &[u8]) {
        paths.ensure_directories().unwrap();
        fs::write(paths.keystore_file(), content).unwrap();
    }

    #[test]
    fn layout_is_rooted_at_directory() {
        let temp = TempDir::new().unwrap();
        let paths = WalletPaths::new(temp.path()).unwrap();

        assert_eq!(paths.keystore_file(), temp.path().join("wallet.keystore"));
        assert_eq!(paths.config_file(), temp.path().join("wallet.config"));
        assert_eq!(paths.backup_dir(), temp.path().join("backups"));
    }

    #[test]
    fn empty_root_is_rejected() {
        match WalletPaths::new("") {
            Err(WalletError::StorageError(msg)) => assert!(msg.contains("cannot be empty")),
            other => panic!("expected StorageError, got {:?}", other),
        }
    }

    #[test]
    fn backup_requires_existing_keystore() {
        let temp = TempDir::new().unwrap();
        let paths = WalletPaths::new(temp.path()).unwrap();
        paths.ensure_directories().unwrap();

        assert!(matches!(
            paths.create_keystore_backup(),
            Err(WalletError::NotFound(_))
        ));
    }

    #[test]
    fn restore_brings_back_backed_up_content() {
        let temp = TempDir::new().unwrap();
        let paths = WalletPaths::new(temp.path()).unwrap();
        write_keystore(&paths, b"original");

        let backup = paths.create_keystore_backup().unwrap();
        let name = backup.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("keystore_"));
        assert!(name.ends_with(".keystore.bak"));

        fs::write(paths.keystore_file(), b"modified").unwrap();
        paths.restore_keystore_from_backup(&backup).unwrap();
        assert_eq!(fs::read(paths.keystore_file()).unwrap(), b"original");
    }

    #[test]
    fn restore_from_missing_backup_fails() {
        let temp = TempDir::new().unwrap();
        let paths = WalletPaths::new(temp.path()).unwrap();
        let result = paths.restore_keystore_from_backup(temp.path().join("nope.keystore.bak"));
        assert!(matches!(result, Err(WalletError::NotFound(_))));
    }

    #[test]
    fn backups_listed_newest_first_and_pruned() {
        let temp = TempDir::new().unwrap();
        let paths = WalletPaths::new(temp.path()).unwrap();
        write_keystore(&paths, b"data");

        let mut created = Vec::new();
        for _ in 0..4 {
            created.push(paths.create_keystore_backup().unwrap());
            thread::sleep(Duration::from_millis(5));
        }
        fs::write(paths.backup_dir().join("notes.txt"), b"ignored").unwrap();

        let listed = paths.list_backups().unwrap();
        assert_eq!(listed.len(), 4);
        assert_eq!(listed[0], created[3]);
        assert_eq!(listed[3], created[0]);

        assert_eq!(paths.prune_old_backups(2).unwrap(), 2);
        assert_eq!(paths.list_backups().unwrap(), vec![created[3].clone(), created[2].clone()]);
        assert_eq!(paths.prune_old_backups(10).unwrap(), 0);
    }
}
