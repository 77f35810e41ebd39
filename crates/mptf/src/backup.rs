//! backup and restore of configuration files
//!
//! Before a directory is transformed every `.tf` file directly inside it is copied to a sidecar file
//! (`main.tf` → `main.tf.mptfbackup`). Files that get created while transforming are marked with an empty
//! sidecar (`new.tf` → `new.tf.mptfnew`) because there is nothing to restore them to.
//!
//! | operation         | backup sidecar                      | new-file marker              |
//! |-------------------|-------------------------------------|------------------------------|
//! | [backup_folder]   | created unless one exists already   | untouched                    |
//! | [clear_backup]    | deleted                             | marker and file deleted      |
//! | [reset]           | copied over the file, then deleted  | marker and file deleted      |
//! | [commit_folder]   | deleted                             | marker deleted, file kept    |
//!
//! Only files ending in `.tf` are ever touched, subdirectories are not visited.
use crate::fs::FileSystem;
use crate::syntax::CONFIG_FILE_EXTENSION;
use std::path::{Path, PathBuf};

pub const BACKUP_EXTENSION: &str = ".mptfbackup";
pub const NEW_FILE_EXTENSION: &str = ".mptfnew";

#[derive(thiserror::Error, Debug)]
#[error("unable to {operation} {}", path.display())]
pub struct BackupError {
    pub operation: &'static str,
    pub path: PathBuf,
    #[source]
    pub source: std::io::Error,
}

trait IoResultExt<T> {
    fn during(self, operation: &'static str, path: &Path) -> Result<T, BackupError>;
}

impl<T> IoResultExt<T> for std::io::Result<T> {
    fn during(self, operation: &'static str, path: &Path) -> Result<T, BackupError> {
        self.map_err(|source| {
            tracing::error!(operation, path=%path.display(), error=%source, "backup operation failed");
            BackupError {
                operation,
                path: path.to_owned(),
                source,
            }
        })
    }
}

/// Sidecar of a configuration file
#[derive(Debug, PartialEq, Eq)]
enum Sidecar {
    Backup { file: PathBuf, sidecar: PathBuf },
    NewFile { file: PathBuf, marker: PathBuf },
}

fn sidecar_path(file: &Path, extension: &str) -> PathBuf {
    let mut name = file.as_os_str().to_owned();
    name.push(extension);
    PathBuf::from(name)
}

fn is_config_file(name: &str) -> bool {
    name.ends_with(CONFIG_FILE_EXTENSION)
}

/// Names of the `.tf` files directly inside `dir`
fn config_files(fs: &dyn FileSystem, dir: &Path) -> Result<Vec<PathBuf>, BackupError> {
    Ok(fs
        .list_dir(dir)
        .during("list", dir)?
        .into_iter()
        .filter(|entry| !entry.is_dir && is_config_file(&entry.name))
        .map(|entry| dir.join(entry.name))
        .collect())
}

fn sidecars(fs: &dyn FileSystem, dir: &Path) -> Result<Vec<Sidecar>, BackupError> {
    let mut sidecars = vec![];
    for entry in fs.list_dir(dir).during("list", dir)? {
        if entry.is_dir {
            continue;
        }

        if let Some(name) = entry.name.strip_suffix(BACKUP_EXTENSION) {
            if is_config_file(name) {
                sidecars.push(Sidecar::Backup {
                    file: dir.join(name),
                    sidecar: dir.join(&entry.name),
                });
            }
        } else if let Some(name) = entry.name.strip_suffix(NEW_FILE_EXTENSION) {
            if is_config_file(name) {
                sidecars.push(Sidecar::NewFile {
                    file: dir.join(name),
                    marker: dir.join(&entry.name),
                });
            }
        }
    }
    Ok(sidecars)
}

/// Copies every `.tf` file in `dir` to its backup sidecar
///
/// Existing backups are kept: the first backup wins. Files marked as new are skipped.
pub fn backup_folder(fs: &dyn FileSystem, dir: &Path) -> Result<(), BackupError> {
    tracing::info!(dir=%dir.display(), "creating backups");

    for file in config_files(fs, dir)? {
        let backup = sidecar_path(&file, BACKUP_EXTENSION);
        if fs.exists(&backup).during("check", &backup)? {
            tracing::debug!(path=%backup.display(), "backup exists already");
            continue;
        }

        let marker = sidecar_path(&file, NEW_FILE_EXTENSION);
        if fs.exists(&marker).during("check", &marker)? {
            tracing::debug!(path=%file.display(), "file is new, nothing to back up");
            continue;
        }

        let content = fs.read(&file).during("read", &file)?;
        fs.write(&backup, &content).during("write", &backup)?;
        tracing::trace!(path=%backup.display(), "backup created");
    }

    Ok(())
}

/// Marks `file` as created by a transform
///
/// Does nothing if the file has a backup already.
pub fn mark_new_file(fs: &dyn FileSystem, file: &Path) -> Result<(), BackupError> {
    let backup = sidecar_path(file, BACKUP_EXTENSION);
    if fs.exists(&backup).during("check", &backup)? {
        return Ok(());
    }

    let marker = sidecar_path(file, NEW_FILE_EXTENSION);
    fs.write(&marker, b"").during("write", &marker)?;
    tracing::debug!(path=%file.display(), "marked as new file");
    Ok(())
}

fn remove_if_exists(fs: &dyn FileSystem, path: &Path) -> Result<(), BackupError> {
    if fs.exists(path).during("check", path)? {
        fs.remove(path).during("remove", path)?;
    }
    Ok(())
}

/// Discards all backups of `dir` and removes files created since the backup
pub fn clear_backup(fs: &dyn FileSystem, dir: &Path) -> Result<(), BackupError> {
    tracing::info!(dir=%dir.display(), "clearing backups");

    for sidecar in sidecars(fs, dir)? {
        match sidecar {
            Sidecar::Backup { sidecar, .. } => fs.remove(&sidecar).during("remove", &sidecar)?,
            Sidecar::NewFile { file, marker } => {
                remove_if_exists(fs, &file)?;
                fs.remove(&marker).during("remove", &marker)?;
            }
        }
    }

    Ok(())
}

/// Restores every backed up file of `dir` and removes files created since the backup
pub fn reset(fs: &dyn FileSystem, dir: &Path) -> Result<(), BackupError> {
    tracing::info!(dir=%dir.display(), "restoring backups");

    for sidecar in sidecars(fs, dir)? {
        match sidecar {
            Sidecar::Backup { file, sidecar } => {
                let content = fs.read(&sidecar).during("read", &sidecar)?;
                fs.write(&file, &content).during("restore", &file)?;
                fs.remove(&sidecar).during("remove", &sidecar)?;
            }
            Sidecar::NewFile { file, marker } => {
                remove_if_exists(fs, &file)?;
                fs.remove(&marker).during("remove", &marker)?;
            }
        }
    }

    Ok(())
}

/// Accepts the current state of `dir`: removes all sidecars and keeps every file
pub fn commit_folder(fs: &dyn FileSystem, dir: &Path) -> Result<(), BackupError> {
    tracing::info!(dir=%dir.display(), "committing changes");

    for sidecar in sidecars(fs, dir)? {
        let (Sidecar::Backup { sidecar: path, .. } | Sidecar::NewFile { marker: path, .. }) = sidecar;
        fs.remove(&path).during("remove", &path)?;
    }

    Ok(())
}
