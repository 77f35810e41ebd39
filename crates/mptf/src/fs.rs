//! filesystem access
//!
//! Everything that reads or writes configuration files goes through [FileSystem]. The binary uses [OsFs], tests
//! use [MemoryFs].
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::io;
use std::path::{Component, Path, PathBuf};

/// A single entry returned by [FileSystem::list_dir]
#[derive(Debug, Clone, PartialEq, Eq, derive_new::new)]
pub struct DirEntry {
    pub name: String,
    pub is_dir: bool,
}

pub trait FileSystem: Send + Sync + std::fmt::Debug {
    /// Lists the direct children of `dir`, sorted by name
    fn list_dir(&self, dir: &Path) -> io::Result<Vec<DirEntry>>;
    fn read(&self, path: &Path) -> io::Result<Vec<u8>>;
    /// Creates or truncates `path`
    fn write(&self, path: &Path, contents: &[u8]) -> io::Result<()>;
    fn exists(&self, path: &Path) -> io::Result<bool>;
    fn remove(&self, path: &Path) -> io::Result<()>;

    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        let bytes = self.read(path)?;
        String::from_utf8(bytes).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }
}

/// The real filesystem
#[derive(Debug, Default, Clone, Copy)]
pub struct OsFs;

impl FileSystem for OsFs {
    fn list_dir(&self, dir: &Path) -> io::Result<Vec<DirEntry>> {
        let mut entries = vec![];
        for dir_entry in std::fs::read_dir(dir)? {
            let dir_entry = dir_entry?;
            entries.push(DirEntry::new(
                dir_entry.file_name().to_string_lossy().into_owned(),
                dir_entry.file_type()?.is_dir(),
            ));
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        std::fs::read(path)
    }

    fn write(&self, path: &Path, contents: &[u8]) -> io::Result<()> {
        std::fs::write(path, contents)
    }

    fn exists(&self, path: &Path) -> io::Result<bool> {
        path.try_exists()
    }

    fn remove(&self, path: &Path) -> io::Result<()> {
        std::fs::remove_file(path)
    }
}

/// In-memory filesystem
///
/// Only files are stored. A directory exists as long as any file lives below it.
#[derive(Debug, Default)]
pub struct MemoryFs {
    files: Mutex<BTreeMap<PathBuf, Vec<u8>>>,
}

impl MemoryFs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_files<P, C>(files: impl IntoIterator<Item = (P, C)>) -> Self
    where
        P: AsRef<Path>,
        C: AsRef<[u8]>,
    {
        let fs = Self::new();
        {
            let mut map = fs.files.lock();
            for (path, contents) in files {
                map.insert(normalize(path.as_ref()), contents.as_ref().to_vec());
            }
        }
        fs
    }

    /// Snapshot of all stored files
    pub fn files(&self) -> BTreeMap<PathBuf, Vec<u8>> {
        self.files.lock().clone()
    }

    fn is_dir(files: &BTreeMap<PathBuf, Vec<u8>>, dir: &Path) -> bool {
        files
            .keys()
            .any(|path| path != dir && path.starts_with(dir))
    }
}

impl FileSystem for MemoryFs {
    fn list_dir(&self, dir: &Path) -> io::Result<Vec<DirEntry>> {
        let dir = normalize(dir);
        let files = self.files.lock();

        if files.contains_key(&dir) {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                format!("{} is not a directory", dir.display()),
            ));
        }

        let mut entries: BTreeMap<String, bool> = BTreeMap::new();
        for path in files.keys() {
            let Ok(rest) = path.strip_prefix(&dir) else {
                continue;
            };
            let mut components = rest.components();
            let Some(first) = components.next() else {
                continue;
            };
            let is_dir = components.next().is_some();
            let entry = entries
                .entry(first.as_os_str().to_string_lossy().into_owned())
                .or_default();
            *entry |= is_dir;
        }

        if entries.is_empty() && !dir.as_os_str().is_empty() && dir != Path::new("/") {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} not found", dir.display()),
            ));
        }

        Ok(entries
            .into_iter()
            .map(|(name, is_dir)| DirEntry::new(name, is_dir))
            .collect())
    }

    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        let path = normalize(path);
        self.files.lock().get(&path).cloned().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} not found", path.display()),
            )
        })
    }

    fn write(&self, path: &Path, contents: &[u8]) -> io::Result<()> {
        let path = normalize(path);
        let mut files = self.files.lock();
        if Self::is_dir(&files, &path) {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                format!("{} is a directory", path.display()),
            ));
        }
        files.insert(path, contents.to_vec());
        Ok(())
    }

    fn exists(&self, path: &Path) -> io::Result<bool> {
        let path = normalize(path);
        let files = self.files.lock();
        Ok(files.contains_key(&path) || Self::is_dir(&files, &path))
    }

    fn remove(&self, path: &Path) -> io::Result<()> {
        let path = normalize(path);
        match self.files.lock().remove(&path) {
            Some(_) => Ok(()),
            None => Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} not found", path.display()),
            )),
        }
    }
}

/// Lexically normalizes a path (`.` removed, `..` folded), without touching the filesystem
pub fn normalize(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match normalized.components().next_back() {
                Some(Component::Normal(_)) => {
                    normalized.pop();
                }
                Some(Component::RootDir | Component::Prefix(_)) => {}
                _ => normalized.push(".."),
            },
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized
}

/// Makes `path` absolute relative to the current work directory and normalizes it
pub fn absolute(path: &Path) -> io::Result<PathBuf> {
    if path.is_absolute() {
        return Ok(normalize(path));
    }
    Ok(normalize(&std::env::current_dir()?.join(path)))
}
