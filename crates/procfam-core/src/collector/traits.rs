//! Filesystem abstraction so providers can run against `/proc` or an in-memory fixture.

use std::io;
use std::path::{Path, PathBuf};

/// Minimal filesystem interface used by the `/proc` and cgroup readers.
pub trait FileSystem {
    /// Reads the entire file into a string.
    fn read_to_string(&self, path: &Path) -> io::Result<String>;

    /// Returns true if the path exists.
    fn exists(&self, path: &Path) -> bool;

    /// Lists entries of a directory as full paths.
    fn read_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>>;

    /// Writes `content` to an existing file (cgroup control files).
    fn write(&self, path: &Path, content: &str) -> io::Result<()>;

    /// Creates a directory and any missing parents.
    fn create_dir(&self, path: &Path) -> io::Result<()>;

    /// Removes an empty directory.
    fn remove_dir(&self, path: &Path) -> io::Result<()>;
}

/// Real filesystem backed by `std::fs`.
#[derive(Debug, Clone, Copy, Default)]
pub struct RealFs;

impl RealFs {
    pub fn new() -> Self {
        Self
    }
}

impl FileSystem for RealFs {
    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        std::fs::read(path).map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn read_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>> {
        std::fs::read_dir(path)?
            .map(|entry| entry.map(|e| e.path()))
            .collect()
    }

    fn write(&self, path: &Path, content: &str) -> io::Result<()> {
        std::fs::write(path, content)
    }

    fn create_dir(&self, path: &Path) -> io::Result<()> {
        std::fs::create_dir_all(path)
    }

    fn remove_dir(&self, path: &Path) -> io::Result<()> {
        std::fs::remove_dir(path)
    }
}

impl<T: FileSystem + ?Sized> FileSystem for &T {
    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        (**self).read_to_string(path)
    }

    fn exists(&self, path: &Path) -> bool {
        (**self).exists(path)
    }

    fn read_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>> {
        (**self).read_dir(path)
    }

    fn write(&self, path: &Path, content: &str) -> io::Result<()> {
        (**self).write(path, content)
    }

    fn create_dir(&self, path: &Path) -> io::Result<()> {
        (**self).create_dir(path)
    }

    fn remove_dir(&self, path: &Path) -> io::Result<()> {
        (**self).remove_dir(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_real_fs_roundtrip_in_tempdir() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cgroup.procs");
        std::fs::write(&path, "").unwrap();

        let fs = RealFs::new();
        fs.write(&path, "1234").unwrap();
        assert_eq!(fs.read_to_string(&path).unwrap(), "1234");
        assert!(fs.exists(&path));
        assert_eq!(fs.read_dir(dir.path()).unwrap(), vec![path]);

        let group = dir.path().join("condor").join("job_1");
        fs.create_dir(&group).unwrap();
        assert!(fs.exists(&group));
        fs.remove_dir(&group).unwrap();
        assert!(!fs.exists(&group));
    }
}
