//! In-memory filesystem for running the `/proc` and cgroup code without Linux.

use crate::collector::traits::FileSystem;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Default)]
struct Tree {
    files: HashMap<PathBuf, String>,
    directories: HashSet<PathBuf>,
    writes: Vec<(PathBuf, String)>,
}

impl Tree {
    fn add_parents(&mut self, path: &Path) {
        for ancestor in path.ancestors().skip(1) {
            if !ancestor.as_os_str().is_empty() {
                self.directories.insert(ancestor.to_path_buf());
            }
        }
    }
}

fn not_found(path: &Path) -> io::Error {
    io::Error::new(io::ErrorKind::NotFound, format!("{} not found", path.display()))
}

/// In-memory filesystem shared by all of its clones.
///
/// A test keeps one handle while a provider or cgroup controller owns
/// another. Writes go to a log instead of replacing file content, so
/// fixtures such as `cgroup.procs` keep reading the same. Directories made
/// through [`FileSystem::create_dir`] are visible to every handle.
#[derive(Debug, Clone, Default)]
pub struct MockFs {
    tree: Arc<Mutex<Tree>>,
}

impl MockFs {
    pub fn new() -> Self {
        Self::default()
    }

    fn tree(&self) -> MutexGuard<'_, Tree> {
        self.tree.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Adds or replaces a file, creating its parent directories.
    pub fn add_file(&mut self, path: impl AsRef<Path>, content: impl Into<String>) {
        let path = path.as_ref();
        let mut tree = self.tree();
        tree.add_parents(path);
        tree.files.insert(path.to_path_buf(), content.into());
    }

    pub fn add_dir(&mut self, path: impl AsRef<Path>) {
        let path = path.as_ref();
        let mut tree = self.tree();
        tree.add_parents(path);
        tree.directories.insert(path.to_path_buf());
    }

    /// Adds `/proc/[pid]/` with `stat` and `status`; empty `cgroup` or
    /// `environ` content leaves that file out.
    pub fn add_process(&mut self, pid: i32, stat: &str, status: &str, cgroup: &str, environ: &str) {
        let base = PathBuf::from(format!("/proc/{}", pid));
        self.add_file(base.join("stat"), stat);
        self.add_file(base.join("status"), status);
        for (name, content) in [("cgroup", cgroup), ("environ", environ)] {
            if !content.is_empty() {
                self.add_file(base.join(name), content);
            }
        }
    }

    /// Every write made through any handle, in order.
    pub fn writes(&self) -> Vec<(PathBuf, String)> {
        self.tree().writes.clone()
    }
}

impl FileSystem for MockFs {
    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        self.tree()
            .files
            .get(path)
            .cloned()
            .ok_or_else(|| not_found(path))
    }

    fn exists(&self, path: &Path) -> bool {
        let tree = self.tree();
        tree.files.contains_key(path) || tree.directories.contains(path)
    }

    fn read_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>> {
        let tree = self.tree();
        if !tree.directories.contains(path) {
            return Err(not_found(path));
        }
        let entries: BTreeSet<&PathBuf> = tree
            .files
            .keys()
            .chain(tree.directories.iter())
            .filter(|entry| entry.parent() == Some(path))
            .collect();
        Ok(entries.into_iter().cloned().collect())
    }

    /// Logged only; the directory must exist.
    fn write(&self, path: &Path, content: &str) -> io::Result<()> {
        let mut tree = self.tree();
        let parent_exists = path
            .parent()
            .is_some_and(|parent| tree.directories.contains(parent));
        if !parent_exists {
            return Err(not_found(path));
        }
        tree.writes.push((path.to_path_buf(), content.to_string()));
        Ok(())
    }

    fn create_dir(&self, path: &Path) -> io::Result<()> {
        let mut tree = self.tree();
        tree.add_parents(path);
        tree.directories.insert(path.to_path_buf());
        Ok(())
    }

    /// Fails while subdirectories remain; files inside go with it.
    fn remove_dir(&self, path: &Path) -> io::Result<()> {
        let mut tree = self.tree();
        if !tree.directories.contains(path) {
            return Err(not_found(path));
        }
        if tree
            .directories
            .iter()
            .any(|dir| dir != path && dir.starts_with(path))
        {
            return Err(io::Error::new(
                io::ErrorKind::DirectoryNotEmpty,
                format!("{} has subdirectories", path.display()),
            ));
        }
        tree.files.retain(|file, _| !file.starts_with(path));
        tree.directories.remove(path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_dir_lists_direct_children() {
        let mut fs = MockFs::new();
        fs.add_file("/proc/1/stat", "stat content");
        fs.add_file("/proc/1/status", "status content");
        fs.add_file("/proc/2/stat", "stat content 2");
        fs.add_file("/proc/uptime", "1.0 1.0\n");

        assert_eq!(
            fs.read_dir(Path::new("/proc")).unwrap(),
            vec![
                PathBuf::from("/proc/1"),
                PathBuf::from("/proc/2"),
                PathBuf::from("/proc/uptime")
            ]
        );
        assert_eq!(fs.read_dir(Path::new("/proc/1")).unwrap().len(), 2);
        assert_eq!(
            fs.read_to_string(Path::new("/nonexistent")).unwrap_err().kind(),
            io::ErrorKind::NotFound
        );
    }

    #[test]
    fn test_writes_are_logged_for_every_handle() {
        let mut fs = MockFs::new();
        fs.add_file("/sys/fs/cgroup/job/cgroup.freeze", "0\n");
        let handle = fs.clone();

        fs.write(Path::new("/sys/fs/cgroup/job/cgroup.freeze"), "1")
            .unwrap();
        assert!(fs.write(Path::new("/sys/fs/other/cgroup.freeze"), "1").is_err());

        assert_eq!(
            handle.writes(),
            vec![(
                PathBuf::from("/sys/fs/cgroup/job/cgroup.freeze"),
                "1".to_string()
            )]
        );
        assert_eq!(
            handle
                .read_to_string(Path::new("/sys/fs/cgroup/job/cgroup.freeze"))
                .unwrap(),
            "0\n"
        );
    }

    #[test]
    fn test_create_and_remove_dir() {
        let fs = MockFs::new();
        let handle = fs.clone();
        fs.create_dir(Path::new("/sys/fs/cgroup/condor/job_7")).unwrap();
        assert!(handle.exists(Path::new("/sys/fs/cgroup/condor")));
        assert!(handle.exists(Path::new("/sys/fs/cgroup/condor/job_7")));

        assert!(fs.remove_dir(Path::new("/sys/fs/cgroup/condor")).is_err());
        fs.remove_dir(Path::new("/sys/fs/cgroup/condor/job_7")).unwrap();
        assert!(!handle.exists(Path::new("/sys/fs/cgroup/condor/job_7")));
        assert!(fs.remove_dir(Path::new("/sys/fs/cgroup/condor/job_7")).is_err());
    }
}
