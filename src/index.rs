//! Content index for the sync directory.
//!
//! Scans one level of a directory (no recursion), keeping a content hash
//! per file plus a `synced` flag. The replica role marks entries synced as
//! files are confirmed matching or freshly written; entries still unsynced
//! when the run finishes are pruned from disk. The index lives for one run
//! only and is never persisted.

use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Per-file state tracked for the duration of one sync run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    /// Lowercase hex SHA-256 of the file contents
    pub hash: String,
    /// Set once the file is confirmed matching or freshly written
    pub synced: bool,
}

/// Name -> entry map for the files in one sync directory.
#[derive(Debug)]
pub struct FileIndex {
    directory: PathBuf,
    entries: HashMap<String, IndexEntry>,
}

impl FileIndex {
    /// Scans `directory` one level deep and hashes every regular file whose
    /// name ends in `extension` (with or without a leading dot).
    /// Subdirectories and non-matching names are skipped.
    pub fn build(directory: impl Into<PathBuf>, extension: &str) -> Result<Self, IndexError> {
        let directory = directory.into();
        let suffix = if extension.starts_with('.') {
            extension.to_string()
        } else {
            format!(".{}", extension)
        };

        let mut entries = HashMap::new();
        let dir = fs::read_dir(&directory)
            .map_err(|e| IndexError::Directory(directory.clone(), e))?;
        for dir_entry in dir {
            let dir_entry = dir_entry.map_err(|e| IndexError::Directory(directory.clone(), e))?;
            let path = dir_entry.path();
            if !path.is_file() {
                continue;
            }
            let name = match dir_entry.file_name().into_string() {
                Ok(name) => name,
                Err(_) => continue,
            };
            if !name.ends_with(&suffix) {
                continue;
            }

            let bytes = fs::read(&path).map_err(|e| IndexError::File(name.clone(), e))?;
            let hash = format!("{:x}", Sha256::digest(&bytes));
            tracing::debug!(file = %name, %hash, "indexed file");
            entries.insert(name, IndexEntry { hash, synced: false });
        }

        Ok(Self { directory, entries })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&IndexEntry> {
        self.entries.get(name)
    }

    /// Iterates entries in arbitrary order.
    pub fn entries(&self) -> impl Iterator<Item = (&String, &IndexEntry)> {
        self.entries.iter()
    }

    /// Marks an existing entry synced. Returns false if the name is unknown.
    pub fn mark_synced(&mut self, name: &str) -> bool {
        match self.entries.get_mut(name) {
            Some(entry) => {
                entry.synced = true;
                true
            }
            None => false,
        }
    }

    /// Upserts an entry as synced. The hash is left empty for fresh entries;
    /// it is not needed again within the run.
    pub fn insert_synced(&mut self, name: &str) {
        self.entries
            .entry(name.to_string())
            .and_modify(|e| e.synced = true)
            .or_insert(IndexEntry {
                hash: String::new(),
                synced: true,
            });
    }

    /// Names of entries never confirmed during this run.
    pub fn unsynced(&self) -> Vec<String> {
        self.entries
            .iter()
            .filter(|(_, e)| !e.synced)
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Reads a file's bytes from the sync directory.
    pub fn read_file(&self, name: &str) -> io::Result<Vec<u8>> {
        fs::read(self.directory.join(name))
    }

    /// Writes a file into the sync directory, overwriting any existing copy.
    pub fn write_file(&self, name: &str, bytes: &[u8]) -> io::Result<()> {
        fs::write(self.directory.join(name), bytes)
    }

    /// Deletes a file from the sync directory.
    pub fn remove_file(&self, name: &str) -> io::Result<()> {
        fs::remove_file(self.directory.join(name))
    }
}

/// Errors from building the index.
#[derive(Debug)]
pub enum IndexError {
    /// Failed to open or iterate the sync directory
    Directory(PathBuf, io::Error),
    /// Failed to read a file while hashing it
    File(String, io::Error),
}

impl std::fmt::Display for IndexError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IndexError::Directory(path, e) => {
                write!(f, "Failed to scan directory '{}': {}", path.display(), e)
            }
            IndexError::File(name, e) => write!(f, "Failed to read file '{}': {}", name, e),
        }
    }
}

impl std::error::Error for IndexError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            IndexError::Directory(_, e) | IndexError::File(_, e) => Some(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_build_hashes_matching_files() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.md"), b"hello").unwrap();
        fs::write(dir.path().join("b.md"), b"world").unwrap();

        let index = FileIndex::build(dir.path(), "md").unwrap();
        assert_eq!(index.len(), 2);

        let entry = index.get("a.md").unwrap();
        assert!(!entry.synced);
        // sha256("hello")
        assert_eq!(
            entry.hash,
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[test]
    fn test_build_skips_other_extensions_and_subdirs() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("keep.md"), b"x").unwrap();
        fs::write(dir.path().join("skip.txt"), b"x").unwrap();
        fs::create_dir(dir.path().join("nested.md")).unwrap();

        let index = FileIndex::build(dir.path(), "md").unwrap();
        assert_eq!(index.len(), 1);
        assert!(index.get("keep.md").is_some());
    }

    #[test]
    fn test_build_accepts_dotted_extension() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.md"), b"x").unwrap();

        let index = FileIndex::build(dir.path(), ".md").unwrap();
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_build_missing_directory_errors() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("nope");
        let result = FileIndex::build(&missing, "md");
        assert!(matches!(result, Err(IndexError::Directory(_, _))));
    }

    #[test]
    fn test_mark_and_insert_synced() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.md"), b"x").unwrap();

        let mut index = FileIndex::build(dir.path(), "md").unwrap();
        assert!(index.mark_synced("a.md"));
        assert!(!index.mark_synced("unknown.md"));

        index.insert_synced("new.md");
        let entry = index.get("new.md").unwrap();
        assert!(entry.synced);
        assert!(entry.hash.is_empty());
    }

    #[test]
    fn test_unsynced_names() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.md"), b"x").unwrap();
        fs::write(dir.path().join("b.md"), b"y").unwrap();

        let mut index = FileIndex::build(dir.path(), "md").unwrap();
        index.mark_synced("a.md");

        assert_eq!(index.unsynced(), vec!["b.md".to_string()]);
    }

    #[test]
    fn test_file_store_round_trip() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("seed.md"), b"x").unwrap();

        let index = FileIndex::build(dir.path(), "md").unwrap();
        index.write_file("new.md", b"contents").unwrap();
        assert_eq!(index.read_file("new.md").unwrap(), b"contents");

        index.remove_file("new.md").unwrap();
        assert!(index.read_file("new.md").is_err());
    }
}
