//! Destinations for finished class files
//!
//! A [`ClassArchive`] receives named entries (eg. `me/alec/Point.class`). The JAR format itself is
//! left to whoever consumes the entries: [`DirectoryArchive`] lays them out on disk the way `jar`
//! expects its input, and [`MemoryArchive`] keeps them around for inspection.

use crate::jvm::Error;
use log::debug;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Something that accepts named class file entries
pub trait ClassArchive {
    /// Store the bytes under a `/`-separated relative name
    fn add_entry(&mut self, name: &str, bytes: &[u8]) -> Result<(), Error>;
}

/// Archive writing every entry as a file under a root directory
#[derive(Debug, Clone)]
pub struct DirectoryArchive {
    root: PathBuf,
}

impl DirectoryArchive {
    pub fn new(root: impl AsRef<Path>) -> DirectoryArchive {
        DirectoryArchive {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path at which an entry ends up
    pub fn entry_path(&self, name: &str) -> PathBuf {
        name.split('/')
            .fold(self.root.clone(), |path, segment| path.join(segment))
    }
}

impl ClassArchive for DirectoryArchive {
    fn add_entry(&mut self, name: &str, bytes: &[u8]) -> Result<(), Error> {
        let path = self.entry_path(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        debug!("Writing {} bytes to {:?}", bytes.len(), path);
        fs::write(&path, bytes)?;
        Ok(())
    }
}

/// Archive keeping its entries in memory, sorted by name
#[derive(Debug, Default, Clone)]
pub struct MemoryArchive {
    entries: BTreeMap<String, Vec<u8>>,
}

impl MemoryArchive {
    pub fn new() -> MemoryArchive {
        MemoryArchive::default()
    }

    pub fn get(&self, name: &str) -> Option<&[u8]> {
        self.entries.get(name).map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn into_entries(self) -> BTreeMap<String, Vec<u8>> {
        self.entries
    }
}

impl ClassArchive for MemoryArchive {
    fn add_entry(&mut self, name: &str, bytes: &[u8]) -> Result<(), Error> {
        // Later entries replace earlier ones with the same name
        self.entries.insert(name.to_owned(), bytes.to_vec());
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn memory_archive() {
        let mut archive = MemoryArchive::new();
        assert!(archive.is_empty());
        archive.add_entry("me/alec/Point.class", &[1, 2]).unwrap();
        archive.add_entry("Main.class", &[3]).unwrap();
        archive.add_entry("me/alec/Point.class", &[4]).unwrap();

        assert_eq!(archive.len(), 2);
        assert_eq!(archive.get("me/alec/Point.class"), Some(&[4u8][..]));
        assert_eq!(
            archive.names().collect::<Vec<_>>(),
            vec!["Main.class", "me/alec/Point.class"]
        );
        assert!(archive.get("Point.class").is_none());
    }

    #[test]
    fn directory_archive() {
        let root = std::env::temp_dir().join(format!("jvm-assembler-archive-{}", std::process::id()));
        let mut archive = DirectoryArchive::new(&root);
        archive
            .add_entry("me/alec/Point.class", &[0xCA, 0xFE])
            .unwrap();

        let path = root.join("me").join("alec").join("Point.class");
        assert_eq!(archive.entry_path("me/alec/Point.class"), path);
        assert_eq!(fs::read(&path).unwrap(), vec![0xCA, 0xFE]);
        fs::remove_dir_all(&root).unwrap();
    }
}
