//! Virtual file and directory values.
//!
//! An [`Entry`] is what `open` hands back: either file bytes with a read
//! cursor, or a directory's child list. It never touches a real disk.

use std::io::{self, Read, Seek, SeekFrom};
use std::time::SystemTime;

use crate::vfs::{DirEntry, FileAttr, VfsError, VfsResult, DIR_PERM, FILE_PERM};

/// Payload of an entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryData {
    /// File contents.
    File(Vec<u8>),
    /// Directory children, sorted by name.
    Dir(Vec<DirEntry>),
}

/// An opened virtual file or directory.
#[derive(Debug, Clone)]
pub struct Entry {
    path: String,
    attr: FileAttr,
    data: EntryData,
    pos: u64,
}

impl Entry {
    /// A file entry with default permissions.
    pub fn file(path: impl Into<String>, data: Vec<u8>) -> Self {
        Self::new(path, EntryData::File(data), None)
    }

    /// A directory entry with default permissions.
    pub fn dir(path: impl Into<String>, mut children: Vec<DirEntry>) -> Self {
        children.sort_by(|a, b| a.name.cmp(&b.name));
        Self::new(path, EntryData::Dir(children), None)
    }

    /// Build an entry, keeping `perm` when given.
    pub fn new(path: impl Into<String>, data: EntryData, perm: Option<u32>) -> Self {
        let attr = match &data {
            EntryData::File(bytes) => {
                FileAttr::file(bytes.len() as u64, perm.unwrap_or(FILE_PERM))
            }
            EntryData::Dir(_) => FileAttr::directory(perm.unwrap_or(DIR_PERM)),
        };
        Self {
            path: path.into(),
            attr,
            data,
            pos: 0,
        }
    }

    /// Replace the modification time.
    pub fn with_mtime(mut self, mtime: SystemTime) -> Self {
        self.attr.mtime = mtime;
        self
    }

    /// Path this entry was opened at.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Entry metadata.
    pub fn attr(&self) -> &FileAttr {
        &self.attr
    }

    /// Returns true for directory entries.
    pub fn is_dir(&self) -> bool {
        matches!(self.data, EntryData::Dir(_))
    }

    /// Raw payload.
    pub fn data(&self) -> &EntryData {
        &self.data
    }

    /// Whole file contents.
    pub fn contents(&self) -> VfsResult<&[u8]> {
        match &self.data {
            EntryData::File(bytes) => Ok(bytes),
            EntryData::Dir(_) => Err(VfsError::is_a_directory(&self.path)),
        }
    }

    /// Consume the entry, returning the file contents.
    pub fn into_bytes(self) -> VfsResult<Vec<u8>> {
        match self.data {
            EntryData::File(bytes) => Ok(bytes),
            EntryData::Dir(_) => Err(VfsError::is_a_directory(self.path)),
        }
    }

    /// Directory children.
    pub fn read_dir(&self) -> VfsResult<&[DirEntry]> {
        match &self.data {
            EntryData::Dir(children) => Ok(children),
            EntryData::File(_) => Err(VfsError::not_a_directory(&self.path)),
        }
    }
}

impl Read for Entry {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let bytes = match &self.data {
            EntryData::File(bytes) => bytes,
            EntryData::Dir(_) => return Err(VfsError::is_a_directory(&self.path).into()),
        };
        let start = (self.pos as usize).min(bytes.len());
        let n = buf.len().min(bytes.len() - start);
        buf[..n].copy_from_slice(&bytes[start..start + n]);
        self.pos += n as u64;
        Ok(n)
    }
}

impl Seek for Entry {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let len = self.attr.size as i64;
        let next = match pos {
            SeekFrom::Start(offset) => offset as i64,
            SeekFrom::End(delta) => len + delta,
            SeekFrom::Current(delta) => self.pos as i64 + delta,
        };
        if next < 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek before start of file",
            ));
        }
        self.pos = next as u64;
        Ok(self.pos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_and_seek() {
        let mut entry = Entry::file("a.txt", b"hello world".to_vec());
        assert_eq!(entry.attr().size, 11);

        let mut buf = [0u8; 5];
        entry.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"hello");

        entry.seek(SeekFrom::End(-5)).unwrap();
        let mut rest = String::new();
        entry.read_to_string(&mut rest).unwrap();
        assert_eq!(rest, "world");

        assert!(entry.seek(SeekFrom::Current(-100)).is_err());
    }

    #[test]
    fn test_dir_entry_listing() {
        let mut entry = Entry::dir(
            "b",
            vec![DirEntry::file("z.txt"), DirEntry::directory("c")],
        );
        assert!(entry.is_dir());
        assert!(entry.attr().is_dir());
        let names: Vec<_> = entry.read_dir().unwrap().iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["c", "z.txt"]);

        let mut buf = [0u8; 1];
        assert_eq!(
            entry.read(&mut buf).unwrap_err().kind(),
            io::ErrorKind::IsADirectory
        );
        assert!(matches!(entry.contents(), Err(VfsError::IsADirectory(_))));
    }

    #[test]
    fn test_contents_with_read_in_scope() {
        let entry = Entry::file("a.txt", b"abc".to_vec());
        assert_eq!(entry.contents().unwrap(), b"abc");
        let bytes: Vec<u8> = entry.bytes().map(|b| b.unwrap()).collect();
        assert_eq!(bytes, b"abc");
    }

    #[test]
    fn test_with_mtime() {
        let when = SystemTime::UNIX_EPOCH;
        let entry = Entry::file("a", Vec::new()).with_mtime(when);
        assert_eq!(entry.attr().mtime, when);
    }

    #[test]
    fn test_file_is_not_listable() {
        let entry = Entry::file("a", Vec::new());
        assert!(matches!(entry.read_dir(), Err(VfsError::NotADirectory(_))));
        assert_eq!(entry.into_bytes().unwrap(), Vec::<u8>::new());
    }
}
