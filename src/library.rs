//! Library container reader (SPEC_FULL.md §4.2 / §6.1): navigates the
//! on-disk B-tree of directory nodes inside a `.pbl`/`.pbd` file and streams
//! entry bodies across their `DAT*` block chains.

use std::{error, fmt, fs, path::Path};

use crate::cursor::Cursor;

const BLOCK_SIZE: usize = 0x200;
const HEADER_MAGIC: &[u8; 4] = b"HDR*";
const NODE_MAGIC: &[u8; 4] = b"NOD*";
const ENTRY_MAGIC: &[u8; 4] = b"ENT*";
const DATA_MAGIC: &[u8; 4] = b"DAT*";
const MARKER_ASCII: &str = "PowerBuilder";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    BadMagic { offset: usize, what: &'static str },
    NeitherCharWidth,
    Io,
    Truncated { offset: usize, needed: usize, available: usize },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadMagic { offset, what } => write!(f, "bad {what} magic at offset {offset:#x}"),
            Self::NeitherCharWidth => write!(f, "header marker is neither ASCII nor UTF-16 \"PowerBuilder\""),
            Self::Io => write!(f, "i/o error reading library"),
            Self::Truncated { offset, needed, available } => write!(
                f,
                "entry body truncated at offset {offset:#x}: needed {needed} bytes, {available} available"
            ),
        }
    }
}

impl error::Error for Error {}

impl From<crate::cursor::Error> for Error {
    fn from(e: crate::cursor::Error) -> Self {
        match e {
            crate::cursor::Error::BufferOverflow { offset, needed, available } => {
                Error::Truncated { offset, needed, available }
            }
            crate::cursor::Error::BadMagic { offset, .. } => Error::BadMagic { offset, what: "magic-triple" },
        }
    }
}

#[derive(Debug, Clone)]
pub struct DirEntry {
    pub name: String,
    pub version: [u8; 4],
    pub first_block: u32,
    pub length: u32,
    pub timestamp: u32,
    pub comment_length: u16,
}

struct DirNode {
    left: u32,
    right: u32,
    entries: Vec<DirEntry>,
}

pub struct Library {
    data: Vec<u8>,
    pub filename: String,
    pub unicode: bool,
    pub comment: String,
    root_offset: u32,
}

impl Library {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        let data = fs::read(path.as_ref()).map_err(|_| Error::Io)?;
        Self::from_bytes(data, path.as_ref().display().to_string())
    }

    pub fn from_bytes(data: Vec<u8>, filename: String) -> Result<Self, Error> {
        let mut c = Cursor::new(&data);
        let magic = c.read_bytes(4)?;
        if magic != HEADER_MAGIC {
            return Err(Error::BadMagic { offset: 0, what: "header" });
        }
        let ascii_marker = c.read_fixed_ascii(14)?;
        let unicode = if ascii_marker == MARKER_ASCII {
            false
        } else {
            // Re-read the same 14 bytes as UTF-16 and compare; the original
            // distinguishes character width by which encoding matches.
            let wide_bytes = &data[4..4 + 14 * 2.min(data.len().saturating_sub(4))];
            let wide = decode_utf16le(wide_bytes);
            if wide.trim_end_matches('\0') == MARKER_ASCII {
                true
            } else {
                return Err(Error::NeitherCharWidth);
            }
        };

        let (version_width, comment_width) = (14usize, 256usize);
        let mut c = Cursor::new(&data);
        c.skip(4)?;
        let version = if unicode {
            let bytes = c.read_bytes(version_width * 2)?;
            decode_utf16le(bytes).trim_end_matches('\0').to_string()
        } else {
            c.read_fixed_ascii(version_width)?.to_string()
        };
        let _timestamp = c.read_u32()?;
        let _filetype = c.read_u16()?;
        let comment = if unicode {
            let bytes = c.read_bytes(comment_width * 2)?;
            decode_utf16le(bytes).trim_end_matches('\0').to_string()
        } else {
            c.read_fixed_ascii(comment_width)?.to_string()
        };
        let _ = version;

        let root_offset = if unicode { 0x600 } else { 0x400 };

        Ok(Self { data, filename, unicode, comment, root_offset: root_offset as u32 })
    }

    fn read_node(&self, offset: u32) -> Result<DirNode, Error> {
        let mut c = Cursor::new(&self.data);
        c.skip(offset as usize)?;
        let magic = c.read_bytes(4)?;
        if magic != NODE_MAGIC {
            return Err(Error::BadMagic { offset: offset as usize, what: "node" });
        }
        let left = c.read_u32()?;
        let parent = c.read_u32()?;
        let right = c.read_u32()?;
        let _ = parent;
        let _remaining = c.read_u32()?;
        let entry_count = c.read_u16()?;

        let mut entries = Vec::with_capacity(entry_count as usize);
        for _ in 0..entry_count {
            let entry_magic = c.read_bytes(4)?;
            if entry_magic != ENTRY_MAGIC {
                return Err(Error::BadMagic { offset: c.offset() - 4, what: "entry" });
            }
            let version: [u8; 4] = c.read_bytes(4)?.try_into().unwrap();
            let first_block = c.read_u32()?;
            let length = c.read_u32()?;
            let timestamp = c.read_u32()?;
            let comment_length = c.read_u16()?;
            let name_length = c.read_u16()?;
            let name_bytes = c.read_bytes(name_length as usize)?;
            let name = if self.unicode {
                decode_utf16le(name_bytes)
            } else {
                String::from_utf8_lossy(name_bytes).into_owned()
            };
            entries.push(DirEntry { name, version, first_block, length, timestamp, comment_length });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(DirNode { left, right, entries })
    }

    /// In-order traversal of the directory tree.
    pub fn enumerate(&self, mut callback: impl FnMut(&DirEntry)) -> Result<(), Error> {
        self.enumerate_node(self.root_offset, &mut callback)
    }

    fn enumerate_node(&self, offset: u32, callback: &mut impl FnMut(&DirEntry)) -> Result<(), Error> {
        if offset == 0 {
            return Ok(());
        }
        let node = self.read_node(offset)?;
        if node.left != 0 {
            self.enumerate_node(node.left, callback)?;
        }
        for entry in &node.entries {
            callback(entry);
        }
        if node.right != 0 {
            self.enumerate_node(node.right, callback)?;
        }
        Ok(())
    }

    /// Binary search by name, descending left/right by lexicographic
    /// comparison against each node's first/last entry.
    pub fn find(&self, name: &str) -> Result<Option<DirEntry>, Error> {
        let mut offset = self.root_offset;
        loop {
            if offset == 0 {
                return Ok(None);
            }
            let node = self.read_node(offset)?;
            if node.entries.is_empty() {
                return Ok(None);
            }
            let first = node.entries.first().unwrap();
            let last = node.entries.last().unwrap();
            if name < first.name.as_str() {
                offset = node.left;
                continue;
            }
            if name > last.name.as_str() {
                offset = node.right;
                continue;
            }
            if let Ok(idx) = node.entries.binary_search_by(|e| e.name.as_str().cmp(name)) {
                return Ok(Some(node.entries[idx].clone()));
            }
            return Ok(None);
        }
    }

    /// Reads an entry's full body, spanning its `DAT*` block chain and
    /// skipping the embedded comment prefix.
    pub fn read_entry(&self, entry: &DirEntry) -> Result<Vec<u8>, Error> {
        let total_len = entry.length as usize;
        let skip = entry.comment_length as usize;
        let mut out = Vec::with_capacity(total_len.saturating_sub(skip));
        let mut remaining = total_len;
        let mut to_skip = skip;
        let mut block_offset = entry.first_block;

        while remaining > 0 {
            if block_offset == 0 {
                return Err(Error::Truncated { offset: out.len(), needed: remaining, available: 0 });
            }
            let mut c = Cursor::new(&self.data);
            c.skip(block_offset as usize)?;
            let magic = c.read_bytes(4)?;
            if magic != DATA_MAGIC {
                return Err(Error::BadMagic { offset: block_offset as usize, what: "data" });
            }
            let next = c.read_u32()?;
            let payload_len = c.read_u32()? as usize;
            let payload = c.read_bytes(payload_len.min(BLOCK_SIZE - 12))?;

            let mut slice = payload;
            if to_skip > 0 {
                let n = to_skip.min(slice.len());
                slice = &slice[n..];
                to_skip -= n;
            }
            let take = slice.len().min(remaining);
            out.extend_from_slice(&slice[..take]);
            remaining -= take;
            block_offset = next;
        }
        Ok(out)
    }
}

fn decode_utf16le(bytes: &[u8]) -> String {
    let units: Vec<u16> = bytes.chunks_exact(2).map(|c| u16::from_le_bytes([c[0], c[1]])).collect();
    String::from_utf16_lossy(&units)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn push_block(buf: &mut Vec<u8>, magic: &[u8; 4], fields: impl FnOnce(&mut Vec<u8>)) {
        let start = buf.len();
        buf.extend_from_slice(magic);
        fields(buf);
        buf.resize(start + BLOCK_SIZE, 0);
    }

    fn build_test_library(names: &[&str]) -> Vec<u8> {
        let mut buf = Vec::new();
        // header block @ 0x0
        push_block(&mut buf, HEADER_MAGIC, |b| {
            b.extend_from_slice(&{
                let mut s = MARKER_ASCII.as_bytes().to_vec();
                s.resize(14, 0);
                s
            });
            b.extend_from_slice(&[0u8; 14]); // version
            b.extend_from_slice(&0u32.to_le_bytes()); // timestamp
            b.extend_from_slice(&0u16.to_le_bytes()); // filetype
            b.extend_from_slice(&[0u8; 256]); // comment
        });
        buf.resize(0x400, 0);
        // single root node @ 0x400 holding all entries (enough for small tests)
        push_block(&mut buf, NODE_MAGIC, |b| {
            b.extend_from_slice(&0u32.to_le_bytes()); // left
            b.extend_from_slice(&0u32.to_le_bytes()); // parent
            b.extend_from_slice(&0u32.to_le_bytes()); // right
            b.extend_from_slice(&0u32.to_le_bytes()); // remaining
            b.extend_from_slice(&(names.len() as u16).to_le_bytes());
            for (i, name) in names.iter().enumerate() {
                b.extend_from_slice(ENTRY_MAGIC);
                b.extend_from_slice(&[0u8; 4]); // version
                b.extend_from_slice(&(0x600u32 + i as u32 * BLOCK_SIZE as u32).to_le_bytes());
                b.extend_from_slice(&(name.len() as u32).to_le_bytes()); // length
                b.extend_from_slice(&0u32.to_le_bytes()); // timestamp
                b.extend_from_slice(&0u16.to_le_bytes()); // comment_length
                b.extend_from_slice(&(name.len() as u16).to_le_bytes());
                b.extend_from_slice(name.as_bytes());
            }
        });
        for (i, name) in names.iter().enumerate() {
            push_block(&mut buf, DATA_MAGIC, |b| {
                b.extend_from_slice(&0u32.to_le_bytes()); // next
                b.extend_from_slice(&(name.len() as u32).to_le_bytes());
                b.extend_from_slice(name.as_bytes());
            });
            let _ = i;
        }
        buf
    }

    #[test]
    fn enumerate_and_find_s1() {
        let data = build_test_library(&["a", "m", "z"]);
        let lib = Library::from_bytes(data, "test.pbl".into()).unwrap();
        assert!(!lib.unicode);

        let mut seen = Vec::new();
        lib.enumerate(|e| seen.push(e.name.clone())).unwrap();
        assert_eq!(seen, vec!["a", "m", "z"]);

        let found = lib.find("m").unwrap().unwrap();
        assert_eq!(found.name, "m");
        assert!(lib.find("q").unwrap().is_none());
    }

    #[test]
    fn read_entry_body_matches_name() {
        let data = build_test_library(&["hello"]);
        let lib = Library::from_bytes(data, "test.pbl".into()).unwrap();
        let entry = lib.find("hello").unwrap().unwrap();
        let body = lib.read_entry(&entry).unwrap();
        assert_eq!(body, b"hello");
    }
}
