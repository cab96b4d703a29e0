use std::collections::BTreeMap;

use crate::format::{FormatError, Reader};

pub const ENTRY_SIZE: usize = 12;
const NAME_OFFSET_MASK: u32 = 0x00ff_ffff;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    /// `parent` is the raw parent index; the directory's descendants are the
    /// entries `index + 1 .. end`.
    Directory { parent: u32, end: u32 },
    File { offset: u32, length: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub name: Vec<u8>,
    pub name_offset: u32,
    /// Index of the enclosing directory, derived from the table's nesting.
    pub parent: usize,
    pub kind: EntryKind,
    flags: u8,
}

impl Entry {
    #[must_use]
    pub fn is_dir(&self) -> bool {
        matches!(self.kind, EntryKind::Directory { .. })
    }

    #[must_use]
    pub fn display_name(&self) -> String {
        String::from_utf8_lossy(&self.name).into_owned()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupError {
    NotFound,
    Ambiguous,
}

/// The file system table as an arena of entries in on-disk order.
///
/// Parent/child relations are index ranges, exactly as serialized; entry 0
/// is the root directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSystemTree {
    entries: Vec<Entry>,
    string_table: Vec<u8>,
}

impl FileSystemTree {
    /// Parses a complete FST. `base` is the table's absolute image offset.
    ///
    /// # Errors
    /// Returns `FormatError::Corrupt` when the nesting, entry count or name
    /// references are inconsistent.
    pub fn parse(input: &[u8], base: u64) -> Result<Self, FormatError> {
        let mut root_reader = Reader::new(input, base);
        let root_info = root_reader.read_u32_be()?;
        let root_parent = root_reader.read_u32_be()?;
        let count = root_reader.read_u32_be()?;

        let root_flags = root_info.to_be_bytes()[0];
        if root_flags == 0 {
            return Err(FormatError::corrupt(base, "root entry is not a directory"));
        }
        if count == 0 || (count as usize).saturating_mul(ENTRY_SIZE) > input.len() {
            return Err(FormatError::corrupt(
                base + 8,
                format!(
                    "entry count {count} does not fit in a {:#x}-byte table",
                    input.len()
                ),
            ));
        }

        let strings_at = count as usize * ENTRY_SIZE;
        let string_table = input[strings_at..].to_vec();
        let strings_base = base + strings_at as u64;

        let mut entries = Vec::with_capacity(count as usize);
        entries.push(Entry {
            name: Vec::new(),
            name_offset: root_info & NAME_OFFSET_MASK,
            parent: 0,
            kind: EntryKind::Directory {
                parent: root_parent,
                end: count,
            },
            flags: root_flags,
        });

        // (directory index, end index)
        let mut open_dirs = vec![(0usize, count)];
        for index in 1..count {
            let mut reader = Reader::at(input, base, index as usize * ENTRY_SIZE);
            let entry_at = reader.position();
            let info = reader.read_u32_be()?;
            let word1 = reader.read_u32_be()?;
            let word2 = reader.read_u32_be()?;

            while open_dirs.last().is_some_and(|&(_, end)| index >= end) {
                open_dirs.pop();
            }
            let Some(&(parent, parent_end)) = open_dirs.last() else {
                return Err(FormatError::corrupt(entry_at, "entry outside of the root directory"));
            };

            let flags = info.to_be_bytes()[0];
            let name_offset = info & NAME_OFFSET_MASK;
            let name = read_name(&string_table, strings_base, name_offset, entry_at)?;

            let kind = if flags != 0 {
                if word2 <= index || word2 > parent_end {
                    return Err(FormatError::corrupt(
                        entry_at,
                        format!(
                            "directory '{}' ends at entry {word2}, outside {}..={parent_end}",
                            String::from_utf8_lossy(&name),
                            index + 1
                        ),
                    ));
                }
                open_dirs.push((index as usize, word2));
                EntryKind::Directory {
                    parent: word1,
                    end: word2,
                }
            } else {
                EntryKind::File {
                    offset: word1,
                    length: word2,
                }
            };

            entries.push(Entry {
                name,
                name_offset,
                parent,
                kind,
                flags,
            });
        }

        Ok(Self {
            entries,
            string_table,
        })
    }

    #[must_use]
    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    #[must_use]
    pub fn entry(&self, index: usize) -> Option<&Entry> {
        self.entries.get(index)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when the table holds nothing but the root directory.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.len() <= 1
    }

    /// Size of the serialized table, identical to the parsed input length.
    #[must_use]
    pub fn serialized_len(&self) -> usize {
        self.entries.len() * ENTRY_SIZE + self.string_table.len()
    }

    /// Direct children of a directory, in table order.
    #[must_use]
    pub fn children(&self, dir: usize) -> Vec<usize> {
        let Some(EntryKind::Directory { end, .. }) = self.entries.get(dir).map(|e| e.kind) else {
            return Vec::new();
        };
        let end = (end as usize).min(self.entries.len());
        let mut out = Vec::new();
        let mut i = dir + 1;
        while i < end {
            out.push(i);
            i = match self.entries[i].kind {
                EntryKind::Directory { end, .. } => end as usize,
                EntryKind::File { .. } => i + 1,
            };
        }
        out
    }

    /// All file entries as `(index, offset, length)`.
    pub fn files(&self) -> impl Iterator<Item = (usize, u32, u32)> + '_ {
        self.entries
            .iter()
            .enumerate()
            .filter_map(|(i, e)| match e.kind {
                EntryKind::File { offset, length } => Some((i, offset, length)),
                EntryKind::Directory { .. } => None,
            })
    }

    /// `/`-joined path of an entry, without the root.
    #[must_use]
    pub fn path_of(&self, index: usize) -> String {
        let mut parts = Vec::new();
        let mut i = index;
        while i != 0 {
            let Some(entry) = self.entries.get(i) else {
                break;
            };
            parts.push(entry.display_name());
            i = entry.parent;
        }
        parts.reverse();
        parts.join("/")
    }

    /// Resolves a `/`-separated path. Names compare byte for byte.
    ///
    /// # Errors
    /// `LookupError::Ambiguous` when a directory holds the same name twice,
    /// `LookupError::NotFound` otherwise.
    pub fn lookup(&self, path: &str) -> Result<usize, LookupError> {
        let mut current = 0usize;
        for component in path.split('/').filter(|c| !c.is_empty()) {
            if !self.entries[current].is_dir() {
                return Err(LookupError::NotFound);
            }
            let mut found = self
                .children(current)
                .into_iter()
                .filter(|&i| self.entries[i].name == component.as_bytes());
            let Some(first) = found.next() else {
                return Err(LookupError::NotFound);
            };
            if found.next().is_some() {
                return Err(LookupError::Ambiguous);
            }
            current = first;
        }
        if current == 0 {
            return Err(LookupError::NotFound);
        }
        Ok(current)
    }

    /// Serializes the table, replacing `(offset, length)` of the file entries
    /// named in `overrides`. The string table is emitted verbatim.
    #[must_use]
    pub fn to_bytes(&self, overrides: &BTreeMap<usize, (u32, u32)>) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.serialized_len());
        for (index, entry) in self.entries.iter().enumerate() {
            let info = (u32::from(entry.flags) << 24) | (entry.name_offset & NAME_OFFSET_MASK);
            let (word1, word2) = match entry.kind {
                EntryKind::Directory { parent, end } => (parent, end),
                EntryKind::File { offset, length } => {
                    overrides.get(&index).copied().unwrap_or((offset, length))
                }
            };
            out.extend_from_slice(&info.to_be_bytes());
            out.extend_from_slice(&word1.to_be_bytes());
            out.extend_from_slice(&word2.to_be_bytes());
        }
        out.extend_from_slice(&self.string_table);
        out
    }
}

fn read_name(
    strings: &[u8],
    strings_base: u64,
    name_offset: u32,
    entry_at: u64,
) -> Result<Vec<u8>, FormatError> {
    let start = name_offset as usize;
    if start >= strings.len() {
        return Err(FormatError::corrupt(
            entry_at,
            format!("name offset {name_offset:#x} outside the string table"),
        ));
    }
    let Some(len) = strings[start..].iter().position(|&b| b == 0) else {
        return Err(FormatError::corrupt(
            strings_base + u64::from(name_offset),
            "unterminated entry name",
        ));
    };
    Ok(strings[start..start + len].to_vec())
}
