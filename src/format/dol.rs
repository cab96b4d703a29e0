use std::fmt;

use crate::format::{FormatError, Reader};

pub const DOL_HEADER_SIZE: u64 = 0x100;
const TEXT_SECTIONS: usize = 7;
const DATA_SECTIONS: usize = 11;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectionInfo {
    pub offset: u32,
    pub address: u32,
    pub size: u32,
}

/// Header of the boot executable. Only used to size the DOL on disc: the
/// format has no length field, its extent is the furthest section end.
#[derive(Clone, PartialEq, Eq)]
pub struct DolHeader {
    pub text: Vec<SectionInfo>,
    pub data: Vec<SectionInfo>,
    pub bss_address: u32,
    pub bss_size: u32,
    pub entry_point: u32,
}

impl DolHeader {
    /// # Errors
    /// Returns `FormatError::Corrupt` when fewer than 0x100 bytes are given.
    pub fn parse(input: &[u8], base: u64) -> Result<Self, FormatError> {
        let mut reader = Reader::new(input, base);
        let mut words = [[0u32; TEXT_SECTIONS + DATA_SECTIONS]; 3];
        for column in &mut words {
            for word in column.iter_mut() {
                *word = reader.read_u32_be()?;
            }
        }
        let bss_address = reader.read_u32_be()?;
        let bss_size = reader.read_u32_be()?;
        let entry_point = reader.read_u32_be()?;

        let section = |i: usize| SectionInfo {
            offset: words[0][i],
            address: words[1][i],
            size: words[2][i],
        };
        Ok(Self {
            text: (0..TEXT_SECTIONS).map(section).collect(),
            data: (TEXT_SECTIONS..TEXT_SECTIONS + DATA_SECTIONS).map(section).collect(),
            bss_address,
            bss_size,
            entry_point,
        })
    }

    #[must_use]
    pub fn total_length(&self) -> u64 {
        self.text
            .iter()
            .chain(self.data.iter())
            .filter(|s| s.size != 0)
            .map(|s| u64::from(s.offset) + u64::from(s.size))
            .max()
            .unwrap_or(0)
            .max(DOL_HEADER_SIZE)
    }
}

impl fmt::Debug for DolHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (kind, sections) in [("text", &self.text), ("data", &self.data)] {
            for (i, s) in sections.iter().enumerate().filter(|(_, s)| s.size != 0) {
                writeln!(
                    f,
                    "{kind}{i}: offset {:#010x} address {:#010x} size {:#x}",
                    s.offset, s.address, s.size
                )?;
            }
        }
        write!(
            f,
            "bss {:#010x}+{:#x} entry {:#010x}",
            self.bss_address, self.bss_size, self.entry_point
        )
    }
}

#[cfg(test)]
mod tests {
    use super::{DolHeader, DOL_HEADER_SIZE};
    use crate::format::FormatError;

    fn mk_dol_header(sections: &[(usize, u32, u32)]) -> Vec<u8> {
        let mut raw = vec![0u8; DOL_HEADER_SIZE as usize];
        for &(index, offset, size) in sections {
            raw[index * 4..index * 4 + 4].copy_from_slice(&offset.to_be_bytes());
            raw[0x48 + index * 4..0x48 + index * 4 + 4].copy_from_slice(&0x8000_3100u32.to_be_bytes());
            raw[0x90 + index * 4..0x90 + index * 4 + 4].copy_from_slice(&size.to_be_bytes());
        }
        raw
    }

    #[test]
    fn sizes_dol_by_furthest_section() {
        // text0 at 0x100 (0x200 bytes), data0 at 0x300 (0x40 bytes)
        let raw = mk_dol_header(&[(0, 0x100, 0x200), (7, 0x300, 0x40)]);
        let dol = DolHeader::parse(&raw, 0).expect("parse");
        assert_eq!(dol.text[0].size, 0x200);
        assert_eq!(dol.data[0].offset, 0x300);
        assert_eq!(dol.total_length(), 0x340);
    }

    #[test]
    fn empty_dol_still_spans_its_header() {
        let raw = mk_dol_header(&[]);
        let dol = DolHeader::parse(&raw, 0).expect("parse");
        assert_eq!(dol.total_length(), DOL_HEADER_SIZE);
    }

    #[test]
    fn rejects_short_header() {
        let err = DolHeader::parse(&[0u8; 0x40], 0x2000).expect_err("must fail");
        assert!(matches!(err, FormatError::Corrupt { offset: 0x2040, .. }));
    }
}
