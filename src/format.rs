use thiserror::Error;

/// Magic word stored at 0x1c of every GameCube disc header.
pub const DISC_MAGIC: u32 = 0xc233_9f3d;
pub const MAGIC_OFFSET: usize = 0x1c;

pub const HEADER_SIZE: u64 = 0x440;
pub const HEADER_INFO_OFFSET: usize = 0x420;
pub const BI2_OFFSET: u64 = 0x440;
pub const BI2_SIZE: u64 = 0x2000;
pub const APPLOADER_OFFSET: u64 = 0x2440;
pub const APPLOADER_HEADER_SIZE: u64 = 0x20;

/// Smallest image that still holds the disc header, bi2 and apploader header.
pub const MIN_IMAGE_SIZE: u64 = APPLOADER_OFFSET + APPLOADER_HEADER_SIZE;

/// Capacity of a GameCube mini DVD.
pub const MAX_DISC_SIZE: u64 = 0x5705_8000;

/// Payload offsets must be readable by the drive, which works on 4-byte units.
pub const FILE_OFFSET_ALIGN: u64 = 4;

#[derive(Debug, Error)]
pub enum FormatError {
    #[error("not a GameCube disc image: magic {found:#010x} at 0x1c")]
    NotAnImage { found: u32 },
    #[error("image truncated: need {needed:#x} bytes, file has {actual:#x}")]
    Truncated { needed: u64, actual: u64 },
    #[error("corrupt image at {offset:#x}: {reason}")]
    Corrupt { offset: u64, reason: String },
}

impl FormatError {
    pub(crate) fn corrupt(offset: u64, reason: impl Into<String>) -> Self {
        Self::Corrupt {
            offset,
            reason: reason.into(),
        }
    }
}

pub mod dol;
pub mod fst;
pub mod header;

/// Big-endian cursor over an in-memory table. `base` is the absolute image
/// offset of `input[0]`, used only for error reporting.
pub(crate) struct Reader<'a> {
    input: &'a [u8],
    base: u64,
    pos: usize,
}

impl<'a> Reader<'a> {
    pub(crate) fn new(input: &'a [u8], base: u64) -> Self {
        Self {
            input,
            base,
            pos: 0,
        }
    }

    pub(crate) fn at(input: &'a [u8], base: u64, pos: usize) -> Self {
        Self { input, base, pos }
    }

    pub(crate) fn position(&self) -> u64 {
        self.base + self.pos as u64
    }

    pub(crate) fn read_u8(&mut self) -> Result<u8, FormatError> {
        Ok(self.read_bytes(1)?[0])
    }

    pub(crate) fn read_u32_be(&mut self) -> Result<u32, FormatError> {
        let bytes = self.read_bytes(4)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub(crate) fn read_bytes(&mut self, size: usize) -> Result<&'a [u8], FormatError> {
        if self.pos + size > self.input.len() {
            return Err(FormatError::corrupt(
                self.position(),
                format!("table ends before {size} more byte(s)"),
            ));
        }
        let begin = self.pos;
        self.pos += size;
        Ok(&self.input[begin..self.pos])
    }
}

/// On-disc size of an apploader: its 0x20-byte header plus the code and
/// trailer sizes stored at 0x14 and 0x18. `base` locates `header` for errors.
///
/// # Errors
/// `FormatError::Corrupt` when the size words are missing.
pub fn apploader_size(header: &[u8], base: u64) -> Result<u64, FormatError> {
    let mut reader = Reader::at(header, base, 0x14);
    let code_size = reader.read_u32_be()?;
    let trailer_size = reader.read_u32_be()?;
    Ok(APPLOADER_HEADER_SIZE + u64::from(code_size) + u64::from(trailer_size))
}

#[must_use]
pub fn align_up(value: u64, align: u64) -> u64 {
    let mask = align.saturating_sub(1);
    value.saturating_add(mask) & !mask
}

#[cfg(test)]
mod tests {
    use super::{align_up, apploader_size, FormatError, Reader};

    #[test]
    fn reads_big_endian_fields() {
        let data = [0x12, 0x34, 0x56, 0x78, 0x9a, 0xbc, 0xff];
        let mut reader = Reader::new(&data, 0x100);
        assert_eq!(reader.read_u32_be().expect("u32"), 0x1234_5678);
        assert_eq!(reader.read_bytes(2).expect("bytes"), &[0x9a, 0xbc]);
        assert_eq!(reader.read_u8().expect("u8"), 0xff);
        assert_eq!(reader.position(), 0x107);
    }

    #[test]
    fn reports_absolute_offset_on_short_table() {
        let data = [0x00, 0x01];
        let mut reader = Reader::at(&data, 0x4000, 1);
        let err = reader.read_u32_be().expect_err("must fail");
        assert!(matches!(err, FormatError::Corrupt { offset: 0x4001, .. }));
    }

    #[test]
    fn sizes_apploader_from_its_header() {
        let mut header = [0u8; 0x20];
        header[0x14..0x18].copy_from_slice(&0x1a0u32.to_be_bytes());
        header[0x18..0x1c].copy_from_slice(&0x40u32.to_be_bytes());
        assert_eq!(apploader_size(&header, 0).expect("size"), 0x200);
        assert!(matches!(
            apploader_size(&header[..0x18], 0x2440),
            Err(FormatError::Corrupt { offset: 0x2458, .. })
        ));
    }

    #[test]
    fn aligns_to_power_of_two() {
        assert_eq!(align_up(0, 0x8000), 0);
        assert_eq!(align_up(1, 0x8000), 0x8000);
        assert_eq!(align_up(0x8000, 0x8000), 0x8000);
        assert_eq!(align_up(0x1101, 4), 0x1104);
    }
}
