use crate::format::{FormatError, Reader, DISC_MAGIC, HEADER_INFO_OFFSET, HEADER_SIZE, MAGIC_OFFSET};

/// The 0x440-byte disc header (`boot.bin`).
///
/// The raw bytes are kept so that re-serialization is byte-exact; only the
/// header information block at 0x420 is rebuilt from the typed fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscHeader {
    raw: Vec<u8>,
    pub game_code: [u8; 4],
    pub maker_code: [u8; 2],
    pub disc_number: u8,
    pub version: u8,
    pub audio_streaming: u8,
    pub stream_buffer_size: u8,
    pub game_name: Vec<u8>,
    pub dol_offset: u32,
    pub fst_offset: u32,
    pub fst_size: u32,
    pub fst_max_size: u32,
    pub user_position: u32,
    pub user_length: u32,
}

impl DiscHeader {
    /// Parses the header from the first 0x440 bytes of an image.
    ///
    /// # Errors
    /// Returns `FormatError::Truncated` for short input and
    /// `FormatError::NotAnImage` when the disc magic is missing.
    pub fn parse(input: &[u8]) -> Result<Self, FormatError> {
        if input.len() < HEADER_SIZE as usize {
            return Err(FormatError::Truncated {
                needed: HEADER_SIZE,
                actual: input.len() as u64,
            });
        }
        let raw = input[..HEADER_SIZE as usize].to_vec();

        let magic = Reader::at(&raw, 0, MAGIC_OFFSET).read_u32_be()?;
        if magic != DISC_MAGIC {
            return Err(FormatError::NotAnImage { found: magic });
        }

        let mut reader = Reader::new(&raw, 0);
        let code = reader.read_bytes(4)?;
        let game_code = [code[0], code[1], code[2], code[3]];
        let maker = reader.read_bytes(2)?;
        let maker_code = [maker[0], maker[1]];
        let disc_number = reader.read_u8()?;
        let version = reader.read_u8()?;
        let audio_streaming = reader.read_u8()?;
        let stream_buffer_size = reader.read_u8()?;

        let game_name = raw[0x20..HEADER_INFO_OFFSET].to_vec();

        let mut info = Reader::at(&raw, 0, HEADER_INFO_OFFSET);
        let dol_offset = info.read_u32_be()?;
        let fst_offset = info.read_u32_be()?;
        let fst_size = info.read_u32_be()?;
        let fst_max_size = info.read_u32_be()?;
        let user_position = info.read_u32_be()?;
        let user_length = info.read_u32_be()?;

        Ok(Self {
            game_code,
            maker_code,
            disc_number,
            version,
            audio_streaming,
            stream_buffer_size,
            game_name,
            dol_offset,
            fst_offset,
            fst_size,
            fst_max_size,
            user_position,
            user_length,
            raw,
        })
    }

    /// `GALE01: Super Smash Bros. Melee` style label for logs.
    #[must_use]
    pub fn title(&self) -> String {
        let mut id = Vec::with_capacity(6);
        id.extend_from_slice(&self.game_code);
        id.extend_from_slice(&self.maker_code);
        let name_end = self
            .game_name
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(self.game_name.len());
        format!(
            "{}: {}",
            String::from_utf8_lossy(&id),
            String::from_utf8_lossy(&self.game_name[..name_end]).trim_end()
        )
    }

    /// Serializes the header. Everything outside the header information
    /// block is returned exactly as it was read.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = self.raw.clone();
        let fields = [
            self.dol_offset,
            self.fst_offset,
            self.fst_size,
            self.fst_max_size,
            self.user_position,
            self.user_length,
        ];
        let mut p = HEADER_INFO_OFFSET;
        for v in fields {
            out[p..p + 4].copy_from_slice(&v.to_be_bytes());
            p += 4;
        }
        out
    }
}
