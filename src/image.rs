use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{PatchError, Result};
use crate::format::dol::{DolHeader, DOL_HEADER_SIZE};
use crate::format::fst::{EntryKind, FileSystemTree, ENTRY_SIZE};
use crate::format::header::DiscHeader;
use crate::format::{
    apploader_size, FormatError, APPLOADER_OFFSET, BI2_OFFSET, BI2_SIZE, DISC_MAGIC,
    FILE_OFFSET_ALIGN, HEADER_INFO_OFFSET, HEADER_SIZE, MAGIC_OFFSET, MIN_IMAGE_SIZE,
};
use crate::stream::RegionChunks;

/// Tables larger than this are treated as corrupt rather than read into memory.
const MAX_FST_SIZE: u64 = 0x0100_0000;

/// Name of the mod-root directory that addresses the regions outside the FST.
pub const SYSTEM_DIR: &str = "&&systemdata";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SystemFile {
    Header,
    Bi2,
    Apploader,
    Dol,
    Fst,
}

impl SystemFile {
    pub const ALL: [Self; 5] = [Self::Header, Self::Bi2, Self::Apploader, Self::Dol, Self::Fst];

    #[must_use]
    pub fn mod_name(self) -> &'static str {
        match self {
            Self::Header => "ISO.hdr",
            Self::Bi2 => "bi2.bin",
            Self::Apploader => "AppLoader.ldr",
            Self::Dol => "Start.dol",
            Self::Fst => "Game.toc",
        }
    }

    #[must_use]
    pub fn from_mod_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|s| s.mod_name() == name)
    }

    #[must_use]
    pub fn mod_path(self) -> String {
        format!("{SYSTEM_DIR}/{}", self.mod_name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Extent {
    pub offset: u64,
    pub length: u64,
}

impl Extent {
    #[must_use]
    pub fn new(offset: u64, length: u64) -> Self {
        Self { offset, length }
    }

    #[must_use]
    pub fn end(&self) -> u64 {
        self.offset.saturating_add(self.length)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Region {
    System(SystemFile),
    File(usize),
}

/// An opened source image: a read handle plus the parsed header, boot DOL
/// header and file system table. Payloads are only read on request.
#[derive(Debug)]
pub struct DiscImage {
    path: PathBuf,
    file: File,
    len: u64,
    header: DiscHeader,
    dol: DolHeader,
    tree: FileSystemTree,
    system: BTreeMap<SystemFile, Extent>,
}

impl DiscImage {
    /// Opens and validates a GameCube disc image.
    ///
    /// # Errors
    /// `PatchError::Format` for anything that is not a well-formed image,
    /// `PatchError::Io` when the file cannot be read.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut file = File::open(path).map_err(PatchError::io("failed to open image", path))?;
        let len = file
            .metadata()
            .map_err(PatchError::io("failed to stat image", path))?
            .len();

        let head = read_at(&mut file, 0, len.min(MIN_IMAGE_SIZE))
            .map_err(PatchError::io("failed to read image header", path))?;
        if head.len() >= MAGIC_OFFSET + 4 {
            let magic = u32::from_be_bytes([
                head[MAGIC_OFFSET],
                head[MAGIC_OFFSET + 1],
                head[MAGIC_OFFSET + 2],
                head[MAGIC_OFFSET + 3],
            ]);
            if magic != DISC_MAGIC {
                return Err(FormatError::NotAnImage { found: magic }.into());
            }
        }
        if len < MIN_IMAGE_SIZE {
            return Err(FormatError::Truncated {
                needed: MIN_IMAGE_SIZE,
                actual: len,
            }
            .into());
        }
        let header = DiscHeader::parse(&head)?;

        let apploader = Extent::new(
            APPLOADER_OFFSET,
            apploader_size(&head[APPLOADER_OFFSET as usize..], APPLOADER_OFFSET)?,
        );
        check_within(apploader, len, APPLOADER_OFFSET + 0x14, "apploader")?;

        let dol_offset = u64::from(header.dol_offset);
        check_within(
            Extent::new(dol_offset, DOL_HEADER_SIZE),
            len,
            HEADER_INFO_OFFSET as u64,
            "boot DOL header",
        )?;
        let dol_raw = read_at(&mut file, dol_offset, DOL_HEADER_SIZE)
            .map_err(PatchError::io("failed to read boot DOL header", path))?;
        let dol = DolHeader::parse(&dol_raw, dol_offset)?;
        let dol_extent = Extent::new(dol_offset, dol.total_length());
        check_within(dol_extent, len, dol_offset, "boot DOL")?;

        let fst_extent = Extent::new(u64::from(header.fst_offset), u64::from(header.fst_size));
        if fst_extent.length < ENTRY_SIZE as u64 || fst_extent.length > MAX_FST_SIZE {
            return Err(FormatError::corrupt(
                HEADER_INFO_OFFSET as u64 + 8,
                format!("implausible file system table size {:#x}", fst_extent.length),
            )
            .into());
        }
        check_within(fst_extent, len, HEADER_INFO_OFFSET as u64 + 4, "file system table")?;
        let fst_raw = read_at(&mut file, fst_extent.offset, fst_extent.length)
            .map_err(PatchError::io("failed to read file system table", path))?;
        let tree = FileSystemTree::parse(&fst_raw, fst_extent.offset)?;

        let system = BTreeMap::from([
            (SystemFile::Header, Extent::new(0, HEADER_SIZE)),
            (SystemFile::Bi2, Extent::new(BI2_OFFSET, BI2_SIZE)),
            (SystemFile::Apploader, apploader),
            (SystemFile::Dol, dol_extent),
            (SystemFile::Fst, fst_extent),
        ]);
        validate_extents(&tree, &system, fst_extent.offset, len)?;

        let image = Self {
            path: path.to_path_buf(),
            file,
            len,
            header,
            dol,
            tree,
            system,
        };
        info!(
            title = %image.game_title(),
            entries = image.tree.len(),
            size = image.len,
            "opened disc image {}",
            path.display()
        );
        for (sf, extent) in &image.system {
            debug!("{:<13} {:#010x}+{:#x}", sf.mod_name(), extent.offset, extent.length);
        }
        Ok(image)
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn len(&self) -> u64 {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[must_use]
    pub fn header(&self) -> &DiscHeader {
        &self.header
    }

    #[must_use]
    pub fn dol(&self) -> &DolHeader {
        &self.dol
    }

    #[must_use]
    pub fn tree(&self) -> &FileSystemTree {
        &self.tree
    }

    #[must_use]
    pub fn game_title(&self) -> String {
        self.header.title()
    }

    #[must_use]
    pub fn system_extent(&self, file: SystemFile) -> Extent {
        self.system[&file]
    }

    #[must_use]
    pub fn file_extent(&self, index: usize) -> Option<Extent> {
        match self.tree.entry(index)?.kind {
            EntryKind::File { offset, length } => {
                Some(Extent::new(u64::from(offset), u64::from(length)))
            }
            EntryKind::Directory { .. } => None,
        }
    }

    /// First byte past every region the image references: system files,
    /// the table and all file payloads. Trailing filler is not counted.
    #[must_use]
    pub fn occupied_end(&self) -> u64 {
        let system_end = self.system.values().map(Extent::end).max().unwrap_or(0);
        let files_end = self
            .tree
            .files()
            .map(|(_, offset, length)| u64::from(offset) + u64::from(length))
            .max()
            .unwrap_or(0);
        system_end.max(files_end)
    }

    /// Lazily streams `length` bytes starting at `offset`.
    ///
    /// # Errors
    /// Fails when the read handle cannot be duplicated.
    pub fn region_chunks(&self, offset: u64, length: u64) -> io::Result<RegionChunks> {
        Ok(RegionChunks::new(self.file.try_clone()?, offset, length))
    }

    /// Reads a region fully into memory. Meant for small regions.
    ///
    /// # Errors
    /// Propagates read failures, including reads past the end of the image.
    pub fn read_region(&self, offset: u64, length: u64) -> io::Result<Vec<u8>> {
        let mut out = Vec::new();
        self.region_chunks(offset, length)?.copy_to(&mut out)?;
        Ok(out)
    }
}

fn read_at(file: &mut File, offset: u64, length: u64) -> io::Result<Vec<u8>> {
    let size = usize::try_from(length).map_err(|_| io::Error::other("region too large"))?;
    let mut buf = vec![0u8; size];
    file.seek(SeekFrom::Start(offset))?;
    file.read_exact(&mut buf)?;
    Ok(buf)
}

fn check_within(extent: Extent, image_len: u64, field_at: u64, what: &str) -> Result<(), FormatError> {
    if extent.end() > image_len {
        return Err(FormatError::corrupt(
            field_at,
            format!(
                "{what} at {:#x}+{:#x} extends past the end of the image ({image_len:#x})",
                extent.offset, extent.length
            ),
        ));
    }
    Ok(())
}

fn validate_extents(
    tree: &FileSystemTree,
    system: &BTreeMap<SystemFile, Extent>,
    fst_offset: u64,
    image_len: u64,
) -> Result<(), FormatError> {
    let describe = |region: Region| match region {
        Region::System(sf) => sf.mod_path(),
        Region::File(i) => tree.path_of(i),
    };

    let mut regions = system
        .iter()
        .map(|(&sf, &extent)| (extent, Region::System(sf)))
        .collect::<Vec<_>>();
    for (index, offset, length) in tree.files() {
        let extent = Extent::new(u64::from(offset), u64::from(length));
        let field_at = fst_offset + (index * ENTRY_SIZE) as u64 + 4;
        if extent.offset % FILE_OFFSET_ALIGN != 0 {
            return Err(FormatError::corrupt(
                field_at,
                format!("file '{}' offset {offset:#x} is not 4-byte aligned", tree.path_of(index)),
            ));
        }
        check_within(extent, image_len, field_at, &format!("file '{}'", tree.path_of(index)))?;
        if extent.length > 0 {
            regions.push((extent, Region::File(index)));
        }
    }
    regions.sort_by_key(|&(extent, _)| extent);

    let mut furthest: Option<(Extent, Region)> = None;
    for (extent, region) in regions {
        if let Some((prev, prev_region)) = furthest {
            if extent.offset < prev.end() {
                let alias = extent == prev
                    && matches!(region, Region::File(_))
                    && matches!(prev_region, Region::File(_));
                if !alias {
                    return Err(FormatError::corrupt(
                        extent.offset,
                        format!(
                            "'{}' overlaps '{}' ({:#x}..{:#x})",
                            describe(region),
                            describe(prev_region),
                            prev.offset,
                            prev.end()
                        ),
                    ));
                }
            }
            if extent.end() <= prev.end() {
                continue;
            }
        }
        furthest = Some((extent, region));
    }
    Ok(())
}
