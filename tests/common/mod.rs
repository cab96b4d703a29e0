#![allow(dead_code)]

use std::fs;
use std::path::PathBuf;

use gcpatch::config::PatchOptions;
use gcpatch::patcher::{self, PatchRequest, PatchSummary};
use gcpatch::progress;

pub const DOL_OFFSET: u32 = 0x3000;
pub const FST_OFFSET: u32 = 0x3400;
pub const APPLOADER_CODE_SIZE: u32 = 0x40;
/// Body size of the DOL the builder embeds; the DOL spans 0x100 + this.
pub const DOL_BODY: u32 = 0x200;

pub enum Node {
    Dir(&'static str, Vec<Node>),
    File(&'static str, u32, Vec<u8>),
}

pub fn file(name: &'static str, offset: u32, len: usize, seed: u8) -> Node {
    Node::File(name, offset, pattern(seed, len))
}

pub fn pattern(seed: u8, len: usize) -> Vec<u8> {
    (0..len)
        .map(|i| seed.wrapping_add((i % 251) as u8).wrapping_mul(7) | 1)
        .collect()
}

/// A DOL with a single text section of `body` bytes.
pub fn dol(body: u32, seed: u8) -> Vec<u8> {
    let mut out = vec![0u8; 0x100];
    out[0x00..0x04].copy_from_slice(&0x100u32.to_be_bytes());
    out[0x48..0x4c].copy_from_slice(&0x8000_3100u32.to_be_bytes());
    out[0x90..0x94].copy_from_slice(&body.to_be_bytes());
    out[0xe0..0xe4].copy_from_slice(&0x8000_3100u32.to_be_bytes());
    out.extend(pattern(seed, body as usize));
    out
}

/// An apploader whose header declares `code` bytes of code and no trailer.
pub fn apploader(code: u32, seed: u8) -> Vec<u8> {
    let mut out = pattern(seed, 0x20);
    out[0x14..0x18].copy_from_slice(&code.to_be_bytes());
    out[0x18..0x1c].copy_from_slice(&0u32.to_be_bytes());
    out.extend(pattern(seed.wrapping_add(1), code as usize));
    out
}

/// opening.bnr at 0x10000 (0x100), audio/bgm.dsp at 0x10100 (0x200),
/// audio/sfx/hit.dsp at 0x10300 (0x40), Game.dat at 0x18000 (0x1000).
pub fn sample_tree() -> Vec<Node> {
    vec![
        file("opening.bnr", 0x10000, 0x100, 1),
        Node::Dir(
            "audio",
            vec![
                file("bgm.dsp", 0x10100, 0x200, 2),
                Node::Dir("sfx", vec![file("hit.dsp", 0x10300, 0x40, 3)]),
            ],
        ),
        file("Game.dat", 0x18000, 0x1000, 4),
    ]
}

fn count(nodes: &[Node]) -> u32 {
    nodes
        .iter()
        .map(|n| match n {
            Node::Dir(_, children) => 1 + count(children),
            Node::File(..) => 1,
        })
        .sum()
}

fn emit(
    nodes: &[Node],
    parent: u32,
    table: &mut Vec<u8>,
    strings: &mut Vec<u8>,
    payloads: &mut Vec<(u32, Vec<u8>)>,
) {
    for node in nodes {
        let index = (table.len() / 12) as u32;
        let (flag, name, w1, w2) = match node {
            Node::Dir(name, children) => (1u32, *name, parent, index + 1 + count(children)),
            Node::File(name, offset, data) => (0u32, *name, *offset, data.len() as u32),
        };
        table.extend_from_slice(&((flag << 24) | strings.len() as u32).to_be_bytes());
        table.extend_from_slice(&w1.to_be_bytes());
        table.extend_from_slice(&w2.to_be_bytes());
        strings.extend_from_slice(name.as_bytes());
        strings.push(0);
        match node {
            Node::Dir(_, children) => emit(children, index, table, strings, payloads),
            Node::File(_, offset, data) => payloads.push((*offset, data.clone())),
        }
    }
}

pub fn fst_bytes(nodes: &[Node]) -> (Vec<u8>, Vec<(u32, Vec<u8>)>) {
    let mut table = Vec::new();
    table.extend_from_slice(&0x0100_0000u32.to_be_bytes());
    table.extend_from_slice(&0u32.to_be_bytes());
    table.extend_from_slice(&(1 + count(nodes)).to_be_bytes());
    let mut strings = Vec::new();
    let mut payloads = Vec::new();
    emit(nodes, 0, &mut table, &mut strings, &mut payloads);
    table.extend_from_slice(&strings);
    (table, payloads)
}

/// Builds a complete image; `filler` unreferenced 0xa5 bytes are appended.
pub fn build_image(nodes: &[Node], filler: usize) -> Vec<u8> {
    let (fst, payloads) = fst_bytes(nodes);
    let fst_end = FST_OFFSET as usize + fst.len();
    let data_end = payloads
        .iter()
        .map(|(offset, data)| *offset as usize + data.len())
        .max()
        .unwrap_or(0)
        .max(fst_end);
    let mut image = vec![0u8; data_end];

    image[0..4].copy_from_slice(b"GTST");
    image[4..6].copy_from_slice(b"01");
    image[0x1c..0x20].copy_from_slice(&0xc233_9f3du32.to_be_bytes());
    image[0x20..0x29].copy_from_slice(b"Test Game");
    let info = [DOL_OFFSET, FST_OFFSET, fst.len() as u32, fst.len() as u32, 0, 0];
    for (i, word) in info.iter().enumerate() {
        image[0x420 + i * 4..0x424 + i * 4].copy_from_slice(&word.to_be_bytes());
    }

    image[0x440..0x2440].copy_from_slice(&pattern(9, 0x2000));
    let loader = apploader(APPLOADER_CODE_SIZE, 10);
    image[0x2440..0x2440 + loader.len()].copy_from_slice(&loader);

    let boot = dol(DOL_BODY, 12);
    image[DOL_OFFSET as usize..DOL_OFFSET as usize + boot.len()].copy_from_slice(&boot);
    image[FST_OFFSET as usize..fst_end].copy_from_slice(&fst);
    for (offset, data) in payloads {
        image[offset as usize..offset as usize + data.len()].copy_from_slice(&data);
    }
    image.extend(std::iter::repeat(0xa5).take(filler));
    image
}

pub fn be32(bytes: &[u8], at: usize) -> u32 {
    u32::from_be_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

/// `(offset, length)` of FST entry `index` as stored in `image`.
pub fn entry_fields(image: &[u8], index: usize) -> (u32, u32) {
    let fst = be32(image, 0x424) as usize;
    let at = fst + index * 12;
    (be32(image, at + 4), be32(image, at + 8))
}

/// Scratch directory holding `game.iso`, an empty `mods/` and the output
/// path `game-patched.iso`.
pub struct Fixture {
    pub dir: tempfile::TempDir,
    pub image: PathBuf,
    pub mods: PathBuf,
    pub output: PathBuf,
}

impl Fixture {
    pub fn new(nodes: &[Node]) -> Self {
        Self::with_bytes(&build_image(nodes, 0x800))
    }

    pub fn sample() -> Self {
        Self::new(&sample_tree())
    }

    pub fn with_bytes(bytes: &[u8]) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let image = dir.path().join("game.iso");
        fs::write(&image, bytes).expect("write image");
        let mods = dir.path().join("mods");
        fs::create_dir(&mods).expect("mods dir");
        let output = dir.path().join("game-patched.iso");
        Self {
            dir,
            image,
            mods,
            output,
        }
    }

    pub fn add_mod(&self, relative: &str, bytes: &[u8]) -> PathBuf {
        let path = self.mods.join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("mod dirs");
        }
        fs::write(&path, bytes).expect("write mod");
        path
    }

    pub fn source_bytes(&self) -> Vec<u8> {
        fs::read(&self.image).expect("read source")
    }

    pub fn output_bytes(&self) -> Vec<u8> {
        fs::read(&self.output).expect("read output")
    }

    pub fn request(&self, options: PatchOptions) -> PatchRequest {
        PatchRequest {
            source: self.image.clone(),
            mod_root: self.mods.clone(),
            output: self.output.clone(),
            options,
        }
    }

    pub fn patch(&self) -> gcpatch::Result<PatchSummary> {
        self.patch_with(PatchOptions::default())
    }

    pub fn patch_with(&self, options: PatchOptions) -> gcpatch::Result<PatchSummary> {
        patcher::run(&self.request(options), &mut progress::silent)
    }

    /// Names of everything in the scratch directory except `mods/`.
    pub fn listing(&self) -> Vec<String> {
        let mut names = fs::read_dir(self.dir.path())
            .expect("read dir")
            .map(|e| e.expect("entry").file_name().to_string_lossy().into_owned())
            .filter(|n| n != "mods")
            .collect::<Vec<_>>();
        names.sort();
        names
    }
}
