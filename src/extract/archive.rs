//! Sequential readers over tar and zip archives.

use super::ExtractError;
use std::fmt;
use std::io::{Cursor, Read};
use std::ops::ControlFlow;
use tar::EntryType;

/// Decompression applied to a payload before it is read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codec {
    None,
    Gzip,
    Bzip2,
    Xz,
    Zstd,
}

impl Codec {
    pub fn decoder<'a, R: Read + 'a>(self, input: R) -> Result<Box<dyn Read + 'a>, ExtractError> {
        Ok(match self {
            Self::None => Box::new(input),
            Self::Gzip => Box::new(flate2::read::GzDecoder::new(input)),
            Self::Bzip2 => Box::new(bzip2::read::BzDecoder::new(input)),
            Self::Xz => Box::new(xz2::read::XzDecoder::new(input)),
            Self::Zstd => Box::new(zstd::stream::read::Decoder::new(input)?),
        })
    }

    /// Decompresses a whole buffer.
    pub fn decode_all(self, data: &[u8]) -> Result<Vec<u8>, ExtractError> {
        let mut out = Vec::with_capacity(data.len());
        self.decoder(data)?.read_to_end(&mut out)?;
        Ok(out)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberKind {
    File,
    Dir,
    HardLink,
    Symlink,
}

/// Header of one archive member. Directory names always end in `/`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    pub name: String,
    pub link_name: Option<String>,
    pub mode: u32,
    pub kind: MemberKind,
}

impl Member {
    pub fn is_dir(&self) -> bool {
        self.kind == MemberKind::Dir
    }
}

/// Callback handed each member in archive order along with a reader for its
/// contents. Returning `ControlFlow::Break` stops the walk.
pub type Visit<'v> =
    dyn FnMut(&Member, &mut dyn Read) -> Result<ControlFlow<()>, ExtractError> + 'v;

pub trait ArchiveReader: fmt::Debug + Send + Sync {
    fn walk(&self, data: &[u8], visit: &mut Visit<'_>) -> Result<(), ExtractError>;
}

#[derive(Debug, Clone, Copy)]
pub struct TarReader {
    pub codec: Codec,
}

impl TarReader {
    pub fn new(codec: Codec) -> Self {
        Self { codec }
    }
}

impl ArchiveReader for TarReader {
    fn walk(&self, data: &[u8], visit: &mut Visit<'_>) -> Result<(), ExtractError> {
        let mut archive = tar::Archive::new(self.codec.decoder(data)?);

        for entry in archive.entries()? {
            let mut entry = entry?;
            let kind = match entry.header().entry_type() {
                EntryType::Regular | EntryType::Continuous => MemberKind::File,
                EntryType::Directory => MemberKind::Dir,
                EntryType::Link => MemberKind::HardLink,
                EntryType::Symlink => MemberKind::Symlink,
                _ => continue,
            };

            let mode = entry.header().mode()? & 0o7777;
            let mut name = String::from_utf8_lossy(&entry.path_bytes()).into_owned();
            if kind == MemberKind::Dir && !name.ends_with('/') {
                name.push('/');
            }
            let link_name = entry
                .link_name_bytes()
                .map(|bytes| String::from_utf8_lossy(&bytes).into_owned());

            let member = Member {
                name,
                link_name,
                mode,
                kind,
            };
            if visit(&member, &mut entry)?.is_break() {
                break;
            }
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ZipReader;

impl ArchiveReader for ZipReader {
    fn walk(&self, data: &[u8], visit: &mut Visit<'_>) -> Result<(), ExtractError> {
        let mut archive = zip::ZipArchive::new(Cursor::new(data))?;

        for index in 0..archive.len() {
            let mut file = archive.by_index(index)?;
            let name = file.name().to_string();
            let (kind, default_mode) = if name.ends_with('/') {
                (MemberKind::Dir, 0o755)
            } else {
                (MemberKind::File, 0o644)
            };
            let mode = file
                .unix_mode()
                .map(|mode| mode & 0o7777)
                .unwrap_or(default_mode);

            let member = Member {
                name,
                link_name: None,
                mode,
                kind,
            };
            if visit(&member, &mut file)?.is_break() {
                break;
            }
        }

        Ok(())
    }
}
