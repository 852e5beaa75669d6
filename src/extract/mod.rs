//! Locating and writing the wanted file(s) inside a downloaded payload.
//!
//! An [`Extractor`] scans the payload once and returns [`ExtractedFile`]s
//! whose [`ExtractAction`] says how to materialize them. Nothing touches the
//! filesystem until [`ExtractedFile::extract`] is called, and that can be
//! repeated for several destinations.

pub mod archive;
pub mod chooser;
pub mod fs;
pub mod naming;

pub use archive::{ArchiveReader, Codec, Member, MemberKind, TarReader, ZipReader};
pub use chooser::{BinaryChooser, Choice, Chooser, ChooserError, GlobChooser, LiteralFileChooser};
pub use naming::{is_exec, mode_from, rename_guess};

use self::fs::Link;
use std::fmt;
use std::io::{self, Read};
use std::ops::ControlFlow;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("extract: {0}")]
    Io(#[from] io::Error),

    #[error("zip extract: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("target {target} not found in archive")]
    TargetNotFound { target: String },

    #[error("{count} candidates for target {target} found")]
    Candidates {
        count: usize,
        target: String,
        candidates: Vec<ExtractedFile>,
    },

    #[error("archive member `{name}` escapes the destination directory")]
    PathTraversal { name: String },

    #[error("failed to write {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl ExtractError {
    pub fn candidates(&self) -> &[ExtractedFile] {
        match self {
            Self::Candidates { candidates, .. } => candidates,
            _ => &[],
        }
    }

    pub fn into_candidates(self) -> Vec<ExtractedFile> {
        match self {
            Self::Candidates { candidates, .. } => candidates,
            _ => Vec::new(),
        }
    }
}

/// How an [`ExtractedFile`] is put on disk.
#[derive(Clone)]
pub enum ExtractAction {
    /// Write bytes read during the scan.
    Write { data: Arc<[u8]>, mode: u32 },
    /// Re-read the archive and recreate everything under `prefix`.
    Subtree {
        source: Arc<[u8]>,
        reader: Arc<dyn ArchiveReader>,
        prefix: String,
    },
}

impl fmt::Debug for ExtractAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Write { data, mode } => f
                .debug_struct("Write")
                .field("len", &data.len())
                .field("mode", &format_args!("{mode:o}"))
                .finish(),
            Self::Subtree {
                reader, prefix, ..
            } => f
                .debug_struct("Subtree")
                .field("reader", reader)
                .field("prefix", prefix)
                .finish(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExtractedFile {
    /// Name to extract to.
    pub name: String,
    /// Name inside the archive.
    pub archive_name: String,
    pub mode: u32,
    pub is_dir: bool,
    pub action: ExtractAction,
}

impl ExtractedFile {
    /// Mode with executable bits added when the name looks executable.
    pub fn mode(&self) -> u32 {
        mode_from(&self.name, self.mode)
    }

    pub fn extract(&self, to: &Path) -> Result<(), ExtractError> {
        materialize(&self.action, to)
    }
}

impl fmt::Display for ExtractedFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.archive_name)
    }
}

/// Carries out `action` with `dest` as the target file or directory.
pub fn materialize(action: &ExtractAction, dest: &Path) -> Result<(), ExtractError> {
    match action {
        ExtractAction::Write { data, mode } => fs::write_file(dest, data, *mode),
        ExtractAction::Subtree {
            source,
            reader,
            prefix,
        } => extract_subtree(reader.as_ref(), source, prefix, dest),
    }
}

/// Rejects names that are absolute or climb out with `..`.
fn checked_relative<'a>(member: &str, relative: &'a str) -> Result<&'a Path, ExtractError> {
    let path = Path::new(relative);
    if path
        .components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
    {
        Ok(path)
    } else {
        Err(ExtractError::PathTraversal {
            name: member.to_string(),
        })
    }
}

fn extract_subtree(
    reader: &dyn ArchiveReader,
    data: &[u8],
    prefix: &str,
    dest: &Path,
) -> Result<(), ExtractError> {
    let mut links = Vec::new();

    reader.walk(data, &mut |member, contents| {
        let Some(relative) = member.name.strip_prefix(prefix) else {
            return Ok(ControlFlow::Continue(()));
        };
        let path = dest.join(checked_relative(&member.name, relative)?);

        match member.kind {
            MemberKind::Dir => fs::create_dir(&path)?,
            MemberKind::File => {
                let mut data = Vec::new();
                contents.read_to_end(&mut data)?;
                fs::write_file(&path, &data, member.mode)?;
            }
            MemberKind::Symlink => {
                let target = member.link_name.clone().unwrap_or_default();
                links.push(Link {
                    path,
                    target: PathBuf::from(target),
                    symbolic: true,
                });
            }
            MemberKind::HardLink => {
                let target = member.link_name.as_deref().unwrap_or_default();
                match target.strip_prefix(prefix) {
                    Some(inner) => links.push(Link {
                        path,
                        target: dest.join(checked_relative(target, inner)?),
                        symbolic: false,
                    }),
                    None => warn!(
                        "skipping hard link `{}` to `{}` outside `{}`",
                        member.name, target, prefix
                    ),
                }
            }
        }
        Ok(ControlFlow::Continue(()))
    })?;

    for link in &links {
        link.create()?;
    }
    Ok(())
}

fn write_action(data: Vec<u8>, name: &str, mode: u32) -> ExtractAction {
    ExtractAction::Write {
        data: data.into(),
        mode: mode_from(name, mode),
    }
}

const MAX_LINK_DEPTH: usize = 8;

/// Folds `.` and `..` out of an archive path. `None` when it climbs above
/// the archive root.
fn normalize(path: &str) -> Option<String> {
    let mut parts: Vec<&str> = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop()?;
            }
            part => parts.push(part),
        }
    }
    Some(parts.join("/"))
}

/// Archive path a link member points at. Hard links name an earlier member;
/// symlinks are relative to the link's own directory.
fn link_target(member: &Member) -> Option<String> {
    let link = member.link_name.as_deref()?;
    match member.kind {
        MemberKind::HardLink => normalize(link),
        MemberKind::Symlink if !link.starts_with('/') => {
            let dir = member.name.rsplit_once('/').map_or("", |(dir, _)| dir);
            normalize(&format!("{dir}/{link}"))
        }
        _ => None,
    }
}

/// Follows a link member to the regular file behind it and returns that
/// file's contents and mode. Dangling links and links to directories give
/// `None`.
fn resolve_link(
    reader: &dyn ArchiveReader,
    data: &[u8],
    member: &Member,
) -> Result<Option<(Vec<u8>, u32)>, ExtractError> {
    let mut current = member.clone();
    for _ in 0..MAX_LINK_DEPTH {
        let Some(target) = link_target(&current) else {
            return Ok(None);
        };

        let mut file = None;
        let mut next = None;
        reader.walk(data, &mut |candidate, contents| {
            if normalize(&candidate.name).as_deref() != Some(target.as_str()) {
                return Ok(ControlFlow::Continue(()));
            }
            match candidate.kind {
                MemberKind::File => {
                    let mut bytes = Vec::new();
                    contents.read_to_end(&mut bytes)?;
                    file = Some((bytes, candidate.mode));
                }
                MemberKind::HardLink | MemberKind::Symlink => next = Some(candidate.clone()),
                MemberKind::Dir => {}
            }
            Ok(ControlFlow::Break(()))
        })?;

        match (file, next) {
            (Some(file), _) => return Ok(Some(file)),
            (None, Some(link)) => current = link,
            (None, None) => return Ok(None),
        }
    }
    warn!("link chain at `{}` is too deep", member.name);
    Ok(None)
}

/// Reads a payload and returns the file(s) to extract.
///
/// With `multiple` unset, the first direct match wins. Otherwise every
/// match is collected and more than one is reported as
/// [`ExtractError::Candidates`].
pub trait Extractor: Send + Sync {
    fn extract(&self, data: &[u8], multiple: bool) -> Result<ExtractedFile, ExtractError>;
}

pub struct ArchiveExtractor {
    chooser: Box<dyn Chooser>,
    reader: Arc<dyn ArchiveReader>,
}

impl ArchiveExtractor {
    pub fn new(chooser: Box<dyn Chooser>, reader: Arc<dyn ArchiveReader>) -> Self {
        Self { chooser, reader }
    }
}

impl Extractor for ArchiveExtractor {
    fn extract(&self, data: &[u8], multiple: bool) -> Result<ExtractedFile, ExtractError> {
        let source: Arc<[u8]> = Arc::from(data);
        let mut claimed: Vec<String> = Vec::new();
        let mut candidates = Vec::new();
        let mut direct = None;

        self.reader.walk(&source, &mut |member, contents| {
            if claimed.iter().any(|dir| member.name.starts_with(dir.as_str())) {
                return Ok(ControlFlow::Continue(()));
            }
            let choice = self
                .chooser
                .choose(&member.name, member.is_dir(), member.mode);
            if !choice.is_match() {
                return Ok(ControlFlow::Continue(()));
            }
            checked_relative(&member.name, &member.name)?;

            let name = rename_guess(&member.name, &member.name);
            let (action, mode) = match member.kind {
                MemberKind::Dir => {
                    claimed.push(member.name.clone());
                    let action = ExtractAction::Subtree {
                        source: Arc::clone(&source),
                        reader: Arc::clone(&self.reader),
                        prefix: member.name.clone(),
                    };
                    (action, member.mode)
                }
                MemberKind::File => {
                    let mut data = Vec::new();
                    contents.read_to_end(&mut data)?;
                    (write_action(data, &name, member.mode), member.mode)
                }
                MemberKind::HardLink | MemberKind::Symlink => {
                    match resolve_link(self.reader.as_ref(), &source, member)? {
                        Some((data, mode)) => (write_action(data, &name, mode), mode),
                        None => {
                            debug!("skipping link `{}`: no regular file behind it", member.name);
                            return Ok(ControlFlow::Continue(()));
                        }
                    }
                }
            };

            let file = ExtractedFile {
                name,
                archive_name: member.name.clone(),
                mode,
                is_dir: member.is_dir(),
                action,
            };
            debug!(
                "member `{}` matched {} (direct: {})",
                file.archive_name, self.chooser, choice.direct
            );

            if choice.direct && !multiple {
                direct = Some(file);
                return Ok(ControlFlow::Break(()));
            }
            candidates.push(file);
            Ok(ControlFlow::Continue(()))
        })?;

        if let Some(file) = direct {
            return Ok(file);
        }

        match candidates.len() {
            0 => Err(ExtractError::TargetNotFound {
                target: self.chooser.to_string(),
            }),
            1 => Ok(candidates.remove(0)),
            count => Err(ExtractError::Candidates {
                count,
                target: self.chooser.to_string(),
                candidates,
            }),
        }
    }
}

/// Treats the whole payload as one (possibly compressed) file.
pub struct SingleFileExtractor {
    filename: String,
    tool: String,
    codec: Codec,
}

impl SingleFileExtractor {
    pub fn new(filename: impl Into<String>, tool: impl Into<String>, codec: Codec) -> Self {
        Self {
            filename: filename.into(),
            tool: tool.into(),
            codec,
        }
    }
}

impl Extractor for SingleFileExtractor {
    fn extract(&self, data: &[u8], _multiple: bool) -> Result<ExtractedFile, ExtractError> {
        let name = rename_guess(&self.filename, &self.tool);
        let data = self.codec.decode_all(data)?;
        let mode = mode_from(&name, 0o666);

        Ok(ExtractedFile {
            archive_name: self.tool.clone(),
            mode: 0o666,
            is_dir: false,
            action: ExtractAction::Write {
                data: data.into(),
                mode,
            },
            name,
        })
    }
}

// Longer suffixes first so `.tar.gz` wins over `.gz`.
const TAR_SUFFIXES: &[(&str, Codec)] = &[
    (".tar.gz", Codec::Gzip),
    (".tgz", Codec::Gzip),
    (".tar.bz2", Codec::Bzip2),
    (".tbz", Codec::Bzip2),
    (".tar.xz", Codec::Xz),
    (".txz", Codec::Xz),
    (".tar.zst", Codec::Zstd),
    (".tar", Codec::None),
];

const COMPRESSED_SUFFIXES: &[(&str, Codec)] = &[
    (".gz", Codec::Gzip),
    (".bz2", Codec::Bzip2),
    (".xz", Codec::Xz),
    (".zst", Codec::Zstd),
];

/// Picks an extractor from the payload's file name. An empty `tool` falls
/// back to `filename`.
pub fn new_extractor(filename: &str, tool: &str, chooser: Box<dyn Chooser>) -> Box<dyn Extractor> {
    let tool = if tool.is_empty() { filename } else { tool };

    if let Some((_, codec)) = TAR_SUFFIXES.iter().find(|(s, _)| filename.ends_with(s)) {
        return Box::new(ArchiveExtractor::new(chooser, Arc::new(TarReader::new(*codec))));
    }
    if filename.ends_with(".zip") {
        return Box::new(ArchiveExtractor::new(chooser, Arc::new(ZipReader)));
    }

    let codec = COMPRESSED_SUFFIXES
        .iter()
        .find(|(s, _)| filename.ends_with(s))
        .map_or(Codec::None, |(_, codec)| *codec);
    Box::new(SingleFileExtractor::new(filename, tool, codec))
}
