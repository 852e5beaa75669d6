//! Filesystem side of extraction.

use super::ExtractError;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Destination name meaning "write to standard output".
pub const STDOUT: &str = "-";

fn write_error(path: &Path) -> impl FnOnce(io::Error) -> ExtractError + '_ {
    move |source| ExtractError::Write {
        path: path.to_path_buf(),
        source,
    }
}

fn remove_existing(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

fn create_parent(path: &Path) -> io::Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => fs::create_dir_all(parent),
        _ => Ok(()),
    }
}

/// Writes `data` to `path`, replacing any existing file and creating parent
/// directories. `-` writes to stdout instead.
pub fn write_file(path: &Path, data: &[u8], mode: u32) -> Result<(), ExtractError> {
    if path.as_os_str() == STDOUT {
        let mut stdout = io::stdout().lock();
        stdout.write_all(data).map_err(write_error(path))?;
        return stdout.flush().map_err(write_error(path));
    }

    remove_existing(path).map_err(write_error(path))?;
    create_parent(path).map_err(write_error(path))?;

    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(mode);
    }

    let mut file = options.open(path).map_err(write_error(path))?;
    file.write_all(data).map_err(write_error(path))?;

    // The open mode is filtered through the umask; apply it as given.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(mode)).map_err(write_error(path))?;
    }
    #[cfg(not(unix))]
    let _ = mode;

    Ok(())
}

pub fn create_dir(path: &Path) -> Result<(), ExtractError> {
    fs::create_dir_all(path).map_err(write_error(path))
}

/// A link queued for creation once all regular files exist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    pub path: PathBuf,
    pub target: PathBuf,
    pub symbolic: bool,
}

impl Link {
    /// Creates the link, replacing whatever is at `path`.
    pub fn create(&self) -> Result<(), ExtractError> {
        let path = self.path.as_path();
        if fs::symlink_metadata(path).is_ok() {
            fs::remove_file(path).map_err(write_error(path))?;
        }
        create_parent(path).map_err(write_error(path))?;

        if self.symbolic {
            symlink(&self.target, path).map_err(write_error(path))
        } else {
            fs::hard_link(&self.target, path).map_err(write_error(path))
        }
    }
}

#[cfg(unix)]
fn symlink(target: &Path, path: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(target, path)
}

#[cfg(windows)]
fn symlink(target: &Path, path: &Path) -> io::Result<()> {
    std::os::windows::fs::symlink_file(target, path)
}
