//! Naming and permission rules for extracted files.

use crate::types::base_name;

const EXEC_BITS: u32 = 0o111;

/// `.deb` packages, man pages and text files are never made executable.
pub fn is_definitely_not_exec(name: &str) -> bool {
    name.ends_with(".deb") || name.ends_with(".1") || name.ends_with(".txt")
}

/// A file is executable if it is a `.exe` or `.appimage`, has no extension,
/// or already carries an executable bit.
pub fn is_exec(name: &str, mode: u32) -> bool {
    if is_definitely_not_exec(name) {
        return false;
    }
    name.ends_with(".exe")
        || name.ends_with(".appimage")
        || !base_name(name).contains('.')
        || mode & EXEC_BITS != 0
}

/// Returns `mode` with the executable bits set when `name` looks executable.
pub fn mode_from(name: &str, mode: u32) -> u32 {
    if is_exec(name, mode) {
        mode | EXEC_BITS
    } else {
        mode
    }
}

/// Guesses the name to write `file` under, falling back to `guess`.
pub fn rename_guess(file: &str, guess: &str) -> String {
    if is_definitely_not_exec(file) {
        return file.to_string();
    }
    if let Some(stripped) = file.strip_suffix(".appimage") {
        return stripped.to_string();
    }
    if file.ends_with(".exe") {
        return file.to_string();
    }
    guess.to_string()
}
