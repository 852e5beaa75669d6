use super::naming::is_exec;
use crate::types::base_name;
use glob::{MatchOptions, Pattern};
use std::fmt;
use thiserror::Error;

/// Outcome of offering one archive member to a [`Chooser`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Choice {
    /// Extract immediately.
    pub direct: bool,
    /// Extract only if nothing better turns up.
    pub possible: bool,
}

impl Choice {
    pub const NONE: Self = Self {
        direct: false,
        possible: false,
    };

    pub fn is_match(&self) -> bool {
        self.direct || self.possible
    }
}

#[derive(Debug, Error)]
pub enum ChooserError {
    #[error("invalid glob `{pattern}`: {source}")]
    Glob {
        pattern: String,
        #[source]
        source: glob::PatternError,
    },
}

/// Decides which archive members to extract.
pub trait Chooser: fmt::Display + Send + Sync {
    fn choose(&self, name: &str, is_dir: bool, mode: u32) -> Choice;
}

/// Picks executables, preferring one named after the tool.
#[derive(Debug, Clone)]
pub struct BinaryChooser {
    pub tool: String,
}

impl BinaryChooser {
    pub fn new(tool: impl Into<String>) -> Self {
        Self { tool: tool.into() }
    }
}

impl Chooser for BinaryChooser {
    fn choose(&self, name: &str, is_dir: bool, mode: u32) -> Choice {
        if is_dir {
            return Choice::NONE;
        }

        let base = base_name(name);
        let named = base == self.tool
            || base.strip_suffix(".exe") == Some(self.tool.as_str())
            || base.strip_suffix(".appimage") == Some(self.tool.as_str());
        let possible = is_exec(name, mode);

        Choice {
            direct: named && possible,
            possible,
        }
    }
}

impl fmt::Display for BinaryChooser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "exe `{}`", self.tool)
    }
}

/// Picks members whose path ends with a literal file name.
#[derive(Debug, Clone)]
pub struct LiteralFileChooser {
    pub file: String,
}

impl LiteralFileChooser {
    pub fn new(file: impl Into<String>) -> Self {
        Self { file: file.into() }
    }
}

impl Chooser for LiteralFileChooser {
    fn choose(&self, name: &str, _is_dir: bool, _mode: u32) -> Choice {
        Choice {
            direct: false,
            possible: base_name(name) == base_name(&self.file) && name.ends_with(&self.file),
        }
    }
}

impl fmt::Display for LiteralFileChooser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "`{}`", self.file)
    }
}

/// Picks members matching a glob, with `/` as a literal separator.
/// The patterns `*` and `/` select everything.
#[derive(Debug, Clone)]
pub struct GlobChooser {
    expr: String,
    pattern: Pattern,
    all: bool,
}

const GLOB_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

impl GlobChooser {
    pub fn new(expr: &str) -> Result<Self, ChooserError> {
        let pattern = Pattern::new(expr).map_err(|source| ChooserError::Glob {
            pattern: expr.to_string(),
            source,
        })?;
        Ok(Self {
            expr: expr.to_string(),
            pattern,
            all: expr == "*" || expr == "/",
        })
    }
}

impl Chooser for GlobChooser {
    fn choose(&self, name: &str, _is_dir: bool, _mode: u32) -> Choice {
        if self.all {
            return Choice {
                direct: true,
                possible: true,
            };
        }
        let name = name.strip_suffix('/').unwrap_or(name);
        Choice {
            direct: false,
            possible: self.pattern.matches_with(base_name(name), GLOB_OPTIONS)
                || self.pattern.matches_with(name, GLOB_OPTIONS),
        }
    }
}

impl fmt::Display for GlobChooser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "`{}`", self.expr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binary_chooser() {
        let chooser = BinaryChooser::new("tool");
        assert_eq!(chooser.choose("bin/", true, 0o755), Choice::NONE);
        assert_eq!(
            chooser.choose("dist/tool", false, 0o755),
            Choice {
                direct: true,
                possible: true
            }
        );
        assert!(chooser.choose("tool.exe", false, 0o644).direct);
        assert!(chooser.choose("tool.appimage", false, 0o644).direct);

        let other = chooser.choose("other-tool", false, 0o755);
        assert!(!other.direct);
        assert!(other.possible);

        assert_eq!(chooser.choose("some.conf", false, 0o644), Choice::NONE);
        assert_eq!(chooser.choose("tool.txt", false, 0o755), Choice::NONE);
        assert_eq!(chooser.to_string(), "exe `tool`");
    }

    #[test]
    fn test_literal_file_chooser() {
        let chooser = LiteralFileChooser::new("doc/tool.1");
        assert!(chooser.choose("tool-1.0/doc/tool.1", false, 0o644).possible);
        assert!(!chooser.choose("tool-1.0/man/tool.1", false, 0o644).possible);
        assert!(!chooser.choose("tool-1.0/doc/tool.1", false, 0o644).direct);
        assert_eq!(chooser.to_string(), "`doc/tool.1`");
    }

    #[test]
    fn test_glob_chooser() {
        let chooser = GlobChooser::new("*.1").unwrap();
        assert!(chooser.choose("tool-1.0/doc/tool.1", false, 0o644).possible);
        assert!(!chooser.choose("tool-1.0/tool", false, 0o755).possible);

        // `*` does not cross directory separators.
        let chooser = GlobChooser::new("bin/*").unwrap();
        assert!(chooser.choose("bin/tool", false, 0o755).possible);
        assert!(!chooser.choose("bin/sub/tool", false, 0o755).possible);

        let chooser = GlobChooser::new("share/").unwrap();
        assert!(!chooser.choose("share/", true, 0o755).possible);
        let chooser = GlobChooser::new("share").unwrap();
        assert!(chooser.choose("tool/share/", true, 0o755).possible);
    }

    #[test]
    fn test_glob_chooser_all() {
        let chooser = GlobChooser::new("*").unwrap();
        let choice = chooser.choose("any/path/file", false, 0o644);
        assert!(choice.direct && choice.possible);
        assert!(GlobChooser::new("/").unwrap().choose("x", false, 0).direct);
    }

    #[test]
    fn test_invalid_glob() {
        assert!(matches!(
            GlobChooser::new("[z-a"),
            Err(ChooserError::Glob { .. })
        ));
    }
}
