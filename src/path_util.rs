//! Path helpers shared by the crawler and both sinks
//!
//! Paths travel through the event stream as plain strings, so parent lookup
//! and short-name extraction work on the textual form rather than on
//! `std::path::Path`. This keeps the registry keys used by the sinks exactly
//! equal to what the crawler emitted, and lets Windows-style paths
//! (drive roots, `\\server\share`) be handled on any host.

use std::fs;
use std::io;
use std::path::Path;

/// Separator convention used to interpret a path string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathStyle {
    /// `/` separated, `/` is the root, `//host/share` is a network path.
    Unix,
    /// `\` separated, `C:\` is a root, `\\host\share` is a network path.
    Windows,
}

impl PathStyle {
    /// Style of the host platform.
    pub const fn native() -> Self {
        if cfg!(windows) {
            PathStyle::Windows
        } else {
            PathStyle::Unix
        }
    }

    pub const fn separator(self) -> char {
        match self {
            PathStyle::Unix => '/',
            PathStyle::Windows => '\\',
        }
    }

    fn is_network(self, path: &str) -> bool {
        let sep = self.separator();
        let mut chars = path.chars();
        chars.next() == Some(sep) && chars.next() == Some(sep)
    }

    fn is_drive_spec(self, path: &str) -> bool {
        let bytes = path.as_bytes();
        self == PathStyle::Windows
            && bytes.len() == 2
            && bytes[0].is_ascii_alphabetic()
            && bytes[1] == b':'
    }

    /// Strip trailing separators, keeping the ones that make a path a root
    /// (`/`, `C:\`).
    pub fn normalize(self, path: &str) -> String {
        let sep = self.separator();
        let trimmed = path.trim_end_matches(sep);

        if trimmed.is_empty() && path.starts_with(sep) {
            return sep.to_string();
        }
        if self.is_drive_spec(trimmed) && path.len() > trimmed.len() {
            return format!("{}{}", trimmed, sep);
        }
        trimmed.to_string()
    }

    /// Parent of `path`, or `None` when `path` is a filesystem root, a
    /// network root (`\\host`), or a single relative component.
    pub fn parent(self, path: &str) -> Option<String> {
        let sep = self.separator();
        let normalized = self.normalize(path);
        let tokens: Vec<&str> = normalized.split(sep).collect();
        let named = tokens.iter().filter(|t| !t.trim().is_empty()).count();

        if named == 0 {
            return None;
        }
        if named == 1 {
            let unix_absolute = self == PathStyle::Unix
                && normalized.starts_with(sep)
                && !self.is_network(&normalized);
            return unix_absolute.then(|| sep.to_string());
        }

        let parent = tokens[..tokens.len() - 1].join(&sep.to_string());
        if self.is_drive_spec(&parent) {
            return Some(format!("{}{}", parent, sep));
        }
        Some(parent)
    }

    pub fn is_root(self, path: &str) -> bool {
        self.parent(path).is_none()
    }

    /// Last named component of `path` ("Debug" for `C:\bin\Debug\`, "C:" for
    /// `C:\`). A bare root such as `/` is returned unchanged.
    pub fn short_name(self, path: &str) -> String {
        path.split(self.separator())
            .rev()
            .find(|t| !t.trim().is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| path.to_string())
    }
}

/// Parent of `path` using the host's separator convention.
pub fn parent_path(path: &str) -> Option<String> {
    PathStyle::native().parent(path)
}

/// Short (last component) name of `path` using the host's convention.
pub fn short_name(path: &str) -> String {
    PathStyle::native().short_name(path)
}

/// Strip a trailing separator using the host's convention.
pub fn normalize(path: &str) -> String {
    PathStyle::native().normalize(path)
}

pub fn is_root(path: &str) -> bool {
    PathStyle::native().is_root(path)
}

/// Whether `path` is too long for owner/permission lookups.
pub fn is_path_too_long(path: &str, limit: usize) -> bool {
    path.chars().count() > limit
}

/// Text of a canonicalized path with any `\\?\` verbatim prefix removed.
pub fn display_path(path: &Path) -> String {
    let text = path.to_string_lossy();
    if cfg!(windows) {
        if let Some(share) = text.strip_prefix(r"\\?\UNC\") {
            return format!(r"\\{}", share);
        }
        if let Some(local) = text.strip_prefix(r"\\?\") {
            return local.to_owned();
        }
    }
    text.into_owned()
}

/// `fs::read_dir`, retried in verbatim form when the path exceeds `MAX_PATH`.
pub fn list_dir(dir: &Path) -> io::Result<fs::ReadDir> {
    retry_verbatim(dir, |p| fs::read_dir(p))
}

/// `fs::symlink_metadata`, retried in verbatim form when the path exceeds `MAX_PATH`.
pub fn link_metadata(path: &Path) -> io::Result<fs::Metadata> {
    retry_verbatim(path, |p| fs::symlink_metadata(p))
}

fn retry_verbatim<T>(path: &Path, op: impl Fn(&Path) -> io::Result<T>) -> io::Result<T> {
    match op(path) {
        #[cfg(windows)]
        Err(err) if err.raw_os_error() == Some(ERROR_PATH_NOT_FOUND) => match verbatim(path) {
            Some(long) => op(&long),
            None => Err(err),
        },
        result => result,
    }
}

#[cfg(windows)]
const ERROR_PATH_NOT_FOUND: i32 = 3;

/// `\\?\C:\...` or `\\?\UNC\host\share\...`; `None` if already verbatim.
#[cfg(windows)]
fn verbatim(path: &Path) -> Option<std::path::PathBuf> {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir().ok()?.join(path)
    };
    let text = absolute.to_str()?;
    if text.starts_with(r"\\?\") {
        return None;
    }
    let long = match text.strip_prefix(r"\\") {
        Some(share) => format!(r"\\?\UNC\{}", share),
        None => format!(r"\\?\{}", text),
    };
    Some(long.into())
}

/// Junctions and mount points are not symlinks to `FileType`, but walking
/// into them can revisit a tree.
#[cfg(windows)]
pub fn is_reparse_point(path: &Path) -> bool {
    use std::os::windows::fs::MetadataExt;
    const FILE_ATTRIBUTE_REPARSE_POINT: u32 = 0x400;
    link_metadata(path).map_or(false, |meta| {
        meta.file_attributes() & FILE_ATTRIBUTE_REPARSE_POINT != 0
    })
}

#[cfg(not(windows))]
pub fn is_reparse_point(_path: &Path) -> bool {
    false
}
