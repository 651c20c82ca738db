//! Node enrichment: timestamps, attributes, owner and effective permissions
//!
//! The crawler treats enrichment as an opaque step that turns a path and its
//! metadata into an ordered list of properties. Who "the current user" is
//! comes from an injected [`PermissionResolver`] so tests can substitute a
//! fixed identity.

use crate::node::Property;
use crate::path_util;
use chrono::{DateTime, Local};
use std::fmt;
use std::fs::Metadata;
use std::sync::Arc;
use std::time::SystemTime;

/// Paths longer than this skip owner and permission lookups.
pub const DEFAULT_MAX_ENRICHABLE_PATH_LEN: usize = 255;

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Produces the property list attached to each node.
pub trait NodeEnricher: Send + Sync {
    fn properties(&self, path: &str, meta: &Metadata) -> Vec<Property>;
}

/// Enricher that attaches nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoEnrichment;

impl NodeEnricher for NoEnrichment {
    fn properties(&self, _path: &str, _meta: &Metadata) -> Vec<Property> {
        Vec::new()
    }
}

/// Access rights the current user effectively holds on a node.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct EffectivePermissions {
    pub read: bool,
    pub write: bool,
    pub execute: bool,
}

impl EffectivePermissions {
    pub const NONE: EffectivePermissions = EffectivePermissions {
        read: false,
        write: false,
        execute: false,
    };

    pub fn from_mode_bits(bits: u32) -> Self {
        Self {
            read: bits & 0o4 != 0,
            write: bits & 0o2 != 0,
            execute: bits & 0o1 != 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::NONE
    }
}

impl fmt::Display for EffectivePermissions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = [
            (self.read, "Read"),
            (self.write, "Write"),
            (self.execute, "Execute"),
        ]
        .iter()
        .filter(|(granted, _)| *granted)
        .map(|(_, name)| *name)
        .collect();
        write!(f, "{}", names.join(", "))
    }
}

/// Resolves the effective permissions of the current user on a node.
pub trait PermissionResolver: Send + Sync {
    fn effective_permissions(&self, meta: &Metadata) -> EffectivePermissions;
}

/// Identity used to evaluate Unix mode bits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnixIdentity {
    pub uid: u32,
    pub gids: Vec<u32>,
}

impl UnixIdentity {
    /// Evaluate `mode` for a node owned by `owner:group`.
    pub fn evaluate(&self, mode: u32, owner: u32, group: u32) -> EffectivePermissions {
        if self.uid == 0 {
            return EffectivePermissions {
                read: true,
                write: true,
                execute: mode & 0o111 != 0,
            };
        }
        let bits = if owner == self.uid {
            mode >> 6
        } else if self.gids.contains(&group) {
            mode >> 3
        } else {
            mode
        };
        EffectivePermissions::from_mode_bits(bits & 0o7)
    }
}

/// Permission resolver for the identity of this process (or an injected one).
#[derive(Debug, Clone)]
pub struct CurrentUser {
    #[cfg_attr(not(unix), allow(dead_code))]
    identity: UnixIdentity,
}

impl CurrentUser {
    /// Identity of the running process.
    #[cfg(unix)]
    pub fn detect() -> Self {
        // SAFETY: these calls only read process credentials.
        let (uid, egid) = unsafe { (libc::geteuid(), libc::getegid()) };
        let mut gids = vec![egid];

        let count = unsafe { libc::getgroups(0, std::ptr::null_mut()) };
        if count > 0 {
            let mut groups: Vec<libc::gid_t> = vec![0; count as usize];
            let got = unsafe { libc::getgroups(count, groups.as_mut_ptr()) };
            if got > 0 {
                groups.truncate(got as usize);
                gids.extend(groups.into_iter().filter(|g| *g != egid));
            }
        }

        Self::with_identity(UnixIdentity { uid, gids })
    }

    #[cfg(not(unix))]
    pub fn detect() -> Self {
        Self::with_identity(UnixIdentity {
            uid: u32::MAX,
            gids: Vec::new(),
        })
    }

    pub fn with_identity(identity: UnixIdentity) -> Self {
        Self { identity }
    }
}

impl PermissionResolver for CurrentUser {
    #[cfg(unix)]
    fn effective_permissions(&self, meta: &Metadata) -> EffectivePermissions {
        use std::os::unix::fs::MetadataExt;
        self.identity.evaluate(meta.mode(), meta.uid(), meta.gid())
    }

    #[cfg(not(unix))]
    fn effective_permissions(&self, meta: &Metadata) -> EffectivePermissions {
        EffectivePermissions {
            read: true,
            write: !meta.permissions().readonly(),
            execute: meta.is_dir(),
        }
    }
}

/// Default enricher: `created`, `modified`, `attributes`, `owner`,
/// `effectivePermissions`, in that order.
#[derive(Clone)]
pub struct MetadataEnricher {
    resolver: Arc<dyn PermissionResolver>,
    max_path_len: usize,
}

impl MetadataEnricher {
    pub fn new(resolver: Arc<dyn PermissionResolver>, max_path_len: usize) -> Self {
        Self {
            resolver,
            max_path_len,
        }
    }

    /// Enricher for the current process identity.
    pub fn for_current_user(max_path_len: usize) -> Self {
        Self::new(Arc::new(CurrentUser::detect()), max_path_len)
    }
}

impl NodeEnricher for MetadataEnricher {
    fn properties(&self, path: &str, meta: &Metadata) -> Vec<Property> {
        let mut properties = Vec::with_capacity(5);

        if let Ok(created) = meta.created() {
            properties.push(Property::new("created", format_time(created)));
        }
        if let Ok(modified) = meta.modified() {
            properties.push(Property::new("modified", format_time(modified)));
        }
        properties.push(Property::new("attributes", attributes(path, meta)));

        if path_util::is_path_too_long(path, self.max_path_len) {
            tracing::debug!(path, "path too long, skipping owner and permissions");
            return properties;
        }

        if let Some(owner) = owner(meta) {
            properties.push(Property::new("owner", owner));
        }
        let permissions = self.resolver.effective_permissions(meta);
        if !permissions.is_empty() {
            properties.push(Property::new("effectivePermissions", permissions.to_string()));
        }

        properties
    }
}

fn format_time(time: SystemTime) -> String {
    DateTime::<Local>::from(time).format(TIME_FORMAT).to_string()
}

#[cfg(unix)]
fn owner(meta: &Metadata) -> Option<String> {
    use std::os::unix::fs::MetadataExt;
    Some(meta.uid().to_string())
}

#[cfg(not(unix))]
fn owner(_meta: &Metadata) -> Option<String> {
    None
}

fn attributes(path: &str, meta: &Metadata) -> String {
    let mut flags = Vec::new();
    if meta.is_dir() {
        flags.push("Directory");
    }
    if meta.permissions().readonly() {
        flags.push("ReadOnly");
    }
    if is_hidden(path, meta) {
        flags.push("Hidden");
    }
    if flags.is_empty() {
        flags.push("Normal");
    }
    flags.join(", ")
}

/// Dot-prefixed names, plus the hidden attribute on Windows.
#[allow(unused_variables)]
fn is_hidden(path: &str, meta: &Metadata) -> bool {
    if path_util::short_name(path).starts_with('.') {
        return true;
    }

    #[cfg(windows)]
    {
        use std::os::windows::fs::MetadataExt;
        const FILE_ATTRIBUTE_HIDDEN: u32 = 0x2;
        if meta.file_attributes() & FILE_ATTRIBUTE_HIDDEN != 0 {
            return true;
        }
    }

    false
}
