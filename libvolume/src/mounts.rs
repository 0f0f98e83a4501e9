//! Mount point detection.
//!
//! Reads the kernel mount table (`/proc/self/mounts` unless configured
//! otherwise) and answers whether a path is currently a mount point and
//! which subtree is mounted on it.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::warn;

/// What, if anything, is mounted on a volume's mountpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MountState {
    Unmounted,
    /// The expected subtree is mounted.
    Mounted,
    /// Something else is mounted there; carries its source field.
    Foreign(String),
}

/// Snapshot of the mount points listed in a mount table, with the source
/// mounted on each. The last entry for a path wins, as it shadows the others.
#[derive(Debug, Clone, Default)]
pub struct MountTable {
    points: HashMap<PathBuf, String>,
}

impl MountTable {
    /// Read and parse the table at `path`.
    ///
    /// An unreadable table is treated as empty.
    pub async fn read(path: &Path) -> Self {
        match tokio::fs::read_to_string(path).await {
            Ok(contents) => Self::parse(&contents),
            Err(e) => {
                warn!(
                    path = %path.display(),
                    error = %e,
                    "unable to read mount table, assuming nothing is mounted"
                );
                Self::default()
            }
        }
    }

    /// Parse mount table text.
    ///
    /// Format: `<device> <mountpoint> <fstype> <options> <dump> <pass>`.
    pub fn parse(contents: &str) -> Self {
        let points = contents
            .lines()
            .filter_map(|line| {
                let mut fields = line.split_whitespace();
                let source = fields.next()?;
                let target = fields.next()?;
                Some((
                    normalize(Path::new(&unescape_mount_field(target))),
                    unescape_mount_field(source),
                ))
            })
            .collect();
        Self { points }
    }

    pub fn is_mounted(&self, path: &Path) -> bool {
        self.points.contains_key(&normalize(path))
    }

    /// Source field of the mount on `path`.
    pub fn source_of(&self, path: &Path) -> Option<&str> {
        self.points.get(&normalize(path)).map(String::as_str)
    }

    /// Whether `path` carries the filesystem subtree `subpath`.
    ///
    /// Kernel clients render the source either as `<monitors>:<subpath>` or
    /// as `<user>@<fsid>.<fs>=<subpath>`, so the subpath must end the source
    /// right after a `:` or `=` separator.
    pub fn state(&self, path: &Path, subpath: &str) -> MountState {
        match self.source_of(path) {
            None => MountState::Unmounted,
            Some(source) if source_has_subpath(source, subpath) => MountState::Mounted,
            Some(source) => MountState::Foreign(source.to_owned()),
        }
    }
}

fn source_has_subpath(source: &str, subpath: &str) -> bool {
    // A root mount renders as `...:/`, which trimming reduces to `...:`.
    let subpath = subpath.trim_end_matches('/');
    source
        .trim_end_matches('/')
        .strip_suffix(subpath)
        .and_then(|rest| rest.chars().last())
        .is_some_and(|sep| sep == ':' || sep == '=')
}

/// Drop a trailing separator so `/mnt/a/` and `/mnt/a` compare equal.
fn normalize(path: &Path) -> PathBuf {
    path.components().collect()
}

/// Decode the octal escapes (`\040` for space and so on) the kernel uses in
/// mount table fields.
fn unescape_mount_field(input: &str) -> String {
    let mut chars = input.chars().peekable();
    let mut output = String::with_capacity(input.len());

    while let Some(ch) = chars.next() {
        if ch != '\\' {
            output.push(ch);
            continue;
        }

        let mut oct = String::new();
        while oct.len() < 3 {
            match chars.peek() {
                Some(next) if next.is_digit(8) => {
                    oct.push(*next);
                    chars.next();
                }
                _ => break,
            }
        }

        match u8::from_str_radix(&oct, 8) {
            Ok(value) if oct.len() == 3 => output.push(char::from(value)),
            _ => {
                output.push('\\');
                output.push_str(&oct);
            }
        }
    }

    output
}
