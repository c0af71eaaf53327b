use crate::MountError;
use std::path::{Path, PathBuf};

const MOUNTINFO: &str = "/proc/self/mountinfo";

/// One line of `/proc/self/mountinfo`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountEntry {
    pub mount_point: PathBuf,
    pub fstype: String,
    pub source: String,
}

/// Snapshot of the live mount table.
///
/// Mount state is never persisted by strata; it is always rediscovered here.
#[derive(Debug, Clone, Default)]
pub struct MountTable {
    entries: Vec<MountEntry>,
}

impl MountTable {
    pub fn read() -> Result<Self, MountError> {
        let content = std::fs::read_to_string(MOUNTINFO).map_err(|e| MountError::IoAt {
            path: PathBuf::from(MOUNTINFO),
            source: e,
        })?;
        Self::parse(&content)
    }

    /// Parse mountinfo text. Format per line:
    /// `id parent major:minor root mount_point options [optional...] - fstype source super_options`
    pub fn parse(content: &str) -> Result<Self, MountError> {
        let mut entries = Vec::new();
        for line in content.lines().filter(|l| !l.trim().is_empty()) {
            let fields: Vec<&str> = line.split(' ').collect();
            if fields.len() < 5 {
                return Err(MountError::MountTable(line.to_owned()));
            }
            let mount_point = PathBuf::from(unescape(fields[4]));
            let (fstype, source) = match fields.iter().position(|f| *f == "-") {
                Some(sep) if sep + 2 < fields.len() => {
                    (unescape(fields[sep + 1]), unescape(fields[sep + 2]))
                }
                _ => return Err(MountError::MountTable(line.to_owned())),
            };
            entries.push(MountEntry {
                mount_point,
                fstype,
                source,
            });
        }
        Ok(Self { entries })
    }

    pub fn entries(&self) -> &[MountEntry] {
        &self.entries
    }

    /// The most recent mount stacked on `path`, if any.
    pub fn find(&self, path: &Path) -> Option<&MountEntry> {
        let canonical = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
        self.entries
            .iter()
            .rev()
            .find(|e| e.mount_point == canonical || e.mount_point == path)
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.find(path).is_some()
    }
}

/// Undo the kernel's octal escaping of space, tab, newline and backslash.
fn unescape(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 3 < bytes.len() && is_octal_escape(&bytes[i + 1..i + 4]) {
            let digit = |k: usize| bytes[i + k] - b'0';
            out.push(digit(1) * 64 + digit(2) * 8 + digit(3));
            i += 4;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn is_octal_escape(digits: &[u8]) -> bool {
    digits.len() == 3 && digits[0] <= b'3' && digits.iter().all(|d| (b'0'..=b'7').contains(d))
}
