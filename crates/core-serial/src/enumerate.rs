//! Device enumeration: scan `/dev` for entries matching the known
//! USB-serial adapter name prefixes (§6 "Device enumeration").

use std::path::{Path, PathBuf};

const PREFIXES: &[&str] = &["cu.usbserial", "cu.usbmodem", "cu.wch"];

/// List candidate device paths under `/dev`. Returns an empty vector (not
/// an error) if the directory cannot be read, matching the "best effort"
/// nature of enumeration — callers fall back to manual path entry.
pub fn candidates() -> Vec<PathBuf> {
    candidates_in(Path::new("/dev"))
}

pub(crate) fn candidates_in(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut found: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .filter_map(|entry| {
            let name = entry.file_name();
            let name = name.to_str()?;
            if PREFIXES.iter().any(|p| name.starts_with(p)) {
                Some(dir.join(name))
            } else {
                None
            }
        })
        .collect();
    found.sort();
    found
}
