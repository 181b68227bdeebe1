//! Finds the Go module root by ascending from a starting directory.

use std::path::{Path, PathBuf};

use crate::error::{Result, WatchError};

const MANIFEST_FILE: &str = "go.mod";
const MODULE_PREFIX: &str = "module ";

/// Ascend `start`'s ancestor chain (inclusive) for the nearest directory
/// containing a `go.mod`, and extract the module name from its first
/// `module ` line. Trailing whitespace on that line is kept verbatim.
pub fn find(start: &Path) -> Result<(PathBuf, String)> {
    let mut dir = start.to_path_buf();
    loop {
        let manifest = dir.join(MANIFEST_FILE);
        match std::fs::read_to_string(&manifest) {
            Ok(content) => {
                let name = extract_module_name(&content);
                return Ok((dir, name));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // no manifest here, keep ascending
            }
            Err(e) => {
                return Err(WatchError::Io {
                    path: manifest,
                    source: e,
                });
            }
        }

        match dir.parent() {
            Some(parent) => dir = parent.to_path_buf(),
            None => return Err(WatchError::NoModule(start.to_path_buf())),
        }
    }
}

fn extract_module_name(content: &str) -> String {
    for line in content.lines() {
        if let Some(rest) = line.strip_prefix(MODULE_PREFIX) {
            return rest.to_string();
        }
    }
    String::new()
}
