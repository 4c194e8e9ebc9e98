//! CLI command implementations.

pub mod compact;
pub mod inspect;
pub mod recover;

use std::path::Path;

/// Returns the explicit storage group name, or the directory's own name.
pub fn group_name(path: &Path, name: Option<String>) -> Result<String, Box<dyn std::error::Error>> {
    if let Some(name) = name {
        return Ok(name);
    }
    path.file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
        .ok_or_else(|| format!("Cannot derive a storage group name from {}", path.display()).into())
}
