use std::fs;
use std::path::Path;

use tempfile::NamedTempFile;

use crate::types::EngineState;

pub const SCHEMA_VERSION: u32 = 1;

/// Load engine state from a JSON file.
///
/// A missing file yields an empty state at the current schema version.
/// Unknown fields are ignored.
pub fn load(path: &Path) -> Result<EngineState, String> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok(EngineState {
                schema_version: SCHEMA_VERSION,
                ..Default::default()
            });
        }
        Err(e) => return Err(format!("Failed to read {}: {}", path.display(), e)),
    };

    let state: EngineState = serde_json::from_str(&contents)
        .map_err(|e| format!("Failed to parse state from {}: {}", path.display(), e))?;

    if state.schema_version != SCHEMA_VERSION {
        return Err(format!(
            "Unsupported schema_version {} in {} (expected {})",
            state.schema_version,
            path.display(),
            SCHEMA_VERSION
        ));
    }

    Ok(state)
}

/// Write engine state atomically: temp file in the same directory, fsync, rename.
pub fn save(path: &Path, state: &EngineState) -> Result<(), String> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));

    fs::create_dir_all(parent)
        .map_err(|e| format!("Failed to create directory {}: {}", parent.display(), e))?;

    let json = serde_json::to_string_pretty(state)
        .map_err(|e| format!("Failed to serialize state: {}", e))?;

    let temp_file = NamedTempFile::new_in(parent)
        .map_err(|e| format!("Failed to create temp file in {}: {}", parent.display(), e))?;

    fs::write(temp_file.path(), &json).map_err(|e| format!("Failed to write temp file: {}", e))?;

    let file = fs::File::open(temp_file.path())
        .map_err(|e| format!("Failed to open temp file for sync: {}", e))?;
    file.sync_all()
        .map_err(|e| format!("Failed to sync temp file: {}", e))?;

    temp_file
        .persist(path)
        .map_err(|e| format!("Failed to rename temp file to {}: {}", path.display(), e))?;

    Ok(())
}

/// Generate the next sequential ID for `prefix`, e.g. `LEAD-004`.
///
/// Suffixes are never reused: the counter in `next_ids` only grows.
pub fn generate_next_id(state: &mut EngineState, prefix: &str) -> String {
    let counter = state.next_ids.entry(prefix.to_string()).or_insert(0);
    *counter += 1;
    format!("{}-{:03}", prefix, counter)
}
