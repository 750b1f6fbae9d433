/// Project files - tempo plus grids as JSON, normalised on load
use std::path::Path;

use crate::error::Result;
use crate::sequencer::Snapshot;

pub fn load_project(path: &Path) -> Result<Snapshot> {
    let data = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&data)?)
}

// Writes the project, creating parent directories if they don't exist already
pub fn save_project(path: &Path, snapshot: &Snapshot) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(snapshot)?;
    std::fs::write(path, json)?;
    Ok(())
}
