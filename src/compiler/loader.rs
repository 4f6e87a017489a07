use anyhow::{Result, Context as AnyhowContext};
use std::fs;
use std::path::Path;
use crate::dsl::Process;

pub fn load_process_from_yaml(file_path: impl AsRef<Path>) -> Result<Process> {
    let file_path = file_path.as_ref();
    let yaml_content = fs::read_to_string(file_path)
        .with_context(|| format!("Failed to read YAML file from {}", file_path.display()))?;

    let process: Process = serde_yaml::from_str(&yaml_content)
        .with_context(|| format!("Failed to deserialize YAML content from {}", file_path.display()))?;

    Ok(process)
}

/// Loads every `.yaml`/`.yml` file in `dir`, in file-name order.
pub fn load_processes_from_dir(dir: impl AsRef<Path>) -> Result<Vec<Process>> {
    let dir = dir.as_ref();
    let mut paths = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("Failed to read directory {}", dir.display()))? {
        let path = entry?.path();
        if let Some(ext) = path.extension().and_then(|s| s.to_str()) {
            if ext == "yaml" || ext == "yml" {
                paths.push(path);
            }
        }
    }
    paths.sort();
    paths.iter().map(load_process_from_yaml).collect()
}
