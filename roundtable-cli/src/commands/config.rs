use std::fs;
use std::path::Path;

use anyhow::{Result, bail};
use shared::config::server::Config;

/// Serializes the default configuration as `yaml` or `json`.
///
/// # Errors
/// Returns an error if the format is unsupported or serialization fails.
pub fn render_config(format: &str) -> Result<String> {
    let config = Config::default();
    match format {
        "yaml" | "yml" => Ok(serde_yml::to_string(&config)?),
        "json" => Ok(serde_json::to_string_pretty(&config)?),
        other => bail!("unsupported format '{other}', use 'yaml' or 'json'"),
    }
}

/// Prints the default configuration, or writes it to `output`.
///
/// # Errors
/// Returns an error if the format is unsupported or writing the file fails.
pub fn generate_config(format: &str, output: Option<&Path>) -> Result<()> {
    let serialized = render_config(format)?;

    match output {
        Some(path) => {
            fs::write(path, serialized)?;
            println!("Configuration file '{}' generated successfully.", path.display());
        }
        None => print!("{serialized}"),
    }
    Ok(())
}
