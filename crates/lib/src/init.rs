//! Initialize the configuration directory: create ~/.shellboard, default config, and bundled scripts.
//!
//! Layout mirrors `crates/lib/config/`: `config/scripts/` → `~/.shellboard/scripts/`.

use anyhow::{Context, Result};
use include_dir::{include_dir, Dir};
use std::path::{Path, PathBuf};

use crate::config;

static BUNDLED_SCRIPTS: Dir<'_> = include_dir!("$CARGO_MANIFEST_DIR/config/scripts");

/// Ensure the configuration directory has been initialized (config file and scripts directory exist).
pub fn require_initialized(config_path: &Path, config: &config::Config) -> Result<()> {
    if !config_path.exists() {
        anyhow::bail!(
            "configuration not initialized; run `shellboard init` first (config file not found: {})",
            config_path.display()
        );
    }
    let scripts_dir = config::resolve_scripts_dir(config, config_path);
    if !scripts_dir.is_dir() {
        anyhow::bail!(
            "configuration not initialized; run `shellboard init` first (scripts directory not found: {})",
            scripts_dir.display()
        );
    }
    Ok(())
}

/// Create the config directory and default files if they do not exist.
/// - Creates the config directory (parent of config file path).
/// - Writes `config.json` with `{}` if missing.
/// - Extracts the bundled scripts into the resolved scripts directory if it does not exist.
pub fn init_config_dir(config_path: &Path) -> Result<PathBuf> {
    let config_dir = config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(config_dir)
        .with_context(|| format!("creating config directory {}", config_dir.display()))?;

    if !config_path.exists() {
        let default_config = b"{}";
        std::fs::write(config_path, default_config)
            .with_context(|| format!("writing default config to {}", config_path.display()))?;
        log::info!("created default config at {}", config_path.display());
    }

    let (config, _) = config::load_config(Some(config_path.to_path_buf()))?;
    let scripts_dir = config::resolve_scripts_dir(&config, config_path);
    if !scripts_dir.exists() {
        std::fs::create_dir_all(&scripts_dir)
            .with_context(|| format!("creating scripts directory {}", scripts_dir.display()))?;
        if let Err(e) = BUNDLED_SCRIPTS.extract(&scripts_dir) {
            anyhow::bail!(
                "extracting bundled scripts to {}: {}",
                scripts_dir.display(),
                e
            );
        }
        log::info!("extracted bundled scripts to {}", scripts_dir.display());
    } else {
        log::debug!("scripts directory already exists at {}, skipping", scripts_dir.display());
    }

    Ok(config_dir.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gate::SCRIPT_REGISTRY;

    fn temp_dir() -> PathBuf {
        std::env::temp_dir().join(format!("shellboard-init-test-{}", uuid::Uuid::new_v4()))
    }

    #[test]
    fn every_registered_script_is_bundled() {
        for (name, file) in SCRIPT_REGISTRY {
            assert!(BUNDLED_SCRIPTS.get_file(file).is_some(), "{name} not bundled");
        }
    }

    #[test]
    fn init_creates_config_and_scripts() {
        let dir = temp_dir();
        let config_path = dir.join("config.json");
        let (config, _) = config::load_config(Some(config_path.clone())).unwrap();
        assert!(require_initialized(&config_path, &config).is_err());

        init_config_dir(&config_path).unwrap();
        assert_eq!(std::fs::read_to_string(&config_path).unwrap(), "{}");
        assert!(dir.join("scripts").join("disk-usage.sh").is_file());
        require_initialized(&config_path, &config).unwrap();

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn init_keeps_existing_files() {
        let dir = temp_dir();
        let config_path = dir.join("config.json");
        std::fs::create_dir_all(dir.join("scripts")).unwrap();
        std::fs::write(&config_path, r#"{"server":{"port":4000}}"#).unwrap();
        std::fs::write(dir.join("scripts").join("backup.sh"), "echo mine").unwrap();

        init_config_dir(&config_path).unwrap();
        assert_eq!(
            std::fs::read_to_string(&config_path).unwrap(),
            r#"{"server":{"port":4000}}"#
        );
        assert_eq!(
            std::fs::read_to_string(dir.join("scripts").join("backup.sh")).unwrap(),
            "echo mine"
        );
        assert!(!dir.join("scripts").join("disk-usage.sh").exists());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn init_honours_scripts_directory_override() {
        let dir = temp_dir();
        let config_path = dir.join("config.json");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(&config_path, r#"{"scripts":{"directory":"bin"}}"#).unwrap();

        init_config_dir(&config_path).unwrap();
        assert!(dir.join("bin").join("port-check.sh").is_file());
        assert!(!dir.join("scripts").exists());

        let _ = std::fs::remove_dir_all(&dir);
    }
}
