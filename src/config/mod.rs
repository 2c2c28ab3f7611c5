mod types;

pub use types::*;

use anyhow::{Context, Result};
use regex::Regex;
use std::collections::HashSet;
use std::path::Path;

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    parse_config(&content).with_context(|| format!("Invalid config file: {:?}", path))
}

/// Parse and validate configuration from TOML text
pub fn parse_config(content: &str) -> Result<Config> {
    let mut config: Config = toml::from_str(content).context("Failed to parse config")?;

    prepare_paths(&mut config.paths)?;
    validate_config(&config)?;

    Ok(config)
}

/// Load config from default locations or return default config
pub fn load_config_or_default(custom_path: Option<&Path>) -> Result<Config> {
    if let Some(path) = custom_path {
        return load_config(path);
    }

    let default_paths = [
        "./tapedeck.toml",
        "~/.config/tapedeck/config.toml",
        "/etc/tapedeck/config.toml",
    ];

    for path_str in default_paths {
        let path = shellexpand::tilde(path_str);
        let path = Path::new(path.as_ref());
        if path.exists() {
            return load_config(path);
        }
    }

    Ok(Config::default())
}

fn prepare_paths(paths: &mut [PathConfig]) -> Result<()> {
    for path in paths.iter_mut().filter(|p| p.is_regex()) {
        let re = Regex::new(&path.name[1..])
            .with_context(|| format!("Path '{}' has an invalid regular expression", path.name))?;
        path.matcher = Some(re);
    }
    Ok(())
}

/// Validate configuration
fn validate_config(config: &Config) -> Result<()> {
    if config.server.port == 0 {
        anyhow::bail!("Server port cannot be 0");
    }

    let auth = &config.server.auth;
    if auth.enabled && auth.api_key.is_none() && auth.password_hash.is_none() {
        anyhow::bail!("Authentication is enabled but neither api_key nor password_hash is set");
    }
    if auth.password_hash.is_some() && auth.username.is_none() {
        anyhow::bail!("password_hash is set without a username");
    }

    if let Some(url) = &config.playback.inventory_url {
        if !url.starts_with("http://") && !url.starts_with("https://") {
            anyhow::bail!("inventory_url must be an http(s) URL: {}", url);
        }
    }

    let mut names = HashSet::new();
    for path in &config.paths {
        if path.name.is_empty() {
            anyhow::bail!("Path names cannot be empty");
        }
        if !names.insert(path.name.as_str()) {
            anyhow::bail!("Path '{}' is defined more than once", path.name);
        }
        if !path.template().is_decodable() {
            anyhow::bail!(
                "Path '{}': record_path '{}' must contain %s or all of %Y %m %d %H %M %S",
                path.name,
                path.record_path
            );
        }
        if path.segment_duration_secs == 0 {
            anyhow::bail!("Path '{}': segment_duration_secs must be positive", path.name);
        }
        if !(path.part_duration_secs > 0.0) {
            anyhow::bail!("Path '{}': part_duration_secs must be positive", path.name);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tapedeck_common::RecordFormat;

    const SAMPLE: &str = r#"
[server]
port = 9000

[playback]
inventory_url = "http://inventory:8080"
concatenation_tolerance_ms = 500

[[paths]]
name = "cam1"
record_path = "/rec/%path/%Y-%m-%d_%H-%M-%S-%f"

[[paths]]
name = "~^garage_[0-9]+$"
playback = false

[[paths]]
name = "all_others"
segment_duration_secs = 600
"#;

    #[test]
    fn test_parse_sample() {
        let config = parse_config(SAMPLE).unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.playback.tolerance(), chrono::TimeDelta::milliseconds(500));
        assert_eq!(config.playback.inventory_timeout_secs, 5);
        assert_eq!(config.paths.len(), 3);
        assert_eq!(config.paths[0].record_format, RecordFormat::Fmp4);
        assert!(config.paths[1].matcher.is_some());
    }

    #[test]
    fn test_find_path_precedence() {
        let config = parse_config(SAMPLE).unwrap();

        assert_eq!(config.find_path("cam1").unwrap().name, "cam1");
        let garage = config.find_path("garage_12").unwrap();
        assert_eq!(garage.name, "~^garage_[0-9]+$");
        assert!(!garage.playback);
        assert_eq!(config.find_path("garage_x").unwrap().name, ALL_OTHERS);
        assert_eq!(config.find_path("lobby").unwrap().segment_duration_secs, 600);
    }

    #[test]
    fn test_find_path_without_fallback() {
        let config = parse_config(
            r#"
[[paths]]
name = "cam1"
"#,
        )
        .unwrap();
        assert!(config.find_path("cam1").is_some());
        assert!(config.find_path("cam2").is_none());
    }

    #[test]
    fn test_defaults() {
        let config = parse_config("").unwrap();
        assert_eq!(config.server.port, 9996);
        assert!(!config.server.auth.enabled);
        assert_eq!(config.paths.len(), 1);
        let path = config.find_path("anything").unwrap();
        assert_eq!(path.record_path, "./recordings/%path/%Y-%m-%d_%H-%M-%S-%f");
        assert_eq!(path.part_duration(), chrono::TimeDelta::seconds(1));
        assert!(path.playback);
    }

    #[test]
    fn test_validation_errors() {
        assert!(parse_config("[server]\nport = 0\n").is_err());
        assert!(parse_config("[[paths]]\nname = \"~[unclosed\"\n").is_err());
        assert!(parse_config("[[paths]]\nname = \"a\"\nrecord_path = \"/rec/%path\"\n").is_err());
        assert!(parse_config("[[paths]]\nname = \"a\"\n[[paths]]\nname = \"a\"\n").is_err());
        assert!(parse_config("[[paths]]\nname = \"a\"\npart_duration_secs = 0\n").is_err());
        assert!(parse_config("[server.auth]\nenabled = true\n").is_err());
        assert!(parse_config("[playback]\ninventory_url = \"inventory:8080\"\n").is_err());
    }

    #[test]
    fn test_load_config_or_default_explicit_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tapedeck.toml");
        std::fs::write(&path, SAMPLE).unwrap();

        let config = load_config_or_default(Some(&path)).unwrap();
        assert_eq!(config.server.port, 9000);

        assert!(load_config(&dir.path().join("missing.toml")).is_err());
    }
}
