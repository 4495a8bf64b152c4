//! Configuration for keiyaku paths and backends.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (KEIYAKU_HOME, KEIYAKU_EXTRACTOR_URL)
//! 2. Config file (.keiyaku/config.yaml)
//! 3. Defaults (~/.keiyaku)
//!
//! Config file discovery:
//! - Searches current directory and parents for .keiyaku/config.yaml
//! - Paths in config file are relative to the config file's parent directory

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Global cached configuration (stores Result to handle init errors)
static CONFIG: OnceLock<std::result::Result<ResolvedConfig, String>> = OnceLock::new();

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigFile {
    pub version: String,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub ingest: Option<IngestConfig>,
    #[serde(default)]
    pub extract: Option<ExtractConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PathsConfig {
    /// State directory (relative to config file)
    pub home: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IngestConfig {
    pub max_document_bytes: Option<u64>,
    pub max_in_flight: Option<usize>,
    pub inbox: Option<String>,
    pub stability_delay_secs: Option<u64>,
    pub ignore_patterns: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExtractConfig {
    pub backend_url: Option<String>,
    pub recognize_timeout_seconds: Option<u64>,
    pub field_timeout_seconds: Option<u64>,
}

/// Resolved configuration with absolute paths
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// Absolute path to keiyaku home (document stores, registry)
    pub home: PathBuf,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
    /// Intake settings
    pub ingest: IngestSettings,
    /// Extractor backend settings
    pub extract: ExtractSettings,
}

#[derive(Debug, Clone)]
pub struct IngestSettings {
    pub max_document_bytes: u64,
    pub max_in_flight: usize,
    pub inbox: PathBuf,
    pub stability_delay_secs: u64,
    pub ignore_patterns: Vec<String>,
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            max_document_bytes: 20 * 1024 * 1024,
            max_in_flight: 10,
            inbox: PathBuf::from("inbox"),
            stability_delay_secs: 5,
            ignore_patterns: vec![
                "~$*".to_string(),
                ".*".to_string(),
                "*.tmp".to_string(),
                "*.part".to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExtractSettings {
    pub backend_url: String,
    pub recognize_timeout_seconds: u64,
    pub field_timeout_seconds: u64,
}

impl Default for ExtractSettings {
    fn default() -> Self {
        Self {
            backend_url: "http://localhost:8700".to_string(),
            recognize_timeout_seconds: 120,
            field_timeout_seconds: 30,
        }
    }
}

/// Find config file by searching current directory and parents
fn find_config_file() -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let config_path = current.join(".keiyaku").join("config.yaml");
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Resolve a path that may be relative to the config file's parent
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(&path)
            .canonicalize()
            .unwrap_or_else(|_| base.join(path_str))
    }
}

/// Load configuration from all sources
fn load_config() -> Result<ResolvedConfig> {
    let default_home = dirs::home_dir()
        .context("Failed to determine home directory")?
        .join(".keiyaku");

    let config_file = find_config_file();

    let (home, ingest, extract) = if let Some(ref config_path) = config_file {
        let config = load_config_file(config_path)?;

        // Base directory is the parent of .keiyaku/ (the project root)
        let base_dir = config_path
            .parent()
            .and_then(|p| p.parent())
            .unwrap_or(Path::new("."));

        let home = if let Ok(env_home) = std::env::var("KEIYAKU_HOME") {
            PathBuf::from(env_home)
        } else if let Some(ref home_path) = config.paths.home {
            // home is relative to the .keiyaku/ directory
            let keiyaku_dir = config_path.parent().unwrap_or(Path::new("."));
            resolve_path(keiyaku_dir, home_path)
        } else {
            default_home.clone()
        };

        let defaults = IngestSettings::default();
        let ingest = match config.ingest {
            Some(ref cfg) => IngestSettings {
                max_document_bytes: cfg.max_document_bytes.unwrap_or(defaults.max_document_bytes),
                max_in_flight: cfg.max_in_flight.unwrap_or(defaults.max_in_flight),
                inbox: cfg
                    .inbox
                    .as_deref()
                    .map(|p| resolve_path(base_dir, p))
                    .unwrap_or_else(|| home.join("inbox")),
                stability_delay_secs: cfg
                    .stability_delay_secs
                    .unwrap_or(defaults.stability_delay_secs),
                ignore_patterns: cfg
                    .ignore_patterns
                    .clone()
                    .unwrap_or(defaults.ignore_patterns),
            },
            None => IngestSettings {
                inbox: home.join("inbox"),
                ..defaults
            },
        };

        let extract_defaults = ExtractSettings::default();
        let extract = ExtractSettings {
            backend_url: std::env::var("KEIYAKU_EXTRACTOR_URL").ok().unwrap_or_else(|| {
                config
                    .extract
                    .as_ref()
                    .and_then(|e| e.backend_url.clone())
                    .unwrap_or(extract_defaults.backend_url.clone())
            }),
            recognize_timeout_seconds: config
                .extract
                .as_ref()
                .and_then(|e| e.recognize_timeout_seconds)
                .unwrap_or(extract_defaults.recognize_timeout_seconds),
            field_timeout_seconds: config
                .extract
                .as_ref()
                .and_then(|e| e.field_timeout_seconds)
                .unwrap_or(extract_defaults.field_timeout_seconds),
        };

        (home, ingest, extract)
    } else {
        let home = std::env::var("KEIYAKU_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_home.clone());

        let ingest = IngestSettings {
            inbox: home.join("inbox"),
            ..IngestSettings::default()
        };

        let extract = ExtractSettings {
            backend_url: std::env::var("KEIYAKU_EXTRACTOR_URL")
                .unwrap_or_else(|_| ExtractSettings::default().backend_url),
            ..ExtractSettings::default()
        };

        (home, ingest, extract)
    };

    Ok(ResolvedConfig {
        home,
        config_file,
        ingest,
        extract,
    })
}

/// Get the global configuration (loads once, then cached)
pub fn config() -> Result<&'static ResolvedConfig> {
    let result = CONFIG.get_or_init(|| load_config().map_err(|e| e.to_string()));

    match result {
        Ok(config) => Ok(config),
        Err(e) => anyhow::bail!("{}", e),
    }
}

/// Force reload configuration (useful for testing)
pub fn reload_config() -> Result<ResolvedConfig> {
    load_config()
}

// ============================================================================
// Convenience functions
// ============================================================================

/// Get the keiyaku home directory (state).
pub fn keiyaku_home() -> Result<PathBuf> {
    Ok(config()?.home.clone())
}

/// Get the per-document stores directory ($KEIYAKU_HOME/documents)
pub fn documents_dir() -> Result<PathBuf> {
    Ok(config()?.home.join("documents"))
}

/// Get the verified-records registry path ($KEIYAKU_HOME/registry.json)
pub fn registry_path() -> Result<PathBuf> {
    Ok(config()?.home.join("registry.json"))
}

/// Get the resolved intake settings
pub fn ingest_settings() -> Result<IngestSettings> {
    Ok(config()?.ingest.clone())
}

/// Get the resolved extractor backend settings
pub fn extract_settings() -> Result<ExtractSettings> {
    Ok(config()?.extract.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn test_config_file_parsing() {
        let temp = TempDir::new().unwrap();
        let keiyaku_dir = temp.path().join(".keiyaku");
        std::fs::create_dir_all(&keiyaku_dir).unwrap();

        let config_path = keiyaku_dir.join("config.yaml");
        let mut file = std::fs::File::create(&config_path).unwrap();
        writeln!(
            file,
            r#"
version: "1.0"
paths:
  home: ./
ingest:
  max_in_flight: 4
  inbox: ./scans
extract:
  backend_url: http://extractor.internal:9000
  field_timeout_seconds: 10
"#
        )
        .unwrap();

        let config = load_config_file(&config_path).unwrap();
        assert_eq!(config.version, "1.0");
        assert_eq!(config.paths.home, Some("./".to_string()));

        let ingest = config.ingest.unwrap();
        assert_eq!(ingest.max_in_flight, Some(4));
        assert_eq!(ingest.inbox, Some("./scans".to_string()));
        assert_eq!(ingest.max_document_bytes, None);

        let extract = config.extract.unwrap();
        assert_eq!(
            extract.backend_url,
            Some("http://extractor.internal:9000".to_string())
        );
        assert_eq!(extract.field_timeout_seconds, Some(10));
        assert_eq!(extract.recognize_timeout_seconds, None);
    }

    #[test]
    fn test_default_settings() {
        let ingest = IngestSettings::default();
        assert_eq!(ingest.max_document_bytes, 20 * 1024 * 1024);
        assert_eq!(ingest.max_in_flight, 10);
        assert_eq!(ingest.stability_delay_secs, 5);

        let extract = ExtractSettings::default();
        assert_eq!(extract.recognize_timeout_seconds, 120);
        assert_eq!(extract.field_timeout_seconds, 30);
    }

    #[test]
    fn test_resolve_relative_path() {
        let base = PathBuf::from("/home/user/project");

        assert_eq!(
            resolve_path(&base, "./subdir"),
            PathBuf::from("/home/user/project/subdir")
        );
        assert_eq!(
            resolve_path(&base, "/absolute/path"),
            PathBuf::from("/absolute/path")
        );
    }
}
