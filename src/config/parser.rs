//! Configuration parser for loading configuration files.
//!
//! This module handles loading configuration from YAML files and environment
//! variables, with proper precedence and error handling. Precedence, lowest
//! first: built-in defaults, the global file, the project file, `TFPILOT_*`
//! environment variables.

use crate::error::{ConfigError, Result, TfPilotError};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::model::PilotConfig;

/// Default configuration file names to search for.
pub const DEFAULT_CONFIG_FILES: &[&str] = &["tfpilot.yaml", "tfpilot.yml", ".tfpilot.yaml"];

/// Environment variable overriding `tool.binary`.
pub const ENV_BINARY: &str = "TFPILOT_BINARY";
/// Environment variable overriding `tool.plan_file`.
pub const ENV_PLAN_FILE: &str = "TFPILOT_PLAN_FILE";
/// Environment variable overriding `tool.grace_period_secs`.
pub const ENV_GRACE_PERIOD: &str = "TFPILOT_GRACE_PERIOD_SECS";

/// Configuration parser for loading pilot configuration.
#[derive(Debug, Default)]
pub struct ConfigParser {
    /// Base path for resolving relative paths.
    base_path: Option<PathBuf>,
}

impl ConfigParser {
    /// Creates a new configuration parser.
    #[must_use]
    pub const fn new() -> Self {
        Self { base_path: None }
    }

    /// Sets the base path used to search for files and `.env`.
    #[must_use]
    pub fn with_base_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.base_path = Some(path.into());
        self
    }

    fn base(&self) -> PathBuf {
        self.base_path
            .clone()
            .unwrap_or_else(|| PathBuf::from("."))
    }

    /// Loads configuration from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<PilotConfig> {
        let document = Self::read_document(path.as_ref())?;
        Self::from_document(document, Some(path.as_ref()))
    }

    /// Parses configuration from a YAML string. Empty input yields defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML is invalid.
    pub fn parse_yaml(&self, content: &str, source: Option<&Path>) -> Result<PilotConfig> {
        debug!("Parsing YAML configuration");
        let document = Self::parse_document(content, source)?;
        Self::from_document(document, source)
    }

    /// Resolves and loads the effective configuration.
    ///
    /// The global file is read first. The explicit path, which must exist,
    /// or else the project file searched upward from the base path is merged
    /// over it. Environment overrides are applied last.
    ///
    /// # Errors
    ///
    /// Returns an error if a found file cannot be parsed or an override is
    /// malformed.
    pub fn load(&self, explicit: Option<&Path>) -> Result<PilotConfig> {
        let global = global_config_path().filter(|p| p.is_file());
        let mut config = self.load_layered(global.as_deref(), explicit)?;
        Self::apply_env_overrides(&mut config, |key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Merges the global file and the project (or explicit) file over the
    /// defaults. Mappings merge key by key; any other value replaces the
    /// lower layer's.
    ///
    /// # Errors
    ///
    /// Returns an error if the explicit file is missing or a file cannot be
    /// parsed.
    pub fn load_layered(
        &self,
        global: Option<&Path>,
        explicit: Option<&Path>,
    ) -> Result<PilotConfig> {
        let project = match explicit {
            Some(path) => Some(path.to_path_buf()),
            None => find_config_file(absolute(&self.base())),
        };

        let mut merged = serde_yaml::Value::Null;
        let mut last_source = None;
        for path in global.into_iter().chain(project.as_deref()) {
            merge_documents(&mut merged, Self::read_document(path)?);
            last_source = Some(path);
        }

        if last_source.is_none() {
            debug!("No configuration file found, using defaults");
        }
        Self::from_document(merged, last_source)
    }

    fn read_document(path: &Path) -> Result<serde_yaml::Value> {
        info!("Loading configuration from: {}", path.display());

        if !path.exists() {
            return Err(TfPilotError::Config(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            }));
        }

        let content = std::fs::read_to_string(path).map_err(|e| {
            TfPilotError::Config(ConfigError::ParseError {
                message: format!("Failed to read file: {e}"),
                location: Some(path.display().to_string()),
            })
        })?;

        Self::parse_document(&content, Some(path))
    }

    fn parse_document(content: &str, source: Option<&Path>) -> Result<serde_yaml::Value> {
        if content.trim().is_empty() {
            return Ok(serde_yaml::Value::Null);
        }
        serde_yaml::from_str(content).map_err(|e| yaml_error(&e, source))
    }

    fn from_document(document: serde_yaml::Value, source: Option<&Path>) -> Result<PilotConfig> {
        if document.is_null() {
            return Ok(PilotConfig::default());
        }
        let config: PilotConfig =
            serde_yaml::from_value(document).map_err(|e| yaml_error(&e, source))?;
        debug!("Parsed configuration for tool: {}", config.tool.binary);
        Ok(config)
    }

    /// Applies `TFPILOT_*` overrides read through `lookup`.
    ///
    /// # Errors
    ///
    /// Returns an error if the grace period override is not an integer.
    pub fn apply_env_overrides<F>(config: &mut PilotConfig, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(binary) = lookup(ENV_BINARY) {
            debug!("Overriding tool.binary from environment");
            config.tool.binary = binary;
        }

        if let Some(plan_file) = lookup(ENV_PLAN_FILE) {
            debug!("Overriding tool.plan_file from environment");
            config.tool.plan_file = plan_file;
        }

        if let Some(grace) = lookup(ENV_GRACE_PERIOD) {
            debug!("Overriding tool.grace_period_secs from environment");
            config.tool.grace_period_secs = grace.trim().parse().map_err(|e| {
                TfPilotError::Config(ConfigError::ParseError {
                    message: format!("{ENV_GRACE_PERIOD} must be a whole number of seconds: {e}"),
                    location: Some(ENV_GRACE_PERIOD.to_string()),
                })
            })?;
        }

        Ok(())
    }

    /// Loads the .env file if present.
    ///
    /// # Errors
    ///
    /// Returns an error if the .env file exists but cannot be loaded.
    pub fn load_dotenv(&self) -> Result<()> {
        let env_path = self.base().join(".env");

        if env_path.exists() {
            info!("Loading environment from: {}", env_path.display());
            dotenvy::from_path(&env_path).map_err(|e| {
                TfPilotError::Config(ConfigError::ParseError {
                    message: format!("Failed to load .env file: {e}"),
                    location: Some(env_path.display().to_string()),
                })
            })?;
        } else {
            debug!(".env file not found at: {}", env_path.display());
        }

        Ok(())
    }
}

/// Finds the configuration file in the given directory or its parents.
#[must_use]
pub fn find_config_file(start_dir: impl AsRef<Path>) -> Option<PathBuf> {
    let mut current = start_dir.as_ref().to_path_buf();

    loop {
        for filename in DEFAULT_CONFIG_FILES {
            let config_path = current.join(filename);
            if config_path.is_file() {
                info!("Found configuration file: {}", config_path.display());
                return Some(config_path);
            }
        }

        if !current.pop() {
            return None;
        }
    }
}

/// Lists `*.tfvars` and `*.tfvars.json` files directly inside `workdir`,
/// sorted by file name. Returned paths are relative to `workdir`.
///
/// # Errors
///
/// Returns an error if the directory cannot be read.
pub fn discover_var_files(workdir: impl AsRef<Path>) -> Result<Vec<PathBuf>> {
    let mut found: Vec<PathBuf> = std::fs::read_dir(workdir.as_ref())?
        .filter_map(std::result::Result::ok)
        .filter(|entry| entry.path().is_file())
        .map(|entry| PathBuf::from(entry.file_name()))
        .filter(|name| {
            let name = name.to_string_lossy();
            name.ends_with(".tfvars") || name.ends_with(".tfvars.json")
        })
        .collect();
    found.sort();
    debug!("Discovered {} variable files", found.len());
    Ok(found)
}

/// Merges `overlay` into `base`. Nulls in the overlay leave `base` as is.
fn merge_documents(base: &mut serde_yaml::Value, overlay: serde_yaml::Value) {
    match (base, overlay) {
        (serde_yaml::Value::Mapping(base), serde_yaml::Value::Mapping(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(existing) => merge_documents(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (_, serde_yaml::Value::Null) => {}
        (base, overlay) => *base = overlay,
    }
}

fn yaml_error(error: &serde_yaml::Error, source: Option<&Path>) -> TfPilotError {
    TfPilotError::Config(ConfigError::ParseError {
        message: format!("YAML parse error: {error}"),
        location: source.map(|p| p.display().to_string()),
    })
}

fn absolute(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

/// Location of the per-user configuration file.
#[must_use]
pub fn global_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("tfpilot").join("config.yaml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[test]
    fn test_parse_full_config() {
        let yaml = r#"
tool:
  binary: tofu
  plan_file: review.plan
  grace_period_secs: 10
  channel_capacity: 64
  env:
    TF_LOG: "WARN"
var_files:
  - prod.tfvars
"#;
        let config = ConfigParser::new().parse_yaml(yaml, None).unwrap();
        assert_eq!(config.tool.binary, "tofu");
        assert_eq!(config.tool.plan_file, "review.plan");
        assert_eq!(config.tool.grace_period_secs, 10);
        assert_eq!(config.tool.env["TF_LOG"], "WARN");
        assert_eq!(config.var_files, vec![PathBuf::from("prod.tfvars")]);
    }

    #[test]
    fn test_empty_file_is_default() {
        let config = ConfigParser::new().parse_yaml("  \n", None).unwrap();
        assert_eq!(config, PilotConfig::default());
    }

    #[test]
    fn test_invalid_yaml() {
        let err = ConfigParser::new().parse_yaml("tool: [", None).unwrap_err();
        assert!(matches!(err, TfPilotError::Config(ConfigError::ParseError { .. })));
    }

    #[test]
    fn test_find_config_file_upward() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("envs").join("prod");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(dir.path().join("tfpilot.yml"), "tool:\n  binary: tofu\n").unwrap();

        let found = find_config_file(&nested).unwrap();
        assert_eq!(found, dir.path().join("tfpilot.yml"));

        let config = ConfigParser::new()
            .with_base_path(&nested)
            .load_file(found)
            .unwrap();
        assert_eq!(config.tool.binary, "tofu");
    }

    #[test]
    fn test_project_file_merges_over_global() {
        let home = TempDir::new().unwrap();
        let global = home.path().join("config.yaml");
        std::fs::write(
            &global,
            "tool:\n  binary: tofu\n  grace_period_secs: 20\n  env:\n    TF_LOG: WARN\n",
        )
        .unwrap();

        let project = TempDir::new().unwrap();
        std::fs::write(
            project.path().join("tfpilot.yaml"),
            "tool:\n  plan_file: review.plan\n  env:\n    TF_INPUT: \"0\"\nvar_files: [prod.tfvars]\n",
        )
        .unwrap();

        let config = ConfigParser::new()
            .with_base_path(project.path())
            .load_layered(Some(global.as_path()), None)
            .unwrap();
        assert_eq!(config.tool.binary, "tofu");
        assert_eq!(config.tool.grace_period_secs, 20);
        assert_eq!(config.tool.plan_file, "review.plan");
        assert_eq!(config.tool.env["TF_LOG"], "WARN");
        assert_eq!(config.tool.env["TF_INPUT"], "0");
        assert_eq!(config.var_files, vec![PathBuf::from("prod.tfvars")]);
        assert_eq!(config.tool.channel_capacity, PilotConfig::default().tool.channel_capacity);
    }

    #[test]
    fn test_global_file_alone() {
        let home = TempDir::new().unwrap();
        let global = home.path().join("config.yaml");
        std::fs::write(&global, "tool:\n  binary: tofu\n").unwrap();
        let empty = TempDir::new().unwrap();
        let parser = ConfigParser::new().with_base_path(empty.path());

        let config = parser.load_layered(Some(global.as_path()), None).unwrap();
        assert_eq!(config.tool.binary, "tofu");
        assert_eq!(config.tool.plan_file, PilotConfig::default().tool.plan_file);
    }

    #[test]
    fn test_explicit_file_replaces_project_search() {
        let home = TempDir::new().unwrap();
        let global = home.path().join("config.yaml");
        std::fs::write(&global, "tool:\n  binary: tofu\n").unwrap();
        let project = TempDir::new().unwrap();
        std::fs::write(project.path().join("tfpilot.yaml"), "tool:\n  binary: terraform\n")
            .unwrap();
        let explicit = home.path().join("ci.yaml");
        std::fs::write(&explicit, "tool:\n  plan_file: ci.plan\n").unwrap();

        let config = ConfigParser::new()
            .with_base_path(project.path())
            .load_layered(Some(global.as_path()), Some(explicit.as_path()))
            .unwrap();
        assert_eq!(config.tool.binary, "tofu");
        assert_eq!(config.tool.plan_file, "ci.plan");
    }

    #[test]
    fn test_missing_explicit_file() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("absent.yaml");
        let err = ConfigParser::new().load(Some(missing.as_path())).unwrap_err();
        assert!(matches!(err, TfPilotError::Config(ConfigError::FileNotFound { .. })));
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            (ENV_BINARY, "/opt/bin/tofu"),
            (ENV_PLAN_FILE, "x.plan"),
            (ENV_GRACE_PERIOD, "12"),
        ]
        .into_iter()
        .collect();

        let mut config = PilotConfig::default();
        ConfigParser::apply_env_overrides(&mut config, |k| vars.get(k).map(ToString::to_string))
            .unwrap();
        assert_eq!(config.tool.binary, "/opt/bin/tofu");
        assert_eq!(config.tool.plan_file, "x.plan");
        assert_eq!(config.tool.grace_period_secs, 12);

        let result = ConfigParser::apply_env_overrides(&mut config, |k| {
            (k == ENV_GRACE_PERIOD).then(|| "soon".to_string())
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_discover_var_files() {
        let dir = TempDir::new().unwrap();
        for name in ["b.tfvars", "a.tfvars.json", "main.tf", "notes.txt"] {
            std::fs::write(dir.path().join(name), "").unwrap();
        }
        std::fs::create_dir(dir.path().join("dir.tfvars")).unwrap();

        let found = discover_var_files(dir.path()).unwrap();
        assert_eq!(
            found,
            vec![PathBuf::from("a.tfvars.json"), PathBuf::from("b.tfvars")]
        );
    }

    #[test]
    fn test_load_dotenv_missing_is_ok() {
        let dir = TempDir::new().unwrap();
        assert!(ConfigParser::new().with_base_path(dir.path()).load_dotenv().is_ok());
    }
}
