use crate::ast::PrintStyle;
use crate::mutator::{BindingRemoval, ALL_MUTATORS};
use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Name of the per-project configuration file.
pub const CONFIG_FILE_NAME: &str = "infest.toml";

/// Run-fatal configuration problems, reported before anything is scheduled.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("no mutators are enabled")]
    NoMutators,

    #[error("unknown mutator '{0}'")]
    UnknownMutator(String),

    #[error("run.concurrency must not exceed {max}, got {got}")]
    TooManyWorkers { max: usize, got: usize },

    #[error("run.timeout_seconds must be greater than zero")]
    ZeroTimeout,

    #[error("adapter.command is empty")]
    EmptyCommand,

    #[error("invalid pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("scoring.{name} must be between 0 and 100, got {value}")]
    ThresholdOutOfRange { name: &'static str, value: f64 },
}

/// Engine configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// General settings
    #[serde(default)]
    pub general: GeneralConfig,

    /// Scheduler settings
    #[serde(default)]
    pub run: RunConfig,

    /// External test runner
    #[serde(default)]
    pub adapter: AdapterConfig,

    /// Which operators run, and how
    #[serde(default)]
    pub mutators: MutatorsConfig,

    /// How outcomes turn into a score
    #[serde(default)]
    pub scoring: ScoringConfig,

    /// Surface syntax used when printing replacement code
    #[serde(default)]
    pub printer: PrintStyle,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Parallel execution slots; 0 means one per CPU
    #[serde(default)]
    pub concurrency: usize,

    /// Per-mutant timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,

    /// Mutants generated ahead of the workers
    #[serde(default = "default_lookahead")]
    pub lookahead: usize,

    /// Skip mutants no test covers instead of running the full suite
    #[serde(default)]
    pub only_covered: bool,

    /// Run the suite against the unmodified source before any mutant
    #[serde(default = "default_baseline")]
    pub baseline: bool,

    /// Where per-mutant workspaces are created (system temp dir if unset)
    #[serde(default)]
    pub tmp_dir: Option<PathBuf>,

    /// Project tree copied into every workspace (only the patched file is
    /// written when unset)
    #[serde(default)]
    pub project_root: Option<PathBuf>,

    /// Maximum captured test output per mutant (bytes)
    #[serde(default = "default_max_output_bytes")]
    pub max_output_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdapterConfig {
    /// Shell command running the tests. `{artifact}`, `{tests}` and
    /// `{workspace}` are substituted.
    #[serde(default = "default_command")]
    pub command: String,

    /// Output fragments meaning the mutant could not even run
    #[serde(default)]
    pub error_patterns: Vec<String>,

    /// Regex whose first capture group names a failing test
    #[serde(default = "default_failing_test_pattern")]
    pub failing_test_pattern: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MutatorsConfig {
    /// Operator names to run
    #[serde(default = "default_enabled_mutators")]
    pub enabled: Vec<String>,

    /// Chain removal settings
    #[serde(default)]
    pub chain: ChainConfig,

    /// Per operator, `Class::method` globs where it must not run
    #[serde(default)]
    pub ignore: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    /// Calls that may be removed from a chain
    #[serde(default = "default_chain_methods")]
    pub methods: Vec<String>,

    /// Calls whose first string argument may introduce `:name` placeholders
    #[serde(default = "default_filter_methods")]
    pub filter_methods: Vec<String>,

    /// Calls binding a placeholder by name
    #[serde(default = "default_binder_methods")]
    pub binder_methods: Vec<String>,

    /// Enclosing class name fragments where the operator applies; empty means
    /// everywhere
    #[serde(default = "default_chain_scope")]
    pub scope: Vec<String>,

    /// Which duplicate bindings of a removed placeholder go
    #[serde(default)]
    pub bindings: BindingRemoval,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringConfig {
    /// Count timed out mutants as detected
    #[serde(default = "default_true")]
    pub timed_out_detected: bool,

    /// Count errored mutants as detected
    #[serde(default)]
    pub errored_detected: bool,

    /// Keep uncovered mutants in the MSI denominator
    #[serde(default)]
    pub include_not_covered: bool,

    /// Minimum MSI (percent) for the run to pass
    #[serde(default)]
    pub min_msi: Option<f64>,

    /// Minimum covered-code MSI (percent) for the run to pass
    #[serde(default)]
    pub min_covered_msi: Option<f64>,

    /// Pass the thresholds when no mutant was generated
    #[serde(default)]
    pub ignore_msi_with_no_mutations: bool,
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_timeout() -> u64 {
    10
}

fn default_lookahead() -> usize {
    16
}

fn default_baseline() -> bool {
    true
}

fn default_true() -> bool {
    true
}

fn default_max_output_bytes() -> usize {
    10000
}

fn default_command() -> String {
    "vendor/bin/phpunit {tests}".to_string()
}

fn default_failing_test_pattern() -> String {
    r"^\d+\) (\S+)".to_string()
}

fn default_enabled_mutators() -> Vec<String> {
    ALL_MUTATORS.iter().map(|s| s.to_string()).collect()
}

fn default_chain_methods() -> Vec<String> {
    ["andWhere", "where", "orWhere", "orderBy", "setMaxResults"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_filter_methods() -> Vec<String> {
    ["where", "andWhere", "orWhere"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_binder_methods() -> Vec<String> {
    vec!["setParameter".to_string()]
}

fn default_chain_scope() -> Vec<String> {
    vec!["Test".to_string(), "Repository".to_string()]
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            concurrency: 0,
            timeout_seconds: default_timeout(),
            lookahead: default_lookahead(),
            only_covered: false,
            baseline: default_baseline(),
            tmp_dir: None,
            project_root: None,
            max_output_bytes: default_max_output_bytes(),
        }
    }
}

impl RunConfig {
    /// Effective number of workers.
    pub fn workers(&self) -> usize {
        if self.concurrency == 0 {
            num_cpus::get().max(1)
        } else {
            self.concurrency
        }
    }

    /// Directory per-mutant workspaces are created in.
    pub fn workspace_root(&self) -> PathBuf {
        self.tmp_dir.clone().unwrap_or_else(std::env::temp_dir)
    }
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            command: default_command(),
            error_patterns: Vec::new(),
            failing_test_pattern: default_failing_test_pattern(),
        }
    }
}

impl Default for MutatorsConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled_mutators(),
            chain: ChainConfig::default(),
            ignore: BTreeMap::new(),
        }
    }
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            methods: default_chain_methods(),
            filter_methods: default_filter_methods(),
            binder_methods: default_binder_methods(),
            scope: default_chain_scope(),
            bindings: BindingRemoval::default(),
        }
    }
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            timed_out_detected: true,
            errored_detected: false,
            include_not_covered: false,
            min_msi: None,
            min_covered_msi: None,
            ignore_msi_with_no_mutations: false,
        }
    }
}

/// Upper bound on `run.concurrency`.
const MAX_WORKERS: usize = 256;

impl Config {
    /// Load configuration from file, or fall back to defaults.
    ///
    /// Lookup order: the explicit path, `./infest.toml`, the platform config
    /// directory.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = match path {
            Some(path) => Some(path.to_path_buf()),
            None => {
                let local = PathBuf::from(CONFIG_FILE_NAME);
                if local.exists() {
                    Some(local)
                } else {
                    Self::default_config_path()
                }
            }
        };

        let config = match config_path {
            Some(ref path) if path.exists() => {
                let contents = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config from {:?}", path))?;
                toml::from_str(&contents)
                    .with_context(|| format!("Failed to parse config from {:?}", path))?
            }
            _ => Config::default(),
        };

        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
            }
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, contents)
            .with_context(|| format!("Failed to write config to {:?}", path))?;

        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_config_path() -> Option<PathBuf> {
        ProjectDirs::from("com", "infest", "infest")
            .map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
    }

    /// Check everything that would otherwise fail halfway through a run.
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.mutators.enabled.is_empty() {
            return Err(ConfigError::NoMutators);
        }
        for name in self.mutators.enabled.iter().chain(self.mutators.ignore.keys()) {
            if !ALL_MUTATORS.contains(&name.as_str()) {
                return Err(ConfigError::UnknownMutator(name.clone()));
            }
        }
        if self.run.concurrency > MAX_WORKERS {
            return Err(ConfigError::TooManyWorkers {
                max: MAX_WORKERS,
                got: self.run.concurrency,
            });
        }
        if self.run.timeout_seconds == 0 {
            return Err(ConfigError::ZeroTimeout);
        }
        if self.adapter.command.trim().is_empty() {
            return Err(ConfigError::EmptyCommand);
        }
        regex::Regex::new(&self.adapter.failing_test_pattern).map_err(|source| {
            ConfigError::InvalidPattern {
                pattern: self.adapter.failing_test_pattern.clone(),
                source,
            }
        })?;
        for (name, value) in [
            ("min_msi", self.scoring.min_msi),
            ("min_covered_msi", self.scoring.min_covered_msi),
        ] {
            if let Some(value) = value {
                if !(0.0..=100.0).contains(&value) {
                    return Err(ConfigError::ThresholdOutOfRange { name, value });
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // =========================================================================
    // Default value tests
    // =========================================================================

    #[test]
    fn test_default_run_config() {
        let config = RunConfig::default();
        assert_eq!(config.concurrency, 0);
        assert_eq!(config.timeout_seconds, 10);
        assert_eq!(config.lookahead, 16);
        assert!(!config.only_covered);
        assert!(config.baseline);
        assert!(config.workers() >= 1);
    }

    #[test]
    fn test_default_chain_config() {
        let config = ChainConfig::default();
        assert_eq!(
            config.methods,
            vec!["andWhere", "where", "orWhere", "orderBy", "setMaxResults"]
        );
        assert_eq!(config.binder_methods, vec!["setParameter"]);
        assert_eq!(config.scope, vec!["Test", "Repository"]);
        assert_eq!(config.bindings, BindingRemoval::First);
    }

    #[test]
    fn test_default_enables_every_mutator() {
        let config = MutatorsConfig::default();
        assert_eq!(config.enabled.len(), ALL_MUTATORS.len());
    }

    #[test]
    fn test_default_scoring_config() {
        let config = ScoringConfig::default();
        assert!(config.timed_out_detected);
        assert!(!config.errored_detected);
        assert!(!config.include_not_covered);
        assert_eq!(config.min_msi, None);
    }

    #[test]
    fn test_explicit_concurrency_wins() {
        let config = RunConfig {
            concurrency: 3,
            ..RunConfig::default()
        };
        assert_eq!(config.workers(), 3);
    }

    // =========================================================================
    // Config parsing tests
    // =========================================================================

    #[test]
    fn test_empty_config() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.general.log_level, "info");
        assert_eq!(config.run.timeout_seconds, 10);
        assert_eq!(config.printer.member_access, "->");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_full_config() {
        let toml = r#"
[general]
log_level = "debug"

[run]
concurrency = 4
timeout_seconds = 30
only_covered = true
baseline = false

[adapter]
command = "cargo test -- {tests}"
error_patterns = ["error[E"]

[mutators]
enabled = ["Multiplication", "ChainCallRemoval"]

[mutators.chain]
methods = ["where", "setParameter"]
scope = []
bindings = "all"

[mutators.ignore]
Multiplication = ["Legacy::*"]

[scoring]
timed_out_detected = false
min_msi = 80.0

[printer]
member_access = "."
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.general.log_level, "debug");
        assert_eq!(config.run.concurrency, 4);
        assert!(config.run.only_covered);
        assert!(!config.run.baseline);
        assert_eq!(config.adapter.error_patterns, vec!["error[E"]);
        assert_eq!(config.mutators.enabled, vec!["Multiplication", "ChainCallRemoval"]);
        assert_eq!(config.mutators.chain.methods, vec!["where", "setParameter"]);
        assert!(config.mutators.chain.scope.is_empty());
        assert_eq!(config.mutators.chain.bindings, BindingRemoval::All);
        // unspecified chain fields keep their defaults
        assert_eq!(config.mutators.chain.filter_methods.len(), 3);
        assert_eq!(config.mutators.ignore["Multiplication"], vec!["Legacy::*"]);
        assert!(!config.scoring.timed_out_detected);
        assert_eq!(config.scoring.min_msi, Some(80.0));
        assert_eq!(config.printer.member_access, ".");
        assert_eq!(config.printer.static_access, "::");
        assert!(config.validate().is_ok());
    }

    // =========================================================================
    // Validation tests
    // =========================================================================

    #[test]
    fn test_validate_no_mutators() {
        let mut config = Config::default();
        config.mutators.enabled.clear();
        assert!(matches!(config.validate(), Err(ConfigError::NoMutators)));
    }

    #[test]
    fn test_validate_unknown_mutator() {
        let mut config = Config::default();
        config.mutators.enabled = vec!["Bogus".to_string()];
        assert!(matches!(
            config.validate(),
            Err(ConfigError::UnknownMutator(ref name)) if name == "Bogus"
        ));
    }

    #[test]
    fn test_validate_unknown_ignored_mutator() {
        let mut config = Config::default();
        config
            .mutators
            .ignore
            .insert("Bogus".to_string(), vec!["*".to_string()]);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::UnknownMutator(_))
        ));
    }

    #[test]
    fn test_validate_zero_timeout() {
        let mut config = Config::default();
        config.run.timeout_seconds = 0;
        assert!(matches!(config.validate(), Err(ConfigError::ZeroTimeout)));
    }

    #[test]
    fn test_validate_too_many_workers() {
        let mut config = Config::default();
        config.run.concurrency = 10_000;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::TooManyWorkers { .. })
        ));
    }

    #[test]
    fn test_validate_empty_command() {
        let mut config = Config::default();
        config.adapter.command = "   ".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::EmptyCommand)));
    }

    #[test]
    fn test_validate_bad_failing_test_pattern() {
        let mut config = Config::default();
        config.adapter.failing_test_pattern = "(unclosed".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidPattern { .. })
        ));
    }

    #[test]
    fn test_validate_threshold_range() {
        let mut config = Config::default();
        config.scoring.min_covered_msi = Some(120.0);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ThresholdOutOfRange {
                name: "min_covered_msi",
                ..
            })
        ));
    }

    // =========================================================================
    // File I/O tests
    // =========================================================================

    #[test]
    fn test_config_load_nonexistent() {
        let temp_file = tempfile::NamedTempFile::new().unwrap();
        std::fs::remove_file(temp_file.path()).unwrap();

        let config = Config::load(Some(temp_file.path())).unwrap();
        assert_eq!(config.run.timeout_seconds, 10);
    }

    #[test]
    fn test_config_load_valid_file() {
        let temp_file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(
            temp_file.path(),
            "[run]\ntimeout_seconds = 42\n\n[mutators]\nenabled = [\"Plus\"]\n",
        )
        .unwrap();

        let config = Config::load(Some(temp_file.path())).unwrap();
        assert_eq!(config.run.timeout_seconds, 42);
        assert_eq!(config.mutators.enabled, vec!["Plus"]);
    }

    #[test]
    fn test_config_load_invalid_toml() {
        let temp_file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(temp_file.path(), "invalid {{{{ toml").unwrap();

        assert!(Config::load(Some(temp_file.path())).is_err());
    }

    #[test]
    fn test_config_save_and_reload() {
        let temp_dir = tempfile::tempdir().unwrap();
        let config_path = temp_dir.path().join("subdir").join(CONFIG_FILE_NAME);

        let mut config = Config::default();
        config.run.concurrency = 2;
        config.mutators.chain.bindings = BindingRemoval::All;
        config.save(&config_path).unwrap();

        let reloaded = Config::load(Some(&config_path)).unwrap();
        assert_eq!(reloaded.run.concurrency, 2);
        assert_eq!(reloaded.mutators.chain.bindings, BindingRemoval::All);
    }

    #[test]
    fn test_default_config_path() {
        let path = Config::default_config_path();
        assert!(path.is_some());
        assert!(path.unwrap().ends_with(CONFIG_FILE_NAME));
    }
}
