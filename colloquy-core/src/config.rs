use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{ColloquyError, ColloquyResult};
use crate::models::{ModelBinding, SessionMode};
use crate::storage::resolve_storage_root;
use crate::traces::{DEFAULT_MAX_ENTRIES, DEFAULT_MAX_PERSISTED_TRACES};

const ENV_PREFIX: &str = "COLLOQUY";
const APP_DIR_NAME: &str = "colloquy";

/// Settings as read from files and the environment.
///
/// The top-level keys describe the single-stage binding. In two-stage mode
/// the `plan` and `act` tables override them per stage and inherit whatever
/// they leave unset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColloquyConfig {
    #[serde(default = "default_provider")]
    pub provider: String,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default)]
    pub base_url: Option<String>,

    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,

    #[serde(default = "default_max_turns")]
    pub max_turns: i64,

    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: i64,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_mode")]
    pub mode: String,

    #[serde(default)]
    pub debug_mode: bool,

    #[serde(default)]
    pub plan: StageOverrides,

    #[serde(default)]
    pub act: StageOverrides,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub history: HistoryConfig,

    #[serde(default)]
    pub telemetry: TelemetryConfig,

    #[serde(default)]
    pub orchestration: OrchestrationConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StageOverrides {
    #[serde(default)]
    pub provider: Option<String>,

    #[serde(default)]
    pub model: Option<String>,

    #[serde(default)]
    pub base_url: Option<String>,

    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,

    #[serde(default)]
    pub timeout_seconds: Option<i64>,

    #[serde(default)]
    pub temperature: Option<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub json_format: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// Overrides every other storage location when set.
    #[serde(default)]
    pub storage_dir: Option<PathBuf>,

    /// Tag stamped on saved conversations.
    #[serde(default)]
    pub workspace: Option<String>,

    #[serde(default)]
    pub include_trace: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    #[serde(default = "default_max_trace_entries")]
    pub max_trace_entries: usize,

    #[serde(default = "default_max_persisted_traces")]
    pub max_persisted_traces: usize,

    #[serde(default = "default_true")]
    pub persist: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestrationConfig {
    #[serde(default = "default_true")]
    pub fallback_enabled: bool,
}

fn default_provider() -> String {
    "mock".to_string()
}

fn default_model() -> String {
    "echo".to_string()
}

fn default_max_turns() -> i64 {
    50
}

fn default_timeout_seconds() -> i64 {
    60
}

fn default_temperature() -> f32 {
    0.7
}

fn default_mode() -> String {
    SessionMode::Single.to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_trace_entries() -> usize {
    DEFAULT_MAX_ENTRIES
}

fn default_max_persisted_traces() -> usize {
    DEFAULT_MAX_PERSISTED_TRACES
}

fn default_true() -> bool {
    true
}

impl Default for ColloquyConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            base_url: None,
            api_key: None,
            max_turns: default_max_turns(),
            timeout_seconds: default_timeout_seconds(),
            temperature: default_temperature(),
            mode: default_mode(),
            debug_mode: false,
            plan: StageOverrides::default(),
            act: StageOverrides::default(),
            logging: LoggingConfig::default(),
            history: HistoryConfig::default(),
            telemetry: TelemetryConfig::default(),
            orchestration: OrchestrationConfig::default(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json_format: false,
        }
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            max_trace_entries: default_max_trace_entries(),
            max_persisted_traces: default_max_persisted_traces(),
            persist: true,
        }
    }
}

impl Default for OrchestrationConfig {
    fn default() -> Self {
        Self {
            fallback_enabled: true,
        }
    }
}

/// Everything one gateway call needs to know about its stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageConfig {
    pub provider: String,
    pub model: String,
    pub base_url: Option<String>,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub timeout_seconds: u64,
    pub temperature: f32,
}

impl StageConfig {
    pub fn new(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
            base_url: None,
            api_key: None,
            timeout_seconds: default_timeout_seconds() as u64,
            temperature: default_temperature(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_timeout(mut self, timeout_seconds: u64) -> Self {
        self.timeout_seconds = timeout_seconds;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }
}

/// Stage layout of a session, discriminated by `mode`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum StageMode {
    Single(StageConfig),
    TwoStage { plan: StageConfig, act: StageConfig },
}

/// Resolved configuration handed to the coordinator when a session opens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    pub stages: StageMode,
    pub max_turns: u32,
    pub debug_mode: bool,
}

impl SessionConfig {
    pub fn single(stage: StageConfig) -> Self {
        Self {
            stages: StageMode::Single(stage),
            max_turns: default_max_turns() as u32,
            debug_mode: false,
        }
    }

    pub fn two_stage(plan: StageConfig, act: StageConfig) -> Self {
        Self {
            stages: StageMode::TwoStage { plan, act },
            max_turns: default_max_turns() as u32,
            debug_mode: false,
        }
    }

    pub fn with_max_turns(mut self, max_turns: u32) -> Self {
        self.max_turns = max_turns;
        self
    }

    pub fn mode(&self) -> SessionMode {
        match self.stages {
            StageMode::Single(_) => SessionMode::Single,
            StageMode::TwoStage { .. } => SessionMode::TwoStage,
        }
    }

    pub fn binding(&self) -> ModelBinding {
        match &self.stages {
            StageMode::Single(stage) => ModelBinding::Single {
                provider: stage.provider.clone(),
                model: stage.model.clone(),
            },
            StageMode::TwoStage { plan, act } => ModelBinding::TwoStage {
                plan_provider: plan.provider.clone(),
                plan_model: plan.model.clone(),
                act_provider: act.provider.clone(),
                act_model: act.model.clone(),
            },
        }
    }

    /// The stage that produces the user-visible answer.
    pub fn answer_stage(&self) -> &StageConfig {
        match &self.stages {
            StageMode::Single(stage) => stage,
            StageMode::TwoStage { act, .. } => act,
        }
    }
}

impl ColloquyConfig {
    pub fn load() -> ColloquyResult<Self> {
        Self::load_from_paths(get_config_paths())
    }

    pub fn load_from_paths(paths: Vec<PathBuf>) -> ColloquyResult<Self> {
        load_dotenv_files();

        let mut builder = ConfigBuilder::builder();

        for path in paths {
            if path.exists() {
                builder = builder.add_source(File::from(path).required(false));
            }
        }

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: ColloquyConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML document on its own, without files or environment.
    pub fn from_toml_str(toml: &str) -> ColloquyResult<Self> {
        let config: ColloquyConfig = ConfigBuilder::builder()
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ColloquyResult<()> {
        if self.max_turns <= 0 {
            return Err(ColloquyError::validation(format!(
                "max_turns must be positive, got {}",
                self.max_turns
            )));
        }

        for (key, timeout) in [
            ("timeout_seconds", Some(self.timeout_seconds)),
            ("plan.timeout_seconds", self.plan.timeout_seconds),
            ("act.timeout_seconds", self.act.timeout_seconds),
        ] {
            if let Some(timeout) = timeout {
                if timeout <= 0 {
                    return Err(ColloquyError::validation(format!(
                        "{} must be positive, got {}",
                        key, timeout
                    )));
                }
            }
        }

        self.session_mode()?;

        if self.provider.trim().is_empty() {
            return Err(ColloquyError::validation("provider must not be empty"));
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        let level_lower = self.logging.level.to_lowercase();
        if !valid_levels.contains(&level_lower.as_str()) && !level_lower.contains('=') {
            return Err(ColloquyError::validation(format!(
                "Invalid log level '{}'. Must be one of: {:?}",
                self.logging.level, valid_levels
            )));
        }

        if self.telemetry.max_trace_entries == 0 {
            return Err(ColloquyError::InvalidConfigValue {
                key: "telemetry.max_trace_entries".to_string(),
                message: "Must be greater than 0".to_string(),
            });
        }

        Ok(())
    }

    pub fn session_mode(&self) -> ColloquyResult<SessionMode> {
        self.mode
            .parse::<SessionMode>()
            .map_err(ColloquyError::validation)
    }

    /// Resolve the flat settings into the tagged session configuration.
    pub fn session_config(&self) -> ColloquyResult<SessionConfig> {
        self.validate()?;

        let stages = match self.session_mode()? {
            SessionMode::Single => StageMode::Single(self.stage_config(&StageOverrides::default())),
            SessionMode::TwoStage => StageMode::TwoStage {
                plan: self.stage_config(&self.plan),
                act: self.stage_config(&self.act),
            },
        };

        Ok(SessionConfig {
            stages,
            max_turns: u32::try_from(self.max_turns).unwrap_or(u32::MAX),
            debug_mode: self.debug_mode,
        })
    }

    fn stage_config(&self, overrides: &StageOverrides) -> StageConfig {
        let provider = overrides
            .provider
            .clone()
            .unwrap_or_else(|| self.provider.clone());

        let api_key = overrides
            .api_key
            .clone()
            .or_else(|| {
                // The flat key only belongs to the flat provider.
                if provider == self.provider {
                    self.api_key.clone()
                } else {
                    None
                }
            })
            .or_else(|| provider_api_key_from_env(&provider));

        StageConfig {
            model: overrides.model.clone().unwrap_or_else(|| self.model.clone()),
            base_url: overrides.base_url.clone().or_else(|| self.base_url.clone()),
            api_key,
            timeout_seconds: overrides.timeout_seconds.unwrap_or(self.timeout_seconds).max(1)
                as u64,
            temperature: overrides.temperature.unwrap_or(self.temperature),
            provider,
        }
    }

    /// Directory history and telemetry are stored under.
    pub fn storage_root(&self, workspace_root: Option<&Path>) -> ColloquyResult<PathBuf> {
        resolve_storage_root(self.history.storage_dir.as_deref(), workspace_root)
    }

    pub fn workspace_tag(&self, workspace_root: Option<&Path>) -> String {
        self.history
            .workspace
            .clone()
            .or_else(|| {
                workspace_root
                    .and_then(|p| p.file_name())
                    .map(|n| n.to_string_lossy().into_owned())
            })
            .unwrap_or_default()
    }

    pub fn log_level(&self) -> &str {
        if self.debug_mode {
            "debug"
        } else {
            &self.logging.level
        }
    }
}

fn provider_api_key_from_env(provider: &str) -> Option<String> {
    let var = format!("{}_API_KEY", provider.to_uppercase().replace('-', "_"));
    std::env::var(var).ok().filter(|k| !k.is_empty())
}

fn get_config_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    if let Ok(cwd) = std::env::current_dir() {
        paths.push(cwd.join("config").join("default.toml"));
        paths.push(cwd.join("config").join("local.toml"));
        paths.push(cwd.join("colloquy.toml"));
    }

    if let Some(config_dir) = get_config_dir() {
        paths.push(config_dir.join("config.toml"));
    }

    paths
}

fn load_dotenv_files() {
    let mut paths = Vec::new();

    if let Ok(cwd) = std::env::current_dir() {
        paths.push(cwd.join(".env"));
        paths.push(cwd.join(".env.local"));
    }

    if let Some(config_dir) = get_config_dir() {
        paths.push(config_dir.join(".env"));
    }

    for path in paths {
        if path.exists() {
            let _ = dotenvy::from_path(&path);
        }
    }
}

pub fn get_config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join(APP_DIR_NAME))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ColloquyConfig::default();

        assert_eq!(config.provider, "mock");
        assert_eq!(config.model, "echo");
        assert_eq!(config.max_turns, 50);
        assert_eq!(config.timeout_seconds, 60);
        assert_eq!(config.mode, "single");
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.telemetry.max_trace_entries, 1000);
        assert_eq!(config.telemetry.max_persisted_traces, 50);
        assert!(config.orchestration.fallback_enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_non_positive_limits() {
        let mut config = ColloquyConfig::default();
        config.max_turns = 0;
        assert!(matches!(
            config.validate(),
            Err(ColloquyError::ValidationError(_))
        ));

        let mut config = ColloquyConfig::default();
        config.timeout_seconds = -5;
        assert!(config.validate().is_err());

        let mut config = ColloquyConfig::default();
        config.act.timeout_seconds = Some(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_unknown_mode_and_level() {
        let mut config = ColloquyConfig::default();
        config.mode = "swarm".to_string();
        assert!(config.validate().is_err());

        let mut config = ColloquyConfig::default();
        config.logging.level = "loud".to_string();
        assert!(config.validate().is_err());

        let mut config = ColloquyConfig::default();
        config.logging.level = "colloquy_core=trace".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_single_session_config() {
        let mut config = ColloquyConfig::default();
        config.provider = "openai".to_string();
        config.model = "gpt-4".to_string();
        config.api_key = Some("sk-test".to_string());
        config.timeout_seconds = 15;

        let session = config.session_config().unwrap();
        assert_eq!(session.mode(), SessionMode::Single);
        assert_eq!(session.max_turns, 50);

        match session.stages {
            StageMode::Single(stage) => {
                assert_eq!(stage.provider, "openai");
                assert_eq!(stage.model, "gpt-4");
                assert_eq!(stage.api_key.as_deref(), Some("sk-test"));
                assert_eq!(stage.timeout_seconds, 15);
            }
            other => panic!("expected single stage, got {:?}", other),
        }
    }

    #[test]
    fn test_two_stage_inherits_flat_keys() {
        let config = ColloquyConfig::from_toml_str(
            r#"
            provider = "openai"
            model = "gpt-4o"
            timeout_seconds = 20
            mode = "two_stage"

            [plan]
            provider = "anthropic"
            model = "claude-3-opus-20240229"
            timeout_seconds = 90

            [act]
            temperature = 0.1
            "#,
        )
        .unwrap();

        let session = config.session_config().unwrap();
        let StageMode::TwoStage { plan, act } = session.stages else {
            panic!("expected two-stage config");
        };

        assert_eq!(plan.provider, "anthropic");
        assert_eq!(plan.timeout_seconds, 90);
        assert_eq!(act.provider, "openai");
        assert_eq!(act.model, "gpt-4o");
        assert_eq!(act.timeout_seconds, 20);
        assert!((act.temperature - 0.1).abs() < f32::EPSILON);
    }

    #[test]
    fn test_binding_from_session_config() {
        let session = SessionConfig::two_stage(
            StageConfig::new("anthropic", "claude-3-opus-20240229"),
            StageConfig::new("openai", "gpt-4"),
        );
        assert_eq!(session.binding().label().0, "anthropic+openai");
        assert_eq!(session.answer_stage().provider, "openai");
    }

    #[test]
    fn test_toml_sections() {
        let config = ColloquyConfig::from_toml_str(
            r#"
            [history]
            storage_dir = "/tmp/colloquy-test"
            workspace = "demo"

            [orchestration]
            fallback_enabled = false
            "#,
        )
        .unwrap();

        assert_eq!(
            config.storage_root(None).unwrap(),
            PathBuf::from("/tmp/colloquy-test")
        );
        assert_eq!(config.workspace_tag(None), "demo");
        assert!(!config.orchestration.fallback_enabled);
    }

    #[test]
    fn test_invalid_toml_value_is_rejected() {
        let result = ColloquyConfig::from_toml_str("max_turns = -1");
        assert!(result.is_err());
    }
}
