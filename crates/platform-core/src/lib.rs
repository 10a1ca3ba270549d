use serde::{Deserialize, Serialize};
use std::time::Duration;
use std::{
    env, fs,
    path::{Path, PathBuf},
};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppEnv {
    Local,
    Dev,
    Test,
    Prod,
}

impl AppEnv {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Dev => "dev",
            Self::Test => "test",
            Self::Prod => "prod",
        }
    }
}

impl std::str::FromStr for AppEnv {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "dev" | "development" => Ok(Self::Dev),
            "test" => Ok(Self::Test),
            "prod" | "production" => Ok(Self::Prod),
            other => Err(ConfigError::InvalidEnv(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub app: AppSection,
    pub observability: ObservabilitySection,
    pub timing: TimingSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppSection {
    pub env: AppEnv,
    pub service_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilitySection {
    pub log_filter: String,
}

/// Every policy-bearing duration in the engine, in one visible place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingSection {
    /// Simultaneous-choice collection window (T).
    pub round_timeout_secs: u64,
    /// Added to the collection window per consecutive draw.
    pub draw_extension_secs: u64,
    /// Sequential-choice picker window (T2).
    pub pick_timeout_secs: u64,
    /// Join request lifetime (join lock / room occupancy TTL).
    pub join_window_secs: u64,
    /// Rematch vote lifetime.
    pub vote_window_secs: u64,
    /// Bet proposal lifetime.
    pub proposal_window_secs: u64,
}

impl TimingSection {
    #[must_use]
    pub fn round_timeout(&self) -> Duration {
        Duration::from_secs(self.round_timeout_secs)
    }

    #[must_use]
    pub fn draw_extension(&self) -> Duration {
        Duration::from_secs(self.draw_extension_secs)
    }

    #[must_use]
    pub fn pick_timeout(&self) -> Duration {
        Duration::from_secs(self.pick_timeout_secs)
    }

    #[must_use]
    pub fn join_window(&self) -> Duration {
        Duration::from_secs(self.join_window_secs)
    }

    #[must_use]
    pub fn vote_window(&self) -> Duration {
        Duration::from_secs(self.vote_window_secs)
    }

    #[must_use]
    pub fn proposal_window(&self) -> Duration {
        Duration::from_secs(self.proposal_window_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: ErrorCode,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseEnvelope<T> {
    pub ok: bool,
    pub data: Option<T>,
    pub error: Option<ErrorBody>,
}

impl<T> ResponseEnvelope<T> {
    #[must_use]
    pub fn ok(data: T) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    #[must_use]
    pub fn err(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(ErrorBody {
                code,
                message: message.into(),
            }),
        }
    }
}

/// Stable client-visible error codes. "Expired" codes are deliberately
/// distinct from "not found" so clients can tell a stale UI from a logic
/// error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    RequestInvalid,
    Forbidden,
    SessionNotFound,
    InsufficientBalance,
    RoomOccupied,
    JoinExpired,
    ProposalExpired,
    RematchExpired,
    MoveRejected,
    SessionStateInvalid,
    LedgerUnavailable,
    InternalError,
}

impl ErrorCode {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RequestInvalid => "REQUEST_INVALID",
            Self::Forbidden => "FORBIDDEN",
            Self::SessionNotFound => "SESSION_NOT_FOUND",
            Self::InsufficientBalance => "INSUFFICIENT_BALANCE",
            Self::RoomOccupied => "ROOM_OCCUPIED",
            Self::JoinExpired => "JOIN_EXPIRED",
            Self::ProposalExpired => "PROPOSAL_EXPIRED",
            Self::RematchExpired => "REMATCH_EXPIRED",
            Self::MoveRejected => "MOVE_REJECTED",
            Self::SessionStateInvalid => "SESSION_STATE_INVALID",
            Self::LedgerUnavailable => "LEDGER_UNAVAILABLE",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }

    /// Whether a client retry of the same request can reasonably succeed.
    #[must_use]
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::LedgerUnavailable | Self::InternalError)
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid APP_ENV value: {0}")]
    InvalidEnv(String),
    #[error("unable to locate config directory (expected config/default.toml)")]
    ConfigDirNotFound,
    #[error("failed reading config file {path}: {source}")]
    ReadFile {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed parsing config file {path}: {source}")]
    ParseToml {
        path: String,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid value for {field}: {value}")]
    InvalidValue { field: &'static str, value: String },
}

#[derive(Debug, Default, Deserialize)]
struct PartialAppConfig {
    app: Option<PartialAppSection>,
    observability: Option<PartialObservabilitySection>,
    timing: Option<PartialTimingSection>,
}

#[derive(Debug, Default, Deserialize)]
struct PartialAppSection {
    env: Option<AppEnv>,
    service_name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct PartialObservabilitySection {
    log_filter: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct PartialTimingSection {
    round_timeout_secs: Option<u64>,
    draw_extension_secs: Option<u64>,
    pick_timeout_secs: Option<u64>,
    join_window_secs: Option<u64>,
    vote_window_secs: Option<u64>,
    proposal_window_secs: Option<u64>,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let app_env = env::var("APP_ENV")
            .ok()
            .map(|value| value.parse())
            .transpose()?
            .unwrap_or(AppEnv::Local);
        let config_dir = resolve_config_dir()?;
        Self::load_from_dir_for_env(config_dir, app_env)
    }

    pub fn load_from_dir_for_env(
        config_dir: impl AsRef<Path>,
        app_env: AppEnv,
    ) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();
        let mut config = Self::default_for_env(app_env);
        merge_file(&mut config, &config_dir.join("default.toml"))?;
        let env_file = config_dir.join(format!("{}.toml", app_env.as_str()));
        if env_file.exists() {
            merge_file(&mut config, &env_file)?;
        }
        config.app.env = app_env;
        config.apply_env_overrides()?;
        Ok(config)
    }

    #[must_use]
    pub fn default_for_env(app_env: AppEnv) -> Self {
        Self {
            app: AppSection {
                env: app_env,
                service_name: "wager-server".to_string(),
            },
            observability: ObservabilitySection {
                log_filter: "info".to_string(),
            },
            timing: TimingSection {
                round_timeout_secs: 10,
                draw_extension_secs: 5,
                pick_timeout_secs: 15,
                join_window_secs: 30,
                vote_window_secs: 30,
                proposal_window_secs: 30,
            },
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(raw_env) = env::var("APP_ENV") {
            self.app.env = raw_env.parse()?;
        }
        if let Ok(service_name) = env::var("WAGER_SERVER__SERVICE_NAME") {
            self.app.service_name = service_name;
        }
        if let Ok(log_filter) = env::var("OBSERVABILITY__LOG_FILTER") {
            self.observability.log_filter = log_filter;
        } else if let Ok(log_filter) = env::var("RUST_LOG") {
            self.observability.log_filter = log_filter;
        }
        for (var, field) in [
            ("TIMING__ROUND_TIMEOUT_SECS", 0usize),
            ("TIMING__DRAW_EXTENSION_SECS", 1),
            ("TIMING__PICK_TIMEOUT_SECS", 2),
            ("TIMING__JOIN_WINDOW_SECS", 3),
            ("TIMING__VOTE_WINDOW_SECS", 4),
            ("TIMING__PROPOSAL_WINDOW_SECS", 5),
        ] {
            if let Ok(raw) = env::var(var) {
                let value = raw.parse::<u64>().map_err(|_| ConfigError::InvalidValue {
                    field: var,
                    value: raw.clone(),
                })?;
                match field {
                    0 => self.timing.round_timeout_secs = value,
                    1 => self.timing.draw_extension_secs = value,
                    2 => self.timing.pick_timeout_secs = value,
                    3 => self.timing.join_window_secs = value,
                    4 => self.timing.vote_window_secs = value,
                    _ => self.timing.proposal_window_secs = value,
                }
            }
        }
        Ok(())
    }

    fn merge_partial(&mut self, partial: PartialAppConfig) {
        if let Some(app) = partial.app {
            if let Some(value) = app.env {
                self.app.env = value;
            }
            if let Some(value) = app.service_name {
                self.app.service_name = value;
            }
        }
        if let Some(observability) = partial.observability {
            if let Some(value) = observability.log_filter {
                self.observability.log_filter = value;
            }
        }
        if let Some(timing) = partial.timing {
            if let Some(value) = timing.round_timeout_secs {
                self.timing.round_timeout_secs = value;
            }
            if let Some(value) = timing.draw_extension_secs {
                self.timing.draw_extension_secs = value;
            }
            if let Some(value) = timing.pick_timeout_secs {
                self.timing.pick_timeout_secs = value;
            }
            if let Some(value) = timing.join_window_secs {
                self.timing.join_window_secs = value;
            }
            if let Some(value) = timing.vote_window_secs {
                self.timing.vote_window_secs = value;
            }
            if let Some(value) = timing.proposal_window_secs {
                self.timing.proposal_window_secs = value;
            }
        }
    }
}

fn merge_file(config: &mut AppConfig, path: &Path) -> Result<(), ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::ReadFile {
        path: path.display().to_string(),
        source,
    })?;
    let partial =
        toml::from_str::<PartialAppConfig>(&content).map_err(|source| ConfigError::ParseToml {
            path: path.display().to_string(),
            source,
        })?;
    config.merge_partial(partial);
    Ok(())
}

fn resolve_config_dir() -> Result<PathBuf, ConfigError> {
    if let Ok(path) = env::var("WAGER_PLATFORM_CONFIG_DIR") {
        return Ok(PathBuf::from(path));
    }

    let mut current_dir = env::current_dir().map_err(|_| ConfigError::ConfigDirNotFound)?;
    loop {
        let candidate = current_dir.join("config");
        if candidate.join("default.toml").exists() {
            return Ok(candidate);
        }
        if !current_dir.pop() {
            break;
        }
    }

    Err(ConfigError::ConfigDirNotFound)
}
