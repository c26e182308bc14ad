use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_TICK_MILLIS: u64 = 1_000; // poller cadence of the recurring scheduler
pub const DEFAULT_IMMEDIATE_INTERVAL_SECS: u64 = 1; // shortest interval the schedule language accepts
pub const DEFAULT_REAPER_INTERVAL_SECS: u64 = 60;
pub const DEFAULT_HISTORY_RETENTION_SECS: u64 = 7 * 24 * 60 * 60;

/// Top-level config (cronshot.toml + CRONSHOT_* env overrides).
///
/// Nested keys are separated by a double underscore in the environment, e.g.
/// `CRONSHOT_REAPER__INTERVAL_SECS=30`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CronshotConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub oneshot: OneShotConfig,
    #[serde(default)]
    pub reaper: ReaperConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Recurring scheduler settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// How often the poller scans for due descriptors.
    #[serde(default = "default_tick_millis")]
    pub tick_millis: u64,
    /// Interval used when registering a "run now" job. Must be 1..=59.
    #[serde(default = "default_immediate_interval_secs")]
    pub immediate_interval_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_millis: DEFAULT_TICK_MILLIS,
            immediate_interval_secs: DEFAULT_IMMEDIATE_INTERVAL_SECS,
        }
    }
}

/// How job names obtain their numeric suffix.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum NamingStrategy {
    /// Atomically reserve the next value of a dedicated counter.
    #[default]
    Reserve,
    /// Read the descriptor id counter and guess the next value. Only safe when
    /// the caller submits immediately afterwards with no concurrent submitters.
    Anticipate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OneShotConfig {
    #[serde(default)]
    pub naming: NamingStrategy,
    /// Also disable a job whose body returned an error. When false a failing
    /// body is re-fired on every interval until it succeeds.
    #[serde(default = "bool_true")]
    pub disable_on_failure: bool,
}

impl Default for OneShotConfig {
    fn default() -> Self {
        Self {
            naming: NamingStrategy::default(),
            disable_on_failure: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReaperConfig {
    /// Delay between two maintenance sweeps.
    #[serde(default = "default_reaper_interval_secs")]
    pub interval_secs: u64,
    /// Execution records that ended longer ago than this are pruned.
    #[serde(default = "default_history_retention_secs")]
    pub history_retention_secs: u64,
    /// Optional SQL `LIKE` pattern restricting which descriptors are reaped.
    #[serde(default)]
    pub name_pattern: Option<String>,
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            interval_secs: DEFAULT_REAPER_INTERVAL_SECS,
            history_retention_secs: DEFAULT_HISTORY_RETENTION_SECS,
            name_pattern: None,
        }
    }
}

fn bool_true() -> bool {
    true
}
fn default_tick_millis() -> u64 {
    DEFAULT_TICK_MILLIS
}
fn default_immediate_interval_secs() -> u64 {
    DEFAULT_IMMEDIATE_INTERVAL_SECS
}
fn default_reaper_interval_secs() -> u64 {
    DEFAULT_REAPER_INTERVAL_SECS
}
fn default_history_retention_secs() -> u64 {
    DEFAULT_HISTORY_RETENTION_SECS
}
fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.cronshot/cronshot.db", home)
}

impl CronshotConfig {
    /// Load config from a TOML file with CRONSHOT_* env var overrides.
    ///
    /// Uses the explicit path when given, otherwise `~/.cronshot/cronshot.toml`.
    /// A missing file is not an error; every field has a default.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: CronshotConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("CRONSHOT_").split("__"))
            .extract()
            .map_err(|e| crate::error::CronshotError::Config(e.to_string()))?;

        if config.scheduler.tick_millis == 0 {
            return Err(crate::error::CronshotError::Config(
                "scheduler.tick_millis must be greater than zero".to_string(),
            ));
        }

        if !(1..=59).contains(&config.scheduler.immediate_interval_secs) {
            return Err(crate::error::CronshotError::Config(format!(
                "scheduler.immediate_interval_secs must be between 1 and 59, got {}",
                config.scheduler.immediate_interval_secs
            )));
        }

        Ok(config)
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.cronshot/cronshot.toml", home)
}
