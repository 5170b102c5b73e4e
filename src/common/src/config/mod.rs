use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, de};
use thiserror::Error;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};

/// Default configuration file looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "archivist.toml";

/// Prefix for environment variable overrides (`ARCHIVIST__CONTROLLER__DELETE_OFFSET`).
pub const ENV_PREFIX: &str = "ARCHIVIST__";

/// Settings for the lifecycle controller.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Root directory holding the raw, date-named artifacts and their archives.
    ///
    /// Env: ARCHIVIST__CONTROLLER__LOCAL_PATH
    pub local_path: PathBuf,

    /// Root directory where exported counterparts of artifacts appear.
    ///
    /// Env: ARCHIVIST__CONTROLLER__OPENDATA_PATH
    pub opendata_path: PathBuf,

    /// Minimum age in days before a raw artifact may be deleted. Zero disables deletion.
    ///
    /// Env: ARCHIVIST__CONTROLLER__DELETE_OFFSET
    #[serde(default = "default_delete_offset")]
    pub delete_offset: u32,

    /// Return compression failures to the caller instead of logging and moving on.
    ///
    /// Env: ARCHIVIST__CONTROLLER__PROPAGATE_COMPRESSION_ERRORS
    #[serde(default, deserialize_with = "deserialize_flag")]
    pub propagate_compression_errors: bool,

    /// Dry-run mode: log decisions without writing archives or deleting artifacts.
    ///
    /// Env: ARCHIVIST__CONTROLLER__DRY_RUN
    #[serde(default, deserialize_with = "deserialize_flag")]
    pub dry_run: bool,
}

fn default_delete_offset() -> u32 {
    15
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            local_path: PathBuf::from("/echoes"),
            opendata_path: PathBuf::from("/opendata"),
            delete_offset: default_delete_offset(),
            propagate_compression_errors: false,
            dry_run: false,
        }
    }
}

/// Work performed each time the cron schedule fires.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduledJob {
    /// Full directory sweep: compress and delete as eligible.
    #[default]
    Sweep,
    /// Compress only the artifact named after the previous calendar day.
    CompressPreviousDay,
}

impl fmt::Display for ScheduledJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScheduledJob::Sweep => write!(f, "sweep"),
            ScheduledJob::CompressPreviousDay => write!(f, "compress_previous_day"),
        }
    }
}

/// Settings for the recurring trigger.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CronConfig {
    /// Five or six field cron expression.
    ///
    /// Env: ARCHIVIST__CRON__SCHEDULE
    #[serde(default = "default_schedule")]
    pub schedule: String,

    /// Run one sweep at startup before the schedule begins.
    ///
    /// Accepts booleans and boolean-like strings ("true", "1", "yes", "active").
    ///
    /// Env: ARCHIVIST__CRON__INITIAL_SYNC
    #[serde(default, deserialize_with = "deserialize_flag")]
    pub initial_sync: bool,

    /// Job executed on every tick.
    ///
    /// Env: ARCHIVIST__CRON__JOB
    #[serde(default)]
    pub job: ScheduledJob,
}

fn default_schedule() -> String {
    "0 1 * * *".to_string()
}

impl Default for CronConfig {
    fn default() -> Self {
        Self {
            schedule: default_schedule(),
            initial_sync: false,
            job: ScheduledJob::default(),
        }
    }
}

impl CronConfig {
    /// Parse the configured expression into a schedule.
    pub fn parsed_schedule(&self) -> Result<cron::Schedule, ConfigError> {
        parse_cron_expression(&self.schedule)
    }
}

/// Expand a five field expression to the six field form (leading seconds) the
/// cron parser expects.
///
/// Five field expressions use standard crontab day-of-week numbering (0-7,
/// Sunday is 0 or 7), which is remapped to the parser's 1-7 (Sunday is 1).
/// Six and seven field expressions pass through in the parser's numbering.
pub fn normalize_cron_expression(expression: &str) -> Result<String, ConfigError> {
    let fields: Vec<&str> = expression.split_whitespace().collect();
    if fields.len() != 5 {
        return Ok(fields.join(" "));
    }

    let day_of_week = remap_day_of_week(fields[4]).map_err(|message| {
        ConfigError::InvalidSchedule {
            expression: expression.to_string(),
            message,
        }
    })?;

    Ok(format!(
        "0 {} {} {} {} {}",
        fields[0], fields[1], fields[2], fields[3], day_of_week
    ))
}

/// Translate a crontab day-of-week field into the parser's numbering.
/// Named days (`MON-FRI`) are left untouched.
fn remap_day_of_week(field: &str) -> Result<String, String> {
    let mut items = Vec::new();

    for item in field.split(',') {
        if item.chars().any(|c| c.is_ascii_alphabetic()) {
            items.push(item.to_string());
            continue;
        }

        let (base, step) = match item.split_once('/') {
            Some((base, step)) => {
                let step = parse_day_number(step)?;
                if step == 0 {
                    return Err(format!("day-of-week step must be positive in '{item}'"));
                }
                (base, Some(step))
            }
            None => (item, None),
        };

        if (base == "*" || base == "?") && step.is_none() {
            items.push(base.to_string());
            continue;
        }

        let (start, end) = match base {
            "*" | "?" => (0, 6),
            _ => match base.split_once('-') {
                Some((start, end)) => (parse_day_number(start)?, parse_day_number(end)?),
                None => {
                    let day = parse_day_number(base)?;
                    (day, if step.is_some() { 6 } else { day })
                }
            },
        };
        if start > end {
            return Err(format!("day-of-week range '{base}' is reversed"));
        }

        let mut days: Vec<u32> = (start..=end)
            .step_by(step.unwrap_or(1) as usize)
            .map(|day| day % 7 + 1)
            .collect();
        days.sort_unstable();
        days.dedup();
        items.extend(days.iter().map(u32::to_string));
    }

    Ok(items.join(","))
}

fn parse_day_number(value: &str) -> Result<u32, String> {
    match value.parse::<u32>() {
        Ok(day) if day <= 7 => Ok(day),
        _ => Err(format!("day-of-week value '{value}' is not in 0-7")),
    }
}

/// Parse a five or six field cron expression.
pub fn parse_cron_expression(expression: &str) -> Result<cron::Schedule, ConfigError> {
    let normalized = normalize_cron_expression(expression)?;
    cron::Schedule::from_str(&normalized).map_err(|e| ConfigError::InvalidSchedule {
        expression: expression.to_string(),
        message: e.to_string(),
    })
}

#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct Configuration {
    /// Lifecycle controller settings
    #[serde(default)]
    pub controller: ControllerConfig,
    /// Schedule settings
    #[serde(default)]
    pub cron: CronConfig,
}

impl Configuration {
    pub fn load() -> Result<Self, Box<figment::Error>> {
        Self::figment(Path::new(DEFAULT_CONFIG_FILE))
            .extract()
            .map_err(Box::new)
    }

    pub fn load_from_path(path: &Path) -> Result<Self, Box<figment::Error>> {
        Self::figment(path).extract().map_err(Box::new)
    }

    fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(Configuration::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Check the configuration for values the service cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.controller.local_path.as_os_str().is_empty() {
            return Err(ConfigError::EmptyPath("controller.local_path"));
        }
        if self.controller.opendata_path.as_os_str().is_empty() {
            return Err(ConfigError::EmptyPath("controller.opendata_path"));
        }
        if self.controller.local_path == self.controller.opendata_path {
            return Err(ConfigError::SameRoots(self.controller.local_path.clone()));
        }

        self.cron.parsed_schedule()?;

        Ok(())
    }
}

/// Errors raised while validating the configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{0} must not be empty")]
    EmptyPath(&'static str),

    #[error("local and export roots must differ, both are {}", .0.display())]
    SameRoots(PathBuf),

    #[error("Invalid cron schedule '{expression}': {message}")]
    InvalidSchedule { expression: String, message: String },
}

fn deserialize_flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Int(i64),
        Text(String),
    }

    match Flag::deserialize(deserializer)? {
        Flag::Bool(value) => Ok(value),
        Flag::Int(value) => Ok(value != 0),
        Flag::Text(value) => match value.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" | "on" | "active" => Ok(true),
            "false" | "0" | "no" | "off" | "inactive" | "" => Ok(false),
            other => Err(de::Error::custom(format!(
                "expected a boolean-like flag, got '{other}'"
            ))),
        },
    }
}
