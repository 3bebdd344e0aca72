use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::log::{
    RollingFormat, DEFAULT_FLUSH_INTERVAL_MS, DEFAULT_MAX_PENDING_PAGES, DEFAULT_PAGE_SIZE,
    DEFAULT_POOL_CAPACITY,
};

use super::{AppError, AppResult};

/// Settings of a single rolling file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RollingConfig {
    /// directory + file stem, e.g. `logs/app`; a trailing `.log` is ignored
    pub base_path: PathBuf,
    pub rolling: RollingFormat,
    /// a page is handed to the worker once it holds more than this many bytes
    pub page_size: usize,
    /// full pages allowed to wait for the worker before writers block
    pub max_pending_pages: usize,
    /// period of the idle flush of a partially filled page
    pub flush_interval_ms: u64,
    /// symlink repointed at the newest file after each rotation
    pub current_link: Option<PathBuf>,
}

impl Default for RollingConfig {
    fn default() -> Self {
        Self {
            base_path: PathBuf::from("./logs/app"),
            rolling: RollingFormat::default(),
            page_size: DEFAULT_PAGE_SIZE,
            max_pending_pages: DEFAULT_MAX_PENDING_PAGES,
            flush_interval_ms: DEFAULT_FLUSH_INTERVAL_MS,
            current_link: None,
        }
    }
}

impl RollingConfig {
    pub fn new(base_path: impl Into<PathBuf>, rolling: RollingFormat) -> Self {
        Self {
            base_path: base_path.into(),
            rolling,
            ..Default::default()
        }
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }
}

/// Formatter used for records written by the logger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoder {
    #[default]
    Json,
    Console,
}

/// Settings of the tracing-based logger built on top of rolling files.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggerConfig {
    /// lowest level recorded: trace, debug, info, warn, error or off
    pub level: String,
    /// directory holding the log files
    pub base_path: PathBuf,
    /// single file for every level; one file per level when unset
    pub filename: Option<String>,
    /// also print to stdout/stderr
    pub console: bool,
    /// skip rolling files entirely
    pub disable_disk: bool,
    pub encoder: Encoder,
    pub rolling: RollingFormat,
    pub page_size: usize,
    pub max_pending_pages: usize,
    pub flush_interval_ms: u64,
    /// buffers shared by all files of this logger
    pub pool_capacity: usize,
    /// keep a `<name>.log` symlink next to the rotated files
    pub link_current: bool,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            base_path: PathBuf::from("./logs"),
            filename: None,
            console: true,
            disable_disk: true,
            encoder: Encoder::default(),
            rolling: RollingFormat::Hourly,
            page_size: DEFAULT_PAGE_SIZE,
            max_pending_pages: DEFAULT_MAX_PENDING_PAGES,
            flush_interval_ms: DEFAULT_FLUSH_INTERVAL_MS,
            pool_capacity: DEFAULT_POOL_CAPACITY,
            link_current: false,
        }
    }
}

impl LoggerConfig {
    /// Loads the logger settings from a file in any format the `config` crate reads.
    pub fn set_up_config<P: AsRef<Path>>(path: P) -> AppResult<LoggerConfig> {
        let path_str = path.as_ref().to_str().ok_or(AppError::InvalidValue(format!(
            "config file path: {}",
            path.as_ref().to_string_lossy()
        )))?;
        let config = config::Config::builder()
            .add_source(config::File::with_name(path_str))
            .build()?;

        let logger_config: LoggerConfig = config.try_deserialize()?;
        Ok(logger_config)
    }

    /// Settings of the rolling file called `name` under `base_path`.
    pub fn rolling_config(&self, name: &str) -> RollingConfig {
        let current_link = (self.link_current && self.rolling != RollingFormat::Never)
            .then(|| self.base_path.join(format!("{}.log", name)));
        RollingConfig {
            base_path: self.base_path.join(name),
            rolling: self.rolling,
            page_size: self.page_size,
            max_pending_pages: self.max_pending_pages,
            flush_interval_ms: self.flush_interval_ms,
            current_link,
        }
    }
}
