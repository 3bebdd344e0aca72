use std::str::FromStr;
use std::sync::Arc;

use dotenv::dotenv;
use tracing::{Level, Metadata};
use tracing_subscriber::filter::{filter_fn, LevelFilter};
use tracing_subscriber::fmt::time::ChronoLocal;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::{Filter, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

use crate::log::{BufferPool, RollingFile, WORKER_TARGET};

use super::{AppError, AppResult, Encoder, LoggerConfig};

pub type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync + 'static>;

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

/// One file per level when no filename is configured.
const LEVEL_FILES: [(Level, &str); 5] = [
    (Level::TRACE, "trace"),
    (Level::DEBUG, "debug"),
    (Level::INFO, "info"),
    (Level::WARN, "warn"),
    (Level::ERROR, "error"),
];

/// Keeps the rolling files of a logger alive. Dropping the guard closes them,
/// persisting whatever is still buffered.
#[derive(Debug, Default)]
pub struct LoggerGuard {
    files: Vec<RollingFile>,
}

impl LoggerGuard {
    /// Flushes every file to disk, returning the first failure.
    pub fn sync(&self) -> AppResult<()> {
        let mut result = Ok(());
        for file in &self.files {
            if let Err(e) = file.sync() {
                if result.is_ok() {
                    result = Err(e);
                }
            }
        }
        result
    }

    pub fn files(&self) -> &[RollingFile] {
        &self.files
    }
}

impl Drop for LoggerGuard {
    fn drop(&mut self) {
        for file in &self.files {
            if let Err(err) = file.close() {
                eprintln!("{err:?}");
            }
        }
    }
}

fn level_filter(config: &LoggerConfig) -> AppResult<LevelFilter> {
    LevelFilter::from_str(&config.level)
        .map_err(|e| AppError::InvalidValue(format!("log level {}: {}", config.level, e)))
}

/// Accepts events at or above `max`, and only `only` when given, never the
/// flush worker's own diagnostics.
fn file_filter(
    max: LevelFilter,
    only: Option<Level>,
) -> impl Fn(&Metadata<'_>) -> bool + Send + Sync + 'static {
    move |meta| {
        !meta.target().starts_with(WORKER_TARGET)
            && max >= *meta.level()
            && only.map_or(true, |level| *meta.level() == level)
    }
}

fn fmt_layer<W, F>(encoder: Encoder, writer: W, filter: F, ansi: bool) -> BoxedLayer
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
    F: Filter<Registry> + Send + Sync + 'static,
{
    let timer = ChronoLocal::new(TIME_FORMAT.to_string());
    match encoder {
        Encoder::Json => tracing_subscriber::fmt::layer()
            .json()
            .with_timer(timer)
            .with_target(true)
            .with_line_number(true)
            .with_ansi(ansi)
            .with_writer(writer)
            .with_filter(filter)
            .boxed(),
        Encoder::Console => tracing_subscriber::fmt::layer()
            .with_timer(timer)
            .with_target(true)
            .with_line_number(true)
            .with_ansi(ansi)
            .with_writer(writer)
            .with_filter(filter)
            .boxed(),
    }
}

fn console_layer(config: &LoggerConfig, max: LevelFilter) -> BoxedLayer {
    // a named logger prints everything to stdout, otherwise errors go to stderr
    match config.filename {
        Some(_) => fmt_layer(config.encoder, std::io::stdout, max, true),
        None => fmt_layer(
            config.encoder,
            std::io::stderr
                .with_max_level(Level::ERROR)
                .or_else(std::io::stdout),
            max,
            true,
        ),
    }
}

fn file_layer(
    encoder: Encoder,
    writer: RollingFile,
    max: LevelFilter,
    only: Option<Level>,
) -> BoxedLayer {
    fmt_layer(encoder, writer, filter_fn(file_filter(max, only)), false)
}

/// Builds the layers described by `config` without installing them.
///
/// Files share one buffer pool. With a filename every enabled level goes to
/// `<base_path>/<filename>`; without one each level gets its own file.
pub fn build_layers(config: &LoggerConfig) -> AppResult<(Vec<BoxedLayer>, LoggerGuard)> {
    let max = level_filter(config)?;
    let mut layers = Vec::new();
    let mut guard = LoggerGuard::default();

    if config.console {
        layers.push(console_layer(config, max));
    }

    if !config.disable_disk {
        let pool = Arc::new(BufferPool::new(config.pool_capacity, config.page_size));
        match config.filename.as_deref() {
            Some(filename) => {
                let file = RollingFile::new(&config.rolling_config(filename), Arc::clone(&pool))?;
                layers.push(file_layer(config.encoder, file.clone(), max, None));
                guard.files.push(file);
            }
            None => {
                for (level, name) in LEVEL_FILES {
                    if max < level {
                        continue;
                    }
                    let file = RollingFile::new(&config.rolling_config(name), Arc::clone(&pool))?;
                    layers.push(file_layer(config.encoder, file.clone(), max, Some(level)));
                    guard.files.push(file);
                }
            }
        }
    }

    Ok((layers, guard))
}

/// Installs the logger as the global default subscriber.
///
/// `RUST_LOG` (also read from `.env`) overrides the configured level.
pub fn setup_tracing(config: &LoggerConfig) -> AppResult<LoggerGuard> {
    dotenv().ok();
    let max = level_filter(config)?;
    let (layers, guard) = build_layers(config)?;
    let env_filter = EnvFilter::builder()
        .with_default_directive(max.into())
        .from_env_lossy();

    tracing_subscriber::registry()
        .with(layers)
        .with(env_filter)
        .try_init()
        .map_err(|e| AppError::TracingSetup(e.to_string()))?;
    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::Path;
    use tempfile::tempdir;
    use tracing::{debug, error, info, warn};

    use crate::log::RollingFormat;

    fn disk_config(base: &Path) -> LoggerConfig {
        LoggerConfig {
            base_path: base.to_path_buf(),
            console: false,
            disable_disk: false,
            rolling: RollingFormat::Never,
            level: "debug".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_file_per_level() -> AppResult<()> {
        let dir = tempdir()?;
        let config = LoggerConfig {
            encoder: Encoder::Console,
            ..disk_config(dir.path())
        };
        let (layers, guard) = build_layers(&config)?;
        // trace is below the configured level
        assert_eq!(guard.files().len(), 4);

        let subscriber = tracing_subscriber::registry().with(layers);
        tracing::subscriber::with_default(subscriber, || {
            debug!("debug message");
            info!("info message");
            warn!("warn message");
            warn!(target: WORKER_TARGET, "worker diagnostics");
            error!("error message");
        });
        guard.sync()?;

        let info = fs::read_to_string(dir.path().join("info.log"))?;
        assert!(info.contains("info message"));
        assert!(!info.contains("warn message"));

        let warn = fs::read_to_string(dir.path().join("warn.log"))?;
        assert!(warn.contains("warn message"));
        assert!(!warn.contains("worker diagnostics"));

        let error = fs::read_to_string(dir.path().join("error.log"))?;
        assert!(error.contains("error message"));
        assert!(!error.contains("info message"));

        assert!(!dir.path().join("trace.log").exists());
        Ok(())
    }

    #[test]
    fn test_single_file_json() -> AppResult<()> {
        let dir = tempdir()?;
        let config = LoggerConfig {
            filename: Some("app".to_string()),
            level: "info".to_string(),
            ..disk_config(dir.path())
        };
        let (layers, guard) = build_layers(&config)?;
        assert_eq!(guard.files().len(), 1);

        let subscriber = tracing_subscriber::registry().with(layers);
        tracing::subscriber::with_default(subscriber, || {
            debug!("hidden");
            info!(user = "alice", "logged in");
            error!("failed");
        });
        drop(guard);

        let content = fs::read_to_string(dir.path().join("app.log"))?;
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with('{'));
        assert!(lines[0].contains("\"user\":\"alice\""));
        assert!(lines[1].contains("failed"));
        assert!(!content.contains("hidden"));
        Ok(())
    }

    #[test]
    fn test_disk_disabled() -> AppResult<()> {
        let config = LoggerConfig {
            console: false,
            ..Default::default()
        };
        let (layers, guard) = build_layers(&config)?;
        assert!(layers.is_empty());
        assert!(guard.files().is_empty());
        Ok(())
    }

    #[test]
    fn test_invalid_level() {
        let config = LoggerConfig {
            level: "loud".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            build_layers(&config),
            Err(AppError::InvalidValue(_))
        ));
    }
}
