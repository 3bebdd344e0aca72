pub use app_error::{AppError, AppResult};
pub use config::{Encoder, LoggerConfig, RollingConfig};
pub use shutdown::Shutdown;
pub use tracing_config::{build_layers, setup_tracing, BoxedLayer, LoggerGuard};

mod app_error;
mod config;
mod shutdown;
mod tracing_config;
