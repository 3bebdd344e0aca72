// Copyright 2025 jonefeewang@gmail.com
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::io;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// rolling file errors
    #[error("rolling file is closed")]
    Closed,

    #[error("buffer pool exhausted: all {capacity} buffers are checked out")]
    BufferExhausted { capacity: usize },

    #[error("invalid base path: {0}, file name is required")]
    InvalidPath(String),

    /// general errors
    #[error("io error: {0}")]
    IoError(#[from] io::Error),

    #[error("channel recv error: {0}")]
    ChannelRecvError(String),

    #[error("invalid value: {0}")]
    InvalidValue(String),

    #[error("config file error: {0}")]
    ConfigFileError(#[from] config::ConfigError),

    #[error("tracing setup error: {0}")]
    TracingSetup(String),
}

impl AppError {
    /// Backpressure signals that a caller may retry or drop, as opposed to hard failures.
    pub fn is_backpressure(&self) -> bool {
        matches!(self, AppError::BufferExhausted { .. })
    }
}

impl From<AppError> for io::Error {
    fn from(value: AppError) -> Self {
        match value {
            AppError::IoError(e) => e,
            AppError::Closed => io::Error::new(io::ErrorKind::BrokenPipe, value.to_string()),
            AppError::BufferExhausted { .. } => {
                io::Error::new(io::ErrorKind::WouldBlock, value.to_string())
            }
            AppError::InvalidPath(_) | AppError::InvalidValue(_) => {
                io::Error::new(io::ErrorKind::InvalidInput, value.to_string())
            }
            _ => io::Error::new(io::ErrorKind::Other, value.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_kinds() {
        let err: io::Error = AppError::Closed.into();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);

        let err: io::Error = AppError::BufferExhausted { capacity: 4 }.into();
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);

        let inner = io::Error::new(io::ErrorKind::PermissionDenied, "denied");
        let err: io::Error = AppError::IoError(inner).into();
        assert_eq!(err.kind(), io::ErrorKind::PermissionDenied);
    }

    #[test]
    fn test_backpressure() {
        assert!(AppError::BufferExhausted { capacity: 1 }.is_backpressure());
        assert!(!AppError::Closed.is_backpressure());
    }
}
