use tokio::sync::oneshot;

use crate::AppResult;

/// Asks the flush worker to persist everything queued so far and fsync the file.
///
/// The worker answers on `reply` once the data has reached the file, or with the
/// first I/O error met while draining.
#[derive(Debug)]
pub struct FlushRequest {
    pub reply: oneshot::Sender<AppResult<()>>,
}

impl FlushRequest {
    pub fn new() -> (Self, oneshot::Receiver<AppResult<()>>) {
        let (reply, rx) = oneshot::channel();
        (Self { reply }, rx)
    }
}
