use std::fs;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use stonelog::{AppResult, BufferPool, RollingConfig, RollingFile, RollingFormat};
use tempfile::tempdir;

// Runs alone in this binary: it installs the process-wide subscriber.
#[test]
fn test_failing_writer_under_global_subscriber_does_not_wedge() -> AppResult<()> {
    let dir = tempdir()?;
    // a regular file where the log directory should be, so every page fails
    let blocker = dir.path().join("blocker");
    fs::write(&blocker, "")?;

    let mut config = RollingConfig::new(blocker.join("app"), RollingFormat::Daily);
    config.page_size = 16;
    config.max_pending_pages = 0;
    config.flush_interval_ms = 60_000;
    let file = RollingFile::new(&config, Arc::new(BufferPool::new(8, 16)))?;

    // no target filter: every event, wherever emitted, lands in the file
    let subscriber = tracing_subscriber::fmt()
        .with_writer(file.clone())
        .with_ansi(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber).unwrap();

    let (done_tx, done_rx) = mpsc::channel();
    thread::spawn(move || {
        for i in 0..2_000 {
            tracing::info!(record = i, "burst");
        }
        let _ = done_tx.send(());
    });

    assert!(
        done_rx.recv_timeout(Duration::from_secs(10)).is_ok(),
        "logging thread blocked on its own writer"
    );
    file.write(b"x")?;
    assert!(file.sync().is_err());
    let stats = file.stats();
    assert!(stats.write_errors > 0);
    assert_eq!(stats.pages_written, 0);
    Ok(())
}
