//! Progress spinner
//!
//! Animates on the current terminal line while a Provider call is in
//! flight, driven by a tokio task. The task is told to stop through a
//! single-use channel before the next phase begins; dropping the spinner
//! also stops it.

use std::io::{self, IsTerminal, Write};
use std::time::{Duration, Instant};
use tokio::sync::oneshot;

use crate::output;

const FRAMES: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];

pub struct Spinner {
    stop_tx: Option<oneshot::Sender<()>>,
    handle: Option<tokio::task::JoinHandle<()>>,
    start: Instant,
}

impl Spinner {
    /// Start spinning with a message. No-op in compact mode or when
    /// stdout is not a terminal.
    pub fn start(message: &str) -> Self {
        if output::is_compact() || !io::stdout().is_terminal() {
            return Self {
                stop_tx: None,
                handle: None,
                start: Instant::now(),
            };
        }

        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
        let message = message.to_string();
        let start = Instant::now();

        let handle = tokio::spawn(async move {
            let mut tick = 0usize;
            loop {
                if stop_rx.try_recv().is_ok() {
                    break;
                }
                let frame = FRAMES[tick % FRAMES.len()];
                print!(
                    "\r\x1b[2K  {} {} ({:.1}s)",
                    frame,
                    message,
                    start.elapsed().as_secs_f64()
                );
                io::stdout().flush().ok();
                tick += 1;
                tokio::time::sleep(Duration::from_millis(80)).await;
            }
            print!("\r\x1b[2K");
            io::stdout().flush().ok();
        });

        Self {
            stop_tx: Some(stop_tx),
            handle: Some(handle),
            start,
        }
    }

    /// Stop the spinner and clear its line.
    pub async fn stop(mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl Drop for Spinner {
    fn drop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}
