//! Debounced status reporter.
//!
//! A dedicated task owns the debounce timer. The first report after an idle
//! period is emitted at once and arms the timer; reports arriving while it is
//! armed only replace the pending line. When the timer fires, a pending line
//! is emitted and the timer re-armed, otherwise the reporter goes idle.
//! [`StatusReporter::finish`] flushes whatever is still pending.

use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};

enum Command {
    Report(String),
    Finish(oneshot::Sender<()>),
}

/// Handle to the reporter task.
pub struct StatusReporter {
    tx: mpsc::UnboundedSender<Command>,
    task: JoinHandle<()>,
}

impl StatusReporter {
    /// Spawn a reporter that writes status lines to the `tracing` log.
    pub fn spawn(interval: Duration) -> Self {
        Self::with_sink(interval, |line| {
            tracing::info!(target: "chainbatch::processor", "{line}");
        })
    }

    /// Spawn a reporter that hands every emitted line to `sink`.
    pub fn with_sink<F>(interval: Duration, sink: F) -> Self
    where
        F: FnMut(&str) + Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run_reporter(rx, interval, sink));
        Self { tx, task }
    }

    /// Submit the latest status line.
    pub fn report(&self, line: String) {
        // The task only stops after `finish`, which consumes `self`.
        let _ = self.tx.send(Command::Report(line));
    }

    /// Cancel the timer, emit the pending line if any, and stop the task.
    pub async fn finish(self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.tx.send(Command::Finish(ack_tx)).is_ok() {
            let _ = ack_rx.await;
        }
        if let Err(e) = self.task.await {
            tracing::warn!(error = %e, "status reporter task failed");
        }
    }
}

async fn run_reporter<F>(mut rx: mpsc::UnboundedReceiver<Command>, interval: Duration, mut sink: F)
where
    F: FnMut(&str),
{
    let mut pending: Option<String> = None;
    let mut deadline: Option<Instant> = None;

    loop {
        let command = match deadline {
            Some(at) => tokio::select! {
                command = rx.recv() => command,
                _ = sleep_until(at) => {
                    deadline = match pending.take() {
                        Some(line) => {
                            sink(&line);
                            Some(Instant::now() + interval)
                        }
                        None => None,
                    };
                    continue;
                }
            },
            None => rx.recv().await,
        };

        match command {
            Some(Command::Report(line)) => {
                if deadline.is_none() {
                    sink(&line);
                    deadline = Some(Instant::now() + interval);
                } else {
                    pending = Some(line);
                }
            }
            Some(Command::Finish(ack)) => {
                if let Some(line) = pending.take() {
                    sink(&line);
                }
                let _ = ack.send(());
                return;
            }
            // Handle dropped without `finish` (failed pass): still flush.
            None => {
                if let Some(line) = pending.take() {
                    sink(&line);
                }
                return;
            }
        }
    }
}
