//! Network observer: follows the security-event log and probes every port a
//! container opens with a TLS cipher scan.
//!
//! One task tails the log and parses events; a fixed pool of workers takes
//! them off a bounded queue and runs the probes on the blocking pool, so a
//! slow scan never stalls the tail loop.

pub mod event;
pub mod probe;
pub mod tail;

use std::future::Future;
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};

use crate::config::{ObserverConfig, ToolPaths};
use crate::error::Result;
use crate::exec::CommandRunner;

pub use event::{parse_event, NetworkEvent};
pub use tail::LogTailer;

/// Counters reported when the observer stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ObserverStats {
    pub lines: u64,
    pub events: u64,
    pub malformed: u64,
}

pub struct Observer {
    settings: ObserverConfig,
    tools: ToolPaths,
    runner: Arc<dyn CommandRunner>,
}

impl Observer {
    pub fn new(settings: ObserverConfig, tools: ToolPaths, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            settings,
            tools,
            runner,
        }
    }

    /// Follow `tailer` until `shutdown` resolves. Probes still in flight
    /// are left to finish on their own.
    pub async fn run<F>(&self, mut tailer: LogTailer, shutdown: F) -> Result<ObserverStats>
    where
        F: Future<Output = ()>,
    {
        std::fs::create_dir_all(&self.settings.output_dir)?;
        let (tx, rx) = mpsc::channel::<NetworkEvent>(self.settings.queue_capacity.max(1));
        self.spawn_workers(rx);

        tracing::info!(
            log = %tailer.path().display(),
            output = %self.settings.output_dir.display(),
            workers = self.settings.workers.max(1),
            "observer started"
        );

        let mut stats = ObserverStats::default();
        let mut ticker = tokio::time::interval(self.settings.poll_interval());
        tokio::pin!(shutdown);

        'poll: loop {
            tokio::select! {
                _ = &mut shutdown => break 'poll,
                _ = ticker.tick() => {}
            }

            let lines = match tailer.poll_lines() {
                Ok(lines) => lines,
                Err(e) => {
                    tracing::warn!(error = %e, "failed to read event log");
                    continue;
                }
            };

            for line in lines {
                stats.lines += 1;
                let event = match parse_event(&line) {
                    Ok(Some(event)) => event,
                    Ok(None) => {
                        tracing::debug!(%line, "event without container port ignored");
                        continue;
                    }
                    Err(e) => {
                        stats.malformed += 1;
                        tracing::error!(error = %e, %line, "malformed event dropped");
                        continue;
                    }
                };

                stats.events += 1;
                tracing::info!(
                    container = %event.display_name(),
                    port = event.port,
                    "container opened a port"
                );
                tokio::select! {
                    _ = &mut shutdown => break 'poll,
                    sent = tx.send(event) => {
                        if sent.is_err() {
                            tracing::error!("probe workers exited");
                            break 'poll;
                        }
                    }
                }
            }
        }

        tracing::info!(?stats, "observer stopped");
        Ok(stats)
    }

    fn spawn_workers(&self, rx: mpsc::Receiver<NetworkEvent>) {
        let rx = Arc::new(Mutex::new(rx));
        for worker in 0..self.settings.workers.max(1) {
            let rx = Arc::clone(&rx);
            let runner = Arc::clone(&self.runner);
            let tools = self.tools.clone();
            let output_dir = self.settings.output_dir.clone();

            tokio::spawn(async move {
                loop {
                    let next = rx.lock().await.recv().await;
                    let Some(event) = next else { break };

                    let runner = Arc::clone(&runner);
                    let tools = tools.clone();
                    let output_dir = output_dir.clone();
                    let label = format!("{}:{}", event.display_name(), event.port);
                    let probe = tokio::task::spawn_blocking(move || {
                        probe::probe_event(runner.as_ref(), &tools, &event, &output_dir)
                    });

                    match probe.await {
                        Ok(Ok(path)) => {
                            tracing::info!(worker, probe = %label, report = %path.display(), "probe written")
                        }
                        Ok(Err(e)) => tracing::warn!(worker, probe = %label, error = %e, "probe failed"),
                        Err(e) => tracing::error!(worker, error = %e, "probe task panicked"),
                    }
                }
            });
        }
    }
}
