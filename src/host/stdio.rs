//! Stdin/stdout JSON bridge.
//!
//! Reads newline-delimited JSON [`HostEvent`]s from stdin and writes every
//! [`TrackerEvent`] as a JSON line to stdout. Stdout is reserved for the
//! protocol; diagnostics go to stderr.

use crate::error::Result;
use crate::host::HostEvent;
use crate::scheduler::completion::TrackerEvent;
use crate::scheduler::runner::Scheduler;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};
use tokio::sync::Mutex;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio_util::sync::CancellationToken;

/// Run the bridge on the process's stdin and stdout until stdin closes.
///
/// EOF is treated as [`HostEvent::ShuttingDown`].
pub async fn run_stdio_bridge(scheduler: Scheduler) -> Result<()> {
    let reader = BufReader::new(tokio::io::stdin());
    let writer = BufWriter::new(tokio::io::stdout());
    run_bridge(scheduler, reader, writer).await
}

/// Bridge over arbitrary streams.
pub async fn run_bridge<R, W>(scheduler: Scheduler, mut reader: R, writer: W) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let writer = Arc::new(Mutex::new(writer));
    let stop = CancellationToken::new();

    let mut events = scheduler.subscribe();
    let forward_writer = Arc::clone(&writer);
    let forward_stop = stop.clone();
    let forwarder = tokio::spawn(async move {
        loop {
            tokio::select! {
                received = events.recv() => match received {
                    Ok(event) => {
                        if !write_event(&forward_writer, &event).await {
                            return;
                        }
                    }
                    Err(RecvError::Lagged(n)) => {
                        tracing::warn!(lagged = n, "event forwarder lagged, events dropped");
                    }
                    Err(RecvError::Closed) => return,
                },
                _ = forward_stop.cancelled() => {
                    // Drain what was published before shutdown.
                    loop {
                        match events.try_recv() {
                            Ok(event) => {
                                if !write_event(&forward_writer, &event).await {
                                    return;
                                }
                            }
                            Err(TryRecvError::Lagged(_)) => continue,
                            Err(_) => return,
                        }
                    }
                }
            }
        }
    });

    let mut line = String::new();
    let read_result = loop {
        line.clear();
        let bytes_read = match reader.read_line(&mut line).await {
            Ok(n) => n,
            Err(e) => break Err(e.into()),
        };
        if bytes_read == 0 {
            tracing::info!("stdin closed (EOF); shutting down");
            break Ok(());
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        match serde_json::from_str::<HostEvent>(trimmed) {
            Ok(HostEvent::ShuttingDown) => break Ok(()),
            Ok(event) => scheduler.handle_event(event).await,
            Err(e) => {
                tracing::warn!(error = %e, raw_line = %trimmed, "failed to parse host event");
            }
        }
    };

    scheduler.handle_event(HostEvent::ShuttingDown).await;
    stop.cancel();
    let _ = forwarder.await;
    writer.lock().await.flush().await?;
    read_result
}

/// Returns `false` once the writer is broken.
async fn write_event<W>(writer: &Mutex<W>, event: &TrackerEvent) -> bool
where
    W: AsyncWrite + Unpin,
{
    let json = match serde_json::to_string(event) {
        Ok(json) => json,
        Err(e) => {
            tracing::error!(error = %e, "failed to serialize tracker event; skipping");
            return true;
        }
    };
    let mut w = writer.lock().await;
    let result = async {
        w.write_all(json.as_bytes()).await?;
        w.write_all(b"\n").await?;
        w.flush().await
    }
    .await;
    if let Err(e) = result {
        tracing::warn!(error = %e, "failed to write tracker event; stopping forwarder");
        return false;
    }
    true
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::client::RemoteTaskClient;
    use crate::client::mock::MockTaskClient;
    use crate::config::SchedulerConfig;
    use crate::scheduler::tasks::{Task, TaskKind, TaskTarget};
    use chrono::Utc;
    use tokio::io::AsyncReadExt;

    #[tokio::test(start_paused = true)]
    async fn eof_stops_trackers_and_reports_them() {
        let task = Task::new("p", TaskKind::Heartbeat, TaskTarget::new(900.0, 930.0))
            .enrolled(Utc::now());
        let client: Arc<dyn RemoteTaskClient> =
            Arc::new(MockTaskClient::new().with_task(task.clone()));
        let scheduler = Scheduler::new(&SchedulerConfig::default(), client).unwrap();

        let input = format!(
            "{}\nnot json\n",
            serde_json::to_string(&HostEvent::TaskEnrolled { task }).unwrap()
        );
        let (bridge_out, mut test_in) = tokio::io::duplex(64 * 1024);

        run_bridge(scheduler.clone(), input.as_bytes(), bridge_out)
            .await
            .unwrap();

        let mut output = String::new();
        test_in.read_to_string(&mut output).await.unwrap();
        let last: serde_json::Value =
            serde_json::from_str(output.lines().last().unwrap()).unwrap();
        assert_eq!(last["event"], "stopped");
        assert_eq!(last["task_id"], "p");
        assert_eq!(last["reason"], "shutdown");
        assert!(scheduler.persisted().contains("p"));
    }
}
