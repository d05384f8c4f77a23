//! Outbound notification writer.
//!
//! Publications are fire-and-forget from the dispatch loop's perspective:
//! the [`ChannelPublisher`] hands each envelope to a background thread over
//! a channel, and the [`OutboundWriter`] drains that channel into a JSONL
//! sink — one `{channel, name, log, zmqName}` record per line. The loop is
//! never blocked on the sink.

use crate::error::{Error, Result};
use crate::store::Publisher;
use crossbeam_channel::{Receiver, Sender};
use serde_json::Value;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// One queued publication.
#[derive(Debug, Clone)]
struct Outbound {
    channel: String,
    payload: Value,
}

/// Publisher half: enqueues envelopes for the background writer.
pub struct ChannelPublisher {
    sender: Sender<Outbound>,
}

impl Publisher for ChannelPublisher {
    fn publish(&self, channel: &str, payload: Value) {
        let outbound = Outbound {
            channel: channel.to_string(),
            payload,
        };
        if self.sender.send(outbound).is_err() {
            metrics::counter!("publish_errors_total").increment(1);
            tracing::warn!(channel, "outbound writer gone, notification dropped");
        }
    }
}

/// Background writer draining published envelopes to a JSONL file.
pub struct OutboundWriter {
    handle: Option<thread::JoinHandle<()>>,
    running: Arc<AtomicBool>,
    written: Arc<AtomicUsize>,
}

impl OutboundWriter {
    /// Open `path` for appending and start the writer thread.
    ///
    /// Returns the publisher half alongside the writer handle.
    pub fn spawn(path: &Path) -> Result<(ChannelPublisher, OutboundWriter)> {
        let file = File::options()
            .create(true)
            .append(true)
            .open(path)
            .map_err(Error::Io)?;

        let (sender, receiver) = crossbeam_channel::unbounded::<Outbound>();
        let running = Arc::new(AtomicBool::new(true));
        let written = Arc::new(AtomicUsize::new(0));

        let thread_running = Arc::clone(&running);
        let thread_written = Arc::clone(&written);
        let thread_path: PathBuf = path.to_path_buf();

        let handle = thread::spawn(move || {
            tracing::info!("Outbound writer started: {}", thread_path.display());
            Self::drain(receiver, file, &thread_running, &thread_written);
            tracing::info!("Outbound writer stopped");
        });

        Ok((
            ChannelPublisher { sender },
            OutboundWriter {
                handle: Some(handle),
                running,
                written,
            },
        ))
    }

    fn drain(
        receiver: Receiver<Outbound>,
        file: File,
        running: &AtomicBool,
        written: &AtomicUsize,
    ) {
        let mut writer = BufWriter::new(file);

        loop {
            match receiver.recv_timeout(Duration::from_secs(1)) {
                Ok(outbound) => {
                    let record = serde_json::json!({
                        "channel": outbound.channel,
                        "payload": outbound.payload,
                    });
                    match serde_json::to_string(&record) {
                        Ok(line) => {
                            if let Err(e) = writeln!(writer, "{line}") {
                                metrics::counter!("publish_errors_total").increment(1);
                                tracing::error!("Failed to write notification: {}", e);
                            } else {
                                written.fetch_add(1, Ordering::Relaxed);
                            }
                        }
                        Err(e) => {
                            metrics::counter!("publish_errors_total").increment(1);
                            tracing::error!("Failed to serialize notification: {}", e);
                        }
                    }
                }
                Err(crossbeam_channel::RecvTimeoutError::Timeout) => {
                    // Drop out once the stop flag is down and the queue is dry
                    if !running.load(Ordering::SeqCst) {
                        break;
                    }
                    if let Err(e) = writer.flush() {
                        tracing::warn!("Flush error on outbound sink: {}", e);
                    }
                }
                Err(crossbeam_channel::RecvTimeoutError::Disconnected) => {
                    tracing::info!("Publish channel disconnected, stopping writer");
                    break;
                }
            }
        }

        if let Err(e) = writer.flush() {
            tracing::warn!("Final flush error on outbound sink: {}", e);
        }
    }

    /// Number of records written so far.
    pub fn written(&self) -> usize {
        self.written.load(Ordering::Relaxed)
    }

    /// Signal the writer to stop and wait for it to drain.
    ///
    /// Returns the total number of records written.
    pub fn stop(mut self) -> usize {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::warn!("Outbound writer thread panicked");
            }
        }
        self.written.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn writes_one_record_per_publication() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.jsonl");

        let (publisher, writer) = OutboundWriter::spawn(&path).unwrap();
        publisher.publish("intelflow:log", json!({"name": "Attribute", "log": "[]"}));
        publisher.publish("intelflow:mapDispatch", json!({"categ": "Network activity"}));

        // Dropping the publisher disconnects the channel; the writer drains
        // what is queued before stopping.
        drop(publisher);
        let written = writer.stop();
        assert_eq!(written, 2);

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["channel"], "intelflow:log");
        assert_eq!(first["payload"]["name"], "Attribute");
    }

    #[test]
    fn stop_without_publications_is_clean() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.jsonl");

        let (publisher, writer) = OutboundWriter::spawn(&path).unwrap();
        drop(publisher);
        assert_eq!(writer.stop(), 0);
    }
}
