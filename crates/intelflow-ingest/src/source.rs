//! Frame source adapters.
//!
//! Sources produce already-split `(topic, payload)` frames for the dispatch
//! loop; the transport proper (subscription, reconnects, delivery) lives
//! outside this daemon. [`FileSource`] replays newline-delimited frame files
//! and [`StdinSource`] consumes a transport bridge piped into the process.

use crate::error::{Error, Result};
use intelflow_core::{Error as CoreError, Frame};
use std::fs::{self, File};
use std::io::{BufRead, BufReader};
use std::path::PathBuf;

/// A source of inbound frames.
///
/// The handler receives parsed frames one at a time. It returns `Ok(true)`
/// to continue processing, `Ok(false)` to stop gracefully, or `Err` to
/// abort with an error.
pub trait FrameSource {
    /// Human-readable name for this source (used in logs).
    fn name(&self) -> &'static str;

    /// Process frames from this source, calling the handler for each one.
    fn process<F>(&mut self, handler: F) -> Result<SourceStats>
    where
        F: FnMut(Frame) -> Result<bool>;
}

/// Error tolerance applied while reading frames.
#[derive(Debug, Clone)]
pub struct SourceOptions {
    /// Log and skip malformed frames instead of aborting.
    pub continue_on_error: bool,

    /// Abort on unknown topics instead of dropping them.
    pub strict_topics: bool,
}

impl Default for SourceOptions {
    fn default() -> Self {
        Self {
            continue_on_error: true,
            strict_topics: false,
        }
    }
}

/// Statistics from processing a frame source.
#[derive(Debug, Clone, Default)]
pub struct SourceStats {
    /// Lines seen, excluding blanks.
    pub total_frames: usize,

    /// Frames that parsed and were handed to the handler.
    pub valid_frames: usize,

    /// Frames dropped for an unknown topic.
    pub unknown_topics: usize,

    /// Frames dropped as malformed (bad split or bad JSON).
    pub malformed: usize,

    /// For file sources: number of files processed.
    pub files_processed: Option<usize>,
}

/// Shared per-line processing for both sources.
///
/// Returns `Ok(true)` to keep reading, `Ok(false)` when the handler asked
/// to stop.
fn process_line<F>(
    line: &str,
    options: &SourceOptions,
    stats: &mut SourceStats,
    handler: &mut F,
) -> Result<bool>
where
    F: FnMut(Frame) -> Result<bool>,
{
    let line = line.trim();
    if line.is_empty() {
        return Ok(true);
    }
    stats.total_frames += 1;

    match Frame::parse(line) {
        Ok(frame) => {
            stats.valid_frames += 1;
            handler(frame)
        }
        Err(CoreError::UnknownTopic(topic)) => {
            stats.unknown_topics += 1;
            metrics::counter!("dispatch_unknown_topic_total").increment(1);
            if options.strict_topics {
                return Err(CoreError::UnknownTopic(topic).into());
            }
            tracing::warn!(topic, "unknown topic, frame dropped");
            Ok(true)
        }
        Err(e) => {
            stats.malformed += 1;
            metrics::counter!("dispatch_malformed_total").increment(1);
            if !options.continue_on_error {
                return Err(e.into());
            }
            tracing::warn!("malformed frame skipped: {}", e);
            Ok(true)
        }
    }
}

/// Replays frames from a file, or from every file in a directory.
pub struct FileSource {
    input: PathBuf,
    options: SourceOptions,
}

impl FileSource {
    pub fn new(input: PathBuf, options: SourceOptions) -> Self {
        Self { input, options }
    }

    /// Collect files to process based on the input path.
    fn collect_files(&self) -> Result<Vec<PathBuf>> {
        let input = &self.input;

        if input.is_file() {
            return Ok(vec![input.clone()]);
        }
        if input.is_dir() {
            let mut files: Vec<_> = fs::read_dir(input)?
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| p.is_file())
                .collect();
            // Sort for deterministic processing order
            files.sort();
            return Ok(files);
        }

        Err(Error::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("Input path does not exist: {}", input.display()),
        )))
    }
}

impl FrameSource for FileSource {
    fn name(&self) -> &'static str {
        "file"
    }

    fn process<F>(&mut self, mut handler: F) -> Result<SourceStats>
    where
        F: FnMut(Frame) -> Result<bool>,
    {
        let files = self.collect_files()?;
        let mut stats = SourceStats {
            files_processed: Some(0),
            ..Default::default()
        };

        'files: for path in &files {
            tracing::info!("Reading frames from {}", path.display());
            let reader = BufReader::new(File::open(path)?);

            for line_result in reader.lines() {
                let line = match line_result {
                    Ok(line) => line,
                    Err(e) => {
                        stats.malformed += 1;
                        if self.options.continue_on_error {
                            tracing::warn!("I/O error mid-file: {}", e);
                            continue;
                        }
                        return Err(Error::Io(e));
                    }
                };

                if !process_line(&line, &self.options, &mut stats, &mut handler)? {
                    break 'files;
                }
            }

            if let Some(n) = stats.files_processed.as_mut() {
                *n += 1;
            }
        }

        Ok(stats)
    }
}

/// Consumes frames from standard input until EOF.
pub struct StdinSource {
    options: SourceOptions,
}

impl StdinSource {
    pub fn new(options: SourceOptions) -> Self {
        Self { options }
    }
}

impl FrameSource for StdinSource {
    fn name(&self) -> &'static str {
        "stdin"
    }

    fn process<F>(&mut self, mut handler: F) -> Result<SourceStats>
    where
        F: FnMut(Frame) -> Result<bool>,
    {
        let stdin = std::io::stdin();
        let mut stats = SourceStats::default();

        for line_result in stdin.lock().lines() {
            let line = line_result?;
            if !process_line(&line, &self.options, &mut stats, &mut handler)? {
                break;
            }
        }

        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use intelflow_core::Topic;
    use std::io::Write;

    fn write_frames(dir: &std::path::Path, name: &str, frames: &[&str]) -> PathBuf {
        let path = dir.join(name);
        let mut file = File::create(&path).unwrap();
        for frame in frames {
            writeln!(file, "{frame}").unwrap();
        }
        path
    }

    #[test]
    fn file_source_replays_frames_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_frames(
            dir.path(),
            "frames.txt",
            &[
                r#"intel_json_self {"uptime": 1}"#,
                "",
                r#"intel_json_sighting {"org": "A", "categ": "Other", "action": "add"}"#,
            ],
        );

        let mut seen = Vec::new();
        let mut source = FileSource::new(path, SourceOptions::default());
        let stats = source
            .process(|frame| {
                seen.push(frame.topic);
                Ok(true)
            })
            .unwrap();

        assert_eq!(stats.total_frames, 2);
        assert_eq!(stats.valid_frames, 2);
        assert_eq!(stats.files_processed, Some(1));
        assert_eq!(seen, vec![Topic::Keepalive, Topic::Sighting]);
    }

    #[test]
    fn directory_input_processes_files_sorted() {
        let dir = tempfile::tempdir().unwrap();
        write_frames(dir.path(), "b.txt", &[r#"intel_json_self {"uptime": 2}"#]);
        write_frames(dir.path(), "a.txt", &[r#"intel_json_self {"uptime": 1}"#]);

        let mut uptimes = Vec::new();
        let mut source = FileSource::new(dir.path().to_path_buf(), SourceOptions::default());
        let stats = source
            .process(|frame| {
                uptimes.push(frame.payload["uptime"].as_i64().unwrap());
                Ok(true)
            })
            .unwrap();

        assert_eq!(stats.files_processed, Some(2));
        assert_eq!(uptimes, vec![1, 2]);
    }

    #[test]
    fn malformed_frames_are_skipped_and_counted() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_frames(
            dir.path(),
            "frames.txt",
            &[
                "intel_json_self not-json",
                "no_payload_at_all_json",
                r#"intel_json_self {"uptime": 1}"#,
            ],
        );

        let mut count = 0;
        let mut source = FileSource::new(path, SourceOptions::default());
        let stats = source
            .process(|_| {
                count += 1;
                Ok(true)
            })
            .unwrap();

        assert_eq!(stats.malformed, 2);
        assert_eq!(stats.valid_frames, 1);
        assert_eq!(count, 1);
    }

    #[test]
    fn unknown_topics_are_dropped_unless_strict() {
        let dir = tempfile::tempdir().unwrap();
        let frames = [r#"intel_json_widget {"x": 1}"#, r#"intel_json_self {"uptime": 1}"#];
        let path = write_frames(dir.path(), "frames.txt", &frames);

        let mut source = FileSource::new(path.clone(), SourceOptions::default());
        let stats = source.process(|_| Ok(true)).unwrap();
        assert_eq!(stats.unknown_topics, 1);
        assert_eq!(stats.valid_frames, 1);

        let mut strict = FileSource::new(
            path,
            SourceOptions {
                strict_topics: true,
                ..Default::default()
            },
        );
        assert!(strict.process(|_| Ok(true)).is_err());
    }

    #[test]
    fn handler_can_stop_the_source() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_frames(
            dir.path(),
            "frames.txt",
            &[
                r#"intel_json_self {"uptime": 1}"#,
                r#"intel_json_self {"uptime": 2}"#,
            ],
        );

        let mut count = 0;
        let mut source = FileSource::new(path, SourceOptions::default());
        let stats = source
            .process(|_| {
                count += 1;
                Ok(false)
            })
            .unwrap();

        assert_eq!(count, 1);
        assert_eq!(stats.valid_frames, 1);
    }

    #[test]
    fn missing_input_is_an_error() {
        let mut source = FileSource::new(PathBuf::from("/nonexistent/path"), SourceOptions::default());
        assert!(source.process(|_| Ok(true)).is_err());
    }
}
