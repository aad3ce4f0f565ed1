//! Streaming reduction of a raw event log into per-process summaries.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;

use serde_json::{Map, Value};
use tracing::debug;

use super::event::BehaviorEvent;
use super::risk;
use super::stats::{PerProcessStats, ProcessSummary};

/// Longest event line that is parsed; longer lines are skipped unread.
pub const MAX_LINE_BYTES: u64 = 1024 * 1024;

/// Substring patterns for file paths that are counted as noise, not signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NoiseFilter {
    patterns: Vec<String>,
}

impl NoiseFilter {
    pub fn new(patterns: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            patterns: patterns.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_noise(&self, path: &str) -> bool {
        self.patterns.iter().any(|p| path.contains(p.as_str()))
    }
}

impl Default for NoiseFilter {
    /// Vendor dependency cache paths.
    fn default() -> Self {
        Self::new(["node_modules"])
    }
}

/// Accumulator for one event stream.
///
/// Each package gets its own instance; nothing is shared between
/// concurrent aggregations.
#[derive(Debug, Default)]
pub struct ProcessAggregator {
    processes: BTreeMap<String, ProcessSummary>,
    total_events: u64,
    skipped_lines: u64,
    noise: NoiseFilter,
}

impl ProcessAggregator {
    pub fn new(noise: NoiseFilter) -> Self {
        Self {
            noise,
            ..Self::default()
        }
    }

    pub fn total_events(&self) -> u64 {
        self.total_events
    }

    pub fn skipped_lines(&self) -> u64 {
        self.skipped_lines
    }

    /// Feeds one raw line. Blank and malformed lines are skipped, never fatal.
    pub fn ingest_line(&mut self, line: &[u8]) {
        let trimmed = trim_whitespace(line);
        if trimmed.is_empty() {
            return;
        }
        match serde_json::from_slice::<BehaviorEvent>(trimmed) {
            Ok(event) => self.ingest(&event),
            Err(err) => {
                self.skipped_lines += 1;
                debug!(error = %err, "Skipping malformed event line");
            }
        }
    }

    pub fn ingest(&mut self, event: &BehaviorEvent) {
        self.total_events += 1;
        let summary = self.processes.entry(event.process_key()).or_default();
        *summary
            .syscall_profile
            .entry(event.event_name.clone())
            .or_default() += 1;

        match event.event_name.as_str() {
            "openat" => {
                if let Some(path) = event.str_arg("pathname") {
                    if !self.noise.is_noise(path) {
                        *summary.file_access.entry(path.to_string()).or_default() += 1;
                    }
                }
            }
            "execve" => {
                if let Some(path) = event.str_arg("pathname") {
                    *summary
                        .executed_commands
                        .entry(path.to_string())
                        .or_default() += 1;
                }
            }
            "connect" => {
                if let Some(key) = event.arg("addr").and_then(connection_key) {
                    *summary.network_activity.ips.entry(key).or_default() += 1;
                }
            }
            "net_packet_dns_request" => {
                let queries = event
                    .arg("dns_questions")
                    .and_then(Value::as_array)
                    .into_iter()
                    .flatten()
                    .filter_map(|q| q.get("query").and_then(Value::as_str));
                for query in queries {
                    *summary
                        .network_activity
                        .dns_records
                        .entry(query.to_string())
                        .or_default() += 1;
                }
            }
            _ => {}
        }
    }

    /// Folds a whole line-delimited stream into the accumulator.
    ///
    /// Only reader I/O failures are errors; content problems are skipped.
    /// At most [`MAX_LINE_BYTES`] of a line are buffered.
    pub fn read_from<R: BufRead>(&mut self, mut reader: R) -> std::io::Result<()> {
        let mut buf = Vec::new();
        loop {
            buf.clear();
            let read = (&mut reader)
                .take(MAX_LINE_BYTES)
                .read_until(b'\n', &mut buf)?;
            if read == 0 {
                break;
            }
            if read as u64 == MAX_LINE_BYTES && buf.last() != Some(&b'\n') {
                discard_line(&mut reader)?;
                self.skipped_lines += 1;
                debug!(limit = MAX_LINE_BYTES, "Skipping over-long event line");
                continue;
            }
            self.ingest_line(&buf);
        }
        Ok(())
    }

    pub fn finish(self, collection: impl Into<String>) -> PerProcessStats {
        let risk_flags = risk::evaluate(self.processes.values());
        PerProcessStats {
            collection: collection.into(),
            count_processes: self.processes.len(),
            per_process: self.processes,
            total_events: self.total_events,
            risk_flags,
        }
    }
}

/// Aggregates a `behavior.jsonl` file.
pub fn aggregate_file(
    path: &Path,
    collection: &str,
    noise: &NoiseFilter,
) -> std::io::Result<PerProcessStats> {
    let mut aggregator = ProcessAggregator::new(noise.clone());
    aggregator.read_from(BufReader::new(File::open(path)?))?;
    debug!(
        path = %path.display(),
        events = aggregator.total_events(),
        skipped = aggregator.skipped_lines(),
        "Aggregated event log"
    );
    Ok(aggregator.finish(collection))
}

/// `ip` or `ip:port` for a connect address; `None` for local-domain sockets.
fn connection_key(addr: &Value) -> Option<String> {
    match addr {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Object(map) => {
            if map.get("sa_family").and_then(Value::as_str) == Some("AF_UNIX") {
                return None;
            }
            let ip = first_scalar(map, &["sin_addr", "sin6_addr", "ip"])?;
            let port = first_scalar(map, &["sin_port", "sin6_port", "port"]);
            let host = if ip.contains(':') {
                format!("[{}]", ip)
            } else {
                ip.clone()
            };
            Some(match port {
                Some(p) if !p.is_empty() && p != "0" => format!("{}:{}", host, p),
                _ => ip,
            })
        }
        _ => None,
    }
}

/// Consumes the rest of the current line without buffering it.
fn discard_line<R: BufRead>(reader: &mut R) -> std::io::Result<()> {
    loop {
        let available = reader.fill_buf()?;
        if available.is_empty() {
            return Ok(());
        }
        match available.iter().position(|&b| b == b'\n') {
            Some(i) => {
                reader.consume(i + 1);
                return Ok(());
            }
            None => {
                let n = available.len();
                reader.consume(n);
            }
        }
    }
}

fn trim_whitespace(bytes: &[u8]) -> &[u8] {
    let start = bytes
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(bytes.len());
    let end = bytes
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(start, |i| i + 1);
    &bytes[start..end.max(start)]
}

fn first_scalar(map: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|k| match map.get(*k)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}
