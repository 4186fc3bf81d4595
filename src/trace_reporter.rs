//! File-based trace reporter for fastrace.
//!
//! Appends one JSON object per finished span to a JSON Lines file. Times are
//! in microseconds so the records line up with per-request metrics.

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;

use fastrace::collector::{Reporter, SpanRecord};
use log::error;
use serde::Serialize;

pub struct JsonlReporter {
    writer: BufWriter<File>,
}

impl JsonlReporter {
    pub fn create(path: &Path) -> std::io::Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            writer: BufWriter::new(file),
        })
    }
}

#[derive(Debug, Serialize)]
struct SpanLine {
    trace_id: String,
    span_id: String,
    parent_id: String,
    name: String,
    begin_us: f64,
    duration_us: f64,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    properties: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    events: Vec<EventLine>,
}

#[derive(Debug, Serialize)]
struct EventLine {
    name: String,
    ts_us: f64,
}

impl From<SpanRecord> for SpanLine {
    fn from(span: SpanRecord) -> Self {
        Self {
            trace_id: span.trace_id.to_string(),
            span_id: span.span_id.to_string(),
            parent_id: span.parent_id.to_string(),
            name: span.name.into_owned(),
            begin_us: span.begin_time_unix_ns as f64 / 1000.0,
            duration_us: span.duration_ns as f64 / 1000.0,
            properties: span
                .properties
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            events: span
                .events
                .iter()
                .map(|e| EventLine {
                    name: e.name.to_string(),
                    ts_us: e.timestamp_unix_ns as f64 / 1000.0,
                })
                .collect(),
        }
    }
}

impl Reporter for JsonlReporter {
    fn report(&mut self, spans: Vec<SpanRecord>) {
        if spans.is_empty() {
            return;
        }

        let mut lines: Vec<SpanLine> = spans.into_iter().map(SpanLine::from).collect();
        lines.sort_by(|a, b| a.begin_us.total_cmp(&b.begin_us));

        for line in &lines {
            let written = serde_json::to_writer(&mut self.writer, line)
                .map_err(std::io::Error::from)
                .and_then(|()| self.writer.write_all(b"\n"));
            if let Err(e) = written {
                error!("Failed to write span record: {}", e);
                return;
            }
        }
        if let Err(e) = self.writer.flush() {
            error!("Failed to flush trace file: {}", e);
        }
    }
}
