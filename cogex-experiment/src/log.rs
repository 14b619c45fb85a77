use crate::config::Delimiter;
use crate::error::Result;
use crate::response::ResponseWindow;
use cogex_core::{ReferenceTimes, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// One entry of a trial's log.
#[derive(Debug, Clone, PartialEq)]
pub enum LogEntry {
    Value(Value),
    Response(ResponseWindow),
}

impl LogEntry {
    /// Absolute time this entry can anchor, if any.
    pub fn anchor_time(&self) -> Option<f64> {
        match self {
            LogEntry::Value(v) => v.as_f64(),
            LogEntry::Response(r) => r.response_time(),
        }
    }
}

/// Per-trial log: contributed values, `trial_start`, and response windows
/// under their labels.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrialLog {
    entries: BTreeMap<String, LogEntry>,
}

impl TrialLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Logs a value under `key`. A response already logged under that key
    /// is kept and the value dropped.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        let key = key.into();
        if let Some(LogEntry::Response(_)) = self.entries.get(&key) {
            tracing::warn!(%key, "value not logged: key holds a response");
            return;
        }
        self.entries.insert(key, LogEntry::Value(value.into()));
    }

    pub fn insert_response(&mut self, window: ResponseWindow) {
        self.entries
            .insert(window.label().to_owned(), LogEntry::Response(window));
    }

    pub fn get(&self, key: &str) -> Option<&LogEntry> {
        self.entries.get(key)
    }

    pub fn value(&self, key: &str) -> Option<&Value> {
        match self.entries.get(key)? {
            LogEntry::Value(v) => Some(v),
            LogEntry::Response(_) => None,
        }
    }

    pub fn response(&self, label: &str) -> Option<&ResponseWindow> {
        match self.entries.get(label)? {
            LogEntry::Response(r) => Some(r),
            LogEntry::Value(_) => None,
        }
    }

    pub fn response_mut(&mut self, label: &str) -> Option<&mut ResponseWindow> {
        match self.entries.get_mut(label)? {
            LogEntry::Response(r) => Some(r),
            LogEntry::Value(_) => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> + '_ {
        self.entries.keys().map(String::as_str)
    }

    /// Responses become `label.field` columns; values keep their key.
    pub fn flatten(&self) -> BTreeMap<String, Value> {
        let mut row = BTreeMap::new();
        for (key, entry) in &self.entries {
            match entry {
                LogEntry::Value(v) => {
                    row.insert(key.clone(), v.clone());
                }
                LogEntry::Response(r) => {
                    for (field, v) in r.log_fields() {
                        row.insert(format!("{key}.{field}"), v);
                    }
                }
            }
        }
        row
    }
}

impl ReferenceTimes for TrialLog {
    fn reference_time(&self, reference: &str) -> Option<f64> {
        self.entries.get(reference)?.anchor_time()
    }
}

/// The consolidated, rectangular experiment log.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LogTable {
    header: Vec<String>,
    rows: Vec<BTreeMap<String, Value>>,
}

impl LogTable {
    pub fn from_logs<'a>(logs: impl IntoIterator<Item = &'a TrialLog>) -> Self {
        let rows: Vec<_> = logs.into_iter().map(TrialLog::flatten).collect();
        let header: BTreeSet<&String> = rows.iter().flat_map(|r| r.keys()).collect();
        Self {
            header: header.into_iter().cloned().collect(),
            rows,
        }
    }

    /// Sorted union of every row's keys.
    pub fn header(&self) -> &[String] {
        &self.header
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Row cells in header order; `Value::Null` where a trial lacks the key.
    pub fn row(&self, index: usize) -> Option<Vec<&Value>> {
        const MISSING: &Value = &Value::Null;
        let row = self.rows.get(index)?;
        Some(
            self.header
                .iter()
                .map(|key| row.get(key).unwrap_or(MISSING))
                .collect(),
        )
    }

    pub fn rows(&self) -> impl Iterator<Item = Vec<&Value>> + '_ {
        (0..self.rows.len()).filter_map(|i| self.row(i))
    }

    /// Header line then one line per trial, each ending in a newline.
    pub fn write_delimited<W: Write>(&self, mut out: W, delimiter: Delimiter) -> Result<()> {
        let sep = delimiter.as_char();
        write_line(&mut out, self.header.iter().map(String::as_str), sep)?;
        for row in self.rows() {
            let cells: Vec<String> = row.iter().map(|v| v.to_string()).collect();
            write_line(&mut out, cells.iter().map(String::as_str), sep)?;
        }
        out.flush()?;
        Ok(())
    }

    /// One JSON object per trial, missing keys as `null`.
    pub fn write_json<W: Write>(&self, out: W) -> Result<()> {
        let records: Vec<BTreeMap<&str, &Value>> = self
            .rows()
            .map(|cells| {
                self.header
                    .iter()
                    .map(String::as_str)
                    .zip(cells)
                    .collect()
            })
            .collect();
        serde_json::to_writer_pretty(out, &records)?;
        Ok(())
    }

    pub fn save(&self, path: &Path, delimiter: Delimiter) -> Result<()> {
        let file = File::create(path)?;
        self.write_delimited(BufWriter::new(file), delimiter)?;
        tracing::info!(path = %path.display(), rows = self.len(), "trial log written");
        Ok(())
    }
}

fn write_line<'a, W: Write>(
    out: &mut W,
    cells: impl Iterator<Item = &'a str>,
    sep: char,
) -> std::io::Result<()> {
    let mut line = String::new();
    for (i, cell) in cells.enumerate() {
        if i > 0 {
            line.push(sep);
        }
        push_cell(&mut line, cell, sep);
    }
    line.push('\n');
    out.write_all(line.as_bytes())
}

/// Quotes a cell only when it contains the separator, a quote or a line break.
fn push_cell(line: &mut String, cell: &str, sep: char) {
    if cell.contains([sep, '"', '\n', '\r']) {
        line.push('"');
        line.push_str(&cell.replace('"', "\"\""));
        line.push('"');
    } else {
        line.push_str(cell);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::Input;

    fn captured(label: &str, opened: f64, latency: f64, key: &str) -> ResponseWindow {
        let mut w = ResponseWindow::new(label);
        w.open(opened);
        w.poll(opened + latency, &[Input::key(key)]);
        w
    }

    #[test]
    fn response_resolves_as_anchor_once_captured() {
        let mut log = TrialLog::new();
        let mut w = ResponseWindow::new("press");
        w.open(11.5);
        log.insert_response(w);
        assert_eq!(log.reference_time("press"), None);

        log.response_mut("press").unwrap().poll(12.0, &[Input::key("z")]);
        assert_eq!(log.reference_time("press"), Some(12.0));

        let after = cogex_core::RelativeTime::new("press", 0.3).unwrap();
        assert!((after.resolve(&log).unwrap() - 12.3).abs() < 1e-9);
    }

    #[test]
    fn value_never_replaces_response() {
        let mut log = TrialLog::new();
        log.insert_response(captured("press", 0.0, 0.4, "z"));
        log.insert("press", "oops");
        let press = log.response("press").unwrap();
        assert_eq!(press.captured_input(), Some(&Input::key("z")));
        assert_eq!(log.value("press"), None);
    }

    #[test]
    fn text_values_do_not_anchor() {
        let mut log = TrialLog::new();
        log.insert("condition", "congruent");
        log.insert("cue", 1.5);
        assert_eq!(log.reference_time("condition"), None);
        assert_eq!(log.reference_time("cue"), Some(1.5));
    }

    #[test]
    fn table_is_rectangular() {
        let mut a = TrialLog::new();
        a.insert("trial_start", 0.0);
        a.insert("type", "text");
        a.insert_response(captured("press", 1.0, 0.5, "z"));

        let mut b = TrialLog::new();
        b.insert("trial_start", 3.0);
        b.insert("subject", "s1");

        let table = LogTable::from_logs([&a, &b]);
        assert_eq!(
            table.header(),
            [
                "press.ref_time",
                "press.response",
                "press.rt",
                "subject",
                "trial_start",
                "type"
            ]
        );
        assert_eq!(table.len(), 2);
        for row in table.rows() {
            assert_eq!(row.len(), table.header().len());
        }
        assert_eq!(table.row(1).unwrap()[0], &Value::Null);
    }

    #[test]
    fn delimited_output() {
        let mut a = TrialLog::new();
        a.insert("trial_start", 0.0);
        a.insert("word", "a,b");
        let mut b = TrialLog::new();
        b.insert("trial_start", 2.5);

        let table = LogTable::from_logs([&a, &b]);
        let mut csv = Vec::new();
        table.write_delimited(&mut csv, Delimiter::Comma).unwrap();
        assert_eq!(
            String::from_utf8(csv).unwrap(),
            "trial_start,word\n0,\"a,b\"\n2.5,\n"
        );

        let mut tsv = Vec::new();
        table.write_delimited(&mut tsv, Delimiter::Tab).unwrap();
        assert_eq!(String::from_utf8(tsv).unwrap(), "trial_start\tword\n0\ta,b\n2.5\t\n");
    }

    #[test]
    fn json_records_fill_missing_with_null() {
        let mut a = TrialLog::new();
        a.insert("x", 1.0);
        let mut b = TrialLog::new();
        b.insert("y", "q");
        let table = LogTable::from_logs([&a, &b]);
        let mut out = Vec::new();
        table.write_json(&mut out).unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(parsed[0]["y"], serde_json::Value::Null);
        assert_eq!(parsed[1]["y"], "q");
    }
}
