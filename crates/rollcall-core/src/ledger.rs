//! Attendance log: the in-memory table of marks and its CSV snapshot on disk.
//!
//! Every mark rewrites the whole file (temp file + rename), so the file on
//! disk is always a complete "log so far". This is linear in the number of
//! marks, which is fine for a classroom-sized roster; an append-only writer
//! would be the fix if rosters grow large.

use chrono::{NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Timestamp format of the `Time` column.
pub const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
/// Timestamp format embedded in per-session file names.
const FILE_TIME_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";
const HEADER: [&str; 2] = ["Name", "Time"];

#[derive(Error, Debug)]
pub enum LogError {
    #[error("failed to write attendance log {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to read attendance log {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed attendance log at row {row}: {reason}")]
    Malformed { row: usize, reason: String },
}

/// One attendance mark.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    pub name: String,
    pub time: NaiveDateTime,
}

impl AttendanceRecord {
    pub fn formatted_time(&self) -> String {
        self.time.format(TIME_FORMAT).to_string()
    }
}

/// Ordered attendance table for one session, mirrored to a CSV file.
#[derive(Debug)]
pub struct AttendanceLog {
    path: PathBuf,
    records: Vec<AttendanceRecord>,
}

impl AttendanceLog {
    /// Start an empty log. Nothing touches the disk until the first mark.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            records: Vec::new(),
        }
    }

    /// Pick a file name for a session started at `started`, unique within `dir`.
    pub fn session_path(dir: &Path, started: NaiveDateTime) -> PathBuf {
        let stem = format!("attendance_{}", started.format(FILE_TIME_FORMAT));
        let mut candidate = dir.join(format!("{stem}.csv"));
        let mut n = 2;
        while candidate.exists() {
            candidate = dir.join(format!("{stem}_{n}.csv"));
            n += 1;
        }
        candidate
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn records(&self) -> &[AttendanceRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Append a mark and persist the full table before returning.
    ///
    /// Time is truncated to whole seconds. A wall clock that steps backwards
    /// is clamped to the previous mark so times never decrease.
    pub fn mark(&mut self, name: &str, time: NaiveDateTime) -> Result<AttendanceRecord, LogError> {
        let mut time = time.with_nanosecond(0).unwrap_or(time);
        if let Some(last) = self.records.last() {
            if time < last.time {
                tracing::warn!(
                    %time,
                    previous = %last.time,
                    "clock went backwards; reusing previous mark time"
                );
                time = last.time;
            }
        }

        let record = AttendanceRecord {
            name: name.to_string(),
            time,
        };
        self.persist(&record)?;

        tracing::info!(
            name = %record.name,
            time = %record.formatted_time(),
            path = %self.path.display(),
            "attendance marked"
        );
        self.records.push(record.clone());
        Ok(record)
    }

    /// Write the table plus `pending` to a temp file, then rename it over the log.
    fn persist(&self, pending: &AttendanceRecord) -> Result<(), LogError> {
        let file_name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "attendance.csv".to_string());
        let tmp = self.path.with_file_name(format!(".{file_name}.tmp"));

        let contents = render_csv(self.records.iter().chain([pending]));
        let result =
            write_synced(&tmp, contents.as_bytes()).and_then(|()| fs::rename(&tmp, &self.path));
        if let Err(source) = result {
            if tmp.exists() {
                if let Err(e) = fs::remove_file(&tmp) {
                    tracing::warn!(path = %tmp.display(), error = %e, "failed to remove temp log");
                }
            }
            return Err(LogError::Write {
                path: self.path.clone(),
                source,
            });
        }
        Ok(())
    }

    /// Read a persisted log back into records, in file order.
    pub fn load(path: &Path) -> Result<Vec<AttendanceRecord>, LogError> {
        let text = fs::read_to_string(path).map_err(|source| LogError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        parse_csv(&text)
    }
}

fn write_synced(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(contents)?;
    file.sync_all()
}

fn render_csv<'a>(records: impl IntoIterator<Item = &'a AttendanceRecord>) -> String {
    let mut out = String::new();
    out.push_str(&HEADER.join(","));
    out.push_str("\r\n");
    for record in records {
        out.push_str(&quote_field(&record.name));
        out.push(',');
        out.push_str(&record.formatted_time());
        out.push_str("\r\n");
    }
    out
}

fn quote_field(field: &str) -> String {
    if field.contains([',', '"', '\r', '\n']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

fn parse_csv(text: &str) -> Result<Vec<AttendanceRecord>, LogError> {
    let rows = split_rows(text)?;
    let mut rows = rows.into_iter().enumerate();

    match rows.next() {
        Some((_, header)) if header == HEADER => {}
        Some((_, header)) => {
            return Err(LogError::Malformed {
                row: 0,
                reason: format!("expected header Name,Time, got {}", header.join(",")),
            })
        }
        None => {
            return Err(LogError::Malformed {
                row: 0,
                reason: "missing header".into(),
            })
        }
    }

    rows.map(|(row, fields)| {
        let [name, time]: [String; 2] = fields.try_into().map_err(|fields: Vec<String>| {
            LogError::Malformed {
                row,
                reason: format!("expected 2 columns, got {}", fields.len()),
            }
        })?;
        let time = NaiveDateTime::parse_from_str(&time, TIME_FORMAT).map_err(|e| {
            LogError::Malformed {
                row,
                reason: format!("bad time {time:?}: {e}"),
            }
        })?;
        Ok(AttendanceRecord { name, time })
    })
    .collect()
}

/// Split CSV text into rows of fields (RFC 4180 quoting; blank lines ignored).
fn split_rows(text: &str) -> Result<Vec<Vec<String>>, LogError> {
    let mut rows = Vec::new();
    let mut row = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                '"' if chars.peek() == Some(&'"') => {
                    chars.next();
                    field.push('"');
                }
                '"' => in_quotes = false,
                _ => field.push(c),
            }
            continue;
        }
        match c {
            '"' => in_quotes = true,
            ',' => row.push(std::mem::take(&mut field)),
            '\r' => {}
            '\n' => {
                row.push(std::mem::take(&mut field));
                if !(row.len() == 1 && row[0].is_empty()) {
                    rows.push(std::mem::take(&mut row));
                } else {
                    row.clear();
                }
            }
            _ => field.push(c),
        }
    }

    if in_quotes {
        return Err(LogError::Malformed {
            row: rows.len(),
            reason: "unterminated quoted field".into(),
        });
    }
    if !field.is_empty() || !row.is_empty() {
        row.push(field);
        rows.push(row);
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 9, 2)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    #[test]
    fn test_nothing_written_before_first_mark() {
        let dir = tempfile::tempdir().unwrap();
        let log = AttendanceLog::new(dir.path().join("a.csv"));
        assert!(log.is_empty());
        assert!(!log.path().exists());
    }

    #[test]
    fn test_every_mark_persists_full_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.csv");
        let mut log = AttendanceLog::new(&path);

        log.mark("ALICE", at(9, 0, 0)).unwrap();
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "Name,Time\r\nALICE,2024-09-02 09:00:00\r\n"
        );

        log.mark("BOB", at(9, 0, 5)).unwrap();
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "Name,Time\r\nALICE,2024-09-02 09:00:00\r\nBOB,2024-09-02 09:00:05\r\n"
        );
        assert!(!dir.path().join(".a.csv.tmp").exists());
    }

    #[test]
    fn test_round_trip_preserves_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.csv");
        let mut log = AttendanceLog::new(&path);
        log.mark("CAROL", at(8, 59, 59)).unwrap();
        log.mark("ALICE", at(9, 0, 0)).unwrap();
        log.mark("BOB", at(9, 30, 0)).unwrap();

        let loaded = AttendanceLog::load(&path).unwrap();
        assert_eq!(loaded, log.records());
        let names: Vec<&str> = loaded.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["CAROL", "ALICE", "BOB"]);
    }

    #[test]
    fn test_names_with_commas_and_quotes_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.csv");
        let mut log = AttendanceLog::new(&path);
        log.mark("DOE, JOHN", at(9, 0, 0)).unwrap();
        log.mark("THE \"ROCK\"", at(9, 0, 1)).unwrap();

        let loaded = AttendanceLog::load(&path).unwrap();
        assert_eq!(loaded[0].name, "DOE, JOHN");
        assert_eq!(loaded[1].name, "THE \"ROCK\"");
    }

    #[test]
    fn test_subsecond_precision_truncated() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = AttendanceLog::new(dir.path().join("a.csv"));
        let precise = at(9, 0, 0).with_nanosecond(750_000_000).unwrap();
        let record = log.mark("ALICE", precise).unwrap();
        assert_eq!(record.time, at(9, 0, 0));
    }

    #[test]
    fn test_times_never_decrease() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = AttendanceLog::new(dir.path().join("a.csv"));
        log.mark("ALICE", at(9, 0, 10)).unwrap();
        log.mark("BOB", at(9, 0, 3)).unwrap();
        assert_eq!(log.records()[1].time, at(9, 0, 10));
    }

    #[test]
    fn test_failed_write_leaves_table_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = AttendanceLog::new(dir.path().join("missing-dir").join("a.csv"));
        assert!(matches!(log.mark("ALICE", at(9, 0, 0)), Err(LogError::Write { .. })));
        assert!(log.is_empty());
    }

    #[test]
    fn test_failed_rename_removes_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.csv");
        // A directory in the log's place makes the final rename fail.
        fs::create_dir(&path).unwrap();
        let mut log = AttendanceLog::new(&path);

        assert!(matches!(log.mark("ALICE", at(9, 0, 0)), Err(LogError::Write { .. })));
        assert!(log.is_empty());
        assert!(!dir.path().join(".a.csv.tmp").exists());
    }

    #[test]
    fn test_session_path_avoids_collisions() {
        let dir = tempfile::tempdir().unwrap();
        let started = at(14, 5, 9);
        let first = AttendanceLog::session_path(dir.path(), started);
        assert_eq!(first.file_name().unwrap(), "attendance_2024-09-02_14-05-09.csv");

        fs::write(&first, "Name,Time\r\n").unwrap();
        let second = AttendanceLog::session_path(dir.path(), started);
        assert_eq!(second.file_name().unwrap(), "attendance_2024-09-02_14-05-09_2.csv");
    }

    #[test]
    fn test_load_header_only_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.csv");
        fs::write(&path, "Name,Time\n").unwrap();
        assert!(AttendanceLog::load(&path).unwrap().is_empty());
    }

    #[test]
    fn test_load_rejects_bad_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.csv");
        fs::write(&path, "Who,When\nALICE,2024-09-02 09:00:00\n").unwrap();
        assert!(matches!(AttendanceLog::load(&path), Err(LogError::Malformed { row: 0, .. })));
    }

    #[test]
    fn test_load_rejects_bad_time() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.csv");
        fs::write(&path, "Name,Time\nALICE,yesterday\n").unwrap();
        assert!(matches!(AttendanceLog::load(&path), Err(LogError::Malformed { row: 1, .. })));
    }

    #[test]
    fn test_load_rejects_unterminated_quote() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.csv");
        fs::write(&path, "Name,Time\n\"ALICE,2024-09-02 09:00:00\n").unwrap();
        assert!(AttendanceLog::load(&path).is_err());
    }
}
