//! Foundational low-level utilities shared across desk crates.
//!
//! Provides atomic file writes for snapshot persistence, an append-only JSONL
//! log used for inbound/dead-letter audit trails, and clock helpers.

pub mod atomic_io;
pub mod jsonl_log;
pub mod time_utils;

pub use atomic_io::write_text_atomic;
pub use jsonl_log::JsonlEventLog;
pub use time_utils::current_unix_timestamp_ms;

#[cfg(test)]
mod tests {
    use std::fs::read_to_string;

    use serde_json::json;

    use super::*;

    #[test]
    fn unit_current_unix_timestamp_ms_reads_wall_clock() {
        let first = current_unix_timestamp_ms();
        let second = current_unix_timestamp_ms();
        // 2020-01-01T00:00:00Z
        assert!(first > 1_577_836_800_000);
        assert!(second >= first);
    }

    #[test]
    fn functional_write_text_atomic_replaces_content_without_leftovers() {
        let tempdir = tempfile::tempdir().expect("tempdir");
        let path = tempdir.path().join("nested").join("records.json");
        write_text_atomic(&path, "first").expect("first write");
        write_text_atomic(&path, "second").expect("second write");
        let contents = read_to_string(&path).expect("read");
        assert_eq!(contents, "second");
        let entries = std::fs::read_dir(path.parent().expect("parent"))
            .expect("read dir")
            .count();
        assert_eq!(entries, 1);
    }

    #[test]
    fn regression_write_text_atomic_rejects_directory_destination() {
        let tempdir = tempfile::tempdir().expect("tempdir");
        let error = write_text_atomic(tempdir.path(), "x").expect_err("directory should fail");
        assert!(error.to_string().contains("is a directory"));
    }

    #[test]
    fn functional_jsonl_event_log_appends_one_line_per_entry() {
        let tempdir = tempfile::tempdir().expect("tempdir");
        let path = tempdir.path().join("logs").join("events.jsonl");
        let log = JsonlEventLog::open(path.clone()).expect("open log");
        log.append(&json!({"event_id": "Ev1"})).expect("append first");
        log.append(&json!({"event_id": "Ev2"})).expect("append second");

        let raw = read_to_string(&path).expect("read log");
        let lines = raw.lines().collect::<Vec<_>>();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("Ev1"));
        assert!(lines[1].contains("Ev2"));
        assert_eq!(log.path(), path.as_path());
    }
}
