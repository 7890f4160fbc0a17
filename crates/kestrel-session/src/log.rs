// SPDX-License-Identifier: Apache-2.0
use std::fs::{self, File};
use std::io::{BufRead, BufReader, Write};
use std::path::Path;

use chrono::Utc;
use serde::de::Error as _;
use serde::{Deserialize, Serialize};

use crate::entry::{Entry, MessageContent, MessageRole};
use crate::store::{EntryStore, SessionHeader, CURRENT_VERSION};
use crate::SessionError;

/// A single line in a session file: either the header (always first) or one
/// entry. Tagged so `load` can tell them apart without positional
/// assumptions surviving a future format change.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "record")]
enum Record {
    #[serde(rename = "header")]
    Header(SessionHeader),
    #[serde(rename = "entry")]
    EntryRecord(Entry),
}

/// Crash-safe append/snapshot persistence of an `EntryStore` to a
/// line-delimited record file (spec §4.B).
pub struct SessionLog;

impl SessionLog {
    /// Serialize `store` to a sibling temp file, fsync, then rename over
    /// `path`. On any failure the temp file is removed and `path`'s
    /// existing content (if any) is left untouched.
    pub fn save(path: &Path, store: &EntryStore) -> Result<(), SessionError> {
        let tmp_path = sibling_tmp_path(path);
        let result = (|| -> Result<(), SessionError> {
            let mut file = File::create(&tmp_path)?;
            let header_line = serde_json::to_string(&Record::Header(store.header.clone()))?;
            writeln!(file, "{header_line}")?;
            for entry in store.entries() {
                let line = serde_json::to_string(&Record::EntryRecord(entry.clone()))?;
                writeln!(file, "{line}")?;
            }
            file.sync_all()?;
            Ok(())
        })();

        match result {
            Ok(()) => {
                fs::rename(&tmp_path, path)?;
                Ok(())
            }
            Err(e) => {
                let _ = fs::remove_file(&tmp_path);
                Err(e)
            }
        }
    }

    /// Read `path`, migrate to the current version if needed, and
    /// reconstruct an `EntryStore`. `leaf_id` is left unset; callers pick it
    /// per spec §4.C loading behavior (latest-timestamped leaf).
    pub fn load(path: &Path) -> Result<EntryStore, SessionError> {
        if !path.is_file() {
            return Err(SessionError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("session file not found: {}", path.display()),
            )));
        }
        let file = File::open(path)?;
        let mut lines = BufReader::new(file).lines();

        let first = lines.next().ok_or(SessionError::EmptyFile)??;
        let header_record: Record = serde_json::from_str(&first)?;
        let mut header = match header_record {
            Record::Header(h) => h,
            Record::EntryRecord(_) => {
                return Err(SessionError::Parse(serde_json::Error::custom(
                    "expected header as first record",
                )))
            }
        };

        let mut entries = Vec::new();
        for line in lines {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let record: Record = serde_json::from_str(&line)?;
            if let Record::EntryRecord(e) = record {
                entries.push(e);
            }
        }

        migrate(&mut header, &mut entries);

        EntryStore::from_parts(header, entries)
    }
}

fn sibling_tmp_path(path: &Path) -> std::path::PathBuf {
    let file_name = path.file_name().and_then(|n| n.to_str()).unwrap_or("session");
    let unique = uuid::Uuid::new_v4().simple().to_string();
    path.with_file_name(format!("{file_name}.tmp.{unique}"))
}

/// Migrate an older-version header/entry set up to `CURRENT_VERSION`
/// in-place (spec §4.B "Versioning"). Version 0 predates explicit ids: such
/// entries are assigned ids and linked in file order.
fn migrate(header: &mut SessionHeader, entries: &mut [Entry]) {
    if header.version >= CURRENT_VERSION {
        return;
    }

    // Pre-v1 files predate explicit ids: entries without one are assigned a
    // fresh id and linked to the previous entry in file order. The `custom`
    // role already covers what older formats called `hookMessage`, so no
    // role rewrite is needed on this path.
    let mut prev_id: Option<String> = None;
    for entry in entries.iter_mut() {
        if entry.id.is_empty() {
            entry.id = uuid::Uuid::new_v4().simple().to_string()[..8].to_string();
        }
        if entry.parent_id.is_none() {
            entry.parent_id = prev_id.clone();
        }
        prev_id = Some(entry.id.clone());
    }

    header.version = CURRENT_VERSION;
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::{Entry as RawEntry, EntryKind as RawKind};

    fn store_with_two_messages() -> EntryStore {
        let mut s = EntryStore::new("/w");
        s.append_message(MessageRole::User, MessageContent::text("hi")).unwrap();
        s.append_message(MessageRole::Assistant, MessageContent::text("hello")).unwrap();
        s
    }

    #[test]
    fn save_then_load_round_trips_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.jsonl");
        let s = store_with_two_messages();

        SessionLog::save(&path, &s).unwrap();
        let loaded = SessionLog::load(&path).unwrap();

        assert_eq!(loaded.entries().len(), s.entries().len());
        assert_eq!(loaded.header.id, s.header.id);
        assert_eq!(loaded.header.cwd, s.header.cwd);
    }

    #[test]
    fn load_missing_file_is_distinct_not_found_error() {
        let err = SessionLog::load(Path::new("/tmp/kestrel-no-such-session.jsonl")).unwrap_err();
        assert!(matches!(err, SessionError::Io(_)));
    }

    #[test]
    fn load_empty_file_reports_empty_file_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.jsonl");
        File::create(&path).unwrap();
        let err = SessionLog::load(&path).unwrap_err();
        assert!(matches!(err, SessionError::EmptyFile));
    }

    #[test]
    fn save_leaves_existing_file_intact_on_write_failure() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.jsonl");
        let original = store_with_two_messages();
        SessionLog::save(&path, &original).unwrap();
        let before = fs::read_to_string(&path).unwrap();

        // Point at a directory that cannot hold the temp file's sibling to
        // provoke a write failure, then confirm `path` is unchanged.
        let bogus = dir.path().join("does/not/exist/session.jsonl");
        let mut broken = EntryStore::new("/w2");
        broken.append_message(MessageRole::User, MessageContent::text("x")).unwrap();
        assert!(SessionLog::save(&bogus, &broken).is_err());

        let after = fs::read_to_string(&path).unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn entries_with_missing_ids_get_assigned_and_linked_in_file_order() {
        let mut header = SessionHeader {
            id: "s1".into(),
            version: 0,
            cwd: "/w".into(),
            parent_session: None,
            timestamp: Utc::now(),
        };
        let mut entries = vec![
            RawEntry {
                id: String::new(),
                parent_id: None,
                timestamp: Utc::now(),
                kind: RawKind::Message {
                    role: MessageRole::User,
                    content: MessageContent::text("a"),
                    metadata: serde_json::Value::Null,
                },
            },
            RawEntry {
                id: String::new(),
                parent_id: None,
                timestamp: Utc::now(),
                kind: RawKind::Message {
                    role: MessageRole::Assistant,
                    content: MessageContent::text("b"),
                    metadata: serde_json::Value::Null,
                },
            },
        ];
        migrate(&mut header, &mut entries);
        assert_eq!(header.version, CURRENT_VERSION);
        assert!(!entries[0].id.is_empty());
        assert_eq!(entries[1].parent_id.as_deref(), Some(entries[0].id.as_str()));
    }
}
