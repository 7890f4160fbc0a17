// SPDX-License-Identifier: Apache-2.0
use std::fs::{self, File};
use std::io::{BufRead, BufReader, Write};
use std::path::Path;

use fs4::fs_std::FileExt;

use crate::graph::RunGraph;
use crate::record::RunRecord;
use crate::RunGraphError;

/// Atomically mirror the full table to `path`: write a sibling temp file
/// under an advisory exclusive lock, fsync, then rename over `path`.
/// Mirrors `kestrel_session::SessionLog::save`'s atomic-rename contract.
pub fn save_snapshot(path: &Path, records: &[RunRecord]) -> Result<(), RunGraphError> {
    let tmp_path = sibling_tmp_path(path);
    let result = (|| -> Result<(), RunGraphError> {
        let mut file = File::create(&tmp_path)?;
        file.lock_exclusive()?;
        for record in records {
            let line = serde_json::to_string(record)?;
            writeln!(file, "{line}")?;
        }
        file.sync_all()?;
        FileExt::unlock(&file)?;
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

/// Read every record from `path` under an advisory shared lock. A missing
/// file loads as an empty table (fresh start).
pub fn load_records(path: &Path) -> Result<Vec<RunRecord>, RunGraphError> {
    if !path.is_file() {
        return Ok(Vec::new());
    }
    let file = File::open(path)?;
    file.lock_shared()?;
    let mut records = Vec::new();
    for line in BufReader::new(&file).lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        records.push(serde_json::from_str(&line)?);
    }
    FileExt::unlock(&file)?;
    Ok(records)
}

/// Load `path` and recover from an unclean shutdown: every record still
/// `running` is rewritten to `lost` (spec §4.G persistence contract).
pub fn load_and_recover(path: &Path) -> Result<RunGraph, RunGraphError> {
    let records = load_records(path)?;
    let graph = RunGraph::from_records(records);
    graph.recover_from_crash();
    Ok(graph)
}

fn sibling_tmp_path(path: &Path) -> std::path::PathBuf {
    let file_name = path.file_name().and_then(|n| n.to_str()).unwrap_or("rungraph");
    let unique = uuid::Uuid::new_v4().simple().to_string();
    path.with_file_name(format!("{file_name}.tmp.{unique}"))
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{NewRunAttrs, RunStatus};

    #[test]
    fn save_then_load_round_trips_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rungraph.jsonl");

        let g = RunGraph::new();
        let id = g.new_run(NewRunAttrs { run_type: "task".into(), ..Default::default() });
        g.mark_running(&id).unwrap();

        save_snapshot(&path, &g.snapshot()).unwrap();
        let loaded = load_records(&path).unwrap();

        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id, id);
        assert_eq!(loaded[0].status, RunStatus::Running);
    }

    #[test]
    fn load_records_missing_file_is_empty() {
        let records = load_records(Path::new("/tmp/kestrel-no-such-rungraph.jsonl")).unwrap();
        assert!(records.is_empty());
    }

    #[test]
    fn load_and_recover_rewrites_running_to_lost() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rungraph.jsonl");

        let g = RunGraph::new();
        let id = g.new_run(NewRunAttrs::default());
        g.mark_running(&id).unwrap();
        save_snapshot(&path, &g.snapshot()).unwrap();

        let recovered = load_and_recover(&path).unwrap();
        let r = recovered.get(&id).unwrap();
        assert_eq!(r.status, RunStatus::Lost);
    }
}
