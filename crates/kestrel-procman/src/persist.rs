// SPDX-License-Identifier: Apache-2.0
use std::fs::{self, File};
use std::io::{BufRead, BufReader, Write};
use std::path::Path;

use fs4::fs_std::FileExt;

use crate::record::ProcessRecord;
use crate::ProcessError;

/// Atomically mirror the full process table to `path`. Shares
/// `kestrel_rungraph::persist`'s write-tmp/lock/fsync/rename contract so
/// both shared-table subsystems use one on-disk storage format.
pub fn save_snapshot(path: &Path, records: &[ProcessRecord]) -> Result<(), ProcessError> {
    let tmp_path = sibling_tmp_path(path);
    let result = (|| -> Result<(), ProcessError> {
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
/// file loads as an empty table.
pub fn load_records(path: &Path) -> Result<Vec<ProcessRecord>, ProcessError> {
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

fn sibling_tmp_path(path: &Path) -> std::path::PathBuf {
    let file_name = path.file_name().and_then(|n| n.to_str()).unwrap_or("procman");
    let unique = uuid::Uuid::new_v4().simple().to_string();
    path.with_file_name(format!("{file_name}.tmp.{unique}"))
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
