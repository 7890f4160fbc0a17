// SPDX-License-Identifier: Apache-2.0
mod entry;
mod error;
mod log;
mod store;

pub use entry::{
    ContentBlock, Entry, EntryKind, MessageContent, MessageRole, PendingEntry, ThinkingLevel,
};
pub use error::SessionError;
pub use log::SessionLog;
pub use store::{Context, EntryStore, SessionHeader, CURRENT_VERSION};

/// Pick the leaf to resume from after loading a store from disk (spec §4.C
/// "Loading behavior"): the latest entry reachable through the most
/// recently timestamped leaf of the tree (an entry with no children); ties
/// broken by latest timestamp — which for a childless set is the same
/// comparison, so this reduces to "the leaf with the latest timestamp, and
/// if several share one, the one appended last".
pub fn pick_resume_leaf(store: &EntryStore) -> Option<String> {
    store
        .leaves()
        .into_iter()
        .enumerate()
        .max_by_key(|(idx, e)| (e.timestamp, *idx))
        .map(|(_, e)| e.id.clone())
}

/// Load `path` into a ready-to-use store: missing or invalid files start an
/// empty session rather than propagating the error, per §4.C's "if the file
/// is missing or invalid, start empty".
pub fn load_or_new(path: &std::path::Path, cwd: impl Into<String>) -> EntryStore {
    match SessionLog::load(path) {
        Ok(mut store) => {
            let leaf = pick_resume_leaf(&store);
            if let Err(e) = store.set_leaf_id(leaf) {
                tracing::warn!(error = %e, path = %path.display(), "resume leaf failed to resolve, starting with no leaf");
            }
            store
        }
        Err(e) => {
            tracing::debug!(error = %e, path = %path.display(), "starting empty session (load failed)");
            EntryStore::new(cwd)
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
