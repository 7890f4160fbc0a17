// SPDX-License-Identifier: Apache-2.0
mod error;
mod manager;
mod persist;
mod record;
mod sanitize;

pub use error::ProcessError;
pub use manager::{ExecSyncOutcome, KillSignal, PolledResult, ProcessManager};
pub use persist::{load_records, save_snapshot};
pub use record::{LogRing, ProcessRecord, ProcessStatus};
pub use sanitize::sanitize;

use kestrel_config::ProcessConfig;

/// Run `ProcessManager::clear_old` using the TTL from configuration.
pub fn clear_old_with_config(manager: &ProcessManager, cfg: &ProcessConfig) {
    manager.clear_old(cfg.ttl_seconds as i64);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clear_old_with_config_uses_configured_ttl() {
        let cfg = ProcessConfig { max_bytes: 1000, max_lines: 100, ttl_seconds: 0 };
        let manager = ProcessManager::new(cfg.clone());
        clear_old_with_config(&manager, &cfg);
        assert_eq!(manager.list(None).len(), 0);
    }
}
