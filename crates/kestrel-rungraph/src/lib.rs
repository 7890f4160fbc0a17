// SPDX-License-Identifier: Apache-2.0
mod error;
mod graph;
mod persist;
mod record;

pub use error::RunGraphError;
pub use graph::{RunGraph, WaitMode};
pub use persist::{load_and_recover, load_records, save_snapshot};
pub use record::{NewRunAttrs, RunRecord, RunStatus};

use kestrel_config::RunGraphConfig;

/// Run `RunGraph::cleanup` using the TTL from configuration, rather than a
/// bare number scattered at call sites.
pub fn cleanup_with_config(graph: &RunGraph, cfg: &RunGraphConfig) {
    graph.cleanup(cfg.ttl_seconds as i64);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cleanup_with_config_uses_configured_ttl() {
        let g = RunGraph::new();
        let id = g.new_run(NewRunAttrs::default());
        g.finish(&id, serde_json::Value::Null).unwrap();

        let cfg = RunGraphConfig { ttl_seconds: 0 };
        std::thread::sleep(std::time::Duration::from_millis(10));
        cleanup_with_config(&g, &cfg);
        assert!(g.get(&id).is_none());
    }
}
