//! Seam to the routing graph. Path computation lives outside this crate;
//! bring-up only needs to tell it that the node set changed.

use tracing::debug;

use crate::node::NodeRegistry;

pub trait RouteGraph: Send {
    fn recompute(&mut self, nodes: &NodeRegistry);
}

/// Logs the reachable node set on every recomputation.
#[derive(Debug, Default)]
pub struct ReachabilityLog {
    runs: usize,
}

impl ReachabilityLog {
    pub fn runs(&self) -> usize {
        self.runs
    }
}

impl RouteGraph for ReachabilityLog {
    fn recompute(&mut self, nodes: &NodeRegistry) {
        self.runs += 1;
        let reachable = nodes.iter().filter(|n| n.status.reachable).count();
        debug!(nodes = nodes.len(), reachable, "graph recomputed");
    }
}
