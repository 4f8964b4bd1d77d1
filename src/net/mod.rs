//! Network lifecycle: bring the local node up and tear it down again.
//!
//! [`Network`] owns every resource created during bring-up. A failed
//! bring-up leaves its partial state in place; the caller then runs
//! [`Network::tear_down`], which unwinds exactly the steps that completed.
//!
//! # Module layout
//!
//! - **setup**: the ordered bring-up sequence for the local node.
//! - **options**: immutable routing/socket policy snapshot.
//! - **crypto**: cipher/digest catalog and inbound crypto policy.
//! - **listen**: paired TCP/UDP listening sockets, service-name ports.
//! - **subnets**: eager subnet loading from `hosts/`.
//! - **graph**: seam to the routing graph.

pub mod crypto;
pub mod graph;
pub mod listen;
pub mod options;
mod setup;
pub mod subnets;

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::PathBuf;
use std::time::Instant;

use tracing::{debug, info};

use crate::config::{Config, ConfigTree};
use crate::device::Device;
use crate::error::AppError;
use crate::hooks::{self, HookEnv, ScriptRunner};
use crate::node::{Connection, Node, NodeRegistry, SubnetRange};

use graph::RouteGraph;
use listen::ListenSocket;
use options::{NetOptions, Timing};

/// Filesystem and naming context for one network instance.
#[derive(Debug, Clone)]
pub struct NetContext {
    pub confbase: PathBuf,
    pub netname: Option<String>,
}

impl NetContext {
    pub fn from_config(config: &Config) -> Self {
        Self {
            confbase: config.confbase(),
            netname: config.netname.clone(),
        }
    }

    pub fn hosts_dir(&self) -> PathBuf {
        self.confbase.join("hosts")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Down,
    Up,
}

/// A peer we keep reconnecting to.
#[derive(Debug, Clone)]
pub struct Outgoing {
    pub name: String,
    /// Next reconnection attempt, if one is scheduled.
    pub retry_at: Option<Instant>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edge {
    pub from: String,
    pub to: String,
    pub weight: u32,
}

/// Process-wide tables shared with the connection and routing layers.
#[derive(Debug, Default)]
pub struct Registries {
    pub connections: BTreeMap<String, Connection>,
    /// Every known subnet as `(range, owner)`. Several nodes may announce
    /// the same range.
    pub subnets: BTreeSet<(SubnetRange, String)>,
    pub nodes: NodeRegistry,
    pub edges: Vec<Edge>,
    pub past_requests: HashSet<String>,
    pub outgoing: Vec<Outgoing>,
}

impl Registries {
    fn init() -> Self {
        debug!("connections, subnets, nodes, edges and requests initialised");
        Self::default()
    }

    /// Rebuild the subnet index from the node registry.
    pub fn index_subnets(&mut self) {
        self.subnets = self
            .nodes
            .iter()
            .flat_map(|n| n.subnets().iter().map(|s| (s.range, n.name.clone())))
            .collect();
    }

    /// Names of the nodes announcing `range`.
    pub fn subnet_owners(&self, range: &SubnetRange) -> impl Iterator<Item = &str> {
        self.subnets
            .iter()
            .filter(move |(r, _)| r == range)
            .map(|(_, owner)| owner.as_str())
    }

    /// Release the tables in reverse order of initialisation.
    fn exit(self) {
        let Registries { connections, subnets, nodes, edges, past_requests, outgoing } = self;
        drop(outgoing);
        drop(past_requests);
        debug!("requests released");
        drop(edges);
        debug!("edges released");
        drop(subnets);
        debug!("subnets released");
        drop(nodes);
        debug!("nodes released");
        drop(connections);
        debug!("connections released");
    }
}

/// Everything bring-up created. Fields are filled as steps complete.
#[derive(Debug)]
struct NetState {
    /// Global configuration merged with the local host fragment.
    config: ConfigTree,
    registries: Registries,
    myself: Option<String>,
    timing: Option<Timing>,
    options: Option<NetOptions>,
    port: Option<String>,
    device: Option<Device>,
    /// Set once `mesh-up` has run; `mesh-down` reuses it.
    hook_env: Option<HookEnv>,
    subnets_announced: bool,
    listeners: Vec<ListenSocket>,
}

impl NetState {
    fn new(registries: Registries) -> Self {
        Self {
            config: ConfigTree::new(),
            registries,
            myself: None,
            timing: None,
            options: None,
            port: None,
            device: None,
            hook_env: None,
            subnets_announced: false,
            listeners: Vec::new(),
        }
    }
}

pub struct Network {
    ctx: NetContext,
    /// Global configuration. Never modified; each bring-up works on a copy.
    config: ConfigTree,
    scripts: Box<dyn ScriptRunner>,
    graph: Box<dyn RouteGraph>,
    state: Option<NetState>,
    lifecycle: LifecycleState,
}

impl Network {
    pub fn new(
        ctx: NetContext,
        config: ConfigTree,
        scripts: Box<dyn ScriptRunner>,
        graph: Box<dyn RouteGraph>,
    ) -> Self {
        Self { ctx, config, scripts, graph, state: None, lifecycle: LifecycleState::Down }
    }

    /// Initialise the registries and set up the local node.
    ///
    /// On error the partial state is kept; call [`tear_down`](Self::tear_down).
    pub fn bring_up(&mut self) -> Result<(), AppError> {
        if self.state.is_some() {
            return Err(AppError::Network(
                "network is already up or was not torn down".into(),
            ));
        }

        let state = self.state.insert(NetState::new(Registries::init()));

        let timing = Timing::from_config(&self.config)?;
        state.timing = Some(timing);

        let mut config = self.config.clone();
        let result = setup::setup_myself(
            &self.ctx,
            &mut config,
            self.scripts.as_ref(),
            self.graph.as_mut(),
            state,
        );
        state.config = config;
        result?;

        self.lifecycle = LifecycleState::Up;
        Ok(())
    }

    /// Close everything bring-up opened, in reverse order. Calling it again,
    /// or without a prior bring-up, does nothing.
    pub fn tear_down(&mut self) {
        let Some(mut state) = self.state.take() else {
            return;
        };
        self.lifecycle = LifecycleState::Down;

        let registries = &mut state.registries;
        for (name, mut connection) in std::mem::take(&mut registries.connections) {
            let outgoing = connection.outgoing.take();
            debug!(peer = %name, outgoing = ?outgoing, "closing connection");
        }

        for outgoing in &mut registries.outgoing {
            outgoing.retry_at = None;
        }
        registries.outgoing.clear();

        if let Some(name) = &state.myself {
            if let Some(myself) = registries.nodes.lookup_mut(name) {
                if state.subnets_announced {
                    if let Some(env) = &state.hook_env {
                        hooks::subnet_update(self.scripts.as_ref(), env, myself, false);
                    }
                }
                // Drops the local credential.
                myself.connection = None;
            }
        }

        let closed = state.listeners.len();
        state.listeners.clear();
        if closed > 0 {
            debug!(count = closed, "listening sockets closed");
        }

        std::mem::take(&mut state.registries).exit();

        if let Some(env) = &state.hook_env {
            self.scripts.execute(hooks::HOOK_DOWN, env);
        }

        state.port = None;
        if let Some(mut device) = state.device.take() {
            device.close();
        }
        info!("network torn down");
    }

    pub fn state(&self) -> LifecycleState {
        self.lifecycle
    }

    pub fn context(&self) -> &NetContext {
        &self.ctx
    }

    /// Global configuration as passed to [`Network::new`].
    pub fn config(&self) -> &ConfigTree {
        &self.config
    }

    /// Configuration in effect for the current bring-up, including the
    /// local host fragment.
    pub fn effective_config(&self) -> Option<&ConfigTree> {
        self.state.as_ref().map(|s| &s.config)
    }

    pub fn myself(&self) -> Option<&Node> {
        let state = self.state.as_ref()?;
        state.registries.nodes.lookup(state.myself.as_deref()?)
    }

    pub fn nodes(&self) -> Option<&NodeRegistry> {
        self.state.as_ref().map(|s| &s.registries.nodes)
    }

    pub fn registries(&self) -> Option<&Registries> {
        self.state.as_ref().map(|s| &s.registries)
    }

    pub fn registries_mut(&mut self) -> Option<&mut Registries> {
        self.state.as_mut().map(|s| &mut s.registries)
    }

    pub fn options(&self) -> Option<&NetOptions> {
        self.state.as_ref()?.options.as_ref()
    }

    /// Resolved numeric listening port.
    pub fn port(&self) -> Option<&str> {
        self.state.as_ref()?.port.as_deref()
    }

    pub fn device(&self) -> Option<&Device> {
        self.state.as_ref()?.device.as_ref()
    }

    pub fn listeners(&self) -> &[ListenSocket] {
        self.state.as_ref().map_or(&[], |s| s.listeners.as_slice())
    }

    /// Hand the listening sockets to the event loop.
    pub fn take_listeners(&mut self) -> Vec<ListenSocket> {
        self.state
            .as_mut()
            .map(|s| std::mem::take(&mut s.listeners))
            .unwrap_or_default()
    }
}

impl Drop for Network {
    fn drop(&mut self) {
        self.tear_down();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::Subnet;

    fn node_with(name: &str, subnets: &[&str]) -> Node {
        let mut node = Node::new(name);
        for s in subnets {
            node.add_subnet(s.parse::<Subnet>().unwrap());
        }
        node
    }

    #[test]
    fn shared_range_keeps_every_owner() {
        let mut reg = Registries::init();
        reg.nodes.add(node_with("bob", &["10.9.0.0/16"]));
        reg.nodes.add(node_with("carol", &["10.9.0.0/16", "10.8.0.0/16"]));
        reg.index_subnets();

        assert_eq!(reg.subnets.len(), 3);
        let shared = "10.9.0.0/16".parse::<Subnet>().unwrap().range;
        let owners: Vec<_> = reg.subnet_owners(&shared).collect();
        assert_eq!(owners, ["bob", "carol"]);
    }

    #[test]
    fn reindex_drops_removed_subnets() {
        let mut reg = Registries::init();
        reg.nodes.add(node_with("bob", &["10.9.0.0/16"]));
        reg.index_subnets();
        reg.nodes.lookup_mut("bob").unwrap().clear_subnets();
        reg.index_subnets();
        assert!(reg.subnets.is_empty());
    }
}
