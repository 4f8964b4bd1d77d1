//! Nodes, their connection records, and the node registry.

pub mod subnet;

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::credentials::Credential;
use crate::net::crypto::{CipherSpec, DigestSpec};

pub use subnet::{Expiry, Subnet, SubnetRange};

/// Protocol version announced by this node.
pub const PROT_CURRENT: u8 = 17;

/// Node and peer names: ASCII letters, digits and `_`, non-empty.
pub fn check_id(name: &str) -> bool {
    !name.is_empty() && name.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_')
}

/// Per-node routing option bits, as exchanged with peers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NodeOptions(u32);

impl NodeOptions {
    pub const INDIRECT: Self = Self(0x0001);
    pub const TCP_ONLY: Self = Self(0x0002);
    pub const PMTU_DISCOVERY: Self = Self(0x0004);
    pub const CLAMP_MSS: Self = Self(0x0008);

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }
}

#[derive(Debug, Clone, Default)]
pub struct NodeStatus {
    pub reachable: bool,
}

/// Session record paired with a node: key material plus outbound crypto parameters.
#[derive(Debug, Clone)]
pub struct Connection {
    pub name: String,
    pub hostname: String,
    pub options: NodeOptions,
    pub protocol_version: u8,
    pub credential: Option<Credential>,
    pub outcipher: Option<&'static CipherSpec>,
    pub outdigest: Option<&'static DigestSpec>,
    pub outmaclength: usize,
    pub outcompression: u8,
    /// Name of the outgoing-connection policy that (re)opens this connection.
    pub outgoing: Option<String>,
}

impl Connection {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            hostname: String::new(),
            options: NodeOptions::default(),
            protocol_version: PROT_CURRENT,
            credential: None,
            outcipher: None,
            outdigest: None,
            outmaclength: 0,
            outcompression: 0,
            outgoing: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Node {
    pub name: String,
    pub hostname: String,
    pub status: NodeStatus,
    pub options: NodeOptions,
    pub incipher: Option<&'static CipherSpec>,
    pub indigest: Option<&'static DigestSpec>,
    pub inkeylength: usize,
    pub inmaclength: usize,
    pub incompression: u8,
    pub key_expires: Option<DateTime<Utc>>,
    /// Name of the next node on the path towards this one.
    pub nexthop: Option<String>,
    /// Name of the node packets for this one are relayed through.
    pub via: Option<String>,
    pub connection: Option<Connection>,
    subnets: Vec<Subnet>,
}

impl Node {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            hostname: String::new(),
            status: NodeStatus::default(),
            options: NodeOptions::default(),
            incipher: None,
            indigest: None,
            inkeylength: 0,
            inmaclength: 0,
            incompression: 0,
            key_expires: None,
            nexthop: None,
            via: None,
            connection: None,
            subnets: Vec::new(),
        }
    }

    pub fn subnets(&self) -> &[Subnet] {
        &self.subnets
    }

    pub fn lookup_subnet(&self, range: &SubnetRange) -> Option<&Subnet> {
        self.subnets.iter().find(|s| s.range == *range)
    }

    pub fn lookup_subnet_mut(&mut self, range: &SubnetRange) -> Option<&mut Subnet> {
        self.subnets.iter_mut().find(|s| s.range == *range)
    }

    /// Add `subnet` unless this node already owns the same range.
    /// Returns `false` when the range was already present.
    pub fn add_subnet(&mut self, subnet: Subnet) -> bool {
        if self.lookup_subnet(&subnet.range).is_some() {
            return false;
        }
        self.subnets.push(subnet);
        true
    }

    pub fn clear_subnets(&mut self) {
        self.subnets.clear();
    }
}

/// All known nodes, keyed by name.
#[derive(Debug, Default)]
pub struct NodeRegistry {
    nodes: BTreeMap<String, Node>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `node`, replacing any existing node with the same name.
    pub fn add(&mut self, node: Node) {
        self.nodes.insert(node.name.clone(), node);
    }

    pub fn lookup(&self, name: &str) -> Option<&Node> {
        self.nodes.get(name)
    }

    pub fn lookup_mut(&mut self, name: &str) -> Option<&mut Node> {
        self.nodes.get_mut(name)
    }

    /// Find a node by name, creating an empty one on first sight.
    pub fn get_or_create(&mut self, name: &str) -> &mut Node {
        self.nodes
            .entry(name.to_string())
            .or_insert_with(|| Node::new(name))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Node> {
        self.nodes.values_mut()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_id_accepts_word_characters_only() {
        assert!(check_id("alice"));
        assert!(check_id("node_01"));
        assert!(!check_id(""));
        assert!(!check_id("bob-2"));
        assert!(!check_id("../etc"));
        assert!(!check_id(".hidden"));
    }

    #[test]
    fn options_insert_and_contains() {
        let mut o = NodeOptions::default();
        o.insert(NodeOptions::TCP_ONLY);
        o.insert(NodeOptions::INDIRECT);
        assert!(o.contains(NodeOptions::TCP_ONLY));
        assert!(o.contains(NodeOptions::INDIRECT));
        assert!(!o.contains(NodeOptions::CLAMP_MSS));
        assert_eq!(o.bits(), 0x0003);
    }

    #[test]
    fn add_subnet_keeps_ranges_unique() {
        let mut n = Node::new("alice");
        assert!(n.add_subnet("10.0.0.0/24".parse().unwrap()));
        assert!(!n.add_subnet("10.0.0.0/24#5".parse().unwrap()));
        assert_eq!(n.subnets().len(), 1);
        assert_eq!(n.subnets()[0].weight, subnet::DEFAULT_WEIGHT);
    }

    #[test]
    fn get_or_create_reuses_existing_node() {
        let mut reg = NodeRegistry::new();
        reg.get_or_create("bob").hostname = "10.0.0.2".into();
        assert_eq!(reg.get_or_create("bob").hostname, "10.0.0.2");
        assert_eq!(reg.len(), 1);
    }
}
