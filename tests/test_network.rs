//! End-to-end bring-up and tear-down against a temporary confbase.
//!
//! Every network binds `127.0.0.1` on an ephemeral port and uses the dummy
//! device, so the tests need no privileges.

use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex, OnceLock};

use mesh_node::config::{ConfigTree, Layer};
use mesh_node::hooks::{self, HookEnv, ScriptRunner};
use mesh_node::net::graph::{ReachabilityLog, RouteGraph};
use mesh_node::net::{LifecycleState, NetContext, Network};
use mesh_node::node::NodeRegistry;
use rand_core::OsRng;
use rsa::RsaPrivateKey;
use rsa::pkcs1::EncodeRsaPrivateKey;
use rsa::pkcs8::LineEnding;
use tempfile::TempDir;

fn test_key() -> &'static RsaPrivateKey {
    static KEY: OnceLock<RsaPrivateKey> = OnceLock::new();
    KEY.get_or_init(|| RsaPrivateKey::new(&mut OsRng, 1024).unwrap())
}

#[derive(Default, Clone)]
struct Recorder(Arc<Mutex<Vec<(String, HookEnv)>>>);

impl Recorder {
    fn scripts(&self) -> Vec<String> {
        self.0.lock().unwrap().iter().map(|(s, _)| s.clone()).collect()
    }

    fn calls(&self, script: &str) -> Vec<HookEnv> {
        self.0
            .lock()
            .unwrap()
            .iter()
            .filter(|(s, _)| s == script)
            .map(|(_, env)| env.clone())
            .collect()
    }
}

impl ScriptRunner for Recorder {
    fn execute(&self, script: &str, env: &HookEnv) {
        self.0.lock().unwrap().push((script.to_string(), env.clone()));
    }
}

#[derive(Default, Clone)]
struct CountingGraph(Arc<Mutex<usize>>);

impl RouteGraph for CountingGraph {
    fn recompute(&mut self, _nodes: &NodeRegistry) {
        *self.0.lock().unwrap() += 1;
    }
}

/// Confbase for `alice` with a private key, a dummy device and a loopback bind.
fn confbase(server_conf: &str) -> TempDir {
    let dir = TempDir::new().unwrap();
    fs::create_dir(dir.path().join("hosts")).unwrap();
    fs::write(
        dir.path().join("rsa_key.priv"),
        test_key().to_pkcs1_pem(LineEnding::LF).unwrap().as_bytes(),
    )
    .unwrap();
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(dir.path().join("rsa_key.priv"), fs::Permissions::from_mode(0o600))
            .unwrap();
    }
    fs::write(dir.path().join("meshnode.conf"), server_conf).unwrap();
    fs::write(dir.path().join("hosts/alice"), "Subnet = 10.0.1.0/24\n").unwrap();
    dir
}

const ALICE: &str = "Name = alice\nDeviceType = dummy\nBindToAddress = 127.0.0.1\nPort = 0\n";

fn network(dir: &Path, options: &[&str], scripts: Recorder) -> Network {
    let mut tree = ConfigTree::new();
    for option in options {
        tree.add_option(option).unwrap();
    }
    tree.read_file(&dir.join("meshnode.conf"), Layer::Server).unwrap();
    let ctx = NetContext {
        confbase: dir.to_path_buf(),
        netname: Some("lab".into()),
    };
    Network::new(ctx, tree, Box::new(scripts), Box::new(ReachabilityLog::default()))
}

#[test]
fn bring_up_sets_up_local_node() {
    let dir = confbase(ALICE);
    let rec = Recorder::default();
    let mut net = network(dir.path(), &[], rec.clone());

    net.bring_up().unwrap();
    assert_eq!(net.state(), LifecycleState::Up);

    let me = net.myself().unwrap();
    assert_eq!(me.name, "alice");
    assert_eq!(me.hostname, "MYSELF");
    assert!(me.status.reachable);
    assert_eq!(me.nexthop.as_deref(), Some("alice"));
    assert_eq!(me.via.as_deref(), Some("alice"));
    assert_eq!(me.incipher.map(|c| c.name), Some("bf-cbc"));
    assert_eq!(me.indigest.map(|d| d.name), Some("sha1"));
    assert_eq!(me.inmaclength, 4);
    assert!(me.key_expires.is_some());
    assert_eq!(me.subnets().len(), 1);

    let conn = me.connection.as_ref().unwrap();
    assert!(conn.credential.as_ref().unwrap().has_private());
    assert_eq!(conn.outcipher.map(|c| c.name), Some("bf-ofb"));
    assert_eq!(conn.outmaclength, 0);

    assert_eq!(net.device().unwrap().kind(), "dummy");
    assert_eq!(net.listeners().len(), 1);
    assert!(net.listeners()[0].addr().ip().is_loopback());
    assert_eq!(net.registries().unwrap().subnets.len(), 1);

    assert_eq!(rec.scripts(), [hooks::HOOK_UP, hooks::SUBNET_UP]);
    let up = &rec.calls(hooks::HOOK_UP)[0];
    assert_eq!(up.name, "alice");
    assert_eq!(up.netname.as_deref(), Some("lab"));
    assert_eq!(up.device.as_deref(), Some("dummy"));
}

#[test]
fn unknown_service_port_is_fatal_before_any_hook() {
    let dir = confbase("Name = alice\nDeviceType = dummy\nBindToAddress = 127.0.0.1\nPort = no-such-mesh-service\n");
    let rec = Recorder::default();
    let mut net = network(dir.path(), &[], rec.clone());

    let err = net.bring_up().unwrap_err();
    assert!(err.to_string().contains("no-such-mesh-service"), "{err}");
    assert!(net.listeners().is_empty());
    net.tear_down();
    assert!(rec.scripts().is_empty());
}

#[test]
fn command_line_option_overrides_server_file() {
    let dir = confbase(ALICE);
    let mut net = network(dir.path(), &["Cipher=aes-256-cbc", "bob.Cipher=none"], Recorder::default());

    net.bring_up().unwrap();
    assert_eq!(net.myself().unwrap().incipher.map(|c| c.name), Some("aes-256-cbc"));
}

#[test]
fn tunnel_server_loads_every_host_subnet() {
    let dir = confbase(&format!("{ALICE}TunnelServer = yes\n"));
    fs::write(dir.path().join("hosts/bob"), "Subnet = 10.0.2.0/24\nSubnet = 10.0.3.0/24\n").unwrap();
    let mut net = network(dir.path(), &[], Recorder::default());

    net.bring_up().unwrap();
    let options = net.options().unwrap();
    assert!(options.tunnel_server);
    assert!(options.strict_subnets);
    let bob = net.nodes().unwrap().lookup("bob").unwrap();
    assert_eq!(bob.subnets().len(), 2);
    assert!(!bob.status.reachable);
    assert_eq!(net.registries().unwrap().subnets.len(), 3);
}

#[test]
fn shared_subnet_is_indexed_once_per_owner() {
    let dir = confbase(&format!("{ALICE}StrictSubnets = yes\n"));
    fs::write(dir.path().join("hosts/bob"), "Subnet = 10.9.0.0/16\n").unwrap();
    fs::write(dir.path().join("hosts/carol"), "Subnet = 10.9.0.0/16\n").unwrap();
    let mut net = network(dir.path(), &[], Recorder::default());

    net.bring_up().unwrap();
    let registries = net.registries().unwrap();
    assert_eq!(registries.subnets.len(), 3);
    let shared = registries.nodes.lookup("bob").unwrap().subnets()[0].range;
    let owners: Vec<_> = registries.subnet_owners(&shared).collect();
    assert_eq!(owners, ["bob", "carol"]);
}

#[test]
fn without_strict_subnets_other_hosts_are_not_loaded() {
    let dir = confbase(ALICE);
    fs::write(dir.path().join("hosts/bob"), "Subnet = 10.0.2.0/24\n").unwrap();
    let mut net = network(dir.path(), &[], Recorder::default());

    net.bring_up().unwrap();
    assert!(net.nodes().unwrap().lookup("bob").is_none());
}

#[test]
fn tear_down_runs_hooks_and_releases_port() {
    let dir = confbase(ALICE);
    let rec = Recorder::default();
    let mut net = network(dir.path(), &[], rec.clone());
    net.bring_up().unwrap();
    let addr = net.listeners()[0].addr();

    net.tear_down();
    assert_eq!(net.state(), LifecycleState::Down);
    assert!(net.myself().is_none());
    assert!(net.listeners().is_empty());
    assert_eq!(
        rec.scripts(),
        [hooks::HOOK_UP, hooks::SUBNET_UP, hooks::SUBNET_DOWN, hooks::HOOK_DOWN]
    );
    let down = &rec.calls(hooks::HOOK_DOWN)[0];
    assert_eq!(down.vars().len(), 4);

    std::net::TcpListener::bind(addr).unwrap();
    std::net::UdpSocket::bind(addr).unwrap();

    net.tear_down();
    assert_eq!(rec.calls(hooks::HOOK_DOWN).len(), 1);
}

#[test]
fn failed_bring_up_tears_down_without_down_hook() {
    let dir = confbase(ALICE);
    fs::remove_file(dir.path().join("rsa_key.priv")).unwrap();
    let rec = Recorder::default();
    let mut net = network(dir.path(), &[], rec.clone());

    let err = net.bring_up().unwrap_err();
    assert!(err.to_string().contains("rsa_key.priv"), "{err}");
    assert_eq!(net.state(), LifecycleState::Down);

    net.tear_down();
    assert!(rec.scripts().is_empty());
}

#[test]
fn missing_name_is_fatal() {
    let dir = confbase("DeviceType = dummy\n");
    let mut net = network(dir.path(), &[], Recorder::default());

    let err = net.bring_up().unwrap_err();
    assert!(err.to_string().contains("Name"), "{err}");
}

#[test]
fn unknown_device_type_is_fatal_and_no_sockets_remain() {
    let dir = confbase("Name = alice\nDeviceType = carrier-pigeon\nBindToAddress = 127.0.0.1\nPort = 0\n");
    let rec = Recorder::default();
    let mut net = network(dir.path(), &[], rec.clone());

    let err = net.bring_up().unwrap_err();
    assert!(err.to_string().contains("carrier-pigeon"), "{err}");
    assert!(net.listeners().is_empty());
    net.tear_down();
    assert!(rec.calls(hooks::HOOK_DOWN).is_empty());
}

#[test]
fn second_bring_up_is_rejected_until_torn_down() {
    let dir = confbase(ALICE);
    let mut net = network(dir.path(), &[], Recorder::default());

    net.bring_up().unwrap();
    assert!(net.bring_up().is_err());
    net.tear_down();
    net.bring_up().unwrap();
    assert_eq!(net.state(), LifecycleState::Up);
}

#[test]
fn bring_up_after_tear_down_rereads_host_file() {
    let dir = confbase(ALICE);
    fs::write(dir.path().join("hosts/alice"), "Subnet = 10.0.1.0/24\nCompression = 1\n").unwrap();
    let mut net = network(dir.path(), &[], Recorder::default());
    let global_len = net.config().len();

    net.bring_up().unwrap();
    assert_eq!(net.myself().unwrap().incompression, 1);
    net.tear_down();

    fs::write(dir.path().join("hosts/alice"), "Subnet = 10.0.1.0/24\nCompression = 7\n").unwrap();
    net.bring_up().unwrap();
    assert_eq!(net.myself().unwrap().incompression, 7);
    assert_eq!(net.config().len(), global_len);
    assert_eq!(net.effective_config().unwrap().get_int("Compression").unwrap(), Some(7));
}

#[test]
fn graph_is_recomputed_after_local_node_is_added() {
    let dir = confbase(ALICE);
    let graph = CountingGraph::default();
    let mut tree = ConfigTree::new();
    tree.read_file(&dir.path().join("meshnode.conf"), Layer::Server).unwrap();
    let ctx = NetContext {
        confbase: dir.path().to_path_buf(),
        netname: None,
    };
    let mut net = Network::new(ctx, tree, Box::new(Recorder::default()), Box::new(graph.clone()));

    net.bring_up().unwrap();
    assert_eq!(*graph.0.lock().unwrap(), 1);
}
