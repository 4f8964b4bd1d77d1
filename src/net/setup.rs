//! Bring-up of the local node, step by step. Each step records what it
//! created in `NetState` before the next one runs, so a failure part-way
//! leaves exactly the completed steps for tear-down to undo.

use chrono::{TimeDelta, Utc};
use tracing::{debug, info, warn};

use crate::config::{ConfigTree, Layer};
use crate::credentials::load_private_credential;
use crate::device::{self, DeviceConfig};
use crate::error::AppError;
use crate::hooks::{self, HookEnv, ScriptRunner};
use crate::node::{Connection, Node, check_id};

use super::crypto::{self, InboundCrypto};
use super::graph::RouteGraph;
use super::listen::{self, SocketOptions};
use super::options::{self, NetOptions, Timing};
use super::subnets::sync_all_subnets;
use super::{NetContext, NetState};

/// Label used for the local node's hostname.
const MYSELF: &str = "MYSELF";

pub(super) fn setup_myself(
    ctx: &NetContext,
    config: &mut ConfigTree,
    scripts: &dyn ScriptRunner,
    graph: &mut dyn RouteGraph,
    state: &mut NetState,
) -> Result<(), AppError> {
    let name = config
        .get_string("Name")
        .ok_or_else(|| AppError::Config("Name for mesh daemon required".into()))?
        .to_string();
    if !check_id(&name) {
        return Err(AppError::Config(format!("Invalid name for myself: {name:?}")));
    }

    let mut myself = Node::new(&name);
    myself.hostname = MYSELF.to_string();
    let mut connection = Connection::new(&name);
    connection.hostname = MYSELF.to_string();

    config.read_options_for(&name);
    let host_file = ctx.hosts_dir().join(&name);
    if let Err(e) = config.read_file(&host_file, Layer::Host) {
        warn!(host = %name, error = %e, "could not read own host configuration");
    }

    let credential = load_private_credential(config, &ctx.confbase)?;
    info!(
        node = %name,
        bits = credential.bits(),
        fingerprint = %credential.fingerprint(),
        "loaded private key"
    );
    connection.credential = Some(credential);

    let configured_port = config.get_string("Port").unwrap_or(options::DEFAULT_PORT);
    let port = listen::resolve_port(configured_port)?;
    if port != configured_port {
        debug!(service = configured_port, port = %port, "resolved service name");
    }
    state.port = Some(port.clone());

    for entry in config.lookup_all("Subnet") {
        let subnet = entry.as_subnet()?;
        myself.add_subnet(subnet);
    }

    myself.options = options::node_options(config)?;
    let timing = match state.timing.clone() {
        Some(timing) => timing,
        None => Timing::from_config(config)?,
    };
    let net_options = NetOptions::from_config(config, timing)?;
    state.options = Some(net_options.clone());

    let inbound = InboundCrypto::from_config(config)?;
    myself.incipher = inbound.cipher;
    myself.indigest = inbound.digest;
    myself.inkeylength = inbound.key_length;
    myself.inmaclength = inbound.mac_length;
    myself.incompression = inbound.compression;
    myself.key_expires =
        Some(Utc::now() + TimeDelta::seconds(i64::from(net_options.key_lifetime)));

    connection.outcipher = crypto::cipher_by_name(crypto::OUTBOUND_CIPHER);
    connection.outdigest = crypto::digest_by_name(crypto::OUTBOUND_DIGEST);
    connection.outmaclength = 0;
    connection.outcompression = 0;

    myself.nexthop = Some(name.clone());
    myself.via = Some(name.clone());
    myself.status.reachable = true;
    myself.connection = Some(connection);
    state.registries.nodes.add(myself);
    state.myself = Some(name.clone());
    state.registries.index_subnets();
    graph.recompute(&state.registries.nodes);

    if net_options.strict_subnets {
        sync_all_subnets(&ctx.hosts_dir(), &mut state.registries.nodes);
        state.registries.index_subnets();
        debug!(subnets = state.registries.subnets.len(), "loaded all host subnets");
    }

    let mut dev = device::build(
        config.get_string("DeviceType"),
        DeviceConfig {
            device: config.get_string("Device").map(str::to_string),
            interface: config.get_string("Interface").map(str::to_string),
            netname: ctx.netname.clone(),
            routing_mode: net_options.routing_mode,
        },
    )?;
    dev.setup()?;
    let env = HookEnv {
        netname: ctx.netname.clone(),
        device: dev.device_path().map(str::to_string),
        interface: dev.interface().map(str::to_string),
        name: name.clone(),
        subnet: None,
    };
    state.device = Some(dev);

    scripts.execute(hooks::HOOK_UP, &env);
    state.hook_env = Some(env.clone());

    if let Some(node) = state.registries.nodes.lookup(&name) {
        hooks::subnet_update(scripts, &env, node, true);
        state.subnets_announced = true;
    }

    state.listeners = listen::open_listeners(
        net_options.bind_address.as_deref(),
        &port,
        net_options.address_family,
        &SocketOptions {
            udp_rcvbuf: net_options.udp_rcvbuf,
            udp_sndbuf: net_options.udp_sndbuf,
            bind_to_interface: net_options.bind_to_interface.clone(),
        },
    )?;

    info!(
        node = %name,
        port = %port,
        mode = %net_options.routing_mode,
        listeners = state.listeners.len(),
        "local node is up"
    );
    Ok(())
}
