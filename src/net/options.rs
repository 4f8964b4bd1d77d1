//! Routing and socket policy read once at bring-up.
//!
//! [`NetOptions`] is built by the setup sequence and then only read, by the
//! listener code and by whoever runs the event loop afterwards.

use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;

use crate::config::ConfigTree;
use crate::error::AppError;
use crate::node::NodeOptions;

/// Largest frame carried over the mesh.
pub const MTU: i64 = 1518;
pub const DEFAULT_PORT: &str = "655";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RoutingMode {
    #[default]
    Router,
    Switch,
    Hub,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ForwardingMode {
    Off,
    #[default]
    Internal,
    Kernel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AddressFamily {
    Ipv4,
    Ipv6,
    #[default]
    Any,
}

impl AddressFamily {
    pub fn matches(self, addr: &SocketAddr) -> bool {
        match self {
            AddressFamily::Ipv4 => addr.is_ipv4(),
            AddressFamily::Ipv6 => addr.is_ipv6(),
            AddressFamily::Any => true,
        }
    }
}

impl FromStr for RoutingMode {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "router" => Ok(Self::Router),
            "switch" => Ok(Self::Switch),
            "hub" => Ok(Self::Hub),
            _ => Err(AppError::Config(format!("Invalid routing mode: {s}"))),
        }
    }
}

impl FromStr for ForwardingMode {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "off" => Ok(Self::Off),
            "internal" => Ok(Self::Internal),
            "kernel" => Ok(Self::Kernel),
            _ => Err(AppError::Config(format!("Invalid forwarding mode: {s}"))),
        }
    }
}

impl FromStr for AddressFamily {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ipv4" => Ok(Self::Ipv4),
            "ipv6" => Ok(Self::Ipv6),
            "any" => Ok(Self::Any),
            _ => Err(AppError::Config(format!("Invalid address family: {s}"))),
        }
    }
}

impl fmt::Display for RoutingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Router => "router",
            Self::Switch => "switch",
            Self::Hub => "hub",
        })
    }
}

/// Keepalive and buffering limits, read before the local node is set up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timing {
    pub ping_interval: u32,
    pub ping_timeout: u32,
    pub max_output_buffer: u32,
}

impl Timing {
    pub fn from_config(config: &ConfigTree) -> Result<Self, AppError> {
        let ping_interval = match config.get_int("PingInterval")? {
            Some(v) if v >= 1 => v,
            Some(_) => 86_400,
            None => 60,
        };
        let ping_timeout = match config.get_int("PingTimeout")?.unwrap_or(5) {
            t if t < 1 || t > ping_interval => ping_interval,
            t => t,
        };
        let max_output_buffer = config.get_int("MaxOutputBufferSize")?.unwrap_or(10 * MTU);

        Ok(Self {
            ping_interval: to_u32("PingInterval", ping_interval)?,
            ping_timeout: to_u32("PingTimeout", ping_timeout)?,
            max_output_buffer: to_u32("MaxOutputBufferSize", max_output_buffer)?,
        })
    }
}

/// Policy snapshot consumed by the listener and routing layers.
#[derive(Debug, Clone)]
pub struct NetOptions {
    pub routing_mode: RoutingMode,
    pub forwarding_mode: ForwardingMode,
    pub address_family: AddressFamily,
    pub bind_address: Option<String>,
    pub bind_to_interface: Option<String>,
    pub direct_only: bool,
    pub strict_subnets: bool,
    pub tunnel_server: bool,
    pub priority_inheritance: bool,
    pub hostnames: bool,
    pub mac_expire: u32,
    pub max_timeout: u32,
    pub udp_rcvbuf: Option<usize>,
    pub udp_sndbuf: Option<usize>,
    pub replay_window: u32,
    /// Seconds a session key stays valid.
    pub key_lifetime: u32,
    pub timing: Timing,
}

impl NetOptions {
    pub fn from_config(config: &ConfigTree, timing: Timing) -> Result<Self, AppError> {
        let direct_only = config.get_bool("DirectOnly")?.unwrap_or(false);
        let tunnel_server = config.get_bool("TunnelServer")?.unwrap_or(false);
        let strict_subnets = config.get_bool("StrictSubnets")?.unwrap_or(false) || tunnel_server;

        let routing_mode = parse_enum(config, "Mode")?;
        let forwarding_mode = parse_enum(config, "Forwarding")?;
        let address_family = parse_enum(config, "AddressFamily")?;

        let priority_inheritance = config.get_bool("PriorityInheritance")?.unwrap_or(false);
        if priority_inheritance && !cfg!(target_os = "linux") {
            tracing::warn!("PriorityInheritance not supported on this platform");
        }

        let mac_expire = to_u32("MACExpire", config.get_int("MACExpire")?.unwrap_or(600))?;

        let max_timeout = match config.get_int("MaxTimeout")? {
            Some(v) if v <= 0 => {
                return Err(AppError::Config(format!("Bogus maximum timeout: {v}")));
            }
            Some(v) => to_u32("MaxTimeout", v)?,
            None => 900,
        };

        let udp_rcvbuf = positive(config, "UDPRcvBuf")?;
        let udp_sndbuf = positive(config, "UDPSndBuf")?;

        let replay_window = match config.get_int("ReplayWindow")? {
            Some(v) if v < 0 => {
                return Err(AppError::Config("ReplayWindow cannot be negative".into()));
            }
            Some(v) => to_u32("ReplayWindow", v)?,
            None => 16,
        };

        let key_lifetime = match config.get_int("KeyExpire")? {
            Some(v) if v < 0 => {
                return Err(AppError::Config("KeyExpire cannot be negative".into()));
            }
            Some(v) => to_u32("KeyExpire", v)?,
            None => 3600,
        };

        Ok(Self {
            routing_mode,
            forwarding_mode,
            address_family,
            bind_address: config.get_string("BindToAddress").map(str::to_string),
            bind_to_interface: config.get_string("BindToInterface").map(str::to_string),
            direct_only,
            strict_subnets,
            tunnel_server,
            priority_inheritance,
            hostnames: config.get_bool("Hostnames")?.unwrap_or(false),
            mac_expire,
            max_timeout,
            udp_rcvbuf,
            udp_sndbuf,
            replay_window,
            key_lifetime,
            timing,
        })
    }
}

/// Routing option bits the local node announces.
pub fn node_options(config: &ConfigTree) -> Result<NodeOptions, AppError> {
    let mut options = NodeOptions::default();
    if config.get_bool("IndirectData")?.unwrap_or(false) {
        options.insert(NodeOptions::INDIRECT);
    }
    if config.get_bool("TCPOnly")?.unwrap_or(false) {
        options.insert(NodeOptions::TCP_ONLY);
        options.insert(NodeOptions::INDIRECT);
    }
    if config.get_bool("PMTUDiscovery")?.unwrap_or(true) {
        options.insert(NodeOptions::PMTU_DISCOVERY);
    }
    if config.get_bool("ClampMSS")?.unwrap_or(true) {
        options.insert(NodeOptions::CLAMP_MSS);
    }
    Ok(options)
}

fn parse_enum<T>(config: &ConfigTree, variable: &str) -> Result<T, AppError>
where
    T: FromStr<Err = AppError> + Default,
{
    config.get_string(variable).map_or(Ok(T::default()), |s| s.parse())
}

fn positive(config: &ConfigTree, variable: &str) -> Result<Option<usize>, AppError> {
    match config.get_int(variable)? {
        Some(v) if v <= 0 => Err(AppError::Config(format!("{variable} must be positive, got {v}"))),
        Some(v) => usize::try_from(v)
            .map(Some)
            .map_err(|_| AppError::Config(format!("{variable} out of range: {v}"))),
        None => Ok(None),
    }
}

fn to_u32(variable: &str, value: i64) -> Result<u32, AppError> {
    u32::try_from(value).map_err(|_| AppError::Config(format!("{variable} out of range: {value}")))
}
