//! Listening sockets: one TCP listener and one UDP socket per local address.
//!
//! A [`ListenSocket`] only exists once both halves are bound. Dropping it
//! closes both, so an address whose UDP bind fails never leaves its TCP
//! listener behind.

use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, TcpListener, ToSocketAddrs, UdpSocket};

use socket2::{Domain, Protocol, Socket, Type};
use tracing::{debug, error, info, warn};

use crate::error::AppError;
use crate::net::options::AddressFamily;

/// Upper bound on listening socket pairs.
pub const MAX_LISTEN_SOCKETS: usize = 8;

const LISTEN_BACKLOG: i32 = 3;

#[derive(Debug)]
pub struct ListenSocket {
    tcp: TcpListener,
    udp: UdpSocket,
    addr: SocketAddr,
}

impl ListenSocket {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn tcp(&self) -> &TcpListener {
        &self.tcp
    }

    pub fn udp(&self) -> &UdpSocket {
        &self.udp
    }

    /// Hand both sockets to the event loop.
    pub fn into_parts(self) -> (TcpListener, UdpSocket, SocketAddr) {
        (self.tcp, self.udp, self.addr)
    }
}

/// Per-socket settings applied before binding.
#[derive(Debug, Clone, Default)]
pub struct SocketOptions {
    pub udp_rcvbuf: Option<usize>,
    pub udp_sndbuf: Option<usize>,
    pub bind_to_interface: Option<String>,
}

/// Resolve `bind` (or the wildcard addresses) and open a socket pair on each.
///
/// Fails when resolution yields nothing or no pair could be opened.
pub fn open_listeners(
    bind: Option<&str>,
    port: &str,
    family: AddressFamily,
    options: &SocketOptions,
) -> Result<Vec<ListenSocket>, AppError> {
    let candidates = resolve_candidates(bind, port, family)?;
    let sockets = open_candidates(&candidates, options);

    if sockets.is_empty() {
        error!("Unable to create any listening socket");
        return Err(AppError::Network("Unable to create any listening socket".into()));
    }
    info!(count = sockets.len(), "Ready");
    Ok(sockets)
}

/// Candidate local addresses for `bind:port`, restricted to `family`.
pub fn resolve_candidates(
    bind: Option<&str>,
    port: &str,
    family: AddressFamily,
) -> Result<Vec<SocketAddr>, AppError> {
    let port: u16 = port
        .parse()
        .map_err(|_| AppError::Network(format!("invalid port number {port:?}")))?;

    let resolved: Vec<SocketAddr> = match bind {
        None => vec![
            SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)),
            SocketAddr::from((Ipv6Addr::UNSPECIFIED, port)),
        ],
        Some(host) => (host, port)
            .to_socket_addrs()
            .map_err(|e| AppError::Network(format!("cannot resolve {host} port {port}: {e}")))?
            .collect(),
    };

    let mut candidates: Vec<SocketAddr> = Vec::with_capacity(resolved.len());
    for addr in resolved.into_iter().filter(|a| family.matches(a)) {
        if !candidates.contains(&addr) {
            candidates.push(addr);
        }
    }

    if candidates.is_empty() {
        return Err(AppError::Network(format!(
            "no {family:?} address to listen on for port {port}"
        )));
    }
    Ok(candidates)
}

/// Open as many socket pairs as possible, skipping addresses that fail.
pub fn open_candidates(candidates: &[SocketAddr], options: &SocketOptions) -> Vec<ListenSocket> {
    let mut sockets = Vec::new();
    for addr in candidates {
        if sockets.len() >= MAX_LISTEN_SOCKETS {
            warn!(addr = %addr, max = MAX_LISTEN_SOCKETS, "too many listening sockets, ignoring address");
            continue;
        }

        let tcp = match tcp_listener(*addr, options) {
            Ok(tcp) => tcp,
            Err(e) => {
                debug!(addr = %addr, error = %e, "cannot open TCP listener");
                continue;
            }
        };
        let bound = tcp.local_addr().unwrap_or(*addr);

        // `tcp` is dropped, and closed, if this fails.
        let udp = match udp_socket(bound, options) {
            Ok(udp) => udp,
            Err(e) => {
                debug!(addr = %bound, error = %e, "cannot open UDP socket");
                continue;
            }
        };

        info!(addr = %bound, "Listening on {bound}");
        sockets.push(ListenSocket { tcp, udp, addr: bound });
    }
    sockets
}

/// Resolve a `Port` value to a number. Numeric values pass through; anything
/// else is resolved as a UDP service on `localhost` through the system
/// resolver, so every service source in `nsswitch.conf` is honoured.
pub fn resolve_port(port: &str) -> Result<String, AppError> {
    if port.parse::<u16>().is_ok() {
        return Ok(port.to_string());
    }

    lookup_service(port)
        .map(|n| n.to_string())
        .map_err(|e| AppError::Network(format!("unknown service {port:?} for udp: {e}")))
}

// ── internals ────────────────────────────────────────────────────────────────

#[cfg(unix)]
fn lookup_service(service: &str) -> io::Result<u16> {
    use std::ffi::{CStr, CString};
    use std::ptr;

    let service =
        CString::new(service).map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

    // SAFETY: an all-zero `addrinfo` is the documented "no hints" value.
    let mut hints: libc::addrinfo = unsafe { std::mem::zeroed() };
    hints.ai_family = libc::AF_UNSPEC;
    hints.ai_socktype = libc::SOCK_DGRAM;

    let mut result: *mut libc::addrinfo = ptr::null_mut();
    // SAFETY: both strings are NUL-terminated and outlive the call; `result`
    // is only read on success and freed below.
    let rc = unsafe {
        libc::getaddrinfo(c"localhost".as_ptr(), service.as_ptr(), &hints, &mut result)
    };
    if rc != 0 {
        // SAFETY: gai_strerror returns a static NUL-terminated string.
        let reason = unsafe { CStr::from_ptr(libc::gai_strerror(rc)) };
        return Err(io::Error::other(reason.to_string_lossy().into_owned()));
    }

    // SAFETY: on success `result` is a non-empty list owned by us until freed.
    let port = unsafe { sockaddr_port(&*result) };
    // SAFETY: `result` came from a successful getaddrinfo and is freed once.
    unsafe { libc::freeaddrinfo(result) };
    port.ok_or_else(|| io::Error::other("resolver returned no internet address"))
}

/// Port of the first address in `info`, if it is IPv4 or IPv6.
///
/// # Safety
/// `info.ai_addr` must point to a socket address of `info.ai_family`.
#[cfg(unix)]
unsafe fn sockaddr_port(info: &libc::addrinfo) -> Option<u16> {
    if info.ai_addr.is_null() {
        return None;
    }
    // SAFETY: the family tag guarantees the concrete sockaddr type.
    let port = match info.ai_family {
        libc::AF_INET => unsafe { (*info.ai_addr.cast::<libc::sockaddr_in>()).sin_port },
        libc::AF_INET6 => unsafe { (*info.ai_addr.cast::<libc::sockaddr_in6>()).sin6_port },
        _ => return None,
    };
    Some(u16::from_be(port))
}

#[cfg(not(unix))]
fn lookup_service(_service: &str) -> io::Result<u16> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "service names are not supported on this platform",
    ))
}

fn tcp_listener(addr: SocketAddr, options: &SocketOptions) -> io::Result<TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_nonblocking(true)?;
    socket.set_reuse_address(true)?;
    if addr.is_ipv6() {
        socket.set_only_v6(true)?;
    }
    bind_to_interface(&socket, options)?;
    socket.bind(&addr.into())?;
    socket.listen(LISTEN_BACKLOG)?;
    Ok(socket.into())
}

fn udp_socket(addr: SocketAddr, options: &SocketOptions) -> io::Result<UdpSocket> {
    let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_nonblocking(true)?;
    socket.set_reuse_address(true)?;
    if addr.is_ipv6() {
        socket.set_only_v6(true)?;
    }
    if let Some(size) = options.udp_rcvbuf {
        socket.set_recv_buffer_size(size)?;
    }
    if let Some(size) = options.udp_sndbuf {
        socket.set_send_buffer_size(size)?;
    }
    bind_to_interface(&socket, options)?;
    socket.bind(&addr.into())?;
    Ok(socket.into())
}

#[cfg(target_os = "linux")]
fn bind_to_interface(socket: &Socket, options: &SocketOptions) -> io::Result<()> {
    match &options.bind_to_interface {
        Some(iface) => socket.bind_device(Some(iface.as_bytes())),
        None => Ok(()),
    }
}

#[cfg(not(target_os = "linux"))]
fn bind_to_interface(_socket: &Socket, options: &SocketOptions) -> io::Result<()> {
    if options.bind_to_interface.is_some() {
        warn!("BindToInterface not supported on this platform");
    }
    Ok(())
}
