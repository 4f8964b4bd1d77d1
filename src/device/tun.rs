//! Platform-native tunnel device. On Linux this is the universal TUN/TAP
//! driver: TUN in router mode, TAP (Ethernet frames) in switch and hub mode.

use std::fs::File;

use tracing::info;

use crate::device::DeviceConfig;
use crate::error::AppError;
use crate::net::options::RoutingMode;

pub const DEFAULT_DEVICE: &str = "/dev/net/tun";

#[derive(Debug)]
pub struct TunDevice {
    device: String,
    requested: Option<String>,
    interface: Option<String>,
    tap: bool,
    file: Option<File>,
}

impl TunDevice {
    pub fn new(config: DeviceConfig) -> Self {
        Self {
            device: config.device.unwrap_or_else(|| DEFAULT_DEVICE.to_string()),
            requested: config.interface.or(config.netname),
            interface: None,
            tap: config.routing_mode != RoutingMode::Router,
            file: None,
        }
    }

    #[cfg(target_os = "linux")]
    pub fn setup(&mut self) -> Result<(), AppError> {
        let file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(&self.device)
            .map_err(|e| AppError::Device(format!("Could not open {}: {e}", self.device)))?;

        let name = linux::attach(&file, self.requested.as_deref(), self.tap)
            .map_err(|e| AppError::Device(format!("TUNSETIFF on {} failed: {e}", self.device)))?;

        let mode = if self.tap { "tap" } else { "tun" };
        info!(device = %self.device, interface = %name, mode, "tunnel device opened");
        self.interface = Some(name);
        self.file = Some(file);
        Ok(())
    }

    #[cfg(not(target_os = "linux"))]
    pub fn setup(&mut self) -> Result<(), AppError> {
        Err(AppError::Device(format!(
            "tun device {} is not supported on this platform",
            self.device
        )))
    }

    pub fn close(&mut self) {
        self.file = None;
    }

    pub fn device_path(&self) -> &str {
        &self.device
    }

    /// Kernel-assigned name once open, otherwise the requested one.
    pub fn interface(&self) -> Option<&str> {
        self.interface.as_deref().or(self.requested.as_deref())
    }

    pub fn is_open(&self) -> bool {
        self.file.is_some()
    }
}

#[cfg(target_os = "linux")]
mod linux {
    use std::fs::File;
    use std::io;
    use std::os::fd::AsRawFd;

    /// Build a TUNSETIFF request. The name is cut to leave room for the NUL.
    pub(super) fn request(requested: Option<&str>, tap: bool) -> libc::ifreq {
        // SAFETY: an all-zero ifreq is a valid empty request.
        let mut req: libc::ifreq = unsafe { std::mem::zeroed() };
        let mode = if tap { libc::IFF_TAP } else { libc::IFF_TUN };
        req.ifr_ifru.ifru_flags = (mode | libc::IFF_NO_PI) as libc::c_short;
        if let Some(name) = requested {
            let bytes = name.as_bytes().iter().take(libc::IFNAMSIZ - 1);
            for (dst, &b) in req.ifr_name.iter_mut().zip(bytes) {
                *dst = b as libc::c_char;
            }
        }
        req
    }

    /// Attach `file` to a TUN or TAP interface and return its name.
    pub(super) fn attach(file: &File, requested: Option<&str>, tap: bool) -> io::Result<String> {
        let mut req = request(requested, tap);

        // SAFETY: `req` is an initialised ifreq that outlives the call.
        let ptr: *mut libc::ifreq = &mut req;
        let rc = unsafe { libc::ioctl(file.as_raw_fd(), libc::TUNSETIFF as _, ptr) };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }

        let name: Vec<u8> = req
            .ifr_name
            .iter()
            .take_while(|&&c| c != 0)
            .map(|&c| c as u8)
            .collect();
        Ok(String::from_utf8_lossy(&name).into_owned())
    }
}
