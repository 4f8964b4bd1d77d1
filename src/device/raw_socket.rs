//! Raw packet socket bound to an existing Ethernet interface (Linux only).

use socket2::Socket;
use tracing::info;

use crate::device::DeviceConfig;
use crate::error::AppError;

const DEFAULT_INTERFACE: &str = "eth0";

#[derive(Debug)]
pub struct RawSocketDevice {
    device: String,
    interface: String,
    socket: Option<Socket>,
}

impl RawSocketDevice {
    pub fn new(config: DeviceConfig) -> Self {
        let interface = config
            .interface
            .or_else(|| config.device.clone())
            .unwrap_or_else(|| DEFAULT_INTERFACE.to_string());
        let device = config.device.unwrap_or_else(|| interface.clone());
        Self { device, interface, socket: None }
    }

    #[cfg(target_os = "linux")]
    pub fn setup(&mut self) -> Result<(), AppError> {
        use socket2::{Domain, Protocol, Type};

        // ETH_P_ALL in network byte order.
        let protocol = Protocol::from(i32::from((libc::ETH_P_ALL as u16).to_be()));
        let socket = Socket::new(Domain::PACKET, Type::RAW, Some(protocol)).map_err(|e| {
            AppError::Device(format!("could not open raw socket: {e}"))
        })?;
        socket.bind_device(Some(self.interface.as_bytes())).map_err(|e| {
            AppError::Device(format!("could not bind raw socket to {}: {e}", self.interface))
        })?;
        socket
            .set_nonblocking(true)
            .map_err(|e| AppError::Device(format!("raw socket: {e}")))?;

        info!(interface = %self.interface, "raw socket device opened");
        self.socket = Some(socket);
        Ok(())
    }

    #[cfg(not(target_os = "linux"))]
    pub fn setup(&mut self) -> Result<(), AppError> {
        Err(AppError::Device("raw socket devices are not supported on this platform".into()))
    }

    pub fn close(&mut self) {
        self.socket = None;
    }

    pub fn device_path(&self) -> &str {
        &self.device
    }

    pub fn interface(&self) -> &str {
        &self.interface
    }

    pub fn is_open(&self) -> bool {
        self.socket.is_some()
    }
}
