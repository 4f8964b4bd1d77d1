//! UML switch device: a Unix socket that a User-Mode Linux guest connects to.

use std::os::unix::net::UnixListener;

use tracing::{info, warn};

use crate::device::DeviceConfig;
use crate::error::AppError;

#[derive(Debug)]
pub struct UmlDevice {
    device: String,
    interface: String,
    listener: Option<UnixListener>,
}

impl UmlDevice {
    pub fn new(config: DeviceConfig) -> Self {
        let netname = config.netname.unwrap_or_default();
        let device = config.device.unwrap_or_else(|| {
            std::env::temp_dir()
                .join(format!("meshnode-{}.umlsocket", if netname.is_empty() { "default" } else { &netname }))
                .display()
                .to_string()
        });
        let interface = config.interface.unwrap_or_else(|| "uml".to_string());
        Self { device, interface, listener: None }
    }

    pub fn setup(&mut self) -> Result<(), AppError> {
        // Remove a stale socket left by a previous run.
        let _ = std::fs::remove_file(&self.device);
        let listener = UnixListener::bind(&self.device)
            .map_err(|e| AppError::Device(format!("Could not bind UML socket {}: {e}", self.device)))?;
        listener
            .set_nonblocking(true)
            .map_err(|e| AppError::Device(format!("UML socket: {e}")))?;
        info!(socket = %self.device, "UML socket listening");
        self.listener = Some(listener);
        Ok(())
    }

    pub fn close(&mut self) {
        if self.listener.take().is_some() {
            if let Err(e) = std::fs::remove_file(&self.device) {
                warn!(socket = %self.device, error = %e, "could not remove UML socket");
            }
        }
    }

    pub fn device_path(&self) -> &str {
        &self.device
    }

    pub fn interface(&self) -> &str {
        &self.interface
    }

    pub fn is_open(&self) -> bool {
        self.listener.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn setup_binds_and_close_removes_socket() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("uml.sock");
        let mut d = UmlDevice::new(DeviceConfig {
            device: Some(path.display().to_string()),
            ..DeviceConfig::default()
        });
        d.setup().unwrap();
        assert!(path.exists());
        d.close();
        assert!(!path.exists());
        assert!(!d.is_open());
    }
}
