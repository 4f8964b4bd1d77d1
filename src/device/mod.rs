//! Tunnel device backends.
//!
//! `Device` is an enum over the concrete backends; [`build`] picks one by the
//! `DeviceType` option. Adding a backend = new module + new variant + new
//! match arm in each method.

pub mod dummy;
pub mod raw_socket;
pub mod tun;
#[cfg(feature = "device-uml")]
pub mod uml;

use crate::error::AppError;
use crate::net::options::RoutingMode;

/// Inputs shared by every backend.
#[derive(Debug, Clone, Default)]
pub struct DeviceConfig {
    /// `Device` option: path or name of the device to open.
    pub device: Option<String>,
    /// `Interface` option: requested interface name.
    pub interface: Option<String>,
    pub netname: Option<String>,
    pub routing_mode: RoutingMode,
}

#[derive(Debug)]
pub enum Device {
    Dummy(dummy::DummyDevice),
    RawSocket(raw_socket::RawSocketDevice),
    Tun(tun::TunDevice),
    #[cfg(feature = "device-uml")]
    Uml(uml::UmlDevice),
}

/// Select a backend by name; `None` means the platform default.
pub fn build(type_name: Option<&str>, config: DeviceConfig) -> Result<Device, AppError> {
    let Some(name) = type_name else {
        return Ok(Device::Tun(tun::TunDevice::new(config)));
    };
    match name.to_ascii_lowercase().as_str() {
        "dummy" => Ok(Device::Dummy(dummy::DummyDevice::new())),
        "raw_socket" => Ok(Device::RawSocket(raw_socket::RawSocketDevice::new(config))),
        "tun" | "tap" => Ok(Device::Tun(tun::TunDevice::new(config))),
        #[cfg(feature = "device-uml")]
        "uml" => Ok(Device::Uml(uml::UmlDevice::new(config))),
        _ => Err(AppError::Device(format!("Unknown device type {name}"))),
    }
}

impl Device {
    pub fn setup(&mut self) -> Result<(), AppError> {
        match self {
            Device::Dummy(d) => d.setup(),
            Device::RawSocket(d) => d.setup(),
            Device::Tun(d) => d.setup(),
            #[cfg(feature = "device-uml")]
            Device::Uml(d) => d.setup(),
        }
    }

    pub fn close(&mut self) {
        match self {
            Device::Dummy(d) => d.close(),
            Device::RawSocket(d) => d.close(),
            Device::Tun(d) => d.close(),
            #[cfg(feature = "device-uml")]
            Device::Uml(d) => d.close(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Device::Dummy(_) => "dummy",
            Device::RawSocket(_) => "raw_socket",
            Device::Tun(_) => "tun",
            #[cfg(feature = "device-uml")]
            Device::Uml(_) => "uml",
        }
    }

    /// Value exported to hooks as `DEVICE`.
    pub fn device_path(&self) -> Option<&str> {
        match self {
            Device::Dummy(d) => Some(d.device_path()),
            Device::RawSocket(d) => Some(d.device_path()),
            Device::Tun(d) => Some(d.device_path()),
            #[cfg(feature = "device-uml")]
            Device::Uml(d) => Some(d.device_path()),
        }
    }

    /// Value exported to hooks as `INTERFACE`.
    pub fn interface(&self) -> Option<&str> {
        match self {
            Device::Dummy(d) => Some(d.interface()),
            Device::RawSocket(d) => Some(d.interface()),
            Device::Tun(d) => d.interface(),
            #[cfg(feature = "device-uml")]
            Device::Uml(d) => Some(d.interface()),
        }
    }

    pub fn is_open(&self) -> bool {
        match self {
            Device::Dummy(d) => d.is_open(),
            Device::RawSocket(d) => d.is_open(),
            Device::Tun(d) => d.is_open(),
            #[cfg(feature = "device-uml")]
            Device::Uml(d) => d.is_open(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selects_by_name_case_insensitively() {
        let d = build(Some("Dummy"), DeviceConfig::default()).unwrap();
        assert_eq!(d.kind(), "dummy");
        let d = build(Some("raw_socket"), DeviceConfig::default()).unwrap();
        assert_eq!(d.kind(), "raw_socket");
    }

    #[test]
    fn default_is_tun() {
        let d = build(None, DeviceConfig::default()).unwrap();
        assert_eq!(d.kind(), "tun");
        assert!(!d.is_open());
    }

    #[test]
    fn unknown_type_rejected() {
        let err = build(Some("vde"), DeviceConfig::default()).unwrap_err();
        assert!(err.to_string().contains("Unknown device type vde"));
    }

    #[cfg(not(feature = "device-uml"))]
    #[test]
    fn uml_needs_feature() {
        assert!(build(Some("uml"), DeviceConfig::default()).is_err());
    }

    #[test]
    fn dummy_setup_and_close() {
        let mut d = build(Some("dummy"), DeviceConfig::default()).unwrap();
        d.setup().unwrap();
        assert!(d.is_open());
        assert_eq!(d.device_path(), Some("dummy"));
        assert_eq!(d.interface(), Some("dummy"));
        d.close();
        assert!(!d.is_open());
    }
}
