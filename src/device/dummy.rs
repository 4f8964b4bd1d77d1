//! Dummy device: accepts setup and close, carries no traffic.
//! Used for nodes that only relay, and for tests.

use tracing::info;

use crate::error::AppError;

#[derive(Debug, Default)]
pub struct DummyDevice {
    open: bool,
}

impl DummyDevice {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn setup(&mut self) -> Result<(), AppError> {
        self.open = true;
        info!("dummy device opened");
        Ok(())
    }

    pub fn close(&mut self) {
        self.open = false;
    }

    pub fn device_path(&self) -> &str {
        "dummy"
    }

    pub fn interface(&self) -> &str {
        "dummy"
    }

    pub fn is_open(&self) -> bool {
        self.open
    }
}
