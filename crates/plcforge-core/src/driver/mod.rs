/// Device abstraction contract and vendor plumbing
///
/// The `PlcDriver` trait is the single seam between the recovery engine
/// and vendor-specific wire encoding. Everything above this module works
/// against the trait, never against a concrete vendor.
pub mod identify;
pub mod registry;
pub mod sim;

use std::collections::HashMap;
use std::time::Duration;

use thiserror::Error;

use crate::{
    AccessLevel, DeviceIdentity, PlcMode, ProgramImage, ProtectionStatus, TagData, TagValue,
};

pub use identify::{identify_vendor, IdentifyConfig};
pub use registry::{DeviceRegistry, DriverCtor, FactoryError};
pub use sim::SimulatedPlc;

/// Error kinds a driver operation can surface.
///
/// The split matters to callers: a wrong password is `Ok(false)` from
/// `authenticate`, while `Transport`/`Protocol` mean the attempt itself
/// could not be carried out.
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("not connected")]
    NotConnected,
    #[error("operation not supported by this driver: {0}")]
    Unsupported(String),
    #[error("access denied: {0}")]
    AccessDenied(String),
}

pub type DriverResult<T> = Result<T, DriverError>;

/// Connection parameters shared across vendors, with an escape hatch
/// for vendor-specific extras.
#[derive(Debug, Clone)]
pub struct ConnectParams {
    pub rack: Option<u16>,
    pub slot: Option<u16>,
    pub port: Option<u16>,
    pub timeout: Duration,
    pub extra: HashMap<String, String>,
}

impl Default for ConnectParams {
    fn default() -> Self {
        Self {
            rack: None,
            slot: None,
            port: None,
            timeout: Duration::from_secs(2),
            extra: HashMap::new(),
        }
    }
}

/// Capability contract every vendor driver implements.
///
/// One driver instance holds at most one logical session; sharing an
/// instance across threads is not supported. Connecting and mutating
/// operations record a last-error string so callers can report the
/// failure cause without an error type crossing the driver boundary.
pub trait PlcDriver: Send {
    /// Open a session to the controller at `address`.
    /// Returns `Ok(false)` when the device refused the session and
    /// records the reason in `last_error`.
    fn connect(&mut self, address: &str, params: &ConnectParams) -> DriverResult<bool>;

    fn disconnect(&mut self);

    fn is_connected(&self) -> bool;

    /// Identity captured during the last successful connect.
    fn identity(&self) -> DriverResult<DeviceIdentity>;

    /// Current protection snapshot, recomputed on demand.
    fn protection_status(&mut self) -> DriverResult<ProtectionStatus>;

    fn read_tag(&mut self, name: &str) -> DriverResult<TagValue>;

    fn write_tag(&mut self, name: &str, value: TagData) -> DriverResult<bool>;

    /// Batched read, sequential by default. Drivers with a native batch
    /// service override this for efficiency.
    fn read_tags(&mut self, names: &[&str]) -> DriverResult<Vec<TagValue>> {
        names.iter().map(|n| self.read_tag(n)).collect()
    }

    /// Batched write, sequential by default.
    fn write_tags(&mut self, values: &[(&str, TagData)]) -> DriverResult<bool> {
        for (name, value) in values {
            if !self.write_tag(name, value.clone())? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn upload_program(&mut self) -> DriverResult<ProgramImage>;

    fn download_program(&mut self, image: &ProgramImage) -> DriverResult<bool>;

    fn start(&mut self) -> DriverResult<bool>;

    fn stop(&mut self) -> DriverResult<bool>;

    fn mode(&mut self) -> DriverResult<PlcMode>;

    /// Present a password to the controller. `Ok(false)` means the
    /// password was rejected; transport problems are `Err`.
    fn authenticate(&mut self, password: &str) -> DriverResult<bool>;

    /// Drop the current authentication/session. Default is a no-op.
    fn clear_authentication(&mut self) -> DriverResult<bool> {
        Ok(true)
    }

    fn access_level(&mut self) -> DriverResult<AccessLevel>;

    /// Reason the most recent connecting or mutating operation failed,
    /// if it did.
    fn last_error(&self) -> Option<&str>;
}
