/// Device registry and factory
///
/// Maps a vendor tag to a driver constructor and produces connected
/// driver instances. The factory never retries a failed connect.
use std::collections::HashMap;

use thiserror::Error;

use crate::driver::identify::{identify_vendor, IdentifyConfig};
use crate::driver::{ConnectParams, PlcDriver};
use crate::Vendor;

/// Constructor producing a fresh, unconnected driver instance.
pub type DriverCtor = Box<dyn Fn() -> Box<dyn PlcDriver> + Send + Sync>;

#[derive(Debug, Error)]
pub enum FactoryError {
    #[error("could not identify PLC vendor at {address}")]
    UnsupportedVendor { address: String },
    #[error("no driver registered for vendor {0}")]
    NoDriverRegistered(Vendor),
    #[error("failed to connect to {vendor} PLC at {address}: {detail}")]
    ConnectionFailure {
        vendor: Vendor,
        address: String,
        detail: String,
    },
}

/// Mutable vendor-to-constructor mapping, populated at startup by each
/// driver module registering itself.
#[derive(Default)]
pub struct DeviceRegistry {
    drivers: HashMap<Vendor, DriverCtor>,
    identify: IdentifyConfig,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Override probe ports/timeouts, mainly for tests.
    pub fn with_identify_config(mut self, config: IdentifyConfig) -> Self {
        self.identify = config;
        self
    }

    /// Register a driver constructor for a vendor. A later registration
    /// for the same vendor replaces the earlier one.
    pub fn register<F>(&mut self, vendor: Vendor, ctor: F)
    where
        F: Fn() -> Box<dyn PlcDriver> + Send + Sync + 'static,
    {
        tracing::debug!("registering driver for {vendor}");
        self.drivers.insert(vendor, Box::new(ctor));
    }

    pub fn is_registered(&self, vendor: Vendor) -> bool {
        self.drivers.contains_key(&vendor)
    }

    /// Create a connected driver for the controller at `address`.
    ///
    /// When `vendor` is absent the registry fingerprints the endpoint
    /// first; an unidentifiable endpoint is `UnsupportedVendor`.
    pub fn create(
        &self,
        address: &str,
        vendor: Option<Vendor>,
        model: Option<&str>,
        params: &ConnectParams,
    ) -> Result<Box<dyn PlcDriver>, FactoryError> {
        let vendor = match vendor {
            Some(v) => v,
            None => match identify_vendor(address, &self.identify) {
                Vendor::Unknown => {
                    return Err(FactoryError::UnsupportedVendor {
                        address: address.to_string(),
                    })
                }
                v => v,
            },
        };

        let ctor = self
            .drivers
            .get(&vendor)
            .ok_or(FactoryError::NoDriverRegistered(vendor))?;

        let mut driver = ctor();

        let mut params = params.clone();
        if let Some(model) = model {
            params.extra.insert("model".to_string(), model.to_string());
        }

        let connected = driver
            .connect(address, &params)
            .map_err(|e| FactoryError::ConnectionFailure {
                vendor,
                address: address.to_string(),
                detail: e.to_string(),
            })?;

        if !connected {
            let detail = driver
                .last_error()
                .unwrap_or("connection refused")
                .to_string();
            return Err(FactoryError::ConnectionFailure {
                vendor,
                address: address.to_string(),
                detail,
            });
        }

        tracing::info!("connected to {vendor} PLC at {address}");
        Ok(driver)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::sim::SimulatedPlc;

    fn registry_with_sim() -> DeviceRegistry {
        let mut registry = DeviceRegistry::new();
        registry.register(Vendor::Siemens, || {
            Box::new(SimulatedPlc::siemens_s7_300().with_password("1234"))
        });
        registry
    }

    #[test]
    fn create_with_explicit_vendor_connects() {
        let registry = registry_with_sim();
        let driver = registry
            .create("192.0.2.10", Some(Vendor::Siemens), None, &ConnectParams::default())
            .unwrap();
        assert!(driver.is_connected());
    }

    #[test]
    fn unregistered_vendor_is_refused() {
        let registry = registry_with_sim();
        let err = registry
            .create("192.0.2.10", Some(Vendor::Omron), None, &ConnectParams::default())
            .err()
            .unwrap();
        assert!(matches!(err, FactoryError::NoDriverRegistered(Vendor::Omron)));
    }

    #[test]
    fn refused_connect_carries_driver_error_text() {
        let mut registry = DeviceRegistry::new();
        registry.register(Vendor::Siemens, || {
            Box::new(SimulatedPlc::siemens_s7_300().refusing_connections("station unreachable"))
        });

        let err = registry
            .create("192.0.2.10", Some(Vendor::Siemens), None, &ConnectParams::default())
            .err()
            .unwrap();
        match err {
            FactoryError::ConnectionFailure { detail, .. } => {
                assert!(detail.contains("station unreachable"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
