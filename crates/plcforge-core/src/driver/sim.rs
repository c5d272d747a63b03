/// In-memory controller used by tests and offline demos
///
/// Implements the full driver contract against a configurable fake
/// device: a known password, a tag table, a program image with system
/// blocks, and switches to emulate refused connections or transport
/// faults. This is the reference implementation of the contract's
/// semantics, not a wire protocol.
use std::collections::HashMap;

use chrono::Utc;

use crate::driver::{ConnectParams, DriverError, DriverResult, PlcDriver};
use crate::{
    AccessLevel, BlockKind, DeviceIdentity, PlcMode, ProgramBlock, ProgramImage, ProtectionStatus,
    TagData, TagQuality, TagValue, Vendor,
};

pub struct SimulatedPlc {
    vendor: Vendor,
    model: String,
    firmware: String,
    serial: String,
    password: Option<String>,
    protection: ProtectionStatus,
    tags: HashMap<String, TagData>,
    system_blocks: Vec<(u32, Vec<u8>)>,

    refuse_reason: Option<String>,
    transport_fault: bool,

    connected: bool,
    authenticated: bool,
    address: Option<String>,
    mode: PlcMode,
    last_error: Option<String>,
    auth_attempts: u64,
    writes: u64,
}

impl SimulatedPlc {
    pub fn new(vendor: Vendor, model: &str, firmware: &str) -> Self {
        Self {
            vendor,
            model: model.to_string(),
            firmware: firmware.to_string(),
            serial: "SIM-000001".to_string(),
            password: None,
            protection: ProtectionStatus::default(),
            tags: HashMap::new(),
            system_blocks: Vec::new(),
            refuse_reason: None,
            transport_fault: false,
            connected: false,
            authenticated: false,
            address: None,
            mode: PlcMode::Stop,
            last_error: None,
            auth_attempts: 0,
            writes: 0,
        }
    }

    pub fn siemens_s7_300() -> Self {
        Self::new(Vendor::Siemens, "S7-300", "V3.1.2")
    }

    pub fn siemens_s7_1200() -> Self {
        Self::new(Vendor::Siemens, "S7-1200", "V2.2")
    }

    /// Protect the CPU with `password`; authentication is required for
    /// write access until it is presented.
    pub fn with_password(mut self, password: &str) -> Self {
        self.password = Some(password.to_string());
        self.protection.cpu_protected = true;
        self.protection.access_level = AccessLevel::ReadOnly;
        self
    }

    pub fn with_tag(mut self, name: &str, data: TagData) -> Self {
        self.tags.insert(name.to_string(), data);
        self
    }

    /// Install a raw system data block, as returned by program upload.
    pub fn with_system_block(mut self, number: u32, data: Vec<u8>) -> Self {
        self.system_blocks.push((number, data));
        self
    }

    /// Expose extra protection detail fields, e.g. leaked hash material.
    pub fn with_protection_detail(mut self, key: &str, value: &str) -> Self {
        self.protection.details.insert(key.to_string(), value.to_string());
        self
    }

    /// Refuse every connect attempt with the given reason.
    pub fn refusing_connections(mut self, reason: &str) -> Self {
        self.refuse_reason = Some(reason.to_string());
        self
    }

    /// Fail every authenticate call at the transport level.
    pub fn with_transport_fault(mut self) -> Self {
        self.transport_fault = true;
        self
    }

    /// Number of passwords presented so far. Used by tests to assert a
    /// target was never touched.
    pub fn auth_attempts(&self) -> u64 {
        self.auth_attempts
    }

    /// Number of tag/program writes so far.
    pub fn write_count(&self) -> u64 {
        self.writes
    }

    fn require_connected(&self) -> DriverResult<()> {
        if self.connected {
            Ok(())
        } else {
            Err(DriverError::NotConnected)
        }
    }
}

impl PlcDriver for SimulatedPlc {
    fn connect(&mut self, address: &str, _params: &ConnectParams) -> DriverResult<bool> {
        if let Some(reason) = &self.refuse_reason {
            self.last_error = Some(reason.clone());
            return Ok(false);
        }
        self.connected = true;
        self.address = Some(address.to_string());
        self.mode = PlcMode::Run;
        Ok(true)
    }

    fn disconnect(&mut self) {
        self.connected = false;
        self.authenticated = false;
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn identity(&self) -> DriverResult<DeviceIdentity> {
        self.require_connected()?;
        Ok(DeviceIdentity {
            vendor: self.vendor,
            model: self.model.clone(),
            firmware: self.firmware.clone(),
            serial: self.serial.clone(),
            name: format!("sim-{}", self.model.to_lowercase()),
            address: self.address.clone(),
            rack: Some(0),
            slot: Some(2),
            extra: HashMap::new(),
        })
    }

    fn protection_status(&mut self) -> DriverResult<ProtectionStatus> {
        self.require_connected()?;
        let mut status = self.protection.clone();
        if self.authenticated {
            status.access_level = AccessLevel::Full;
        }
        Ok(status)
    }

    fn read_tag(&mut self, name: &str) -> DriverResult<TagValue> {
        self.require_connected()?;
        let data = self
            .tags
            .get(name)
            .cloned()
            .ok_or_else(|| DriverError::Protocol(format!("unknown tag: {name}")))?;
        Ok(TagValue {
            name: name.to_string(),
            data,
            address: None,
            timestamp: Some(Utc::now()),
            quality: TagQuality::Good,
        })
    }

    fn write_tag(&mut self, name: &str, value: TagData) -> DriverResult<bool> {
        self.require_connected()?;
        if self.protection.cpu_protected && !self.authenticated {
            self.last_error = Some("write rejected: CPU protection active".to_string());
            return Err(DriverError::AccessDenied("CPU protection active".to_string()));
        }
        self.writes += 1;
        self.tags.insert(name.to_string(), value);
        Ok(true)
    }

    fn upload_program(&mut self) -> DriverResult<ProgramImage> {
        self.require_connected()?;
        let mut blocks: Vec<ProgramBlock> = self
            .system_blocks
            .iter()
            .map(|(number, data)| ProgramBlock {
                kind: BlockKind::System,
                number: *number,
                name: format!("SDB{number}"),
                data: data.clone(),
                protected: false,
            })
            .collect();
        blocks.push(ProgramBlock {
            kind: BlockKind::Organization,
            number: 1,
            name: "OB1".to_string(),
            data: vec![0x70, 0x70, 0x01, 0x01],
            protected: self.protection.block_protected,
        });

        Ok(ProgramImage {
            vendor: self.vendor,
            model: self.model.clone(),
            blocks,
            configuration: HashMap::new(),
            metadata: HashMap::new(),
        })
    }

    fn download_program(&mut self, _image: &ProgramImage) -> DriverResult<bool> {
        self.require_connected()?;
        if self.protection.cpu_protected && !self.authenticated {
            self.last_error = Some("download rejected: CPU protection active".to_string());
            return Ok(false);
        }
        self.writes += 1;
        Ok(true)
    }

    fn start(&mut self) -> DriverResult<bool> {
        self.require_connected()?;
        self.mode = PlcMode::Run;
        Ok(true)
    }

    fn stop(&mut self) -> DriverResult<bool> {
        self.require_connected()?;
        self.mode = PlcMode::Stop;
        Ok(true)
    }

    fn mode(&mut self) -> DriverResult<PlcMode> {
        self.require_connected()?;
        Ok(self.mode)
    }

    fn authenticate(&mut self, password: &str) -> DriverResult<bool> {
        if self.transport_fault {
            self.last_error = Some("transport fault".to_string());
            return Err(DriverError::Transport("simulated fault".to_string()));
        }
        self.require_connected()?;
        self.auth_attempts += 1;

        match &self.password {
            Some(expected) if expected == password => {
                self.authenticated = true;
                Ok(true)
            }
            Some(_) => {
                self.last_error = Some("authentication rejected".to_string());
                Ok(false)
            }
            // No protection configured: any password grants access.
            None => {
                self.authenticated = true;
                Ok(true)
            }
        }
    }

    fn clear_authentication(&mut self) -> DriverResult<bool> {
        self.authenticated = false;
        Ok(true)
    }

    fn access_level(&mut self) -> DriverResult<AccessLevel> {
        self.require_connected()?;
        if self.authenticated || !self.protection.cpu_protected {
            Ok(AccessLevel::Full)
        } else {
            Ok(AccessLevel::ReadOnly)
        }
    }

    fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connected(sim: SimulatedPlc) -> SimulatedPlc {
        let mut sim = sim;
        sim.connect("192.0.2.1", &ConnectParams::default()).unwrap();
        sim
    }

    #[test]
    fn authenticate_distinguishes_wrong_password_from_fault() {
        let mut plc = connected(SimulatedPlc::siemens_s7_300().with_password("1234"));
        assert_eq!(plc.authenticate("0000").unwrap(), false);
        assert_eq!(plc.authenticate("1234").unwrap(), true);

        let mut faulty =
            connected(SimulatedPlc::siemens_s7_300().with_password("1234").with_transport_fault());
        assert!(matches!(
            faulty.authenticate("1234"),
            Err(DriverError::Transport(_))
        ));
    }

    #[test]
    fn protection_gates_writes_until_authenticated() {
        let mut plc = connected(
            SimulatedPlc::siemens_s7_300()
                .with_password("admin")
                .with_tag("Motor1.Speed", TagData::Int(0)),
        );

        assert!(matches!(
            plc.write_tag("Motor1.Speed", TagData::Int(50)),
            Err(DriverError::AccessDenied(_))
        ));
        assert!(plc.last_error().unwrap().contains("CPU protection"));

        plc.authenticate("admin").unwrap();
        assert!(plc.write_tag("Motor1.Speed", TagData::Int(50)).unwrap());
        assert_eq!(plc.access_level().unwrap(), AccessLevel::Full);
    }

    #[test]
    fn batched_reads_fall_back_to_sequential() {
        let mut plc = connected(
            SimulatedPlc::siemens_s7_300()
                .with_tag("A", TagData::Bool(true))
                .with_tag("B", TagData::Int(7)),
        );

        let values = plc.read_tags(&["A", "B"]).unwrap();
        assert_eq!(values.len(), 2);
        assert_eq!(values[1].data, TagData::Int(7));
    }

    #[test]
    fn disconnected_operations_fail() {
        let mut plc = SimulatedPlc::siemens_s7_300();
        assert!(matches!(plc.read_tag("A"), Err(DriverError::NotConnected)));
        assert!(matches!(plc.mode(), Err(DriverError::NotConnected)));
    }
}
