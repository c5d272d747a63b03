use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub mod audit;
pub mod driver;
pub mod recovery;

// Re-export key recovery types
pub use recovery::{
    CancelToken, CharsetMode, HashAlgorithm, HashCandidate, RecoveryConfig, RecoveryEngine,
    RecoveryMethod, RecoveryProgress, RecoveryResult, RecoveryStatus, RecoveryTarget, TargetKind,
};

pub use audit::{AuditEntry, AuditTrail, IntegrityReport};
pub use driver::{
    ConnectParams, DeviceRegistry, DriverError, FactoryError, PlcDriver, identify_vendor,
};

/// Supported PLC vendors
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Vendor {
    Siemens,
    AllenBradley,
    Omron,
    Delta,
    Unknown,
}

impl Vendor {
    /// Parse a vendor name as supplied on the command line or in config.
    /// Matching is case-insensitive and tolerant of separators.
    pub fn parse(name: &str) -> Option<Vendor> {
        match name.to_ascii_lowercase().replace(['-', '_', ' '], "").as_str() {
            "siemens" => Some(Vendor::Siemens),
            "allenbradley" | "rockwell" | "ab" => Some(Vendor::AllenBradley),
            "omron" => Some(Vendor::Omron),
            "delta" => Some(Vendor::Delta),
            "unknown" => Some(Vendor::Unknown),
            _ => None,
        }
    }
}

impl std::fmt::Display for Vendor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Vendor::Siemens => write!(f, "Siemens"),
            Vendor::AllenBradley => write!(f, "Allen-Bradley"),
            Vendor::Omron => write!(f, "Omron"),
            Vendor::Delta => write!(f, "Delta"),
            Vendor::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Access level granted by the controller after authentication
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AccessLevel {
    None,
    ReadOnly,
    ReadWrite,
    Full,
}

/// Controller operating mode
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlcMode {
    Run,
    Stop,
    Program,
    Fault,
    Unknown,
}

/// Granularity a password guards: whole project, CPU runtime access,
/// or an individual code block.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProtectionScope {
    Project,
    Cpu,
    Block,
}

impl std::fmt::Display for ProtectionScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProtectionScope::Project => write!(f, "project"),
            ProtectionScope::Cpu => write!(f, "cpu"),
            ProtectionScope::Block => write!(f, "block"),
        }
    }
}

/// Identity of a connected controller.
///
/// Produced once per successful connect and immutable afterwards;
/// a fresh connect recomputes it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceIdentity {
    pub vendor: Vendor,
    pub model: String,
    pub firmware: String,
    pub serial: String,
    pub name: String,
    pub address: Option<String>,
    pub rack: Option<u16>,
    pub slot: Option<u16>,
    /// Vendor-specific extra fields
    pub extra: HashMap<String, String>,
}

/// Protection/security snapshot of a controller, recomputed on demand
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProtectionStatus {
    pub cpu_protected: bool,
    pub project_protected: bool,
    pub block_protected: bool,
    pub know_how_protected: bool,
    pub access_level: AccessLevel,
    pub details: HashMap<String, String>,
}

impl Default for AccessLevel {
    fn default() -> Self {
        AccessLevel::Full
    }
}

/// Typed payload of a controller tag
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TagData {
    Bool(bool),
    Int(i64),
    Real(f64),
    Text(String),
    Bytes(Vec<u8>),
}

/// A named, typed variable read from a controller
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TagValue {
    pub name: String,
    pub data: TagData,
    pub address: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
    pub quality: TagQuality,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TagQuality {
    #[default]
    Good,
    Uncertain,
    Bad,
}

/// Program block kinds, IEC 61131-3 aligned
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlockKind {
    Organization,
    Function,
    FunctionBlock,
    Data,
    /// Vendor system data, carries configuration and protection material
    System,
}

/// A single block of a controller program
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgramBlock {
    pub kind: BlockKind,
    pub number: u32,
    pub name: String,
    pub data: Vec<u8>,
    pub protected: bool,
}

/// Container for a complete controller program as uploaded from a device
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgramImage {
    pub vendor: Vendor,
    pub model: String,
    pub blocks: Vec<ProgramBlock>,
    pub configuration: HashMap<String, String>,
    pub metadata: HashMap<String, String>,
}

impl ProgramImage {
    /// Find a block by kind and number.
    pub fn block(&self, kind: BlockKind, number: u32) -> Option<&ProgramBlock> {
        self.blocks
            .iter()
            .find(|b| b.kind == kind && b.number == number)
    }
}
