/// End-to-end recovery workflow tests
///
/// These tests exercise the complete path an operator would take:
/// 1. Build a target (project archive or live controller)
/// 2. Run the engine with an audited configuration
/// 3. Check the outcome and the audit chain it left behind
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use plcforge_core::audit::AuditTrail;
use plcforge_core::driver::sim::SimulatedPlc;
use plcforge_core::driver::{ConnectParams, DriverResult, PlcDriver};
use plcforge_core::{
    AccessLevel, CancelToken, CharsetMode, DeviceIdentity, PlcMode, ProgramImage,
    ProtectionScope, ProtectionStatus, RecoveryConfig, RecoveryEngine, RecoveryMethod,
    RecoveryStatus, RecoveryTarget, TagData, TagValue, Vendor,
};
use sha2::{Digest, Sha256};

/// Build a gzip-compressed project archive with one protection XML
/// entry declaring a salted SHA-256 hash for `password`.
fn project_archive(password: &str) -> tempfile::NamedTempFile {
    let salt = b"0123456789abcdef";
    let mut hasher = Sha256::new();
    hasher.update(salt);
    hasher.update(password.as_bytes());
    let hash = hasher.finalize();

    let xml = format!(
        "<Document><Protection><PasswordHash>{}</PasswordHash>\
         <Algorithm>SHA256_SALTED</Algorithm><Salt>{}</Salt></Protection></Document>",
        hex::encode(hash),
        hex::encode(salt)
    );

    let mut builder = tar::Builder::new(Vec::new());
    let mut header = tar::Header::new_gnu();
    header.set_size(xml.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder
        .append_data(&mut header, "System/SecuritySettings.xml", xml.as_bytes())
        .unwrap();
    let tar_bytes = builder.into_inner().unwrap();

    let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(&tar_bytes).unwrap();
    let gz = encoder.finish().unwrap();

    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(&gz).unwrap();
    file.flush().unwrap();
    file
}

#[test]
fn test_offline_project_recovery_with_audit() {
    let archive = project_archive("simatic");
    let audit_dir = tempfile::tempdir().unwrap();
    let audit = Arc::new(AuditTrail::open(audit_dir.path()).unwrap());

    let mut target =
        RecoveryTarget::file(archive.path(), Vendor::Siemens, ProtectionScope::Project);
    let engine = RecoveryEngine::new().with_audit(Arc::clone(&audit));

    let config = RecoveryConfig {
        methods: vec![RecoveryMethod::FileParse, RecoveryMethod::Dictionary],
        wordlist: Some(vec!["step7".to_string(), "simatic".to_string()]),
        ..RecoveryConfig::default()
    };
    let result = engine.recover(&mut target, &config, true);

    assert_eq!(result.status, RecoveryStatus::Success);
    assert_eq!(result.password.as_deref(), Some("simatic"));
    assert_eq!(result.method, Some(RecoveryMethod::Dictionary));
    assert_eq!(result.attempts, 2);
    // The extractor's findings are surfaced even though file parsing
    // alone could not produce the password.
    assert_eq!(
        result.details.get("hash_algorithm").map(String::as_str),
        Some("sha256-salted")
    );
    assert!(result.details.contains_key("file-parse"));

    // The run left a valid, complete audit chain: the authorization
    // acknowledgement plus the recovery record.
    let report = audit.verify_integrity().unwrap();
    assert!(report.valid);
    assert_eq!(report.total_entries, 2);

    let entries = audit.entries().unwrap();
    assert_eq!(entries[0].action, "authorization");
    assert_eq!(entries[0].result, "acknowledged");
    assert_eq!(entries[1].action, "password_recovery");
    assert_eq!(entries[1].result, "success");
    // The password never appears in the log, only its fingerprint.
    let expected_hash = format!("{:x}", Sha256::digest(b"simatic"));
    assert_eq!(
        entries[1].details.get("password_sha256").map(String::as_str),
        Some(expected_hash.as_str())
    );
    assert_eq!(entries[1].details.get("attempts").map(String::as_str), Some("2"));
}

#[test]
fn test_cleartext_metadata_recovers_without_guessing() {
    let xml = "<Document><Protection><Password>line4-maint</Password></Protection></Document>";
    let mut builder = tar::Builder::new(Vec::new());
    let mut header = tar::Header::new_gnu();
    header.set_size(xml.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder
        .append_data(&mut header, "Config/ProtectionExport.xml", xml.as_bytes())
        .unwrap();
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(&builder.into_inner().unwrap()).unwrap();
    file.flush().unwrap();

    let mut target =
        RecoveryTarget::file(file.path(), Vendor::Siemens, ProtectionScope::Project);
    let config = RecoveryConfig {
        methods: vec![RecoveryMethod::FileParse],
        ..RecoveryConfig::default()
    };
    let result = RecoveryEngine::new().recover(&mut target, &config, true);

    assert_eq!(result.status, RecoveryStatus::Success);
    assert_eq!(result.method, Some(RecoveryMethod::FileParse));
    assert_eq!(result.password.as_deref(), Some("line4-maint"));
    // No candidates were guessed; the password was read, not cracked.
    assert_eq!(result.attempts, 0);
}

#[test]
fn test_refused_authorization_is_audited_and_attempts_nothing() {
    let audit_dir = tempfile::tempdir().unwrap();
    let audit = Arc::new(AuditTrail::open(audit_dir.path()).unwrap());

    let mut sim = SimulatedPlc::siemens_s7_300().with_password("1234");
    sim.connect("192.0.2.1", &ConnectParams::default()).unwrap();
    let mut target =
        RecoveryTarget::live(Box::new(sim), Vendor::Siemens, "S7-300", ProtectionScope::Cpu);

    let engine = RecoveryEngine::new().with_audit(Arc::clone(&audit));
    let result = engine.recover(&mut target, &RecoveryConfig::default(), false);

    assert_eq!(result.status, RecoveryStatus::Failed);
    assert_eq!(result.attempts, 0);

    let entries = audit.entries().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].action, "authorization");
    assert_eq!(entries[0].result, "declined");
}

/// Driver wrapper that trips a cancel token after a fixed number of
/// authentication attempts, standing in for an operator hitting Ctrl-C.
struct CancelAfter {
    inner: SimulatedPlc,
    token: CancelToken,
    after: u64,
    seen: u64,
}

impl PlcDriver for CancelAfter {
    fn connect(&mut self, address: &str, params: &ConnectParams) -> DriverResult<bool> {
        self.inner.connect(address, params)
    }
    fn disconnect(&mut self) {
        self.inner.disconnect()
    }
    fn is_connected(&self) -> bool {
        self.inner.is_connected()
    }
    fn identity(&self) -> DriverResult<DeviceIdentity> {
        self.inner.identity()
    }
    fn protection_status(&mut self) -> DriverResult<ProtectionStatus> {
        self.inner.protection_status()
    }
    fn read_tag(&mut self, name: &str) -> DriverResult<TagValue> {
        self.inner.read_tag(name)
    }
    fn write_tag(&mut self, name: &str, value: TagData) -> DriverResult<bool> {
        self.inner.write_tag(name, value)
    }
    fn upload_program(&mut self) -> DriverResult<ProgramImage> {
        self.inner.upload_program()
    }
    fn download_program(&mut self, image: &ProgramImage) -> DriverResult<bool> {
        self.inner.download_program(image)
    }
    fn start(&mut self) -> DriverResult<bool> {
        self.inner.start()
    }
    fn stop(&mut self) -> DriverResult<bool> {
        self.inner.stop()
    }
    fn mode(&mut self) -> DriverResult<PlcMode> {
        self.inner.mode()
    }
    fn authenticate(&mut self, password: &str) -> DriverResult<bool> {
        self.seen += 1;
        if self.seen >= self.after {
            self.token.cancel();
        }
        self.inner.authenticate(password)
    }
    fn clear_authentication(&mut self) -> DriverResult<bool> {
        self.inner.clear_authentication()
    }
    fn access_level(&mut self) -> DriverResult<AccessLevel> {
        self.inner.access_level()
    }
    fn last_error(&self) -> Option<&str> {
        self.inner.last_error()
    }
}

#[test]
fn test_cancellation_stops_between_attempts() {
    let engine = RecoveryEngine::new();
    let token = engine.cancel_token();

    let mut inner = SimulatedPlc::siemens_s7_300().with_password("not-in-list");
    inner.connect("192.0.2.1", &ConnectParams::default()).unwrap();
    let driver = CancelAfter {
        inner,
        token,
        after: 3,
        seen: 0,
    };
    let mut target = RecoveryTarget::live(
        Box::new(driver),
        Vendor::Siemens,
        "S7-300",
        ProtectionScope::Cpu,
    );

    let config = RecoveryConfig {
        methods: vec![RecoveryMethod::Dictionary, RecoveryMethod::BruteForce],
        wordlist: Some(
            ["a", "b", "c", "d", "e"].iter().map(|s| s.to_string()).collect(),
        ),
        ..RecoveryConfig::default()
    };
    let result = engine.recover(&mut target, &config, true);

    // The flag trips during the third attempt and is honored before the
    // fourth; brute force never starts.
    assert_eq!(result.status, RecoveryStatus::Cancelled);
    assert_eq!(result.attempts, 3);
    assert_eq!(result.method, Some(RecoveryMethod::Dictionary));
}

#[test]
fn test_progress_reports_search_space_and_masked_candidates() {
    let progress: Arc<std::sync::Mutex<Vec<(u64, String)>>> =
        Arc::new(std::sync::Mutex::new(Vec::new()));
    let seen = Arc::clone(&progress);

    let mut sim = SimulatedPlc::siemens_s7_300().with_password("99");
    sim.connect("192.0.2.1", &ConnectParams::default()).unwrap();
    let mut target =
        RecoveryTarget::live(Box::new(sim), Vendor::Siemens, "S7-300", ProtectionScope::Cpu);

    let config = RecoveryConfig {
        methods: vec![RecoveryMethod::BruteForce],
        charset: CharsetMode::Numeric,
        min_length: 1,
        max_length: 2,
        attempt_delay: Duration::ZERO,
        progress: Some(Box::new(move |p| {
            seen.lock().unwrap().push((p.total, p.current_candidate.clone()));
        })),
        ..RecoveryConfig::default()
    };
    let result = RecoveryEngine::new().recover(&mut target, &config, true);

    // 10 one-digit plus 100 two-digit candidates; "99" is the last.
    assert_eq!(result.status, RecoveryStatus::Success);
    assert_eq!(result.attempts, 110);

    let reports = progress.lock().unwrap();
    assert!(!reports.is_empty());
    for (total, candidate) in reports.iter() {
        assert_eq!(*total, 110);
        assert!(candidate.ends_with("****"), "candidate not masked: {candidate}");
    }
}

#[test]
fn test_vulnerability_method_reports_missing_catalogue_match() {
    let mut sim = SimulatedPlc::new(Vendor::Delta, "DVP-12SE", "V1.0");
    sim.connect("192.0.2.5", &ConnectParams::default()).unwrap();
    let mut target =
        RecoveryTarget::live(Box::new(sim), Vendor::Delta, "DVP-12SE", ProtectionScope::Cpu);

    let config = RecoveryConfig {
        methods: vec![RecoveryMethod::Vulnerability],
        ..RecoveryConfig::default()
    };
    let result = RecoveryEngine::new().recover(&mut target, &config, true);

    assert_eq!(result.status, RecoveryStatus::Failed);
    assert!(result
        .details
        .get("vulnerability")
        .unwrap()
        .contains("no known vulnerabilities"));
}

#[test]
fn test_live_device_recovery_grants_write_access() {
    let mut sim = SimulatedPlc::siemens_s7_300()
        .with_password("0000")
        .with_tag("Pump1.Setpoint", TagData::Real(1.5));
    sim.connect("192.0.2.1", &ConnectParams::default()).unwrap();
    let mut target =
        RecoveryTarget::live(Box::new(sim), Vendor::Siemens, "S7-300", ProtectionScope::Cpu);

    let result = RecoveryEngine::new().recover(
        &mut target,
        &RecoveryConfig {
            methods: vec![RecoveryMethod::Dictionary],
            wordlist: Some(vec!["0000".to_string()]),
            ..RecoveryConfig::default()
        },
        true,
    );
    assert_eq!(result.status, RecoveryStatus::Success);

    // The successful authenticate left the session unlocked.
    let driver = target.driver_mut().unwrap();
    assert!(driver
        .write_tag("Pump1.Setpoint", TagData::Real(2.0))
        .unwrap());
    assert_eq!(driver.access_level().unwrap(), AccessLevel::Full);
}
