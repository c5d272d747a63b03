/// Recovery orchestration
///
/// The engine runs the configured methods in order against one target,
/// stopping at the first recovered password. Every run is gated on an
/// explicit operator authorization and recorded in the audit trail,
/// including refused runs.
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::audit::AuditTrail;
use crate::driver::PlcDriver;
use crate::recovery::bruteforce::{CandidateSpace, CharsetMode};
use crate::recovery::exploits::ExploitRegistry;
use crate::recovery::file_scan::{self, ScanOutcome};
use crate::recovery::wordlist;
use crate::{ProtectionScope, Vendor};

/// Refusal message for runs without confirmed authorization.
pub const AUTHORIZATION_REQUIRED: &str =
    "explicit authorization not confirmed; recovery refused";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecoveryMethod {
    FileParse,
    Dictionary,
    BruteForce,
    Vulnerability,
}

impl RecoveryMethod {
    pub fn parse(name: &str) -> Option<RecoveryMethod> {
        match name.to_ascii_lowercase().as_str() {
            "file" | "file-parse" | "fileparse" => Some(RecoveryMethod::FileParse),
            "dictionary" | "dict" | "wordlist" => Some(RecoveryMethod::Dictionary),
            "bruteforce" | "brute-force" | "brute" => Some(RecoveryMethod::BruteForce),
            "vulnerability" | "vuln" | "exploit" => Some(RecoveryMethod::Vulnerability),
            _ => None,
        }
    }
}

impl std::fmt::Display for RecoveryMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RecoveryMethod::FileParse => "file-parse",
            RecoveryMethod::Dictionary => "dictionary",
            RecoveryMethod::BruteForce => "bruteforce",
            RecoveryMethod::Vulnerability => "vulnerability",
        };
        write!(f, "{name}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecoveryStatus {
    Success,
    Failed,
    Cancelled,
}

impl std::fmt::Display for RecoveryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecoveryStatus::Success => write!(f, "success"),
            RecoveryStatus::Failed => write!(f, "failed"),
            RecoveryStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// What the engine is working against: an offline project file or a
/// live, already-connected controller.
pub enum TargetKind {
    File { path: PathBuf },
    LiveDevice { driver: Box<dyn PlcDriver> },
}

pub struct RecoveryTarget {
    pub kind: TargetKind,
    pub vendor: Vendor,
    pub model: String,
    pub firmware: Option<String>,
    pub scope: ProtectionScope,
}

impl RecoveryTarget {
    pub fn file(path: impl Into<PathBuf>, vendor: Vendor, scope: ProtectionScope) -> Self {
        Self {
            kind: TargetKind::File { path: path.into() },
            vendor,
            model: String::new(),
            firmware: None,
            scope,
        }
    }

    pub fn live(
        driver: Box<dyn PlcDriver>,
        vendor: Vendor,
        model: &str,
        scope: ProtectionScope,
    ) -> Self {
        Self {
            kind: TargetKind::LiveDevice { driver },
            vendor,
            model: model.to_string(),
            firmware: None,
            scope,
        }
    }

    pub fn with_model(mut self, model: &str) -> Self {
        self.model = model.to_string();
        self
    }

    pub fn with_firmware(mut self, firmware: &str) -> Self {
        self.firmware = Some(firmware.to_string());
        self
    }

    pub fn is_live(&self) -> bool {
        matches!(self.kind, TargetKind::LiveDevice { .. })
    }

    pub fn driver_mut(&mut self) -> Option<&mut Box<dyn PlcDriver>> {
        match &mut self.kind {
            TargetKind::LiveDevice { driver } => Some(driver),
            TargetKind::File { .. } => None,
        }
    }

    /// (type, id) pair identifying this target in audit records.
    pub fn describe(&self) -> (String, String) {
        match &self.kind {
            TargetKind::File { path } => ("file".to_string(), path.display().to_string()),
            TargetKind::LiveDevice { driver } => {
                let id = driver
                    .identity()
                    .ok()
                    .and_then(|i| i.address)
                    .unwrap_or_else(|| self.model.clone());
                ("device".to_string(), id)
            }
        }
    }
}

/// Snapshot handed to the progress callback.
#[derive(Debug, Clone)]
pub struct RecoveryProgress {
    pub method: RecoveryMethod,
    pub attempts: u64,
    /// Size of the search space, zero when unknown.
    pub total: u64,
    /// Obfuscated form of the candidate under test.
    pub current_candidate: String,
    pub elapsed: Duration,
    pub rate: f64,
    pub eta: Option<Duration>,
}

pub type ProgressFn = Box<dyn Fn(&RecoveryProgress) + Send + Sync>;

pub struct RecoveryConfig {
    pub methods: Vec<RecoveryMethod>,
    /// Inline dictionary; takes priority over `wordlist_path`.
    pub wordlist: Option<Vec<String>>,
    pub wordlist_path: Option<PathBuf>,
    pub charset: CharsetMode,
    pub min_length: usize,
    pub max_length: usize,
    /// Hard cap on brute-force attempts across the whole run.
    pub max_attempts: u64,
    /// Pause between candidates, to stay under device lockout thresholds.
    pub attempt_delay: Duration,
    pub progress: Option<ProgressFn>,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            methods: vec![RecoveryMethod::Dictionary, RecoveryMethod::BruteForce],
            wordlist: None,
            wordlist_path: None,
            charset: CharsetMode::default(),
            min_length: 1,
            max_length: 8,
            max_attempts: 1_000_000,
            attempt_delay: Duration::ZERO,
            progress: None,
        }
    }
}

#[derive(Debug)]
pub struct RecoveryResult {
    pub status: RecoveryStatus,
    pub password: Option<String>,
    pub method: Option<RecoveryMethod>,
    pub attempts: u64,
    pub duration: Duration,
    pub message: Option<String>,
    /// Per-method failure reasons and method-specific findings.
    pub details: BTreeMap<String, String>,
}

/// Cooperative cancellation flag, checked between candidates.
#[derive(Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn clear(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

enum MethodOutcome {
    Success {
        password: String,
        details: BTreeMap<String, String>,
    },
    Failed(String),
    Cancelled,
}

pub struct RecoveryEngine {
    exploits: ExploitRegistry,
    audit: Option<Arc<AuditTrail>>,
    cancel: CancelToken,
}

impl RecoveryEngine {
    pub fn new() -> Self {
        Self {
            exploits: ExploitRegistry::builtin(),
            audit: None,
            cancel: CancelToken::default(),
        }
    }

    /// Record every run in the given audit trail.
    pub fn with_audit(mut self, audit: Arc<AuditTrail>) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn with_exploits(mut self, exploits: ExploitRegistry) -> Self {
        self.exploits = exploits;
        self
    }

    /// Handle for cancelling a run from another thread or a callback.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Run the configured methods against `target` until one recovers
    /// the password, the operator cancels, or every method is exhausted.
    ///
    /// `authorized` is the operator's explicit confirmation; without it
    /// the run is refused before touching the target, and the refusal
    /// itself is audited.
    pub fn recover(
        &self,
        target: &mut RecoveryTarget,
        config: &RecoveryConfig,
        authorized: bool,
    ) -> RecoveryResult {
        let started = Instant::now();
        self.audit_authorization(authorized);

        if !authorized {
            tracing::warn!("recovery refused: authorization not confirmed");
            return RecoveryResult {
                status: RecoveryStatus::Failed,
                password: None,
                method: None,
                attempts: 0,
                duration: started.elapsed(),
                message: Some(AUTHORIZATION_REQUIRED.to_string()),
                details: BTreeMap::new(),
            };
        }

        self.cancel.clear();
        let mut attempts: u64 = 0;
        let mut details = BTreeMap::new();

        // File targets are scanned once; every file-based method shares
        // the extracted hash material.
        let scan = match &target.kind {
            TargetKind::File { path } => match file_scan::scan_project_file(path, target.scope) {
                Ok(outcome) => Some(outcome),
                Err(e) => {
                    tracing::warn!("project file scan failed: {e:#}");
                    None
                }
            },
            TargetKind::LiveDevice { .. } => None,
        };
        if let Some(candidate) = scan.as_ref().and_then(|s| s.candidate.as_ref()) {
            details.insert("hash_source".to_string(), candidate.source.clone());
            details.insert("hash_algorithm".to_string(), candidate.algorithm.to_string());
            details.insert("hash".to_string(), hex::encode(&candidate.hash));
        }

        for &method in &config.methods {
            if self.cancel.is_cancelled() {
                return self.finish(target, RecoveryResult {
                    status: RecoveryStatus::Cancelled,
                    password: None,
                    method: None,
                    attempts,
                    duration: started.elapsed(),
                    message: Some("cancelled by operator".to_string()),
                    details,
                });
            }

            tracing::info!("trying method {method}");
            let outcome = match method {
                RecoveryMethod::FileParse => self.run_file_parse(target, scan.as_ref()),
                RecoveryMethod::Dictionary => {
                    self.run_dictionary(target, scan.as_ref(), config, &mut attempts, started)
                }
                RecoveryMethod::BruteForce => {
                    self.run_bruteforce(target, scan.as_ref(), config, &mut attempts, started)
                }
                RecoveryMethod::Vulnerability => self.run_vulnerability(target),
            };

            match outcome {
                MethodOutcome::Success {
                    password,
                    details: found,
                } => {
                    details.extend(found);
                    return self.finish(target, RecoveryResult {
                        status: RecoveryStatus::Success,
                        password: Some(password),
                        method: Some(method),
                        attempts,
                        duration: started.elapsed(),
                        message: None,
                        details,
                    });
                }
                MethodOutcome::Cancelled => {
                    return self.finish(target, RecoveryResult {
                        status: RecoveryStatus::Cancelled,
                        password: None,
                        method: Some(method),
                        attempts,
                        duration: started.elapsed(),
                        message: Some("cancelled by operator".to_string()),
                        details,
                    });
                }
                MethodOutcome::Failed(reason) => {
                    tracing::debug!("method {method} failed: {reason}");
                    details.insert(method.to_string(), reason);
                }
            }
        }

        self.finish(target, RecoveryResult {
            status: RecoveryStatus::Failed,
            password: None,
            method: None,
            attempts,
            duration: started.elapsed(),
            message: Some("all recovery methods exhausted without success".to_string()),
            details,
        })
    }

    fn run_file_parse(
        &self,
        target: &RecoveryTarget,
        scan: Option<&ScanOutcome>,
    ) -> MethodOutcome {
        if target.is_live() {
            return MethodOutcome::Failed("file parsing requires a file target".to_string());
        }
        let Some(scan) = scan else {
            return MethodOutcome::Failed("project file could not be scanned".to_string());
        };

        if let Some(password) = &scan.password {
            let mut details = BTreeMap::new();
            details.insert("recovered_from".to_string(), "cleartext metadata".to_string());
            return MethodOutcome::Success {
                password: password.clone(),
                details,
            };
        }

        match &scan.candidate {
            // Hash material alone is not a recovered password, but its
            // presence tells the operator which method to try next.
            Some(candidate) => MethodOutcome::Failed(format!(
                "found {} hash in {}; run dictionary or bruteforce to crack it",
                candidate.algorithm, candidate.source
            )),
            None if scan.protected => {
                MethodOutcome::Failed("file is protected but no hash material found".to_string())
            }
            None => MethodOutcome::Failed("no password information found in file".to_string()),
        }
    }

    fn run_dictionary(
        &self,
        target: &mut RecoveryTarget,
        scan: Option<&ScanOutcome>,
        config: &RecoveryConfig,
        attempts: &mut u64,
        started: Instant,
    ) -> MethodOutcome {
        let words = match wordlist::resolve(
            config.wordlist.as_deref(),
            config.wordlist_path.as_deref(),
        ) {
            Ok(words) => words,
            Err(e) => return MethodOutcome::Failed(format!("could not load wordlist: {e:#}")),
        };

        let total = words.len() as u64;
        for (i, candidate) in words.iter().enumerate() {
            if self.cancel.is_cancelled() {
                return MethodOutcome::Cancelled;
            }
            // A blank line in a wordlist is not a candidate; counting it
            // could report success with an empty password on an
            // unprotected device.
            if candidate.is_empty() {
                continue;
            }
            if i % 100 == 0 {
                emit_progress(
                    config,
                    RecoveryMethod::Dictionary,
                    *attempts,
                    total,
                    obfuscate(candidate, 4),
                    started,
                );
            }

            *attempts += 1;
            if verify(target, scan, candidate) {
                return MethodOutcome::Success {
                    password: candidate.clone(),
                    details: BTreeMap::new(),
                };
            }
            pace(config.attempt_delay);
        }

        MethodOutcome::Failed(format!("dictionary exhausted ({total} candidates)"))
    }

    fn run_bruteforce(
        &self,
        target: &mut RecoveryTarget,
        scan: Option<&ScanOutcome>,
        config: &RecoveryConfig,
        attempts: &mut u64,
        started: Instant,
    ) -> MethodOutcome {
        let space = CandidateSpace::new(
            config.charset.charset(),
            config.min_length,
            config.max_length,
        );
        let total = space.search_space();
        tracing::info!("brute-force search space: {total} candidates");

        for (i, candidate) in space.enumerate() {
            if self.cancel.is_cancelled() {
                return MethodOutcome::Cancelled;
            }
            if *attempts >= config.max_attempts {
                return MethodOutcome::Failed(format!(
                    "maximum attempt limit reached ({})",
                    config.max_attempts
                ));
            }
            if i % 1000 == 0 {
                emit_progress(
                    config,
                    RecoveryMethod::BruteForce,
                    *attempts,
                    total,
                    obfuscate(&candidate, 2),
                    started,
                );
            }

            *attempts += 1;
            if verify(target, scan, &candidate) {
                return MethodOutcome::Success {
                    password: candidate,
                    details: BTreeMap::new(),
                };
            }
            pace(config.attempt_delay);
        }

        MethodOutcome::Failed("search space exhausted".to_string())
    }

    fn run_vulnerability(&self, target: &mut RecoveryTarget) -> MethodOutcome {
        // Exploit applicability keys off firmware; fill it in from the
        // device if the caller did not.
        if target.firmware.is_none() {
            if let Some(driver) = target.driver_mut() {
                if let Ok(identity) = driver.identity() {
                    if target.model.is_empty() {
                        target.model = identity.model.clone();
                    }
                    target.firmware = Some(identity.firmware);
                }
            }
        }

        let applicable = self
            .exploits
            .applicable_to(&target.vendor.to_string(), &target.model);
        if applicable.is_empty() {
            return MethodOutcome::Failed(format!(
                "no known vulnerabilities for {} {}",
                target.vendor, target.model
            ));
        }

        for exploit in applicable {
            let name = exploit.descriptor().name;
            if self.cancel.is_cancelled() {
                return MethodOutcome::Cancelled;
            }
            if !exploit.check_applicable(target) {
                tracing::debug!("exploit {name} not applicable to this target");
                continue;
            }

            tracing::info!("executing exploit {name}");
            let outcome = exploit.execute(target);
            match outcome.password {
                // An empty password is never a recovery, even when the
                // exploit claims success against an unset credential.
                Some(password) if outcome.success && !password.is_empty() => {
                    let mut details = BTreeMap::new();
                    details.insert("exploit".to_string(), name.to_string());
                    if let Some(message) = outcome.message {
                        details.insert("exploit_message".to_string(), message);
                    }
                    return MethodOutcome::Success { password, details };
                }
                _ => {
                    tracing::debug!(
                        "exploit {name} failed: {}",
                        outcome.message.as_deref().unwrap_or("no detail")
                    );
                }
            }
        }

        MethodOutcome::Failed("no vulnerabilities successfully exploited".to_string())
    }

    /// Record the final outcome and return it.
    fn finish(&self, target: &RecoveryTarget, result: RecoveryResult) -> RecoveryResult {
        let (target_type, target_id) = target.describe();
        tracing::info!(
            "recovery {} for {target_type} {target_id} after {} attempts",
            result.status,
            result.attempts
        );

        if let Some(audit) = &self.audit {
            // Never the password itself, only a fingerprint of it.
            let password_hash = result
                .password
                .as_deref()
                .map(|p| format!("{:x}", Sha256::digest(p.as_bytes())));
            let method = result
                .method
                .map(|m| m.to_string())
                .unwrap_or_else(|| "none".to_string());
            if let Err(e) = audit.log_password_recovery(
                &target_type,
                &target_id,
                &target.vendor.to_string(),
                &method,
                result.status == RecoveryStatus::Success,
                result.attempts,
                result.duration.as_millis() as u64,
                password_hash.as_deref(),
            ) {
                tracing::warn!("audit write failed: {e:#}");
            }
        }

        result
    }

    fn audit_authorization(&self, acknowledged: bool) {
        if let Some(audit) = &self.audit {
            if let Err(e) = audit.log_authorization("password_recovery", acknowledged) {
                tracing::warn!("audit write failed: {e:#}");
            }
        }
    }
}

impl Default for RecoveryEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Test one candidate against the target. Wrong passwords and transport
/// faults both count as a miss; faults are logged, not fatal.
fn verify(target: &mut RecoveryTarget, scan: Option<&ScanOutcome>, candidate: &str) -> bool {
    match &mut target.kind {
        TargetKind::LiveDevice { driver } => match driver.authenticate(candidate) {
            Ok(accepted) => accepted,
            Err(e) => {
                tracing::debug!("authenticate failed at transport level: {e}");
                false
            }
        },
        TargetKind::File { .. } => scan
            .and_then(|s| s.candidate.as_ref())
            .map(|c| file_scan::verify_candidate(c, candidate))
            .unwrap_or(false),
    }
}

/// Mask a candidate for progress display.
fn obfuscate(candidate: &str, keep: usize) -> String {
    let kept: String = candidate.chars().take(keep).collect();
    format!("{kept}****")
}

fn emit_progress(
    config: &RecoveryConfig,
    method: RecoveryMethod,
    attempts: u64,
    total: u64,
    current_candidate: String,
    started: Instant,
) {
    let Some(callback) = &config.progress else {
        return;
    };
    let elapsed = started.elapsed();
    let rate = if elapsed.as_secs_f64() > 0.0 {
        attempts as f64 / elapsed.as_secs_f64()
    } else {
        0.0
    };
    let eta = if rate > 0.0 && total > attempts {
        Some(Duration::from_secs_f64((total - attempts) as f64 / rate))
    } else {
        None
    };
    callback(&RecoveryProgress {
        method,
        attempts,
        total,
        current_candidate,
        elapsed,
        rate,
        eta,
    });
}

fn pace(delay: Duration) {
    if !delay.is_zero() {
        std::thread::sleep(delay);
    }
}
