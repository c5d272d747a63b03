/// Tamper-evident audit trail
///
/// Every security-relevant action lands in an append-only JSONL log,
/// one file per UTC day. Entries form a hash chain: each one carries
/// the SHA-256 of its predecessor plus its own content hash, so any
/// edit, deletion or reordering after the fact is detectable. The
/// recovered password itself is never written, only a hash of it.
use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{anyhow, Context};
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

const FILE_PREFIX: &str = "audit_";
const FILE_SUFFIX: &str = ".jsonl";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub event_id: String,
    /// RFC 3339 UTC timestamp with microseconds.
    pub timestamp: String,
    pub user: String,
    pub machine_id: String,
    pub action: String,
    pub target: BTreeMap<String, String>,
    pub result: String,
    pub details: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    /// Hash of the preceding entry, `None` only for the first entry
    /// ever written.
    pub previous_hash: Option<String>,
    /// SHA-256 over this entry's canonical form, excluding this field.
    pub entry_hash: String,
}

/// The hashed view of an entry: every field except `entry_hash`, in
/// fixed order. Maps are BTreeMaps so serialization is canonical.
#[derive(Serialize)]
struct HashedFields<'a> {
    event_id: &'a str,
    timestamp: &'a str,
    user: &'a str,
    machine_id: &'a str,
    action: &'a str,
    target: &'a BTreeMap<String, String>,
    result: &'a str,
    details: &'a BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    duration_ms: &'a Option<u64>,
    previous_hash: &'a Option<String>,
}

fn compute_entry_hash(entry: &AuditEntry) -> anyhow::Result<String> {
    let canonical = serde_json::to_vec(&HashedFields {
        event_id: &entry.event_id,
        timestamp: &entry.timestamp,
        user: &entry.user,
        machine_id: &entry.machine_id,
        action: &entry.action,
        target: &entry.target,
        result: &entry.result,
        details: &entry.details,
        duration_ms: &entry.duration_ms,
        previous_hash: &entry.previous_hash,
    })?;
    Ok(format!("{:x}", Sha256::digest(&canonical)))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainBreak {
    pub file: String,
    pub line: usize,
    pub expected: Option<String>,
    pub found: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModifiedEntry {
    pub file: String,
    pub line: usize,
    pub event_id: String,
}

/// Outcome of a full chain walk over the audit directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegrityReport {
    pub valid: bool,
    pub total_entries: usize,
    pub broken_chains: Vec<ChainBreak>,
    pub modified_entries: Vec<ModifiedEntry>,
    pub errors: Vec<String>,
}

struct ChainState {
    last_hash: Option<String>,
}

/// Handle to one audit directory. Cheap to share behind an `Arc`;
/// writes are serialized through an internal mutex so the chain never
/// forks under concurrent logging.
pub struct AuditTrail {
    dir: PathBuf,
    user: String,
    machine_id: String,
    state: Mutex<ChainState>,
}

impl AuditTrail {
    /// Open (or create) the audit directory and resume the hash chain
    /// from the newest existing entry.
    pub fn open(dir: impl AsRef<Path>) -> anyhow::Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)
            .with_context(|| format!("could not create audit directory {}", dir.display()))?;

        let machine_id = resolve_machine_id(&dir)?;
        let user = std::env::var("USER")
            .or_else(|_| std::env::var("USERNAME"))
            .unwrap_or_else(|_| "unknown".to_string());

        let last_hash = load_last_hash(&dir)?;
        tracing::debug!(
            "audit trail at {} resuming from {:?}",
            dir.display(),
            last_hash.as_deref().map(|h| &h[..12.min(h.len())])
        );

        Ok(Self {
            dir,
            user,
            machine_id,
            state: Mutex::new(ChainState { last_hash }),
        })
    }

    /// Default location under the user's home directory.
    pub fn open_default() -> anyhow::Result<Self> {
        let home = dirs::home_dir().ok_or_else(|| anyhow!("could not resolve home directory"))?;
        Self::open(home.join(".plcforge").join("audit"))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Append one entry to the chain.
    pub fn log(
        &self,
        action: &str,
        target: BTreeMap<String, String>,
        result: &str,
        details: BTreeMap<String, String>,
        duration_ms: Option<u64>,
    ) -> anyhow::Result<AuditEntry> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| anyhow!("audit chain state poisoned"))?;

        let now = Utc::now();
        let mut entry = AuditEntry {
            event_id: Uuid::new_v4().to_string(),
            timestamp: now.to_rfc3339_opts(SecondsFormat::Micros, true),
            user: self.user.clone(),
            machine_id: self.machine_id.clone(),
            action: action.to_string(),
            target,
            result: result.to_string(),
            details,
            duration_ms,
            previous_hash: state.last_hash.clone(),
            entry_hash: String::new(),
        };
        entry.entry_hash = compute_entry_hash(&entry)?;

        let path = self
            .dir
            .join(format!("{FILE_PREFIX}{}{FILE_SUFFIX}", now.format("%Y-%m-%d")));
        let line = serde_json::to_string(&entry)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("could not open audit log {}", path.display()))?;
        writeln!(file, "{line}")?;

        state.last_hash = Some(entry.entry_hash.clone());
        Ok(entry)
    }

    /// Record a password recovery run. `password_hash` is a fingerprint
    /// of the recovered password, never the password itself.
    #[allow(clippy::too_many_arguments)]
    pub fn log_password_recovery(
        &self,
        target_type: &str,
        target_id: &str,
        vendor: &str,
        method: &str,
        success: bool,
        attempts: u64,
        duration_ms: u64,
        password_hash: Option<&str>,
    ) -> anyhow::Result<AuditEntry> {
        let mut target = BTreeMap::new();
        target.insert("type".to_string(), target_type.to_string());
        target.insert("id".to_string(), target_id.to_string());
        target.insert("vendor".to_string(), vendor.to_string());

        let mut details = BTreeMap::new();
        details.insert("method".to_string(), method.to_string());
        details.insert("attempts".to_string(), attempts.to_string());
        if let Some(hash) = password_hash {
            details.insert("password_sha256".to_string(), hash.to_string());
        }

        self.log(
            "password_recovery",
            target,
            if success { "success" } else { "failure" },
            details,
            Some(duration_ms),
        )
    }

    pub fn log_plc_connection(
        &self,
        address: &str,
        vendor: &str,
        model: &str,
        success: bool,
    ) -> anyhow::Result<AuditEntry> {
        let mut target = BTreeMap::new();
        target.insert("type".to_string(), "device".to_string());
        target.insert("id".to_string(), address.to_string());
        target.insert("vendor".to_string(), vendor.to_string());

        let mut details = BTreeMap::new();
        details.insert("model".to_string(), model.to_string());

        self.log(
            "plc_connection",
            target,
            if success { "success" } else { "failure" },
            details,
            None,
        )
    }

    pub fn log_program_download(
        &self,
        address: &str,
        vendor: &str,
        success: bool,
    ) -> anyhow::Result<AuditEntry> {
        let mut target = BTreeMap::new();
        target.insert("type".to_string(), "device".to_string());
        target.insert("id".to_string(), address.to_string());
        target.insert("vendor".to_string(), vendor.to_string());

        self.log(
            "program_download",
            target,
            if success { "success" } else { "failure" },
            BTreeMap::new(),
            None,
        )
    }

    /// Record that the operator confirmed, or declined to confirm, an
    /// action requiring explicit authorization.
    pub fn log_authorization(
        &self,
        requested_action: &str,
        acknowledged: bool,
    ) -> anyhow::Result<AuditEntry> {
        let mut target = BTreeMap::new();
        target.insert("type".to_string(), "authorization".to_string());
        target.insert("id".to_string(), requested_action.to_string());

        self.log(
            "authorization",
            target,
            if acknowledged { "acknowledged" } else { "declined" },
            BTreeMap::new(),
            None,
        )
    }

    /// All entries across every day file, oldest first.
    pub fn entries(&self) -> anyhow::Result<Vec<AuditEntry>> {
        let mut entries = Vec::new();
        for path in log_files(&self.dir)? {
            let content = fs::read_to_string(&path)?;
            for line in content.lines().filter(|l| !l.trim().is_empty()) {
                entries.push(serde_json::from_str(line).with_context(|| {
                    format!("unparseable audit entry in {}", path.display())
                })?);
            }
        }
        Ok(entries)
    }

    /// Walk the whole chain and recompute every hash.
    pub fn verify_integrity(&self) -> anyhow::Result<IntegrityReport> {
        let mut report = IntegrityReport {
            valid: true,
            total_entries: 0,
            broken_chains: Vec::new(),
            modified_entries: Vec::new(),
            errors: Vec::new(),
        };
        // The chain spans day boundaries.
        let mut expected_previous: Option<String> = None;

        for path in log_files(&self.dir)? {
            let file_name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let content = fs::read_to_string(&path)?;

            for (line_no, line) in content.lines().enumerate() {
                if line.trim().is_empty() {
                    continue;
                }
                report.total_entries += 1;

                let entry: AuditEntry = match serde_json::from_str(line) {
                    Ok(entry) => entry,
                    Err(e) => {
                        report.valid = false;
                        report
                            .errors
                            .push(format!("{file_name}:{}: {e}", line_no + 1));
                        // An unreadable line breaks the chain for good.
                        expected_previous = None;
                        continue;
                    }
                };

                match compute_entry_hash(&entry) {
                    Ok(computed) if computed == entry.entry_hash => {}
                    Ok(_) => {
                        report.valid = false;
                        report.modified_entries.push(ModifiedEntry {
                            file: file_name.clone(),
                            line: line_no + 1,
                            event_id: entry.event_id.clone(),
                        });
                    }
                    Err(e) => {
                        report.valid = false;
                        report
                            .errors
                            .push(format!("{file_name}:{}: {e}", line_no + 1));
                    }
                }

                if entry.previous_hash != expected_previous {
                    report.valid = false;
                    report.broken_chains.push(ChainBreak {
                        file: file_name.clone(),
                        line: line_no + 1,
                        expected: expected_previous.clone(),
                        found: entry.previous_hash.clone(),
                    });
                }
                expected_previous = Some(entry.entry_hash.clone());
            }
        }

        Ok(report)
    }

    /// Write a standalone JSON report: integrity verdict plus every
    /// entry, for handover to auditors.
    pub fn export_report(&self, out: &Path) -> anyhow::Result<()> {
        #[derive(Serialize)]
        struct Report<'a> {
            generated_at: String,
            audit_dir: String,
            integrity: &'a IntegrityReport,
            entries: &'a [AuditEntry],
        }

        let integrity = self.verify_integrity()?;
        let entries = self.entries().unwrap_or_default();
        let report = Report {
            generated_at: Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true),
            audit_dir: self.dir.display().to_string(),
            integrity: &integrity,
            entries: &entries,
        };

        let json = serde_json::to_string_pretty(&report)?;
        fs::write(out, json)
            .with_context(|| format!("could not write audit report {}", out.display()))?;
        tracing::info!("audit report exported to {}", out.display());
        Ok(())
    }
}

/// Day files in lexicographic order, which for the fixed
/// `audit_YYYY-MM-DD` naming is chronological order.
fn log_files(dir: &Path) -> anyhow::Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.starts_with(FILE_PREFIX) && n.ends_with(FILE_SUFFIX))
                .unwrap_or(false)
        })
        .collect();
    files.sort();
    Ok(files)
}

fn load_last_hash(dir: &Path) -> anyhow::Result<Option<String>> {
    let Some(path) = log_files(dir)?.into_iter().next_back() else {
        return Ok(None);
    };
    let content = fs::read_to_string(&path)?;
    let Some(line) = content.lines().filter(|l| !l.trim().is_empty()).next_back() else {
        return Ok(None);
    };
    let entry: AuditEntry = serde_json::from_str(line)
        .with_context(|| format!("corrupt tail entry in {}", path.display()))?;
    Ok(Some(entry.entry_hash))
}

/// Stable per-host identifier: the OS machine id where available, else
/// a generated id persisted next to the logs.
fn resolve_machine_id(dir: &Path) -> anyhow::Result<String> {
    if let Ok(id) = fs::read_to_string("/etc/machine-id") {
        let id = id.trim();
        if !id.is_empty() {
            return Ok(id.to_string());
        }
    }

    let marker = dir.join(".machine-id");
    if let Ok(id) = fs::read_to_string(&marker) {
        let id = id.trim();
        if !id.is_empty() {
            return Ok(id.to_string());
        }
    }
    let id = Uuid::new_v4().to_string();
    fs::write(&marker, &id)
        .with_context(|| format!("could not persist machine id at {}", marker.display()))?;
    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn trail() -> (tempfile::TempDir, AuditTrail) {
        let dir = tempfile::tempdir().unwrap();
        let trail = AuditTrail::open(dir.path()).unwrap();
        (dir, trail)
    }

    #[test]
    fn entries_chain_and_verify() {
        let (_dir, trail) = trail();

        let first = trail
            .log("authorization", BTreeMap::new(), "acknowledged", BTreeMap::new(), None)
            .unwrap();
        let second = trail
            .log_password_recovery("device", "192.0.2.1", "Siemens", "dictionary", true, 2, 40, Some("ab"))
            .unwrap();

        assert!(first.previous_hash.is_none());
        assert_eq!(second.previous_hash.as_deref(), Some(first.entry_hash.as_str()));

        let report = trail.verify_integrity().unwrap();
        assert!(report.valid);
        assert_eq!(report.total_entries, 2);
        assert!(report.broken_chains.is_empty());
        assert!(report.modified_entries.is_empty());
    }

    #[test]
    fn tampering_is_detected() {
        let (dir, trail) = trail();
        trail.log_plc_connection("192.0.2.1", "Siemens", "S7-300", true).unwrap();
        trail.log_plc_connection("192.0.2.2", "Omron", "CJ2M", false).unwrap();

        let path = log_files(dir.path()).unwrap().pop().unwrap();
        let content = fs::read_to_string(&path).unwrap();
        // Flip the first address digit in the first entry.
        let tampered = content.replacen("192.0.2.1", "192.0.2.7", 1);
        assert_ne!(content, tampered);
        fs::write(&path, tampered).unwrap();

        let report = trail.verify_integrity().unwrap();
        assert!(!report.valid);
        assert_eq!(report.modified_entries.len(), 1);
        assert_eq!(report.modified_entries[0].line, 1);
    }

    #[test]
    fn deleting_an_entry_breaks_the_chain() {
        let (dir, trail) = trail();
        for i in 0..3 {
            trail
                .log_plc_connection(&format!("192.0.2.{i}"), "Delta", "DVP", true)
                .unwrap();
        }

        let path = log_files(dir.path()).unwrap().pop().unwrap();
        let content = fs::read_to_string(&path).unwrap();
        let kept: Vec<&str> = content.lines().enumerate().filter(|(i, _)| *i != 1).map(|(_, l)| l).collect();
        fs::write(&path, format!("{}\n", kept.join("\n"))).unwrap();

        let report = trail.verify_integrity().unwrap();
        assert!(!report.valid);
        assert!(!report.broken_chains.is_empty());
    }

    #[test]
    fn chain_resumes_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let first_hash = {
            let trail = AuditTrail::open(dir.path()).unwrap();
            trail.log_authorization("password_recovery", true).unwrap().entry_hash
        };

        let trail = AuditTrail::open(dir.path()).unwrap();
        let entry = trail.log_authorization("program_download", false).unwrap();
        assert_eq!(entry.previous_hash.as_deref(), Some(first_hash.as_str()));
        assert_eq!(entry.result, "declined");

        assert!(trail.verify_integrity().unwrap().valid);
    }

    #[test]
    fn concurrent_writers_keep_a_single_chain() {
        let dir = tempfile::tempdir().unwrap();
        let trail = Arc::new(AuditTrail::open(dir.path()).unwrap());

        let handles: Vec<_> = (0..4)
            .map(|t| {
                let trail = Arc::clone(&trail);
                std::thread::spawn(move || {
                    for i in 0..10 {
                        trail
                            .log_plc_connection(&format!("10.0.{t}.{i}"), "Siemens", "S7-1500", true)
                            .unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let report = trail.verify_integrity().unwrap();
        assert!(report.valid);
        assert_eq!(report.total_entries, 40);
    }

    #[test]
    fn export_report_round_trips() {
        let (_dir, trail) = trail();
        trail.log_program_download("192.0.2.1", "Siemens", true).unwrap();

        let out = tempfile::NamedTempFile::new().unwrap();
        trail.export_report(out.path()).unwrap();

        let json: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(out.path()).unwrap()).unwrap();
        assert_eq!(json["integrity"]["valid"], true);
        assert_eq!(json["entries"].as_array().unwrap().len(), 1);
        assert_eq!(json["entries"][0]["action"], "program_download");
    }
}
