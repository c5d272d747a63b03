/// Password hash extraction from project archives
///
/// Engineering-tool project files are gzip-compressed (or plain) tar
/// containers mixing XML metadata with opaque binary payloads. Two
/// passes run over the entries: protection XML is parsed for declared
/// hash material, then binary payloads are scanned with entropy
/// heuristics for embedded hash windows. Heuristics can false-positive;
/// a candidate is only trusted once a password verifies against it.
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use byteorder::{BigEndian, ByteOrder};
use flate2::read::GzDecoder;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::ProtectionScope;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HashAlgorithm {
    /// SHA-256 over salt followed by the UTF-8 password, 32-byte digest
    /// preceded by a 16-byte salt.
    Sha256Salted,
    /// Legacy 8-byte checksum-derived hash found in older project
    /// formats. Verification is best-effort; the real derivation is
    /// proprietary.
    CrcModified,
}

impl std::fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HashAlgorithm::Sha256Salted => write!(f, "sha256-salted"),
            HashAlgorithm::CrcModified => write!(f, "crc-modified"),
        }
    }
}

impl HashAlgorithm {
    fn parse(name: &str) -> Option<HashAlgorithm> {
        match name.trim().to_ascii_uppercase().as_str() {
            "SHA256_SALTED" | "SHA256" => Some(HashAlgorithm::Sha256Salted),
            "CRC_MODIFIED" | "CRC" => Some(HashAlgorithm::CrcModified),
            _ => None,
        }
    }
}

/// Hash material recovered from one archive entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HashCandidate {
    /// Byte offset within the source entry, zero for XML-declared hashes.
    pub offset: usize,
    pub algorithm: HashAlgorithm,
    pub hash: Vec<u8>,
    pub salt: Option<Vec<u8>>,
    /// Archive entry the material came from.
    pub source: String,
}

/// Everything one scan learned about a project file.
#[derive(Debug, Clone, Default)]
pub struct ScanOutcome {
    /// Cleartext password, when the metadata stores one outright.
    pub password: Option<String>,
    pub candidate: Option<HashCandidate>,
    /// Protection markers were present even if no hash was recovered.
    pub protected: bool,
    pub details: BTreeMap<String, String>,
}

/// Scan a project archive for password hash material.
///
/// A corrupt or unreadable archive is not an error: the outcome simply
/// carries no candidate, with the failure noted in `details`.
pub fn scan_project_file(path: &Path, scope: ProtectionScope) -> anyhow::Result<ScanOutcome> {
    let mut outcome = ScanOutcome::default();

    let entries = match read_archive(path) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!("unreadable project archive {}: {e:#}", path.display());
            outcome
                .details
                .insert("error".to_string(), "invalid or corrupted project file".to_string());
            return Ok(outcome);
        }
    };

    tracing::debug!(
        "scanning {} ({} entries, scope {scope})",
        path.display(),
        entries.len()
    );

    // Pass 1: declared hash material in protection XML.
    for (name, content) in &entries {
        let lower = name.to_ascii_lowercase();
        if !lower.ends_with(".xml") {
            continue;
        }
        if !(lower.contains("protection") || lower.contains("security")) {
            continue;
        }
        let text = String::from_utf8_lossy(content);
        // Old exports occasionally store the password outright.
        if let Some(password) = element_text(&text, "Password").filter(|p| !p.is_empty()) {
            outcome.protected = true;
            outcome.password = Some(password.to_string());
            return Ok(outcome);
        }
        if let Some(found) = parse_protection_xml(&text, name) {
            outcome.protected = true;
            outcome.candidate = Some(found);
            return Ok(outcome);
        }
        // Markers without usable material still mean the project is locked.
        if text.contains("<Protection") || text.contains("<KnowHowProtection") {
            outcome.protected = true;
        }
    }

    // Pass 2: heuristic scan over binary payloads.
    for (name, content) in &entries {
        let lower = name.to_ascii_lowercase();
        if !(lower.ends_with(".plf") || lower.ends_with(".dat")) {
            continue;
        }
        if let Some(found) = scan_binary(content, name) {
            outcome.protected = true;
            outcome.candidate = Some(found);
            return Ok(outcome);
        }
    }

    Ok(outcome)
}

fn read_archive(path: &Path) -> anyhow::Result<Vec<(String, Vec<u8>)>> {
    let mut file = File::open(path)?;
    let mut magic = [0u8; 2];
    let n = file.read(&mut magic)?;

    let mut raw = Vec::new();
    raw.extend_from_slice(&magic[..n]);
    file.read_to_end(&mut raw)?;

    let data = if raw.len() >= 2 && raw[0..2] == GZIP_MAGIC {
        let mut decoded = Vec::new();
        GzDecoder::new(&raw[..]).read_to_end(&mut decoded)?;
        decoded
    } else {
        raw
    };

    let mut archive = tar::Archive::new(&data[..]);
    let mut entries = Vec::new();
    for entry in archive.entries()? {
        let mut entry = entry?;
        let name = entry.path()?.to_string_lossy().into_owned();
        let mut content = Vec::new();
        entry.read_to_end(&mut content)?;
        entries.push((name, content));
    }
    Ok(entries)
}

/// Pull hex-encoded hash material out of a protection XML entry. The
/// schema varies across tool versions; a tolerant element-text scan is
/// used instead of a full parse.
fn parse_protection_xml(text: &str, source: &str) -> Option<HashCandidate> {
    let hash_hex = element_text(text, "PasswordHash")?;
    let hash = hex::decode(hash_hex.trim()).ok()?;

    let salt = element_text(text, "Salt")
        .and_then(|s| hex::decode(s.trim()).ok())
        .filter(|s| !s.is_empty());

    let algorithm = element_text(text, "Algorithm")
        .and_then(HashAlgorithm::parse)
        .unwrap_or(if hash.len() == 8 {
            HashAlgorithm::CrcModified
        } else {
            HashAlgorithm::Sha256Salted
        });

    Some(HashCandidate {
        offset: 0,
        algorithm,
        hash,
        salt,
        source: source.to_string(),
    })
}

fn element_text<'a>(text: &'a str, element: &str) -> Option<&'a str> {
    let open = format!("<{element}>");
    let close = format!("</{element}>");
    let start = text.find(&open)? + open.len();
    let end = start + text[start..].find(&close)?;
    Some(&text[start..end])
}

/// Scan raw binary content for embedded hash material.
///
/// Newer formats store a 16-byte salt immediately followed by a 32-byte
/// SHA-256 digest; older ones an isolated 8-byte checksum hash. The
/// first plausible window wins.
fn scan_binary(content: &[u8], source: &str) -> Option<HashCandidate> {
    if content.len() >= 48 {
        for i in 0..=(content.len() - 48) {
            let window = &content[i + 16..i + 48];
            if looks_like_hash(window) {
                return Some(HashCandidate {
                    offset: i,
                    algorithm: HashAlgorithm::Sha256Salted,
                    hash: window.to_vec(),
                    salt: Some(content[i..i + 16].to_vec()),
                    source: source.to_string(),
                });
            }
        }
    }

    if content.len() >= 8 {
        for i in 0..=(content.len() - 8) {
            let window = &content[i..i + 8];
            if looks_like_short_hash(window) {
                return Some(HashCandidate {
                    offset: i,
                    algorithm: HashAlgorithm::CrcModified,
                    hash: window.to_vec(),
                    salt: None,
                    source: source.to_string(),
                });
            }
        }
    }

    None
}

/// A 32-byte digest has high byte diversity and no long runs.
fn looks_like_hash(data: &[u8]) -> bool {
    let mut seen = [false; 256];
    let mut distinct = 0usize;
    for &b in data {
        if !seen[b as usize] {
            seen[b as usize] = true;
            distinct += 1;
        }
    }
    if distinct < 8 {
        return false;
    }

    let mut max_run = 1;
    let mut run = 1;
    for pair in data.windows(2) {
        if pair[0] == pair[1] {
            run += 1;
            max_run = max_run.max(run);
        } else {
            run = 1;
        }
    }
    max_run <= 4
}

fn looks_like_short_hash(data: &[u8]) -> bool {
    if data.iter().all(|&b| b == 0x00) || data.iter().all(|&b| b == 0xff) {
        return false;
    }
    let mut seen = [false; 256];
    let mut distinct = 0usize;
    for &b in data {
        if !seen[b as usize] {
            seen[b as usize] = true;
            distinct += 1;
        }
    }
    distinct >= 4
}

/// Check a candidate password against extracted hash material.
pub fn verify_candidate(candidate: &HashCandidate, password: &str) -> bool {
    let salt = candidate.salt.as_deref().unwrap_or(&[]);
    match candidate.algorithm {
        HashAlgorithm::Sha256Salted => {
            let mut hasher = Sha256::new();
            hasher.update(salt);
            hasher.update(password.as_bytes());
            hasher.finalize().as_slice() == candidate.hash.as_slice()
        }
        HashAlgorithm::CrcModified => crc_modified_digest(salt, password) == candidate.hash,
    }
}

/// Best-effort stand-in for the proprietary legacy checksum derivation:
/// CRC32 over salt and password, packed big-endian into 8 bytes.
pub(crate) fn crc_modified_digest(salt: &[u8], password: &str) -> Vec<u8> {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(salt);
    hasher.update(password.as_bytes());
    let mut out = [0u8; 8];
    BigEndian::write_u64(&mut out, u64::from(hasher.finalize()));
    out.to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn build_archive(entries: &[(&str, &[u8])], gzip: bool) -> tempfile::NamedTempFile {
        let mut builder = tar::Builder::new(Vec::new());
        for (name, content) in entries {
            let mut header = tar::Header::new_gnu();
            header.set_size(content.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, name, *content).unwrap();
        }
        let tar_bytes = builder.into_inner().unwrap();

        let bytes = if gzip {
            let mut encoder =
                flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
            encoder.write_all(&tar_bytes).unwrap();
            encoder.finish().unwrap()
        } else {
            tar_bytes
        };

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&bytes).unwrap();
        file.flush().unwrap();
        file
    }

    fn sha256_salted(salt: &[u8], password: &str) -> Vec<u8> {
        let mut hasher = Sha256::new();
        hasher.update(salt);
        hasher.update(password.as_bytes());
        hasher.finalize().to_vec()
    }

    #[test]
    fn xml_declared_hash_is_extracted() {
        let salt = b"0123456789abcdef";
        let hash = sha256_salted(salt, "simatic");
        let xml = format!(
            "<Document><Protection><PasswordHash>{}</PasswordHash>\
             <Algorithm>SHA256_SALTED</Algorithm><Salt>{}</Salt></Protection></Document>",
            hex::encode(&hash),
            hex::encode(salt)
        );

        let file = build_archive(
            &[("System/ProtectionSettings.xml", xml.as_bytes())],
            true,
        );
        let outcome = scan_project_file(file.path(), ProtectionScope::Project).unwrap();

        assert!(outcome.protected);
        let candidate = outcome.candidate.unwrap();
        assert_eq!(candidate.algorithm, HashAlgorithm::Sha256Salted);
        assert!(verify_candidate(&candidate, "simatic"));
        assert!(!verify_candidate(&candidate, "wrong"));
    }

    #[test]
    fn cleartext_password_wins_over_hash_material() {
        let xml = "<Document><Protection><Password>op-2019</Password>\
                   <PasswordHash>deadbeef</PasswordHash></Protection></Document>";
        let file = build_archive(
            &[("System/ProtectionSettings.xml", xml.as_bytes())],
            false,
        );
        let outcome = scan_project_file(file.path(), ProtectionScope::Project).unwrap();

        assert!(outcome.protected);
        assert_eq!(outcome.password.as_deref(), Some("op-2019"));
        assert!(outcome.candidate.is_none());
    }

    #[test]
    fn binary_salted_hash_is_found_and_verifies() {
        let salt: Vec<u8> = (0x30..0x40).collect();
        let hash = sha256_salted(&salt, "1234");

        // Hash material at the head of the payload, low-entropy filler after.
        let mut payload = Vec::new();
        payload.extend_from_slice(&salt);
        payload.extend_from_slice(&hash);
        payload.extend_from_slice(&[0u8; 64]);

        let file = build_archive(&[("PEData.plf", payload.as_slice())], false);
        let outcome = scan_project_file(file.path(), ProtectionScope::Project).unwrap();

        let candidate = outcome.candidate.unwrap();
        assert_eq!(candidate.offset, 0);
        assert_eq!(candidate.algorithm, HashAlgorithm::Sha256Salted);
        assert_eq!(candidate.salt.as_deref(), Some(salt.as_slice()));
        assert!(verify_candidate(&candidate, "1234"));
    }

    #[test]
    fn short_entry_falls_back_to_legacy_hash() {
        // Too short for the salted layout, so the 8-byte pass runs.
        let digest = crc_modified_digest(&[], "1234");
        let mut payload = digest.clone();
        payload.extend_from_slice(&[0u8; 8]);

        let file = build_archive(&[("legacy.dat", payload.as_slice())], false);
        let outcome = scan_project_file(file.path(), ProtectionScope::Cpu).unwrap();

        let candidate = outcome.candidate.unwrap();
        assert_eq!(candidate.algorithm, HashAlgorithm::CrcModified);
        assert!(verify_candidate(&candidate, "1234"));
        assert!(!verify_candidate(&candidate, "4321"));
    }

    #[test]
    fn all_zero_payload_yields_no_candidate() {
        let payload = [0u8; 256];
        let file = build_archive(&[("empty.plf", payload.as_slice())], false);
        let outcome = scan_project_file(file.path(), ProtectionScope::Project).unwrap();
        assert!(outcome.candidate.is_none());
        assert!(!outcome.protected);
    }

    #[test]
    fn corrupt_archive_reports_no_candidate() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"this is not a tar archive, not even close")
            .unwrap();
        file.flush().unwrap();

        let outcome = scan_project_file(file.path(), ProtectionScope::Project).unwrap();
        assert!(outcome.candidate.is_none());
        assert_eq!(
            outcome.details.get("error").map(String::as_str),
            Some("invalid or corrupted project file")
        );
    }
}
