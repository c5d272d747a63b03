/// Password recovery: orchestration, search strategies, file analysis
/// and the known-vulnerability catalogue.
pub mod bruteforce;
pub mod engine;
pub mod exploits;
pub mod file_scan;
pub mod wordlist;

pub use bruteforce::{CandidateSpace, CharsetMode};

pub use engine::{
    CancelToken, ProgressFn, RecoveryConfig, RecoveryEngine, RecoveryMethod, RecoveryProgress,
    RecoveryResult, RecoveryStatus, RecoveryTarget, TargetKind,
};

pub use exploits::{Exploit, ExploitDescriptor, ExploitOutcome, ExploitRegistry};

pub use file_scan::{scan_project_file, verify_candidate, HashAlgorithm, HashCandidate, ScanOutcome};
