use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use plcforge_core::audit::AuditTrail;
use plcforge_core::driver::IdentifyConfig;
use plcforge_core::recovery::ExploitRegistry;
use plcforge_core::{
	identify_vendor, CharsetMode, ProtectionScope, RecoveryConfig, RecoveryEngine,
	RecoveryMethod, RecoveryStatus, RecoveryTarget, Vendor,
};

#[derive(Parser, Debug)]
#[command(name = "plcforge", version, about = "PLCForge CLI - PLC Password Recovery Toolkit")]
struct Cli {
	/// Audit log directory (defaults to ~/.plcforge/audit)
	#[arg(long, global = true)]
	audit_dir: Option<PathBuf>,

	#[command(subcommand)]
	command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
	/// Recover a password from a project file
	Recover {
		/// Path to the project archive
		file: PathBuf,
		/// Controller vendor
		#[arg(long)]
		vendor: String,
		/// Protection scope
		#[arg(long, value_parser = ["project", "cpu", "block"], default_value = "project")]
		scope: String,
		/// Methods to try, in order (repeatable)
		#[arg(long = "method", value_parser = ["file", "dictionary", "bruteforce", "vulnerability"])]
		methods: Vec<String>,
		/// Wordlist file for the dictionary method
		#[arg(long)]
		wordlist: Option<PathBuf>,
		/// Brute-force character set
		#[arg(long, default_value = "alphanumeric")]
		charset: String,
		#[arg(long, default_value = "1")]
		min_length: usize,
		#[arg(long, default_value = "8")]
		max_length: usize,
		/// Hard cap on brute-force attempts
		#[arg(long, default_value = "1000000")]
		max_attempts: u64,
		/// Pause between attempts, in milliseconds
		#[arg(long, default_value = "0")]
		delay_ms: u64,
		/// Confirm you are authorized to recover this password
		#[arg(long)]
		confirm: bool,
	},
	/// Identify the vendor of a controller on the network
	Identify {
		/// Host name or IP address
		address: String,
		/// Probe timeout in milliseconds
		#[arg(long, default_value = "2000")]
		timeout_ms: u64,
	},
	/// List the built-in vulnerability catalogue
	Exploits,
	/// Audit trail operations
	Audit {
		#[command(subcommand)]
		command: AuditCommands,
	},
}

#[derive(Subcommand, Debug)]
enum AuditCommands {
	/// Verify the audit hash chain
	Verify,
	/// Export a JSON integrity report with all entries
	Export {
		#[arg(long)]
		out: PathBuf,
	},
}

fn open_audit(dir: &Option<PathBuf>) -> Result<AuditTrail> {
	match dir {
		Some(dir) => AuditTrail::open(dir),
		None => AuditTrail::open_default(),
	}
}

fn main() -> Result<()> {
	tracing_subscriber::fmt::init();

	let cli = Cli::parse();
	match cli.command {
		Commands::Recover {
			file,
			vendor,
			scope,
			methods,
			wordlist,
			charset,
			min_length,
			max_length,
			max_attempts,
			delay_ms,
			confirm,
		} => {
			let audit = Arc::new(open_audit(&cli.audit_dir)?);

			let Some(vendor) = Vendor::parse(&vendor) else {
				bail!("unknown vendor: {vendor}");
			};
			let scope = match scope.as_str() {
				"project" => ProtectionScope::Project,
				"cpu" => ProtectionScope::Cpu,
				"block" => ProtectionScope::Block,
				_ => unreachable!(),
			};
			let methods: Vec<RecoveryMethod> = if methods.is_empty() {
				vec![RecoveryMethod::FileParse, RecoveryMethod::Dictionary]
			} else {
				methods
					.iter()
					.filter_map(|m| RecoveryMethod::parse(m))
					.collect()
			};

			let engine = RecoveryEngine::new().with_audit(Arc::clone(&audit));
			let mut target = RecoveryTarget::file(&file, vendor, scope);

			// Progress on stderr only when someone is watching.
			let bar = if atty::is(atty::Stream::Stderr) {
				let bar = ProgressBar::new(0);
				bar.set_style(
					ProgressStyle::with_template(
						"{spinner} {pos}/{len} candidates ({per_sec}) trying {msg}",
					)?,
				);
				Some(bar)
			} else {
				None
			};

			let progress: Option<plcforge_core::recovery::ProgressFn> =
				bar.clone().map(|bar| {
					Box::new(move |p: &plcforge_core::RecoveryProgress| {
						bar.set_length(p.total);
						bar.set_position(p.attempts);
						bar.set_message(p.current_candidate.clone());
					}) as plcforge_core::recovery::ProgressFn
				});

			let config = RecoveryConfig {
				methods,
				wordlist: None,
				wordlist_path: wordlist,
				charset: CharsetMode::parse(&charset),
				min_length,
				max_length,
				max_attempts,
				attempt_delay: Duration::from_millis(delay_ms),
				progress,
			};

			let result = engine.recover(&mut target, &config, confirm);
			if let Some(bar) = bar {
				bar.finish_and_clear();
			}

			match result.status {
				RecoveryStatus::Success => {
					println!("✅ Password recovered: {}", result.password.unwrap_or_default());
					println!(
						"🔧 Method: {}",
						result.method.map(|m| m.to_string()).unwrap_or_default()
					);
					println!("🎯 Attempts: {}", result.attempts);
					println!("⏱️  Duration: {:.1}s", result.duration.as_secs_f64());
				}
				RecoveryStatus::Cancelled => {
					bail!("recovery cancelled after {} attempts", result.attempts);
				}
				RecoveryStatus::Failed => {
					for (method, reason) in &result.details {
						eprintln!("  {method}: {reason}");
					}
					bail!(
						"recovery failed: {}",
						result.message.unwrap_or_else(|| "unknown reason".to_string())
					);
				}
			}
		}
		Commands::Identify { address, timeout_ms } => {
			println!("🔍 Probing controller at {address}");

			let config = IdentifyConfig {
				timeout: Duration::from_millis(timeout_ms),
				..IdentifyConfig::default()
			};
			match identify_vendor(&address, &config) {
				Vendor::Unknown => {
					println!("❌ No known protocol handshake answered");
				}
				vendor => {
					println!("✅ Identified: {vendor}");
				}
			}
		}
		Commands::Exploits => {
			let registry = ExploitRegistry::builtin();
			println!("📚 {} built-in exploits", registry.len());
			for descriptor in registry.descriptors() {
				println!();
				println!("  {}", descriptor.name);
				println!("    {}", descriptor.description);
				println!("    models: {}", descriptor.affected_models.join(", "));
				println!("    firmware: {}", descriptor.affected_firmware.join(", "));
				if let Some(cve) = descriptor.cve {
					println!("    cve: {cve}");
				}
			}
		}
		Commands::Audit { command } => {
			let audit = open_audit(&cli.audit_dir)?;
			match command {
				AuditCommands::Verify => {
					let report = audit.verify_integrity()?;
					println!("📋 Audit trail: {}", audit.dir().display());
					println!("📈 Entries: {}", report.total_entries);
					if report.valid {
						println!("✅ Hash chain intact");
					} else {
						for broken in &report.broken_chains {
							eprintln!("  chain break at {}:{}", broken.file, broken.line);
						}
						for modified in &report.modified_entries {
							eprintln!(
								"  modified entry at {}:{} ({})",
								modified.file, modified.line, modified.event_id
							);
						}
						for error in &report.errors {
							eprintln!("  {error}");
						}
						bail!("audit trail integrity check failed");
					}
				}
				AuditCommands::Export { out } => {
					audit.export_report(&out)?;
					println!("✅ Report written to {}", out.display());
				}
			}
		}
	}
	Ok(())
}
