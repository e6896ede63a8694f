use clap::Parser;
use eyre::{Context, Result};
use std::io::Read;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use safe_evidence_verifier::{verify, PackageError, VerifierSettings, VerifyOptions};

/// Offline verifier for multisig evidence packages: checks the declared
/// transaction hash, owner signatures, on-chain policy proofs, calldata
/// equivalence and simulation consistency without any network access.
#[derive(Debug, Parser)]
#[clap(name = "safe-evidence-verifier", version)]
struct Opts {
    /// Path to the evidence package JSON, or `-` for stdin.
    package: PathBuf,

    /// Optional address book: a JSON array of {address, name, kind,
    /// chainIds?} entries used for target and signer warnings.
    #[clap(long, env = "EVIDENCE_ADDRESS_BOOK")]
    address_book: Option<PathBuf>,

    /// Pretty-print the report JSON.
    #[clap(long)]
    pretty: bool,

    /// Suppress the report; exit code only.
    #[clap(long)]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .init();

    let opts = Opts::parse();

    let input = if opts.package.as_os_str() == "-" {
        let mut buf = Vec::new();
        std::io::stdin()
            .read_to_end(&mut buf)
            .wrap_err("failed to read package from stdin")?;
        buf
    } else {
        std::fs::read(&opts.package)
            .wrap_err_with(|| format!("failed to read {}", opts.package.display()))?
    };

    let mut options = VerifyOptions::default();
    if let Some(path) = &opts.address_book {
        let raw = std::fs::read(path)
            .wrap_err_with(|| format!("failed to read {}", path.display()))?;
        let address_book =
            serde_json::from_slice(&raw).wrap_err("failed to parse the address book")?;
        options.settings = Some(VerifierSettings {
            address_book,
            ..VerifierSettings::default()
        });
    }

    let report = match verify(&input, &options).await {
        Ok(report) => report,
        Err(PackageError::InvalidJson(e)) => {
            eprintln!("invalid package JSON: {e}");
            std::process::exit(1);
        }
        Err(PackageError::Schema(errors)) => {
            eprintln!("package failed schema validation:");
            for error in &errors {
                eprintln!("  - {error}");
            }
            std::process::exit(1);
        }
    };

    if !opts.quiet {
        let rendered = if opts.pretty {
            serde_json::to_string_pretty(&report)?
        } else {
            serde_json::to_string(&report)?
        };
        println!("{rendered}");
    }

    if !report.hash_match || report.signatures.summary.invalid > 0 {
        std::process::exit(2);
    }
    Ok(())
}
