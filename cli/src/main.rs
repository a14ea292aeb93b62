// robert-cli: offline operator tool for the ROBERT proximity core
//
// Scores recorded RSSI sample files and builds or checks Hello payloads
// without a radio.

mod input;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use robert_core::crypto::HelloBuilder;
use robert_core::{
    parse_hello, EphemeralIdentifier, FilterMode, NtpTimestamp, ProximityFilter,
    ProximityInfoRiskComputer, RiskLevel,
};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "robert-cli")]
#[command(about = "ROBERT proximity core, offline scoring and Hello tools", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the proximity filter over a sample file and print the output as JSON
    Score {
        #[arg(short, long)]
        input: PathBuf,
        /// Epoch start, Unix milliseconds
        #[arg(long)]
        from: i64,
        /// Epoch duration in seconds
        #[arg(long, default_value = "900")]
        duration: i64,
        #[arg(short, long, default_value = "risks")]
        mode: FilterMode,
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Coarse per-minute risk score and band
    InfoRisk {
        #[arg(short, long)]
        input: PathBuf,
        #[arg(long)]
        from: i64,
        #[arg(long, default_value = "900")]
        duration: i64,
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Build a 16-byte Hello payload
    Hello {
        /// 8-byte EBID, hex
        #[arg(long)]
        ebid: String,
        /// 1-byte ECC, hex
        #[arg(long)]
        ecc: String,
        /// Hello key, hex
        #[arg(long)]
        key: String,
        /// Identifier validity start, NTP seconds
        #[arg(long)]
        valid_from: u64,
        /// Identifier validity end (exclusive), NTP seconds
        #[arg(long)]
        valid_to: u64,
        /// Build time, Unix seconds; defaults to now
        #[arg(long)]
        at: Option<u64>,
    },
    /// Check the MAC of a Hello payload
    VerifyHello {
        #[arg(long)]
        payload: String,
        #[arg(long)]
        key: String,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Score {
            input,
            from,
            duration,
            mode,
            config,
        } => cmd_score(input, from, duration, mode, config),
        Commands::InfoRisk {
            input,
            from,
            duration,
            config,
        } => cmd_info_risk(input, from, duration, config),
        Commands::Hello {
            ebid,
            ecc,
            key,
            valid_from,
            valid_to,
            at,
        } => cmd_hello(&ebid, &ecc, &key, valid_from, valid_to, at),
        Commands::VerifyHello { payload, key } => cmd_verify_hello(&payload, &key),
    }
}

fn cmd_score(
    input: PathBuf,
    from: i64,
    duration: i64,
    mode: FilterMode,
    config: Option<PathBuf>,
) -> Result<()> {
    let config = input::load_config(config.as_deref())?;
    let samples = input::load_samples(&input)?;
    tracing::debug!("Scoring {} samples in {:?} mode", samples.len(), mode);

    let output = ProximityFilter::new(&config.filter).filter(&samples, from, duration, mode);
    let json = serde_json::to_string_pretty(&output).context("Failed to serialize output")?;
    println!("{}", json);
    Ok(())
}

fn cmd_info_risk(input: PathBuf, from: i64, duration: i64, config: Option<PathBuf>) -> Result<()> {
    let config = input::load_config(config.as_deref())?;
    let samples = input::load_samples(&input)?;

    let (score, level) =
        ProximityInfoRiskComputer::new(&config.filter).classify(&samples, from, duration);
    let band = match level {
        RiskLevel::Low => level.to_string().green(),
        RiskLevel::Medium => level.to_string().yellow(),
        RiskLevel::High => level.to_string().red().bold(),
    };
    println!("Score: {:.3}", score);
    println!("Level: {}", band);
    Ok(())
}

fn cmd_hello(
    ebid: &str,
    ecc: &str,
    key: &str,
    valid_from: u64,
    valid_to: u64,
    at: Option<u64>,
) -> Result<()> {
    let ebid = input::decode_hex_array::<8>("ebid", ebid)?;
    let [ecc] = input::decode_hex_array::<1>("ecc", ecc)?;
    let key = input::decode_hex("key", key)?;

    let now = match at {
        Some(unix) => NtpTimestamp::from_unix_secs(unix),
        None => NtpTimestamp::now()?,
    };
    let identifier = EphemeralIdentifier {
        epoch_id: 0,
        valid_from,
        valid_to,
        ecc,
        ebid,
    };

    let hello = HelloBuilder::new(&identifier, &key)
        .build_at(now)
        .context("Failed to build Hello")?;
    println!("{}", hex::encode(hello.to_bytes()));
    Ok(())
}

fn cmd_verify_hello(payload: &str, key: &str) -> Result<()> {
    let payload = input::decode_hex("payload", payload)?;
    let key = input::decode_hex("key", key)?;
    let hello = parse_hello(&payload)?;

    if hello.verify(&key)? {
        println!("{} MAC valid (ebid {}, time {:#06x})", "✓".green(), hex::encode(hello.ebid), hello.time_u16());
        Ok(())
    } else {
        println!("{} MAC mismatch", "✗".red());
        std::process::exit(1);
    }
}
