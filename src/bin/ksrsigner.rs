//! The KSR signer tool.
//!
//! Processes a request received from the ZSK operator and produces the
//! signed response. Everything of substance is configured through the
//! configuration file; the command line selects files, the schema and
//! output verbosity.

use clap::Parser;
use ksrsigner::base::time::Timestamp;
use ksrsigner::ceremony::Ceremony;
use ksrsigner::config::Config;
use ksrsigner::hsm::SoftHsm;
use std::path::PathBuf;
use std::process::ExitCode;
use time::OffsetDateTime;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "ksrsigner", about = "KSK request signer", version)]
struct Args {
    /// Request to process.
    #[arg(value_name = "KSRFILE")]
    ksr: Option<PathBuf>,

    /// Response output filename.
    #[arg(value_name = "SKRFILE")]
    skr: Option<PathBuf>,

    /// Path to the signer configuration file.
    #[arg(long, value_name = "CFGFILE")]
    config: Option<PathBuf>,

    /// Path to the previous response to validate the chain against.
    #[arg(long, value_name = "SKRFILE")]
    previous_skr: Option<PathBuf>,

    /// Directory with the software keystore (PKCS#8 files).
    #[arg(long, value_name = "DIR")]
    keystore: Option<PathBuf>,

    /// Name of the signing schema to apply.
    #[arg(long, default_value = "normal")]
    schema: String,

    /// Enable debug logging.
    #[arg(long)]
    debug: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();

    let default_filter = if args.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .without_time()
        .init();

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{}", err);
            ExitCode::from(err.exit_code() as u8)
        }
    }
}

fn run(args: &Args) -> Result<(), ksrsigner::Error> {
    let config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };

    let ksr = args
        .ksr
        .clone()
        .or_else(|| config.filenames.input_ksr.clone())
        .ok_or_else(|| missing_file("no request file given"))?;
    let skr = args
        .skr
        .clone()
        .or_else(|| config.filenames.output_skr.clone())
        .ok_or_else(|| missing_file("no response output file given"))?;
    let previous = args
        .previous_skr
        .clone()
        .or_else(|| config.filenames.previous_skr.clone());
    if previous.is_none() {
        info!("no previous response given: chain will not be validated");
    }

    // The PKCS#11 front ends plug in here; the bundled software keystore
    // covers rehearsals and tests.
    let hsm = match &args.keystore {
        Some(dir) => SoftHsm::load_dir(dir).map_err(ksrsigner::Error::Hsm)?,
        None => SoftHsm::new(),
    };

    let now = Timestamp::from_datetime(OffsetDateTime::now_utc())
        .map_err(|_| missing_file("system clock outside timestamp range"))?;

    let ceremony = Ceremony::new(&config, &args.schema, &hsm, now)?;
    let response =
        ceremony.run_files(previous.as_deref(), &ksr, &skr)?;

    for bundle in response.bundles() {
        info!("{}", bundle);
    }
    Ok(())
}

fn missing_file(what: &str) -> ksrsigner::Error {
    ksrsigner::Error::Io(std::io::Error::new(
        std::io::ErrorKind::InvalidInput,
        what.to_string(),
    ))
}
