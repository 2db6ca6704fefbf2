use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use fwseal_core::bundle::{Bundler, KeyPaths, ProtectedBundle, verify_and_decode};
use fwseal_core::config::ToolConfig;
use fwseal_core::session::TransferSession;
use fwseal_core::transport::open_port;
use tracing::{error, info, warn};

const DEFAULT_CONFIG: &str = "fwseal.toml";

#[derive(Parser, Debug)]
#[command(author, version, about = "Signed firmware bundler and updater", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to the TOML configuration (defaults to ./fwseal.toml if present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(flatten)]
    keys: KeyArgs,

    #[command(subcommand)]
    command: Command,
}

/// Overrides for the `[keys]` table of the configuration.
#[derive(Args, Debug)]
struct KeyArgs {
    /// Raw 32-byte AES key file
    #[arg(long, global = true)]
    aes_key: Option<PathBuf>,

    /// Raw 16-byte IV file
    #[arg(long, global = true)]
    iv: Option<PathBuf>,

    /// ECDSA P-256 private key (DER)
    #[arg(long, global = true)]
    signing_key: Option<PathBuf>,

    /// ECDSA P-256 public key (DER)
    #[arg(long, global = true)]
    verifying_key: Option<PathBuf>,

    /// Combined build output: AES key, newline, private key DER
    #[arg(long, global = true)]
    secret: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Encrypt and sign a firmware image
    Protect {
        /// Raw firmware image
        #[arg(long)]
        infile: PathBuf,

        /// Bundle to write
        #[arg(long)]
        outfile: PathBuf,

        /// Firmware version (0 is reserved for debug builds)
        #[arg(long)]
        version: u16,

        /// Release message shown by the bootloader
        #[arg(long, default_value = "")]
        message: String,
    },

    /// Verify a bundle and print its contents
    Inspect {
        #[arg(long)]
        bundle: PathBuf,
    },

    /// Send a bundle to the bootloader
    Update {
        /// Bundle produced by `protect`
        #[arg(long)]
        firmware: PathBuf,

        /// unix:/path/to/socket or tcp:host:port
        #[arg(long)]
        port: String,

        /// Allow version 0 bundles
        #[arg(long)]
        debug: bool,

        /// Override the frame payload size
        #[arg(long)]
        frame_size: Option<usize>,

        /// Ask the device to boot the new firmware afterwards
        #[arg(long)]
        boot: bool,

        /// Do not ask for confirmation before booting
        #[arg(long)]
        yes: bool,
    },
}

fn main() {
    let cli = Cli::parse();

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(if cli.verbose {
                    tracing::Level::DEBUG.into()
                } else {
                    tracing::Level::INFO.into()
                })
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    if let Err(e) = run(cli) {
        error!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let mut config = load_config(cli.config.as_deref())?;
    apply_key_overrides(&mut config.keys, cli.keys);

    match cli.command {
        Command::Protect {
            infile,
            outfile,
            version,
            message,
        } => protect(&config, &infile, &outfile, version, &message),
        Command::Inspect { bundle } => inspect(&config, &bundle),
        Command::Update {
            firmware,
            port,
            debug,
            frame_size,
            boot,
            yes,
        } => {
            if debug {
                config.transfer.allow_debug_version = true;
            }
            if let Some(size) = frame_size {
                config.transfer.max_frame_payload = size;
            }
            update(config, &firmware, &port, boot, yes)
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<ToolConfig> {
    match path {
        Some(path) => ToolConfig::load_from_file(path)
            .with_context(|| format!("loading config {}", path.display())),
        None if Path::new(DEFAULT_CONFIG).exists() => ToolConfig::load_from_file(DEFAULT_CONFIG)
            .with_context(|| format!("loading config {}", DEFAULT_CONFIG)),
        None => Ok(ToolConfig::default()),
    }
}

fn apply_key_overrides(keys: &mut KeyPaths, args: KeyArgs) {
    if args.aes_key.is_some() {
        keys.aes_key = args.aes_key;
    }
    if args.iv.is_some() {
        keys.iv = args.iv;
    }
    if args.signing_key.is_some() {
        keys.signing_key = args.signing_key;
    }
    if args.verifying_key.is_some() {
        keys.verifying_key = args.verifying_key;
    }
    if args.secret.is_some() {
        keys.secret = args.secret;
    }
}

fn protect(
    config: &ToolConfig,
    infile: &Path,
    outfile: &Path,
    version: u16,
    message: &str,
) -> Result<()> {
    if version == 0 {
        warn!("Version 0 is reserved for debug builds; devices refuse it by default");
    }
    let keys = config.keys.load_sealing_keys()?;
    let bundle = Bundler::new(keys).protect_file(infile, outfile, version, message)?;
    println!("Wrote {} ({} bytes)", outfile.display(), bundle.len());
    Ok(())
}

fn inspect(config: &ToolConfig, path: &Path) -> Result<()> {
    let keys = config.keys.load_opening_keys()?;
    let bundle = ProtectedBundle::read_from(path)
        .with_context(|| format!("reading bundle {}", path.display()))?;
    let decoded = verify_and_decode(&bundle, &keys)?;
    let header = bundle.header();

    println!("Bundle:      {}", path.display());
    println!("Size:        {} bytes", bundle.len());
    println!("Signature:   {}", hex::encode(bundle.signature()));
    println!(
        "Version:     {}{}",
        header.version,
        if header.is_debug() { " (debug)" } else { "" }
    );
    println!("Firmware:    {} bytes", header.firmware_len);
    println!("Ciphertext:  {} bytes", bundle.ciphertext().len());
    println!("Message:     {}", decoded.message);
    Ok(())
}

fn update(config: ToolConfig, firmware: &Path, port: &str, boot: bool, yes: bool) -> Result<()> {
    let keys = Arc::new(config.keys.load_opening_keys()?);
    let bundle =
        std::fs::read(firmware).with_context(|| format!("reading bundle {}", firmware.display()))?;

    let channel = open_port(port)?;
    let mut session = TransferSession::new(channel, config.transfer, keys);
    let report = session.run(&bundle)?;

    info!(
        version = report.version,
        frames = report.frames_sent,
        bytes = report.bytes_sent,
        "Update complete"
    );
    println!("Firmware version {} installed", report.version);
    if !report.message.is_empty() {
        println!("Release notes: {}", report.message);
    }

    if !boot {
        session.close();
        return Ok(());
    }
    if !yes && !confirm("Boot the new firmware now?")? {
        info!("Boot skipped");
        session.close();
        return Ok(());
    }
    session.request_boot()?;
    println!("Boot requested");
    Ok(())
}

fn confirm(prompt: &str) -> Result<bool> {
    print!("{} [y/N] ", prompt);
    io::stdout().flush()?;

    let mut line = String::new();
    if io::stdin().lock().read_line(&mut line)? == 0 {
        bail!("no answer on stdin; pass --yes to boot without asking");
    }
    Ok(matches!(line.trim(), "y" | "Y" | "yes" | "Yes"))
}
