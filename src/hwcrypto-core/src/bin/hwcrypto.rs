//! hwcrypto CLI - hardware-backed P-256 keys on a development host.
//!
//! Runs the facade over the emulated keystore, persisted under a local
//! directory, so key lifecycle and signing can be exercised without a
//! phone. Signatures can be checked offline with `verify`.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use clap::{Parser, Subcommand};
use hwcrypto_core::{default_store_dir, HardwareCrypto, HardwareCryptoConfig, HardwareCryptoError};
use hwcrypto_keystore::create_emulated_backend;
use p256::ecdsa::signature::Verifier;
use p256::ecdsa::{Signature, VerifyingKey};
use p256::pkcs8::DecodePublicKey;

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// hwcrypto - hardware-backed P-256 key management.
///
/// Keys live in the emulated keystore; every signature goes through the
/// same authentication flow the device backends use, with the prompt
/// approved automatically.
#[derive(Parser)]
#[command(name = "hwcrypto")]
#[command(version = VERSION)]
#[command(about = "Hardware-backed P-256 key management with biometric-gated signing")]
#[command(long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Output format (text, json)
    #[arg(short, long, default_value = "text")]
    format: String,

    /// Directory of the emulated keystore
    #[arg(long)]
    store_dir: Option<PathBuf>,

    /// JSON configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show detected platform capabilities
    Info,

    /// Generate a key pair
    Generate {
        /// Key alias
        alias: String,
    },

    /// Import a PEM-encoded EC P-256 private key
    Import {
        /// Key alias
        alias: String,

        /// PEM file, or "-" for stdin
        #[arg(long)]
        pem: PathBuf,
    },

    /// Export the public key
    Export {
        /// Key alias
        alias: String,

        /// Output encoding (hex, base64)
        #[arg(long, default_value = "hex")]
        encoding: String,
    },

    /// Delete a key pair
    Delete {
        /// Key alias
        alias: String,
    },

    /// Sign data with a stored key
    Sign {
        /// Key alias
        alias: String,

        /// Data to sign (UTF-8)
        #[arg(long, conflicts_with = "file")]
        data: Option<String>,

        /// File to sign
        #[arg(long)]
        file: Option<PathBuf>,
    },

    /// Verify a signature offline
    Verify {
        /// Public key, hex (uncompressed point or SubjectPublicKeyInfo DER)
        #[arg(long)]
        public_key: String,

        /// DER signature, hex
        #[arg(long)]
        signature: String,

        /// Signed data (UTF-8)
        #[arg(long, conflicts_with = "file")]
        data: Option<String>,

        /// Signed file
        #[arg(long)]
        file: Option<PathBuf>,
    },
}

struct Output {
    json: bool,
}

impl Output {
    fn emit(&self, text: &str, value: serde_json::Value) {
        if self.json {
            match serde_json::to_string_pretty(&value) {
                Ok(rendered) => println!("{rendered}"),
                Err(e) => eprintln!("failed to render output: {e}"),
            }
        } else {
            println!("{text}");
        }
    }
}

fn invalid(reason: impl Into<String>) -> HardwareCryptoError {
    HardwareCryptoError::InvalidRequest {
        reason: reason.into(),
    }
}

fn read_input(data: Option<String>, file: Option<PathBuf>) -> Result<Vec<u8>, HardwareCryptoError> {
    match (data, file) {
        (Some(data), _) => Ok(data.into_bytes()),
        (None, Some(path)) => {
            std::fs::read(&path)
                .map_err(|e| invalid(format!("cannot read {}: {e}", path.display())))
        },
        (None, None) => Err(invalid("either --data or --file is required")),
    }
}

fn read_pem(path: &Path) -> Result<String, HardwareCryptoError> {
    if path.as_os_str() == "-" {
        let mut pem = String::new();
        std::io::stdin()
            .read_to_string(&mut pem)
            .map_err(|e| invalid(format!("cannot read stdin: {e}")))?;
        Ok(pem)
    } else {
        std::fs::read_to_string(path)
            .map_err(|e| invalid(format!("cannot read {}: {e}", path.display())))
    }
}

fn load_config(cli: &Cli) -> Result<HardwareCryptoConfig, HardwareCryptoError> {
    let mut config = match &cli.config {
        Some(path) => HardwareCryptoConfig::from_json_file(path)?,
        None => HardwareCryptoConfig::default(),
    };
    if let Some(dir) = &cli.store_dir {
        config.emulated_store_dir = Some(dir.clone());
    }
    if config.emulated_store_dir.is_none() {
        config.emulated_store_dir = default_store_dir();
    }
    Ok(config)
}

fn open(config: &HardwareCryptoConfig) -> Result<HardwareCrypto, HardwareCryptoError> {
    let backend = create_emulated_backend(config.emulated_store_dir.as_deref())?;
    Ok(HardwareCrypto::with_backend(config, backend, true))
}

fn verify_offline(
    public_key: &str,
    signature: &str,
    message: &[u8],
) -> Result<bool, HardwareCryptoError> {
    let key_bytes = hex::decode(public_key).map_err(|e| invalid(format!("public key: {e}")))?;
    let sig_bytes = hex::decode(signature).map_err(|e| invalid(format!("signature: {e}")))?;

    let verifying_key = VerifyingKey::from_sec1_bytes(&key_bytes)
        .or_else(|_| VerifyingKey::from_public_key_der(&key_bytes))
        .map_err(|_| HardwareCryptoError::MalformedKeyMaterial {
            reason: "public key is neither a SEC1 point nor SubjectPublicKeyInfo".into(),
        })?;
    let signature =
        Signature::from_der(&sig_bytes).map_err(|e| invalid(format!("signature: {e}")))?;

    Ok(verifying_key.verify(message, &signature).is_ok())
}

async fn run(cli: Cli, out: &Output) -> Result<(), HardwareCryptoError> {
    let config = load_config(&cli)?;

    match cli.command {
        Commands::Info => {
            let crypto = open(&config)?;
            let caps = crypto.capabilities();
            let store = config
                .emulated_store_dir
                .as_ref()
                .map_or_else(|| "(in memory)".to_string(), |dir| dir.display().to_string());
            let text = format!(
                "\nSYSTEM INFORMATION\n==================\n\n\
                 hwcrypto Version: {VERSION}\n\n\
                 Platform:\n  OS: {}\n  Arch: {}\n\n\
                 Keystore:\n  Hardware: {:?}\n  Security level: {}\n  Emulator: {}\n  \
                 Store: {store}\n  Auth timeout: {:?}",
                std::env::consts::OS,
                std::env::consts::ARCH,
                caps.hardware_type,
                caps.hardware_type.security_level(),
                caps.is_emulator,
                config.auth_timeout(),
            );
            out.emit(
                &text,
                serde_json::json!({
                    "version": VERSION,
                    "os": std::env::consts::OS,
                    "arch": std::env::consts::ARCH,
                    "hardware_type": caps.hardware_type,
                    "supported": caps.supported,
                    "is_emulator": caps.is_emulator,
                    "store_dir": config.emulated_store_dir,
                    "auth_timeout_secs": config.auth_timeout_secs,
                }),
            );
        },
        Commands::Generate { alias } => {
            open(&config)?.generate_key_pair(&alias)?;
            out.emit(
                &format!("Generated key: {alias}"),
                serde_json::json!({ "alias": alias, "generated": true }),
            );
        },
        Commands::Import { alias, pem } => {
            let pem = read_pem(&pem)?;
            open(&config)?.import_pem_key(&alias, &pem)?;
            out.emit(
                &format!("Imported key: {alias}"),
                serde_json::json!({ "alias": alias, "imported": true }),
            );
        },
        Commands::Export { alias, encoding } => {
            let public_key = open(&config)?.export_public_key(&alias)?;
            let encoded = match encoding.as_str() {
                "hex" => hex::encode(&public_key),
                "base64" => BASE64.encode(&public_key),
                other => return Err(invalid(format!("unknown encoding: {other}"))),
            };
            out.emit(
                &encoded,
                serde_json::json!({ "alias": alias, "encoding": encoding, "public_key": encoded }),
            );
        },
        Commands::Delete { alias } => {
            let removed = open(&config)?.delete_key_pair(&alias)?;
            let text = if removed {
                format!("Deleted key: {alias}")
            } else {
                format!("No key stored under: {alias}")
            };
            out.emit(&text, serde_json::json!({ "alias": alias, "removed": removed }));
        },
        Commands::Sign { alias, data, file } => {
            let message = read_input(data, file)?;
            let signature = open(&config)?.sign(&alias, &message).await?;
            let encoded = hex::encode(&signature);
            out.emit(
                &encoded,
                serde_json::json!({ "alias": alias, "signature": encoded }),
            );
        },
        Commands::Verify {
            public_key,
            signature,
            data,
            file,
        } => {
            let message = read_input(data, file)?;
            let valid = verify_offline(&public_key, &signature, &message)?;
            let text = if valid { "Signature valid" } else { "Signature INVALID" };
            out.emit(text, serde_json::json!({ "valid": valid }));
            if !valid {
                return Err(HardwareCryptoError::SignatureFailure {
                    reason: "signature does not verify".into(),
                });
            }
        },
    }

    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let out = Output {
        json: cli.format == "json",
    };

    // Initialize logging (suppress for JSON output)
    if out.json {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::ERROR)
            .with_target(false)
            .init();
    } else if cli.verbose {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_target(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::WARN)
            .with_target(false)
            .init();
    }

    match run(cli, &out).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if out.json {
                out.emit(
                    "",
                    serde_json::json!({ "error": e.code(), "message": e.to_string() }),
                );
            } else {
                eprintln!("error [{}]: {e}", e.code());
            }
            ExitCode::FAILURE
        },
    }
}
