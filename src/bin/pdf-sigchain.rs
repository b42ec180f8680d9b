//! pdf-sigchain command line
//!
//! Generates private PKI hierarchies, signs documents and verifies their
//! signatures against explicitly supplied trust anchors.
//!
//! Usage:
//!   pdf-sigchain generate-chain --output-dir certs --org "Acme"
//!   pdf-sigchain generate-self-signed --output-dir certs --common-name "Jane Doe" --org "Acme"
//!   pdf-sigchain sign --document in.pdf --output out.pdf --key certs/signer_key.pem \
//!       --cert certs/signer_cert.pem --ca-chain certs/intermediate_ca.pem --create-field
//!   pdf-sigchain verify --document out.pdf --trust-cert certs/root_ca.pem \
//!       --other-cert certs/intermediate_ca.pem

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};

use pdf_sigchain::commands::{self, SignRequest, VerificationReport, VerifyRequest};
use pdf_sigchain::config::{PkiConfig, PASSPHRASE_ENV};
use pdf_sigchain::pki::{Identity, KeyProtection};
use pdf_sigchain::signatures::{
    FieldPolicy, KeyUsageConstraints, KeyUsageMatch, ModificationPermission, SignOptions,
};
use pdf_sigchain::Result;

#[derive(Parser)]
#[command(name = "pdf-sigchain")]
#[command(about = "Private PKI generation and chain-of-trust document signatures")]
#[command(version)]
struct Cli {
    /// JSON configuration file (key sizes, validity, KDF work factor)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate root CA, intermediate CA and signer certificates
    GenerateChain {
        /// Output directory
        #[arg(short, long)]
        output_dir: PathBuf,

        /// Organization name
        #[arg(long)]
        org: String,

        /// Encrypt private keys with the passphrase
        #[arg(long)]
        encrypt: bool,

        /// Private key passphrase
        #[arg(long, env = PASSPHRASE_ENV, hide_env_values = true)]
        passphrase: Option<String>,
    },

    /// Generate a self-signed signing certificate
    GenerateSelfSigned {
        /// Output directory
        #[arg(short, long)]
        output_dir: PathBuf,

        /// Common name
        #[arg(long)]
        common_name: String,

        /// Organization name
        #[arg(long)]
        org: String,

        /// Two-letter country code
        #[arg(long)]
        country: Option<String>,

        /// Email address
        #[arg(long)]
        email: Option<String>,

        /// Encrypt the private key with the passphrase
        #[arg(long)]
        encrypt: bool,

        /// Private key passphrase
        #[arg(long, env = PASSPHRASE_ENV, hide_env_values = true)]
        passphrase: Option<String>,
    },

    /// Sign a document
    Sign {
        /// Document to sign
        #[arg(short, long)]
        document: PathBuf,

        /// Signed output document
        #[arg(short, long)]
        output: PathBuf,

        /// Signer private key (PEM)
        #[arg(short, long)]
        key: PathBuf,

        /// Signer certificate (PEM)
        #[arg(short, long)]
        cert: PathBuf,

        /// Issuing CA certificates to embed
        #[arg(long = "ca-chain")]
        ca_chain: Vec<PathBuf>,

        /// Signature field name
        #[arg(long, default_value = "Signature1")]
        field: String,

        /// Create the field if the document lacks it
        #[arg(long)]
        create_field: bool,

        /// Reason for signing
        #[arg(long)]
        reason: Option<String>,

        /// Signing location
        #[arg(long)]
        location: Option<String>,

        /// Contact information
        #[arg(long)]
        contact_info: Option<String>,

        /// Changes permitted after signing (DocMDP level 1-3)
        #[arg(long, value_parser = clap::value_parser!(u8).range(1..=3))]
        doc_mdp: Option<u8>,

        /// Attach a local-clock timestamp token
        #[arg(long)]
        timestamp: bool,

        /// Passphrase of an encrypted key
        #[arg(long, env = PASSPHRASE_ENV, hide_env_values = true)]
        passphrase: Option<String>,
    },

    /// Verify document signatures
    Verify {
        /// Document to verify
        #[arg(short, long)]
        document: PathBuf,

        /// Trust anchor certificates
        #[arg(long = "trust-cert", required = true)]
        trust_certs: Vec<PathBuf>,

        /// Intermediate certificates
        #[arg(long = "other-cert")]
        other_certs: Vec<PathBuf>,

        /// Verify only this signature (0-based)
        #[arg(long)]
        signature_index: Option<usize>,

        /// How required key usage bits are matched
        #[arg(long, value_enum, default_value_t = KeyUsageMode::All)]
        key_usage_mode: KeyUsageMode,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum KeyUsageMode {
    /// Every required bit
    All,
    /// At least one required bit
    Any,
}

fn load_config(path: Option<&PathBuf>) -> Result<PkiConfig> {
    match path {
        Some(path) => PkiConfig::from_json_file(path),
        None => Ok(PkiConfig::default()),
    }
}

fn run(cli: Cli) -> Result<bool> {
    let config = load_config(cli.config.as_ref())?;

    match cli.command {
        Commands::GenerateChain {
            output_dir,
            org,
            encrypt,
            passphrase,
        } => {
            let protection = KeyProtection::from_request(encrypt, passphrase.as_deref())?;
            for path in commands::generate_chain(&output_dir, &org, &config, &protection)? {
                println!("Wrote {}", path.display());
            }
            Ok(true)
        },
        Commands::GenerateSelfSigned {
            output_dir,
            common_name,
            org,
            country,
            email,
            encrypt,
            passphrase,
        } => {
            let protection = KeyProtection::from_request(encrypt, passphrase.as_deref())?;
            let mut identity = Identity::new(common_name, org);
            if let Some(email) = email {
                identity = identity.with_email(email);
            }
            if let Some(country) = country {
                identity = identity.with_country(country);
            }
            let written =
                commands::generate_self_signed(&output_dir, identity, &config, &protection)?;
            for path in written {
                println!("Wrote {}", path.display());
            }
            Ok(true)
        },
        Commands::Sign {
            document,
            output,
            key,
            cert,
            ca_chain,
            field,
            create_field,
            reason,
            location,
            contact_info,
            doc_mdp,
            timestamp,
            passphrase,
        } => {
            let options = SignOptions {
                field_name: field,
                field_policy: if create_field {
                    FieldPolicy::CreateIfMissing
                } else {
                    FieldPolicy::MustExist
                },
                digest_algorithm: config.digest_algorithm,
                reason,
                location,
                contact_info,
                modification_permission: doc_mdp.and_then(ModificationPermission::from_level),
                estimated_size: config.signature_size,
                ..SignOptions::default()
            };
            let outcome = commands::sign_document(&SignRequest {
                document,
                output: output.clone(),
                key,
                passphrase,
                certificate: cert,
                chain: ca_chain,
                options,
                timestamp,
            })?;
            if let Some(e) = outcome.timestamp_error {
                eprintln!("Warning: signed without timestamp: {}", e);
            }
            println!("Signed document written to {}", output.display());
            Ok(true)
        },
        Commands::Verify {
            document,
            trust_certs,
            other_certs,
            signature_index,
            key_usage_mode,
        } => {
            let key_usage = KeyUsageConstraints {
                mode: match key_usage_mode {
                    KeyUsageMode::All => KeyUsageMatch::MatchAll,
                    KeyUsageMode::Any => KeyUsageMatch::MatchAny,
                },
                ..KeyUsageConstraints::default()
            };
            let report = commands::verify_document(&VerifyRequest {
                document,
                trust_roots: trust_certs,
                other_certs,
                signature_index,
                key_usage,
            })?;
            print_report(&report);
            Ok(report.all_valid())
        },
    }
}

fn print_report(report: &VerificationReport) {
    for path in &report.skipped_certificates {
        eprintln!("Warning: could not read certificate {}", path.display());
    }
    if report.verdicts.is_empty() {
        println!("No signatures found");
        return;
    }
    for verdict in &report.verdicts {
        println!("Signature {} ({})", verdict.index, verdict.field_name);
        if let Some(ref signer) = verdict.signer {
            println!("  Signer:        {}", signer);
        }
        if let Some(time) = verdict.signing_time {
            println!("  Signing time:  {}", time.to_rfc3339());
        }
        if let Some(ref reason) = verdict.signature_info.reason {
            println!("  Reason:        {}", reason);
        }
        if let Some(ref location) = verdict.signature_info.location {
            println!("  Location:      {}", location);
        }
        println!("  Coverage:      {:?}", verdict.coverage);
        println!(
            "  Modified:      {}{}",
            verdict.modified_after_signing,
            if verdict.modified_after_signing && verdict.modification_permitted {
                " (permitted)"
            } else {
                ""
            }
        );
        println!("  Timestamp:     {}", verdict.timestamp_check.label());
        if !verdict.chain.is_empty() {
            let names: Vec<String> =
                verdict.chain.iter().map(|c| c.subject().to_string()).collect();
            println!("  Chain:         {}", names.join(" <- "));
        }
        match verdict.reason {
            Some(ref reason) => {
                println!("  Verdict:       {} ({})", verdict.status.label(), reason)
            },
            None => println!("  Verdict:       {}", verdict.status.label()),
        }
    }
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    match run(cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        },
    }
}
