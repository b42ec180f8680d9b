//! Configuration for certificate generation and signing.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::pki::{Role, DEFAULT_KDF_ITERATIONS};
use crate::signatures::DigestAlgorithm;

/// Reserved size of the embedded signature record, in bytes.
pub const DEFAULT_SIGNATURE_SIZE: usize = 16_384;

/// Environment variable consulted for key passphrases by the CLI.
pub const PASSPHRASE_ENV: &str = "PDF_SIGCHAIN_PASSPHRASE";

/// Key size and lifetime for one certificate role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleSettings {
    /// RSA modulus size in bits
    pub key_size: usize,
    /// Validity period in days
    pub validity_days: u32,
}

impl RoleSettings {
    /// Create role settings.
    pub const fn new(key_size: usize, validity_days: u32) -> Self {
        Self {
            key_size,
            validity_days,
        }
    }
}

/// PKI and signing configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PkiConfig {
    /// Root CA settings
    pub root: RoleSettings,
    /// Intermediate CA settings
    pub intermediate: RoleSettings,
    /// Chain-issued leaf settings
    pub leaf: RoleSettings,
    /// Self-signed leaf settings
    pub self_signed: RoleSettings,
    /// PBKDF2 iterations for encrypted key export
    pub kdf_iterations: u32,
    /// Reserved signature record size in bytes
    pub signature_size: usize,
    /// Digest used for document signatures
    pub digest_algorithm: DigestAlgorithm,
}

impl Default for PkiConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl PkiConfig {
    /// Create new configuration with defaults.
    pub fn new() -> Self {
        Self {
            root: RoleSettings::new(4096, 3650),
            intermediate: RoleSettings::new(3072, 1825),
            leaf: RoleSettings::new(2048, 365),
            self_signed: RoleSettings::new(4096, 365),
            kdf_iterations: DEFAULT_KDF_ITERATIONS,
            signature_size: DEFAULT_SIGNATURE_SIZE,
            digest_algorithm: DigestAlgorithm::Sha256,
        }
    }

    /// Load configuration from a JSON file. Missing fields keep their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&text)
    }

    /// Parse configuration from JSON text.
    pub fn from_json_str(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        for (name, settings) in [
            ("root", self.root),
            ("intermediate", self.intermediate),
            ("leaf", self.leaf),
            ("self_signed", self.self_signed),
        ] {
            if settings.key_size < crate::pki::MIN_KEY_SIZE {
                return Err(Error::Config {
                    reason: format!("{} key size {} is too small", name, settings.key_size),
                });
            }
            if settings.validity_days == 0 {
                return Err(Error::Config {
                    reason: format!("{} validity must be at least one day", name),
                });
            }
        }
        if self.kdf_iterations == 0 {
            return Err(Error::Config {
                reason: "kdf_iterations must be positive".to_string(),
            });
        }
        Ok(())
    }

    /// Settings for a role; `self_signed` selects the self-signed leaf entry.
    pub fn settings_for(&self, role: Role, self_signed: bool) -> RoleSettings {
        match role {
            Role::Root => self.root,
            Role::Intermediate => self.intermediate,
            Role::Leaf if self_signed => self.self_signed,
            Role::Leaf => self.leaf,
        }
    }

    /// Set the key size of every role.
    pub fn with_key_size(mut self, bits: usize) -> Self {
        self.root.key_size = bits;
        self.intermediate.key_size = bits;
        self.leaf.key_size = bits;
        self.self_signed.key_size = bits;
        self
    }

    /// Set the root settings.
    pub fn with_root(mut self, settings: RoleSettings) -> Self {
        self.root = settings;
        self
    }

    /// Set the intermediate settings.
    pub fn with_intermediate(mut self, settings: RoleSettings) -> Self {
        self.intermediate = settings;
        self
    }

    /// Set the chain-issued leaf settings.
    pub fn with_leaf(mut self, settings: RoleSettings) -> Self {
        self.leaf = settings;
        self
    }

    /// Set the self-signed leaf settings.
    pub fn with_self_signed(mut self, settings: RoleSettings) -> Self {
        self.self_signed = settings;
        self
    }

    /// Set the PBKDF2 iteration count.
    pub fn with_kdf_iterations(mut self, iterations: u32) -> Self {
        self.kdf_iterations = iterations;
        self
    }

    /// Set the reserved signature record size.
    pub fn with_signature_size(mut self, size: usize) -> Self {
        self.signature_size = size;
        self
    }

    /// Set the document digest algorithm.
    pub fn with_digest_algorithm(mut self, algorithm: DigestAlgorithm) -> Self {
        self.digest_algorithm = algorithm;
        self
    }
}
