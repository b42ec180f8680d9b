//! RSA key material and its at-rest protection.
//!
//! Private keys are exported as PKCS#8 PEM. With a passphrase the export is a
//! PKCS#8 `EncryptedPrivateKeyInfo` using PBES2 (PBKDF2-HMAC-SHA256 with a
//! random salt, AES-256-CBC with a random IV). The passphrase and the exported
//! text are held in zeroizing buffers and never logged.

use der::pem::PemLabel;
use pkcs1::EncodeRsaPublicKey;
use pkcs8::pkcs5::pbes2;
use pkcs8::{
    DecodePrivateKey, EncodePrivateKey, EncodePublicKey, EncryptedPrivateKeyInfo, LineEnding,
    PrivateKeyInfo,
};
use rand::RngCore;
use rsa::traits::PublicKeyParts;
use rsa::{RsaPrivateKey, RsaPublicKey};
use sha1::{Digest, Sha1};
use zeroize::Zeroizing;

use crate::error::{Error, Result};
use crate::signatures::DigestAlgorithm;

/// PBKDF2 iteration count used unless configured otherwise.
pub const DEFAULT_KDF_ITERATIONS: u32 = 600_000;

/// Smallest modulus accepted for generation.
pub const MIN_KEY_SIZE: usize = 1024;

/// How an exported private key is protected.
#[derive(Clone)]
pub enum KeyProtection {
    /// Plain PKCS#8
    Unencrypted,
    /// PBES2 encrypted PKCS#8 (PBKDF2-HMAC-SHA256, AES-256-CBC)
    ///
    /// CBC carries no MAC. Tampering and wrong passphrases are caught on
    /// import by the padding check, the PKCS#8 DER decode and RSA key
    /// validation, each reported as [`Error::DecryptionFailed`].
    Passphrase {
        /// Secret used to derive the encryption key
        passphrase: Zeroizing<String>,
        /// PBKDF2 iterations
        iterations: u32,
    },
}

impl KeyProtection {
    /// Passphrase protection. An empty passphrase is rejected.
    pub fn passphrase(passphrase: impl Into<String>) -> Result<Self> {
        let passphrase = Zeroizing::new(passphrase.into());
        if passphrase.is_empty() {
            return Err(Error::PassphraseRequired);
        }
        Ok(KeyProtection::Passphrase {
            passphrase,
            iterations: DEFAULT_KDF_ITERATIONS,
        })
    }

    /// Resolve an encryption request. `encrypt` without a passphrase fails.
    pub fn from_request(encrypt: bool, passphrase: Option<&str>) -> Result<Self> {
        match (encrypt, passphrase) {
            (false, _) => Ok(KeyProtection::Unencrypted),
            (true, Some(p)) => Self::passphrase(p),
            (true, None) => Err(Error::PassphraseRequired),
        }
    }

    /// Override the PBKDF2 iteration count.
    pub fn with_iterations(self, iterations: u32) -> Self {
        match self {
            KeyProtection::Passphrase { passphrase, .. } => KeyProtection::Passphrase {
                passphrase,
                iterations,
            },
            other => other,
        }
    }

    /// Whether exports are encrypted.
    pub fn is_encrypted(&self) -> bool {
        matches!(self, KeyProtection::Passphrase { .. })
    }
}

impl std::fmt::Debug for KeyProtection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KeyProtection::Unencrypted => write!(f, "Unencrypted"),
            KeyProtection::Passphrase { iterations, .. } => f
                .debug_struct("Passphrase")
                .field("passphrase", &"[REDACTED]")
                .field("iterations", iterations)
                .finish(),
        }
    }
}

/// An RSA key pair. The private half is zeroized on drop.
#[derive(Clone)]
pub struct KeyPair {
    private: RsaPrivateKey,
    public: RsaPublicKey,
}

impl KeyPair {
    /// Generate a fresh key pair with a modulus of `bits` bits.
    pub fn generate(bits: usize) -> Result<Self> {
        if bits < MIN_KEY_SIZE {
            return Err(Error::KeyDecode {
                reason: format!("key size {} is below the minimum of {}", bits, MIN_KEY_SIZE),
            });
        }
        log::debug!("Generating {}-bit RSA key", bits);
        let private = RsaPrivateKey::new(&mut rand::thread_rng(), bits)?;
        Ok(Self::from_private(private))
    }

    fn from_private(private: RsaPrivateKey) -> Self {
        let public = private.to_public_key();
        Self { private, public }
    }

    /// Public half.
    pub fn public_key(&self) -> &RsaPublicKey {
        &self.public
    }

    /// Modulus size in bits.
    pub fn bits(&self) -> usize {
        self.public.size() * 8
    }

    /// Whether `public` is the public half of this pair.
    pub fn matches(&self, public: &RsaPublicKey) -> bool {
        &self.public == public
    }

    /// RFC 5280 key identifier of the public half.
    pub fn key_identifier(&self) -> Result<Vec<u8>> {
        key_identifier(&self.public)
    }

    /// PKCS#1 v1.5 signature over the digest of `message`.
    pub fn sign(&self, algorithm: DigestAlgorithm, message: &[u8]) -> Result<Vec<u8>> {
        let hashed = algorithm.digest(message);
        let signature =
            self.private
                .sign_with_rng(&mut rand::thread_rng(), algorithm.pkcs1v15(), &hashed)?;
        Ok(signature)
    }

    /// Export the private key as PEM under the given protection.
    pub fn export(&self, protection: &KeyProtection) -> Result<Zeroizing<String>> {
        let document = self.private.to_pkcs8_der()?;
        match protection {
            KeyProtection::Unencrypted => {
                Ok(document.to_pem(PrivateKeyInfo::PEM_LABEL, LineEnding::LF)?)
            },
            KeyProtection::Passphrase {
                passphrase,
                iterations,
            } => {
                let mut rng = rand::thread_rng();
                let mut salt = [0u8; 16];
                let mut iv = [0u8; 16];
                rng.fill_bytes(&mut salt);
                rng.fill_bytes(&mut iv);

                let params = pbes2::Parameters::pbkdf2_sha256_aes256cbc(*iterations, &salt, &iv)
                    .map_err(|e| Error::KeyDecode {
                        reason: e.to_string(),
                    })?;
                let info = PrivateKeyInfo::try_from(document.as_bytes())?;
                let encrypted = info.encrypt_with_params(params, passphrase.as_bytes())?;
                Ok(encrypted.to_pem(EncryptedPrivateKeyInfo::PEM_LABEL, LineEnding::LF)?)
            },
        }
    }

    /// Export the public key as SPKI PEM.
    pub fn export_public(&self) -> Result<String> {
        Ok(self.public.to_public_key_pem(LineEnding::LF)?)
    }

    /// Import a private key exported by [`KeyPair::export`].
    ///
    /// An encrypted key without a passphrase fails with `PassphraseRequired`;
    /// a wrong passphrase or damaged input with a passphrase supplied fails
    /// with `DecryptionFailed`.
    pub fn import(pem: &str, passphrase: Option<&str>) -> Result<Self> {
        let passphrase = passphrase.filter(|p| !p.is_empty());
        let encrypted = der::pem::decode_label(pem.as_bytes())
            .map(|label| label == EncryptedPrivateKeyInfo::PEM_LABEL)
            .unwrap_or(false);

        let private = match (encrypted, passphrase) {
            (true, None) => return Err(Error::PassphraseRequired),
            (true, Some(pass)) => RsaPrivateKey::from_pkcs8_encrypted_pem(pem, pass.as_bytes())
                .map_err(|_| Error::DecryptionFailed)?,
            (false, Some(_)) => {
                RsaPrivateKey::from_pkcs8_pem(pem).map_err(|_| Error::DecryptionFailed)?
            },
            (false, None) => RsaPrivateKey::from_pkcs8_pem(pem).map_err(|e| Error::KeyDecode {
                reason: e.to_string(),
            })?,
        };

        private.validate().map_err(|e| match passphrase {
            Some(_) => Error::DecryptionFailed,
            None => Error::KeyDecode {
                reason: e.to_string(),
            },
        })?;
        Ok(Self::from_private(private))
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("bits", &self.bits())
            .field("private", &"[REDACTED]")
            .finish()
    }
}

/// SHA-1 of the PKCS#1 `RSAPublicKey` encoding (RFC 5280 method 1).
pub fn key_identifier(public: &RsaPublicKey) -> Result<Vec<u8>> {
    let der = public.to_pkcs1_der()?;
    Ok(Sha1::digest(der.as_bytes()).to_vec())
}

/// Verify a PKCS#1 v1.5 signature over the digest of `message`.
pub fn verify_signature(
    public: &RsaPublicKey,
    algorithm: DigestAlgorithm,
    message: &[u8],
    signature: &[u8],
) -> bool {
    let hashed = algorithm.digest(message);
    public
        .verify(algorithm.pkcs1v15(), &hashed, signature)
        .is_ok()
}
