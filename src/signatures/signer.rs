//! Document signing.
//!
//! This module handles the creation of signature records and their embedding
//! into a [`SignableDocument`] as an incremental revision.

use chrono::{DateTime, Utc};

use super::byterange::{ByteRange, ByteRangeCalculator};
use super::types::{
    FieldPolicy, SignOptions, SignatureRecord, SignedAttributes, SigningCredentials,
    TimestampAuthority,
};
use crate::document::{escape_pdf_string, SignableDocument};
use crate::error::{Error, Result};

/// Sub-filter written into signature dictionaries.
pub const SUB_FILTER: &str = "x.pdf_sigchain.rsa.json";

/// Result of a successful signing operation.
#[derive(Debug)]
pub struct SigningOutcome {
    /// The embedded record
    pub record: SignatureRecord,
    /// Signed byte range in the output document
    pub byte_range: ByteRange,
    /// Timestamp failure, if a collaborator was configured and failed
    pub timestamp_error: Option<Error>,
}

/// Signs documents with a leaf key and its certificate chain.
pub struct SignatureEngine {
    credentials: SigningCredentials,
    options: SignOptions,
    timestamp_authority: Option<Box<dyn TimestampAuthority>>,
    signing_time: Option<DateTime<Utc>>,
    byte_range_calc: ByteRangeCalculator,
}

impl SignatureEngine {
    /// Create a new engine with the given credentials and options.
    pub fn new(credentials: SigningCredentials, options: SignOptions) -> Self {
        let byte_range_calc = ByteRangeCalculator::new(options.estimated_size);
        Self {
            credentials,
            options,
            timestamp_authority: None,
            signing_time: None,
            byte_range_calc,
        }
    }

    /// Attach a timestamp collaborator.
    pub fn with_timestamp_authority(mut self, authority: Box<dyn TimestampAuthority>) -> Self {
        self.timestamp_authority = Some(authority);
        self
    }

    /// Use a fixed signing time instead of the current time.
    pub fn with_signing_time(mut self, at: DateTime<Utc>) -> Self {
        self.signing_time = Some(at);
        self
    }

    /// Get the signing options.
    pub fn options(&self) -> &SignOptions {
        &self.options
    }

    /// Get the signing credentials.
    pub fn credentials(&self) -> &SigningCredentials {
        &self.credentials
    }

    /// Get the placeholder size for the signature.
    pub fn placeholder_size(&self) -> usize {
        self.byte_range_calc.placeholder_size()
    }

    /// Build the signature dictionary entries (without /ByteRange and /Contents).
    pub fn build_signature_dictionary(&self, signing_time: DateTime<Utc>) -> String {
        let mut dict = String::new();

        dict.push_str("/Type /Sig ");
        dict.push_str("/Filter /Adobe.PPKLite ");
        dict.push_str(&format!("/SubFilter /{} ", SUB_FILTER));

        let name = self
            .options
            .name
            .clone()
            .or_else(|| self.credentials.certificate.subject().common_name().map(str::to_string));
        if let Some(ref name) = name {
            dict.push_str(&format!("/Name ({}) ", escape_pdf_string(name)));
        }

        if let Some(ref reason) = self.options.reason {
            dict.push_str(&format!("/Reason ({}) ", escape_pdf_string(reason)));
        }

        if let Some(ref location) = self.options.location {
            dict.push_str(&format!("/Location ({}) ", escape_pdf_string(location)));
        }

        if let Some(ref contact) = self.options.contact_info {
            dict.push_str(&format!("/ContactInfo ({}) ", escape_pdf_string(contact)));
        }

        if let Some(permission) = self.options.modification_permission {
            dict.push_str(&format!(
                "/Reference [<< /TransformMethod /DocMDP /TransformParams << /P {} >> >>] ",
                permission.level()
            ));
        }

        dict.push_str(&format!("/M ({})", format_pdf_date(signing_time)));
        dict
    }

    /// Sign `document` in place.
    ///
    /// On any failure the document is restored to its length before the call,
    /// so no half-written revision is left behind.
    pub fn sign<D: SignableDocument + ?Sized>(&self, document: &mut D) -> Result<SigningOutcome> {
        let field = self.options.field_name.as_str();
        let exists = document.has_signature_field(field);
        if !exists && self.options.field_policy == FieldPolicy::MustExist {
            return Err(Error::SignatureFieldMissing {
                field: field.to_string(),
            });
        }
        if document.is_signature_field_filled(field) {
            return Err(Error::SignatureFieldFilled {
                field: field.to_string(),
            });
        }

        let checkpoint = document.as_bytes().len();
        let result = self.sign_from(document, exists);
        if result.is_err() {
            document.truncate(checkpoint);
        }
        result
    }

    fn sign_from<D: SignableDocument + ?Sized>(
        &self,
        document: &mut D,
        field_exists: bool,
    ) -> Result<SigningOutcome> {
        let field = self.options.field_name.as_str();
        if !field_exists {
            log::info!("Creating signature field '{}'", field);
            document.append_signature_field(field)?;
        }

        let signing_time = self.signing_time.unwrap_or_else(Utc::now);
        let dictionary = self.build_signature_dictionary(signing_time);
        let slot = document.reserve_signature(field, &dictionary, self.placeholder_size())?;

        let algorithm = self.options.digest_algorithm;
        let document_digest = document.digest(&slot.byte_range, algorithm)?;
        let signed_attributes = SignedAttributes {
            field_name: field.to_string(),
            digest_algorithm: algorithm,
            document_digest,
            signing_time: signing_time.timestamp(),
            modification_permission: self.options.modification_permission,
        };
        let signature = self
            .credentials
            .key
            .sign(algorithm, &signed_attributes.to_signed_bytes()?)?;

        let mut timestamp_error = None;
        let timestamp_token = match &self.timestamp_authority {
            Some(authority) => match authority.request_token(&signature) {
                Ok(token) => Some(token),
                Err(e) => {
                    log::warn!("Timestamp not attached: {}", e);
                    timestamp_error = Some(e);
                    None
                },
            },
            None => None,
        };

        let record = SignatureRecord {
            signed_attributes,
            signer_certificate: self.credentials.certificate.as_der().to_vec(),
            embedded_chain: self
                .credentials
                .chain
                .iter()
                .map(|c| c.as_der().to_vec())
                .collect(),
            signature,
            timestamp_token,
        };
        document.write_contents(&slot, &record.encode()?)?;

        log::info!(
            "Signed field '{}' as {} ({} chain certificates)",
            field,
            self.credentials.certificate.subject(),
            self.credentials.chain.len()
        );

        Ok(SigningOutcome {
            record,
            byte_range: slot.byte_range,
            timestamp_error,
        })
    }
}

impl std::fmt::Debug for SignatureEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignatureEngine")
            .field("credentials", &self.credentials)
            .field("options", &self.options)
            .field("timestamp_authority", &self.timestamp_authority.is_some())
            .finish()
    }
}

/// Format a time as a PDF date string: `D:YYYYMMDDHHmmSSZ`.
fn format_pdf_date(at: DateTime<Utc>) -> String {
    at.format("D:%Y%m%d%H%M%SZ").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::IncrementalDocument;
    use crate::pki::{Certificate, Identity, Issuance, KeyPair};
    use crate::pki::{issue, CertificateProfile, Role};
    use crate::signatures::types::{ModificationPermission, TimestampToken};
    use chrono::TimeZone;

    fn credentials() -> SigningCredentials {
        let (key, cert): (KeyPair, Certificate) = issue(
            &CertificateProfile::new(
                Identity::new("Signer", "Acme"),
                Role::Leaf,
                Issuance::SelfSigned,
            )
            .with_key_size(1024),
        )
        .unwrap();
        SigningCredentials::new(key, cert).unwrap()
    }

    fn document() -> IncrementalDocument {
        IncrementalDocument::new(b"%PDF-1.7\n%%EOF\n".to_vec()).unwrap()
    }

    struct FailingAuthority;

    impl TimestampAuthority for FailingAuthority {
        fn request_token(&self, _signature: &[u8]) -> Result<TimestampToken> {
            Err(Error::Timestamp {
                reason: "unreachable".to_string(),
            })
        }
    }

    #[test]
    fn test_format_pdf_date() {
        let at = Utc.with_ymd_and_hms(2024, 3, 5, 7, 8, 9).unwrap();
        assert_eq!(format_pdf_date(at), "D:20240305070809Z");
    }

    #[test]
    fn test_signer_placeholder() {
        let opts = SignOptions::default().with_estimated_size(1024);
        let engine = SignatureEngine::new(credentials(), opts);
        // 1024 * 2 + 2 = 2050 characters
        assert_eq!(engine.placeholder_size(), 2050);
    }

    #[test]
    fn test_build_signature_dictionary() {
        let opts = SignOptions::default()
            .with_reason("Test signing")
            .with_location("Test City")
            .with_modification_permission(ModificationPermission::NoChanges);
        let engine = SignatureEngine::new(credentials(), opts);

        let dict = engine.build_signature_dictionary(Utc::now());
        assert!(dict.contains("/Type /Sig"));
        assert!(dict.contains("/Filter /Adobe.PPKLite"));
        assert!(dict.contains(SUB_FILTER));
        assert!(dict.contains("/Name (Signer)"));
        assert!(dict.contains("/Reason (Test signing)"));
        assert!(dict.contains("/Location (Test City)"));
        assert!(dict.contains("/P 1"));
        assert!(dict.contains("/M (D:"));
    }

    #[test]
    fn test_missing_field_must_exist() {
        let mut doc = document();
        let before = doc.as_bytes().to_vec();
        let engine = SignatureEngine::new(credentials(), SignOptions::default());
        assert!(matches!(
            engine.sign(&mut doc),
            Err(Error::SignatureFieldMissing { .. })
        ));
        assert_eq!(doc.as_bytes(), &before[..]);
    }

    #[test]
    fn test_create_if_missing() {
        let mut doc = document();
        let opts = SignOptions::default()
            .with_field_policy(FieldPolicy::CreateIfMissing)
            .with_estimated_size(4096);
        let engine = SignatureEngine::new(credentials(), opts);
        let outcome = engine.sign(&mut doc).unwrap();
        assert!(doc.is_signature_field_filled("Signature1"));
        assert_eq!(outcome.byte_range.signed_end(), doc.as_bytes().len());
        assert!(outcome.timestamp_error.is_none());
    }

    #[test]
    fn test_filled_field_rejected() {
        let mut doc = document();
        let opts = SignOptions::default()
            .with_field_policy(FieldPolicy::CreateIfMissing)
            .with_estimated_size(4096);
        let engine = SignatureEngine::new(credentials(), opts);
        engine.sign(&mut doc).unwrap();
        assert!(matches!(
            engine.sign(&mut doc),
            Err(Error::SignatureFieldFilled { .. })
        ));
    }

    #[test]
    fn test_too_small_placeholder_rolls_back() {
        let mut doc = document();
        let before = doc.as_bytes().to_vec();
        let opts = SignOptions::default()
            .with_field_policy(FieldPolicy::CreateIfMissing)
            .with_estimated_size(16);
        let engine = SignatureEngine::new(credentials(), opts);
        assert!(matches!(
            engine.sign(&mut doc),
            Err(Error::SignatureTooLarge { .. })
        ));
        assert_eq!(doc.as_bytes(), &before[..]);
    }

    #[test]
    fn test_timestamp_failure_does_not_abort() {
        let mut doc = document();
        let opts = SignOptions::default()
            .with_field_policy(FieldPolicy::CreateIfMissing)
            .with_estimated_size(4096);
        let engine = SignatureEngine::new(credentials(), opts)
            .with_timestamp_authority(Box::new(FailingAuthority));
        let outcome = engine.sign(&mut doc).unwrap();
        assert!(matches!(outcome.timestamp_error, Some(Error::Timestamp { .. })));
        assert!(outcome.record.timestamp_token.is_none());
    }
}
