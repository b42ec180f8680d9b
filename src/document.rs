//! Signable documents and their incremental revisions.
//!
//! A document is an opaque PDF byte stream followed by zero or more
//! incremental revisions appended by this crate. Each revision starts with a
//! `%%SigField` comment line and ends with `%%EOF`:
//!
//! ```text
//! %%SigField
//! << /FT /Sig /T (Signature1) >>                       empty field
//! %%EOF
//! %%SigField
//! << /FT /Sig /T (Signature1) /V << /Type /Sig ... /ByteRange [...] /Contents <...> >> >>
//! %%EOF
//! ```
//!
//! Earlier bytes are never rewritten, so a signature's byte range stays
//! intact when later revisions are appended.

use std::path::Path;

use lazy_static::lazy_static;
use regex::bytes::Regex;

use crate::error::{Error, Result};
use crate::signatures::{
    hex_to_bytes, ByteRange, ByteRangeCalculator, DigestAlgorithm, RevisionKind, SignatureInfo,
};

const REVISION_MARKER: &[u8] = b"\n%%SigField\n";
const EOF_MARKER: &[u8] = b"%%EOF\n";
const SIGNATURE_SUFFIX: &str = " >> >>\n%%EOF\n";

lazy_static! {
    /// Field name: `/T (name)`
    static ref RE_FIELD_NAME: Regex = Regex::new(r"/T \(((?:\\.|[^\\)])*)\)").unwrap();

    /// Signature value dictionary opener
    static ref RE_SIG_VALUE: Regex = Regex::new(r"/V\s*<<").unwrap();

    /// `/ByteRange [a b c d]`
    static ref RE_BYTE_RANGE: Regex =
        Regex::new(r"/ByteRange\s*\[\s*(\d+)\s+(\d+)\s+(\d+)\s+(\d+)\s*\]").unwrap();

    /// `/Contents <hex>`
    static ref RE_CONTENTS: Regex = Regex::new(r"/Contents\s*(<([0-9A-Fa-f]*)>)").unwrap();

    /// Text entries of the signature dictionary
    static ref RE_TEXT_ENTRY: Regex =
        Regex::new(r"/(Name|Reason|Location|ContactInfo|M) \(((?:\\.|[^\\)])*)\)").unwrap();

    /// `/SubFilter /name`
    static ref RE_SUB_FILTER: Regex = Regex::new(r"/SubFilter /([^\s/<>\[\]()]+)").unwrap();

    /// A whole empty-field revision, nothing else.
    static ref RE_FIELD_REVISION: Regex = Regex::new(&format!(
        r"(?s-u)\A\n%%SigField\n<< /FT /Sig /T {} >>\n%%EOF\n\z",
        PDF_STRING
    ))
    .unwrap();

    /// A whole signature revision: names, strings and the DocMDP reference
    /// as dictionary values, then the byte range and contents.
    static ref RE_SIGNATURE_REVISION: Regex = Regex::new(&format!(
        concat!(
            r"(?s-u)\A\n%%SigField\n<< /FT /Sig /T {string} /V << ",
            r"{entry}(?: {entry})* ",
            r"/ByteRange \[\d+ \d+ \d+ \d+\] /Contents <[0-9A-Fa-f]*> >> >>\n%%EOF\n\z"
        ),
        string = PDF_STRING,
        entry = format!(
            r"/[A-Za-z]+ (?:/[A-Za-z0-9._]+|{}|{})",
            PDF_STRING, DOC_MDP_REFERENCE
        ),
    ))
    .unwrap();
}

/// Escaped literal string as written by [`escape_pdf_string`].
const PDF_STRING: &str = r"\((?:\\.|[^\\)])*\)";

/// DocMDP transform reference array.
const DOC_MDP_REFERENCE: &str =
    r"\[<< /TransformMethod /DocMDP /TransformParams << /P [123] >> >>\]";

/// A signature field and whether it is signed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureField {
    /// Field name
    pub name: String,
    /// A signature value exists for the field
    pub filled: bool,
}

/// Location of a reserved signature value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignatureSlot {
    /// Signed byte range
    pub byte_range: ByteRange,
    /// Offset of the `<` of the contents placeholder
    pub contents_offset: usize,
    /// Placeholder length including the angle brackets
    pub placeholder_size: usize,
}

/// A signature found in a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbeddedSignature {
    /// Position among the document's signatures
    pub index: usize,
    /// Field name
    pub field_name: String,
    /// Declared byte range, if parseable
    pub byte_range: Option<ByteRange>,
    /// Decoded contents value, if parseable
    pub contents: Option<Vec<u8>>,
    /// Offset and length of the contents value including brackets
    pub contents_span: Option<(usize, usize)>,
    /// Offset just past the revision's `%%EOF`
    pub revision_end: usize,
    /// Descriptive dictionary entries
    pub info: SignatureInfo,
}

/// A document that can carry signature fields and signatures.
pub trait SignableDocument {
    /// Current bytes.
    fn as_bytes(&self) -> &[u8];

    /// Append a revision declaring an empty signature field.
    fn append_signature_field(&mut self, name: &str) -> Result<()>;

    /// Append a signing revision for field `name` with the given dictionary
    /// entries and a zero-filled contents placeholder.
    fn reserve_signature(
        &mut self,
        name: &str,
        dictionary: &str,
        placeholder_size: usize,
    ) -> Result<SignatureSlot>;

    /// Fill the placeholder of `slot` with `contents`.
    fn write_contents(&mut self, slot: &SignatureSlot, contents: &[u8]) -> Result<()>;

    /// Drop everything after `len` bytes.
    fn truncate(&mut self, len: usize);

    /// Signature fields in order of first declaration.
    fn signature_fields(&self) -> Vec<SignatureField>;

    /// Signatures in document order.
    fn embedded_signatures(&self) -> Vec<EmbeddedSignature>;

    /// Classification of everything appended after `offset`.
    fn revisions_after(&self, offset: usize) -> Vec<RevisionKind>;

    /// Whether field `name` exists.
    fn has_signature_field(&self, name: &str) -> bool {
        self.signature_fields().iter().any(|f| f.name == name)
    }

    /// Whether field `name` already carries a signature.
    fn is_signature_field_filled(&self, name: &str) -> bool {
        self.signature_fields()
            .iter()
            .any(|f| f.name == name && f.filled)
    }

    /// Digest of the bytes covered by `range`.
    fn digest(&self, range: &ByteRange, algorithm: DigestAlgorithm) -> Result<Vec<u8>> {
        Ok(algorithm.digest(&range.extract(self.as_bytes())?))
    }
}

/// In-memory PDF with incremental signature revisions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncrementalDocument {
    bytes: Vec<u8>,
}

impl IncrementalDocument {
    /// Wrap document bytes. The data must start with a `%PDF-` header.
    pub fn new(bytes: Vec<u8>) -> Result<Self> {
        if !bytes.starts_with(b"%PDF-") {
            return Err(Error::InvalidDocument {
                reason: "missing %PDF- header".to_string(),
            });
        }
        Ok(Self { bytes })
    }

    /// Read a document from disk.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::new(std::fs::read(path.as_ref())?)
    }

    /// Atomically write the document to disk.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        crate::storage::write_atomic(path.as_ref(), &self.bytes)
    }

    /// Take the bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    /// `(start, end)` of every revision; `start` is the marker offset and
    /// `end` is just past its `%%EOF` line.
    fn revision_spans(&self) -> Vec<(usize, usize)> {
        let mut spans = Vec::new();
        let mut pos = 0;
        while let Some(start) = find(&self.bytes[pos..], REVISION_MARKER).map(|i| i + pos) {
            let body = start + REVISION_MARKER.len();
            match find(&self.bytes[body..], EOF_MARKER) {
                Some(i) => {
                    let end = body + i + EOF_MARKER.len();
                    spans.push((start, end));
                    pos = end;
                },
                None => break,
            }
        }
        spans
    }

    fn parse_signature(&self, index: usize, start: usize, end: usize) -> EmbeddedSignature {
        let revision = &self.bytes[start..end];
        let field_name = field_name(revision).unwrap_or_default();

        let byte_range = RE_BYTE_RANGE.captures(revision).and_then(|caps| {
            let mut values = [0i64; 4];
            for (i, value) in values.iter_mut().enumerate() {
                *value = std::str::from_utf8(&caps[i + 1]).ok()?.parse().ok()?;
            }
            ByteRange::from_array(values).ok()
        });

        let (contents, contents_span) = match RE_CONTENTS.captures(revision) {
            Some(caps) => {
                let whole = caps.get(1).map(|m| (start + m.start(), m.len()));
                let decoded = caps.get(2).and_then(|m| hex_to_bytes(m.as_bytes()).ok());
                (decoded, whole)
            },
            None => (None, None),
        };

        let mut info = SignatureInfo {
            byte_range: byte_range.map(|r| r.to_array().to_vec()).unwrap_or_default(),
            sub_filter: RE_SUB_FILTER
                .captures(revision)
                .map(|caps| String::from_utf8_lossy(&caps[1]).to_string()),
            ..SignatureInfo::default()
        };
        for caps in RE_TEXT_ENTRY.captures_iter(revision) {
            let value = Some(unescape_pdf_string(&caps[2]));
            match &caps[1] {
                b"Name" => info.signer_name = value,
                b"Reason" => info.reason = value,
                b"Location" => info.location = value,
                b"ContactInfo" => info.contact_info = value,
                b"M" => info.signing_time = value,
                _ => {},
            }
        }

        EmbeddedSignature {
            index,
            field_name,
            byte_range,
            contents,
            contents_span,
            revision_end: end,
            info,
        }
    }
}

impl SignableDocument for IncrementalDocument {
    fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    fn append_signature_field(&mut self, name: &str) -> Result<()> {
        if self.has_signature_field(name) {
            return Ok(());
        }
        self.bytes.extend_from_slice(REVISION_MARKER);
        let field = format!("<< /FT /Sig /T ({}) >>\n", escape_pdf_string(name));
        self.bytes.extend_from_slice(field.as_bytes());
        self.bytes.extend_from_slice(EOF_MARKER);
        log::debug!("Appended signature field '{}'", name);
        Ok(())
    }

    fn reserve_signature(
        &mut self,
        name: &str,
        dictionary: &str,
        placeholder_size: usize,
    ) -> Result<SignatureSlot> {
        let calc = ByteRangeCalculator::with_placeholder_size(placeholder_size);
        let head = format!(
            "<< /FT /Sig /T ({}) /V << {} /ByteRange ",
            escape_pdf_string(name),
            dictionary.trim()
        );
        let contents_key = " /Contents ";

        let contents_offset = self.bytes.len()
            + REVISION_MARKER.len()
            + head.len()
            + ByteRange::formatted_len()
            + contents_key.len();
        let revision_end = contents_offset + placeholder_size + SIGNATURE_SUFFIX.len();
        let byte_range = calc.calculate_byte_range(revision_end, contents_offset);

        self.bytes.extend_from_slice(REVISION_MARKER);
        self.bytes.extend_from_slice(head.as_bytes());
        self.bytes
            .extend_from_slice(byte_range.format_fixed().as_bytes());
        self.bytes.extend_from_slice(contents_key.as_bytes());
        self.bytes
            .extend_from_slice(calc.generate_placeholder().as_bytes());
        self.bytes.extend_from_slice(SIGNATURE_SUFFIX.as_bytes());

        if self.bytes.len() != revision_end {
            return Err(Error::InvalidDocument {
                reason: format!(
                    "signature revision ends at {} instead of {}",
                    self.bytes.len(),
                    revision_end
                ),
            });
        }

        Ok(SignatureSlot {
            byte_range,
            contents_offset,
            placeholder_size,
        })
    }

    fn write_contents(&mut self, slot: &SignatureSlot, contents: &[u8]) -> Result<()> {
        ByteRangeCalculator::with_placeholder_size(slot.placeholder_size).insert_signature(
            &mut self.bytes,
            slot.contents_offset,
            contents,
        )
    }

    fn truncate(&mut self, len: usize) {
        self.bytes.truncate(len);
    }

    fn signature_fields(&self) -> Vec<SignatureField> {
        let mut fields: Vec<SignatureField> = Vec::new();
        for (start, end) in self.revision_spans() {
            let revision = &self.bytes[start..end];
            let Some(name) = field_name(revision) else {
                continue;
            };
            let filled = RE_SIG_VALUE.is_match(revision);
            match fields.iter_mut().find(|f| f.name == name) {
                Some(field) => field.filled |= filled,
                None => fields.push(SignatureField { name, filled }),
            }
        }
        fields
    }

    fn embedded_signatures(&self) -> Vec<EmbeddedSignature> {
        self.revision_spans()
            .into_iter()
            .filter(|(start, end)| RE_SIG_VALUE.is_match(&self.bytes[*start..*end]))
            .enumerate()
            .map(|(index, (start, end))| self.parse_signature(index, start, end))
            .collect()
    }

    fn revisions_after(&self, offset: usize) -> Vec<RevisionKind> {
        let mut kinds = Vec::new();
        let mut pos = offset.min(self.bytes.len());
        while pos < self.bytes.len() {
            let rest = &self.bytes[pos..];
            if rest.starts_with(REVISION_MARKER) {
                let body = pos + REVISION_MARKER.len();
                match find(&self.bytes[body..], EOF_MARKER) {
                    Some(i) => {
                        let end = body + i + EOF_MARKER.len();
                        let revision = &self.bytes[pos..end];
                        kinds.push(classify_revision(revision));
                        pos = end;
                    },
                    None => {
                        kinds.push(RevisionKind::Other);
                        break;
                    },
                }
            } else if rest[0].is_ascii_whitespace() {
                pos += 1;
            } else {
                kinds.push(RevisionKind::Other);
                match find(rest, REVISION_MARKER) {
                    Some(i) => pos += i,
                    None => break,
                }
            }
        }
        kinds
    }
}

/// Only revisions with exactly the layout this module writes count as
/// signature revisions; any extra byte makes the revision `Other`.
fn classify_revision(revision: &[u8]) -> RevisionKind {
    if RE_SIGNATURE_REVISION.is_match(revision) {
        RevisionKind::Signature
    } else if RE_FIELD_REVISION.is_match(revision) {
        RevisionKind::SignatureField
    } else {
        RevisionKind::Other
    }
}

fn field_name(revision: &[u8]) -> Option<String> {
    RE_FIELD_NAME
        .captures(revision)
        .map(|caps| unescape_pdf_string(&caps[1]))
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Escape special characters in a PDF string.
pub(crate) fn escape_pdf_string(s: &str) -> String {
    let mut result = String::with_capacity(s.len() + 10);
    for c in s.chars() {
        match c {
            '\\' => result.push_str("\\\\"),
            '(' => result.push_str("\\("),
            ')' => result.push_str("\\)"),
            '\n' => result.push_str("\\n"),
            '\r' => result.push_str("\\r"),
            '\t' => result.push_str("\\t"),
            _ => result.push(c),
        }
    }
    result
}

fn unescape_pdf_string(raw: &[u8]) -> String {
    let mut out = Vec::with_capacity(raw.len());
    let mut iter = raw.iter();
    while let Some(&b) = iter.next() {
        if b != b'\\' {
            out.push(b);
            continue;
        }
        match iter.next() {
            Some(b'n') => out.push(b'\n'),
            Some(b'r') => out.push(b'\r'),
            Some(b't') => out.push(b'\t'),
            Some(&other) => out.push(other),
            None => {},
        }
    }
    String::from_utf8_lossy(&out).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc() -> IncrementalDocument {
        let body = b"%PDF-1.7\n1 0 obj\n<< /Type /Catalog >>\nendobj\n%%EOF\n";
        IncrementalDocument::new(body.to_vec()).unwrap()
    }

    #[test]
    fn test_requires_pdf_header() {
        assert!(matches!(
            IncrementalDocument::new(b"hello".to_vec()),
            Err(Error::InvalidDocument { .. })
        ));
    }

    #[test]
    fn test_escape_pdf_string() {
        assert_eq!(escape_pdf_string("Hello"), "Hello");
        assert_eq!(escape_pdf_string("Hello (World)"), "Hello \\(World\\)");
        assert_eq!(escape_pdf_string("Line1\nLine2"), "Line1\\nLine2");
        assert_eq!(escape_pdf_string("Path\\to\\file"), "Path\\\\to\\\\file");
    }

    #[test]
    fn test_unescape_round_trip() {
        for s in ["plain", "a (b) c", "tab\there", "back\\slash", "x)y("] {
            assert_eq!(unescape_pdf_string(escape_pdf_string(s).as_bytes()), s);
        }
    }

    #[test]
    fn test_append_field() {
        let mut d = doc();
        assert!(!d.has_signature_field("Approval"));
        d.append_signature_field("Approval").unwrap();
        assert!(d.has_signature_field("Approval"));
        assert!(!d.is_signature_field_filled("Approval"));
        assert_eq!(
            d.signature_fields(),
            vec![SignatureField {
                name: "Approval".to_string(),
                filled: false
            }]
        );
    }

    #[test]
    fn test_append_field_twice_is_noop() {
        let mut d = doc();
        d.append_signature_field("A").unwrap();
        let len = d.as_bytes().len();
        d.append_signature_field("A").unwrap();
        assert_eq!(d.as_bytes().len(), len);
    }

    #[test]
    fn test_reserve_and_fill() {
        let mut d = doc();
        d.append_signature_field("Sig (1)").unwrap();
        let slot = d
            .reserve_signature("Sig (1)", "/Type /Sig /Reason (Approved)", 42)
            .unwrap();
        let bytes = d.as_bytes();
        assert_eq!(slot.byte_range.signed_end(), bytes.len());
        assert_eq!(bytes[slot.contents_offset], b'<');
        assert_eq!(bytes[slot.contents_offset + 41], b'>');
        assert!(d.is_signature_field_filled("Sig (1)"));

        d.write_contents(&slot, b"record").unwrap();
        let sigs = d.embedded_signatures();
        assert_eq!(sigs.len(), 1);
        let sig = &sigs[0];
        assert_eq!(sig.field_name, "Sig (1)");
        assert_eq!(sig.byte_range, Some(slot.byte_range));
        assert_eq!(sig.contents_span, Some((slot.contents_offset, 42)));
        assert!(sig.contents.as_ref().unwrap().starts_with(b"record"));
        assert_eq!(sig.info.reason.as_deref(), Some("Approved"));
        assert_eq!(sig.revision_end, d.as_bytes().len());
    }

    #[test]
    fn test_digest_excludes_contents() {
        let mut d = doc();
        let slot = d.reserve_signature("S", "/Type /Sig", 20).unwrap();
        let before = d.digest(&slot.byte_range, DigestAlgorithm::Sha256).unwrap();
        d.write_contents(&slot, b"abc").unwrap();
        let after = d.digest(&slot.byte_range, DigestAlgorithm::Sha256).unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn test_revisions_after() {
        let mut d = doc();
        let slot = d.reserve_signature("S1", "/Type /Sig", 20).unwrap();
        let end = slot.byte_range.signed_end();
        assert!(d.revisions_after(end).is_empty());

        d.append_signature_field("S2").unwrap();
        d.reserve_signature("S2", "/Type /Sig", 20).unwrap();
        assert_eq!(
            d.revisions_after(end),
            vec![RevisionKind::SignatureField, RevisionKind::Signature]
        );

        let mut tampered = d.clone().into_bytes();
        tampered.extend_from_slice(b"\n3 0 obj\n<< >>\nendobj\n");
        let tampered = IncrementalDocument::new(tampered).unwrap();
        assert_eq!(tampered.revisions_after(end).last(), Some(&RevisionKind::Other));
    }

    #[test]
    fn test_revision_with_extra_objects_is_other() {
        let mut d = doc();
        let slot = d.reserve_signature("S1", "/Type /Sig", 20).unwrap();
        let end = slot.byte_range.signed_end();

        let mut field = d.clone().into_bytes();
        field.extend_from_slice(
            b"\n%%SigField\n<< /FT /Sig /T (X) >>\n\
              1 0 obj\n<< /Type /Catalog /Injected (x) >>\nendobj\n%%EOF\n",
        );
        let field = IncrementalDocument::new(field).unwrap();
        assert_eq!(field.revisions_after(end), vec![RevisionKind::Other]);
        assert!(field.has_signature_field("X"));

        let mut signature = d.clone();
        signature.reserve_signature("S2", "/Type /Sig", 20).unwrap();
        let mut bytes = signature.as_bytes()[..end].to_vec();
        let later = String::from_utf8_lossy(&signature.as_bytes()[end..])
            .replace("/V << /Type /Sig", "/V << /Type /Sig /Kids [1 0 R]");
        bytes.extend_from_slice(later.as_bytes());
        let signature = IncrementalDocument::new(bytes).unwrap();
        assert_eq!(signature.revisions_after(end), vec![RevisionKind::Other]);
    }

    #[test]
    fn test_signer_dictionary_layout_is_signature() {
        let mut d = doc();
        let end = d.as_bytes().len();
        d.append_signature_field("Approval").unwrap();
        d.reserve_signature(
            "Approval",
            "/Type /Sig /Filter /Adobe.PPKLite /SubFilter /x.pdf_sigchain.rsa.json \
             /Name (Jane \\(QA\\)) /Reference [<< /TransformMethod /DocMDP /TransformParams \
             << /P 2 >> >>] /M (D:20260101120000Z)",
            20,
        )
        .unwrap();
        assert_eq!(
            d.revisions_after(end),
            vec![RevisionKind::SignatureField, RevisionKind::Signature]
        );
    }

    #[test]
    fn test_truncate() {
        let mut d = doc();
        let len = d.as_bytes().len();
        d.append_signature_field("S").unwrap();
        d.truncate(len);
        assert!(!d.has_signature_field("S"));
    }
}
