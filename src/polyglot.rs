//! Polyglot assembly and reading.
//!
//! The assembler takes the rendering engine's PDF output apart, attaches
//! the gemini source as an embedded file, rewrites `/Info`, computes the
//! `/ID` pair and serializes everything under a header that doubles as a
//! text/gemini preamble. Byte layout of the output:
//!
//! ```text
//! %PDF-1.7
//! %♊︎🗎︎            ← magic signature, line 2
//! ```                 ← opens an (empty) preformat block
//! ```                 ← closes it; `\r`-terminated so PDF readers see one line
//! g 0 obj … stream    ← the embedded source, visible to gemini readers
//! ```% What follows is a pdf representation of this file
//! …all other objects, xref, trailer, startxref, %%EOF
//! ```
//!
//! Gemini readers render the embedded source and treat the binary
//! remainder as one preformatted block; PDF readers see a normal file
//! whose first two lines are comments.

use std::collections::BTreeMap;

use sha2::{Digest, Sha256};

use crate::error::{Error, Result};
use crate::metadata::{Key, Metadata};
use crate::object::{write_dict, Dict, IndirectObject, Payload, Trailer, Value};
use crate::parser;

/// Magic signature on the second line of every gemdoc polyglot.
pub const GEMDOC_SIGNATURE: &str = "%♊\u{fe0e}🗎\u{fe0e}";

/// Alternate second-line marker for a re-serialized PDF without an
/// embedded source. Downstream tools may only know [`GEMDOC_SIGNATURE`];
/// no shipped code path writes this variant to disk.
pub const PLAIN_SIGNATURE: &str = "%¶🗎\u{fe0e}";

const PRODUCER_NOTE: &str = " (with gemdoc postprocessing)";

fn hex_digest(data: &[u8]) -> String {
    let digest = Sha256::digest(data);
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

/// An editable PDF with an optional embedded gemini source.
#[derive(Debug, Clone)]
pub struct PolyglotPdf {
    objects: BTreeMap<u32, IndirectObject>,
    trailer: Trailer,
    source: Option<String>,
    source_objnum: u32,
    source_hash: Option<String>,
    pdf_hash: String,
    flate_streams: bool,
}

impl PolyglotPdf {
    /// Parse the engine's PDF bytes and, when a source is given, attach it
    /// under `source_filename`. `flate_streams` compresses stream payloads
    /// before the ASCII85 pass and should only be set when the engine
    /// produced uncompressed streams.
    pub fn new(
        source: Option<&str>,
        pdf: &[u8],
        source_filename: &str,
        flate_streams: bool,
    ) -> Result<PolyglotPdf> {
        let (objects, trailer) = parser::parse_document(pdf)?;
        let mut doc = PolyglotPdf {
            source_hash: source.map(|s| hex_digest(s.as_bytes())),
            pdf_hash: hex_digest(pdf),
            source: source.map(str::to_string),
            source_objnum: 0,
            objects,
            trailer,
            flate_streams,
        };
        if doc.source.is_some() {
            let objnum = doc.objects.keys().next_back().copied().unwrap_or(0) + 1;
            doc.source_objnum = objnum;
            doc.attach_source(objnum, source_filename)?;
        }
        Ok(doc)
    }

    fn trailer_objnum(&self, key: &[u8]) -> Result<u32> {
        self.trailer
            .dict
            .get(key)
            .and_then(Value::ref_objnum)
            .ok_or_else(|| {
                Error::InvalidPdf(format!(
                    "trailer has no {} reference",
                    String::from_utf8_lossy(key)
                ))
            })
    }

    fn named_dict_mut(&mut self, key: &'static [u8]) -> Result<&mut Dict> {
        let objnum = self.trailer_objnum(key)?;
        self.objects
            .get_mut(&objnum)
            .map(|object| &mut object.dict)
            .ok_or_else(|| {
                Error::InvalidPdf(format!(
                    "{} points at missing object {}",
                    String::from_utf8_lossy(key),
                    objnum
                ))
            })
    }

    fn info_dict(&self) -> Result<&Dict> {
        let objnum = self.trailer_objnum(b"/Info")?;
        self.objects
            .get(&objnum)
            .map(|object| &object.dict)
            .ok_or_else(|| Error::InvalidPdf(format!("/Info points at missing object {}", objnum)))
    }

    /// Wire the embedded source into the document: a `/Filespec` object at
    /// `objnum + 1`, the `/Root/Names/EmbeddedFiles` name tree, the
    /// `/Root/AF` associated-files list, and the grown trailer `/Size`.
    /// The embedded file stream itself is emitted by [`serialize`], which
    /// controls its exact byte layout.
    ///
    /// [`serialize`]: PolyglotPdf::serialize
    fn attach_source(&mut self, objnum: u32, filename: &str) -> Result<()> {
        let filespec_num = objnum + 1;

        let mut ef = Dict::new();
        ef.insert(b"/F".to_vec(), Value::reference(objnum));
        let mut filespec = Dict::new();
        filespec.insert(b"/Type".to_vec(), Value::name("Filespec"));
        filespec.insert(b"/AFRelationship".to_vec(), Value::name("Source"));
        filespec.insert(b"/F".to_vec(), Value::utf16_hex(filename));
        filespec.insert(b"/UF".to_vec(), Value::utf16_hex(filename));
        filespec.insert(b"/EF".to_vec(), Value::Dict(ef));
        self.objects.insert(
            filespec_num,
            IndirectObject {
                num: filespec_num,
                dict: filespec,
                payload: Payload::Contents(Vec::new()),
            },
        );

        let root = self.named_dict_mut(b"/Root")?;
        let mut names = Dict::new();
        names.insert(
            b"/Names".to_vec(),
            Value::Array(vec![Value::utf16_hex(filename), Value::reference(filespec_num)]),
        );
        let mut embedded_files = Dict::new();
        embedded_files.insert(b"/EmbeddedFiles".to_vec(), Value::Dict(names));
        root.insert(b"/Names".to_vec(), Value::Dict(embedded_files));

        match root.get_mut(b"/AF".as_slice()) {
            Some(Value::Array(items)) => items.push(Value::reference(filespec_num)),
            Some(other) => {
                let existing = other.clone();
                *other = Value::Array(vec![existing, Value::reference(filespec_num)]);
            },
            None => {
                root.insert(
                    b"/AF".to_vec(),
                    Value::Array(vec![Value::reference(filespec_num)]),
                );
            },
        }

        self.trailer
            .dict
            .insert(b"/Size".to_vec(), Value::number(filespec_num as usize + 1));
        Ok(())
    }

    /// Install metadata into `/Info`. Entries holding the empty literal
    /// `()` are dropped first; recognized keys are overwritten with
    /// UTF-16BE hex strings.
    pub fn set_metadata(&mut self, metadata: &Metadata) -> Result<()> {
        let info = self.named_dict_mut(b"/Info")?;
        info.retain(|_, value| *value != Value::Literal(b"()".to_vec()));
        for (key, value) in metadata.iter() {
            info.insert(key.info_name().to_vec(), Value::utf16_hex(value));
        }
        Ok(())
    }

    /// Read metadata back out of `/Info`.
    pub fn metadata(&self) -> Result<Metadata> {
        let info = self.info_dict()?;
        let mut metadata = Metadata::new();
        for (name, value) in info {
            if let Some(key) = Key::from_info_name(name) {
                if let Some(text) = value.decoded_text() {
                    metadata.set(key, text);
                }
            }
        }
        Ok(metadata)
    }

    /// Stamp `/Creator` and extend `/Producer` inside its own string
    /// delimiters. The producer entry moves to the end of `/Info`.
    fn install_software_stamps(&mut self) -> Result<()> {
        let info = self.named_dict_mut(b"/Info")?;
        info.insert(b"/Creator".to_vec(), Value::literal("gemdoc"));
        if let Some(mut producer) = info.shift_remove(b"/Producer".as_slice()) {
            match &mut producer {
                Value::Literal(raw) => {
                    let closer = raw.pop();
                    raw.extend_from_slice(PRODUCER_NOTE.as_bytes());
                    if let Some(closer) = closer {
                        raw.push(closer);
                    }
                },
                Value::Hex(raw) => {
                    let closer = raw.pop();
                    for unit in PRODUCER_NOTE.encode_utf16() {
                        raw.extend_from_slice(format!("{:04x}", unit).as_bytes());
                    }
                    if let Some(closer) = closer {
                        raw.push(closer);
                    }
                },
                _ => {},
            }
            info.insert(b"/Producer".to_vec(), producer);
        }
        Ok(())
    }

    /// Set trailer `/ID` to `[<sha256(source)><sha256(engine pdf)>]`.
    fn install_file_identifier(&mut self) -> Result<()> {
        let source_hash = self.source_hash.clone().ok_or_else(|| {
            Error::InvalidPdf("cannot set a file identifier without an embedded source".to_string())
        })?;
        let id = Value::Array(vec![
            Value::Hex(format!("<{}>", source_hash).into_bytes()),
            Value::Hex(format!("<{}>", self.pdf_hash).into_bytes()),
        ]);
        self.trailer.dict.insert(b"/ID".to_vec(), id);
        Ok(())
    }

    /// Serialize the polyglot. Every emitted object's byte offset is
    /// recorded so the rebuilt xref table points at the first byte of each
    /// definition.
    pub fn serialize(&mut self) -> Result<Vec<u8>> {
        self.install_software_stamps()?;

        let mut out: Vec<u8> = Vec::new();
        let mut xref: BTreeMap<u32, usize> = BTreeMap::new();

        match self.source.clone() {
            Some(source) => {
                self.install_file_identifier()?;
                out.extend_from_slice(b"%PDF-1.7\n");
                out.extend_from_slice(GEMDOC_SIGNATURE.as_bytes());
                // Open and immediately close a preformat block, then leave
                // the source exposed between the closing toggle and the
                // reopening one below.
                out.extend_from_slice(b"\n```\n```\r");

                xref.insert(self.source_objnum, out.len());
                let payload = source.as_bytes();
                let mut params = Dict::new();
                params.insert(b"/Size".to_vec(), Value::number(payload.len() + 1));
                let mut dict = Dict::new();
                dict.insert(b"/Type".to_vec(), Value::name("EmbeddedFile"));
                dict.insert(b"/Subtype".to_vec(), Value::Name(b"/text#2fgemini".to_vec()));
                dict.insert(b"/Params".to_vec(), Value::Dict(params));
                dict.insert(b"/Length".to_vec(), Value::number(payload.len() + 1));

                out.extend_from_slice(format!("{} 0 obj\r", self.source_objnum).as_bytes());
                write_dict(&dict, &mut out);
                out.extend_from_slice(b"\rstream\n");
                out.extend_from_slice(payload);
                out.extend_from_slice(b"\n\nendstream\nendobj\n");

                out.extend_from_slice(
                    b"```% What follows is a pdf representation of this file\n",
                );
            },
            None => {
                out.extend_from_slice(b"%PDF-1.7\n");
                out.extend_from_slice(PLAIN_SIGNATURE.as_bytes());
                out.push(b'\n');
            },
        }

        for (objnum, object) in &self.objects {
            xref.insert(*objnum, out.len());
            out.extend_from_slice(&object.serialize(self.flate_streams));
        }

        let startxref = out.len();
        let size = xref.keys().next_back().copied().unwrap_or(0) + 1;
        out.extend_from_slice(format!("xref\r0 {}\r", size).as_bytes());
        out.extend_from_slice(b"0000000000 65535 f \r");
        let mut last_free = 0u32;
        for objnum in 1..size {
            match xref.get(&objnum) {
                Some(offset) => {
                    out.extend_from_slice(format!("{:010} 00000 n \r", offset).as_bytes());
                },
                None => {
                    out.extend_from_slice(format!("{:010} 00001 f \r", last_free).as_bytes());
                    last_free = objnum;
                },
            }
        }

        out.extend_from_slice(&self.trailer.serialize());
        out.extend_from_slice(format!("startxref\r{}\r%%EOF\n", startxref).as_bytes());
        Ok(out)
    }
}

/// Decide whether `doc` is a gemdoc polyglot. A PDF without the signature
/// on its second line fails with [`Error::MissingGemdocSignature`]; a
/// non-PDF is plain text/gemini.
pub fn is_polyglot(doc: &str) -> Result<bool> {
    let trimmed = doc.trim_start();
    if !trimmed.starts_with("%PDF-") {
        return Ok(false);
    }
    match trimmed.lines().nth(1) {
        Some(second) if second.starts_with(GEMDOC_SIGNATURE) => Ok(true),
        _ => Err(Error::MissingGemdocSignature),
    }
}

/// Recover the embedded gemini source and the `/Info` metadata from a
/// polyglot. The single newline the assembler appends to the stream is
/// stripped back off.
pub fn extract_source(doc: &str) -> Result<(String, Metadata)> {
    let metadata = PolyglotPdf::new(None, doc.as_bytes(), "", false)?.metadata()?;
    let start = doc
        .find("stream\n")
        .ok_or_else(|| Error::InvalidPdf("no embedded stream".to_string()))?
        + "stream\n".len();
    let end = doc[start..]
        .find("\nendstream\nendobj\n")
        .map(|offset| start + offset)
        .ok_or_else(|| Error::InvalidPdf("unterminated embedded stream".to_string()))?;
    let source = doc[start..end].strip_suffix('\n').unwrap_or(&doc[start..end]);
    Ok((source.to_string(), metadata))
}

/// Defang `endstream`/`endobj` occurrences in a source document by
/// inserting a zero-width space after the first character, so the embedded
/// stream cannot terminate early. Each rewrite logs a warning.
pub fn defang_pdf_keywords(source: &str) -> String {
    let mut out = source.to_string();
    for keyword in ["endstream", "endobj"] {
        if out.contains(keyword) {
            let replacement = format!("e\u{200b}{}", &keyword[1..]);
            out = out.replace(keyword, &replacement);
            log::warn!(
                "occurrences of the '{}' keyword have been escaped by inserting \
                 a zero width space after the first character",
                keyword
            );
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_constants() {
        assert!(GEMDOC_SIGNATURE.starts_with('%'));
        assert_ne!(GEMDOC_SIGNATURE, PLAIN_SIGNATURE);
    }

    #[test]
    fn test_is_polyglot_plain_gemini() {
        assert!(!is_polyglot("# Just a heading\n").unwrap());
    }

    #[test]
    fn test_is_polyglot_detects_signature() {
        let doc = format!("%PDF-1.7\n{}\n```\n", GEMDOC_SIGNATURE);
        assert!(is_polyglot(&doc).unwrap());
    }

    #[test]
    fn test_is_polyglot_tolerates_leading_whitespace() {
        let doc = format!("\n  %PDF-1.7\n{}\n", GEMDOC_SIGNATURE);
        assert!(is_polyglot(&doc).unwrap());
    }

    #[test]
    fn test_pdf_without_signature_is_rejected() {
        let err = is_polyglot("%PDF-1.7\n%ordinary\n").unwrap_err();
        assert!(matches!(err, Error::MissingGemdocSignature));
    }

    #[test]
    fn test_defang_keywords() {
        let out = defang_pdf_keywords("endstream here, endobj there");
        assert_eq!(out, "e\u{200b}ndstream here, e\u{200b}ndobj there");
        assert!(!out.contains("endstream"));
        assert!(!out.contains("endobj"));
    }

    #[test]
    fn test_defang_leaves_clean_text_alone() {
        assert_eq!(defang_pdf_keywords("# nothing to see\n"), "# nothing to see\n");
    }
}
