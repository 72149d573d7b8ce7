//! PDF object model.
//!
//! Values keep the raw byte tokens the parser saw (a literal string keeps
//! its parentheses, a hex string its angle brackets, numbers and indirect
//! references their exact bytes), so entries the assembler never touches
//! round-trip verbatim. Dictionaries preserve insertion order; some readers
//! rely on `/Type` coming first.

use bytes::Bytes;
use indexmap::IndexMap;

use crate::filters;

/// Ordered PDF dictionary keyed by raw name bytes (including the leading
/// `/`).
pub type Dict = IndexMap<Vec<u8>, Value>;

/// A single PDF value as a tagged raw token.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Name token, e.g. `/Type` (leading slash included)
    Name(Vec<u8>),
    /// Literal string token, e.g. `(Hello)` (parentheses included)
    Literal(Vec<u8>),
    /// Hex string token, e.g. `<feff0041>` (angle brackets included)
    Hex(Vec<u8>),
    /// Array of values
    Array(Vec<Value>),
    /// Nested dictionary
    Dict(Dict),
    /// Indirect reference token, e.g. `12 0 R`, kept opaque
    Ref(Vec<u8>),
    /// Numeric token, e.g. `42` or `-1.5`
    Number(Vec<u8>),
    /// The `null` literal
    Null,
    /// The `true` literal
    True,
    /// The `false` literal
    False,
}

impl Value {
    /// Build a name token from its bare text, e.g. `name("Filespec")`.
    pub fn name(s: &str) -> Value {
        let mut raw = Vec::with_capacity(s.len() + 1);
        raw.push(b'/');
        raw.extend_from_slice(s.as_bytes());
        Value::Name(raw)
    }

    /// Build a literal string token `(s)`. The caller must not pass
    /// unbalanced parentheses.
    pub fn literal(s: &str) -> Value {
        Value::Literal(format!("({})", s).into_bytes())
    }

    /// Build a decimal number token.
    pub fn number(n: usize) -> Value {
        Value::Number(n.to_string().into_bytes())
    }

    /// Build a generation-0 indirect reference token.
    pub fn reference(num: u32) -> Value {
        Value::Ref(format!("{} 0 R", num).into_bytes())
    }

    /// Encode a string as a UTF-16BE hex token with BOM, the form PDF
    /// expects for Unicode text strings: `<feff00480069>`.
    pub fn utf16_hex(s: &str) -> Value {
        let mut token = String::from("<feff");
        for unit in s.encode_utf16() {
            token.push_str(&format!("{:04x}", unit));
        }
        token.push('>');
        Value::Hex(token.into_bytes())
    }

    /// Object number of an indirect reference token, if this is one.
    pub fn ref_objnum(&self) -> Option<u32> {
        match self {
            Value::Ref(raw) => {
                let digits: Vec<u8> =
                    raw.iter().copied().take_while(|b| b.is_ascii_digit()).collect();
                std::str::from_utf8(&digits).ok()?.parse().ok()
            },
            _ => None,
        }
    }

    /// Decode a string token back to text. Literal strings are taken as
    /// ASCII; hex strings are decoded as UTF-16 (BOM-aware, big-endian by
    /// default per the PDF text string convention). Returns `None` for
    /// non-string values and undecodable tokens.
    pub fn decoded_text(&self) -> Option<String> {
        match self {
            Value::Literal(raw) => {
                let inner = raw.get(1..raw.len().checked_sub(1)?)?;
                Some(String::from_utf8_lossy(inner).into_owned())
            },
            Value::Hex(raw) => {
                let inner = raw.get(1..raw.len().checked_sub(1)?)?;
                let bytes = decode_hex_digits(inner)?;
                decode_utf16_text(&bytes)
            },
            _ => None,
        }
    }

    /// True when the serialized token starts with a character that could
    /// fuse with the preceding token (digits, `-`, or a bare keyword), so a
    /// separating space is required.
    fn needs_leading_space(&self) -> bool {
        matches!(
            self,
            Value::Number(_) | Value::Ref(_) | Value::Null | Value::True | Value::False
        )
    }

    /// Append the serialized form of this value to `out`.
    pub fn write(&self, out: &mut Vec<u8>) {
        match self {
            Value::Name(raw) | Value::Literal(raw) | Value::Hex(raw) | Value::Ref(raw)
            | Value::Number(raw) => out.extend_from_slice(raw),
            Value::Null => out.extend_from_slice(b"null"),
            Value::True => out.extend_from_slice(b"true"),
            Value::False => out.extend_from_slice(b"false"),
            Value::Array(items) => {
                out.push(b'[');
                for (i, item) in items.iter().enumerate() {
                    if i > 0 && item.needs_leading_space() {
                        out.push(b' ');
                    }
                    item.write(out);
                }
                out.push(b']');
            },
            Value::Dict(dict) => write_dict(dict, out),
        }
    }
}

/// Serialize a dictionary as `<<key1 value1 key2 value2…>>`. Values follow
/// their keys without separator except for tokens that would fuse with the
/// key (numbers, references, bare keywords), which get one space.
pub fn write_dict(dict: &Dict, out: &mut Vec<u8>) {
    out.extend_from_slice(b"<<");
    for (key, value) in dict {
        out.extend_from_slice(key);
        if value.needs_leading_space() {
            out.push(b' ');
        }
        value.write(out);
    }
    out.extend_from_slice(b">>");
}

fn decode_hex_digits(inner: &[u8]) -> Option<Vec<u8>> {
    let digits: Vec<u8> = inner
        .iter()
        .copied()
        .filter(|b| !b.is_ascii_whitespace())
        .collect();
    let mut bytes = Vec::with_capacity(digits.len() / 2);
    for pair in digits.chunks(2) {
        let hi = (pair[0] as char).to_digit(16)?;
        let lo = if pair.len() == 2 { (pair[1] as char).to_digit(16)? } else { 0 };
        bytes.push((hi * 16 + lo) as u8);
    }
    Some(bytes)
}

fn decode_utf16_text(bytes: &[u8]) -> Option<String> {
    let (payload, big_endian) = match bytes {
        [0xfe, 0xff, rest @ ..] => (rest, true),
        [0xff, 0xfe, rest @ ..] => (rest, false),
        rest => (rest, true),
    };
    let units: Vec<u16> = payload
        .chunks(2)
        .map(|pair| {
            let hi = pair[0] as u16;
            let lo = *pair.get(1).unwrap_or(&0) as u16;
            if big_endian { (hi << 8) | lo } else { (lo << 8) | hi }
        })
        .collect();
    String::from_utf16(&units).ok()
}

/// The body of an indirect object: either inline contents or a raw stream
/// span.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Inline contents between the dictionary (if any) and `endobj`
    Contents(Vec<u8>),
    /// Exact bytes between `stream\n` and the `endstream` keyword
    Stream(Bytes),
}

/// A generation-0 indirect object.
#[derive(Debug, Clone, PartialEq)]
pub struct IndirectObject {
    /// Object number
    pub num: u32,
    /// Object dictionary (empty for bare-contents objects)
    pub dict: Dict,
    /// Contents or stream payload
    pub payload: Payload,
}

impl IndirectObject {
    /// Serialize this object with `\r` line terminators so its bytes stay
    /// on PDF's side of the polyglot. Streams are re-encoded as ASCII85
    /// (Flate-compressed first when `flate` is set); `/Filter` gains the
    /// decode entries, `/Length` is updated to the encoded length and
    /// `/Length1` is dropped because it would refer to the pre-filter
    /// length.
    pub fn serialize(&self, flate: bool) -> Vec<u8> {
        let mut dict = self.dict.clone();
        let mut filter_chain: Vec<Value> = match dict.shift_remove(b"/Filter".as_slice()) {
            Some(Value::Array(items)) => items,
            Some(single) => vec![single],
            None => Vec::new(),
        };

        let body = match &self.payload {
            Payload::Stream(data) => {
                let mut stream = data.to_vec();
                if flate {
                    stream = filters::flate_compress(&stream);
                    filter_chain.insert(0, Value::name("FlateDecode"));
                }
                let mut encoded = filters::ascii85_encode(&stream);
                // Space-stuff a stream that could be mistaken for a gemini
                // preformatting toggle line
                if encoded.starts_with(b"```") {
                    encoded.insert(0, b' ');
                }
                filter_chain.insert(0, Value::name("ASCII85Decode"));
                if dict.contains_key(b"/Length".as_slice()) {
                    dict.insert(b"/Length".to_vec(), Value::number(encoded.len()));
                }
                dict.shift_remove(b"/Length1".as_slice());

                let mut body = Vec::with_capacity(encoded.len() + 24);
                body.extend_from_slice(b"\rstream\n");
                body.extend_from_slice(&encoded);
                body.extend_from_slice(b"\rendstream\r");
                body
            },
            Payload::Contents(contents) => contents
                .iter()
                .map(|&b| if b == b'\n' { b'\r' } else { b })
                .collect(),
        };

        if !filter_chain.is_empty() {
            let value = if filter_chain.len() == 1 {
                filter_chain.into_iter().next().unwrap_or(Value::Null)
            } else {
                Value::Array(filter_chain)
            };
            dict.insert(b"/Filter".to_vec(), value);
        }

        let mut out = format!("{} 0 obj\r", self.num).into_bytes();
        if !dict.is_empty() {
            write_dict(&dict, &mut out);
        }
        out.extend_from_slice(&body);
        if !out.ends_with(b"\r") {
            out.push(b'\r');
        }
        out.extend_from_slice(b"endobj\r");
        out
    }
}

/// The trailer dictionary referencing `/Root`, `/Info`, `/Size` and
/// optionally `/ID`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Trailer {
    /// Trailer dictionary
    pub dict: Dict,
}

impl Trailer {
    /// Serialize as `trailer\r<<…>>\r`.
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = b"trailer\r".to_vec();
        write_dict(&self.dict, &mut out);
        out.push(b'\r');
        out
    }
}
