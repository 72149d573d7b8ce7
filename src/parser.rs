//! PDF object parser.
//!
//! Recursive descent over the rendering engine's byte output. Values come
//! back as raw tokens (see [`crate::object::Value`]); indirect references
//! are never dereferenced. `xref` sections are scanned only for their
//! trailer dictionary and then discarded, because the assembler rebuilds
//! the table from scratch.
//!
//! Generation numbers other than zero are rejected: incremental updates
//! with object revisions are out of scope.

use std::collections::BTreeMap;

use bytes::Bytes;
use nom::branch::alt;
use nom::bytes::complete::{tag, take_while, take_while1};
use nom::character::complete::digit1;
use nom::combinator::{recognize, value as nom_value};
use nom::sequence::tuple;
use nom::IResult;

use crate::error::{Error, Result};
use crate::object::{Dict, IndirectObject, Payload, Trailer, Value};

/// PDF whitespace per the spec: space, tab, CR, LF, NUL, form feed.
fn is_whitespace(c: u8) -> bool {
    matches!(c, b' ' | b'\t' | b'\r' | b'\n' | 0x00 | 0x0C)
}

/// PDF delimiter characters; they terminate names and bare tokens.
fn is_delimiter(c: u8) -> bool {
    matches!(c, b'(' | b')' | b'<' | b'>' | b'[' | b']' | b'{' | b'}' | b'/' | b'%')
}

fn skip_whitespace(input: &[u8]) -> &[u8] {
    let n = input.iter().take_while(|&&c| is_whitespace(c)).count();
    &input[n..]
}

/// Skip a `%` comment through its end-of-line byte.
fn skip_comment(input: &[u8]) -> &[u8] {
    match input.iter().position(|&c| c == b'\r' || c == b'\n') {
        Some(eol) => &input[eol + 1..],
        None => &input[input.len()..],
    }
}

/// Skip any run of whitespace and `%` comments.
fn skip_padding(mut input: &[u8]) -> &[u8] {
    loop {
        input = skip_whitespace(input);
        if input.starts_with(b"%") {
            input = skip_comment(input);
        } else {
            return input;
        }
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|window| window == needle)
}

fn parse_error(input: &[u8]) -> nom::Err<nom::error::Error<&[u8]>> {
    nom::Err::Error(nom::error::Error::new(input, nom::error::ErrorKind::Tag))
}

/// Parse a name token including its leading `/`. The name may be empty.
fn name_token(input: &[u8]) -> IResult<&[u8], Value> {
    let (rest, raw) = recognize(tuple((
        tag(b"/"),
        take_while(|c: u8| !is_whitespace(c) && !is_delimiter(c)),
    )))(input)?;
    Ok((rest, Value::Name(raw.to_vec())))
}

/// Parse a literal string with balanced parentheses, keeping the raw token.
fn literal_token(input: &[u8]) -> IResult<&[u8], Value> {
    if !input.starts_with(b"(") {
        return Err(parse_error(input));
    }
    let mut depth = 0usize;
    for (i, &byte) in input.iter().enumerate() {
        match byte {
            b'(' => depth += 1,
            b')' => {
                depth -= 1;
                if depth == 0 {
                    return Ok((&input[i + 1..], Value::Literal(input[..=i].to_vec())));
                }
            },
            _ => {},
        }
    }
    Err(parse_error(input))
}

/// Parse a hex string token `<…>` (but not a dictionary start).
fn hex_token(input: &[u8]) -> IResult<&[u8], Value> {
    if !input.starts_with(b"<") || input.starts_with(b"<<") {
        return Err(parse_error(input));
    }
    match input.iter().position(|&c| c == b'>') {
        Some(end) => Ok((&input[end + 1..], Value::Hex(input[..=end].to_vec()))),
        None => Err(parse_error(input)),
    }
}

/// Parse an indirect reference `N G R` as one opaque token.
fn ref_token(input: &[u8]) -> IResult<&[u8], Value> {
    let (rest, raw) = recognize(tuple((
        digit1,
        take_while1(is_whitespace),
        digit1,
        take_while1(is_whitespace),
        tag(b"R"),
    )))(input)?;
    Ok((rest, Value::Ref(raw.to_vec())))
}

/// Parse a numeric token (integer or real, optionally signed).
fn number_token(input: &[u8]) -> IResult<&[u8], Value> {
    match input.first() {
        Some(c) if c.is_ascii_digit() || *c == b'-' => {},
        _ => return Err(parse_error(input)),
    }
    let (rest, raw) =
        take_while1(|c: u8| c.is_ascii_digit() || c == b'.' || c == b'-')(input)?;
    Ok((rest, Value::Number(raw.to_vec())))
}

fn keyword_token(input: &[u8]) -> IResult<&[u8], Value> {
    alt((
        nom_value(Value::Null, tag(b"null")),
        nom_value(Value::True, tag(b"true")),
        nom_value(Value::False, tag(b"false")),
    ))(input)
}

/// Parse an array `[…]`, with comments allowed between elements.
fn array_token(input: &[u8]) -> IResult<&[u8], Value> {
    let (mut rest, _) = tag(b"[")(input)?;
    let mut items = Vec::new();
    loop {
        rest = skip_padding(rest);
        if let Ok((after, _)) = tag::<_, _, nom::error::Error<&[u8]>>(b"]")(rest) {
            return Ok((after, Value::Array(items)));
        }
        let (after, item) = value_token(rest)?;
        items.push(item);
        rest = after;
    }
}

/// Parse a dictionary `<<(name value)*>>`, with comments allowed between
/// entries.
fn dict_token(input: &[u8]) -> IResult<&[u8], Value> {
    let (mut rest, _) = tag(b"<<")(input)?;
    let mut dict = Dict::new();
    loop {
        rest = skip_padding(rest);
        if let Ok((after, _)) = tag::<_, _, nom::error::Error<&[u8]>>(b">>")(rest) {
            return Ok((after, Value::Dict(dict)));
        }
        let (after_key, key) = name_token(rest)?;
        let raw_key = match key {
            Value::Name(raw) => raw,
            _ => return Err(parse_error(rest)),
        };
        let (after_value, entry) = value_token(skip_padding(after_key))?;
        dict.insert(raw_key, entry);
        rest = after_value;
    }
}

/// Parse any PDF value. The caller must have skipped leading padding.
fn value_token(input: &[u8]) -> IResult<&[u8], Value> {
    match input.first().copied() {
        Some(b'/') => name_token(input),
        Some(b'(') => literal_token(input),
        Some(b'[') => array_token(input),
        Some(b'<') if input.starts_with(b"<<") => dict_token(input),
        Some(b'<') => hex_token(input),
        Some(c) if c.is_ascii_digit() => ref_token(input).or_else(|_| number_token(input)),
        Some(b'-') => number_token(input),
        _ => keyword_token(input),
    }
}

fn ascii_int(raw: &[u8]) -> Option<u32> {
    std::str::from_utf8(raw).ok()?.parse().ok()
}

/// Parse one indirect object starting at `input`. `offset_of` converts a
/// remaining-slice into an absolute byte offset for error reporting.
fn parse_indirect_object<'a>(
    input: &'a [u8],
    offset_of: impl Fn(&[u8]) -> usize,
) -> Result<(&'a [u8], IndirectObject)> {
    let unexpected = |at: &[u8]| Error::UnexpectedToken { offset: offset_of(at) };

    let header = recognize(tuple((
        digit1::<&[u8], nom::error::Error<&[u8]>>,
        take_while1(is_whitespace),
        digit1,
        take_while1(is_whitespace),
        tag(b"obj"),
    )))(input);
    let (mut rest, header) = header.map_err(|_| unexpected(input))?;

    let mut numbers = header
        .split(|&c| is_whitespace(c))
        .filter(|part| !part.is_empty());
    let id = numbers.next().and_then(ascii_int).ok_or_else(|| unexpected(input))?;
    let gen = numbers.next().and_then(ascii_int).ok_or_else(|| unexpected(input))?;
    if gen != 0 {
        return Err(Error::UnsupportedRevision { id, gen });
    }

    rest = skip_whitespace(rest);
    let dict = if rest.starts_with(b"<<") {
        let (after, parsed) = dict_token(rest).map_err(|_| unexpected(rest))?;
        rest = after;
        match parsed {
            Value::Dict(dict) => dict,
            _ => return Err(unexpected(rest)),
        }
    } else {
        Dict::new()
    };

    rest = skip_whitespace(rest);
    let payload = if rest.starts_with(b"stream\n") {
        let body = &rest[b"stream\n".len()..];
        let end = find(body, b"endstream").ok_or(Error::MissingEndstream)?;
        let data = Bytes::copy_from_slice(&body[..end]);
        rest = skip_whitespace(&body[end + b"endstream".len()..]);
        rest = rest.strip_prefix(b"endobj").ok_or(Error::MissingEndobj)?;
        Payload::Stream(data)
    } else {
        let end = find(rest, b"endobj").ok_or(Error::MissingEndobj)?;
        let contents = rest[..end].to_vec();
        rest = &rest[end + b"endobj".len()..];
        Payload::Contents(contents)
    };

    Ok((rest, IndirectObject { num: id, dict, payload }))
}

/// Scan an `xref` section: extract the trailer dictionary if present and
/// skip everything through `%%EOF`.
fn scan_xref_section<'a>(
    input: &'a [u8],
    trailer: &mut Trailer,
    offset_of: impl Fn(&[u8]) -> usize,
) -> Result<&'a [u8]> {
    let trailer_at = find(input, b"trailer");
    let startxref_at = find(input, b"startxref");
    if let (Some(t), Some(s)) = (trailer_at, startxref_at) {
        if t < s {
            let slice = skip_padding(&input[t + b"trailer".len()..]);
            let (_, parsed) = dict_token(slice)
                .map_err(|_| Error::UnexpectedToken { offset: offset_of(slice) })?;
            if let Value::Dict(dict) = parsed {
                trailer.dict = dict;
            }
        }
    }
    match find(input, b"%%EOF") {
        Some(eof) => Ok(&input[eof + b"%%EOF".len()..]),
        None => Ok(&input[input.len()..]),
    }
}

/// Find the next plausible object start (`digits ws digits ws o`).
/// Everything before it is discarded, which is what lets the parser walk
/// straight over header comments, binary markers and the gemini-facing
/// toggle lines of an existing polyglot.
fn next_object_start(input: &[u8]) -> Option<usize> {
    let mut i = 0;
    while i < input.len() {
        if !input[i].is_ascii_digit() {
            i += 1;
            continue;
        }
        let mut j = i;
        while j < input.len() && input[j].is_ascii_digit() {
            j += 1;
        }
        let mut k = j;
        while k < input.len() && is_whitespace(input[k]) {
            k += 1;
        }
        if k > j && k < input.len() && input[k].is_ascii_digit() {
            let mut l = k;
            while l < input.len() && input[l].is_ascii_digit() {
                l += 1;
            }
            let mut m = l;
            while m < input.len() && is_whitespace(input[m]) {
                m += 1;
            }
            if m > l && m < input.len() && input[m] == b'o' {
                return Some(i);
            }
        }
        i = j;
    }
    None
}

/// Parse a whole PDF into its object table and trailer.
///
/// An `xref` keyword starts a cross-reference section that is consumed
/// through `%%EOF`; otherwise anything up to the next object start is
/// discarded (comments, binary markers, polyglot toggle lines). When a
/// file carries several xref sections the last trailer wins, and a
/// re-defined object number replaces the earlier definition.
pub fn parse_document(input: &[u8]) -> Result<(BTreeMap<u32, IndirectObject>, Trailer)> {
    let offset_of = |remaining: &[u8]| input.len() - remaining.len();
    let mut objects = BTreeMap::new();
    let mut trailer = Trailer::default();

    let mut rest: &[u8] = input;
    loop {
        rest = skip_whitespace(rest);
        if rest.is_empty() {
            break;
        }
        if rest.starts_with(b"xref") {
            rest = scan_xref_section(rest, &mut trailer, offset_of)?;
            continue;
        }
        match next_object_start(rest) {
            None => break,
            Some(at) => {
                let (after, object) = parse_indirect_object(&rest[at..], offset_of)?;
                objects.insert(object.num, object);
                rest = after;
            },
        }
    }

    Ok((objects, trailer))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_value(input: &[u8]) -> Value {
        value_token(input).unwrap().1
    }

    #[test]
    fn test_name_token_keeps_slash() {
        assert_eq!(parse_value(b"/Type "), Value::Name(b"/Type".to_vec()));
    }

    #[test]
    fn test_name_with_hash_escape_kept_raw() {
        assert_eq!(
            parse_value(b"/text#2fgemini>>"),
            Value::Name(b"/text#2fgemini".to_vec())
        );
    }

    #[test]
    fn test_literal_with_nested_parens() {
        assert_eq!(
            parse_value(b"(a(b(c))d) tail"),
            Value::Literal(b"(a(b(c))d)".to_vec())
        );
    }

    #[test]
    fn test_hex_token() {
        assert_eq!(parse_value(b"<feff0041>"), Value::Hex(b"<feff0041>".to_vec()));
    }

    #[test]
    fn test_ref_beats_number() {
        assert_eq!(parse_value(b"12 0 R/Next"), Value::Ref(b"12 0 R".to_vec()));
        assert_eq!(parse_value(b"12 0.5"), Value::Number(b"12".to_vec()));
    }

    #[test]
    fn test_negative_real() {
        assert_eq!(parse_value(b"-1.5]"), Value::Number(b"-1.5".to_vec()));
    }

    #[test]
    fn test_dict_with_comment() {
        let parsed = parse_value(b"<</A 1 % note\n/B(x)>>");
        let Value::Dict(dict) = parsed else { panic!("expected dict") };
        assert_eq!(dict.get(b"/A".as_slice()), Some(&Value::Number(b"1".to_vec())));
        assert_eq!(dict.get(b"/B".as_slice()), Some(&Value::Literal(b"(x)".to_vec())));
    }

    #[test]
    fn test_array_nesting_and_keywords() {
        let parsed = parse_value(b"[1 2 0 R null [true]]");
        let Value::Array(items) = parsed else { panic!("expected array") };
        assert_eq!(items[0], Value::Number(b"1".to_vec()));
        assert_eq!(items[1], Value::Ref(b"2 0 R".to_vec()));
        assert_eq!(items[2], Value::Null);
        assert_eq!(items[3], Value::Array(vec![Value::True]));
    }

    #[test]
    fn test_parse_simple_object() {
        let (objects, _) = parse_document(b"1 0 obj\n<</Type /Catalog>>\nendobj\n").unwrap();
        let obj = &objects[&1];
        assert_eq!(obj.num, 1);
        assert_eq!(
            obj.dict.get(b"/Type".as_slice()),
            Some(&Value::Name(b"/Catalog".to_vec()))
        );
        assert_eq!(obj.payload, Payload::Contents(Vec::new()));
    }

    #[test]
    fn test_parse_stream_span_is_exact() {
        let input = b"4 0 obj\n<</Length 6>>\nstream\nAB\nCD\nendstream\nendobj\n";
        let (objects, _) = parse_document(input).unwrap();
        match &objects[&4].payload {
            Payload::Stream(data) => assert_eq!(&data[..], b"AB\nCD\n"),
            other => panic!("expected stream, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_document_with_trailer() {
        let input = b"%PDF-1.7\n1 0 obj\n<</Type/Catalog>>\nendobj\n\
                      xref\n0 2\n0000000000 65535 f \n0000000009 00000 n \n\
                      trailer\n<</Size 2/Root 1 0 R>>\nstartxref\n9\n%%EOF\n";
        let (objects, trailer) = parse_document(input).unwrap();
        assert_eq!(objects.len(), 1);
        assert_eq!(
            trailer.dict.get(b"/Root".as_slice()),
            Some(&Value::Ref(b"1 0 R".to_vec()))
        );
        assert_eq!(trailer.dict.get(b"/Size".as_slice()), Some(&Value::Number(b"2".to_vec())));
    }

    #[test]
    fn test_nonzero_generation_is_rejected() {
        let err = parse_document(b"3 1 obj\n<<>>\nendobj\n").unwrap_err();
        assert!(matches!(err, Error::UnsupportedRevision { id: 3, gen: 1 }));
    }

    #[test]
    fn test_missing_endstream() {
        let err = parse_document(b"4 0 obj\n<</Length 2>>\nstream\nAB").unwrap_err();
        assert!(matches!(err, Error::MissingEndstream));
    }

    #[test]
    fn test_missing_endobj() {
        let err = parse_document(b"5 0 obj\n<</A 1>>\n").unwrap_err();
        assert!(matches!(err, Error::MissingEndobj));
    }

    #[test]
    fn test_bad_dict_value_reports_offset() {
        let err = parse_document(b"1 0 obj\n<</Bad ?>>\nendobj\n").unwrap_err();
        assert!(matches!(err, Error::UnexpectedToken { offset: 8 }));
    }

    #[test]
    fn test_leading_garbage_is_discarded() {
        let input = b"%PDF-1.7\n```\n```\rnoise here\n7 0 obj\n<</A 1>>\nendobj\n";
        let (objects, _) = parse_document(input).unwrap();
        assert_eq!(objects.len(), 1);
        assert!(objects.contains_key(&7));
    }

    #[test]
    fn test_pure_garbage_yields_empty_table() {
        let (objects, trailer) = parse_document(b"  ?garbage without objects").unwrap();
        assert!(objects.is_empty());
        assert!(trailer.dict.is_empty());
    }

    #[test]
    fn test_later_definition_wins() {
        let input = b"2 0 obj\n<</V 1>>\nendobj\n2 0 obj\n<</V 2>>\nendobj\n";
        let (objects, _) = parse_document(input).unwrap();
        assert_eq!(objects[&2].dict.get(b"/V".as_slice()), Some(&Value::Number(b"2".to_vec())));
    }
}
