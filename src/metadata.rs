//! Document metadata.
//!
//! A closed key set backs both the `%!GEMDOC` magic lines and the PDF
//! `/Info` dictionary. Values are normalized before they reach the PDF:
//! URLs are percent-encoded (idempotently), everything else is folded to
//! ASCII.

use indexmap::IndexMap;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use url::Url;

use crate::error::{Error, Result};

/// Magic line prefix recognized by the source normalizer.
const MAGIC_PREFIX: &str = "%!GEMDOC";

/// Characters that end a title without needing a `: ` before the subtitle.
const TERMINAL_PUNCTUATION: &[char] = &['.', ',', ';', ':', '?', '!'];

/// Safe set for URL percent-encoding. `%` is safe, which makes the
/// encoding idempotent.
const URL_ESCAPE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'~')
    .remove(b':')
    .remove(b'/')
    .remove(b'?')
    .remove(b'#')
    .remove(b'[')
    .remove(b']')
    .remove(b'@')
    .remove(b'!')
    .remove(b'$')
    .remove(b'&')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')')
    .remove(b'*')
    .remove(b'+')
    .remove(b',')
    .remove(b';')
    .remove(b'=')
    .remove(b'%')
    .remove(b'-')
    .remove(b'.')
    .remove(b'_');

/// The closed set of metadata keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Key {
    /// Document author, shown in the colophon
    Author,
    /// Publication date, shown in the colophon
    Date,
    /// Canonical URL of the document
    Url,
    /// PDF subject line
    Subject,
    /// PDF keyword list
    Keywords,
    /// Document title, synthesized from the first heading
    Title,
}

impl Key {
    /// Parse a key name. The legacy name `uri` maps to [`Key::Url`].
    pub fn parse(name: &str) -> Result<Key> {
        match name {
            "author" => Ok(Key::Author),
            "date" => Ok(Key::Date),
            "url" | "uri" => Ok(Key::Url),
            "subject" => Ok(Key::Subject),
            "keywords" => Ok(Key::Keywords),
            "title" => Ok(Key::Title),
            other => Err(Error::UnsupportedMetadataKey(other.to_string())),
        }
    }

    /// Canonical lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Key::Author => "author",
            Key::Date => "date",
            Key::Url => "url",
            Key::Subject => "subject",
            Key::Keywords => "keywords",
            Key::Title => "title",
        }
    }

    /// The `/Info` dictionary entry this key is stored under.
    pub fn info_name(&self) -> &'static [u8] {
        match self {
            Key::Author => b"/Author",
            Key::Date => b"/PublishingDate",
            Key::Url => b"/URL",
            Key::Subject => b"/Subject",
            Key::Keywords => b"/Keywords",
            Key::Title => b"/Title",
        }
    }

    /// Reverse lookup from an `/Info` entry name.
    pub fn from_info_name(name: &[u8]) -> Option<Key> {
        match name {
            b"/Author" => Some(Key::Author),
            b"/PublishingDate" => Some(Key::Date),
            b"/URL" => Some(Key::Url),
            b"/Subject" => Some(Key::Subject),
            b"/Keywords" => Some(Key::Keywords),
            b"/Title" => Some(Key::Title),
            _ => None,
        }
    }
}

/// The metadata mapping attached to a document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Metadata {
    entries: IndexMap<Key, String>,
}

impl Metadata {
    /// Empty mapping.
    pub fn new() -> Metadata {
        Metadata::default()
    }

    /// Value for `key`, if set.
    pub fn get(&self, key: Key) -> Option<&str> {
        self.entries.get(&key).map(String::as_str)
    }

    /// Set `key` to `value`, replacing any previous value.
    pub fn set(&mut self, key: Key, value: impl Into<String>) {
        self.entries.insert(key, value.into());
    }

    /// Whether `key` is set.
    pub fn contains(&self, key: Key) -> bool {
        self.entries.contains_key(&key)
    }

    /// Iterate entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (Key, &str)> {
        self.entries.iter().map(|(k, v)| (*k, v.as_str()))
    }

    /// Whether the mapping is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Fill in entries from a lower-precedence mapping without overwriting
    /// anything already present.
    pub fn merge_missing(&mut self, fallback: &Metadata) {
        for (key, value) in fallback.iter() {
            if !self.contains(key) {
                self.set(key, value);
            }
        }
    }

    /// Parse one `-M K=V` argument; `K:V` is accepted too, and a bare key
    /// gets an empty value.
    pub fn parse_entry(arg: &str) -> Result<(Key, String)> {
        let (name, value) = match arg.split_once('=') {
            Some(pair) => pair,
            None => arg.split_once(':').unwrap_or((arg, "")),
        };
        Ok((Key::parse(name.trim())?, value.trim().to_string()))
    }

    /// Normalize values in place: the URL is percent-encoded with the safe
    /// set, everything else has non-ASCII characters replaced by `_`. Each
    /// change logs a warning.
    pub fn normalize(&mut self) -> Result<()> {
        for (key, value) in self.entries.iter_mut() {
            if *key == Key::Url {
                let encoded = utf8_percent_encode(value, URL_ESCAPE).to_string();
                if encoded != *value {
                    log::warn!("percent-escaped url '{}' as '{}'", value, encoded);
                    *value = encoded;
                }
            } else if !value.is_ascii() {
                let folded: String = value
                    .chars()
                    .map(|c| if c.is_ascii() { c } else { '_' })
                    .collect();
                log::warn!(
                    "replaced non-ascii characters in metadata value for '{}'",
                    key.as_str()
                );
                *value = folded;
            }
            if !value.is_ascii() {
                return Err(Error::AsciiEncodingFailure(value.clone()));
            }
        }
        Ok(())
    }

    /// Derive missing `author` and `date` from the URL: a `/~user/` path
    /// prefix names the author, and a `YYYY-MM-DD`-like last path segment
    /// (with matching separators and a trailing non-digit) names the date.
    pub fn apply_url_defaults(&mut self) {
        let url = match self.get(Key::Url) {
            Some(url) if !url.is_empty() => url,
            _ => return,
        };
        if self.contains(Key::Author) && self.contains(Key::Date) {
            return;
        }
        let path = match Url::parse(url) {
            Ok(parsed) => parsed.path().to_string(),
            Err(_) => return,
        };
        if !self.contains(Key::Author) {
            if let Some(user) = path.strip_prefix("/~") {
                let user = user.split('/').next().unwrap_or("");
                self.set(Key::Author, user);
            }
        }
        if !self.contains(Key::Date) {
            let last = path.rsplit('/').next().unwrap_or("");
            if let Some(date) = date_from_segment(last) {
                self.set(Key::Date, date);
            }
        }
    }

    /// Record the title synthesized from the document's first heading.
    /// A subtitle joins with `: ` unless the title already ends in terminal
    /// punctuation (exactly `.,;:?!`), in which case a plain space is used.
    /// Non-ASCII characters become `_`.
    pub fn set_title_from_headings(&mut self, title: &str, subtitle: Option<&str>) {
        let combined = match subtitle {
            Some(sub) if !title.is_empty() => {
                if title.ends_with(TERMINAL_PUNCTUATION) {
                    format!("{} {}", title, sub)
                } else {
                    format!("{}: {}", title, sub)
                }
            },
            _ if title.is_empty() => return,
            _ => title.to_string(),
        };
        let folded: String = combined
            .chars()
            .map(|c| if c.is_ascii() { c } else { '_' })
            .collect();
        self.set(Key::Title, folded);
    }
}

/// Match a `YYYY<sep>MM<sep>DD` prefix where `<sep>` is one of `-/_` or
/// absent, both separators agree, and a non-digit follows the day.
fn date_from_segment(segment: &str) -> Option<String> {
    fn digits(segment: &str, range: std::ops::Range<usize>) -> Option<&str> {
        let slice = segment.as_bytes().get(range.clone())?;
        slice.iter().all(u8::is_ascii_digit).then(|| &segment[range])
    }

    let bytes = segment.as_bytes();
    let year = digits(segment, 0..4)?;
    let mut at = 4;
    let sep = match bytes.get(at) {
        Some(&c) if matches!(c, b'-' | b'/' | b'_') => {
            at += 1;
            Some(c)
        },
        _ => None,
    };
    let month = digits(segment, at..at + 2)?;
    at += 2;
    if let Some(sep) = sep {
        if bytes.get(at) != Some(&sep) {
            return None;
        }
        at += 1;
    }
    let day = digits(segment, at..at + 2)?;
    at += 2;
    match bytes.get(at) {
        Some(c) if !c.is_ascii_digit() => Some(format!("{}-{}-{}", year, month, day)),
        _ => None,
    }
}

/// Strip `%!GEMDOC KEY=VALUE` magic lines from a source document.
///
/// Returns the remaining body (joined with `\n`) and the collected
/// metadata. Magic lines naming a key outside the closed set fail with
/// [`Error::UnsupportedMetadataKey`].
pub fn strip_magic_lines(text: &str) -> Result<(String, Metadata)> {
    let mut body: Vec<&str> = Vec::new();
    let mut metadata = Metadata::new();
    for line in text.lines() {
        match line.strip_prefix(MAGIC_PREFIX) {
            Some(entry) => {
                let (name, value) = entry.split_once('=').unwrap_or((entry, ""));
                let key = Key::parse(name.trim().to_lowercase().as_str())?;
                metadata.set(key, value.trim());
            },
            None => body.push(line),
        }
    }
    Ok((body.join("\n"), metadata))
}

/// Derive the embedded source filename from the document URL: the last
/// path component, percent-decoded, with `.gmi` appended when it has no
/// extension. Falls back to `source.gmi`.
pub fn filename_from_url(url: &str) -> String {
    let path = match Url::parse(url) {
        Ok(parsed) => parsed.path().to_string(),
        Err(_) => return "source.gmi".to_string(),
    };
    let last = path.rsplit('/').next().unwrap_or("");
    if last.is_empty() {
        return "source.gmi".to_string();
    }
    let mut name = if last.contains('%') {
        percent_encoding::percent_decode_str(last)
            .decode_utf8()
            .map(|decoded| decoded.into_owned())
            .unwrap_or_else(|_| last.to_string())
    } else {
        last.to_string()
    };
    if !has_extension(&name) {
        name.push_str(".gmi");
    }
    name
}

/// A filename "has an extension" when it contains a dot with a non-dot on
/// both sides.
pub(crate) fn has_extension(name: &str) -> bool {
    let bytes = name.as_bytes();
    bytes
        .windows(3)
        .any(|w| w[0] != b'.' && w[1] == b'.' && w[2] != b'.')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_parse_uri_alias() {
        assert_eq!(Key::parse("uri").unwrap(), Key::Url);
        assert!(matches!(
            Key::parse("publisher"),
            Err(Error::UnsupportedMetadataKey(_))
        ));
    }

    #[test]
    fn test_parse_entry_forms() {
        assert_eq!(
            Metadata::parse_entry("author=Alice").unwrap(),
            (Key::Author, "Alice".to_string())
        );
        assert_eq!(
            Metadata::parse_entry("author: Bob ").unwrap(),
            (Key::Author, "Bob".to_string())
        );
        assert_eq!(Metadata::parse_entry("date").unwrap(), (Key::Date, String::new()));
    }

    #[test]
    fn test_strip_magic_lines() {
        let input = "%!GEMDOC author=Alice\n# Title\n%!GEMDOC uri=gemini://x.org/\nbody\n";
        let (body, metadata) = strip_magic_lines(input).unwrap();
        assert_eq!(body, "# Title\nbody");
        assert_eq!(metadata.get(Key::Author), Some("Alice"));
        assert_eq!(metadata.get(Key::Url), Some("gemini://x.org/"));
    }

    #[test]
    fn test_strip_magic_lines_unknown_key() {
        let err = strip_magic_lines("%!GEMDOC publisher=X\n").unwrap_err();
        assert!(matches!(err, Error::UnsupportedMetadataKey(k) if k == "publisher"));
    }

    #[test]
    fn test_merge_missing_keeps_precedence() {
        let mut primary = Metadata::new();
        primary.set(Key::Author, "cli");
        let mut fallback = Metadata::new();
        fallback.set(Key::Author, "magic");
        fallback.set(Key::Date, "2023-01-01");
        primary.merge_missing(&fallback);
        assert_eq!(primary.get(Key::Author), Some("cli"));
        assert_eq!(primary.get(Key::Date), Some("2023-01-01"));
    }

    #[test]
    fn test_normalize_url_is_idempotent() {
        let mut metadata = Metadata::new();
        metadata.set(Key::Url, "gemini://example.org/a b/ünïcode");
        metadata.normalize().unwrap();
        let once = metadata.get(Key::Url).unwrap().to_string();
        metadata.normalize().unwrap();
        assert_eq!(metadata.get(Key::Url), Some(once.as_str()));
        assert!(once.contains("%20"));
    }

    #[test]
    fn test_normalize_folds_non_ascii() {
        let mut metadata = Metadata::new();
        metadata.set(Key::Author, "Jörg");
        metadata.normalize().unwrap();
        assert_eq!(metadata.get(Key::Author), Some("J_rg"));
    }

    #[test]
    fn test_url_defaults_author_and_date() {
        let mut metadata = Metadata::new();
        metadata.set(Key::Url, "gemini://example.org/~alice/2023-04-05-notes.gmi");
        metadata.apply_url_defaults();
        assert_eq!(metadata.get(Key::Author), Some("alice"));
        assert_eq!(metadata.get(Key::Date), Some("2023-04-05"));
    }

    #[test]
    fn test_url_defaults_do_not_overwrite() {
        let mut metadata = Metadata::new();
        metadata.set(Key::Url, "gemini://example.org/~alice/2023-04-05-notes.gmi");
        metadata.set(Key::Author, "bob");
        metadata.apply_url_defaults();
        assert_eq!(metadata.get(Key::Author), Some("bob"));
    }

    #[test]
    fn test_date_segment_separators_must_match() {
        assert_eq!(date_from_segment("20230405.gmi"), Some("2023-04-05".to_string()));
        assert_eq!(date_from_segment("2023_04_05-x"), Some("2023-04-05".to_string()));
        assert_eq!(date_from_segment("2023-04_05-x"), None);
        assert_eq!(date_from_segment("2023-04-051"), None);
        assert_eq!(date_from_segment("2023-04-05"), None); // nothing follows
    }

    #[test]
    fn test_title_synthesis() {
        let mut metadata = Metadata::new();
        metadata.set_title_from_headings("A", Some("B"));
        assert_eq!(metadata.get(Key::Title), Some("A: B"));
        metadata.set_title_from_headings("A.", Some("B"));
        assert_eq!(metadata.get(Key::Title), Some("A. B"));
        metadata.set_title_from_headings("a.b.c", Some("sub"));
        assert_eq!(metadata.get(Key::Title), Some("a.b.c: sub"));
        metadata.set_title_from_headings("Solo", None);
        assert_eq!(metadata.get(Key::Title), Some("Solo"));
    }

    #[test]
    fn test_filename_from_url() {
        assert_eq!(filename_from_url("gemini://x.org/docs/page.gmi"), "page.gmi");
        assert_eq!(filename_from_url("gemini://x.org/docs/page"), "page.gmi");
        assert_eq!(filename_from_url("gemini://x.org/"), "source.gmi");
        assert_eq!(filename_from_url("gemini://x.org/a%20b.gmi"), "a b.gmi");
    }
}
