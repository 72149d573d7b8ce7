//! Link line resolution.
//!
//! `=> LINK LABEL` lines resolve against the document's base URL. The
//! scheme becomes a CSS class so stylesheets can decorate link kinds;
//! `_internal` marks links into the same site and `_nolabel` links whose
//! label had to be synthesized from the URL.

use url::Url;

use crate::metadata::{Key, Metadata};

/// A resolved link line ready for HTML emission.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedLink {
    /// Absolute (or best-effort) link target
    pub href: String,
    /// Space-separated CSS classes: scheme, `_internal`, `_nolabel`
    pub css_class: String,
    /// Original label, absent when the line had none
    pub label: Option<String>,
    /// Replacement source line when the link was rewritten to absolute form
    pub rewritten: Option<String>,
}

/// Resolve a link against the metadata URL.
///
/// Without a base URL, protocol-relative `//host/...` links get the
/// `gemini:` scheme. With a base URL, schemeless links are joined against
/// it. Either rewrite is reflected back into the exported source line.
/// Resolving an already-absolute link changes nothing.
pub fn resolve(link: &str, label: Option<&str>, metadata: &Metadata) -> ResolvedLink {
    let base = metadata.get(Key::Url);
    let mut href = link.to_string();
    let mut changed = false;

    if base.is_none() && href.starts_with("//") {
        href = format!("gemini:{}", href);
        changed = true;
    }

    let mut scheme = Url::parse(&href).ok().map(|u| u.scheme().to_string());
    if scheme.is_none() {
        if let Some(base) = base {
            if let Ok(joined) = Url::parse(base).and_then(|b| b.join(&href)) {
                scheme = Some(joined.scheme().to_string());
                href = joined.to_string();
                changed = true;
            }
        }
    }

    let mut css_class = scheme.unwrap_or_default();
    if hosts_match(&href, base) {
        if !css_class.is_empty() {
            css_class.push(' ');
        }
        css_class.push_str("_internal");
    }
    if label.is_none() {
        if !css_class.is_empty() {
            css_class.push(' ');
        }
        css_class.push_str("_nolabel");
    }

    let rewritten = changed.then(|| match label {
        Some(label) => format!("=> {} {}", href, label),
        None => format!("=> {}", href),
    });

    ResolvedLink {
        href,
        css_class,
        label: label.map(str::to_string),
        rewritten,
    }
}

/// Compare link and base authority. Unparsable (relative) URLs have no
/// authority, so two of them compare equal, matching host-string
/// comparison semantics.
fn hosts_match(link: &str, base: Option<&str>) -> bool {
    fn authority(s: &str) -> (Option<String>, Option<u16>) {
        match Url::parse(s) {
            Ok(url) => (url.host_str().map(str::to_string), url.port()),
            Err(_) => (None, None),
        }
    }
    authority(link) == base.map(authority).unwrap_or((None, None))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_url(url: &str) -> Metadata {
        let mut metadata = Metadata::new();
        metadata.set(Key::Url, url);
        metadata
    }

    #[test]
    fn test_protocol_relative_without_base() {
        let link = resolve("//example.org/", Some("Example"), &Metadata::new());
        assert_eq!(link.href, "gemini://example.org/");
        assert_eq!(link.rewritten.as_deref(), Some("=> gemini://example.org/ Example"));
        assert_eq!(link.css_class, "gemini");
    }

    #[test]
    fn test_path_absolute_with_base() {
        let metadata = with_url("gemini://host/a/b");
        let link = resolve("/x", Some("Label"), &metadata);
        assert_eq!(link.href, "gemini://host/x");
        assert_eq!(link.rewritten.as_deref(), Some("=> gemini://host/x Label"));
        assert_eq!(link.css_class, "gemini _internal");
    }

    #[test]
    fn test_relative_joins_against_base_path() {
        let metadata = with_url("gemini://host/a/b");
        let link = resolve("c.gmi", None, &metadata);
        assert_eq!(link.href, "gemini://host/a/c.gmi");
        assert_eq!(link.css_class, "gemini _internal _nolabel");
    }

    #[test]
    fn test_absolute_link_is_untouched() {
        let metadata = with_url("gemini://host/a/b");
        let link = resolve("https://other.example/", Some("x"), &metadata);
        assert_eq!(link.href, "https://other.example/");
        assert!(link.rewritten.is_none());
        assert_eq!(link.css_class, "https");
    }

    #[test]
    fn test_resolution_is_idempotent() {
        let metadata = with_url("gemini://host/a/b");
        let first = resolve("/x", Some("L"), &metadata);
        let second = resolve(&first.href, Some("L"), &metadata);
        assert_eq!(second.href, first.href);
        assert!(second.rewritten.is_none());
    }

    #[test]
    fn test_host_match_respects_port() {
        let metadata = with_url("gemini://host:1966/a");
        let link = resolve("gemini://host/b", Some("x"), &metadata);
        assert_eq!(link.css_class, "gemini");
    }

    #[test]
    fn test_relative_without_base_counts_as_internal() {
        let link = resolve("page.gmi", None, &Metadata::new());
        assert_eq!(link.href, "page.gmi");
        assert_eq!(link.css_class, "_internal _nolabel");
    }
}
