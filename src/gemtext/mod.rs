//! text/gemini to HTML translation.
//!
//! A line-driven state machine with a single `preformatted` toggle. The
//! emitted HTML carries the class and tag conventions the stylesheet
//! machinery relies on: heading contexts wrap headings plus their trailing
//! blank lines so page breaks avoid splitting them, links become anchored
//! paragraphs with label/url spans, and the colophon lands in `<head>` for
//! the running-footer rules.
//!
//! Translation also produces the canonical gemini export: link lines are
//! rewritten to absolute form and closing preformat toggles are normalized
//! to bare ` ``` `.

pub mod links;

use crate::metadata::{Key, Metadata};

/// Result of translating a gemini document.
#[derive(Debug, Clone, PartialEq)]
pub struct Translation {
    /// Canonical gemini source (rewritten links, normalized toggles)
    pub gemini: String,
    /// HTML document fed to the rendering engine
    pub html: String,
}

/// Escape text for HTML element content and attribute values.
fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            other => out.push(other),
        }
    }
    out
}

fn push_tag(body: &mut Vec<String>, tag: &str, css_class: Option<&str>, text: &str) {
    match css_class {
        Some(class) => body.push(format!("<{0} class=\"{1}\">{2}</{0}>", tag, class, escape(text))),
        None => body.push(format!("<{0}>{1}</{0}>", tag, escape(text))),
    }
}

/// Emit a `<br />` for every blank line following index `i`. Returns the
/// index of the last blank line (or `i` unchanged).
fn emit_blank_run(lines: &[String], mut i: usize, body: &mut Vec<String>) -> usize {
    while i + 1 < lines.len() && lines[i + 1].trim().is_empty() {
        body.push("<br />".to_string());
        i += 1;
    }
    i
}

/// Translate a gemini document to HTML.
///
/// The first `#` heading becomes the document title (with an optional `##`
/// subtitle consumed from the following line) and is recorded in the
/// metadata. The colophon is built from author, date and URL after the
/// URL-derived defaults have been applied.
pub fn translate(source: &str, metadata: &mut Metadata) -> Translation {
    let mut lines: Vec<String> = source.lines().map(str::to_string).collect();
    let mut body: Vec<String> = Vec::new();
    let mut preformatted = false;
    let mut got_title = false;

    let mut i = 0;
    while i < lines.len() {
        let line = lines[i].clone();
        if preformatted && line.starts_with("```") {
            body.push("</pre>".to_string());
            preformatted = false;
            lines[i] = "```".to_string();
        } else if preformatted {
            body.push(escape(&line));
        } else if line.starts_with("```") {
            if lines.get(i + 1).is_some_and(|next| next.starts_with("```")) {
                // An immediately re-closed block renders as nothing.
                i += 1;
            } else {
                body.push("<pre>".to_string());
                preformatted = true;
            }
        } else if let Some(text) = line.strip_prefix("###") {
            body.push("<div class=\"headingcontext\">".to_string());
            push_tag(&mut body, "h3", None, text.trim());
            i = emit_blank_run(&lines, i, &mut body);
            body.push("</div>".to_string());
        } else if let Some(text) = line.strip_prefix("##") {
            body.push("<div class=\"headingcontext\">".to_string());
            push_tag(&mut body, "h2", None, text.trim());
            i = emit_blank_run(&lines, i, &mut body);
            body.push("</div>".to_string());
        } else if let Some(text) = line.strip_prefix('#') {
            body.push("<div class=\"headingcontext\">".to_string());
            if !got_title {
                got_title = true;
                let title = text.trim().to_string();
                push_tag(&mut body, "h1", Some("title"), &title);
                i = emit_blank_run(&lines, i, &mut body);
                let subtitle = match lines.get(i + 1) {
                    Some(next) if next.starts_with("##") && !next.starts_with("###") => {
                        i += 1;
                        let subtitle = lines[i][2..].trim().to_string();
                        push_tag(&mut body, "h2", Some("subtitle"), &subtitle);
                        Some(subtitle)
                    },
                    _ => None,
                };
                metadata.set_title_from_headings(&title, subtitle.as_deref());
                i = emit_blank_run(&lines, i, &mut body);
            } else {
                push_tag(&mut body, "h1", None, text.trim());
                i = emit_blank_run(&lines, i, &mut body);
            }
            body.push("</div>".to_string());
        } else if let Some(text) = line.strip_prefix('>') {
            push_tag(&mut body, "blockquote", None, text);
        } else if line.starts_with("* ") {
            body.push("<ul>".to_string());
            while i < lines.len() && lines[i].starts_with("* ") {
                push_tag(&mut body, "li", None, &lines[i][2..]);
                i += 1;
            }
            i -= 1;
            body.push("</ul>".to_string());
        } else if line.starts_with("=>") {
            let rest = line[2..].trim_start();
            let (link, label) = match rest.split_once(char::is_whitespace) {
                Some((link, tail)) => {
                    let tail = tail.trim_start();
                    (link, (!tail.is_empty()).then_some(tail))
                },
                None => (rest, None),
            };
            let resolved = links::resolve(link, label, metadata);
            if let Some(new_line) = &resolved.rewritten {
                lines[i] = new_line.clone();
            }
            let label_text = resolved.label.as_deref().unwrap_or(&resolved.href);
            body.push(format!(
                "<a href=\"{0}\" class=\"{1}\"><p><span class=\"label\">{2}</span> \
                 <br /><span class=\"url\">{3}</span></p></a>",
                resolved.href,
                resolved.css_class,
                escape(label_text),
                escape(&resolved.href),
            ));
        } else if line.trim().is_empty() {
            body.push("<br />".to_string());
        } else {
            push_tag(&mut body, "p", None, &line);
        }
        i += 1;
    }

    metadata.apply_url_defaults();

    let mut colophon = String::new();
    if let Some(author) = metadata.get(Key::Author).filter(|s| !s.is_empty()) {
        colophon.push_str(&format!("<author>{}</author>", escape(author)));
    }
    if let Some(date) = metadata.get(Key::Date).filter(|s| !s.is_empty()) {
        if !colophon.is_empty() {
            colophon.push_str("<datesep>, </datesep>");
        }
        colophon.push_str(&format!("<date>{}</date>", escape(date)));
    }
    if let Some(url) = metadata.get(Key::Url).filter(|s| !s.is_empty()) {
        if !colophon.is_empty() {
            colophon.push_str("<urlsep><br /></urlsep>");
        }
        colophon.push_str(&format!("<url><a href={}>{}</a></url>", url, escape(url)));
    }

    let html = format!(
        "<html><head>\n<colophon>{}</colophon>\n</head><body>\n{}\n</body></html>",
        colophon,
        body.join("\n")
    );

    Translation {
        gemini: lines.join("\n"),
        html,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn translate_plain(source: &str) -> Translation {
        let mut metadata = Metadata::new();
        translate(source, &mut metadata)
    }

    #[test]
    fn test_paragraph_and_blank() {
        let t = translate_plain("Hello & <World>\n\nBye");
        assert!(t.html.contains("<p>Hello &amp; &lt;World&gt;</p>"));
        assert!(t.html.contains("<br />"));
        assert!(t.html.contains("<p>Bye</p>"));
    }

    #[test]
    fn test_title_and_subtitle() {
        let mut metadata = Metadata::new();
        let t = translate("# Title\n## Sub\nbody\n", &mut metadata);
        assert!(t.html.contains("<h1 class=\"title\">Title</h1>"));
        assert!(t.html.contains("<h2 class=\"subtitle\">Sub</h2>"));
        assert_eq!(metadata.get(Key::Title), Some("Title: Sub"));
    }

    #[test]
    fn test_subtitle_found_across_blank_lines() {
        let mut metadata = Metadata::new();
        let t = translate("# Title\n\n\n## Sub\n", &mut metadata);
        assert!(t.html.contains("<h2 class=\"subtitle\">Sub</h2>"));
        assert_eq!(metadata.get(Key::Title), Some("Title: Sub"));
    }

    #[test]
    fn test_terminal_punctuation_joins_without_colon() {
        let mut metadata = Metadata::new();
        translate("# A.\n## B\n", &mut metadata);
        assert_eq!(metadata.get(Key::Title), Some("A. B"));
    }

    #[test]
    fn test_triple_hash_is_not_a_subtitle() {
        let mut metadata = Metadata::new();
        let t = translate("# Title\n### Deep\n", &mut metadata);
        assert_eq!(metadata.get(Key::Title), Some("Title"));
        assert!(t.html.contains("<h3>Deep</h3>"));
    }

    #[test]
    fn test_later_heading_is_plain_h1() {
        let t = translate_plain("# First\n# Second\n");
        assert!(t.html.contains("<h1 class=\"title\">First</h1>"));
        assert!(t.html.contains("<h1>Second</h1>"));
    }

    #[test]
    fn test_heading_context_wraps_blank_run() {
        let t = translate_plain("## Head\n\n\ntext\n");
        let expected = "<div class=\"headingcontext\">\n<h2>Head</h2>\n<br />\n<br />\n</div>";
        assert!(t.html.contains(expected), "{}", t.html);
    }

    #[test]
    fn test_list_run_coalesces() {
        let t = translate_plain("* one\n* two\npara\n");
        assert!(t.html.contains("<ul>\n<li>one</li>\n<li>two</li>\n</ul>"));
    }

    #[test]
    fn test_blockquote_keeps_raw_tail() {
        let t = translate_plain("> quoted text\n");
        assert!(t.html.contains("<blockquote> quoted text</blockquote>"));
    }

    #[test]
    fn test_preformatted_block() {
        let t = translate_plain("```\n# not a heading\n```\n");
        assert!(t.html.contains("<pre>\n# not a heading\n</pre>"));
    }

    #[test]
    fn test_preformatted_close_is_normalized() {
        let t = translate_plain("```alt text\ncode\n```end\n");
        assert_eq!(t.gemini, "```alt text\ncode\n```");
    }

    #[test]
    fn test_double_toggle_collapses() {
        let t = translate_plain("```\n```\ntext\n");
        assert!(!t.html.contains("<pre>"));
        assert!(t.html.contains("<p>text</p>"));
        assert_eq!(t.gemini, "```\n```\ntext");
    }

    #[test]
    fn test_link_rewrite_lands_in_export() {
        let mut metadata = Metadata::new();
        let t = translate("=> //example.org/ Example\n", &mut metadata);
        assert_eq!(t.gemini, "=> gemini://example.org/ Example");
        assert!(t.html.contains("<a href=\"gemini://example.org/\" class=\"gemini\">"));
        assert!(t.html.contains("<span class=\"label\">Example</span>"));
    }

    #[test]
    fn test_unlabeled_link_uses_url_as_label() {
        let t = translate_plain("=> gemini://example.org/x\n");
        assert!(t.html.contains("class=\"gemini _nolabel\""));
        assert!(t.html.contains("<span class=\"label\">gemini://example.org/x</span>"));
    }

    #[test]
    fn test_colophon_order_and_separators() {
        let mut metadata = Metadata::new();
        metadata.set(Key::Author, "Alice");
        metadata.set(Key::Date, "2023-04-05");
        metadata.set(Key::Url, "gemini://example.org/");
        let t = translate("x\n", &mut metadata);
        assert!(t.html.contains(
            "<colophon><author>Alice</author><datesep>, </datesep><date>2023-04-05</date>\
             <urlsep><br /></urlsep><url><a href=gemini://example.org/>gemini://example.org/</a>\
             </url></colophon>"
        ));
    }

    #[test]
    fn test_colophon_defaults_derived_from_url() {
        let mut metadata = Metadata::new();
        metadata.set(Key::Url, "gemini://example.org/~alice/2023-04-05-x.gmi");
        let t = translate("x\n", &mut metadata);
        assert!(t.html.contains("<author>alice</author>"));
        assert!(t.html.contains("<date>2023-04-05</date>"));
    }

    #[test]
    fn test_html_shell() {
        let t = translate_plain("x\n");
        assert!(t.html.starts_with("<html><head>\n<colophon>"));
        assert!(t.html.ends_with("\n</body></html>"));
    }

    #[test]
    fn test_gemini_export_drops_trailing_newline() {
        let t = translate_plain("# Hello\n\nWorld\n");
        assert_eq!(t.gemini, "# Hello\n\nWorld");
    }
}
