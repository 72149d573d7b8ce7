//! # gemdoc
//!
//! Convert text/gemini documents into *polyglot* files: byte sequences
//! that are simultaneously a valid PDF and a valid text/gemini source.
//! A PDF reader renders the typeset document; a gemini reader (or pager)
//! sees the original markup, with the binary remainder hidden inside a
//! preformatted block.
//!
//! ## Pipeline
//!
//! 1. [`metadata`] strips `%!GEMDOC` magic lines, merges and normalizes
//!    metadata, and derives author/date defaults from the URL.
//! 2. [`gemtext`] translates the gemini source to the HTML shape the
//!    stylesheets expect, rewriting link lines to absolute form.
//! 3. [`engine`] renders that HTML to PDF 1.7 (PDF/A-3B when available)
//!    via WeasyPrint.
//! 4. [`parser`] + [`polyglot`] take the engine output apart, attach
//!    the source as an embedded file, rewrite `/Info` and `/ID`, and
//!    serialize with a rebuilt xref under the dual-format header.
//!
//! [`polyglot::extract_source`] reverses the process: it recovers the
//! embedded source and metadata from an existing polyglot.
//!
//! ## Quick start
//!
//! ```no_run
//! use gemdoc::metadata::Metadata;
//! use gemdoc::{gemtext, polyglot::PolyglotPdf};
//!
//! # fn main() -> gemdoc::Result<()> {
//! let mut metadata = Metadata::new();
//! let translation = gemtext::translate("# Hello\n\nWorld\n", &mut metadata);
//! # let engine_pdf: Vec<u8> = Vec::new();
//! // engine_pdf: PDF bytes from the rendering engine
//! let mut doc = PolyglotPdf::new(Some(&translation.gemini), &engine_pdf, "source.gmi", false)?;
//! doc.set_metadata(&metadata)?;
//! let polyglot_bytes = doc.serialize()?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

// Error handling
pub mod error;

// PDF object model and parsing
pub mod object;
pub mod parser;

// Stream re-encoding
pub mod filters;

// Metadata and the gemini side
pub mod gemtext;
pub mod metadata;

// Polyglot assembly and reading
pub mod polyglot;

// External collaborators
pub mod client;
pub mod engine;

// Built-in CSS
pub mod stylesheet;

// Re-exports
pub use error::{Error, Result};
pub use metadata::Metadata;
pub use polyglot::PolyglotPdf;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name() {
        assert_eq!(NAME, "gemdoc");
    }

    #[test]
    fn test_version_is_set() {
        assert!(!VERSION.is_empty());
    }
}
