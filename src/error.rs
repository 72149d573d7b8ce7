//! Error types for the gemdoc library.
//!
//! One crate-wide error enum; every fallible operation returns [`Result`].
//! The binary prints the error as a single stderr line and exits 1.

/// Result type alias for gemdoc operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error types that can occur while fetching, parsing or assembling.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Gemini client got a URL with a scheme other than gemini://
    #[error("unsupported url scheme '{0}'")]
    UnsupportedUrlScheme(String),

    /// Redirect chain exceeded the permitted depth
    #[error("maximum number of redirects exceeded")]
    TooManyRedirects,

    /// Server status line was malformed or named a failure status
    #[error("server replied: '{0}'")]
    BadGeminiStatus(String),

    /// Response body cannot be decoded with the advertised parameters
    #[error("unsupported mime type '{0}'")]
    UnsupportedMimeType(String),

    /// A PDF file without the gemdoc signature on its second line
    #[error("received a pdf file but the gemdoc signature on the second line is missing")]
    MissingGemdocSignature,

    /// A `%!GEMDOC` magic line names a key outside the closed set
    #[error("unsupported metadata key '{0}'")]
    UnsupportedMetadataKey(String),

    /// PDF parse failure: unknown grammar at a decision point
    #[error("unexpected token at byte {offset}")]
    UnexpectedToken {
        /// Byte offset into the PDF where parsing failed
        offset: usize,
    },

    /// Stream object without a terminating `endstream` keyword
    #[error("missing endstream keyword")]
    MissingEndstream,

    /// Indirect object without a terminating `endobj` keyword
    #[error("missing endobj keyword")]
    MissingEndobj,

    /// Indirect object with a generation number other than zero
    #[error("object revisions are not supported: {id} {gen} obj")]
    UnsupportedRevision {
        /// Object number
        id: u32,
        /// Offending generation number
        gen: u32,
    },

    /// A metadata value still contains non-ASCII bytes after normalization.
    /// Normalization replaces every non-ASCII character, so hitting this is
    /// an internal invariant violation.
    #[error("metadata value is not ASCII after normalization: '{0}'")]
    AsciiEncodingFailure(String),

    /// Structurally invalid PDF (dangling /Root, missing keywords, ...)
    #[error("invalid pdf: {0}")]
    InvalidPdf(String),

    /// The HTML-to-PDF engine could not be run or reported failure
    #[error("rendering engine failure: {0}")]
    Engine(String),

    /// Command line usage error
    #[error("{0}")]
    Usage(String),

    /// URL parse error
    #[error("invalid url: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// TLS handshake or session error
    #[error("tls error: {0}")]
    Tls(#[from] rustls::Error),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unexpected_token_mentions_offset() {
        let err = Error::UnexpectedToken { offset: 1234 };
        assert!(format!("{}", err).contains("1234"));
    }

    #[test]
    fn test_unsupported_revision_message() {
        let err = Error::UnsupportedRevision { id: 7, gen: 1 };
        assert_eq!(format!("{}", err), "object revisions are not supported: 7 1 obj");
    }

    #[test]
    fn test_error_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Error>();
    }
}
