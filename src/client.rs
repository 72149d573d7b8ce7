//! Gemini protocol client.
//!
//! One request line, one status line, body, connection close. TLS runs
//! with certificate and hostname verification disabled: trust-on-first-use
//! is the caller's concern, and self-signed certificates are the norm in
//! geminispace.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, ClientConnection, DigitallySignedStruct, SignatureScheme, StreamOwned};
use url::Url;

use crate::error::{Error, Result};

const DEFAULT_PORT: u16 = 1965;
const MAX_REDIRECTS: u32 = 5;

/// The status line must arrive within this many bytes: 2 status digits,
/// one space, up to 1024 bytes of meta, CRLF.
const STATUS_LINE_LIMIT: usize = 1029;

/// A fetched Gemini resource.
#[derive(Debug, Clone)]
pub struct Response {
    /// Final URL after redirects
    pub url: String,
    /// Lowercased MIME type from the status line
    pub mime_type: String,
    /// Charset parameter, defaulting to utf-8
    pub charset: String,
    /// Raw body bytes
    pub body: Vec<u8>,
}

impl Response {
    /// Whether the MIME type is textual.
    pub fn is_text(&self) -> bool {
        self.mime_type.starts_with("text/")
    }

    /// Decode the body as text. Only UTF-8 (and its ASCII subset) is
    /// supported.
    pub fn text(&self) -> Result<String> {
        match self.charset.as_str() {
            "" | "utf-8" | "utf8" | "us-ascii" | "ascii" => String::from_utf8(self.body.clone())
                .map_err(|_| {
                    Error::UnsupportedMimeType(format!("{}; charset={}", self.mime_type, self.charset))
                }),
            other => Err(Error::UnsupportedMimeType(format!(
                "{}; charset={}",
                self.mime_type, other
            ))),
        }
    }
}

/// Fetch a gemini:// URL, following up to five redirects.
pub fn fetch(url: &str) -> Result<Response> {
    fetch_with_limit(url, MAX_REDIRECTS)
}

fn fetch_with_limit(url: &str, redirects_left: u32) -> Result<Response> {
    if redirects_left == 0 {
        return Err(Error::TooManyRedirects);
    }

    // Raw newlines in the request line would smuggle a second request.
    let sanitized = url.replace("\r\n", "%0A").replace('\n', "%0A");
    let mut parsed = Url::parse(&sanitized)?;
    if parsed.scheme() != "gemini" {
        return Err(Error::UnsupportedUrlScheme(parsed.scheme().to_string()));
    }
    if parsed.path().is_empty() {
        parsed.set_path("/");
    }
    parsed.set_fragment(None);
    let host = parsed
        .host_str()
        .ok_or_else(|| Error::BadGeminiStatus("url has no host".to_string()))?
        .to_string();
    let port = parsed.port().unwrap_or(DEFAULT_PORT);
    let request_url = parsed.to_string();

    let mut stream = connect(&host, port)?;
    stream.write_all(format!("{}\r\n", request_url).as_bytes())?;

    let mut response = Vec::with_capacity(STATUS_LINE_LIMIT);
    let mut chunk = [0u8; STATUS_LINE_LIMIT];
    while response.len() < STATUS_LINE_LIMIT && find_crlf(&response).is_none() {
        let want = STATUS_LINE_LIMIT - response.len();
        let read = match stream.read(&mut chunk[..want]) {
            Ok(read) => read,
            Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => 0,
            Err(err) => return Err(err.into()),
        };
        if read == 0 {
            break;
        }
        response.extend_from_slice(&chunk[..read]);
    }

    let split = find_crlf(&response)
        .ok_or_else(|| Error::BadGeminiStatus("server response too long".to_string()))?;
    let header = String::from_utf8_lossy(&response[..split]).to_string();
    let mut body = response[split + 2..].to_vec();

    if header.len() < 2 || !header[..2].chars().all(|c| c.is_ascii_digit()) {
        return Err(Error::BadGeminiStatus(format!("invalid response '{}'", header)));
    }

    if header.starts_with('3') {
        let dest = header.get(3..).unwrap_or("");
        let target = resolve_redirect(&parsed, dest)?;
        log::warn!("following redirect to '{}'", target);
        return fetch_with_limit(&target, redirects_left - 1);
    }

    if header.starts_with('2') {
        let (mime_type, charset) = parse_meta(header.get(3..).unwrap_or(""));
        loop {
            let read = match stream.read(&mut chunk) {
                Ok(read) => read,
                Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => 0,
                Err(err) => return Err(err.into()),
            };
            if read == 0 {
                break;
            }
            body.extend_from_slice(&chunk[..read]);
        }
        return Ok(Response {
            url: request_url,
            mime_type,
            charset,
            body,
        });
    }

    Err(Error::BadGeminiStatus(header))
}

fn find_crlf(buffer: &[u8]) -> Option<usize> {
    buffer.windows(2).position(|window| window == b"\r\n")
}

/// Resolve a redirect target: absolute URIs pass through, `//host` forms
/// get the gemini scheme, everything else (path-absolute or relative)
/// joins against the current URL.
fn resolve_redirect(current: &Url, dest: &str) -> Result<String> {
    if Url::parse(dest).is_ok() {
        return Ok(dest.to_string());
    }
    if dest.starts_with("//") {
        return Ok(format!("gemini:{}", dest));
    }
    Ok(current.join(dest)?.to_string())
}

/// Split a 2X meta field into lowercased MIME type and charset.
fn parse_meta(meta: &str) -> (String, String) {
    let mut parts = meta.split(';');
    let mime_type = parts.next().unwrap_or("").trim().to_lowercase();
    let mut charset = "utf-8".to_string();
    for param in parts {
        if let Some((key, value)) = param.split_once('=') {
            if key.trim().to_lowercase() == "charset" {
                charset = value.trim().to_lowercase();
            }
        }
    }
    (mime_type, charset)
}

fn connect(host: &str, port: u16) -> Result<StreamOwned<ClientConnection, TcpStream>> {
    let config = ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(AcceptAnyCertificate))
        .with_no_client_auth();
    let server_name = ServerName::try_from(host.to_string())
        .map_err(|_| Error::BadGeminiStatus(format!("invalid server name '{}'", host)))?;
    let connection = ClientConnection::new(Arc::new(config), server_name)?;
    let socket = TcpStream::connect((host, port))?;
    Ok(StreamOwned::new(connection, socket))
}

/// Certificate verifier that accepts everything; see the module docs.
#[derive(Debug)]
struct AcceptAnyCertificate;

impl ServerCertVerifier for AcceptAnyCertificate {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        rustls::crypto::ring::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_meta_defaults() {
        assert_eq!(parse_meta("text/gemini"), ("text/gemini".to_string(), "utf-8".to_string()));
    }

    #[test]
    fn test_parse_meta_charset() {
        assert_eq!(
            parse_meta(" Text/Gemini ; charset=UTF-8 "),
            ("text/gemini".to_string(), "utf-8".to_string())
        );
    }

    #[test]
    fn test_resolve_redirect_forms() {
        let current = Url::parse("gemini://example.org/a/b").unwrap();
        assert_eq!(
            resolve_redirect(&current, "gemini://other.example/x").unwrap(),
            "gemini://other.example/x"
        );
        assert_eq!(
            resolve_redirect(&current, "//other.example/x").unwrap(),
            "gemini://other.example/x"
        );
        assert_eq!(
            resolve_redirect(&current, "/x").unwrap(),
            "gemini://example.org/x"
        );
        assert_eq!(
            resolve_redirect(&current, "c").unwrap(),
            "gemini://example.org/a/c"
        );
    }

    #[test]
    fn test_find_crlf() {
        assert_eq!(find_crlf(b"20 text/gemini\r\nbody"), Some(14));
        assert_eq!(find_crlf(b"no terminator"), None);
    }

    #[test]
    fn test_text_rejects_unknown_charset() {
        let response = Response {
            url: "gemini://x/".to_string(),
            mime_type: "text/gemini".to_string(),
            charset: "iso-8859-1".to_string(),
            body: b"ok".to_vec(),
        };
        assert!(matches!(response.text(), Err(Error::UnsupportedMimeType(_))));
    }

    #[test]
    fn test_unsupported_scheme() {
        let err = fetch("https://example.org/").unwrap_err();
        assert!(matches!(err, Error::UnsupportedUrlScheme(scheme) if scheme == "https"));
    }
}
