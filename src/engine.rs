//! HTML-to-PDF rendering engine seam.
//!
//! The polyglot layer only consumes engine bytes; the engine itself stays
//! behind a trait so tests can substitute synthetic PDFs. The production
//! implementation shells out to the `weasyprint` executable and adapts its
//! flags to the installed version.

use std::io::Write;
use std::process::{Command, Stdio};

use crate::error::{Error, Result};

/// Engine output: the PDF bytes plus whether streams inside them are
/// uncompressed (which allows the assembler to Flate-encode them).
#[derive(Debug, Clone)]
pub struct EngineOutput {
    /// PDF 1.7 bytes
    pub pdf: Vec<u8>,
    /// True when the engine was asked for uncompressed streams
    pub uncompressed: bool,
}

/// An HTML/CSS to PDF renderer.
pub trait RenderEngine {
    /// Render an HTML document with the given stylesheets.
    fn render(&self, html: &str, stylesheets: &[&str]) -> Result<EngineOutput>;
}

/// The WeasyPrint executable.
#[derive(Debug, Clone)]
pub struct WeasyPrint {
    version: Option<Vec<u32>>,
}

impl WeasyPrint {
    /// Probe `weasyprint --version`. A missing or unparsable version is
    /// tolerated; rendering then runs without the PDF/A flags.
    pub fn discover() -> WeasyPrint {
        let version = Command::new("weasyprint")
            .arg("--version")
            .output()
            .ok()
            .filter(|output| output.status.success())
            .and_then(|output| parse_version(&String::from_utf8_lossy(&output.stdout)));
        WeasyPrint { version }
    }

    /// Flags for the probed version, and whether its output will carry
    /// uncompressed streams.
    fn capabilities(&self) -> (Vec<&'static str>, bool) {
        match &self.version {
            Some(version) if version_at_least(version, &[59]) => (
                vec![
                    "--pdf-version",
                    "1.7",
                    "--pdf-variant",
                    "pdf/a-3b",
                    "--uncompressed-pdf",
                ],
                true,
            ),
            Some(version) if version_at_least(version, &[56]) => {
                if !version_at_least(version, &[57, 2]) {
                    log::warn!(
                        "this weasyprint version is known to generate pdfs that do not \
                         fully conform to PDF/A-3B; use version 58 or above"
                    );
                }
                (vec!["--pdf-version", "1.7", "--pdf-variant", "pdf/a-3b"], false)
            },
            Some(_) => {
                log::warn!(
                    "this weasyprint version does not support generating PDF/A \
                     documents; use version 56 or above"
                );
                (Vec::new(), false)
            },
            None => (Vec::new(), false),
        }
    }
}

impl RenderEngine for WeasyPrint {
    fn render(&self, html: &str, stylesheets: &[&str]) -> Result<EngineOutput> {
        let (flags, uncompressed) = self.capabilities();

        let workdir = tempfile::tempdir()?;
        let output_path = workdir.path().join("out.pdf");
        let mut command = Command::new("weasyprint");
        for (index, stylesheet) in stylesheets.iter().enumerate() {
            let path = workdir.path().join(format!("style{}.css", index));
            std::fs::write(&path, stylesheet)?;
            command.arg("-s");
            command.arg(path);
        }
        command
            .args(&flags)
            .arg("-")
            .arg(&output_path)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());

        let mut child = command
            .spawn()
            .map_err(|err| Error::Engine(format!("failed to run weasyprint: {}", err)))?;
        if let Some(stdin) = child.stdin.take() {
            let mut stdin = stdin;
            stdin.write_all(html.as_bytes())?;
        }
        let output = child.wait_with_output()?;
        if !output.status.success() {
            return Err(Error::Engine(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }

        let pdf = std::fs::read(&output_path)?;
        Ok(EngineOutput { pdf, uncompressed })
    }
}

/// Parse the numeric components out of a `weasyprint --version` line such
/// as `WeasyPrint version 60.2` or `59.0b1`.
fn parse_version(stdout: &str) -> Option<Vec<u32>> {
    let token = stdout.lines().next()?.split_whitespace().last()?;
    let components: Vec<u32> = token
        .split('.')
        .map(|part| {
            part.chars()
                .take_while(|c| c.is_ascii_digit())
                .collect::<String>()
                .parse()
                .unwrap_or(0)
        })
        .collect();
    (!components.is_empty()).then_some(components)
}

fn version_at_least(version: &[u32], minimum: &[u32]) -> bool {
    for index in 0..version.len().max(minimum.len()) {
        let have = version.get(index).copied().unwrap_or(0);
        let want = minimum.get(index).copied().unwrap_or(0);
        if have != want {
            return have > want;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_version() {
        assert_eq!(parse_version("WeasyPrint version 60.2\n"), Some(vec![60, 2]));
        assert_eq!(parse_version("59.0b1\n"), Some(vec![59, 0]));
        assert_eq!(parse_version(""), None);
    }

    #[test]
    fn test_version_at_least() {
        assert!(version_at_least(&[59], &[56]));
        assert!(version_at_least(&[57, 2], &[57, 2]));
        assert!(!version_at_least(&[57, 1], &[57, 2]));
        assert!(version_at_least(&[60], &[59]));
        assert!(!version_at_least(&[55, 9], &[56]));
    }

    #[test]
    fn test_capabilities_gate_compression() {
        let old = WeasyPrint { version: Some(vec![57, 2]) };
        assert!(!old.capabilities().1);
        let new = WeasyPrint { version: Some(vec![60, 1]) };
        assert!(new.capabilities().1);
        let unknown = WeasyPrint { version: None };
        assert!(unknown.capabilities().0.is_empty());
    }
}
