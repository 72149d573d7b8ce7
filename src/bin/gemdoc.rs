//! gemdoc command line interface.
//!
//! Thin glue: classify the input (file, stdin, or gemini URL), run the
//! conversion pipeline, and write the result. In-place writes go through a
//! temporary file in the same directory; the final rename is the commit
//! point, so a failed run never touches the original.

use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Parser;
use lazy_static::lazy_static;
use regex::Regex;

use gemdoc::client::{self, Response};
use gemdoc::engine::{RenderEngine, WeasyPrint};
use gemdoc::error::{Error, Result};
use gemdoc::gemtext;
use gemdoc::metadata::{self, Key, Metadata};
use gemdoc::polyglot::{self, PolyglotPdf};
use gemdoc::stylesheet;

lazy_static! {
    /// Bare host-like arguments ("example.org/page") count as gemini URLs.
    static ref HOST_LIKE: Regex = Regex::new(r"^(//)?[^/.]+\.[^/.]+").unwrap();
    /// A filename that already carries an extension.
    static ref HAS_EXTENSION: Regex = Regex::new(r"[^.]\.[^.]+$").unwrap();
}

#[derive(Parser, Debug)]
#[command(
    name = "gemdoc",
    version,
    about = "Convert text/gemini documents into pdf polyglot files"
)]
struct Cli {
    /// Gemini URL or input file; '-' reads standard input
    input: Option<String>,

    /// Write output to FILE ('-' for stdout); derived from the URL when absent
    #[arg(short = 'o', long = "output", value_name = "FILE")]
    output: Option<String>,

    /// Replace the input file with the resulting polyglot file
    #[arg(short = 'i', long = "in-place", conflicts_with = "output")]
    in_place: bool,

    /// Write remote documents through without converting them
    #[arg(long = "no-convert", conflicts_with = "in_place")]
    no_convert: bool,

    /// Set metadata key K to value V (author, date, url, subject, keywords)
    #[arg(short = 'M', long = "metadata", value_name = "K=V")]
    metadata: Vec<String>,

    /// Style the document with FILE instead of the built-in stylesheet
    #[arg(long = "css", value_name = "FILE")]
    css: Vec<PathBuf>,

    /// Print the built-in default stylesheet and exit
    #[arg(long = "print-default-css")]
    print_default_css: bool,
}

enum Source {
    Local(String),
    Remote(Response),
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"))
        .format_timestamp(None)
        .format_target(false)
        .init();
    match run(Cli::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{}", err);
            ExitCode::FAILURE
        },
    }
}

fn usage(message: impl Into<String>) -> Error {
    Error::Usage(message.into())
}

fn run(cli: Cli) -> Result<()> {
    if cli.print_default_css {
        if cli.input.is_some() {
            return Err(usage(
                "the --print-default-css option cannot be combined with positional arguments",
            ));
        }
        return write_output(
            cli.output.as_deref(),
            None,
            stylesheet::DEFAULT_STYLESHEET.as_bytes(),
        );
    }

    let input = cli.input.clone().ok_or_else(|| {
        usage(
            "gemdoc takes exactly one positional argument; to force reading data \
             from stdin, specify a single dash '-' as the input file",
        )
    })?;

    let mut metadata = Metadata::new();
    for entry in &cli.metadata {
        let (key, value) = Metadata::parse_entry(entry)?;
        metadata.set(key, value);
    }

    // Classify the input.
    let source = if input == "-" {
        let mut buffer = String::new();
        std::io::stdin().read_to_string(&mut buffer)?;
        Source::Local(buffer)
    } else if !input.starts_with("gemini://") && Path::new(&input).exists() {
        Source::Local(fs::read_to_string(&input)?)
    } else if input.starts_with("gemini://") || HOST_LIKE.is_match(&input) {
        let response = client::fetch(&absolute_input_url(&input))?;
        if !metadata.contains(Key::Url) {
            metadata.set(Key::Url, response.url.clone());
        }
        Source::Remote(response)
    } else {
        return Err(usage(format!(
            "'{}' does not seem to be a gemini url and there is no such file \
             on the local system either",
            input
        )));
    };

    // Validate the flag combinations against the input kind.
    if cli.no_convert && matches!(source, Source::Local(_)) {
        return Err(usage("the --no-convert option can only be used with remote inputs"));
    }
    let mut output = cli.output.clone();
    let mut in_place_target: Option<PathBuf> = None;
    if cli.in_place {
        match &source {
            Source::Remote(_) => {
                return Err(usage("the -i flag can only be used for local inputs"));
            },
            Source::Local(_) if input == "-" => {
                return Err(usage(
                    "the -i flag can not be used to process stdin; to use gemdoc \
                     as a unix filter, use '-o-' instead",
                ));
            },
            Source::Local(_) => {
                if !fs::symlink_metadata(&input)?.is_file() {
                    return Err(usage(format!(
                        "cannot modify '{}' in place: not a regular file",
                        input
                    )));
                }
                in_place_target = Some(PathBuf::from(&input));
            },
        }
    } else if output.is_none() && matches!(source, Source::Local(_)) {
        return Err(usage("either -i or -o must be specified for local inputs"));
    }

    // Remote write-through cases; everything else continues to conversion.
    let mut embedded_metadata = Metadata::new();
    let raw_doc = match source {
        Source::Local(doc) => {
            if polyglot::is_polyglot(&doc)? {
                let (inner, recovered) = polyglot::extract_source(&doc)?;
                embedded_metadata = recovered;
                inner
            } else {
                doc
            }
        },
        Source::Remote(response) => {
            if output.is_none() {
                output = Some(derive_output_name(&input, &response, cli.no_convert)?);
            }
            if cli.no_convert {
                return write_output(output.as_deref(), None, &response.body);
            }
            let looks_like_pdf = {
                let trimmed: &[u8] = {
                    let skip = response
                        .body
                        .iter()
                        .take_while(|b| b.is_ascii_whitespace())
                        .count();
                    &response.body[skip..]
                };
                trimmed.starts_with(b"%PDF-")
            };
            if looks_like_pdf
                && (response.mime_type == "text/gemini" || response.mime_type == "application/pdf")
            {
                return write_output(output.as_deref(), None, &response.body);
            }
            if response.mime_type != "text/gemini" {
                log::warn!(
                    "writing non pdf file to {}; the file's mime type was \
                     reported to be '{}'",
                    output.as_deref().unwrap_or("-"),
                    response.mime_type
                );
                return write_output(output.as_deref(), None, &response.body);
            }
            response.text()?
        },
    };

    // Metadata precedence: command line > magic lines > embedded polyglot.
    let (body, magic_metadata) = metadata::strip_magic_lines(&raw_doc)?;
    metadata.merge_missing(&magic_metadata);
    metadata.merge_missing(&embedded_metadata);
    metadata.normalize()?;
    metadata.apply_url_defaults();

    let source_filename = metadata
        .get(Key::Url)
        .map(metadata::filename_from_url)
        .unwrap_or_else(|| "source.gmi".to_string());

    let body = polyglot::defang_pdf_keywords(&body);
    let translation = gemtext::translate(&body, &mut metadata);

    let mut stylesheets: Vec<String> = vec![stylesheet::MINIMAL_STYLESHEET.to_string()];
    for path in &cli.css {
        let css = fs::read_to_string(path)
            .map_err(|err| usage(format!("unable to read css file {}: {}", path.display(), err)))?;
        stylesheets.push(css);
    }
    if cli.css.is_empty() {
        stylesheets.push(stylesheet::DEFAULT_STYLESHEET.to_string());
    }
    let stylesheet_refs: Vec<&str> = stylesheets.iter().map(String::as_str).collect();

    let rendered = WeasyPrint::discover().render(&translation.html, &stylesheet_refs)?;

    let mut document = PolyglotPdf::new(
        Some(&translation.gemini),
        &rendered.pdf,
        &source_filename,
        rendered.uncompressed,
    )?;
    document.set_metadata(&metadata)?;
    let bytes = document.serialize()?;

    write_output(output.as_deref(), in_place_target.as_deref(), &bytes)
}

/// Turn a bare or protocol-relative argument into a gemini URL.
fn absolute_input_url(input: &str) -> String {
    if input.starts_with("gemini://") {
        input.to_string()
    } else if input.starts_with("//") {
        format!("gemini:{}", input)
    } else {
        format!("gemini://{}", input)
    }
}

/// Derive an output filename from the URL path the user gave. Refuses to
/// overwrite an existing file: the derived name was never confirmed by the
/// user.
fn derive_output_name(input: &str, response: &Response, no_convert: bool) -> Result<String> {
    let path = url::Url::parse(&absolute_input_url(input))
        .map(|url| url.path().to_string())
        .unwrap_or_default();
    let mut name = path
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or("")
        .trim_start_matches(['.', '~', '/'])
        .to_string();

    if response.mime_type == "text/gemini" && name.ends_with(".gmi") && !no_convert {
        name.truncate(name.len() - ".gmi".len());
        name.push_str(".pdf");
    }
    if !HAS_EXTENSION.is_match(&name) {
        if response.mime_type == "text/gemini" {
            name.push_str(if no_convert { ".gmi" } else { ".pdf" });
        } else {
            name.push_str(extension_for(&response.mime_type));
        }
    }
    if Path::new(&name).exists() {
        return Err(usage(format!(
            "the output file '{}' already exists and will not be replaced; \
             use the -o flag to explicitly specify the filename",
            name
        )));
    }
    Ok(name)
}

/// Best-effort extension guess for non-gemini MIME types.
fn extension_for(mime_type: &str) -> &'static str {
    match mime_type {
        "application/pdf" => ".pdf",
        "text/plain" => ".txt",
        "text/html" => ".html",
        "text/markdown" => ".md",
        "image/png" => ".png",
        "image/jpeg" => ".jpg",
        "image/gif" => ".gif",
        "application/json" => ".json",
        "application/zip" => ".zip",
        _ => "",
    }
}

/// Write the result: atomically over `in_place` when set, else to the
/// output path, with `-` (or nothing) meaning stdout.
fn write_output(output: Option<&str>, in_place: Option<&Path>, bytes: &[u8]) -> Result<()> {
    if let Some(target) = in_place {
        let dir = match target.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let mut staged = tempfile::NamedTempFile::new_in(dir)?;
        staged.write_all(bytes)?;
        staged.persist(target).map_err(|err| Error::Io(err.error))?;
        return Ok(());
    }
    match output {
        None | Some("-") => {
            let mut stdout = std::io::stdout();
            stdout.write_all(bytes)?;
            stdout.flush()?;
        },
        Some(path) => fs::write(path, bytes)?,
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(mime_type: &str, body: &[u8]) -> Response {
        Response {
            url: "gemini://example.org/".to_string(),
            mime_type: mime_type.to_string(),
            charset: "utf-8".to_string(),
            body: body.to_vec(),
        }
    }

    #[test]
    fn test_absolute_input_url() {
        assert_eq!(absolute_input_url("example.org"), "gemini://example.org");
        assert_eq!(absolute_input_url("//example.org/x"), "gemini://example.org/x");
        assert_eq!(absolute_input_url("gemini://example.org/"), "gemini://example.org/");
    }

    #[test]
    fn test_host_like_detection() {
        assert!(HOST_LIKE.is_match("example.org"));
        assert!(HOST_LIKE.is_match("//example.org/page"));
        assert!(!HOST_LIKE.is_match("not-a-host"));
        assert!(!HOST_LIKE.is_match("./relative/path"));
    }

    #[test]
    fn test_derive_output_name_converts_extension() {
        let name =
            derive_output_name("gemini://x.org/docs/page.gmi", &response("text/gemini", b""), false)
                .unwrap();
        assert_eq!(name, "page.pdf");
    }

    #[test]
    fn test_derive_output_name_no_convert_keeps_gmi() {
        let name =
            derive_output_name("gemini://x.org/docs/page", &response("text/gemini", b""), true)
                .unwrap();
        assert_eq!(name, "page.gmi");
    }

    #[test]
    fn test_derive_output_name_guesses_extension() {
        let name =
            derive_output_name("gemini://x.org/files/readme", &response("text/plain", b""), false)
                .unwrap();
        assert_eq!(name, "readme.txt");
    }

    #[test]
    fn test_derive_output_name_strips_leading_dots() {
        let name =
            derive_output_name("gemini://x.org/~user/", &response("text/gemini", b""), false)
                .unwrap();
        assert_eq!(name, "user.pdf");
    }
}
