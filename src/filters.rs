//! Stream re-encoding filters.
//!
//! Every serialized stream is ASCII85-encoded so the PDF body stays inside
//! printable text, which is what keeps the polyglot readable as UTF-8.
//! Flate compression may run first when the engine produced uncompressed
//! streams; readers then decode ASCII85 before inflating.

use std::io::Write;

use flate2::write::ZlibEncoder;
use flate2::Compression;

const GROUP_DIVISORS: [u32; 4] = [85 * 85 * 85 * 85, 85 * 85 * 85, 85 * 85, 85];

/// Encode bytes as ASCII85 with the Adobe `~>` terminator.
///
/// Full all-zero groups collapse to `z`; a final partial group is padded,
/// encoded and truncated to `len + 1` characters (and never folded).
pub fn ascii85_encode(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() / 4 * 5 + 8);

    let mut chunks = data.chunks_exact(4);
    for chunk in &mut chunks {
        let word = u32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        if word == 0 {
            out.push(b'z');
        } else {
            out.extend_from_slice(&encode_group(word));
        }
    }

    let tail = chunks.remainder();
    if !tail.is_empty() {
        let mut padded = [0u8; 4];
        padded[..tail.len()].copy_from_slice(tail);
        let word = u32::from_be_bytes(padded);
        out.extend_from_slice(&encode_group(word)[..tail.len() + 1]);
    }

    out.extend_from_slice(b"~>");
    out
}

fn encode_group(word: u32) -> [u8; 5] {
    let mut group = [0u8; 5];
    let mut rest = word;
    for (slot, divisor) in group.iter_mut().zip(GROUP_DIVISORS) {
        *slot = b'!' + (rest / divisor) as u8;
        rest %= divisor;
    }
    group[4] = b'!' + rest as u8;
    group
}

/// Compress bytes in zlib format at the default level.
pub fn flate_compress(data: &[u8]) -> Vec<u8> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    // Writing to a Vec cannot fail.
    let _ = encoder.write_all(data);
    encoder.finish().unwrap_or_default()
}
