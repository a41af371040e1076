//! Compression framing for ramdisk archives.
//!
//! Each algorithm here matches the magic bytes §4.1 sniffs on `load`. Gzip,
//! xz/lzma and lz4 go through ecosystem crates the way the rest of this
//! crate reaches for `flate2`/`xz2` elsewhere; lzop has no maintained Rust
//! binding, so it shells out to the `lzop` binary the same way
//! `cfg/partition.rs`-style code in the teacher shells out to `mkfs.*`
//! rather than reimplementing a filesystem.

use std::io::{Read, Write};
use std::process::{Command, Stdio};

use crate::error::{MbtoolError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    None,
    Gzip,
    Lzop,
    Lz4,
    Lzma,
}

impl Compression {
    /// Sniff the compression algorithm from the leading bytes of a ramdisk blob.
    #[must_use]
    pub fn detect(data: &[u8]) -> Self {
        if data.starts_with(&[0x1f, 0x8b]) {
            Self::Gzip
        } else if data.starts_with(&[0x89, b'L', b'Z', b'O', 0x00, 0x0d, 0x0a, 0x1a, 0x0a]) {
            Self::Lzop
        } else if data.starts_with(&[0x02, 0x21, 0x4c, 0x18]) {
            Self::Lz4
        } else if data.first().is_some_and(|&b| b == 0x5d || b == 0x5e) {
            Self::Lzma
        } else {
            Self::None
        }
    }

    pub fn decompress(self, data: &[u8]) -> Result<Vec<u8>> {
        match self {
            Self::None => Ok(data.to_vec()),
            Self::Gzip => {
                let mut out = Vec::new();
                flate2::read::GzDecoder::new(data)
                    .read_to_end(&mut out)
                    .map_err(|e| MbtoolError::io("gzip decompress", e))?;
                Ok(out)
            }
            Self::Lzma => decompress_lzma(data),
            Self::Lz4 => decompress_lz4_legacy(data),
            Self::Lzop => shell_decompress("lzop", &["-d", "-c"], data),
        }
    }

    pub fn compress(self, data: &[u8]) -> Result<Vec<u8>> {
        match self {
            Self::None => Ok(data.to_vec()),
            Self::Gzip => {
                let mut enc =
                    flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::best());
                enc.write_all(data).map_err(|e| MbtoolError::io("gzip compress", e))?;
                enc.finish().map_err(|e| MbtoolError::io("gzip compress", e))
            }
            Self::Lzma => compress_lzma(data),
            Self::Lz4 => compress_lz4_legacy(data),
            Self::Lzop => shell_decompress("lzop", &["-c"], data),
        }
    }
}

fn decompress_lzma(data: &[u8]) -> Result<Vec<u8>> {
    let stream = xz2::stream::Stream::new_lzma_decoder(u64::MAX)
        .map_err(|e| MbtoolError::io("lzma decoder init", std::io::Error::other(e)))?;
    let mut decoder = xz2::read::XzDecoder::new_stream(data, stream);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out).map_err(|e| MbtoolError::io("lzma decompress", e))?;
    Ok(out)
}

fn compress_lzma(data: &[u8]) -> Result<Vec<u8>> {
    let opts = xz2::stream::LzmaOptions::new_preset(6)
        .map_err(|e| MbtoolError::io("lzma encoder options", std::io::Error::other(e)))?;
    let stream = xz2::stream::Stream::new_lzma_encoder(&opts)
        .map_err(|e| MbtoolError::io("lzma encoder init", std::io::Error::other(e)))?;
    let mut encoder = xz2::write::XzEncoder::new_stream(Vec::new(), stream);
    encoder.write_all(data).map_err(|e| MbtoolError::io("lzma compress", e))?;
    encoder.finish().map_err(|e| MbtoolError::io("lzma compress", e))
}

/// Legacy kernel lz4 framing: magic, then a sequence of
/// `u32-le block size` + raw LZ4 block, terminated by a zero-size block.
fn decompress_lz4_legacy(data: &[u8]) -> Result<Vec<u8>> {
    let mut pos = 4usize; // skip magic
    let mut out = Vec::new();
    loop {
        let size_bytes = data
            .get(pos..pos + 4)
            .ok_or_else(|| MbtoolError::io("lz4 decompress", std::io::Error::other("truncated lz4 stream")))?;
        let size = u32::from_le_bytes(size_bytes.try_into().expect("slice is 4 bytes")) as usize;
        pos += 4;
        if size == 0 {
            break;
        }
        let block = data
            .get(pos..pos + size)
            .ok_or_else(|| MbtoolError::io("lz4 decompress", std::io::Error::other("truncated lz4 block")))?;
        // `compress_lz4_legacy` prepends the uncompressed size to each block,
        // so `None` here means "read it off the block" rather than "unknown".
        let decompressed = lz4::block::decompress(block, None)
            .map_err(|e| MbtoolError::io("lz4 decompress", e))?;
        out.extend_from_slice(&decompressed);
        pos += size;
    }
    Ok(out)
}

fn compress_lz4_legacy(data: &[u8]) -> Result<Vec<u8>> {
    const BLOCK_SIZE: usize = 8 * 1024 * 1024;
    let mut out = Vec::from([0x02, 0x21, 0x4c, 0x18]);
    for chunk in data.chunks(BLOCK_SIZE) {
        let compressed = lz4::block::compress(chunk, None, true)
            .map_err(|e| MbtoolError::io("lz4 compress", e))?;
        out.extend_from_slice(&(compressed.len() as u32).to_le_bytes());
        out.extend_from_slice(&compressed);
    }
    out.extend_from_slice(&0u32.to_le_bytes());
    Ok(out)
}

fn shell_decompress(bin: &str, args: &[&str], data: &[u8]) -> Result<Vec<u8>> {
    let mut child = Command::new(bin)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|e| MbtoolError::io(format!("spawn {bin}"), e))?;

    let mut stdin = child.stdin.take().expect("stdin was piped");
    let input = data.to_vec();
    let writer = std::thread::spawn(move || {
        let _ = stdin.write_all(&input);
    });

    let mut out = Vec::new();
    child
        .stdout
        .take()
        .expect("stdout was piped")
        .read_to_end(&mut out)
        .map_err(|e| MbtoolError::io(format!("read {bin} output"), e))?;

    let _ = writer.join();
    let status = child.wait().map_err(|e| MbtoolError::io(format!("wait {bin}"), e))?;
    if !status.success() {
        return Err(MbtoolError::io(
            format!("{bin} exited with {status}"),
            std::io::Error::other(format!("{bin} failed")),
        ));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_gzip_magic() {
        assert_eq!(Compression::detect(&[0x1f, 0x8b, 0x08]), Compression::Gzip);
    }

    #[test]
    fn detects_lz4_magic() {
        assert_eq!(Compression::detect(&[0x02, 0x21, 0x4c, 0x18]), Compression::Lz4);
    }

    #[test]
    fn detects_lzma_magic() {
        assert_eq!(Compression::detect(&[0x5d, 0x00, 0x00]), Compression::Lzma);
        assert_eq!(Compression::detect(&[0x5e, 0x00, 0x00]), Compression::Lzma);
    }

    #[test]
    fn detects_none() {
        assert_eq!(Compression::detect(&[0x07, 0x07, 0x01]), Compression::None);
    }

    #[test]
    fn gzip_round_trips() {
        let data = b"hello ramdisk".repeat(100);
        let compressed = Compression::Gzip.compress(&data).unwrap();
        assert_eq!(Compression::detect(&compressed), Compression::Gzip);
        let restored = Compression::Gzip.decompress(&compressed).unwrap();
        assert_eq!(restored, data);
    }

    #[test]
    fn lzma_round_trips() {
        let data = b"hello ramdisk, lzma edition".repeat(50);
        let compressed = Compression::Lzma.compress(&data).unwrap();
        assert_eq!(Compression::detect(&compressed), Compression::Lzma);
        let restored = Compression::Lzma.decompress(&compressed).unwrap();
        assert_eq!(restored, data);
    }

    #[test]
    fn lz4_round_trips() {
        let data = b"hello ramdisk, lz4 edition".repeat(1000);
        let compressed = Compression::Lz4.compress(&data).unwrap();
        assert_eq!(Compression::detect(&compressed), Compression::Lz4);
        let restored = Compression::Lz4.decompress(&compressed).unwrap();
        assert_eq!(restored, data);
    }
}
