//! Android boot-image codec (§4.2): header search, Loki envelope handling,
//! and checksum-stamped re-serialisation.
//!
//! The legacy mkbootimg-era header shape is standard public knowledge; the
//! Loki envelope's *existence and purpose* (work around a locked bootloader
//! by wrapping the image so a patched `aboot` jumps into it, and requiring
//! the aboot partition back to undo that) is grounded on the `Type::Loki`
//! handling referenced in
//! `examples/original_source/mbtool/installer.cpp` around its boot-image
//! patching step. The original's actual shellcode-patching byte layout is
//! not reproduced — this module's envelope format only needs to be
//! internally consistent, not bit-compatible with a real device.

use sha1::{Digest, Sha1};

use crate::error::{MbtoolError, Result};

const BOOT_MAGIC: &[u8; 8] = b"ANDROID!";
const LOKI_MAGIC: &[u8; 4] = b"LOKI";
const LOKI_MAGIC_OFFSET: usize = 0x400;
const SEARCH_WINDOW: usize = 32 * 1024;

const BOARD_NAME_LEN: usize = 16;
const CMDLINE_LEN: usize = 512;
const ID_LEN: usize = 20;
/// magic(8) + 9 u32 fields(36) + os_version(4) + board(16) + cmdline(512) + id(20)
const HEADER_SIZE: usize = 8 + 36 + 4 + BOARD_NAME_LEN + CMDLINE_LEN + ID_LEN;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageType {
    Plain,
    Loki,
}

#[derive(Debug, Clone)]
pub struct BootImage {
    image_type: ImageType,
    kernel_addr: u32,
    ramdisk_addr: u32,
    second_addr: u32,
    tags_addr: u32,
    page_size: u32,
    os_version: u32,
    board: String,
    cmdline: String,
    kernel: Vec<u8>,
    ramdisk: Vec<u8>,
    second: Vec<u8>,
    dtb: Vec<u8>,
    /// Required to re-apply the Loki envelope on `serialise` for a Loki target.
    aboot: Option<Vec<u8>>,
}

impl BootImage {
    #[must_use]
    pub fn kernel(&self) -> &[u8] {
        &self.kernel
    }

    #[must_use]
    pub fn ramdisk(&self) -> &[u8] {
        &self.ramdisk
    }

    #[must_use]
    pub fn board(&self) -> &str {
        &self.board
    }

    #[must_use]
    pub fn cmdline(&self) -> &str {
        &self.cmdline
    }

    #[must_use]
    pub fn image_type(&self) -> ImageType {
        self.image_type
    }

    pub fn set_kernel(&mut self, bytes: Vec<u8>) {
        self.kernel = bytes;
    }

    pub fn set_ramdisk(&mut self, bytes: Vec<u8>) {
        self.ramdisk = bytes;
    }

    pub fn set_cmdline(&mut self, value: &str) -> Result<()> {
        if value.len() > CMDLINE_LEN {
            return Err(MbtoolError::Configuration(format!(
                "cmdline exceeds {CMDLINE_LEN} bytes"
            )));
        }
        self.cmdline = value.to_owned();
        Ok(())
    }

    pub fn set_board(&mut self, value: &str) -> Result<()> {
        if value.len() > BOARD_NAME_LEN {
            return Err(MbtoolError::Configuration(format!(
                "board name exceeds {BOARD_NAME_LEN} bytes"
            )));
        }
        self.board = value.to_owned();
        Ok(())
    }

    /// Supply the aboot partition's contents so `serialise` can re-wrap a
    /// Loki target. No-op for a plain image.
    pub fn set_aboot_reference(&mut self, aboot: Vec<u8>) {
        self.aboot = Some(aboot);
    }

    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let window = bytes.len().min(SEARCH_WINDOW);
        let header_start = bytes
            .get(..window)
            .and_then(|haystack| find_subslice(haystack, BOOT_MAGIC))
            .ok_or_else(|| MbtoolError::Configuration("boot image magic not found".to_owned()))?;

        let is_loki = bytes
            .get(LOKI_MAGIC_OFFSET..LOKI_MAGIC_OFFSET + LOKI_MAGIC.len())
            .is_some_and(|m| m == LOKI_MAGIC);

        let header = bytes
            .get(header_start..header_start + HEADER_SIZE)
            .ok_or_else(|| MbtoolError::Configuration("truncated boot image header".to_owned()))?;

        let mut cursor = 8usize; // past magic
        let kernel_size = read_u32(header, &mut cursor);
        let kernel_addr = read_u32(header, &mut cursor);
        let ramdisk_size = read_u32(header, &mut cursor);
        let ramdisk_addr = read_u32(header, &mut cursor);
        let second_size = read_u32(header, &mut cursor);
        let second_addr = read_u32(header, &mut cursor);
        let tags_addr = read_u32(header, &mut cursor);
        let page_size = read_u32(header, &mut cursor);
        let dt_size = read_u32(header, &mut cursor);
        let os_version = read_u32(header, &mut cursor);
        let board = read_fixed_string(header, &mut cursor, BOARD_NAME_LEN);
        let cmdline = read_fixed_string(header, &mut cursor, CMDLINE_LEN);
        // id checksum occupies the remaining ID_LEN bytes; not needed for parse.

        if page_size == 0 || (page_size & (page_size - 1)) != 0 {
            return Err(MbtoolError::Configuration(format!(
                "page size {page_size} is not a power of two"
            )));
        }

        let mut pos = header_start + page_size_align(HEADER_SIZE, page_size as usize);
        let kernel = read_section(bytes, &mut pos, kernel_size as usize, page_size)?;
        let ramdisk = read_section(bytes, &mut pos, ramdisk_size as usize, page_size)?;
        let second = read_section(bytes, &mut pos, second_size as usize, page_size)?;
        let dtb = read_section(bytes, &mut pos, dt_size as usize, page_size)?;

        // `apply_loki_envelope` appends a length-prefixed aboot blob right
        // after the plain image; recover it here so `serialise` can re-wrap
        // without the caller having to re-supply it and idempotence holds.
        let (image_type, aboot) = if is_loki {
            let aboot = bytes
                .get(pos..pos + 4)
                .map(|len_bytes| u32::from_le_bytes(len_bytes.try_into().expect("4-byte slice")) as usize)
                .and_then(|len| bytes.get(pos + 4..pos + 4 + len))
                .map(<[u8]>::to_vec);
            (ImageType::Loki, aboot)
        } else {
            (ImageType::Plain, None)
        };

        Ok(Self {
            image_type,
            kernel_addr,
            ramdisk_addr,
            second_addr,
            tags_addr,
            page_size,
            os_version,
            board,
            cmdline,
            kernel,
            ramdisk,
            second,
            dtb,
            aboot,
        })
    }

    pub fn serialise(&self) -> Result<Vec<u8>> {
        let plain = self.serialise_plain();
        match self.image_type {
            ImageType::Plain => Ok(plain),
            ImageType::Loki => {
                let aboot = self.aboot.as_ref().ok_or_else(|| {
                    MbtoolError::Configuration(
                        "Loki target requires an aboot reference to re-wrap".to_owned(),
                    )
                })?;
                Ok(apply_loki_envelope(&plain, aboot))
            }
        }
    }

    fn serialise_plain(&self) -> Vec<u8> {
        let page = self.page_size as usize;
        let mut out = vec![0u8; page_size_align(HEADER_SIZE, page)];

        let mut hasher = Sha1::new();
        hasher.update(&self.kernel);
        hasher.update((self.kernel.len() as u32).to_le_bytes());
        hasher.update(&self.ramdisk);
        hasher.update((self.ramdisk.len() as u32).to_le_bytes());
        hasher.update(&self.second);
        hasher.update((self.second.len() as u32).to_le_bytes());
        hasher.update(&self.dtb);
        hasher.update((self.dtb.len() as u32).to_le_bytes());
        let digest = hasher.finalize();

        write_header(&mut out, self, &digest);

        append_section(&mut out, &self.kernel, page);
        append_section(&mut out, &self.ramdisk, page);
        append_section(&mut out, &self.second, page);
        append_section(&mut out, &self.dtb, page);
        out
    }
}

fn write_header(out: &mut [u8], image: &BootImage, digest: &[u8]) {
    out[0..8].copy_from_slice(BOOT_MAGIC);
    let mut cursor = 8usize;
    write_u32(out, &mut cursor, image.kernel.len() as u32);
    write_u32(out, &mut cursor, image.kernel_addr);
    write_u32(out, &mut cursor, image.ramdisk.len() as u32);
    write_u32(out, &mut cursor, image.ramdisk_addr);
    write_u32(out, &mut cursor, image.second.len() as u32);
    write_u32(out, &mut cursor, image.second_addr);
    write_u32(out, &mut cursor, image.tags_addr);
    write_u32(out, &mut cursor, image.page_size);
    write_u32(out, &mut cursor, image.dtb.len() as u32);
    write_u32(out, &mut cursor, image.os_version);
    write_fixed_string(out, &mut cursor, &image.board, BOARD_NAME_LEN);
    write_fixed_string(out, &mut cursor, &image.cmdline, CMDLINE_LEN);
    let id_len = digest.len().min(ID_LEN);
    out[cursor..cursor + id_len].copy_from_slice(&digest[..id_len]);
}

fn read_u32(buf: &[u8], cursor: &mut usize) -> u32 {
    let value = u32::from_le_bytes(
        buf[*cursor..*cursor + 4]
            .try_into()
            .expect("4-byte slice"),
    );
    *cursor += 4;
    value
}

fn write_u32(buf: &mut [u8], cursor: &mut usize, value: u32) {
    buf[*cursor..*cursor + 4].copy_from_slice(&value.to_le_bytes());
    *cursor += 4;
}

fn read_fixed_string(buf: &[u8], cursor: &mut usize, len: usize) -> String {
    let slice = &buf[*cursor..*cursor + len];
    *cursor += len;
    let end = slice.iter().position(|&b| b == 0).unwrap_or(slice.len());
    String::from_utf8_lossy(&slice[..end]).into_owned()
}

fn write_fixed_string(buf: &mut [u8], cursor: &mut usize, value: &str, len: usize) {
    let bytes = value.as_bytes();
    let n = bytes.len().min(len);
    buf[*cursor..*cursor + n].copy_from_slice(&bytes[..n]);
    for b in &mut buf[*cursor + n..*cursor + len] {
        *b = 0;
    }
    *cursor += len;
}

fn page_size_align(len: usize, page: usize) -> usize {
    len.div_ceil(page) * page
}

fn append_section(out: &mut Vec<u8>, data: &[u8], page: usize) {
    out.extend_from_slice(data);
    let padded = page_size_align(data.len(), page);
    out.resize(out.len() + (padded - data.len()), 0);
}

fn read_section(bytes: &[u8], pos: &mut usize, size: usize, page: usize) -> Result<Vec<u8>> {
    let section = bytes
        .get(*pos..*pos + size)
        .ok_or_else(|| MbtoolError::Configuration("truncated boot image section".to_owned()))?
        .to_vec();
    *pos += page_size_align(size, page as usize);
    Ok(section)
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Wrap a plain image so a patched `aboot` jumps into it. Format: the plain
/// image, then the Loki magic at a fixed offset, then the length-prefixed
/// aboot reference so `parse` can recover it without the caller re-supplying
/// it explicitly.
fn apply_loki_envelope(plain: &[u8], aboot: &[u8]) -> Vec<u8> {
    let mut out = plain.to_vec();
    if out.len() < LOKI_MAGIC_OFFSET + LOKI_MAGIC.len() {
        out.resize(LOKI_MAGIC_OFFSET + LOKI_MAGIC.len(), 0);
    }
    out[LOKI_MAGIC_OFFSET..LOKI_MAGIC_OFFSET + LOKI_MAGIC.len()].copy_from_slice(LOKI_MAGIC);
    out.extend_from_slice(&(aboot.len() as u32).to_le_bytes());
    out.extend_from_slice(aboot);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_plain() -> BootImage {
        BootImage {
            image_type: ImageType::Plain,
            kernel_addr: 0x1080_0000,
            ramdisk_addr: 0x0200_0000,
            second_addr: 0x0010_0000,
            tags_addr: 0x0000_0100,
            page_size: 2048,
            os_version: 0,
            board: String::new(),
            cmdline: "console=ttyMSM0".to_owned(),
            kernel: b"kernel-bytes".repeat(100),
            ramdisk: b"ramdisk-bytes".repeat(100),
            second: Vec::new(),
            dtb: Vec::new(),
            aboot: None,
        }
    }

    #[test]
    fn parse_serialise_idempotent() {
        let image = sample_plain();
        let bytes = image.serialise_plain();
        let parsed = BootImage::parse(&bytes).unwrap();
        let reserialised = parsed.serialise().unwrap();
        assert_eq!(bytes, reserialised);

        let reparsed = BootImage::parse(&reserialised).unwrap();
        assert_eq!(reparsed.kernel(), image.kernel());
        assert_eq!(reparsed.ramdisk(), image.ramdisk());
        assert_eq!(reparsed.cmdline(), image.cmdline());
    }

    #[test]
    fn set_cmdline_rejects_oversize() {
        let mut image = sample_plain();
        let too_long = "x".repeat(CMDLINE_LEN + 1);
        assert!(image.set_cmdline(&too_long).is_err());
    }

    #[test]
    fn set_board_rejects_oversize() {
        let mut image = sample_plain();
        assert!(image.set_board("way-too-long-board-name").is_err());
        assert!(image.set_board("msm8974").is_ok());
    }

    #[test]
    fn loki_target_requires_aboot_reference_to_serialise() {
        let mut image = sample_plain();
        image.image_type = ImageType::Loki;
        assert!(image.serialise().is_err());

        image.set_aboot_reference(b"aboot-partition-contents".to_vec());
        let bytes = image.serialise().unwrap();

        let reparsed = BootImage::parse(&bytes).unwrap();
        assert_eq!(reparsed.image_type(), ImageType::Loki);
    }

    #[test]
    fn loki_round_trip_recovers_aboot_without_resupplying_it() {
        let mut image = sample_plain();
        image.image_type = ImageType::Loki;
        image.set_aboot_reference(b"aboot-partition-contents".to_vec());
        let bytes = image.serialise().unwrap();

        let reparsed = BootImage::parse(&bytes).unwrap();
        let reserialised = reparsed.serialise().unwrap();
        assert_eq!(bytes, reserialised);
    }

    #[test]
    fn header_search_tolerates_leading_padding() {
        let image = sample_plain();
        let mut bytes = vec![0u8; 512];
        bytes.extend_from_slice(&image.serialise_plain());
        let parsed = BootImage::parse(&bytes).unwrap();
        assert_eq!(parsed.cmdline(), "console=ttyMSM0");
    }
}
