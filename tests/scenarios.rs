//! Integration coverage for the concrete scenarios and cross-cutting
//! invariants that span more than one module: a `finish`-stage boot image
//! rewrite that threads `bootimage` + `cpio` + `checksum` together, and the
//! `RomSwitcher`/`ChecksumStore` decision table. Full chroot/install-from-zip
//! scenarios need real mount namespaces and a writable `/data/multiboot`, so
//! those stay at the unit level (`installer.rs`, `rom.rs`) against sandboxed
//! stand-ins; what's here runs in an ordinary `cargo test` sandbox.

use mbtool::bootimage::BootImage;
use mbtool::checksum::{ChecksumStore, Lookup};
use mbtool::cpio::{EntryType, Ramdisk};

fn sha512_hex(data: &[u8]) -> String {
    use sha2::{Digest, Sha512};
    Sha512::digest(data).iter().map(|b| format!("{b:02x}")).collect()
}

fn sample_boot_image_bytes() -> Vec<u8> {
    let mut ramdisk = Ramdisk::new();
    ramdisk.add_file("init", 0o755, b"#!/sbin/sh\n".to_vec()).unwrap();
    let ramdisk_bytes = ramdisk.store().unwrap();

    // Hand-assemble a parseable header the way `BootImage::parse` expects,
    // mirroring bootimage.rs's own `sample_plain` test fixture shape.
    let page = 2048usize;
    let kernel = b"kernel-bytes".repeat(50);
    build_plain_image(&kernel, &ramdisk_bytes, page)
}

fn build_plain_image(kernel: &[u8], ramdisk: &[u8], page: usize) -> Vec<u8> {
    // Round-trip through parse/serialise isn't available without a real
    // header writer at this layer, so construct one via the public API:
    // parse a zeroed-out header-shaped buffer is not possible (parse
    // requires the magic), so instead build through the same legacy
    // mkbootimg layout bootimage.rs itself writes, reusing its round-trip
    // guarantee: serialise(parse(b)) == b for any well-formed b starting
    // from a plain header we construct here.
    let board = [0u8; 16];
    let cmdline_str = b"console=ttyMSM0";
    let mut cmdline = [0u8; 512];
    cmdline[..cmdline_str.len()].copy_from_slice(cmdline_str);

    let mut out = vec![0u8; page];
    out[0..8].copy_from_slice(b"ANDROID!");
    let mut cursor = 8usize;
    let mut put = |out: &mut Vec<u8>, v: u32| {
        out[cursor..cursor + 4].copy_from_slice(&v.to_le_bytes());
        cursor += 4;
    };
    put(&mut out, kernel.len() as u32);
    put(&mut out, 0x1080_0000);
    put(&mut out, ramdisk.len() as u32);
    put(&mut out, 0x0200_0000);
    put(&mut out, 0);
    put(&mut out, 0x0010_0000);
    put(&mut out, 0x0000_0100);
    put(&mut out, page as u32);
    put(&mut out, 0);
    put(&mut out, 0);
    out[cursor..cursor + 16].copy_from_slice(&board);
    cursor += 16;
    out[cursor..cursor + 512].copy_from_slice(&cmdline);

    let page_align = |len: usize| (len.div_ceil(page)) * page;
    out.resize(page_align(out.len().max(page)), 0);
    out.extend_from_slice(kernel);
    out.resize(out.len() + (page_align(kernel.len()) - kernel.len()), 0);
    out.extend_from_slice(ramdisk);
    out.resize(out.len() + (page_align(ramdisk.len()) - ramdisk.len()), 0);
    out
}

/// Scenario 5 (§8): adding a symlink to an empty ramdisk and round-tripping
/// it preserves type, target, mode, and zeroed ownership/timestamp.
#[test]
fn cpio_symlink_addition_scenario() {
    let mut ramdisk = Ramdisk::new();
    ramdisk.add_symlink("sbin/sh", "busybox").unwrap();

    let bytes = ramdisk.store().unwrap();
    let loaded = Ramdisk::load(&bytes).unwrap();

    let entry = loaded.entry("sbin/sh").unwrap();
    assert_eq!(entry.kind, EntryType::Symlink);
    assert_eq!(entry.data, b"busybox");
    assert_eq!(entry.mode_bits, 0o777);
    assert_eq!(entry.uid, 0);
    assert_eq!(entry.gid, 0);
    assert_eq!(entry.mtime, 0);
}

/// Mirrors the installer's `finish` stage (§4.9 step 10): parse the boot
/// image, splice a `romid` marker into its ramdisk, re-serialise, and stamp
/// the result into a `ChecksumStore` the way `put`/`save`/`load`/`get` are
/// required to round-trip (§8 "Checksum invariants").
#[test]
fn finish_stage_injects_romid_and_checksum_round_trips() {
    let original = sample_boot_image_bytes();
    let image = BootImage::parse(&original).unwrap();

    let mut ramdisk = Ramdisk::load(image.ramdisk()).unwrap();
    ramdisk.add_file("romid", 0o644, b"secondary\n".to_vec()).unwrap();
    let mut image = image;
    image.set_ramdisk(ramdisk.store().unwrap());
    let rewritten = image.serialise().unwrap();

    let reparsed = BootImage::parse(&rewritten).unwrap();
    let reloaded_ramdisk = Ramdisk::load(reparsed.ramdisk()).unwrap();
    assert_eq!(reloaded_ramdisk.read("romid").unwrap(), b"secondary\n");
    assert_eq!(reloaded_ramdisk.read("init").unwrap(), b"#!/sbin/sh\n");

    let hash = sha512_hex(&rewritten);
    let dir = tempfile::tempdir().unwrap();
    let store_path = dir.path().join("checksums.prop");
    {
        let mut store = ChecksumStore::new(&store_path);
        store.put("secondary", "boot.img", &hash);
        store.save().unwrap();
    }
    let mut store = ChecksumStore::new(&store_path);
    store.load().unwrap();
    assert_eq!(store.get("secondary", "boot.img"), Lookup::Found(hash));
}

/// Switch decision table (§8), exercised against `ChecksumStore` directly:
/// `RomSwitcher::switch` reads its boot backup from a fixed
/// `/data/multiboot/<id>/boot.img` path that a sandboxed test can't write
/// to, so — same limitation noted in `rom.rs`'s own tests — this drives the
/// decision table through the checksum gate the switch algorithm itself
/// consults before ever touching a block device.
#[test]
fn switch_decision_table_over_checksum_store() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = ChecksumStore::new(dir.path().join("checksums.prop"));
    let boot_bytes = b"boot-image-bytes-for-decision-table";
    let hash = sha512_hex(boot_bytes);

    // NotFound -> ChecksumNotFound
    assert_eq!(store.get("secondary", "boot.img"), Lookup::NotFound);

    // Found + equal -> would succeed
    store.put("secondary", "boot.img", &hash);
    assert_eq!(store.get("secondary", "boot.img"), Lookup::Found(hash.clone()));

    // Found + unequal -> ChecksumInvalid
    let tampered_hash = sha512_hex(b"a different boot image entirely");
    assert_ne!(store.get("secondary", "boot.img"), Lookup::Found(tampered_hash));

    // Malformed entry -> ChecksumInvalid for that key regardless of content
    std::fs::write(dir.path().join("other.prop"), "secondary/boot.img=not-a-digest\n").unwrap();
    let mut malformed = ChecksumStore::new(dir.path().join("other.prop"));
    malformed.load().unwrap();
    assert_eq!(malformed.get("secondary", "boot.img"), Lookup::Malformed);
}
