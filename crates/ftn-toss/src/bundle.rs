//! ZIP bundle handling and BSO bundle naming.
//!
//! A bundle is a ZIP archive of `.pkt` files named `NNNNFFFF.dowN` after
//! its destination node and the weekday it was created (`.zip` and `.out`
//! are accepted on inbound too). Naming alone is not trusted: the file must
//! also start with the local-file ZIP magic.

use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::TossError;

/// Local-file-header magic every ZIP bundle starts with.
pub const ZIP_MAGIC: [u8; 4] = [0x50, 0x4B, 0x03, 0x04];

/// Two-letter weekday codes, Monday first.
pub const DOW_CODES: [&str; 7] = ["mo", "tu", "we", "th", "fr", "sa", "su"];

/// Whether a file name carries a bundle extension: `.zip`, `.out`, or a
/// day-of-week form like `.mo0` … `.su9`.
pub fn bundle_extension(name: &str) -> bool {
    let Some((_, ext)) = name.rsplit_once('.') else {
        return false;
    };
    let ext = ext.to_ascii_lowercase();
    if ext == "zip" || ext == "out" {
        return true;
    }
    ext.len() == 3
        && DOW_CODES.contains(&&ext[..2])
        && ext.as_bytes()[2].is_ascii_digit()
}

/// Whether the file starts with the ZIP local-file magic.
pub fn is_zip_bundle(path: &Path) -> crate::Result<bool> {
    let mut file = File::open(path)?;
    let mut magic = [0u8; 4];
    match file.read_exact(&mut magic) {
        Ok(()) => Ok(magic == ZIP_MAGIC),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Extracts the `.pkt` members of a bundle into `dest_dir`, returning the
/// extracted paths in archive order.
///
/// Only the basename of each entry is used; directory components inside
/// the archive are discarded so entries cannot escape `dest_dir`.
pub fn extract_bundle(src: &Path, dest_dir: &Path) -> crate::Result<Vec<PathBuf>> {
    if !is_zip_bundle(src)? {
        return Err(TossError::BundleNotZip(src.to_path_buf()));
    }
    fs::create_dir_all(dest_dir)?;

    let mut archive = ZipArchive::new(File::open(src)?)?;
    let mut extracted = Vec::new();
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        let Some(basename) = Path::new(entry.name())
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
        else {
            continue;
        };
        if !basename.to_ascii_lowercase().ends_with(".pkt") {
            log::trace!("skipping non-packet bundle entry {:?}", entry.name());
            continue;
        }
        let dest = dest_dir.join(&basename);
        io::copy(&mut entry, &mut File::create(&dest)?)?;
        extracted.push(dest);
    }
    Ok(extracted)
}

/// Creates a bundle at `dst` containing the given files as deflated
/// entries under their basenames. With no inputs, nothing is written and
/// no file appears. The archive is built in a temporary sibling and
/// renamed into place; the temporary is removed on any failure.
pub fn create_bundle(dst: &Path, inputs: &[PathBuf]) -> crate::Result<usize> {
    if inputs.is_empty() {
        return Ok(0);
    }
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent)?;
    }

    let tmp = {
        let mut os = dst.as_os_str().to_os_string();
        os.push(format!(".tmp{:08x}", rand::random::<u32>()));
        PathBuf::from(os)
    };

    let result = write_bundle(&tmp, inputs).and_then(|count| {
        fs::rename(&tmp, dst)?;
        Ok(count)
    });
    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result
}

fn write_bundle(tmp: &Path, inputs: &[PathBuf]) -> crate::Result<usize> {
    let mut writer = ZipWriter::new(File::create(tmp)?);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    let mut count = 0;
    for input in inputs {
        let name = input
            .file_name()
            .ok_or_else(|| TossError::Config(format!("bundle input {} has no name", input.display())))?
            .to_string_lossy()
            .into_owned();
        writer.start_file(name, options)?;
        io::copy(&mut File::open(input)?, &mut writer)?;
        count += 1;
    }
    writer.finish()?.sync_all()?;
    Ok(count)
}

/// BSO bundle name for a destination node: destination net and node in
/// lowercase hex, weekday code (Monday = 0) and an overflow digit.
pub fn bundle_filename(net: u16, node: u16, dow_index: usize, overflow: u8) -> String {
    format!("{net:04x}{node:04x}.{}{overflow}", DOW_CODES[dow_index % 7])
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn recognizes_bundle_extensions() {
        for name in ["0067a012.mo0", "0067A012.SU9", "mail.zip", "stale.out", "x.we5"] {
            assert!(bundle_extension(name), "{name} should be a bundle name");
        }
        for name in ["packet.pkt", "0067a012.xx0", "0067a012.moa", "0067a012.mo", "noext"] {
            assert!(!bundle_extension(name), "{name} should not be a bundle name");
        }
    }

    #[test]
    fn zip_magic_detection() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("real.mo0");
        let bad = dir.path().join("fake.mo0");
        let short = dir.path().join("short.mo0");
        fs::write(&good, [0x50, 0x4B, 0x03, 0x04, 0x00]).unwrap();
        fs::write(&bad, b"PK\x05\x06rest").unwrap();
        fs::write(&short, b"PK").unwrap();

        assert!(is_zip_bundle(&good).unwrap());
        assert!(!is_zip_bundle(&bad).unwrap());
        assert!(!is_zip_bundle(&short).unwrap());
    }

    #[test]
    fn create_and_extract_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let one = dir.path().join("00000001.pkt");
        let two = dir.path().join("00000002.pkt");
        fs::write(&one, b"first packet").unwrap();
        fs::write(&two, b"second packet").unwrap();

        let bundle = dir.path().join("out/0067a012.mo0");
        let count = create_bundle(&bundle, &[one, two]).unwrap();
        assert_eq!(count, 2);
        assert!(is_zip_bundle(&bundle).unwrap());

        let unpack = dir.path().join("unpack");
        let extracted = extract_bundle(&bundle, &unpack).unwrap();
        assert_eq!(extracted.len(), 2);
        assert_eq!(fs::read(&extracted[0]).unwrap(), b"first packet");
        assert_eq!(fs::read(&extracted[1]).unwrap(), b"second packet");
    }

    #[test]
    fn empty_bundle_writes_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let bundle = dir.path().join("0067a012.mo0");
        assert_eq!(create_bundle(&bundle, &[]).unwrap(), 0);
        assert!(!bundle.exists());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn extraction_ignores_directories_and_foreign_entries() {
        let dir = tempfile::tempdir().unwrap();
        let bundle = dir.path().join("evil.zip");

        let mut writer = ZipWriter::new(File::create(&bundle).unwrap());
        let options =
            SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
        writer
            .start_file("../escape/../deep/dir/00000001.pkt", options)
            .unwrap();
        writer.write_all(b"nested packet").unwrap();
        writer.start_file("readme.txt", options).unwrap();
        writer.write_all(b"not a packet").unwrap();
        writer.finish().unwrap();

        let unpack = dir.path().join("unpack");
        let extracted = extract_bundle(&bundle, &unpack).unwrap();
        assert_eq!(extracted, vec![unpack.join("00000001.pkt")]);
        assert_eq!(fs::read(&extracted[0]).unwrap(), b"nested packet");
        // Nothing landed outside the destination directory.
        assert!(!dir.path().join("escape").exists());
    }

    #[test]
    fn non_zip_refuses_extraction() {
        let dir = tempfile::tempdir().unwrap();
        let fake = dir.path().join("fake.mo0");
        fs::write(&fake, b"plain text").unwrap();
        assert!(matches!(
            extract_bundle(&fake, dir.path()),
            Err(TossError::BundleNotZip(_))
        ));
    }

    #[test]
    fn bundle_names() {
        assert_eq!(bundle_filename(0x67, 0xa012, 0, 0), "0067a012.mo0");
        assert_eq!(bundle_filename(103, 705, 6, 9), "006702c1.su9");
    }
}
