// In-memory toolchain archives for tests
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::{self, Cursor, Write};
use tar::EntryType;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

/// An archive entry: a name plus file contents, or `None` for a directory
pub type ArchiveEntry<'a> = (&'a str, Option<&'a str>);

/// Runner script that echoes its arguments, then prints the submitted file
pub const ECHO_RUNNER: &str = "#!/bin/sh\necho \"runner: $1\"\ncat \"$2\"\n";

/// A minimal toolchain tree whose runner is `script`
pub fn toolchain_tree(script: &str) -> Vec<ArchiveEntry<'_>> {
    vec![
        ("go/", None),
        ("go/bin/", None),
        ("go/bin/go", Some(script)),
        ("go/VERSION", Some("go1.22.3\n")),
    ]
}

/// Gzipped tarball. Names are written verbatim, so hostile paths survive.
pub fn tar_gz(entries: &[ArchiveEntry<'_>]) -> io::Result<Vec<u8>> {
    let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
    for (name, data) in entries {
        let mut header = tar::Header::new_gnu();
        match data {
            Some(text) => {
                header.set_entry_type(EntryType::Regular);
                header.set_size(text.len() as u64);
            }
            None => {
                header.set_entry_type(EntryType::Directory);
                header.set_size(0);
            }
        }
        header.set_mode(0o755);

        let raw = name.as_bytes();
        if raw.len() > 100 {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "entry name too long"));
        }
        header.as_old_mut().name[..raw.len()].copy_from_slice(raw);
        header.set_cksum();
        builder.append(&header, data.unwrap_or("").as_bytes())?;
    }
    builder.into_inner()?.finish()
}

/// Uncompressed zip archive, every entry with mode 0o755
pub fn zip_bytes(entries: &[ArchiveEntry<'_>]) -> io::Result<Vec<u8>> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = stored().unix_permissions(0o755);
    for (name, data) in entries {
        match data {
            Some(text) => {
                writer.start_file(*name, options)?;
                writer.write_all(text.as_bytes())?;
            }
            None => writer.add_directory(*name, options)?,
        }
    }
    Ok(writer.finish()?.into_inner())
}

/// Zip holding `go/VERSION` and a symlink `go/escape` pointing at `/etc`
pub fn zip_with_symlink() -> io::Result<Vec<u8>> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    writer.start_file("go/VERSION", stored())?;
    writer.write_all(b"ok")?;
    writer.add_symlink("go/escape", "/etc", stored())?;
    Ok(writer.finish()?.into_inner())
}

fn stored() -> SimpleFileOptions {
    SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored)
}
