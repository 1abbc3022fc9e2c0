//! Source distribution unpacking.

use crate::error::{PypiError, Result};
use bzip2::read::BzDecoder;
use flate2::read::GzDecoder;
use std::fs::{self, File};
use std::io::Read;
use std::path::{Component, Path, PathBuf};
use tar::Archive;
use xz2::read::XzDecoder;
use zip::read::ZipArchive;

/// Archive formats an sdist may come in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    TarGz,
    TarBz2,
    TarXz,
    Tar,
    Zip,
}

impl ArchiveKind {
    pub fn from_filename(name: &str) -> Option<Self> {
        let lower = name.to_ascii_lowercase();
        if lower.ends_with(".tar.gz") || lower.ends_with(".tgz") {
            Some(Self::TarGz)
        } else if lower.ends_with(".tar.bz2") || lower.ends_with(".tbz") {
            Some(Self::TarBz2)
        } else if lower.ends_with(".tar.xz") || lower.ends_with(".txz") {
            Some(Self::TarXz)
        } else if lower.ends_with(".tar") {
            Some(Self::Tar)
        } else if lower.ends_with(".zip") {
            Some(Self::Zip)
        } else {
            None
        }
    }
}

/// Unpacks `archive_path` into `dest` and returns the project root.
///
/// Source distributions normally wrap everything in a single
/// `<name>-<version>/` directory; that directory is returned when present.
pub fn unpack_sdist(archive_path: &Path, dest: &Path) -> Result<PathBuf> {
    let filename = archive_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let kind = ArchiveKind::from_filename(&filename).ok_or_else(|| {
        PypiError::unsupported_format(format!("cannot unpack archive {}", filename))
    })?;

    tracing::debug!("unpacking {} into {}", archive_path.display(), dest.display());
    fs::create_dir_all(dest)?;
    let file = File::open(archive_path)?;
    match kind {
        ArchiveKind::TarGz => unpack_tar(GzDecoder::new(file), dest)?,
        ArchiveKind::TarBz2 => unpack_tar(BzDecoder::new(file), dest)?,
        ArchiveKind::TarXz => unpack_tar(XzDecoder::new(file), dest)?,
        ArchiveKind::Tar => unpack_tar(file, dest)?,
        ArchiveKind::Zip => unpack_zip(file, dest)?,
    }
    Ok(single_root(dest)?.unwrap_or_else(|| dest.to_path_buf()))
}

fn unpack_tar<R: Read>(reader: R, dest: &Path) -> Result<()> {
    let mut archive = Archive::new(reader);
    for entry in archive.entries()? {
        let mut entry = entry?;
        let path = entry.path()?.into_owned();
        if !is_safe(&path) {
            tracing::warn!("skipping unsafe archive member {}", path.display());
            continue;
        }
        entry.unpack_in(dest)?;
    }
    Ok(())
}

fn unpack_zip(file: File, dest: &Path) -> Result<()> {
    let mut archive = ZipArchive::new(file)?;
    for index in 0..archive.len() {
        let mut member = archive.by_index(index)?;
        let Some(relative) = member.enclosed_name() else {
            tracing::warn!("skipping unsafe archive member {}", member.name());
            continue;
        };
        let target = dest.join(relative);
        if member.is_dir() {
            fs::create_dir_all(&target)?;
            continue;
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut out = File::create(&target)?;
        std::io::copy(&mut member, &mut out)?;
    }
    Ok(())
}

fn is_safe(path: &Path) -> bool {
    path.components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

fn single_root(dest: &Path) -> Result<Option<PathBuf>> {
    let entries: Vec<PathBuf> = fs::read_dir(dest)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .collect();
    match entries.as_slice() {
        [only] if only.is_dir() => Ok(Some(only.clone())),
        _ => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use std::io::Write;

    fn write_sdist<W: Write>(writer: W) -> W {
        let mut builder = tar::Builder::new(writer);
        let content = b"[project]\nname = \"demo\"\n";
        let mut header = tar::Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, "demo-0.0.1/pyproject.toml", &content[..])
            .unwrap();
        builder.into_inner().unwrap()
    }

    fn assert_unpacks(archive_path: &Path, out: &Path) {
        let root = unpack_sdist(archive_path, out).unwrap();
        assert!(root.ends_with("demo-0.0.1"));
        assert!(root.join("pyproject.toml").is_file());
    }

    #[test]
    fn test_unpack_tar_gz() {
        let dir = tempfile::tempdir().unwrap();
        let archive_path = dir.path().join("demo-0.0.1.tar.gz");
        let encoder = GzEncoder::new(File::create(&archive_path).unwrap(), Compression::default());
        write_sdist(encoder).finish().unwrap();

        assert_unpacks(&archive_path, &dir.path().join("out"));
    }

    #[test]
    fn test_unpack_tar_bz2() {
        let dir = tempfile::tempdir().unwrap();
        let archive_path = dir.path().join("demo-0.0.1.tar.bz2");
        let encoder = bzip2::write::BzEncoder::new(
            File::create(&archive_path).unwrap(),
            bzip2::Compression::default(),
        );
        write_sdist(encoder).finish().unwrap();

        assert_unpacks(&archive_path, &dir.path().join("out"));
    }

    #[test]
    fn test_unpack_tar_xz() {
        let dir = tempfile::tempdir().unwrap();
        let archive_path = dir.path().join("demo-0.0.1.tar.xz");
        let encoder = xz2::write::XzEncoder::new(File::create(&archive_path).unwrap(), 6);
        write_sdist(encoder).finish().unwrap();

        assert_unpacks(&archive_path, &dir.path().join("out"));
    }

    #[test]
    fn test_archive_kind_from_filename() {
        assert_eq!(ArchiveKind::from_filename("a-1.TGZ"), Some(ArchiveKind::TarGz));
        assert_eq!(ArchiveKind::from_filename("a-1.tbz"), Some(ArchiveKind::TarBz2));
        assert_eq!(ArchiveKind::from_filename("a-1.txz"), Some(ArchiveKind::TarXz));
        assert_eq!(ArchiveKind::from_filename("a-1.7z"), None);
    }

    #[test]
    fn test_unpack_zip() {
        let dir = tempfile::tempdir().unwrap();
        let archive_path = dir.path().join("demo-0.0.1.zip");
        {
            let mut writer = zip::ZipWriter::new(File::create(&archive_path).unwrap());
            let options = zip::write::SimpleFileOptions::default();
            writer.start_file("setup.py", options).unwrap();
            writer.write_all(b"setup(name='demo')").unwrap();
            writer.start_file("README", options).unwrap();
            writer.finish().unwrap();
        }

        let out = dir.path().join("out");
        let root = unpack_sdist(&archive_path, &out).unwrap();
        assert_eq!(root, out);
        assert!(root.join("setup.py").is_file());
    }

    #[test]
    fn test_unsupported_archive() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("demo-0.0.1.7z");
        File::create(&path).unwrap();
        assert!(matches!(
            unpack_sdist(&path, dir.path()),
            Err(PypiError::UnsupportedFormat(_))
        ));
    }
}
