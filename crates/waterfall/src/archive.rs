//! Filesystem archiver used by push and pull.
//!
//! The orchestration layer only needs two blocking operations: serialize a
//! path into a byte sink, and materialize a byte source beneath a path. The
//! default implementation speaks tar.

use std::fmt;
use std::fs;
use std::io::{self, Read, Write};
use std::path::Path;

use crate::error::ArchiveError;

/// Serializes filesystem subtrees to and from byte streams.
///
/// Both methods block; callers run them on the blocking pool.
pub trait Archiver: fmt::Debug + Send + Sync + 'static {
    /// Write the subtree at `src` into `sink`.
    fn pack(&self, sink: &mut dyn Write, src: &Path) -> Result<(), ArchiveError>;

    /// Materialize the archive read from `source` beneath `dest`.
    fn unpack(&self, source: &mut dyn Read, dest: &Path) -> Result<(), ArchiveError>;
}

/// Tar archiver.
///
/// A directory is archived as its contents, with entry names relative to it.
/// A single file is archived as one entry named after the file. Unpacking
/// always extracts beneath the destination directory, creating it first.
#[derive(Debug, Clone, Copy, Default)]
pub struct TarArchiver;

impl Archiver for TarArchiver {
    fn pack(&self, sink: &mut dyn Write, src: &Path) -> Result<(), ArchiveError> {
        let meta = fs::symlink_metadata(src).map_err(|e| source_error(src, e))?;

        let mut builder = tar::Builder::new(sink);
        builder.follow_symlinks(false);

        if meta.is_dir() {
            append_tree(&mut builder, src, Path::new(""))?;
        } else {
            let name = src.file_name().ok_or_else(|| {
                source_error(
                    src,
                    io::Error::new(io::ErrorKind::InvalidInput, "path has no file name"),
                )
            })?;
            append_entry(&mut builder, src, Path::new(name))?;
        }

        builder.finish().map_err(ArchiveError::Stream)
    }

    fn unpack(&self, source: &mut dyn Read, dest: &Path) -> Result<(), ArchiveError> {
        fs::create_dir_all(dest).map_err(|e| destination_error(dest, e))?;

        {
            let mut archive = tar::Archive::new(&mut *source);
            archive.set_overwrite(true);
            archive.set_preserve_permissions(true);

            // Directory modes are applied after their contents, deepest first,
            // so a read-only directory does not block its own children.
            let mut directories = Vec::new();
            for entry in archive.entries().map_err(ArchiveError::Format)? {
                let mut entry = entry.map_err(ArchiveError::Format)?;
                if entry.header().entry_type().is_dir() {
                    directories.push(entry);
                    continue;
                }
                unpack_entry(&mut entry, dest)?;
            }

            directories.sort_by(|a, b| b.path_bytes().cmp(&a.path_bytes()));
            for mut dir in directories {
                unpack_entry(&mut dir, dest)?;
            }
        }

        // Writers may pad past the end-of-archive marker.
        io::copy(source, &mut io::sink()).map_err(ArchiveError::Stream)?;
        Ok(())
    }
}

fn unpack_entry<R: Read>(entry: &mut tar::Entry<'_, R>, dest: &Path) -> Result<(), ArchiveError> {
    let name = entry.path().map_err(ArchiveError::Format)?.into_owned();

    match entry.unpack_in(dest) {
        Ok(true) => Ok(()),
        Ok(false) => {
            tracing::warn!(entry = %name.display(), "skipping entry outside destination");
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Err(ArchiveError::Format(e)),
        Err(e) => Err(destination_error(&dest.join(&name), e)),
    }
}

fn append_tree<W: Write>(
    builder: &mut tar::Builder<W>,
    root: &Path,
    rel: &Path,
) -> Result<(), ArchiveError> {
    let dir = root.join(rel);
    let mut names = fs::read_dir(&dir)
        .and_then(|entries| {
            entries
                .map(|entry| entry.map(|e| e.file_name()))
                .collect::<io::Result<Vec<_>>>()
        })
        .map_err(|e| source_error(&dir, e))?;
    names.sort();

    for name in names {
        let rel_path = rel.join(&name);
        let full = root.join(&rel_path);
        let file_type = fs::symlink_metadata(&full)
            .map_err(|e| source_error(&full, e))?
            .file_type();

        if file_type.is_dir() {
            append_entry(builder, &full, &rel_path)?;
            append_tree(builder, root, &rel_path)?;
        } else if file_type.is_file() || file_type.is_symlink() {
            append_entry(builder, &full, &rel_path)?;
        } else {
            tracing::debug!(path = %full.display(), "skipping special file");
        }
    }
    Ok(())
}

fn append_entry<W: Write>(
    builder: &mut tar::Builder<W>,
    path: &Path,
    name: &Path,
) -> Result<(), ArchiveError> {
    builder
        .append_path_with_name(path, name)
        .map_err(|e| match e.kind() {
            io::ErrorKind::BrokenPipe | io::ErrorKind::WriteZero => ArchiveError::Stream(e),
            _ => source_error(path, e),
        })
}

fn source_error(path: &Path, source: io::Error) -> ArchiveError {
    ArchiveError::Source {
        path: path.to_path_buf(),
        source,
    }
}

fn destination_error(path: &Path, source: io::Error) -> ArchiveError {
    ArchiveError::Destination {
        path: path.to_path_buf(),
        source,
    }
}
