// inventory-backup/src/backup/archive.rs
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;
use tar::Builder;
use walkdir::WalkDir;

use crate::errors::{BackupError, Result};

const READ_BUFFER: usize = 8192;

/// Gzip-compresses `source` into `dest`. Returns the compressed size in bytes.
pub fn compress_file(source: &Path, dest: &Path) -> Result<u64> {
    let input = File::open(source).map_err(|e| {
        BackupError::compression(format!("Failed to open {}: {}", source.display(), e))
    })?;
    let output = File::create(dest).map_err(|e| {
        BackupError::compression(format!("Failed to create {}: {}", dest.display(), e))
    })?;

    let mut encoder = GzEncoder::new(BufWriter::new(output), Compression::default());
    io::copy(&mut BufReader::new(input), &mut encoder).map_err(|e| {
        BackupError::compression(format!(
            "Failed to compress {} into {}: {}",
            source.display(),
            dest.display(),
            e
        ))
    })?;

    let writer = encoder.finish().map_err(|e| {
        BackupError::compression(format!(
            "Failed to finish Gzip encoding for {}: {}",
            dest.display(),
            e
        ))
    })?;
    let file = writer
        .into_inner()
        .map_err(|e| BackupError::compression(format!("Failed to flush {}: {}", dest.display(), e)))?;
    file.sync_all()?;

    Ok(file.metadata()?.len())
}

/// Inflates a `.gz` artifact into `dest`. Returns the decompressed size in bytes.
pub fn decompress_file(source: &Path, dest: &Path) -> Result<u64> {
    let input = File::open(source)?;
    let mut decoder = GzDecoder::new(BufReader::new(input));
    let mut output = BufWriter::new(File::create(dest)?);

    let written = io::copy(&mut decoder, &mut output).map_err(|e| {
        BackupError::compression(format!(
            "Failed to decompress {}: {}",
            source.display(),
            e
        ))
    })?;
    output.flush()?;
    Ok(written)
}

/// Opens the artifact and inflates its first block. Returns the number of bytes read.
pub fn read_first_block(path: &Path) -> Result<usize> {
    let mut decoder = GzDecoder::new(File::open(path)?);
    let mut buffer = vec![0u8; READ_BUFFER];
    let read = decoder.read(&mut buffer).map_err(|e| {
        BackupError::integrity(format!("{} is not a readable gzip stream: {}", path.display(), e))
    })?;
    Ok(read)
}

/// Streaming SHA-256 of a file, hex encoded.
pub fn sha256_file(path: &Path) -> Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; READ_BUFFER];

    loop {
        let bytes_read = file.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Creates a GZipped TAR archive from a source directory.
///
/// Paths inside the archive are relative to `source_dir`.
pub fn create_tar_gz_archive(source_dir: &Path, archive_dest_path: &Path) -> Result<u64> {
    if !source_dir.is_dir() {
        return Err(BackupError::compression(format!(
            "Source for archival is not a directory: {}",
            source_dir.display()
        )));
    }

    tracing::debug!(
        "Creating tar.gz archive from {} to {}",
        source_dir.display(),
        archive_dest_path.display()
    );

    let archive_file = File::create(archive_dest_path)?;
    let enc = GzEncoder::new(archive_file, Compression::default());
    let mut tar_builder = Builder::new(enc);

    for entry in WalkDir::new(source_dir).sort_by_file_name() {
        let entry = entry.map_err(|e| {
            BackupError::compression(format!("Failed to walk {}: {}", source_dir.display(), e))
        })?;
        let path = entry.path();
        let name = path.strip_prefix(source_dir).map_err(|e| {
            BackupError::compression(format!("Failed to strip prefix from {}: {}", path.display(), e))
        })?;

        if name.as_os_str().is_empty() {
            continue;
        }

        if path.is_file() {
            tar_builder.append_path_with_name(path, name).map_err(|e| {
                BackupError::compression(format!(
                    "Failed to append file {} to archive: {}",
                    path.display(),
                    e
                ))
            })?;
        }
    }

    let encoder = tar_builder.into_inner().map_err(|e| {
        BackupError::compression(format!(
            "Failed to finish tar stream for {}: {}",
            archive_dest_path.display(),
            e
        ))
    })?;
    let file = encoder.finish().map_err(|e| {
        BackupError::compression(format!(
            "Failed to finish Gzip encoding for archive {}: {}",
            archive_dest_path.display(),
            e
        ))
    })?;
    file.sync_all()?;

    Ok(file.metadata()?.len())
}

/// Total size in bytes of the regular files below `dir`.
pub fn directory_size(dir: &Path) -> u64 {
    WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| e.metadata().ok())
        .map(|m| m.len())
        .sum()
}
