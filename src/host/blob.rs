//! Block copies and zero-fills into image files.
//!
//! The same primitive serves three callers: zeroing a region of the final
//! image, zeroing a staging file, and splicing a blob or staging image into
//! a volume image at an offset. The block size only affects how many bytes
//! move per syscall.

use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::fs::FileExt;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlobSource<'a> {
    Zeros,
    File(&'a Path),
}

/// One copy request: `length` bytes from `source` into `dest` at
/// `dest_offset`. The destination is created if missing and never truncated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlobCopy<'a> {
    pub source: BlobSource<'a>,
    pub dest: &'a Path,
    pub dest_offset: u64,
    /// `None` copies a file source to its end. Required for zero-fills.
    pub length: Option<u64>,
    pub block_size: u64,
}

impl<'a> BlobCopy<'a> {
    pub fn zeros(dest: &'a Path, dest_offset: u64, length: u64, block_size: u64) -> Self {
        Self {
            source: BlobSource::Zeros,
            dest,
            dest_offset,
            length: Some(length),
            block_size,
        }
    }

    pub fn file(src: &'a Path, dest: &'a Path, dest_offset: u64, block_size: u64) -> Self {
        Self {
            source: BlobSource::File(src),
            dest,
            dest_offset,
            length: None,
            block_size,
        }
    }
}

pub trait BlobCopier {
    fn copy(&self, request: &BlobCopy<'_>) -> io::Result<()>;
}

/// Positional reads and writes in `block_size` chunks.
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeCopier;

impl BlobCopier for NativeCopier {
    fn copy(&self, request: &BlobCopy<'_>) -> io::Result<()> {
        if request.block_size == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "invalid block size 0",
            ));
        }

        let dest = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(request.dest)?;

        match request.source {
            BlobSource::Zeros => {
                let length = request.length.ok_or_else(|| {
                    io::Error::new(io::ErrorKind::InvalidInput, "zero-fill needs a length")
                })?;
                zero_fill(&dest, request.dest_offset, length, request.block_size)
            }
            BlobSource::File(src) => {
                let src = File::open(src)?;
                let available = src.metadata()?.len();
                let length = match request.length {
                    Some(length) if length > available => {
                        return Err(io::Error::new(
                            io::ErrorKind::UnexpectedEof,
                            format!("source has {} bytes, {} requested", available, length),
                        ));
                    }
                    Some(length) => length,
                    None => available,
                };
                copy_range(&src, &dest, request.dest_offset, length, request.block_size)
            }
        }?;

        dest.sync_data()
    }
}

fn chunk_len(block_size: u64, remaining: u64) -> usize {
    // Bounded so a huge tunable block size cannot allocate gigabytes.
    block_size.min(remaining).min(64 * 1024 * 1024) as usize
}

fn zero_fill(dest: &File, offset: u64, length: u64, block_size: u64) -> io::Result<()> {
    let buf = vec![0u8; chunk_len(block_size, length)];
    let mut written = 0u64;
    while written < length {
        let n = chunk_len(block_size, length - written);
        dest.write_all_at(&buf[..n], offset + written)?;
        written += n as u64;
    }
    Ok(())
}

fn copy_range(src: &File, dest: &File, offset: u64, length: u64, block_size: u64) -> io::Result<()> {
    let mut buf = vec![0u8; chunk_len(block_size, length)];
    let mut copied = 0u64;
    while copied < length {
        let n = chunk_len(block_size, length - copied);
        src.read_exact_at(&mut buf[..n], copied)?;
        dest.write_all_at(&buf[..n], offset + copied)?;
        copied += n as u64;
    }
    Ok(())
}
