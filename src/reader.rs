//! Everything related to reading lines from a single tailed file.

use std::collections::VecDeque;
use std::fmt;
use std::fs::{self, File};
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use memchr::memchr;
use tracing::{debug, warn};

use crate::config::TailConfig;
use crate::error::{Error, Result};

#[cfg(unix)]
fn open_nonblocking(path: &Path) -> io::Result<File> {
    use std::os::unix::fs::OpenOptionsExt;

    fs::OpenOptions::new()
        .read(true)
        .custom_flags(libc::O_NONBLOCK)
        .open(path)
}

#[cfg(not(unix))]
fn open_nonblocking(path: &Path) -> io::Result<File> {
    File::open(path)
}

#[cfg(unix)]
fn file_id(meta: &fs::Metadata) -> u64 {
    use std::os::unix::fs::MetadataExt;

    meta.ino()
}

// No inode on this platform; only truncation is detected.
#[cfg(not(unix))]
fn file_id(_meta: &fs::Metadata) -> u64 {
    0
}

/// Opens `path` and positions it, returning the descriptor, its inode and
/// the resulting byte position.
fn open_descriptor(
    path: &Path,
    skip_to_end: bool,
    start_offset: Option<u64>,
) -> Result<(File, u64, u64)> {
    let mut file = open_nonblocking(path).map_err(|e| Error::open(path, e))?;

    let seek = match (start_offset, skip_to_end) {
        (Some(offset), _) => SeekFrom::Start(offset),
        (None, true) => SeekFrom::End(0),
        (None, false) => SeekFrom::Start(0),
    };
    let pos = file.seek(seek).map_err(|e| Error::open(path, e))?;
    let inode = file
        .metadata()
        .map(|meta| file_id(&meta))
        .map_err(|e| Error::open(path, e))?;

    Ok((file, inode, pos))
}

/// A single file being tailed, owning its descriptor and its read buffer.
///
/// Lines are pulled with [`lines`](TailedFile::lines). Each complete line is
/// delivered exactly once together with the byte offset at which it starts.
///
/// The buffer is bounded: once more than half of `max_buffer_size` bytes pile
/// up without a newline, the line is dropped and skipped up to its
/// terminator.
pub struct TailedFile {
    path: PathBuf,
    descriptor: Option<File>,
    inode: u64,
    /// Position of `descriptor`, i.e. how far into the file we have read.
    read_pos: u64,
    /// File offset of `buf[cursor]`.
    offset: u64,
    buf: Vec<u8>,
    cursor: usize,
    /// The buffer starts with the tail of a dropped long line.
    long_line: bool,
    /// File offset where the line being dropped started.
    long_line_start: u64,
    /// Indices into `buf` where bytes of a newer inode begin. Everything
    /// before the first boundary was drained from a rotated-away file.
    boundaries: VecDeque<usize>,
    max_buffer_size: usize,
    read_chunk_size: usize,
}

impl fmt::Debug for TailedFile {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("TailedFile")
            .field("path", &self.path)
            .field("open", &self.descriptor.is_some())
            .field("inode", &self.inode)
            .field("offset", &self.offset)
            .field("buffered", &self.buffered())
            .field("long_line", &self.long_line)
            .field("long_line_start", &self.long_line_start)
            .finish()
    }
}

impl TailedFile {
    /// Opens `path` for non-blocking reads.
    ///
    /// With a `start_offset` the file is positioned there. Otherwise it is
    /// positioned at its current end when `skip_to_end` is set, or at its
    /// beginning.
    pub fn open(
        path: impl Into<PathBuf>,
        skip_to_end: bool,
        start_offset: Option<u64>,
        config: &TailConfig,
    ) -> Result<Self> {
        let path = path.into();
        let (descriptor, inode, pos) = open_descriptor(&path, skip_to_end, start_offset)?;

        debug!(path = %path.display(), inode, offset = pos, "opened file");

        Ok(TailedFile {
            path,
            descriptor: Some(descriptor),
            inode,
            read_pos: pos,
            offset: pos,
            buf: Vec::new(),
            cursor: 0,
            long_line: false,
            long_line_start: pos,
            boundaries: VecDeque::new(),
            max_buffer_size: config.max_buffer_size,
            read_chunk_size: config.read_chunk_size,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Offset of the next line to be delivered. Feeding it back as a resume
    /// offset continues tailing without losing or repeating lines.
    pub fn offset(&self) -> u64 {
        if !self.boundaries.is_empty() {
            // Residue of a rotated file is pending; the current inode has not
            // been consumed at all yet.
            0
        } else if self.long_line {
            // Resuming mid-line would turn the dropped line's tail into a
            // line of its own.
            self.long_line_start
        } else {
            self.offset
        }
    }

    /// Number of read but not yet delivered bytes.
    pub fn buffered(&self) -> usize {
        self.buf.len() - self.cursor
    }

    pub fn is_closed(&self) -> bool {
        self.descriptor.is_none()
    }

    /// Pulls currently available bytes into the buffer without blocking.
    ///
    /// Reads at most `limit` bytes, or everything available when `limit` is
    /// `None`. Returns whether anything was read.
    pub fn read(&mut self, limit: Option<usize>) -> io::Result<bool> {
        let file = match self.descriptor.as_mut() {
            Some(file) => file,
            None => return Ok(false),
        };

        let mut total = 0;
        loop {
            let want = match limit {
                Some(limit) => limit - total,
                None => self.read_chunk_size,
            };
            if want == 0 {
                break;
            }

            let start = self.buf.len();
            self.buf.resize(start + want, 0);
            let n = match file.read(&mut self.buf[start..]) {
                Ok(n) => n,
                Err(e) => {
                    self.buf.truncate(start);
                    match e.kind() {
                        io::ErrorKind::Interrupted => continue,
                        io::ErrorKind::WouldBlock => break,
                        _ => return Err(e),
                    }
                }
            };
            self.buf.truncate(start + n);

            if n == 0 {
                break;
            }
            total += n;
            self.read_pos += n as u64;
        }

        Ok(total > 0)
    }

    /// Returns `true` if the file at `path` is no longer the one we hold open,
    /// if it shrank below what we already read, or if it cannot be stat'ed.
    ///
    /// The inode comparison is reliable because the open descriptor keeps the
    /// old inode from being recycled.
    pub fn has_been_rotated(&self) -> bool {
        match fs::metadata(&self.path) {
            Ok(meta) => file_id(&meta) != self.inode || meta.len() < self.read_pos,
            Err(_) => true,
        }
    }

    /// Drains the current descriptor, closes it and opens `path` again from
    /// offset 0.
    ///
    /// Returns `false` if the path can no longer be opened, in which case the
    /// file is closed for good.
    pub fn reopen(&mut self) -> bool {
        if let Err(e) = self.read(None) {
            warn!(path = %self.path.display(), error = %e, "failed to drain file before reopening");
        }
        self.close();

        if self.buffered() == 0 && self.boundaries.is_empty() {
            self.offset = 0;
            self.long_line = false;
        } else {
            self.boundaries.push_back(self.buf.len());
        }

        match open_descriptor(&self.path, false, None) {
            Ok((descriptor, inode, pos)) => {
                debug!(path = %self.path.display(), old_inode = self.inode, inode, "reopened file");
                self.descriptor = Some(descriptor);
                self.inode = inode;
                self.read_pos = pos;
                true
            }
            Err(e) => {
                debug!(path = %self.path.display(), error = %e, "failed to reopen file");
                false
            }
        }
    }

    /// Closes the descriptor. Buffered bytes are kept.
    pub fn close(&mut self) {
        if let Some(descriptor) = self.descriptor.take() {
            drop(descriptor);
            debug!(path = %self.path.display(), "closed file");
        }
    }

    /// Returns the lines that became complete since the last call.
    ///
    /// The iterator ends once no further complete line is available; calling
    /// `lines` again later resumes where it stopped.
    pub fn lines(&mut self) -> Lines<'_> {
        Lines { file: self }
    }

    fn long_line_threshold(&self) -> usize {
        self.max_buffer_size / 2
    }

    fn compact(&mut self) {
        let consumed = self.cursor;
        if consumed > self.long_line_threshold() {
            self.buf.drain(..consumed);
            for boundary in self.boundaries.iter_mut() {
                *boundary -= consumed;
            }
            self.cursor = 0;
        }
    }

    /// Builds the line `buf[start..start + len]` unless it is too long.
    fn accept(&self, start: usize, len: usize, offset: u64) -> Option<(String, u64)> {
        if len > self.long_line_threshold() {
            warn!(path = %self.path.display(), offset, len, "skipping over long line");
            return None;
        }

        let line = String::from_utf8_lossy(&self.buf[start..start + len]).into_owned();
        Some((line, offset))
    }

    fn next_line(&mut self) -> Option<(String, u64)> {
        loop {
            self.compact();

            let mut at_eof = true;
            if self.buffered() < self.max_buffer_size {
                at_eof = match self.read(Some(self.max_buffer_size)) {
                    Ok(read) => !read,
                    Err(e) => {
                        warn!(path = %self.path.display(), error = %e, "failed to read file");
                        true
                    }
                };
            }

            let start = self.cursor;
            let end = self.boundaries.front().copied().unwrap_or(self.buf.len());

            if let Some(len) = memchr(b'\n', &self.buf[start..end]) {
                self.cursor = start + len + 1;
                let offset = self.offset;
                self.offset += len as u64 + 1;

                if self.long_line {
                    // Remainder of a line that was already dropped.
                    self.long_line = false;
                    continue;
                }
                match self.accept(start, len, offset) {
                    Some(line) => return Some(line),
                    None => continue,
                }
            }

            if let Some(boundary) = self.boundaries.pop_front() {
                // The rotated-away file ended without a newline and can never
                // be completed, so flush what it left.
                let len = boundary - start;
                let offset = self.offset;
                self.cursor = boundary;
                self.offset = 0;

                let remainder = std::mem::take(&mut self.long_line);
                if len > 0 && !remainder {
                    if let Some(line) = self.accept(start, len, offset) {
                        return Some(line);
                    }
                }
                continue;
            }

            let pending = end - start;
            if pending > self.long_line_threshold() {
                if !self.long_line {
                    warn!(path = %self.path.display(), offset = self.offset, "skipping over long line");
                    self.long_line_start = self.offset;
                }
                // Keep the last byte so the skipped line still ends with a
                // (discarded) remainder chunk.
                let keep = end - 1;
                self.offset += (keep - start) as u64;
                self.cursor = keep;
                self.long_line = true;
                return None;
            }

            if at_eof {
                return None;
            }
        }
    }
}

/// Lines newly available from a [`TailedFile`], as `(line, offset)` pairs.
///
/// Created by [`TailedFile::lines`].
#[must_use = "iterators are lazy and do nothing unless consumed"]
pub struct Lines<'a> {
    file: &'a mut TailedFile,
}

impl Iterator for Lines<'_> {
    type Item = (String, u64);

    fn next(&mut self) -> Option<Self::Item> {
        self.file.next_line()
    }
}
