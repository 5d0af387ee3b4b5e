//! Files, as seen by the stored fields format.
//!
//! A [`Directory`] hands out write-once [`IndexOutput`]s and seekable [`IndexInput`]s. Inputs
//! can be cloned: each clone has its own position over the same underlying file, which is how
//! readers are shared between threads without locking.

use std::collections::HashMap;
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

/// Build a per-segment file name: `<segment>[_<suffix>].<ext>`.
pub fn segment_file_name(segment: &str, suffix: &str, ext: &str) -> String {
    if suffix.is_empty() {
        format!("{}.{}", segment, ext)
    } else {
        format!("{}_{}.{}", segment, suffix, ext)
    }
}

pub trait Directory: Send + Sync + fmt::Debug {
    /// Create a new, empty file. Fails if the file already exists.
    fn create_output(&self, name: &str) -> io::Result<Box<dyn IndexOutput>>;
    fn open_input(&self, name: &str) -> io::Result<Box<dyn IndexInput>>;
    fn delete_file(&self, name: &str) -> io::Result<()>;
    fn file_exists(&self, name: &str) -> bool;
    /// All file names, sorted.
    fn list_files(&self) -> io::Result<Vec<String>>;
}

/// Delete files, ignoring any failure. Used when cleaning up after an error.
pub fn delete_files_ignoring_errors(dir: &dyn Directory, names: &[String]) {
    for name in names {
        if let Err(err) = dir.delete_file(name) {
            tracing::trace!(file = %name, err = ?err, "ignoring delete failure");
        }
    }
}

/// A file being written sequentially. Tracks how many bytes were written and a running CRC32 of
/// them.
pub trait IndexOutput: Write + Send {
    fn name(&self) -> &str;
    /// Offset at which the next byte will be written.
    fn file_pointer(&self) -> u64;
    /// CRC32 of every byte written so far.
    fn checksum(&self) -> u32;
    fn close(self: Box<Self>) -> io::Result<()>;
}

/// A file opened for random-access reading.
pub trait IndexInput: Read + Send {
    fn name(&self) -> &str;
    fn position(&self) -> u64;
    fn seek(&mut self, pos: u64) -> io::Result<()>;
    fn len(&self) -> u64;
    /// An independent cursor over the same file, starting at the same position.
    fn clone_input(&self) -> Box<dyn IndexInput>;
}

fn seek_past_end(name: &str, pos: u64, len: u64) -> io::Error {
    io::Error::new(
        ErrorKind::InvalidInput,
        format!("seek to {} past end of {} ({} bytes)", pos, name, len),
    )
}

type FileMap = HashMap<String, Vec<u8>>;

/// A directory held entirely in memory.
#[derive(Clone, Debug, Default)]
pub struct RamDirectory {
    files: Arc<Mutex<FileMap>>,
}

fn lock_files(files: &Mutex<FileMap>) -> io::Result<MutexGuard<'_, FileMap>> {
    files
        .lock()
        .map_err(|_| io::Error::new(ErrorKind::Other, "directory lock poisoned"))
}

fn not_found(name: &str) -> io::Error {
    io::Error::new(ErrorKind::NotFound, format!("no such file: {}", name))
}

impl RamDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// A copy of a file's current contents.
    pub fn read_file(&self, name: &str) -> io::Result<Vec<u8>> {
        lock_files(&self.files)?
            .get(name)
            .cloned()
            .ok_or_else(|| not_found(name))
    }

    /// Replace a file's contents outright, creating it if needed.
    pub fn write_file(&self, name: &str, contents: Vec<u8>) -> io::Result<()> {
        lock_files(&self.files)?.insert(name.to_string(), contents);
        Ok(())
    }
}

impl Directory for RamDirectory {
    fn create_output(&self, name: &str) -> io::Result<Box<dyn IndexOutput>> {
        let mut files = lock_files(&self.files)?;
        if files.contains_key(name) {
            return Err(io::Error::new(
                ErrorKind::AlreadyExists,
                format!("file already exists: {}", name),
            ));
        }
        files.insert(name.to_string(), Vec::new());
        Ok(Box::new(RamOutput {
            name: name.to_string(),
            files: self.files.clone(),
            buf: Vec::new(),
            hasher: crc32fast::Hasher::new(),
            len: 0,
        }))
    }

    fn open_input(&self, name: &str) -> io::Result<Box<dyn IndexInput>> {
        let data: Arc<[u8]> = lock_files(&self.files)?
            .get(name)
            .map(|d| Arc::from(&d[..]))
            .ok_or_else(|| not_found(name))?;
        Ok(Box::new(RamInput {
            name: name.to_string(),
            data,
            pos: 0,
        }))
    }

    fn delete_file(&self, name: &str) -> io::Result<()> {
        lock_files(&self.files)?
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| not_found(name))
    }

    fn file_exists(&self, name: &str) -> bool {
        lock_files(&self.files)
            .map(|f| f.contains_key(name))
            .unwrap_or(false)
    }

    fn list_files(&self) -> io::Result<Vec<String>> {
        let mut names: Vec<String> = lock_files(&self.files)?.keys().cloned().collect();
        names.sort();
        Ok(names)
    }
}

/// Bytes a [`RamOutput`] holds before appending them to the shared file.
const RAM_OUTPUT_BUFFER: usize = 1 << 16;

/// Writes collect in a private buffer and reach the shared file when flushed or closed.
struct RamOutput {
    name: String,
    files: Arc<Mutex<FileMap>>,
    buf: Vec<u8>,
    hasher: crc32fast::Hasher,
    len: u64,
}

impl RamOutput {
    fn flush_buffer(&mut self) -> io::Result<()> {
        if self.buf.is_empty() {
            return Ok(());
        }
        let mut files = lock_files(&self.files)?;
        let file = files.get_mut(&self.name).ok_or_else(|| not_found(&self.name))?;
        file.extend_from_slice(&self.buf);
        self.buf.clear();
        Ok(())
    }
}

impl Write for RamOutput {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(buf);
        self.hasher.update(buf);
        self.len += buf.len() as u64;
        if self.buf.len() >= RAM_OUTPUT_BUFFER {
            self.flush_buffer()?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.flush_buffer()
    }
}

impl Drop for RamOutput {
    fn drop(&mut self) {
        // The file may already be deleted, e.g. by an abort
        if let Err(err) = self.flush_buffer() {
            tracing::trace!(file = %self.name, err = ?err, "dropping unflushed output");
        }
    }
}

impl IndexOutput for RamOutput {
    fn name(&self) -> &str {
        &self.name
    }

    fn file_pointer(&self) -> u64 {
        self.len
    }

    fn checksum(&self) -> u32 {
        self.hasher.clone().finalize()
    }

    fn close(mut self: Box<Self>) -> io::Result<()> {
        self.flush_buffer()
    }
}

#[derive(Clone)]
struct RamInput {
    name: String,
    data: Arc<[u8]>,
    pos: u64,
}

impl Read for RamInput {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let start = (self.pos as usize).min(self.data.len());
        let n = buf.len().min(self.data.len() - start);
        buf[..n].copy_from_slice(&self.data[start..start + n]);
        self.pos += n as u64;
        Ok(n)
    }
}

impl IndexInput for RamInput {
    fn name(&self) -> &str {
        &self.name
    }

    fn position(&self) -> u64 {
        self.pos
    }

    fn seek(&mut self, pos: u64) -> io::Result<()> {
        if pos > self.len() {
            return Err(seek_past_end(&self.name, pos, self.len()));
        }
        self.pos = pos;
        Ok(())
    }

    fn len(&self) -> u64 {
        self.data.len() as u64
    }

    fn clone_input(&self) -> Box<dyn IndexInput> {
        Box::new(self.clone())
    }
}

/// A directory of plain files on the local filesystem.
#[derive(Clone, Debug)]
pub struct FsDirectory {
    root: PathBuf,
}

impl FsDirectory {
    /// Open a directory, creating it if it doesn't exist yet.
    pub fn open(root: impl AsRef<Path>) -> io::Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn path(&self) -> &Path {
        &self.root
    }
}

impl Directory for FsDirectory {
    fn create_output(&self, name: &str) -> io::Result<Box<dyn IndexOutput>> {
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(self.root.join(name))?;
        Ok(Box::new(FsOutput {
            name: name.to_string(),
            writer: BufWriter::new(file),
            hasher: crc32fast::Hasher::new(),
            len: 0,
        }))
    }

    fn open_input(&self, name: &str) -> io::Result<Box<dyn IndexInput>> {
        let file = File::open(self.root.join(name))?;
        let len = file.metadata()?.len();
        Ok(Box::new(FsInput {
            name: name.to_string(),
            file: Arc::new(file),
            len,
            pos: 0,
            buf: Vec::new(),
            buf_start: 0,
        }))
    }

    fn delete_file(&self, name: &str) -> io::Result<()> {
        fs::remove_file(self.root.join(name))
    }

    fn file_exists(&self, name: &str) -> bool {
        self.root.join(name).is_file()
    }

    fn list_files(&self) -> io::Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        Ok(names)
    }
}

struct FsOutput {
    name: String,
    writer: BufWriter<File>,
    hasher: crc32fast::Hasher,
    len: u64,
}

impl Write for FsOutput {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.writer.write(buf)?;
        self.hasher.update(&buf[..n]);
        self.len += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

impl IndexOutput for FsOutput {
    fn name(&self) -> &str {
        &self.name
    }

    fn file_pointer(&self) -> u64 {
        self.len
    }

    fn checksum(&self) -> u32 {
        self.hasher.clone().finalize()
    }

    fn close(mut self: Box<Self>) -> io::Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_data()
    }
}

const FS_BUFFER_SIZE: usize = 8192;

/// Reads through positional I/O, so clones sharing the file handle never disturb each other.
struct FsInput {
    name: String,
    file: Arc<File>,
    len: u64,
    pos: u64,
    buf: Vec<u8>,
    buf_start: u64,
}

#[cfg(unix)]
fn read_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    std::os::unix::fs::FileExt::read_at(file, buf, offset)
}

#[cfg(windows)]
fn read_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    std::os::windows::fs::FileExt::seek_read(file, buf, offset)
}

impl Read for FsInput {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        if self.pos >= self.len || out.is_empty() {
            return Ok(0);
        }
        if out.len() >= FS_BUFFER_SIZE {
            let n = read_at(&self.file, out, self.pos)?;
            self.pos += n as u64;
            return Ok(n);
        }

        let buf_end = self.buf_start + self.buf.len() as u64;
        if self.pos < self.buf_start || self.pos >= buf_end {
            let want = FS_BUFFER_SIZE.min((self.len - self.pos) as usize);
            self.buf.resize(want, 0);
            let n = read_at(&self.file, &mut self.buf, self.pos)?;
            self.buf.truncate(n);
            self.buf_start = self.pos;
            if n == 0 {
                return Ok(0);
            }
        }
        let start = (self.pos - self.buf_start) as usize;
        let n = out.len().min(self.buf.len() - start);
        out[..n].copy_from_slice(&self.buf[start..start + n]);
        self.pos += n as u64;
        Ok(n)
    }
}

impl IndexInput for FsInput {
    fn name(&self) -> &str {
        &self.name
    }

    fn position(&self) -> u64 {
        self.pos
    }

    fn seek(&mut self, pos: u64) -> io::Result<()> {
        if pos > self.len {
            return Err(seek_past_end(&self.name, pos, self.len));
        }
        self.pos = pos;
        Ok(())
    }

    fn len(&self) -> u64 {
        self.len
    }

    fn clone_input(&self) -> Box<dyn IndexInput> {
        Box::new(FsInput {
            name: self.name.clone(),
            file: self.file.clone(),
            len: self.len,
            pos: self.pos,
            buf: Vec::new(),
            buf_start: 0,
        })
    }
}
