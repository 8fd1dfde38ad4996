//! ZIP record encoding for a sink that cannot seek.
//!
//! Layout produced (APPNOTE 6.3.x):
//!
//! ```text
//! [local header][body][data descriptor]   one per file
//! [local header]                          one per directory
//! [central directory header] ...
//! [zip64 end record][zip64 locator]       only when limits are exceeded
//! [end of central directory]
//! ```

use std::io;
use std::path::PathBuf;
use std::time::SystemTime;

use bytes::{BufMut, Bytes, BytesMut};
use chrono::{DateTime, Datelike, Local, Timelike};
use flate2::{Compress, FlushCompress, Status};
use tokio::io::AsyncReadExt;

use super::sink::ChunkSink;
use super::{ArchiveEntry, ArchiveOptions, Compression, EntryKind};
use crate::vfs::{VfsError, VfsResult, canonicalize};

const LOCAL_HEADER_SIG: u32 = 0x0403_4b50;
const DATA_DESCRIPTOR_SIG: u32 = 0x0807_4b50;
const CENTRAL_HEADER_SIG: u32 = 0x0201_4b50;
const ZIP64_END_SIG: u32 = 0x0606_4b50;
const ZIP64_LOCATOR_SIG: u32 = 0x0706_4b50;
const END_SIG: u32 = 0x0605_4b50;

const ZIP64_EXTRA_ID: u16 = 0x0001;

const VERSION_DEFAULT: u16 = 20;
const VERSION_ZIP64: u16 = 45;
/// High byte of "version made by": Unix, so external attributes carry modes.
const CREATOR_UNIX: u16 = 3 << 8;

const FLAG_DATA_DESCRIPTOR: u16 = 1 << 3;
const FLAG_UTF8: u16 = 1 << 11;

const METHOD_STORED: u16 = 0;
const METHOD_DEFLATED: u16 = 8;

const MSDOS_DIRECTORY: u32 = 0x10;

const LIMIT_32: u64 = 0xFFFF_FFFF;
const LIMIT_16: u64 = 0xFFFF;

/// What the central directory needs to know about one entry.
#[derive(Debug)]
struct CentralRecord {
    name: Vec<u8>,
    flags: u16,
    method: u16,
    version_needed: u16,
    dos_time: u16,
    dos_date: u16,
    crc: u32,
    compressed: u64,
    uncompressed: u64,
    offset: u64,
    external_attr: u32,
}

/// Writes a ZIP archive strictly front to back into a [`ChunkSink`].
///
/// Output is buffered only until a full chunk is available; already-emitted
/// bytes are never revisited.
pub struct ZipWriter<S> {
    sink: S,
    options: ArchiveOptions,
    pending: BytesMut,
    offset: u64,
    records: Vec<CentralRecord>,
}

impl<S: ChunkSink> ZipWriter<S> {
    pub fn new(sink: S, options: ArchiveOptions) -> Self {
        let chunk_size = options.chunk_size.max(1);
        Self {
            sink,
            options: ArchiveOptions {
                chunk_size,
                ..options
            },
            pending: BytesMut::with_capacity(chunk_size * 2),
            offset: 0,
            records: Vec::new(),
        }
    }

    /// Bytes produced so far, emitted or pending.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Number of entries written.
    pub fn entries(&self) -> usize {
        self.records.len()
    }

    /// Append one entry.
    ///
    /// Checks for a departed consumer first, so an abandoned download stops
    /// before opening the next file.
    pub async fn write_entry(&mut self, entry: &ArchiveEntry) -> VfsResult<()> {
        if self.sink.is_closed() {
            return Err(VfsError::Cancelled);
        }
        match entry.kind {
            EntryKind::Directory => self.write_directory(entry),
            EntryKind::File => self.write_file(entry).await?,
        }
        self.flush_full().await
    }

    /// Write the central directory and end records, flush, and hand back the
    /// sink with the total archive length.
    pub async fn finish(mut self) -> VfsResult<(S, u64)> {
        let cd_start = self.offset;
        let records = std::mem::take(&mut self.records);
        for record in &records {
            let header = central_header(record);
            self.put(&header);
            self.flush_full().await?;
        }
        let cd_size = self.offset - cd_start;
        let count = records.len() as u64;

        if count >= LIMIT_16 || cd_size >= LIMIT_32 || cd_start >= LIMIT_32 {
            let zip64_end_offset = self.offset;
            let end = zip64_end_record(count, cd_size, cd_start);
            self.put(&end);
            let locator = zip64_locator(zip64_end_offset);
            self.put(&locator);
        }
        let end = end_record(count, cd_size, cd_start);
        self.put(&end);

        if !self.pending.is_empty() {
            let chunk = self.pending.split().freeze();
            self.sink.send_chunk(chunk).await?;
        }
        tracing::debug!(entries = count, bytes = self.offset, "Finished zip archive");
        Ok((self.sink, self.offset))
    }

    fn write_directory(&mut self, entry: &ArchiveEntry) {
        let name = entry.zip_name().into_bytes();
        let (dos_time, dos_date) = dos_datetime(entry.modified);
        let record = CentralRecord {
            flags: utf8_flag(&name),
            method: METHOD_STORED,
            version_needed: VERSION_DEFAULT,
            dos_time,
            dos_date,
            crc: 0,
            compressed: 0,
            uncompressed: 0,
            offset: self.offset,
            external_attr: ((entry.mode & 0xFFFF) << 16) | MSDOS_DIRECTORY,
            name,
        };
        let header = local_header(&record, false);
        self.put(&header);
        self.records.push(record);
    }

    async fn write_file(&mut self, entry: &ArchiveEntry) -> VfsResult<()> {
        let path = entry.physical_path.display().to_string();
        let fail = |e: io::Error| VfsError::streaming(path.clone(), e);

        let name = entry.zip_name().into_bytes();
        let zip64 = needs_zip64(entry.size_hint);
        let (dos_time, dos_date) = dos_datetime(entry.modified);
        let method = match self.options.compression {
            Compression::Stored => METHOD_STORED,
            Compression::Deflated => METHOD_DEFLATED,
        };
        let mut record = CentralRecord {
            flags: FLAG_DATA_DESCRIPTOR | utf8_flag(&name),
            method,
            version_needed: if zip64 { VERSION_ZIP64 } else { VERSION_DEFAULT },
            dos_time,
            dos_date,
            crc: 0,
            compressed: 0,
            uncompressed: 0,
            offset: self.offset,
            external_attr: (entry.mode & 0xFFFF) << 16,
            name,
        };

        let Some(source) = source_path(entry).await.map_err(fail)? else {
            return Ok(());
        };
        let mut file = tokio::fs::File::open(&source).await.map_err(fail)?;

        let header = local_header(&record, zip64);
        self.put(&header);
        let body_start = self.offset;

        let chunk_size = self.options.chunk_size;
        let mut buf = vec![0u8; chunk_size];
        let mut hasher = crc32fast::Hasher::new();
        let mut deflate = match self.options.compression {
            Compression::Stored => None,
            Compression::Deflated => Some(Deflater::new(chunk_size)),
        };

        loop {
            let n = file.read(&mut buf).await.map_err(fail)?;
            if n == 0 {
                break;
            }
            let data = &buf[..n];
            hasher.update(data);
            record.uncompressed += n as u64;
            match deflate.as_mut() {
                Some(d) => d.feed(data, FlushCompress::None, &mut self.pending).map_err(fail)?,
                None => self.pending.extend_from_slice(data),
            }
            self.sync_offset(body_start, record.uncompressed, &deflate);
            self.flush_full().await?;
        }
        if let Some(d) = deflate.as_mut() {
            d.feed(&[], FlushCompress::Finish, &mut self.pending)
                .map_err(fail)?;
            self.sync_offset(body_start, record.uncompressed, &deflate);
        }

        record.crc = hasher.finalize();
        record.compressed = self.offset - body_start;
        if !zip64 && (record.compressed >= LIMIT_32 || record.uncompressed >= LIMIT_32) {
            return Err(fail(io::Error::other(
                "file grew past 4 GiB after it was enumerated",
            )));
        }

        let descriptor = data_descriptor(&record, zip64);
        self.put(&descriptor);
        tracing::trace!(
            entry = %entry.archive_path,
            size = record.uncompressed,
            compressed = record.compressed,
            "Wrote zip entry"
        );
        self.records.push(record);
        Ok(())
    }

    /// Recompute `offset` after body bytes went straight into `pending`.
    fn sync_offset(&mut self, body_start: u64, uncompressed: u64, deflate: &Option<Deflater>) {
        self.offset = body_start
            + match deflate {
                Some(d) => d.total_out(),
                None => uncompressed,
            };
    }

    fn put(&mut self, bytes: &[u8]) {
        self.pending.extend_from_slice(bytes);
        self.offset += bytes.len() as u64;
    }

    /// Emit every complete chunk sitting in `pending`.
    async fn flush_full(&mut self) -> VfsResult<()> {
        let chunk_size = self.options.chunk_size;
        while self.pending.len() >= chunk_size {
            let chunk: Bytes = self.pending.split_to(chunk_size).freeze();
            self.sink.send_chunk(chunk).await?;
        }
        Ok(())
    }
}

/// Raw deflate state for one entry.
struct Deflater {
    compress: Compress,
    scratch: Vec<u8>,
}

impl Deflater {
    fn new(chunk_size: usize) -> Self {
        Self {
            // ZIP wants raw deflate, no zlib header.
            compress: Compress::new(flate2::Compression::default(), false),
            scratch: Vec::with_capacity(chunk_size),
        }
    }

    fn total_out(&self) -> u64 {
        self.compress.total_out()
    }

    /// Compress `input` and append whatever output is ready to `out`.
    fn feed(&mut self, mut input: &[u8], flush: FlushCompress, out: &mut BytesMut) -> io::Result<()> {
        loop {
            self.scratch.clear();
            let before = self.compress.total_in();
            let status = self
                .compress
                .compress_vec(input, &mut self.scratch, flush)
                .map_err(io::Error::other)?;
            let consumed = (self.compress.total_in() - before) as usize;
            input = &input[consumed..];
            out.extend_from_slice(&self.scratch);
            let filled = self.scratch.len() == self.scratch.capacity();

            let done = match flush {
                FlushCompress::Finish => status == Status::StreamEnd,
                _ => input.is_empty() && !filled,
            };
            if done {
                return Ok(());
            }
        }
    }
}

/// Decide ZIP64 before the body is written, with headroom for a file that
/// grows a little or deflates badly.
fn needs_zip64(size_hint: u64) -> bool {
    size_hint.saturating_mul(21) / 20 >= LIMIT_32
}

fn utf8_flag(name: &[u8]) -> u16 {
    if name.is_ascii() { 0 } else { FLAG_UTF8 }
}

fn clamp32(v: u64) -> u32 {
    v.min(LIMIT_32) as u32
}

/// MS-DOS time and date words in local time, clamped to 1980..=2107.
fn dos_datetime(t: SystemTime) -> (u16, u16) {
    let local = DateTime::<Local>::from(t);
    let (year, month, day, hour, minute, second) = match local.year() {
        y if y < 1980 => (1980, 1, 1, 0, 0, 0),
        y if y > 2107 => (2107, 12, 31, 23, 59, 58),
        y => (
            y as u32,
            local.month(),
            local.day(),
            local.hour(),
            local.minute(),
            local.second().min(59),
        ),
    };
    let time = (hour << 11) | (minute << 5) | (second / 2);
    let date = ((year - 1980) << 9) | (month << 5) | day;
    (time as u16, date as u16)
}

fn local_header(record: &CentralRecord, zip64: bool) -> Vec<u8> {
    let extra_len: u16 = if zip64 { 20 } else { 0 };
    let mut b = Vec::with_capacity(30 + record.name.len() + extra_len as usize);
    b.put_u32_le(LOCAL_HEADER_SIG);
    b.put_u16_le(record.version_needed);
    b.put_u16_le(record.flags);
    b.put_u16_le(record.method);
    b.put_u16_le(record.dos_time);
    b.put_u16_le(record.dos_date);
    // CRC and sizes follow in the data descriptor for files; directories
    // are empty, so zeros are the real values.
    b.put_u32_le(0);
    let size = if zip64 { u32::MAX } else { 0 };
    b.put_u32_le(size);
    b.put_u32_le(size);
    b.put_u16_le(record.name.len() as u16);
    b.put_u16_le(extra_len);
    b.put_slice(&record.name);
    if zip64 {
        b.put_u16_le(ZIP64_EXTRA_ID);
        b.put_u16_le(16);
        b.put_u64_le(0);
        b.put_u64_le(0);
    }
    b
}

fn data_descriptor(record: &CentralRecord, zip64: bool) -> Vec<u8> {
    let mut b = Vec::with_capacity(24);
    b.put_u32_le(DATA_DESCRIPTOR_SIG);
    b.put_u32_le(record.crc);
    if zip64 {
        b.put_u64_le(record.compressed);
        b.put_u64_le(record.uncompressed);
    } else {
        b.put_u32_le(record.compressed as u32);
        b.put_u32_le(record.uncompressed as u32);
    }
    b
}

fn central_header(record: &CentralRecord) -> Vec<u8> {
    let mut extra = Vec::new();
    if record.uncompressed >= LIMIT_32 {
        extra.put_u64_le(record.uncompressed);
    }
    if record.compressed >= LIMIT_32 {
        extra.put_u64_le(record.compressed);
    }
    if record.offset >= LIMIT_32 {
        extra.put_u64_le(record.offset);
    }
    let version_needed = if extra.is_empty() {
        record.version_needed
    } else {
        VERSION_ZIP64
    };
    let extra_len = if extra.is_empty() { 0 } else { 4 + extra.len() };

    let mut b = Vec::with_capacity(46 + record.name.len() + extra_len);
    b.put_u32_le(CENTRAL_HEADER_SIG);
    b.put_u16_le(CREATOR_UNIX | version_needed);
    b.put_u16_le(version_needed);
    b.put_u16_le(record.flags);
    b.put_u16_le(record.method);
    b.put_u16_le(record.dos_time);
    b.put_u16_le(record.dos_date);
    b.put_u32_le(record.crc);
    b.put_u32_le(clamp32(record.compressed));
    b.put_u32_le(clamp32(record.uncompressed));
    b.put_u16_le(record.name.len() as u16);
    b.put_u16_le(extra_len as u16);
    b.put_u16_le(0); // comment length
    b.put_u16_le(0); // disk number start
    b.put_u16_le(0); // internal attributes
    b.put_u32_le(record.external_attr);
    b.put_u32_le(clamp32(record.offset));
    b.put_slice(&record.name);
    if !extra.is_empty() {
        b.put_u16_le(ZIP64_EXTRA_ID);
        b.put_u16_le(extra.len() as u16);
        b.put_slice(&extra);
    }
    b
}

fn zip64_end_record(count: u64, cd_size: u64, cd_start: u64) -> Vec<u8> {
    let mut b = Vec::with_capacity(56);
    b.put_u32_le(ZIP64_END_SIG);
    b.put_u64_le(44); // size of the rest of this record
    b.put_u16_le(CREATOR_UNIX | VERSION_ZIP64);
    b.put_u16_le(VERSION_ZIP64);
    b.put_u32_le(0); // this disk
    b.put_u32_le(0); // disk with the central directory
    b.put_u64_le(count);
    b.put_u64_le(count);
    b.put_u64_le(cd_size);
    b.put_u64_le(cd_start);
    b
}

fn zip64_locator(zip64_end_offset: u64) -> Vec<u8> {
    let mut b = Vec::with_capacity(20);
    b.put_u32_le(ZIP64_LOCATOR_SIG);
    b.put_u32_le(0);
    b.put_u64_le(zip64_end_offset);
    b.put_u32_le(1); // total disks
    b
}

fn end_record(count: u64, cd_size: u64, cd_start: u64) -> Vec<u8> {
    let count16 = count.min(LIMIT_16) as u16;
    let mut b = Vec::with_capacity(22);
    b.put_u32_le(END_SIG);
    b.put_u16_le(0);
    b.put_u16_le(0);
    b.put_u16_le(count16);
    b.put_u16_le(count16);
    b.put_u32_le(clamp32(cd_size));
    b.put_u32_le(clamp32(cd_start));
    b.put_u16_le(0); // comment length
    b
}

/// Where to read `entry` from.
///
/// A confined entry is canonicalized again so a file swapped for an
/// escaping symlink after the walk is skipped instead of archived.
async fn source_path(entry: &ArchiveEntry) -> io::Result<Option<PathBuf>> {
    let Some(root) = &entry.confine else {
        return Ok(Some(entry.physical_path.clone()));
    };
    let canonical = canonicalize(entry.physical_path.clone()).await?;
    if canonical.starts_with(root) {
        Ok(Some(canonical))
    } else {
        tracing::warn!(
            entry = %entry.archive_path,
            target = %canonical.display(),
            "Skipping file that now escapes its mount root"
        );
        Ok(None)
    }
}
