//! Minimal ZIP container reader.
//!
//! Only what a single-entry streaming pass needs: locate the End-Of-Central-Directory
//! record in the file tail, parse the central directory, resolve one entry and
//! expose its compressed bytes lazily. Stored (0) and raw-deflate (8) entries are
//! supported; ZIP64 archives are not.

use crate::io::Compression;
use crate::{ScanError, ScanResult};
use crc32fast::Hasher as Crc32;
use std::io::SeekFrom;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeek, AsyncSeekExt, ReadBuf, Take};

pub const EOCD_SIGNATURE: u32 = 0x0605_4b50;
pub const CENTRAL_HEADER_SIGNATURE: u32 = 0x0201_4b50;
pub const LOCAL_HEADER_SIGNATURE: u32 = 0x0403_4b50;

const EOCD_LEN: usize = 22;
const CENTRAL_HEADER_LEN: usize = 46;
const LOCAL_HEADER_LEN: usize = 30;
/// EOCD plus the longest possible archive comment.
const MAX_TAIL_SCAN: u64 = EOCD_LEN as u64 + 65_535;

pub const METHOD_STORED: u16 = 0;
pub const METHOD_DEFLATE: u16 = 8;

/// Extensions that mark an entry as delimited tabular text.
pub const TABULAR_EXTENSIONS: &[&str] = &["csv", "txt", "tsv", "dat", "prn"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZipEntry {
    pub name: String,
    pub method: u16,
    pub crc32: u32,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    pub local_header_offset: u64,
}

impl ZipEntry {
    pub fn compression(&self) -> ScanResult<Compression> {
        match self.method {
            METHOD_STORED => Ok(Compression::None),
            METHOD_DEFLATE => Ok(Compression::Deflate),
            other => Err(ScanError::UnsupportedCompression(other)),
        }
    }

    fn is_tabular(&self) -> bool {
        self.name
            .rsplit_once('.')
            .map(|(_, ext)| {
                TABULAR_EXTENSIONS
                    .iter()
                    .any(|t| t.eq_ignore_ascii_case(ext))
            })
            .unwrap_or(false)
    }
}

/// Directories, resource forks and similar members that never hold data.
fn is_artifact(name: &str) -> bool {
    let base = name.rsplit('/').next().unwrap_or(name);
    name.ends_with('/') || name.starts_with("__MACOSX/") || base.starts_with("._") || base.is_empty()
}

#[derive(Debug, Clone, Default)]
pub struct ZipDirectory {
    pub entries: Vec<ZipEntry>,
}

fn u16_at(buf: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([buf[at], buf[at + 1]])
}

fn u32_at(buf: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}

/// Position of the last EOCD signature in `tail` that leaves room for a full record.
pub fn find_eocd(tail: &[u8]) -> Option<usize> {
    let sig = EOCD_SIGNATURE.to_le_bytes();
    let mut end = tail.len();
    while let Some(pos) = memchr::memmem::rfind(&tail[..end], &sig) {
        if pos + EOCD_LEN <= tail.len() {
            return Some(pos);
        }
        end = pos;
    }
    None
}

/// Parse `count` central directory records, dropping non-data artifacts.
pub fn parse_central_directory(buf: &[u8], count: usize) -> ScanResult<Vec<ZipEntry>> {
    let mut entries = Vec::with_capacity(count);
    let mut at = 0usize;
    for _ in 0..count {
        if at + CENTRAL_HEADER_LEN > buf.len() {
            return Err(ScanError::Corrupt("truncated central directory".into()));
        }
        if u32_at(buf, at) != CENTRAL_HEADER_SIGNATURE {
            return Err(ScanError::Corrupt(format!(
                "bad central directory signature at offset {at}"
            )));
        }
        let method = u16_at(buf, at + 10);
        let crc32 = u32_at(buf, at + 16);
        let compressed = u32_at(buf, at + 20);
        let uncompressed = u32_at(buf, at + 24);
        let name_len = u16_at(buf, at + 28) as usize;
        let extra_len = u16_at(buf, at + 30) as usize;
        let comment_len = u16_at(buf, at + 32) as usize;
        let offset = u32_at(buf, at + 42);

        let name_start = at + CENTRAL_HEADER_LEN;
        let name_end = name_start + name_len;
        if name_end > buf.len() {
            return Err(ScanError::Corrupt("truncated entry name".into()));
        }
        let name = String::from_utf8_lossy(&buf[name_start..name_end]).into_owned();
        at = name_end + extra_len + comment_len;

        if is_artifact(&name) {
            continue;
        }
        if compressed == u32::MAX || uncompressed == u32::MAX || offset == u32::MAX {
            return Err(ScanError::Corrupt(format!(
                "zip64 entry not supported: {name}"
            )));
        }
        entries.push(ZipEntry {
            name,
            method,
            crc32,
            compressed_size: compressed as u64,
            uncompressed_size: uncompressed as u64,
            local_header_offset: offset as u64,
        });
    }
    Ok(entries)
}

impl ZipDirectory {
    /// Read the central directory of a container of `len` bytes.
    pub async fn read<R>(file: &mut R, len: u64) -> ScanResult<Self>
    where
        R: AsyncRead + AsyncSeek + Unpin,
    {
        let tail_len = len.min(MAX_TAIL_SCAN);
        if (tail_len as usize) < EOCD_LEN {
            return Err(ScanError::NotAContainer);
        }
        file.seek(SeekFrom::Start(len - tail_len)).await?;
        let mut tail = vec![0u8; tail_len as usize];
        file.read_exact(&mut tail).await?;

        let eocd = find_eocd(&tail).ok_or(ScanError::NotAContainer)?;
        let count = u16_at(&tail, eocd + 10) as usize;
        let cd_size = u32_at(&tail, eocd + 12) as u64;
        let cd_offset = u32_at(&tail, eocd + 16) as u64;
        if cd_offset + cd_size > len {
            return Err(ScanError::Corrupt(
                "central directory lies outside the file".into(),
            ));
        }

        file.seek(SeekFrom::Start(cd_offset)).await?;
        let mut cd = vec![0u8; cd_size as usize];
        file.read_exact(&mut cd).await?;
        Ok(Self {
            entries: parse_central_directory(&cd, count)?,
        })
    }

    /// Exact name match, or the first entry with a tabular extension.
    pub fn resolve(&self, name: Option<&str>) -> ScanResult<&ZipEntry> {
        match name {
            Some(n) => self
                .entries
                .iter()
                .find(|e| e.name == n)
                .ok_or_else(|| ScanError::EntryNotFound(n.to_string())),
            None => self
                .entries
                .iter()
                .find(|e| e.is_tabular())
                .ok_or_else(|| ScanError::EntryNotFound("(first tabular entry)".into())),
        }
    }
}

/// Seek past the entry's local header and hand back its compressed bytes.
pub async fn open_entry(mut file: File, entry: &ZipEntry) -> ScanResult<Take<File>> {
    entry.compression()?;
    file.seek(SeekFrom::Start(entry.local_header_offset)).await?;
    let mut header = [0u8; LOCAL_HEADER_LEN];
    file.read_exact(&mut header).await?;
    if u32_at(&header, 0) != LOCAL_HEADER_SIGNATURE {
        return Err(ScanError::Corrupt(format!(
            "bad local header signature for {}",
            entry.name
        )));
    }
    let name_len = u16_at(&header, 26) as u64;
    let extra_len = u16_at(&header, 28) as u64;
    let data_start = entry.local_header_offset + LOCAL_HEADER_LEN as u64 + name_len + extra_len;
    file.seek(SeekFrom::Start(data_start)).await?;
    Ok(file.take(entry.compressed_size))
}

/// Checks CRC-32 and length of the decompressed entry when the stream ends.
pub struct VerifiedEntry<R> {
    inner: R,
    hasher: Crc32,
    seen: u64,
    expected_crc: u32,
    expected_len: u64,
    done: bool,
}

impl<R> VerifiedEntry<R> {
    pub fn new(inner: R, entry: &ZipEntry) -> Self {
        Self {
            inner,
            hasher: Crc32::new(),
            seen: 0,
            expected_crc: entry.crc32,
            expected_len: entry.uncompressed_size,
            done: false,
        }
    }

    fn verify(&mut self) -> std::io::Result<()> {
        self.done = true;
        if self.seen != self.expected_len {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!(
                    "zip entry length mismatch: expected {} bytes, got {}",
                    self.expected_len, self.seen
                ),
            ));
        }
        let crc = std::mem::take(&mut self.hasher).finalize();
        if crc != self.expected_crc {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!(
                    "zip entry crc mismatch: expected {:08x}, got {crc:08x}",
                    self.expected_crc
                ),
            ));
        }
        Ok(())
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for VerifiedEntry<R> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let before = buf.filled().len();
        match Pin::new(&mut self.inner).poll_read(cx, buf) {
            Poll::Ready(Ok(())) => {
                let fresh = &buf.filled()[before..];
                if fresh.is_empty() {
                    if buf.remaining() > 0 && !self.done {
                        return Poll::Ready(self.verify());
                    }
                } else {
                    let n = fresh.len() as u64;
                    self.hasher.update(fresh);
                    self.seen += n;
                }
                Poll::Ready(Ok(()))
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn central_record(name: &str, method: u16, size: u32, offset: u32) -> Vec<u8> {
        let mut rec = Vec::new();
        rec.extend_from_slice(&CENTRAL_HEADER_SIGNATURE.to_le_bytes());
        rec.extend_from_slice(&[20, 0, 20, 0, 0, 0]);
        rec.extend_from_slice(&method.to_le_bytes());
        rec.extend_from_slice(&[0, 0, 0, 0]);
        rec.extend_from_slice(&0u32.to_le_bytes());
        rec.extend_from_slice(&size.to_le_bytes());
        rec.extend_from_slice(&size.to_le_bytes());
        rec.extend_from_slice(&(name.len() as u16).to_le_bytes());
        rec.extend_from_slice(&[0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0]);
        rec.extend_from_slice(&offset.to_le_bytes());
        rec.extend_from_slice(name.as_bytes());
        rec
    }

    #[test]
    fn eocd_found_behind_comment() {
        let mut tail = vec![0u8; 10];
        tail.extend_from_slice(&EOCD_SIGNATURE.to_le_bytes());
        tail.extend_from_slice(&[0u8; 18]);
        tail.extend_from_slice(b"trailing comment");
        assert_eq!(find_eocd(&tail), Some(10));
        assert_eq!(find_eocd(&[0u8; 40]), None);
    }

    #[test]
    fn directory_skips_artifacts() {
        let mut cd = Vec::new();
        cd.extend(central_record("data/", 0, 0, 0));
        cd.extend(central_record("__MACOSX/data/._model.csv", 8, 10, 0));
        cd.extend(central_record("readme.md", 0, 5, 0));
        cd.extend(central_record("data/model.csv", 8, 100, 64));
        let entries = parse_central_directory(&cd, 4).unwrap();
        let names: Vec<_> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["readme.md", "data/model.csv"]);

        let dir = ZipDirectory { entries };
        assert_eq!(dir.resolve(None).unwrap().name, "data/model.csv");
        assert_eq!(dir.resolve(Some("readme.md")).unwrap().method, 0);
        assert!(matches!(
            dir.resolve(Some("missing.csv")),
            Err(ScanError::EntryNotFound(_))
        ));
    }

    #[test]
    fn unsupported_method_is_rejected() {
        let cd = central_record("model.csv", 12, 10, 0);
        let entries = parse_central_directory(&cd, 1).unwrap();
        assert!(matches!(
            entries[0].compression(),
            Err(ScanError::UnsupportedCompression(12))
        ));
    }

    #[test]
    fn truncated_directory_is_corrupt() {
        let cd = central_record("model.csv", 0, 10, 0);
        assert!(matches!(
            parse_central_directory(&cd[..20], 1),
            Err(ScanError::Corrupt(_))
        ));
    }
}
