use crate::codec::CharsetDecoder;
use crate::zip::{self, VerifiedEntry, ZipDirectory};
use crate::{ScanError, ScanResult};
use async_compression::tokio::bufread::{DeflateDecoder, GzipDecoder, ZstdDecoder};
use std::io::SeekFrom;
use std::path::Path;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeekExt, BufReader, ReadBuf};
use tokio_util::codec::FramedRead;
use tokio_util::io::StreamReader;

/// Compression applied to the raw bytes before they reach the tokenizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    None,
    Gzip,
    Zstd,
    /// Raw deflate, as stored in ZIP method 8.
    Deflate,
}

#[derive(Debug, Clone)]
pub struct SourceMeta {
    /// File name, or `archive.zip!entry.csv` for ZIP entries
    pub name_hint: String,
    pub compression: Compression,
    /// Which character encoding to expect (defaults to UTF-8)
    pub charset: &'static encoding_rs::Encoding,
}

/// Shared count of raw (pre-decompression) bytes pulled from the file.
#[derive(Debug, Clone, Default)]
pub struct ByteCounter(Arc<AtomicU64>);

impl ByteCounter {
    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }

    fn add(&self, n: u64) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }
}

struct CountingReader<R> {
    inner: R,
    counter: ByteCounter,
}

impl<R: AsyncRead + Unpin> AsyncRead for CountingReader<R> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let before = buf.filled().len();
        let poll = Pin::new(&mut self.inner).poll_read(cx, buf);
        if let Poll::Ready(Ok(())) = poll {
            self.counter.add((buf.filled().len() - before) as u64);
        }
        poll
    }
}

/// An opened input, positioned at the first byte of delimited text.
pub struct Source {
    pub reader: BoxedRead,
    pub meta: SourceMeta,
    /// Raw bytes consumed so far
    pub progress: ByteCounter,
    /// Raw bytes the pass will consume in total, when known
    pub total_bytes: Option<u64>,
}

type BoxedRead = Box<dyn AsyncRead + Unpin + Send>;

fn decompress<R>(raw: R, compression: Compression) -> BoxedRead
where
    R: AsyncRead + Unpin + Send + 'static,
{
    // 1 MiB
    let buf = BufReader::with_capacity(1 << 20, raw);
    match compression {
        Compression::Gzip => Box::new(GzipDecoder::new(buf)),
        Compression::Zstd => Box::new(ZstdDecoder::new(buf)),
        Compression::Deflate => Box::new(DeflateDecoder::new(buf)),
        Compression::None => Box::new(buf),
    }
}

fn transcode<R>(reader: R, charset: &'static encoding_rs::Encoding) -> BoxedRead
where
    R: AsyncRead + Unpin + Send + 'static,
{
    // UTF-8 passes through untouched
    if charset == encoding_rs::UTF_8 {
        Box::new(reader)
    } else {
        let framed = FramedRead::new(reader, CharsetDecoder::new(charset));
        Box::new(StreamReader::new(framed))
    }
}

/// Wrap a raw reader with decompression and UTF-8 transcoding.
pub fn build_reader<R>(raw: R, meta: &SourceMeta) -> BoxedRead
where
    R: AsyncRead + Unpin + Send + 'static,
{
    transcode(decompress(raw, meta.compression), meta.charset)
}

fn charset_for(label: Option<&str>) -> ScanResult<&'static encoding_rs::Encoding> {
    match label {
        None => Ok(encoding_rs::UTF_8),
        Some(l) => encoding_rs::Encoding::for_label(l.trim().as_bytes())
            .ok_or_else(|| ScanError::UnknownCharset(l.to_string())),
    }
}

fn compression_from_name(name: &str) -> Compression {
    let lower = name.to_ascii_lowercase();
    if lower.ends_with(".gz") {
        Compression::Gzip
    } else if lower.ends_with(".zst") {
        Compression::Zstd
    } else {
        Compression::None
    }
}

/// Open `path` for one streaming pass.
///
/// A file is treated as a ZIP container when it starts with a local file header
/// signature or when `zip_entry` is given; otherwise the extension picks
/// gzip / zstd / plain.
pub async fn open_source(
    path: &Path,
    zip_entry: Option<&str>,
    charset: Option<&str>,
) -> ScanResult<Source> {
    let charset = charset_for(charset)?;
    let mut file = File::open(path).await?;
    let len = file.metadata().await?.len();
    let name = path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_string();

    let mut magic = [0u8; 4];
    let is_zip = if len >= 4 {
        file.read_exact(&mut magic).await?;
        file.seek(SeekFrom::Start(0)).await?;
        u32::from_le_bytes(magic) == zip::LOCAL_HEADER_SIGNATURE
    } else {
        false
    };

    let counter = ByteCounter::default();
    if is_zip || zip_entry.is_some() {
        let directory = ZipDirectory::read(&mut file, len).await?;
        let entry = directory.resolve(zip_entry)?.clone();
        let compression = entry.compression()?;
        let raw = zip::open_entry(file, &entry).await?;
        let meta = SourceMeta {
            name_hint: format!("{}!{}", name, entry.name),
            compression,
            charset,
        };
        let counted = CountingReader {
            inner: raw,
            counter: counter.clone(),
        };
        let verified = VerifiedEntry::new(decompress(counted, compression), &entry);
        let reader = transcode(verified, charset);
        return Ok(Source {
            reader,
            meta,
            progress: counter,
            total_bytes: Some(entry.compressed_size),
        });
    }

    let meta = SourceMeta {
        compression: compression_from_name(&name),
        name_hint: name,
        charset,
    };
    let counted = CountingReader {
        inner: file,
        counter: counter.clone(),
    };
    Ok(Source {
        reader: build_reader(counted, &meta),
        meta,
        progress: counter,
        total_bytes: Some(len),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compression_follows_extension() {
        assert_eq!(compression_from_name("model.csv.gz"), Compression::Gzip);
        assert_eq!(compression_from_name("MODEL.CSV.ZST"), Compression::Zstd);
        assert_eq!(compression_from_name("model.csv"), Compression::None);
    }

    #[test]
    fn charset_labels_resolve() {
        assert_eq!(charset_for(None).unwrap(), encoding_rs::UTF_8);
        assert_eq!(
            charset_for(Some("latin1")).unwrap(),
            encoding_rs::WINDOWS_1252
        );
        assert!(matches!(
            charset_for(Some("klingon")),
            Err(ScanError::UnknownCharset(_))
        ));
    }

    #[tokio::test]
    async fn counting_reader_tracks_bytes() {
        let counter = ByteCounter::default();
        let mut r = CountingReader {
            inner: &b"abcdef"[..],
            counter: counter.clone(),
        };
        let mut out = Vec::new();
        r.read_to_end(&mut out).await.unwrap();
        assert_eq!(counter.get(), 6);
    }
}
