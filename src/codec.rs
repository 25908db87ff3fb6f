use bytes::{Buf, BytesMut};
use std::io;
use tokio_util::codec::Decoder;

/// Frames an arbitrary-charset byte stream into UTF-8 chunks.
///
/// Used only when the request names a charset other than UTF-8; UTF-8 input is
/// handed to the tokenizer untouched.
pub struct CharsetDecoder {
    decoder: encoding_rs::Decoder,
    finished: bool,
}

impl CharsetDecoder {
    pub fn new(encoding: &'static encoding_rs::Encoding) -> Self {
        Self {
            decoder: encoding.new_decoder(),
            finished: false,
        }
    }

    fn transcode(&mut self, src: &[u8], last: bool) -> (usize, BytesMut) {
        let capacity = if last {
            self.decoder.max_utf8_buffer_length(src.len())
        } else {
            self.decoder
                .max_utf8_buffer_length_without_replacement(src.len())
        }
        .unwrap_or(src.len() * 3 + 16);
        let mut out = vec![0u8; capacity];
        // Malformed sequences become U+FFFD; a bad byte never aborts a pass.
        let (_result, read, written, _had_errors) =
            self.decoder.decode_to_utf8(src, &mut out, last);
        out.truncate(written);
        (read, BytesMut::from(&out[..]))
    }
}

impl Decoder for CharsetDecoder {
    type Item = BytesMut;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.is_empty() {
            return Ok(None);
        }
        let (read, out) = self.transcode(src, false);
        if read == 0 && out.is_empty() {
            return Ok(None);
        }
        src.advance(read);
        Ok(Some(out))
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        // the decoder may still hold a partial sequence even with `buf` empty
        if self.finished {
            return Ok(None);
        }
        self.finished = true;
        let (_read, out) = self.transcode(buf, true);
        buf.clear();
        if out.is_empty() {
            Ok(None)
        } else {
            Ok(Some(out))
        }
    }
}
