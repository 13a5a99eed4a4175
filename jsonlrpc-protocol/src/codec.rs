//! Streaming reader and writer for concatenated JSON values.
//!
//! Values are written one per line. The reader does not rely on newlines: it
//! frames whatever sequence of whitespace-separated JSON values arrives.

use crate::error::CodecError;
use crate::MAX_VALUE_SIZE;
use bytes::{Buf, BytesMut};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::value::RawValue;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Bytes requested from the underlying reader per read call.
const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Encodes a value as a JSON line.
///
/// serde_json never escapes `<`, `>` or `&`, so payloads are written byte for
/// byte as the serializer produces them.
pub fn encode_value<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, CodecError> {
    let mut bytes = serde_json::to_vec(value).map_err(CodecError::Encoding)?;
    bytes.push(b'\n');
    Ok(bytes)
}

/// Incremental decoder that frames complete JSON values out of a byte buffer.
///
/// The end of the next value is found with a structural scan that resumes
/// where the previous call stopped, so a value arriving over many reads is
/// scanned once and parsed once.
pub struct ValueDecoder {
    buffer: BytesMut,
    max_value_size: usize,
    scan: ScanState,
}

/// Progress through the value at the front of the buffer.
#[derive(Debug, Default)]
struct ScanState {
    /// Bytes of the current value already examined.
    pos: usize,
    depth: usize,
    in_string: bool,
    escaped: bool,
}

impl ValueDecoder {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(READ_CHUNK_SIZE),
            max_value_size: MAX_VALUE_SIZE,
            scan: ScanState::default(),
        }
    }

    pub fn with_max_value_size(mut self, max: usize) -> Self {
        self.max_value_size = max;
        self
    }

    /// Appends data to the internal buffer.
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Returns the number of bytes currently buffered.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Attempts to take the next complete JSON value from the buffer.
    ///
    /// Returns `Ok(None)` when more input is needed. `eof` tells the decoder
    /// that no more input will arrive: a trailing number is then accepted,
    /// and an empty or partial buffer becomes an error.
    pub fn decode_raw(&mut self, eof: bool) -> Result<Option<Box<RawValue>>, CodecError> {
        if self.scan.pos == 0 {
            let skip = self
                .buffer
                .iter()
                .take_while(|b| is_whitespace(**b))
                .count();
            self.buffer.advance(skip);
            if self.buffer.is_empty() {
                return if eof {
                    Err(CodecError::ConnectionClosed)
                } else {
                    Ok(None)
                };
            }
        }

        match self.find_end(eof) {
            Some(end) => {
                let value = self.buffer.split_to(end);
                self.scan = ScanState::default();
                serde_json::from_slice(&value).map(Some).map_err(|e| {
                    if e.is_eof() {
                        CodecError::UnexpectedEof
                    } else {
                        CodecError::Decoding(e)
                    }
                })
            }
            None if eof => Err(CodecError::UnexpectedEof),
            None if self.buffer.len() > self.max_value_size => Err(CodecError::ValueTooLarge {
                size: self.buffer.len(),
                max: self.max_value_size,
            }),
            None => Ok(None),
        }
    }

    /// Returns the length of the value at the front of the buffer, or `None`
    /// if it is not complete yet. The buffer must start with a non-whitespace
    /// byte.
    fn find_end(&mut self, eof: bool) -> Option<usize> {
        let bytes = &self.buffer[..];
        let scan = &mut self.scan;

        match bytes[0] {
            b'{' | b'[' | b'"' => {
                let mut i = scan.pos;
                while i < bytes.len() {
                    let b = bytes[i];
                    i += 1;
                    if scan.in_string {
                        if scan.escaped {
                            scan.escaped = false;
                        } else if b == b'\\' {
                            scan.escaped = true;
                        } else if b == b'"' {
                            scan.in_string = false;
                            if scan.depth == 0 {
                                return Some(i);
                            }
                        }
                        continue;
                    }
                    match b {
                        b'"' => scan.in_string = true,
                        b'{' | b'[' => scan.depth += 1,
                        b'}' | b']' => {
                            scan.depth = scan.depth.saturating_sub(1);
                            if scan.depth == 0 {
                                return Some(i);
                            }
                        }
                        _ => {}
                    }
                }
                scan.pos = i;
                None
            }
            // Stray structural byte; let the parser report it.
            b'}' | b']' | b',' | b':' => Some(1),
            _ => {
                // Numbers need a delimiter to be known complete. Literals do not.
                match bytes[scan.pos..].iter().position(|b| is_delimiter(*b)) {
                    Some(n) => Some(scan.pos + n),
                    None if eof || matches!(bytes, b"true" | b"false" | b"null") => {
                        Some(bytes.len())
                    }
                    None => {
                        scan.pos = bytes.len();
                        None
                    }
                }
            }
        }
    }

    fn buffer_mut(&mut self) -> &mut BytesMut {
        &mut self.buffer
    }
}

impl Default for ValueDecoder {
    fn default() -> Self {
        Self::new()
    }
}

fn is_whitespace(b: u8) -> bool {
    matches!(b, b' ' | b'\t' | b'\n' | b'\r')
}

fn is_delimiter(b: u8) -> bool {
    is_whitespace(b) || matches!(b, b'{' | b'}' | b'[' | b']' | b',' | b':' | b'"')
}

/// Reads JSON values one at a time from an async byte stream.
///
/// After any error the reader is poisoned: framing can no longer be trusted
/// and every later read fails.
pub struct ValueReader<R> {
    inner: R,
    decoder: ValueDecoder,
    eof: bool,
    poisoned: bool,
}

impl<R: AsyncRead + Unpin> ValueReader<R> {
    pub fn new(inner: R) -> Self {
        Self::with_decoder(inner, ValueDecoder::new())
    }

    pub fn with_decoder(inner: R, decoder: ValueDecoder) -> Self {
        Self {
            inner,
            decoder,
            eof: false,
            poisoned: false,
        }
    }

    /// Reads the next complete JSON value without interpreting it.
    pub async fn next_raw(&mut self) -> Result<Box<RawValue>, CodecError> {
        if self.poisoned {
            return Err(CodecError::Protocol(
                "stream framing lost after a previous error".to_string(),
            ));
        }
        let result = self.fill_next().await;
        if result.is_err() {
            self.poisoned = true;
        }
        result
    }

    /// Reads the next JSON value and deserializes it into `T`.
    ///
    /// A value that is valid JSON but does not fit `T` has still been
    /// consumed, so the stream stays framed.
    pub async fn next<T: DeserializeOwned>(&mut self) -> Result<T, CodecError> {
        let raw = self.next_raw().await?;
        serde_json::from_str(raw.get()).map_err(|source| CodecError::TypeMismatch {
            expected: std::any::type_name::<T>(),
            source,
        })
    }

    async fn fill_next(&mut self) -> Result<Box<RawValue>, CodecError> {
        loop {
            if let Some(raw) = self.decoder.decode_raw(self.eof)? {
                return Ok(raw);
            }
            let buffer = self.decoder.buffer_mut();
            buffer.reserve(READ_CHUNK_SIZE);
            let n = self.inner.read_buf(buffer).await?;
            if n == 0 {
                self.eof = true;
            }
        }
    }

    /// Returns the number of bytes read but not yet decoded.
    pub fn buffered(&self) -> usize {
        self.decoder.buffered()
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    pub fn get_ref(&self) -> &R {
        &self.inner
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

/// Writes JSON values, one per line, to an async byte stream.
///
/// Values can be staged with [`push`](Self::push) and written together with
/// [`send`](Self::send), so a header and its body leave in a single write.
pub struct ValueWriter<W> {
    inner: W,
    pending: Vec<u8>,
}

impl<W: AsyncWrite + Unpin> ValueWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            pending: Vec::with_capacity(READ_CHUNK_SIZE),
        }
    }

    /// Serializes `value` into the pending buffer.
    ///
    /// On failure nothing is staged.
    pub fn push<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), CodecError> {
        let mark = self.pending.len();
        if let Err(e) = serde_json::to_writer(&mut self.pending, value) {
            self.pending.truncate(mark);
            return Err(CodecError::Encoding(e));
        }
        self.pending.push(b'\n');
        Ok(())
    }

    /// Writes and flushes everything staged so far.
    pub async fn send(&mut self) -> Result<(), CodecError> {
        if !self.pending.is_empty() {
            let result = self.inner.write_all(&self.pending).await;
            self.pending.clear();
            result?;
        }
        self.inner.flush().await?;
        Ok(())
    }

    /// Serializes and writes a single value.
    pub async fn write_value<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), CodecError> {
        self.push(value)?;
        self.send().await
    }

    /// Drops everything staged but not yet written.
    pub fn discard(&mut self) {
        self.pending.clear();
    }

    /// Returns the number of staged bytes not yet written.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Shuts down the write direction of the stream.
    pub async fn shutdown(&mut self) -> Result<(), CodecError> {
        self.pending.clear();
        self.inner.shutdown().await?;
        Ok(())
    }

    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}
