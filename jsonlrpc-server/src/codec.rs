//! Server role of the wire codec.

use jsonlrpc_protocol::{
    emit_rows, CodecError, RequestHeader, ResponseHeader, ServerReply, ValueDecoder, ValueReader,
    ValueWriter,
};
use serde::de::DeserializeOwned;
use serde_json::value::RawValue;
use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};

/// Reads requests and writes responses on one byte stream.
pub struct ServerCodec<R, W> {
    reader: ValueReader<R>,
    writer: ValueWriter<W>,
    closed: bool,
}

impl<S> ServerCodec<ReadHalf<S>, WriteHalf<S>>
where
    S: AsyncRead + AsyncWrite,
{
    pub fn new(stream: S) -> Self {
        Self::with_decoder(stream, ValueDecoder::new())
    }

    pub fn with_decoder(stream: S, decoder: ValueDecoder) -> Self {
        let (read_half, write_half) = tokio::io::split(stream);
        Self::from_parts(
            ValueReader::with_decoder(read_half, decoder),
            ValueWriter::new(write_half),
        )
    }
}

impl<R, W> ServerCodec<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn from_parts(reader: ValueReader<R>, writer: ValueWriter<W>) -> Self {
        Self {
            reader,
            writer,
            closed: false,
        }
    }

    /// Reads the next request header.
    ///
    /// [`CodecError::ConnectionClosed`] here means the client hung up
    /// cleanly between requests.
    pub async fn read_request_header(&mut self) -> Result<RequestHeader, CodecError> {
        let raw = self.reader.next_raw().await?;
        serde_json::from_str(raw.get())
            .map_err(|e| CodecError::Protocol(format!("malformed request header: {}", e)))
    }

    /// Reads the request body into `T`.
    ///
    /// A body that does not fit `T` yields [`CodecError::TypeMismatch`]; it
    /// has been consumed, so the next header can still be read.
    pub async fn read_request_body<T: DeserializeOwned>(&mut self) -> Result<T, CodecError> {
        self.reader.next().await
    }

    /// Reads the request body without interpreting it.
    pub async fn read_request_body_raw(&mut self) -> Result<Box<RawValue>, CodecError> {
        self.reader.next_raw().await
    }

    /// Consumes the request body and throws it away.
    pub async fn skip_request_body(&mut self) -> Result<(), CodecError> {
        self.reader.next_raw().await.map(drop)
    }

    /// Writes the response header and reply body, then any rows.
    ///
    /// The `has-jsonls` flag written on the wire always matches whether rows
    /// follow. Returns the number of rows emitted. A failure while emitting
    /// rows leaves the client with a truncated stream; the connection should
    /// be closed.
    pub async fn write_response(
        &mut self,
        header: &ResponseHeader,
        reply: &mut ServerReply,
    ) -> Result<u64, CodecError> {
        reply.status.has_rows = reply.has_rows();

        self.writer.push(header)?;
        if let Err(e) = self.writer.push(&*reply) {
            self.writer.discard();
            return Err(e);
        }
        tracing::debug!(
            "Sending response {} (seq={}, {} bytes, rows={})",
            header.service_method,
            header.seq,
            self.writer.pending(),
            reply.status.has_rows
        );
        self.writer.send().await?;

        if !reply.status.has_rows {
            return Ok(0);
        }
        emit_rows(&mut self.writer, reply.rows.as_mut()).await
    }

    /// Shuts down the write direction. Calling it again is a no-op.
    pub async fn close(&mut self) -> Result<(), CodecError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.writer.shutdown().await
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}
