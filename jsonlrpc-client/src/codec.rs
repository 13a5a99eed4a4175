//! Client role of the wire codec.

use jsonlrpc_protocol::{
    drain_rows, ClientReply, CodecError, ReplyBody, RequestHeader, ResponseHeader, ValueDecoder,
    ValueReader, ValueWriter,
};
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};

/// Writes requests and reads responses on one byte stream.
///
/// Reads must happen in order: header, body, then rows when the body says
/// so. [`read_response_body`](Self::read_response_body) drains the rows
/// itself, so the next header is always the next value on the wire.
pub struct ClientCodec<R, W> {
    reader: ValueReader<R>,
    writer: ValueWriter<W>,
    closed: bool,
}

impl<S> ClientCodec<ReadHalf<S>, WriteHalf<S>>
where
    S: AsyncRead + AsyncWrite,
{
    /// Splits `stream` into independent read and write directions.
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

impl<R, W> ClientCodec<R, W>
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

    /// Writes the request header followed by `params` as two JSON values.
    ///
    /// A value that cannot be serialized fails before anything is written. A
    /// failed write leaves the stream in an unknown state.
    pub async fn write_request<P>(
        &mut self,
        header: &RequestHeader,
        params: &P,
    ) -> Result<(), CodecError>
    where
        P: Serialize + ?Sized,
    {
        self.writer.push(header)?;
        if let Err(e) = self.writer.push(params) {
            self.writer.discard();
            return Err(e);
        }
        tracing::debug!(
            "Sending request {} (seq={}, {} bytes)",
            header.service_method,
            header.seq,
            self.writer.pending()
        );
        self.writer.send().await
    }

    /// Reads the next response header.
    pub async fn read_response_header(&mut self) -> Result<ResponseHeader, CodecError> {
        let raw = self.reader.next_raw().await?;
        serde_json::from_str(raw.get())
            .map_err(|e| CodecError::Protocol(format!("malformed response header: {}", e)))
    }

    /// Reads the reply body into `target`, then drains any rows that follow.
    ///
    /// Rows are forwarded to `target.rows` in arrival order; the sink is
    /// dropped before returning. Without a target the body and its rows are
    /// consumed and discarded and [`CodecError::MissingTarget`] is returned.
    pub async fn read_response_body(
        &mut self,
        target: Option<&mut ClientReply>,
    ) -> Result<(), CodecError> {
        let raw = self.reader.next_raw().await?;
        let body: ReplyBody = serde_json::from_str(raw.get())
            .map_err(|e| CodecError::Protocol(format!("malformed reply body: {}", e)))?;
        let has_rows = body.has_rows;

        let Some(target) = target else {
            if has_rows {
                drain_rows(&mut self.reader, None).await?;
            }
            return Err(CodecError::MissingTarget);
        };

        target.apply_body(body);
        let sink = target.rows.take();
        if has_rows {
            target.rows_received = drain_rows(&mut self.reader, sink).await?;
        }
        Ok(())
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

#[cfg(test)]
mod tests {
    use super::*;
    use jsonlrpc_protocol::{ServerReply, RowSource};
    use serde_json::{json, Value};
    use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
    use tokio::sync::mpsc;

    fn codec_pair() -> (ClientCodec<ReadHalf<DuplexStream>, WriteHalf<DuplexStream>>, DuplexStream) {
        let (client, server) = tokio::io::duplex(4096);
        (ClientCodec::new(client), server)
    }

    #[tokio::test]
    async fn test_write_request_wire_format() {
        let (mut codec, mut server) = codec_pair();
        codec
            .write_request(&RequestHeader::new("Calc.Add", 1), &json!({"a": 2, "b": 3}))
            .await
            .unwrap();
        codec.close().await.unwrap();

        let mut wire = String::new();
        server.read_to_string(&mut wire).await.unwrap();
        assert_eq!(
            wire,
            "{\"ServiceMethod\":\"Calc.Add\",\"Seq\":1}\n{\"a\":2,\"b\":3}\n"
        );
    }

    #[tokio::test]
    async fn test_write_request_unserializable_params_writes_nothing() {
        use std::collections::HashMap;

        let (mut codec, mut server) = codec_pair();
        let mut params = HashMap::new();
        params.insert((1, 2), "tuple keys are not JSON");

        let err = codec
            .write_request(&RequestHeader::new("Bad.Params", 1), &params)
            .await
            .unwrap_err();
        assert!(matches!(err, CodecError::Encoding(_)));

        codec.close().await.unwrap();
        let mut wire = Vec::new();
        server.read_to_end(&mut wire).await.unwrap();
        assert!(wire.is_empty());
    }

    #[tokio::test]
    async fn test_read_plain_response() {
        let (mut codec, mut server) = codec_pair();
        server
            .write_all(
                b"{\"ServiceMethod\":\"Calc.Add\",\"Seq\":1,\"Error\":\"\"}\n\
                  {\"code\":0,\"msg\":\"\",\"has-jsonls\":false,\"result\":5}\n",
            )
            .await
            .unwrap();

        let header = codec.read_response_header().await.unwrap();
        assert_eq!(header.service_method, "Calc.Add");
        assert_eq!(header.seq, 1);
        assert!(!header.is_error());

        let mut reply = ClientReply::new();
        codec.read_response_body(Some(&mut reply)).await.unwrap();
        assert_eq!(reply.result_as::<i64>().unwrap(), 5);
        assert!(!reply.status.has_rows);
        assert_eq!(reply.rows_received, 0);
    }

    #[tokio::test]
    async fn test_plain_response_consumes_nothing_beyond_body() {
        let (mut codec, mut server) = codec_pair();
        server
            .write_all(b"{\"Seq\":1}\n{\"result\":1}\n{\"Seq\":2}\n")
            .await
            .unwrap();

        codec.read_response_header().await.unwrap();
        let mut reply = ClientReply::new();
        codec.read_response_body(Some(&mut reply)).await.unwrap();

        let next = codec.read_response_header().await.unwrap();
        assert_eq!(next.seq, 2);
    }

    #[tokio::test]
    async fn test_streamed_rows_reach_sink_in_order() {
        let (mut codec, server) = codec_pair();
        let mut server_writer = ValueWriter::new(server);

        let mut reply = ServerReply::ok(json!({"table": "t"}))
            .with_rows(RowSource::from_rows(vec![json!({"id": 1}), json!({"id": 2})]));
        server_writer
            .push(&ResponseHeader::for_request(&RequestHeader::new("Db.Query", 3)))
            .unwrap();
        server_writer.push(&reply).unwrap();
        server_writer.send().await.unwrap();
        jsonlrpc_protocol::emit_rows(&mut server_writer, reply.rows.as_mut())
            .await
            .unwrap();

        let (tx, mut rx) = mpsc::channel(8);
        let mut target = ClientReply::new().with_rows(tx);
        codec.read_response_header().await.unwrap();
        codec.read_response_body(Some(&mut target)).await.unwrap();

        assert!(target.status.has_rows);
        assert_eq!(target.rows_received, 2);
        assert!(target.rows.is_none());
        let mut rows = Vec::new();
        while let Some(row) = rx.recv().await {
            rows.push(row);
        }
        assert_eq!(rows, vec![json!({"id": 1}), json!({"id": 2})]);
    }

    #[tokio::test]
    async fn test_truncated_rows_surface_error() {
        let (mut codec, mut server) = codec_pair();
        server
            .write_all(b"{\"Seq\":1}\n{\"has-jsonls\":true,\"result\":null}\n{\"id\":1}\n{\"id\":")
            .await
            .unwrap();
        drop(server);

        let (tx, mut rx) = mpsc::channel(8);
        let mut target = ClientReply::new().with_rows(tx);
        codec.read_response_header().await.unwrap();
        let err = codec
            .read_response_body(Some(&mut target))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CodecError::StreamTruncated {
                rows_delivered: 1,
                ..
            }
        ));
        assert_eq!(rx.recv().await, Some(json!({"id": 1})));
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn test_missing_target_keeps_framing() {
        let (mut codec, mut server) = codec_pair();
        server
            .write_all(b"{\"Seq\":1}\n{\"has-jsonls\":true}\n1\n2\nnull\n{\"Seq\":2}\n")
            .await
            .unwrap();

        codec.read_response_header().await.unwrap();
        let err = codec.read_response_body(None).await.unwrap_err();
        assert!(matches!(err, CodecError::MissingTarget));
        assert_eq!(codec.read_response_header().await.unwrap().seq, 2);
    }

    #[tokio::test]
    async fn test_malformed_body_is_protocol_error() {
        let (mut codec, mut server) = codec_pair();
        server.write_all(b"{\"Seq\":1}\n\"oops\"\n").await.unwrap();

        codec.read_response_header().await.unwrap();
        let mut reply = ClientReply::new();
        let err = codec.read_response_body(Some(&mut reply)).await.unwrap_err();
        assert!(matches!(err, CodecError::Protocol(_)));
        assert!(err.is_connection_fatal());
    }

    #[tokio::test]
    async fn test_header_on_closed_stream() {
        let (mut codec, server) = codec_pair();
        drop(server);
        let err = codec.read_response_header().await.unwrap_err();
        assert!(err.is_decoding());
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (mut codec, _server) = codec_pair();
        codec.close().await.unwrap();
        codec.close().await.unwrap();
        assert!(codec.is_closed());
    }

    #[tokio::test]
    async fn test_result_bytes_preserved() {
        let (mut codec, mut server) = codec_pair();
        server
            .write_all(b"{\"Seq\":1}\n{\"result\":{\"z\":1,\"a\":\"<&>\"}}\n")
            .await
            .unwrap();

        codec.read_response_header().await.unwrap();
        let mut reply = ClientReply::new();
        codec.read_response_body(Some(&mut reply)).await.unwrap();
        assert_eq!(reply.raw_result(), Some("{\"z\":1,\"a\":\"<&>\"}"));
        let value: Value = reply.result_as().unwrap();
        assert_eq!(value["a"], "<&>");
    }
}
