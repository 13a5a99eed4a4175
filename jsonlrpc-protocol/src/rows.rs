//! Result rows streamed after a reply body.
//!
//! When a reply has `has-jsonls` set, the body is followed on the same stream
//! by zero or more row values and a single `null` sentinel. The writer emits
//! rows as its source yields them; the reader drains them into a sink before
//! control returns to the caller, so the next header is never read while rows
//! are still on the wire.

use crate::codec::{ValueReader, ValueWriter};
use crate::error::CodecError;
use serde_json::Value;
use std::fmt;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;

/// One streamed result row.
pub type Row = Value;

/// Client-side destination for drained rows.
///
/// The drain loop awaits each send, so a bounded channel applies
/// backpressure to the connection. Rows must be consumed by another task.
pub type RowSink = mpsc::Sender<Row>;

/// Server-side lazy row sequence.
pub enum RowSource {
    Iter(Box<dyn Iterator<Item = Row> + Send>),
    Channel(mpsc::Receiver<Row>),
}

impl RowSource {
    /// Wraps an iterator. Rows are pulled one at a time while writing.
    pub fn from_rows<I>(rows: I) -> Self
    where
        I: IntoIterator<Item = Row>,
        I::IntoIter: Send + 'static,
    {
        RowSource::Iter(Box::new(rows.into_iter()))
    }

    /// Creates a channel-backed source fed by a producer task.
    ///
    /// The sequence ends when every sender has been dropped.
    pub fn channel(capacity: usize) -> (mpsc::Sender<Row>, Self) {
        let (tx, rx) = mpsc::channel(capacity);
        (tx, RowSource::Channel(rx))
    }

    /// Returns the next row, or `None` once the sequence is exhausted.
    pub async fn next(&mut self) -> Option<Row> {
        match self {
            RowSource::Iter(iter) => iter.next(),
            RowSource::Channel(rx) => rx.recv().await,
        }
    }
}

impl fmt::Debug for RowSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RowSource::Iter(_) => f.write_str("RowSource::Iter"),
            RowSource::Channel(_) => f.write_str("RowSource::Channel"),
        }
    }
}

/// Writes every row from `source` followed by the `null` sentinel.
///
/// Stops at the first write failure; the sentinel is then not sent and the
/// peer sees a truncated stream.
pub async fn emit_rows<W>(
    writer: &mut ValueWriter<W>,
    source: Option<&mut RowSource>,
) -> Result<u64, CodecError>
where
    W: AsyncWrite + Unpin,
{
    let mut emitted = 0u64;
    if let Some(source) = source {
        while let Some(row) = source.next().await {
            // A null row would read as the sentinel.
            if row.is_null() {
                return Err(CodecError::Protocol(format!(
                    "row {} is null, which is reserved for the end-of-rows sentinel",
                    emitted
                )));
            }
            writer.write_value(&row).await?;
            emitted += 1;
        }
    }
    writer.write_value(&Value::Null).await?;
    tracing::debug!("Emitted {} row(s) and sentinel", emitted);
    Ok(emitted)
}

/// Reads rows until the `null` sentinel, forwarding each one to `sink`.
///
/// Rows are still read and discarded when there is no sink or its receiver
/// has gone away. Any read failure ends the drain with
/// [`CodecError::StreamTruncated`]; rows before it have been delivered.
pub async fn drain_rows<R>(
    reader: &mut ValueReader<R>,
    mut sink: Option<RowSink>,
) -> Result<u64, CodecError>
where
    R: AsyncRead + Unpin,
{
    let mut delivered = 0u64;
    loop {
        let raw = match reader.next_raw().await {
            Ok(raw) => raw,
            Err(source) => {
                tracing::debug!("Row stream truncated after {} row(s): {}", delivered, source);
                return Err(CodecError::StreamTruncated {
                    rows_delivered: delivered,
                    source: Box::new(source),
                });
            }
        };
        if raw.get() == "null" {
            tracing::debug!("Drained {} row(s)", delivered);
            return Ok(delivered);
        }

        let row: Row = match serde_json::from_str(raw.get()) {
            Ok(row) => row,
            Err(e) => {
                return Err(CodecError::StreamTruncated {
                    rows_delivered: delivered,
                    source: Box::new(CodecError::Decoding(e)),
                })
            }
        };

        if let Some(tx) = &sink {
            if tx.send(row).await.is_err() {
                tracing::warn!("Row receiver dropped; discarding remaining rows");
                sink = None;
            }
        }
        delivered += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn collect(mut rx: mpsc::Receiver<Row>) -> Vec<Row> {
        let mut rows = Vec::new();
        while let Some(row) = rx.recv().await {
            rows.push(row);
        }
        rows
    }

    #[tokio::test]
    async fn test_emit_rows_wire_format() {
        let mut writer = ValueWriter::new(Vec::new());
        let mut source = RowSource::from_rows(vec![json!({"id": 1}), json!({"id": 2})]);

        let emitted = emit_rows(&mut writer, Some(&mut source)).await.unwrap();
        assert_eq!(emitted, 2);
        assert_eq!(
            writer.get_ref().as_slice(),
            b"{\"id\":1}\n{\"id\":2}\nnull\n"
        );
    }

    #[tokio::test]
    async fn test_emit_rows_without_source_sends_sentinel() {
        let mut writer = ValueWriter::new(Vec::new());
        assert_eq!(emit_rows(&mut writer, None).await.unwrap(), 0);
        assert_eq!(writer.get_ref().as_slice(), b"null\n");
    }

    #[tokio::test]
    async fn test_emit_rows_rejects_null_row() {
        let mut writer = ValueWriter::new(Vec::new());
        let mut source = RowSource::from_rows(vec![json!(1), Value::Null, json!(3)]);

        let err = emit_rows(&mut writer, Some(&mut source)).await.unwrap_err();
        assert!(matches!(err, CodecError::Protocol(_)));
        assert_eq!(writer.get_ref().as_slice(), b"1\n");
    }

    #[tokio::test]
    async fn test_emit_rows_from_channel_producer() {
        let (tx, mut source) = RowSource::channel(2);
        let producer = tokio::spawn(async move {
            for id in 0..5 {
                tx.send(json!({"id": id})).await.unwrap();
            }
        });

        let mut writer = ValueWriter::new(Vec::new());
        let emitted = emit_rows(&mut writer, Some(&mut source)).await.unwrap();
        producer.await.unwrap();

        assert_eq!(emitted, 5);
        let text = String::from_utf8(writer.into_inner()).unwrap();
        assert_eq!(text.lines().count(), 6);
        assert_eq!(text.lines().last(), Some("null"));
    }

    #[tokio::test]
    async fn test_drain_rows_in_order() {
        let data: &[u8] = b"{\"id\":1}\n{\"id\":2}\nnull\n{\"next\":true}\n";
        let mut reader = ValueReader::new(data);
        let (tx, rx) = mpsc::channel(8);

        let collector = tokio::spawn(collect(rx));
        let drained = drain_rows(&mut reader, Some(tx)).await.unwrap();
        assert_eq!(drained, 2);
        assert_eq!(
            collector.await.unwrap(),
            vec![json!({"id": 1}), json!({"id": 2})]
        );

        // Nothing past the sentinel was consumed as a row.
        let next: Value = reader.next().await.unwrap();
        assert_eq!(next, json!({"next": true}));
    }

    #[tokio::test]
    async fn test_drain_rows_empty_sequence() {
        let data: &[u8] = b"null\n";
        let mut reader = ValueReader::new(data);
        let (tx, rx) = mpsc::channel(1);

        assert_eq!(drain_rows(&mut reader, Some(tx)).await.unwrap(), 0);
        assert!(collect(rx).await.is_empty());
    }

    #[tokio::test]
    async fn test_drain_rows_truncated_by_malformed_row() {
        let data: &[u8] = b"{\"id\":1}\n{\"id\" 2}\nnull\n";
        let mut reader = ValueReader::new(data);
        let (tx, rx) = mpsc::channel(8);

        let collector = tokio::spawn(collect(rx));
        let err = drain_rows(&mut reader, Some(tx)).await.unwrap_err();
        match err {
            CodecError::StreamTruncated {
                rows_delivered,
                source,
            } => {
                assert_eq!(rows_delivered, 1);
                assert!(matches!(*source, CodecError::Decoding(_)));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(collector.await.unwrap(), vec![json!({"id": 1})]);
    }

    #[tokio::test]
    async fn test_drain_rows_truncated_by_eof() {
        let data: &[u8] = b"{\"id\":1}\n";
        let mut reader = ValueReader::new(data);

        let err = drain_rows(&mut reader, None).await.unwrap_err();
        assert!(matches!(
            err,
            CodecError::StreamTruncated {
                rows_delivered: 1,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_drain_rows_receiver_dropped_keeps_framing() {
        let data: &[u8] = b"1\n2\n3\nnull\n\"after\"\n";
        let mut reader = ValueReader::new(data);
        let (tx, rx) = mpsc::channel(8);
        drop(rx);

        assert_eq!(drain_rows(&mut reader, Some(tx)).await.unwrap(), 3);
        let after: String = reader.next().await.unwrap();
        assert_eq!(after, "after");
    }

    #[tokio::test]
    async fn test_emit_then_drain_with_mock_io() {
        let mut writer = ValueWriter::new(
            tokio_test::io::Builder::new()
                .write(b"[1,\"<tag>\"]\n")
                .write(b"null\n")
                .build(),
        );
        let mut source = RowSource::from_rows(vec![json!([1, "<tag>"])]);
        emit_rows(&mut writer, Some(&mut source)).await.unwrap();

        let mut reader = ValueReader::new(
            tokio_test::io::Builder::new()
                .read(b"[1,\"<ta")
                .read(b"g>\"]\nnu")
                .read(b"ll\n")
                .build(),
        );
        let (tx, rx) = mpsc::channel(4);
        assert_eq!(drain_rows(&mut reader, Some(tx)).await.unwrap(), 1);
        assert_eq!(collect(rx).await, vec![json!([1, "<tag>"])]);
    }
}
