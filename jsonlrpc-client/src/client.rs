//! Call driver over a single connection.

use crate::codec::ClientCodec;
use crate::connection::{ClientConfig, Dialer, TcpDialer};
use crate::error::ClientError;
use jsonlrpc_protocol::{ClientReply, RequestHeader, Row, ValueDecoder};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};

/// Channel capacity used by [`Client::call_collect`].
const COLLECT_CHANNEL_CAPACITY: usize = 64;

/// Issues calls one at a time over one stream.
///
/// Each call holds the codec from request write until its rows are drained,
/// so a streamed reply never interleaves with the next header. Once a call
/// fails in a way that leaves the stream unusable, the client is marked
/// broken and every later call fails with [`ClientError::NotConnected`].
pub struct Client<S = TcpStream> {
    codec: Mutex<ClientCodec<ReadHalf<S>, WriteHalf<S>>>,
    next_seq: AtomicU64,
    broken: AtomicBool,
}

impl Client<TcpStream> {
    /// Dials `config.addr`, negotiating the tunnel when enabled.
    pub async fn dial(config: &ClientConfig) -> Result<Self, ClientError> {
        let stream = TcpDialer::new(config.clone()).connect().await?;
        let decoder = ValueDecoder::new().with_max_value_size(config.max_value_size);
        Ok(Self::with_decoder(stream, decoder))
    }
}

/// Marks the client broken when dropped while armed.
///
/// A call future dropped mid-exchange leaves the stream at an unknown
/// position, so the guard is only disarmed once the exchange has finished
/// cleanly.
struct BreakOnDrop<'a> {
    broken: &'a AtomicBool,
    armed: bool,
}

impl Drop for BreakOnDrop<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.broken.store(true, Ordering::Release);
        }
    }
}

impl<S> Client<S>
where
    S: AsyncRead + AsyncWrite,
{
    pub fn new(stream: S) -> Self {
        Self::with_decoder(stream, ValueDecoder::new())
    }

    pub fn with_decoder(stream: S, decoder: ValueDecoder) -> Self {
        Self {
            codec: Mutex::new(ClientCodec::with_decoder(stream, decoder)),
            next_seq: AtomicU64::new(1),
            broken: AtomicBool::new(false),
        }
    }

    /// Calls `method` with `params`.
    ///
    /// Rows that follow the reply are forwarded to `rows` before this
    /// returns; the sender is dropped once the sentinel has been read. A
    /// non-empty header error becomes [`ClientError::Remote`] after the body
    /// has been consumed, leaving the connection usable.
    pub async fn call<P>(
        &self,
        method: &str,
        params: &P,
        rows: Option<mpsc::Sender<Row>>,
    ) -> Result<ClientReply, ClientError>
    where
        P: Serialize + ?Sized,
    {
        if self.is_broken() {
            return Err(ClientError::NotConnected);
        }

        let mut codec = self.codec.lock().await;
        if codec.is_closed() {
            return Err(ClientError::NotConnected);
        }

        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let mut guard = BreakOnDrop {
            broken: &self.broken,
            armed: true,
        };
        let result = Self::exchange(&mut codec, method, seq, params, rows).await;
        guard.armed = match &result {
            Err(e) if e.is_connection_fatal() => {
                tracing::debug!("Call {} (seq={}) broke the connection: {}", method, seq, e);
                true
            }
            _ => false,
        };
        result
    }

    async fn exchange<P>(
        codec: &mut ClientCodec<ReadHalf<S>, WriteHalf<S>>,
        method: &str,
        seq: u64,
        params: &P,
        rows: Option<mpsc::Sender<Row>>,
    ) -> Result<ClientReply, ClientError>
    where
        P: Serialize + ?Sized,
    {
        codec
            .write_request(&RequestHeader::new(method, seq), params)
            .await?;

        let header = codec.read_response_header().await?;
        if header.seq != seq {
            return Err(ClientError::SeqMismatch {
                expected: seq,
                got: header.seq,
            });
        }

        let mut reply = ClientReply::new();
        if let Some(sink) = rows {
            reply = reply.with_rows(sink);
        }
        codec.read_response_body(Some(&mut reply)).await?;

        if let Some(message) = header.error_message() {
            return Err(ClientError::Remote {
                method: header.service_method.clone(),
                message: message.to_string(),
            });
        }
        Ok(reply)
    }

    /// Calls `method` and deserializes the reply `result` into `T`.
    pub async fn call_result<P, T>(&self, method: &str, params: &P) -> Result<T, ClientError>
    where
        P: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let reply = self.call(method, params, None).await?;
        Ok(reply.result_as()?)
    }

    /// Calls `method` and collects every streamed row.
    pub async fn call_collect<P>(
        &self,
        method: &str,
        params: &P,
    ) -> Result<(ClientReply, Vec<Row>), ClientError>
    where
        P: Serialize + ?Sized,
    {
        let (tx, mut rx) = mpsc::channel(COLLECT_CHANNEL_CAPACITY);
        let collect = async move {
            let mut rows = Vec::new();
            while let Some(row) = rx.recv().await {
                rows.push(row);
            }
            rows
        };
        let (reply, rows) = tokio::join!(self.call(method, params, Some(tx)), collect);
        Ok((reply?, rows))
    }

    /// Returns whether a previous failure left the connection unusable.
    pub fn is_broken(&self) -> bool {
        self.broken.load(Ordering::Acquire)
    }

    /// Shuts down the write direction. Calling it again is a no-op.
    pub async fn close(&self) -> Result<(), ClientError> {
        let mut codec = self.codec.lock().await;
        codec.close().await?;
        Ok(())
    }
}

/// Dials TCP and wraps the stream in a [`Client`].
///
/// This is the dialer used to refill a `ConnectionHandle<Client>`.
#[derive(Debug, Clone)]
pub struct ClientDialer {
    config: ClientConfig,
}

impl ClientDialer {
    pub fn new(config: ClientConfig) -> Self {
        Self { config }
    }
}

impl Dialer for ClientDialer {
    type Connection = Client;

    fn dial(&self) -> impl Future<Output = Result<Client, ClientError>> + Send {
        Client::dial(&self.config)
    }

    fn target(&self) -> String {
        self.config.addr.clone()
    }
}
