//! Serving calls on one connection.

use crate::codec::ServerCodec;
use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::tunnel::accept_tunnel;
use jsonlrpc_protocol::{CodecError, ResponseHeader, ServerReply, ValueDecoder};
use serde_json::value::RawValue;
use tokio::io::{AsyncRead, AsyncWrite};

/// Method dispatch for a connection.
///
/// `Err(message)` is sent back as the response header error; the client sees
/// it as a remote failure and the connection stays usable.
pub trait Service: Send + Sync {
    fn call(&self, method: &str, params: &RawValue) -> Result<ServerReply, String>;
}

impl<F> Service for F
where
    F: Fn(&str, &RawValue) -> Result<ServerReply, String> + Send + Sync,
{
    fn call(&self, method: &str, params: &RawValue) -> Result<ServerReply, String> {
        self(method, params)
    }
}

/// Serves requests on `stream` until the client closes it.
///
/// Returns the number of calls answered. A hang-up between requests ends the
/// loop cleanly; any other codec failure is returned.
pub async fn serve_connection<S, V>(stream: S, service: &V) -> Result<u64, ServerError>
where
    S: AsyncRead + AsyncWrite,
    V: Service + ?Sized,
{
    serve_codec(ServerCodec::new(stream), service).await
}

/// Like [`serve_connection`], applying `config` first.
///
/// With the tunnel enabled the stream must open with a `CONNECT` request; a
/// rejected upgrade ends the connection with
/// [`ServerError::TunnelRejected`].
pub async fn serve_connection_with_config<S, V>(
    mut stream: S,
    service: &V,
    config: &ServerConfig,
) -> Result<u64, ServerError>
where
    S: AsyncRead + AsyncWrite + Unpin,
    V: Service + ?Sized,
{
    if let Some(path) = config.tunnel.path() {
        accept_tunnel(&mut stream, path).await?;
    }
    let decoder = ValueDecoder::new().with_max_value_size(config.max_value_size);
    serve_codec(ServerCodec::with_decoder(stream, decoder), service).await
}

async fn serve_codec<R, W, V>(
    mut codec: ServerCodec<R, W>,
    service: &V,
) -> Result<u64, ServerError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
    V: Service + ?Sized,
{
    let mut served = 0u64;
    loop {
        let request = match codec.read_request_header().await {
            Ok(request) => request,
            Err(CodecError::ConnectionClosed) => {
                tracing::debug!("Connection closed by client after {} call(s)", served);
                break;
            }
            Err(e) => return Err(e.into()),
        };
        let params = codec.read_request_body_raw().await?;
        tracing::debug!("Request {} (seq={})", request.service_method, request.seq);

        let header = ResponseHeader::for_request(&request);
        let (header, mut reply) = match service.call(&request.service_method, &params) {
            Ok(reply) => (header, reply),
            Err(message) => {
                tracing::debug!("{} failed: {}", request.service_method, message);
                (header.with_error(message), ServerReply::default())
            }
        };

        codec.write_response(&header, &mut reply).await?;
        served += 1;
    }
    codec.close().await?;
    Ok(served)
}
