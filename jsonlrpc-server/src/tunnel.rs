//! Server side of the tunnel upgrade.

use crate::error::ServerError;
use jsonlrpc_protocol::tunnel::{first_line, read_head, CONNECTED_STATUS};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

/// Reads the `CONNECT` request head and answers it.
///
/// Only `CONNECT <path>` is accepted. Any other method gets `405`, any other
/// path `404`, and the caller should then drop the stream. Nothing past the
/// request head is read.
pub async fn accept_tunnel<S>(stream: &mut S, path: &str) -> Result<(), ServerError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let head = read_head(stream).await?;
    let request_line = first_line(&head);
    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or("");
    let target = parts.next().unwrap_or("");

    let status = if method != "CONNECT" {
        "405 must CONNECT"
    } else if target != path {
        "404 Not Found"
    } else {
        CONNECTED_STATUS
    };

    stream
        .write_all(format!("HTTP/1.0 {}\n\n", status).as_bytes())
        .await?;
    stream.flush().await?;

    if status != CONNECTED_STATUS {
        tracing::debug!("Rejected tunnel request '{}': {}", request_line, status);
        return Err(ServerError::TunnelRejected(status.to_string()));
    }
    tracing::debug!("Tunnel accepted on {}", path);
    Ok(())
}
