//! Client side of the tunnel upgrade.

use crate::error::ClientError;
use jsonlrpc_protocol::tunnel::{first_line, read_head};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

/// Sends `CONNECT <path>` on a freshly dialed stream and waits for `200`.
///
/// Nothing past the response head is read, so the stream can be handed to a
/// codec as-is on success. On failure the caller must drop the stream.
pub async fn negotiate<S>(stream: &mut S, path: &str) -> Result<(), ClientError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    tracing::debug!("Negotiating tunnel on {}", path);

    let request = format!("CONNECT {} HTTP/1.0\r\n\r\n", path);
    stream
        .write_all(request.as_bytes())
        .await
        .map_err(|e| ClientError::TunnelHandshake(format!("write failed: {}", e)))?;
    stream
        .flush()
        .await
        .map_err(|e| ClientError::TunnelHandshake(format!("write failed: {}", e)))?;

    let head = read_head(stream)
        .await
        .map_err(|e| ClientError::TunnelHandshake(format!("read failed: {}", e)))?;
    let status_line = first_line(&head);

    let mut parts = status_line.splitn(3, ' ');
    let version = parts.next().unwrap_or("");
    let code = parts.next().unwrap_or("");
    if !version.starts_with("HTTP/") || code != "200" {
        return Err(ClientError::TunnelHandshake(format!(
            "unexpected response: {}",
            status_line
        )));
    }

    tracing::debug!("Tunnel established: {}", status_line);
    Ok(())
}
