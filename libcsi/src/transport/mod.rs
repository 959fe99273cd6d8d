//! QUIC transport layer for CSI messages.
//!
//! [`CsiClient`](client::CsiClient) and [`CsiServer`](server::CsiServer)
//! exchange JSON-encoded [`CsiMessage`] values over QUIC bi-directional
//! streams using `quinn`.  A stream carries one message in each direction;
//! finishing the send side marks the end of a message.

pub mod client;
pub mod server;

use crate::error::CsiError;
use crate::message::CsiMessage;

/// Upper bound on a single encoded request or response.
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Encode `msg`, write it and finish the stream.
pub(crate) async fn send_message(
    send: &mut quinn::SendStream,
    msg: &CsiMessage,
) -> Result<(), CsiError> {
    let payload = serde_json::to_vec(msg).map_err(CsiError::internal)?;
    send.write_all(&payload)
        .await
        .map_err(CsiError::transport)?;
    send.finish().map_err(CsiError::transport)
}

/// Read until the peer finishes the stream and decode one message.
pub(crate) async fn recv_message(recv: &mut quinn::RecvStream) -> Result<CsiMessage, CsiError> {
    let buf = recv
        .read_to_end(MAX_MESSAGE_SIZE)
        .await
        .map_err(CsiError::transport)?;
    serde_json::from_slice(&buf)
        .map_err(|e| CsiError::TransportError(format!("malformed message: {e}")))
}
