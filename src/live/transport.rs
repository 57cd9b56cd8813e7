use super::client::Shared;
use super::codec::{self, OutboundMessage};
use super::session::TransportId;
use futures_util::{SinkExt, StreamExt};
use secrecy::{ExposeSecret, SecretString};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{
    self,
    client::IntoClientRequest,
    handshake::client::Request,
    http::HeaderValue,
    protocol::Message,
};

/// Header carrying the API key on the upgrade request
pub const API_KEY_HEADER: &str = "x-goog-api-key";

#[derive(Error, Debug)]
pub enum ConnectError {
    #[error("Invalid connection request: {0}")]
    Request(String),
    #[error("WebSocket handshake failed: {0}")]
    Handshake(#[from] tungstenite::Error),
}

/// Build the upgrade request with the credential attached as a header.
pub fn build_request(endpoint: &str, api_key: &SecretString) -> Result<Request, ConnectError> {
    let mut request = endpoint
        .into_client_request()
        .map_err(|e| ConnectError::Request(e.to_string()))?;

    let mut value = HeaderValue::from_str(api_key.expose_secret())
        .map_err(|_| ConnectError::Request("API key is not a valid header value".to_string()))?;
    value.set_sensitive(true);
    request.headers_mut().insert(API_KEY_HEADER, value);

    Ok(request)
}

/// Drive one connection until it closes, fails, or the session drops it.
pub(crate) async fn run_connection(
    shared: Arc<Shared>,
    id: TransportId,
    mut outbound: UnboundedReceiver<OutboundMessage>,
) {
    let request = match build_request(&shared.endpoint, shared.api.gemini_key()) {
        Ok(request) => request,
        Err(e) => {
            shared.session().transport_lost(id, e.to_string());
            return;
        }
    };

    let ws_stream = match connect_async(request).await {
        Ok((ws_stream, response)) => {
            log::debug!("🔌 WebSocket handshake complete ({})", response.status());
            ws_stream
        }
        Err(e) => {
            shared
                .session()
                .transport_lost(id, ConnectError::from(e).to_string());
            return;
        }
    };

    let (mut write, mut read) = ws_stream.split();

    if !shared.session().transport_opened(id) {
        let _ = write.send(Message::Close(None)).await;
        return;
    }

    loop {
        tokio::select! {
            message = outbound.recv() => {
                let Some(message) = message else {
                    log::info!("🔌 Closing connection");
                    let _ = write.send(Message::Close(None)).await;
                    let _ = write.close().await;
                    return;
                };

                let kind = message.kind();
                let result = match message.encode() {
                    Ok(json) => write
                        .send(Message::Text(json.into()))
                        .await
                        .map_err(|e| e.to_string()),
                    Err(e) => Err(e.to_string()),
                };
                if let Err(e) = result {
                    shared.session().send_failed(id, format!("{}: {}", kind, e));
                }
            }

            frame = read.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    log::trace!("📥 Received {} bytes", text.len());
                    shared.session().handle_frame(id, codec::decode(text.as_str()));
                }
                Some(Ok(Message::Binary(bytes))) => {
                    log::trace!("📥 Received {} binary bytes", bytes.len());
                    shared.session().handle_frame(id, codec::decode_bytes(bytes.as_slice()));
                }
                Some(Ok(Message::Ping(data))) => {
                    if let Err(e) = write.send(Message::Pong(data)).await {
                        log::warn!("⚠️  Failed to answer ping: {}", e);
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    let close = frame.map(|f| (u16::from(f.code), f.reason.to_string()));
                    shared.session().transport_closed(id, close);
                    return;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    shared.session().transport_lost(id, e.to_string());
                    return;
                }
                None => {
                    shared
                        .session()
                        .transport_lost(id, "connection ended without a close frame".to_string());
                    return;
                }
            }
        }
    }
}
