//! Thin async WebSocket transport carrying [`ClientEvent`]/[`ServerEvent`]
//! JSON, grounded on the driver's own `ws.rs` send/receive-json traits.

use super::events::{ClientEvent, ServerEvent};
use crate::error::NetworkError;
use async_tungstenite::{
    tokio::{connect_async, ConnectStream},
    tungstenite::Message,
    WebSocketStream,
};
use futures::{stream::SplitSink, SinkExt, StreamExt, TryStreamExt};
use tracing::debug;
use url::Url;

pub type WsStream = WebSocketStream<ConnectStream>;
pub type Result<T> = std::result::Result<T, NetworkError>;

/// One poll of the receive side: a parsed event, a message worth ignoring
/// (binary/close/ping frames, or text that failed to parse), or true
/// end-of-stream. Kept distinct from `Ignored` so the receive pump can
/// break out instead of spinning on a closed stream that keeps yielding
/// `None` from `try_next`.
pub(crate) enum Recv {
    Event(ServerEvent),
    Ignored,
    Ended,
}

/// Opens the realtime-AI WebSocket, optionally attaching a bearer token
/// (direct mode) or leaving auth to the edge function (edge mode).
pub(crate) async fn connect(url: Url, bearer: Option<&str>) -> Result<WsStream> {
    use async_tungstenite::tungstenite::{client::IntoClientRequest, http::HeaderValue};

    let mut request = url.into_client_request()?;
    if let Some(token) = bearer {
        let value = HeaderValue::from_str(&format!("Bearer {}", token))
            .map_err(|_| NetworkError::MalformedRtp)?;
        request.headers_mut().insert("Authorization", value);
    }

    let (stream, _) = connect_async(request).await?;
    Ok(stream)
}

#[async_trait::async_trait]
pub(crate) trait ReceiverExt {
    async fn recv_event(&mut self) -> Result<Recv>;
}

#[async_trait::async_trait]
pub(crate) trait SenderExt {
    async fn send_event(&mut self, value: &ClientEvent) -> Result<()>;
}

#[async_trait::async_trait]
impl ReceiverExt for WsStream {
    async fn recv_event(&mut self) -> Result<Recv> {
        convert_message(self.try_next().await?)
    }
}

#[async_trait::async_trait]
impl SenderExt for SplitSink<WsStream, Message> {
    async fn send_event(&mut self, value: &ClientEvent) -> Result<()> {
        let text = serde_json::to_string(value)?;
        self.send(Message::Text(text)).await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl SenderExt for WsStream {
    async fn send_event(&mut self, value: &ClientEvent) -> Result<()> {
        let text = serde_json::to_string(value)?;
        self.send(Message::Text(text)).await?;
        Ok(())
    }
}

fn convert_message(message: Option<Message>) -> Result<Recv> {
    Ok(match message {
        None => Recv::Ended,
        Some(Message::Text(payload)) => match serde_json::from_str(&payload) {
            Ok(event) => Recv::Event(event),
            Err(e) => {
                debug!(%payload, error = %e, "unparseable AI event, dropping");
                Recv::Ignored
            },
        },
        Some(Message::Close(_)) => Recv::Ended,
        Some(_) => Recv::Ignored,
    })
}
