//! Websocket transport: upgrade request, `hello` handshake, frame codec glue.

use futures_util::{Stream, StreamExt};
use protocol::{Command, Frame, Hello, PROTOCOL_VERSION};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::header::{AUTHORIZATION, HeaderValue, USER_AGENT};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{info, warn};

use crate::config::ClientConfig;
use crate::error::{ClientError, Result};

pub(crate) type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Build the upgrade request carrying the bearer token and user agent.
pub(crate) fn build_request(config: &ClientConfig) -> Result<Request> {
    let mut request = config.server_url.as_str().into_client_request().map_err(ClientError::connection)?;
    let headers = request.headers_mut();
    headers.insert(AUTHORIZATION, HeaderValue::from_str(&format!("Bearer {}", config.token))?);
    headers.insert(USER_AGENT, HeaderValue::from_str(&config.user_agent())?);
    Ok(request)
}

/// Open the websocket and complete the `hello` handshake within
/// `config.connect_timeout`.
pub(crate) async fn connect(config: &ClientConfig) -> Result<(WsStream, Hello)> {
    let request = build_request(config)?;
    info!(url = %config.server_url, "wokwi: connecting");

    let handshake = async {
        let (mut stream, _) = connect_async(request).await.map_err(ClientError::connection)?;
        let hello = read_hello(&mut stream).await?;
        Ok::<_, ClientError>((stream, hello))
    };

    let (stream, hello) = tokio::time::timeout(config.connect_timeout, handshake)
        .await
        .map_err(|_| ClientError::Timeout(config.connect_timeout))??;

    info!(url = %config.server_url, server_version = %hello.app_version, "wokwi: connected");
    Ok((stream, hello))
}

/// Read frames until the server greeting and check its protocol version.
pub(crate) async fn read_hello<S>(stream: &mut S) -> Result<Hello>
where
    S: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    loop {
        let Some(message) = stream.next().await else {
            return Err(ClientError::Disconnected);
        };
        let text = match message.map_err(ClientError::connection)? {
            Message::Text(text) => text,
            Message::Binary(_) => {
                warn!("wokwi: unexpected binary frame during handshake, skipped");
                continue;
            }
            Message::Close(_) => return Err(ClientError::Disconnected),
            _ => continue,
        };

        return match protocol::decode_frame(text.as_str()) {
            Ok(Frame::Hello(hello)) if hello.protocol_version == PROTOCOL_VERSION => Ok(hello),
            Ok(Frame::Error(error)) => Err(ClientError::Server { code: -1, message: error.message }),
            Ok(_) | Err(_) => Err(ClientError::Protocol(format!("unsupported protocol handshake: {}", text.as_str()))),
        };
    }
}

/// Wrap a command as a websocket text message.
pub(crate) fn command_message(command: Command) -> Message {
    Message::Text(protocol::encode_frame(&Frame::Command(command)).into())
}

#[cfg(test)]
#[path = "transport_test.rs"]
mod tests;
