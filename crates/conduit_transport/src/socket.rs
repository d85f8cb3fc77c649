use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

use crate::error::TransportError;
use crate::headers::socket_headers;
use crate::link::{ConnectRequest, Connector, OpenFuture, TransportLink, TransportPeer, TransportSignal};
use crate::url::socket_url;

/// Opens chat sessions over WebSocket.
#[derive(Debug, Default, Clone, Copy)]
pub struct WebSocketConnector;

impl Connector for WebSocketConnector {
    fn open(&self, request: &ConnectRequest) -> OpenFuture {
        let request = request.clone();
        Box::pin(async move {
            let url = socket_url(&request.endpoint)?;
            let mut ws_request = url
                .as_str()
                .into_client_request()
                .map_err(|error| TransportError::invalid_endpoint(url.as_str(), error.to_string()))?;

            for (name, value) in socket_headers(request.bearer_token.as_deref())? {
                let header_name = HeaderName::from_bytes(name.as_bytes()).map_err(|error| {
                    TransportError::InvalidHeader {
                        name: name.clone(),
                        message: error.to_string(),
                    }
                })?;
                let header_value =
                    HeaderValue::from_str(&value).map_err(|error| TransportError::InvalidHeader {
                        name: name.clone(),
                        message: error.to_string(),
                    })?;
                ws_request.headers_mut().insert(header_name, header_value);
            }

            debug!(url = %url, "opening chat socket");
            let (stream, _response) = connect_async(ws_request)
                .await
                .map_err(|error| TransportError::Open(error.to_string()))?;

            let (link, peer) = TransportLink::pair();
            tokio::spawn(pump(stream, peer));
            Ok(link)
        })
    }
}

async fn pump(stream: WebSocketStream<MaybeTlsStream<TcpStream>>, peer: TransportPeer) {
    let (mut sink, mut source) = stream.split();
    let TransportPeer {
        mut outbound,
        inbound,
    } = peer;

    loop {
        tokio::select! {
            frame = outbound.recv() => match frame {
                Some(text) => {
                    if let Err(error) = sink.send(Message::Text(text)).await {
                        let _ = inbound.send(TransportSignal::Closed(format!("write failed: {error}")));
                        break;
                    }
                }
                None => {
                    // Link dropped by its owner: close quietly.
                    let _ = sink.send(Message::Close(None)).await;
                    let _ = sink.close().await;
                    break;
                }
            },
            message = source.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    if inbound.send(TransportSignal::Frame(text)).is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                    Ok(text) => {
                        if inbound.send(TransportSignal::Frame(text)).is_err() {
                            break;
                        }
                    }
                    Err(_) => warn!("dropping non-UTF-8 binary frame"),
                },
                Some(Ok(Message::Close(frame))) => {
                    let reason = frame
                        .map(|frame| format!("closed by server ({}): {}", frame.code, frame.reason))
                        .unwrap_or_else(|| "closed by server".to_owned());
                    let _ = inbound.send(TransportSignal::Closed(reason));
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(error)) => {
                    let _ = inbound.send(TransportSignal::Closed(error.to_string()));
                    break;
                }
                None => {
                    let _ = inbound.send(TransportSignal::Closed("stream ended".to_owned()));
                    break;
                }
            },
        }
    }
}
