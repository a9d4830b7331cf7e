//! WebSocket front end of the signaling server.
//!
//! Each accepted socket is bound to the profile named in the upgrade
//! request's `profile` query parameter. Frames are JSON envelopes; every
//! decoded envelope is handed to the [`Coordinator`] in arrival order.

use super::consts::PROFILE_QUERY_PARAM;
use super::error::{Result, SocketError};
use super::hub::ConnectionId;
use crate::calls::Coordinator;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use sigcore::protocol::{ClientMessage, ServerMessage};
use sigcore::types::ProfileId;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::{StatusCode, Uri};

type WsSink = SplitSink<WebSocketStream<TcpStream>, Message>;
type WsStream = SplitStream<WebSocketStream<TcpStream>>;

/// Extract and decode the profile id from an upgrade request URI.
pub fn profile_from_uri(uri: &Uri) -> Option<ProfileId> {
    uri.query()?
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| *key == PROFILE_QUERY_PARAM)
        .and_then(|(_, value)| urlencoding::decode(value).ok())
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .map(ProfileId::new)
}

pub struct SignalingServer {
    coordinator: Arc<Coordinator>,
}

impl SignalingServer {
    pub fn new(coordinator: Arc<Coordinator>) -> Arc<Self> {
        Arc::new(Self { coordinator })
    }

    /// Accept connections until `shutdown` resolves.
    pub async fn serve(
        self: Arc<Self>,
        listener: TcpListener,
        shutdown: impl Future<Output = ()>,
    ) -> Result<()> {
        info!(target: "Socket/Server", "Listening on {}", listener.local_addr()?);
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!(target: "Socket/Server", "Shutting down");
                    return Ok(());
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        let server = Arc::clone(&self);
                        tokio::spawn(async move {
                            if let Err(e) = server.handle_connection(stream, addr).await {
                                debug!(target: "Socket/Server", "Connection from {addr} closed with error: {e}");
                            }
                        });
                    }
                    Err(e) => error!(target: "Socket/Server", "Accept failed: {e}"),
                }
            }
        }
    }

    async fn handle_connection(&self, stream: TcpStream, addr: SocketAddr) -> Result<()> {
        let mut profile = None;
        let ws = tokio_tungstenite::accept_hdr_async(stream, |req: &Request, resp: Response| {
            profile = profile_from_uri(req.uri());
            if profile.is_some() {
                Ok(resp)
            } else {
                let mut rejection = ErrorResponse::new(Some("missing profile".to_string()));
                *rejection.status_mut() = StatusCode::UNAUTHORIZED;
                Err(rejection)
            }
        })
        .await?;
        let profile = profile.ok_or_else(|| SocketError::Handshake("missing profile".into()))?;

        let hub = Arc::clone(self.coordinator.hub());
        let (connection_id, outbound) = hub.register(&profile);
        info!(
            target: "Socket/Server",
            "{profile} connected from {addr} (connection {connection_id}, {} online)",
            hub.connected_count()
        );

        let (sink, stream) = ws.split();
        let writer = tokio::spawn(write_pump(sink, outbound, profile.clone()));

        if let Err(e) = self.coordinator.recover_pending(&profile).await {
            warn!(target: "Socket/Server", "Pending offer recovery for {profile} failed: {e}");
        }

        let result = self.read_pump(stream, &profile).await;

        writer.abort();
        self.close(&profile, connection_id).await;
        result
    }

    async fn read_pump(&self, mut stream: WsStream, profile: &ProfileId) -> Result<()> {
        while let Some(frame) = stream.next().await {
            match frame? {
                Message::Text(text) => match ClientMessage::decode(text.as_str()) {
                    Ok(message) => self.coordinator.handle_message(profile, message).await,
                    Err(e) => {
                        debug!(target: "Socket/Server", "Malformed envelope from {profile}: {e}");
                        self.coordinator
                            .hub()
                            .send_to_profile(profile, ServerMessage::error("bad_request", e.to_string()));
                    }
                },
                Message::Close(_) => break,
                Message::Binary(_) => {
                    debug!(target: "Socket/Server", "Ignoring binary frame from {profile}");
                }
                _ => {}
            }
        }
        Ok(())
    }

    async fn close(&self, profile: &ProfileId, connection_id: ConnectionId) {
        if self.coordinator.hub().unregister(profile, connection_id) {
            info!(
                target: "Socket/Server",
                "{profile} disconnected (connection {connection_id}, {} online)",
                self.coordinator.hub().connected_count()
            );
            self.coordinator.disconnect(profile).await;
        } else {
            debug!(target: "Socket/Server", "Superseded connection {connection_id} of {profile} closed");
        }
    }
}

async fn write_pump(
    mut sink: WsSink,
    mut outbound: mpsc::Receiver<ServerMessage>,
    profile: ProfileId,
) {
    while let Some(message) = outbound.recv().await {
        let text = match message.encode() {
            Ok(text) => text,
            Err(e) => {
                error!(target: "Socket/Server", "Failed to encode {}: {e}", message.op());
                continue;
            }
        };
        if let Err(e) = sink.send(Message::text(text)).await {
            debug!(target: "Socket/Server", "Write to {profile} failed: {e}");
            break;
        }
    }
    let _ = sink.close().await;
}
