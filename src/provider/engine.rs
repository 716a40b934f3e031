//! Messenger engine adapter
//!
//! WebSocket client for the external messenger engine process. The engine
//! owns the protocol transport and handshake; this adapter only maps its
//! JSON frames onto [`ProviderEvent`]s, persists credential payload frames
//! into the session scope, and carries request/response commands with a
//! timeout.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::provider::{ProviderEvent, ProviderHandle, ProviderLink, SocketProvider};
use crate::store::AuthScope;
use crate::types::{PairwayError, Result};

/// How long to wait for the engine's hello frame after connecting.
const HELLO_TIMEOUT: Duration = Duration::from_secs(15);

/// Frames the engine sends us.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum EngineFrame {
    /// First frame on every connection; reports account registration state.
    Hello { registered: bool },
    /// Connection lifecycle: `state` is "open" or "close", `status` carries
    /// the close reason code.
    Connection {
        state: String,
        #[serde(default)]
        status: Option<u16>,
    },
    /// Fresh credential material, base64-encoded.
    Creds { payload: String },
    NewLogin,
    Online,
    /// Reply to a command frame, matched by `id`.
    Response {
        id: String,
        ok: bool,
        #[serde(default)]
        code: Option<String>,
        #[serde(default)]
        error: Option<String>,
    },
}

/// Command frames we send the engine.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum EngineCommand<'a> {
    RequestPairingCode { id: &'a str, number: &'a str },
    SendNotice { id: &'a str, jid: &'a str, text: &'a str },
}

/// Reply payload routed back to a pending command.
#[derive(Debug)]
struct CommandReply {
    ok: bool,
    code: Option<String>,
    error: Option<String>,
}

/// WebSocket provider backed by the external messenger engine.
pub struct EngineProvider {
    engine_url: String,
    request_timeout: Duration,
}

impl EngineProvider {
    pub fn new(engine_url: impl Into<String>, request_timeout: Duration) -> Self {
        Self {
            engine_url: engine_url.into(),
            request_timeout,
        }
    }
}

#[async_trait]
impl SocketProvider for EngineProvider {
    async fn connect(&self, scope: Arc<AuthScope>) -> Result<ProviderHandle> {
        let (ws, _) = connect_async(self.engine_url.as_str())
            .await
            .map_err(|e| PairwayError::Provider(format!("engine connect failed: {}", e)))?;
        let (ws_sink, ws_stream) = ws.split();

        let (out_tx, out_rx) = mpsc::channel::<Message>(64);
        let (event_tx, event_rx) = mpsc::channel::<ProviderEvent>(64);
        let pending: Arc<DashMap<String, oneshot::Sender<CommandReply>>> =
            Arc::new(DashMap::new());
        let (hello_tx, hello_rx) = oneshot::channel::<bool>();

        tokio::spawn(write_loop(ws_sink, out_rx));
        tokio::spawn(read_loop(
            ws_stream,
            Arc::clone(&scope),
            event_tx,
            Arc::clone(&pending),
            hello_tx,
        ));

        let registered = match timeout(HELLO_TIMEOUT, hello_rx).await {
            Ok(Ok(registered)) => registered,
            Ok(Err(_)) => {
                return Err(PairwayError::Provider(
                    "engine closed before hello".to_string(),
                ))
            }
            Err(_) => {
                return Err(PairwayError::Provider(
                    "timed out waiting for engine hello".to_string(),
                ))
            }
        };

        let link = Arc::new(EngineLink {
            out: out_tx,
            pending,
            request_timeout: self.request_timeout,
        });

        Ok(ProviderHandle::new(registered, event_rx, link))
    }
}

/// Pumps outbound frames onto the socket until the channel closes.
async fn write_loop(
    mut ws_sink: futures_util::stream::SplitSink<
        tokio_tungstenite::WebSocketStream<
            tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
        >,
        Message,
    >,
    mut out_rx: mpsc::Receiver<Message>,
) {
    while let Some(msg) = out_rx.recv().await {
        if let Err(e) = ws_sink.send(msg).await {
            debug!("Engine write failed: {}", e);
            break;
        }
    }
}

/// Maps inbound frames to events until the socket or the consumer goes away.
async fn read_loop(
    mut ws_stream: futures_util::stream::SplitStream<
        tokio_tungstenite::WebSocketStream<
            tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
        >,
    >,
    scope: Arc<AuthScope>,
    event_tx: mpsc::Sender<ProviderEvent>,
    pending: Arc<DashMap<String, oneshot::Sender<CommandReply>>>,
    hello_tx: oneshot::Sender<bool>,
) {
    let mut hello_tx = Some(hello_tx);

    while let Some(msg) = ws_stream.next().await {
        let text = match msg {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                debug!("Engine read failed: {}", e);
                break;
            }
        };

        let frame: EngineFrame = match serde_json::from_str(&text) {
            Ok(frame) => frame,
            Err(e) => {
                debug!("Ignoring unparseable engine frame: {}", e);
                continue;
            }
        };

        let event = match frame {
            EngineFrame::Hello { registered } => {
                if let Some(tx) = hello_tx.take() {
                    let _ = tx.send(registered);
                }
                continue;
            }
            EngineFrame::Connection { state, status } => match state.as_str() {
                "open" => ProviderEvent::ConnectionOpened,
                "close" => ProviderEvent::ConnectionClosed {
                    status: status.unwrap_or(0),
                },
                other => {
                    debug!("Unknown connection state from engine: {}", other);
                    continue;
                }
            },
            EngineFrame::Creds { payload } => {
                let bytes = match BASE64.decode(payload.as_bytes()) {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        warn!("Discarding undecodable credential payload: {}", e);
                        continue;
                    }
                };
                // The scope may already be gone if the session is tearing
                // down; the event is meaningless then.
                if let Err(e) = scope.write_credentials(&bytes).await {
                    debug!(scope = %scope.scope_id(), "Credential write skipped: {}", e);
                    continue;
                }
                ProviderEvent::CredentialsUpdated
            }
            EngineFrame::NewLogin => ProviderEvent::NewLogin,
            EngineFrame::Online => ProviderEvent::Online,
            EngineFrame::Response {
                id,
                ok,
                code,
                error,
            } => {
                if let Some((_, tx)) = pending.remove(&id) {
                    let _ = tx.send(CommandReply { ok, code, error });
                } else {
                    debug!("Reply for unknown command id {}", id);
                }
                continue;
            }
        };

        if event_tx.send(event).await.is_err() {
            // Consumer replaced this handle (reconnect) or finished.
            break;
        }
    }
}

/// Command surface over one engine connection.
struct EngineLink {
    out: mpsc::Sender<Message>,
    pending: Arc<DashMap<String, oneshot::Sender<CommandReply>>>,
    request_timeout: Duration,
}

impl EngineLink {
    async fn send_command(&self, id: &str, command: &EngineCommand<'_>) -> Result<()> {
        let frame = serde_json::to_string(command)?;
        self.out
            .send(Message::Text(frame))
            .await
            .map_err(|_| PairwayError::Provider(format!("engine connection closed (cmd {})", id)))
    }
}

#[async_trait]
impl ProviderLink for EngineLink {
    async fn request_pairing_code(&self, number: &str) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        self.pending.insert(id.clone(), tx);

        let command = EngineCommand::RequestPairingCode {
            id: &id,
            number,
        };
        if let Err(e) = self.send_command(&id, &command).await {
            self.pending.remove(&id);
            return Err(PairwayError::PairingCode(e.to_string()));
        }

        match timeout(self.request_timeout, rx).await {
            Ok(Ok(reply)) if reply.ok => reply.code.ok_or_else(|| {
                PairwayError::PairingCode("engine reply carried no code".to_string())
            }),
            Ok(Ok(reply)) => Err(PairwayError::PairingCode(
                reply
                    .error
                    .unwrap_or_else(|| "engine refused pairing code request".to_string()),
            )),
            Ok(Err(_)) => Err(PairwayError::PairingCode(
                "engine connection closed".to_string(),
            )),
            Err(_) => {
                self.pending.remove(&id);
                Err(PairwayError::PairingCode(
                    "pairing code request timed out".to_string(),
                ))
            }
        }
    }

    async fn send_notice(&self, jid: &str, text: &str) -> Result<()> {
        let id = Uuid::new_v4().to_string();
        let command = EngineCommand::SendNotice {
            id: &id,
            jid,
            text,
        };
        self.send_command(&id, &command).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::EphemeralStore;
    use futures_util::stream::StreamExt;
    use tokio::net::TcpListener;

    #[test]
    fn test_engine_frame_parsing() {
        let frame: EngineFrame =
            serde_json::from_str(r#"{"type":"hello","registered":false}"#).unwrap();
        assert!(matches!(frame, EngineFrame::Hello { registered: false }));

        let frame: EngineFrame =
            serde_json::from_str(r#"{"type":"connection","state":"close","status":401}"#).unwrap();
        match frame {
            EngineFrame::Connection { state, status } => {
                assert_eq!(state, "close");
                assert_eq!(status, Some(401));
            }
            other => panic!("unexpected frame: {:?}", other),
        }

        let frame: EngineFrame =
            serde_json::from_str(r#"{"type":"response","id":"a","ok":true,"code":"ABCD1234"}"#)
                .unwrap();
        assert!(matches!(frame, EngineFrame::Response { ok: true, .. }));
    }

    #[test]
    fn test_command_serialization() {
        let json = serde_json::to_string(&EngineCommand::RequestPairingCode {
            id: "1",
            number: "15551234567",
        })
        .unwrap();
        assert!(json.contains(r#""type":"request_pairing_code""#));
        assert!(json.contains(r#""number":"15551234567""#));
    }

    /// End-to-end adapter exchange against a local in-process engine.
    #[tokio::test]
    async fn test_connect_request_and_events() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            let (mut sink, mut stream) = ws.split();

            sink.send(Message::Text(
                r#"{"type":"hello","registered":false}"#.to_string(),
            ))
            .await
            .unwrap();

            // Expect one pairing code request, echo its id back
            let msg = stream.next().await.unwrap().unwrap();
            let value: serde_json::Value =
                serde_json::from_str(msg.to_text().unwrap()).unwrap();
            assert_eq!(value["type"], "request_pairing_code");
            assert_eq!(value["number"], "15551234567");
            let reply = format!(
                r#"{{"type":"response","id":"{}","ok":true,"code":"ABCD1234"}}"#,
                value["id"].as_str().unwrap()
            );
            sink.send(Message::Text(reply)).await.unwrap();

            sink.send(Message::Text(
                r#"{"type":"connection","state":"open"}"#.to_string(),
            ))
            .await
            .unwrap();
            let payload = BASE64.encode(b"{\"session\":\"keys\"}");
            sink.send(Message::Text(format!(
                r#"{{"type":"creds","payload":"{}"}}"#,
                payload
            )))
            .await
            .unwrap();
        });

        let tmp = tempfile::tempdir().unwrap();
        let store = EphemeralStore::new(tmp.path());
        let scope = Arc::new(store.open("15551234567").await.unwrap());

        let provider = EngineProvider::new(
            format!("ws://{}", addr),
            Duration::from_secs(5),
        );
        let mut handle = provider.connect(Arc::clone(&scope)).await.unwrap();
        assert!(!handle.is_registered());

        let code = handle.link().request_pairing_code("15551234567").await.unwrap();
        assert_eq!(code, "ABCD1234");

        assert_eq!(
            handle.next_event().await,
            Some(ProviderEvent::ConnectionOpened)
        );
        assert_eq!(
            handle.next_event().await,
            Some(ProviderEvent::CredentialsUpdated)
        );
        let snap = scope.read_credential_snapshot().await.unwrap();
        assert_eq!(snap.as_bytes(), b"{\"session\":\"keys\"}");

        server.await.unwrap();
    }
}
