//! Socket provider contract
//!
//! The controller depends only on this event vocabulary and the two traits
//! below; protocol transport and handshake internals belong to the external
//! messenger engine. `engine` holds the concrete WebSocket adapter.

pub mod engine;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::store::AuthScope;
use crate::types::Result;

pub use engine::EngineProvider;

/// Closure status signaling the remote revoked authorization. Terminal for
/// the session; continuing would require a fresh pairing code, not a
/// reconnect.
pub const STATUS_AUTH_REVOKED: u16 = 401;

/// Asynchronous provider events, delivered in arrival order for the
/// lifetime of one connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderEvent {
    /// The provider persisted fresh credential material into the scope.
    CredentialsUpdated,
    /// The link to the remote service is up.
    ConnectionOpened,
    /// The link dropped; `status` carries the remote's reason code.
    ConnectionClosed { status: u16 },
    /// The remote reports a new login via pairing code.
    NewLogin,
    /// The remote reports the client as online.
    Online,
}

/// Command surface of one live connection.
#[async_trait]
pub trait ProviderLink: Send + Sync {
    /// Request a pairing code for `number`. Valid only before the account
    /// reports itself registered.
    async fn request_pairing_code(&self, number: &str) -> Result<String>;

    /// Best-effort delivery of a notice to the linked identity. Callers
    /// log failures and move on; a failed notice never affects state
    /// transitions or cleanup.
    async fn send_notice(&self, jid: &str, text: &str) -> Result<()>;
}

/// One established connection: its registration status, its event stream,
/// and its command surface. Each `connect` call yields a fresh handle whose
/// event receiver replaces the previous one.
pub struct ProviderHandle {
    registered: bool,
    events: mpsc::Receiver<ProviderEvent>,
    link: Arc<dyn ProviderLink>,
}

impl ProviderHandle {
    pub fn new(
        registered: bool,
        events: mpsc::Receiver<ProviderEvent>,
        link: Arc<dyn ProviderLink>,
    ) -> Self {
        Self {
            registered,
            events,
            link,
        }
    }

    /// Whether the account already reports itself registered (pairing code
    /// issuance is skipped in that case).
    pub fn is_registered(&self) -> bool {
        self.registered
    }

    /// Next event in arrival order; `None` once the connection's stream has
    /// ended without a close frame.
    pub async fn next_event(&mut self) -> Option<ProviderEvent> {
        self.events.recv().await
    }

    pub fn link(&self) -> Arc<dyn ProviderLink> {
        Arc::clone(&self.link)
    }
}

/// Connection factory the controller drives. `connect` is invoked once at
/// session start and again for the single automatic reconnect after a
/// transient closure.
#[async_trait]
pub trait SocketProvider: Send + Sync + 'static {
    /// Establish a connection seeded from whatever credential material the
    /// scope already holds. Does not block on link completion.
    async fn connect(&self, scope: Arc<AuthScope>) -> Result<ProviderHandle>;
}
