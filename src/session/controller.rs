//! Session lifecycle controller
//!
//! Drives one pairing attempt: validate the number, open a fresh scope,
//! connect the provider, hand the pairing code back, then follow provider
//! events until the credential snapshot is archived and the scope is
//! destroyed. The head of the lifecycle (through code issuance) runs on the
//! caller's request; the event-driven tail runs in a detached driver task.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::archive::CredentialArchive;
use crate::fault;
use crate::phone;
use crate::provider::{
    ProviderEvent, ProviderHandle, ProviderLink, SocketProvider, STATUS_AUTH_REVOKED,
};
use crate::session::{SessionLease, SessionRegistry};
use crate::store::{AuthScope, EphemeralStore};
use crate::types::{PairwayError, Result};

/// Notice sent to the linked identity after a successful archive.
const NOTICE_SUCCESS: &str = "Pairing complete. Your credential snapshot has been archived.";

/// Notice sent when archival failed; the session still cleans up.
const NOTICE_FAILURE: &str =
    "Pairing completed, but archiving your credentials failed. Please pair again.";

/// Where a session stands in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Validating,
    AwaitingCode,
    CodeIssued,
    LinkPending,
    Linked,
    Archiving,
    CleanedUp,
    Failed,
}

/// One validated pairing attempt. Immutable once built.
#[derive(Debug, Clone)]
pub struct PairingRequest {
    pub raw_input: String,
    /// E.164 digits, no separators, no leading `+`.
    pub canonical_number: String,
    /// Maps 1:1 to an ephemeral store directory.
    pub scope_id: String,
}

/// In-memory working state for one pairing attempt. Mutated only by the
/// controller; discarded on terminal transition.
#[derive(Debug)]
pub struct SessionState {
    pub request: PairingRequest,
    pub phase: Phase,
    pub pairing_code: Option<String>,
    /// True once the single automatic reconnect for this attempt has fired.
    pub reconnect_attempted: bool,
    /// True once archival has been invoked; later credential events are
    /// ignored so the archive runs at most once.
    pub archive_started: bool,
}

impl SessionState {
    fn new(request: PairingRequest) -> Self {
        Self {
            request,
            phase: Phase::Validating,
            pairing_code: None,
            reconnect_attempted: false,
            archive_started: false,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.phase, Phase::CleanedUp | Phase::Failed)
    }
}

/// What the caller gets back from the lifecycle head.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PairingTicket {
    /// A fresh pairing code, formatted for display.
    Code(String),
    /// The account is already registered; linking proceeds without a code.
    AlreadyRegistered,
}

/// What the event dispatcher wants done next.
#[derive(Debug)]
enum Step {
    Continue,
    Reconnect,
    Finished(Phase),
}

/// Re-group a raw pairing code into 4-character chunks joined by `-`.
/// Codes that do not chunk cleanly are returned unmodified.
pub fn format_pairing_code(raw: &str) -> String {
    let chars: Vec<char> = raw.chars().collect();
    if chars.is_empty() || chars.len() % 4 != 0 {
        return raw.to_string();
    }
    chars
        .chunks(4)
        .map(|chunk| chunk.iter().collect::<String>())
        .collect::<Vec<_>>()
        .join("-")
}

/// The session lifecycle controller.
pub struct SessionController {
    provider: Arc<dyn SocketProvider>,
    archive: Arc<dyn CredentialArchive>,
    store: EphemeralStore,
    registry: Arc<SessionRegistry>,
    grace: Duration,
}

impl SessionController {
    pub fn new(
        provider: Arc<dyn SocketProvider>,
        archive: Arc<dyn CredentialArchive>,
        store: EphemeralStore,
        registry: Arc<SessionRegistry>,
        grace: Duration,
    ) -> Self {
        Self {
            provider,
            archive,
            store,
            registry,
            grace,
        }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Run the lifecycle head for one request: validate, open a fresh
    /// scope, connect, issue the pairing code. Returns the caller's one
    /// and only response; the event-driven tail continues in a detached
    /// driver task.
    pub async fn begin(self: &Arc<Self>, raw: &str) -> Result<PairingTicket> {
        let canonical = phone::normalize(raw)?;
        let request = PairingRequest {
            raw_input: raw.to_string(),
            canonical_number: canonical.clone(),
            scope_id: canonical,
        };

        let lease = self.registry.acquire(&request.scope_id);
        match self.start(&lease, request).await {
            Ok(ticket) => Ok(ticket),
            Err(e) => {
                self.registry.release(&lease);
                Err(e)
            }
        }
    }

    async fn start(
        self: &Arc<Self>,
        lease: &SessionLease,
        request: PairingRequest,
    ) -> Result<PairingTicket> {
        let mut session = SessionState::new(request);

        let scope = Arc::new(self.store.open(&session.request.scope_id).await?);
        self.registry.set_scope(lease, Arc::clone(&scope));
        session.phase = Phase::AwaitingCode;

        let handle = match self.provider.connect(Arc::clone(&scope)).await {
            Ok(handle) => handle,
            Err(e) => {
                let _ = scope.destroy().await;
                return Err(e);
            }
        };

        let ticket = if handle.is_registered() {
            info!(scope = %scope.scope_id(), "Account already registered; skipping code issuance");
            session.phase = Phase::LinkPending;
            PairingTicket::AlreadyRegistered
        } else {
            match handle
                .link()
                .request_pairing_code(&session.request.canonical_number)
                .await
            {
                Ok(raw_code) => {
                    let code = format_pairing_code(&raw_code);
                    info!(scope = %scope.scope_id(), "Pairing code issued");
                    debug!(scope = %scope.scope_id(), code = %code, "Issued code");
                    session.pairing_code = Some(code.clone());
                    session.phase = Phase::CodeIssued;
                    PairingTicket::Code(code)
                }
                Err(e) => {
                    let _ = scope.destroy().await;
                    return Err(e);
                }
            }
        };

        let this = Arc::clone(self);
        let driver_lease = lease.clone();
        let driver = tokio::spawn(async move {
            this.drive(session, scope, handle, driver_lease).await;
        });
        self.registry.attach_driver(lease, driver);

        Ok(ticket)
    }

    /// The event-driven tail of one session. Ends with the scope destroyed
    /// and the lease released, whatever happened before.
    async fn drive(
        self: Arc<Self>,
        mut session: SessionState,
        scope: Arc<AuthScope>,
        mut handle: ProviderHandle,
        lease: SessionLease,
    ) {
        session.phase = match self.run_events(&mut session, &scope, &mut handle).await {
            Ok(phase) => phase,
            Err(e) => {
                fault::report("session driver", &e.to_string());
                Phase::Failed
            }
        };

        // A superseded session's directory already belongs to its
        // successor; only the current owner tears it down.
        if self.registry.is_current(&lease) {
            let _ = scope.destroy().await;
        }
        self.registry.release(&lease);
        info!(
            scope = %scope.scope_id(),
            phase = ?session.phase,
            "Session reached terminal phase"
        );
    }

    /// Consume provider events in arrival order until a terminal phase.
    async fn run_events(
        &self,
        session: &mut SessionState,
        scope: &Arc<AuthScope>,
        handle: &mut ProviderHandle,
    ) -> Result<Phase> {
        loop {
            // A stream that ends without a close frame counts as a
            // transient closure.
            let event = match handle.next_event().await {
                Some(event) => event,
                None => ProviderEvent::ConnectionClosed { status: 0 },
            };

            let link = handle.link();
            match self.on_event(session, scope, &link, event).await? {
                Step::Continue => {}
                Step::Reconnect => {
                    info!(scope = %scope.scope_id(), "Re-establishing provider connection");
                    *handle = self.provider.connect(Arc::clone(scope)).await?;
                }
                Step::Finished(phase) => return Ok(phase),
            }
        }
    }

    /// Dispatch one provider event against the current phase.
    async fn on_event(
        &self,
        session: &mut SessionState,
        scope: &Arc<AuthScope>,
        link: &Arc<dyn ProviderLink>,
        event: ProviderEvent,
    ) -> Result<Step> {
        debug!(
            scope = %scope.scope_id(),
            phase = ?session.phase,
            event = ?event,
            "Provider event"
        );

        match event {
            ProviderEvent::ConnectionOpened => match session.phase {
                Phase::CodeIssued | Phase::LinkPending => {
                    session.phase = Phase::Linked;
                    info!(
                        scope = %scope.scope_id(),
                        "Link established; waiting for credential material to settle"
                    );
                    tokio::time::sleep(self.grace).await;
                    self.try_archive(session, scope, link).await
                }
                _ => {
                    debug!(scope = %scope.scope_id(), "Ignoring connection-open in this phase");
                    Ok(Step::Continue)
                }
            },

            ProviderEvent::CredentialsUpdated => {
                if session.phase == Phase::Linked && !session.archive_started {
                    self.try_archive(session, scope, link).await
                } else {
                    debug!(
                        scope = %scope.scope_id(),
                        phase = ?session.phase,
                        "Ignoring credential update"
                    );
                    Ok(Step::Continue)
                }
            }

            ProviderEvent::ConnectionClosed { status } if status == STATUS_AUTH_REVOKED => {
                warn!(
                    scope = %scope.scope_id(),
                    "Authorization revoked by remote; a fresh pairing code is needed"
                );
                Ok(Step::Finished(Phase::Failed))
            }

            ProviderEvent::ConnectionClosed { status } => {
                if session.reconnect_attempted {
                    warn!(
                        scope = %scope.scope_id(),
                        status,
                        "Connection closed again after reconnect; giving up"
                    );
                    Ok(Step::Finished(Phase::Failed))
                } else {
                    session.reconnect_attempted = true;
                    info!(scope = %scope.scope_id(), status, "Connection closed; reconnecting");
                    Ok(Step::Reconnect)
                }
            }

            ProviderEvent::NewLogin => {
                info!(scope = %scope.scope_id(), "New login via pairing code");
                Ok(Step::Continue)
            }

            ProviderEvent::Online => {
                debug!(scope = %scope.scope_id(), "Client reports online");
                Ok(Step::Continue)
            }
        }
    }

    /// Read the snapshot and archive it. `NotReady` leaves the session
    /// linked, waiting for the next credential event; anything else is a
    /// terminal outcome.
    async fn try_archive(
        &self,
        session: &mut SessionState,
        scope: &Arc<AuthScope>,
        link: &Arc<dyn ProviderLink>,
    ) -> Result<Step> {
        let snapshot = match scope.read_credential_snapshot().await {
            Ok(snapshot) => snapshot,
            Err(PairwayError::NotReady) => {
                debug!(scope = %scope.scope_id(), "Credential snapshot not settled yet");
                return Ok(Step::Continue);
            }
            Err(e) => return Err(e),
        };

        session.phase = Phase::Archiving;
        session.archive_started = true;

        let archived = self
            .archive
            .archive(scope.scope_id(), &snapshot)
            .await;
        drop(snapshot);

        let notice = match archived {
            Ok(()) => NOTICE_SUCCESS,
            Err(e) => {
                fault::report("credential archival", &e.to_string());
                NOTICE_FAILURE
            }
        };

        // Best-effort: a failed notice never affects the outcome.
        if let Err(e) = link
            .send_notice(&session.request.canonical_number, notice)
            .await
        {
            warn!(scope = %scope.scope_id(), "Notice delivery failed: {}", e);
        }

        Ok(Step::Finished(Phase::CleanedUp))
    }
}
