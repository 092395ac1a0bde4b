//! Conversation session state machine.
//!
//! Owns the transcript, the patient summary, the input buffer and the transport for one
//! (user, patient) conversation. All mutation happens through `&mut self` on the owning
//! thread: network results arrive as [`SessionEvent`]s and are applied one at a time, so
//! transcript appends never race.

use std::fmt;

use super::handshake::HandshakeState;
use super::message::Author;
use super::summary::PatientSummary;
use super::transcript::Transcript;
use crate::credentials::SessionIdentity;
use crate::socket::protocol::{ChatMessage, StartConversation};
use crate::socket::{ClientEvent, ServerEvent, Transport, TransportEvent};

/// Everything that can change a session from outside the owning thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Transport(TransportEvent),
    SummaryLoaded(PatientSummary),
    SummaryFailed {
        error: String,
        attempt: u32,
        will_retry: bool,
    },
}

/// Latest unresolved problem, shown as a degraded state. Never a transcript entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionFailure {
    Connection(String),
    Summary { error: String, gave_up: bool },
}

impl fmt::Display for SessionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionFailure::Connection(reason) => write!(f, "connection problem: {}", reason),
            SessionFailure::Summary { error, gave_up } if *gave_up => {
                write!(f, "could not load patient: {}", error)
            }
            SessionFailure::Summary { error, .. } => {
                write!(f, "loading patient failed, retrying: {}", error)
            }
        }
    }
}

pub struct ConversationSession {
    identity: SessionIdentity,
    transport: Box<dyn Transport>,
    transcript: Transcript,
    summary: Option<PatientSummary>,
    connected: bool,
    handshake: HandshakeState,
    input: String,
    failure: Option<SessionFailure>,
    ever_ready: bool,
    closed: bool,
}

impl ConversationSession {
    pub fn new(identity: SessionIdentity, transport: Box<dyn Transport>) -> Self {
        Self {
            identity,
            transport,
            transcript: Transcript::new(),
            summary: None,
            connected: false,
            handshake: HandshakeState::default(),
            input: String::new(),
            failure: None,
            ever_ready: false,
            closed: false,
        }
    }

    pub fn identity(&self) -> &SessionIdentity {
        &self.identity
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn summary(&self) -> Option<&PatientSummary> {
        self.summary.as_ref()
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn handshake(&self) -> HandshakeState {
        self.handshake
    }

    pub fn failure(&self) -> Option<&SessionFailure> {
        self.failure.as_ref()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Patient details loaded and transport live.
    pub fn is_ready(&self) -> bool {
        !self.closed && self.connected && self.summary.is_some()
    }

    /// True once the session has been ready at least once.
    pub fn has_been_ready(&self) -> bool {
        self.ever_ready
    }

    pub fn input(&self) -> &str {
        &self.input
    }

    pub fn input_mut(&mut self) -> &mut String {
        &mut self.input
    }

    /// Start the transport connecting. Connection progress arrives later as events.
    pub fn connect(&mut self) {
        if self.closed {
            return;
        }
        self.transport.connect();
    }

    /// Apply one event delivered by the transport or the summary fetch. Ignored after close.
    pub fn apply(&mut self, event: SessionEvent) {
        if self.closed {
            log::debug!("session closed, discarding {:?}", event);
            return;
        }
        match event {
            SessionEvent::Transport(TransportEvent::Connected) => {
                log::info!(
                    "connected to conversation service (patient {}, user {})",
                    self.identity.patient_id(),
                    self.identity.user_email()
                );
                self.connected = true;
                if matches!(self.failure, Some(SessionFailure::Connection(_))) {
                    self.failure = None;
                }
                self.maybe_start_conversation();
            }
            SessionEvent::Transport(TransportEvent::Disconnected { reason }) => {
                self.connected = false;
                self.handshake = self.handshake.evaluate(false, self.summary.is_some());
                self.failure = Some(SessionFailure::Connection(reason));
            }
            SessionEvent::Transport(TransportEvent::ConnectError { message, attempt }) => {
                log::error!("connection error (attempt {}): {}", attempt, message);
                self.connected = false;
                self.failure = Some(SessionFailure::Connection(message));
            }
            SessionEvent::Transport(TransportEvent::Server(ServerEvent::AssistantResponse(
                text,
            ))) => {
                self.on_assistant_message(text);
            }
            SessionEvent::SummaryLoaded(summary) => {
                if self.summary.is_some() {
                    log::warn!("patient summary already loaded, ignoring a second one");
                    return;
                }
                self.summary = Some(summary);
                if matches!(self.failure, Some(SessionFailure::Summary { .. })) {
                    self.failure = None;
                }
                self.maybe_start_conversation();
            }
            SessionEvent::SummaryFailed {
                error,
                attempt,
                will_retry,
            } => {
                log::error!(
                    "error fetching patient {} (attempt {}): {}",
                    self.identity.patient_id(),
                    attempt,
                    error
                );
                if self.summary.is_none() {
                    self.failure = Some(SessionFailure::Summary {
                        error,
                        gave_up: !will_retry,
                    });
                }
            }
        }
        if self.is_ready() {
            self.ever_ready = true;
        }
    }

    /// Fire `start_conversation` iff connected, summary present and not yet sent.
    /// Returns true when the event was emitted by this call.
    pub fn maybe_start_conversation(&mut self) -> bool {
        if self.closed {
            return false;
        }
        self.handshake = self
            .handshake
            .evaluate(self.connected, self.summary.is_some());
        if self.handshake != HandshakeState::ReadyNotSent {
            return false;
        }
        let Some(summary) = &self.summary else {
            return false;
        };
        let event = ClientEvent::StartConversation(StartConversation {
            patient_natural_language_details: summary.narrative.clone(),
            user_email: self.identity.user_email().to_string(),
            patient_id: self.identity.patient_id(),
        });
        match self.transport.emit(event) {
            Ok(()) => {
                log::info!("start_conversation sent for patient {}", self.identity.patient_id());
                self.handshake = HandshakeState::Sent;
                true
            }
            Err(e) => {
                log::warn!("start_conversation not sent: {}", e);
                false
            }
        }
    }

    /// Optimistic echo then emit. Whitespace-only text is ignored. Returns true when appended.
    pub fn send_user_message(&mut self, text: &str) -> bool {
        if text.trim().is_empty() {
            return false;
        }
        if self.closed {
            log::debug!("session closed, not sending");
            return false;
        }
        self.transcript.append(Author::User, text);
        self.input.clear();
        log::debug!(
            "emitting chat_message (patient {}, user {})",
            self.identity.patient_id(),
            self.identity.user_email()
        );
        let event = ClientEvent::ChatMessage(ChatMessage {
            message: text.to_string(),
            user_email: self.identity.user_email().to_string(),
            patient_id: self.identity.patient_id(),
        });
        if let Err(e) = self.transport.emit(event) {
            log::warn!("chat_message dropped: {}", e);
        }
        true
    }

    /// Send the input buffer. An empty buffer is left as is.
    pub fn submit_input(&mut self) -> bool {
        let text = std::mem::take(&mut self.input);
        let sent = self.send_user_message(&text);
        if !sent {
            self.input = text;
        }
        sent
    }

    /// Append an assistant turn, regardless of transcript or handshake state.
    pub fn on_assistant_message(&mut self, text: impl Into<String>) {
        if self.closed {
            return;
        }
        self.transcript.append(Author::Assistant, text);
    }

    /// Close the transport. Safe to call repeatedly; only the first call has effects.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.connected = false;
        self.transport.close();
        log::info!("conversation with patient {} closed", self.identity.patient_id());
    }
}
