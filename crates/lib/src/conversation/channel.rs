//! Runtime driver for one conversation: owns the [`ConversationSession`], spawns the network
//! work on a tokio runtime, and feeds the results back as [`SessionEvent`]s.
//!
//! The desktop drains events once per frame with [`ConversationChannel::poll`]; the CLI awaits
//! them with [`ConversationChannel::next_event`]. Either way the session is only touched by the
//! thread that owns the channel.

use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::session::{ConversationSession, SessionEvent};
use super::summary::{fetch_summary, PatientSummary, SummaryFetcher};
use super::transcript::Transcript;
use super::view::ViewState;
use crate::config::{resolve_base_url, Config, SessionConfig};
use crate::credentials::SessionIdentity;
use crate::socket::{socket_url, SocketError, SocketIoTransport, SocketOptions, TransportEvent};

/// Where to connect and how patient to be about it.
#[derive(Debug, Clone)]
pub struct ChannelOptions {
    pub base_url: String,
    pub socket_path: String,
    pub session: SessionConfig,
}

impl ChannelOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            base_url: resolve_base_url(config),
            socket_path: config.server.socket_path.clone(),
            session: config.session.clone(),
        }
    }
}

pub struct ConversationChannel {
    session: ConversationSession,
    transport_rx: Option<mpsc::UnboundedReceiver<TransportEvent>>,
    summary_tx: mpsc::UnboundedSender<SessionEvent>,
    summary_rx: Option<mpsc::UnboundedReceiver<SessionEvent>>,
    fetcher: Arc<dyn SummaryFetcher>,
    session_config: SessionConfig,
    runtime: Handle,
    fetch_task: Option<JoinHandle<()>>,
    fetch_started: bool,
}

impl ConversationChannel {
    /// Build an idle channel. Nothing touches the network until [`connect`](Self::connect)
    /// and [`fetch_summary`](Self::fetch_summary).
    pub fn new(
        identity: SessionIdentity,
        fetcher: Arc<dyn SummaryFetcher>,
        options: ChannelOptions,
        runtime: Handle,
    ) -> Result<Self, SocketError> {
        let url = socket_url(&options.base_url, &options.socket_path, &identity)?;
        let (events_tx, transport_rx) = mpsc::unbounded_channel();
        let transport = SocketIoTransport::new(
            runtime.clone(),
            SocketOptions {
                url,
                connect_timeout: options.session.connect_timeout(),
                retry: options.session.retry.clone(),
            },
            events_tx,
        );
        let (summary_tx, summary_rx) = mpsc::unbounded_channel();
        Ok(Self {
            session: ConversationSession::new(identity, Box::new(transport)),
            transport_rx: Some(transport_rx),
            summary_tx,
            summary_rx: Some(summary_rx),
            fetcher,
            session_config: options.session,
            runtime,
            fetch_task: None,
            fetch_started: false,
        })
    }

    /// New channel with the connection and the summary fetch both started.
    pub fn open(
        identity: SessionIdentity,
        fetcher: Arc<dyn SummaryFetcher>,
        options: ChannelOptions,
        runtime: Handle,
    ) -> Result<Self, SocketError> {
        let mut channel = Self::new(identity, fetcher, options, runtime)?;
        channel.connect();
        channel.fetch_summary();
        Ok(channel)
    }

    pub fn connect(&mut self) {
        self.session.connect();
    }

    /// Start loading the patient summary. Runs once per channel; later calls do nothing.
    pub fn fetch_summary(&mut self) {
        if self.fetch_started || self.session.is_closed() {
            return;
        }
        self.fetch_started = true;
        let patient_id = self.session.identity().patient_id();
        log::debug!("fetching patient {} summary", patient_id);
        self.fetch_task = Some(self.runtime.spawn(fetch_with_retry(
            self.fetcher.clone(),
            patient_id,
            self.session_config.clone(),
            self.summary_tx.clone(),
        )));
    }

    /// Apply every event already queued. Returns how many were applied.
    pub fn poll(&mut self) -> usize {
        let mut applied = 0;
        loop {
            let next = self
                .transport_rx
                .as_mut()
                .and_then(|rx| rx.try_recv().ok())
                .map(SessionEvent::Transport)
                .or_else(|| self.summary_rx.as_mut().and_then(|rx| rx.try_recv().ok()));
            let Some(event) = next else {
                break;
            };
            self.session.apply(event);
            applied += 1;
        }
        applied
    }

    /// Wait for the next event and apply it. Returns false once the channel is closed.
    pub async fn next_event(&mut self) -> bool {
        let event = {
            let (Some(transport_rx), Some(summary_rx)) =
                (self.transport_rx.as_mut(), self.summary_rx.as_mut())
            else {
                return false;
            };
            tokio::select! {
                Some(ev) = transport_rx.recv() => SessionEvent::Transport(ev),
                Some(ev) = summary_rx.recv() => ev,
                else => return false,
            }
        };
        self.session.apply(event);
        true
    }

    pub fn session(&self) -> &ConversationSession {
        &self.session
    }

    pub fn transcript(&self) -> &Transcript {
        self.session.transcript()
    }

    pub fn summary(&self) -> Option<&PatientSummary> {
        self.session.summary()
    }

    pub fn input_mut(&mut self) -> &mut String {
        self.session.input_mut()
    }

    /// False until patient details and the connection are both up, so user turns never
    /// precede `start_conversation`. False again once closed.
    pub fn accepts_input(&self) -> bool {
        !self.session.is_closed() && !ViewState::of(&self.session).is_blocking()
    }

    pub fn send_user_message(&mut self, text: &str) -> bool {
        self.session.send_user_message(text)
    }

    pub fn submit_input(&mut self) -> bool {
        self.session.submit_input()
    }

    pub fn is_closed(&self) -> bool {
        self.session.is_closed()
    }

    /// Abort the fetch, close the transport and stop listening. Only the first call does anything.
    pub fn close(&mut self) {
        if self.session.is_closed() {
            return;
        }
        if let Some(task) = self.fetch_task.take() {
            task.abort();
        }
        self.session.close();
        self.transport_rx = None;
        self.summary_rx = None;
    }
}

impl Drop for ConversationChannel {
    fn drop(&mut self) {
        self.close();
    }
}

async fn fetch_with_retry(
    fetcher: Arc<dyn SummaryFetcher>,
    patient_id: u64,
    config: SessionConfig,
    tx: mpsc::UnboundedSender<SessionEvent>,
) {
    let max_attempts = config.retry.max_attempts.max(1);
    for attempt in 1..=max_attempts {
        let error = match tokio::time::timeout(
            config.fetch_timeout(),
            fetch_summary(fetcher.as_ref(), patient_id),
        )
        .await
        {
            Ok(Ok(summary)) => {
                let _ = tx.send(SessionEvent::SummaryLoaded(summary));
                return;
            }
            Ok(Err(e)) => e.to_string(),
            Err(_) => format!("timed out after {} ms", config.fetch_timeout_ms),
        };
        let will_retry = attempt < max_attempts;
        let failed = SessionEvent::SummaryFailed {
            error,
            attempt,
            will_retry,
        };
        if tx.send(failed).is_err() {
            return;
        }
        if will_retry {
            tokio::time::sleep(config.retry.backoff(attempt)).await;
        }
    }
}
