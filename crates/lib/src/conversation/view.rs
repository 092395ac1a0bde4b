//! Presentation model for an open conversation, independent of the UI toolkit.
//!
//! The host renders from [`ConversationView`]: the view state (loading / degraded / ready),
//! the header line, the transcript, and a one-shot scroll-to-latest request per frame.

use super::channel::ConversationChannel;
use super::session::ConversationSession;

/// Ignore sub-pixel jitter when comparing rendered content sizes.
const CONTENT_SIZE_EPSILON: f32 = 1.0;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewState {
    /// Waiting for the first connect and patient summary; show a spinner.
    Loading,
    /// Something failed. `blocking` while the conversation has never been ready.
    Degraded { reason: String, blocking: bool },
    Ready,
    Closed,
}

impl ViewState {
    pub fn of(session: &ConversationSession) -> Self {
        if session.is_closed() {
            return ViewState::Closed;
        }
        if session.is_ready() {
            return ViewState::Ready;
        }
        let blocking = !session.has_been_ready();
        match session.failure() {
            Some(failure) => ViewState::Degraded {
                reason: failure.to_string(),
                blocking,
            },
            None if blocking => ViewState::Loading,
            None => ViewState::Degraded {
                reason: "reconnecting".to_string(),
                blocking: false,
            },
        }
    }

    pub fn is_blocking(&self) -> bool {
        match self {
            ViewState::Loading => true,
            ViewState::Degraded { blocking, .. } => *blocking,
            ViewState::Ready | ViewState::Closed => false,
        }
    }
}

/// Scroll-to-latest bookkeeping. A request is raised when the transcript grows, the input
/// gains or loses focus, or the rendered content changes size, and only while there is
/// something to scroll to.
#[derive(Debug, Default)]
pub struct ScrollState {
    transcript_len: usize,
    input_focused: bool,
    content_height: f32,
    pending: bool,
}

impl ScrollState {
    pub fn observe_transcript(&mut self, len: usize) {
        if len != self.transcript_len {
            self.transcript_len = len;
            self.request();
        }
    }

    /// Focus on the input stands in for the on-screen keyboard opening.
    pub fn observe_input_focus(&mut self, focused: bool) {
        if focused != self.input_focused {
            self.input_focused = focused;
            self.request();
        }
    }

    pub fn observe_content_height(&mut self, height: f32) {
        if (height - self.content_height).abs() > CONTENT_SIZE_EPSILON {
            self.content_height = height;
            self.request();
        }
    }

    /// True at most once per raised request.
    pub fn take_request(&mut self) -> bool {
        std::mem::take(&mut self.pending)
    }

    fn request(&mut self) {
        if self.transcript_len > 0 {
            self.pending = true;
        }
    }
}

/// Host navigation (e.g. a tab bar) that is hidden while a conversation is on screen.
pub trait NavigationChromeController {
    fn hide(&self);
    fn show(&self);
}

pub struct ConversationView<C: NavigationChromeController> {
    channel: ConversationChannel,
    chrome: C,
    scroll: ScrollState,
    mounted: bool,
    closed: bool,
}

impl<C: NavigationChromeController> ConversationView<C> {
    pub fn new(channel: ConversationChannel, chrome: C) -> Self {
        Self {
            channel,
            chrome,
            scroll: ScrollState::default(),
            mounted: false,
            closed: false,
        }
    }

    /// Called when the view appears. Hides the navigation chrome.
    pub fn mount(&mut self) {
        if self.mounted || self.closed {
            return;
        }
        self.mounted = true;
        self.chrome.hide();
    }

    /// The close affordance: restore the chrome, then shut the channel down before returning.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.chrome.show();
        self.channel.close();
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Apply queued network events. Call once per frame.
    pub fn poll(&mut self) -> usize {
        let applied = self.channel.poll();
        self.scroll.observe_transcript(self.channel.transcript().len());
        applied
    }

    pub fn state(&self) -> ViewState {
        ViewState::of(self.channel.session())
    }

    /// Patient header once the details are loaded.
    pub fn header(&self) -> Option<String> {
        self.channel.summary().map(|s| s.header())
    }

    pub fn narrative(&self) -> Option<&str> {
        self.channel.summary().map(|s| s.narrative.as_str())
    }

    pub fn channel(&self) -> &ConversationChannel {
        &self.channel
    }

    pub fn input_mut(&mut self) -> &mut String {
        self.channel.input_mut()
    }

    /// Send the input buffer (Enter / send button).
    pub fn submit(&mut self) -> bool {
        let sent = self.channel.submit_input();
        self.scroll.observe_transcript(self.channel.transcript().len());
        sent
    }

    pub fn on_input_focus(&mut self, focused: bool) {
        self.scroll.observe_input_focus(focused);
    }

    pub fn on_content_height(&mut self, height: f32) {
        self.scroll.observe_content_height(height);
    }

    pub fn take_scroll_request(&mut self) -> bool {
        self.scroll.take_request()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{ApiError, PatientDetails};
    use crate::config::SessionConfig;
    use crate::conversation::channel::ChannelOptions;
    use crate::conversation::summary::SummaryFetcher;
    use crate::credentials::SessionIdentity;
    use async_trait::async_trait;
    use std::cell::RefCell;
    use std::rc::Rc;
    use std::sync::Arc;
    use tokio::runtime::Handle;

    #[derive(Clone, Default)]
    struct Chrome(Rc<RefCell<Vec<&'static str>>>);

    impl NavigationChromeController for Chrome {
        fn hide(&self) {
            self.0.borrow_mut().push("hide");
        }

        fn show(&self) {
            self.0.borrow_mut().push("show");
        }
    }

    struct Jane;

    #[async_trait]
    impl SummaryFetcher for Jane {
        async fn fetch_details(&self, patient_id: u64) -> Result<PatientDetails, ApiError> {
            Ok(PatientDetails {
                id: patient_id,
                name: "Jane Doe".to_string(),
                age: "63".to_string(),
            })
        }

        async fn fetch_narrative(&self, _patient_id: u64) -> Result<String, ApiError> {
            Ok("Jane is 63.".to_string())
        }
    }

    fn view() -> (ConversationView<Chrome>, Chrome) {
        let identity = SessionIdentity::new("doc@example.com", 42).unwrap();
        let options = ChannelOptions {
            base_url: "http://127.0.0.1:9".to_string(),
            socket_path: "/socket.io".to_string(),
            session: SessionConfig::default(),
        };
        let channel =
            ConversationChannel::new(identity, Arc::new(Jane), options, Handle::current()).unwrap();
        let chrome = Chrome::default();
        (ConversationView::new(channel, chrome.clone()), chrome)
    }

    #[tokio::test]
    async fn chrome_hidden_on_mount_and_shown_on_close() {
        let (mut v, chrome) = view();
        v.mount();
        v.mount();
        assert_eq!(*chrome.0.borrow(), vec!["hide"]);
        v.close();
        v.close();
        assert_eq!(*chrome.0.borrow(), vec!["hide", "show"]);
        assert!(v.channel().is_closed());
        assert_eq!(v.state(), ViewState::Closed);
    }

    #[tokio::test]
    async fn starts_loading_and_blocking() {
        let (v, _) = view();
        assert_eq!(v.state(), ViewState::Loading);
        assert!(v.state().is_blocking());
        assert!(v.header().is_none());
    }

    #[tokio::test]
    async fn header_after_summary_loads() {
        let (mut v, _) = view();
        v.channel.fetch_summary();
        tokio::time::timeout(std::time::Duration::from_secs(5), async {
            while v.header().is_none() {
                v.poll();
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        assert_eq!(v.header().unwrap(), "JANE DOE (63 Y/O)");
        assert_eq!(v.narrative(), Some("Jane is 63."));
        // Not connected yet.
        assert_eq!(v.state(), ViewState::Loading);
    }

    #[tokio::test]
    async fn scroll_requested_on_growth_and_focus() {
        let (mut v, _) = view();
        // Nothing to scroll to yet.
        v.on_input_focus(true);
        assert!(!v.take_scroll_request());

        v.input_mut().push_str("Where does it hurt?");
        assert!(v.submit());
        assert!(v.take_scroll_request());
        assert!(!v.take_scroll_request());

        v.on_input_focus(false);
        assert!(v.take_scroll_request());

        v.on_content_height(120.0);
        assert!(v.take_scroll_request());
        v.on_content_height(120.4);
        assert!(!v.take_scroll_request());
    }

    #[test]
    fn connected_but_loading_blocks_until_conversation_started() {
        use crate::conversation::session::tests::{jane, MockTransport};
        use crate::conversation::session::SessionEvent;
        use crate::socket::{ClientEvent, TransportEvent};

        let transport = MockTransport::default();
        let identity = SessionIdentity::new("doc@example.com", 42).unwrap();
        let mut s = ConversationSession::new(identity, Box::new(transport.clone()));
        transport.0.lock().unwrap().connected = true;
        s.apply(SessionEvent::Transport(TransportEvent::Connected));
        assert!(ViewState::of(&s).is_blocking());

        s.apply(SessionEvent::SummaryLoaded(jane()));
        assert_eq!(ViewState::of(&s), ViewState::Ready);
        assert!(s.send_user_message("I have chest pain"));
        let emitted = transport.0.lock().unwrap().emitted.clone();
        assert!(matches!(
            emitted.as_slice(),
            [ClientEvent::StartConversation(_), ClientEvent::ChatMessage(_)]
        ));
    }

    #[test]
    fn scroll_state_ignores_empty_transcript() {
        let mut s = ScrollState::default();
        s.observe_content_height(300.0);
        s.observe_input_focus(true);
        s.observe_transcript(0);
        assert!(!s.take_request());
        s.observe_transcript(1);
        assert!(s.take_request());
    }
}
