//! One conversation with a simulated patient: transcript, handshake, session state machine,
//! and the runtime driver and view model built on top of it.

mod channel;
mod handshake;
mod message;
mod session;
mod summary;
mod transcript;
mod view;

pub use channel::{ChannelOptions, ConversationChannel};
pub use handshake::HandshakeState;
pub use message::{Author, Message};
pub use session::{ConversationSession, SessionEvent, SessionFailure};
pub use summary::{fetch_summary, PatientSummary, SummaryFetcher};
pub use transcript::Transcript;
pub use view::{ConversationView, NavigationChromeController, ScrollState, ViewState};
