//! One-shot guard for the `start_conversation` event.

/// `NotReady` until both preconditions hold, `ReadyNotSent` once they do, `Sent` forever after.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HandshakeState {
    #[default]
    NotReady,
    ReadyNotSent,
    Sent,
}

impl HandshakeState {
    /// Re-evaluate with the current preconditions. Never leaves `Sent`.
    pub fn evaluate(self, connected: bool, summary_ready: bool) -> Self {
        match self {
            HandshakeState::Sent => HandshakeState::Sent,
            _ if connected && summary_ready => HandshakeState::ReadyNotSent,
            _ => HandshakeState::NotReady,
        }
    }

    pub fn is_sent(self) -> bool {
        self == HandshakeState::Sent
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn needs_both_preconditions() {
        let s = HandshakeState::default();
        assert_eq!(s.evaluate(true, false), HandshakeState::NotReady);
        assert_eq!(s.evaluate(false, true), HandshakeState::NotReady);
        assert_eq!(s.evaluate(true, true), HandshakeState::ReadyNotSent);
        // Losing a precondition before sending drops back.
        assert_eq!(
            HandshakeState::ReadyNotSent.evaluate(false, true),
            HandshakeState::NotReady
        );
    }

    #[test]
    fn sent_is_terminal() {
        for (c, s) in [(false, false), (true, false), (false, true), (true, true)] {
            assert_eq!(HandshakeState::Sent.evaluate(c, s), HandshakeState::Sent);
        }
    }
}
