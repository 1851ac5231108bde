use std::fmt;

use pbx_core::{Extension, TuState};

/// One server-to-client notification, rendered as a single LF-terminated line.
///
/// Clients receive a notification for every operation they invoke, including
/// no-ops, plus one whenever a peer operation changes their state. The only
/// silent case is a chat attempted outside an established call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notification<'a> {
    /// `ON_HOOK <ext>` — carries the unit's own extension
    OnHook(Extension),
    /// `CONNECTED <peer_ext>` — carries the peer's extension
    Connected(Extension),
    /// `CONNECTED <msg>` — delivery of the peer's chat payload
    ChatRelay(&'a str),
    /// Bare state name, used for every other state
    State(TuState),
}

impl Notification<'_> {
    /// The full wire line, including the terminating LF.
    pub fn to_line(&self) -> String {
        format!("{}\n", self)
    }
}

impl fmt::Display for Notification<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notification::OnHook(ext) => write!(f, "{} {}", TuState::OnHook, ext),
            Notification::Connected(ext) => write!(f, "{} {}", TuState::Connected, ext),
            Notification::ChatRelay(msg) => write!(f, "{} {}", TuState::Connected, msg),
            Notification::State(state) => write!(f, "{}", state),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_argument_forms() {
        assert_eq!(Notification::OnHook(4).to_line(), "ON_HOOK 4\n");
        assert_eq!(Notification::Connected(11).to_line(), "CONNECTED 11\n");
        assert_eq!(Notification::ChatRelay("hello there").to_line(), "CONNECTED hello there\n");
    }

    #[test]
    fn renders_bare_states() {
        assert_eq!(Notification::State(TuState::Ringing).to_line(), "RINGING\n");
        assert_eq!(Notification::State(TuState::DialTone).to_line(), "DIAL_TONE\n");
        assert_eq!(Notification::State(TuState::RingBack).to_line(), "RING_BACK\n");
        assert_eq!(Notification::State(TuState::BusySignal).to_line(), "BUSY_SIGNAL\n");
        assert_eq!(Notification::State(TuState::Error).to_line(), "ERROR\n");
    }

    #[test]
    fn empty_chat_relay_keeps_separator() {
        assert_eq!(Notification::ChatRelay("").to_line(), "CONNECTED \n");
    }
}
