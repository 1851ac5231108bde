use std::fmt;

/// Extension number assigned by the exchange when a unit registers.
/// Dense in `[0, max_extensions)`.
pub type Extension = u32;

/// The states a telephone unit moves through during call signalling.
///
/// Only the unit's own operations change its state; a peer's state is
/// changed through the same operations while both unit locks are held.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TuState {
    /// Handset on the switchhook, no call activity
    OnHook,
    /// An incoming call is ringing this unit
    Ringing,
    /// Handset lifted, ready to dial
    DialTone,
    /// Waiting for the dialed unit to answer
    RingBack,
    /// Dialed unit was busy, unreachable, or was the dialer itself
    BusySignal,
    /// In an established call with a peer
    Connected,
    /// Dialed something that does not resolve to a unit
    Error,
}

impl TuState {
    /// Wire name of the state, exactly as sent in notifications.
    pub fn as_str(&self) -> &'static str {
        match self {
            TuState::OnHook => "ON_HOOK",
            TuState::Ringing => "RINGING",
            TuState::DialTone => "DIAL_TONE",
            TuState::RingBack => "RING_BACK",
            TuState::BusySignal => "BUSY_SIGNAL",
            TuState::Connected => "CONNECTED",
            TuState::Error => "ERROR",
        }
    }

    /// True for the states in which a unit holds a peer reference.
    pub fn has_peer(&self) -> bool {
        matches!(self, TuState::Ringing | TuState::RingBack | TuState::Connected)
    }
}

impl fmt::Display for TuState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
