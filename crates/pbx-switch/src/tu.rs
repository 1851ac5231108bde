use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

use pbx_core::{Extension, TuState};
use pbx_wire::Notification;

use crate::link::ClientLink;

static NEXT_TU_ID: AtomicU64 = AtomicU64::new(0);

/// Mutable half of a telephone unit, guarded by the unit mutex.
struct TuBody {
    link: Box<dyn ClientLink>,
    state: TuState,
    peer: Option<Tu>,
}

struct TuShared {
    /// Stable identity; pair operations take unit locks in ascending id order
    id: u64,
    /// Assigned once at registration, readable without the unit lock
    ext: OnceLock<Extension>,
    body: Mutex<TuBody>,
}

/// Shared-ownership handle to a telephone unit.
///
/// Clones refer to the same unit; the connection is torn down when the last
/// handle drops. A registered unit has up to three holders: its worker, the
/// registry slot, and (during a call) the peer's back-reference. Every
/// call-teardown path clears both peer fields while holding both locks, so
/// the a↔b reference cycle is always broken before the last outside handle
/// goes away.
#[derive(Clone)]
pub struct Tu {
    shared: Arc<TuShared>,
}

// ─── Pair locking ─────────────────────────────────────────────────

/// Acquire both unit locks in ascending id order, returning `(a, b)` guards.
/// Callers must have ruled out `a` and `b` being the same unit.
fn lock_ordered<'a>(a: &'a Tu, b: &'a Tu) -> (MutexGuard<'a, TuBody>, MutexGuard<'a, TuBody>) {
    debug_assert!(a.shared.id != b.shared.id);
    if a.shared.id < b.shared.id {
        let ga = a.lock_body();
        let gb = b.lock_body();
        (ga, gb)
    } else {
        let gb = b.lock_body();
        let ga = a.lock_body();
        (ga, gb)
    }
}

/// True when `body.peer` still points at `expected`.
fn peer_is(body: &TuBody, expected: &Tu) -> bool {
    body.peer.as_ref().is_some_and(|p| p.same_unit(expected))
}

impl Tu {
    /// Construct a unit bound to a client connection, in ON_HOOK with no
    /// extension and no peer.
    pub fn new(link: Box<dyn ClientLink>) -> Tu {
        Tu {
            shared: Arc::new(TuShared {
                id: NEXT_TU_ID.fetch_add(1, Ordering::Relaxed),
                ext: OnceLock::new(),
                body: Mutex::new(TuBody {
                    link,
                    state: TuState::OnHook,
                    peer: None,
                }),
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.shared.id
    }

    /// Extension assigned at registration, if any.
    pub fn extension(&self) -> Option<Extension> {
        self.shared.ext.get().copied()
    }

    /// Current state. Takes the unit lock.
    pub fn state(&self) -> TuState {
        self.lock_body().state
    }

    /// Current peer, if the unit is in a call. Takes the unit lock.
    pub fn peer(&self) -> Option<Tu> {
        self.lock_body().peer.clone()
    }

    /// Whether two handles refer to the same unit.
    pub fn same_unit(&self, other: &Tu) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    fn lock_body(&self) -> MutexGuard<'_, TuBody> {
        self.shared.body.lock().expect("TU mutex poisoned")
    }

    // ─── Operations ───────────────────────────────────────────────

    /// One-shot extension assignment performed by the registry. Forces the
    /// state back to ON_HOOK and notifies the client of its extension.
    pub fn set_extension(&self, ext: Extension) -> io::Result<()> {
        let mut body = self.lock_body();
        if self.shared.ext.set(ext).is_err() {
            tracing::warn!("tu {} already has an extension, ignoring reassignment", self.id());
        }
        body.state = TuState::OnHook;
        self.notify_current(&mut body)
    }

    /// Lift the handset.
    ///
    /// ON_HOOK becomes DIAL_TONE; RINGING answers the call, moving this unit
    /// and its RING_BACK peer to CONNECTED. Anything else is a no-op that
    /// still notifies the client of its current state.
    pub fn pickup(&self) -> io::Result<()> {
        let mut body = self.lock_body();
        match body.state {
            TuState::OnHook => {
                body.state = TuState::DialTone;
                self.notify_current(&mut body)
            }
            TuState::Ringing => {
                let Some(peer) = body.peer.clone() else {
                    // RINGING always has a peer; resync the client if not
                    return self.notify_current(&mut body);
                };
                drop(body);
                let (mut me, mut other) = lock_ordered(self, &peer);
                // The caller may have hung up while our lock was released
                if me.state != TuState::Ringing || !peer_is(&me, &peer) {
                    drop(other);
                    return self.notify_current(&mut me);
                }
                me.state = TuState::Connected;
                other.state = TuState::Connected;
                let r1 = self.notify_current(&mut me);
                let r2 = peer.notify_current(&mut other);
                r1.and(r2)
            }
            _ => self.notify_current(&mut body),
        }
    }

    /// Dial another unit, or a null target when the command did not resolve
    /// to one.
    ///
    /// Only DIAL_TONE reacts: a null target is ERROR, dialing yourself or a
    /// unit that is off-hook or already in a call is BUSY_SIGNAL, and an
    /// idle target gets linked — caller to RING_BACK, target to RINGING.
    /// The null-target case lives here rather than in the caller so ERROR
    /// can never arise in a state that holds a peer.
    pub fn dial(&self, target: Option<&Tu>) -> io::Result<()> {
        let mut body = self.lock_body();
        if body.state != TuState::DialTone {
            return self.notify_current(&mut body);
        }
        let Some(target) = target else {
            body.state = TuState::Error;
            return self.notify_current(&mut body);
        };
        if self.same_unit(target) {
            body.state = TuState::BusySignal;
            return self.notify_current(&mut body);
        }
        drop(body);

        let (mut me, mut other) = lock_ordered(self, target);
        // Both states may have moved while no lock was held
        if me.state != TuState::DialTone {
            drop(other);
            return self.notify_current(&mut me);
        }
        if other.peer.is_some() || other.state != TuState::OnHook {
            drop(other);
            me.state = TuState::BusySignal;
            return self.notify_current(&mut me);
        }

        me.peer = Some(target.clone());
        other.peer = Some(self.clone());
        me.state = TuState::RingBack;
        other.state = TuState::Ringing;
        tracing::debug!("tu {} ringing tu {}", self.id(), target.id());
        let r1 = self.notify_current(&mut me);
        let r2 = target.notify_current(&mut other);
        r1.and(r2)
    }

    /// Replace the handset.
    ///
    /// CONNECTED and RINGING drop the call, leaving the peer at DIAL_TONE;
    /// RING_BACK cancels an unanswered call, sending the ringing peer back
    /// to ON_HOOK; the parked signal states fall back to ON_HOOK. All
    /// teardown paths unlink both peer fields under both locks.
    pub fn hangup(&self) -> io::Result<()> {
        let mut body = self.lock_body();
        match body.state {
            TuState::Connected | TuState::Ringing => {
                let Some(peer) = body.peer.clone() else {
                    return self.notify_current(&mut body);
                };
                drop(body);
                let (mut me, mut other) = lock_ordered(self, &peer);
                if !matches!(me.state, TuState::Connected | TuState::Ringing) || !peer_is(&me, &peer) {
                    drop(other);
                    return self.notify_current(&mut me);
                }
                me.state = TuState::OnHook;
                other.state = TuState::DialTone;
                me.peer = None;
                other.peer = None;
                let r1 = self.notify_current(&mut me);
                let r2 = peer.notify_current(&mut other);
                r1.and(r2)
            }
            TuState::RingBack => {
                let Some(peer) = body.peer.clone() else {
                    return self.notify_current(&mut body);
                };
                drop(body);
                let (mut me, mut other) = lock_ordered(self, &peer);
                if me.state != TuState::RingBack || !peer_is(&me, &peer) {
                    drop(other);
                    return self.notify_current(&mut me);
                }
                me.state = TuState::OnHook;
                other.state = TuState::OnHook;
                me.peer = None;
                other.peer = None;
                let r1 = self.notify_current(&mut me);
                let r2 = peer.notify_current(&mut other);
                r1.and(r2)
            }
            TuState::DialTone | TuState::BusySignal | TuState::Error => {
                body.state = TuState::OnHook;
                self.notify_current(&mut body)
            }
            TuState::OnHook => self.notify_current(&mut body),
        }
    }

    /// Relay a chat message to the peer of an established call.
    ///
    /// Unlike every other operation, a chat outside CONNECTED fails
    /// silently: nothing is written and an error is returned. On success
    /// the sender sees its own `CONNECTED <peer_ext>` line and the peer
    /// receives the payload.
    pub fn chat(&self, msg: &str) -> io::Result<()> {
        let no_call = || io::Error::new(io::ErrorKind::NotConnected, "no call in progress");

        let body = self.lock_body();
        if body.state != TuState::Connected {
            return Err(no_call());
        }
        let Some(peer) = body.peer.clone() else {
            return Err(no_call());
        };
        drop(body);

        let (mut me, mut other) = lock_ordered(self, &peer);
        if me.state != TuState::Connected || !peer_is(&me, &peer) {
            // The call ended while no lock was held
            return Err(no_call());
        }
        let r1 = self.notify_current(&mut me);
        let r2 = peer.send_line(&mut other, &Notification::ChatRelay(msg).to_line());
        r1.and(r2)
    }

    /// Force both directions of the client transport closed so the owning
    /// worker's next read sees end-of-stream. State is left untouched; the
    /// worker unwinds any call through its normal hangup path.
    pub fn shutdown_link(&self) {
        let body = self.lock_body();
        if let Err(e) = body.link.shutdown_both() {
            tracing::debug!("tu {} transport shutdown failed: {}", self.id(), e);
        }
    }

    // ─── Notifications ────────────────────────────────────────────

    /// Push the notification matching the current state down the client
    /// link. Runs with the unit lock held so a client's notifications stay
    /// in transition order.
    fn notify_current(&self, body: &mut TuBody) -> io::Result<()> {
        let line = match body.state {
            TuState::OnHook => {
                let ext = self.extension().expect("registered TU has an extension");
                Notification::OnHook(ext).to_line()
            }
            TuState::Connected => {
                let peer_ext = body
                    .peer
                    .as_ref()
                    .and_then(|p| p.extension())
                    .expect("connected TU has a registered peer");
                Notification::Connected(peer_ext).to_line()
            }
            state => Notification::State(state).to_line(),
        };
        self.send_line(body, &line)
    }

    fn send_line(&self, body: &mut TuBody, line: &str) -> io::Result<()> {
        tracing::debug!("-> tu {} {}", self.id(), line.trim_end());
        body.link.send_line(line).inspect_err(|e| {
            // Committed transitions stand; the client resynchronizes on the
            // next line that does get through, or its reader sees EOF
            tracing::debug!("tu {} notification write failed: {}", self.id(), e);
        })
    }
}
