//! Connection states and the signal used to wait for them.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::trace;

// ============================================================================
// TransportState
// ============================================================================

/// State of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportState {
    /// Not connected, no background task running.
    Disconnected,
    /// Connect requests are being issued but none has succeeded yet, or the
    /// last one failed at the network level.
    Connecting,
    /// The last connect or handshake exchange completed.
    Connected,
    /// A disconnect is in progress.
    Disconnecting,
    /// The server advised against reconnecting. Terminal until reopened.
    ServerDisconnected,
}

impl TransportState {
    /// Every state.
    pub const ALL: [Self; 5] = [
        Self::Disconnected,
        Self::Connecting,
        Self::Connected,
        Self::Disconnecting,
        Self::ServerDisconnected,
    ];

    #[inline]
    const fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for TransportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "DISCONNECTED",
            Self::Connecting => "CONNECTING",
            Self::Connected => "CONNECTED",
            Self::Disconnecting => "DISCONNECTING",
            Self::ServerDisconnected => "SERVER_DISCONNECTED",
        };
        f.write_str(name)
    }
}

// ============================================================================
// StateSignal
// ============================================================================

/// Current state plus one wake-up source per state.
///
/// Entering a state wakes every task waiting for it, even if the state is
/// left again before those tasks run.
pub(crate) struct StateSignal {
    current: Mutex<TransportState>,
    entered: [Notify; 5],
}

impl StateSignal {
    /// Creates a signal in [`TransportState::Disconnected`].
    pub fn new() -> Self {
        Self {
            current: Mutex::new(TransportState::Disconnected),
            entered: Default::default(),
        }
    }

    /// Returns the current state.
    #[inline]
    pub fn get(&self) -> TransportState {
        *self.current.lock()
    }

    /// Moves to `state`. Returns `false` if already there.
    pub fn set(&self, state: TransportState) -> bool {
        let previous = {
            let mut current = self.current.lock();
            std::mem::replace(&mut *current, state)
        };
        if previous == state {
            return false;
        }
        trace!(from = %previous, to = %state, "State changed");
        self.entered[state.index()].notify_waiters();
        true
    }

    /// Waits until `state` is entered. Returns at once if already there.
    pub async fn wait_for(&self, state: TransportState) {
        let notified = self.entered[state.index()].notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        if self.get() == state {
            return;
        }
        notified.await;
    }
}

// ============================================================================
// Tests
// ============================================================================
