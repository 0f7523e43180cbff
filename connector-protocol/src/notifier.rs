use parking_lot::Mutex;

type Listener = Box<dyn FnOnce() + Send>;

#[derive(Default)]
struct NotifierState {
    fired: bool,
    listeners: Vec<Listener>,
}

/// One-shot disconnect event with an observer list.
///
/// `fire` checks and sets the flag under one lock, so concurrent triggers
/// (port closed, access revoked) notify observers exactly once. Listeners
/// run outside the lock and may re-enter the notifier.
#[derive(Default)]
pub struct DisconnectNotifier {
    state: Mutex<NotifierState>,
}

impl DisconnectNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener. Returns `false` (and drops the listener) if the
    /// disconnect already happened; the event is never re-delivered.
    pub fn on_disconnect<F>(&self, listener: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        let mut state = self.state.lock();
        if state.fired {
            return false;
        }
        state.listeners.push(Box::new(listener));
        true
    }

    /// Fire the event. Returns `true` only for the call that actually fired.
    pub fn fire(&self) -> bool {
        let listeners = {
            let mut state = self.state.lock();
            if state.fired {
                return false;
            }
            state.fired = true;
            std::mem::take(&mut state.listeners)
        };

        tracing::debug!(listeners = listeners.len(), "disconnect fired");
        for listener in listeners {
            listener();
        }
        true
    }

    pub fn is_disconnected(&self) -> bool {
        self.state.lock().fired
    }
}

impl std::fmt::Debug for DisconnectNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("DisconnectNotifier")
            .field("fired", &state.fired)
            .field("listeners", &state.listeners.len())
            .finish()
    }
}
