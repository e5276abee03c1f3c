use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::machine::{SessionState, Speaking};

/// Process-wide run flag. Cleared on user shutdown or when the connection ends;
/// every pipeline loop checks it once per iteration.
#[derive(Clone, Debug)]
pub struct RunningFlag(Arc<AtomicBool>);

impl RunningFlag {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(true)))
    }

    pub fn is_running(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn stop(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl Default for RunningFlag {
    fn default() -> Self {
        Self::new()
    }
}

/// Read-only view of the session for other threads.
///
/// Only the dispatcher publishes into it. Each field is its own atomic so the
/// capture thread can poll `is_listening` without locking.
#[derive(Clone, Default)]
pub struct SessionView {
    listening: Arc<AtomicBool>,
    speaking: Arc<AtomicBool>,
    session_id: Arc<RwLock<Option<String>>>,
}

impl SessionView {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn publish(&self, state: &SessionState) {
        // Clear before set so a reader never sees both flags up
        if state.listening {
            self.speaking
                .store(state.speaking == Speaking::Speaking, Ordering::SeqCst);
            self.listening.store(true, Ordering::SeqCst);
        } else {
            self.listening.store(false, Ordering::SeqCst);
            self.speaking
                .store(state.speaking == Speaking::Speaking, Ordering::SeqCst);
        }

        let mut session_id = self.session_id.write();
        if *session_id != state.session_id {
            *session_id = state.session_id.clone();
        }
    }

    pub fn is_listening(&self) -> bool {
        self.listening.load(Ordering::SeqCst)
    }

    pub fn is_speaking(&self) -> bool {
        self.speaking.load(Ordering::SeqCst)
    }

    pub fn session_id(&self) -> Option<String> {
        self.session_id.read().clone()
    }
}
