//! Conversation state driven by inbound control messages. No I/O here.

use super::protocol::{ControlMessage, ListenMode, OutboundMessage, TtsPhase};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Speaking {
    #[default]
    Idle,
    Speaking,
}

/// `listening` and `Speaking::Speaking` are never both set.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SessionState {
    pub listening: bool,
    pub speaking: Speaking,
    pub session_id: Option<String>,
}

impl SessionState {
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Result of applying one control message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub state: SessionState,
    pub outbound: Option<OutboundMessage>,
}

/// Compute the next state for `msg`. Rules are checked in order, first match wins:
/// hello, tts start, tts stop after speaking, goodbye for the current session,
/// anything else.
pub fn apply(state: &SessionState, msg: &ControlMessage, mode: ListenMode) -> Transition {
    let mut next = state.clone();

    let outbound = match msg {
        ControlMessage::Hello { session_id } => {
            next.session_id = Some(session_id.clone());
            next.speaking = Speaking::Idle;
            next.listening = true;
            Some(OutboundMessage::ListenStart {
                session_id: session_id.clone(),
                mode,
            })
        }
        ControlMessage::Tts {
            state: TtsPhase::Start,
            ..
        } => {
            next.speaking = Speaking::Speaking;
            next.listening = false;
            None
        }
        ControlMessage::Tts {
            state: TtsPhase::Stop,
            session_id,
        } if state.speaking == Speaking::Speaking => {
            // Synthesis finished: resume listening
            if let Some(sid) = session_id {
                next.session_id = Some(sid.clone());
            }
            next.speaking = Speaking::Idle;
            next.listening = true;
            Some(OutboundMessage::ListenStart {
                session_id: next.session_id.clone().unwrap_or_default(),
                mode,
            })
        }
        ControlMessage::Goodbye {
            session_id: Some(sid),
        } if state.session_id.as_deref() == Some(sid.as_str()) => {
            next.session_id = None;
            None
        }
        _ => None,
    };

    Transition {
        state: next,
        outbound,
    }
}

/// Owner of the session state; messages go through it one at a time, in
/// arrival order.
#[derive(Debug, Default)]
pub struct SessionMachine {
    state: SessionState,
    mode: ListenMode,
}

impl SessionMachine {
    pub fn new(mode: ListenMode) -> Self {
        Self {
            state: SessionState::default(),
            mode,
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn handle(&mut self, msg: &ControlMessage) -> Option<OutboundMessage> {
        let Transition { state, outbound } = apply(&self.state, msg, self.mode);
        if state != self.state {
            tracing::debug!(
                "Session: listening={} speaking={:?} session_id={:?}",
                state.listening,
                state.speaking,
                state.session_id
            );
        }
        self.state = state;
        outbound
    }

    pub fn reset(&mut self) {
        self.state.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hello(sid: &str) -> ControlMessage {
        ControlMessage::Hello {
            session_id: sid.into(),
        }
    }

    fn tts(state: TtsPhase, sid: &str) -> ControlMessage {
        ControlMessage::Tts {
            state,
            session_id: Some(sid.into()),
        }
    }

    fn goodbye(sid: &str) -> ControlMessage {
        ControlMessage::Goodbye {
            session_id: Some(sid.into()),
        }
    }

    fn listen_start(sid: &str) -> Option<OutboundMessage> {
        Some(OutboundMessage::ListenStart {
            session_id: sid.into(),
            mode: ListenMode::Auto,
        })
    }

    #[test]
    fn test_initial_state() {
        let machine = SessionMachine::default();
        assert_eq!(machine.state(), &SessionState::default());
        assert!(!machine.state().listening);
        assert_eq!(machine.state().speaking, Speaking::Idle);
        assert!(machine.state().session_id.is_none());
    }

    #[test]
    fn test_hello_starts_listening() {
        let mut machine = SessionMachine::new(ListenMode::Auto);
        assert_eq!(machine.handle(&hello("sid")), listen_start("sid"));
        assert_eq!(
            machine.state(),
            &SessionState {
                listening: true,
                speaking: Speaking::Idle,
                session_id: Some("sid".into()),
            }
        );
    }

    #[test]
    fn test_tts_start_stops_listening_silently() {
        let mut machine = SessionMachine::new(ListenMode::Auto);
        machine.handle(&hello("sid"));
        assert_eq!(machine.handle(&tts(TtsPhase::Start, "sid")), None);
        assert!(!machine.state().listening);
        assert_eq!(machine.state().speaking, Speaking::Speaking);
    }

    #[test]
    fn test_tts_stop_resumes_listening() {
        let mut machine = SessionMachine::new(ListenMode::Auto);
        machine.handle(&hello("old"));
        machine.handle(&tts(TtsPhase::Start, "old"));
        assert_eq!(machine.handle(&tts(TtsPhase::Stop, "new")), listen_start("new"));
        assert!(machine.state().listening);
        assert_eq!(machine.state().speaking, Speaking::Idle);
        assert_eq!(machine.state().session_id.as_deref(), Some("new"));
    }

    #[test]
    fn test_tts_stop_without_session_keeps_current() {
        let mut machine = SessionMachine::new(ListenMode::Auto);
        machine.handle(&hello("sid"));
        machine.handle(&tts(TtsPhase::Start, "sid"));
        let out = machine.handle(&ControlMessage::Tts {
            state: TtsPhase::Stop,
            session_id: None,
        });
        assert_eq!(out, listen_start("sid"));
    }

    #[test]
    fn test_tts_stop_while_idle_is_ignored() {
        let mut machine = SessionMachine::new(ListenMode::Auto);
        machine.handle(&hello("sid"));
        let before = machine.state().clone();
        assert_eq!(machine.handle(&tts(TtsPhase::Stop, "sid")), None);
        assert_eq!(machine.state(), &before);
    }

    #[test]
    fn test_only_one_listen_start_per_stop() {
        let mut machine = SessionMachine::new(ListenMode::Auto);
        machine.handle(&hello("sid"));
        machine.handle(&tts(TtsPhase::Start, "sid"));
        assert!(machine.handle(&tts(TtsPhase::Stop, "sid")).is_some());
        // Later unrelated messages must not re-trigger listen start
        let unknown = ControlMessage::Unknown { kind: "stt".into() };
        assert_eq!(machine.handle(&unknown), None);
        assert_eq!(machine.handle(&tts(TtsPhase::Stop, "sid")), None);
    }

    #[test]
    fn test_goodbye_for_other_session_is_ignored() {
        let mut machine = SessionMachine::new(ListenMode::Auto);
        machine.handle(&hello("sid"));
        let before = machine.state().clone();
        assert_eq!(machine.handle(&goodbye("other")), None);
        assert_eq!(machine.state(), &before);
    }

    #[test]
    fn test_goodbye_clears_session() {
        let mut machine = SessionMachine::new(ListenMode::Auto);
        machine.handle(&hello("sid"));
        assert_eq!(machine.handle(&goodbye("sid")), None);
        assert!(machine.state().session_id.is_none());
    }

    #[test]
    fn test_malformed_and_unknown_change_nothing() {
        let mut machine = SessionMachine::new(ListenMode::Auto);
        machine.handle(&hello("sid"));
        let before = machine.state().clone();
        for msg in [
            ControlMessage::Malformed { raw: "not json".into() },
            ControlMessage::Unknown { kind: "llm".into() },
            ControlMessage::Goodbye { session_id: None },
        ] {
            assert_eq!(machine.handle(&msg), None);
            assert_eq!(machine.state(), &before);
        }
    }

    #[test]
    fn test_reset() {
        let mut machine = SessionMachine::new(ListenMode::Auto);
        machine.handle(&hello("sid"));
        machine.reset();
        assert_eq!(machine.state(), &SessionState::default());
    }

    #[test]
    fn test_listen_mode_is_carried() {
        let mut machine = SessionMachine::new(ListenMode::Manual);
        assert_eq!(
            machine.handle(&hello("sid")),
            Some(OutboundMessage::ListenStart {
                session_id: "sid".into(),
                mode: ListenMode::Manual,
            })
        );
    }

    /// Every message sequence up to length 5 over a small alphabet keeps
    /// listening and speaking mutually exclusive.
    #[test]
    fn test_never_listening_while_speaking() {
        let alphabet = vec![
            hello("a"),
            hello("b"),
            tts(TtsPhase::Start, "a"),
            tts(TtsPhase::Stop, "a"),
            tts(TtsPhase::Stop, "b"),
            goodbye("a"),
            goodbye("b"),
            ControlMessage::Unknown { kind: "stt".into() },
        ];

        fn walk(state: &SessionState, depth: usize, alphabet: &[ControlMessage]) {
            if depth == 0 {
                return;
            }
            for msg in alphabet {
                let next = apply(state, msg, ListenMode::Auto).state;
                assert!(
                    !(next.listening && next.speaking == Speaking::Speaking),
                    "{state:?} + {msg:?} -> {next:?}"
                );
                walk(&next, depth - 1, alphabet);
            }
        }

        walk(&SessionState::default(), 5, &alphabet);
    }
}
