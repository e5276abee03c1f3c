mod machine;
mod protocol;
mod shared;

pub use machine::{apply, SessionMachine, SessionState, Speaking, Transition};
pub use protocol::{
    preview, ControlMessage, ListenMode, OutboundMessage, TtsPhase, PROTOCOL_VERSION,
    TRANSPORT_NAME,
};
pub use shared::{RunningFlag, SessionView};
