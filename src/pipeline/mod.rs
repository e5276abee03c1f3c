//! The threads that move audio and control messages around.

mod capture;
mod dispatch;
mod playback;

pub use capture::{CapturePipeline, CaptureStats};
pub use dispatch::{DispatchStats, Dispatcher};
pub use playback::{PlaybackPipeline, PlaybackStats};
