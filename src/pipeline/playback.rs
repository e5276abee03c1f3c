use std::thread::JoinHandle;
use std::time::Duration;

use crate::audio::{AudioParams, AudioSink, PlaybackQueue};
use crate::session::RunningFlag;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PlaybackStats {
    pub frames_played: u64,
    pub silence_frames: u64,
    pub write_errors: u64,
}

/// Queue -> speaker at the device's pace; silence fills the gaps so the
/// device never runs dry while the network is bursty.
pub struct PlaybackPipeline<W: AudioSink> {
    output: W,
    queue: PlaybackQueue,
    running: RunningFlag,
    silence: Vec<i16>,
    underrun_sleep: Duration,
}

impl<W: AudioSink + 'static> PlaybackPipeline<W> {
    pub fn new(
        output: W,
        params: AudioParams,
        queue: PlaybackQueue,
        running: RunningFlag,
        underrun_sleep: Duration,
    ) -> Self {
        Self {
            output,
            queue,
            running,
            silence: params.silence(),
            underrun_sleep,
        }
    }

    pub fn spawn(self) -> std::io::Result<JoinHandle<PlaybackStats>> {
        std::thread::Builder::new()
            .name("voxlink-playback".into())
            .spawn(move || self.run())
    }

    pub fn run(mut self) -> PlaybackStats {
        let mut stats = PlaybackStats::default();

        tracing::info!("Audio playback started");
        while self.running.is_running() {
            match self.queue.try_pop() {
                Some(frame) => {
                    if let Err(e) = self.output.write(&frame) {
                        stats.write_errors += 1;
                        tracing::warn!("Playback write failed: {}", e);
                    } else {
                        stats.frames_played += 1;
                    }
                }
                None => {
                    if let Err(e) = self.output.write(&self.silence) {
                        stats.write_errors += 1;
                        tracing::debug!("Silence write failed: {}", e);
                    } else {
                        stats.silence_frames += 1;
                    }
                    std::thread::sleep(self.underrun_sleep);
                }
            }
        }

        tracing::info!("Audio playback stopped");
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::RecordingOutput;
    use std::time::Instant;

    #[test]
    fn test_plays_queued_frames_in_order() {
        let params = AudioParams::default();
        let queue = PlaybackQueue::unbounded();
        for i in 1..=3 {
            queue.push(vec![i; params.frame_len()]);
        }

        let running = RunningFlag::new();
        let output = RecordingOutput::stop_after(3, running.clone());
        let written = output.written();
        let stats = PlaybackPipeline::new(
            output,
            params,
            queue.clone(),
            running,
            Duration::from_millis(1),
        )
        .run();

        assert_eq!(stats.frames_played, 3);
        assert_eq!(stats.silence_frames, 0);
        let written = written.lock();
        let firsts: Vec<i16> = written.iter().map(|f| f[0]).collect();
        assert_eq!(firsts, vec![1, 2, 3]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_empty_queue_writes_silence_without_blocking() {
        let params = AudioParams::default();
        let running = RunningFlag::new();
        let output = RecordingOutput::stop_after(2, running.clone());
        let written = output.written();

        let started = Instant::now();
        let stats = PlaybackPipeline::new(
            output,
            params,
            PlaybackQueue::unbounded(),
            running,
            Duration::from_millis(5),
        )
        .run();

        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(stats.silence_frames, 2);
        for frame in written.lock().iter() {
            assert_eq!(frame.len(), params.frame_len());
            assert!(frame.iter().all(|&s| s == 0));
        }
    }
}
