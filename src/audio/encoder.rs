use opus::{Application, Channels, Decoder, Encoder};
use thiserror::Error;

use super::{AudioFrame, AudioParams};

/// Upper bound for one encoded packet (recommended by libopus)
const MAX_PACKET_SIZE: usize = 4000;
/// Longest frame opus can emit, used to size the decode buffer
const MAX_FRAME_DURATION_MS: u32 = 120;

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Unsupported channel count: {0}")]
    Channels(u16),
    #[error("Failed to create Opus {0}: {1}")]
    Create(&'static str, opus::Error),
    #[error("Expected {expected} samples, got {actual}")]
    FrameLength { expected: usize, actual: usize },
    #[error("Encoding failed: {0}")]
    Encode(opus::Error),
    #[error("Decoding failed: {0}")]
    Decode(opus::Error),
    #[error("Codec produced no output")]
    Empty,
}

fn opus_channels(channels: u16) -> Result<Channels, CodecError> {
    match channels {
        1 => Ok(Channels::Mono),
        2 => Ok(Channels::Stereo),
        other => Err(CodecError::Channels(other)),
    }
}

/// Opus encoder for outgoing microphone frames
pub struct OpusEncoder {
    encoder: Encoder,
    frame_len: usize,
    output: Vec<u8>,
}

impl OpusEncoder {
    pub fn new(params: AudioParams) -> Result<Self, CodecError> {
        let encoder = Encoder::new(
            params.sample_rate,
            opus_channels(params.channels)?,
            Application::Voip, // Optimized for voice
        )
        .map_err(|e| CodecError::Create("encoder", e))?;

        Ok(Self {
            encoder,
            frame_len: params.frame_len(),
            output: vec![0u8; MAX_PACKET_SIZE],
        })
    }

    /// Encode one PCM frame to an Opus packet.
    /// Input must be exactly one configured frame (960 samples for 60ms @ 16kHz mono).
    pub fn encode(&mut self, frame: &[i16]) -> Result<Vec<u8>, CodecError> {
        if frame.len() != self.frame_len {
            return Err(CodecError::FrameLength {
                expected: self.frame_len,
                actual: frame.len(),
            });
        }

        let len = self
            .encoder
            .encode(frame, &mut self.output)
            .map_err(CodecError::Encode)?;

        if len == 0 {
            return Err(CodecError::Empty);
        }

        Ok(self.output[..len].to_vec())
    }
}

/// Opus decoder for incoming synthesized speech
pub struct OpusDecoder {
    decoder: Decoder,
    channels: usize,
    output: Vec<i16>,
}

impl OpusDecoder {
    pub fn new(params: AudioParams) -> Result<Self, CodecError> {
        let decoder = Decoder::new(params.sample_rate, opus_channels(params.channels)?)
            .map_err(|e| CodecError::Create("decoder", e))?;

        let max_samples =
            (params.sample_rate * MAX_FRAME_DURATION_MS / 1000) as usize * params.channels as usize;

        Ok(Self {
            decoder,
            channels: params.channels as usize,
            output: vec![0i16; max_samples],
        })
    }

    /// Decode one Opus packet.
    /// The frame holds as many interleaved samples as the packet carried.
    pub fn decode(&mut self, packet: &[u8]) -> Result<AudioFrame, CodecError> {
        if packet.is_empty() {
            return Err(CodecError::Empty);
        }

        let per_channel = self
            .decoder
            .decode(packet, &mut self.output, false)
            .map_err(CodecError::Decode)?;

        if per_channel == 0 {
            return Err(CodecError::Empty);
        }

        Ok(self.output[..per_channel * self.channels].to_vec())
    }
}
