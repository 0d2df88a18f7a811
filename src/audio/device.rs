//! Output device stream built on cpal.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize, SampleFormat, SampleRate, Stream, StreamConfig};
use thiserror::Error;

use crate::audio::Sample;
use crate::time::{Nanos, samples_to_ns};

#[derive(Debug, Error)]
pub enum AudioError {
    #[error("no audio output device available")]
    NoDevice,
    #[error("cannot query default output config: {0}")]
    DefaultConfig(#[from] cpal::DefaultStreamConfigError),
    #[error("device default format is {0:?}, expected f32 output")]
    UnsupportedFormat(SampleFormat),
    #[error("cannot build output stream: {0}")]
    BuildStream(#[from] cpal::BuildStreamError),
    #[error("cannot start output stream: {0}")]
    PlayStream(#[from] cpal::PlayStreamError),
}

/// Requested device buffer length in frames.
const BUFFER_FRAMES: u32 = 128;

/// An open stereo output stream. Dropping it stops audio.
pub struct AudioDevice {
    _stream: Stream,
    sampling_rate: u32,
    buffer_frames: u32,
}

impl AudioDevice {
    /// Opens the default output device with an f32 stereo stream at the
    /// device's preferred rate. `callback` is invoked from the stream
    /// thread with one frame buffer per device buffer.
    pub fn open<F>(mut callback: F) -> Result<Self, AudioError>
    where
        F: FnMut(&mut [Sample]) + Send + 'static,
    {
        let host = cpal::default_host();
        let device = host.default_output_device().ok_or(AudioError::NoDevice)?;
        let default_config = device.default_output_config()?;
        if default_config.sample_format() != SampleFormat::F32 {
            return Err(AudioError::UnsupportedFormat(default_config.sample_format()));
        }
        let sampling_rate = default_config.sample_rate().0;
        let config = StreamConfig {
            channels: 2,
            sample_rate: SampleRate(sampling_rate),
            buffer_size: BufferSize::Fixed(BUFFER_FRAMES),
        };

        // Scratch frame buffer reused across callbacks; resized only when
        // the device changes its buffer length.
        let mut frames: Vec<Sample> = Vec::with_capacity(BUFFER_FRAMES as usize);
        let stream = device.build_output_stream(
            &config,
            move |data: &mut [f32], _| {
                let frame_count = data.len() / 2;
                frames.clear();
                frames.resize(frame_count, Sample::default());
                callback(&mut frames);
                for (chunk, frame) in data.chunks_exact_mut(2).zip(&frames) {
                    chunk[0] = frame.left;
                    chunk[1] = frame.right;
                }
            },
            |err| log::error!("AUDIO: Stream error: {err}"),
            None,
        )?;
        stream.play()?;

        log::info!(
            "AUDIO: Output open: {} Hz, {} frame buffer (~{:.1} ms)",
            sampling_rate,
            BUFFER_FRAMES,
            BUFFER_FRAMES as f64 / sampling_rate as f64 * 1000.0
        );

        Ok(Self {
            _stream: stream,
            sampling_rate,
            buffer_frames: BUFFER_FRAMES,
        })
    }

    pub fn sampling_rate(&self) -> u32 {
        self.sampling_rate
    }

    /// One-way output latency: the length of one device buffer.
    pub fn latency(&self) -> Nanos {
        samples_to_ns(self.buffer_frames as u64, self.sampling_rate)
    }
}
