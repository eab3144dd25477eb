/// Microphone sources
///
/// The detector does not own audio acquisition; it pulls blocks from anything
/// implementing [`MicrophoneSource`]. `ReplaySource` plays back recordings
/// (raw little-endian PCM or 16-bit WAV), and with the `device` feature
/// `CpalMicrophone` captures from the default input device.

use crate::audio_buffer::{samples_duration, AudioSample};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

#[cfg(feature = "device")]
pub use device::CpalMicrophone;

#[derive(Error, Debug)]
pub enum MicrophoneError {
    #[error("No input device available")]
    NoDevice,

    #[error("Audio stream error: {0}")]
    Stream(String),

    #[error("Failed to read recording: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to decode WAV file: {0}")]
    Wav(#[from] hound::Error),

    #[error("Unsupported audio format: {0}")]
    UnsupportedFormat(String),
}

/// Source of 16-bit mono PCM blocks
#[cfg_attr(test, mockall::automock)]
pub trait MicrophoneSource {
    /// Ask the source to start; it may report running only later
    fn start(&mut self) -> Result<(), MicrophoneError>;

    fn stop(&mut self);

    /// Whether samples are flowing
    fn is_running(&self) -> bool;

    fn sample_rate(&self) -> u32;

    /// Move up to `buf.len()` available samples into `buf`; never blocks
    fn read(&mut self, buf: &mut [AudioSample]) -> usize;
}

/// Reinterpret raw little-endian byte pairs as 16-bit samples.
///
/// A trailing odd byte is ignored.
pub fn samples_from_le_bytes(bytes: &[u8]) -> Vec<AudioSample> {
    bytes
        .chunks_exact(2)
        .map(|pair| AudioSample::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

/// Plays back a recording held in memory
#[derive(Debug, Clone)]
pub struct ReplaySource {
    samples: Vec<AudioSample>,
    sample_rate: u32,
    position: usize,
    running: bool,
}

impl ReplaySource {
    pub fn from_samples(samples: Vec<AudioSample>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
            position: 0,
            running: false,
        }
    }

    /// Load headerless little-endian 16-bit PCM
    pub fn from_raw_file<P: AsRef<Path>>(path: P, sample_rate: u32) -> Result<Self, MicrophoneError> {
        let bytes = std::fs::read(path.as_ref())?;
        let samples = samples_from_le_bytes(&bytes);
        debug!("Loaded {} raw samples from {}", samples.len(), path.as_ref().display());
        Ok(Self::from_samples(samples, sample_rate))
    }

    /// Load a 16-bit integer WAV file, keeping the first channel
    pub fn from_wav_file<P: AsRef<Path>>(path: P) -> Result<Self, MicrophoneError> {
        let reader = hound::WavReader::open(path.as_ref())?;
        let spec = reader.spec();

        if spec.bits_per_sample != 16 || spec.sample_format != hound::SampleFormat::Int {
            return Err(MicrophoneError::UnsupportedFormat(format!(
                "{}-bit {:?}, expected 16-bit integer PCM",
                spec.bits_per_sample, spec.sample_format
            )));
        }

        let samples = reader
            .into_samples::<i16>()
            .step_by(usize::from(spec.channels.max(1)))
            .collect::<Result<Vec<_>, _>>()?;

        debug!(
            "Loaded {} samples at {} Hz from {}",
            samples.len(),
            spec.sample_rate,
            path.as_ref().display()
        );
        Ok(Self::from_samples(samples, spec.sample_rate))
    }

    /// Open a `.wav` file, or treat anything else as raw PCM at `raw_sample_rate`
    pub fn open<P: AsRef<Path>>(path: P, raw_sample_rate: u32) -> Result<Self, MicrophoneError> {
        let is_wav = path
            .as_ref()
            .extension()
            .map_or(false, |ext| ext.eq_ignore_ascii_case("wav"));

        if is_wav {
            Self::from_wav_file(path)
        } else {
            Self::from_raw_file(path, raw_sample_rate)
        }
    }

    /// Append silence so trailing timeouts can elapse after the recording ends
    pub fn with_trailing_silence(mut self, duration: Duration) -> Self {
        let nanos = duration.as_nanos() * u128::from(self.sample_rate);
        let count = ((nanos + 999_999_999) / 1_000_000_000) as usize;
        self.samples.resize(self.samples.len() + count, 0);
        self
    }

    /// All samples have been read
    pub fn is_finished(&self) -> bool {
        self.position >= self.samples.len()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Length of the recording
    pub fn duration(&self) -> Duration {
        samples_duration(self.samples.len() as u64, self.sample_rate)
    }
}

impl MicrophoneSource for ReplaySource {
    fn start(&mut self) -> Result<(), MicrophoneError> {
        info!("Replaying {:?} of audio", self.duration());
        self.running = true;
        Ok(())
    }

    fn stop(&mut self) {
        self.running = false;
    }

    fn is_running(&self) -> bool {
        self.running
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn read(&mut self, buf: &mut [AudioSample]) -> usize {
        if !self.running {
            return 0;
        }

        let remaining = &self.samples[self.position..];
        let count = remaining.len().min(buf.len());
        buf[..count].copy_from_slice(&remaining[..count]);
        self.position += count;
        count
    }
}

#[cfg(feature = "device")]
mod device {
    use super::{MicrophoneError, MicrophoneSource};
    use crate::audio_buffer::{AudioSample, SampleQueue, SampleReader, SampleWriter, DEFAULT_QUEUE_CAPACITY};
    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use tracing::{error, info};

    /// Default input device captured through cpal
    ///
    /// The driver callback downmixes to the first channel and pushes into a
    /// lock-free queue; `read` drains it on the control loop.
    pub struct CpalMicrophone {
        device: cpal::Device,
        config: cpal::SupportedStreamConfig,
        stream: Option<cpal::Stream>,
        reader: Option<SampleReader>,
        running: Arc<AtomicBool>,
    }

    impl CpalMicrophone {
        pub fn default_device() -> Result<Self, MicrophoneError> {
            let host = cpal::default_host();
            let device = host.default_input_device().ok_or(MicrophoneError::NoDevice)?;
            let config = device
                .default_input_config()
                .map_err(|e| MicrophoneError::Stream(e.to_string()))?;

            info!(
                "Input device: {} ({} Hz, {} channels, {:?})",
                device.name().unwrap_or_else(|_| "unknown".to_string()),
                config.sample_rate().0,
                config.channels(),
                config.sample_format()
            );

            Ok(Self {
                device,
                config,
                stream: None,
                reader: None,
                running: Arc::new(AtomicBool::new(false)),
            })
        }

        fn build_stream(&self, writer: SampleWriter) -> Result<cpal::Stream, MicrophoneError> {
            let channels = usize::from(self.config.channels().max(1));
            let stream_config: cpal::StreamConfig = self.config.clone().into();
            let running = self.running.clone();

            let stream = match self.config.sample_format() {
                cpal::SampleFormat::I16 => self.device.build_input_stream(
                    &stream_config,
                    input_callback(writer, channels, running, |s: i16| s),
                    on_stream_error,
                    None,
                ),
                cpal::SampleFormat::F32 => self.device.build_input_stream(
                    &stream_config,
                    input_callback(writer, channels, running, |s: f32| {
                        (s * f32::from(i16::MAX)) as AudioSample
                    }),
                    on_stream_error,
                    None,
                ),
                other => {
                    return Err(MicrophoneError::UnsupportedFormat(format!("{:?}", other)));
                }
            };

            stream.map_err(|e| MicrophoneError::Stream(e.to_string()))
        }
    }

    fn input_callback<T, F>(
        mut writer: SampleWriter,
        channels: usize,
        running: Arc<AtomicBool>,
        convert: F,
    ) -> impl FnMut(&[T], &cpal::InputCallbackInfo) + Send + 'static
    where
        T: Copy + 'static,
        F: Fn(T) -> AudioSample + Send + 'static,
    {
        let mut mono: Vec<AudioSample> = Vec::with_capacity(4096);

        move |data: &[T], _: &cpal::InputCallbackInfo| {
            running.store(true, Ordering::Release);
            mono.clear();
            mono.extend(data.chunks(channels).map(|frame| convert(frame[0])));
            writer.push(&mono);
        }
    }

    fn on_stream_error(err: cpal::StreamError) {
        error!("Microphone stream error: {}", err);
    }

    impl MicrophoneSource for CpalMicrophone {
        fn start(&mut self) -> Result<(), MicrophoneError> {
            if self.stream.is_some() {
                return Ok(());
            }

            let (writer, reader) = SampleQueue::with_capacity(DEFAULT_QUEUE_CAPACITY);
            let stream = self.build_stream(writer)?;
            stream
                .play()
                .map_err(|e| MicrophoneError::Stream(e.to_string()))?;

            self.stream = Some(stream);
            self.reader = Some(reader);
            Ok(())
        }

        fn stop(&mut self) {
            self.stream = None;
            self.running.store(false, Ordering::Release);
            if let Some(reader) = self.reader.as_ref() {
                if reader.dropped() > 0 {
                    info!("Microphone stopped, {} samples were dropped", reader.dropped());
                }
            }
            self.reader = None;
        }

        fn is_running(&self) -> bool {
            self.running.load(Ordering::Acquire)
        }

        fn sample_rate(&self) -> u32 {
            self.config.sample_rate().0
        }

        fn read(&mut self, buf: &mut [AudioSample]) -> usize {
            self.reader.as_mut().map_or(0, |reader| reader.pop(buf))
        }
    }
}
