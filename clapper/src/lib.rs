/// Double clap detector library
///
/// This library turns a live 16-bit PCM stream into "double clap" events using
/// an envelope onset/decay detector and a timing-windowed clap sequencer.

pub mod audio_buffer;
pub mod callbacks;
pub mod clapper;
pub mod clock;
pub mod config;
pub mod envelope;
pub mod microphone;
pub mod sequencer;

// Re-export main types
pub use audio_buffer::{samples_duration, AudioSample, SampleQueue, SampleReader, SampleWriter};
pub use callbacks::CallbackManager;
pub use clapper::{Clapper, ClapperStats, StartupState};
pub use clock::{Clock, ManualClock, MonotonicClock};
pub use config::{ClapperConfig, ConfigError};
pub use envelope::{EnvelopeConfig, EnvelopeDetector};
pub use microphone::{samples_from_le_bytes, MicrophoneError, MicrophoneSource, ReplaySource};
pub use sequencer::{ClapSequencer, ClapState, TimingWindow};

#[cfg(feature = "device")]
pub use microphone::CpalMicrophone;
