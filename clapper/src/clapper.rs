/// Clapper host component
///
/// Wires a microphone source through the envelope detector and the clap
/// sequencer, and fans the results out to subscribers. Everything runs on the
/// caller's control loop: `tick()` is polled repeatedly and never blocks.

use crate::audio_buffer::{samples_duration, AudioSample};
use crate::callbacks::CallbackManager;
use crate::clock::Clock;
use crate::config::{ClapperConfig, ConfigError};
use crate::envelope::EnvelopeDetector;
use crate::microphone::MicrophoneSource;
use crate::sequencer::{ClapSequencer, ClapState};
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Microphone start-up handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StartupState {
    /// Microphone has not been asked to start
    StartMicrophone,

    /// Start requested, waiting for the source to report running
    StartingMicrophone,

    /// Samples are flowing into detection
    Running,

    /// Stopped by `stop()`; ticks are ignored until `start()`
    Stopped,
}

/// Clapper statistics
#[derive(Debug, Clone, Serialize)]
pub struct ClapperStats {
    pub blocks_processed: u64,
    pub samples_processed: u64,
    pub claps_detected: u64,
    pub double_claps: u64,
    pub state: ClapState,
    pub startup: StartupState,
}

/// Double clap detector bound to a microphone and a clock
pub struct Clapper<M: MicrophoneSource, C: Clock> {
    config: ClapperConfig,
    microphone: M,
    clock: C,
    detector: EnvelopeDetector,
    sequencer: ClapSequencer,
    startup: StartupState,
    block: Vec<AudioSample>,
    stream_origin: Option<Duration>,
    samples_read: u64,
    samples_processed: u64,
    blocks_processed: u64,
    claps_detected: u64,
    double_claps: u64,
    state_callbacks: CallbackManager<ClapState>,
    double_clap_callbacks: CallbackManager<()>,
}

impl<M: MicrophoneSource, C: Clock> Clapper<M, C> {
    /// Create a clapper.
    ///
    /// The microphone's sample rate takes precedence over `config.sample_rate`.
    pub fn new(mut config: ClapperConfig, microphone: M, clock: C) -> Result<Self, ConfigError> {
        let mic_rate = microphone.sample_rate();
        if mic_rate != config.sample_rate {
            info!(
                "Using microphone sample rate {} Hz (configured {} Hz)",
                mic_rate, config.sample_rate
            );
            config.sample_rate = mic_rate;
        }
        config.validate()?;

        info!("Initializing clapper");
        info!(
            "Onset: threshold={}, ratio={}, timeout={}ms",
            config.onset_threshold, config.onset_ratio_threshold, config.transient_timeout_ms
        );
        info!("Timing window: {:?}", config.timing_window());

        Ok(Self {
            detector: EnvelopeDetector::new(config.envelope_config()),
            sequencer: ClapSequencer::new(config.timing_window()),
            block: vec![0; config.block_size],
            config,
            microphone,
            clock,
            startup: StartupState::StartMicrophone,
            stream_origin: None,
            samples_read: 0,
            samples_processed: 0,
            blocks_processed: 0,
            claps_detected: 0,
            double_claps: 0,
            state_callbacks: CallbackManager::new(),
            double_clap_callbacks: CallbackManager::new(),
        })
    }

    /// Subscribe to every clap state change
    pub fn on_clap_state<F>(&mut self, callback: F)
    where
        F: FnMut(ClapState) + Send + 'static,
    {
        self.state_callbacks.add(callback);
    }

    /// Subscribe to accepted double claps
    pub fn on_double_clap<F>(&mut self, mut callback: F)
    where
        F: FnMut() + Send + 'static,
    {
        self.double_clap_callbacks.add(move |()| callback());
    }

    /// One-time setup before the first `tick()`
    pub fn setup(&mut self) {
        info!("Clapper setup");
        self.startup = StartupState::StartMicrophone;
    }

    /// Poll once from the control loop.
    ///
    /// Advances the microphone handshake; once running, processes whatever
    /// audio is available and raises double claps. Returns the number of
    /// double claps raised.
    pub fn tick(&mut self) -> usize {
        match self.startup {
            StartupState::StartMicrophone => {
                debug!("Starting microphone");
                match self.microphone.start() {
                    Ok(()) => self.startup = StartupState::StartingMicrophone,
                    Err(e) => warn!("Failed to start microphone, retrying: {}", e),
                }
                0
            }
            StartupState::StartingMicrophone => {
                if self.microphone.is_running() {
                    info!("Microphone started");
                    self.startup = StartupState::Running;
                    self.resume_stream();
                }
                0
            }
            StartupState::Running => self.drain_microphone() + self.raise_double_clap(),
            StartupState::Stopped => 0,
        }
    }

    /// Re-anchor the stream timeline after a (re)start.
    ///
    /// The timeline never moves backwards: after a restart it continues from
    /// wherever the previous run left off if the clock is behind that point.
    fn resume_stream(&mut self) {
        let now = self.clock.now();
        let origin = match self.stream_origin {
            Some(_) => self.stream_time().max(now),
            None => now,
        };
        debug!("Stream timeline anchored at {:?}", origin);
        self.stream_origin = Some(origin);
        self.samples_read = 0;
    }

    fn drain_microphone(&mut self) -> usize {
        let mut raised = 0;
        let mut block = std::mem::take(&mut self.block);

        loop {
            let count = self.microphone.read(&mut block);
            if count == 0 {
                break;
            }

            let block_start = self.stream_time();
            self.samples_read += count as u64;
            self.process_block(&block[..count], block_start);
            raised += self.raise_double_clap();
        }

        self.block = block;
        raised
    }

    /// Stream position of the next unread sample.
    ///
    /// Derived from the sample count so replayed audio keeps its own timing.
    fn stream_time(&self) -> Duration {
        let origin = self.stream_origin.unwrap_or_else(|| self.clock.now());
        origin + samples_duration(self.samples_read, self.config.sample_rate)
    }

    /// Feed one block whose first sample was captured at `block_start`.
    ///
    /// This is the data path; sources that push audio can call it directly.
    /// Returns the new clap state if it changed.
    pub fn process_block(&mut self, samples: &[AudioSample], block_start: Duration) -> Option<ClapState> {
        if samples.is_empty() {
            return None;
        }

        let clap_detected = self.detector.detect(samples, block_start);
        self.blocks_processed += 1;
        self.samples_processed += samples.len() as u64;
        if clap_detected {
            self.claps_detected += 1;
        }

        let now = block_start + samples_duration(samples.len() as u64, self.config.sample_rate);
        let changed = self.sequencer.on_block(clap_detected, now);
        if let Some(state) = changed {
            self.state_callbacks.call(state);
        }
        changed
    }

    fn raise_double_clap(&mut self) -> usize {
        if !self.sequencer.take_double_clap() {
            return 0;
        }
        info!("Double clap!");
        self.double_claps += 1;
        self.double_clap_callbacks.call(());
        1
    }

    /// Stop the microphone and stay stopped until `start()`
    pub fn stop(&mut self) {
        self.microphone.stop();
        self.startup = StartupState::Stopped;
        info!("Clapper stopped");
    }

    /// Resume after `stop()`; the next `tick()` restarts the microphone
    pub fn start(&mut self) {
        if self.startup == StartupState::Stopped {
            info!("Clapper starting");
            self.startup = StartupState::StartMicrophone;
        }
    }

    pub fn stats(&self) -> ClapperStats {
        ClapperStats {
            blocks_processed: self.blocks_processed,
            samples_processed: self.samples_processed,
            claps_detected: self.claps_detected,
            double_claps: self.double_claps,
            state: self.sequencer.state(),
            startup: self.startup,
        }
    }

    pub fn startup_state(&self) -> StartupState {
        self.startup
    }

    pub fn clap_state(&self) -> ClapState {
        self.sequencer.state()
    }

    pub fn config(&self) -> &ClapperConfig {
        &self.config
    }

    pub fn detector(&self) -> &EnvelopeDetector {
        &self.detector
    }

    pub fn microphone(&self) -> &M {
        &self.microphone
    }
}
