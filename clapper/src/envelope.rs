/// Envelope-based clap transient detection
///
/// Turns a stream of 16-bit PCM blocks into "a clap happened in this block".
/// Per sample: remove DC bias, rectify, follow the peak with a leaky envelope,
/// look for a sharp onset and then confirm it by a fast enough decay.

use crate::audio_buffer::{samples_duration, AudioSample};
use std::time::Duration;
use tracing::{debug, trace};

/// Envelope detector tunables
///
/// These are unchecked here; `ClapperConfig::validate` is the gate.
#[derive(Debug, Clone, PartialEq)]
pub struct EnvelopeConfig {
    /// Sample rate used to timestamp individual samples within a block
    pub sample_rate: u32,

    /// DC offset smoothing factor; `None` skips DC removal
    pub dc_offset_factor: Option<f32>,

    /// Geometric envelope decay applied every sample
    pub envelope_decay_factor: f32,

    /// Minimum envelope level for an onset
    pub onset_threshold: i16,

    /// Minimum envelope growth between consecutive samples for an onset
    pub onset_ratio_threshold: f32,

    /// Time after which an undecayed onset is abandoned
    pub transient_timeout: Duration,

    /// Envelope must fall below `transient_peak * factor` to confirm a clap
    pub transient_decay_threshold_factor: f32,
}

/// Leaky peak follower with onset/decay transient tracking
#[derive(Debug, Clone)]
pub struct EnvelopeDetector {
    config: EnvelopeConfig,
    dc_offset: f32,
    envelope: i16,
    previous_envelope: i16,
    onset_time: Option<Duration>,
    transient_peak: i16,
}

impl EnvelopeDetector {
    pub fn new(config: EnvelopeConfig) -> Self {
        debug!("Initializing envelope detector with config: {:?}", config);

        Self {
            config,
            dc_offset: 0.0,
            envelope: 0,
            previous_envelope: 0,
            onset_time: None,
            transient_peak: 0,
        }
    }

    /// Run one block through the detector.
    ///
    /// `block_start` is the time of the first sample; later samples are spaced
    /// by the sample period. Returns `true` if at least one transient completed
    /// (onset followed by sufficient decay) inside the block. State carries over
    /// to the next call.
    pub fn detect(&mut self, samples: &[AudioSample], block_start: Duration) -> bool {
        let mut clap_detected = false;

        for (index, &sample) in samples.iter().enumerate() {
            let now = block_start + samples_duration(index as u64, self.config.sample_rate);
            if self.process_sample(sample, now) {
                clap_detected = true;
            }
        }

        clap_detected
    }

    fn process_sample(&mut self, sample: AudioSample, now: Duration) -> bool {
        let rectified = self.remove_dc(sample).saturating_abs();

        // Truncating multiply, then snap up to any louder sample
        let decayed = (f32::from(self.envelope) * self.config.envelope_decay_factor) as i16;
        self.envelope = decayed.max(rectified);

        let ratio = growth_ratio(self.envelope, self.previous_envelope);
        self.previous_envelope = self.envelope;

        if self.onset_time.is_none()
            && self.envelope > self.config.onset_threshold
            && ratio > self.config.onset_ratio_threshold
        {
            trace!(
                "Onset at {:?}: envelope={}, ratio={:.2}",
                now, self.envelope, ratio
            );
            self.onset_time = Some(now);
            self.transient_peak = self.envelope;
        }

        let Some(onset) = self.onset_time else {
            return false;
        };

        self.transient_peak = self.transient_peak.max(self.envelope);

        // Timeout and decay are checked independently; a decay on the very
        // sample that timed out still counts.
        if now.saturating_sub(onset) > self.config.transient_timeout {
            trace!("Transient timed out at {:?} (peak {})", now, self.transient_peak);
            self.onset_time = None;
        }

        let decay_level =
            f32::from(self.transient_peak) * self.config.transient_decay_threshold_factor;
        if f32::from(self.envelope) < decay_level {
            debug!(
                "Clap transient at {:?}: peak={}, envelope={}",
                now, self.transient_peak, self.envelope
            );
            self.onset_time = None;
            return true;
        }

        false
    }

    fn remove_dc(&mut self, sample: AudioSample) -> AudioSample {
        match self.config.dc_offset_factor {
            Some(factor) => {
                let sample = f32::from(sample);
                self.dc_offset = factor * self.dc_offset + (1.0 - factor) * sample;
                (sample - self.dc_offset).clamp(-32767.0, 32767.0) as AudioSample
            }
            None => sample,
        }
    }

    /// Current envelope value
    pub fn envelope(&self) -> i16 {
        self.envelope
    }

    /// Current DC offset estimate
    pub fn dc_offset(&self) -> f32 {
        self.dc_offset
    }

    /// Start time of the transient being tracked, if any
    pub fn onset_time(&self) -> Option<Duration> {
        self.onset_time
    }

    /// Largest envelope seen since the last onset
    pub fn transient_peak(&self) -> i16 {
        self.transient_peak
    }

    pub fn config(&self) -> &EnvelopeConfig {
        &self.config
    }

    /// Drop all running state, keeping the configuration
    pub fn reset(&mut self) {
        self.dc_offset = 0.0;
        self.envelope = 0;
        self.previous_envelope = 0;
        self.onset_time = None;
        self.transient_peak = 0;
        debug!("Envelope detector reset");
    }
}

/// Envelope growth relative to the previous sample.
///
/// With no previous level the envelope is compared with itself.
fn growth_ratio(envelope: i16, previous: i16) -> f32 {
    if previous == 0 {
        return 1.0;
    }
    f32::from(envelope) / f32::from(previous)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    /// One sample per millisecond, no DC removal
    fn scenario_config() -> EnvelopeConfig {
        EnvelopeConfig {
            sample_rate: 1000,
            dc_offset_factor: None,
            envelope_decay_factor: 0.9,
            onset_threshold: 2000,
            onset_ratio_threshold: 1.5,
            transient_timeout: Duration::from_millis(50),
            transient_decay_threshold_factor: 0.5,
        }
    }

    fn noise_floor(len: usize) -> Vec<AudioSample> {
        (0..len).map(|i| if i % 2 == 0 { 100 } else { -100 }).collect()
    }

    /// Spike to `peak` followed by an exponential decay over 20 samples
    fn clap(peak: f32) -> Vec<AudioSample> {
        (0..21)
            .map(|k| (peak * 0.7f32.powi(k)) as AudioSample)
            .collect()
    }

    #[test]
    fn test_silence_never_detects() {
        let mut detector = EnvelopeDetector::new(EnvelopeConfig {
            dc_offset_factor: Some(0.9999),
            ..scenario_config()
        });

        for block in 0..50 {
            let silence = vec![0; 256];
            assert!(!detector.detect(&silence, ms(block * 256)));
        }
        assert_eq!(detector.envelope(), 0);
        assert_eq!(detector.onset_time(), None);
    }

    #[test]
    fn test_envelope_decays_toward_zero() {
        let mut detector = EnvelopeDetector::new(scenario_config());
        detector.detect(&[8000], Duration::ZERO);
        assert_eq!(detector.envelope(), 8000);

        let mut last = detector.envelope();
        for block in 1..10 {
            detector.detect(&[0; 10], ms(block * 10));
            assert!(detector.envelope() <= last);
            last = detector.envelope();
        }
        assert_eq!(detector.envelope(), 0);
    }

    #[test]
    fn test_spike_then_decay_detected_once() {
        let mut detector = EnvelopeDetector::new(scenario_config());

        let mut block = noise_floor(10);
        block.extend(clap(10000.0));

        assert!(detector.detect(&block, Duration::ZERO));
        assert_eq!(detector.onset_time(), None);
        assert_eq!(detector.transient_peak(), 10000);

        // The tail of the same transient must not count again
        assert!(!detector.detect(&[0; 100], ms(31)));
        assert!(!detector.detect(&noise_floor(100), ms(131)));
    }

    #[test]
    fn test_clap_split_across_blocks() {
        let mut detector = EnvelopeDetector::new(scenario_config());

        let mut signal = noise_floor(10);
        signal.extend(clap(10000.0));

        // Onset lands in the first block, decay completes in the second
        assert!(!detector.detect(&signal[..12], Duration::ZERO));
        assert_eq!(detector.onset_time(), Some(ms(10)));
        assert!(detector.detect(&signal[12..], ms(12)));
    }

    #[test]
    fn test_step_from_silence_has_no_growth_reference() {
        let mut detector = EnvelopeDetector::new(scenario_config());

        // Jump straight from zero: previous envelope is unset, ratio is 1
        let mut block = vec![0; 10];
        block.extend(clap(10000.0));
        assert!(!detector.detect(&block, Duration::ZERO));
        assert_eq!(detector.onset_time(), None);
    }

    #[test]
    fn test_quiet_transient_ignored() {
        let mut detector = EnvelopeDetector::new(scenario_config());

        let mut block = noise_floor(10);
        block.extend(clap(1500.0)); // below onset_threshold
        assert!(!detector.detect(&block, Duration::ZERO));
    }

    #[test]
    fn test_sustained_sound_times_out_then_recovers() {
        let mut detector = EnvelopeDetector::new(scenario_config());

        let mut block = noise_floor(10);
        block.extend(vec![10000; 200]); // never decays
        assert!(!detector.detect(&block, Duration::ZERO));
        assert_eq!(detector.onset_time(), None);

        // Falling off the plateau is not a clap: the onset was abandoned
        assert!(!detector.detect(&noise_floor(100), ms(210)));

        // A fresh transient is recognised afterwards
        let mut block = noise_floor(10);
        block.extend(clap(10000.0));
        assert!(detector.detect(&block, ms(310)));
    }

    #[test]
    fn test_decay_on_timeout_sample_still_fires() {
        let mut detector = EnvelopeDetector::new(EnvelopeConfig {
            transient_decay_threshold_factor: 0.95,
            ..scenario_config()
        });

        // Onset at 5ms
        let mut block = noise_floor(5);
        block.push(10000);
        assert!(!detector.detect(&block, Duration::ZERO));
        assert_eq!(detector.onset_time(), Some(ms(5)));

        // Plateau up to 55ms: exactly at the timeout, not beyond it
        assert!(!detector.detect(&[10000; 50], ms(6)));
        assert_eq!(detector.onset_time(), Some(ms(5)));

        // At 56ms the onset times out and the envelope decays in the same sample
        assert!(detector.detect(&[0], ms(56)));
        assert_eq!(detector.onset_time(), None);
    }

    #[test]
    fn test_dc_offset_tracks_bias() {
        let mut detector = EnvelopeDetector::new(EnvelopeConfig {
            sample_rate: 16000,
            dc_offset_factor: Some(0.99),
            ..scenario_config()
        });

        let biased = vec![500; 2000];
        assert!(!detector.detect(&biased, Duration::ZERO));

        assert_relative_eq!(detector.dc_offset(), 500.0, epsilon = 1.0);
        // Bias is removed before rectification, so the envelope settles low
        assert!(detector.envelope() < 50);
    }

    #[test]
    fn test_dc_removal_clamps_to_sample_range() {
        let mut detector = EnvelopeDetector::new(EnvelopeConfig {
            dc_offset_factor: Some(0.5),
            ..scenario_config()
        });

        detector.detect(&[i16::MAX; 20], Duration::ZERO);
        // Large negative swing after a positive bias must not overflow
        detector.detect(&[i16::MIN], ms(20));
        assert_eq!(detector.envelope(), 32767);
    }

    #[test]
    fn test_raw_rectification_saturates() {
        let mut detector = EnvelopeDetector::new(scenario_config());
        detector.detect(&[i16::MIN], Duration::ZERO);
        assert_eq!(detector.envelope(), i16::MAX);
    }

    #[test]
    fn test_empty_block_is_noop() {
        let mut detector = EnvelopeDetector::new(scenario_config());
        detector.detect(&[5000], Duration::ZERO);

        assert!(!detector.detect(&[], ms(1)));
        assert_eq!(detector.envelope(), 5000);
    }

    #[test]
    fn test_reset() {
        let mut detector = EnvelopeDetector::new(scenario_config());

        let mut block = noise_floor(5);
        block.push(10000);
        detector.detect(&block, Duration::ZERO);
        assert!(detector.onset_time().is_some());

        detector.reset();
        assert_eq!(detector.envelope(), 0);
        assert_eq!(detector.onset_time(), None);
        assert_relative_eq!(detector.dc_offset(), 0.0);
    }

    #[test]
    fn test_growth_ratio() {
        assert_relative_eq!(growth_ratio(300, 0), 1.0);
        assert_relative_eq!(growth_ratio(300, 100), 3.0);
        assert_relative_eq!(growth_ratio(90, 100), 0.9);
    }
}
