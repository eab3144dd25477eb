/// Audio sample queue between the capture callback and the control loop
///
/// Capture callbacks run on a driver thread and must never block, while
/// detection runs on the single control loop. A lock-free SPSC ring buffer
/// hands the samples over; anything the loop can't keep up with is dropped
/// and counted rather than stalling the driver.

use cache_padded::CachePadded;
use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::HeapRb;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Audio sample format (16-bit PCM)
pub type AudioSample = i16;

/// Default queue size: 1 second at 16kHz
pub const DEFAULT_QUEUE_CAPACITY: usize = 16000;

/// Playback time of `count` samples at `sample_rate`
pub fn samples_duration(count: u64, sample_rate: u32) -> Duration {
    let rate = u64::from(sample_rate.max(1));
    let secs = Duration::from_secs(count / rate);
    secs + Duration::from_nanos((count % rate) * 1_000_000_000 / rate)
}

type RingBuffer = HeapRb<AudioSample>;
type RingProducer = <RingBuffer as Split>::Prod;
type RingConsumer = <RingBuffer as Split>::Cons;

/// Constructor for a writer/reader pair
pub struct SampleQueue;

impl SampleQueue {
    /// Create a queue holding up to `capacity` samples
    pub fn with_capacity(capacity: usize) -> (SampleWriter, SampleReader) {
        debug!("Creating sample queue with capacity: {} samples", capacity);

        let (producer, consumer) = RingBuffer::new(capacity).split();
        let dropped = Arc::new(CachePadded::new(AtomicU64::new(0)));

        (
            SampleWriter {
                producer,
                dropped: dropped.clone(),
            },
            SampleReader { consumer, dropped },
        )
    }
}

/// Producer half, owned by the capture callback
pub struct SampleWriter {
    producer: RingProducer,
    dropped: Arc<CachePadded<AtomicU64>>,
}

impl SampleWriter {
    /// Queue samples without blocking.
    ///
    /// Returns the number of samples queued; the rest are dropped.
    pub fn push(&mut self, samples: &[AudioSample]) -> usize {
        let written = self.producer.push_slice(samples);
        let dropped = samples.len() - written;

        if dropped > 0 {
            self.dropped.fetch_add(dropped as u64, Ordering::Relaxed);
            warn!("Sample queue full, dropped {} samples", dropped);
        }

        written
    }

    /// Free space in samples
    pub fn free_space(&self) -> usize {
        self.producer.vacant_len()
    }
}

/// Consumer half, owned by the control loop
pub struct SampleReader {
    consumer: RingConsumer,
    dropped: Arc<CachePadded<AtomicU64>>,
}

impl SampleReader {
    /// Move up to `buf.len()` samples into `buf`, oldest first
    pub fn pop(&mut self, buf: &mut [AudioSample]) -> usize {
        self.consumer.pop_slice(buf)
    }

    /// Samples waiting to be read
    pub fn len(&self) -> usize {
        self.consumer.occupied_len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.consumer.capacity().get()
    }

    /// Samples dropped on overflow since creation
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Discard everything queued
    pub fn clear(&mut self) {
        let occupied = self.consumer.occupied_len();
        self.consumer.skip(occupied);
        debug!("Cleared {} queued samples", occupied);
    }
}
