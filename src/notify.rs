// src/notify.rs
//! Subscriber fan-out for processed samples and status events
//!
//! Consumers register a `Subscriber` carrying up to three callbacks and may
//! additionally open polled sample channels. Callbacks run on the pipeline
//! thread, so they should return quickly and must not register further
//! subscribers from within. Fatal errors are delivered at most once for the
//! lifetime of the hub, however many places try to report one.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam::channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;
use tracing::{debug, error};

use crate::acquisition::AcqState;
use crate::config::constants::queues;
use crate::error::DsoError;
use crate::samples::SampleSet;

pub type SampleCallback = Box<dyn Fn(&Arc<SampleSet>) + Send + Sync>;
pub type FatalCallback = Box<dyn Fn(&DsoError) + Send + Sync>;
pub type StatusCallback = Box<dyn Fn(&StatusEvent) + Send + Sync>;

/// Transient notifications. Fatal failures travel separately.
#[derive(Debug, Clone, PartialEq)]
pub enum StatusEvent {
    State(AcqState),
    /// Acquisition outpaced the pipeline; the oldest queued frame was evicted.
    FrameDropped { cycle: u64 },
    /// Malformed bulk data forced a capture restart.
    CaptureRestarted { consecutive: u32 },
    /// A post-processing stage failed this cycle and contributed nothing.
    StageWarning {
        stage: &'static str,
        message: String,
    },
    /// SINGLE mode caught its record; sampling has been stopped.
    SingleShotComplete,
}

/// One consumer's callbacks. All optional.
#[derive(Default)]
pub struct Subscriber {
    on_samples: Option<SampleCallback>,
    on_fatal: Option<FatalCallback>,
    on_status: Option<StatusCallback>,
}

impl Subscriber {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called once per published cycle with the final sample set.
    pub fn samples(mut self, callback: impl Fn(&Arc<SampleSet>) + Send + Sync + 'static) -> Self {
        self.on_samples = Some(Box::new(callback));
        self
    }

    /// Called at most once, on the first fatal failure.
    pub fn fatal(mut self, callback: impl Fn(&DsoError) + Send + Sync + 'static) -> Self {
        self.on_fatal = Some(Box::new(callback));
        self
    }

    /// Called for state changes and warnings.
    pub fn status(mut self, callback: impl Fn(&StatusEvent) + Send + Sync + 'static) -> Self {
        self.on_status = Some(Box::new(callback));
        self
    }
}

struct SampleChannel {
    tx: Sender<Arc<SampleSet>>,
    /// Receiver clone used to evict the oldest set when the consumer lags.
    mirror: Receiver<Arc<SampleSet>>,
}

/// Shared fan-out point between the pipeline worker and consumers.
pub struct SubscriberHub {
    subscribers: Mutex<Vec<Subscriber>>,
    channels: Mutex<Vec<SampleChannel>>,
    fatal_seen: AtomicBool,
}

impl SubscriberHub {
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
            channels: Mutex::new(Vec::new()),
            fatal_seen: AtomicBool::new(false),
        }
    }

    pub fn register(&self, subscriber: Subscriber) {
        self.subscribers.lock().push(subscriber);
    }

    /// Opens a polled channel with the default capacity.
    pub fn subscribe_channel(&self) -> Receiver<Arc<SampleSet>> {
        self.subscribe_channel_with(queues::SAMPLE_QUEUE_CAP)
    }

    /// Opens a polled channel holding at most `capacity` sets; when full,
    /// the oldest set is evicted in favour of the newest.
    pub fn subscribe_channel_with(&self, capacity: usize) -> Receiver<Arc<SampleSet>> {
        let (tx, rx) = bounded(capacity);
        self.channels.lock().push(SampleChannel {
            tx,
            mirror: rx.clone(),
        });
        rx
    }

    pub fn publish_samples(&self, set: Arc<SampleSet>) {
        for subscriber in self.subscribers.lock().iter() {
            if let Some(callback) = &subscriber.on_samples {
                callback(&set);
            }
        }
        let mut channels = self.channels.lock();
        channels.retain(|channel| {
            // The mirror keeps the channel connected, so a consumer that
            // dropped its receiver shows up as a count of one.
            if channel.tx.receiver_count() <= 1 {
                debug!("sample channel closed by consumer");
                return false;
            }
            if channel.tx.is_full() {
                let _ = channel.mirror.try_recv();
            }
            let _ = channel.tx.try_send(set.clone());
            true
        });
    }

    pub fn publish_status(&self, event: StatusEvent) {
        for subscriber in self.subscribers.lock().iter() {
            if let Some(callback) = &subscriber.on_status {
                callback(&event);
            }
        }
    }

    /// First reporter wins; later fatal errors are logged and swallowed.
    pub fn publish_fatal(&self, fault: DsoError) {
        if self.fatal_seen.swap(true, Ordering::SeqCst) {
            debug!(error = %fault, "fatal already reported, suppressing");
            return;
        }
        error!(error = %fault, "fatal failure");
        for subscriber in self.subscribers.lock().iter() {
            if let Some(callback) = &subscriber.on_fatal {
                callback(&fault);
            }
        }
    }

    pub fn fatal_reported(&self) -> bool {
        self.fatal_seen.load(Ordering::SeqCst)
    }
}

impl Default for SubscriberHub {
    fn default() -> Self {
        Self::new()
    }
}
