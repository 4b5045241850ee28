// src/samples.rs
//! Calibrated sample data exchanged between the core and consumers
//!
//! A `SampleSet` is produced once per acquisition cycle and travels through
//! the post-processing stages as an immutable value: every stage builds a new
//! set instead of mutating its input, sharing the untouched traces through
//! `Arc` so nothing heavyweight is copied.

use std::sync::Arc;

/// Identifies where a channel's samples came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelSource {
    /// Physical input channel, zero-based.
    Input(usize),
    /// Derived math channel appended by the pipeline.
    Math,
}

impl std::fmt::Display for ChannelSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChannelSource::Input(ch) => write!(f, "CH{}", ch + 1),
            ChannelSource::Math => write!(f, "MATH"),
        }
    }
}

/// Frequency-domain representation attached to a channel by the spectrum stage.
#[derive(Debug, Clone, PartialEq)]
pub struct SpectrumTrace {
    /// Amplitude spectrum in dBV, one bin per entry.
    pub magnitude_dbv: Arc<Vec<f64>>,
    /// Phase per bin in radians, when the stage is configured to keep it.
    pub phase_rad: Option<Arc<Vec<f64>>>,
    /// Frequency spacing between adjacent bins.
    pub resolution_hz: f64,
}

/// Display-space vertex list attached to a channel by the graph stage.
pub type GraphTrace = Arc<Vec<[f32; 2]>>;

/// One channel's calibrated voltage trace plus stage attachments.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelTrace {
    pub source: ChannelSource,
    /// Gain-step index the samples were captured at.
    pub gain_index: usize,
    /// Screen scale of that gain step.
    pub volts_per_div: f64,
    /// Calibrated voltages, one per sample.
    pub voltage: Arc<Vec<f64>>,
    pub spectrum: Option<SpectrumTrace>,
    pub graph: Option<GraphTrace>,
}

impl ChannelTrace {
    /// Voltage-only trace, no attachments.
    pub fn new(
        source: ChannelSource,
        gain_index: usize,
        volts_per_div: f64,
        voltage: Vec<f64>,
    ) -> Self {
        Self {
            source,
            gain_index,
            volts_per_div,
            voltage: Arc::new(voltage),
            spectrum: None,
            graph: None,
        }
    }

    pub fn len(&self) -> usize {
        self.voltage.len()
    }

    pub fn is_empty(&self) -> bool {
        self.voltage.is_empty()
    }
}

/// How the trigger search concluded for one acquisition cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerOutcome {
    /// A trigger event was located; `position` is the output index the
    /// trigger point was re-sliced to.
    Triggered { position: usize },
    /// No trigger event was found; the set was delivered anyway and carries
    /// this data-quality flag (AUTO mode after its timeout).
    Untriggered,
    /// Trigger search was bypassed entirely (ROLL mode).
    Bypassed,
}

/// One immutable set of converted samples for all active channels.
///
/// Every channel in a set shares the same length and sample interval.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleSet {
    /// Monotonic acquisition-cycle counter.
    pub cycle: u64,
    /// Version of the configuration snapshot the frame was captured under.
    pub config_version: u64,
    /// Seconds between adjacent samples.
    pub sample_interval: f64,
    pub trigger: TriggerOutcome,
    pub channels: Vec<ChannelTrace>,
}

impl SampleSet {
    /// Samples per channel. Zero for an empty set.
    pub fn sample_count(&self) -> usize {
        self.channels.first().map_or(0, ChannelTrace::len)
    }

    /// Wall-clock span covered by the set.
    pub fn duration(&self) -> f64 {
        self.sample_count() as f64 * self.sample_interval
    }

    pub fn channel(&self, source: ChannelSource) -> Option<&ChannelTrace> {
        self.channels.iter().find(|c| c.source == source)
    }

    pub fn is_triggered(&self) -> bool {
        matches!(self.trigger, TriggerOutcome::Triggered { .. })
    }

    /// True when every channel carries the same number of samples.
    pub fn is_uniform(&self) -> bool {
        let len = self.sample_count();
        self.channels.iter().all(|c| c.len() == len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_channel_set() -> SampleSet {
        SampleSet {
            cycle: 1,
            config_version: 1,
            sample_interval: 1e-6,
            trigger: TriggerOutcome::Triggered { position: 0 },
            channels: vec![
                ChannelTrace::new(ChannelSource::Input(0), 5, 1.0, vec![0.0; 64]),
                ChannelTrace::new(ChannelSource::Input(1), 5, 1.0, vec![0.0; 64]),
            ],
        }
    }

    #[test]
    fn test_uniform_lengths() {
        let set = two_channel_set();
        assert!(set.is_uniform());
        assert_eq!(set.sample_count(), 64);
        assert!((set.duration() - 64e-6).abs() < 1e-12);
    }

    #[test]
    fn test_non_uniform_detected() {
        let mut set = two_channel_set();
        set.channels[1].voltage = Arc::new(vec![0.0; 32]);
        assert!(!set.is_uniform());
    }

    #[test]
    fn test_channel_lookup() {
        let set = two_channel_set();
        assert!(set.channel(ChannelSource::Input(1)).is_some());
        assert!(set.channel(ChannelSource::Math).is_none());
    }

    #[test]
    fn test_trigger_flags() {
        let mut set = two_channel_set();
        assert!(set.is_triggered());
        set.trigger = TriggerOutcome::Untriggered;
        assert!(!set.is_triggered());
    }

    #[test]
    fn test_source_display() {
        assert_eq!(ChannelSource::Input(0).to_string(), "CH1");
        assert_eq!(ChannelSource::Math.to_string(), "MATH");
    }
}
