use std::time::Duration;

/// Policy knobs for end-of-turn detection.
///
/// These are fixed tunables, not adaptive estimates. Energy values are RMS amplitudes scaled by
/// `energy_scale`, which keeps the threshold in a human-friendly range (hundreds rather than
/// hundredths).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VadPolicy {
    /// Scaled energy at or above which a frame counts as speech.
    pub threshold: f32,

    /// Multiplier applied to the raw RMS of a frame.
    pub energy_scale: f32,

    /// Continuous silence after speech that ends the turn.
    pub silence: Duration,
}

impl Default for VadPolicy {
    fn default() -> Self {
        DEFAULT_VAD_POLICY
    }
}

/// Default policy: 500 on a 10000x RMS scale, 1.5 s of trailing silence.
pub const DEFAULT_VAD_POLICY: VadPolicy = VadPolicy {
    threshold: 500.0,
    energy_scale: 10_000.0,
    silence: Duration::from_millis(1500),
};
