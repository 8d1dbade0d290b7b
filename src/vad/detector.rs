use tokio::time::Instant;
use tracing::debug;

use super::energy::frame_energy;
use super::policy::VadPolicy;

/// What the detector concluded after looking at a frame (or at the clock).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadDecision {
    /// Keep capturing.
    Continue,

    /// Trailing silence lasted long enough; the user turn is over.
    EndOfTurn,
}

/// Energy-based end-of-turn detector for a single user turn.
///
/// State machine:
/// - before any speech, silence is ignored (no deadline is ever armed)
/// - a frame at or above the threshold marks speech and cancels any pending deadline
/// - the first sub-threshold frame after speech arms a one-shot deadline `silence` ahead
/// - once that deadline passes with no intervening speech, the turn ends (reported once)
///
/// Time is passed in explicitly so callers decide where "now" comes from.
#[derive(Debug, Clone)]
pub struct EnergyVad {
    policy: VadPolicy,
    has_spoken: bool,
    deadline: Option<Instant>,
    fired: bool,
}

impl EnergyVad {
    pub fn new(policy: VadPolicy) -> Self {
        Self {
            policy,
            has_spoken: false,
            deadline: None,
            fired: false,
        }
    }

    /// Whether any frame of this turn reached the speech threshold.
    pub fn has_spoken(&self) -> bool {
        self.has_spoken
    }

    /// The pending silence deadline, if one is armed.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Feed one frame captured at `now`.
    ///
    /// An already-expired deadline is honored before the frame is looked at: in wall-clock
    /// terms the timer fired before this frame existed.
    pub fn on_frame(&mut self, samples: &[f32], now: Instant) -> VadDecision {
        if self.poll(now) == VadDecision::EndOfTurn {
            return VadDecision::EndOfTurn;
        }
        if self.fired {
            return VadDecision::Continue;
        }

        let energy = frame_energy(samples, self.policy.energy_scale);
        if energy >= self.policy.threshold {
            if !self.has_spoken {
                debug!(energy, "speech started");
            }
            self.has_spoken = true;
            self.deadline = None;
        } else if self.has_spoken && self.deadline.is_none() {
            let deadline = now + self.policy.silence;
            debug!(
                energy,
                silence_ms = self.policy.silence.as_millis() as u64,
                "silence timer armed"
            );
            self.deadline = Some(deadline);
        }

        VadDecision::Continue
    }

    /// Check the silence deadline against `now` without a new frame.
    ///
    /// Reports [`VadDecision::EndOfTurn`] at most once per turn.
    pub fn poll(&mut self, now: Instant) -> VadDecision {
        match self.deadline {
            Some(deadline) if !self.fired && now >= deadline => {
                self.deadline = None;
                self.fired = true;
                VadDecision::EndOfTurn
            }
            _ => VadDecision::Continue,
        }
    }
}
