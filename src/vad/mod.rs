//! Voice Activity Detection (VAD) utilities.
//!
//! The client runs a deliberately simple energy detector locally: it decides *when a user turn
//! ends*, never *what gets sent*. Every captured frame is streamed regardless of the VAD verdict.

mod detector;
mod energy;
mod policy;

pub use detector::{EnergyVad, VadDecision};
pub use energy::{frame_energy, rms};
pub use policy::{DEFAULT_VAD_POLICY, VadPolicy};
