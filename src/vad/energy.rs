/// Root-mean-square amplitude of a frame.
///
/// An empty frame has no energy.
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum: f32 = samples.iter().map(|s| s * s).sum();
    (sum / samples.len() as f32).sqrt()
}

/// RMS amplitude scaled for comparison against a [`super::VadPolicy`] threshold.
pub fn frame_energy(samples: &[f32], scale: f32) -> f32 {
    rms(samples) * scale
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_frame_has_zero_energy() {
        assert_eq!(rms(&[]), 0.0);
        assert_eq!(frame_energy(&[], 10_000.0), 0.0);
    }

    #[test]
    fn constant_signal_rms_is_its_magnitude() {
        assert!((rms(&[0.25; 64]) - 0.25).abs() < 1e-6);
        assert!((rms(&[-0.25; 64]) - 0.25).abs() < 1e-6);
    }

    #[test]
    fn square_wave_energy_is_scaled() {
        let frame: Vec<f32> = (0..256)
            .map(|i| if i % 2 == 0 { 0.1 } else { -0.1 })
            .collect();
        let energy = frame_energy(&frame, 10_000.0);
        assert!((energy - 1000.0).abs() < 0.1, "energy was {energy}");
    }
}
