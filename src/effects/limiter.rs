// ============================================================================
// LIMITER.RS - Peak Follower With Soft Gain
// ============================================================================
//
// The follower jumps to any peak immediately and decays by half every
// quarter second. The gain divides by the follower: below full scale the
// divisor is eased upward (limit*0.8 + 0.25) so quiet songs are not pumped
// up to full scale; above it the divisor gets a 5% margin.
//
// Since the follower never sits below the current sample, the output never
// exceeds the master volume.
// ============================================================================

use super::{MixFrame, PostContext, PostEffect};
use crate::helper::flush_denormal;

/// The follower halves this many times per second
const HALVINGS_PER_SECOND: f64 = 4.0;

#[derive(Clone, Debug, Default)]
pub struct Limiter {
    /// Current envelope
    pub limit: f64,
    decay: f64,
    decay_rate: f64,
}

impl Limiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Gain applied for the current envelope
    pub fn gain(&self, volume: f64) -> f64 {
        let divisor = if self.limit >= 1.0 { self.limit * 1.05 } else { self.limit * 0.8 + 0.25 };
        volume / divisor
    }
}

impl PostEffect for Limiter {
    fn begin_run(&mut self, _run_length: usize, ctx: &PostContext) {
        if self.decay_rate != ctx.sample_rate {
            self.decay_rate = ctx.sample_rate;
            self.decay = 1.0 - 0.5_f64.powf(HALVINGS_PER_SECOND / ctx.sample_rate);
        }
    }

    fn process(&mut self, frame: &mut MixFrame, ctx: &PostContext) {
        self.limit -= self.limit * self.decay;
        self.limit = self.limit.max(frame.output.abs());
        frame.output *= self.gain(ctx.volume);
    }

    fn reset(&mut self) {
        self.limit = 0.0;
    }

    fn flush_denormals(&mut self) {
        self.limit = flush_denormal(self.limit);
    }

    fn name(&self) -> &'static str {
        "limiter"
    }
}

// ============================================================================
// UNIT TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn run(limiter: &mut Limiter, input: &[f64], volume: f64) -> Vec<f64> {
        let ctx = PostContext { sample_rate: 44100.0, reverb: 0.0, volume };
        limiter.begin_run(input.len(), &ctx);
        input
            .iter()
            .map(|&sample| {
                let mut frame = MixFrame { output: sample, ..MixFrame::default() };
                limiter.process(&mut frame, &ctx);
                frame.output
            })
            .collect()
    }

    #[test]
    fn test_output_never_exceeds_volume() {
        let mut rng = StdRng::seed_from_u64(11);
        for volume in [0.25, 0.5, 1.0] {
            let mut limiter = Limiter::new();
            for _ in 0..50 {
                let scale = rng.random_range(0.001..20.0);
                let input: Vec<f64> = (0..1000).map(|_| rng.random_range(-1.0..1.0) * scale).collect();
                for sample in run(&mut limiter, &input, volume) {
                    assert!(sample.abs() <= volume + 1e-12, "{sample} over {volume}");
                }
            }
        }
    }

    #[test]
    fn test_envelope_jumps_then_decays() {
        let mut limiter = Limiter::new();
        run(&mut limiter, &[2.0], 1.0);
        assert_eq!(limiter.limit, 2.0);

        // A quarter second of silence halves the envelope
        run(&mut limiter, &vec![0.0; 11025], 1.0);
        assert!((limiter.limit - 1.0).abs() < 1e-3);
    }

    #[test]
    fn test_quiet_input_is_not_boosted_to_full_scale() {
        let mut limiter = Limiter::new();
        let output = run(&mut limiter, &vec![0.1; 100], 1.0);
        let last = output[99];
        assert!(last > 0.1 && last < 0.5);
    }

    #[test]
    fn test_reset() {
        let mut limiter = Limiter::new();
        run(&mut limiter, &[3.0], 1.0);
        limiter.reset();
        assert_eq!(limiter.limit, 0.0);
    }
}
