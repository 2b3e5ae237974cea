// ============================================================================
// CHORUS.RS - Three-Tap Modulated Delay
// ============================================================================
//
// The chorus send is written into a short circular delay line and read back
// at three taps whose delay is swept by a slow sine, each tap a third of a
// cycle apart. Two taps are subtracted and one added to the direct signal,
// which thickens the sound without a strong pitch wobble.
//
// Tap positions are computed at the start and end of every run and walked
// linearly in between, so the sine is only evaluated twice per run.
// ============================================================================

use super::{MixFrame, PostContext, PostEffect};
use crate::helper::TWO_PI;

const DELAY_LENGTH: usize = 2048;
const DELAY_MASK: usize = DELAY_LENGTH - 1;

/// Seconds per sweep of the tap delays
const SWEEP_SECONDS: f64 = 2.0;

/// Delay spread (in sweep ranges) and sweep phase of each tap
const TAPS: [(f64, f64); 3] = [(1.51, 0.0), (2.10, 2.1), (3.35, 4.2)];

#[derive(Clone, Debug)]
pub struct Chorus {
    line: Vec<f64>,
    position: usize,
    phase: f64,
    tap_indices: [f64; 3],
    tap_deltas: [f64; 3],
}

impl Default for Chorus {
    fn default() -> Self {
        Self::new()
    }
}

impl Chorus {
    pub fn new() -> Self {
        Self { line: vec![0.0; DELAY_LENGTH], position: 0, phase: 0.0, tap_indices: [0.0; 3], tap_deltas: [0.0; 3] }
    }

    /// Sweep depth in samples, scaled so it sounds the same at any rate
    fn range(sample_rate: f64) -> f64 {
        150.0 * sample_rate / 44100.0
    }

    fn tap_index(&self, position: f64, tap: usize, range: f64) -> f64 {
        let (spread, phase_offset) = TAPS[tap];
        let offset = DELAY_LENGTH as f64 - spread * range;
        position + offset - range * (self.phase + phase_offset).sin()
    }
}

impl PostEffect for Chorus {
    fn begin_run(&mut self, run_length: usize, ctx: &PostContext) {
        if run_length == 0 {
            return;
        }
        let range = Self::range(ctx.sample_rate);
        let angle = TWO_PI / (SWEEP_SECONDS * ctx.sample_rate);
        let position = self.position as f64;

        self.phase %= TWO_PI;
        let starts: [f64; 3] = std::array::from_fn(|tap| self.tap_index(position, tap, range));
        self.phase += angle * run_length as f64;
        for tap in 0..TAPS.len() {
            let end = self.tap_index(position + run_length as f64, tap, range);
            self.tap_indices[tap] = starts[tap];
            self.tap_deltas[tap] = (end - starts[tap]) / run_length as f64;
        }
    }

    fn process(&mut self, frame: &mut MixFrame, _ctx: &PostContext) {
        let combined = frame.chorus_send + frame.chorus_reverb_send;

        let mut taps = [0.0; 3];
        for (tap, value) in taps.iter_mut().enumerate() {
            let index = self.tap_indices[tap].rem_euclid(DELAY_LENGTH as f64);
            let whole = index as usize;
            let ratio = index - whole as f64;
            let a = self.line[whole & DELAY_MASK];
            let b = self.line[(whole + 1) & DELAY_MASK];
            *value = a + (b - a) * ratio;
            self.tap_indices[tap] += self.tap_deltas[tap];
        }

        self.line[self.position] = combined;
        self.position = (self.position + 1) & DELAY_MASK;

        frame.output += 0.5 * (combined - taps[0] + taps[1] - taps[2]);
    }

    fn reset(&mut self) {
        self.line.fill(0.0);
        self.position = 0;
        self.phase = 0.0;
    }

    fn name(&self) -> &'static str {
        "chorus"
    }
}

// ============================================================================
// UNIT TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> PostContext {
        PostContext { sample_rate: 48000.0, reverb: 0.0, volume: 1.0 }
    }

    #[test]
    fn test_first_sample_is_half_the_input() {
        // The delay line is empty, so only the direct path sounds
        let mut chorus = Chorus::new();
        chorus.begin_run(1, &ctx());
        let mut frame = MixFrame { chorus_send: 0.8, ..MixFrame::default() };
        chorus.process(&mut frame, &ctx());
        assert!((frame.output - 0.4).abs() < 1e-12);
    }

    #[test]
    fn test_taps_stay_inside_the_line() {
        let mut chorus = Chorus::new();
        for _ in 0..200 {
            chorus.begin_run(480, &ctx());
            for _ in 0..480 {
                let mut frame = MixFrame { chorus_send: 0.5, ..MixFrame::default() };
                chorus.process(&mut frame, &ctx());
                assert!(frame.output.is_finite() && frame.output.abs() <= 1.0);
            }
        }
        assert!(chorus.phase < TWO_PI + 1.0);
    }

    #[test]
    fn test_delayed_copies_appear() {
        let mut chorus = Chorus::new();
        let mut outputs = Vec::new();
        chorus.begin_run(1200, &ctx());
        for i in 0..1200 {
            let send = if i == 0 { 1.0 } else { 0.0 };
            let mut frame = MixFrame { chorus_send: send, ..MixFrame::default() };
            chorus.process(&mut frame, &ctx());
            outputs.push(frame.output);
        }
        assert!(outputs[1..].iter().any(|sample| sample.abs() > 1e-3));
    }

    #[test]
    fn test_reset_clears_the_line() {
        let mut chorus = Chorus::new();
        chorus.begin_run(10, &ctx());
        for _ in 0..10 {
            let mut frame = MixFrame { chorus_send: 1.0, ..MixFrame::default() };
            chorus.process(&mut frame, &ctx());
        }
        chorus.reset();
        assert!(chorus.line.iter().all(|&sample| sample == 0.0));
        assert_eq!(chorus.position, 0);
    }
}
