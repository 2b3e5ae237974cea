// ============================================================================
// REVERB.RS - Four-Line Feedback Delay Network
// ============================================================================
//
// Four read points share one 16384-sample circular buffer, spaced at
// 0, 3041, 6426 and 10907 samples. Each sample the four taps are mixed
// through a 4x4 +/-1 matrix, scaled by the feedback gain, smoothed by a
// one-pole low-pass and written back a line further along. The reverb send
// is injected into the first two matrix rows.
//
// With a gain of zero nothing is ever written back, so the buffer stays
// silent and the reverb send passes through exactly like the dry path.
// ============================================================================

use super::{MixFrame, PostContext, PostEffect};
use crate::helper::flush_denormal;

const DELAY_LENGTH: usize = 16384;
const DELAY_MASK: usize = DELAY_LENGTH - 1;
const TAP_OFFSETS: [usize; 3] = [3041, 6426, 10907];

/// One-pole smoothing on each feedback path
const FEEDBACK_SMOOTHING: f64 = 0.5;

#[derive(Clone, Debug)]
pub struct Reverb {
    line: Vec<f64>,
    position: usize,
    feedback: [f64; 4],
}

impl Default for Reverb {
    fn default() -> Self {
        Self::new()
    }
}

impl Reverb {
    pub fn new() -> Self {
        Self { line: vec![0.0; DELAY_LENGTH], position: 0, feedback: [0.0; 4] }
    }
}

impl PostEffect for Reverb {
    fn process(&mut self, frame: &mut MixFrame, ctx: &PostContext) {
        let position1 = (self.position + TAP_OFFSETS[0]) & DELAY_MASK;
        let position2 = (self.position + TAP_OFFSETS[1]) & DELAY_MASK;
        let position3 = (self.position + TAP_OFFSETS[2]) & DELAY_MASK;
        let sample0 = self.line[self.position];
        let sample1 = self.line[position1];
        let sample2 = self.line[position2];
        let sample3 = self.line[position3];

        let input = frame.reverb_send + frame.chorus_reverb_send;
        let temp0 = -(sample0 + input) + sample1;
        let temp1 = -(sample0 + input) - sample1;
        let temp2 = -sample2 + sample3;
        let temp3 = -sample2 - sample3;

        let targets = [temp0 + temp2, temp1 + temp3, temp0 - temp2, temp1 - temp3];
        for (feedback, target) in self.feedback.iter_mut().zip(targets) {
            *feedback += (target * ctx.reverb - *feedback) * FEEDBACK_SMOOTHING;
        }

        self.line[position1] = self.feedback[0];
        self.line[position2] = self.feedback[1];
        self.line[position3] = self.feedback[2];
        self.line[self.position] = self.feedback[3];
        self.position = (self.position + 1) & DELAY_MASK;

        frame.output += frame.reverb_send + sample1 + sample2 + sample3;
    }

    fn reset(&mut self) {
        self.line.fill(0.0);
        self.position = 0;
        self.feedback = [0.0; 4];
    }

    fn flush_denormals(&mut self) {
        for feedback in &mut self.feedback {
            *feedback = flush_denormal(*feedback);
        }
    }

    fn name(&self) -> &'static str {
        "reverb"
    }
}

// ============================================================================
// UNIT TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effects::reverb_gain;

    fn ctx(reverb: i32) -> PostContext {
        PostContext { sample_rate: 48000.0, reverb: reverb_gain(reverb), volume: 1.0 }
    }

    fn impulse_response(reverb: i32, length: usize) -> Vec<f64> {
        let mut effect = Reverb::new();
        (0..length)
            .map(|i| {
                let mut frame = MixFrame { reverb_send: if i == 0 { 1.0 } else { 0.0 }, ..MixFrame::default() };
                effect.process(&mut frame, &ctx(reverb));
                frame.output
            })
            .collect()
    }

    #[test]
    fn test_zero_gain_passes_the_send_through() {
        let response = impulse_response(0, 20000);
        assert_eq!(response[0], 1.0);
        assert!(response[1..].iter().all(|&sample| sample == 0.0));
    }

    #[test]
    fn test_first_echo_arrives_between_taps() {
        // The second line's write is read by the first output tap
        let response = impulse_response(3, 20000);
        let first_echo = response[1..].iter().position(|sample| sample.abs() > 1e-9).map(|i| i + 1);
        assert_eq!(first_echo, Some(TAP_OFFSETS[1] - TAP_OFFSETS[0]));
    }

    #[test]
    fn test_feedback_decays() {
        let response = impulse_response(3, DELAY_LENGTH * 12);
        let early: f64 = response[..DELAY_LENGTH * 2].iter().map(|sample| sample.abs()).sum();
        let late: f64 = response[DELAY_LENGTH * 10..].iter().map(|sample| sample.abs()).sum();
        assert!(late < early);
    }

    #[test]
    fn test_flush_zeroes_tiny_feedback() {
        let mut effect = Reverb::new();
        effect.feedback = [1e-30, -1e-30, 0.5, 0.0];
        effect.flush_denormals();
        assert_eq!(effect.feedback, [0.0, 0.0, 0.5, 0.0]);
    }
}
