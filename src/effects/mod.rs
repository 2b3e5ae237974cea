// ============================================================================
// EFFECTS MODULE - Shared Post-Processing Chain
// ============================================================================
//
// Voices do not apply effects themselves. Each voice adds its output into
// one of four mix buffers, picked by the instrument's effects setting:
//
//   none           -> straight to the output
//   reverb         -> reverb input, plus the dry signal
//   chorus         -> chorus input
//   chorus & reverb-> chorus input and reverb input
//
// Once per run the chain walks those buffers sample by sample, adds the
// chorus and reverb returns and limits the sum into the output buffer.
//
// ARCHITECTURE:
// - Each stage implements the PostEffect trait
// - Stages work on a MixFrame: the four sends for one sample plus the
//   output sum being built
// - Stages keep their own delay lines and followers
// - The chain order is fixed: chorus, reverb, limiter
//
// SUBMODULES:
// - chorus: 3-tap modulated delay
// - reverb: 4-line feedback delay network
// - limiter: peak follower with soft gain
//
// ============================================================================

pub mod chorus;
pub mod limiter;
pub mod reverb;

pub use chorus::Chorus;
pub use limiter::Limiter;
pub use reverb::Reverb;

use crate::config::REVERB_RANGE;
use crate::song::Song;

// ============================================================================
// POST CONTEXT
// ============================================================================

/// Song-wide values the chain needs, fixed for one buffer
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PostContext {
    pub sample_rate: f64,

    /// Reverb feedback gain, 0 for a dry song
    pub reverb: f64,

    /// Master volume the limiter scales to
    pub volume: f64,
}

impl PostContext {
    pub fn for_song(song: &Song, sample_rate: f64, volume: f64) -> Self {
        Self { sample_rate, reverb: reverb_gain(song.reverb), volume }
    }
}

/// Feedback gain for the song's reverb setting
pub fn reverb_gain(reverb: i32) -> f64 {
    (reverb.clamp(0, REVERB_RANGE) as f64 / REVERB_RANGE as f64).powf(0.667) * 0.425
}

// ============================================================================
// MIX FRAME
// ============================================================================

/// One sample of every send, plus the output being summed
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct MixFrame {
    pub dry: f64,
    pub reverb_send: f64,
    pub chorus_send: f64,
    pub chorus_reverb_send: f64,
    pub output: f64,
}

// ============================================================================
// POST EFFECT TRAIT
// ============================================================================

/// A stage of the post chain
pub trait PostEffect: Send {
    /// Called before each run with the number of samples it will process
    fn begin_run(&mut self, _run_length: usize, _ctx: &PostContext) {}

    fn process(&mut self, frame: &mut MixFrame, ctx: &PostContext);

    /// Clears delay lines and followers
    fn reset(&mut self);

    /// Zeroes feedback state that has decayed into the denormal range
    fn flush_denormals(&mut self) {}

    fn name(&self) -> &'static str;
}

// ============================================================================
// MIX BUFFERS
// ============================================================================

/// The four voice sends for one run
#[derive(Clone, Debug, Default)]
pub struct MixBuffers {
    pub none: Vec<f64>,
    pub reverb: Vec<f64>,
    pub chorus: Vec<f64>,
    pub chorus_reverb: Vec<f64>,
}

impl MixBuffers {
    /// Grows every buffer to hold at least `length` samples
    pub fn ensure_length(&mut self, length: usize) {
        for buffer in [&mut self.none, &mut self.reverb, &mut self.chorus, &mut self.chorus_reverb] {
            if buffer.len() < length {
                buffer.resize(length, 0.0);
            }
        }
    }

    /// The send an instrument with this effects setting writes into
    pub fn for_effects(&mut self, effects: usize) -> &mut [f64] {
        match effects {
            1 => &mut self.reverb,
            2 => &mut self.chorus,
            3 => &mut self.chorus_reverb,
            _ => &mut self.none,
        }
    }

    pub fn clear(&mut self) {
        for buffer in [&mut self.none, &mut self.reverb, &mut self.chorus, &mut self.chorus_reverb] {
            buffer.fill(0.0);
        }
    }
}

// ============================================================================
// POST CHAIN
// ============================================================================

#[derive(Clone, Debug)]
pub struct PostChain {
    pub chorus: Chorus,
    pub reverb: Reverb,
    pub limiter: Limiter,
}

impl Default for PostChain {
    fn default() -> Self {
        Self::new()
    }
}

impl PostChain {
    pub fn new() -> Self {
        Self { chorus: Chorus::new(), reverb: Reverb::new(), limiter: Limiter::new() }
    }

    fn stages(&mut self) -> [&mut dyn PostEffect; 3] {
        [&mut self.chorus, &mut self.reverb, &mut self.limiter]
    }

    /// Mixes the first `output.len()` samples of the sends into `output`
    /// and zeroes the sends it consumed
    pub fn process_run(&mut self, mix: &mut MixBuffers, output: &mut [f32], ctx: &PostContext) {
        let run_length = output.len();
        for stage in self.stages() {
            stage.begin_run(run_length, ctx);
        }

        for (i, out) in output.iter_mut().enumerate() {
            let mut frame = MixFrame {
                dry: std::mem::take(&mut mix.none[i]),
                reverb_send: std::mem::take(&mut mix.reverb[i]),
                chorus_send: std::mem::take(&mut mix.chorus[i]),
                chorus_reverb_send: std::mem::take(&mut mix.chorus_reverb[i]),
                output: 0.0,
            };
            frame.output = frame.dry;
            for stage in self.stages() {
                stage.process(&mut frame, ctx);
            }
            *out = frame.output as f32;
        }
    }

    pub fn reset(&mut self) {
        for stage in self.stages() {
            stage.reset();
        }
        tracing::debug!("post chain reset");
    }

    pub fn flush_denormals(&mut self) {
        for stage in self.stages() {
            stage.flush_denormals();
        }
    }

    /// Current limiter envelope, for level displays
    pub fn peak_meter(&self) -> f64 {
        self.limiter.limit
    }

    pub fn stage_names(&mut self) -> Vec<&'static str> {
        self.stages().iter().map(|stage| stage.name()).collect()
    }
}

// ============================================================================
// UNIT TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn context(reverb: i32) -> PostContext {
        PostContext { sample_rate: 48000.0, reverb: reverb_gain(reverb), volume: 1.0 }
    }

    fn test_signal(length: usize) -> Vec<f64> {
        (0..length).map(|i| ((i as f64) * 0.05).sin() * 0.6 + if i % 97 == 0 { 0.9 } else { 0.0 }).collect()
    }

    fn render(send: usize, reverb: i32, input: &[f64]) -> Vec<f32> {
        let ctx = context(reverb);
        let mut chain = PostChain::new();
        let mut mix = MixBuffers::default();
        let mut output = vec![0.0_f32; input.len()];
        for (chunk_index, chunk) in output.chunks_mut(400).enumerate() {
            mix.ensure_length(chunk.len());
            let start = chunk_index * 400;
            mix.for_effects(send)[..chunk.len()].copy_from_slice(&input[start..start + chunk.len()]);
            chain.process_run(&mut mix, chunk, &ctx);
        }
        output
    }

    #[test]
    fn test_reverb_gain_curve() {
        assert_eq!(reverb_gain(0), 0.0);
        assert!((reverb_gain(4) - 0.425).abs() < 1e-12);
        assert!(reverb_gain(1) < reverb_gain(2));
    }

    #[test]
    fn test_dry_reverb_identical_without_reverb() {
        let input = test_signal(4000);
        let dry = render(0, 0, &input);
        let reverb_only = render(1, 0, &input);
        assert_eq!(dry, reverb_only);
    }

    #[test]
    fn test_reverb_adds_a_tail() {
        let mut input = vec![0.0; 24000];
        input[0] = 1.0;
        let wet = render(1, 3, &input);
        let tail: f32 = wet[4000..].iter().map(|sample| sample.abs()).sum();
        assert!(tail > 0.0);
    }

    #[test]
    fn test_sends_are_consumed() {
        let ctx = context(2);
        let mut chain = PostChain::new();
        let mut mix = MixBuffers::default();
        mix.ensure_length(64);
        for send in 0..4 {
            mix.for_effects(send).fill(0.25);
        }
        let mut output = vec![0.0_f32; 64];
        chain.process_run(&mut mix, &mut output, &ctx);
        for send in 0..4 {
            assert!(mix.for_effects(send).iter().all(|&sample| sample == 0.0));
        }
    }

    #[test]
    fn test_chain_order() {
        let mut chain = PostChain::new();
        assert_eq!(chain.stage_names(), vec!["chorus", "reverb", "limiter"]);
    }
}
