// ============================================================================
// TONE.RS - Voices in Flight and Their Pool
// ============================================================================
//
// A Tone is one sounding pitch (or one arpeggiated chord) on one channel.
// It carries everything a voice needs from run to run: oscillator phases,
// filter memory, the per-run start values and deltas written by the tone
// computation, and bookkeeping about the note that spawned it.
//
// POOLING:
// Tones live in a slab owned by the TonePool and are referred to by ToneId.
// Freed tones go on a free list and are reused, so after the first few bars
// the render path never allocates.
// ============================================================================

use crate::config::{MAX_CHORD_SIZE, OPERATOR_COUNT};
use crate::synth::filter::ResonantFilter;

/// Handle of a tone inside the pool
pub type ToneId = usize;

/// Where a tone's note lives: its index in the pattern plus its bounds, kept
/// so released tones can still answer questions about the note after the
/// pattern has moved on
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NoteRef {
    pub index: usize,
    pub start: i32,
    pub end: i32,
}

#[derive(Clone, Debug, Default)]
pub struct Tone {
    /// Index into the channel's instruments
    pub instrument: usize,

    /// Index into the channel's patterns that `note` refers to
    pub pattern: usize,

    pub pitches: [i32; MAX_CHORD_SIZE],
    pub pitch_count: usize,

    /// Pitches in the whole chord, for chord volume scaling
    pub chord_size: usize,

    /// None for live input tones
    pub note: Option<NoteRef>,
    pub prev_note: Option<NoteRef>,
    pub next_note: Option<NoteRef>,
    pub prev_note_pitch_index: usize,
    pub next_note_pitch_index: usize,

    /// Set once the tone has produced a run; a tone that was not active is
    /// started from phase zero
    pub active: bool,

    /// Bounds in parts after strum offsets and seamless extension
    pub note_start: i32,
    pub note_end: i32,
    pub note_length_ticks: f64,
    pub ticks_since_released: usize,
    pub live_input_samples_held: f64,

    /// Pitch bend and volume of the note's final pin, held while released
    pub last_interval: f64,
    pub last_volume: f64,

    // ---- Oscillator state ----
    pub phases: [f64; OPERATOR_COUNT],
    pub feedback_outputs: [f64; OPERATOR_COUNT],

    /// One-pole smoothing memory of the noise voice
    pub sample: f64,
    pub filter_state: ResonantFilter,

    // ---- Per-run parameters written by the tone computation ----
    pub phase_deltas: [f64; OPERATOR_COUNT],
    pub phase_delta_scale: f64,
    pub volume_starts: [f64; OPERATOR_COUNT],
    pub volume_deltas: [f64; OPERATOR_COUNT],
    pub volume_start: f64,
    pub volume_delta: f64,
    pub filter: f64,
    pub filter_scale: f64,
    pub interval_mult: f64,
    pub interval_volume_mult: f64,
    pub feedback_mult: f64,
    pub feedback_delta: f64,
}

impl Tone {
    /// Clears oscillator and filter memory so the next run starts cleanly
    pub fn reset(&mut self) {
        self.phases = [0.0; OPERATOR_COUNT];
        self.feedback_outputs = [0.0; OPERATOR_COUNT];
        self.sample = 0.0;
        self.filter_state.reset();
        self.live_input_samples_held = 0.0;
    }

    /// The pitches this tone plays
    pub fn pitches(&self) -> &[i32] {
        &self.pitches[..self.pitch_count.min(MAX_CHORD_SIZE)]
    }

    /// Copies up to MAX_CHORD_SIZE pitches in
    pub fn set_pitches(&mut self, pitches: &[i32]) {
        let count = pitches.len().min(MAX_CHORD_SIZE);
        self.pitches[..count].copy_from_slice(&pitches[..count]);
        self.pitch_count = count;
    }
}

// ============================================================================
// TONE POOL
// ============================================================================

#[derive(Default)]
pub struct TonePool {
    tones: Vec<Tone>,
    free: Vec<ToneId>,
}

impl TonePool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hands out a reset, inactive tone, reusing a freed one when possible
    pub fn new_tone(&mut self) -> ToneId {
        match self.free.pop() {
            Some(id) => {
                let tone = &mut self.tones[id];
                tone.reset();
                tone.active = false;
                id
            }
            None => {
                self.tones.push(Tone::default());
                self.tones.len() - 1
            }
        }
    }

    pub fn free_tone(&mut self, id: ToneId) {
        debug_assert!(!self.free.contains(&id), "tone {id} freed twice");
        self.free.push(id);
    }

    pub fn get(&self, id: ToneId) -> &Tone {
        &self.tones[id]
    }

    pub fn get_mut(&mut self, id: ToneId) -> &mut Tone {
        &mut self.tones[id]
    }

    /// Tones ever allocated
    pub fn capacity(&self) -> usize {
        self.tones.len()
    }

    /// Tones currently handed out
    pub fn in_use(&self) -> usize {
        self.tones.len() - self.free.len()
    }
}

// ============================================================================
// UNIT TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_reuses_freed_tones() {
        let mut pool = TonePool::new();
        let a = pool.new_tone();
        let b = pool.new_tone();
        assert_ne!(a, b);
        assert_eq!(pool.in_use(), 2);

        pool.get_mut(a).phases[0] = 0.7;
        pool.get_mut(a).active = true;
        pool.free_tone(a);
        assert_eq!(pool.in_use(), 1);

        let c = pool.new_tone();
        assert_eq!(c, a);
        assert_eq!(pool.capacity(), 2);
        assert_eq!(pool.get(c).phases[0], 0.0);
        assert!(!pool.get(c).active);
    }

    #[test]
    fn test_set_pitches_caps_chord_size() {
        let mut tone = Tone::default();
        tone.set_pitches(&[1, 2, 3, 4, 5]);
        assert_eq!(tone.pitches(), &[1, 2, 3, 4]);
        tone.set_pitches(&[9]);
        assert_eq!(tone.pitches(), &[9]);
    }

    #[test]
    fn test_reset_clears_filter_memory() {
        let mut tone = Tone::default();
        tone.filter_state.sample0 = 0.3;
        tone.sample = 0.2;
        tone.feedback_outputs[2] = 0.1;
        tone.reset();
        assert_eq!(tone.filter_state, ResonantFilter::default());
        assert_eq!(tone.sample, 0.0);
        assert_eq!(tone.feedback_outputs, [0.0; OPERATOR_COUNT]);
    }
}
