// ============================================================================
// INSTRUMENT.RS - Instrument Settings
// ============================================================================
//
// An Instrument is a bag of catalog indices. Which fields matter depends on
// the instrument type:
// - Chip: wave, unison interval, vibrato
// - FM: algorithm, feedback routing/amplitude/envelope, four operators
// - Noise: which noise table
// Filter, transition, chord mode, effects routing and volume apply to all.
//
// Switching type resets every field to that type's defaults.
// ============================================================================

use crate::config::{
    ALGORITHMS, CHIP_NOISES, CHIP_WAVES, CHORDS, ENVELOPES, FEEDBACKS, INSTRUMENT_TYPE_NAMES, INTERVALS,
    OPERATOR_AMPLITUDE_MAX, OPERATOR_COUNT, OPERATOR_FREQUENCIES, TRANSITIONS, VIBRATOS, Algorithm, ChipNoise,
    ChipWave, Chord, Envelope, Feedback, Interval, OperatorFrequency, Transition, Vibrato,
};

// ============================================================================
// INSTRUMENT TYPE
// ============================================================================

/// The sound generator an instrument drives
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum InstrumentType {
    #[default]
    Chip,
    Fm,
    Noise,
}

impl InstrumentType {
    pub const ALL: [InstrumentType; 3] = [InstrumentType::Chip, InstrumentType::Fm, InstrumentType::Noise];

    /// Index used by the song format
    pub fn index(self) -> usize {
        match self {
            InstrumentType::Chip => 0,
            InstrumentType::Fm => 1,
            InstrumentType::Noise => 2,
        }
    }

    /// Inverse of `index`; out-of-range values are clamped
    pub fn from_index(index: usize) -> Self {
        Self::ALL[index.min(Self::ALL.len() - 1)]
    }

    /// Name used by the JSON format
    pub fn name(self) -> &'static str {
        INSTRUMENT_TYPE_NAMES[self.index()]
    }

    /// Default type for a channel kind
    pub fn for_channel(is_noise_channel: bool) -> Self {
        if is_noise_channel { InstrumentType::Noise } else { InstrumentType::Chip }
    }
}

// ============================================================================
// FM OPERATOR
// ============================================================================

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Operator {
    /// Index into OPERATOR_FREQUENCIES
    pub frequency: usize,

    /// 0..=15
    pub amplitude: i32,

    /// Index into ENVELOPES
    pub envelope: usize,
}

impl Operator {
    pub fn new(index: usize) -> Self {
        let mut operator = Self::default();
        operator.reset(index);
        operator
    }

    /// The first two operators start audible, and only the first one
    /// follows the note volume
    pub fn reset(&mut self, index: usize) {
        self.frequency = 0;
        self.amplitude = if index <= 1 { OPERATOR_AMPLITUDE_MAX } else { 0 };
        self.envelope = if index == 0 { 0 } else { 1 };
    }

    pub fn get_frequency(&self) -> &'static OperatorFrequency {
        &OPERATOR_FREQUENCIES[self.frequency.min(OPERATOR_FREQUENCIES.len() - 1)]
    }

    pub fn get_envelope(&self) -> &'static Envelope {
        &ENVELOPES[self.envelope.min(ENVELOPES.len() - 1)]
    }
}

// ============================================================================
// INSTRUMENT
// ============================================================================

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Instrument {
    pub instrument_type: InstrumentType,

    /// Preset the editor last applied; carried through the song format as-is
    pub preset: usize,

    pub chip_wave: usize,
    pub chip_noise: usize,
    pub filter_cutoff: usize,
    pub filter_resonance: usize,
    pub filter_envelope: usize,
    pub transition: usize,
    pub vibrato: usize,
    pub interval: usize,

    /// 0 dry, 1 reverb, 2 chorus, 3 chorus and reverb
    pub effects: usize,
    pub chord: usize,

    /// 0 loudest .. 7 muted
    pub volume: i32,

    pub algorithm: usize,
    pub feedback_type: usize,
    pub feedback_amplitude: i32,
    pub feedback_envelope: usize,
    pub operators: [Operator; OPERATOR_COUNT],
}

impl Instrument {
    /// A fresh instrument before any type defaults are applied
    pub fn new(is_noise_channel: bool) -> Self {
        Self {
            instrument_type: InstrumentType::for_channel(is_noise_channel),
            preset: 0,
            chip_wave: 2,
            chip_noise: 1,
            filter_cutoff: 6,
            filter_resonance: 0,
            filter_envelope: 1,
            transition: 1,
            vibrato: 0,
            interval: 0,
            effects: 0,
            chord: 1,
            volume: 0,
            algorithm: 0,
            feedback_type: 0,
            feedback_amplitude: 0,
            feedback_envelope: 1,
            operators: std::array::from_fn(Operator::new),
        }
    }

    /// A new instrument of the channel's default type with that type's
    /// defaults applied
    pub fn with_defaults(is_noise_channel: bool) -> Self {
        let mut instrument = Self::new(is_noise_channel);
        instrument.set_type_and_reset(InstrumentType::for_channel(is_noise_channel));
        instrument
    }

    /// Switches type and resets all type-specific settings
    pub fn set_type_and_reset(&mut self, instrument_type: InstrumentType) {
        self.instrument_type = instrument_type;
        self.preset = instrument_type.index();
        self.volume = 0;
        match instrument_type {
            InstrumentType::Chip => {
                self.chip_wave = 2;
                self.filter_cutoff = 6;
                self.filter_resonance = 0;
                self.filter_envelope = 1;
                self.transition = 1;
                self.vibrato = 0;
                self.interval = 0;
                self.effects = 1;
                self.chord = 2;
            }
            InstrumentType::Fm => {
                self.transition = 1;
                self.vibrato = 0;
                self.effects = 1;
                self.chord = 3;
                self.filter_cutoff = 10;
                self.filter_resonance = 0;
                self.filter_envelope = 1;
                self.algorithm = 0;
                self.feedback_type = 0;
                self.feedback_amplitude = 0;
                self.feedback_envelope = 1;
                for (index, operator) in self.operators.iter_mut().enumerate() {
                    operator.reset(index);
                }
            }
            InstrumentType::Noise => {
                self.chip_noise = 1;
                self.transition = 1;
                self.effects = 0;
                self.chord = 2;
                self.filter_cutoff = 10;
                self.filter_resonance = 0;
                self.filter_envelope = 1;
            }
        }
    }

    // ---- Catalog accessors (indices are clamped so a bad edit cannot panic) ----

    pub fn get_transition(&self) -> &'static Transition {
        &TRANSITIONS[self.transition.min(TRANSITIONS.len() - 1)]
    }

    pub fn get_chord(&self) -> &'static Chord {
        &CHORDS[self.chord.min(CHORDS.len() - 1)]
    }

    pub fn get_vibrato(&self) -> &'static Vibrato {
        &VIBRATOS[self.vibrato.min(VIBRATOS.len() - 1)]
    }

    pub fn get_interval(&self) -> &'static Interval {
        &INTERVALS[self.interval.min(INTERVALS.len() - 1)]
    }

    pub fn get_chip_wave(&self) -> &'static ChipWave {
        &CHIP_WAVES[self.chip_wave.min(CHIP_WAVES.len() - 1)]
    }

    pub fn get_chip_noise(&self) -> &'static ChipNoise {
        &CHIP_NOISES[self.chip_noise.min(CHIP_NOISES.len() - 1)]
    }

    pub fn get_filter_envelope(&self) -> &'static Envelope {
        &ENVELOPES[self.filter_envelope.min(ENVELOPES.len() - 1)]
    }

    pub fn get_algorithm(&self) -> &'static Algorithm {
        &ALGORITHMS[self.algorithm.min(ALGORITHMS.len() - 1)]
    }

    pub fn get_feedback(&self) -> &'static Feedback {
        &FEEDBACKS[self.feedback_type.min(FEEDBACKS.len() - 1)]
    }

    pub fn get_feedback_envelope(&self) -> &'static Envelope {
        &ENVELOPES[self.feedback_envelope.min(ENVELOPES.len() - 1)]
    }
}

impl Default for Instrument {
    fn default() -> Self {
        Self::with_defaults(false)
    }
}

// ============================================================================
// UNIT TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_type_and_reset_fm() {
        let mut instrument = Instrument::with_defaults(false);
        instrument.volume = 4;
        instrument.operators[2].amplitude = 9;
        instrument.set_type_and_reset(InstrumentType::Fm);

        assert_eq!(instrument.instrument_type, InstrumentType::Fm);
        assert_eq!(instrument.preset, 1);
        assert_eq!(instrument.volume, 0);
        assert_eq!(instrument.chord, 3);
        assert_eq!(instrument.filter_cutoff, 10);
        assert_eq!(instrument.operators[0].amplitude, 15);
        assert_eq!(instrument.operators[1].amplitude, 15);
        assert_eq!(instrument.operators[2].amplitude, 0);
        assert_eq!(instrument.operators[0].envelope, 0);
        assert_eq!(instrument.operators[3].envelope, 1);
    }

    #[test]
    fn test_noise_defaults() {
        let instrument = Instrument::with_defaults(true);
        assert_eq!(instrument.instrument_type, InstrumentType::Noise);
        assert_eq!(instrument.chip_noise, 1);
        assert_eq!(instrument.effects, 0);
        assert_eq!(instrument.get_chip_noise().name, "white");
    }

    #[test]
    fn test_accessors_clamp_out_of_range_indices() {
        let mut instrument = Instrument::default();
        instrument.transition = 99;
        instrument.chip_wave = 99;
        assert_eq!(instrument.get_transition().name, "soft fade");
        assert_eq!(instrument.get_chip_wave().name, "spiky");
    }
}
