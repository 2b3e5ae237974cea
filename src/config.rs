// ============================================================================
// CONFIG.RS - Static Catalog of Song and Instrument Parameters
// ============================================================================
//
// Every enumerated song or instrument setting is stored in a song as a small
// integer index. This module holds the tables those indices refer to:
// scales, keys, rhythms, chip waves, noises, transitions, vibratos, unison
// intervals, chord modes, FM algorithms and feedback routings, operator
// frequency ratios and envelope curves.
//
// The tables are pure data. Anything derived from them by computation (the
// integrated chip waves, the sine table, the noise tables) lives in
// synth/waves.rs and is built lazily on first use.
//
// HOW TO ADD A NEW ENTRY:
// 1. Append it to the end of the relevant table (indices are persisted in
//    saved songs, so never reorder existing entries)
// 2. If the table length is used by the song codec as a clamp bound, the
//    bound follows automatically from `.len()`
// ============================================================================

// ============================================================================
// SONG-LEVEL LIMITS
// ============================================================================

pub const TEMPO_MIN: i32 = 30;
pub const TEMPO_MAX: i32 = 300;
pub const REVERB_RANGE: i32 = 4;
pub const BEATS_PER_BAR_MIN: usize = 3;
pub const BEATS_PER_BAR_MAX: usize = 16;
pub const BAR_COUNT_MIN: usize = 1;
pub const BAR_COUNT_MAX: usize = 128;

/// The pattern count is stored in a single base64 digit
pub const PATTERNS_PER_CHANNEL_MAX: usize = 64;

pub const INSTRUMENTS_PER_CHANNEL_MIN: usize = 1;
pub const INSTRUMENTS_PER_CHANNEL_MAX: usize = 10;

pub const PITCH_CHANNEL_COUNT_MIN: usize = 1;
pub const PITCH_CHANNEL_COUNT_MAX: usize = 6;
pub const NOISE_CHANNEL_COUNT_MIN: usize = 0;
pub const NOISE_CHANNEL_COUNT_MAX: usize = 3;

// ============================================================================
// TIME GRID
// ============================================================================
//
// A beat is divided into 24 "parts" (the unit note times are stored in), and
// every part is divided into 2 "ticks" (the unit the synth advances by).
// ============================================================================

pub const PARTS_PER_BEAT: usize = 24;
pub const TICKS_PER_PART: usize = 2;

// ============================================================================
// PITCH RANGE
// ============================================================================

pub const PITCHES_PER_OCTAVE: i32 = 12;
pub const DRUM_COUNT: i32 = 12;
pub const PITCH_OCTAVES: i32 = 7;
pub const WINDOW_OCTAVES: i32 = 3;
pub const SCROLLABLE_OCTAVES: i32 = PITCH_OCTAVES - WINDOW_OCTAVES;
pub const MAX_PITCH: i32 = PITCH_OCTAVES * PITCHES_PER_OCTAVE;

/// Noise channels step through pitch in coarser increments
pub const NOISE_INTERVAL: f64 = 6.0;

// ============================================================================
// VOICE LIMITS
// ============================================================================

pub const MAX_CHORD_SIZE: usize = 4;
pub const OPERATOR_COUNT: usize = 4;
pub const OPERATOR_AMPLITUDE_MAX: i32 = 15;

/// Active plus released tones a single channel may hold before the oldest
/// released tones are faded out early
pub const MAXIMUM_TONES_PER_CHANNEL: usize = MAX_CHORD_SIZE * 2;

/// Small detune applied to each FM carrier so stacked carriers beat slightly
pub const OPERATOR_CARRIER_INTERVAL: [f64; OPERATOR_COUNT] = [0.0, 0.04, -0.073, 0.091];

// ============================================================================
// FILTER AND VOLUME RANGES
// ============================================================================

pub const FILTER_CUTOFF_MAX_HZ: f64 = 8000.0;
pub const FILTER_CUTOFF_MIN_HZ: f64 = 1.0;
pub const FILTER_MAX: f64 = 0.95;
pub const FILTER_MAX_RESONANCE: f64 = 0.95;
pub const FILTER_CUTOFF_RANGE: i32 = 11;
pub const FILTER_RESONANCE_RANGE: i32 = 8;

/// Volume settings 0..=6 attenuate, 7 mutes
pub const VOLUME_RANGE: i32 = 8;
pub const VOLUME_LOG_SCALE: f64 = -0.5;

// ============================================================================
// TABLE SIZES
// ============================================================================

pub const SINE_WAVE_LENGTH: usize = 1 << 8;
pub const SINE_WAVE_MASK: usize = SINE_WAVE_LENGTH - 1;
pub const CHIP_NOISE_LENGTH: usize = 1 << 15;
pub const SPECTRUM_MAX: f64 = 7.0;

// ============================================================================
// NAME TABLES
// ============================================================================

pub const INSTRUMENT_TYPE_NAMES: [&str; 3] = ["chip", "FM", "noise"];
pub const EFFECTS_NAMES: [&str; 4] = ["none", "reverb", "chorus", "chorus & reverb"];

// ============================================================================
// SCALES
// ============================================================================

#[derive(Debug)]
pub struct Scale {
    /// Name shown in the editor and used in JSON
    pub name: &'static str,

    /// Conventional music theory name
    pub real_name: &'static str,

    /// Which of the 12 semitones above the key belong to the scale
    pub flags: [bool; 12],
}

const T: bool = true;
const F: bool = false;

pub static SCALES: [Scale; 12] = [
    Scale { name: "easy :)", real_name: "pentatonic major", flags: [T, F, T, F, T, F, F, T, F, T, F, F] },
    Scale { name: "easy :(", real_name: "pentatonic minor", flags: [T, F, F, T, F, T, F, T, F, F, T, F] },
    Scale { name: "island :)", real_name: "ryukyu", flags: [T, F, F, F, T, T, F, T, F, F, F, T] },
    Scale { name: "island :(", real_name: "pelog selisir", flags: [T, T, F, T, F, F, F, T, T, F, F, F] },
    Scale { name: "blues :)", real_name: "blues major", flags: [T, F, T, T, T, F, F, T, F, T, F, F] },
    Scale { name: "blues :(", real_name: "blues", flags: [T, F, F, T, F, T, T, T, F, F, T, F] },
    Scale { name: "normal :)", real_name: "ionian", flags: [T, F, T, F, T, T, F, T, F, T, F, T] },
    Scale { name: "normal :(", real_name: "aeolian", flags: [T, F, T, T, F, T, F, T, T, F, T, F] },
    Scale { name: "dbl harmonic :)", real_name: "double harmonic major", flags: [T, T, F, F, T, T, F, T, T, F, F, T] },
    Scale { name: "dbl harmonic :(", real_name: "double harmonic minor", flags: [T, F, T, T, F, F, T, T, T, F, F, T] },
    Scale { name: "strange", real_name: "whole tone", flags: [T, F, T, F, T, F, T, F, T, F, T, F] },
    Scale { name: "expert", real_name: "chromatic", flags: [T, T, T, T, T, T, T, T, T, T, T, T] },
];

/// Index of the chromatic scale, used when an imported song names none
pub const SCALE_EXPERT: usize = 11;

// ============================================================================
// KEYS
// ============================================================================

#[derive(Debug)]
pub struct Key {
    pub name: &'static str,
    pub is_white_key: bool,

    /// Pitch of the key's root in the lowest octave
    pub base_pitch: i32,
}

pub static KEYS: [Key; 12] = [
    Key { name: "C", is_white_key: true, base_pitch: 12 },
    Key { name: "C♯", is_white_key: false, base_pitch: 13 },
    Key { name: "D", is_white_key: true, base_pitch: 14 },
    Key { name: "D♯", is_white_key: false, base_pitch: 15 },
    Key { name: "E", is_white_key: true, base_pitch: 16 },
    Key { name: "F", is_white_key: true, base_pitch: 17 },
    Key { name: "F♯", is_white_key: false, base_pitch: 18 },
    Key { name: "G", is_white_key: true, base_pitch: 19 },
    Key { name: "G♯", is_white_key: false, base_pitch: 20 },
    Key { name: "A", is_white_key: true, base_pitch: 21 },
    Key { name: "A♯", is_white_key: false, base_pitch: 22 },
    Key { name: "B", is_white_key: true, base_pitch: 23 },
];

// ============================================================================
// RHYTHMS
// ============================================================================

#[derive(Debug)]
pub struct Rhythm {
    pub name: &'static str,

    /// Grid resolution offered to the editor, also used by legacy note timing
    pub steps_per_beat: usize,

    /// How many ticks each arpeggio step lasts
    pub ticks_per_arpeggio: usize,

    /// Pitch index sequence for chords of 1, 2 and 3 or more pitches
    pub arpeggio_patterns: [&'static [usize]; 3],
}

pub static RHYTHMS: [Rhythm; 5] = [
    Rhythm { name: "÷3 (triplets)", steps_per_beat: 3, ticks_per_arpeggio: 4, arpeggio_patterns: [&[0], &[0, 0, 1, 1], &[0, 1, 2, 1]] },
    Rhythm { name: "÷4 (standard)", steps_per_beat: 4, ticks_per_arpeggio: 3, arpeggio_patterns: [&[0], &[0, 0, 1, 1], &[0, 1, 2, 1]] },
    Rhythm { name: "÷6", steps_per_beat: 6, ticks_per_arpeggio: 4, arpeggio_patterns: [&[0], &[0, 1], &[0, 1, 2, 1]] },
    Rhythm { name: "÷8", steps_per_beat: 8, ticks_per_arpeggio: 3, arpeggio_patterns: [&[0], &[0, 1], &[0, 1, 2, 1]] },
    Rhythm { name: "freehand", steps_per_beat: 24, ticks_per_arpeggio: 3, arpeggio_patterns: [&[0], &[0, 1], &[0, 1, 2, 1]] },
];

impl Rhythm {
    /// Which pitch of a chord an arpeggio plays on a given step.
    /// Chords larger than the pattern table fall back to simple cycling.
    pub fn arpeggio_pitch_index(&self, pitch_count: usize, arpeggio: usize) -> usize {
        match self.arpeggio_patterns.get(pitch_count.wrapping_sub(1)) {
            Some(pattern) => pattern[arpeggio % pattern.len()],
            None => arpeggio % pitch_count.max(1),
        }
    }
}

// ============================================================================
// CHIP WAVES
// ============================================================================
//
// Raw single-cycle shapes. They are centered and integrated before use so the
// chip voice can reconstruct band-limited samples by finite differences.
// ============================================================================

#[derive(Debug)]
pub struct ChipWave {
    pub name: &'static str,

    /// Loudness compensation applied on top of the instrument volume
    pub volume: f64,

    /// One cycle of the wave, not yet centered
    pub samples: &'static [f64],
}

pub static CHIP_WAVES: [ChipWave; 9] = [
    // -------------------------------------------------------------------------
    // Rounded: a square wave with softened edges
    // -------------------------------------------------------------------------
    ChipWave {
        name: "rounded",
        volume: 0.94,
        samples: &[
            0.0, 0.2, 0.4, 0.5, 0.6, 0.7, 0.8, 0.85, 0.9, 0.95, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0,
            1.0, 1.0, 1.0, 1.0, 1.0, 0.95, 0.9, 0.85, 0.8, 0.7, 0.6, 0.5, 0.4, 0.2, 0.0, -0.2, -0.4, -0.5, -0.6,
            -0.7, -0.8, -0.85, -0.9, -0.95, -1.0, -1.0, -1.0, -1.0, -1.0, -1.0, -1.0, -1.0, -1.0, -1.0, -1.0,
            -0.95, -0.9, -0.85, -0.8, -0.7, -0.6, -0.5, -0.4, -0.2,
        ],
    },
    // -------------------------------------------------------------------------
    // Triangle: 4-bit stepped triangle like the classic console channel
    // -------------------------------------------------------------------------
    ChipWave {
        name: "triangle",
        volume: 1.0,
        samples: &[
            1.0 / 15.0, 3.0 / 15.0, 5.0 / 15.0, 7.0 / 15.0, 9.0 / 15.0, 11.0 / 15.0, 13.0 / 15.0, 15.0 / 15.0,
            15.0 / 15.0, 13.0 / 15.0, 11.0 / 15.0, 9.0 / 15.0, 7.0 / 15.0, 5.0 / 15.0, 3.0 / 15.0, 1.0 / 15.0,
            -1.0 / 15.0, -3.0 / 15.0, -5.0 / 15.0, -7.0 / 15.0, -9.0 / 15.0, -11.0 / 15.0, -13.0 / 15.0,
            -15.0 / 15.0, -15.0 / 15.0, -13.0 / 15.0, -11.0 / 15.0, -9.0 / 15.0, -7.0 / 15.0, -5.0 / 15.0,
            -3.0 / 15.0, -1.0 / 15.0,
        ],
    },
    ChipWave { name: "square", volume: 0.5, samples: &[1.0, -1.0] },
    ChipWave { name: "1/4 pulse", volume: 0.5, samples: &[1.0, -1.0, -1.0, -1.0] },
    ChipWave { name: "1/8 pulse", volume: 0.5, samples: &[1.0, -1.0, -1.0, -1.0, -1.0, -1.0, -1.0, -1.0] },
    ChipWave {
        name: "sawtooth",
        volume: 0.65,
        samples: &[
            1.0 / 31.0, 3.0 / 31.0, 5.0 / 31.0, 7.0 / 31.0, 9.0 / 31.0, 11.0 / 31.0, 13.0 / 31.0, 15.0 / 31.0,
            17.0 / 31.0, 19.0 / 31.0, 21.0 / 31.0, 23.0 / 31.0, 25.0 / 31.0, 27.0 / 31.0, 29.0 / 31.0, 31.0 / 31.0,
            -31.0 / 31.0, -29.0 / 31.0, -27.0 / 31.0, -25.0 / 31.0, -23.0 / 31.0, -21.0 / 31.0, -19.0 / 31.0,
            -17.0 / 31.0, -15.0 / 31.0, -13.0 / 31.0, -11.0 / 31.0, -9.0 / 31.0, -7.0 / 31.0, -5.0 / 31.0,
            -3.0 / 31.0, -1.0 / 31.0,
        ],
    },
    ChipWave {
        name: "double saw",
        volume: 0.5,
        samples: &[0.0, -0.2, -0.4, -0.6, -0.8, -1.0, 1.0, -0.8, -0.6, -0.4, -0.2, 1.0, 0.8, 0.6, 0.4, 0.2],
    },
    ChipWave {
        name: "double pulse",
        volume: 0.4,
        samples: &[1.0, 1.0, 1.0, 1.0, 1.0, -1.0, -1.0, -1.0, 1.0, 1.0, 1.0, 1.0, -1.0, -1.0, -1.0, -1.0],
    },
    ChipWave { name: "spiky", volume: 0.4, samples: &[1.0, -1.0, 1.0, -1.0, 1.0, 0.0] },
];

/// Wave index remapping for songs saved before the "rounded" wave existed
pub const LEGACY_WAVES: [usize; 9] = [1, 2, 3, 4, 5, 6, 7, 8, 0];

// ============================================================================
// CHIP NOISES
// ============================================================================

#[derive(Debug)]
pub struct ChipNoise {
    pub name: &'static str,
    pub volume: f64,

    /// Pitch at which the table plays back at its natural rate
    pub base_pitch: f64,

    /// Scales the one-pole smoothing coefficient with playback rate
    pub pitch_filter_mult: f64,

    /// Soft noises are smoothed and use a gentler pitch volume curve
    pub is_soft: bool,
}

pub static CHIP_NOISES: [ChipNoise; 5] = [
    ChipNoise { name: "retro", volume: 0.25, base_pitch: 69.0, pitch_filter_mult: 1024.0, is_soft: false },
    ChipNoise { name: "white", volume: 1.0, base_pitch: 69.0, pitch_filter_mult: 8.0, is_soft: true },
    ChipNoise { name: "clang", volume: 0.4, base_pitch: 69.0, pitch_filter_mult: 1024.0, is_soft: false },
    ChipNoise { name: "buzz", volume: 0.3, base_pitch: 69.0, pitch_filter_mult: 1024.0, is_soft: false },
    ChipNoise { name: "hollow", volume: 1.5, base_pitch: 96.0, pitch_filter_mult: 1.0, is_soft: true },
];

// ============================================================================
// TRANSITIONS
// ============================================================================

#[derive(Debug)]
pub struct Transition {
    pub name: &'static str,

    /// Adjacent notes share one tone without a phase reset
    pub is_seamless: bool,

    /// Fade-in time applied to freshly started tones
    pub attack_seconds: f64,

    /// Ended notes keep sounding in the released list
    pub releases: bool,

    /// Length of the release fade in ticks
    pub release_ticks: usize,

    /// Pitch and volume glide into neighbouring notes
    pub slides: bool,
    pub slide_ticks: usize,
}

pub static TRANSITIONS: [Transition; 8] = [
    Transition { name: "seamless", is_seamless: true, attack_seconds: 0.0, releases: false, release_ticks: 1, slides: false, slide_ticks: 3 },
    Transition { name: "hard", is_seamless: false, attack_seconds: 0.0, releases: false, release_ticks: 3, slides: false, slide_ticks: 3 },
    Transition { name: "soft", is_seamless: false, attack_seconds: 0.025, releases: false, release_ticks: 3, slides: false, slide_ticks: 3 },
    Transition { name: "slide", is_seamless: true, attack_seconds: 0.025, releases: false, release_ticks: 3, slides: true, slide_ticks: 3 },
    Transition { name: "cross fade", is_seamless: false, attack_seconds: 0.04, releases: true, release_ticks: 6, slides: false, slide_ticks: 3 },
    Transition { name: "hard fade", is_seamless: false, attack_seconds: 0.0, releases: true, release_ticks: 48, slides: false, slide_ticks: 3 },
    Transition { name: "medium fade", is_seamless: false, attack_seconds: 0.0125, releases: true, release_ticks: 72, slides: false, slide_ticks: 3 },
    Transition { name: "soft fade", is_seamless: false, attack_seconds: 0.06, releases: true, release_ticks: 96, slides: false, slide_ticks: 6 },
];

// ============================================================================
// VIBRATOS
// ============================================================================

#[derive(Debug)]
pub struct Vibrato {
    pub name: &'static str,

    /// Peak pitch deviation in semitones
    pub amplitude: f64,

    /// Periods of the summed sine LFOs
    pub periods_seconds: &'static [f64],

    /// Parts into the note before vibrato kicks in
    pub delay_parts: usize,
}

pub static VIBRATOS: [Vibrato; 5] = [
    Vibrato { name: "none", amplitude: 0.0, periods_seconds: &[0.14], delay_parts: 0 },
    Vibrato { name: "light", amplitude: 0.15, periods_seconds: &[0.14], delay_parts: 0 },
    Vibrato { name: "delayed", amplitude: 0.3, periods_seconds: &[0.14], delay_parts: 18 },
    Vibrato { name: "heavy", amplitude: 0.45, periods_seconds: &[0.14], delay_parts: 0 },
    Vibrato { name: "shaky", amplitude: 0.1, periods_seconds: &[0.11, 1.618 * 0.11, 3.0 * 0.11], delay_parts: 0 },
];

// ============================================================================
// UNISON INTERVALS
// ============================================================================

#[derive(Debug)]
pub struct Interval {
    pub name: &'static str,

    /// Detune between the two oscillators, in semitones
    pub spread: f64,

    /// Shift of the oscillator pair's center, in semitones
    pub offset: f64,
    pub volume: f64,

    /// Polarity of the second oscillator
    pub sign: f64,
}

pub static INTERVALS: [Interval; 9] = [
    Interval { name: "union", spread: 0.0, offset: 0.0, volume: 0.7, sign: 1.0 },
    Interval { name: "shimmer", spread: 0.018, offset: 0.0, volume: 0.8, sign: 1.0 },
    Interval { name: "hum", spread: 0.045, offset: 0.0, volume: 1.0, sign: 1.0 },
    Interval { name: "honky tonk", spread: 0.09, offset: 0.0, volume: 1.0, sign: 1.0 },
    Interval { name: "dissonant", spread: 0.25, offset: 0.0, volume: 0.9, sign: 1.0 },
    Interval { name: "fifth", spread: 3.5, offset: 3.5, volume: 0.9, sign: 1.0 },
    Interval { name: "octave", spread: 6.0, offset: 6.0, volume: 0.8, sign: 1.0 },
    Interval { name: "bowed", spread: 0.02, offset: 0.0, volume: 1.0, sign: -1.0 },
    Interval { name: "piano", spread: 0.01, offset: 0.0, volume: 1.0, sign: 0.7 },
];

// ============================================================================
// CHORD MODES
// ============================================================================

#[derive(Debug)]
pub struct Chord {
    pub name: &'static str,

    /// Each pitch gets its own tone
    pub harmonizes: bool,

    /// The second chord pitch replaces the unison interval
    pub custom_interval: bool,

    /// Pitches are cycled on one tone
    pub arpeggiates: bool,

    /// Delay in parts between successive chord pitches
    pub strum_parts: usize,
}

pub static CHORDS: [Chord; 4] = [
    Chord { name: "harmony", harmonizes: true, custom_interval: false, arpeggiates: false, strum_parts: 0 },
    Chord { name: "strum", harmonizes: true, custom_interval: false, arpeggiates: false, strum_parts: 1 },
    Chord { name: "arpeggio", harmonizes: false, custom_interval: false, arpeggiates: true, strum_parts: 0 },
    Chord { name: "custom interval", harmonizes: true, custom_interval: true, arpeggiates: true, strum_parts: 0 },
];

// ============================================================================
// FM ALGORITHMS
// ============================================================================
//
// Operators are numbered 1..=4 in the tables, matching the names. The first
// `carrier_count` operators are audible; `modulated_by[i]` lists the
// operators whose output is added to operator i's phase.
// ============================================================================

#[derive(Debug)]
pub struct Algorithm {
    pub name: &'static str,
    pub carrier_count: usize,

    /// For each operator, the carrier whose pitch it follows
    pub associated_carrier: [usize; OPERATOR_COUNT],
    pub modulated_by: [&'static [usize]; OPERATOR_COUNT],
}

pub static ALGORITHMS: [Algorithm; 13] = [
    Algorithm { name: "1←(2 3 4)", carrier_count: 1, associated_carrier: [1, 1, 1, 1], modulated_by: [&[2, 3, 4], &[], &[], &[]] },
    Algorithm { name: "1←(2 3←4)", carrier_count: 1, associated_carrier: [1, 1, 1, 1], modulated_by: [&[2, 3], &[], &[4], &[]] },
    Algorithm { name: "1←2←(3 4)", carrier_count: 1, associated_carrier: [1, 1, 1, 1], modulated_by: [&[2], &[3, 4], &[], &[]] },
    Algorithm { name: "1←(2 3)←4", carrier_count: 1, associated_carrier: [1, 1, 1, 1], modulated_by: [&[2, 3], &[4], &[4], &[]] },
    Algorithm { name: "1←2←3←4", carrier_count: 1, associated_carrier: [1, 1, 1, 1], modulated_by: [&[2], &[3], &[4], &[]] },
    Algorithm { name: "1←3 2←4", carrier_count: 2, associated_carrier: [1, 2, 1, 2], modulated_by: [&[3], &[4], &[], &[]] },
    Algorithm { name: "1 2←(3 4)", carrier_count: 2, associated_carrier: [1, 2, 2, 2], modulated_by: [&[], &[3, 4], &[], &[]] },
    Algorithm { name: "1 2←3←4", carrier_count: 2, associated_carrier: [1, 2, 2, 2], modulated_by: [&[], &[3], &[4], &[]] },
    Algorithm { name: "(1 2)←3←4", carrier_count: 2, associated_carrier: [1, 2, 2, 2], modulated_by: [&[3], &[3], &[4], &[]] },
    Algorithm { name: "(1 2)←(3 4)", carrier_count: 2, associated_carrier: [1, 2, 2, 2], modulated_by: [&[3, 4], &[3, 4], &[], &[]] },
    Algorithm { name: "1 2 3←4", carrier_count: 3, associated_carrier: [1, 2, 3, 3], modulated_by: [&[], &[], &[4], &[]] },
    Algorithm { name: "(1 2 3)←4", carrier_count: 3, associated_carrier: [1, 2, 3, 3], modulated_by: [&[4], &[4], &[4], &[]] },
    Algorithm { name: "1 2 3 4", carrier_count: 4, associated_carrier: [1, 2, 3, 4], modulated_by: [&[], &[], &[], &[]] },
];

// ============================================================================
// OPERATOR FREQUENCIES
// ============================================================================

#[derive(Debug)]
pub struct OperatorFrequency {
    pub name: &'static str,

    /// Ratio to the carrier pitch
    pub mult: f64,

    /// Fixed detune added after the ratio
    pub hz_offset: f64,
    pub amplitude_sign: f64,
}

pub static OPERATOR_FREQUENCIES: [OperatorFrequency; 15] = [
    OperatorFrequency { name: "1×", mult: 1.0, hz_offset: 0.0, amplitude_sign: 1.0 },
    OperatorFrequency { name: "~1×", mult: 1.0, hz_offset: 1.5, amplitude_sign: -1.0 },
    OperatorFrequency { name: "2×", mult: 2.0, hz_offset: 0.0, amplitude_sign: 1.0 },
    OperatorFrequency { name: "~2×", mult: 2.0, hz_offset: -1.3, amplitude_sign: -1.0 },
    OperatorFrequency { name: "3×", mult: 3.0, hz_offset: 0.0, amplitude_sign: 1.0 },
    OperatorFrequency { name: "4×", mult: 4.0, hz_offset: 0.0, amplitude_sign: 1.0 },
    OperatorFrequency { name: "5×", mult: 5.0, hz_offset: 0.0, amplitude_sign: 1.0 },
    OperatorFrequency { name: "6×", mult: 6.0, hz_offset: 0.0, amplitude_sign: 1.0 },
    OperatorFrequency { name: "7×", mult: 7.0, hz_offset: 0.0, amplitude_sign: 1.0 },
    OperatorFrequency { name: "8×", mult: 8.0, hz_offset: 0.0, amplitude_sign: 1.0 },
    OperatorFrequency { name: "9×", mult: 9.0, hz_offset: 0.0, amplitude_sign: 1.0 },
    OperatorFrequency { name: "11×", mult: 11.0, hz_offset: 0.0, amplitude_sign: 1.0 },
    OperatorFrequency { name: "13×", mult: 13.0, hz_offset: 0.0, amplitude_sign: 1.0 },
    OperatorFrequency { name: "16×", mult: 16.0, hz_offset: 0.0, amplitude_sign: 1.0 },
    OperatorFrequency { name: "20×", mult: 20.0, hz_offset: 0.0, amplitude_sign: 1.0 },
];

// ============================================================================
// ENVELOPES
// ============================================================================

/// The closed-form curve an envelope follows
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EnvelopeType {
    /// Follows the note's own pin volumes
    Custom,
    Steady,
    Punch,
    Flare,
    Twang,
    Swell,
    Tremolo,
    Tremolo2,
    Decay,
}

#[derive(Debug)]
pub struct Envelope {
    pub name: &'static str,
    pub kind: EnvelopeType,
    pub speed: f64,
}

pub static ENVELOPES: [Envelope; 21] = [
    Envelope { name: "custom", kind: EnvelopeType::Custom, speed: 0.0 },
    Envelope { name: "steady", kind: EnvelopeType::Steady, speed: 0.0 },
    Envelope { name: "punch", kind: EnvelopeType::Punch, speed: 0.0 },
    Envelope { name: "flare 1", kind: EnvelopeType::Flare, speed: 32.0 },
    Envelope { name: "flare 2", kind: EnvelopeType::Flare, speed: 8.0 },
    Envelope { name: "flare 3", kind: EnvelopeType::Flare, speed: 2.0 },
    Envelope { name: "twang 1", kind: EnvelopeType::Twang, speed: 32.0 },
    Envelope { name: "twang 2", kind: EnvelopeType::Twang, speed: 8.0 },
    Envelope { name: "twang 3", kind: EnvelopeType::Twang, speed: 2.0 },
    Envelope { name: "swell 1", kind: EnvelopeType::Swell, speed: 32.0 },
    Envelope { name: "swell 2", kind: EnvelopeType::Swell, speed: 8.0 },
    Envelope { name: "swell 3", kind: EnvelopeType::Swell, speed: 2.0 },
    Envelope { name: "tremolo1", kind: EnvelopeType::Tremolo, speed: 4.0 },
    Envelope { name: "tremolo2", kind: EnvelopeType::Tremolo, speed: 2.0 },
    Envelope { name: "tremolo3", kind: EnvelopeType::Tremolo, speed: 1.0 },
    Envelope { name: "tremolo4", kind: EnvelopeType::Tremolo2, speed: 4.0 },
    Envelope { name: "tremolo5", kind: EnvelopeType::Tremolo2, speed: 2.0 },
    Envelope { name: "tremolo6", kind: EnvelopeType::Tremolo2, speed: 1.0 },
    Envelope { name: "decay 1", kind: EnvelopeType::Decay, speed: 10.0 },
    Envelope { name: "decay 2", kind: EnvelopeType::Decay, speed: 7.0 },
    Envelope { name: "decay 3", kind: EnvelopeType::Decay, speed: 4.0 },
];

// ============================================================================
// FM FEEDBACK ROUTINGS
// ============================================================================

#[derive(Debug)]
pub struct Feedback {
    pub name: &'static str,

    /// For each operator, the operators whose previous output feeds back
    /// into its phase
    pub indices: [&'static [usize]; OPERATOR_COUNT],
}

pub static FEEDBACKS: [Feedback; 18] = [
    Feedback { name: "1⟲", indices: [&[1], &[], &[], &[]] },
    Feedback { name: "2⟲", indices: [&[], &[2], &[], &[]] },
    Feedback { name: "3⟲", indices: [&[], &[], &[3], &[]] },
    Feedback { name: "4⟲", indices: [&[], &[], &[], &[4]] },
    Feedback { name: "1⟲ 2⟲", indices: [&[1], &[2], &[], &[]] },
    Feedback { name: "3⟲ 4⟲", indices: [&[], &[], &[3], &[4]] },
    Feedback { name: "1⟲ 2⟲ 3⟲", indices: [&[1], &[2], &[3], &[]] },
    Feedback { name: "2⟲ 3⟲ 4⟲", indices: [&[], &[2], &[3], &[4]] },
    Feedback { name: "1⟲ 2⟲ 3⟲ 4⟲", indices: [&[1], &[2], &[3], &[4]] },
    Feedback { name: "1→2", indices: [&[], &[1], &[], &[]] },
    Feedback { name: "1→3", indices: [&[], &[], &[1], &[]] },
    Feedback { name: "1→4", indices: [&[], &[], &[], &[1]] },
    Feedback { name: "2→3", indices: [&[], &[], &[2], &[]] },
    Feedback { name: "2→4", indices: [&[], &[], &[], &[2]] },
    Feedback { name: "3→4", indices: [&[], &[], &[], &[3]] },
    Feedback { name: "1→3 2→4", indices: [&[], &[], &[1], &[2]] },
    Feedback { name: "1→4 2→3", indices: [&[], &[], &[2], &[1]] },
    Feedback { name: "1→2→3→4", indices: [&[], &[1], &[2], &[3]] },
];

// ============================================================================
// NAME LOOKUP
// ============================================================================

/// Finds the index of a catalog entry by its display name
pub fn index_by_name<E>(table: &[E], name: &str, name_of: impl Fn(&E) -> &'static str) -> Option<usize> {
    table.iter().position(|entry| name_of(entry) == name)
}

// ============================================================================
// UNIT TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_algorithm_tables_are_consistent() {
        for algorithm in ALGORITHMS.iter() {
            assert!(algorithm.carrier_count >= 1 && algorithm.carrier_count <= OPERATOR_COUNT);
            for (operator, modulators) in algorithm.modulated_by.iter().enumerate() {
                // Modulators always have a higher number than what they modulate
                for &modulator in modulators.iter() {
                    assert!(modulator > operator + 1, "{} routes {} into {}", algorithm.name, modulator, operator + 1);
                }
            }
            for &carrier in algorithm.associated_carrier.iter() {
                assert!(carrier >= 1 && carrier <= algorithm.carrier_count);
            }
        }
    }

    #[test]
    fn test_feedback_indices_in_range() {
        for feedback in FEEDBACKS.iter() {
            for sources in feedback.indices.iter() {
                assert!(sources.iter().all(|&s| (1..=OPERATOR_COUNT).contains(&s)));
            }
        }
    }

    #[test]
    fn test_arpeggio_pitch_index() {
        let standard = &RHYTHMS[1];
        assert_eq!(standard.arpeggio_pitch_index(1, 5), 0);
        assert_eq!(standard.arpeggio_pitch_index(2, 2), 1);
        assert_eq!(standard.arpeggio_pitch_index(3, 3), 1);
        // Four-pitch chords have no pattern and simply cycle
        assert_eq!(standard.arpeggio_pitch_index(4, 6), 2);
    }

    #[test]
    fn test_index_by_name() {
        assert_eq!(index_by_name(&TRANSITIONS, "soft fade", |t| t.name), Some(7));
        assert_eq!(index_by_name(&CHIP_WAVES, "no such wave", |w| w.name), None);
        assert_eq!(index_by_name(&SCALES, "expert", |s| s.name), Some(SCALE_EXPERT));
    }
}
