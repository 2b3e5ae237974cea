// ============================================================================
// HELPER.RS - Utility Functions and Shared Algorithms
// ============================================================================
//
// This module contains reusable helper functions used throughout the
// synthesizer and the song codec.
//
// CONTENTS:
// - Pitch and frequency conversion
// - Interpolation
// - Range clamping used when decoding untrusted song data
// - Volume curves shared by the tone computation
// - Denormal guards for long-running feedback state
// - Note name parsing for JSON keys
// ============================================================================

pub use std::f64::consts::PI;

use crate::config::{PITCHES_PER_OCTAVE, VOLUME_LOG_SCALE, VOLUME_RANGE};

// ============================================================================
// CONSTANTS
// ============================================================================

/// Two times PI, used frequently in oscillator calculations
pub const TWO_PI: f64 = 2.0 * PI;

/// The reference frequency for A4 (the A above middle C)
pub const A4_FREQUENCY_HZ: f64 = 440.0;

/// The pitch number of A4 (matches MIDI numbering)
pub const A4_PITCH: f64 = 69.0;

/// Magnitude below which feedback state is flushed to exact zero
pub const DENORMAL_EPSILON: f64 = 1.0e-24;

// ============================================================================
// PITCH CONVERSION
// ============================================================================

/// Converts a (possibly fractional) pitch number to a frequency in Hz.
///
/// Formula: f = 440 * 2^((pitch - 69) / 12)
#[inline]
pub fn frequency_from_pitch(pitch: f64) -> f64 {
    A4_FREQUENCY_HZ * 2.0_f64.powf((pitch - A4_PITCH) / PITCHES_PER_OCTAVE as f64)
}

// ============================================================================
// INTERPOLATION FUNCTIONS
// ============================================================================

/// Linear interpolation between two values
///
/// Formula: result = start + (end - start) * progress
#[inline]
pub fn linear_interpolation(start_value: f64, end_value: f64, progress: f64) -> f64 {
    start_value + (end_value - start_value) * progress
}

/// Shorthand alias for linear_interpolation (commonly called "lerp")
#[inline]
pub fn lerp(start_value: f64, end_value: f64, progress: f64) -> f64 {
    linear_interpolation(start_value, end_value, progress)
}

// ============================================================================
// RANGE CLAMPING
// ============================================================================
//
// Decoded song fields are never trusted. Every index read from a song string
// or JSON document passes through one of these before it is stored.
// ============================================================================

/// Clamps `value` into `min..max` (max exclusive), the way catalog indices
/// are bounded by the table length.
#[inline]
pub fn clamp_index(min: i64, max: i64, value: i64) -> i64 {
    let value = value.max(min);
    if value < max { value } else { max - 1 }
}

/// `clamp_index` for values that will index a table
#[inline]
pub fn clamp_usize(min: usize, max: usize, value: i64) -> usize {
    clamp_index(min as i64, max as i64, value) as usize
}

// ============================================================================
// VOLUME CURVES
// ============================================================================

/// Maps a pin volume (0..=3) to a linear gain with a gentle power curve
#[inline]
pub fn expression_to_volume_mult(expression: f64) -> f64 {
    (expression.max(0.0) / 3.0).powf(1.5)
}

/// Maps an instrument volume setting to a gain. The top setting mutes.
#[inline]
pub fn instrument_volume_to_volume_mult(instrument_volume: i32) -> f64 {
    if instrument_volume == VOLUME_RANGE - 1 {
        0.0
    } else {
        2.0_f64.powf(VOLUME_LOG_SCALE * instrument_volume as f64)
    }
}

// ============================================================================
// DENORMAL GUARDS
// ============================================================================

/// Snaps values too small to matter to exactly zero so feedback paths do not
/// wander into subnormal floats
#[inline]
pub fn flush_denormal(value: f64) -> f64 {
    if -DENORMAL_EPSILON < value && value < DENORMAL_EPSILON { 0.0 } else { value }
}

// ============================================================================
// NOTE NAME UTILITIES
// ============================================================================

/// Converts a note letter to its semitone offset from C
/// C=0, D=2, E=4, F=5, G=7, A=9, B=11
///
/// Returns None if the character is not a valid note letter
pub fn note_letter_to_semitone(note_char: char) -> Option<i32> {
    match note_char.to_ascii_lowercase() {
        'c' => Some(0),
        'd' => Some(2),
        'e' => Some(4),
        'f' => Some(5),
        'g' => Some(7),
        'a' => Some(9),
        'b' => Some(11),
        _ => None,
    }
}

/// Converts an accidental symbol to a semitone offset
pub fn accidental_to_offset(symbol: char) -> Option<i32> {
    match symbol {
        '#' | '♯' => Some(1),
        'b' | '♭' => Some(-1),
        _ => None,
    }
}

/// Parses a key name like "C", "f#", "B♭" into a key index 0..12
pub fn parse_key_name(name: &str) -> Option<usize> {
    let mut chars = name.chars();
    let letter = chars.next()?;
    let mut semitone = note_letter_to_semitone(letter)?;
    if let Some(offset) = chars.next().and_then(accidental_to_offset) {
        semitone += offset;
    }
    Some(semitone.rem_euclid(PITCHES_PER_OCTAVE) as usize)
}

// ============================================================================
// UNIT TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frequency_from_pitch_a4() {
        assert!((frequency_from_pitch(69.0) - 440.0).abs() < 1e-9);
        assert!((frequency_from_pitch(81.0) - 880.0).abs() < 1e-9);
    }

    #[test]
    fn test_lerp() {
        assert_eq!(lerp(0.0, 10.0, 0.0), 0.0);
        assert_eq!(lerp(0.0, 10.0, 1.0), 10.0);
        assert_eq!(lerp(0.0, 10.0, 0.5), 5.0);
    }

    #[test]
    fn test_clamp_index_is_max_exclusive() {
        assert_eq!(clamp_index(0, 8, 12), 7);
        assert_eq!(clamp_index(0, 8, -3), 0);
        assert_eq!(clamp_index(1, 129, 64), 64);
        assert_eq!(clamp_usize(0, 5, 5), 4);
    }

    #[test]
    fn test_volume_curves() {
        assert_eq!(expression_to_volume_mult(3.0), 1.0);
        assert_eq!(expression_to_volume_mult(-1.0), 0.0);
        assert_eq!(instrument_volume_to_volume_mult(0), 1.0);
        assert_eq!(instrument_volume_to_volume_mult(2), 0.5);
        assert_eq!(instrument_volume_to_volume_mult(7), 0.0);
    }

    #[test]
    fn test_flush_denormal() {
        assert_eq!(flush_denormal(1e-30), 0.0);
        assert_eq!(flush_denormal(-1e-30), 0.0);
        assert_eq!(flush_denormal(0.5), 0.5);
    }

    #[test]
    fn test_note_letter_to_semitone() {
        assert_eq!(note_letter_to_semitone('C'), Some(0));
        assert_eq!(note_letter_to_semitone('A'), Some(9));
        assert_eq!(note_letter_to_semitone('x'), None);
    }

    #[test]
    fn test_parse_key_name() {
        assert_eq!(parse_key_name("C"), Some(0));
        assert_eq!(parse_key_name("f#"), Some(6));
        assert_eq!(parse_key_name("C♭"), Some(11));
        assert_eq!(parse_key_name("B♯"), Some(0));
        assert_eq!(parse_key_name("H"), None);
    }
}
