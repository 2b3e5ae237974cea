// ============================================================================
// ENVELOPE.RS - Closed-Form Envelope Curves
// ============================================================================
//
// Envelopes are evaluated at the start and end of each run and interpolated
// in between, so they are plain functions of time rather than stateful
// generators.
//
//   Custom    the note's own pin volume
//   Steady    1
//   Punch     starts at 2, falls to 1 over 0.1 s
//   Flare     linear attack then 1 / (1 + k t) decay
//   Twang     1 / (1 + k t)
//   Swell     1 - 1 / (1 + k t)
//   Tremolo   0.5 - 0.5 cos(2 pi k beats)
//   Tremolo2  0.75 - 0.25 cos(2 pi k beats)
//   Decay     2^(-k t)
//
// `time` is seconds since the note started; `beats` is the song position in
// beats, so tremolos stay locked to the tempo.
// ============================================================================

use crate::config::{Envelope, EnvelopeType, OPERATOR_AMPLITUDE_MAX, Vibrato};
use crate::helper::TWO_PI;

/// Value of an envelope at one instant
pub fn compute_envelope(envelope: &Envelope, time: f64, beats: f64, custom_volume: f64) -> f64 {
    let speed = envelope.speed;
    match envelope.kind {
        EnvelopeType::Custom => custom_volume,
        EnvelopeType::Steady => 1.0,
        EnvelopeType::Twang => 1.0 / (1.0 + time * speed),
        EnvelopeType::Swell => 1.0 - 1.0 / (1.0 + time * speed),
        EnvelopeType::Tremolo => 0.5 - (beats * TWO_PI * speed).cos() * 0.5,
        EnvelopeType::Tremolo2 => 0.75 - (beats * TWO_PI * speed).cos() * 0.25,
        EnvelopeType::Punch => (2.0 - time * 10.0).max(1.0),
        EnvelopeType::Flare => {
            let attack = 0.25 / speed.sqrt();
            if time < attack { time / attack } else { 1.0 / (1.0 + (time - attack) * speed) }
        }
        EnvelopeType::Decay => 2.0_f64.powf(-speed * time),
    }
}

/// Per-tone gain for a harmonized chord of `chord_size` pitches
#[inline]
pub fn compute_chord_volume(chord_size: f64) -> f64 {
    1.0 / ((chord_size - 1.0) * 0.25 + 1.0)
}

/// FM operator amplitude setting (0..=15) to a linear gain
#[inline]
pub fn operator_amplitude_curve(amplitude: i32) -> f64 {
    let max = OPERATOR_AMPLITUDE_MAX as f64;
    (16.0_f64.powf(amplitude as f64 / max) - 1.0) / max
}

/// Sum of the vibrato's sine LFOs at a point in time
pub fn lfo_amplitude(vibrato: &Vibrato, seconds: f64) -> f64 {
    vibrato
        .periods_seconds
        .iter()
        .map(|period| (TWO_PI * seconds / period).sin())
        .sum()
}

// ============================================================================
// UNIT TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ENVELOPES, VIBRATOS};

    fn envelope_named(name: &str) -> &'static Envelope {
        ENVELOPES.iter().find(|envelope| envelope.name == name).unwrap()
    }

    #[test]
    fn test_simple_shapes() {
        assert_eq!(compute_envelope(envelope_named("custom"), 1.0, 0.0, 0.4), 0.4);
        assert_eq!(compute_envelope(envelope_named("steady"), 5.0, 3.0, 0.4), 1.0);
        assert_eq!(compute_envelope(envelope_named("punch"), 0.0, 0.0, 1.0), 2.0);
        assert_eq!(compute_envelope(envelope_named("punch"), 0.5, 0.0, 1.0), 1.0);
        assert_eq!(compute_envelope(envelope_named("twang 2"), 0.0, 0.0, 1.0), 1.0);
        assert_eq!(compute_envelope(envelope_named("swell 2"), 0.0, 0.0, 1.0), 0.0);
        assert_eq!(compute_envelope(envelope_named("decay 1"), 0.1, 0.0, 1.0), 0.5);
    }

    #[test]
    fn test_flare_peaks_after_attack() {
        let flare = envelope_named("flare 2");
        let attack = 0.25 / flare.speed.sqrt();
        assert_eq!(compute_envelope(flare, 0.0, 0.0, 1.0), 0.0);
        assert!((compute_envelope(flare, attack, 0.0, 1.0) - 1.0).abs() < 1e-12);
        assert!(compute_envelope(flare, attack * 4.0, 0.0, 1.0) < 1.0);
    }

    #[test]
    fn test_tremolo_follows_beats() {
        let tremolo = envelope_named("tremolo3");
        assert!(compute_envelope(tremolo, 0.0, 0.0, 1.0).abs() < 1e-12);
        assert!((compute_envelope(tremolo, 0.0, 0.5, 1.0) - 1.0).abs() < 1e-12);
        let tremolo2 = envelope_named("tremolo6");
        assert!((compute_envelope(tremolo2, 0.0, 0.0, 1.0) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_operator_amplitude_curve_endpoints() {
        assert_eq!(operator_amplitude_curve(0), 0.0);
        assert!((operator_amplitude_curve(15) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_chord_volume() {
        assert_eq!(compute_chord_volume(1.0), 1.0);
        assert_eq!(compute_chord_volume(3.0), 1.0 / 1.5);
    }

    #[test]
    fn test_lfo_sums_periods() {
        assert_eq!(lfo_amplitude(&VIBRATOS[0], 0.0), 0.0);
        let quarter = VIBRATOS[1].periods_seconds[0] / 4.0;
        assert!((lfo_amplitude(&VIBRATOS[1], quarter) - 1.0).abs() < 1e-12);
    }
}
