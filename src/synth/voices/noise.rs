// ============================================================================
// NOISE.RS - Noise Table Voice
// ============================================================================
//
// Steps through a looping noise table at a pitch-dependent rate. The phase
// step is measured in table samples, so higher drum pitches race through the
// table and sound brighter.
//
// A one-pole smoother sits before the resonant filter. Its coefficient
// scales with the phase step, so at low pitches the held table values are
// rounded off instead of sounding like a stepped sample-and-hold.
// ============================================================================

use rand::rngs::StdRng;

use crate::config::CHIP_NOISE_LENGTH;
use crate::song::Instrument;
use crate::synth::filter::{FilterSweep, is_first_order, resonance_amount};
use crate::synth::tone::Tone;
use crate::synth::waves::{find_random_zero_crossing, noise_wave};

const NOISE_MASK: usize = CHIP_NOISE_LENGTH - 1;

pub fn synthesize(tone: &mut Tone, instrument: &Instrument, output: &mut [f64], rng: &mut StdRng) {
    let wave = noise_wave(instrument.chip_noise);
    let chip_noise = instrument.get_chip_noise();

    let mut phase_delta = tone.phase_deltas[0];
    let phase_delta_scale = tone.phase_delta_scale;
    let mut volume = tone.volume_start;
    let volume_delta = tone.volume_delta;

    // A fresh tone starts at a zero crossing somewhere in the table
    let mut phase = if tone.phases[0] == 0.0 {
        find_random_zero_crossing(wave, rng) + phase_delta
    } else {
        (tone.phases[0] % 1.0) * CHIP_NOISE_LENGTH as f64
    };

    let mut sample = tone.sample;
    let pitch_relative_filter = (phase_delta * chip_noise.pitch_filter_mult).min(1.0);

    let mut sweep =
        FilterSweep::new(tone.filter, tone.filter_scale, resonance_amount(instrument), is_first_order(instrument));
    let mut filter = tone.filter_state;

    for out in output.iter_mut() {
        let wave_sample = wave[phase as usize & NOISE_MASK];
        sample += (wave_sample - sample) * pitch_relative_filter;

        let filtered = filter.process(sample, &sweep);
        sweep.advance();
        phase += phase_delta;
        phase_delta *= phase_delta_scale;

        *out += filtered * volume;
        volume += volume_delta;
    }

    tone.phases[0] = phase / CHIP_NOISE_LENGTH as f64;
    tone.sample = sample;
    filter.flush_denormals();
    tone.filter_state = filter;
}

// ============================================================================
// UNIT TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::song::InstrumentType;
    use rand::SeedableRng;

    fn noise_tone(chip_noise: usize, phase_delta: f64) -> (Tone, Instrument) {
        let mut instrument = Instrument::with_defaults(true);
        instrument.chip_noise = chip_noise;
        assert_eq!(instrument.instrument_type, InstrumentType::Noise);
        let mut tone = Tone::default();
        tone.phase_deltas[0] = phase_delta;
        tone.phase_delta_scale = 1.0;
        tone.volume_start = 1.0;
        tone.filter = 0.95;
        tone.filter_scale = 1.0;
        (tone, instrument)
    }

    #[test]
    fn test_output_is_bounded_and_not_silent() {
        for chip_noise in 0..crate::config::CHIP_NOISES.len() {
            let (mut tone, instrument) = noise_tone(chip_noise, 0.5);
            let mut rng = StdRng::seed_from_u64(7);
            let mut output = vec![0.0; 4096];
            synthesize(&mut tone, &instrument, &mut output, &mut rng);
            assert!(output.iter().all(|sample| sample.is_finite() && sample.abs() < 10.0));
            assert!(output.iter().any(|&sample| sample != 0.0), "noise {chip_noise} is silent");
        }
    }

    #[test]
    fn test_phase_advances_in_table_units() {
        let (mut tone, instrument) = noise_tone(0, 0.25);
        tone.phases[0] = 0.5;
        let mut rng = StdRng::seed_from_u64(0);
        let mut output = vec![0.0; 1024];
        synthesize(&mut tone, &instrument, &mut output, &mut rng);
        let expected = (0.5 * CHIP_NOISE_LENGTH as f64 + 256.0) / CHIP_NOISE_LENGTH as f64;
        assert!((tone.phases[0] - expected).abs() < 1e-12);
    }

    #[test]
    fn test_fresh_tone_gets_a_random_start() {
        let (mut tone, instrument) = noise_tone(1, 0.25);
        let mut rng = StdRng::seed_from_u64(3);
        let mut output = vec![0.0; 16];
        synthesize(&mut tone, &instrument, &mut output, &mut rng);
        assert!(tone.phases[0] > 0.0);
    }
}
