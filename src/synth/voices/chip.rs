// ============================================================================
// CHIP.RS - Chip Wave Voice
// ============================================================================
//
// Two oscillators read the same integrated wave table. The unison interval
// setting detunes them apart (spread) and shifts the pair (offset); with the
// "union" interval they are locked in phase and sound as one.
//
// BAND-LIMITED READ:
// The table holds the running integral of the wave. Reading the integral at
// the previous and the current phase and dividing by the phase step gives
// the mean of the wave over the step, which removes most aliasing without
// oversampling.
// ============================================================================

use rand::rngs::StdRng;

use crate::song::Instrument;
use crate::synth::filter::{FilterSweep, is_first_order, resonance_amount};
use crate::synth::tone::Tone;
use crate::synth::waves::chip_wave_integral;

/// Linear read of the integral table at a fractional phase
#[inline]
fn read_integral(wave: &[f64], wave_length: usize, phase: f64) -> f64 {
    let phase_int = phase as usize;
    let index = phase_int % wave_length;
    let ratio = phase - phase_int as f64;
    wave[index] + (wave[index + 1] - wave[index]) * ratio
}

pub fn synthesize(tone: &mut Tone, instrument: &Instrument, output: &mut [f64], _rng: &mut StdRng) {
    let wave = chip_wave_integral(instrument.chip_wave);
    let wave_length = wave.len() - 1;
    let interval = instrument.get_interval();

    let interval_a = 2.0_f64.powf((interval.offset + interval.spread) / 12.0);
    let interval_b = 2.0_f64.powf((interval.offset - interval.spread) / 12.0) * tone.interval_mult;
    let interval_sign = tone.interval_volume_mult * interval.sign;
    if instrument.interval == 0 && !instrument.get_chord().custom_interval {
        tone.phases[1] = tone.phases[0];
    }
    let delta_ratio = interval_b / interval_a;

    let mut phase_delta_a = tone.phase_deltas[0] * interval_a * wave_length as f64;
    let mut phase_delta_b = phase_delta_a * delta_ratio;
    let phase_delta_scale = tone.phase_delta_scale;
    let mut volume = tone.volume_start;
    let volume_delta = tone.volume_delta;

    let mut phase_a = (tone.phases[0] % 1.0) * wave_length as f64;
    let mut phase_b = (tone.phases[1] % 1.0) * wave_length as f64;

    let mut sweep =
        FilterSweep::new(tone.filter, tone.filter_scale, resonance_amount(instrument), is_first_order(instrument));
    let mut filter = tone.filter_state;

    let mut prev_integral_a = read_integral(wave, wave_length, phase_a);
    let mut prev_integral_b = read_integral(wave, wave_length, phase_b);

    for sample in output.iter_mut() {
        phase_a += phase_delta_a;
        phase_b += phase_delta_b;

        let next_integral_a = read_integral(wave, wave_length, phase_a);
        let next_integral_b = read_integral(wave, wave_length, phase_b);
        let wave_a = (next_integral_a - prev_integral_a) / phase_delta_a;
        let wave_b = (next_integral_b - prev_integral_b) / phase_delta_b;
        prev_integral_a = next_integral_a;
        prev_integral_b = next_integral_b;

        let filtered = filter.process(wave_a + wave_b * interval_sign, &sweep);
        sweep.advance();
        phase_delta_a *= phase_delta_scale;
        phase_delta_b *= phase_delta_scale;

        *sample += filtered * volume;
        volume += volume_delta;
    }

    tone.phases[0] = phase_a / wave_length as f64;
    tone.phases[1] = phase_b / wave_length as f64;
    filter.flush_denormals();
    tone.filter_state = filter;
}

// ============================================================================
// UNIT TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn square_tone(cycles_per_sample: f64) -> (Tone, Instrument) {
        let mut instrument = Instrument::default();
        instrument.chip_wave = 2;
        instrument.filter_cutoff = 10;
        let mut tone = Tone::default();
        tone.phase_deltas[0] = cycles_per_sample;
        tone.phase_delta_scale = 1.0;
        tone.volume_start = 1.0;
        tone.filter = 0.95;
        tone.filter_scale = 1.0;
        tone.interval_mult = 1.0;
        tone.interval_volume_mult = 1.0;
        (tone, instrument)
    }

    #[test]
    fn test_square_wave_period() {
        let period = 100;
        let (mut tone, instrument) = square_tone(1.0 / period as f64);
        let mut rng = StdRng::seed_from_u64(0);
        let mut output = vec![0.0; period * 8];
        synthesize(&mut tone, &instrument, &mut output, &mut rng);

        // After the filter settles the signal repeats every `period` samples
        for i in period * 4..period * 7 {
            assert!((output[i] - output[i + period]).abs() < 1e-6, "sample {i}");
        }
        // and flips sign every half period
        for i in period * 4..period * 5 {
            assert!((output[i] + output[i + period / 2]).abs() < 1e-6, "sample {i}");
        }
    }

    #[test]
    fn test_phase_is_carried_between_runs() {
        let (mut tone, instrument) = square_tone(0.01);
        let mut rng = StdRng::seed_from_u64(0);
        let mut whole = vec![0.0; 400];
        synthesize(&mut tone.clone(), &instrument, &mut whole, &mut rng);

        let mut split = vec![0.0; 400];
        let (first, second) = split.split_at_mut(150);
        synthesize(&mut tone, &instrument, first, &mut rng);
        synthesize(&mut tone, &instrument, second, &mut rng);
        for (a, b) in whole.iter().zip(&split) {
            assert!((a - b).abs() < 1e-9);
        }
    }

    #[test]
    fn test_adds_into_output() {
        let (mut tone, instrument) = square_tone(0.01);
        let mut rng = StdRng::seed_from_u64(0);
        let mut output = vec![1.0; 64];
        tone.volume_start = 0.0;
        synthesize(&mut tone, &instrument, &mut output, &mut rng);
        assert!(output.iter().all(|&sample| sample == 1.0));
    }
}
