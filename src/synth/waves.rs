// ============================================================================
// WAVES.RS - Lookup Tables Built on First Use
// ============================================================================
//
// Three families of tables are derived from the catalog:
//
// SINE TABLE (FM operators)
//   SINE_WAVE_LENGTH + 1 samples of one sine cycle; the extra sample lets
//   the interpolating reader look one index ahead without wrapping.
//
// INTEGRATED CHIP WAVES (chip voice)
//   Each raw wave is centered (mean removed) and then integrated, with one
//   trailing sample closing the cycle. The chip voice reads the integral at
//   two phases and divides the difference by the phase step, which is the
//   average of the wave over that step: a box-filtered, band-limited read.
//
// NOISE TABLES (noise voice)
//   CHIP_NOISE_LENGTH + 1 samples each, last sample equal to the first:
//   - retro, clang, buzz: linear feedback shift registers with different taps
//   - white: uniform random values from a fixed seed, so renders repeat
//   - hollow: a band of the spectrum designed by hand, converted with the
//     inverse real FFT
//
// Every table is computed once per process and shared through OnceLock.
// ============================================================================

use std::sync::OnceLock;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::{CHIP_NOISE_LENGTH, CHIP_NOISES, CHIP_WAVES, SINE_WAVE_LENGTH, SPECTRUM_MAX};
use crate::synth::fft::{inverse_real_fourier_transform, scale_elements_by_factor};

/// Seed for the "white" noise table
const WHITE_NOISE_SEED: u64 = 0x6368_6970;

static SINE_WAVE: OnceLock<Vec<f64>> = OnceLock::new();
static CHIP_WAVE_INTEGRALS: OnceLock<Vec<Vec<f64>>> = OnceLock::new();
static NOISE_WAVES: OnceLock<Vec<Vec<f64>>> = OnceLock::new();

// ============================================================================
// SINE
// ============================================================================

pub fn sine_wave() -> &'static [f64] {
    SINE_WAVE.get_or_init(|| {
        (0..=SINE_WAVE_LENGTH)
            .map(|i| (i as f64 * std::f64::consts::TAU / SINE_WAVE_LENGTH as f64).sin())
            .collect()
    })
}

// ============================================================================
// CHIP WAVES
// ============================================================================

/// Removes the mean and replaces each sample with the running sum of the
/// samples before it. The result is one sample longer than the input and
/// ends at zero.
pub fn center_and_integrate(raw: &[f64]) -> Vec<f64> {
    let average = raw.iter().sum::<f64>() / raw.len().max(1) as f64;
    let mut integral = Vec::with_capacity(raw.len() + 1);
    let mut cumulative = 0.0;
    let mut previous = 0.0;
    for &sample in raw {
        cumulative += previous;
        previous = sample - average;
        integral.push(cumulative);
    }
    integral.push(0.0);
    integral
}

/// The integrated table for a chip wave index (clamped into the catalog)
pub fn chip_wave_integral(index: usize) -> &'static [f64] {
    let tables = CHIP_WAVE_INTEGRALS
        .get_or_init(|| CHIP_WAVES.iter().map(|wave| center_and_integrate(wave.samples)).collect());
    &tables[index.min(tables.len() - 1)]
}

// ============================================================================
// NOISE
// ============================================================================

/// The noise table for a chip noise index (clamped into the catalog)
pub fn noise_wave(index: usize) -> &'static [f64] {
    let tables = NOISE_WAVES.get_or_init(build_noise_waves);
    &tables[index.min(tables.len() - 1)]
}

fn build_noise_waves() -> Vec<Vec<f64>> {
    let retro = shift_register_noise(1 << 14);
    let tables: Vec<Vec<f64>> = CHIP_NOISES
        .iter()
        .map(|noise| match noise.name {
            "retro" => retro.clone(),
            "white" => white_noise(),
            "clang" => shift_register_noise(2 << 14),
            "buzz" => shift_register_noise(10 << 2),
            "hollow" => hollow_noise(&retro),
            other => panic!("no noise generator for chip noise {other:?}"),
        })
        .collect();
    tracing::debug!(count = tables.len(), length = CHIP_NOISE_LENGTH, "built noise tables");
    tables
}

/// Closes a noise table by repeating its first sample at the end
fn close_loop(mut wave: Vec<f64>) -> Vec<f64> {
    wave.truncate(CHIP_NOISE_LENGTH);
    let first = wave.first().copied().unwrap_or(0.0);
    wave.push(first);
    wave
}

/// One-bit noise from a shift register; `feedback_bit` is added whenever the
/// two lowest bits differ
fn shift_register_noise(feedback_bit: u32) -> Vec<f64> {
    let mut register: u32 = 1;
    let mut wave = Vec::with_capacity(CHIP_NOISE_LENGTH + 1);
    for _ in 0..CHIP_NOISE_LENGTH {
        wave.push((register & 1) as f64 * 2.0 - 1.0);
        let mut next = register >> 1;
        if (register + next) & 1 == 1 {
            next += feedback_bit;
        }
        register = next;
    }
    close_loop(wave)
}

fn white_noise() -> Vec<f64> {
    let mut rng = StdRng::seed_from_u64(WHITE_NOISE_SEED);
    let wave = (0..CHIP_NOISE_LENGTH).map(|_| rng.random::<f64>() * 2.0 - 1.0).collect();
    close_loop(wave)
}

fn hollow_noise(retro: &[f64]) -> Vec<f64> {
    let mut wave = vec![0.0; CHIP_NOISE_LENGTH];
    draw_noise_spectrum(&mut wave, retro, 10.0, 11.0, 1.0, 1.0, 0.0);
    draw_noise_spectrum(&mut wave, retro, 11.0, 14.0, 0.6578, 0.6578, 0.0);
    inverse_real_fourier_transform(&mut wave);
    scale_elements_by_factor(&mut wave, 1.0 / (CHIP_NOISE_LENGTH as f64).sqrt());
    close_loop(wave)
}

/// Fills the packed spectrum bins between two octaves with a power ramp.
/// Each bin's sign comes from the retro table and its phase from a golden
/// ratio sequence, so the result sounds noisy rather than tonal. Returns
/// the summed amplitude for normalization.
fn draw_noise_spectrum(
    wave: &mut [f64],
    sign_source: &[f64],
    low_octave: f64,
    high_octave: f64,
    low_power: f64,
    high_power: f64,
    overall_slope: f64,
) -> f64 {
    const REFERENCE_OCTAVE: i32 = 11;
    let reference_index = (1 << REFERENCE_OCTAVE) as f64;
    let low_index = 2.0_f64.powf(low_octave) as usize;
    let high_index = (CHIP_NOISE_LENGTH >> 1).min(2.0_f64.powf(high_octave) as usize);

    let mut combined_amplitude = 0.0;
    for i in low_index..high_index {
        let lerped = low_power + (high_power - low_power) * ((i as f64).log2() - low_octave) / (high_octave - low_octave);
        let mut amplitude = 2.0_f64.powf((lerped - 1.0) * SPECTRUM_MAX + 1.0) * lerped;
        amplitude *= (i as f64 / reference_index).powf(overall_slope);
        combined_amplitude += amplitude;
        amplitude *= sign_source[i];
        let radians = 0.61803398875 * (i * i) as f64 * std::f64::consts::TAU;
        wave[i] = radians.cos() * amplitude;
        wave[CHIP_NOISE_LENGTH - i] = radians.sin() * amplitude;
    }
    combined_amplitude
}

/// Builds every table up front so the first render does not pay for it
pub fn warm_up() {
    sine_wave();
    chip_wave_integral(0);
    noise_wave(0);
}

/// Picks a starting phase (in table samples) near a zero crossing of `wave`
/// so a freshly started noise tone does not click
pub fn find_random_zero_crossing(wave: &[f64], rng: &mut StdRng) -> f64 {
    const MASK: usize = CHIP_NOISE_LENGTH - 1;
    const STRIDE: usize = 16;

    let mut phase = rng.random::<f64>() * CHIP_NOISE_LENGTH as f64;
    let mut index_prev = phase as usize & MASK;
    let mut wave_prev = wave[index_prev];
    for _ in 0..128 {
        let index_next = (index_prev + STRIDE) & MASK;
        let wave_next = wave[index_next];
        if wave_prev * wave_next <= 0.0 {
            for _ in 0..STRIDE {
                let inner_index_next = (index_prev + 1) & MASK;
                let inner_wave_next = wave[inner_index_next];
                if wave_prev * inner_wave_next <= 0.0 {
                    let slope = inner_wave_next - wave_prev;
                    phase = index_prev as f64;
                    if slope.abs() > 0.00000001 {
                        phase += -wave_prev / slope;
                    }
                    phase = phase.max(0.0) % CHIP_NOISE_LENGTH as f64;
                    break;
                }
                index_prev = inner_index_next;
                wave_prev = inner_wave_next;
            }
            break;
        }
        index_prev = index_next;
        wave_prev = wave_next;
    }
    phase
}

// ============================================================================
// UNIT TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sine_table_wraps() {
        let sine = sine_wave();
        assert_eq!(sine.len(), SINE_WAVE_LENGTH + 1);
        assert!(sine[0].abs() < 1e-12);
        assert!((sine[SINE_WAVE_LENGTH / 4] - 1.0).abs() < 1e-12);
        assert!(sine[SINE_WAVE_LENGTH].abs() < 1e-9);
    }

    #[test]
    fn test_integrated_square() {
        // Square [1, -1] centers to itself and integrates to [0, 1, 0]
        assert_eq!(center_and_integrate(&[1.0, -1.0]), vec![0.0, 1.0, 0.0]);

        let integral = center_and_integrate(&[3.0, 1.0, 2.0]);
        assert_eq!(integral.len(), 4);
        assert!(integral.last().unwrap().abs() < 1e-12);
    }

    #[test]
    fn test_every_chip_wave_closes() {
        for index in 0..CHIP_WAVES.len() {
            let integral = chip_wave_integral(index);
            assert_eq!(integral.len(), CHIP_WAVES[index].samples.len() + 1);
            assert_eq!(integral[0], 0.0);
        }
    }

    #[test]
    fn test_noise_tables_loop_and_stay_finite() {
        for index in 0..CHIP_NOISES.len() {
            let wave = noise_wave(index);
            assert_eq!(wave.len(), CHIP_NOISE_LENGTH + 1);
            assert_eq!(wave[CHIP_NOISE_LENGTH], wave[0]);
            assert!(wave.iter().all(|sample| sample.is_finite()));
        }
    }

    #[test]
    fn test_shift_register_noise_is_binary() {
        let retro = noise_wave(0);
        assert!(retro.iter().all(|&sample| sample == 1.0 || sample == -1.0));
        assert_eq!(retro[0], 1.0);
    }

    #[test]
    fn test_white_noise_is_reproducible_and_in_range() {
        let first = white_noise();
        let second = white_noise();
        assert_eq!(first, second);
        assert!(first.iter().all(|&sample| (-1.0..1.0).contains(&sample)));
    }

    #[test]
    fn test_hollow_noise_has_no_dc() {
        let hollow = noise_wave(4);
        let mean = hollow[..CHIP_NOISE_LENGTH].iter().sum::<f64>() / CHIP_NOISE_LENGTH as f64;
        assert!(mean.abs() < 1e-6, "mean {mean}");
        assert!(hollow.iter().any(|&sample| sample.abs() > 0.01));
    }

    #[test]
    fn test_zero_crossing_phase_in_range() {
        let mut rng = StdRng::seed_from_u64(7);
        let wave = noise_wave(1);
        for _ in 0..20 {
            let phase = find_random_zero_crossing(wave, &mut rng);
            assert!((0.0..CHIP_NOISE_LENGTH as f64).contains(&phase));
        }
    }
}
