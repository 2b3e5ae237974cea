// ============================================================================
// FFT.RS - Inverse Real FFT on a Packed Spectrum
// ============================================================================
//
// Only used to turn a designed noise spectrum into a time-domain table, so
// only the inverse direction exists. The transform itself is realfft's; this
// module converts between the packed layout the noise designer writes and
// realfft's complex half spectrum.
//
// PACKED LAYOUT (length N, even):
//   array[0]         real part of bin 0
//   array[i]         real part of bin i        for 1 <= i < N/2
//   array[N/2]       real part of bin N/2
//   array[N - i]     imaginary part of bin i   for 1 <= i < N/2
//
// Bin i with value (re, im) contributes 2*re*cos(2*pi*i*n/N) +
// 2*im*sin(2*pi*i*n/N); bins 0 and N/2 contribute once.
// Output is not normalized.
// ============================================================================

use realfft::RealFftPlanner;
use realfft::num_complex::Complex;

/// Multiplies every element by `factor`
pub fn scale_elements_by_factor(array: &mut [f64], factor: f64) {
    for value in array.iter_mut() {
        *value *= factor;
    }
}

/// Replaces the packed spectrum in `array` with its time-domain signal
pub fn inverse_real_fourier_transform(array: &mut [f64]) {
    let length = array.len();
    assert!(length >= 2 && length % 2 == 0, "FFT array length must be even, got {length}");
    let half = length / 2;

    let mut planner = RealFftPlanner::<f64>::new();
    let fft = planner.plan_fft_inverse(length);

    // realfft uses e^(+i...) on the way back, so a sine term needs a negated
    // imaginary part
    let mut spectrum = fft.make_input_vec();
    spectrum[0] = Complex::new(array[0], 0.0);
    for bin in 1..half {
        spectrum[bin] = Complex::new(array[bin], -array[length - bin]);
    }
    spectrum[half] = Complex::new(array[half], 0.0);

    if let Err(error) = fft.process(&mut spectrum, array) {
        tracing::warn!("inverse FFT failed: {}", error);
        array.fill(0.0);
    }
}

// ============================================================================
// UNIT TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::TAU;

    #[test]
    fn test_dc_bin_gives_constant_signal() {
        let mut array = vec![0.0; 16];
        array[0] = 1.0;
        inverse_real_fourier_transform(&mut array);
        for &value in &array {
            assert!((value - 1.0).abs() < 1e-9, "got {value}");
        }
    }

    #[test]
    fn test_single_cosine_bin() {
        // A real value in bin k becomes 2*cos(2*pi*k*n/N)
        let length = 64;
        let bin = 3;
        let mut array = vec![0.0; length];
        array[bin] = 1.0;
        inverse_real_fourier_transform(&mut array);
        for (n, &value) in array.iter().enumerate() {
            let expected = 2.0 * (TAU * (bin * n) as f64 / length as f64).cos();
            assert!((value - expected).abs() < 1e-9, "n={n}: {value} vs {expected}");
        }
    }

    #[test]
    fn test_single_sine_bin() {
        // An imaginary value in bin k becomes 2*sin(2*pi*k*n/N)
        let length = 32;
        let bin = 5;
        let mut array = vec![0.0; length];
        array[length - bin] = 1.0;
        inverse_real_fourier_transform(&mut array);
        for (n, &value) in array.iter().enumerate() {
            let expected = 2.0 * (TAU * (bin * n) as f64 / length as f64).sin();
            assert!((value - expected).abs() < 1e-9, "n={n}: {value} vs {expected}");
        }
    }

    #[test]
    fn test_scale_elements() {
        let mut array = vec![1.0, -2.0, 4.0];
        scale_elements_by_factor(&mut array, 0.5);
        assert_eq!(array, vec![0.5, -1.0, 2.0]);
    }
}
