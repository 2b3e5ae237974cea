// ============================================================================
// FILTER.RS - Two-Pole Resonant Low-Pass
// ============================================================================
//
// Every voice runs its output through two cascaded one-pole stages. The
// first stage gets a feedback term from the difference between the stages,
// which adds a resonant peak near the cutoff:
//
//   feedback = r + r / (1 - f1)
//   s0 += f1 * (input - s0 + feedback * (s0 - s1))
//   s1 += f2 * (s0 - s1)
//   output = s1
//
// f1 and f2 are cutoff coefficients (2 * sin(pi * hz / sample_rate)), clamped
// to FILTER_MAX. With resonance 0 the second stage is bypassed (f2 = 1) and
// the filter is first order.
//
// The coefficients sweep geometrically across a run: each sample multiplies
// them by a per-run scale so a filter envelope moves smoothly.
// ============================================================================

use crate::config::{
    FILTER_CUTOFF_MAX_HZ, FILTER_CUTOFF_MIN_HZ, FILTER_CUTOFF_RANGE, FILTER_MAX, FILTER_MAX_RESONANCE,
    FILTER_RESONANCE_RANGE, Envelope, EnvelopeType,
};
use crate::helper::{PI, flush_denormal};
use crate::song::Instrument;

// ============================================================================
// INSTRUMENT SETTINGS -> FILTER PARAMETERS
// ============================================================================

/// Cutoff relative to the maximum, in octaves (0 at the top setting)
pub fn cutoff_octaves(instrument: &Instrument) -> f64 {
    (instrument.filter_cutoff as f64 - (FILTER_CUTOFF_RANGE - 1) as f64) * 0.5
}

pub fn cutoff_hz(instrument: &Instrument) -> f64 {
    FILTER_CUTOFF_MAX_HZ * 2.0_f64.powf(cutoff_octaves(instrument))
}

pub fn is_first_order(instrument: &Instrument) -> bool {
    instrument.filter_resonance == 0
}

/// Feedback amount for the resonance setting, 0 for settings 0 and 1
pub fn resonance_amount(instrument: &Instrument) -> f64 {
    let setting = instrument.filter_resonance as f64;
    FILTER_MAX_RESONANCE * ((setting - 1.0).max(0.0) / (FILTER_RESONANCE_RANGE - 2) as f64).sqrt()
}

/// One-pole coefficient for a cutoff frequency
#[inline]
pub fn coefficient_for_hz(hz: f64, sample_rate: f64) -> f64 {
    2.0 * (PI * hz / sample_rate).sin()
}

/// Clamps a swept coefficient into the stable range
#[inline]
pub fn clamp_coefficient(coefficient: f64, sample_rate: f64) -> f64 {
    coefficient.clamp(coefficient_for_hz(FILTER_CUTOFF_MIN_HZ, sample_rate), FILTER_MAX)
}

/// Loudness compensation: low cutoffs and high resonance would otherwise
/// change the perceived volume a lot
pub fn filter_volume(instrument: &Instrument, envelope: &Envelope) -> f64 {
    let mut volume = 0.5_f64.powf(cutoff_octaves(instrument) * 0.35);
    if instrument.filter_resonance > 0 {
        volume = volume.powf(1.7) * 0.5_f64.powf(0.125 * (instrument.filter_resonance as f64 - 1.0));
    }
    match envelope.kind {
        EnvelopeType::Decay => volume *= 1.25 + 0.025 * envelope.speed,
        EnvelopeType::Twang => volume *= 1.0 + 0.02 * envelope.speed,
        _ => {}
    }
    volume
}

// ============================================================================
// FILTER STATE
// ============================================================================

/// The two stage memories carried from run to run
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ResonantFilter {
    pub sample0: f64,
    pub sample1: f64,
}

/// Coefficients for one run, advanced once per sample
#[derive(Clone, Copy, Debug)]
pub struct FilterSweep {
    pub filter1: f64,
    pub filter2: f64,
    pub scale1: f64,
    pub scale2: f64,
    pub resonance: f64,
}

impl FilterSweep {
    /// Starts at `filter` and multiplies by `scale` each sample. A first
    /// order filter keeps its second stage wide open.
    pub fn new(filter: f64, scale: f64, resonance: f64, first_order: bool) -> Self {
        Self {
            filter1: filter,
            filter2: if first_order { 1.0 } else { filter },
            scale1: scale,
            scale2: if first_order { 1.0 } else { scale },
            resonance,
        }
    }

    #[inline]
    pub fn advance(&mut self) {
        self.filter1 *= self.scale1;
        self.filter2 *= self.scale2;
    }
}

impl ResonantFilter {
    /// Filters one sample with the sweep's current coefficients
    #[inline]
    pub fn process(&mut self, input: f64, sweep: &FilterSweep) -> f64 {
        let feedback = sweep.resonance + sweep.resonance / (1.0 - sweep.filter1);
        self.sample0 += sweep.filter1 * (input - self.sample0 + feedback * (self.sample0 - self.sample1));
        self.sample1 += sweep.filter2 * (self.sample0 - self.sample1);
        self.sample1
    }

    /// Snaps tiny state to zero; called once per run
    pub fn flush_denormals(&mut self) {
        self.sample0 = flush_denormal(self.sample0);
        self.sample1 = flush_denormal(self.sample1);
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

// ============================================================================
// UNIT TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ENVELOPES;

    const SAMPLE_RATE: f64 = 44100.0;

    fn sweep_for(cutoff: usize, resonance: usize) -> FilterSweep {
        let mut instrument = Instrument::default();
        instrument.filter_cutoff = cutoff;
        instrument.filter_resonance = resonance;
        let coefficient = clamp_coefficient(coefficient_for_hz(cutoff_hz(&instrument), SAMPLE_RATE), SAMPLE_RATE);
        FilterSweep::new(coefficient, 1.0, resonance_amount(&instrument), is_first_order(&instrument))
    }

    #[test]
    fn test_cutoff_mapping() {
        let mut instrument = Instrument::default();
        instrument.filter_cutoff = 10;
        assert_eq!(cutoff_hz(&instrument), 8000.0);
        instrument.filter_cutoff = 6;
        assert_eq!(cutoff_hz(&instrument), 2000.0);
    }

    #[test]
    fn test_resonance_amount_range() {
        let mut instrument = Instrument::default();
        instrument.filter_resonance = 1;
        assert_eq!(resonance_amount(&instrument), 0.0);
        instrument.filter_resonance = (FILTER_RESONANCE_RANGE - 1) as usize;
        assert!((resonance_amount(&instrument) - FILTER_MAX_RESONANCE).abs() < 1e-12);
    }

    #[test]
    fn test_first_order_passes_dc() {
        let mut filter = ResonantFilter::default();
        let sweep = sweep_for(6, 0);
        let mut output = 0.0;
        for _ in 0..20_000 {
            output = filter.process(1.0, &sweep);
        }
        assert!((output - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_filter_soak_stays_finite() {
        // Every cutoff and resonance setting, constant and square inputs
        for cutoff in 0..FILTER_CUTOFF_RANGE as usize {
            for resonance in 0..FILTER_RESONANCE_RANGE as usize {
                let sweep = sweep_for(cutoff, resonance);
                let mut constant = ResonantFilter::default();
                let mut square = ResonantFilter::default();
                for i in 0..50_000 {
                    let a = constant.process(1.0, &sweep);
                    let b = square.process(if (i / 50) % 2 == 0 { 1.0 } else { -1.0 }, &sweep);
                    assert!(a.is_finite() && b.is_finite(), "cutoff {cutoff} resonance {resonance}");
                    assert!(a.abs() < 100.0 && b.abs() < 100.0);
                }
                constant.flush_denormals();
            }
        }
    }

    #[test]
    fn test_flush_denormals() {
        let mut filter = ResonantFilter { sample0: 1e-30, sample1: -1e-26 };
        filter.flush_denormals();
        assert_eq!(filter, ResonantFilter::default());
    }

    #[test]
    fn test_filter_volume_compensation() {
        let mut instrument = Instrument::default();
        instrument.filter_cutoff = 10;
        assert_eq!(filter_volume(&instrument, &ENVELOPES[1]), 1.0);
        instrument.filter_cutoff = 4;
        assert!(filter_volume(&instrument, &ENVELOPES[1]) > 1.0);
    }
}
