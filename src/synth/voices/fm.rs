// ============================================================================
// FM.RS - Four-Operator FM Voice
// ============================================================================
//
// Each operator is a sine table reader. An algorithm decides which operators
// are carriers (summed into the output) and which modulate the phase of
// others; a feedback routing adds operators' latest outputs back into phases.
//
// PROGRAMS:
// The routing only depends on (algorithm, feedback type), so it is compiled
// into an FmProgram: fixed arrays of 0-based operator indices, no strings and
// no allocation. Every combination is built once on first use and looked up
// by index afterwards.
//
// EVALUATION ORDER:
// Operators are computed from 4 down to 1 each sample. Modulators always
// have higher numbers than the operators they modulate, so their scaled
// output for the current sample is ready when needed. Feedback reads the
// latest output of its source, which for a source at or below the target is
// the previous sample's.
// ============================================================================

use std::sync::OnceLock;

use rand::rngs::StdRng;

use crate::config::{ALGORITHMS, FEEDBACKS, OPERATOR_COUNT, SINE_WAVE_LENGTH, SINE_WAVE_MASK};
use crate::song::Instrument;
use crate::synth::filter::{FilterSweep, is_first_order, resonance_amount};
use crate::synth::tone::Tone;
use crate::synth::waves::sine_wave;

/// Keeps modulated phases positive so the table index never wraps below 0
const PHASE_OFFSET_CYCLES: f64 = 1000.0;

// ============================================================================
// FM PROGRAM
// ============================================================================

/// A small fixed-capacity list of operator indices
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct OperatorSources {
    count: usize,
    sources: [usize; OPERATOR_COUNT],
}

impl OperatorSources {
    /// Converts the catalog's 1-based operator numbers
    fn from_numbers(numbers: &[usize]) -> Self {
        let mut list = Self::default();
        for &number in numbers.iter().take(OPERATOR_COUNT) {
            assert!((1..=OPERATOR_COUNT).contains(&number), "operator number {number} out of range");
            list.sources[list.count] = number - 1;
            list.count += 1;
        }
        list
    }

    pub fn as_slice(&self) -> &[usize] {
        &self.sources[..self.count]
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

/// The operator routing for one (algorithm, feedback type) pair
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FmProgram {
    pub carrier_count: usize,
    pub modulators: [OperatorSources; OPERATOR_COUNT],
    pub feedback: [OperatorSources; OPERATOR_COUNT],
}

impl FmProgram {
    pub fn build(algorithm: usize, feedback_type: usize) -> Self {
        let algorithm = &ALGORITHMS[algorithm];
        let feedback = &FEEDBACKS[feedback_type];
        Self {
            carrier_count: algorithm.carrier_count,
            modulators: std::array::from_fn(|i| OperatorSources::from_numbers(algorithm.modulated_by[i])),
            feedback: std::array::from_fn(|i| OperatorSources::from_numbers(feedback.indices[i])),
        }
    }
}

static PROGRAMS: OnceLock<Vec<FmProgram>> = OnceLock::new();

/// The cached program for an instrument's routing (indices clamped)
pub fn program_for(algorithm: usize, feedback_type: usize) -> &'static FmProgram {
    let programs = PROGRAMS.get_or_init(|| {
        let programs: Vec<FmProgram> = (0..ALGORITHMS.len())
            .flat_map(|algorithm| (0..FEEDBACKS.len()).map(move |feedback| FmProgram::build(algorithm, feedback)))
            .collect();
        tracing::debug!(count = programs.len(), "built FM programs");
        programs
    });
    let algorithm = algorithm.min(ALGORITHMS.len() - 1);
    let feedback_type = feedback_type.min(FEEDBACKS.len() - 1);
    &programs[algorithm * FEEDBACKS.len() + feedback_type]
}

// ============================================================================
// VOICE
// ============================================================================

pub fn synthesize(tone: &mut Tone, instrument: &Instrument, output: &mut [f64], _rng: &mut StdRng) {
    let program = program_for(instrument.algorithm, instrument.feedback_type);
    let sine = sine_wave();
    let table_length = SINE_WAVE_LENGTH as f64;

    let phase_delta_scale = tone.phase_delta_scale;
    let mut phases: [f64; OPERATOR_COUNT] =
        std::array::from_fn(|i| ((tone.phases[i] % 1.0) + PHASE_OFFSET_CYCLES) * table_length);
    let mut phase_deltas = tone.phase_deltas;
    let mut output_mults = tone.volume_starts;
    let output_deltas = tone.volume_deltas;
    let mut outputs = tone.feedback_outputs;
    let mut scaled = [0.0; OPERATOR_COUNT];
    let mut feedback_mult = tone.feedback_mult;
    let feedback_delta = tone.feedback_delta;
    let mut volume = tone.volume_start;
    let volume_delta = tone.volume_delta;

    let mut sweep =
        FilterSweep::new(tone.filter, tone.filter_scale, resonance_amount(instrument), is_first_order(instrument));
    let mut filter = tone.filter_state;

    for sample in output.iter_mut() {
        for operator in (0..OPERATOR_COUNT).rev() {
            let mut phase_mix = phases[operator];
            for &modulator in program.modulators[operator].as_slice() {
                phase_mix += scaled[modulator];
            }
            let feedback_sources = &program.feedback[operator];
            if !feedback_sources.is_empty() {
                let feedback_sum: f64 = feedback_sources.as_slice().iter().map(|&source| outputs[source]).sum();
                phase_mix += feedback_mult * feedback_sum;
            }

            let phase_floor = phase_mix.floor();
            let index = (phase_floor as i64 as usize) & SINE_WAVE_MASK;
            let table_sample = sine[index];
            outputs[operator] = table_sample + (sine[index + 1] - table_sample) * (phase_mix - phase_floor);
            scaled[operator] = output_mults[operator] * outputs[operator];
        }

        let fm_output: f64 = scaled[..program.carrier_count].iter().sum();
        let filtered = filter.process(fm_output, &sweep);

        feedback_mult += feedback_delta;
        for operator in 0..OPERATOR_COUNT {
            output_mults[operator] += output_deltas[operator];
            phases[operator] += phase_deltas[operator];
            phase_deltas[operator] *= phase_delta_scale;
        }
        sweep.advance();

        *sample += filtered * volume;
        volume += volume_delta;
    }

    for operator in 0..OPERATOR_COUNT {
        tone.phases[operator] = phases[operator] / table_length;
    }
    tone.feedback_outputs = outputs;
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

    #[test]
    fn test_programs_convert_to_zero_based() {
        // Algorithm 0 is "1←(2 3 4)": operator 1 modulated by 2, 3 and 4
        let program = program_for(0, 0);
        assert_eq!(program.carrier_count, ALGORITHMS[0].carrier_count);
        let expected: Vec<usize> = ALGORITHMS[0].modulated_by[0].iter().map(|number| number - 1).collect();
        assert_eq!(program.modulators[0].as_slice(), expected.as_slice());
        assert_eq!(program.feedback[0].as_slice(), &[0]);
        assert!(program.feedback[1].is_empty());
    }

    #[test]
    fn test_every_combination_is_cached() {
        for algorithm in 0..ALGORITHMS.len() {
            for feedback in 0..FEEDBACKS.len() {
                let program = program_for(algorithm, feedback);
                assert_eq!(*program, FmProgram::build(algorithm, feedback));
                // Modulators always come after the operator they modulate
                for (operator, sources) in program.modulators.iter().enumerate() {
                    assert!(sources.as_slice().iter().all(|&source| source > operator));
                }
            }
        }
    }

    #[test]
    fn test_out_of_range_indices_clamp() {
        assert_eq!(program_for(99, 99), program_for(ALGORITHMS.len() - 1, FEEDBACKS.len() - 1));
    }

    #[test]
    fn test_single_carrier_is_a_sine() {
        let instrument = Instrument { algorithm: 0, feedback_type: 0, ..Instrument::default() };
        let mut tone = Tone::default();
        tone.phase_deltas[0] = table_step(64.0);
        tone.phase_delta_scale = 1.0;
        tone.volume_starts[0] = 1.0;
        tone.volume_start = 1.0;
        tone.filter = 1.0;
        tone.filter_scale = 1.0;

        let mut rng = StdRng::seed_from_u64(0);
        let mut output = vec![0.0; 128];
        synthesize(&mut tone, &instrument, &mut output, &mut rng);

        // Wide open first order filter passes operator 1 through untouched
        for (i, &sample) in output.iter().enumerate() {
            let expected = (std::f64::consts::TAU * i as f64 / 64.0).sin();
            assert!((sample - expected).abs() < 1e-3, "sample {i}: {sample} vs {expected}");
        }
    }

    fn table_step(period_samples: f64) -> f64 {
        SINE_WAVE_LENGTH as f64 / period_samples
    }
}
