// ============================================================================
// VOICES MODULE - Per-Sample Synthesis Loops
// ============================================================================
//
// A voice turns one tone's per-run parameters into samples. Each voice is a
// tight loop with no branching on instrument settings inside it: everything
// that depends on settings has already been folded into start values and
// per-sample deltas by the tone computation.
//
// Every voice:
// 1. reads its oscillator state from the Tone
// 2. for each sample: oscillator -> resonant filter -> volume ramp
// 3. adds into the output slice (several tones share one mix buffer)
// 4. writes its oscillator state back and flushes denormal filter memory
//
// HOW TO ADD A NEW VOICE:
// 1. Add a variant to InstrumentType
// 2. Write a function with the VoiceFunction signature in its own file
// 3. Add a VoiceDefinition to VOICE_REGISTRY
//
// SUBMODULES:
// - chip: integrated-wavetable oscillator pair
// - fm: four sine operators routed by an algorithm and feedback program
// - noise: noise table reader with pitch-relative smoothing
// ============================================================================

pub mod chip;
pub mod fm;
pub mod noise;

use rand::rngs::StdRng;

use crate::song::{Instrument, InstrumentType};
use crate::synth::tone::Tone;

/// Signature shared by every voice: adds `output.len()` samples
pub type VoiceFunction = fn(&mut Tone, &Instrument, &mut [f64], &mut StdRng);

pub struct VoiceDefinition {
    pub instrument_type: InstrumentType,
    pub name: &'static str,
    pub synthesize: VoiceFunction,
}

pub static VOICE_REGISTRY: &[VoiceDefinition] = &[
    VoiceDefinition { instrument_type: InstrumentType::Chip, name: "chip", synthesize: chip::synthesize },
    VoiceDefinition { instrument_type: InstrumentType::Fm, name: "fm", synthesize: fm::synthesize },
    VoiceDefinition { instrument_type: InstrumentType::Noise, name: "noise", synthesize: noise::synthesize },
];

/// Looks up the voice for an instrument type. Panics if the registry is
/// missing a type, which is a build mistake rather than bad input.
pub fn voice_for(instrument_type: InstrumentType) -> &'static VoiceDefinition {
    VOICE_REGISTRY
        .iter()
        .find(|voice| voice.instrument_type == instrument_type)
        .unwrap_or_else(|| panic!("no voice registered for {instrument_type:?}"))
}

/// Runs the instrument's voice for one tone
pub fn synthesize_tone(tone: &mut Tone, instrument: &Instrument, output: &mut [f64], rng: &mut StdRng) {
    (voice_for(instrument.instrument_type).synthesize)(tone, instrument, output, rng);
}

// ============================================================================
// UNIT TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_type_has_a_voice() {
        for instrument_type in InstrumentType::ALL {
            assert_eq!(voice_for(instrument_type).instrument_type, instrument_type);
        }
    }
}
