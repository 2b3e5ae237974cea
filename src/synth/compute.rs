// ============================================================================
// COMPUTE.RS - Per-Run Tone Parameters
// ============================================================================
//
// Once per run (the samples between two tick boundaries, or fewer at the end
// of an output buffer) every sounding tone gets fresh start values and
// per-sample deltas. The voices then interpolate linearly across the run and
// never look at the song themselves.
//
// WHAT GETS COMPUTED:
// - interval: pin pitch bend + slides into neighbouring notes + vibrato
// - custom volume: the note's pin volume curve
// - transition volume: attack, release fade, fast eviction fade
// - chord volume: quieter tones for larger harmonized chords
// - decay time: how long the note has sounded, drives every envelope
// - filter coefficient and its per-sample sweep
//
// TIMING:
// Each value is first evaluated at the tick's start and end, then
// interpolated to the run's position inside the tick (start_ratio and
// end_ratio). A run that covers a whole tick uses ratios 0 and 1.
//
// TONE STATES:
//   released   the note ended; hold its last pitch and fade out
//   live       no note at all; held while the live input is pressed
//   note       a pattern note, with optional seamless neighbours
// ============================================================================

use crate::config::{
    Envelope, EnvelopeType, NOISE_INTERVAL, OPERATOR_CARRIER_INTERVAL, OPERATOR_COUNT, PARTS_PER_BEAT, SINE_WAVE_LENGTH,
    TICKS_PER_PART,
};
use crate::helper::{expression_to_volume_mult, frequency_from_pitch, instrument_volume_to_volume_mult, lerp};
use crate::song::{Instrument, InstrumentType, Note, Song};
use crate::synth::envelope::{compute_chord_volume, compute_envelope, lfo_amplitude, operator_amplitude_curve};
use crate::synth::filter::{clamp_coefficient, coefficient_for_hz, cutoff_hz, filter_volume};
use crate::synth::scheduler::PlayCursor;
use crate::synth::tone::{NoteRef, Tone};

/// Volume reference pitch for chip and FM voices
const PITCHED_REFERENCE_PITCH: f64 = 16.0;

// ============================================================================
// RUN CONTEXT
// ============================================================================

/// Everything about the current run that is shared by all tones
#[derive(Clone, Copy)]
pub struct RunContext<'a> {
    pub song: &'a Song,
    pub channel: usize,
    pub cursor: PlayCursor,
    pub samples_per_tick: usize,
    pub sample_rate: f64,
    pub run_length: usize,
}

/// A value at the start and at the end of the run
#[derive(Clone, Copy, Debug, PartialEq)]
struct Ramp {
    start: f64,
    end: f64,
}

impl Ramp {
    fn flat(value: f64) -> Self {
        Self { start: value, end: value }
    }

    /// Interpolates tick-boundary values to the run's edges
    fn within_tick(tick_start: f64, tick_end: f64, start_ratio: f64, end_ratio: f64) -> Self {
        Self { start: lerp(tick_start, tick_end, start_ratio), end: lerp(tick_start, tick_end, end_ratio) }
    }

    fn map(self, f: impl Fn(f64) -> f64) -> Self {
        Self { start: f(self.start), end: f(self.end) }
    }
}

/// Loudness and pitch anchors that differ per instrument type
struct VoiceLevels {
    base_pitch: f64,
    base_volume: f64,
    reference_pitch: f64,
    pitch_damping: f64,
}

impl VoiceLevels {
    fn for_instrument(song: &Song, instrument: &Instrument) -> Self {
        match instrument.instrument_type {
            InstrumentType::Chip => Self {
                base_pitch: song.get_key_base_pitch() as f64,
                base_volume: 0.03375,
                reference_pitch: PITCHED_REFERENCE_PITCH,
                pitch_damping: 48.0,
            },
            InstrumentType::Fm => Self {
                base_pitch: song.get_key_base_pitch() as f64,
                base_volume: 0.03,
                reference_pitch: PITCHED_REFERENCE_PITCH,
                pitch_damping: 48.0,
            },
            InstrumentType::Noise => {
                let chip_noise = instrument.get_chip_noise();
                Self {
                    base_pitch: chip_noise.base_pitch,
                    base_volume: 0.19,
                    reference_pitch: chip_noise.base_pitch,
                    pitch_damping: if chip_noise.is_soft { 24.0 } else { 60.0 },
                }
            }
        }
    }

    /// Higher pitches are played quieter
    fn pitch_volume(&self, pitch: f64) -> f64 {
        2.0_f64.powf(-(pitch - self.reference_pitch) / self.pitch_damping)
    }
}

/// Looks up a note the scheduler pointed a tone at
pub fn note_at(song: &Song, channel: usize, pattern: usize, note: Option<NoteRef>) -> Option<&Note> {
    let note = note?;
    song.channels.get(channel)?.patterns.get(pattern)?.notes.get(note.index)
}

// ============================================================================
// COMPUTE TONE
// ============================================================================

/// Writes the tone's parameters for the coming run. Returns false when the
/// tone has nothing to play (its note vanished from the pattern), in which
/// case the voice must not run.
pub fn compute_tone(ctx: &RunContext, instrument: &Instrument, tone: &mut Tone, released: bool, fade_out_fast: bool) -> bool {
    let song = ctx.song;
    let cursor = ctx.cursor;
    let transition = instrument.get_transition();
    let chord = instrument.get_chord();
    let chord_volume = if chord.arpeggiates { 1.0 } else { compute_chord_volume(tone.chord_size as f64) };
    let interval_scale = if song.channel_is_noise(ctx.channel) { NOISE_INTERVAL } else { 1.0 };
    let ticks_per_part = TICKS_PER_PART as f64;
    let samples_per_tick = ctx.samples_per_tick as f64;
    let run_length = ctx.run_length as f64;
    let seconds_per_part = ticks_per_part * samples_per_tick / ctx.sample_rate;
    let beats_per_part = 1.0 / PARTS_PER_BEAT as f64;
    let tone_was_active = tone.active;

    let countdown = cursor.tick_sample_countdown as f64;
    let start_ratio = 1.0 - countdown / samples_per_tick;
    let end_ratio = 1.0 - (countdown - run_length) / samples_per_tick;
    let ticks_into_bar = ((cursor.beat * PARTS_PER_BEAT + cursor.part) * TICKS_PER_PART + cursor.tick) as f64;
    let part_time_tick_start = ticks_into_bar / ticks_per_part;
    let part_time_tick_end = (ticks_into_bar + 1.0) / ticks_per_part;
    let part_time = Ramp::within_tick(part_time_tick_start, part_time_tick_end, start_ratio, end_ratio);

    tone.phase_delta_scale = 0.0;
    tone.filter = 1.0;
    tone.filter_scale = 1.0;
    tone.interval_mult = 1.0;
    tone.interval_volume_mult = 1.0;
    tone.active = false;
    tone.phase_deltas = [0.0; OPERATOR_COUNT];
    tone.volume_starts = [0.0; OPERATOR_COUNT];
    tone.volume_deltas = [0.0; OPERATOR_COUNT];

    let levels = VoiceLevels::for_instrument(song, instrument);

    let reset_phases;
    let parts_since_start;
    let mut interval;
    let custom_volume;
    let mut transition_volume;
    let chord_volume_ramp;
    let decay_time;

    if released {
        let ticks_since_released = tone.ticks_since_released as f64;
        let release_ticks = transition.release_ticks as f64;
        let ticks_released = Ramp { start: ticks_since_released + start_ratio, end: ticks_since_released + end_ratio };

        reset_phases = false;
        parts_since_start = ((tone.note_length_ticks + ticks_since_released) / ticks_per_part).floor();
        interval = Ramp::flat(tone.last_interval);
        custom_volume = Ramp::flat(expression_to_volume_mult(tone.last_volume));
        transition_volume = ticks_released.map(|ticks| expression_to_volume_mult((1.0 - ticks / release_ticks) * 3.0));
        chord_volume_ramp = Ramp::flat(chord_volume);
        decay_time = ticks_released.map(|ticks| (tone.note_length_ticks + ticks) / ticks_per_part);

        if fade_out_fast {
            transition_volume.start *= 1.0 - start_ratio;
            transition_volume.end *= 1.0 - end_ratio;
        }
    } else if tone.note.is_none() {
        tone.last_interval = 0.0;
        tone.last_volume = 3.0;
        tone.ticks_since_released = 0;

        let held_ticks_start = tone.live_input_samples_held / samples_per_tick;
        tone.live_input_samples_held += run_length;
        let held_ticks_end = tone.live_input_samples_held / samples_per_tick;
        tone.note_length_ticks = held_ticks_end;
        let held_parts = Ramp { start: held_ticks_start / ticks_per_part, end: held_ticks_end / ticks_per_part };

        reset_phases = false;
        parts_since_start = held_parts.start.floor();
        interval = Ramp::flat(0.0);
        custom_volume = Ramp::flat(1.0);
        transition_volume = Ramp::flat(1.0);
        chord_volume_ramp = Ramp::flat(chord_volume);
        decay_time = held_parts;
    } else {
        let Some(note) = note_at(song, ctx.channel, tone.pattern, tone.note) else {
            return false;
        };
        if note.pins.len() < 2 {
            return false;
        }
        let prev_note = note_at(song, ctx.channel, tone.pattern, tone.prev_note);
        let next_note = note_at(song, ctx.channel, tone.pattern, tone.next_note);

        let time = cursor.part_in_bar();
        let parts_per_bar = song.parts_per_bar() as i32;
        let note_start = tone.note_start;
        let note_end = tone.note_end;

        parts_since_start = (time - note_start) as f64;

        let mut end_pin_index = 1;
        while end_pin_index < note.pins.len() - 1 {
            if note.pins[end_pin_index].time + note.start > time {
                break;
            }
            end_pin_index += 1;
        }
        let start_pin = note.pins[end_pin_index - 1];
        let end_pin = note.pins[end_pin_index];
        let last_pin = note.last_pin();

        let note_start_tick = note_start as f64 * ticks_per_part;
        let note_end_tick = note_end as f64 * ticks_per_part;
        let note_length_ticks = note_end_tick - note_start_tick;
        let pin_start = (note.start + start_pin.time) as f64 * ticks_per_part;
        let pin_end = (note.start + end_pin.time) as f64 * ticks_per_part;
        let pin_span = (pin_end - pin_start).max(1.0);

        tone.last_interval = last_pin.interval as f64;
        tone.last_volume = last_pin.volume as f64;
        tone.ticks_since_released = 0;
        tone.note_length_ticks = note_length_ticks;

        let tick_time_start = time as f64 * ticks_per_part + cursor.tick as f64;
        let tick_time_end = tick_time_start + 1.0;
        let ticks_passed_start = tick_time_start - note_start_tick;
        let ticks_passed_end = tick_time_end - note_start_tick;
        let pin_ratio_start = ((tick_time_start - pin_start) / pin_span).min(1.0);
        let pin_ratio_end = ((tick_time_end - pin_start) / pin_span).min(1.0);

        let pin_volume = |ratio: f64| start_pin.volume as f64 + (end_pin.volume - start_pin.volume) as f64 * ratio;
        let pin_interval =
            |ratio: f64| start_pin.interval as f64 + (end_pin.interval - start_pin.interval) as f64 * ratio;

        let mut custom_tick = Ramp { start: pin_volume(pin_ratio_start), end: pin_volume(pin_ratio_end) };
        let mut interval_tick = Ramp { start: pin_interval(pin_ratio_start), end: pin_interval(pin_ratio_end) };
        let mut transition_tick = Ramp::flat(1.0);
        let mut chord_tick = Ramp::flat(chord_volume);
        let mut decay_tick = Ramp {
            start: part_time_tick_start - note_start as f64,
            end: part_time_tick_end - note_start as f64,
        };

        let mut reset = tick_time_start + start_ratio - note_start_tick == 0.0 || !tone_was_active;

        let maximum_slide_ticks = note_length_ticks * 0.5;
        let slide_ticks = maximum_slide_ticks.min(transition.slide_ticks as f64);

        if transition.is_seamless && !transition.slides && note.start == 0 {
            // Assume the previous bar ended on a seamless note
            reset = !tone_was_active;
        } else if let (true, Some(prev_note)) = (transition.is_seamless, prev_note) {
            reset = !tone_was_active;
            if transition.slides {
                let slide = Ramp {
                    start: (1.0 - ticks_passed_start / slide_ticks).max(0.0),
                    end: (1.0 - ticks_passed_end / slide_ticks).max(0.0),
                };
                let prev_last_pin = prev_note.last_pin();
                let prev_pitch =
                    prev_note.pitches.get(tone.prev_note_pitch_index).copied().unwrap_or(tone.pitches[0]);
                let interval_diff = ((prev_pitch + prev_last_pin.interval) - tone.pitches[0]) as f64 * 0.5;
                let volume_diff = (prev_last_pin.volume - note.first_pin().volume) as f64 * 0.5;
                let decay_time_diff = prev_note.length() as f64 * 0.5;
                apply_slide(&mut interval_tick, slide, interval_diff);
                apply_slide(&mut custom_tick, slide, volume_diff);
                apply_slide(&mut decay_tick, slide, decay_time_diff);

                if !chord.arpeggiates {
                    let chord_size_diff = (prev_note.pitches.len() as f64 - tone.chord_size as f64) * 0.5;
                    chord_tick = slide.map(|ratio| compute_chord_volume(tone.chord_size as f64 + ratio * chord_size_diff));
                }
            }
        }

        if transition.is_seamless && !transition.slides && note.end == parts_per_bar {
            // Assume the next bar starts with a seamless note; no fade
        } else if let (true, Some(next_note)) = (transition.is_seamless, next_note) {
            if transition.slides {
                let slide = Ramp {
                    start: (1.0 - (note_length_ticks - ticks_passed_start) / slide_ticks).max(0.0),
                    end: (1.0 - (note_length_ticks - ticks_passed_end) / slide_ticks).max(0.0),
                };
                let next_pitch =
                    next_note.pitches.get(tone.next_note_pitch_index).copied().unwrap_or(tone.pitches[0]);
                let interval_diff = (next_pitch - (tone.pitches[0] + last_pin.interval)) as f64 * 0.5;
                let volume_diff = (next_note.first_pin().volume - last_pin.volume) as f64 * 0.5;
                let decay_time_diff = -((note_end - note_start) as f64) * 0.5;
                apply_slide(&mut interval_tick, slide, interval_diff);
                apply_slide(&mut custom_tick, slide, volume_diff);
                apply_slide(&mut decay_tick, slide, decay_time_diff);

                if !chord.arpeggiates {
                    let chord_size_diff = (next_note.pitches.len() as f64 - tone.chord_size as f64) * 0.5;
                    chord_tick = slide.map(|ratio| compute_chord_volume(tone.chord_size as f64 + ratio * chord_size_diff));
                }
            }
        } else if !transition.releases {
            let release_ticks = transition.release_ticks as f64;
            if release_ticks > 0.0 {
                transition_tick.start *= ((note_length_ticks - ticks_passed_start) / release_ticks).min(1.0);
                transition_tick.end *= ((note_length_ticks - ticks_passed_end) / release_ticks).min(1.0);
            }
        }

        reset_phases = reset;
        interval = Ramp::within_tick(interval_tick.start, interval_tick.end, start_ratio, end_ratio);
        custom_volume = Ramp::within_tick(custom_tick.start, custom_tick.end, start_ratio, end_ratio)
            .map(expression_to_volume_mult);
        transition_volume = Ramp::within_tick(transition_tick.start, transition_tick.end, start_ratio, end_ratio);
        chord_volume_ramp = Ramp::within_tick(chord_tick.start, chord_tick.end, start_ratio, end_ratio);
        decay_time = Ramp::within_tick(decay_tick.start, decay_tick.end, start_ratio, end_ratio);
    }

    let sample_time = 1.0 / ctx.sample_rate;
    tone.active = true;

    // ---- Vibrato ----
    if matches!(instrument.instrument_type, InstrumentType::Chip | InstrumentType::Fm) {
        let vibrato = instrument.get_vibrato();
        let vibrato_scale = if parts_since_start < vibrato.delay_parts as f64 { 0.0 } else { vibrato.amplitude };
        interval.start += vibrato_scale * lfo_amplitude(vibrato, seconds_per_part * part_time.start);
        interval.end += vibrato_scale * lfo_amplitude(vibrato, seconds_per_part * part_time.end);
    }

    // ---- Attack ----
    let continues_from_bar_start = !transition.slides && tone.note.is_some_and(|note| note.start == 0);
    if !transition.is_seamless || (!continues_from_bar_start && tone.prev_note.is_none()) {
        let attack_seconds = transition.attack_seconds;
        if attack_seconds > 0.0 {
            transition_volume.start *= (seconds_per_part * decay_time.start / attack_seconds).min(1.0);
            transition_volume.end *= (seconds_per_part * decay_time.end / attack_seconds).min(1.0);
        }
    }

    let instrument_volume_mult = instrument_volume_to_volume_mult(instrument.volume);

    // Envelopes take seconds since the note started and beats into the bar
    let envelope_at = |envelope: &Envelope, custom: Ramp| Ramp {
        start: compute_envelope(envelope, seconds_per_part * decay_time.start, beats_per_part * part_time.start, custom.start),
        end: compute_envelope(envelope, seconds_per_part * decay_time.end, beats_per_part * part_time.end, custom.end),
    };

    // ---- Filter ----
    let filter_envelope = instrument.get_filter_envelope();
    let filter_base = coefficient_for_hz(cutoff_hz(instrument), ctx.sample_rate);
    let filter = envelope_at(filter_envelope, custom_volume)
        .map(|envelope| clamp_coefficient(filter_base * envelope, ctx.sample_rate));
    tone.filter = filter.start;
    tone.filter_scale = (filter.end / filter.start).powf(1.0 / run_length);
    let filter_volume = filter_volume(instrument, filter_envelope);

    if reset_phases {
        tone.reset();
    }

    let rhythm = song.get_rhythm();
    let arpeggio = (cursor.tick + cursor.part * TICKS_PER_PART) / rhythm.ticks_per_arpeggio;
    let pitch_count = tone.pitch_count.max(1);

    if instrument.instrument_type == InstrumentType::Fm {
        let algorithm = instrument.get_algorithm();
        let mut sine_volume_boost = 1.0;
        let mut total_carrier_volume = 0.0;

        let mut arpeggio_interval = 0.0;
        if pitch_count > 1 && !chord.harmonizes {
            let index = rhythm.arpeggio_pitch_index(pitch_count, arpeggio);
            arpeggio_interval = (tone.pitches[index] - tone.pitches[0]) as f64;
        }

        for (i, operator) in instrument.operators.iter().enumerate() {
            let associated_carrier = algorithm.associated_carrier[i] - 1;
            let pitch_index = if !chord.harmonizes {
                0
            } else if i < pitch_count {
                i
            } else if associated_carrier < pitch_count {
                associated_carrier
            } else {
                0
            };
            let pitch = tone.pitches[pitch_index] as f64;
            let frequency = operator.get_frequency();
            let carrier_interval = OPERATOR_CARRIER_INTERVAL[associated_carrier] + arpeggio_interval;
            let start_pitch = levels.base_pitch + (pitch + interval.start) * interval_scale + carrier_interval;
            let start_freq = frequency.mult * frequency_from_pitch(start_pitch) + frequency.hz_offset;

            tone.phase_deltas[i] = start_freq * sample_time * SINE_WAVE_LENGTH as f64;

            let amplitude_curve = operator_amplitude_curve(operator.amplitude);
            let amplitude_mult = amplitude_curve * frequency.amplitude_sign;
            let mut volume = Ramp::flat(amplitude_mult);
            if i < algorithm.carrier_count {
                let end_pitch = levels.base_pitch + (pitch + interval.end) * interval_scale + carrier_interval;
                volume.start *= levels.pitch_volume(start_pitch);
                volume.end *= levels.pitch_volume(end_pitch);
                total_carrier_volume += amplitude_curve;
            } else {
                volume = volume.map(|v| v * SINE_WAVE_LENGTH as f64 * 1.5);
                sine_volume_boost *= 1.0 - (operator.amplitude as f64 / 15.0).min(1.0);
            }
            let envelope = envelope_at(operator.get_envelope(), custom_volume);
            volume.start *= envelope.start;
            volume.end *= envelope.end;

            tone.volume_starts[i] = volume.start;
            tone.volume_deltas[i] = (volume.end - volume.start) / run_length;
        }

        let feedback_amplitude = SINE_WAVE_LENGTH as f64 * 0.3 * instrument.feedback_amplitude as f64 / 15.0;
        let feedback = envelope_at(instrument.get_feedback_envelope(), custom_volume).map(|v| v * feedback_amplitude);
        tone.feedback_mult = feedback.start;
        tone.feedback_delta = (feedback.end - feedback.start) / run_length;

        let volume_mult = levels.base_volume * instrument_volume_mult;
        tone.volume_start = filter_volume * volume_mult * transition_volume.start * chord_volume_ramp.start;
        let volume_end = filter_volume * volume_mult * transition_volume.end * chord_volume_ramp.end;
        tone.volume_delta = (volume_end - tone.volume_start) / run_length;

        sine_volume_boost *= (2.0_f64.powf(2.0 - 1.4 * instrument.feedback_amplitude as f64 / 15.0) - 1.0) / 3.0;
        sine_volume_boost *= 1.0 - ((total_carrier_volume - 1.0).max(0.0) / 2.0).min(1.0);
        tone.volume_start *= 1.0 + sine_volume_boost * 3.0;
        tone.volume_delta *= 1.0 + sine_volume_boost * 3.0;
    } else {
        let mut pitch = tone.pitches[0] as f64;

        if pitch_count > 1 {
            if chord.harmonizes {
                let index = 1 + rhythm.arpeggio_pitch_index(pitch_count - 1, arpeggio);
                let interval_offset = (tone.pitches[index] - tone.pitches[0]) as f64;
                tone.interval_mult = 2.0_f64.powf(interval_offset / 12.0);
                tone.interval_volume_mult = 2.0_f64.powf(-interval_offset / levels.pitch_damping);
            } else {
                pitch = tone.pitches[rhythm.arpeggio_pitch_index(pitch_count, arpeggio)] as f64;
            }
        }

        let start_pitch = levels.base_pitch + (pitch + interval.start) * interval_scale;
        let end_pitch = levels.base_pitch + (pitch + interval.end) * interval_scale;
        let start_freq = frequency_from_pitch(start_pitch);

        let mut settings_volume_mult = levels.base_volume * filter_volume;
        match instrument.instrument_type {
            InstrumentType::Noise => settings_volume_mult *= instrument.get_chip_noise().volume,
            _ => settings_volume_mult *= instrument.get_chip_wave().volume * instrument.get_interval().volume,
        }

        tone.phase_deltas[0] = start_freq * sample_time;

        let shared = settings_volume_mult * instrument_volume_mult;
        tone.volume_start =
            transition_volume.start * chord_volume_ramp.start * levels.pitch_volume(start_pitch) * shared;
        let mut volume_end = transition_volume.end * chord_volume_ramp.end * levels.pitch_volume(end_pitch) * shared;

        // A custom filter envelope already follows the pin volume
        if filter_envelope.kind != EnvelopeType::Custom {
            tone.volume_start *= custom_volume.start;
            volume_end *= custom_volume.end;
        }

        tone.volume_delta = (volume_end - tone.volume_start) / run_length;
    }

    tone.phase_delta_scale = 2.0_f64.powf(((interval.end - interval.start) * interval_scale / 12.0) / run_length);
    true
}

/// Blends a neighbouring note's value in while `slide` is non-zero
fn apply_slide(value: &mut Ramp, slide: Ramp, diff: f64) {
    value.start += slide.start * diff;
    value.end += slide.end * diff;
}

// ============================================================================
// UNIT TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::song::Pattern;

    const SAMPLE_RATE: f64 = 48000.0;
    const SAMPLES_PER_TICK: usize = 400;

    /// One pitch channel whose first bar holds `notes`
    fn song_with_notes(notes: Vec<Note>, transition: usize) -> Song {
        let mut song = Song::new();
        song.pitch_channel_count = 1;
        song.noise_channel_count = 0;
        song.channels.truncate(1);
        let channel = &mut song.channels[0];
        channel.instruments[0].transition = transition;
        channel.patterns[0] = Pattern { notes, instrument: 0 };
        channel.bars[0] = 1;
        song
    }

    fn tone_for(note_index: usize, note: &Note) -> Tone {
        let mut tone = Tone::default();
        tone.set_pitches(&note.pitches);
        tone.chord_size = 1;
        tone.note = Some(NoteRef { index: note_index, start: note.start, end: note.end });
        tone.note_start = note.start;
        tone.note_end = note.end;
        tone
    }

    fn context(song: &Song, cursor: PlayCursor, run_length: usize) -> RunContext<'_> {
        RunContext { song, channel: 0, cursor, samples_per_tick: SAMPLES_PER_TICK, sample_rate: SAMPLE_RATE, run_length }
    }

    fn cursor_at(part: usize, tick: usize) -> PlayCursor {
        PlayCursor { bar: 0, beat: part / PARTS_PER_BEAT, part: part % PARTS_PER_BEAT, tick, tick_sample_countdown: SAMPLES_PER_TICK }
    }

    #[test]
    fn test_note_frequency_matches_pitch() {
        let note = Note::new(24, 0, 48, 3, false);
        let song = song_with_notes(vec![note.clone()], 1);
        let instrument = song.channels[0].instruments[0].clone();
        let mut tone = tone_for(0, &note);

        let ctx = context(&song, cursor_at(4, 0), SAMPLES_PER_TICK);
        assert!(compute_tone(&ctx, &instrument, &mut tone, false, false));

        let pitch = song.get_key_base_pitch() as f64 + 24.0;
        assert!((tone.phase_deltas[0] - frequency_from_pitch(pitch) / SAMPLE_RATE).abs() < 1e-12);
        assert!((tone.phase_delta_scale - 1.0).abs() < 1e-12);
        assert!(tone.volume_start > 0.0);
        assert!(tone.active);
    }

    #[test]
    fn test_fresh_note_resets_phases() {
        let note = Note::new(24, 0, 48, 3, false);
        let song = song_with_notes(vec![note.clone()], 1);
        let instrument = song.channels[0].instruments[0].clone();
        let mut tone = tone_for(0, &note);
        tone.phases[0] = 0.4;
        tone.active = true;

        let ctx = context(&song, cursor_at(0, 0), SAMPLES_PER_TICK);
        compute_tone(&ctx, &instrument, &mut tone, false, false);
        assert_eq!(tone.phases[0], 0.0);

        tone.phases[0] = 0.4;
        let ctx = context(&song, cursor_at(2, 1), SAMPLES_PER_TICK);
        compute_tone(&ctx, &instrument, &mut tone, false, false);
        assert_eq!(tone.phases[0], 0.4);
    }

    #[test]
    fn test_pin_volume_is_interpolated() {
        // Fades from full volume to silence across the note
        let note = Note::new(24, 0, 48, 3, true);
        let song = song_with_notes(vec![note.clone()], 1);
        let instrument = song.channels[0].instruments[0].clone();

        let mut early = tone_for(0, &note);
        compute_tone(&context(&song, cursor_at(2, 0), SAMPLES_PER_TICK), &instrument, &mut early, false, false);
        let mut late = tone_for(0, &note);
        compute_tone(&context(&song, cursor_at(30, 0), SAMPLES_PER_TICK), &instrument, &mut late, false, false);

        assert!(late.volume_start < early.volume_start);
        assert!(early.volume_delta < 0.0);
        assert_eq!(late.last_volume, 0.0);
    }

    #[test]
    fn test_released_tone_fades_to_silence() {
        let note = Note::new(24, 0, 4, 3, false);
        let song = song_with_notes(vec![note.clone()], 5);
        let instrument = song.channels[0].instruments[0].clone();
        let release_ticks = instrument.get_transition().release_ticks;

        let mut tone = tone_for(0, &note);
        compute_tone(&context(&song, cursor_at(0, 0), SAMPLES_PER_TICK), &instrument, &mut tone, false, false);
        let held_volume = tone.volume_start;

        tone.ticks_since_released = release_ticks / 2;
        compute_tone(&context(&song, cursor_at(8, 0), SAMPLES_PER_TICK), &instrument, &mut tone, true, false);
        assert!(tone.volume_start < held_volume);
        assert!(tone.volume_delta < 0.0);

        tone.ticks_since_released = release_ticks - 1;
        compute_tone(&context(&song, cursor_at(8, 0), SAMPLES_PER_TICK), &instrument, &mut tone, true, false);
        let end = tone.volume_start + tone.volume_delta * SAMPLES_PER_TICK as f64;
        assert!(end.abs() < 1e-12);
    }

    #[test]
    fn test_fast_fade_reaches_zero_at_tick_end() {
        let note = Note::new(24, 0, 4, 3, false);
        let song = song_with_notes(vec![note.clone()], 5);
        let instrument = song.channels[0].instruments[0].clone();
        let mut tone = tone_for(0, &note);
        compute_tone(&context(&song, cursor_at(0, 0), SAMPLES_PER_TICK), &instrument, &mut tone, false, false);

        compute_tone(&context(&song, cursor_at(8, 0), SAMPLES_PER_TICK), &instrument, &mut tone, true, true);
        assert!(tone.volume_start > 0.0);
        let end = tone.volume_start + tone.volume_delta * SAMPLES_PER_TICK as f64;
        assert!(end.abs() < 1e-12);
    }

    #[test]
    fn test_slide_bends_towards_next_note() {
        let first = Note::new(24, 0, 24, 3, false);
        let second = Note::new(36, 24, 48, 3, false);
        let song = song_with_notes(vec![first.clone(), second.clone()], 3);
        let instrument = song.channels[0].instruments[0].clone();

        let mut tone = tone_for(0, &first);
        tone.next_note = Some(NoteRef { index: 1, start: second.start, end: second.end });
        tone.active = true;

        // Last tick of the first note: halfway into the slide upward
        compute_tone(&context(&song, cursor_at(23, 1), SAMPLES_PER_TICK), &instrument, &mut tone, false, false);
        let unbent = frequency_from_pitch(song.get_key_base_pitch() as f64 + 24.0) / SAMPLE_RATE;
        assert!(tone.phase_deltas[0] > unbent);
        assert!(tone.phase_delta_scale > 1.0);
    }

    #[test]
    fn test_missing_note_is_not_played() {
        let note = Note::new(24, 0, 48, 3, false);
        let song = song_with_notes(vec![note.clone()], 1);
        let instrument = song.channels[0].instruments[0].clone();
        let mut tone = tone_for(5, &note);
        assert!(!compute_tone(&context(&song, cursor_at(0, 0), SAMPLES_PER_TICK), &instrument, &mut tone, false, false));
    }

    #[test]
    fn test_live_tone_accumulates_hold_time() {
        let song = song_with_notes(Vec::new(), 1);
        let instrument = song.channels[0].instruments[0].clone();
        let mut tone = Tone::default();
        tone.set_pitches(&[12]);
        tone.chord_size = 1;

        compute_tone(&context(&song, cursor_at(0, 0), 100), &instrument, &mut tone, false, false);
        compute_tone(&context(&song, cursor_at(0, 0), 100), &instrument, &mut tone, false, false);
        assert_eq!(tone.live_input_samples_held, 200.0);
        assert_eq!(tone.note_length_ticks, 0.5);
        assert_eq!(tone.last_volume, 3.0);
    }

    #[test]
    fn test_fm_carrier_gets_sine_table_step() {
        let note = Note::new(24, 0, 48, 3, false);
        let mut song = song_with_notes(vec![note.clone()], 1);
        song.channels[0].instruments[0].set_type_and_reset(InstrumentType::Fm);
        let instrument = song.channels[0].instruments[0].clone();
        let mut tone = tone_for(0, &note);

        compute_tone(&context(&song, cursor_at(4, 0), SAMPLES_PER_TICK), &instrument, &mut tone, false, false);
        let pitch = song.get_key_base_pitch() as f64 + 24.0;
        let expected = frequency_from_pitch(pitch) / SAMPLE_RATE * SINE_WAVE_LENGTH as f64;
        assert!((tone.phase_deltas[0] - expected).abs() < 1e-9);
        assert!(tone.volume_starts[0] > 0.0);
        assert!(tone.volume_start > 0.0);
    }
}
