// ============================================================================
// JSON.RS - JSON Interchange Format
// ============================================================================
//
// The JSON form is meant for people and other tools: settings are written by
// name instead of by index, volumes as percentages, filter cutoff in Hz, and
// note times in rhythm steps ("ticks") instead of parts.
//
// WRITING goes through small serde view structs. The bar sequence can be
// expanded with an intro, several loop repetitions and an outro so the file
// describes exactly what is heard.
//
// READING walks a `serde_json::Value` and never fails: missing or unknown
// fields fall back to defaults, older field names are understood, and the
// resulting song is passed through `Song::sanitize`.
// ============================================================================

use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use super::{Channel, Instrument, InstrumentType, Note, NotePin, Pattern, Song};
use crate::config::{
    ALGORITHMS, BAR_COUNT_MAX, BEATS_PER_BAR_MAX, BEATS_PER_BAR_MIN, CHIP_NOISES, CHIP_WAVES, CHORDS, DRUM_COUNT,
    EFFECTS_NAMES, ENVELOPES, FEEDBACKS, FILTER_CUTOFF_MAX_HZ, FILTER_CUTOFF_RANGE, FILTER_RESONANCE_RANGE,
    INSTRUMENT_TYPE_NAMES, INSTRUMENTS_PER_CHANNEL_MAX, INTERVALS, KEYS, MAX_CHORD_SIZE, MAX_PITCH,
    NOISE_CHANNEL_COUNT_MAX, OPERATOR_AMPLITUDE_MAX, OPERATOR_FREQUENCIES, PARTS_PER_BEAT, PATTERNS_PER_CHANNEL_MAX,
    PITCH_CHANNEL_COUNT_MAX, REVERB_RANGE, RHYTHMS, SCALE_EXPERT, SCALES, SCROLLABLE_OCTAVES, TEMPO_MAX, TEMPO_MIN,
    TRANSITIONS, VIBRATOS, VOLUME_RANGE, index_by_name,
};
use crate::helper::{clamp_usize, parse_key_name};

/// Value of the "format" field
pub const JSON_FORMAT: &str = "BeepBox";

/// Format version written to the "version" field
pub const JSON_VERSION: u32 = 7;

// ============================================================================
// WRITER VIEW
// ============================================================================

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SongJson<'a> {
    format: &'static str,
    version: u32,
    scale: &'static str,
    key: &'static str,
    intro_bars: usize,
    loop_bars: usize,
    beats_per_bar: usize,
    ticks_per_beat: usize,
    beats_per_minute: i32,
    reverb: i32,
    channels: Vec<ChannelJson<'a>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ChannelJson<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    octave_scroll_bar: i32,
    instruments: Vec<InstrumentJson>,
    patterns: Vec<PatternJson<'a>>,
    sequence: Vec<usize>,
}

#[derive(Serialize)]
struct PatternJson<'a> {
    /// 1-based
    instrument: usize,
    notes: Vec<NoteJson<'a>>,
}

#[derive(Serialize)]
struct NoteJson<'a> {
    pitches: &'a [i32],
    points: Vec<PointJson>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PointJson {
    tick: Value,
    pitch_bend: i32,
    volume: i32,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct InstrumentJson {
    #[serde(rename = "type")]
    kind: &'static str,
    volume: i32,
    effects: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    preset: Option<usize>,
    transition: &'static str,
    chord: &'static str,
    filter_cutoff_hz: i64,
    filter_resonance: i64,
    filter_envelope: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    wave: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    interval: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    vibrato: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    algorithm: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    feedback_type: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    feedback_amplitude: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    feedback_envelope: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    operators: Option<Vec<OperatorJson>>,
}

#[derive(Serialize)]
struct OperatorJson {
    frequency: &'static str,
    amplitude: i32,
    envelope: &'static str,
}

/// Writes whole numbers without a fractional part
fn number_value(value: f64) -> Value {
    if value.fract() == 0.0 && value.abs() < i64::MAX as f64 {
        Value::from(value as i64)
    } else {
        Value::from(value)
    }
}

/// Instrument volume setting to the percentage shown in JSON
fn volume_to_percent(volume: i32) -> i32 {
    (5 - volume) * 20
}

fn cutoff_to_hz(cutoff: usize) -> f64 {
    let octaves = (cutoff as f64 - (FILTER_CUTOFF_RANGE - 1) as f64) * 0.5;
    FILTER_CUTOFF_MAX_HZ * 2.0_f64.powf(octaves)
}

impl Instrument {
    fn to_json_view(&self) -> InstrumentJson {
        let mut view = InstrumentJson {
            kind: INSTRUMENT_TYPE_NAMES[self.instrument_type.index()],
            volume: volume_to_percent(self.volume),
            effects: EFFECTS_NAMES[self.effects.min(EFFECTS_NAMES.len() - 1)],
            preset: (self.preset != self.instrument_type.index()).then_some(self.preset),
            transition: self.get_transition().name,
            chord: self.get_chord().name,
            filter_cutoff_hz: cutoff_to_hz(self.filter_cutoff).round() as i64,
            filter_resonance: (100.0 * self.filter_resonance as f64 / (FILTER_RESONANCE_RANGE - 1) as f64).round()
                as i64,
            filter_envelope: self.get_filter_envelope().name,
            wave: None,
            interval: None,
            vibrato: None,
            algorithm: None,
            feedback_type: None,
            feedback_amplitude: None,
            feedback_envelope: None,
            operators: None,
        };

        match self.instrument_type {
            InstrumentType::Chip => {
                view.wave = Some(self.get_chip_wave().name);
                view.interval = Some(self.get_interval().name);
                view.vibrato = Some(self.get_vibrato().name);
            }
            InstrumentType::Fm => {
                view.vibrato = Some(self.get_vibrato().name);
                view.algorithm = Some(self.get_algorithm().name);
                view.feedback_type = Some(self.get_feedback().name);
                view.feedback_amplitude = Some(self.feedback_amplitude);
                view.feedback_envelope = Some(self.get_feedback_envelope().name);
                view.operators = Some(
                    self.operators
                        .iter()
                        .map(|operator| OperatorJson {
                            frequency: operator.get_frequency().name,
                            amplitude: operator.amplitude,
                            envelope: operator.get_envelope().name,
                        })
                        .collect(),
                );
            }
            InstrumentType::Noise => {
                view.wave = Some(self.get_chip_noise().name);
            }
        }
        view
    }

    /// The instrument's settings as a JSON object
    pub fn to_json_value(&self) -> Value {
        serde_json::to_value(self.to_json_view()).unwrap_or(Value::Null)
    }
}

impl Song {
    /// The song as a JSON document. The bar sequence contains the intro
    /// (when `intro`), the loop `loop_count` times, then the outro (when
    /// `outro`).
    pub fn to_json_value(&self, intro: bool, loop_count: usize, outro: bool) -> Value {
        let steps_per_beat = self.get_rhythm().steps_per_beat;
        let loop_end = (self.loop_start + self.loop_length).min(self.bar_count);

        let channels = self
            .channels
            .iter()
            .enumerate()
            .map(|(channel_index, channel)| {
                let patterns = channel
                    .patterns
                    .iter()
                    .map(|pattern| PatternJson {
                        instrument: pattern.instrument + 1,
                        notes: pattern
                            .notes
                            .iter()
                            .map(|note| NoteJson {
                                pitches: &note.pitches,
                                points: note
                                    .pins
                                    .iter()
                                    .map(|pin| PointJson {
                                        tick: number_value(
                                            (pin.time + note.start) as f64 * steps_per_beat as f64
                                                / PARTS_PER_BEAT as f64,
                                        ),
                                        pitch_bend: pin.interval,
                                        volume: (pin.volume as f64 * 100.0 / 3.0).round() as i32,
                                    })
                                    .collect(),
                            })
                            .collect(),
                    })
                    .collect();

                let bars = &channel.bars;
                let loop_end = loop_end.min(bars.len());
                let loop_begin = self.loop_start.min(loop_end);
                let mut sequence = Vec::new();
                if intro {
                    sequence.extend_from_slice(&bars[..loop_begin]);
                }
                for _ in 0..loop_count {
                    sequence.extend_from_slice(&bars[loop_begin..loop_end]);
                }
                if outro {
                    sequence.extend_from_slice(&bars[loop_end..]);
                }

                ChannelJson {
                    kind: if self.channel_is_noise(channel_index) { "drum" } else { "pitch" },
                    octave_scroll_bar: channel.octave,
                    instruments: channel
                        .instruments
                        .iter()
                        .take(self.instruments_per_channel)
                        .map(Instrument::to_json_view)
                        .collect(),
                    patterns,
                    sequence,
                }
            })
            .collect();

        let view = SongJson {
            format: JSON_FORMAT,
            version: JSON_VERSION,
            scale: SCALES[self.scale.min(SCALES.len() - 1)].name,
            key: KEYS[self.key.min(KEYS.len() - 1)].name,
            intro_bars: self.loop_start,
            loop_bars: self.loop_length,
            beats_per_bar: self.beats_per_bar,
            ticks_per_beat: steps_per_beat,
            beats_per_minute: self.tempo,
            reverb: self.reverb,
            channels,
        };
        serde_json::to_value(view).unwrap_or(Value::Null)
    }
}

// ============================================================================
// READER
// ============================================================================

/// Integer view of a JSON number (fractions truncate), or of a numeric string
fn int_of(value: Option<&Value>) -> Option<i64> {
    match value? {
        Value::Number(number) => number.as_i64().or_else(|| number.as_f64().map(|f| f as i64)),
        Value::String(text) => text.trim().parse::<f64>().ok().map(|f| f as i64),
        Value::Bool(flag) => Some(*flag as i64),
        _ => None,
    }
}

fn float_of(value: Option<&Value>) -> Option<f64> {
    match value? {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn str_of(value: Option<&Value>) -> Option<&str> {
    value?.as_str()
}

fn array_of(value: Option<&Value>) -> &[Value] {
    value.and_then(Value::as_array).map(Vec::as_slice).unwrap_or(&[])
}

fn named_index<E>(table: &[E], value: Option<&Value>, name_of: impl Fn(&E) -> &'static str) -> Option<usize> {
    index_by_name(table, str_of(value)?, name_of)
}

// ---- Legacy names ----

/// Transition names from before "seamless"/"hard" were renamed
fn legacy_transition(name: &str) -> Option<usize> {
    match name {
        "binary" => Some(0),
        "sudden" => Some(1),
        "smooth" => Some(2),
        _ => None,
    }
}

/// Single combined filter setting, mapped onto (cutoff, envelope)
fn legacy_filter(name: &str) -> (usize, usize) {
    const TO_CUTOFF: [usize; 7] = [10, 6, 3, 0, 8, 5, 2];
    const TO_ENVELOPE: [usize; 7] = [1, 1, 1, 1, 18, 19, 20];
    const NAMES: [&str; 7] = ["none", "bright", "medium", "soft", "decay bright", "decay medium", "decay soft"];
    let index = match name {
        "sustain sharp" => 1,
        "sustain medium" => 2,
        "sustain soft" => 3,
        "decay sharp" => 4,
        _ => NAMES.iter().position(|&n| n == name).unwrap_or(0),
    };
    (TO_CUTOFF[index], TO_ENVELOPE[index])
}

fn legacy_wave(name: &str) -> Option<usize> {
    match name {
        "triangle" => Some(1),
        "square" => Some(2),
        "pulse wide" => Some(3),
        "pulse narrow" => Some(4),
        "sawtooth" => Some(5),
        "double saw" => Some(6),
        "double pulse" => Some(7),
        "spiky" => Some(8),
        "plateau" => Some(0),
        _ => None,
    }
}

fn legacy_chorus(name: &str) -> Option<usize> {
    match name {
        "fifths" => Some(5),
        "octaves" => Some(6),
        _ => index_by_name(&INTERVALS, name, |interval| interval.name),
    }
}

fn legacy_envelope(name: &str) -> Option<usize> {
    match name {
        "pluck 1" => Some(6),
        "pluck 2" => Some(7),
        "pluck 3" => Some(8),
        _ => index_by_name(&ENVELOPES, name, |envelope| envelope.name),
    }
}

/// Vibrato names from when vibrato was one of several "effects"
const LEGACY_EFFECT_NAMES: [&str; 4] = ["none", "vibrato light", "vibrato delayed", "vibrato heavy"];

fn legacy_scale(name: &str) -> &str {
    match name {
        "romani :)" => "dbl harmonic :)",
        "romani :(" => "dbl harmonic :(",
        "enigma" => "strange",
        other => other,
    }
}

impl Instrument {
    /// Builds an instrument from its JSON object. Anything missing or unknown
    /// falls back to the type's defaults.
    pub fn from_json_value(object: &Value, is_noise_channel: bool) -> Instrument {
        let field = |name: &str| object.get(name);

        let instrument_type = str_of(field("type"))
            .and_then(|name| INSTRUMENT_TYPE_NAMES.iter().position(|&type_name| type_name == name))
            .map(InstrumentType::from_index)
            .unwrap_or(InstrumentType::for_channel(is_noise_channel));

        let mut instrument = Instrument::new(is_noise_channel);
        instrument.set_type_and_reset(instrument_type);

        if let Some(preset) = int_of(field("preset")) {
            instrument.preset = preset.max(0) as usize;
        }

        instrument.volume = match float_of(field("volume")) {
            Some(percent) => clamp_usize(0, VOLUME_RANGE as usize, (5.0 - percent.trunc() / 20.0).round() as i64) as i32,
            None => 0,
        };

        let transition_name = str_of(field("transition")).or_else(|| str_of(field("envelope")));
        instrument.transition = transition_name
            .and_then(|name| legacy_transition(name).or_else(|| index_by_name(&TRANSITIONS, name, |t| t.name)))
            .unwrap_or(1);

        instrument.effects = named_index(&EFFECTS_NAMES, field("effects"), |&name| name)
            .unwrap_or(if instrument_type == InstrumentType::Noise { 0 } else { 1 });

        instrument.filter_cutoff = match float_of(field("filterCutoffHz")) {
            Some(hz) => {
                let steps = (FILTER_CUTOFF_RANGE - 1) as f64 + 2.0 * (hz.trunc() / FILTER_CUTOFF_MAX_HZ).log2();
                clamp_usize(0, FILTER_CUTOFF_RANGE as usize, steps.round() as i64)
            }
            None if instrument_type == InstrumentType::Chip => 6,
            None => 10,
        };
        instrument.filter_resonance = match float_of(field("filterResonance")) {
            Some(percent) => clamp_usize(
                0,
                FILTER_RESONANCE_RANGE as usize,
                ((FILTER_RESONANCE_RANGE - 1) as f64 * percent.trunc() / 100.0).round() as i64,
            ),
            None => 0,
        };
        instrument.filter_envelope = named_index(&ENVELOPES, field("filterEnvelope"), |e| e.name).unwrap_or(1);

        if let Some(name) = str_of(field("filter")) {
            let (cutoff, envelope) = legacy_filter(name);
            instrument.filter_cutoff = cutoff;
            instrument.filter_envelope = envelope;
            instrument.filter_resonance = 0;
        }

        let vibrato = || -> usize {
            if let Some(name) = str_of(field("vibrato")) {
                index_by_name(&VIBRATOS, name, |v| v.name).unwrap_or(0)
            } else if let Some(name) = str_of(field("effect")) {
                LEGACY_EFFECT_NAMES.iter().position(|&n| n == name).unwrap_or(0)
            } else {
                0
            }
        };

        match instrument_type {
            InstrumentType::Noise => {
                instrument.chip_noise = named_index(&CHIP_NOISES, field("wave"), |n| n.name).unwrap_or(1);
                instrument.chord = named_index(&CHORDS, field("chord"), |c| c.name).unwrap_or(2);
            }
            InstrumentType::Chip => {
                instrument.chip_wave = str_of(field("wave"))
                    .and_then(|name| legacy_wave(name).or_else(|| index_by_name(&CHIP_WAVES, name, |w| w.name)))
                    .unwrap_or(1);
                if let Some(name) = str_of(field("interval")) {
                    instrument.interval = index_by_name(&INTERVALS, name, |i| i.name).unwrap_or(0);
                } else if let Some(name) = str_of(field("chorus")) {
                    instrument.interval = legacy_chorus(name).unwrap_or(0);
                }
                instrument.vibrato = vibrato();
                instrument.chord = named_index(&CHORDS, field("chord"), |c| c.name).unwrap_or(2);
                if str_of(field("chorus")) == Some("custom harmony") {
                    instrument.interval = 2;
                    instrument.chord = 3;
                }
            }
            InstrumentType::Fm => {
                instrument.vibrato = vibrato();
                instrument.chord = named_index(&CHORDS, field("chord"), |c| c.name).unwrap_or(3);
                instrument.algorithm = named_index(&ALGORITHMS, field("algorithm"), |a| a.name).unwrap_or(0);
                instrument.feedback_type = named_index(&FEEDBACKS, field("feedbackType"), |f| f.name).unwrap_or(0);
                instrument.feedback_amplitude = int_of(field("feedbackAmplitude"))
                    .map_or(0, |amplitude| amplitude.clamp(0, OPERATOR_AMPLITUDE_MAX as i64) as i32);
                instrument.feedback_envelope =
                    str_of(field("feedbackEnvelope")).and_then(legacy_envelope).unwrap_or(0);

                let operators = array_of(field("operators"));
                for (index, operator) in instrument.operators.iter_mut().enumerate() {
                    let object = operators.get(index);
                    let get = |name: &str| object.and_then(|o| o.get(name));
                    operator.frequency =
                        named_index(&OPERATOR_FREQUENCIES, get("frequency"), |f| f.name).unwrap_or(0);
                    operator.amplitude = int_of(get("amplitude"))
                        .map_or(0, |amplitude| amplitude.clamp(0, OPERATOR_AMPLITUDE_MAX as i64) as i32);
                    operator.envelope = str_of(get("envelope")).and_then(legacy_envelope).unwrap_or(0);
                }
            }
        }

        instrument
    }
}

impl Song {
    /// Builds a song from a JSON document. Never fails; the result always
    /// satisfies the song invariants.
    pub fn from_json_value(object: &Value) -> Song {
        let mut song = Song::default();
        if !object.is_object() {
            debug!("JSON song is not an object; using the default song");
            return song;
        }
        let field = |name: &str| object.get(name);

        song.scale = str_of(field("scale"))
            .and_then(|name| index_by_name(&SCALES, legacy_scale(name), |s| s.name))
            .unwrap_or(SCALE_EXPERT);

        match field("key") {
            Some(Value::String(name)) => {
                if let Some(key) = parse_key_name(name) {
                    song.key = key;
                }
            }
            Some(number) => {
                if let Some(key) = int_of(Some(number)) {
                    song.key = key.rem_euclid(KEYS.len() as i64) as usize;
                }
            }
            None => {}
        }

        if let Some(tempo) = int_of(field("beatsPerMinute")) {
            song.tempo = tempo.clamp(TEMPO_MIN as i64, TEMPO_MAX as i64) as i32;
        }
        if let Some(reverb) = int_of(field("reverb")) {
            song.reverb = reverb.clamp(0, REVERB_RANGE as i64 - 1) as i32;
        }
        if let Some(beats) = int_of(field("beatsPerBar")) {
            song.beats_per_bar = beats.clamp(BEATS_PER_BAR_MIN as i64, BEATS_PER_BAR_MAX as i64) as usize;
        }

        let mut imported_steps_per_beat = 4;
        if let Some(ticks) = int_of(field("ticksPerBeat")) {
            imported_steps_per_beat = if ticks > 0 { ticks as usize } else { 4 };
            song.rhythm = RHYTHMS
                .iter()
                .position(|rhythm| rhythm.steps_per_beat == imported_steps_per_beat)
                .unwrap_or(1);
        }

        let channel_objects = array_of(field("channels"));
        let longest = |name: &str| {
            channel_objects.iter().map(|channel| array_of(channel.get(name)).len()).max().unwrap_or(0).max(1)
        };
        song.instruments_per_channel = longest("instruments").min(INSTRUMENTS_PER_CHANNEL_MAX);
        song.patterns_per_channel = longest("patterns").min(PATTERNS_PER_CHANNEL_MAX);
        song.bar_count = longest("sequence").min(BAR_COUNT_MAX);

        if let Some(intro) = int_of(field("introBars")) {
            song.loop_start = intro.clamp(0, song.bar_count as i64 - 1) as usize;
        }
        if let Some(loop_bars) = int_of(field("loopBars")) {
            song.loop_length = loop_bars.clamp(1, (song.bar_count - song.loop_start) as i64) as usize;
        }

        let mut pitch_channels = Vec::new();
        let mut noise_channels = Vec::new();
        for (channel_index, channel_object) in channel_objects.iter().enumerate() {
            let is_noise = match str_of(channel_object.get("type")) {
                Some(kind) => kind == "drum",
                None => channel_index >= 3,
            };
            let channel = song.channel_from_json(channel_object, is_noise, imported_steps_per_beat);
            if is_noise {
                noise_channels.push(channel);
            } else {
                pitch_channels.push(channel);
            }
        }
        pitch_channels.truncate(PITCH_CHANNEL_COUNT_MAX);
        noise_channels.truncate(NOISE_CHANNEL_COUNT_MAX);

        if pitch_channels.is_empty() {
            let mut channel = Channel::default();
            channel.instruments = vec![Instrument::with_defaults(false); song.instruments_per_channel];
            pitch_channels.push(channel);
        }

        song.pitch_channel_count = pitch_channels.len();
        song.noise_channel_count = noise_channels.len();
        song.channels = pitch_channels;
        song.channels.append(&mut noise_channels);
        song.sanitize();
        debug!(
            "Read JSON song: {} pitch + {} noise channels, {} bars",
            song.pitch_channel_count, song.noise_channel_count, song.bar_count
        );
        song
    }

    fn channel_from_json(&self, object: &Value, is_noise: bool, imported_steps_per_beat: usize) -> Channel {
        let mut channel = Channel::default();
        if let Some(octave) = int_of(object.get("octaveScrollBar")) {
            channel.octave = octave.clamp(0, SCROLLABLE_OCTAVES as i64) as i32;
        }

        let instrument_objects = array_of(object.get("instruments"));
        channel.instruments = (0..self.instruments_per_channel)
            .map(|index| Instrument::from_json_value(instrument_objects.get(index).unwrap_or(&Value::Null), is_noise))
            .collect();

        let pattern_objects = array_of(object.get("patterns"));
        channel.patterns = (0..self.patterns_per_channel)
            .map(|index| match pattern_objects.get(index) {
                Some(pattern_object) => self.pattern_from_json(pattern_object, is_noise, imported_steps_per_beat),
                None => Pattern::default(),
            })
            .collect();

        let sequence = array_of(object.get("sequence"));
        channel.bars = (0..self.bar_count)
            .map(|bar| {
                int_of(sequence.get(bar)).map_or(0, |value| (value.max(0) as usize).min(self.patterns_per_channel))
            })
            .collect();
        channel
    }

    fn pattern_from_json(&self, object: &Value, is_noise: bool, imported_steps_per_beat: usize) -> Pattern {
        let mut pattern = Pattern::default();
        pattern.instrument = clamp_usize(0, self.instruments_per_channel, int_of(object.get("instrument")).unwrap_or(1) - 1);

        let parts_per_bar = self.parts_per_bar() as i32;
        let max_pitch = if is_noise { DRUM_COUNT - 1 } else { MAX_PITCH };
        let mut tick_clock = 0;

        for note_object in array_of(object.get("notes")).iter().take(parts_per_bar as usize) {
            let pitch_values = array_of(note_object.get("pitches"));
            let point_values = array_of(note_object.get("points"));
            if pitch_values.is_empty() || point_values.len() < 2 {
                continue;
            }

            let mut pitches: Vec<i32> = Vec::with_capacity(MAX_CHORD_SIZE);
            for value in pitch_values {
                let pitch = int_of(Some(value)).unwrap_or(0) as i32;
                if pitches.contains(&pitch) {
                    continue;
                }
                pitches.push(pitch);
                if pitches.len() >= MAX_CHORD_SIZE {
                    break;
                }
            }

            // Point times must strictly increase and start after the previous note
            let mut pins: Vec<NotePin> = Vec::with_capacity(point_values.len());
            let mut note_start = 0;
            let mut note_clock = tick_clock;
            let mut start_interval = 0;
            for point in point_values {
                let Some(tick) = float_of(point.get("tick")) else { continue };
                let interval = int_of(point.get("pitchBend")).unwrap_or(0) as i32;
                let time = (tick * PARTS_PER_BEAT as f64 / imported_steps_per_beat as f64).round() as i32;
                let volume = match int_of(point.get("volume")) {
                    Some(percent) => ((percent * 3) as f64 / 100.0).round().clamp(0.0, 3.0) as i32,
                    None => 3,
                };
                if time > parts_per_bar {
                    continue;
                }
                if pins.is_empty() {
                    if time < note_clock {
                        continue;
                    }
                    note_start = time;
                    start_interval = interval;
                } else if time <= note_clock {
                    continue;
                }
                note_clock = time;
                pins.push(NotePin::new(interval - start_interval, time - note_start, volume));
            }
            if pins.len() < 2 {
                continue;
            }

            let mut note = Note::new(0, note_start, note_start + pins[pins.len() - 1].time, 3, false);
            note.pitches = pitches
                .into_iter()
                .map(|pitch| pitch + start_interval)
                .filter(|pitch| (0..=max_pitch).contains(pitch))
                .collect();
            if note.pitches.is_empty() {
                continue;
            }
            let lowest_pitch = note.pitches.iter().copied().min().unwrap_or(0);
            let highest_pitch = note.pitches.iter().copied().max().unwrap_or(0);

            // Keep bends inside the pitch range and drop redundant middle pins
            note.pins.clear();
            for mut pin in pins {
                pin.interval = pin.interval.max(-lowest_pitch).min(max_pitch - highest_pitch);
                let count = note.pins.len();
                if count >= 2 {
                    let previous = note.pins[count - 1];
                    let before = note.pins[count - 2];
                    if pin.interval == previous.interval
                        && pin.interval == before.interval
                        && pin.volume == previous.volume
                        && pin.volume == before.volume
                    {
                        note.pins.pop();
                    }
                }
                note.pins.push(pin);
            }

            tick_clock = note.end;
            pattern.notes.push(note);
        }
        pattern
    }
}

// ============================================================================
// UNIT TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_writer_layout() {
        let song = Song::default();
        let value = song.to_json_value(true, 2, true);
        assert_eq!(value["format"], "BeepBox");
        assert_eq!(value["version"], 7);
        assert_eq!(value["scale"], "easy :)");
        assert_eq!(value["key"], "C");
        assert_eq!(value["beatsPerMinute"], 150);
        assert_eq!(value["ticksPerBeat"], 4);
        assert_eq!(value["channels"][3]["type"], "drum");
        assert_eq!(value["channels"][0]["instruments"][0]["wave"], "square");
        assert_eq!(value["channels"][0]["instruments"][0]["filterCutoffHz"], 2000);
        // Intro (0 bars) + loop twice (4 bars each) + outro (12 bars)
        assert_eq!(value["channels"][0]["sequence"].as_array().map(Vec::len), Some(20));
    }

    #[test]
    fn test_round_trip_through_json() {
        let mut song = Song::default();
        song.tempo = 97;
        song.key = 10;
        song.scale = 3;
        song.reverb = 3;
        song.channels[0].instruments[0].set_type_and_reset(InstrumentType::Fm);
        song.channels[0].instruments[0].algorithm = 5;
        song.channels[0].instruments[0].operators[1].frequency = 4;
        song.channels[1].instruments[0].chip_wave = 7;
        song.channels[1].instruments[0].filter_resonance = 7;
        song.channels[1].instruments[0].volume = 3;
        let mut note = Note::new(40, 12, 60, 3, false);
        note.pitches.push(44);
        note.pins.insert(1, NotePin::new(2, 24, 2));
        song.channels[1].patterns[0].notes.push(note.clone());
        song.channels[1].bars[6] = 1;

        let text = song.to_json_value(true, 1, true).to_string();
        let decoded = Song::parse(&text).expect("valid JSON");

        assert_eq!(decoded.tempo, 97);
        assert_eq!(decoded.key, 10);
        assert_eq!(decoded.scale, 3);
        assert_eq!(decoded.reverb, 3);
        assert_eq!(decoded.channels[0].instruments[0], song.channels[0].instruments[0]);
        assert_eq!(decoded.channels[1].instruments[0].chip_wave, 7);
        assert_eq!(decoded.channels[1].instruments[0].filter_resonance, 7);
        assert_eq!(decoded.channels[1].instruments[0].volume, 3);
        assert_eq!(decoded.channels[1].patterns[0].notes, vec![note]);
        assert_eq!(decoded.channels[1].bars, song.channels[1].bars);
        assert!(decoded.check_invariants());
    }

    #[test]
    fn test_reader_legacy_names_and_defaults() {
        let value = json!({
            "scale": "romani :)",
            "key": "f#",
            "channels": [
                {
                    "instruments": [{ "type": "chip", "wave": "pulse wide", "filter": "decay sharp", "chorus": "fifths", "effect": "vibrato heavy" }],
                    "patterns": [],
                    "sequence": [0, 0, 0]
                },
                { "type": "drum", "instruments": [{ "wave": "buzz" }] }
            ]
        });
        let song = Song::from_json_value(&value);
        assert_eq!(SCALES[song.scale].name, "dbl harmonic :)");
        assert_eq!(song.key, 6);
        assert_eq!(song.bar_count, 3);
        assert_eq!((song.pitch_channel_count, song.noise_channel_count), (1, 1));

        let chip = &song.channels[0].instruments[0];
        assert_eq!(chip.chip_wave, 3);
        assert_eq!((chip.filter_cutoff, chip.filter_envelope), (8, 18));
        assert_eq!(chip.interval, 5);
        assert_eq!(chip.vibrato, 3);

        let drum = &song.channels[1].instruments[0];
        assert_eq!(drum.instrument_type, InstrumentType::Noise);
        assert_eq!(drum.chip_noise, 3);
    }

    #[test]
    fn test_reader_cleans_notes() {
        let value = json!({
            "ticksPerBeat": 4,
            "beatsPerBar": 4,
            "channels": [{
                "type": "pitch",
                "patterns": [{
                    "instrument": 1,
                    "notes": [
                        { "pitches": [30, 30, 34, 37, 41, 44], "points": [
                            { "tick": 0, "pitchBend": 0, "volume": 100 },
                            { "tick": 1, "pitchBend": 0, "volume": 100 },
                            { "tick": 2, "pitchBend": 0, "volume": 100 },
                            { "tick": 2, "pitchBend": 5, "volume": 100 },
                            { "tick": 3, "pitchBend": 0, "volume": 0 }
                        ]},
                        { "pitches": [50], "points": [{ "tick": 1, "volume": 100 }, { "tick": 6 }] },
                        { "pitches": [], "points": [{ "tick": 8 }, { "tick": 9 }] }
                    ]
                }],
                "sequence": [1]
            }]
        });
        let song = Song::from_json_value(&value);
        let notes = &song.channels[0].patterns[0].notes;
        // Overlapping and empty notes are dropped
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].pitches, vec![30, 34, 37, 41]);
        // The repeated tick and the redundant middle pin are gone
        assert_eq!(notes[0].pins, vec![NotePin::new(0, 0, 3), NotePin::new(0, 12, 3), NotePin::new(0, 18, 0)]);
        assert_eq!((notes[0].start, notes[0].end), (0, 18));
    }

    #[test]
    fn test_non_object_gives_default_song() {
        assert_eq!(Song::from_json_value(&json!([1, 2, 3])), Song::default());
        assert!(matches!(Song::parse("{not json"), Err(crate::error::SongError::Json(_))));
    }
}
