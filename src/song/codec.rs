// ============================================================================
// CODEC.RS - Compact Song String Format
// ============================================================================
//
// A song string is a version digit followed by tagged fields. Each tag is one
// ASCII letter; what follows depends on the tag:
//
//   n  pitch + noise channel counts (2 digits)
//   s  scale            k  key              r  rhythm
//   l  loop start       e  loop length - 1  (2 digits each since v5)
//   t  tempo (2 digits since v7)            m  reverb
//   a  beats per bar - 1                    g  bar count - 1 (2 digits)
//   j  patterns per channel - 1             i  instruments per channel - 1
//   o  channel octaves (one digit per channel)
//   T  start next instrument (type digit), then its settings:
//      v volume, u preset, q effects, d transition, f cutoff, y resonance,
//      z filter envelope, C chord, w wave/noise, c vibrato, h interval,
//      A algorithm, F feedback type, B feedback amplitude,
//      V feedback envelope, Q/P/E operator frequencies/amplitudes/envelopes
//   b  bar table (bit packed)
//   p  patterns and notes (bit packed, length prefixed)
//
// NOTE ENCODING:
// Notes are written as "shapes" (pitch count, pin count, pin timing, pin
// volumes, which pins bend) plus pitches. The last 10 shapes and the last 8
// pitches are remembered; a repeat costs a few bits. New pitches are written
// as a signed step count that skips over the recently used ones.
//
// VERSION HISTORY (what older strings need on the way in):
// - v2: single instrument; tags carry an explicit channel digit; fixed tempo,
//       beat and filter tables; bars are 3-bit values; no rest/note flag for
//       empty patterns; "expert" scale was index 10
// - v3: per-channel loops over instruments replace the channel digit
// - v4: 15-step tempo table
// - v5: two-digit loop bounds; bar value 0 means "no pattern"
// - v6: one settings block per instrument (the T tag)
// - v7: tempo in BPM, key counted upward, wave indices include "rounded",
//       filter cutoff/resonance/envelope split, durations in parts
//
// Decoding never fails on malformed data: every value is clamped and the
// result is passed through `Song::sanitize`.
// ============================================================================

use std::path::Path;

use tracing::{debug, warn};

use super::bits::{BitFieldReader, BitFieldWriter, char_to_int, int_to_char};
use super::{Channel, Instrument, InstrumentType, Note, NotePin, Pattern, Song};
use crate::config::{
    ALGORITHMS, BAR_COUNT_MAX, BAR_COUNT_MIN, BEATS_PER_BAR_MAX, BEATS_PER_BAR_MIN, CHIP_NOISES, CHIP_WAVES, CHORDS,
    EFFECTS_NAMES, ENVELOPES, FEEDBACKS, FILTER_CUTOFF_RANGE, FILTER_RESONANCE_RANGE, INSTRUMENTS_PER_CHANNEL_MAX,
    INSTRUMENTS_PER_CHANNEL_MIN, INTERVALS, KEYS, LEGACY_WAVES, MAX_CHORD_SIZE, MAX_PITCH, NOISE_CHANNEL_COUNT_MAX,
    NOISE_CHANNEL_COUNT_MIN, OPERATOR_AMPLITUDE_MAX, OPERATOR_COUNT, OPERATOR_FREQUENCIES, PARTS_PER_BEAT,
    PATTERNS_PER_CHANNEL_MAX, PITCH_CHANNEL_COUNT_MAX, PITCH_CHANNEL_COUNT_MIN, REVERB_RANGE, RHYTHMS,
    SCALE_EXPERT, SCALES, SCROLLABLE_OCTAVES, TEMPO_MAX, TEMPO_MIN, TRANSITIONS, VIBRATOS, VOLUME_RANGE,
};
use crate::error::SongError;
use crate::helper::clamp_usize;

pub const OLDEST_VERSION: u32 = 2;
pub const LATEST_VERSION: u32 = 7;

/// Remembered note shapes
const RECENT_SHAPE_COUNT: usize = 10;

/// Remembered pitches
const RECENT_PITCH_COUNT: usize = 8;

// ---- Tag letters ----
mod tag {
    pub const BEAT_COUNT: u8 = b'a';
    pub const BARS: u8 = b'b';
    pub const VIBRATO: u8 = b'c';
    pub const TRANSITION: u8 = b'd';
    pub const LOOP_END: u8 = b'e';
    pub const FILTER_CUTOFF: u8 = b'f';
    pub const BAR_COUNT: u8 = b'g';
    pub const INTERVAL: u8 = b'h';
    pub const INSTRUMENT_COUNT: u8 = b'i';
    pub const PATTERN_COUNT: u8 = b'j';
    pub const KEY: u8 = b'k';
    pub const LOOP_START: u8 = b'l';
    pub const REVERB: u8 = b'm';
    pub const CHANNEL_COUNT: u8 = b'n';
    pub const CHANNEL_OCTAVE: u8 = b'o';
    pub const PATTERNS: u8 = b'p';
    pub const EFFECTS: u8 = b'q';
    pub const RHYTHM: u8 = b'r';
    pub const SCALE: u8 = b's';
    pub const TEMPO: u8 = b't';
    pub const PRESET: u8 = b'u';
    pub const VOLUME: u8 = b'v';
    pub const WAVE: u8 = b'w';
    pub const FILTER_RESONANCE: u8 = b'y';
    pub const FILTER_ENVELOPE: u8 = b'z';
    pub const ALGORITHM: u8 = b'A';
    pub const FEEDBACK_AMPLITUDE: u8 = b'B';
    pub const CHORD: u8 = b'C';
    pub const OPERATOR_ENVELOPES: u8 = b'E';
    pub const FEEDBACK_TYPE: u8 = b'F';
    pub const PAN: u8 = b'L';
    pub const OPERATOR_AMPLITUDES: u8 = b'P';
    pub const OPERATOR_FREQUENCIES: u8 = b'Q';
    pub const START_INSTRUMENT: u8 = b'T';
    pub const FEEDBACK_ENVELOPE: u8 = b'V';
}

// ---- Legacy lookup tables ----
const LEGACY_TEMPOS_V2: [i32; 4] = [95, 120, 151, 190];
const LEGACY_TEMPOS_V4: [i32; 15] = [88, 95, 103, 111, 120, 130, 140, 151, 163, 176, 190, 206, 222, 240, 259];
const LEGACY_BEATS_V2: [usize; 5] = [6, 7, 8, 9, 10];
const LEGACY_FILTER_TO_CUTOFF: [usize; 7] = [10, 6, 3, 0, 8, 5, 2];
const LEGACY_FILTER_TO_ENVELOPE: [usize; 7] = [1, 1, 1, 1, 18, 19, 20];
const LEGACY_FILTERS_V2: [usize; 4] = [1, 3, 4, 5];
const LEGACY_EFFECT_VIBRATOS_V2: [usize; 4] = [0, 3, 2, 0];
const LEGACY_EFFECT_ENVELOPES_V2: [usize; 4] = [1, 1, 1, 13];
const LEGACY_EFFECT_VIBRATOS: [usize; 6] = [0, 1, 2, 3, 0, 0];
const LEGACY_EFFECT_ENVELOPES: [usize; 6] = [1, 1, 1, 1, 16, 13];

/// Old interval value that meant "custom harmony"
const LEGACY_CUSTOM_HARMONY_INTERVAL: u32 = 8;

/// Old volume value that meant "mute"
const LEGACY_MUTE_VOLUME: i32 = 5;

// ============================================================================
// PUBLIC ENTRY POINTS
// ============================================================================

impl Song {
    /// Decodes a song string or JSON document. Unsupported or empty input
    /// yields the default song.
    pub fn from_base64(text: &str) -> Song {
        match decode(text) {
            Ok(song) => song,
            Err(error) => {
                warn!("Falling back to the default song: {}", error);
                Song::default()
            }
        }
    }

    /// Decodes a song string or JSON document, reporting why it could not be
    /// loaded
    pub fn parse(text: &str) -> Result<Song, SongError> {
        decode(text)
    }

    /// Encodes the song in the latest string format
    pub fn to_base64(&self) -> String {
        encode(self)
    }

    /// Reads a file holding a song string or a JSON document
    pub fn from_file(path: &Path) -> Result<Song, SongError> {
        let text = std::fs::read_to_string(path)?;
        decode(&text)
    }
}

/// Where the song data starts: skips leading whitespace and a URL '#'
fn payload_start(source: &[u8]) -> usize {
    let mut index = source.iter().position(|&c| c > b' ').unwrap_or(source.len());
    if source.get(index) == Some(&b'#') {
        index += 1;
    }
    index
}

pub fn decode(text: &str) -> Result<Song, SongError> {
    let source = text.as_bytes();
    let start = payload_start(source);
    if start >= source.len() {
        return Err(SongError::Empty);
    }

    if source[start] == b'{' {
        let value: serde_json::Value = serde_json::from_str(&text[start..])?;
        return Ok(Song::from_json_value(&value));
    }

    let version = char_to_int(source[start]);
    if !(OLDEST_VERSION..=LATEST_VERSION).contains(&version) {
        return Err(SongError::UnsupportedVersion { found: version, oldest: OLDEST_VERSION, latest: LATEST_VERSION });
    }

    let mut decoder = Decoder::new(source, start + 1, version);
    decoder.run();
    let mut song = decoder.song;
    song.sanitize();
    debug!(
        "Decoded v{} song: {} channels, {} bars, {} notes",
        version,
        song.channel_count(),
        song.bar_count,
        song.note_count()
    );
    Ok(song)
}

// ============================================================================
// DECODER
// ============================================================================

/// One remembered note shape
#[derive(Clone)]
struct NoteShape {
    pitch_count: usize,
    bend_count: usize,
    initial_volume: i32,
    length: i32,
    pins: Vec<ShapePin>,
}

#[derive(Clone, Copy)]
struct ShapePin {
    pitch_bend: bool,
    time: i32,
    volume: i32,
}

struct Decoder<'a> {
    source: &'a [u8],
    index: usize,
    song: Song,

    before_three: bool,
    before_four: bool,
    before_five: bool,
    before_six: bool,
    before_seven: bool,

    /// Target of instrument settings tags (v6 and later)
    instrument_channel: usize,
    instrument_index: Option<usize>,
}

impl<'a> Decoder<'a> {
    fn new(source: &'a [u8], index: usize, version: u32) -> Self {
        let before_three = version < 3;
        let before_six = version < 6;

        let mut song = Song::default();
        song.init_to_default(before_six);

        if before_three {
            // The first format only knew seamless transitions and retro drums
            for channel in song.channels.iter_mut() {
                channel.instruments[0].transition = 0;
            }
            song.channels[3].instruments[0].chip_noise = 0;
        }

        Self {
            source,
            index,
            song,
            before_three,
            before_four: version < 4,
            before_five: version < 5,
            before_six,
            before_seven: version < 7,
            instrument_channel: 0,
            instrument_index: None,
        }
    }

    // ---- Character access ----

    /// Next digit value; 0 past the end
    fn next(&mut self) -> u32 {
        let value = self.source.get(self.index).map_or(0, |&c| char_to_int(c));
        self.index += 1;
        value
    }

    fn next_i64(&mut self) -> i64 {
        self.next() as i64
    }

    /// Two digits as a 12-bit value
    fn next_pair(&mut self) -> u32 {
        let high = self.next();
        let low = self.next();
        (high << 6) | low
    }

    /// A channel digit from a v2 tag, clamped to an existing channel
    fn next_channel(&mut self) -> usize {
        clamp_usize(0, self.song.channel_count(), self.next_i64())
    }

    /// The instrument the current v6+ settings block belongs to
    fn current_instrument(&mut self) -> Option<&mut Instrument> {
        let index = self.instrument_index?;
        self.song.channels.get_mut(self.instrument_channel)?.instruments.get_mut(index)
    }

    /// Applies `apply` to every instrument in channel-major order, for the
    /// v3..v5 tags that carry one digit per instrument
    fn for_each_instrument(&mut self, mut apply: impl FnMut(&mut Self, usize, usize)) {
        for channel in 0..self.song.channel_count() {
            for instrument in 0..self.song.instruments_per_channel {
                apply(self, channel, instrument);
            }
        }
    }

    fn instrument_at(&mut self, channel: usize, instrument: usize) -> Option<&mut Instrument> {
        self.song.channels.get_mut(channel)?.instruments.get_mut(instrument)
    }

    // ---- Main loop ----

    fn run(&mut self) {
        while self.index < self.source.len() {
            let command = self.source[self.index];
            self.index += 1;
            match command {
                tag::CHANNEL_COUNT => self.read_channel_count(),
                tag::SCALE => {
                    let mut scale = self.next() as usize;
                    if self.before_three && scale == 10 {
                        scale = SCALE_EXPERT;
                    }
                    self.song.scale = scale.min(SCALES.len() - 1);
                }
                tag::KEY => {
                    let raw = self.next_i64();
                    let key = if self.before_seven { 11 - raw } else { raw };
                    self.song.key = clamp_usize(0, KEYS.len(), key);
                }
                tag::LOOP_START => {
                    self.song.loop_start = (if self.before_five { self.next() } else { self.next_pair() }) as usize;
                }
                tag::LOOP_END => {
                    self.song.loop_length =
                        if self.before_five { self.next() as usize } else { self.next_pair() as usize + 1 };
                }
                tag::TEMPO => self.read_tempo(),
                tag::REVERB => {
                    self.song.reverb = clamp_usize(0, REVERB_RANGE as usize, self.next_i64()) as i32;
                }
                tag::BEAT_COUNT => {
                    let raw = self.next() as usize;
                    let beats = if self.before_three { LEGACY_BEATS_V2.get(raw).copied().unwrap_or(8) } else { raw + 1 };
                    self.song.beats_per_bar = beats.clamp(BEATS_PER_BAR_MIN, BEATS_PER_BAR_MAX);
                }
                tag::BAR_COUNT => {
                    let bar_count = (self.next_pair() as usize + 1).clamp(BAR_COUNT_MIN, BAR_COUNT_MAX);
                    self.song.bar_count = bar_count;
                    for channel in self.song.channels.iter_mut() {
                        channel.bars.resize(bar_count, 1);
                    }
                    self.resync_channels();
                }
                tag::PATTERN_COUNT => {
                    let pattern_count = (self.next() as usize + 1).clamp(1, PATTERNS_PER_CHANNEL_MAX);
                    self.song.patterns_per_channel = pattern_count;
                    self.resync_channels();
                }
                tag::INSTRUMENT_COUNT => self.read_instrument_count(),
                tag::RHYTHM => {
                    self.song.rhythm = clamp_usize(0, RHYTHMS.len(), self.next_i64());
                }
                tag::CHANNEL_OCTAVE => self.read_octaves(),
                tag::START_INSTRUMENT => self.start_instrument(),
                tag::PRESET => {
                    let preset = self.next_pair() as usize;
                    if let Some(instrument) = self.current_instrument() {
                        instrument.preset = preset;
                    }
                }
                tag::WAVE => self.read_wave(),
                tag::FILTER_CUTOFF => self.read_filter_cutoff(),
                tag::FILTER_RESONANCE => {
                    let value = clamp_usize(0, FILTER_RESONANCE_RANGE as usize, self.next_i64());
                    if let Some(instrument) = self.current_instrument() {
                        instrument.filter_resonance = value;
                    }
                }
                tag::FILTER_ENVELOPE => {
                    let value = clamp_usize(0, ENVELOPES.len(), self.next_i64());
                    if let Some(instrument) = self.current_instrument() {
                        instrument.filter_envelope = value;
                    }
                }
                tag::TRANSITION => self.read_transition(),
                tag::VIBRATO => self.read_vibrato(),
                tag::INTERVAL => self.read_interval(),
                tag::CHORD => {
                    let value = clamp_usize(0, CHORDS.len(), self.next_i64());
                    if let Some(instrument) = self.current_instrument() {
                        instrument.chord = value;
                    }
                }
                tag::EFFECTS => {
                    let value = clamp_usize(0, EFFECTS_NAMES.len(), self.next_i64());
                    if let Some(instrument) = self.current_instrument() {
                        instrument.effects = value;
                    }
                }
                tag::VOLUME => self.read_volume(),
                tag::PAN => {
                    // Output is mono; stereo placement is dropped
                    self.next();
                }
                tag::ALGORITHM => {
                    let value = clamp_usize(0, ALGORITHMS.len(), self.next_i64());
                    if let Some(instrument) = self.current_instrument() {
                        instrument.algorithm = value;
                    }
                }
                tag::FEEDBACK_TYPE => {
                    let value = clamp_usize(0, FEEDBACKS.len(), self.next_i64());
                    if let Some(instrument) = self.current_instrument() {
                        instrument.feedback_type = value;
                    }
                }
                tag::FEEDBACK_AMPLITUDE => {
                    let value = clamp_usize(0, OPERATOR_AMPLITUDE_MAX as usize + 1, self.next_i64()) as i32;
                    if let Some(instrument) = self.current_instrument() {
                        instrument.feedback_amplitude = value;
                    }
                }
                tag::FEEDBACK_ENVELOPE => {
                    let value = clamp_usize(0, ENVELOPES.len(), self.next_i64());
                    if let Some(instrument) = self.current_instrument() {
                        instrument.feedback_envelope = value;
                    }
                }
                tag::OPERATOR_FREQUENCIES => {
                    let values = self.next_operator_values(OPERATOR_FREQUENCIES.len());
                    if let Some(instrument) = self.current_instrument() {
                        for (operator, value) in instrument.operators.iter_mut().zip(values) {
                            operator.frequency = value;
                        }
                    }
                }
                tag::OPERATOR_AMPLITUDES => {
                    let values = self.next_operator_values(OPERATOR_AMPLITUDE_MAX as usize + 1);
                    if let Some(instrument) = self.current_instrument() {
                        for (operator, value) in instrument.operators.iter_mut().zip(values) {
                            operator.amplitude = value as i32;
                        }
                    }
                }
                tag::OPERATOR_ENVELOPES => {
                    let values = self.next_operator_values(ENVELOPES.len());
                    if let Some(instrument) = self.current_instrument() {
                        for (operator, value) in instrument.operators.iter_mut().zip(values) {
                            operator.envelope = value;
                        }
                    }
                }
                tag::BARS => self.read_bars(),
                tag::PATTERNS => self.read_patterns(),
                other => {
                    debug!("Skipping unknown song tag {:?}", other as char);
                }
            }
        }
    }

    fn next_operator_values(&mut self, limit: usize) -> [usize; OPERATOR_COUNT] {
        std::array::from_fn(|_| clamp_usize(0, limit, self.next_i64()))
    }

    // ---- Song-level tags ----

    fn read_channel_count(&mut self) {
        let pitch = self.next_i64();
        let noise = self.next_i64();
        self.song.pitch_channel_count = clamp_usize(PITCH_CHANNEL_COUNT_MIN, PITCH_CHANNEL_COUNT_MAX + 1, pitch);
        self.song.noise_channel_count = clamp_usize(NOISE_CHANNEL_COUNT_MIN, NOISE_CHANNEL_COUNT_MAX + 1, noise);
        self.resync_channels();
    }

    /// Sizes the channel list and every channel's instruments, patterns and
    /// bars to the counts read so far. Count tags can arrive in any order,
    /// so each of them calls this before later tags index into a channel.
    fn resync_channels(&mut self) {
        let channel_count = self.song.channel_count();
        let pitch_channel_count = self.song.pitch_channel_count;
        let instrument_count = self.song.instruments_per_channel;
        let pattern_count = self.song.patterns_per_channel;
        let bar_count = self.song.bar_count;

        self.song.channels.resize_with(channel_count, Channel::default);
        for (channel_index, channel) in self.song.channels.iter_mut().enumerate() {
            let is_noise = channel_index >= pitch_channel_count;
            channel.instruments.resize_with(instrument_count, || Instrument::with_defaults(is_noise));
            channel.patterns.resize_with(pattern_count, Pattern::default);
            channel.bars.resize(bar_count, 0);
        }
    }

    fn read_tempo(&mut self) {
        let tempo = if self.before_four {
            LEGACY_TEMPOS_V2.get(self.next() as usize).copied().unwrap_or(150)
        } else if self.before_seven {
            LEGACY_TEMPOS_V4.get(self.next() as usize).copied().unwrap_or(150)
        } else {
            self.next_pair() as i32
        };
        self.song.tempo = tempo.clamp(TEMPO_MIN, TEMPO_MAX);
    }

    fn read_instrument_count(&mut self) {
        let count = (self.next() as usize + 1).clamp(INSTRUMENTS_PER_CHANNEL_MIN, INSTRUMENTS_PER_CHANNEL_MAX);
        self.song.instruments_per_channel = count;
        self.resync_channels();
        if self.before_six {
            let pitch_channel_count = self.song.pitch_channel_count;
            for (channel_index, channel) in self.song.channels.iter_mut().enumerate() {
                let is_noise = channel_index >= pitch_channel_count;
                for instrument in channel.instruments.iter_mut() {
                    instrument.set_type_and_reset(InstrumentType::for_channel(is_noise));
                }
            }
        }
    }

    fn read_octaves(&mut self) {
        let octave_limit = SCROLLABLE_OCTAVES as usize + 1;
        if self.before_three {
            let channel = self.next_channel();
            let octave = clamp_usize(0, octave_limit, self.next_i64()) as i32;
            self.song.channels[channel].octave = octave;
        } else {
            for channel in 0..self.song.channel_count() {
                let octave = clamp_usize(0, octave_limit, self.next_i64()) as i32;
                self.song.channels[channel].octave = octave;
            }
        }
    }

    // ---- Instrument tags ----

    fn start_instrument(&mut self) {
        let next_index = self.instrument_index.map_or(0, |index| index + 1);
        if next_index >= self.song.instruments_per_channel {
            self.instrument_channel += 1;
            self.instrument_index = Some(0);
        } else {
            self.instrument_index = Some(next_index);
        }
        let instrument_type = InstrumentType::from_index(self.next() as usize);
        match self.current_instrument() {
            Some(instrument) => instrument.set_type_and_reset(instrument_type),
            None => debug!("Instrument block beyond the last channel ignored"),
        }
    }

    fn legacy_wave(raw: u32) -> usize {
        let wave = LEGACY_WAVES.get(raw as usize).copied().unwrap_or(0);
        wave.min(CHIP_WAVES.len() - 1)
    }

    fn read_wave(&mut self) {
        if self.before_three {
            let channel = self.next_channel();
            let wave = Self::legacy_wave(self.next());
            self.song.channels[channel].instruments[0].chip_wave = wave;
        } else if self.before_six {
            self.for_each_instrument(|decoder, channel, index| {
                let raw = decoder.next();
                let is_noise = decoder.song.channel_is_noise(channel);
                if let Some(instrument) = decoder.instrument_at(channel, index) {
                    if is_noise {
                        instrument.chip_noise = clamp_usize(0, CHIP_NOISES.len(), raw as i64);
                    } else {
                        instrument.chip_wave = Self::legacy_wave(raw);
                    }
                }
            });
        } else {
            let raw = self.next();
            let before_seven = self.before_seven;
            let is_noise = self.song.channel_is_noise(self.instrument_channel);
            if let Some(instrument) = self.current_instrument() {
                if is_noise {
                    instrument.chip_noise = clamp_usize(0, CHIP_NOISES.len(), raw as i64);
                } else if before_seven {
                    instrument.chip_wave = Self::legacy_wave(raw);
                } else {
                    instrument.chip_wave = clamp_usize(0, CHIP_WAVES.len(), raw as i64);
                }
            }
        }
    }

    /// Old songs had one combined filter setting
    fn apply_legacy_filter(instrument: &mut Instrument, legacy_filter: usize) {
        let legacy_filter = legacy_filter.min(LEGACY_FILTER_TO_CUTOFF.len() - 1);
        instrument.filter_cutoff = LEGACY_FILTER_TO_CUTOFF[legacy_filter];
        instrument.filter_envelope = LEGACY_FILTER_TO_ENVELOPE[legacy_filter];
        instrument.filter_resonance = 0;
    }

    fn read_filter_cutoff(&mut self) {
        let filter_count = LEGACY_FILTER_TO_CUTOFF.len();
        if self.before_three {
            let channel = self.next_channel();
            let raw = clamp_usize(0, LEGACY_FILTERS_V2.len(), self.next_i64());
            Self::apply_legacy_filter(&mut self.song.channels[channel].instruments[0], LEGACY_FILTERS_V2[raw]);
        } else if self.before_six {
            self.for_each_instrument(|decoder, channel, index| {
                // Noise channels had no filter digit
                let is_noise = decoder.song.channel_is_noise(channel);
                let legacy = if is_noise { None } else { Some(clamp_usize(0, filter_count, decoder.next_i64() + 1)) };
                if let Some(instrument) = decoder.instrument_at(channel, index) {
                    match legacy {
                        Some(legacy_filter) => Self::apply_legacy_filter(instrument, legacy_filter),
                        None => {
                            instrument.filter_cutoff = 10;
                            instrument.filter_envelope = 1;
                            instrument.filter_resonance = 0;
                        }
                    }
                }
            });
        } else if self.before_seven {
            let legacy_filter = clamp_usize(0, filter_count, self.next_i64());
            if let Some(instrument) = self.current_instrument() {
                Self::apply_legacy_filter(instrument, legacy_filter);
            }
        } else {
            let cutoff = clamp_usize(0, FILTER_CUTOFF_RANGE as usize, self.next_i64());
            if let Some(instrument) = self.current_instrument() {
                instrument.filter_cutoff = cutoff;
            }
        }
    }

    fn read_transition(&mut self) {
        let count = TRANSITIONS.len();
        if self.before_three {
            let channel = self.next_channel();
            let transition = clamp_usize(0, count, self.next_i64());
            self.song.channels[channel].instruments[0].transition = transition;
        } else if self.before_six {
            self.for_each_instrument(|decoder, channel, index| {
                let transition = clamp_usize(0, count, decoder.next_i64());
                if let Some(instrument) = decoder.instrument_at(channel, index) {
                    instrument.transition = transition;
                }
            });
        } else {
            let transition = clamp_usize(0, count, self.next_i64());
            if let Some(instrument) = self.current_instrument() {
                instrument.transition = transition;
            }
        }
    }

    /// Old "effects" combined vibrato with tremolo; tremolo becomes a filter
    /// envelope unless the instrument already has one
    fn apply_legacy_effect(instrument: &mut Instrument, vibrato: usize, envelope: usize) {
        instrument.vibrato = vibrato;
        if instrument.filter_envelope == 1 {
            instrument.filter_envelope = envelope;
        }
    }

    fn read_vibrato(&mut self) {
        if self.before_three {
            let channel = self.next_channel();
            let effect = clamp_usize(0, LEGACY_EFFECT_VIBRATOS_V2.len(), self.next_i64());
            Self::apply_legacy_effect(
                &mut self.song.channels[channel].instruments[0],
                LEGACY_EFFECT_VIBRATOS_V2[effect],
                LEGACY_EFFECT_ENVELOPES_V2[effect],
            );
        } else if self.before_six {
            self.for_each_instrument(|decoder, channel, index| {
                let effect = clamp_usize(0, LEGACY_EFFECT_VIBRATOS.len(), decoder.next_i64());
                if let Some(instrument) = decoder.instrument_at(channel, index) {
                    Self::apply_legacy_effect(
                        instrument,
                        LEGACY_EFFECT_VIBRATOS[effect],
                        LEGACY_EFFECT_ENVELOPES[effect],
                    );
                }
            });
        } else if self.before_seven {
            let effect = clamp_usize(0, LEGACY_EFFECT_VIBRATOS.len(), self.next_i64());
            if let Some(instrument) = self.current_instrument() {
                Self::apply_legacy_effect(instrument, LEGACY_EFFECT_VIBRATOS[effect], LEGACY_EFFECT_ENVELOPES[effect]);
            }
        } else {
            let vibrato = clamp_usize(0, VIBRATOS.len(), self.next_i64());
            if let Some(instrument) = self.current_instrument() {
                instrument.vibrato = vibrato;
            }
        }
    }

    /// The old "custom harmony" interval became "hum" plus the custom
    /// interval chord mode
    fn apply_legacy_interval(instrument: &mut Instrument, raw: u32) {
        if raw == LEGACY_CUSTOM_HARMONY_INTERVAL {
            instrument.interval = 2;
            instrument.chord = 3;
        } else {
            instrument.interval = clamp_usize(0, INTERVALS.len(), raw as i64);
        }
    }

    fn read_interval(&mut self) {
        if self.before_three {
            let channel = self.next_channel();
            let interval = clamp_usize(0, INTERVALS.len(), self.next_i64());
            self.song.channels[channel].instruments[0].interval = interval;
        } else if self.before_six {
            self.for_each_instrument(|decoder, channel, index| {
                let raw = decoder.next();
                if let Some(instrument) = decoder.instrument_at(channel, index) {
                    Self::apply_legacy_interval(instrument, raw);
                }
            });
        } else if self.before_seven {
            let raw = self.next();
            if let Some(instrument) = self.current_instrument() {
                Self::apply_legacy_interval(instrument, raw);
            }
        } else {
            let interval = clamp_usize(0, INTERVALS.len(), self.next_i64());
            if let Some(instrument) = self.current_instrument() {
                instrument.interval = interval;
            }
        }
    }

    fn read_volume(&mut self) {
        let legacy = self.before_seven;
        let convert = move |raw: i64| {
            let volume = clamp_usize(0, VOLUME_RANGE as usize, raw) as i32;
            if legacy && volume == LEGACY_MUTE_VOLUME { VOLUME_RANGE - 1 } else { volume }
        };
        if self.before_three {
            let channel = self.next_channel();
            let volume = convert(self.next_i64());
            self.song.channels[channel].instruments[0].volume = volume;
        } else if self.before_six {
            self.for_each_instrument(|decoder, channel, index| {
                let volume = convert(decoder.next_i64());
                if let Some(instrument) = decoder.instrument_at(channel, index) {
                    instrument.volume = volume;
                }
            });
        } else {
            let volume = convert(self.next_i64());
            if let Some(instrument) = self.current_instrument() {
                instrument.volume = volume;
            }
        }
    }

    // ---- Bar table ----

    fn read_bars(&mut self) {
        let channel_count = self.song.channel_count();
        let bar_count = self.song.bar_count;
        let pattern_count = self.song.patterns_per_channel;

        if self.before_three {
            let channel = self.next_channel();
            let stored_bars = self.next() as usize;
            let length = stored_bars.div_ceil(2);
            let mut bits = BitFieldReader::new(self.source, self.index, self.index + length);
            let bars = &mut self.song.channels[channel].bars;
            for bar in 0..stored_bars {
                let value = bits.read(3) as usize + 1;
                if let Some(slot) = bars.get_mut(bar) {
                    *slot = value;
                }
            }
            self.index += length;
            return;
        }

        // Before v5 every bar referenced a pattern, so values were stored minus one
        let offset = if self.before_five { 1 } else { 0 };
        let mut needed_bits = 0;
        while (1usize << needed_bits) < pattern_count + 1 - offset {
            needed_bits += 1;
        }
        let length = (channel_count * bar_count * needed_bits).div_ceil(6);
        let mut bits = BitFieldReader::new(self.source, self.index, self.index + length);
        for channel in self.song.channels.iter_mut() {
            for bar in channel.bars.iter_mut() {
                *bar = bits.read(needed_bits as u32) as usize + offset;
            }
        }
        self.index += length;
    }

    // ---- Notes and patterns ----

    fn read_patterns(&mut self) {
        let mut channel;
        let mut length = 0usize;
        if self.before_three {
            channel = self.next_channel();
            // Old strings stored the channel's pattern count here
            self.next();
            length = self.next_pair() as usize;
        } else {
            channel = 0;
            // At most five length digits (30 bits)
            let digit_count = (self.next() as usize).min(5);
            for _ in 0..digit_count {
                length = (length << 6) + self.next() as usize;
            }
        }

        let mut bits = BitFieldReader::new(self.source, self.index, self.index + length);
        self.index += length;

        let mut needed_instrument_bits = 0;
        while (1usize << needed_instrument_bits) < self.song.instruments_per_channel {
            needed_instrument_bits += 1;
        }

        loop {
            self.read_channel_patterns(channel, &mut bits, needed_instrument_bits);
            if self.before_three {
                break;
            }
            channel += 1;
            if channel >= self.song.channel_count() {
                break;
            }
        }
    }

    /// Length of a rest, pin or note segment in parts
    fn read_duration(&self, bits: &mut BitFieldReader) -> i32 {
        if self.before_seven {
            let steps_per_beat = RHYTHMS[self.song.rhythm.min(RHYTHMS.len() - 1)].steps_per_beat as i32;
            bits.read_legacy_part_duration().saturating_mul(PARTS_PER_BEAT as i32 / steps_per_beat)
        } else {
            bits.read_part_duration()
        }
    }

    fn read_channel_patterns(&mut self, channel: usize, bits: &mut BitFieldReader, needed_instrument_bits: u32) {
        let is_noise = self.song.channel_is_noise(channel);
        let octave_offset = if is_noise { 0 } else { self.song.channels[channel].octave * 12 };
        let mut last_pitch = if is_noise { 4 } else { 12 } + octave_offset;
        let initial_pitches: &[i32] = if is_noise { &[4, 6, 7, 2, 3, 8, 0, 10] } else { &[12, 19, 24, 31, 36, 7, 0] };
        let mut recent_pitches: Vec<i32> = initial_pitches.iter().map(|pitch| pitch + octave_offset).collect();
        let mut recent_shapes: Vec<NoteShape> = Vec::with_capacity(RECENT_SHAPE_COUNT + 1);
        let parts_per_bar = self.song.parts_per_bar() as i32;

        for pattern_index in 0..self.song.patterns_per_channel {
            let mut notes = Vec::new();
            let instrument = bits.read(needed_instrument_bits) as usize;

            let has_notes = self.before_three || bits.read(1) == 1;
            let mut cur_part = 0;
            while has_notes && cur_part < parts_per_bar {
                let use_old_shape = bits.read(1) == 1;
                let mut shape_index = 0;
                let mut is_new_note = false;
                if use_old_shape {
                    shape_index = bits.read_long_tail(0, 0) as usize;
                } else {
                    is_new_note = bits.read(1) == 1;
                }

                if !use_old_shape && !is_new_note {
                    cur_part = cur_part.saturating_add(self.read_duration(bits));
                    continue;
                }

                let shape = if use_old_shape {
                    if shape_index >= recent_shapes.len() {
                        debug!("Note shape reference out of range; pattern truncated");
                        break;
                    }
                    recent_shapes.remove(shape_index)
                } else {
                    self.read_shape(bits, parts_per_bar)
                };
                recent_shapes.insert(0, shape.clone());
                recent_shapes.truncate(RECENT_SHAPE_COUNT);

                let mut pitches = Vec::with_capacity(shape.pitch_count);
                let mut pitch_bends = Vec::with_capacity(shape.bend_count + 1);
                for j in 0..shape.pitch_count + shape.bend_count {
                    let pitch = if bits.read(1) == 1 {
                        let pitch_index = bits.read(3) as usize;
                        if pitch_index < recent_pitches.len() { recent_pitches.remove(pitch_index) } else { last_pitch }
                    } else {
                        let interval = bits.read_pitch_interval().clamp(-MAX_PITCH * 2, MAX_PITCH * 2);
                        step_over_recent(last_pitch, interval, &recent_pitches)
                    };

                    recent_pitches.insert(0, pitch);
                    recent_pitches.truncate(RECENT_PITCH_COUNT);

                    if j < shape.pitch_count {
                        pitches.push(pitch);
                    } else {
                        pitch_bends.push(pitch);
                    }

                    last_pitch = if j + 1 == shape.pitch_count { pitches[0] } else { pitch };
                }

                let base_pitch = pitches[0];
                let end = cur_part.saturating_add(shape.length);
                let mut note = Note::new(base_pitch, cur_part, end, shape.initial_volume, false);
                note.pitches = pitches;
                note.pins.truncate(1);
                let mut bend_iter = pitch_bends.into_iter();
                let mut current_pitch = base_pitch;
                for pin in &shape.pins {
                    if pin.pitch_bend {
                        current_pitch = bend_iter.next().unwrap_or(current_pitch);
                    }
                    note.pins.push(NotePin::new(current_pitch - base_pitch, pin.time, pin.volume));
                }

                cur_part = note.end;
                notes.push(note);
            }

            let pattern = &mut self.song.channels[channel].patterns[pattern_index];
            pattern.reset();
            pattern.instrument = instrument;
            pattern.notes = notes;
        }
    }

    fn read_shape(&self, bits: &mut BitFieldReader, parts_per_bar: i32) -> NoteShape {
        let mut pitch_count = 1;
        while pitch_count < MAX_CHORD_SIZE && bits.read(1) == 1 {
            pitch_count += 1;
        }

        // Every pin advances at least one part, so a bar cannot hold more
        let pin_count = bits.read_pin_count().min(parts_per_bar).max(0) as usize;
        let initial_volume = bits.read(2) as i32;

        let mut pins = Vec::with_capacity(pin_count);
        let mut length: i32 = 0;
        let mut bend_count = 0;
        for _ in 0..pin_count {
            let pitch_bend = bits.read(1) == 1;
            if pitch_bend {
                bend_count += 1;
            }
            length = length.saturating_add(self.read_duration(bits));
            let volume = bits.read(2) as i32;
            pins.push(ShapePin { pitch_bend, time: length, volume });
        }

        NoteShape { pitch_count, bend_count, initial_volume, length, pins }
    }
}

/// Moves `interval` steps away from `from`, skipping recently used pitches
fn step_over_recent(from: i32, interval: i32, recent_pitches: &[i32]) -> i32 {
    let mut pitch = from;
    let direction = interval.signum();
    for _ in 0..interval.abs() {
        pitch += direction;
        while recent_pitches.contains(&pitch) {
            pitch += direction;
        }
    }
    pitch
}

/// Counts the not-recently-used pitches between `from` and `to`; inverse of
/// `step_over_recent`
fn count_steps(from: i32, to: i32, recent_pitches: &[i32]) -> i32 {
    let direction = (to - from).signum();
    let mut interval = 0;
    let mut pitch = from;
    while pitch != to {
        pitch += direction;
        if !recent_pitches.contains(&pitch) {
            interval += direction;
        }
    }
    interval
}

// ============================================================================
// ENCODER
// ============================================================================

/// Notes the format can represent: at least one pitch, a zero first pin,
/// strictly increasing pin times ending at the note length, inside the bar
/// and after the previous note
fn is_encodable(note: &Note, cur_part: i32, parts_per_bar: i32) -> bool {
    !note.pitches.is_empty()
        && note.pins.len() >= 2
        && note.pins[0].time == 0
        && note.pins.windows(2).all(|pair| pair[1].time > pair[0].time)
        && note.last_pin().time == note.length()
        && note.start >= cur_part
        && note.end <= parts_per_bar
}

pub fn encode(song: &Song) -> String {
    let mut buffer: Vec<u8> = Vec::with_capacity(1024);
    let digit = |value: usize| int_to_char(value);

    buffer.push(digit(LATEST_VERSION as usize));
    buffer.extend([tag::CHANNEL_COUNT, digit(song.pitch_channel_count), digit(song.noise_channel_count)]);
    buffer.extend([tag::SCALE, digit(song.scale)]);
    buffer.extend([tag::KEY, digit(song.key)]);
    buffer.extend([tag::LOOP_START, digit(song.loop_start >> 6), digit(song.loop_start & 0x3f)]);
    let loop_end = song.loop_length.saturating_sub(1);
    buffer.extend([tag::LOOP_END, digit(loop_end >> 6), digit(loop_end & 0x3f)]);
    let tempo = song.tempo.max(0) as usize;
    buffer.extend([tag::TEMPO, digit(tempo >> 6), digit(tempo & 0x3f)]);
    buffer.extend([tag::REVERB, digit(song.reverb.max(0) as usize)]);
    buffer.extend([tag::BEAT_COUNT, digit(song.beats_per_bar.saturating_sub(1))]);
    let bar_count = song.bar_count.saturating_sub(1);
    buffer.extend([tag::BAR_COUNT, digit(bar_count >> 6), digit(bar_count & 0x3f)]);
    buffer.extend([tag::PATTERN_COUNT, digit(song.patterns_per_channel.saturating_sub(1))]);
    buffer.extend([tag::INSTRUMENT_COUNT, digit(song.instruments_per_channel.saturating_sub(1))]);
    buffer.extend([tag::RHYTHM, digit(song.rhythm)]);

    buffer.push(tag::CHANNEL_OCTAVE);
    for channel in &song.channels {
        buffer.push(digit(channel.octave.max(0) as usize));
    }

    for channel in &song.channels {
        for instrument in channel.instruments.iter().take(song.instruments_per_channel) {
            encode_instrument(instrument, &mut buffer);
        }
    }

    // ---- Bars ----
    buffer.push(tag::BARS);
    let mut bits = BitFieldWriter::new();
    let mut needed_bits = 0;
    while (1usize << needed_bits) < song.patterns_per_channel + 1 {
        needed_bits += 1;
    }
    for channel in &song.channels {
        for &bar in &channel.bars {
            bits.write(needed_bits, bar as u32);
        }
    }
    bits.encode_base64(&mut buffer);

    // ---- Patterns ----
    buffer.push(tag::PATTERNS);
    let mut bits = BitFieldWriter::new();
    let mut needed_instrument_bits = 0;
    while (1usize << needed_instrument_bits) < song.instruments_per_channel {
        needed_instrument_bits += 1;
    }
    for channel_index in 0..song.channel_count() {
        encode_channel_patterns(song, channel_index, needed_instrument_bits, &mut bits);
    }

    let mut string_length = bits.length_base64();
    let mut length_digits = Vec::new();
    while string_length > 0 {
        length_digits.insert(0, digit(string_length & 0x3f));
        string_length >>= 6;
    }
    buffer.push(digit(length_digits.len()));
    buffer.extend(length_digits);
    bits.encode_base64(&mut buffer);

    // Every byte comes from the base64 alphabet or the ASCII tag letters
    String::from_utf8_lossy(&buffer).into_owned()
}

fn encode_instrument(instrument: &Instrument, buffer: &mut Vec<u8>) {
    let digit = |value: usize| int_to_char(value);

    buffer.extend([tag::START_INSTRUMENT, digit(instrument.instrument_type.index())]);
    buffer.extend([tag::VOLUME, digit(instrument.volume.max(0) as usize)]);
    buffer.extend([tag::PRESET, digit(instrument.preset >> 6), digit(instrument.preset & 0x3f)]);
    buffer.extend([tag::EFFECTS, digit(instrument.effects)]);

    buffer.extend([tag::TRANSITION, digit(instrument.transition)]);
    buffer.extend([tag::FILTER_CUTOFF, digit(instrument.filter_cutoff)]);
    buffer.extend([tag::FILTER_RESONANCE, digit(instrument.filter_resonance)]);
    buffer.extend([tag::FILTER_ENVELOPE, digit(instrument.filter_envelope)]);
    buffer.extend([tag::CHORD, digit(instrument.chord)]);

    match instrument.instrument_type {
        InstrumentType::Chip => {
            buffer.extend([tag::WAVE, digit(instrument.chip_wave)]);
            buffer.extend([tag::VIBRATO, digit(instrument.vibrato)]);
            buffer.extend([tag::INTERVAL, digit(instrument.interval)]);
        }
        InstrumentType::Fm => {
            buffer.extend([tag::VIBRATO, digit(instrument.vibrato)]);
            buffer.extend([tag::ALGORITHM, digit(instrument.algorithm)]);
            buffer.extend([tag::FEEDBACK_TYPE, digit(instrument.feedback_type)]);
            buffer.extend([tag::FEEDBACK_AMPLITUDE, digit(instrument.feedback_amplitude.max(0) as usize)]);
            buffer.extend([tag::FEEDBACK_ENVELOPE, digit(instrument.feedback_envelope)]);

            buffer.push(tag::OPERATOR_FREQUENCIES);
            buffer.extend(instrument.operators.iter().map(|operator| digit(operator.frequency)));
            buffer.push(tag::OPERATOR_AMPLITUDES);
            buffer.extend(instrument.operators.iter().map(|operator| digit(operator.amplitude.max(0) as usize)));
            buffer.push(tag::OPERATOR_ENVELOPES);
            buffer.extend(instrument.operators.iter().map(|operator| digit(operator.envelope)));
        }
        InstrumentType::Noise => {
            buffer.extend([tag::WAVE, digit(instrument.chip_noise)]);
        }
    }
}

fn encode_channel_patterns(song: &Song, channel_index: usize, needed_instrument_bits: u32, bits: &mut BitFieldWriter) {
    let channel = &song.channels[channel_index];
    let is_noise = song.channel_is_noise(channel_index);
    let octave_offset = if is_noise { 0 } else { channel.octave * 12 };
    let mut last_pitch = if is_noise { 4 } else { 12 } + octave_offset;
    let initial_pitches: &[i32] = if is_noise { &[4, 6, 7, 2, 3, 8, 0, 10] } else { &[12, 19, 24, 31, 36, 7, 0] };
    let mut recent_pitches: Vec<i32> = initial_pitches.iter().map(|pitch| pitch + octave_offset).collect();
    let mut recent_shapes: Vec<BitFieldWriter> = Vec::with_capacity(RECENT_SHAPE_COUNT + 1);
    let parts_per_bar = song.parts_per_bar() as i32;

    for pattern in channel.patterns.iter().take(song.patterns_per_channel) {
        bits.write(needed_instrument_bits, pattern.instrument as u32);

        if pattern.notes.is_empty() {
            bits.write(1, 0);
            continue;
        }
        bits.write(1, 1);

        let mut cur_part = 0;
        for note in &pattern.notes {
            if !is_encodable(note, cur_part, parts_per_bar) {
                warn!("Skipping a malformed note at part {} in channel {}", note.start, channel_index);
                continue;
            }
            if note.start > cur_part {
                bits.write(2, 0);
                bits.write_part_duration(note.start - cur_part);
            }

            let pitches = &note.pitches[..note.pitches.len().min(MAX_CHORD_SIZE)];

            // 0: 1 pitch, 10: 2 pitches, 110: 3 pitches, 111: 4 pitches
            let mut shape_bits = BitFieldWriter::new();
            for _ in 1..pitches.len() {
                shape_bits.write(1, 1);
            }
            if pitches.len() < MAX_CHORD_SIZE {
                shape_bits.write(1, 0);
            }

            shape_bits.write_pin_count(note.pins.len() as i32 - 1);
            shape_bits.write(2, note.pins[0].volume.clamp(0, 3) as u32);

            let mut shape_part = 0;
            let start_pitch = pitches[0];
            let mut current_pitch = start_pitch;
            let mut pitch_bends = Vec::new();
            for pin in &note.pins[1..] {
                let next_pitch = start_pitch + pin.interval;
                if current_pitch != next_pitch {
                    shape_bits.write(1, 1);
                    pitch_bends.push(next_pitch);
                    current_pitch = next_pitch;
                } else {
                    shape_bits.write(1, 0);
                }
                shape_bits.write_part_duration(pin.time - shape_part);
                shape_part = pin.time;
                shape_bits.write(2, pin.volume.clamp(0, 3) as u32);
            }

            match recent_shapes.iter().position(|shape| *shape == shape_bits) {
                Some(shape_index) => {
                    bits.write(1, 1);
                    bits.write_long_tail(0, 0, shape_index as i32);
                    recent_shapes.remove(shape_index);
                }
                None => {
                    bits.write(2, 1);
                    bits.concat(&shape_bits);
                }
            }
            recent_shapes.insert(0, shape_bits);
            recent_shapes.truncate(RECENT_SHAPE_COUNT);

            let all_pitches = pitches.iter().copied().chain(pitch_bends);
            for (i, pitch) in all_pitches.enumerate() {
                match recent_pitches.iter().position(|&recent| recent == pitch) {
                    Some(pitch_index) => {
                        bits.write(1, 1);
                        bits.write(3, pitch_index as u32);
                        recent_pitches.remove(pitch_index);
                    }
                    None => {
                        bits.write(1, 0);
                        bits.write_pitch_interval(count_steps(last_pitch, pitch, &recent_pitches));
                    }
                }
                recent_pitches.insert(0, pitch);
                recent_pitches.truncate(RECENT_PITCH_COUNT);

                last_pitch = if i + 1 == pitches.len() { pitches[0] } else { pitch };
            }

            cur_part = note.end;
        }

        if cur_part < parts_per_bar {
            bits.write(2, 0);
            bits.write_part_duration(parts_per_bar - cur_part);
        }
    }
}

// ============================================================================
// UNIT TESTS
// ============================================================================
