// ============================================================================
// SONG MODULE - Song Data Model
// ============================================================================
//
// The song is a tree of plain data:
//
//   Song
//   └── Channel (pitch channels first, then noise channels)
//       ├── Instrument[instruments_per_channel]
//       ├── Pattern[patterns_per_channel]
//       │   └── Note
//       │       └── NotePin
//       └── bars[bar_count]  (0 = silence, n = patterns[n - 1])
//
// INVARIANTS:
// - channels.len() == pitch_channel_count + noise_channel_count
// - every channel's bars has length bar_count
// - every bar value is 0 or <= patterns_per_channel
// - every pattern's instrument is < instruments_per_channel
//
// The decoders (codec.rs, json.rs) always leave a song that satisfies these.
// Code that edits a song directly should call `sanitize` afterwards.
//
// SUBMODULES:
// - note: NotePin, Note, Pattern
// - instrument: InstrumentType, Operator, Instrument
// - bits: bit-level reader/writer and the base64 alphabet
// - codec: the compact base64 song format (versions 2..=7)
// - json: the JSON interchange format
// ============================================================================

pub mod bits;
pub mod codec;
pub mod instrument;
pub mod json;
pub mod note;

pub use instrument::{Instrument, InstrumentType, Operator};
pub use note::{Note, NotePin, Pattern};

use crate::config::{
    BAR_COUNT_MAX, BAR_COUNT_MIN, BEATS_PER_BAR_MAX, BEATS_PER_BAR_MIN, INSTRUMENTS_PER_CHANNEL_MAX,
    INSTRUMENTS_PER_CHANNEL_MIN, KEYS, NOISE_CHANNEL_COUNT_MAX, NOISE_CHANNEL_COUNT_MIN, PARTS_PER_BEAT,
    PITCH_CHANNEL_COUNT_MAX, PITCH_CHANNEL_COUNT_MIN, PATTERNS_PER_CHANNEL_MAX, REVERB_RANGE, RHYTHMS, Rhythm,
    SCALES, SCROLLABLE_OCTAVES, TEMPO_MAX, TEMPO_MIN,
};

// ============================================================================
// CHANNEL
// ============================================================================

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Channel {
    /// Octave offset added to every pitch (pitch channels only)
    pub octave: i32,

    pub instruments: Vec<Instrument>,
    pub patterns: Vec<Pattern>,

    /// Pattern number per bar, 1-based, 0 for an empty bar
    pub bars: Vec<usize>,

    /// Editor mute toggle; not stored in the song format
    pub muted: bool,
}

// ============================================================================
// SONG
// ============================================================================

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Song {
    pub scale: usize,
    pub key: usize,

    /// Beats per minute
    pub tempo: i32,

    /// 0..REVERB_RANGE
    pub reverb: i32,
    pub beats_per_bar: usize,
    pub bar_count: usize,
    pub patterns_per_channel: usize,
    pub rhythm: usize,
    pub instruments_per_channel: usize,
    pub loop_start: usize,
    pub loop_length: usize,
    pub pitch_channel_count: usize,
    pub noise_channel_count: usize,
    pub channels: Vec<Channel>,
}

impl Default for Song {
    fn default() -> Self {
        let mut song = Self {
            scale: 0,
            key: 0,
            tempo: 150,
            reverb: 0,
            beats_per_bar: 8,
            bar_count: 16,
            patterns_per_channel: 8,
            rhythm: 1,
            instruments_per_channel: 1,
            loop_start: 0,
            loop_length: 4,
            pitch_channel_count: 3,
            noise_channel_count: 1,
            channels: Vec::new(),
        };
        song.init_to_default(true);
        song
    }
}

impl Song {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restores song-level defaults. With `reset_channels`, also rebuilds
    /// the default 3 pitch + 1 noise channel layout.
    pub fn init_to_default(&mut self, reset_channels: bool) {
        self.scale = 0;
        self.key = 0;
        self.loop_start = 0;
        self.loop_length = 4;
        self.tempo = 150;
        self.reverb = 0;
        self.beats_per_bar = 8;
        self.bar_count = 16;
        self.patterns_per_channel = 8;
        self.rhythm = 1;
        self.instruments_per_channel = 1;

        if reset_channels {
            self.pitch_channel_count = 3;
            self.noise_channel_count = 1;
            self.channels = (0..self.channel_count())
                .map(|channel_index| {
                    let is_noise = channel_index >= self.pitch_channel_count;
                    Channel {
                        octave: 3 - channel_index as i32,
                        instruments: vec![Instrument::with_defaults(is_noise); self.instruments_per_channel],
                        patterns: vec![Pattern::default(); self.patterns_per_channel],
                        bars: (0..self.bar_count).map(|bar| if bar < 4 { 1 } else { 0 }).collect(),
                        muted: false,
                    }
                })
                .collect();
        }
    }

    // ========================================================================
    // QUERIES
    // ========================================================================

    pub fn channel_count(&self) -> usize {
        self.pitch_channel_count + self.noise_channel_count
    }

    pub fn channel_is_noise(&self, channel: usize) -> bool {
        channel >= self.pitch_channel_count
    }

    pub fn get_beats_per_minute(&self) -> i32 {
        self.tempo
    }

    pub fn get_rhythm(&self) -> &'static Rhythm {
        &RHYTHMS[self.rhythm.min(RHYTHMS.len() - 1)]
    }

    /// Base pitch of the song's key
    pub fn get_key_base_pitch(&self) -> i32 {
        KEYS[self.key.min(KEYS.len() - 1)].base_pitch
    }

    /// Parts in one bar
    pub fn parts_per_bar(&self) -> usize {
        self.beats_per_bar * PARTS_PER_BEAT
    }

    /// The pattern playing on `channel` at `bar`, or None for an empty bar
    pub fn get_pattern(&self, channel: usize, bar: usize) -> Option<&Pattern> {
        let channel = self.channels.get(channel)?;
        let pattern_number = *channel.bars.get(bar)?;
        if pattern_number == 0 {
            return None;
        }
        channel.patterns.get(pattern_number - 1)
    }

    /// Instrument index used at `bar`, 0 for an empty bar
    pub fn get_pattern_instrument(&self, channel: usize, bar: usize) -> usize {
        self.get_pattern(channel, bar).map_or(0, |pattern| pattern.instrument)
    }

    /// The instrument used at `bar`, clamped into the channel's list
    pub fn get_instrument(&self, channel: usize, instrument: usize) -> Option<&Instrument> {
        let instruments = &self.channels.get(channel)?.instruments;
        instruments.get(instrument.min(instruments.len().saturating_sub(1)))
    }

    /// Count of notes across every pattern, for summaries
    pub fn note_count(&self) -> usize {
        self.channels
            .iter()
            .flat_map(|channel| channel.patterns.iter())
            .map(|pattern| pattern.notes.len())
            .sum()
    }

    // ========================================================================
    // INVARIANT REPAIR
    // ========================================================================

    /// Clamps every count and index back into range and resizes the channel
    /// arrays to match the song-level counts.
    pub fn sanitize(&mut self) {
        self.scale = self.scale.min(SCALES.len() - 1);
        self.key = self.key.min(KEYS.len() - 1);
        self.tempo = self.tempo.clamp(TEMPO_MIN, TEMPO_MAX);
        self.reverb = self.reverb.clamp(0, REVERB_RANGE - 1);
        self.rhythm = self.rhythm.min(RHYTHMS.len() - 1);
        self.beats_per_bar = self.beats_per_bar.clamp(BEATS_PER_BAR_MIN, BEATS_PER_BAR_MAX);
        self.bar_count = self.bar_count.clamp(BAR_COUNT_MIN, BAR_COUNT_MAX);
        self.patterns_per_channel = self.patterns_per_channel.clamp(1, PATTERNS_PER_CHANNEL_MAX);
        self.instruments_per_channel =
            self.instruments_per_channel.clamp(INSTRUMENTS_PER_CHANNEL_MIN, INSTRUMENTS_PER_CHANNEL_MAX);
        self.loop_start = self.loop_start.min(self.bar_count - 1);
        self.loop_length = self.loop_length.clamp(1, self.bar_count - self.loop_start);

        self.pitch_channel_count = self.pitch_channel_count.clamp(PITCH_CHANNEL_COUNT_MIN, PITCH_CHANNEL_COUNT_MAX);
        self.noise_channel_count = self.noise_channel_count.clamp(NOISE_CHANNEL_COUNT_MIN, NOISE_CHANNEL_COUNT_MAX);
        let channel_count = self.channel_count();
        let pitch_channel_count = self.pitch_channel_count;
        self.channels.resize_with(channel_count, Channel::default);

        let parts_per_bar = self.parts_per_bar() as i32;
        for (channel_index, channel) in self.channels.iter_mut().enumerate() {
            let is_noise = channel_index >= pitch_channel_count;
            channel.octave = channel.octave.clamp(0, SCROLLABLE_OCTAVES);
            channel
                .instruments
                .resize_with(self.instruments_per_channel, || Instrument::with_defaults(is_noise));
            channel.patterns.resize_with(self.patterns_per_channel, Pattern::default);
            channel.bars.resize(self.bar_count, 0);
            for bar in channel.bars.iter_mut() {
                *bar = (*bar).min(self.patterns_per_channel);
            }
            for pattern in channel.patterns.iter_mut() {
                pattern.instrument = pattern.instrument.min(self.instruments_per_channel - 1);
                pattern.notes.retain(|note| {
                    !note.pitches.is_empty() && note.start < note.end && note.end <= parts_per_bar && note.pins.len() >= 2
                });
            }
        }
    }

    /// Checks the structural invariants without changing anything
    pub fn check_invariants(&self) -> bool {
        self.channels.len() == self.channel_count()
            && self.channels.iter().all(|channel| {
                channel.bars.len() == self.bar_count
                    && channel.bars.iter().all(|&bar| bar <= self.patterns_per_channel)
                    && channel.patterns.len() == self.patterns_per_channel
                    && channel.instruments.len() == self.instruments_per_channel
                    && channel.patterns.iter().all(|pattern| pattern.instrument < self.instruments_per_channel)
            })
    }
}

// ============================================================================
// UNIT TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_song_layout() {
        let song = Song::default();
        assert_eq!(song.channel_count(), 4);
        assert_eq!(song.channels.len(), 4);
        assert!(song.channel_is_noise(3));
        assert!(!song.channel_is_noise(2));
        assert_eq!(song.channels[0].octave, 3);
        assert_eq!(song.channels[3].octave, 0);
        assert_eq!(song.channels[0].bars[..5], [1, 1, 1, 1, 0]);
        assert_eq!(song.channels[3].instruments[0].instrument_type, InstrumentType::Noise);
        assert!(song.check_invariants());
    }

    #[test]
    fn test_get_pattern_for_empty_bar() {
        let song = Song::default();
        assert!(song.get_pattern(0, 0).is_some());
        assert!(song.get_pattern(0, 10).is_none());
        assert!(song.get_pattern(9, 0).is_none());
        assert_eq!(song.get_pattern_instrument(0, 10), 0);
    }

    #[test]
    fn test_sanitize_repairs_edits() {
        let mut song = Song::default();
        song.bar_count = 3;
        song.patterns_per_channel = 2;
        song.channels[1].bars[2] = 7;
        song.channels[2].patterns[0].instrument = 4;
        song.pitch_channel_count = 2;
        song.sanitize();

        assert!(song.check_invariants());
        assert_eq!(song.channels.len(), 3);
        assert_eq!(song.channels[0].bars.len(), 3);
        assert_eq!(song.channels[1].bars[2], 2);
        assert!(song.loop_start + song.loop_length <= song.bar_count);
    }
}
