// ============================================================================
// SCHEDULER.RS - Which Tones Sound Right Now
// ============================================================================
//
// Every run, each channel's current note (and its immediate neighbours) is
// mapped onto that channel's active tones. Tones move through three places:
//
//   pool ──new──> active ──release──> released ──free──> pool
//                   │                                     ^
//                   └───────────────free──────────────────┘
//
// - A harmonized chord gets one tone per pitch (delayed by the strum).
// - An arpeggiated chord shares one tone that cycles through the pitches.
// - When a note ends, a releasing transition moves its tones to the
//   released list to fade out; other transitions free them at once.
// - Seamless transitions hand the same tone from one note to the next.
//
// The released list is ordered newest first. Tones past the per-channel
// ceiling are faded quickly and freed at the next tick boundary, so a burst
// of chords degrades gracefully instead of growing without bound.
//
// Live input (a key held on a controller or keyboard) is an extra tone that
// has no note at all; it sounds until the input is cleared.
// ============================================================================

use std::collections::VecDeque;

use crate::config::{MAXIMUM_TONES_PER_CHANNEL, PARTS_PER_BEAT};
use crate::song::{Instrument, Note, Pattern, Song};
use crate::synth::tone::{NoteRef, ToneId, TonePool};

// ============================================================================
// PLAY CURSOR
// ============================================================================

/// Song position: bar, beat, part and tick, plus the samples left before
/// the next tick
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PlayCursor {
    pub bar: usize,
    pub beat: usize,
    pub part: usize,
    pub tick: usize,
    pub tick_sample_countdown: usize,
}

impl PlayCursor {
    /// Time inside the bar in parts, the unit note bounds use
    pub fn part_in_bar(&self) -> i32 {
        (self.part + self.beat * PARTS_PER_BEAT) as i32
    }
}

// ============================================================================
// LIVE INPUT
// ============================================================================

/// Pitches held on the live input and the channel they play on
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LiveInput {
    pub channel: usize,
    pub pitches: Vec<i32>,
    pub pressed: bool,
}

// ============================================================================
// CHANNEL TONE LISTS
// ============================================================================

#[derive(Clone, Debug, Default)]
pub struct ChannelTones {
    pub active: VecDeque<ToneId>,

    /// Newest first
    pub released: VecDeque<ToneId>,
}

impl ChannelTones {
    pub fn len(&self) -> usize {
        self.active.len() + self.released.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn note_ref(index: usize, note: &Note) -> NoteRef {
    NoteRef { index, start: note.start, end: note.end }
}

/// Index into the channel's patterns for the pattern playing at `bar`
fn pattern_index(song: &Song, channel: usize, bar: usize) -> Option<usize> {
    let channel = song.channels.get(channel)?;
    let number = *channel.bars.get(bar)?;
    (number > 0 && number <= channel.patterns.len()).then(|| number - 1)
}

/// The current note of a pattern and its neighbours, as note indices
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
struct NoteNeighbourhood {
    note: Option<usize>,
    prev: Option<usize>,
    next: Option<usize>,
}

impl NoteNeighbourhood {
    fn find(pattern: &Pattern, time: i32) -> Self {
        let mut found = Self::default();
        for (index, note) in pattern.notes.iter().enumerate() {
            if note.end <= time {
                found.prev = Some(index);
            } else if note.start <= time && note.end > time {
                found.note = Some(index);
            } else if note.start > time {
                found.next = Some(index);
                break;
            }
        }

        // Only directly adjacent notes count as neighbours
        if let Some(note) = found.note.map(|index| &pattern.notes[index]) {
            if found.prev.is_some_and(|index| pattern.notes[index].end != note.start) {
                found.prev = None;
            }
            if found.next.is_some_and(|index| pattern.notes[index].start != note.end) {
                found.next = None;
            }
        }
        found
    }
}

// ============================================================================
// TONE SCHEDULER
// ============================================================================

#[derive(Default)]
pub struct ToneScheduler {
    pub pool: TonePool,
    pub channels: Vec<ChannelTones>,

    /// Tones of the live input, which plays on `LiveInput::channel`
    pub live: VecDeque<ToneId>,
}

impl ToneScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Matches the tone lists to the song's channel count. Changing the
    /// count silences everything, since channel indices shift.
    pub fn ensure_channels(&mut self, channel_count: usize) {
        if self.channels.len() != channel_count {
            if !self.channels.is_empty() {
                tracing::debug!(from = self.channels.len(), to = channel_count, "channel count changed");
            }
            self.free_all_tones();
            self.channels.resize_with(channel_count, ChannelTones::default);
        }
    }

    /// Active plus released tones on a channel
    pub fn tone_count(&self, channel: usize) -> usize {
        self.channels.get(channel).map_or(0, ChannelTones::len)
    }

    pub fn release_tone(&mut self, channel: usize, id: ToneId) {
        match self.channels.get_mut(channel) {
            Some(tones) => tones.released.push_front(id),
            None => self.pool.free_tone(id),
        }
    }

    pub fn free_released_tone(&mut self, channel: usize, index: usize) {
        if let Some(id) = self.channels[channel].released.remove(index) {
            self.pool.free_tone(id);
        }
    }

    /// Returns every tone to the pool without fading
    pub fn free_all_tones(&mut self) {
        while let Some(id) = self.live.pop_back() {
            self.pool.free_tone(id);
        }
        for tones in &mut self.channels {
            for id in tones.active.drain(..).chain(tones.released.drain(..)) {
                self.pool.free_tone(id);
            }
        }
    }

    /// Releases or frees a tone that lost its note, depending on the
    /// transition of the instrument it was playing
    fn retire_tone(&mut self, song: &Song, channel: usize, id: ToneId) {
        let instrument = self.pool.get(id).instrument;
        let releases = song
            .get_instrument(channel, instrument)
            .is_some_and(|instrument| instrument.get_transition().releases);
        if releases {
            self.release_tone(channel, id);
        } else {
            self.pool.free_tone(id);
        }
    }

    // ========================================================================
    // PER-RUN SCHEDULING
    // ========================================================================

    /// Starts, keeps or retires the live input tone
    pub fn determine_live_input_tones(&mut self, song: &Song, live: &LiveInput, bar: usize) {
        let channel = live.channel;
        let first_pitch = match live.pitches.first() {
            Some(&pitch) if live.pressed => pitch,
            _ => {
                while let Some(id) = self.live.pop_back() {
                    self.release_tone(channel, id);
                }
                return;
            }
        };

        let instrument_index = song.get_pattern_instrument(channel, bar);
        let Some(instrument) = song.get_instrument(channel, instrument_index) else {
            return;
        };

        let id = match self.live.front().copied() {
            None => {
                let id = self.pool.new_tone();
                self.live.push_back(id);
                id
            }
            Some(front) if !instrument.get_transition().is_seamless && self.pool.get(front).pitches[0] != first_pitch => {
                // A new key on a non-seamless instrument retriggers
                self.live.pop_front();
                self.release_tone(channel, front);
                let id = self.pool.new_tone();
                self.live.push_back(id);
                id
            }
            Some(front) => front,
        };

        let tone = self.pool.get_mut(id);
        tone.set_pitches(&live.pitches);
        tone.chord_size = 1;
        tone.instrument = instrument_index;
        tone.note = None;
        tone.prev_note = None;
        tone.next_note = None;
    }

    /// Maps the channel's current note onto its active tones
    pub fn determine_current_active_tones(&mut self, song: &Song, channel: usize, cursor: &PlayCursor) {
        let instrument_index = song.get_pattern_instrument(channel, cursor.bar);
        let time = cursor.part_in_bar();
        let muted = song.channels.get(channel).is_none_or(|channel| channel.muted);

        let pattern = pattern_index(song, channel, cursor.bar)
            .filter(|_| !muted)
            .map(|index| (index, &song.channels[channel].patterns[index]));
        let instrument = song.get_instrument(channel, instrument_index);

        if let (Some((pattern_index, pattern)), Some(instrument)) = (pattern, instrument) {
            let found = NoteNeighbourhood::find(pattern, time);
            if let Some(note) = found.note {
                let selection = NoteSelection { instrument_index, pattern_index, pattern, found, note };
                self.sync_tones(song, channel, instrument, &selection, time);
                return;
            }
        }

        while let Some(id) = self.channels[channel].active.pop_back() {
            self.retire_tone(song, channel, id);
        }
    }

    fn sync_tones(&mut self, song: &Song, channel: usize, instrument: &Instrument, selection: &NoteSelection, current_part: i32) {
        let pattern = selection.pattern;
        let note_index = selection.note;
        let note = &pattern.notes[note_index];
        let prev = selection.found.prev.map(|index| (index, &pattern.notes[index]));
        let next = selection.found.next.map(|index| (index, &pattern.notes[index]));
        let mut tone_count = 0;

        if instrument.get_chord().arpeggiates {
            let id = match self.channels[channel].active.front().copied() {
                Some(id) => id,
                None => {
                    let id = self.pool.new_tone();
                    self.channels[channel].active.push_back(id);
                    id
                }
            };
            tone_count = 1;

            let tone = self.pool.get_mut(id);
            tone.set_pitches(&note.pitches);
            tone.chord_size = 1;
            tone.instrument = selection.instrument_index;
            tone.pattern = selection.pattern_index;
            tone.note = Some(note_ref(note_index, note));
            tone.note_start = note.start;
            tone.note_end = note.end;
            tone.prev_note = prev.map(|(index, note)| note_ref(index, note));
            tone.next_note = next.map(|(index, note)| note_ref(index, note));
            tone.prev_note_pitch_index = 0;
            tone.next_note_pitch_index = 0;
        } else {
            let transition = instrument.get_transition();
            let strum_parts = instrument.get_chord().strum_parts as i32;
            let parts_per_bar = song.parts_per_bar() as i32;

            for i in 0..note.pitches.len() {
                let strum_offset = i as i32 * strum_parts;
                let mut prev_for_tone = prev.filter(|(_, prev)| prev.pitches.len() > i);
                let mut note_for_tone = (note_index, note);
                let mut next_for_tone = next.filter(|(_, next)| next.pitches.len() > i);
                let mut note_start = note.start + strum_offset;

                if note_start > current_part {
                    // This pitch has not been strummed yet. A seamless tone
                    // keeps playing the previous note until then.
                    match prev_for_tone {
                        Some(prev) if self.channels[channel].active.len() > i && transition.is_seamless => {
                            next_for_tone = Some(note_for_tone);
                            note_for_tone = prev;
                            prev_for_tone = None;
                            note_start = note_for_tone.1.start + strum_offset;
                        }
                        _ => break,
                    }
                }

                let mut note_end = note_for_tone.1.end;
                if transition.is_seamless && next_for_tone.is_some() {
                    note_end = parts_per_bar.min(note_end + strum_offset);
                }

                let id = match self.channels[channel].active.get(i).copied() {
                    Some(id) => id,
                    None => {
                        let id = self.pool.new_tone();
                        self.channels[channel].active.push_back(id);
                        id
                    }
                };
                tone_count += 1;

                let (for_index, for_note) = note_for_tone;
                let tone = self.pool.get_mut(id);
                tone.set_pitches(&for_note.pitches[i..=i]);
                tone.chord_size = for_note.pitches.len();
                tone.instrument = selection.instrument_index;
                tone.pattern = selection.pattern_index;
                tone.note = Some(note_ref(for_index, for_note));
                tone.note_start = note_start;
                tone.note_end = note_end;
                tone.prev_note = prev_for_tone.map(|(index, note)| note_ref(index, note));
                tone.next_note = next_for_tone.map(|(index, note)| note_ref(index, note));
                tone.prev_note_pitch_index = i;
                tone.next_note_pitch_index = i;
            }
        }

        while self.channels[channel].active.len() > tone_count {
            if let Some(id) = self.channels[channel].active.pop_back() {
                self.retire_tone(song, channel, id);
            }
        }
    }

    // ========================================================================
    // TICK AND PART BOUNDARIES
    // ========================================================================

    /// Ages released tones by one tick and frees the ones over the ceiling
    pub fn advance_released_ticks(&mut self) {
        for tones in &mut self.channels {
            let mut i = 0;
            while i < tones.released.len() {
                let id = tones.released[i];
                self.pool.get_mut(id).ticks_since_released += 1;
                if i + tones.active.len() >= MAXIMUM_TONES_PER_CHANNEL {
                    tones.released.remove(i);
                    self.pool.free_tone(id);
                } else {
                    i += 1;
                }
            }
        }
    }

    /// Retires tones whose note ends at `time` (in parts), except seamless
    /// ones, which wait to be handed to the next note
    pub fn release_ended_tones(&mut self, song: &Song, time: i32) {
        for channel in 0..self.channels.len() {
            let mut i = 0;
            while i < self.channels[channel].active.len() {
                let id = self.channels[channel].active[i];
                let tone = self.pool.get(id);
                let transition = song.get_instrument(channel, tone.instrument).map(Instrument::get_transition);
                let ends_now = tone.note.is_some_and(|note| note.end == time);
                match transition {
                    Some(transition) if !transition.is_seamless && ends_now => {
                        self.channels[channel].active.remove(i);
                        if transition.releases {
                            self.release_tone(channel, id);
                        } else {
                            self.pool.free_tone(id);
                        }
                    }
                    _ => i += 1,
                }
            }
        }
    }
}

/// The note picked for a channel in this run, with where it came from
struct NoteSelection<'a> {
    instrument_index: usize,
    pattern_index: usize,
    pattern: &'a Pattern,
    found: NoteNeighbourhood,
    note: usize,
}

// ============================================================================
// UNIT TESTS
// ============================================================================
