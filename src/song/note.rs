// ============================================================================
// NOTE.RS - Notes, Pins and Patterns
// ============================================================================
//
// A Pattern is one bar's worth of notes for one channel. Each Note holds one
// or more simultaneous pitches and a list of pins: control points, relative to
// the note start, that carry a pitch bend and a volume. The synth interpolates
// linearly between pins.
//
// Times are measured in parts (24 per beat).
// ============================================================================

/// A control point inside a note
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NotePin {
    /// Pitch bend relative to the note's pitches, in semitones
    pub interval: i32,

    /// Time relative to the note start, in parts
    pub time: i32,

    /// Volume from 0 (silent) to 3 (full)
    pub volume: i32,
}

impl NotePin {
    pub fn new(interval: i32, time: i32, volume: i32) -> Self {
        Self { interval, time, volume }
    }
}

/// One note (or chord) inside a pattern
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Note {
    /// Up to four simultaneous pitches
    pub pitches: Vec<i32>,

    /// Time-ordered control points; the last pin's time is `end - start`
    pub pins: Vec<NotePin>,

    /// Start time in parts from the start of the bar
    pub start: i32,

    /// End time in parts from the start of the bar
    pub end: i32,
}

impl Note {
    /// Creates a single-pitch note with a flat pitch. With `fadeout` the last
    /// pin is silent so the note decays linearly.
    pub fn new(pitch: i32, start: i32, end: i32, volume: i32, fadeout: bool) -> Self {
        Self {
            pitches: vec![pitch],
            pins: vec![
                NotePin::new(0, 0, volume),
                NotePin::new(0, end - start, if fadeout { 0 } else { volume }),
            ],
            start,
            end,
        }
    }

    /// Length of the note in parts
    pub fn length(&self) -> i32 {
        self.end - self.start
    }

    /// The last pin, which every valid note has
    pub fn last_pin(&self) -> NotePin {
        self.pins.last().copied().unwrap_or(NotePin::new(0, self.length(), 0))
    }

    /// The first pin
    pub fn first_pin(&self) -> NotePin {
        self.pins.first().copied().unwrap_or(NotePin::new(0, 0, 0))
    }
}

/// One bar of notes for one channel
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Pattern {
    /// Notes sorted by start time, never overlapping
    pub notes: Vec<Note>,

    /// Index into the channel's instruments
    pub instrument: usize,
}

impl Pattern {
    pub fn reset(&mut self) {
        self.notes.clear();
        self.instrument = 0;
    }
}

// ============================================================================
// UNIT TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_note_new_pins() {
        let note = Note::new(24, 12, 36, 3, true);
        assert_eq!(note.pins.len(), 2);
        assert_eq!(note.pins[1].time, note.length());
        assert_eq!(note.pins[1].volume, 0);
        assert_eq!(note.last_pin().time, 24);
    }
}
