// ============================================================================
// SYNTH MODULE - Song Playback Engine
// ============================================================================
//
// The Synth owns a Song and turns it into mono samples on demand. Hosts call
// `synthesize` with an output buffer (an audio callback, or a loop writing a
// file) and the synth advances its play cursor as far as the buffer reaches.
//
// TIMING:
// A bar has beats, a beat has 24 parts, a part has 2 ticks. A tick lasts a
// whole number of samples, derived from the tempo and sample rate. All
// scheduling happens at tick boundaries; the samples between two boundaries
// (or up to the end of the output buffer) form one "run":
//
//   for each run:
//     1. each channel: pick tones for the current note, compute their
//        parameters, let the voice add samples into a mix send
//     2. post chain: chorus, reverb and limiter mix the sends into the output
//     3. tick boundary: age released tones, advance tick/part/beat/bar
//
// LOOPING:
// `loop_repeat_count` is -1 to loop forever, 0 to play through once, or the
// number of extra passes through the loop. It counts down as passes finish.
// When a finite song runs off its last bar the synth clears its buffers,
// pauses, and fills the rest of the output with silence.
//
// SUBMODULES:
// - waves: shared wave tables (sine, integrated chip waves, noise)
// - fft: inverse real FFT for the "hollow" noise
// - filter: per-tone resonant low-pass
// - envelope: envelope, chord volume and vibrato curves
// - tone: sounding tones and their pool
// - scheduler: note to tone mapping, release and eviction
// - compute: per-run tone parameters
// - voices: chip, FM and noise sample generators
// ============================================================================

pub mod compute;
pub mod envelope;
pub mod fft;
pub mod filter;
pub mod scheduler;
pub mod tone;
pub mod voices;
pub mod waves;

pub use scheduler::{LiveInput, PlayCursor};

use rand::SeedableRng;
use rand::rngs::StdRng;

use crate::config::{MAX_CHORD_SIZE, MAXIMUM_TONES_PER_CHANNEL, PARTS_PER_BEAT, TICKS_PER_PART};
use crate::effects::{MixBuffers, PostChain, PostContext};
use crate::song::Song;
use compute::{RunContext, compute_tone};
use scheduler::ToneScheduler;
use tone::Tone;

/// Samples per `synthesize` call when rendering a whole song
const RENDER_CHUNK_SAMPLES: usize = 1024;

// ============================================================================
// SYNTH CONFIGURATION
// ============================================================================

#[derive(Clone, Debug, PartialEq)]
pub struct SynthConfig {
    /// Output sample rate in Hz
    pub sample_rate: u32,

    /// Master volume the limiter scales to
    pub volume: f64,

    /// -1 loops forever, 0 plays once, n repeats the loop n more times
    pub loop_repeat_count: i32,

    /// Seed for random noise start phases
    pub seed: u64,
}

impl Default for SynthConfig {
    fn default() -> Self {
        Self { sample_rate: 48000, volume: 1.0, loop_repeat_count: -1, seed: 0 }
    }
}

// ============================================================================
// SYNTH
// ============================================================================

pub struct Synth {
    song: Song,
    sample_rate: u32,
    volume: f64,
    loop_repeat_count: i32,
    playing: bool,

    cursor: PlayCursor,

    /// Position in bars, updated after every buffer
    playhead: f64,

    scheduler: ToneScheduler,
    live_input: LiveInput,
    mix: MixBuffers,
    post: PostChain,
    rng: StdRng,

    /// Whole-song renders keep going past the last bar so released tones
    /// and the reverb can ring out
    hold_at_end: bool,

    /// Set once a held render passes the last bar
    ending: bool,
}

impl Default for Synth {
    fn default() -> Self {
        Self::new(SynthConfig::default())
    }
}

impl Synth {
    pub fn new(config: SynthConfig) -> Self {
        Self::with_song(Song::new(), config)
    }

    pub fn with_song(song: Song, config: SynthConfig) -> Self {
        waves::warm_up();
        tracing::info!(
            sample_rate = config.sample_rate,
            channels = song.channel_count(),
            bars = song.bar_count,
            "synth ready"
        );
        let mut synth = Self {
            song,
            sample_rate: config.sample_rate.max(1),
            volume: config.volume.max(0.0),
            loop_repeat_count: config.loop_repeat_count.max(-1),
            playing: false,
            cursor: PlayCursor::default(),
            playhead: 0.0,
            scheduler: ToneScheduler::new(),
            live_input: LiveInput::default(),
            mix: MixBuffers::default(),
            post: PostChain::new(),
            rng: StdRng::seed_from_u64(config.seed),
            hold_at_end: false,
            ending: false,
        };
        synth.scheduler.ensure_channels(synth.song.channel_count());
        synth
    }

    /// Swaps in a new song. Sounding tones are dropped; the cursor is kept
    /// when it still points inside the new song.
    pub fn set_song(&mut self, song: Song) {
        self.song = song;
        self.scheduler.free_all_tones();
        self.scheduler.ensure_channels(self.song.channel_count());
        if self.cursor.bar >= self.song.bar_count || self.cursor.beat >= self.song.beats_per_bar {
            self.snap_to_start();
        }
        tracing::debug!(channels = self.song.channel_count(), bars = self.song.bar_count, "song replaced");
    }

    pub fn song(&self) -> &Song {
        &self.song
    }

    /// Edits made here are heard from the next `synthesize` call
    pub fn song_mut(&mut self) -> &mut Song {
        &mut self.song
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn volume(&self) -> f64 {
        self.volume
    }

    pub fn set_volume(&mut self, volume: f64) {
        self.volume = volume.max(0.0);
    }

    pub fn loop_repeat_count(&self) -> i32 {
        self.loop_repeat_count
    }

    pub fn set_loop_repeat_count(&mut self, count: i32) {
        self.loop_repeat_count = count.max(-1);
    }

    pub fn set_channel_muted(&mut self, channel: usize, muted: bool) {
        if let Some(channel) = self.song.channels.get_mut(channel) {
            channel.muted = muted;
        }
    }

    pub fn is_channel_muted(&self, channel: usize) -> bool {
        self.song.channels.get(channel).is_some_and(|channel| channel.muted)
    }

    pub fn cursor(&self) -> PlayCursor {
        self.cursor
    }

    /// Current limiter envelope, for level meters
    pub fn peak_meter(&self) -> f64 {
        self.post.peak_meter()
    }

    // ========================================================================
    // TIMING
    // ========================================================================

    pub fn samples_per_tick(&self) -> usize {
        let beats_per_second = self.song.get_beats_per_minute() as f64 / 60.0;
        let ticks_per_second = beats_per_second * (PARTS_PER_BEAT * TICKS_PER_PART) as f64;
        ((self.sample_rate as f64 / ticks_per_second).floor() as usize).max(1)
    }

    pub fn samples_per_bar(&self) -> usize {
        self.samples_per_tick() * TICKS_PER_PART * PARTS_PER_BEAT * self.song.beats_per_bar
    }

    /// Bars heard when playing the intro (bars before the loop), the loop
    /// once plus its repeats, and the outro (bars after the loop). Endless
    /// looping counts as a single pass.
    pub fn total_bars(&self, enable_intro: bool, enable_outro: bool) -> usize {
        let passes = self.loop_repeat_count.max(0) as usize + 1;
        let mut bars = self.song.loop_length * passes;
        if enable_intro {
            bars += self.song.loop_start;
        }
        if enable_outro {
            bars += self.song.bar_count.saturating_sub(self.song.loop_start + self.song.loop_length);
        }
        bars
    }

    pub fn total_samples(&self) -> usize {
        self.samples_per_bar() * self.total_bars(true, true)
    }

    pub fn total_seconds(&self) -> f64 {
        self.total_samples() as f64 / self.sample_rate as f64
    }

    // ========================================================================
    // TRANSPORT
    // ========================================================================

    pub fn play(&mut self) {
        if self.playing {
            return;
        }
        waves::warm_up();
        self.playing = true;
        tracing::debug!(bar = self.cursor.bar, "play");
    }

    pub fn pause(&mut self) {
        if !self.playing {
            return;
        }
        self.playing = false;
        tracing::debug!(bar = self.cursor.bar, "pause");
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub fn playhead(&self) -> f64 {
        self.playhead
    }

    /// Moves the cursor to a position in bars, clamped to the song
    pub fn set_playhead(&mut self, value: f64) {
        if !value.is_finite() {
            return;
        }
        let samples_per_tick = self.samples_per_tick();
        self.playhead = value.clamp(0.0, self.song.bar_count as f64);

        let mut remainder = self.playhead;
        self.cursor.bar = remainder.floor() as usize;
        remainder = self.song.beats_per_bar as f64 * (remainder - self.cursor.bar as f64);
        self.cursor.beat = remainder.floor() as usize;
        remainder = PARTS_PER_BEAT as f64 * (remainder - self.cursor.beat as f64);
        self.cursor.part = remainder.floor() as usize;
        remainder = TICKS_PER_PART as f64 * (remainder - self.cursor.part as f64);
        self.cursor.tick = remainder.floor() as usize;
        remainder = samples_per_tick as f64 * (remainder - self.cursor.tick as f64);
        self.cursor.tick_sample_countdown = (samples_per_tick as f64 - remainder).floor() as usize;
    }

    pub fn snap_to_start(&mut self) {
        self.cursor.bar = 0;
        self.snap_to_bar(None);
    }

    /// Jumps to the start of `bar` (or of the current bar) and silences
    /// everything
    pub fn snap_to_bar(&mut self, bar: Option<usize>) {
        if let Some(bar) = bar {
            self.cursor.bar = bar;
        }
        self.playhead = self.cursor.bar as f64;
        self.cursor.beat = 0;
        self.cursor.part = 0;
        self.cursor.tick = 0;
        self.cursor.tick_sample_countdown = 0;
        self.ending = false;
        self.scheduler.free_all_tones();
        self.reset_buffers();
    }

    /// Like `snap_to_bar`, clamped to the song's bars
    pub fn go_to_bar(&mut self, bar: usize) {
        self.snap_to_bar(Some(bar.min(self.song.bar_count.saturating_sub(1))));
    }

    /// Moves into the loop when the cursor is outside it
    pub fn jump_into_loop(&mut self) {
        let loop_end = self.song.loop_start + self.song.loop_length;
        if self.cursor.bar < self.song.loop_start || self.cursor.bar >= loop_end {
            self.move_to_bar(self.song.loop_start);
        }
    }

    pub fn next_bar(&mut self) {
        let mut bar = self.cursor.bar + 1;
        if bar >= self.song.bar_count {
            bar = 0;
        }
        self.move_to_bar(bar);
    }

    pub fn prev_bar(&mut self) {
        let bar = match self.cursor.bar.checked_sub(1) {
            Some(bar) if bar < self.song.bar_count => bar,
            _ => self.song.bar_count.saturating_sub(1),
        };
        self.move_to_bar(bar);
    }

    /// Changes bar without touching the position inside the bar
    fn move_to_bar(&mut self, bar: usize) {
        self.playhead += bar as f64 - self.cursor.bar as f64;
        self.cursor.bar = bar;
    }

    fn reset_buffers(&mut self) {
        self.post.reset();
        self.mix.clear();
    }

    // ========================================================================
    // LIVE INPUT
    // ========================================================================

    /// Holds `pitches` on `channel` until cleared; an empty list releases
    pub fn set_live_input(&mut self, channel: usize, pitches: &[i32]) {
        let pitches = &pitches[..pitches.len().min(MAX_CHORD_SIZE)];
        self.live_input = LiveInput { channel, pitches: pitches.to_vec(), pressed: !pitches.is_empty() };
    }

    pub fn clear_live_input(&mut self) {
        self.live_input.pressed = false;
    }

    // ========================================================================
    // SYNTHESIS
    // ========================================================================

    /// Fills `output` with the next samples of the song
    pub fn synthesize(&mut self, output: &mut [f32]) {
        let samples_per_tick = self.samples_per_tick();
        let channel_count = self.song.channel_count();
        self.scheduler.ensure_channels(channel_count);
        let post_context = PostContext::for_song(&self.song, self.sample_rate as f64, self.volume);

        if self.cursor.tick_sample_countdown == 0 || self.cursor.tick_sample_countdown > samples_per_tick {
            self.cursor.tick_sample_countdown = samples_per_tick;
        }

        let mut ended = false;
        if !self.ending {
            if self.cursor.beat >= self.song.beats_per_bar {
                self.cursor.bar += 1;
                self.cursor.beat = 0;
                self.cursor.part = 0;
                self.cursor.tick = 0;
                self.cursor.tick_sample_countdown = samples_per_tick;
                self.wrap_into_loop();
            }
            if self.cursor.bar >= self.song.bar_count {
                self.cursor.bar = 0;
                if self.loop_repeat_count != -1 {
                    ended = self.reach_song_end();
                }
            }
        }

        let mut buffer_index = 0;
        while buffer_index < output.len() && !ended {
            let run_length = self.cursor.tick_sample_countdown.min(output.len() - buffer_index);
            self.mix.ensure_length(run_length);

            for channel in 0..channel_count {
                self.play_channel(channel, samples_per_tick, run_length);
            }
            let run_output = &mut output[buffer_index..buffer_index + run_length];
            self.post.process_run(&mut self.mix, run_output, &post_context);

            buffer_index += run_length;
            self.cursor.tick_sample_countdown -= run_length;
            if self.cursor.tick_sample_countdown == 0 {
                ended = self.end_tick(samples_per_tick);
            }
        }
        output[buffer_index..].fill(0.0);

        self.post.flush_denormals();
        self.update_playhead(samples_per_tick);
    }

    /// Renders the whole song (intro, every loop pass, outro) followed by
    /// `tail_seconds` of release and reverb tail. The cursor is left at the
    /// start and the loop repeat count is restored.
    pub fn render_to_buffer(&mut self, tail_seconds: f64) -> Vec<f32> {
        let saved_repeat_count = self.loop_repeat_count;
        self.loop_repeat_count = saved_repeat_count.max(0);

        let song_samples = self.total_samples();
        let tail_samples = (tail_seconds.max(0.0) * self.sample_rate as f64) as usize;
        let mut buffer = vec![0.0_f32; song_samples + tail_samples];
        tracing::info!(
            bars = self.total_bars(true, true),
            seconds = buffer.len() as f64 / self.sample_rate as f64,
            "rendering song"
        );

        self.snap_to_start();
        self.hold_at_end = true;
        for chunk in buffer.chunks_mut(RENDER_CHUNK_SAMPLES) {
            self.synthesize(chunk);
        }
        self.hold_at_end = false;
        self.loop_repeat_count = saved_repeat_count;
        self.snap_to_start();
        buffer
    }

    fn play_channel(&mut self, channel: usize, samples_per_tick: usize, run_length: usize) {
        let sample_rate = self.sample_rate as f64;
        let Self { song, scheduler, mix, rng, cursor, live_input, ending, .. } = self;
        let (song, cursor, live_input): (&Song, &PlayCursor, &LiveInput) = (song, cursor, live_input);
        let run = RunContext { song, channel, cursor: *cursor, samples_per_tick, sample_rate, run_length };

        if !*ending {
            if live_input.channel == channel {
                scheduler.determine_live_input_tones(song, live_input, cursor.bar);
                for i in 0..scheduler.live.len() {
                    let id = scheduler.live[i];
                    play_tone(&run, scheduler.pool.get_mut(id), mix, rng, false, false);
                }
            }

            scheduler.determine_current_active_tones(song, channel, cursor);
            for i in 0..scheduler.channels[channel].active.len() {
                let id = scheduler.channels[channel].active[i];
                play_tone(&run, scheduler.pool.get_mut(id), mix, rng, false, false);
            }
        }

        let mut i = 0;
        while i < scheduler.channels[channel].released.len() {
            let id = scheduler.channels[channel].released[i];
            let tone = scheduler.pool.get(id);
            let release_ticks = song
                .get_instrument(channel, tone.instrument)
                .map_or(0, |instrument| instrument.get_transition().release_ticks);
            if tone.ticks_since_released >= release_ticks {
                scheduler.free_released_tone(channel, i);
                continue;
            }

            let fade_out_fast = i + scheduler.channels[channel].active.len() >= MAXIMUM_TONES_PER_CHANNEL;
            play_tone(&run, scheduler.pool.get_mut(id), mix, rng, true, fade_out_fast);
            i += 1;
        }
    }

    /// Advances the cursor past a tick boundary. Returns true when the song
    /// has ended and the rest of the buffer must be silent.
    fn end_tick(&mut self, samples_per_tick: usize) -> bool {
        self.scheduler.advance_released_ticks();

        self.cursor.tick += 1;
        self.cursor.tick_sample_countdown = samples_per_tick;
        if self.cursor.tick < TICKS_PER_PART {
            return false;
        }
        self.cursor.tick = 0;
        if self.ending {
            return false;
        }

        self.cursor.part += 1;
        self.scheduler.release_ended_tones(&self.song, self.cursor.part_in_bar());
        if self.cursor.part < PARTS_PER_BEAT {
            return false;
        }

        self.cursor.part = 0;
        self.cursor.beat += 1;
        if self.cursor.beat < self.song.beats_per_bar {
            return false;
        }

        self.cursor.beat = 0;
        self.cursor.bar += 1;
        self.wrap_into_loop();
        if self.cursor.bar >= self.song.bar_count {
            self.cursor.bar = 0;
            if self.loop_repeat_count != -1 {
                return self.reach_song_end();
            }
        }
        false
    }

    /// Sends the cursor back to the loop start when a pass finishes
    fn wrap_into_loop(&mut self) {
        if self.loop_repeat_count != 0 && self.cursor.bar == self.song.loop_start + self.song.loop_length {
            self.cursor.bar = self.song.loop_start;
            if self.loop_repeat_count > 0 {
                self.loop_repeat_count -= 1;
            }
        }
    }

    /// Handles the cursor running off the last bar of a finite song
    fn reach_song_end(&mut self) -> bool {
        if self.hold_at_end {
            self.begin_ending();
            return false;
        }
        tracing::debug!("song ended");
        self.reset_buffers();
        self.pause();
        true
    }

    /// Stops reading notes and lets whatever is still sounding ring out
    fn begin_ending(&mut self) {
        self.ending = true;
        for channel in 0..self.scheduler.channels.len() {
            while let Some(id) = self.scheduler.channels[channel].active.pop_back() {
                let releases = self
                    .song
                    .get_instrument(channel, self.scheduler.pool.get(id).instrument)
                    .is_some_and(|instrument| instrument.get_transition().releases);
                if releases {
                    self.scheduler.release_tone(channel, id);
                } else {
                    self.scheduler.pool.free_tone(id);
                }
            }
        }
        self.live_input.pressed = false;
        while let Some(id) = self.scheduler.live.pop_back() {
            self.scheduler.release_tone(self.live_input.channel, id);
        }
    }

    fn update_playhead(&mut self, samples_per_tick: usize) {
        if self.ending {
            self.playhead = self.song.bar_count as f64;
            return;
        }
        let cursor = &self.cursor;
        let tick_progress = cursor.tick as f64 + 1.0 - cursor.tick_sample_countdown as f64 / samples_per_tick as f64;
        let part = tick_progress / TICKS_PER_PART as f64 + cursor.part as f64;
        let beat = part / PARTS_PER_BEAT as f64 + cursor.beat as f64;
        self.playhead = beat / self.song.beats_per_bar as f64 + cursor.bar as f64;
    }
}

/// Computes a tone's run parameters and lets its voice write into the send
/// picked by the instrument's effects setting
fn play_tone(run: &RunContext, tone: &mut Tone, mix: &mut MixBuffers, rng: &mut StdRng, released: bool, fade_out_fast: bool) {
    let Some(instrument) = run.song.get_instrument(run.channel, tone.instrument) else {
        return;
    };
    if compute_tone(run, instrument, tone, released, fade_out_fast) {
        let send = &mut mix.for_effects(instrument.effects)[..run.run_length];
        voices::synthesize_tone(tone, instrument, send, rng);
    }
}

// ============================================================================
// UNIT TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FILTER_CUTOFF_RANGE;
    use crate::helper::frequency_from_pitch;
    use crate::song::{Note, Pattern};

    const HARD: usize = 1;
    const HARD_FADE: usize = 5;

    /// One pitch channel, `bar_count` bars all playing pattern 1
    fn song_with(notes: Vec<Note>, bar_count: usize, transition: usize) -> Song {
        let mut song = Song::new();
        song.pitch_channel_count = 1;
        song.noise_channel_count = 0;
        song.channels.truncate(1);
        song.bar_count = bar_count;
        song.loop_start = 0;
        song.loop_length = bar_count;
        let channel = &mut song.channels[0];
        channel.bars = vec![1; bar_count];
        channel.instruments[0].transition = transition;
        channel.patterns[0] = Pattern { notes, instrument: 0 };
        song
    }

    fn whole_bar_note(song_parts: i32) -> Note {
        Note::new(12, 0, song_parts, 3, false)
    }

    fn synth_for(song: Song, loop_repeat_count: i32) -> Synth {
        Synth::with_song(song, SynthConfig { loop_repeat_count, ..SynthConfig::default() })
    }

    fn is_silent(samples: &[f32]) -> bool {
        samples.iter().all(|&sample| sample == 0.0)
    }

    #[test]
    fn test_timing() {
        let synth = Synth::default();
        assert_eq!(synth.samples_per_tick(), 400);
        assert_eq!(synth.samples_per_bar(), 400 * 2 * 24 * 8);
    }

    #[test]
    fn test_total_bars() {
        let mut synth = Synth::default();
        synth.set_loop_repeat_count(0);
        assert_eq!(synth.total_bars(true, true), 16);
        synth.set_loop_repeat_count(2);
        assert_eq!(synth.total_bars(true, true), 24);
        synth.set_loop_repeat_count(1);
        assert_eq!(synth.total_bars(false, false), 8);
        synth.set_loop_repeat_count(-1);
        assert_eq!(synth.total_bars(false, true), 16);
        assert_eq!(synth.total_samples(), synth.samples_per_bar() * 16);
    }

    #[test]
    fn test_playhead_round_trip() {
        let mut synth = Synth::default();
        synth.set_playhead(2.5);
        assert_eq!(synth.cursor, PlayCursor { bar: 2, beat: 4, part: 0, tick: 0, tick_sample_countdown: 400 });
        assert_eq!(synth.playhead(), 2.5);

        synth.set_playhead(100.0);
        assert_eq!(synth.playhead(), 16.0);
        synth.set_playhead(-3.0);
        assert_eq!(synth.playhead(), 0.0);
        synth.set_playhead(f64::NAN);
        assert_eq!(synth.playhead(), 0.0);
    }

    #[test]
    fn test_playhead_follows_synthesis() {
        let mut synth = Synth::default();
        synth.snap_to_start();
        let mut output = vec![0.0; 400 * 2 * 24];
        synth.synthesize(&mut output);
        // One beat of an eight-beat bar
        assert!((synth.playhead() - 1.0 / 8.0).abs() < 1e-9);
        assert_eq!(synth.cursor.beat, 1);
    }

    #[test]
    fn test_bar_navigation_wraps() {
        let mut synth = Synth::default();
        synth.snap_to_bar(Some(15));
        synth.next_bar();
        assert_eq!(synth.cursor.bar, 0);
        assert_eq!(synth.playhead(), 0.0);
        synth.prev_bar();
        assert_eq!(synth.cursor.bar, 15);
        assert_eq!(synth.playhead(), 15.0);

        synth.go_to_bar(99);
        assert_eq!(synth.cursor.bar, 15);
    }

    #[test]
    fn test_jump_into_loop_keeps_position_in_bar() {
        let mut synth = Synth::default();
        synth.set_playhead(10.5);
        synth.jump_into_loop();
        assert_eq!(synth.cursor.bar, 0);
        assert_eq!(synth.cursor.beat, 4);
        assert_eq!(synth.playhead(), 0.5);

        // Already inside the loop
        synth.set_playhead(2.0);
        synth.jump_into_loop();
        assert_eq!(synth.cursor.bar, 2);
    }

    #[test]
    fn test_note_sounds_and_empty_song_is_silent() {
        let mut synth = synth_for(song_with(Vec::new(), 1, HARD), -1);
        let mut output = vec![0.0; 4000];
        synth.synthesize(&mut output);
        assert!(is_silent(&output));

        let mut synth = synth_for(song_with(vec![whole_bar_note(192)], 1, HARD), -1);
        synth.synthesize(&mut output);
        assert!(!is_silent(&output));
        assert!(output.iter().all(|sample| sample.abs() <= 1.0));
        assert!(synth.peak_meter() > 0.0);
    }

    #[test]
    fn test_square_wave_plays_at_note_frequency() {
        // A3 in the key of C, dry and unfiltered enough to keep sharp edges
        let pitch = 45;
        let mut song = song_with(vec![Note::new(pitch, 0, 192, 3, false)], 1, HARD);
        song.reverb = 0;
        let instrument = &mut song.channels[0].instruments[0];
        instrument.chip_wave = 2;
        instrument.interval = 0;
        instrument.vibrato = 0;
        instrument.effects = 0;
        instrument.filter_cutoff = FILTER_CUTOFF_RANGE as usize - 1;
        let expected_hz = frequency_from_pitch((song.get_key_base_pitch() + pitch) as f64);

        let mut synth = synth_for(song, -1);
        let sample_rate = synth.sample_rate() as f64;
        let mut output = vec![0.0; sample_rate as usize];
        synth.synthesize(&mut output);

        // Rising zero crossings, placed between samples by linear interpolation
        let settled = &output[output.len() / 10..];
        let crossings: Vec<f64> = settled
            .windows(2)
            .enumerate()
            .filter(|(_, pair)| pair[0] < 0.0 && pair[1] >= 0.0)
            .map(|(index, pair)| index as f64 + (pair[0] / (pair[0] - pair[1])) as f64)
            .collect();
        assert!(crossings.len() > 100, "only {} crossings", crossings.len());

        let period = (crossings[crossings.len() - 1] - crossings[0]) / (crossings.len() - 1) as f64;
        let expected_period = sample_rate / expected_hz;
        assert!(
            (period - expected_period).abs() < expected_period * 0.002,
            "period {period} samples, expected {expected_period}"
        );
    }

    #[test]
    fn test_song_end_pauses_and_goes_silent() {
        let mut synth = synth_for(song_with(vec![whole_bar_note(192)], 1, HARD), 0);
        synth.play();
        let bar = synth.samples_per_bar();
        let mut output = vec![0.0; bar + 1000];
        synth.synthesize(&mut output);

        assert!(!synth.is_playing());
        assert!(!is_silent(&output[..bar]));
        assert!(is_silent(&output[bar..]));
        assert_eq!(synth.cursor.bar, 0);
    }

    #[test]
    fn test_loop_repeats_then_ends() {
        let mut synth = synth_for(song_with(vec![whole_bar_note(192)], 1, HARD), 1);
        synth.play();
        let bar = synth.samples_per_bar();
        let mut output = vec![0.0; bar * 3];
        synth.synthesize(&mut output);

        assert!(!is_silent(&output[bar..bar * 2]));
        assert!(is_silent(&output[bar * 2..]));
        assert_eq!(synth.loop_repeat_count(), 0);
        assert!(!synth.is_playing());
    }

    #[test]
    fn test_endless_loop_keeps_playing() {
        let mut synth = synth_for(song_with(vec![whole_bar_note(192)], 1, HARD), -1);
        synth.play();
        let mut output = vec![0.0; synth.samples_per_bar() * 2 + 500];
        synth.synthesize(&mut output);
        assert!(synth.is_playing());
        assert!(!is_silent(&output[output.len() - 400..]));
    }

    #[test]
    fn test_tone_ceiling_holds() {
        // A new four-pitch chord every part, each released with a long fade
        let notes = (0..192)
            .map(|part| {
                let mut note = Note::new(0, part, part + 1, 3, false);
                note.pitches = vec![0, 3, 6, 9];
                note
            })
            .collect();
        let mut song = song_with(notes, 1, HARD_FADE);
        song.channels[0].instruments[0].chord = 0;
        let mut synth = synth_for(song, -1);

        let mut output = vec![0.0; 400];
        for _ in 0..(2 * 24 * 8 * 2) {
            synth.synthesize(&mut output);
            if synth.cursor.tick == 1 {
                assert!(synth.scheduler.tone_count(0) <= MAXIMUM_TONES_PER_CHANNEL);
            }
            assert_eq!(synth.scheduler.pool.in_use(), synth.scheduler.tone_count(0));
        }
    }

    #[test]
    fn test_zero_reverb_send_matches_dry() {
        let render = |effects: usize| {
            let mut song = song_with(vec![whole_bar_note(96), Note::new(19, 96, 192, 2, true)], 1, HARD_FADE);
            song.reverb = 0;
            song.channels[0].instruments[0].effects = effects;
            synth_for(song, 0).render_to_buffer(0.5)
        };
        assert_eq!(render(0), render(1));
    }

    #[test]
    fn test_render_rings_out_and_restores_state() {
        let mut synth = synth_for(song_with(vec![whole_bar_note(192)], 1, HARD_FADE), 0);
        let bar = synth.samples_per_bar();
        let buffer = synth.render_to_buffer(1.0);

        assert_eq!(buffer.len(), bar + 48000);
        assert!(!is_silent(&buffer[..bar]));
        // The hard fade rings on for 48 ticks past the last bar
        assert!(!is_silent(&buffer[bar..bar + 1000]));
        assert!(is_silent(&buffer[buffer.len() - 100..]));

        assert_eq!(synth.loop_repeat_count(), 0);
        assert_eq!(synth.cursor.bar, 0);
        assert_eq!(synth.scheduler.pool.in_use(), 0);
    }

    #[test]
    fn test_render_is_deterministic() {
        let mut song = song_with(vec![whole_bar_note(192)], 1, HARD);
        song.reverb = 2;
        song.channels[0].instruments[0].effects = 3;
        let first = synth_for(song.clone(), 0).render_to_buffer(0.25);
        let second = synth_for(song, 0).render_to_buffer(0.25);
        assert_eq!(first, second);
    }

    #[test]
    fn test_live_input_sounds_then_releases() {
        let mut synth = synth_for(song_with(Vec::new(), 1, HARD), -1);
        synth.set_live_input(0, &[24]);
        let mut output = vec![0.0; 4000];
        synth.synthesize(&mut output);
        assert!(!is_silent(&output));
        assert_eq!(synth.scheduler.live.len(), 1);

        synth.clear_live_input();
        synth.synthesize(&mut output);
        assert!(synth.scheduler.live.is_empty());
        assert_eq!(synth.scheduler.pool.in_use(), 0);
    }

    #[test]
    fn test_muted_channel_is_silent() {
        let mut synth = synth_for(song_with(vec![whole_bar_note(192)], 1, HARD), -1);
        synth.set_channel_muted(0, true);
        assert!(synth.is_channel_muted(0));
        let mut output = vec![0.0; 4000];
        synth.synthesize(&mut output);
        assert!(is_silent(&output));
    }

    #[test]
    fn test_snap_to_bar_silences_everything() {
        let mut synth = synth_for(song_with(vec![whole_bar_note(192)], 4, HARD_FADE), -1);
        let mut output = vec![0.0; 4000];
        synth.synthesize(&mut output);
        assert!(synth.scheduler.pool.in_use() > 0);

        synth.snap_to_bar(Some(2));
        assert_eq!(synth.scheduler.pool.in_use(), 0);
        assert_eq!(synth.playhead(), 2.0);
        assert_eq!(synth.cursor.tick_sample_countdown, 0);
        assert_eq!(synth.peak_meter(), 0.0);
    }

    #[test]
    fn test_set_song_resizes_channels() {
        let mut synth = Synth::default();
        synth.set_playhead(12.0);
        synth.set_song(song_with(Vec::new(), 2, HARD));
        assert_eq!(synth.scheduler.channels.len(), 1);
        assert_eq!(synth.cursor.bar, 0);
    }
}
