// ============================================================================
// CHIPSYNTH - Chiptune / FM / Noise Song Synthesizer
// ============================================================================
//
// Songs are small trees of channels, patterns and notes, stored as a compact
// URL-safe base64 string (or a JSON document). The synth plays them through
// a chip wave, FM or noise voice per instrument and a shared chorus, reverb
// and limiter chain.
//
// MODULES:
// - config: fixed tables (scales, keys, waves, FM algorithms) and limits
// - helper: small numeric helpers shared by the DSP code
// - error: song loading errors
// - song: the song data model and its string / JSON formats
// - synth: the playback engine
// - effects: the post-mix chain
// - audio: WAV export and audio statistics
// - player: real-time playback through the audio device
// - settings: the persistent INI settings file
// ============================================================================

pub mod audio;
pub mod config;
pub mod effects;
pub mod error;
pub mod helper;
pub mod player;
pub mod settings;
pub mod song;
pub mod synth;

pub use error::SongError;
pub use settings::Settings;
pub use song::Song;
pub use synth::{Synth, SynthConfig};
