// ============================================================================
// SETTINGS.RS - Persistent Renderer Settings
// ============================================================================
//
// Settings live in a small INI file next to the binary's working directory.
// The file is created with defaults on first run, and every field can be
// edited by hand afterwards. Unknown keys and unparsable values are ignored
// so an old or hand-mangled file never stops the program from starting.
//
// FORMAT:
//   # comment
//   [Section]          (sections are only for readability)
//   key = value
//
// Command line flags override whatever is loaded here.
// ============================================================================

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use crate::synth::SynthConfig;

/// All renderer settings, loaded from INI file or defaults
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    // ── Synth ──
    pub sample_rate: u32,

    /// Master volume, 0..=1 is the useful range
    pub volume: f64,

    /// -1 loops forever, 0 plays once, n repeats the loop n more times
    pub loop_repeat_count: i32,

    /// Seed for noise start phases
    pub seed: u64,

    // ── Render ──
    /// Seconds rendered after the song for release and reverb tails
    pub tail_seconds: f64,
    pub float_wav: bool,
    pub normalize_audio: bool,
    pub normalize_peak: f32, // 0.97 = 97% of max

    // ── Playback ──
    /// Frames per device callback, 0 lets the backend choose
    pub buffer_frames: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            // Synth
            sample_rate: 48000,
            volume: 1.0,
            loop_repeat_count: 0,
            seed: 0,

            // Render
            tail_seconds: 2.0,
            float_wav: false,
            normalize_audio: false,
            normalize_peak: 0.97,

            // Playback
            buffer_frames: 0,
        }
    }
}

impl Settings {
    pub const FILE_NAME: &'static str = "chipsynth.ini";

    /// Load settings from the INI file, or create it with defaults if it
    /// doesn't exist
    pub fn load_or_create() -> Self {
        Self::load_or_create_at(Path::new(Self::FILE_NAME))
    }

    pub fn load_or_create_at(path: &Path) -> Self {
        if path.exists() {
            match fs::read_to_string(path) {
                Ok(content) => {
                    let mut settings = Self::default();
                    settings.parse_ini(&content);
                    tracing::debug!(path = %path.display(), "loaded settings");
                    settings
                }
                Err(error) => {
                    tracing::warn!("Could not read {}: {}. Using defaults.", path.display(), error);
                    Self::default()
                }
            }
        } else {
            let settings = Self::default();
            settings.save_to(path);
            settings
        }
    }

    /// Save current settings to the INI file
    pub fn save(&self) {
        self.save_to(Path::new(Self::FILE_NAME));
    }

    pub fn save_to(&self, path: &Path) {
        match fs::write(path, self.to_ini()) {
            Ok(()) => tracing::info!(path = %path.display(), "wrote default settings"),
            Err(error) => tracing::warn!("Could not save {}: {}", path.display(), error),
        }
    }

    /// The synth configuration these settings describe
    pub fn synth_config(&self) -> SynthConfig {
        SynthConfig {
            sample_rate: self.sample_rate,
            volume: self.volume,
            loop_repeat_count: self.loop_repeat_count,
            seed: self.seed,
        }
    }

    fn to_ini(&self) -> String {
        let mut s = String::new();
        s.push_str("# chipsynth settings\n");
        s.push_str("# Edit values below. Delete this file to reset to defaults.\n\n");

        s.push_str("[Synth]\n");
        s.push_str(&format!("sample_rate = {}\n", self.sample_rate));
        s.push_str(&format!("volume = {}\n", self.volume));
        s.push_str("# -1 = loop forever, 0 = play once, n = repeat the loop n more times\n");
        s.push_str(&format!("loop_repeat_count = {}\n", self.loop_repeat_count));
        s.push_str(&format!("seed = {}\n", self.seed));
        s.push('\n');

        s.push_str("[Render]\n");
        s.push_str(&format!("tail_seconds = {}\n", self.tail_seconds));
        s.push_str(&format!("float_wav = {}\n", self.float_wav));
        s.push_str(&format!("normalize_audio = {}\n", self.normalize_audio));
        s.push_str(&format!("normalize_peak = {}\n", self.normalize_peak));
        s.push('\n');

        s.push_str("[Playback]\n");
        s.push_str("# 0 = let the audio backend choose\n");
        s.push_str(&format!("buffer_frames = {}\n", self.buffer_frames));
        s
    }

    fn parse_ini(&mut self, content: &str) {
        let map = parse_ini_to_map(content);

        fn read<T: std::str::FromStr>(map: &HashMap<String, String>, key: &str, field: &mut T) {
            if let Some(value) = map.get(key) {
                match value.parse() {
                    Ok(parsed) => *field = parsed,
                    Err(_) => tracing::warn!("Ignoring setting {} = {:?}", key, value),
                }
            }
        }

        // Synth
        read(&map, "sample_rate", &mut self.sample_rate);
        read(&map, "volume", &mut self.volume);
        read(&map, "loop_repeat_count", &mut self.loop_repeat_count);
        read(&map, "seed", &mut self.seed);

        // Render
        read(&map, "tail_seconds", &mut self.tail_seconds);
        if let Some(v) = map.get("float_wav") {
            self.float_wav = v == "true";
        }
        if let Some(v) = map.get("normalize_audio") {
            self.normalize_audio = v == "true";
        }
        read(&map, "normalize_peak", &mut self.normalize_peak);

        // Playback
        read(&map, "buffer_frames", &mut self.buffer_frames);

        self.sanitize();
    }

    /// Pulls hand-edited values back into working ranges
    fn sanitize(&mut self) {
        self.sample_rate = self.sample_rate.clamp(8000, 384000);
        self.volume = if self.volume.is_finite() { self.volume.max(0.0) } else { 1.0 };
        self.loop_repeat_count = self.loop_repeat_count.max(-1);
        self.tail_seconds = if self.tail_seconds.is_finite() { self.tail_seconds.clamp(0.0, 60.0) } else { 2.0 };
        self.normalize_peak = if self.normalize_peak.is_finite() { self.normalize_peak.clamp(0.0, 1.0) } else { 0.97 };
    }
}

fn parse_ini_to_map(content: &str) -> HashMap<String, String> {
    let mut map = HashMap::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with('[') {
            continue;
        }
        if let Some((key, val)) = line.split_once('=') {
            map.insert(key.trim().to_string(), val.trim().to_string());
        }
    }
    map
}

// ============================================================================
// UNIT TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_round_trip_through_ini_text() {
        let mut settings = Settings::default();
        settings.sample_rate = 44100;
        settings.loop_repeat_count = -1;
        settings.float_wav = true;
        settings.tail_seconds = 3.5;

        let mut restored = Settings::default();
        restored.parse_ini(&settings.to_ini());
        assert_eq!(restored, settings);
    }

    #[test]
    fn test_missing_and_bad_values_keep_defaults() {
        let ini = "[Synth]
# a comment
sample_rate = fast
volume = 0.5
unknown_key = 3
";
        let mut restored = Settings::default();
        restored.parse_ini(ini);
        assert_eq!(restored.sample_rate, 48000);
        assert_eq!(restored.volume, 0.5);
        assert_eq!(restored.tail_seconds, Settings::default().tail_seconds);
    }

    #[test]
    fn test_out_of_range_values_are_clamped() {
        let ini = "loop_repeat_count = -7\nvolume = -2\nnormalize_peak = 4\nsample_rate = 10\n";
        let mut restored = Settings::default();
        restored.parse_ini(ini);
        assert_eq!(restored.loop_repeat_count, -1);
        assert_eq!(restored.volume, 0.0);
        assert_eq!(restored.normalize_peak, 1.0);
        assert_eq!(restored.sample_rate, 8000);
    }

    #[test]
    fn test_first_run_creates_the_file() {
        let path = std::env::temp_dir().join(format!("chipsynth-settings-{}.ini", std::process::id()));
        let _ = fs::remove_file(&path);

        let created = Settings::load_or_create_at(&path);
        assert_eq!(created, Settings::default());
        assert!(path.exists());

        fs::write(&path, "seed = 42\n").unwrap();
        let loaded = Settings::load_or_create_at(&path);
        assert_eq!(loaded.seed, 42);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_synth_config_carries_settings() {
        let settings = Settings { sample_rate: 22050, loop_repeat_count: 2, ..Settings::default() };
        let config = settings.synth_config();
        assert_eq!(config.sample_rate, 22050);
        assert_eq!(config.loop_repeat_count, 2);
    }
}
