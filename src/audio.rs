// ============================================================================
// AUDIO.RS - WAV Export and Audio Statistics
// ============================================================================
//
// Rendered songs are written as mono WAV files, either 16-bit PCM (the most
// compatible choice) or 32-bit IEEE float (no quantization, keeps anything
// the limiter let past full scale).
//
// WAV FILE FORMAT:
// 1. RIFF header (12 bytes)
// 2. Format chunk (24 bytes)
// 3. Fact chunk (12 bytes, float files only)
// 4. Data chunk header (8 bytes)
// 5. Audio data (variable length, little endian)
// ============================================================================

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};

const WAV_FORMAT_PCM: u16 = 1;
const WAV_FORMAT_IEEE_FLOAT: u16 = 3;
const CHANNEL_COUNT: u16 = 1;

/// Sample encoding of a WAV file
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WavEncoding {
    Pcm16,
    Float32,
}

impl WavEncoding {
    pub fn from_float_flag(use_float: bool) -> Self {
        if use_float { Self::Float32 } else { Self::Pcm16 }
    }

    fn bits_per_sample(self) -> u16 {
        match self {
            Self::Pcm16 => 16,
            Self::Float32 => 32,
        }
    }

    fn format_tag(self) -> u16 {
        match self {
            Self::Pcm16 => WAV_FORMAT_PCM,
            Self::Float32 => WAV_FORMAT_IEEE_FLOAT,
        }
    }
}

/// Writes mono samples (-1.0 to 1.0) to a WAV file
pub fn write_wav_file(path: &Path, samples: &[f32], sample_rate: u32, encoding: WavEncoding) -> Result<()> {
    if samples.is_empty() {
        bail!("no samples to write");
    }

    let file = File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    write_wav(&mut writer, samples, sample_rate, encoding).with_context(|| format!("failed to write {}", path.display()))?;
    writer.flush().with_context(|| format!("failed to flush {}", path.display()))?;

    tracing::info!(path = %path.display(), samples = samples.len(), ?encoding, "wrote WAV file");
    Ok(())
}

/// Writes a complete WAV stream
pub fn write_wav<W: Write>(writer: &mut W, samples: &[f32], sample_rate: u32, encoding: WavEncoding) -> Result<()> {
    let bits_per_sample = encoding.bits_per_sample();
    let bytes_per_sample = bits_per_sample / 8;
    let block_align = CHANNEL_COUNT * bytes_per_sample;
    let byte_rate = sample_rate * block_align as u32;
    let has_fact_chunk = encoding == WavEncoding::Float32;

    let audio_data_bytes = u32::try_from(samples.len() * bytes_per_sample as usize)
        .context("audio is too long for a WAV file")?;
    let riff_chunk_size = 4 // "WAVE"
        + 8 + 16 // fmt chunk
        + if has_fact_chunk { 8 + 4 } else { 0 }
        + 8 // data chunk header
        + audio_data_bytes;

    // ---- RIFF Header ----
    writer.write_all(b"RIFF")?;
    writer.write_all(&riff_chunk_size.to_le_bytes())?;
    writer.write_all(b"WAVE")?;

    // ---- Format Chunk ----
    writer.write_all(b"fmt ")?;
    writer.write_all(&16u32.to_le_bytes())?;
    writer.write_all(&encoding.format_tag().to_le_bytes())?;
    writer.write_all(&CHANNEL_COUNT.to_le_bytes())?;
    writer.write_all(&sample_rate.to_le_bytes())?;
    writer.write_all(&byte_rate.to_le_bytes())?;
    writer.write_all(&block_align.to_le_bytes())?;
    writer.write_all(&bits_per_sample.to_le_bytes())?;

    // ---- Fact Chunk ----
    if has_fact_chunk {
        writer.write_all(b"fact")?;
        writer.write_all(&4u32.to_le_bytes())?;
        writer.write_all(&(samples.len() as u32).to_le_bytes())?;
    }

    // ---- Data Chunk ----
    writer.write_all(b"data")?;
    writer.write_all(&audio_data_bytes.to_le_bytes())?;
    match encoding {
        WavEncoding::Float32 => {
            for &sample in samples {
                writer.write_all(&sample.to_le_bytes())?;
            }
        }
        WavEncoding::Pcm16 => {
            for &sample in samples {
                let scaled = (sample.clamp(-1.0, 1.0) * 32767.0) as i16;
                writer.write_all(&scaled.to_le_bytes())?;
            }
        }
    }
    Ok(())
}

/// "songs/tune.txt" -> "songs/tune.wav"
pub fn generate_wav_filename(song_path: &Path) -> PathBuf {
    match song_path.file_stem() {
        Some(_) => song_path.with_extension("wav"),
        None => PathBuf::from("output.wav"),
    }
}

// ============================================================================
// AUDIO STATISTICS
// ============================================================================

/// Statistics about rendered audio
#[derive(Clone, Debug, PartialEq)]
pub struct AudioStatistics {
    pub sample_count: usize,
    pub duration_seconds: f32,

    /// Largest absolute sample
    pub peak_amplitude: f32,
    pub rms_amplitude: f32,

    /// Samples beyond -1.0 or 1.0
    pub clipped_samples: usize,
}

pub fn analyze_audio(samples: &[f32], sample_rate: u32) -> AudioStatistics {
    if samples.is_empty() {
        return AudioStatistics {
            sample_count: 0,
            duration_seconds: 0.0,
            peak_amplitude: 0.0,
            rms_amplitude: 0.0,
            clipped_samples: 0,
        };
    }

    let mut peak_amplitude = 0.0_f32;
    let mut sum_squared = 0.0_f64;
    let mut clipped_samples = 0_usize;
    for &sample in samples {
        let abs_sample = sample.abs();
        peak_amplitude = peak_amplitude.max(abs_sample);
        sum_squared += (sample as f64) * (sample as f64);
        if abs_sample > 1.0 {
            clipped_samples += 1;
        }
    }

    AudioStatistics {
        sample_count: samples.len(),
        duration_seconds: samples.len() as f32 / sample_rate as f32,
        peak_amplitude,
        rms_amplitude: (sum_squared / samples.len() as f64).sqrt() as f32,
        clipped_samples,
    }
}

/// Scales audio so its peak lands on `target_peak`. Returns the gain
/// applied; silent audio is left alone.
pub fn normalize_audio(samples: &mut [f32], target_peak: f32) -> f32 {
    let current_peak = samples.iter().map(|s| s.abs()).fold(0.0_f32, f32::max);
    if current_peak < 0.0001 {
        return 1.0;
    }

    let gain = target_peak / current_peak;
    for sample in samples.iter_mut() {
        *sample *= gain;
    }
    gain
}

// ============================================================================
// UNIT TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn u32_at(bytes: &[u8], offset: usize) -> u32 {
        u32::from_le_bytes(bytes[offset..offset + 4].try_into().unwrap())
    }

    fn u16_at(bytes: &[u8], offset: usize) -> u16 {
        u16::from_le_bytes(bytes[offset..offset + 2].try_into().unwrap())
    }

    #[test]
    fn test_generate_wav_filename() {
        assert_eq!(generate_wav_filename(Path::new("song.txt")), PathBuf::from("song.wav"));
        assert_eq!(generate_wav_filename(Path::new("songs/tune.json")), PathBuf::from("songs/tune.wav"));
        assert_eq!(generate_wav_filename(Path::new("tune")), PathBuf::from("tune.wav"));
    }

    #[test]
    fn test_pcm_header_and_data() {
        let mut bytes = Vec::new();
        write_wav(&mut bytes, &[0.0, 1.0, -1.0, 2.0], 48000, WavEncoding::Pcm16).unwrap();

        assert_eq!(&bytes[0..4], b"RIFF");
        assert_eq!(u32_at(&bytes, 4) as usize, bytes.len() - 8);
        assert_eq!(&bytes[8..12], b"WAVE");
        assert_eq!(u16_at(&bytes, 20), WAV_FORMAT_PCM);
        assert_eq!(u16_at(&bytes, 22), 1);
        assert_eq!(u32_at(&bytes, 24), 48000);
        assert_eq!(u32_at(&bytes, 28), 96000);
        assert_eq!(u16_at(&bytes, 34), 16);
        assert_eq!(&bytes[36..40], b"data");
        assert_eq!(u32_at(&bytes, 40), 8);

        let data: Vec<i16> = bytes[44..].chunks(2).map(|pair| i16::from_le_bytes([pair[0], pair[1]])).collect();
        assert_eq!(data, vec![0, 32767, -32767, 32767]);
    }

    #[test]
    fn test_float_file_has_fact_chunk() {
        let mut bytes = Vec::new();
        write_wav(&mut bytes, &[0.5, -0.25], 44100, WavEncoding::Float32).unwrap();
        assert_eq!(u16_at(&bytes, 20), WAV_FORMAT_IEEE_FLOAT);
        assert_eq!(&bytes[36..40], b"fact");
        assert_eq!(u32_at(&bytes, 44), 2);
        assert_eq!(&bytes[48..52], b"data");
        assert_eq!(f32::from_le_bytes(bytes[56..60].try_into().unwrap()), 0.5);
        assert_eq!(u32_at(&bytes, 4) as usize, bytes.len() - 8);
    }

    #[test]
    fn test_empty_audio_is_rejected() {
        let path = std::env::temp_dir().join("chipsynth-empty.wav");
        assert!(write_wav_file(&path, &[], 48000, WavEncoding::Pcm16).is_err());
    }

    #[test]
    fn test_analyze_audio() {
        let samples: Vec<f32> = (0..1000).map(|i| (i as f32 * 0.1).sin() * 0.5).collect();
        let stats = analyze_audio(&samples, 48000);
        assert_eq!(stats.sample_count, 1000);
        assert!(stats.peak_amplitude > 0.0 && stats.peak_amplitude <= 0.5);
        assert!(stats.rms_amplitude < stats.peak_amplitude);
        assert_eq!(stats.clipped_samples, 0);
    }

    #[test]
    fn test_normalize_audio() {
        let mut samples = vec![0.25, -0.25, 0.5, -0.5];
        let gain = normalize_audio(&mut samples, 1.0);
        assert!((gain - 2.0).abs() < 0.001);
        assert!((samples[2] - 1.0).abs() < 0.001);

        let mut silence = vec![0.0; 8];
        assert_eq!(normalize_audio(&mut silence, 1.0), 1.0);
    }
}
