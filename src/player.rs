// ============================================================================
// PLAYER.RS - Real-Time Song Playback
// ============================================================================
//
// The synth lives behind an Arc<Mutex<_>> shared with the audio device's
// data callback. The callback locks it once per buffer and either lets it
// synthesize (while playing) or writes silence. Callers keep a handle to the
// same synth to play, pause, seek or mute channels while the device runs.
//
// Output is mono f32 at the synth's sample rate.
// ============================================================================

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::Result;
use miniaudio::{Device, DeviceConfig, DeviceType, Format};

use crate::synth::Synth;

pub struct SongPlayer {
    device: Option<Device>,
    synth: Arc<Mutex<Synth>>,
    buffer_frames: u32,
}

impl SongPlayer {
    pub fn new(synth: Synth) -> Self {
        Self { device: None, synth: Arc::new(Mutex::new(synth)), buffer_frames: 0 }
    }

    /// Frames per device callback; 0 lets the backend choose. Takes effect
    /// when the device is opened.
    pub fn with_buffer_frames(mut self, frames: u32) -> Self {
        self.buffer_frames = frames;
        self
    }

    /// Shared handle to the synth the callback renders from
    pub fn synth(&self) -> Arc<Mutex<Synth>> {
        Arc::clone(&self.synth)
    }

    /// Locks the synth for a quick edit. Don't hold the guard for long, the
    /// audio callback waits on it.
    pub fn lock(&self) -> MutexGuard<'_, Synth> {
        self.synth.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Opens and starts the audio device. Harmless to call twice.
    pub fn start(&mut self) -> Result<()> {
        if self.device.is_some() {
            return Ok(());
        }

        let sample_rate = self.lock().sample_rate();
        let synth = Arc::clone(&self.synth);

        let mut config = DeviceConfig::new(DeviceType::Playback);
        config.playback_mut().set_format(Format::F32);
        config.playback_mut().set_channels(1);
        config.set_sample_rate(sample_rate);
        if self.buffer_frames > 0 {
            config.set_period_size_in_frames(self.buffer_frames);
        }

        config.set_data_callback(move |_device, output, _input| {
            let mut synth = synth.lock().unwrap_or_else(PoisonError::into_inner);
            let frames = output.as_samples_mut::<f32>();
            if synth.is_playing() {
                synth.synthesize(frames);
            } else {
                frames.fill(0.0);
            }
        });

        let device = Device::new(None, &config)
            .map_err(|e| anyhow::anyhow!("Failed to create audio device: {:?}", e))?;

        device.start()
            .map_err(|e| anyhow::anyhow!("Failed to start audio device: {:?}", e))?;

        tracing::info!(sample_rate, buffer_frames = self.buffer_frames, "audio device started");
        self.device = Some(device);
        Ok(())
    }

    pub fn play(&mut self) {
        self.lock().play();
    }

    pub fn pause(&mut self) {
        self.lock().pause();
    }

    /// Pauses and returns to the start of the song
    pub fn stop(&mut self) {
        let mut synth = self.lock();
        synth.pause();
        synth.snap_to_start();
    }

    pub fn is_playing(&self) -> bool {
        self.lock().is_playing()
    }

    /// Playhead in bars
    pub fn playhead(&self) -> f64 {
        self.lock().playhead()
    }

    pub fn seek_to_bar(&mut self, bar: usize) {
        self.lock().go_to_bar(bar);
    }

    pub fn has_device(&self) -> bool {
        self.device.is_some()
    }
}

impl Drop for SongPlayer {
    fn drop(&mut self) {
        self.lock().pause();
        self.device = None;
    }
}

// ============================================================================
// UNIT TESTS
// ============================================================================
//
// These never open a device, so they run on machines without audio output.

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synth::SynthConfig;

    #[test]
    fn test_transport_controls_reach_the_shared_synth() {
        let mut player = SongPlayer::new(Synth::new(SynthConfig::default()));
        assert!(!player.has_device());
        assert!(!player.is_playing());

        player.play();
        assert!(player.is_playing());
        assert!(player.synth().lock().unwrap().is_playing());

        player.pause();
        assert!(!player.is_playing());
    }

    #[test]
    fn test_stop_rewinds() {
        let mut player = SongPlayer::new(Synth::new(SynthConfig::default())).with_buffer_frames(256);
        player.seek_to_bar(3);
        assert_eq!(player.playhead(), 3.0);

        player.play();
        player.stop();
        assert!(!player.is_playing());
        assert_eq!(player.playhead(), 0.0);
    }
}
