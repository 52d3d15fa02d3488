use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SampleFormat, SizedSample};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

use crate::device::MuteSwitch;
use crate::scheduler::SignalSink;
use crate::tune::{Note, Tune};
use crate::{Error, Result};

/// Output level of the synthesized tone (0.0-1.0)
const VOLUME: f32 = 0.25;

/// Fraction of each note left silent so repeated notes stay distinct
const ARTICULATION_GAP: f32 = 0.1;

/// Extra time the stream is kept alive after the last note
const TAIL: Duration = Duration::from_millis(200);

/// Waveform used to synthesize notes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Waveform {
    /// Buzzer-like square wave, like a piezo speaker
    #[default]
    Square,
    /// Softer sine wave
    Sine,
}

/// Plays the night tune on an audio output device
pub struct TunePlayer {
    /// Tune played every night
    tune: Arc<Tune>,
    /// Hardware or configured mute flag
    mute: MuteSwitch,
    /// Optional output device name (substring match)
    device_name: Option<String>,
    /// Waveform used for synthesis
    waveform: Waveform,
    /// Set while a tune is playing
    playing: Arc<AtomicBool>,
    /// Message of the last playback failure on the audio thread
    last_error: Arc<Mutex<Option<String>>>,
}

impl TunePlayer {
    /// Create a player for a tune on the default output device
    pub fn new(tune: Tune, mute: MuteSwitch) -> Self {
        Self {
            tune: Arc::new(tune),
            mute,
            device_name: None,
            waveform: Waveform::default(),
            playing: Arc::new(AtomicBool::new(false)),
            last_error: Arc::new(Mutex::new(None)),
        }
    }

    /// Selects an output device by name
    pub fn with_device(mut self, device_name: Option<String>) -> Self {
        self.device_name = device_name;
        self
    }

    /// Selects the waveform
    pub fn with_waveform(mut self, waveform: Waveform) -> Self {
        self.waveform = waveform;
        self
    }

    /// Whether a tune is currently playing
    pub fn is_playing(&self) -> bool {
        self.playing.load(Ordering::Relaxed)
    }

    /// Last failure reported by the playback thread, if any
    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().clone()
    }

    /// Plays the tune and blocks until it finishes
    pub fn play_blocking(&self) -> Result<()> {
        play_tune(&self.tune, self.device_name.as_deref(), self.waveform)
    }
}

impl SignalSink for TunePlayer {
    fn is_muted(&self) -> bool {
        self.mute.is_muted()
    }

    #[instrument(skip(self), fields(tune = %self.tune.name))]
    fn play_night_signal(&mut self) -> Result<()> {
        if self.playing.swap(true, Ordering::AcqRel) {
            warn!("Night tune still playing, not starting another");
            return Ok(());
        }

        let tune = self.tune.clone();
        let device_name = self.device_name.clone();
        let waveform = self.waveform;
        let playing = self.playing.clone();
        let last_error = self.last_error.clone();

        // cpal streams are not Send, so the whole playback lives on its own thread
        let spawned = std::thread::Builder::new()
            .name("night-tune".into())
            .spawn(move || {
                if let Err(e) = play_tune(&tune, device_name.as_deref(), waveform) {
                    error!("Night tune failed: {}", e);
                    *last_error.lock() = Some(e.to_string());
                }
                playing.store(false, Ordering::Release);
            });

        if let Err(e) = spawned {
            self.playing.store(false, Ordering::Release);
            return Err(Error::Audio(format!("failed to start playback thread: {}", e)));
        }
        Ok(())
    }
}

/// Opens an output device and plays `tune` to the end
#[instrument(skip(tune), fields(tune = %tune.name))]
fn play_tune(tune: &Tune, device_name: Option<&str>, waveform: Waveform) -> Result<()> {
    let host = cpal::default_host();

    let device = match device_name {
        Some(name) => {
            debug!("Searching for audio output device with name: {}", name);
            host.output_devices()
                .map_err(|e| Error::Audio(format!("failed to enumerate output devices: {}", e)))?
                .find(|device| device.name().map(|n| n.contains(name)).unwrap_or(false))
                .ok_or_else(|| Error::Audio(format!("could not find output device: {}", name)))?
        }
        None => host
            .default_output_device()
            .ok_or_else(|| Error::Audio("no default output device".into()))?,
    };

    let supported = device
        .default_output_config()
        .map_err(|e| Error::Audio(format!("failed to get default output config: {}", e)))?;
    let sample_format = supported.sample_format();
    let config: cpal::StreamConfig = supported.into();
    debug!(
        "Playing on {} at {} Hz, {} channel(s)",
        device.name().unwrap_or_default(),
        config.sample_rate.0,
        config.channels
    );

    let synth = Synth::new(&tune.notes, config.sample_rate.0 as f32, waveform);
    let stream = match sample_format {
        SampleFormat::F32 => build_output_stream::<f32>(&device, &config, synth),
        SampleFormat::I16 => build_output_stream::<i16>(&device, &config, synth),
        SampleFormat::U16 => build_output_stream::<u16>(&device, &config, synth),
        other => Err(Error::Audio(format!("unsupported sample format {:?}", other))),
    }?;

    stream
        .play()
        .map_err(|e| Error::Audio(format!("failed to start stream: {}", e)))?;
    info!("Playing {} ({:.1}s)", tune.name, tune.duration().as_secs_f32());
    std::thread::sleep(tune.duration() + TAIL);
    Ok(())
}

fn build_output_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut synth: Synth,
) -> Result<cpal::Stream>
where
    T: SizedSample + FromSample<f32>,
{
    let channels = config.channels as usize;
    let err_fn = |err| error!("Audio stream error: {}", err);

    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                for frame in data.chunks_mut(channels) {
                    let value = <T as Sample>::from_sample(synth.next_sample());
                    for sample in frame.iter_mut() {
                        *sample = value;
                    }
                }
            },
            err_fn,
            None,
        )
        .map_err(|e| Error::Audio(format!("stream build error: {}", e)))
}

/// Sample generator walking through a note list
struct Synth {
    /// (frequency, sounding samples, total samples) per note
    notes: Vec<(Option<f32>, u64, u64)>,
    sample_rate: f32,
    waveform: Waveform,
    index: usize,
    position: u64,
    phase: f32,
}

impl Synth {
    fn new(notes: &[Note], sample_rate: f32, waveform: Waveform) -> Self {
        let notes = notes
            .iter()
            .map(|note| {
                let total = (note.duration.as_secs_f64() * f64::from(sample_rate)).round() as u64;
                let gap = (total as f32 * ARTICULATION_GAP).round() as u64;
                let sounding = total - gap;
                (note.frequency, sounding, total)
            })
            .collect();
        Self {
            notes,
            sample_rate,
            waveform,
            index: 0,
            position: 0,
            phase: 0.0,
        }
    }

    fn next_sample(&mut self) -> f32 {
        while let Some(&(_, _, total)) = self.notes.get(self.index) {
            if self.position < total {
                break;
            }
            self.index += 1;
            self.position = 0;
            self.phase = 0.0;
        }

        let Some(&(frequency, sounding, _)) = self.notes.get(self.index) else {
            return 0.0;
        };
        self.position += 1;

        match frequency {
            Some(frequency) if self.position <= sounding => {
                self.phase = (self.phase + frequency / self.sample_rate).fract();
                let value = match self.waveform {
                    Waveform::Square => {
                        if self.phase < 0.5 {
                            1.0
                        } else {
                            -1.0
                        }
                    }
                    Waveform::Sine => (self.phase * std::f32::consts::TAU).sin(),
                };
                value * VOLUME
            }
            _ => 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn note(frequency: Option<f32>, millis: u64) -> Note {
        Note {
            frequency,
            duration: Duration::from_millis(millis),
        }
    }

    #[test]
    fn synth_plays_notes_then_silence() {
        // 1 kHz sample rate keeps the arithmetic readable
        let mut synth = Synth::new(&[note(Some(250.0), 10), note(None, 5)], 1000.0, Waveform::Square);
        let samples: Vec<f32> = (0..20).map(|_| synth.next_sample()).collect();

        // 9 sounding samples, 1 articulation gap sample
        assert!(samples[..9].iter().all(|s| s.abs() == VOLUME));
        assert_eq!(samples[9], 0.0);
        // the rest, then past the end of the tune
        assert!(samples[10..].iter().all(|&s| s == 0.0));
    }

    #[test]
    fn square_wave_alternates_at_frequency() {
        let mut synth = Synth::new(&[note(Some(250.0), 100)], 1000.0, Waveform::Square);
        let samples: Vec<f32> = (0..8).map(|_| synth.next_sample()).collect();
        // period of four samples: phase 0.25, 0.5, 0.75, 0.0 ...
        assert_eq!(
            samples,
            vec![VOLUME, -VOLUME, -VOLUME, VOLUME, VOLUME, -VOLUME, -VOLUME, VOLUME]
        );
    }

    #[test]
    fn muted_player_reports_muted() {
        let tune = Tune::parse("x:d=4,o=5,b=120:c").unwrap();
        let player = TunePlayer::new(tune, MuteSwitch::Fixed(true));
        assert!(player.is_muted());
        assert!(!player.is_playing());
        assert_eq!(player.last_error(), None);
    }
}
