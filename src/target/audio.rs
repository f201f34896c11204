use crate::config::schema::AudioSource;
use crate::error::{Error, Result};
use std::f64::consts::PI;
use std::path::Path;
use std::sync::Arc;

pub const WAV_HEADER_LEN: usize = 44;

/// Audio payload shared by every request of a scenario.
#[derive(Debug, Clone)]
pub struct Audio {
    pub bytes: Arc<Vec<u8>>,
    pub file_name: String,
    /// Known only for generated audio.
    pub sample_rate: Option<u32>,
}

pub fn load(source: &AudioSource) -> Result<Audio> {
    match source {
        AudioSource::File(path) => Ok(Audio {
            bytes: read_file(path)?,
            file_name: path
                .file_name()
                .and_then(|name| name.to_str())
                .unwrap_or("audio.wav")
                .to_string(),
            sample_rate: None,
        }),
        AudioSource::Synthetic {
            seconds,
            frequency_hz,
            sample_rate,
        } => {
            if *sample_rate == 0 || (*sample_rate as f64 * seconds) < 1.0 {
                return Err(Error::Target(format!(
                    "synthetic audio of {}s at {} Hz has no samples",
                    seconds, sample_rate
                )));
            }
            Ok(Audio {
                bytes: Arc::new(sine_wav(*seconds, *frequency_hz, *sample_rate)),
                file_name: "test_audio.wav".to_string(),
                sample_rate: Some(*sample_rate),
            })
        }
    }
}

fn read_file(path: &Path) -> Result<Arc<Vec<u8>>> {
    let bytes = std::fs::read(path)
        .map_err(|e| Error::Target(format!("audio file {}: {}", path.display(), e)))?;
    if bytes.is_empty() {
        return Err(Error::Target(format!("audio file {} is empty", path.display())));
    }
    Ok(Arc::new(bytes))
}

/// 16-bit mono PCM WAV holding a full-scale sine tone.
pub fn sine_wav(seconds: f64, frequency_hz: f64, sample_rate: u32) -> Vec<u8> {
    let samples = (sample_rate as f64 * seconds) as usize;
    let data_len = (samples * 2) as u32;

    let mut wav = Vec::with_capacity(WAV_HEADER_LEN + samples * 2);
    wav.extend_from_slice(b"RIFF");
    wav.extend_from_slice(&(36 + data_len).to_le_bytes());
    wav.extend_from_slice(b"WAVE");
    wav.extend_from_slice(b"fmt ");
    wav.extend_from_slice(&16u32.to_le_bytes());
    wav.extend_from_slice(&1u16.to_le_bytes()); // PCM
    wav.extend_from_slice(&1u16.to_le_bytes()); // mono
    wav.extend_from_slice(&sample_rate.to_le_bytes());
    wav.extend_from_slice(&(sample_rate * 2).to_le_bytes());
    wav.extend_from_slice(&2u16.to_le_bytes());
    wav.extend_from_slice(&16u16.to_le_bytes());
    wav.extend_from_slice(b"data");
    wav.extend_from_slice(&data_len.to_le_bytes());

    for i in 0..samples {
        let t = i as f64 / sample_rate as f64;
        let sample = ((2.0 * PI * frequency_hz * t).sin() * i16::MAX as f64) as i16;
        wav.extend_from_slice(&sample.to_le_bytes());
    }
    wav
}
