//! WAV input for one-shot transcription requests.

use crate::defaults::SAMPLE_RATE;
use crate::error::{Result, ScribeError};
use std::io::Read;
use std::path::Path;

/// Decoded audio ready for the inference pipeline: 16 kHz mono in `[-1, 1]`.
#[derive(Debug, Clone, PartialEq)]
pub struct WavAudio {
    pub samples: Vec<f32>,
    /// Sample rate of the source file before resampling.
    pub source_rate: u32,
    pub source_channels: u16,
}

impl WavAudio {
    /// Read and convert a WAV file.
    pub fn open(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path).map_err(|e| ScribeError::Audio {
            message: format!("Failed to open {}: {}", path.display(), e),
        })?;
        Self::from_reader(std::io::BufReader::new(file))
    }

    /// Read all of stdin as a WAV stream.
    pub fn from_stdin() -> Result<Self> {
        use std::io::Cursor;

        let mut buffer = Vec::new();
        std::io::stdin()
            .lock()
            .read_to_end(&mut buffer)
            .map_err(|e| ScribeError::Audio {
                message: format!("Failed to read from stdin: {}", e),
            })?;

        Self::from_reader(Cursor::new(buffer))
    }

    /// Parse WAV data of any sample rate, channel count and sample format.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut wav_reader = hound::WavReader::new(reader).map_err(|e| ScribeError::Audio {
            message: format!("Failed to parse WAV file: {}", e),
        })?;

        let spec = wav_reader.spec();
        if spec.channels == 0 {
            return Err(ScribeError::Audio {
                message: "WAV file declares zero channels".to_string(),
            });
        }

        let interleaved: Vec<f32> = match spec.sample_format {
            hound::SampleFormat::Float => wav_reader
                .samples::<f32>()
                .collect::<std::result::Result<Vec<_>, _>>(),
            hound::SampleFormat::Int => {
                let scale = (1i64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
                wav_reader
                    .samples::<i32>()
                    .map(|s| s.map(|s| s as f32 / scale))
                    .collect::<std::result::Result<Vec<_>, _>>()
            }
        }
        .map_err(|e| ScribeError::Audio {
            message: format!("Failed to read WAV samples: {}", e),
        })?;

        let mono = downmix(&interleaved, spec.channels);
        let samples = resample(&mono, spec.sample_rate, SAMPLE_RATE)
            .into_iter()
            .map(|s| s.clamp(-1.0, 1.0))
            .collect();

        Ok(Self {
            samples,
            source_rate: spec.sample_rate,
            source_channels: spec.channels,
        })
    }

    /// Duration of the converted audio in seconds.
    pub fn duration_secs(&self) -> f64 {
        self.samples.len() as f64 / SAMPLE_RATE as f64
    }
}

/// Average interleaved frames down to one channel.
fn downmix(samples: &[f32], channels: u16) -> Vec<f32> {
    if channels == 1 {
        return samples.to_vec();
    }
    let channels = channels as usize;
    samples
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

/// Simple linear interpolation resampling.
fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || samples.is_empty() || from_rate == 0 {
        return samples.to_vec();
    }

    let ratio = from_rate as f64 / to_rate as f64;
    let output_len = (samples.len() as f64 / ratio).ceil() as usize;

    (0..output_len)
        .map(|i| {
            let source_pos = i as f64 * ratio;
            let source_idx = (source_pos.floor() as usize).min(samples.len() - 1);
            let fraction = (source_pos - source_idx as f64) as f32;

            if source_idx + 1 >= samples.len() {
                samples[source_idx]
            } else {
                let left = samples[source_idx];
                let right = samples[source_idx + 1];
                left + (right - left) * fraction
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn make_wav_data(sample_rate: u32, channels: u16, samples: &[i16]) -> Vec<u8> {
        let mut cursor = Cursor::new(Vec::new());
        let spec = hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
        for &s in samples {
            writer.write_sample(s).unwrap();
        }
        writer.finalize().unwrap();
        cursor.into_inner()
    }

    #[test]
    fn from_reader_16khz_mono_scales_to_unit_range() {
        let wav_data = make_wav_data(16000, 1, &[0, 16384, -32768]);

        let audio = WavAudio::from_reader(Cursor::new(wav_data)).unwrap();

        assert_eq!(audio.samples, vec![0.0, 0.5, -1.0]);
        assert_eq!(audio.source_rate, 16000);
        assert_eq!(audio.source_channels, 1);
    }

    #[test]
    fn from_reader_stereo_downmixes_to_mono() {
        // Stereo pairs: (16384, 0), (-16384, -16384)
        let wav_data = make_wav_data(16000, 2, &[16384, 0, -16384, -16384]);

        let audio = WavAudio::from_reader(Cursor::new(wav_data)).unwrap();

        assert_eq!(audio.samples, vec![0.25, -0.5]);
    }

    #[test]
    fn from_reader_48khz_resamples_to_16khz() {
        let wav_data = make_wav_data(48000, 1, &vec![0i16; 48000]);

        let audio = WavAudio::from_reader(Cursor::new(wav_data)).unwrap();

        assert_eq!(audio.samples.len(), 16000);
        assert!((audio.duration_secs() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn from_reader_float_wav() {
        let mut cursor = Cursor::new(Vec::new());
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 16000,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };
        let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
        for s in [0.25f32, -0.75, 1.5] {
            writer.write_sample(s).unwrap();
        }
        writer.finalize().unwrap();

        let audio = WavAudio::from_reader(Cursor::new(cursor.into_inner())).unwrap();

        // Out-of-range samples are clamped.
        assert_eq!(audio.samples, vec![0.25, -0.75, 1.0]);
    }

    #[test]
    fn from_reader_rejects_garbage() {
        let result = WavAudio::from_reader(Cursor::new(b"definitely not a wav".to_vec()));
        assert!(matches!(result, Err(ScribeError::Audio { .. })));
    }

    #[test]
    fn open_missing_file_is_audio_error() {
        let result = WavAudio::open(Path::new("/nonexistent/streamscribe/input.wav"));
        match result {
            Err(ScribeError::Audio { message }) => assert!(message.contains("Failed to open")),
            other => panic!("Expected Audio error, got: {:?}", other),
        }
    }

    #[test]
    fn resample_interpolates_between_samples() {
        let upsampled = resample(&[0.0, 1.0], 8000, 16000);
        assert_eq!(upsampled, vec![0.0, 0.5, 1.0, 1.0]);
    }

    #[test]
    fn resample_same_rate_is_identity() {
        assert_eq!(resample(&[0.1, 0.2], 16000, 16000), vec![0.1, 0.2]);
    }
}
