//! Turn buffered chunks into the upload payload.

use crate::capture::device::AudioChunk;
use crate::error::{Result, ShellError};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use std::io::Cursor;
use std::time::Duration;

/// A finished recording as WAV bytes.
#[derive(Debug, Clone)]
pub struct EncodedRecording {
    pub wav: Vec<u8>,
    pub sample_rate: u32,
    pub duration: Duration,
}

impl EncodedRecording {
    /// Transport-safe text form of the WAV payload.
    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.wav)
    }
}

/// Concatenate chunks (in capture order) into one mono sample buffer.
///
/// # Errors
///
/// [`ShellError::Pipeline`] when nothing was captured or chunk rates disagree.
pub fn concatenate(chunks: &[AudioChunk]) -> Result<(Vec<f32>, u32)> {
    let Some(first) = chunks.first() else {
        return Err(ShellError::Pipeline("no audio was captured".into()));
    };
    let sample_rate = first.sample_rate;
    if let Some(odd) = chunks.iter().find(|c| c.sample_rate != sample_rate) {
        return Err(ShellError::Pipeline(format!(
            "mixed sample rates in recording ({} Hz and {} Hz)",
            sample_rate, odd.sample_rate
        )));
    }

    let total: usize = chunks.iter().map(|c| c.samples.len()).sum();
    if total == 0 {
        return Err(ShellError::Pipeline("recording is silent (zero samples)".into()));
    }

    let mut samples = Vec::with_capacity(total);
    for chunk in chunks {
        samples.extend_from_slice(&chunk.samples);
    }
    Ok((samples, sample_rate))
}

/// Write mono f32 samples as 16-bit PCM WAV.
///
/// # Errors
///
/// [`ShellError::Pipeline`] if the WAV writer fails.
pub fn encode_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)
            .map_err(|e| ShellError::Pipeline(format!("cannot start WAV encoding: {e}")))?;
        for sample in samples {
            let value = (sample.clamp(-1.0, 1.0) * f32::from(i16::MAX)) as i16;
            writer
                .write_sample(value)
                .map_err(|e| ShellError::Pipeline(format!("WAV write failed: {e}")))?;
        }
        writer
            .finalize()
            .map_err(|e| ShellError::Pipeline(format!("WAV finalize failed: {e}")))?;
    }
    Ok(cursor.into_inner())
}

/// Concatenate and encode a whole recording.
///
/// # Errors
///
/// See [`concatenate`] and [`encode_wav`].
pub fn encode_recording(chunks: &[AudioChunk]) -> Result<EncodedRecording> {
    let (samples, sample_rate) = concatenate(chunks)?;
    let wav = encode_wav(&samples, sample_rate)?;
    Ok(EncodedRecording {
        wav,
        sample_rate,
        duration: Duration::from_secs_f64(samples.len() as f64 / f64::from(sample_rate)),
    })
}
