//! PCM frame math and WAV encoding
//!
//! The browser sends raw signed 16-bit little-endian mono PCM at 16 kHz in
//! 20 ms frames. Everything in here operates on that format.

use crate::{Error, Result};

/// Sample rate of inbound audio (16kHz for speech)
pub const SAMPLE_RATE: u32 = 16_000;

/// Duration of one inbound frame in milliseconds
pub const FRAME_MS: u64 = 20;

/// Samples per 20 ms frame
pub const FRAME_SAMPLES: usize = (SAMPLE_RATE as usize / 1000) * FRAME_MS as usize;

/// Bytes per frame (Int16 samples)
pub const FRAME_BYTES: usize = FRAME_SAMPLES * 2;

/// Compute the RMS energy of a PCM Int16 LE frame
///
/// Odd trailing bytes are ignored. An empty frame has zero energy.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn frame_rms(pcm: &[u8]) -> f64 {
    let mut sum_squares = 0.0_f64;
    let mut samples = 0_usize;

    for pair in pcm.chunks_exact(2) {
        let sample = f64::from(i16::from_le_bytes([pair[0], pair[1]]));
        sum_squares += sample * sample;
        samples += 1;
    }

    if samples == 0 {
        return 0.0;
    }

    (sum_squares / samples as f64).sqrt()
}

/// Wrap raw PCM Int16 LE bytes in a WAV container for STT upload
///
/// # Errors
///
/// Returns error if WAV encoding fails
pub fn pcm_to_wav(pcm: &[u8], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer =
            hound::WavWriter::new(&mut cursor, spec).map_err(|e| Error::Audio(e.to_string()))?;

        for pair in pcm.chunks_exact(2) {
            writer
                .write_sample(i16::from_le_bytes([pair[0], pair[1]]))
                .map_err(|e| Error::Audio(e.to_string()))?;
        }

        writer.finalize().map_err(|e| Error::Audio(e.to_string()))?;
    }

    Ok(cursor.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame_of(amplitude: i16) -> Vec<u8> {
        let mut frame = Vec::with_capacity(FRAME_BYTES);
        for i in 0..FRAME_SAMPLES {
            let sample = if i % 2 == 0 { amplitude } else { -amplitude };
            frame.extend_from_slice(&sample.to_le_bytes());
        }
        frame
    }

    #[test]
    fn rms_of_silence_is_zero() {
        assert_eq!(frame_rms(&vec![0u8; FRAME_BYTES]), 0.0);
        assert_eq!(frame_rms(&[]), 0.0);
    }

    #[test]
    fn rms_of_square_wave_equals_amplitude() {
        // Alternating +a/-a samples have RMS exactly a
        let rms = frame_rms(&frame_of(1000));
        assert!((rms - 1000.0).abs() < 1e-6);
    }

    #[test]
    fn wav_header_and_size() {
        let pcm = frame_of(500);
        let wav = pcm_to_wav(&pcm, SAMPLE_RATE).unwrap();

        assert_eq!(&wav[0..4], b"RIFF");
        assert_eq!(&wav[8..12], b"WAVE");
        // 44-byte canonical header plus the PCM payload
        assert_eq!(wav.len(), 44 + pcm.len());
    }

    #[test]
    fn frame_constants_match_wire_format() {
        assert_eq!(FRAME_SAMPLES, 320);
        assert_eq!(FRAME_BYTES, 640);
    }
}
