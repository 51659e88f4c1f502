//! Frame-level energy voice-activity detection
//!
//! A two-threshold design: a low RMS threshold separates speech from silence
//! for end-of-utterance detection, and a much higher one detects interrupt
//! intent while the assistant holds the floor. The high threshold fires on a
//! single frame; responsiveness outweighs the false-positive risk.

use crate::audio::{frame_rms, FRAME_MS};

/// Tuning parameters for the silence detector
#[derive(Debug, Clone)]
pub struct SilenceConfig {
    /// Frames with RMS below this are silence
    pub silence_rms: f64,

    /// RMS at or above this during assistant output is a barge-in
    pub barge_in_rms: f64,

    /// Consecutive silence needed to end the user's turn
    pub turn_end_silence_ms: u64,

    /// Voiced frames required before a turn-end may fire; guards against
    /// emitting a turn for a puff of noise
    pub min_voiced_frames: u32,

    /// Hard cap on the per-turn audio buffer (~10 s); reaching it forces a
    /// turn-end
    pub max_turn_buffer_bytes: usize,
}

impl Default for SilenceConfig {
    fn default() -> Self {
        Self {
            silence_rms: 150.0,
            barge_in_rms: 800.0,
            turn_end_silence_ms: 700,
            min_voiced_frames: 5,
            max_turn_buffer_bytes: 320 * 1024,
        }
    }
}

/// Classification of one ingested frame
#[derive(Debug, Clone, Copy)]
pub struct FrameOutcome {
    /// The frame carried speech energy
    pub voiced: bool,
    /// The user's turn ended with this frame
    pub turn_end: bool,
}

/// Per-session energy detector with rolling counters and the turn's audio
/// buffer
///
/// Only meaningful while the user holds the floor; while the assistant is
/// speaking the session consults [`SilenceDetector::is_barge_in`] instead and
/// frames are not ingested.
#[derive(Debug)]
pub struct SilenceDetector {
    config: SilenceConfig,
    consecutive_silent_ms: u64,
    voiced_frames: u32,
    buffer: Vec<u8>,
    frames_seen: u64,
}

impl SilenceDetector {
    #[must_use]
    pub fn new(config: SilenceConfig) -> Self {
        Self {
            config,
            consecutive_silent_ms: 0,
            voiced_frames: 0,
            buffer: Vec::new(),
            frames_seen: 0,
        }
    }

    /// Ingest one 20 ms frame while the user is speaking
    ///
    /// Voiced frames always accumulate into the turn buffer; silent frames
    /// accumulate only once the utterance has started, so leading silence is
    /// never buffered.
    pub fn ingest(&mut self, frame: &[u8]) -> FrameOutcome {
        let rms = frame_rms(frame);
        let voiced = rms >= self.config.silence_rms;

        self.frames_seen += 1;
        if self.frames_seen % 50 == 0 {
            tracing::debug!(
                rms = format!("{rms:.0}"),
                voiced_frames = self.voiced_frames,
                silence_run_ms = self.consecutive_silent_ms,
                "frame energy"
            );
        }

        if voiced {
            self.consecutive_silent_ms = 0;
            self.voiced_frames += 1;
            self.buffer.extend_from_slice(frame);
        } else {
            self.consecutive_silent_ms += FRAME_MS;
            if self.voiced_frames > 0 {
                self.buffer.extend_from_slice(frame);
            }
        }

        let mut turn_end = false;
        if self.voiced_frames >= self.config.min_voiced_frames {
            if self.consecutive_silent_ms >= self.config.turn_end_silence_ms
                || self.buffer.len() >= self.config.max_turn_buffer_bytes
            {
                turn_end = true;
            }
        } else if self.buffer.len() >= self.config.max_turn_buffer_bytes {
            // Buffer filled without enough speech to hand to STT; drop it
            tracing::warn!(bytes = self.buffer.len(), "discarding low-speech turn buffer");
            self.reset();
        }

        FrameOutcome { voiced, turn_end }
    }

    /// Whether an RMS value crosses the interrupt threshold
    #[must_use]
    pub fn is_barge_in(&self, rms: f64) -> bool {
        rms >= self.config.barge_in_rms
    }

    /// Take the finished turn's audio and reset all counters
    pub fn take_turn(&mut self) -> Vec<u8> {
        self.consecutive_silent_ms = 0;
        self.voiced_frames = 0;
        std::mem::take(&mut self.buffer)
    }

    /// Discard any buffered audio and counters
    pub fn reset(&mut self) {
        self.consecutive_silent_ms = 0;
        self.voiced_frames = 0;
        self.buffer.clear();
    }

    /// Voiced frames seen in the current turn
    #[must_use]
    pub const fn voiced_frames(&self) -> u32 {
        self.voiced_frames
    }

    /// Bytes buffered for the current turn
    #[must_use]
    pub fn buffered_bytes(&self) -> usize {
        self.buffer.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::FRAME_BYTES;

    fn frame(amplitude: i16) -> Vec<u8> {
        let mut out = Vec::with_capacity(FRAME_BYTES);
        for i in 0..FRAME_BYTES / 2 {
            let sample = if i % 2 == 0 { amplitude } else { -amplitude };
            out.extend_from_slice(&sample.to_le_bytes());
        }
        out
    }

    fn detector() -> SilenceDetector {
        SilenceDetector::new(SilenceConfig::default())
    }

    #[test]
    fn leading_silence_is_not_buffered() {
        let mut det = detector();
        let outcome = det.ingest(&frame(0));

        assert!(!outcome.voiced);
        assert!(!outcome.turn_end);
        assert_eq!(det.buffered_bytes(), 0);
    }

    #[test]
    fn turn_end_after_voiced_speech_and_silence() {
        let mut det = detector();

        // 1 s of speech
        for _ in 0..50 {
            let outcome = det.ingest(&frame(3000));
            assert!(outcome.voiced);
            assert!(!outcome.turn_end);
        }

        // 700 ms of silence = 35 frames; the 35th crosses the threshold
        for i in 0..34 {
            assert!(!det.ingest(&frame(0)).turn_end, "fired early at frame {i}");
        }
        assert!(det.ingest(&frame(0)).turn_end);

        // The buffer holds the speech plus the trailing silence
        assert_eq!(det.buffered_bytes(), (50 + 35) * FRAME_BYTES);
    }

    #[test]
    fn short_noise_never_ends_a_turn() {
        let mut det = detector();

        // Two voiced frames, below the minimum of five
        det.ingest(&frame(1000));
        det.ingest(&frame(1000));

        // 2 s of silence
        for _ in 0..100 {
            assert!(!det.ingest(&frame(0)).turn_end);
        }
        assert_eq!(det.voiced_frames(), 2);
    }

    #[test]
    fn voiced_frame_resets_silence_run() {
        let mut det = detector();
        for _ in 0..10 {
            det.ingest(&frame(3000));
        }
        for _ in 0..30 {
            det.ingest(&frame(0));
        }
        // Speech resumes before the 700 ms threshold
        det.ingest(&frame(3000));
        for _ in 0..34 {
            assert!(!det.ingest(&frame(0)).turn_end);
        }
        assert!(det.ingest(&frame(0)).turn_end);
    }

    #[test]
    fn buffer_cap_forces_turn_end() {
        let config = SilenceConfig {
            max_turn_buffer_bytes: 20 * FRAME_BYTES,
            ..SilenceConfig::default()
        };
        let mut det = SilenceDetector::new(config);

        let mut ended = false;
        for _ in 0..20 {
            if det.ingest(&frame(3000)).turn_end {
                ended = true;
                break;
            }
        }
        assert!(ended);
        assert!(det.voiced_frames() >= 5);
    }

    #[test]
    fn barge_in_threshold_is_inclusive() {
        let det = detector();
        assert!(det.is_barge_in(800.0));
        assert!(det.is_barge_in(1200.0));
        assert!(!det.is_barge_in(799.0));
    }

    #[test]
    fn take_turn_drains_and_resets() {
        let mut det = detector();
        for _ in 0..10 {
            det.ingest(&frame(3000));
        }

        let audio = det.take_turn();
        assert_eq!(audio.len(), 10 * FRAME_BYTES);
        assert_eq!(det.buffered_bytes(), 0);
        assert_eq!(det.voiced_frames(), 0);
    }

    #[test]
    fn longer_turn_end_window_is_respected() {
        let config = SilenceConfig {
            turn_end_silence_ms: 900,
            ..SilenceConfig::default()
        };
        let mut det = SilenceDetector::new(config);

        for _ in 0..10 {
            det.ingest(&frame(3000));
        }
        // 700 ms is no longer enough
        for _ in 0..35 {
            assert!(!det.ingest(&frame(0)).turn_end);
        }
        // 900 ms = 45 frames
        for _ in 0..9 {
            assert!(!det.ingest(&frame(0)).turn_end);
        }
        assert!(det.ingest(&frame(0)).turn_end);
    }
}
