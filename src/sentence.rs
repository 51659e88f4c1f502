//! Incremental sentence splitting for the LLM token stream
//!
//! Batching tokens into sentences before synthesis yields usable prosody and
//! valid MP3 framing; synthesizing token-by-token returns no audio at all.
//! A boundary is the shortest prefix ending in `.` `!` `?` `\n` or the
//! Devanagari full stop `।`, followed by whitespace, that contains at least
//! three non-space characters. Abbreviations are not disambiguated; replies
//! are short spoken sentences, so the error rate is acceptable.

/// Minimum non-space characters a sentence must contain
const MIN_SENTENCE_CHARS: usize = 3;

fn is_terminator(c: char) -> bool {
    matches!(c, '.' | '!' | '?' | '\n' | '\u{0964}')
}

/// Splits an incrementally fed token stream into speakable sentences
#[derive(Debug, Default)]
pub struct SentenceSplitter {
    buffer: String,
}

impl SentenceSplitter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one token; returns any sentences completed by it
    ///
    /// Emitted sentences are trimmed. Text after the last boundary stays
    /// buffered until the next token or [`SentenceSplitter::flush`].
    pub fn push(&mut self, token: &str) -> Vec<String> {
        self.buffer.push_str(token);

        let mut sentences = Vec::new();
        while let Some(end) = self.find_boundary() {
            let sentence = self.buffer[..end].trim().to_string();
            self.buffer = self.buffer[end..].trim_start().to_string();
            sentences.push(sentence);
        }
        sentences
    }

    /// Flush the trailing buffer as a final sentence at end of stream
    pub fn flush(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buffer);
        let rest = rest.trim();
        if rest.is_empty() {
            None
        } else {
            Some(rest.to_string())
        }
    }

    /// Text currently buffered and not yet emitted
    #[must_use]
    pub fn pending(&self) -> &str {
        &self.buffer
    }

    /// Byte index one past the earliest valid sentence terminator
    ///
    /// A terminator at the very end of the buffer is not a boundary: the next
    /// token may continue the sentence (e.g. "3." + "14").
    fn find_boundary(&self) -> Option<usize> {
        let mut non_space = 0_usize;
        let mut chars = self.buffer.char_indices().peekable();

        while let Some((idx, c)) = chars.next() {
            if !c.is_whitespace() {
                non_space += 1;
            }
            if is_terminator(c) && non_space >= MIN_SENTENCE_CHARS {
                if let Some(&(_, next)) = chars.peek() {
                    if next.is_whitespace() {
                        return Some(idx + c.len_utf8());
                    }
                }
            }
        }
        None
    }
}
