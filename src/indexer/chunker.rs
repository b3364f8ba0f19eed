//! Overlapping, boundary-aware document chunking.
//!
//! All offsets are in characters, not bytes.

use crate::config::ChunkingConfig;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub text: String,
    pub char_offset: usize,
    /// Characters shared with the previous chunk (0 for the first).
    pub overlap_length: usize,
}

impl Chunk {
    pub fn char_len(&self) -> usize {
        self.text.chars().count()
    }

    pub fn char_end(&self) -> usize {
        self.char_offset + self.char_len()
    }
}

/// Split `text` into chunks of at most `chunk_size` characters.
///
/// A chunk prefers to end after a sentence terminator in the second half of
/// its window, then at whitespace, else it is cut hard. The next chunk begins
/// `overlap` characters before the previous end, moved back by at most
/// `overlap_tolerance` characters so it starts on a token boundary.
///
/// `config` must have passed [`ChunkingConfig::validate`].
pub fn chunk_document(text: &str, config: &ChunkingConfig) -> Vec<Chunk> {
    let chars: Vec<char> = text.chars().collect();
    let len = chars.len();
    let mut chunks = Vec::new();

    if text.trim().is_empty() {
        return chunks;
    }

    let mut start = 0usize;
    let mut overlap_length = 0usize;

    loop {
        let hard_end = (start + config.chunk_size).min(len);
        let end = if hard_end == len {
            len
        } else {
            break_point(&chars, start, hard_end, config)
        };

        chunks.push(Chunk {
            text: chars[start..end].iter().collect(),
            char_offset: start,
            overlap_length,
        });

        if end == len {
            break;
        }

        let next = next_start(&chars, end, config);
        overlap_length = end - next;
        start = next;
    }

    chunks
}

fn break_point(chars: &[char], start: usize, hard_end: usize, config: &ChunkingConfig) -> usize {
    let min_span = (config.chunk_size / 2).max(config.overlap + config.overlap_tolerance + 1);
    let min_end = start + min_span;

    // Sentence end: terminator followed by whitespace.
    for i in (min_end..=hard_end).rev() {
        if matches!(chars[i - 1], '.' | '!' | '?') && chars[i].is_whitespace() {
            return i;
        }
    }

    for i in (min_end..=hard_end).rev() {
        if chars[i].is_whitespace() {
            return i;
        }
    }

    hard_end
}

fn next_start(chars: &[char], end: usize, config: &ChunkingConfig) -> usize {
    let ideal = end - config.overlap;
    let floor = ideal.saturating_sub(config.overlap_tolerance);

    for p in (floor..=ideal).rev() {
        if p == 0 || chars[p - 1].is_whitespace() {
            return p;
        }
    }
    ideal
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filing_text(sentences: usize) -> String {
        (0..sentences)
            .map(|i| {
                format!(
                    "Sentence {} discusses liquidity, leverage and refinancing risk in detail. ",
                    i
                )
            })
            .collect()
    }

    #[test]
    fn test_consecutive_chunks_share_configured_overlap() {
        let config = ChunkingConfig::default();
        let text = filing_text(200);
        let chars: Vec<char> = text.chars().collect();
        let chunks = chunk_document(&text, &config);

        assert!(chunks.len() > 3);
        for pair in chunks.windows(2) {
            let (prev, next) = (&pair[0], &pair[1]);
            let shared = prev.char_end() - next.char_offset;

            assert_eq!(shared, next.overlap_length);
            assert!(shared >= config.overlap, "overlap {} too small", shared);
            assert!(
                shared <= config.overlap + config.overlap_tolerance,
                "overlap {} too large",
                shared
            );

            let prev_tail: String = chars[next.char_offset..prev.char_end()].iter().collect();
            assert!(prev.text.ends_with(&prev_tail));
            assert!(next.text.starts_with(&prev_tail));
        }
    }

    #[test]
    fn test_chunks_respect_max_length_and_cover_text() {
        let config = ChunkingConfig::default();
        let text = filing_text(120);
        let chunks = chunk_document(&text, &config);

        assert!(chunks.iter().all(|c| c.char_len() <= config.chunk_size));
        assert_eq!(chunks.first().unwrap().char_offset, 0);
        assert_eq!(chunks.last().unwrap().char_end(), text.chars().count());
    }

    #[test]
    fn test_chunks_prefer_sentence_boundaries() {
        let config = ChunkingConfig::default();
        let text = filing_text(120);
        let chunks = chunk_document(&text, &config);

        for chunk in &chunks[..chunks.len() - 1] {
            assert!(chunk.text.ends_with('.'), "chunk ended mid-sentence: {:?}", chunk.text);
        }
    }

    #[test]
    fn test_next_chunk_starts_on_token_boundary() {
        let config = ChunkingConfig::default();
        let text = filing_text(120);
        let chars: Vec<char> = text.chars().collect();

        for chunk in chunk_document(&text, &config).iter().skip(1) {
            assert!(chars[chunk.char_offset - 1].is_whitespace());
        }
    }

    #[test]
    fn test_unbroken_text_is_cut_hard_with_exact_overlap() {
        let config = ChunkingConfig {
            chunk_size: 100,
            overlap: 20,
            overlap_tolerance: 5,
        };
        let text = "x".repeat(250);
        let chunks = chunk_document(&text, &config);

        assert_eq!(chunks[0].char_len(), 100);
        assert_eq!(chunks[1].char_offset, 80);
        assert_eq!(chunks[1].overlap_length, 20);
        assert_eq!(chunks.last().unwrap().char_end(), 250);
    }

    #[test]
    fn test_multibyte_text_uses_char_offsets() {
        let config = ChunkingConfig {
            chunk_size: 60,
            overlap: 10,
            overlap_tolerance: 4,
        };
        let text = "Émission d'obligations à long terme. ".repeat(10);
        let chunks = chunk_document(&text, &config);

        let rebuilt: String = text.chars().skip(chunks[1].char_offset).take(chunks[1].char_len()).collect();
        assert_eq!(rebuilt, chunks[1].text);
    }

    #[test]
    fn test_short_and_blank_documents() {
        let config = ChunkingConfig::default();
        assert!(chunk_document("   \n ", &config).is_empty());

        let single = chunk_document("Short filing.", &config);
        assert_eq!(single.len(), 1);
        assert_eq!(single[0].overlap_length, 0);
    }
}
