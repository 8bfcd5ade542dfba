//! Sentence-boundary chunking for oversized text.
//!
//! Lengths are counted in characters, not bytes.

const TERMINATORS: &[char] = &['.', '!', '?', '…', '。', '！', '？'];

/// Split text after sentence terminators that are followed by whitespace.
pub fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();

    while let Some((idx, c)) = chars.next() {
        if !TERMINATORS.contains(&c) {
            continue;
        }
        let at_boundary = match chars.peek() {
            None => true,
            Some((_, next)) => next.is_whitespace(),
        };
        if at_boundary {
            let end = idx + c.len_utf8();
            let sentence = text[start..end].trim();
            if !sentence.is_empty() {
                sentences.push(sentence);
            }
            start = end;
        }
    }

    let rest = text[start..].trim();
    if !rest.is_empty() {
        sentences.push(rest);
    }
    sentences
}

/// Accumulates pieces into chunks of at most `limit` characters.
struct ChunkBuilder {
    limit: usize,
    chunks: Vec<String>,
    current: String,
    current_len: usize,
}

impl ChunkBuilder {
    fn new(limit: usize) -> Self {
        Self {
            limit,
            chunks: Vec::new(),
            current: String::new(),
            current_len: 0,
        }
    }

    /// Append a piece no longer than the limit, starting a new chunk if needed.
    fn push(&mut self, piece: &str, len: usize) {
        let needed = if self.current.is_empty() { len } else { self.current_len + 1 + len };
        if needed > self.limit {
            self.flush();
        }
        if !self.current.is_empty() {
            self.current.push(' ');
            self.current_len += 1;
        }
        self.current.push_str(piece);
        self.current_len += len;
    }

    fn flush(&mut self) {
        if !self.current.is_empty() {
            self.chunks.push(std::mem::take(&mut self.current));
            self.current_len = 0;
        }
    }

    fn finish(mut self) -> Vec<String> {
        self.flush();
        self.chunks
    }
}

/// Split `text` into chunks of at most `threshold` characters.
///
/// Chunks break on sentence boundaries. A sentence longer than the threshold
/// is split on whitespace, and a single word longer than the threshold is
/// split on characters.
pub fn chunk_text(text: &str, threshold: usize) -> Vec<String> {
    let threshold = threshold.max(1);
    let mut builder = ChunkBuilder::new(threshold);

    for sentence in split_sentences(text) {
        let len = sentence.chars().count();
        if len <= threshold {
            builder.push(sentence, len);
            continue;
        }

        builder.flush();
        let mut words = ChunkBuilder::new(threshold);
        for word in sentence.split_whitespace() {
            let word_len = word.chars().count();
            if word_len <= threshold {
                words.push(word, word_len);
                continue;
            }
            let chars: Vec<char> = word.chars().collect();
            for piece in chars.chunks(threshold) {
                words.push(&piece.iter().collect::<String>(), piece.len());
            }
        }
        builder.chunks.extend(words.finish());
    }

    builder.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_text(sentences: usize) -> String {
        (0..sentences)
            .map(|i| format!("Sentence number {} talks about distributed queues and locks.", i))
            .collect::<Vec<_>>()
            .join(" ")
    }

    #[test]
    fn test_split_sentences() {
        let text = "First one. Second one? Third! Version 1.5 is out… Trailing";
        assert_eq!(
            split_sentences(text),
            vec!["First one.", "Second one?", "Third!", "Version 1.5 is out…", "Trailing"]
        );
    }

    #[test]
    fn test_short_text_is_one_chunk() {
        let text = sample_text(3);
        assert_eq!(chunk_text(&text, 30_000), vec![text]);
    }

    #[test]
    fn test_chunks_respect_threshold_and_boundaries() {
        let text = sample_text(400);
        let threshold = 1_000;
        let total = text.chars().count();

        let chunks = chunk_text(&text, threshold);

        assert!(chunks.len() >= total.div_ceil(threshold));
        for chunk in &chunks {
            assert!(chunk.chars().count() <= threshold);
            assert!(chunk.starts_with("Sentence number"));
            assert!(chunk.ends_with("locks."));
        }
        assert_eq!(chunks.join(" "), text);
    }

    #[test]
    fn test_oversized_sentence_is_hard_split() {
        let long_sentence = "word ".repeat(100);
        let text = format!("Short one. {}", long_sentence.trim());

        let chunks = chunk_text(&text, 50);

        assert_eq!(chunks[0], "Short one.");
        assert!(chunks.iter().all(|c| c.chars().count() <= 50));
        let words: usize = chunks[1..].iter().map(|c| c.split_whitespace().count()).sum();
        assert_eq!(words, 100);
    }

    #[test]
    fn test_oversized_word_is_split_on_characters() {
        let text = "ş".repeat(25);
        let chunks = chunk_text(&text, 10);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[2].chars().count(), 5);
    }
}
