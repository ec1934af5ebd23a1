//! Sentence-aware text chunking
//!
//! Long inputs are synthesized per chunk; chunks break on sentence-final
//! punctuation so prosody stays natural across the seams.

/// Split text into chunks of at most `max_chars` characters, preferring
/// sentence boundaries
pub fn chunk_text(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0usize;

    for sentence in split_sentences(text) {
        let sent_len = sentence.chars().count();

        if current_len + sent_len > max_chars && !current.is_empty() {
            chunks.push(current.trim().to_string());
            current.clear();
            current_len = 0;
        }

        // A single oversized sentence gets hard-split on whitespace
        if sent_len > max_chars {
            for word in sentence.split_whitespace() {
                let word_len = word.chars().count() + 1;
                if current_len + word_len > max_chars && !current.is_empty() {
                    chunks.push(current.trim().to_string());
                    current.clear();
                    current_len = 0;
                }
                current.push_str(word);
                current.push(' ');
                current_len += word_len;
            }
        } else {
            current.push_str(&sentence);
            current.push(' ');
            current_len += sent_len + 1;
        }
    }

    if !current.trim().is_empty() {
        chunks.push(current.trim().to_string());
    }

    chunks
}

fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();

    for c in text.chars() {
        current.push(c);
        if matches!(c, '.' | '!' | '?' | ';' | '\u{3002}' | '\u{FF01}' | '\u{FF1F}' | '\u{FF1B}') {
            sentences.push(current.clone());
            current.clear();
        }
    }

    if !current.trim().is_empty() {
        sentences.push(current);
    }

    sentences
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_text_single_chunk() {
        let chunks = chunk_text("Hello world.", 100);
        assert_eq!(chunks, vec!["Hello world."]);
    }

    #[test]
    fn test_splits_on_sentences() {
        let text = "First sentence here. Second sentence here. Third one.";
        let chunks = chunk_text(text, 30);

        assert!(chunks.len() >= 2);
        for chunk in &chunks {
            assert!(chunk.chars().count() <= 35);
        }
        assert!(chunks[0].ends_with('.'));
    }

    #[test]
    fn test_oversized_sentence_word_split() {
        let text = "word ".repeat(40);
        let chunks = chunk_text(&text, 25);

        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.chars().count() <= 25);
        }
    }

    #[test]
    fn test_cjk_boundaries() {
        let chunks = chunk_text(
            "\u{4F60}\u{597D}\u{3002}\u{518D}\u{89C1}\u{3002}",
            3,
        );
        assert_eq!(chunks.len(), 2);
    }
}
