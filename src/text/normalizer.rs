//! Text normalization
//!
//! The character vocabulary only covers plain ASCII punctuation, so
//! typographic variants are folded before tokenization.

/// Text normalizer applied before vocabulary lookup
#[derive(Debug, Default, Clone)]
pub struct TextNormalizer;

impl TextNormalizer {
    /// Create a new normalizer
    pub fn new() -> Self {
        Self
    }

    /// Normalize input text
    pub fn normalize(&self, text: &str) -> String {
        let mut result = String::with_capacity(text.len());
        let mut last_was_space = true;

        for c in text.trim().chars() {
            let mapped: &str = match c {
                '\u{2018}' | '\u{2019}' => "'",
                '\u{201C}' | '\u{201D}' => "\"",
                '\u{2013}' | '\u{2014}' => "-",
                '\u{2026}' => "...",
                c if c.is_whitespace() => " ",
                _ => {
                    result.push(c);
                    last_was_space = false;
                    continue;
                }
            };

            if mapped == " " {
                if !last_was_space {
                    result.push(' ');
                    last_was_space = true;
                }
            } else {
                result.push_str(mapped);
                last_was_space = false;
            }
        }

        result.trim_end().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_passthrough() {
        let n = TextNormalizer::new();
        assert_eq!(n.normalize("Hello, world!"), "Hello, world!");
    }

    #[test]
    fn test_whitespace_collapse() {
        let n = TextNormalizer::new();
        assert_eq!(n.normalize("  a \t b\n\nc  "), "a b c");
    }

    #[test]
    fn test_typographic_punctuation() {
        let n = TextNormalizer::new();
        assert_eq!(n.normalize("\u{201C}it\u{2019}s\u{201D}"), "\"it's\"");
        assert_eq!(n.normalize("wait \u{2014} no\u{2026}"), "wait - no...");
    }
}
