//! Sentence-window chunking for embeddable text.
//!
//! Records are split into sentences, then packed into chunks of at most
//! `chunk_size` words with `sentence_overlap` sentences carried over
//! between consecutive chunks. A single sentence longer than the budget
//! becomes its own chunk rather than being split mid-sentence.

pub struct SentenceChunker {
    chunk_size: usize,
    sentence_overlap: usize,
}

impl SentenceChunker {
    pub fn new(chunk_size: usize, sentence_overlap: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            sentence_overlap,
        }
    }

    pub fn chunk(&self, text: &str) -> Vec<String> {
        let sentences = split_sentences(text);
        if sentences.is_empty() {
            return Vec::new();
        }

        let mut chunks = Vec::new();
        let mut current: Vec<&str> = Vec::new();
        let mut current_words = 0usize;

        for sentence in &sentences {
            let words = word_count(sentence);
            if !current.is_empty() && current_words + words > self.chunk_size {
                chunks.push(current.join(" "));

                // Seed the next window with the trailing overlap sentences,
                // but only if that leaves room for new material.
                let overlap_start = current.len().saturating_sub(self.sentence_overlap);
                let overlap: Vec<&str> = current[overlap_start..].to_vec();
                let overlap_words: usize = overlap.iter().map(|s| word_count(s)).sum();
                if overlap_words + words <= self.chunk_size {
                    current = overlap;
                    current_words = overlap_words;
                } else {
                    current = Vec::new();
                    current_words = 0;
                }
            }
            current.push(sentence);
            current_words += words;
        }

        if !current.is_empty() {
            chunks.push(current.join(" "));
        }
        chunks
    }
}

fn word_count(sentence: &str) -> usize {
    sentence.split_whitespace().count()
}

/// Split on terminal punctuation (`.`, `!`, `?`, plus trailing quotes and
/// brackets) followed by whitespace, and on blank lines.
fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let bytes = text.as_bytes();
    let mut start = 0;
    let mut i = 0;

    while i < bytes.len() {
        let c = bytes[i] as char;
        let boundary = if matches!(c, '.' | '!' | '?') {
            // Consume closers attached to the terminator: "...end." )
            let mut j = i + 1;
            while j < bytes.len() && matches!(bytes[j], b'"' | b'\'' | b')' | b']') {
                j += 1;
            }
            if j >= bytes.len() || (bytes[j] as char).is_whitespace() {
                Some(j)
            } else {
                None
            }
        } else if c == '\n' {
            Some(i)
        } else {
            None
        };

        match boundary {
            Some(end) => {
                let sentence = text[start..end].trim();
                if !sentence.is_empty() {
                    sentences.push(sentence);
                }
                start = end;
                i = end + 1;
            }
            None => i += 1,
        }
    }

    let tail = text[start..].trim();
    if !tail.is_empty() {
        sentences.push(tail);
    }
    sentences
}
