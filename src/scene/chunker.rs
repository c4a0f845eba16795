/// Scripts with this many words or more are split before planning.
pub const DEFAULT_MAX_WORDS_PER_CHUNK: usize = 1500;

/// Splits a script into ordered, non-overlapping chunks of roughly
/// `max_words` words each.
///
/// Once a chunk reaches the threshold it is closed at the next word that
/// ends a sentence, so sentences are never cut in half. Short scripts come
/// back as a single chunk equal to the trimmed input.
pub fn chunk_script(text: &str, max_words: usize) -> Vec<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }

    let words: Vec<&str> = trimmed.split_whitespace().collect();
    if words.len() < max_words.max(1) {
        return vec![trimmed.to_string()];
    }

    let mut chunks = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    for word in words {
        current.push(word);
        if current.len() >= max_words && ends_sentence(word) {
            chunks.push(current.join(" "));
            current.clear();
        }
    }
    if !current.is_empty() {
        chunks.push(current.join(" "));
    }
    chunks
}

pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

fn ends_sentence(word: &str) -> bool {
    word.trim_end_matches(['"', '\'', ')', ']', '”', '’', '»'])
        .ends_with(['.', '!', '?'])
}
