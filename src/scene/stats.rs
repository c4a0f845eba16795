use super::chunker::word_count;
use super::planner::estimate_scene_count;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ScriptStats {
    pub words: usize,
    pub chars: usize,
    /// Blocks of text separated by blank lines.
    pub paragraphs: usize,
    /// Scene target the planner uses when no count is given.
    pub estimated_scenes: usize,
}

impl ScriptStats {
    pub fn of(script: &str) -> Self {
        let words = word_count(script);
        Self {
            words,
            chars: script.chars().count(),
            paragraphs: count_paragraphs(script),
            estimated_scenes: estimate_scene_count(words),
        }
    }
}

fn count_paragraphs(script: &str) -> usize {
    let mut paragraphs = 0;
    let mut in_paragraph = false;
    for line in script.lines() {
        if line.trim().is_empty() {
            in_paragraph = false;
        } else if !in_paragraph {
            paragraphs += 1;
            in_paragraph = true;
        }
    }
    paragraphs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_words_chars_and_paragraphs() {
        let stats = ScriptStats::of("Hello there.\nStill first.\n\n  \nSecond block é");
        assert_eq!(stats.words, 7);
        assert_eq!(stats.chars, 44);
        assert_eq!(stats.paragraphs, 2);
        assert_eq!(stats.estimated_scenes, 1);
    }

    #[test]
    fn empty_script() {
        let stats = ScriptStats::of("");
        assert_eq!(stats.words, 0);
        assert_eq!(stats.paragraphs, 0);
    }
}
