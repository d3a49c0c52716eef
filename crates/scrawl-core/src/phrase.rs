//! Phrase selection for the drawer.
//!
//! The phrase is picked locally by the drawer and never crosses the wire
//! before the round resolves.

use rand::RngCore;
use rand::seq::IndexedRandom;

/// Source of drawing phrases. Implemented by the built-in word list; hosts
/// can plug in their own.
pub trait PhraseSource {
    fn pick(&self, rng: &mut dyn RngCore) -> Option<String>;
}

/// A flat list of candidate phrases.
#[derive(Debug, Clone)]
pub struct WordList {
    words: Vec<String>,
}

impl WordList {
    pub fn new(words: Vec<String>) -> Self {
        Self { words }
    }

    /// The default phrase set.
    pub fn builtin() -> Self {
        const WORDS: &[&str] = &[
            "airplane", "anchor", "banana", "bicycle", "bridge", "butterfly",
            "cactus", "camera", "castle", "caterpillar", "dinosaur", "dolphin",
            "dragon", "elephant", "fireworks", "giraffe", "guitar", "hammock",
            "hedgehog", "island", "jellyfish", "kangaroo", "lighthouse",
            "mermaid", "mountain", "mushroom", "octopus", "penguin", "pirate",
            "rainbow", "robot", "rocket", "sandcastle", "scarecrow", "snowman",
            "submarine", "telescope", "tornado", "umbrella", "volcano",
            "waterfall", "windmill",
        ];
        Self {
            words: WORDS.iter().map(|w| (*w).to_string()).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }
}

impl PhraseSource for WordList {
    fn pick(&self, rng: &mut dyn RngCore) -> Option<String> {
        self.words.choose(rng).cloned()
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    use super::*;

    #[test]
    fn test_pick_from_builtin() {
        let list = WordList::builtin();
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let phrase = list.pick(&mut rng).unwrap();
        assert!(!phrase.is_empty());
    }

    #[test]
    fn test_empty_list_yields_nothing() {
        let list = WordList::new(Vec::new());
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        assert!(list.pick(&mut rng).is_none());
    }
}
