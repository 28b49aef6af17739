use anyhow::{Result, anyhow};
use rand::prelude::*;
use std::collections::HashSet;

use duel_types::WORD_LENGTH;

/// Word lists for target selection and guess validation. Targets are the
/// common words a room may be asked to solve; the guess-valid set is the
/// union of targets and a larger list of accepted-but-never-drawn words.
/// Both sets are built once at construction; reads are lock-free.
#[derive(Debug)]
pub struct Dictionary {
    targets: Vec<String>,
    valid: HashSet<String>,
}

impl Dictionary {
    /// Build the dictionary from the word lists embedded in the binary.
    pub fn embedded() -> Result<Self> {
        Self::from_lists(
            include_str!("../words/targets.txt"),
            include_str!("../words/allowed.txt"),
        )
    }

    pub fn from_lists(targets: &str, allowed: &str) -> Result<Self> {
        let targets: Vec<String> = parse_words(targets).into_iter().collect();
        if targets.is_empty() {
            return Err(anyhow!("target word list is empty"));
        }

        let extra = parse_words(allowed);
        if extra.is_empty() {
            return Err(anyhow!("allowed word list is empty"));
        }

        let mut valid: HashSet<String> = targets.iter().cloned().collect();
        valid.extend(extra);

        // The target set must be a strict subset of the guess-valid set
        if valid.len() <= targets.len() {
            return Err(anyhow!(
                "allowed list adds no words beyond the target list"
            ));
        }

        Ok(Self { targets, valid })
    }

    /// Dictionary over explicit word lists, for tests.
    pub fn with_words(targets: &[&str], allowed: &[&str]) -> Result<Self> {
        Self::from_lists(&targets.join("\n"), &allowed.join("\n"))
    }

    /// True iff the normalized word is exactly 5 letters and present in
    /// the guess-valid set.
    pub fn is_valid_guess(&self, word: &str) -> bool {
        let word = word.trim().to_lowercase();
        word.len() == WORD_LENGTH
            && word.chars().all(|c| c.is_ascii_lowercase())
            && self.valid.contains(&word)
    }

    /// Draw a uniformly random word from the target set.
    pub fn random_target(&self) -> String {
        let mut rng = rand::rng();
        self.targets
            .choose(&mut rng)
            .expect("target list validated non-empty at construction")
            .clone()
    }

    pub fn target_count(&self) -> usize {
        self.targets.len()
    }

    pub fn valid_count(&self) -> usize {
        self.valid.len()
    }
}

fn parse_words(list: &str) -> HashSet<String> {
    list.lines()
        .filter(|line| !line.trim().is_empty() && !line.starts_with('#'))
        .map(|word| word.trim().to_lowercase())
        .filter(|word| word.len() == WORD_LENGTH && word.chars().all(|c| c.is_ascii_lowercase()))
        .collect()
}
