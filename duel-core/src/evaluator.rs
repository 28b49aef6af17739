use duel_types::{LetterResult, WORD_LENGTH};

/// Score a guess against a target word. Both arguments must already be
/// normalized to 5 lowercase letters; pure, no I/O.
///
/// Two passes over the guess with a per-target usage mask give standard
/// Wordle duplicate-letter semantics: the number of correct + present
/// marks for a letter never exceeds that letter's multiplicity in the
/// target.
pub fn score(guess: &str, target: &str) -> [LetterResult; WORD_LENGTH] {
    debug_assert_eq!(guess.len(), WORD_LENGTH);
    debug_assert_eq!(target.len(), WORD_LENGTH);

    let guess: Vec<char> = guess.chars().collect();
    let target: Vec<char> = target.chars().collect();

    let mut results = [LetterResult::Absent; WORD_LENGTH];
    let mut used = [false; WORD_LENGTH];

    // First pass: exact positions consume their target slot
    for i in 0..WORD_LENGTH {
        if guess[i] == target[i] {
            results[i] = LetterResult::Correct;
            used[i] = true;
        }
    }

    // Second pass: misplaced letters claim the leftmost unused occurrence
    for i in 0..WORD_LENGTH {
        if results[i] == LetterResult::Correct {
            continue;
        }
        for j in 0..WORD_LENGTH {
            if !used[j] && guess[i] == target[j] {
                results[i] = LetterResult::Present;
                used[j] = true;
                break;
            }
        }
    }

    results
}
