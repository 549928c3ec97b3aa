//! Vocabulary Construction
//!
//! Token inventory built from a whitespace-tokenized training file. Tokens
//! seen fewer than `threshold` times are folded into a single `*UNK*`
//! entry (their counts pool there); the survivors are sorted by descending
//! count, ties broken lexicographically so rebuilt vocabularies are
//! deterministic. `*EOS*` and `*UNK*` take the last two ids, with the
//! end-of-sequence count equal to the number of lines.
//!
//! Ids are dense `0..size` and double as embedding-table column indices
//! and output-layer class indices.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::Result;

pub const EOS_TOKEN: &str = "*EOS*";
pub const UNK_TOKEN: &str = "*UNK*";

#[derive(Clone, Debug)]
struct Token {
    text: String,
    count: usize,
}

#[derive(Clone, Debug)]
pub struct Vocabulary {
    tokens: Vec<Token>,
    index: HashMap<String, usize>,
    pub eos: usize,
    pub unk: usize,
}

impl Vocabulary {
    /// Build from in-memory lines.
    pub fn from_lines<S: AsRef<str>>(lines: &[S], threshold: usize) -> Self {
        let mut counts: HashMap<String, usize> = HashMap::new();
        let mut eos_count = 0;

        for line in lines {
            eos_count += 1;
            for tok in line.as_ref().split_whitespace() {
                *counts.entry(tok.to_owned()).or_insert(0) += 1;
            }
        }

        let mut unk_count = 0;
        let mut tokens: Vec<Token> = Vec::new();
        for (text, count) in counts {
            if count >= threshold {
                tokens.push(Token { text, count });
            } else {
                unk_count += count;
            }
        }
        tokens.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.text.cmp(&b.text)));

        let mut index = HashMap::with_capacity(tokens.len());
        for (id, tok) in tokens.iter().enumerate() {
            index.insert(tok.text.clone(), id);
        }

        let eos = tokens.len();
        tokens.push(Token {
            text: EOS_TOKEN.to_owned(),
            count: eos_count,
        });
        let unk = eos + 1;
        tokens.push(Token {
            text: UNK_TOKEN.to_owned(),
            count: unk_count,
        });

        Self { tokens, index, eos, unk }
    }

    /// Build from a training file, one sequence per line.
    pub fn from_file<P: AsRef<Path>>(path: P, threshold: usize) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        let lines = reader.lines().collect::<std::io::Result<Vec<String>>>()?;
        Ok(Self::from_lines(&lines, threshold))
    }

    /// Total number of ids, `*EOS*` and `*UNK*` included.
    pub fn size(&self) -> usize {
        self.tokens.len()
    }

    /// Id for a surface token; unknown tokens map to `*UNK*`.
    pub fn id(&self, token: &str) -> usize {
        self.index.get(token).copied().unwrap_or(self.unk)
    }

    /// Surface form for an id.
    pub fn token(&self, id: usize) -> &str {
        &self.tokens[id].text
    }

    /// Training-corpus count for an id. Feeds the BlackOut proposal
    /// distribution.
    pub fn count(&self, id: usize) -> usize {
        self.tokens[id].count
    }

    /// Counts for all ids in id order.
    pub fn counts(&self) -> Vec<usize> {
        self.tokens.iter().map(|t| t.count).collect()
    }

    /// Encode one whitespace-tokenized line, without any terminator.
    pub fn encode(&self, line: &str) -> Vec<usize> {
        line.split_whitespace().map(|t| self.id(t)).collect()
    }

    /// Render a sequence of ids back to a line.
    pub fn decode(&self, ids: &[usize]) -> String {
        ids.iter()
            .map(|&id| self.token(id))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines() -> Vec<&'static str> {
        vec!["the cat sat", "the cat ran", "the dog sat", "a bird"]
    }

    #[test]
    fn ids_are_sorted_by_descending_count() {
        let v = Vocabulary::from_lines(&lines(), 1);
        // the:3, cat:2, sat:2, then singletons.
        assert_eq!(v.token(0), "the");
        assert_eq!(v.id("cat"), 1);
        assert_eq!(v.id("sat"), 2);
        assert!(v.count(0) == 3 && v.count(1) == 2);
    }

    #[test]
    fn ties_break_lexicographically() {
        let v = Vocabulary::from_lines(&lines(), 1);
        // cat and sat both occur twice; "cat" < "sat".
        assert!(v.id("cat") < v.id("sat"));
        // Singletons a, bird, dog, ran in lexicographic order.
        assert!(v.id("a") < v.id("bird"));
        assert!(v.id("bird") < v.id("dog"));
    }

    #[test]
    fn threshold_folds_rare_tokens_into_unk() {
        let v = Vocabulary::from_lines(&lines(), 2);
        // the, cat, sat survive; a, bird, dog, ran pool into *UNK*.
        assert_eq!(v.size(), 5);
        assert_eq!(v.id("dog"), v.unk);
        assert_eq!(v.count(v.unk), 4);
    }

    #[test]
    fn eos_and_unk_take_the_last_ids() {
        let v = Vocabulary::from_lines(&lines(), 1);
        assert_eq!(v.eos, v.size() - 2);
        assert_eq!(v.unk, v.size() - 1);
        assert_eq!(v.token(v.eos), EOS_TOKEN);
        assert_eq!(v.token(v.unk), UNK_TOKEN);
        // eos count is the line count.
        assert_eq!(v.count(v.eos), 4);
    }

    #[test]
    fn encode_decode_round_trip_for_known_tokens() {
        let v = Vocabulary::from_lines(&lines(), 1);
        let ids = v.encode("the dog sat");
        assert_eq!(v.decode(&ids), "the dog sat");
        // Unknown surface forms encode to unk.
        assert_eq!(v.encode("the zebra")[1], v.unk);
    }
}
