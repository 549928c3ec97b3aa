//! Parallel-Corpus Preparation
//!
//! One training [`Example`] per aligned line pair. Source sequences are
//! stored *reversed* with the end-of-sequence id appended, so the last
//! token the encoder reads is the first word of the sentence; feeding the
//! source backwards shortens the path between the early source words and
//! the early target words. Target sequences keep their order and also end
//! with `eos`, which is what the decoder learns to emit to stop.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::vocab::Vocabulary;
use crate::Result;

/// One aligned sentence pair, already encoded to ids.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Example {
    /// Source ids, reversed, terminated by the source `eos`.
    pub src: Vec<usize>,
    /// Target ids in order, terminated by the target `eos`.
    pub tgt: Vec<usize>,
}

impl Example {
    /// Encode one line pair.
    pub fn from_lines(
        src_line: &str,
        tgt_line: &str,
        src_vocab: &Vocabulary,
        tgt_vocab: &Vocabulary,
    ) -> Self {
        let mut src = src_vocab.encode(src_line);
        src.reverse();
        src.push(src_vocab.eos);

        let mut tgt = tgt_vocab.encode(tgt_line);
        tgt.push(tgt_vocab.eos);

        Self { src, tgt }
    }
}

/// Encode an in-memory parallel corpus. Panics if the two sides have
/// different lengths; aligned corpora are a precondition, not a runtime
/// condition.
pub fn from_pairs<S: AsRef<str>>(
    src_lines: &[S],
    tgt_lines: &[S],
    src_vocab: &Vocabulary,
    tgt_vocab: &Vocabulary,
) -> Vec<Example> {
    assert_eq!(
        src_lines.len(),
        tgt_lines.len(),
        "parallel corpus sides must have the same number of lines"
    );
    src_lines
        .iter()
        .zip(tgt_lines)
        .map(|(s, t)| Example::from_lines(s.as_ref(), t.as_ref(), src_vocab, tgt_vocab))
        .collect()
}

/// Load and encode a line-aligned file pair.
pub fn load<P: AsRef<Path>>(
    src_path: P,
    tgt_path: P,
    src_vocab: &Vocabulary,
    tgt_vocab: &Vocabulary,
) -> Result<Vec<Example>> {
    let src_lines = read_lines(src_path)?;
    let tgt_lines = read_lines(tgt_path)?;
    Ok(from_pairs(&src_lines, &tgt_lines, src_vocab, tgt_vocab))
}

fn read_lines<P: AsRef<Path>>(path: P) -> Result<Vec<String>> {
    let reader = BufReader::new(File::open(path)?);
    Ok(reader.lines().collect::<std::io::Result<Vec<String>>>()?)
}
