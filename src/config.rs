//! Hyperparameter Configuration
//!
//! All knobs for building and training a translator in one serde struct.
//! Configs round-trip through JSON so an experiment can be rerun from the
//! file it logged.
//!
//! # Fields
//!
//! - `input_dim`: Embedding dimension (width of token vectors)
//! - `hidden_dim`: Recurrent hidden-state dimension
//! - `init_scale`: Half-width of the uniform weight initialization
//! - `learning_rate`: Base SGD learning rate
//! - `clip_threshold`: Global gradient-norm clipping threshold
//! - `minibatch_size`: Examples per parameter update
//! - `num_workers`: Worker threads per minibatch
//! - `blackout_samples`: Negative samples per BlackOut step
//! - `blackout_alpha`: Distortion exponent for the sampling distribution
//! - `beam_width`: Beam width for decoding
//! - `max_decode_len`: Hard cap on generated target length
//! - `seed`: Master seed; every RNG stream derives from it

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{Real, Result};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    pub input_dim: usize,
    pub hidden_dim: usize,
    pub init_scale: Real,
    pub learning_rate: Real,
    pub clip_threshold: Real,
    pub minibatch_size: usize,
    pub num_workers: usize,
    pub blackout_samples: usize,
    pub blackout_alpha: Real,
    pub beam_width: usize,
    pub max_decode_len: usize,
    pub seed: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            input_dim: 512,
            hidden_dim: 512,
            init_scale: 0.1,
            learning_rate: 0.5,
            clip_threshold: 3.0,
            minibatch_size: 128,
            num_workers: 4,
            blackout_samples: 2000,
            blackout_alpha: 0.4,
            beam_width: 20,
            max_decode_len: 100,
            seed: 88675123,
        }
    }
}

impl Config {
    /// A tiny config for tests and quick experiments: small enough to
    /// train on a toy corpus in well under a second.
    pub fn tiny() -> Self {
        Self {
            input_dim: 16,
            hidden_dim: 16,
            init_scale: 0.2,
            learning_rate: 0.3,
            clip_threshold: 5.0,
            minibatch_size: 4,
            num_workers: 1,
            blackout_samples: 5,
            blackout_alpha: 0.4,
            beam_width: 3,
            max_decode_len: 20,
            seed: 7,
        }
    }

    /// Write the config as pretty JSON.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(file, self)?;
        Ok(())
    }

    /// Read a config back from JSON.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = BufReader::new(File::open(path)?);
        Ok(serde_json::from_reader(file)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let mut config = Config::tiny();
        config.hidden_dim = 24;
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.hidden_dim, 24);
        assert_eq!(loaded.seed, config.seed);
        assert_eq!(loaded.learning_rate, config.learning_rate);
    }

    #[test]
    fn load_rejects_malformed_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(Config::load(&path).is_err());
    }
}
