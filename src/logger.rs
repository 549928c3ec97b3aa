//! Training Logger
//!
//! Logs one row per epoch to a CSV file and mirrors it to the console.
//! The CSV can be analyzed later for visualization and run comparison.
//!
//! ## CSV Format
//!
//! - `epoch`: Epoch number
//! - `elapsed_seconds`: Time since the logger was created
//! - `learning_rate`: Learning rate used this epoch
//! - `loss`: Mean per-token training loss
//! - `perplexity`: `exp(loss)`; 1.0 is a perfect model, the vocabulary
//!   size is random guessing
//! - `sample`: Optional decoded sample sentence

use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::time::Instant;

use crate::Real;

pub struct TrainingLogger {
    log_file: File,
    start_time: Instant,
    last_log_time: Instant,
}

impl TrainingLogger {
    /// Create the CSV file and write its header.
    pub fn new<P: AsRef<Path>>(log_path: P) -> std::io::Result<Self> {
        let mut log_file = File::create(log_path)?;
        writeln!(log_file, "epoch,elapsed_seconds,learning_rate,loss,perplexity,sample")?;

        let now = Instant::now();
        Ok(Self {
            log_file,
            start_time: now,
            last_log_time: now,
        })
    }

    /// Log one epoch to CSV and console.
    pub fn log(
        &mut self,
        epoch: usize,
        learning_rate: Real,
        loss: Real,
        sample: Option<&str>,
    ) -> std::io::Result<()> {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        let perplexity = loss.exp();

        let sample_escaped = sample.map(|s| s.replace('"', "\"\"")).unwrap_or_default();
        writeln!(
            self.log_file,
            "{},{:.2},{:.6},{:.4},{:.2},\"{}\"",
            epoch, elapsed, learning_rate, loss, perplexity, sample_escaped
        )?;
        // Flush every row so a crashed run keeps its history.
        self.log_file.flush()?;

        let epoch_time = self.last_log_time.elapsed().as_secs_f64();
        println!(
            "Epoch {:4} | Time: {:7.1}s (+{:.1}s) | LR: {:.6} | Loss: {:.4} | Perplexity: {:.2}",
            epoch, elapsed, epoch_time, learning_rate, loss, perplexity
        );
        if let Some(text) = sample {
            println!("  Sample: \"{}\"", text);
        }

        self.last_log_time = Instant::now();
        Ok(())
    }
}
