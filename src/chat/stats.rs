use std::fmt;

use serde::Serialize;

/// Throughput figures of a single assistant turn.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationStats {
    pub tokens_generated: usize,
    pub prompt_tokens: usize,
    pub elapsed_seconds: f64,
    /// `None` when no measurable time elapsed.
    pub tokens_per_second: Option<f64>,
    pub total_tokens_in_conversation: usize,
}

impl GenerationStats {
    pub fn new(tokens_generated: usize, prompt_tokens: usize, elapsed_seconds: f64) -> Self {
        let tokens_per_second = if elapsed_seconds > 0.0 && elapsed_seconds.is_finite() {
            Some(tokens_generated as f64 / elapsed_seconds)
        } else {
            None
        };
        Self {
            tokens_generated,
            prompt_tokens,
            elapsed_seconds,
            tokens_per_second,
            total_tokens_in_conversation: prompt_tokens + tokens_generated,
        }
    }
}

impl fmt::Display for GenerationStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Number of tokens generated: {} --- Time: {:.1} seconds --- TPS: ",
            self.tokens_generated, self.elapsed_seconds
        )?;
        match self.tokens_per_second {
            Some(tps) => write!(f, "{tps:.1}")?,
            None => f.write_str("n/a")?,
        }
        write!(
            f,
            "\nNumber of total tokens in conversation: {}",
            self.total_tokens_in_conversation
        )
    }
}
