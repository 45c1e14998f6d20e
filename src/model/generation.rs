use anyhow::{ensure, Result};

/// Beam search settings, mirroring the usual `generate` arguments.
#[derive(Debug, Clone)]
pub struct BeamSearchConfig {
    pub num_beams: usize,
    /// Cap on the decoder sequence length, start token included.
    pub max_length: usize,
    pub early_stopping: bool,
    pub length_penalty: f32,
    pub eos_token_id: u32,
    pub decoder_start_token_id: u32,
}

#[derive(Debug, Clone)]
struct Beam {
    tokens: Vec<u32>,
    score: f32,
}

/// A completed sequence without its start token.
#[derive(Debug, Clone, PartialEq)]
pub struct Hypothesis {
    pub tokens: Vec<u32>,
    /// Length-normalised sum of log-probabilities.
    pub score: f32,
}

/// The `num_beams` best finished hypotheses seen so far.
struct FinishedHypotheses {
    capacity: usize,
    length_penalty: f32,
    early_stopping: bool,
    items: Vec<Hypothesis>,
}

impl FinishedHypotheses {
    fn new(config: &BeamSearchConfig) -> Self {
        Self {
            capacity: config.num_beams,
            length_penalty: config.length_penalty,
            early_stopping: config.early_stopping,
            items: Vec::with_capacity(config.num_beams + 1),
        }
    }

    fn normalise(&self, sum_log_probs: f32, length: usize) -> f32 {
        sum_log_probs / (length.max(1) as f32).powf(self.length_penalty)
    }

    fn worst_score(&self) -> f32 {
        self.items
            .iter()
            .map(|h| h.score)
            .min_by(f32::total_cmp)
            .unwrap_or(f32::INFINITY)
    }

    /// `generated_len` counts every generated token, the closing EOS included.
    fn add(&mut self, tokens: Vec<u32>, sum_log_probs: f32, generated_len: usize) {
        let score = self.normalise(sum_log_probs, generated_len);
        if self.items.len() < self.capacity || score > self.worst_score() {
            self.items.push(Hypothesis { tokens, score });
            if self.items.len() > self.capacity {
                self.items.sort_by(|a, b| b.score.total_cmp(&a.score));
                self.items.truncate(self.capacity);
            }
        }
    }

    /// Whether no live beam can still beat the collected hypotheses.
    fn is_done(&self, best_live_sum: f32, cur_len: usize) -> bool {
        if self.items.len() < self.capacity {
            return false;
        }
        if self.early_stopping {
            return true;
        }
        self.normalise(best_live_sum, cur_len) <= self.worst_score()
    }

    fn into_best(self) -> Option<Hypothesis> {
        self.items
            .into_iter()
            .max_by(|a, b| a.score.total_cmp(&b.score))
    }
}

/// Indices of the `k` largest values of `values`, best first.
fn top_k(values: &[f32], k: usize) -> Vec<usize> {
    let mut indices: Vec<usize> = (0..values.len()).collect();
    let k = k.min(indices.len());
    if k == 0 {
        return Vec::new();
    }
    indices.select_nth_unstable_by(k - 1, |&a, &b| values[b].total_cmp(&values[a]));
    indices.truncate(k);
    indices.sort_by(|&a, &b| values[b].total_cmp(&values[a]));
    indices
}

/// Beam search over a decoder exposed as `step`: given the live sequences
/// (each starting with the decoder start token) it returns one row of
/// next-token log-probabilities per sequence.
///
/// The returned tokens exclude the start token and the closing EOS, so their
/// count is always below `max_length`.
pub fn beam_search<F>(config: &BeamSearchConfig, mut step: F) -> Result<Hypothesis>
where
    F: FnMut(&[Vec<u32>]) -> Result<Vec<Vec<f32>>>,
{
    ensure!(config.num_beams > 0, "num_beams must be > 0");
    ensure!(config.max_length > 1, "max_length must leave room for one token");

    let candidates_per_step = 2 * config.num_beams;
    let mut finished = FinishedHypotheses::new(config);
    let mut beams = vec![Beam {
        tokens: vec![config.decoder_start_token_id],
        score: 0.0,
    }];

    while beams[0].tokens.len() < config.max_length {
        let sequences: Vec<Vec<u32>> = beams.iter().map(|b| b.tokens.clone()).collect();
        let log_probs = step(&sequences)?;
        ensure!(
            log_probs.len() == beams.len(),
            "decoder returned {} rows for {} beams",
            log_probs.len(),
            beams.len()
        );

        // (beam index, token, cumulative score)
        let mut candidates: Vec<(usize, u32, f32)> = Vec::new();
        for (beam_idx, (beam, row)) in beams.iter().zip(&log_probs).enumerate() {
            for token in top_k(row, candidates_per_step) {
                candidates.push((beam_idx, token as u32, beam.score + row[token]));
            }
        }
        candidates.sort_by(|a, b| b.2.total_cmp(&a.2));
        candidates.truncate(candidates_per_step);

        let mut next = Vec::with_capacity(config.num_beams);
        for (rank, &(beam_idx, token, score)) in candidates.iter().enumerate() {
            if token == config.eos_token_id {
                // An EOS outside the top `num_beams` would not have been kept as a beam.
                if rank < config.num_beams {
                    let tokens = beams[beam_idx].tokens[1..].to_vec();
                    let generated_len = tokens.len() + 1;
                    finished.add(tokens, score, generated_len);
                }
            } else {
                let mut tokens = beams[beam_idx].tokens.clone();
                tokens.push(token);
                next.push(Beam { tokens, score });
            }
            if next.len() == config.num_beams {
                break;
            }
        }

        let cur_len = beams[0].tokens.len();
        let best_live = next.first().map(|b| b.score).unwrap_or(f32::NEG_INFINITY);
        if next.is_empty() || finished.is_done(best_live, cur_len) {
            beams = next;
            break;
        }
        beams = next;
    }

    // Beams still alive at the length cap compete with the finished ones.
    for beam in beams {
        let tokens = beam.tokens[1..].to_vec();
        let generated_len = tokens.len();
        finished.add(tokens, beam.score, generated_len);
    }

    finished
        .into_best()
        .ok_or_else(|| anyhow::anyhow!("beam search produced no hypothesis"))
}
