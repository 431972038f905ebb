//! Constrained autoregressive sampling
//!
//! Each step runs the language model over the whole context, scales the
//! next-token logits by the temperature, applies top-k and nucleus (top-p)
//! filtering and picks the next token greedily or by weighted sampling.
//! Until `min_out_len` tokens exist, stop tokens are rejected and resampled.

use crate::conversation::ConversationInput;
use modelhost_core::{Error, Result};
use rand::distributions::{Distribution, WeightedIndex};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Anything that yields next-token logits for a token sequence
pub trait LanguageModel: Send + Sync {
    /// Logits over the vocabulary for the token following `input_ids`.
    ///
    /// `token_type_ids` has the same length as `input_ids`.
    fn next_token_logits(&self, input_ids: &[u32], token_type_ids: &[u32]) -> Result<Vec<f32>>;
}

impl<M: LanguageModel + ?Sized> LanguageModel for Box<M> {
    fn next_token_logits(&self, input_ids: &[u32], token_type_ids: &[u32]) -> Result<Vec<f32>> {
        (**self).next_token_logits(input_ids, token_type_ids)
    }
}

/// Vocabulary ids with structural meaning
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpecialTokens {
    pub bos: u32,
    pub eos: u32,
    pub pad: u32,
    pub speaker1: u32,
    pub speaker2: u32,
}

impl SpecialTokens {
    /// Vocabulary entries, in `bos, eos, pad, speaker1, speaker2` order
    pub const NAMES: [&'static str; 5] = ["[CLS]", "[SEP]", "[PAD]", "[speaker1]", "[speaker2]"];

    pub fn ids(&self) -> [u32; 5] {
        [self.bos, self.eos, self.pad, self.speaker1, self.speaker2]
    }

    pub fn contains(&self, id: u32) -> bool {
        self.ids().contains(&id)
    }

    /// Role id for the segment at `index` of a conversation
    pub fn speaker(&self, index: usize) -> u32 {
        if index % 2 == 0 {
            self.speaker1
        } else {
            self.speaker2
        }
    }
}

/// Generation options, read from the processor configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingOptions {
    /// Pick the most likely token instead of sampling
    pub greedy: bool,

    pub max_out_len: usize,

    /// Stop tokens are rejected until this many tokens were generated
    pub min_out_len: usize,

    pub temperature: f32,

    /// Keep the k most likely tokens (0 disables)
    pub top_k: usize,

    /// Keep the smallest set of tokens with this cumulative probability (0 disables)
    pub top_p: f32,

    /// Seed for reproducible sampling; entropy-seeded when absent
    pub seed: Option<u64>,

    /// Weighted redraws before falling back to the best non-stop token
    pub max_resample_attempts: usize,

    /// Wall-clock budget for one generation
    pub max_generation_ms: Option<u64>,
}

impl Default for SamplingOptions {
    fn default() -> Self {
        Self {
            greedy: false,
            max_out_len: 30,
            min_out_len: 1,
            temperature: 0.7,
            top_k: 0,
            top_p: 0.9,
            seed: None,
            max_resample_attempts: 64,
            max_generation_ms: None,
        }
    }
}

impl SamplingOptions {
    pub fn validate(&self) -> Result<()> {
        if !(self.temperature > 0.0) {
            return Err(Error::config(format!(
                "temperature must be positive, got {}",
                self.temperature
            )));
        }
        if !(0.0..=1.0).contains(&self.top_p) {
            return Err(Error::config(format!(
                "top_p must be within [0, 1], got {}",
                self.top_p
            )));
        }
        if self.min_out_len > self.max_out_len {
            return Err(Error::config(format!(
                "min_out_len ({}) exceeds max_out_len ({})",
                self.min_out_len, self.max_out_len
            )));
        }
        Ok(())
    }
}

/// Why generation ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    MaxLength,
    StopToken,
    TimeBudget,
}

impl StopReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            StopReason::MaxLength => "max_length",
            StopReason::StopToken => "stop_token",
            StopReason::TimeBudget => "time_budget",
        }
    }
}

/// Output of one generation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Generation {
    pub tokens: Vec<u32>,
    pub stop_reason: StopReason,
}

/// Mask logits outside the top-k and the top-p nucleus with `-inf`.
///
/// At least the single most likely token always survives. Ties with the
/// k-th largest logit are kept.
pub fn top_filtering(logits: &mut [f32], top_k: usize, top_p: f32) {
    if logits.is_empty() {
        return;
    }

    if top_k > 0 && top_k < logits.len() {
        let mut sorted = logits.to_vec();
        sorted.sort_unstable_by(|a, b| b.total_cmp(a));
        let threshold = sorted[top_k - 1];
        for logit in logits.iter_mut() {
            if *logit < threshold {
                *logit = f32::NEG_INFINITY;
            }
        }
    }

    if top_p > 0.0 {
        let mut order: Vec<usize> = (0..logits.len()).collect();
        order.sort_by(|&a, &b| logits[b].total_cmp(&logits[a]));

        let sorted: Vec<f32> = order.iter().map(|&i| logits[i]).collect();
        let probs = softmax(&sorted);

        let mut cumulative = 0.0f32;
        let mut keep = 0;
        for p in &probs {
            keep += 1;
            cumulative += p;
            if cumulative >= top_p {
                break;
            }
        }

        for &index in &order[keep..] {
            logits[index] = f32::NEG_INFINITY;
        }
    }
}

/// Numerically stable softmax; masked (`-inf`) entries get probability zero
pub fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    if max == f32::NEG_INFINITY {
        return vec![0.0; logits.len()];
    }
    let exps: Vec<f32> = logits.iter().map(|&l| (l - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

/// Index of the largest value; the first one wins among equal maxima
pub fn argmax(values: &[f32]) -> Option<usize> {
    let mut best: Option<(usize, f32)> = None;
    for (index, &value) in values.iter().enumerate() {
        match best {
            Some((_, current)) if value <= current => {}
            _ if value.is_nan() => {}
            _ => best = Some((index, value)),
        }
    }
    best.map(|(index, _)| index)
}

/// Draw one index proportionally to `probs`
pub fn sample_index<R: Rng + ?Sized>(probs: &[f32], rng: &mut R) -> Result<usize> {
    let dist = WeightedIndex::new(probs)
        .map_err(|e| Error::model(format!("cannot sample from distribution: {}", e)))?;
    Ok(dist.sample(rng))
}

/// Drives a [`LanguageModel`] through constrained sampling
pub struct SamplingEngine<M> {
    model: M,
    special: SpecialTokens,
    options: SamplingOptions,
}

impl<M: LanguageModel> SamplingEngine<M> {
    pub fn new(model: M, special: SpecialTokens, options: SamplingOptions) -> Result<Self> {
        options.validate()?;
        Ok(Self {
            model,
            special,
            options,
        })
    }

    pub fn options(&self) -> &SamplingOptions {
        &self.options
    }

    pub fn special_tokens(&self) -> &SpecialTokens {
        &self.special
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    /// Generate a reply to `utterance` given the earlier turns
    pub fn generate(&self, utterance: &[u32], history: &[Vec<u32>]) -> Result<Generation> {
        let mut input = ConversationInput::build(utterance, history, &self.special);
        self.sample_sequence(&mut input)
    }

    /// Sample tokens after `input`, appending each one with the reply persona
    pub fn sample_sequence(&self, input: &mut ConversationInput) -> Result<Generation> {
        let opts = &self.options;
        let persona = input.persona();
        let budget = opts.max_generation_ms.map(Duration::from_millis);
        let mut rng = match opts.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let start = Instant::now();
        let mut tokens = Vec::with_capacity(opts.max_out_len);
        let mut stop_reason = StopReason::MaxLength;

        for step in 0..opts.max_out_len {
            if let Some(budget) = budget {
                if start.elapsed() >= budget {
                    warn!(
                        "Generation stopped by time budget ({}ms) after {} token(s)",
                        budget.as_millis(),
                        tokens.len()
                    );
                    stop_reason = StopReason::TimeBudget;
                    break;
                }
            }

            let mut logits = self
                .model
                .next_token_logits(&input.input_ids, &input.token_type_ids)?;
            if logits.is_empty() {
                return Err(Error::model("language model returned empty logits"));
            }
            for logit in logits.iter_mut() {
                *logit /= opts.temperature;
            }

            let guarded = step < opts.min_out_len;
            let scaled = guarded.then(|| logits.clone());

            top_filtering(&mut logits, opts.top_k, opts.top_p);
            let probs = softmax(&logits);

            let index = if opts.greedy {
                argmax(&probs).ok_or_else(|| Error::model("empty distribution"))?
            } else {
                sample_index(&probs, &mut rng)?
            };
            let mut token = index as u32;

            if let Some(scaled) = scaled {
                if self.special.contains(token) {
                    token = self.resample(&probs, &scaled, &mut rng)?;
                }
            }

            if self.special.contains(token) {
                stop_reason = StopReason::StopToken;
                break;
            }

            tokens.push(token);
            input.push(token, persona);
        }

        debug!(
            tokens = tokens.len(),
            stop_reason = stop_reason.as_str(),
            latency_ms = start.elapsed().as_millis() as u64,
            "generation finished"
        );

        Ok(Generation {
            tokens,
            stop_reason,
        })
    }

    /// Replace a stop token drawn before the minimum length was reached.
    ///
    /// Redraws from the filtered distribution first. When every attempt lands
    /// on a stop token, picks the best non-stop token of the unfiltered logits.
    fn resample<R: Rng + ?Sized>(&self, probs: &[f32], scaled: &[f32], rng: &mut R) -> Result<u32> {
        for _ in 0..self.options.max_resample_attempts {
            let token = sample_index(probs, rng)? as u32;
            if !self.special.contains(token) {
                return Ok(token);
            }
        }

        debug!(
            "No regular token after {} redraws, falling back to best regular token",
            self.options.max_resample_attempts
        );
        let masked: Vec<f32> = scaled
            .iter()
            .enumerate()
            .map(|(index, &logit)| {
                if self.special.contains(index as u32) {
                    f32::NEG_INFINITY
                } else {
                    logit
                }
            })
            .collect();

        argmax(&masked)
            .filter(|&index| masked[index] > f32::NEG_INFINITY)
            .map(|index| index as u32)
            .ok_or_else(|| Error::model("vocabulary has no regular tokens"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SPECIAL: SpecialTokens = SpecialTokens {
        bos: 0,
        eos: 1,
        pad: 2,
        speaker1: 3,
        speaker2: 4,
    };

    struct FixedLogits(Vec<f32>);

    impl LanguageModel for FixedLogits {
        fn next_token_logits(&self, _: &[u32], _: &[u32]) -> Result<Vec<f32>> {
            Ok(self.0.clone())
        }
    }

    fn kept(logits: &[f32]) -> Vec<usize> {
        logits
            .iter()
            .enumerate()
            .filter(|(_, l)| l.is_finite())
            .map(|(i, _)| i)
            .collect()
    }

    #[test]
    fn test_top_k_keeps_k_highest() {
        let mut logits = vec![1.0, 5.0, 3.0, 4.0, 2.0];
        top_filtering(&mut logits, 2, 0.0);
        assert_eq!(kept(&logits), vec![1, 3]);
    }

    #[test]
    fn test_top_k_keeps_ties() {
        let mut logits = vec![3.0, 1.0, 3.0, 3.0];
        top_filtering(&mut logits, 2, 0.0);
        assert_eq!(kept(&logits), vec![0, 2, 3]);
    }

    #[test]
    fn test_top_k_larger_than_vocab() {
        let mut logits = vec![1.0, 2.0];
        top_filtering(&mut logits, 10, 0.0);
        assert_eq!(kept(&logits), vec![0, 1]);
    }

    #[test]
    fn test_top_p_keeps_nucleus() {
        // probabilities ~ [0.665, 0.245, 0.090]
        let mut logits = vec![2.0, 1.0, 0.0];
        top_filtering(&mut logits, 0, 0.5);
        assert_eq!(kept(&logits), vec![0]);

        let mut logits = vec![2.0, 1.0, 0.0];
        top_filtering(&mut logits, 0, 0.8);
        assert_eq!(kept(&logits), vec![0, 1]);
    }

    #[test]
    fn test_top_p_never_empty() {
        let mut logits = vec![0.0, 10.0, 0.0];
        top_filtering(&mut logits, 0, 1e-6);
        assert_eq!(kept(&logits), vec![1]);
    }

    #[test]
    fn test_softmax_masks() {
        let probs = softmax(&[0.0, f32::NEG_INFINITY, 0.0]);
        assert!((probs[0] - 0.5).abs() < 1e-6);
        assert_eq!(probs[1], 0.0);
    }

    #[test]
    fn test_argmax_first_tie() {
        assert_eq!(argmax(&[0.1, 0.4, 0.4]), Some(1));
        assert_eq!(argmax(&[]), None);
    }

    #[test]
    fn test_options_validation() {
        assert!(SamplingOptions::default().validate().is_ok());

        let opts = SamplingOptions {
            temperature: 0.0,
            ..Default::default()
        };
        assert!(opts.validate().is_err());

        let opts = SamplingOptions {
            top_p: 1.5,
            ..Default::default()
        };
        assert!(opts.validate().is_err());

        let opts = SamplingOptions {
            min_out_len: 5,
            max_out_len: 3,
            ..Default::default()
        };
        assert!(opts.validate().is_err());
    }

    #[test]
    fn test_greedy_stops_on_special_token() {
        let mut logits = vec![0.0; 8];
        logits[SPECIAL.eos as usize] = 10.0;
        let opts = SamplingOptions {
            greedy: true,
            max_out_len: 3,
            min_out_len: 0,
            ..Default::default()
        };
        let engine = SamplingEngine::new(FixedLogits(logits), SPECIAL, opts).unwrap();
        let generation = engine.generate(&[5, 6], &[]).unwrap();
        assert!(generation.tokens.is_empty());
        assert_eq!(generation.stop_reason, StopReason::StopToken);
    }

    #[test]
    fn test_greedy_runs_to_max_length() {
        let mut logits = vec![0.0; 8];
        logits[6] = 10.0;
        let opts = SamplingOptions {
            greedy: true,
            max_out_len: 4,
            ..Default::default()
        };
        let engine = SamplingEngine::new(FixedLogits(logits), SPECIAL, opts).unwrap();
        let generation = engine.generate(&[5], &[]).unwrap();
        assert_eq!(generation.tokens, vec![6, 6, 6, 6]);
        assert_eq!(generation.stop_reason, StopReason::MaxLength);
    }

    #[test]
    fn test_min_length_falls_back_when_only_stop_tokens_survive() {
        // top_k = 1 leaves only the stop token in the filtered distribution
        let mut logits = vec![0.0; 8];
        logits[SPECIAL.eos as usize] = 10.0;
        logits[7] = 5.0;
        let opts = SamplingOptions {
            greedy: true,
            max_out_len: 5,
            min_out_len: 2,
            top_k: 1,
            max_resample_attempts: 4,
            seed: Some(7),
            ..Default::default()
        };
        let engine = SamplingEngine::new(FixedLogits(logits), SPECIAL, opts).unwrap();
        let generation = engine.generate(&[5], &[]).unwrap();
        assert_eq!(generation.tokens, vec![7, 7]);
        assert_eq!(generation.stop_reason, StopReason::StopToken);
    }

    #[test]
    fn test_seeded_sampling_is_reproducible() {
        let logits: Vec<f32> = (0..16).map(|i| (i as f32).sin()).collect();
        let opts = SamplingOptions {
            max_out_len: 10,
            min_out_len: 10,
            top_p: 1.0,
            temperature: 1.0,
            seed: Some(42),
            ..Default::default()
        };
        let engine = SamplingEngine::new(FixedLogits(logits), SPECIAL, opts).unwrap();
        let a = engine.generate(&[5], &[]).unwrap();
        let b = engine.generate(&[5], &[]).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.tokens.len(), 10);
    }

    #[test]
    fn test_zero_time_budget_generates_nothing() {
        let opts = SamplingOptions {
            max_generation_ms: Some(0),
            ..Default::default()
        };
        let engine = SamplingEngine::new(FixedLogits(vec![0.0; 8]), SPECIAL, opts).unwrap();
        let generation = engine.generate(&[5], &[]).unwrap();
        assert!(generation.tokens.is_empty());
        assert_eq!(generation.stop_reason, StopReason::TimeBudget);
    }
}
