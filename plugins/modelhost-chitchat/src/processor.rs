//! Chit-chat processor: tokenize, sample a reply, decode

use crate::gpt2::{get_device, Gpt2LmHeadModel};
use crate::sampling::{Generation, LanguageModel, SamplingEngine, SamplingOptions};
use crate::tokenizer::ChatTokenizer;
use modelhost_core::{param_flag, Error, Params, Result};
use modelhost_processor::{LoadContext, PluginDescriptor, Processor, ProcessorPlugin};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Instant;

/// Processor kind used in plugin manifests
pub const KIND: &str = "chitchat";

fn default_device() -> String {
    "cpu".to_string()
}

/// Configuration section of a chit-chat plugin manifest
#[derive(Debug, Clone, Deserialize)]
pub struct ChitchatConfig {
    /// Checkpoint directory, relative to the plugin directory
    pub model_chkpt: String,

    #[serde(default = "default_device")]
    pub device: String,

    #[serde(flatten)]
    pub sampling: SamplingOptions,
}

/// Generates a reply to `utterance`, optionally conditioned on `history`.
///
/// Request: `{"utterance": "...", "history": ["...", ...], "debug": bool}`.
/// Response: `{"resp": "..."}`.
pub struct ChitchatProcessor<M = Gpt2LmHeadModel> {
    tokenizer: ChatTokenizer,
    engine: SamplingEngine<M>,
}

impl<M: LanguageModel> ChitchatProcessor<M> {
    pub fn new(tokenizer: ChatTokenizer, model: M, options: SamplingOptions) -> Result<Self> {
        let engine = SamplingEngine::new(model, tokenizer.special_tokens(), options)?;
        Ok(Self { tokenizer, engine })
    }

    pub fn engine(&self) -> &SamplingEngine<M> {
        &self.engine
    }

    pub fn tokenizer(&self) -> &ChatTokenizer {
        &self.tokenizer
    }
}

impl<M: LanguageModel> Processor for ChitchatProcessor<M> {
    fn preprocess(&self, mut params: Params) -> Result<Params> {
        let utterance = params
            .get("utterance")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::invalid_params("'utterance' must be a string"))?;
        let utterance = self.tokenizer.encode(utterance)?;

        let history = match params.get("history") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(turns)) => turns
                .iter()
                .map(|turn| {
                    turn.as_str()
                        .ok_or_else(|| Error::invalid_params("'history' must be a list of strings"))
                        .and_then(|text| self.tokenizer.encode(text))
                })
                .collect::<Result<Vec<_>>>()?,
            Some(_) => return Err(Error::invalid_params("'history' must be a list of strings")),
        };

        params.insert("utterance".to_string(), json!(utterance));
        params.insert("history".to_string(), json!(history));
        Ok(params)
    }

    fn model_process(&self, params: &Params) -> Result<Params> {
        let utterance: Vec<u32> = token_ids(params, "utterance")?;
        let history: Vec<Vec<u32>> = token_ids(params, "history")?;

        let Generation {
            tokens,
            stop_reason,
        } = self.engine.generate(&utterance, &history)?;

        let mut out = Params::new();
        out.insert("resp".to_string(), json!(tokens));
        out.insert("stop_reason".to_string(), json!(stop_reason.as_str()));
        Ok(out)
    }

    fn postprocess(&self, params: &Params, model_res: Params) -> Result<Params> {
        let tokens: Vec<u32> = token_ids(&model_res, "resp")?;
        let resp = self.tokenizer.decode(&tokens)?;

        let mut out = Params::new();
        out.insert("resp".to_string(), json!(resp));
        if param_flag(params, "debug").unwrap_or(false) {
            out.insert(
                "debug".to_string(),
                json!({
                    "tokens": tokens,
                    "stop_reason": model_res.get("stop_reason").cloned().unwrap_or(Value::Null),
                }),
            );
        }
        Ok(out)
    }
}

fn token_ids<T: serde::de::DeserializeOwned>(params: &Params, key: &str) -> Result<T> {
    let value = params
        .get(key)
        .cloned()
        .ok_or_else(|| Error::invalid_params(format!("missing '{}'", key)))?;
    serde_json::from_value(value)
        .map_err(|e| Error::invalid_params(format!("'{}' is not a token id list: {}", key, e)))
}

/// Plugin building [`ChitchatProcessor`]s from GPT-2 checkpoints
#[derive(Debug, Default, Clone, Copy)]
pub struct ChitchatPlugin;

impl ChitchatPlugin {
    pub fn new() -> Self {
        Self
    }
}

impl ProcessorPlugin for ChitchatPlugin {
    fn kind(&self) -> &str {
        KIND
    }

    fn load(&self, ctx: &LoadContext) -> Result<Box<dyn Processor>> {
        let start = Instant::now();
        let config: ChitchatConfig = ctx.options()?;
        config.sampling.validate()?;

        let chkpt = ctx.resource_path(&config.model_chkpt);
        if !chkpt.is_dir() {
            return Err(Error::plugin(format!(
                "checkpoint directory {} does not exist",
                chkpt.display()
            )));
        }

        let device = get_device(&config.device)?;
        let tokenizer = ChatTokenizer::from_dir(&chkpt)?;
        let model = Gpt2LmHeadModel::from_dir(&chkpt, &device)?;

        let vocab_size = model.config().vocab_size;
        let special = tokenizer.special_tokens();
        if let Some(id) = special.ids().into_iter().find(|&id| id as usize >= vocab_size) {
            return Err(Error::plugin(format!(
                "special token id {} is outside the model vocabulary ({})",
                id, vocab_size
            )));
        }

        tracing::info!(
            "Chit-chat model for '{}' ready on {} in {}ms (greedy={}, top_k={}, top_p={}, temperature={})",
            ctx.name(),
            config.device,
            start.elapsed().as_millis(),
            config.sampling.greedy,
            config.sampling.top_k,
            config.sampling.top_p,
            config.sampling.temperature
        );

        Ok(Box::new(ChitchatProcessor::new(
            tokenizer,
            model,
            config.sampling,
        )?))
    }

    fn describe(&self) -> PluginDescriptor {
        PluginDescriptor {
            kind: KIND.to_string(),
            description: "GPT-2 conversational reply generation (CDial-GPT checkpoints)".to_string(),
            options: [
                "model_chkpt",
                "device",
                "greedy",
                "max_out_len",
                "min_out_len",
                "temperature",
                "top_k",
                "top_p",
                "seed",
                "max_resample_attempts",
                "max_generation_ms",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}
