//! GPT-2 language model with a tied LM head, built on candle-nn.
//!
//! Token-type (speaker) ids are embedded with the token embedding table and
//! added to the input, which is how CDial-GPT checkpoints encode roles.

use crate::sampling::LanguageModel;
use candle_core::{DType, Device, IndexOp, Module, Tensor, D};
use candle_nn::{embedding, layer_norm, Embedding, LayerNorm, VarBuilder};
use modelhost_core::{Error, Result};
use serde::Deserialize;
use std::path::Path;

fn default_n_positions() -> usize {
    1024
}

fn default_n_embd() -> usize {
    768
}

fn default_n_layer() -> usize {
    12
}

fn default_n_head() -> usize {
    12
}

fn default_layer_norm_epsilon() -> f64 {
    1e-5
}

/// Subset of a HuggingFace GPT-2 `config.json`
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Gpt2Config {
    pub vocab_size: usize,

    #[serde(default = "default_n_positions")]
    pub n_positions: usize,

    #[serde(default = "default_n_embd")]
    pub n_embd: usize,

    #[serde(default = "default_n_layer")]
    pub n_layer: usize,

    #[serde(default = "default_n_head")]
    pub n_head: usize,

    #[serde(default = "default_layer_norm_epsilon")]
    pub layer_norm_epsilon: f64,
}

impl Gpt2Config {
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::model(format!("Failed to read config {}: {}", path.display(), e))
        })?;
        serde_json::from_str(&content).map_err(|e| {
            Error::model(format!("Failed to parse config {}: {}", path.display(), e))
        })
    }
}

/// GPT-2 "Conv1D": a linear layer whose weight is stored as (in, out)
struct Conv1D {
    weight: Tensor,
    bias: Tensor,
}

impl Conv1D {
    fn load(in_dim: usize, out_dim: usize, vb: VarBuilder) -> candle_core::Result<Self> {
        Ok(Self {
            weight: vb.get((in_dim, out_dim), "weight")?,
            bias: vb.get(out_dim, "bias")?,
        })
    }
}

impl Module for Conv1D {
    fn forward(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        xs.broadcast_matmul(&self.weight)?.broadcast_add(&self.bias)
    }
}

struct Attention {
    c_attn: Conv1D,
    c_proj: Conv1D,
    n_head: usize,
    head_dim: usize,
}

impl Attention {
    fn load(config: &Gpt2Config, vb: VarBuilder) -> candle_core::Result<Self> {
        let n_embd = config.n_embd;
        Ok(Self {
            c_attn: Conv1D::load(n_embd, 3 * n_embd, vb.pp("c_attn"))?,
            c_proj: Conv1D::load(n_embd, n_embd, vb.pp("c_proj"))?,
            n_head: config.n_head,
            head_dim: n_embd / config.n_head,
        })
    }

    fn forward(&self, xs: &Tensor, mask: &Tensor) -> candle_core::Result<Tensor> {
        let (b, t, c) = xs.dims3()?;
        let qkv = self.c_attn.forward(xs)?;

        let heads = |x: Tensor| -> candle_core::Result<Tensor> {
            x.reshape((b, t, self.n_head, self.head_dim))?
                .transpose(1, 2)?
                .contiguous()
        };
        let q = heads(qkv.narrow(D::Minus1, 0, c)?)?;
        let k = heads(qkv.narrow(D::Minus1, c, c)?)?;
        let v = heads(qkv.narrow(D::Minus1, 2 * c, c)?)?;

        let scale = 1.0 / (self.head_dim as f64).sqrt();
        let att = (q.matmul(&k.t()?.contiguous()?)? * scale)?;
        let att = masked_fill(&att, &mask.broadcast_as(att.shape())?, f32::NEG_INFINITY)?;
        let att = candle_nn::ops::softmax_last_dim(&att)?;

        let ys = att.matmul(&v)?.transpose(1, 2)?.reshape((b, t, c))?;
        self.c_proj.forward(&ys)
    }
}

struct Mlp {
    c_fc: Conv1D,
    c_proj: Conv1D,
}

impl Mlp {
    fn load(config: &Gpt2Config, vb: VarBuilder) -> candle_core::Result<Self> {
        let n_embd = config.n_embd;
        Ok(Self {
            c_fc: Conv1D::load(n_embd, 4 * n_embd, vb.pp("c_fc"))?,
            c_proj: Conv1D::load(4 * n_embd, n_embd, vb.pp("c_proj"))?,
        })
    }
}

impl Module for Mlp {
    fn forward(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        self.c_proj.forward(&self.c_fc.forward(xs)?.gelu()?)
    }
}

struct Block {
    ln_1: LayerNorm,
    attn: Attention,
    ln_2: LayerNorm,
    mlp: Mlp,
}

impl Block {
    fn load(config: &Gpt2Config, vb: VarBuilder) -> candle_core::Result<Self> {
        let eps = config.layer_norm_epsilon;
        Ok(Self {
            ln_1: layer_norm(config.n_embd, eps, vb.pp("ln_1"))?,
            attn: Attention::load(config, vb.pp("attn"))?,
            ln_2: layer_norm(config.n_embd, eps, vb.pp("ln_2"))?,
            mlp: Mlp::load(config, vb.pp("mlp"))?,
        })
    }

    fn forward(&self, xs: &Tensor, mask: &Tensor) -> candle_core::Result<Tensor> {
        let xs = (xs + self.attn.forward(&self.ln_1.forward(xs)?, mask)?)?;
        &xs + self.mlp.forward(&self.ln_2.forward(&xs)?)?
    }
}

fn masked_fill(on_false: &Tensor, mask: &Tensor, on_true: f32) -> candle_core::Result<Tensor> {
    let on_true = Tensor::new(on_true, on_false.device())?.broadcast_as(mask.shape().dims())?;
    mask.where_cond(&on_true, on_false)
}

fn causal_mask(t: usize, device: &Device) -> candle_core::Result<Tensor> {
    let mask: Vec<u8> = (0..t)
        .flat_map(|i| (0..t).map(move |j| u8::from(j > i)))
        .collect();
    Tensor::from_slice(&mask, (t, t), device)
}

/// GPT-2 transformer with the LM head tied to the token embeddings
pub struct Gpt2LmHeadModel {
    wte: Embedding,
    wpe: Embedding,
    blocks: Vec<Block>,
    ln_f: LayerNorm,
    config: Gpt2Config,
    device: Device,
}

impl Gpt2LmHeadModel {
    pub fn load(vb: VarBuilder, config: &Gpt2Config) -> candle_core::Result<Self> {
        let wte = embedding(config.vocab_size, config.n_embd, vb.pp("wte"))?;
        let wpe = embedding(config.n_positions, config.n_embd, vb.pp("wpe"))?;
        let blocks = (0..config.n_layer)
            .map(|i| Block::load(config, vb.pp(format!("h.{}", i))))
            .collect::<candle_core::Result<Vec<_>>>()?;
        let ln_f = layer_norm(config.n_embd, config.layer_norm_epsilon, vb.pp("ln_f"))?;

        Ok(Self {
            wte,
            wpe,
            blocks,
            ln_f,
            config: config.clone(),
            device: vb.device().clone(),
        })
    }

    /// Load `config.json` and the weights of a checkpoint directory
    pub fn from_dir(dir: &Path, device: &Device) -> Result<Self> {
        let config = Gpt2Config::from_file(&dir.join("config.json"))?;
        let vb = load_var_builder(dir, device)?;

        let mut errors = Vec::new();
        for prefix in ["transformer", ""] {
            let vb_prefix = if prefix.is_empty() {
                vb.clone()
            } else {
                vb.pp(prefix)
            };

            match Self::load(vb_prefix, &config) {
                Ok(model) => {
                    let effective_prefix = if prefix.is_empty() { "<root>" } else { prefix };
                    tracing::info!(
                        "Loaded GPT-2 from '{}' ({} layers, vocab {})",
                        effective_prefix,
                        config.n_layer,
                        config.vocab_size
                    );
                    return Ok(model);
                }
                Err(e) => {
                    errors.push(format!(
                        "{}: {}",
                        if prefix.is_empty() { "<root>" } else { prefix },
                        e
                    ));
                }
            }
        }

        Err(Error::model(format!(
            "Failed to load GPT-2 with tried prefixes [{}]",
            errors.join(" | ")
        )))
    }

    pub fn config(&self) -> &Gpt2Config {
        &self.config
    }

    /// Logits of the last position, shape (batch, vocab)
    pub fn forward(&self, input_ids: &Tensor, token_type_ids: &Tensor) -> candle_core::Result<Tensor> {
        let (_, t) = input_ids.dims2()?;
        let positions = Tensor::arange(0u32, t as u32, input_ids.device())?.unsqueeze(0)?;

        let tokens = self.wte.forward(input_ids)?;
        let types = self.wte.forward(token_type_ids)?;
        let mut xs = (tokens + types)?.broadcast_add(&self.wpe.forward(&positions)?)?;

        let mask = causal_mask(t, input_ids.device())?;
        for block in &self.blocks {
            xs = block.forward(&xs, &mask)?;
        }
        let xs = self.ln_f.forward(&xs)?;

        let last = xs.i((.., t - 1, ..))?.contiguous()?;
        last.matmul(&self.wte.embeddings().t()?)
    }

    fn logits(&self, input_ids: &[u32], token_type_ids: &[u32]) -> candle_core::Result<Vec<f32>> {
        // Keep the most recent context when it outgrows the position table
        let start = input_ids.len().saturating_sub(self.config.n_positions);
        let input_ids = Tensor::new(&input_ids[start..], &self.device)?.unsqueeze(0)?;
        let token_type_ids = Tensor::new(&token_type_ids[start..], &self.device)?.unsqueeze(0)?;

        self.forward(&input_ids, &token_type_ids)?
            .squeeze(0)?
            .to_dtype(DType::F32)?
            .to_vec1::<f32>()
    }
}

impl LanguageModel for Gpt2LmHeadModel {
    fn next_token_logits(&self, input_ids: &[u32], token_type_ids: &[u32]) -> Result<Vec<f32>> {
        if input_ids.is_empty() || input_ids.len() != token_type_ids.len() {
            return Err(Error::model(format!(
                "invalid model input: {} token ids, {} token type ids",
                input_ids.len(),
                token_type_ids.len()
            )));
        }
        self.logits(input_ids, token_type_ids)
            .map_err(|e| Error::model(format!("GPT-2 forward pass failed: {}", e)))
    }
}

fn load_var_builder(dir: &Path, device: &Device) -> Result<VarBuilder<'static>> {
    let safetensors = dir.join("model.safetensors");
    if safetensors.exists() {
        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&[safetensors], DType::F32, device).map_err(
                |e| Error::model(format!("Failed to load weights: {}", e)),
            )?
        };
        return Ok(vb);
    }

    let pth = dir.join("pytorch_model.bin");
    if pth.exists() {
        tracing::debug!("Loading PyTorch weights from {}", pth.display());
        return VarBuilder::from_pth(&pth, DType::F32, device)
            .map_err(|e| Error::model(format!("Failed to load weights: {}", e)));
    }

    Err(Error::model(format!(
        "No weights found in {} (tried model.safetensors, pytorch_model.bin)",
        dir.display()
    )))
}

/// Map a device name from configuration to a candle device
pub fn get_device(device_str: &str) -> Result<Device> {
    match device_str.to_lowercase().as_str() {
        "cuda" | "cuda:0" => Device::new_cuda(0)
            .map_err(|e| Error::model(format!("Failed to initialize CUDA: {}", e))),
        "mps" | "metal" => Device::new_metal(0)
            .map_err(|e| Error::model(format!("Failed to initialize Metal: {}", e))),
        _ => Ok(Device::Cpu),
    }
}
