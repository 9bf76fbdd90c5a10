// GPT-2 Causal Language Model
// Decoder-only transformer used for next-token loss scoring

use candle_core::{DType, Device, Module, Result as CandleResult, Tensor};
use candle_nn::{embedding, layer_norm, Embedding, LayerNorm, Linear, VarBuilder};
use serde::Deserialize;
use tokenizers::{Tokenizer, TruncationDirection};

use super::CausalLanguageModel;
use crate::services::error::DetectorError;

fn default_n_positions() -> usize {
    1024
}

fn default_layer_norm_epsilon() -> f64 {
    1e-5
}

#[derive(Debug, Clone, Deserialize)]
pub struct Gpt2Config {
    pub vocab_size: usize,
    #[serde(default = "default_n_positions")]
    pub n_positions: usize,
    pub n_embd: usize,
    pub n_layer: usize,
    pub n_head: usize,
    #[serde(default = "default_layer_norm_epsilon")]
    pub layer_norm_epsilon: f64,
}

/// HF stores GPT-2 projections as Conv1D with an (in, out) weight.
fn conv1d(in_dim: usize, out_dim: usize, vb: VarBuilder) -> CandleResult<Linear> {
    let weight = vb.get((in_dim, out_dim), "weight")?.t()?.contiguous()?;
    let bias = vb.get(out_dim, "bias")?;
    Ok(Linear::new(weight, Some(bias)))
}

struct Attention {
    c_attn: Linear,
    c_proj: Linear,
    n_head: usize,
    head_dim: usize,
}

impl Attention {
    fn load(cfg: &Gpt2Config, vb: VarBuilder) -> CandleResult<Self> {
        Ok(Self {
            c_attn: conv1d(cfg.n_embd, 3 * cfg.n_embd, vb.pp("c_attn"))?,
            c_proj: conv1d(cfg.n_embd, cfg.n_embd, vb.pp("c_proj"))?,
            n_head: cfg.n_head,
            head_dim: cfg.n_embd / cfg.n_head,
        })
    }

    fn forward(&self, x: &Tensor, mask: &Tensor) -> CandleResult<Tensor> {
        let (b, t, c) = x.dims3()?;
        let qkv = self.c_attn.forward(x)?;

        let split = |offset: usize| -> CandleResult<Tensor> {
            qkv.narrow(2, offset, c)?
                .reshape((b, t, self.n_head, self.head_dim))?
                .transpose(1, 2)?
                .contiguous()
        };
        let q = split(0)?;
        let k = split(c)?;
        let v = split(2 * c)?;

        let scale = (self.head_dim as f64).sqrt();
        let scores = (q.matmul(&k.t()?.contiguous()?)? / scale)?.broadcast_add(mask)?;
        let weights = candle_nn::ops::softmax_last_dim(&scores)?;
        let y = weights.matmul(&v)?.transpose(1, 2)?.reshape((b, t, c))?;
        self.c_proj.forward(&y)
    }
}

struct Mlp {
    c_fc: Linear,
    c_proj: Linear,
}

impl Mlp {
    fn load(cfg: &Gpt2Config, vb: VarBuilder) -> CandleResult<Self> {
        Ok(Self {
            c_fc: conv1d(cfg.n_embd, 4 * cfg.n_embd, vb.pp("c_fc"))?,
            c_proj: conv1d(4 * cfg.n_embd, cfg.n_embd, vb.pp("c_proj"))?,
        })
    }

    fn forward(&self, x: &Tensor) -> CandleResult<Tensor> {
        // gelu_new is the tanh approximation
        self.c_proj.forward(&self.c_fc.forward(x)?.gelu()?)
    }
}

struct Block {
    ln_1: LayerNorm,
    attn: Attention,
    ln_2: LayerNorm,
    mlp: Mlp,
}

impl Block {
    fn load(cfg: &Gpt2Config, vb: VarBuilder) -> CandleResult<Self> {
        Ok(Self {
            ln_1: layer_norm(cfg.n_embd, cfg.layer_norm_epsilon, vb.pp("ln_1"))?,
            attn: Attention::load(cfg, vb.pp("attn"))?,
            ln_2: layer_norm(cfg.n_embd, cfg.layer_norm_epsilon, vb.pp("ln_2"))?,
            mlp: Mlp::load(cfg, vb.pp("mlp"))?,
        })
    }

    fn forward(&self, x: &Tensor, mask: &Tensor) -> CandleResult<Tensor> {
        let x = (x + self.attn.forward(&self.ln_1.forward(x)?, mask)?)?;
        &x + self.mlp.forward(&self.ln_2.forward(&x)?)?
    }
}

struct Gpt2 {
    wte: Embedding,
    wpe: Embedding,
    blocks: Vec<Block>,
    ln_f: LayerNorm,
}

impl Gpt2 {
    fn load(cfg: &Gpt2Config, vb: VarBuilder) -> CandleResult<Self> {
        // LM-head checkpoints nest the decoder under "transformer."
        let vb = if vb.contains_tensor("transformer.wte.weight") {
            vb.pp("transformer")
        } else {
            vb
        };

        let blocks = (0..cfg.n_layer)
            .map(|i| Block::load(cfg, vb.pp(format!("h.{}", i))))
            .collect::<CandleResult<Vec<_>>>()?;

        Ok(Self {
            wte: embedding(cfg.vocab_size, cfg.n_embd, vb.pp("wte"))?,
            wpe: embedding(cfg.n_positions, cfg.n_embd, vb.pp("wpe"))?,
            blocks,
            ln_f: layer_norm(cfg.n_embd, cfg.layer_norm_epsilon, vb.pp("ln_f"))?,
        })
    }

    /// Logits of shape (batch, seq, vocab); the LM head is tied to `wte`.
    fn forward(&self, input_ids: &Tensor) -> CandleResult<Tensor> {
        let (_, t) = input_ids.dims2()?;
        let device = input_ids.device();

        let positions = Tensor::arange(0u32, t as u32, device)?.unsqueeze(0)?;
        let mut x = self.wte.forward(input_ids)?.broadcast_add(&self.wpe.forward(&positions)?)?;

        let mask = causal_mask(t, device)?;
        for block in &self.blocks {
            x = block.forward(&x, &mask)?;
        }
        let x = self.ln_f.forward(&x)?;
        x.broadcast_matmul(&self.wte.embeddings().t()?)
    }
}

fn causal_mask(t: usize, device: &Device) -> CandleResult<Tensor> {
    let mask: Vec<f32> = (0..t)
        .flat_map(|i| (0..t).map(move |j| if j > i { f32::NEG_INFINITY } else { 0.0 }))
        .collect();
    Tensor::from_vec(mask, (t, t), device)
}

pub struct Gpt2LanguageModel {
    tokenizer: Tokenizer,
    model: Gpt2,
    device: Device,
    context: usize,
}

impl Gpt2LanguageModel {
    pub fn new(config_json: &str, tokenizer: Tokenizer, vb: VarBuilder, device: Device) -> Result<Self, DetectorError> {
        let config: Gpt2Config = serde_json::from_str(config_json)
            .map_err(|e| DetectorError::Inference(format!("invalid GPT-2 config: {}", e)))?;
        if config.n_head == 0 || config.n_embd % config.n_head != 0 {
            return Err(DetectorError::Inference(format!(
                "n_embd {} not divisible by n_head {}",
                config.n_embd, config.n_head
            )));
        }
        let model = Gpt2::load(&config, vb)?;

        Ok(Self {
            tokenizer,
            model,
            device,
            context: config.n_positions,
        })
    }
}

impl CausalLanguageModel for Gpt2LanguageModel {
    fn mean_token_loss(&self, text: &str, max_tokens: usize) -> Result<f64, DetectorError> {
        let mut encoding = self
            .tokenizer
            .encode(text, false)
            .map_err(|e| DetectorError::Tokenizer(e.to_string()))?;
        encoding.truncate(max_tokens.min(self.context), 0, TruncationDirection::Right);

        let ids = encoding.get_ids();
        if ids.len() < 2 {
            return Err(DetectorError::Inference(format!(
                "need at least 2 tokens for a loss, got {}",
                ids.len()
            )));
        }
        let t = ids.len();

        let input_ids = Tensor::new(ids, &self.device)?.unsqueeze(0)?;
        let logits = self.model.forward(&input_ids)?.squeeze(0)?.to_dtype(DType::F32)?;

        // Position i predicts token i + 1
        let predictions = logits.narrow(0, 0, t - 1)?;
        let targets = input_ids.squeeze(0)?.narrow(0, 1, t - 1)?;
        let loss = candle_nn::loss::cross_entropy(&predictions, &targets)?;

        let loss = loss.to_scalar::<f32>()? as f64;
        if !loss.is_finite() {
            return Err(DetectorError::Inference(format!("non-finite loss {}", loss)));
        }
        Ok(loss)
    }
}
