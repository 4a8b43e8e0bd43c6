//! Model wrappers and the traits the HTTP layer talks to.
pub mod clip;
pub mod roberta;

use candle::{Device, Tensor};
use hf_hub::api::sync::{ApiBuilder, ApiRepo};
use hf_hub::{Repo, RepoType};
use serde::Serialize;
use std::path::PathBuf;

use crate::config::ModelSource;

pub use clip::ClipDetector;
pub use roberta::RobertaDetector;

/// Winning prompt for an image, with its softmax probability.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImagePrediction {
    #[serde(rename = "result")]
    pub label: String,
    pub confidence: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TextVerdict {
    #[serde(rename = "AI-generated")]
    AiGenerated,
    #[serde(rename = "Human-written")]
    HumanWritten,
}

impl TextVerdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            TextVerdict::AiGenerated => "AI-generated",
            TextVerdict::HumanWritten => "Human-written",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TextPrediction {
    #[serde(rename = "result")]
    pub verdict: TextVerdict,
    pub confidence: f32,
}

pub trait ImageDetector: Send + Sync {
    /// Classifies an encoded image (any format the `image` crate can sniff).
    fn classify(&self, image_bytes: &[u8]) -> anyhow::Result<ImagePrediction>;
}

pub trait TextDetector: Send + Sync {
    fn classify(&self, text: &str) -> anyhow::Result<TextPrediction>;
}

/// Softmax over the last dimension of `logits`, returning the first row.
pub fn first_row_probabilities(logits: &Tensor) -> anyhow::Result<Vec<f32>> {
    let probabilities = candle_nn::ops::softmax_last_dim(logits)?;
    let rows = probabilities.to_vec2::<f32>()?;
    rows.into_iter()
        .next()
        .ok_or_else(|| anyhow::anyhow!("model returned no logits"))
}

/// Index and value of the largest probability. The first maximum wins on ties.
pub fn argmax(probabilities: &[f32]) -> Option<(usize, f32)> {
    probabilities
        .iter()
        .copied()
        .enumerate()
        .fold(None, |best, (index, value)| match best {
            Some((_, best_value)) if best_value >= value => best,
            _ => Some((index, value)),
        })
}

/// Files of one model repository on the Hugging Face hub.
pub struct HubFiles {
    repo: ApiRepo,
    name: String,
}

impl HubFiles {
    pub fn open(source: &ModelSource) -> anyhow::Result<Self> {
        let api = ApiBuilder::new()
            .with_token(source.token.clone())
            .build()?;
        let repo = api.repo(Repo::with_revision(
            source.repo.clone(),
            RepoType::Model,
            source.revision.clone(),
        ));
        Ok(Self {
            repo,
            name: format!("{}@{}", source.repo, source.revision),
        })
    }

    /// Downloads `filename` into the local cache (or reuses the cached copy).
    pub fn get(&self, filename: &str) -> anyhow::Result<PathBuf> {
        log::debug!("fetching {filename} from {}", self.name);
        self.repo
            .get(filename)
            .map_err(|e| anyhow::anyhow!("failed to fetch {filename} from {}: {e}", self.name))
    }
}

pub fn parse_device(device: &str) -> anyhow::Result<Device> {
    let device = device.to_lowercase();
    match device.as_str() {
        "cpu" => Ok(Device::Cpu),
        "cuda" | "gpu" => Ok(Device::new_cuda(0)?),
        "metal" => Ok(Device::new_metal(0)?),
        s if s.starts_with("cuda:") => {
            let ordinal: usize = s["cuda:".len()..]
                .parse()
                .map_err(|_| anyhow::anyhow!("invalid CUDA device ordinal in '{s}'"))?;
            Ok(Device::new_cuda(ordinal)?)
        }
        _ => anyhow::bail!("unknown device '{device}', use 'cpu', 'cuda', 'cuda:N' or 'metal'"),
    }
}
