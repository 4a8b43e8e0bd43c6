// CLIP zero-shot image detector
use candle::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::clip::{ClipConfig, ClipModel};
use image::imageops::FilterType;
use tokenizers::Tokenizer;

use super::{argmax, first_row_probabilities, HubFiles, ImageDetector, ImagePrediction};
use crate::config::ModelSource;

/// Candidate descriptions an image is scored against.
pub const PROMPTS: [&str; 7] = [
    "This is a computer-generated image",
    "This is a photo of a real human",
    "This image is a digitally created artwork",
    "This is a natural photograph",
    "This is an AI-generated face",
    "This is an AI-generated human",
    "This is a painting of a human",
];

const PAD_TOKEN: &str = "<|endoftext|>";
const IMAGE_MEAN: [f32; 3] = [0.481_454_66, 0.457_827_5, 0.408_210_73];
const IMAGE_STD: [f32; 3] = [0.268_629_54, 0.261_302_58, 0.275_777_11];

pub struct ClipDetector {
    model: ClipModel,
    device: Device,
    image_size: usize,
    // prompts, tokenized once and padded to a common length
    input_ids: Tensor,
}

impl ClipDetector {
    pub fn load(source: &ModelSource, device: Device) -> anyhow::Result<Self> {
        let hub = HubFiles::open(source)?;
        let weights_filename = hub.get("model.safetensors")?;
        let tokenizer_filename = hub.get("tokenizer.json")?;

        let tokenizer = Tokenizer::from_file(tokenizer_filename).map_err(anyhow::Error::msg)?;
        let input_ids = tokenize_prompts(&tokenizer, &device)?;

        let config = ClipConfig::vit_base_patch32();
        let variable_builder =
            unsafe { VarBuilder::from_mmaped_safetensors(&[weights_filename], DType::F32, &device)? };
        let model = ClipModel::new(variable_builder, &config)?;

        Ok(Self {
            model,
            device,
            image_size: config.image_size,
            input_ids,
        })
    }
}

impl ImageDetector for ClipDetector {
    fn classify(&self, image_bytes: &[u8]) -> anyhow::Result<ImagePrediction> {
        let pixel_values = preprocess_image(image_bytes, self.image_size, &self.device)?;
        let (_logits_per_text, logits_per_image) =
            self.model.forward(&pixel_values, &self.input_ids)?;
        let probabilities = first_row_probabilities(&logits_per_image)?;
        let (index, confidence) =
            argmax(&probabilities).ok_or_else(|| anyhow::anyhow!("no prompt scores"))?;
        let label = PROMPTS
            .get(index)
            .ok_or_else(|| anyhow::anyhow!("prompt index {index} out of range"))?;
        Ok(ImagePrediction {
            label: label.to_string(),
            confidence,
        })
    }
}

fn tokenize_prompts(tokenizer: &Tokenizer, device: &Device) -> anyhow::Result<Tensor> {
    let pad_id = *tokenizer
        .get_vocab(true)
        .get(PAD_TOKEN)
        .ok_or_else(|| anyhow::anyhow!("tokenizer has no {PAD_TOKEN} token"))?;

    let mut rows = Vec::with_capacity(PROMPTS.len());
    for prompt in PROMPTS {
        let encoding = tokenizer.encode(prompt, true).map_err(anyhow::Error::msg)?;
        rows.push(encoding.get_ids().to_vec());
    }
    let max_len = rows.iter().map(Vec::len).max().unwrap_or(0);
    for row in rows.iter_mut() {
        row.resize(max_len, pad_id);
    }
    Ok(Tensor::new(rows, device)?)
}

/// Decodes an image and turns it into a normalized `(1, 3, size, size)` tensor.
///
/// The short side is resized to `size` and the result center-cropped, then
/// each channel is normalized with the CLIP training mean and std.
pub fn preprocess_image(bytes: &[u8], size: usize, device: &Device) -> anyhow::Result<Tensor> {
    let image = image::load_from_memory(bytes)?;
    let image = image
        .resize_to_fill(size as u32, size as u32, FilterType::CatmullRom)
        .to_rgb8();

    let mean = Tensor::new(&IMAGE_MEAN, device)?.reshape((3, 1, 1))?;
    let std = Tensor::new(&IMAGE_STD, device)?.reshape((3, 1, 1))?;
    let pixels = Tensor::from_vec(image.into_raw(), (size, size, 3), device)?
        .permute((2, 0, 1))?
        .to_dtype(DType::F32)?
        .affine(1. / 255., 0.)?
        .broadcast_sub(&mean)?
        .broadcast_div(&std)?;
    Ok(pixels.unsqueeze(0)?)
}
