// RoBERTa sequence classifier for generated-text detection
use candle::{DType, Device, Tensor};
use candle_nn::{linear, Linear, Module, VarBuilder};
use candle_transformers::models::xlm_roberta::{Config, XLMRobertaModel};
use tokenizers::{Tokenizer, TruncationParams};

use super::{first_row_probabilities, HubFiles, TextDetector, TextPrediction, TextVerdict};
use crate::config::TextModelOptions;

/// RoBERTa encoder with the `RobertaForSequenceClassification` head:
/// the first token's hidden state goes through `dense`, `tanh`, then `out_proj`.
pub struct RobertaClassifier {
    roberta: XLMRobertaModel,
    dense: Linear,
    out_proj: Linear,
}

impl RobertaClassifier {
    pub fn new(num_labels: usize, config: &Config, vb: VarBuilder) -> candle::Result<Self> {
        let roberta = XLMRobertaModel::new(config, vb.pp("roberta"))?;
        let head = vb.pp("classifier");
        let dense = linear(config.hidden_size, config.hidden_size, head.pp("dense"))?;
        let out_proj = linear(config.hidden_size, num_labels, head.pp("out_proj"))?;
        Ok(Self {
            roberta,
            dense,
            out_proj,
        })
    }

    /// Returns logits of shape `(batch, num_labels)`.
    pub fn forward(
        &self,
        input_ids: &Tensor,
        attention_mask: &Tensor,
        token_type_ids: &Tensor,
    ) -> candle::Result<Tensor> {
        let hidden = self
            .roberta
            .forward(input_ids, attention_mask, token_type_ids, None, None, None)?;
        let cls = hidden.get_on_dim(1, 0)?;
        let cls = self.dense.forward(&cls)?.tanh()?;
        self.out_proj.forward(&cls)
    }
}

pub struct RobertaDetector {
    model: RobertaClassifier,
    tokenizer: Tokenizer,
    device: Device,
    generated_class_index: usize,
}

impl RobertaDetector {
    pub fn load(options: &TextModelOptions, device: Device) -> anyhow::Result<Self> {
        let hub = HubFiles::open(&options.source)?;
        let config_filename = hub.get("config.json")?;
        let tokenizer_filename = hub.get("tokenizer.json")?;
        let weights_filename = hub.get("model.safetensors")?;

        let config = std::fs::read_to_string(config_filename)?;
        let (config, num_labels) = parse_config(&config)?;
        if options.generated_class_index >= num_labels {
            anyhow::bail!(
                "generated class index {} is out of range for {num_labels} labels",
                options.generated_class_index
            );
        }

        let mut tokenizer = Tokenizer::from_file(tokenizer_filename).map_err(anyhow::Error::msg)?;
        tokenizer
            .with_padding(None)
            .with_truncation(Some(TruncationParams {
                max_length: options.max_length,
                ..Default::default()
            }))
            .map_err(anyhow::Error::msg)?;

        let variable_builder =
            unsafe { VarBuilder::from_mmaped_safetensors(&[weights_filename], DType::F32, &device)? };
        let model = RobertaClassifier::new(num_labels, &config, variable_builder)?;

        Ok(Self {
            model,
            tokenizer,
            device,
            generated_class_index: options.generated_class_index,
        })
    }
}

impl TextDetector for RobertaDetector {
    fn classify(&self, text: &str) -> anyhow::Result<TextPrediction> {
        let encoding = self.tokenizer.encode(text, true).map_err(anyhow::Error::msg)?;
        let input_ids = Tensor::new(encoding.get_ids(), &self.device)?.unsqueeze(0)?;
        let attention_mask = Tensor::new(encoding.get_attention_mask(), &self.device)?.unsqueeze(0)?;
        let token_type_ids = input_ids.zeros_like()?;

        let logits = self
            .model
            .forward(&input_ids, &attention_mask, &token_type_ids)?;
        let probabilities = first_row_probabilities(&logits)?;
        verdict_from_probabilities(&probabilities, self.generated_class_index)
    }
}

/// Reads a RoBERTa `config.json`, returning the model config and its label count.
///
/// Older checkpoints omit `position_embedding_type`; it defaults to `absolute`.
fn parse_config(raw: &str) -> anyhow::Result<(Config, usize)> {
    let mut value: serde_json::Value = serde_json::from_str(raw)?;
    let object = value
        .as_object_mut()
        .ok_or_else(|| anyhow::anyhow!("config.json is not an object"))?;
    object
        .entry("position_embedding_type")
        .or_insert_with(|| serde_json::Value::String("absolute".to_string()));
    let num_labels = object
        .get("id2label")
        .and_then(|labels| labels.as_object())
        .map(|labels| labels.len())
        .filter(|&count| count > 0)
        .unwrap_or(2);
    Ok((serde_json::from_value(value)?, num_labels))
}

/// Maps class probabilities to a verdict.
///
/// Text counts as generated when the generated class is strictly above 0.5;
/// otherwise the confidence is that of the opposite class.
pub fn verdict_from_probabilities(
    probabilities: &[f32],
    generated_class_index: usize,
) -> anyhow::Result<TextPrediction> {
    let human_class_index = if generated_class_index == 0 { 1 } else { 0 };
    let (generated, human) = match (
        probabilities.get(generated_class_index),
        probabilities.get(human_class_index),
    ) {
        (Some(&generated), Some(&human)) => (generated, human),
        _ => anyhow::bail!(
            "expected at least two class probabilities, got {}",
            probabilities.len()
        ),
    };

    Ok(if generated > 0.5 {
        TextPrediction {
            verdict: TextVerdict::AiGenerated,
            confidence: generated,
        }
    } else {
        TextPrediction {
            verdict: TextVerdict::HumanWritten,
            confidence: human,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_nn::VarMap;

    const DETECTOR_CONFIG: &str = r#"{
        "architectures": ["RobertaForSequenceClassification"],
        "attention_probs_dropout_prob": 0.1,
        "hidden_act": "gelu",
        "hidden_dropout_prob": 0.1,
        "hidden_size": 768,
        "id2label": {"0": "Fake", "1": "Real"},
        "intermediate_size": 3072,
        "layer_norm_eps": 1e-05,
        "max_position_embeddings": 514,
        "model_type": "roberta",
        "num_attention_heads": 12,
        "num_hidden_layers": 12,
        "pad_token_id": 1,
        "type_vocab_size": 1,
        "vocab_size": 50265
    }"#;

    #[test]
    fn parses_config_without_position_embedding_type() {
        let (config, num_labels) = parse_config(DETECTOR_CONFIG).unwrap();
        assert_eq!(num_labels, 2);
        assert_eq!(config.hidden_size, 768);
        assert_eq!(config.position_embedding_type, "absolute");
    }

    const TINY_CONFIG: &str = r#"{
        "attention_probs_dropout_prob": 0.0,
        "hidden_act": "gelu",
        "hidden_dropout_prob": 0.0,
        "hidden_size": 8,
        "id2label": {"0": "Fake", "1": "Real"},
        "intermediate_size": 16,
        "layer_norm_eps": 1e-05,
        "max_position_embeddings": 16,
        "num_attention_heads": 2,
        "num_hidden_layers": 1,
        "pad_token_id": 1,
        "type_vocab_size": 1,
        "vocab_size": 12
    }"#;

    fn var(varmap: &VarMap, name: &str) -> Tensor {
        varmap
            .data()
            .lock()
            .unwrap()
            .get(name)
            .unwrap_or_else(|| panic!("missing variable {name}"))
            .as_tensor()
            .clone()
    }

    #[test]
    fn head_applies_tanh_to_first_token() {
        let (config, num_labels) = parse_config(TINY_CONFIG).unwrap();
        let device = Device::Cpu;
        let mut varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let classifier = RobertaClassifier::new(num_labels, &config, vb.clone()).unwrap();

        // Large pre-activations, where tanh and gelu clearly disagree.
        let dense_weight = var(&varmap, "classifier.dense.weight");
        varmap
            .set_one("classifier.dense.weight", (&dense_weight * 40.0).unwrap())
            .unwrap();

        let input_ids = Tensor::new(&[[0u32, 5, 7, 9, 2]], &device).unwrap();
        let attention_mask = input_ids.ones_like().unwrap();
        let token_type_ids = input_ids.zeros_like().unwrap();
        let logits = classifier
            .forward(&input_ids, &attention_mask, &token_type_ids)
            .unwrap();
        assert_eq!(logits.dims(), &[1, 2]);

        // Same weights, head computed by hand.
        let encoder = XLMRobertaModel::new(&config, vb.pp("roberta")).unwrap();
        let hidden = encoder
            .forward(&input_ids, &attention_mask, &token_type_ids, None, None, None)
            .unwrap();
        let cls = hidden.get_on_dim(1, 0).unwrap();
        let dense = cls
            .matmul(&var(&varmap, "classifier.dense.weight").t().unwrap())
            .unwrap()
            .broadcast_add(&var(&varmap, "classifier.dense.bias"))
            .unwrap()
            .tanh()
            .unwrap();
        let expected = dense
            .matmul(&var(&varmap, "classifier.out_proj.weight").t().unwrap())
            .unwrap()
            .broadcast_add(&var(&varmap, "classifier.out_proj.bias"))
            .unwrap();

        let actual = logits.to_vec2::<f32>().unwrap();
        let expected = expected.to_vec2::<f32>().unwrap();
        for (a, e) in actual[0].iter().zip(expected[0].iter()) {
            assert!((a - e).abs() < 1e-5, "logit {a} differs from {e}");
        }

        let probabilities = first_row_probabilities(&logits).unwrap();
        let total: f32 = probabilities.iter().sum();
        assert!((total - 1.0).abs() < 1e-5);
    }

    #[test]
    fn rejects_non_object_config() {
        assert!(parse_config("[1, 2, 3]").is_err());
    }

    #[test]
    fn generated_above_half_wins() {
        let prediction = verdict_from_probabilities(&[0.2, 0.8], 1).unwrap();
        assert_eq!(prediction.verdict, TextVerdict::AiGenerated);
        assert_eq!(prediction.confidence, 0.8);
    }

    #[test]
    fn exactly_half_is_human() {
        let prediction = verdict_from_probabilities(&[0.5, 0.5], 1).unwrap();
        assert_eq!(prediction.verdict, TextVerdict::HumanWritten);
        assert_eq!(prediction.confidence, 0.5);
    }

    #[test]
    fn honours_generated_class_index() {
        let prediction = verdict_from_probabilities(&[0.9, 0.1], 0).unwrap();
        assert_eq!(prediction.verdict, TextVerdict::AiGenerated);
        assert_eq!(prediction.confidence, 0.9);

        let prediction = verdict_from_probabilities(&[0.9, 0.1], 1).unwrap();
        assert_eq!(prediction.verdict, TextVerdict::HumanWritten);
        assert_eq!(prediction.confidence, 0.9);
    }

    #[test]
    fn needs_two_classes() {
        assert!(verdict_from_probabilities(&[1.0], 1).is_err());
    }
}
