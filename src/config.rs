// Server configuration, from command-line flags or the environment
use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(name = "ai_detection_server")]
#[command(about = "Detects AI-generated images and text with CLIP and a RoBERTa classifier")]
pub struct Settings {
    /// Address to bind the HTTP server to
    #[arg(long, env = "DETECTOR_HOST", default_value = "0.0.0.0")]
    pub host: String,

    #[arg(long, env = "DETECTOR_PORT", default_value_t = 5042)]
    pub port: u16,

    /// Number of HTTP workers (defaults to the number of physical cores)
    #[arg(long, env = "DETECTOR_WORKERS")]
    pub workers: Option<usize>,

    /// Device to run inference on: cpu, cuda, cuda:N or metal
    #[arg(long, env = "DETECTOR_DEVICE", default_value = "cpu")]
    pub device: String,

    #[arg(long, env = "CLIP_MODEL_ID", default_value = "openai/clip-vit-base-patch32")]
    pub clip_model: String,

    // refs/pr/15 is the revision carrying model.safetensors
    #[arg(long, env = "CLIP_MODEL_REVISION", default_value = "refs/pr/15")]
    pub clip_revision: String,

    #[arg(
        long,
        env = "TEXT_MODEL_ID",
        default_value = "openai-community/roberta-base-openai-detector"
    )]
    pub text_model: String,

    #[arg(long, env = "TEXT_MODEL_REVISION", default_value = "main")]
    pub text_revision: String,

    /// Inputs longer than this many tokens are truncated
    #[arg(long, env = "TEXT_MAX_LENGTH", default_value_t = 512)]
    pub text_max_length: usize,

    /// Index of the classifier output treated as "AI-generated"
    #[arg(long, env = "TEXT_GENERATED_CLASS_INDEX", default_value_t = 1)]
    pub generated_class_index: usize,

    /// Largest accepted image upload, in bytes
    #[arg(long, env = "MAX_UPLOAD_BYTES", default_value_t = 20 * 1024 * 1024)]
    pub max_upload_bytes: usize,

    /// Hugging Face token for gated or private model repos
    #[arg(long, env = "HF_TOKEN", hide_env_values = true)]
    pub hf_token: Option<String>,
}

/// Where to fetch one model's files from on the Hugging Face hub.
#[derive(Debug, Clone)]
pub struct ModelSource {
    pub repo: String,
    pub revision: String,
    pub token: Option<String>,
}

#[derive(Debug, Clone)]
pub struct TextModelOptions {
    pub source: ModelSource,
    pub max_length: usize,
    pub generated_class_index: usize,
}

impl Settings {
    /// Loads `.env` (if present) and then parses flags and environment variables.
    pub fn from_env() -> Self {
        dotenv::dotenv().ok();
        Self::parse()
    }

    pub fn bind_address(&self) -> (String, u16) {
        (self.host.clone(), self.port)
    }

    pub fn clip_source(&self) -> ModelSource {
        ModelSource {
            repo: self.clip_model.clone(),
            revision: self.clip_revision.clone(),
            token: self.hf_token.clone(),
        }
    }

    pub fn text_options(&self) -> TextModelOptions {
        TextModelOptions {
            source: ModelSource {
                repo: self.text_model.clone(),
                revision: self.text_revision.clone(),
                token: self.hf_token.clone(),
            },
            max_length: self.text_max_length,
            generated_class_index: self.generated_class_index,
        }
    }
}
