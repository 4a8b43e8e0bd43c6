use ai_detection_server::config::{ModelSource, TextModelOptions};
use ai_detection_server::models::{parse_device, RobertaDetector, TextDetector, TextPrediction};
use anyhow::Result;
use clap::Parser;
use rayon::prelude::*;
use std::path::{Path, PathBuf};

/// Classifies every row of a CSV file as AI-generated or human-written text.
#[derive(Parser)]
#[command(name = "batch_detector")]
struct Args {
    /// CSV with a header row and `id,text` records
    input: PathBuf,

    #[arg(short, long, default_value = "detections.csv")]
    output: PathBuf,

    #[arg(long, env = "DETECTOR_DEVICE", default_value = "cpu")]
    device: String,

    #[arg(long, env = "TEXT_MODEL_ID", default_value = "openai-community/roberta-base-openai-detector")]
    text_model: String,

    #[arg(long, env = "TEXT_MODEL_REVISION", default_value = "main")]
    text_revision: String,

    #[arg(long, env = "TEXT_MAX_LENGTH", default_value_t = 512)]
    max_length: usize,

    #[arg(long, env = "TEXT_GENERATED_CLASS_INDEX", default_value_t = 1)]
    generated_class_index: usize,

    #[arg(long, env = "HF_TOKEN", hide_env_values = true)]
    hf_token: Option<String>,
}

struct Row {
    id: String,
    text: String,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    dotenv::dotenv().ok();
    let args = Args::parse();

    let rows = load_rows(&args.input)?;
    log::info!("loaded {} rows from {}", rows.len(), args.input.display());

    let options = TextModelOptions {
        source: ModelSource {
            repo: args.text_model,
            revision: args.text_revision,
            token: args.hf_token,
        },
        max_length: args.max_length,
        generated_class_index: args.generated_class_index,
    };
    let detector = RobertaDetector::load(&options, parse_device(&args.device)?)?;
    log::info!("loaded text model");

    let results: Vec<(&Row, anyhow::Result<TextPrediction>)> = rows
        .par_chunks(64)
        .flat_map_iter(|chunk| chunk.iter().map(|row| (row, detector.classify(&row.text))))
        .collect();

    let mut writer = csv::Writer::from_path(&args.output)?;
    writer.write_record(["id", "result", "confidence"])?;
    let mut failed = 0;
    for (row, result) in results {
        match result {
            Ok(prediction) => {
                let confidence = prediction.confidence.to_string();
                writer.write_record([row.id.as_str(), prediction.verdict.as_str(), confidence.as_str()])?;
            }
            Err(e) => {
                failed += 1;
                log::warn!("skipping row {}: {e:#}", row.id);
            }
        }
    }
    writer.flush()?;
    log::info!("wrote {} ({failed} rows failed)", args.output.display());

    Ok(())
}

fn load_rows(path: &Path) -> Result<Vec<Row>> {
    let mut reader = csv::ReaderBuilder::new().has_headers(true).from_path(path)?;
    let mut rows = Vec::new();
    for (line, record) in reader.records().enumerate() {
        let record = record?;
        match (record.get(0), record.get(1)) {
            (Some(id), Some(text)) => rows.push(Row {
                id: id.to_string(),
                text: text.to_string(),
            }),
            _ => anyhow::bail!("record {} needs an id and a text column", line + 1),
        }
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_server_environment_variables() {
        std::env::set_var("DETECTOR_DEVICE", "cuda:1");
        std::env::set_var("TEXT_MAX_LENGTH", "128");
        std::env::set_var("TEXT_GENERATED_CLASS_INDEX", "0");
        let args = Args::try_parse_from(["batch_detector", "texts.csv"]).unwrap();
        assert_eq!(args.device, "cuda:1");
        assert_eq!(args.max_length, 128);
        assert_eq!(args.generated_class_index, 0);

        // flags still win over the environment
        let args =
            Args::try_parse_from(["batch_detector", "texts.csv", "--max-length", "64"]).unwrap();
        assert_eq!(args.max_length, 64);
    }
}
