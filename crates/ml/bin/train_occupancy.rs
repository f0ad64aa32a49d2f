//! 入住率模型训练命令行
//!
//! 读取原始 CSV，连接、训练、选择模型并保存产物。

use clap::Parser;
use etl::{ETLConfig, ETLPipelineBuilder};
use ml::{CandidateKind, LeakageMode, MLError, OccupancyPipeline, PipelineConfig};
use std::path::PathBuf;
use tracing::Level;

#[derive(Parser)]
#[command(name = "train_occupancy")]
#[command(about = "Train and select a daily hotel occupancy model", long_about = None)]
struct Args {
    /// Directory holding the raw CSV files
    #[arg(short, long)]
    data_dir: Option<PathBuf>,

    /// Pipeline config (TOML or JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Property identifier
    #[arg(long)]
    property: Option<String>,

    /// Run type tag used in the artifact name
    #[arg(long)]
    run_type: Option<String>,

    /// Artifact output directory
    #[arg(long)]
    artifact_dir: Option<PathBuf>,

    /// Leakage mode (legacy, strict)
    #[arg(long)]
    leakage_mode: Option<String>,

    /// Comma-separated candidate models
    #[arg(long, value_delimiter = ',')]
    candidates: Vec<String>,

    /// Random seed
    #[arg(long)]
    seed: Option<u64>,

    /// Run the grid search sequentially
    #[arg(long)]
    no_parallel: bool,

    /// Write the run report as JSON
    #[arg(long)]
    report_json: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn pipeline_config(&self) -> Result<PipelineConfig, MLError> {
        let mut config = match &self.config {
            Some(path) => PipelineConfig::load(path)?,
            None => PipelineConfig::default(),
        };

        if let Some(property) = &self.property {
            config.property = property.clone();
        }
        if let Some(run_type) = &self.run_type {
            config.run_type = run_type.clone();
        }
        if let Some(dir) = &self.artifact_dir {
            config.artifact_dir = dir.clone();
        }
        if let Some(seed) = self.seed {
            config.random_seed = seed;
        }
        if let Some(mode) = &self.leakage_mode {
            config.leakage_mode = match mode.to_ascii_lowercase().as_str() {
                "legacy" => LeakageMode::Legacy,
                "strict" => LeakageMode::Strict,
                other => {
                    return Err(MLError::InvalidConfig(format!("未知的泄漏模式: {}", other)));
                }
            };
        }
        if !self.candidates.is_empty() {
            config.search.candidates = self
                .candidates
                .iter()
                .map(|name| {
                    CandidateKind::from_name(name)
                        .ok_or_else(|| MLError::InvalidConfig(format!("未知的候选模型: {}", name)))
                })
                .collect::<Result<Vec<_>, _>>()?;
        }
        if self.no_parallel {
            config.search.parallel = false;
        }

        config.validate()?;
        Ok(config)
    }

    fn etl_config(&self, property: &str) -> ETLConfig {
        let data_dir = self
            .data_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from("data/raw").join(property));
        ETLConfig {
            data_dir,
            ..Default::default()
        }
    }
}

async fn run(args: &Args) -> Result<(), MLError> {
    let config = args.pipeline_config()?;

    let etl = ETLPipelineBuilder::new()
        .with_config(args.etl_config(&config.property))
        .build();
    let joined = etl.run().await?;

    let pipeline = OccupancyPipeline::new(config)?;
    let outcome = pipeline.run(&joined).await?;

    outcome.report.print_report();
    if let Some(path) = &outcome.artifact_path {
        println!("模型已保存: {}", path.display());
    }
    if let Some(path) = &args.report_json {
        outcome.report.save_json(path)?;
        println!("报告已保存: {}", path.display());
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::fmt().with_max_level(level).init();

    if let Err(e) = run(&args).await {
        eprintln!("[{}] {}", e.stage(), e);
        std::process::exit(1);
    }
    Ok(())
}
