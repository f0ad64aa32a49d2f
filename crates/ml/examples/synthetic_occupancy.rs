//! 合成数据训练示例
//!
//! 这个示例展示了如何:
//! 1. 准备内存中的日表
//! 2. 运行 ETL 连接
//! 3. 训练并选择入住率模型
//! 4. 保存并重新加载产物

use chrono::{Duration, NaiveDate};
use etl::{Column, DailyTable, ETLPipelineBuilder, InMemoryProvider};
use ml::{ArtifactStore, CandidateKind, LeakageMode, OccupancyPipeline, PipelineConfig};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 初始化日志
    tracing_subscriber::fmt::init();

    println!("=== 酒店入住率预测示例 ===\n");

    // 1. 生成模拟日表
    println!("1. 生成模拟数据...");
    let provider = generate_tables(90, 42)?;
    println!("   访客记录 {} 行（每天两个来源）", provider.visitors.n_rows());

    // 2. 连接
    println!("\n2. 按日期连接...");
    let etl = ETLPipelineBuilder::new()
        .with_provider(Box::new(provider))
        .build();
    let joined = etl.run().await?;
    println!("   连接结果: {} 天, 列 {:?}", joined.n_rows(), joined.column_names());

    // 3. 训练
    println!("\n3. 搜索候选模型...");
    let artifact_dir = std::env::temp_dir().join("occupancy_example_models");
    let mut config = PipelineConfig::default();
    config.property = "demo_hotel".to_string();
    config.artifact_dir = artifact_dir.clone();
    config.leakage_mode = LeakageMode::Strict;
    config.search.candidates = vec![
        CandidateKind::LinearRegression,
        CandidateKind::Ridge,
        CandidateKind::ElasticNet,
    ];

    let pipeline = OccupancyPipeline::new(config)?;
    let outcome = pipeline.run(&joined).await?;
    outcome.report.print_report();

    // 4. 重新加载并预测
    println!("\n4. 加载产物并复现测试集预测...");
    let store = ArtifactStore::new(&artifact_dir);
    let artifact = store.load("demo_hotel", "daily").await?;
    let predictions = artifact.predict(&outcome.test_inputs)?;

    for ((date, actual), predicted) in outcome
        .test_dates
        .iter()
        .zip(&outcome.test_actuals)
        .zip(predictions.iter())
    {
        println!("   {}  实际 {:>6.2}  预测 {:>6.2}", date, actual, predicted);
    }

    println!("\n=== 示例完成 ===");
    Ok(())
}

/// 生成访客、广告花费、入住率三张表
fn generate_tables(days: usize, seed: u64) -> Result<InMemoryProvider, etl::ETLError> {
    let mut rng = StdRng::seed_from_u64(seed);
    let start = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap_or_default();

    let mut visit_dates = Vec::new();
    let mut users = Vec::new();
    let mut sessions = Vec::new();
    let mut dates = Vec::new();
    let mut spend = Vec::new();
    let mut fill = Vec::new();

    for i in 0..days {
        let date = start + Duration::days(i as i64);
        let weekend = i % 7 >= 5;
        let base = if weekend { 120.0 } else { 80.0 };
        let organic: f64 = base + rng.gen_range(-15.0..15.0);
        let paid: f64 = 20.0 + rng.gen_range(0.0..10.0);

        // 每个来源一行，由 ETL 按日期求和
        for u in [organic, paid] {
            visit_dates.push(date);
            users.push(Some(u.round()));
            sessions.push(Some((u * 1.2).round()));
        }

        let s: f64 = 150.0 + rng.gen_range(0.0..100.0);
        dates.push(date);
        spend.push(Some(s));
        fill.push(Some(((organic + paid) * 0.35 + s * 0.03).min(100.0)));
    }

    let visitors = DailyTable::new(
        "visitors",
        vec![
            Column::date("date", visit_dates),
            Column::numeric("user_count", users),
            Column::numeric("session_count", sessions),
        ],
    )?
    .aggregate_sum("date")?;
    let ppc = DailyTable::new(
        "ppc",
        vec![
            Column::date("date", dates.clone()),
            Column::numeric("total_ppc_spend", spend),
        ],
    )?;
    let occupancy = DailyTable::new(
        "occupancy",
        vec![
            Column::date("date", dates),
            Column::numeric("fill_rate", fill),
        ],
    )?;

    Ok(InMemoryProvider {
        visitors,
        ppc,
        occupancy,
    })
}
