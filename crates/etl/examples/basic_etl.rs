//! 基础 ETL 示例
//!
//! 写出一组小型 CSV，加载、预聚合并按日期连接

use etl::ETLPipelineBuilder;

const VISITORS: &str = "date,utm_source,user_count,session_count
2024-06-01,google,40,52
2024-06-01,direct,25,27
2024-06-02,google,38,45
2024-06-03,google,51,60
2024-06-03,meta,12,14
";

const PPC: &str = "date,daily_google_spend,daily_microsoft_spend,daily_meta_spend
2024-06-01,120.0,15.0,30.0
2024-06-03,110.0,,25.0
";

const OCCUPANCY: &str = "recording_date,subject_date,fill_rate
2024-06-01,2024-06-01,62.5
2024-06-01,2024-06-02,40.0
2024-06-02,2024-06-02,58.0
2024-06-03,2024-06-03,66.0
";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 初始化日志
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    println!("=== ETL 基础示例 ===\n");

    // 1. 准备数据目录
    println!("1. 写出原始 CSV...");
    let dir = std::env::temp_dir().join("etl_basic_example");
    tokio::fs::create_dir_all(&dir).await?;
    tokio::fs::write(dir.join("datepicker_daily_visitors.csv"), VISITORS).await?;
    tokio::fs::write(dir.join("daily_ppc_budget.csv"), PPC).await?;
    tokio::fs::write(dir.join("daily_occupancy.csv"), OCCUPANCY).await?;
    println!("   ✓ 数据目录: {}\n", dir.display());

    // 2. 创建 ETL 管道
    println!("2. 创建 ETL 管道...");
    let pipeline = ETLPipelineBuilder::new().with_data_dir(&dir).build();
    println!("   ✓ 管道创建完成\n");

    // 3. 运行
    println!("3. 加载并连接...");
    let joined = pipeline.run().await?;

    println!("   {:<12} {}", "date", joined.column_names().join("  "));
    for (i, date) in joined.dates.iter().enumerate() {
        let row: Vec<String> = joined
            .columns
            .iter()
            .map(|(_, values)| match values[i] {
                Some(v) => format!("{:.1}", v),
                None => "NaN".to_string(),
            })
            .collect();
        println!("   {:<12} {}", date.to_string(), row.join("  "));
    }

    // 4. 缺失值
    println!("\n4. 缺失值统计:");
    for (column, missing) in joined.missing_counts() {
        println!("   {}: {}", column, missing);
    }

    println!("\n=== 示例完成 ===");
    Ok(())
}
