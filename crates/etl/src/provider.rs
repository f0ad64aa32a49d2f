//! 数据源模块
//!
//! 负责把已经类型化的原始日表交给连接器：访客表按日期求和、
//! 广告表合并三个渠道的花费、入住率表只保留当天记录。

use crate::types::{Column, DailyTable, ETLConfig, ETLError, ETLResult};
use async_trait::async_trait;
use chrono::NaiveDate;
use std::path::PathBuf;

/// 广告花费渠道列
pub const PPC_CHANNEL_COLUMNS: [&str; 3] = [
    "daily_google_spend",
    "daily_microsoft_spend",
    "daily_meta_spend",
];

/// 数据源接口
#[async_trait]
pub trait DataProvider: Send + Sync {
    /// 数据源名称
    fn name(&self) -> &str;

    /// 加载前检查数据源是否可用
    async fn check(&self) -> ETLResult<()> {
        Ok(())
    }

    /// 日期选择器访客表 `{date, user_count, session_count}`（种子表）
    async fn visitors(&self) -> ETLResult<DailyTable>;

    /// 广告花费表 `{date, total_ppc_spend}`
    async fn ppc_spend(&self) -> ETLResult<DailyTable>;

    /// 入住率表 `{date, fill_rate}`，只含当天记录
    async fn occupancy(&self) -> ETLResult<DailyTable>;
}

/// 从 CSV 文件目录加载
pub struct CsvDataProvider {
    config: ETLConfig,
    data_dir: PathBuf,
    visitors_file: String,
    ppc_file: String,
    occupancy_file: String,
    date_key: String,
}

impl CsvDataProvider {
    pub fn new(config: &ETLConfig) -> Self {
        Self {
            config: config.clone(),
            data_dir: config.data_dir.clone(),
            visitors_file: config.visitors_file.clone(),
            ppc_file: config.ppc_file.clone(),
            occupancy_file: config.occupancy_file.clone(),
            date_key: config.date_key.clone(),
        }
    }

    async fn read_frame(&self, file: &str) -> ETLResult<CsvFrame> {
        let path = self.data_dir.join(file);
        tracing::info!("Loading {}", path.display());
        let content = tokio::fs::read_to_string(&path).await.map_err(|e| {
            ETLError::DataSource(format!("无法读取 {}: {}", path.display(), e))
        })?;
        CsvFrame::parse(file, &content)
    }
}

#[async_trait]
impl DataProvider for CsvDataProvider {
    fn name(&self) -> &str {
        "csv"
    }

    async fn check(&self) -> ETLResult<()> {
        let missing = missing_files(&self.config);
        if missing.is_empty() {
            return Ok(());
        }
        let listed: Vec<String> = missing.iter().map(|p| p.display().to_string()).collect();
        Err(ETLError::DataSource(format!("缺少数据文件: {}", listed.join(", "))))
    }

    async fn visitors(&self) -> ETLResult<DailyTable> {
        let frame = self.read_frame(&self.visitors_file).await?;
        let dates = frame.dates(&self.date_key)?;
        let table = DailyTable::new(
            "visitors",
            vec![
                Column::date(&self.date_key, dates),
                Column::numeric("user_count", frame.numbers("user_count")?),
                Column::numeric("session_count", frame.numbers("session_count")?),
            ],
        )?;
        // 每个 UTM 来源一行，需要按日期求和
        table.aggregate_sum(&self.date_key)
    }

    async fn ppc_spend(&self) -> ETLResult<DailyTable> {
        let frame = self.read_frame(&self.ppc_file).await?;
        let dates = frame.dates(&self.date_key)?;

        let total = if frame.has_column("total_ppc_spend") {
            frame.numbers("total_ppc_spend")?
        } else {
            let channels = PPC_CHANNEL_COLUMNS
                .iter()
                .map(|c| frame.numbers(c))
                .collect::<ETLResult<Vec<_>>>()?;
            total_spend(&channels, frame.n_rows())
        };

        let table = DailyTable::new(
            "ppc",
            vec![
                Column::date(&self.date_key, dates),
                Column::numeric("total_ppc_spend", total),
            ],
        )?;
        table.aggregate_sum(&self.date_key)
    }

    async fn occupancy(&self) -> ETLResult<DailyTable> {
        let frame = self.read_frame(&self.occupancy_file).await?;
        let recording = frame.dates("recording_date")?;
        let subject = frame.dates("subject_date")?;
        let fill_rate = frame.numbers("fill_rate")?;
        same_day_occupancy(&self.date_key, &recording, &subject, &fill_rate)
    }
}

/// 内存数据源（已准备好的表）
#[derive(Debug, Clone)]
pub struct InMemoryProvider {
    pub visitors: DailyTable,
    pub ppc: DailyTable,
    pub occupancy: DailyTable,
}

#[async_trait]
impl DataProvider for InMemoryProvider {
    fn name(&self) -> &str {
        "memory"
    }

    async fn visitors(&self) -> ETLResult<DailyTable> {
        Ok(self.visitors.clone())
    }

    async fn ppc_spend(&self) -> ETLResult<DailyTable> {
        Ok(self.ppc.clone())
    }

    async fn occupancy(&self) -> ETLResult<DailyTable> {
        Ok(self.occupancy.clone())
    }
}

/// 三个渠道花费逐行相加，任一渠道缺失则结果缺失
pub fn total_spend(channels: &[Vec<Option<f64>>], n_rows: usize) -> Vec<Option<f64>> {
    (0..n_rows)
        .map(|i| {
            channels
                .iter()
                .try_fold(0.0, |acc, c| c.get(i).copied().flatten().map(|v| acc + v))
        })
        .collect()
}

/// 只保留 `recording_date == subject_date` 的记录，并以 subject_date 作为日期键
pub fn same_day_occupancy(
    date_key: &str,
    recording: &[NaiveDate],
    subject: &[NaiveDate],
    fill_rate: &[Option<f64>],
) -> ETLResult<DailyTable> {
    let mut dates = Vec::new();
    let mut values = Vec::new();
    for ((r, s), f) in recording.iter().zip(subject).zip(fill_rate) {
        if r == s {
            dates.push(*s);
            values.push(*f);
        }
    }

    tracing::info!(
        "Occupancy: kept {}/{} same-day recordings",
        dates.len(),
        recording.len()
    );

    DailyTable::new(
        "occupancy",
        vec![
            Column::date(date_key, dates),
            Column::numeric("fill_rate", values),
        ],
    )
}

/// 解析日期：支持 `YYYY-MM-DD` 以及带时间的写法
pub fn parse_date(value: &str) -> ETLResult<NaiveDate> {
    let trimmed = value.trim();
    let head = trimmed.get(..10).unwrap_or(trimmed);
    NaiveDate::parse_from_str(head, "%Y-%m-%d").map_err(|e| ETLError::DateParse {
        value: value.to_string(),
        reason: e.to_string(),
    })
}

/// 已读入内存的 CSV
struct CsvFrame {
    name: String,
    headers: csv::StringRecord,
    records: Vec<csv::StringRecord>,
}

impl CsvFrame {
    fn parse(name: &str, content: &str) -> ETLResult<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(content.as_bytes());
        let headers = reader.headers()?.clone();
        let records = reader.records().collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            name: name.to_string(),
            headers,
            records,
        })
    }

    fn n_rows(&self) -> usize {
        self.records.len()
    }

    fn has_column(&self, column: &str) -> bool {
        self.headers.iter().any(|h| h == column)
    }

    fn index_of(&self, column: &str) -> ETLResult<usize> {
        self.headers
            .iter()
            .position(|h| h == column)
            .ok_or_else(|| ETLError::schema(&self.name, format!("缺少列 `{}`", column)))
    }

    fn dates(&self, column: &str) -> ETLResult<Vec<NaiveDate>> {
        let idx = self.index_of(column)?;
        self.records
            .iter()
            .map(|r| parse_date(r.get(idx).unwrap_or_default()))
            .collect()
    }

    fn numbers(&self, column: &str) -> ETLResult<Vec<Option<f64>>> {
        let idx = self.index_of(column)?;
        self.records
            .iter()
            .map(|r| {
                let raw = r.get(idx).unwrap_or_default();
                if raw.is_empty() || raw.eq_ignore_ascii_case("nan") {
                    return Ok(None);
                }
                raw.parse::<f64>().map(Some).map_err(|e| {
                    ETLError::DataSource(format!(
                        "{}: 列 `{}` 的值 `{}` 无法解析: {}",
                        self.name, column, raw, e
                    ))
                })
            })
            .collect()
    }
}

/// 数据目录中缺少的文件
pub fn missing_files(config: &ETLConfig) -> Vec<PathBuf> {
    [&config.visitors_file, &config.ppc_file, &config.occupancy_file]
        .iter()
        .map(|f| config.data_dir.join(f))
        .filter(|p| !p.exists())
        .collect()
}
