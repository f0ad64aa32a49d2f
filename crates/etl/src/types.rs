//! 核心类型定义

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use thiserror::Error;

pub type ETLResult<T> = Result<T, ETLError>;

#[derive(Debug, Error)]
pub enum ETLError {
    #[error("表结构错误 [{table}]: {reason}")]
    Schema { table: String, reason: String },

    #[error("CSV 解析失败: {0}")]
    Csv(#[from] csv::Error),

    #[error("日期解析失败: {value} ({reason})")]
    DateParse { value: String, reason: String },

    #[error("数据源错误: {0}")]
    DataSource(String),

    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),
}

impl ETLError {
    pub fn schema(table: impl Into<String>, reason: impl Into<String>) -> Self {
        ETLError::Schema {
            table: table.into(),
            reason: reason.into(),
        }
    }

    /// 出错所在的处理阶段
    pub fn stage(&self) -> &'static str {
        match self {
            ETLError::Schema { .. } => "TableJoiner",
            _ => "DataProvider",
        }
    }
}

/// 列数据
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ColumnValues {
    /// 日期列（连接键）
    Date(Vec<NaiveDate>),
    /// 数值列，`None` 表示缺失
    Numeric(Vec<Option<f64>>),
}

impl ColumnValues {
    pub fn len(&self) -> usize {
        match self {
            ColumnValues::Date(v) => v.len(),
            ColumnValues::Numeric(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// 命名列
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub values: ColumnValues,
}

impl Column {
    pub fn date(name: impl Into<String>, values: Vec<NaiveDate>) -> Self {
        Self {
            name: name.into(),
            values: ColumnValues::Date(values),
        }
    }

    pub fn numeric(name: impl Into<String>, values: Vec<Option<f64>>) -> Self {
        Self {
            name: name.into(),
            values: ColumnValues::Numeric(values),
        }
    }
}

/// 按日期组织的数据表（一个数据源）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyTable {
    /// 表名（用于错误信息和日志）
    pub name: String,
    pub columns: Vec<Column>,
}

impl DailyTable {
    pub fn new(name: impl Into<String>, columns: Vec<Column>) -> ETLResult<Self> {
        let name = name.into();
        if let Some(first) = columns.first() {
            let n = first.values.len();
            if let Some(bad) = columns.iter().find(|c| c.values.len() != n) {
                return Err(ETLError::schema(
                    &name,
                    format!("列 `{}` 长度为 {}，期望 {}", bad.name, bad.values.len(), n),
                ));
            }
        }
        Ok(Self { name, columns })
    }

    pub fn n_rows(&self) -> usize {
        self.columns.first().map(|c| c.values.len()).unwrap_or(0)
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// 取日期列；缺失或类型不对时返回表结构错误
    pub fn date_column(&self, key: &str) -> ETLResult<&[NaiveDate]> {
        match self.column(key) {
            Some(Column {
                values: ColumnValues::Date(dates),
                ..
            }) => Ok(dates),
            Some(_) => Err(ETLError::schema(
                &self.name,
                format!("日期列 `{}` 不是日期类型", key),
            )),
            None => Err(ETLError::schema(
                &self.name,
                format!("缺少日期列 `{}`", key),
            )),
        }
    }

    pub fn numeric_column(&self, name: &str) -> Option<&[Option<f64>]> {
        match self.column(name) {
            Some(Column {
                values: ColumnValues::Numeric(values),
                ..
            }) => Some(values),
            _ => None,
        }
    }

    /// 按日期预聚合：同一日期的所有数值列求和
    ///
    /// 一组内全部缺失时结果仍为缺失；输出按日期升序排列。
    pub fn aggregate_sum(&self, key: &str) -> ETLResult<Self> {
        let dates = self.date_column(key)?;

        let numeric: Vec<(&str, &[Option<f64>])> = self
            .columns
            .iter()
            .filter_map(|c| match &c.values {
                ColumnValues::Numeric(v) if c.name != key => Some((c.name.as_str(), v.as_slice())),
                _ => None,
            })
            .collect();

        let mut groups: BTreeMap<NaiveDate, Vec<Option<f64>>> = BTreeMap::new();
        for (row, date) in dates.iter().enumerate() {
            let acc = groups
                .entry(*date)
                .or_insert_with(|| vec![None; numeric.len()]);
            for (j, (_, values)) in numeric.iter().enumerate() {
                if let Some(v) = values[row] {
                    acc[j] = Some(acc[j].unwrap_or(0.0) + v);
                }
            }
        }

        let out_dates: Vec<NaiveDate> = groups.keys().copied().collect();
        let mut columns = vec![Column::date(key, out_dates)];
        for (j, (name, _)) in numeric.iter().enumerate() {
            let values = groups.values().map(|acc| acc[j]).collect();
            columns.push(Column::numeric(*name, values));
        }

        tracing::debug!(
            "Aggregated table {}: {} rows -> {} dates",
            self.name,
            dates.len(),
            groups.len()
        );

        Self::new(self.name.clone(), columns)
    }
}

/// 连接后的日表：每个日期一行，日期升序
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinedTable {
    pub dates: Vec<NaiveDate>,
    /// 数值列（按连接顺序），缺失值保持为 `None`
    pub columns: Vec<(String, Vec<Option<f64>>)>,
}

impl JoinedTable {
    pub fn n_rows(&self) -> usize {
        self.dates.len()
    }

    pub fn column(&self, name: &str) -> Option<&[Option<f64>]> {
        self.columns
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_slice())
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|(n, _)| n.as_str()).collect()
    }

    /// 缺失值数量（按列）
    pub fn missing_counts(&self) -> Vec<(&str, usize)> {
        self.columns
            .iter()
            .map(|(n, v)| (n.as_str(), v.iter().filter(|x| x.is_none()).count()))
            .collect()
    }
}

/// ETL 配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ETLConfig {
    /// 原始数据目录
    pub data_dir: PathBuf,
    /// 日期选择器访客文件（种子表）
    pub visitors_file: String,
    /// 广告预算文件
    pub ppc_file: String,
    /// 入住率文件
    pub occupancy_file: String,
    /// 连接键
    pub date_key: String,
}

impl Default for ETLConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data/raw/hotel_2"),
            visitors_file: "datepicker_daily_visitors.csv".to_string(),
            ppc_file: "daily_ppc_budget.csv".to_string(),
            occupancy_file: "daily_occupancy.csv".to_string(),
            date_key: "date".to_string(),
        }
    }
}
