//! 特征工程
//!
//! 把连接后的日表转换为特征表：日历、比率、滚动统计、滞后和周期编码。
//! 各步骤组成静态有序的 DAG，引擎构造时检查每一步的输入都已由前面的步骤产生。

use crate::config::FeatureConfig;
use crate::preprocessing::MissingDataPolicy;
use crate::timeseries::{ensure_strictly_increasing, lag, rolling_mean, rolling_std};
use crate::types::{MLError, MLResult};
use chrono::{Datelike, NaiveDate};
use etl::JoinedTable;
use ndarray::{Array1, Array2, ArrayView1, Axis};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::f64::consts::PI;
use std::ops::Range;

/// 预测目标
pub const TARGET_COLUMN: &str = "fill_rate";

/// 原始输入列（连接结果中除目标外的数值列）
pub const RAW_INPUT_COLUMNS: [&str; 3] = ["user_count", "session_count", "total_ppc_spend"];

/// 类别列：不做噪声增强，也不做标准化
pub const CATEGORICAL_COLUMNS: [&str; 2] = ["weekday", "is_weekend"];

const DATE_COLUMN: &str = "date";

/// 只参与派生、不进入输出的中间列
const INTERMEDIATE_COLUMNS: [&str; 2] = ["month", "day_of_month"];

/// 滚动和滞后作用的序列及其输出前缀
static SIGNAL_SERIES: [(&str, &str); 3] = [
    ("fill_rate", "fill_rate"),
    ("user_count", "user_count"),
    ("total_ppc_spend", "ppc"),
];

/// 周期编码列（sin/cos）
pub fn is_cyclical(name: &str) -> bool {
    name.ends_with("_sin") || name.ends_with("_cos")
}

/// 特征步骤
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FeatureStep {
    /// weekday (周一=0), is_weekend, month, day_of_month
    Calendar,
    /// ppc_per_user, conversion_rate
    Ratios,
    /// 尾随窗口的均值和标准差
    Rolling { windows: Vec<usize> },
    /// 按行位移的滞后
    Lags { lags: Vec<usize> },
    /// weekday 和 month 的 sin/cos 编码
    Cyclical,
}

impl FeatureStep {
    /// 默认步骤顺序
    pub fn default_steps(config: &FeatureConfig) -> Vec<FeatureStep> {
        vec![
            FeatureStep::Calendar,
            FeatureStep::Ratios,
            FeatureStep::Rolling {
                windows: config.rolling_windows.clone(),
            },
            FeatureStep::Lags {
                lags: config.lags.clone(),
            },
            FeatureStep::Cyclical,
        ]
    }

    pub fn name(&self) -> &'static str {
        match self {
            FeatureStep::Calendar => "calendar",
            FeatureStep::Ratios => "ratios",
            FeatureStep::Rolling { .. } => "rolling",
            FeatureStep::Lags { .. } => "lags",
            FeatureStep::Cyclical => "cyclical",
        }
    }

    /// 读取的列
    pub fn inputs(&self) -> Vec<String> {
        let names: Vec<&str> = match self {
            FeatureStep::Calendar => vec![DATE_COLUMN],
            FeatureStep::Ratios => vec!["user_count", "session_count", "total_ppc_spend"],
            FeatureStep::Rolling { .. } | FeatureStep::Lags { .. } => {
                SIGNAL_SERIES.iter().map(|(s, _)| *s).collect()
            }
            FeatureStep::Cyclical => vec!["weekday", "month"],
        };
        names.into_iter().map(String::from).collect()
    }

    /// 产生的列（按输出顺序）
    pub fn outputs(&self) -> Vec<String> {
        match self {
            FeatureStep::Calendar => ["weekday", "is_weekend", "month", "day_of_month"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            FeatureStep::Ratios => vec!["ppc_per_user".to_string(), "conversion_rate".to_string()],
            FeatureStep::Rolling { windows } => windows
                .iter()
                .flat_map(|w| {
                    let means = SIGNAL_SERIES.iter().map(move |(_, p)| format!("{}_ma{}", p, w));
                    let stds = SIGNAL_SERIES.iter().map(move |(_, p)| format!("{}_std{}", p, w));
                    means.chain(stds)
                })
                .collect(),
            FeatureStep::Lags { lags } => lags
                .iter()
                .flat_map(|k| SIGNAL_SERIES.iter().map(move |(_, p)| format!("{}_lag{}", p, k)))
                .collect(),
            FeatureStep::Cyclical => ["weekday_sin", "weekday_cos", "month_sin", "month_cos"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }

    fn apply(&self, dates: &[NaiveDate], frame: &mut Frame) -> MLResult<()> {
        match self {
            FeatureStep::Calendar => {
                let weekday: Vec<f64> = dates
                    .iter()
                    .map(|d| d.weekday().num_days_from_monday() as f64)
                    .collect();
                let weekend = weekday
                    .iter()
                    .map(|&w| Some(if w >= 5.0 { 1.0 } else { 0.0 }))
                    .collect();
                frame.push("weekday", weekday.into_iter().map(Some).collect());
                frame.push("is_weekend", weekend);
                frame.push("month", dates.iter().map(|d| Some(d.month() as f64)).collect());
                frame.push("day_of_month", dates.iter().map(|d| Some(d.day() as f64)).collect());
            }
            FeatureStep::Ratios => {
                let users = frame.get("user_count")?.to_vec();
                let spend = frame.get("total_ppc_spend")?.to_vec();
                let sessions = frame.get("session_count")?.to_vec();
                frame.push("ppc_per_user", guarded_ratio(&spend, &users));
                frame.push("conversion_rate", guarded_ratio(&sessions, &users));
            }
            FeatureStep::Rolling { windows } => {
                for &w in windows {
                    let mut stds = Vec::with_capacity(SIGNAL_SERIES.len());
                    for (series, prefix) in SIGNAL_SERIES {
                        let values = frame.get(series)?.to_vec();
                        frame.push(&format!("{}_ma{}", prefix, w), rolling_mean(&values, w));
                        stds.push((format!("{}_std{}", prefix, w), rolling_std(&values, w)));
                    }
                    for (name, values) in stds {
                        frame.push(&name, values);
                    }
                }
            }
            FeatureStep::Lags { lags } => {
                for &k in lags {
                    for (series, prefix) in SIGNAL_SERIES {
                        let values = frame.get(series)?.to_vec();
                        frame.push(&format!("{}_lag{}", prefix, k), lag(&values, k));
                    }
                }
            }
            FeatureStep::Cyclical => {
                let weekday = frame.get("weekday")?.to_vec();
                let month = frame.get("month")?.to_vec();
                let angle = |v: &[Option<f64>], period: f64| -> Vec<Option<f64>> {
                    v.iter().map(|x| x.map(|x| 2.0 * PI * x / period)).collect()
                };
                let wa = angle(&weekday, 7.0);
                let ma = angle(&month, 12.0);
                frame.push("weekday_sin", wa.iter().map(|a| a.map(f64::sin)).collect());
                frame.push("weekday_cos", wa.iter().map(|a| a.map(f64::cos)).collect());
                frame.push("month_sin", ma.iter().map(|a| a.map(f64::sin)).collect());
                frame.push("month_cos", ma.iter().map(|a| a.map(f64::cos)).collect());
            }
        }
        Ok(())
    }
}

/// 分母为 0 时比率取 0
fn guarded_ratio(numerator: &[Option<f64>], denominator: &[Option<f64>]) -> Vec<Option<f64>> {
    numerator
        .iter()
        .zip(denominator)
        .map(|(n, d)| match (n, d) {
            (Some(_), Some(d)) if *d == 0.0 => Some(0.0),
            (Some(n), Some(d)) => Some(n / d),
            _ => None,
        })
        .collect()
}

/// 计算过程中的列集合
struct Frame {
    columns: Vec<(String, Vec<Option<f64>>)>,
}

impl Frame {
    fn get(&self, name: &str) -> MLResult<&[Option<f64>]> {
        self.columns
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_slice())
            .ok_or_else(|| MLError::FeatureComputation(format!("缺少列 `{}`", name)))
    }

    fn get_mut(&mut self, name: &str) -> Option<&mut Vec<Option<f64>>> {
        self.columns
            .iter_mut()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    fn push(&mut self, name: &str, values: Vec<Option<f64>>) {
        self.columns.push((name.to_string(), values));
    }
}

/// 特征表：每行一个日期，`values` 的列与 `names` 一一对应
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureTable {
    pub dates: Vec<NaiveDate>,
    pub names: Vec<String>,
    pub values: Array2<f64>,
    pub target: Array1<f64>,
}

impl FeatureTable {
    pub fn new(
        dates: Vec<NaiveDate>,
        names: Vec<String>,
        values: Array2<f64>,
        target: Array1<f64>,
    ) -> MLResult<Self> {
        if values.ncols() != names.len() {
            return Err(MLError::dimension("FeatureEngineer", names.len(), values.ncols()));
        }
        if values.nrows() != dates.len() || target.len() != dates.len() {
            return Err(MLError::dimension(
                "FeatureEngineer",
                dates.len(),
                values.nrows().min(target.len()),
            ));
        }
        Ok(Self {
            dates,
            names,
            values,
            target,
        })
    }

    pub fn n_rows(&self) -> usize {
        self.dates.len()
    }

    pub fn n_features(&self) -> usize {
        self.names.len()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }

    pub fn column(&self, name: &str) -> Option<ArrayView1<'_, f64>> {
        self.column_index(name).map(|j| self.values.column(j))
    }

    /// 取连续的行
    pub fn rows(&self, range: Range<usize>) -> FeatureTable {
        let idx: Vec<usize> = range.collect();
        FeatureTable {
            dates: idx.iter().map(|&i| self.dates[i]).collect(),
            names: self.names.clone(),
            values: self.values.select(Axis(0), &idx),
            target: self.target.select(Axis(0), &idx),
        }
    }
}

/// 特征工程引擎
pub struct FeatureEngine {
    steps: Vec<FeatureStep>,
    policy: MissingDataPolicy,
    output_names: Vec<String>,
}

impl FeatureEngine {
    pub fn new(config: &FeatureConfig, policy: MissingDataPolicy) -> MLResult<Self> {
        Self::with_steps(FeatureStep::default_steps(config), policy)
    }

    /// 自定义步骤；构造时校验依赖关系
    pub fn with_steps(steps: Vec<FeatureStep>, policy: MissingDataPolicy) -> MLResult<Self> {
        let mut available: HashSet<String> = RAW_INPUT_COLUMNS
            .iter()
            .chain([TARGET_COLUMN, DATE_COLUMN].iter())
            .map(|s| s.to_string())
            .collect();

        let mut output_names: Vec<String> = RAW_INPUT_COLUMNS.iter().map(|s| s.to_string()).collect();

        for step in &steps {
            for input in step.inputs() {
                if !available.contains(&input) {
                    return Err(MLError::FeatureComputation(format!(
                        "步骤 {} 读取的列 `{}` 尚未由之前的步骤产生",
                        step.name(),
                        input
                    )));
                }
            }
            for output in step.outputs() {
                if !available.insert(output.clone()) {
                    return Err(MLError::FeatureComputation(format!(
                        "步骤 {} 重复产生列 `{}`",
                        step.name(),
                        output
                    )));
                }
                if !INTERMEDIATE_COLUMNS.contains(&output.as_str()) {
                    output_names.push(output);
                }
            }
        }

        Ok(Self {
            steps,
            policy,
            output_names,
        })
    }

    /// 输出特征名（按列顺序，不含目标）
    pub fn output_names(&self) -> &[String] {
        &self.output_names
    }

    pub fn steps(&self) -> &[FeatureStep] {
        &self.steps
    }

    /// 计算特征表
    pub fn compute(&self, joined: &JoinedTable) -> MLResult<FeatureTable> {
        tracing::info!(
            "Feature engineering: {} rows, {} steps",
            joined.n_rows(),
            self.steps.len()
        );

        ensure_strictly_increasing(&joined.dates)?;

        let mut frame = Frame {
            columns: Vec::new(),
        };
        for name in RAW_INPUT_COLUMNS.iter().chain([TARGET_COLUMN].iter()) {
            let values = joined.column(name).ok_or_else(|| {
                MLError::FeatureComputation(format!("连接结果缺少列 `{}`", name))
            })?;
            frame.push(name, values.to_vec());
        }

        // 派生前的缺失值处理
        for name in RAW_INPUT_COLUMNS {
            if let Some(values) = frame.get_mut(name) {
                self.policy.raw.apply(values);
            }
        }
        if let Some(values) = frame.get_mut(TARGET_COLUMN) {
            self.policy.target.apply(values);
        }

        for step in &self.steps {
            step.apply(&joined.dates, &mut frame)?;
            tracing::debug!("Feature step {} done", step.name());
        }

        // 派生后的缺失值处理
        for step in &self.steps {
            let strategy = match step {
                FeatureStep::Rolling { .. } => self.policy.rolling,
                FeatureStep::Lags { .. } => self.policy.lag,
                _ => continue,
            };
            for name in step.outputs() {
                if let Some(values) = frame.get_mut(&name) {
                    strategy.apply(values);
                }
            }
        }

        let columns: Vec<&[Option<f64>]> = self
            .output_names
            .iter()
            .map(|n| frame.get(n))
            .collect::<MLResult<_>>()?;
        let target = frame.get(TARGET_COLUMN)?;

        let keep: Vec<usize> = (0..joined.n_rows())
            .filter(|&i| target[i].is_some() && columns.iter().all(|c| c[i].is_some()))
            .collect();

        let n_features = columns.len();
        let mut values = Array2::<f64>::zeros((keep.len(), n_features));
        for (r, &i) in keep.iter().enumerate() {
            for (j, column) in columns.iter().enumerate() {
                values[[r, j]] = column[i].unwrap_or_default();
            }
        }
        let target: Array1<f64> = keep.iter().map(|&i| target[i].unwrap_or_default()).collect();
        let dates: Vec<NaiveDate> = keep.iter().map(|&i| joined.dates[i]).collect();

        tracing::info!(
            "Feature engineering completed: kept {}/{} rows, {} features",
            keep.len(),
            joined.n_rows(),
            n_features
        );

        FeatureTable::new(dates, self.output_names.clone(), values, target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preprocessing::FillStrategy;
    use chrono::Duration;

    fn joined(n: usize) -> JoinedTable {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let dates: Vec<NaiveDate> = (0..n).map(|i| start + Duration::days(i as i64)).collect();
        let users: Vec<Option<f64>> = (0..n).map(|i| Some(50.0 + (i % 7) as f64 * 5.0)).collect();
        let sessions: Vec<Option<f64>> = users.iter().map(|u| u.map(|u| u * 1.3)).collect();
        let spend: Vec<Option<f64>> = (0..n).map(|i| Some(100.0 + i as f64)).collect();
        let fill: Vec<Option<f64>> = (0..n).map(|i| Some(40.0 + i as f64 * 0.5)).collect();
        JoinedTable {
            dates,
            columns: vec![
                ("user_count".to_string(), users),
                ("session_count".to_string(), sessions),
                ("total_ppc_spend".to_string(), spend),
                ("fill_rate".to_string(), fill),
            ],
        }
    }

    fn engine() -> FeatureEngine {
        FeatureEngine::new(&FeatureConfig::default(), MissingDataPolicy::default()).unwrap()
    }

    #[test]
    fn test_output_column_order() {
        let names = engine().output_names().to_vec();
        assert_eq!(names.len(), 35);
        assert_eq!(
            &names[..7],
            &[
                "user_count",
                "session_count",
                "total_ppc_spend",
                "weekday",
                "is_weekend",
                "ppc_per_user",
                "conversion_rate"
            ]
        );
        assert_eq!(names[7], "fill_rate_ma3");
        assert_eq!(names[10], "fill_rate_std3");
        assert_eq!(names[12], "ppc_std3");
        assert_eq!(names[25], "fill_rate_lag7");
        assert_eq!(&names[31..], &["weekday_sin", "weekday_cos", "month_sin", "month_cos"]);
        assert!(!names.iter().any(|n| n == "month" || n == "fill_rate"));
    }

    #[test]
    fn test_rows_with_missing_lags_dropped() {
        let table = engine().compute(&joined(30)).unwrap();
        // lag14 使前 14 行缺失
        assert_eq!(table.n_rows(), 16);
        assert_eq!(table.dates[0], NaiveDate::from_ymd_opt(2024, 1, 15).unwrap());
        assert_eq!(table.target.len(), 16);
    }

    #[test]
    fn test_lag_and_rolling_values() {
        let source = joined(30);
        let table = engine().compute(&source).unwrap();
        let fill = source.column("fill_rate").unwrap();

        let lag7 = table.column("fill_rate_lag7").unwrap();
        let ma3 = table.column("fill_rate_ma3").unwrap();
        for r in 0..table.n_rows() {
            let i = r + 14;
            assert_eq!(lag7[r], fill[i - 7].unwrap());
            let expected = (fill[i].unwrap() + fill[i - 1].unwrap() + fill[i - 2].unwrap()) / 3.0;
            assert!((ma3[r] - expected).abs() < 1e-12);
        }
    }

    #[test]
    fn test_cyclical_identity_and_calendar() {
        let table = engine().compute(&joined(30)).unwrap();
        for (s, c) in [("weekday_sin", "weekday_cos"), ("month_sin", "month_cos")] {
            let sin = table.column(s).unwrap();
            let cos = table.column(c).unwrap();
            for r in 0..table.n_rows() {
                assert!((sin[r].powi(2) + cos[r].powi(2) - 1.0).abs() < 1e-12);
            }
        }

        // 2024-01-15 是周一
        let weekday = table.column("weekday").unwrap();
        let weekend = table.column("is_weekend").unwrap();
        assert_eq!(weekday[0], 0.0);
        assert_eq!(weekday[5], 5.0);
        assert_eq!(weekend[5], 1.0);
        assert_eq!(weekend[4], 0.0);
    }

    #[test]
    fn test_zero_users_ratio_guard() {
        let mut source = joined(30);
        source.columns[0].1[20] = Some(0.0);
        let table = engine().compute(&source).unwrap();
        let r = table.dates.iter().position(|d| *d == source.dates[20]).unwrap();
        assert_eq!(table.column("ppc_per_user").unwrap()[r], 0.0);
        assert_eq!(table.column("conversion_rate").unwrap()[r], 0.0);
        assert!(table.values.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_missing_input_policy() {
        let mut source = joined(30);
        source.columns[2].1[20] = None;

        let dropped = engine().compute(&source).unwrap();
        assert!(!dropped.dates.contains(&source.dates[20]));

        let policy = MissingDataPolicy {
            raw: FillStrategy::ForwardFill,
            ..Default::default()
        };
        let filled = FeatureEngine::new(&FeatureConfig::default(), policy)
            .unwrap()
            .compute(&source)
            .unwrap();
        let r = filled.dates.iter().position(|d| *d == source.dates[20]).unwrap();
        assert_eq!(
            filled.column("total_ppc_spend").unwrap()[r],
            source.columns[2].1[19].unwrap()
        );
    }

    #[test]
    fn test_lag_zero_fill_keeps_rows() {
        let policy = MissingDataPolicy {
            lag: FillStrategy::ZeroFill,
            rolling: FillStrategy::ZeroFill,
            ..Default::default()
        };
        let table = FeatureEngine::new(&FeatureConfig::default(), policy)
            .unwrap()
            .compute(&joined(30))
            .unwrap();
        assert_eq!(table.n_rows(), 30);
        assert_eq!(table.column("fill_rate_lag14").unwrap()[0], 0.0);
    }

    #[test]
    fn test_unordered_dates_rejected() {
        let mut source = joined(10);
        source.dates.swap(3, 4);
        let err = engine().compute(&source).unwrap_err();
        assert!(matches!(err, MLError::FeatureComputation(_)));
    }

    #[test]
    fn test_step_reading_unproduced_column_rejected() {
        let steps = vec![FeatureStep::Cyclical, FeatureStep::Calendar];
        let err = FeatureEngine::with_steps(steps, MissingDataPolicy::default())
            .err()
            .unwrap();
        assert!(matches!(err, MLError::FeatureComputation(_)));
    }
}
