//! 时间序列数据处理模块
//!
//! 滚动窗口、滞后、按时间顺序的切分以及扩展窗口交叉验证。
//! 序列中的 `None` 表示缺失值。

use crate::types::{MLError, MLResult};
use chrono::NaiveDate;
use std::ops::Range;

/// 尾随窗口内的可用值（跳过缺失）
fn trailing_window(values: &[Option<f64>], i: usize, window: usize) -> Vec<f64> {
    let start = (i + 1).saturating_sub(window);
    values[start..=i].iter().filter_map(|v| *v).collect()
}

/// 滚动均值，min_periods = 1
pub fn rolling_mean(values: &[Option<f64>], window: usize) -> Vec<Option<f64>> {
    (0..values.len())
        .map(|i| {
            let w = trailing_window(values, i, window);
            if w.is_empty() {
                None
            } else {
                Some(w.iter().sum::<f64>() / w.len() as f64)
            }
        })
        .collect()
}

/// 滚动样本标准差 (ddof = 1)，可用值少于两个时缺失
pub fn rolling_std(values: &[Option<f64>], window: usize) -> Vec<Option<f64>> {
    (0..values.len())
        .map(|i| {
            let w = trailing_window(values, i, window);
            if w.len() < 2 {
                return None;
            }
            let mean = w.iter().sum::<f64>() / w.len() as f64;
            let variance = w.iter().map(|&x| (x - mean).powi(2)).sum::<f64>() / (w.len() - 1) as f64;
            Some(variance.sqrt())
        })
        .collect()
}

/// 按行位移的滞后：`lag[i] = values[i - k]`，前 k 行缺失
pub fn lag(values: &[Option<f64>], k: usize) -> Vec<Option<f64>> {
    (0..values.len())
        .map(|i| if i >= k { values[i - k] } else { None })
        .collect()
}

/// 日期必须严格递增
pub fn ensure_strictly_increasing(dates: &[NaiveDate]) -> MLResult<()> {
    for pair in dates.windows(2) {
        if pair[1] <= pair[0] {
            return Err(MLError::FeatureComputation(format!(
                "日期索引未严格递增: {} 之后出现 {}",
                pair[0], pair[1]
            )));
        }
    }
    Ok(())
}

/// 时间序列数据分割器
pub struct TimeSeriesSplitter;

impl TimeSeriesSplitter {
    /// 按时间顺序切分为训练集和测试集（不打乱）
    ///
    /// 测试集为最后 `ceil(test_ratio * n)` 行。
    pub fn train_test_split(n: usize, test_ratio: f64) -> MLResult<(Range<usize>, Range<usize>)> {
        if !(test_ratio > 0.0 && test_ratio < 1.0) {
            return Err(MLError::InvalidConfig(format!(
                "无效的测试集比例: {}",
                test_ratio
            )));
        }

        let n_test = (test_ratio * n as f64).ceil() as usize;
        if n_test == 0 || n_test >= n {
            return Err(MLError::insufficient(
                "Evaluator",
                format!(
                    "{} 行数据无法按比例 {} 切分出非空的训练集和测试集",
                    n, test_ratio
                ),
            ));
        }

        let n_train = n - n_test;
        Ok((0..n_train, n_train..n))
    }
}

/// 交叉验证中的一折
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fold {
    pub train: Range<usize>,
    pub validation: Range<usize>,
}

/// 扩展窗口的时间序列交叉验证
#[derive(Debug, Clone, Copy)]
pub struct TimeSeriesSplit {
    n_splits: usize,
}

impl TimeSeriesSplit {
    pub fn new(n_splits: usize) -> Self {
        Self { n_splits }
    }

    pub fn n_splits(&self) -> usize {
        self.n_splits
    }

    /// 生成各折的索引范围
    ///
    /// `test_size = n / (K + 1)`，第 i 折在 `[0, n - (K - i) * test_size)` 上训练，
    /// 在其后的 `test_size` 行上验证。
    pub fn folds(&self, n: usize) -> MLResult<Vec<Fold>> {
        let k = self.n_splits;
        if k < 2 {
            return Err(MLError::InvalidConfig(format!("折数至少为 2，实际为 {}", k)));
        }

        let test_size = n / (k + 1);
        if test_size == 0 {
            return Err(MLError::insufficient(
                "ModelSearch",
                format!(
                    "{} 行训练数据不足以做 {} 折时间序列交叉验证，至少需要 {} 行",
                    n,
                    k,
                    k + 1
                ),
            ));
        }

        Ok((0..k)
            .map(|i| {
                let train_end = n - (k - i) * test_size;
                Fold {
                    train: 0..train_end,
                    validation: train_end..train_end + test_size,
                }
            })
            .collect())
    }
}
