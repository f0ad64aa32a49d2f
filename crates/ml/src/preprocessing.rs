//! 数据预处理模块
//!
//! 缺失值策略、噪声增强和标准化。

use crate::features::{is_cyclical, FeatureTable, CATEGORICAL_COLUMNS};
use crate::types::{MLError, MLResult};
use ndarray::{Array1, Array2, Axis};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

/// 缺失值填补方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FillStrategy {
    /// 保持缺失，最终整行丢弃
    Drop,
    /// 以 0 填补
    ZeroFill,
    /// 以前一个可用值填补，开头的缺失保持缺失
    ForwardFill,
}

impl Default for FillStrategy {
    fn default() -> Self {
        FillStrategy::Drop
    }
}

impl FillStrategy {
    pub fn apply(&self, values: &mut [Option<f64>]) {
        match self {
            FillStrategy::Drop => {}
            FillStrategy::ZeroFill => {
                for v in values.iter_mut().filter(|v| v.is_none()) {
                    *v = Some(0.0);
                }
            }
            FillStrategy::ForwardFill => {
                let mut last = None;
                for v in values.iter_mut() {
                    match v {
                        Some(x) => last = Some(*x),
                        None => *v = last,
                    }
                }
            }
        }
    }
}

/// 按特征类别的缺失值策略
///
/// `raw` 和 `target` 在派生前生效，`rolling` 和 `lag` 在派生后生效。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MissingDataPolicy {
    pub raw: FillStrategy,
    pub target: FillStrategy,
    pub rolling: FillStrategy,
    pub lag: FillStrategy,
}

/// 标准化参数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalerParams {
    pub names: Vec<String>,
    pub mean: Array1<f64>,
    pub std: Array1<f64>,
    /// 该列是否参与标准化
    pub scaled: Vec<bool>,
}

impl ScalerParams {
    fn scale(&self, j: usize) -> f64 {
        if self.std[j].abs() < 1e-10 {
            1.0
        } else {
            self.std[j]
        }
    }

    /// 标准化数据
    pub fn transform(&self, data: &Array2<f64>) -> MLResult<Array2<f64>> {
        if data.ncols() != self.mean.len() {
            return Err(MLError::dimension("Preprocessing", self.mean.len(), data.ncols()));
        }

        let mut normalized = data.clone();
        for mut row in normalized.axis_iter_mut(Axis(0)) {
            for (j, val) in row.iter_mut().enumerate() {
                if self.scaled[j] {
                    *val = (*val - self.mean[j]) / self.scale(j);
                }
            }
        }

        Ok(normalized)
    }

    /// 标准化特征表（列名必须一致）
    pub fn transform_table(&self, table: &FeatureTable) -> MLResult<FeatureTable> {
        if table.names != self.names {
            return Err(MLError::Preprocessing(
                "特征列与标准化参数不一致".to_string(),
            ));
        }
        Ok(FeatureTable {
            dates: table.dates.clone(),
            names: table.names.clone(),
            values: self.transform(&table.values)?,
            target: table.target.clone(),
        })
    }
}

/// 标准化器：总体均值和总体标准差 (ddof = 0)
pub struct Normalizer;

impl Normalizer {
    /// 在特征表上拟合，`weekday` / `is_weekend` 不参与
    pub fn fit(table: &FeatureTable) -> MLResult<ScalerParams> {
        let data = &table.values;
        if data.is_empty() {
            return Err(MLError::Preprocessing("数据为空".to_string()));
        }

        let mean = data
            .mean_axis(Axis(0))
            .ok_or_else(|| MLError::Preprocessing("无法计算均值".to_string()))?;
        let std = data.std_axis(Axis(0), 0.0);
        let scaled: Vec<bool> = table
            .names
            .iter()
            .map(|n| !CATEGORICAL_COLUMNS.contains(&n.as_str()))
            .collect();

        tracing::info!(
            "Normalizer fitted on {} rows: {}/{} columns scaled",
            data.nrows(),
            scaled.iter().filter(|s| **s).count(),
            scaled.len()
        );

        Ok(ScalerParams {
            names: table.names.clone(),
            mean,
            std,
            scaled,
        })
    }

    /// 拟合并转换
    pub fn fit_transform(table: &FeatureTable) -> MLResult<(ScalerParams, FeatureTable)> {
        let params = Self::fit(table)?;
        let transformed = params.transform_table(table)?;
        Ok((params, transformed))
    }
}

/// 高斯噪声增强
pub struct Augmenter {
    noise_std: f64,
    seed: u64,
}

impl Augmenter {
    pub fn new(noise_std: f64, seed: u64) -> Self {
        Self { noise_std, seed }
    }

    /// 每行后面追加一行加噪副本，行数翻倍
    ///
    /// 只对连续特征加噪；类别列、周期编码列、日期和目标保持不变。
    pub fn augment(&self, table: &FeatureTable) -> MLResult<FeatureTable> {
        let normal = Normal::new(0.0, self.noise_std)
            .map_err(|e| MLError::Preprocessing(format!("无效的噪声参数: {}", e)))?;
        let mut rng = StdRng::seed_from_u64(self.seed);

        let noisy: Vec<bool> = table
            .names
            .iter()
            .map(|n| !CATEGORICAL_COLUMNS.contains(&n.as_str()) && !is_cyclical(n))
            .collect();

        let n = table.n_rows();
        let mut values = Array2::<f64>::zeros((n * 2, table.n_features()));
        let mut target = Array1::<f64>::zeros(n * 2);
        let mut dates = Vec::with_capacity(n * 2);

        for (i, row) in table.values.axis_iter(Axis(0)).enumerate() {
            values.row_mut(2 * i).assign(&row);
            for (j, &v) in row.iter().enumerate() {
                values[[2 * i + 1, j]] = if noisy[j] { v + normal.sample(&mut rng) } else { v };
            }
            target[2 * i] = table.target[i];
            target[2 * i + 1] = table.target[i];
            dates.push(table.dates[i]);
            dates.push(table.dates[i]);
        }

        tracing::info!("Augmented {} rows to {} rows (sigma = {})", n, n * 2, self.noise_std);

        FeatureTable::new(dates, table.names.clone(), values, target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use ndarray::array;

    fn table() -> FeatureTable {
        let d = |day| NaiveDate::from_ymd_opt(2024, 4, day).unwrap();
        FeatureTable::new(
            vec![d(1), d(2), d(3)],
            vec![
                "user_count".to_string(),
                "weekday".to_string(),
                "weekday_sin".to_string(),
                "flat".to_string(),
            ],
            array![[1.0, 0.0, 0.0, 7.0], [3.0, 1.0, 0.78, 7.0], [5.0, 2.0, 0.97, 7.0]],
            array![40.0, 50.0, 60.0],
        )
        .unwrap()
    }

    #[test]
    fn test_fill_strategies() {
        let mut v = vec![None, Some(1.0), None, Some(3.0), None];
        FillStrategy::ForwardFill.apply(&mut v);
        assert_eq!(v, vec![None, Some(1.0), Some(1.0), Some(3.0), Some(3.0)]);

        let mut v = vec![None, Some(2.0)];
        FillStrategy::ZeroFill.apply(&mut v);
        assert_eq!(v, vec![Some(0.0), Some(2.0)]);

        let mut v = vec![None, Some(2.0)];
        FillStrategy::Drop.apply(&mut v);
        assert_eq!(v, vec![None, Some(2.0)]);
    }

    #[test]
    fn test_normalizer_skips_categorical_and_constant() {
        let (params, scaled) = Normalizer::fit_transform(&table()).unwrap();
        assert_eq!(params.scaled, vec![true, false, true, true]);

        let users = scaled.column("user_count").unwrap();
        assert!(users.sum().abs() < 1e-10);
        // 总体标准差: sqrt(8/3)
        assert!((users[2] - 2.0 / (8.0_f64 / 3.0).sqrt()).abs() < 1e-12);

        assert_eq!(scaled.column("weekday").unwrap().to_vec(), vec![0.0, 1.0, 2.0]);
        // 常数列按 1 缩放
        assert_eq!(scaled.column("flat").unwrap().to_vec(), vec![0.0, 0.0, 0.0]);
        assert_eq!(scaled.target, table().target);
    }

    #[test]
    fn test_augment_interleaves_and_keeps_fixed_columns() {
        let source = table();
        let augmented = Augmenter::new(0.1, 42).augment(&source).unwrap();

        assert_eq!(augmented.n_rows(), 6);
        for i in 0..3 {
            assert_eq!(augmented.values.row(2 * i), source.values.row(i));
            assert_eq!(augmented.dates[2 * i + 1], source.dates[i]);
            assert_eq!(augmented.target[2 * i + 1], source.target[i]);
            // weekday 和 sin 编码不加噪
            assert_eq!(augmented.values[[2 * i + 1, 1]], source.values[[i, 1]]);
            assert_eq!(augmented.values[[2 * i + 1, 2]], source.values[[i, 2]]);
            assert_ne!(augmented.values[[2 * i + 1, 0]], source.values[[i, 0]]);
        }
    }

    #[test]
    fn test_augment_is_seeded() {
        let a = Augmenter::new(0.1, 7).augment(&table()).unwrap();
        let b = Augmenter::new(0.1, 7).augment(&table()).unwrap();
        let c = Augmenter::new(0.1, 8).augment(&table()).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_transform_dimension_mismatch() {
        let params = Normalizer::fit(&table()).unwrap();
        let err = params.transform(&Array2::zeros((2, 3))).unwrap_err();
        assert!(matches!(err, MLError::DimensionMismatch { expected: 4, actual: 3, .. }));
        assert_eq!(err.stage(), "Preprocessing");
    }
}
