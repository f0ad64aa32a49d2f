//! 特征选择
//!
//! 两条互相竞争的路径：按 F 统计量挑选前 K 个特征，或投影到主成分上。
//! 两者都只在训练集上拟合。

use crate::types::{MLError, MLResult};
use nalgebra::{DMatrix, SymmetricEigen};
use ndarray::{Array1, Array2, ArrayView1, Axis};
use serde::{Deserialize, Serialize};

/// 单变量 F 检验: `F = r² / (1 - r²) * (n - 2)`
///
/// 常数特征得分为 0；完全相关时得分为正无穷。
pub fn f_regression(x: &Array2<f64>, y: &Array1<f64>) -> MLResult<Vec<f64>> {
    if x.nrows() != y.len() {
        return Err(MLError::dimension("FeatureSelector", x.nrows(), y.len()));
    }
    let n = x.nrows();
    if n < 3 {
        return Err(MLError::insufficient(
            "FeatureSelector",
            format!("F 检验至少需要 3 行，实际为 {}", n),
        ));
    }

    let y_mean = y.sum() / n as f64;
    let yc: Array1<f64> = y.mapv(|v| v - y_mean);
    let y_ss = yc.dot(&yc);

    let scores = x
        .axis_iter(Axis(1))
        .map(|col| {
            let x_mean = col.sum() / n as f64;
            let xc: Array1<f64> = col.mapv(|v| v - x_mean);
            let x_ss = xc.dot(&xc);
            let denom = (x_ss * y_ss).sqrt();
            if denom < 1e-12 {
                return 0.0;
            }
            let r = xc.dot(&yc) / denom;
            let r2 = (r * r).min(1.0);
            if r2 >= 1.0 {
                f64::INFINITY
            } else {
                r2 / (1.0 - r2) * (n as f64 - 2.0)
            }
        })
        .collect();

    Ok(scores)
}

/// 按 F 统计量选择前 K 个特征
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectKBest {
    /// 各列得分（与输入列一一对应）
    pub scores: Vec<f64>,
    /// 保留的列下标，按原始顺序
    pub indices: Vec<usize>,
    /// 保留的列名，按原始顺序
    pub names: Vec<String>,
}

impl SelectKBest {
    /// 拟合；同分时保留靠前的列，特征不足 K 个时全部保留
    pub fn fit(x: &Array2<f64>, y: &Array1<f64>, names: &[String], k: usize) -> MLResult<Self> {
        if names.len() != x.ncols() {
            return Err(MLError::dimension("FeatureSelector", x.ncols(), names.len()));
        }

        let scores = f_regression(x, y)?;

        let mut order: Vec<usize> = (0..scores.len()).collect();
        order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));
        let mut indices: Vec<usize> = order.into_iter().take(k).collect();
        indices.sort_unstable();

        let names: Vec<String> = indices.iter().map(|&i| names[i].clone()).collect();

        tracing::info!("SelectKBest kept {} of {} features: {:?}", names.len(), scores.len(), names);

        Ok(Self {
            scores,
            indices,
            names,
        })
    }

    pub fn transform(&self, x: &Array2<f64>) -> MLResult<Array2<f64>> {
        if x.ncols() != self.scores.len() {
            return Err(MLError::dimension("FeatureSelector", self.scores.len(), x.ncols()));
        }
        Ok(x.select(Axis(1), &self.indices))
    }
}

/// 主成分分析
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pca {
    /// 训练集均值
    pub mean: Array1<f64>,
    /// 主成分 (n_components × n_features)，每行一个成分
    pub components: Array2<f64>,
    pub explained_variance: Array1<f64>,
    pub explained_variance_ratio: Array1<f64>,
}

impl Pca {
    /// 拟合并保留累计解释方差比首次超过 `threshold` 的最少成分数
    pub fn fit(x: &Array2<f64>, threshold: f64) -> MLResult<Self> {
        let (n, d) = x.dim();
        if n < 2 || d == 0 {
            return Err(MLError::insufficient(
                "FeatureSelector",
                format!(
                    "PCA 至少需要 2 行 1 列，实际为 {} × {}",
                    n, d
                ),
            ));
        }

        let mean = x
            .mean_axis(Axis(0))
            .ok_or_else(|| MLError::Selection("无法计算均值".to_string()))?;
        let centered = x - &mean;
        let cov = centered.t().dot(&centered) / (n as f64 - 1.0);

        let matrix = DMatrix::from_fn(d, d, |i, j| cov[[i, j]]);
        let eigen = SymmetricEigen::new(matrix);

        let mut order: Vec<usize> = (0..d).collect();
        order.sort_by(|&a, &b| eigen.eigenvalues[b].total_cmp(&eigen.eigenvalues[a]));

        let variances: Vec<f64> = order.iter().map(|&i| eigen.eigenvalues[i].max(0.0)).collect();
        let total: f64 = variances.iter().sum();
        if !(total > 0.0) || !total.is_finite() {
            return Err(MLError::Selection("特征总方差为 0，无法做 PCA".to_string()));
        }

        let mut n_components = d;
        let mut cumulative = 0.0;
        for (i, v) in variances.iter().enumerate() {
            cumulative += v / total;
            if cumulative > threshold {
                n_components = i + 1;
                break;
            }
        }

        let mut components = Array2::<f64>::zeros((n_components, d));
        for (c, &i) in order.iter().take(n_components).enumerate() {
            let vector = eigen.eigenvectors.column(i);
            // 绝对值最大的载荷取正号
            let mut pivot = 0;
            for j in 1..d {
                if vector[j].abs() > vector[pivot].abs() {
                    pivot = j;
                }
            }
            let sign = if vector[pivot] < 0.0 { -1.0 } else { 1.0 };
            for j in 0..d {
                components[[c, j]] = sign * vector[j];
            }
        }

        let explained_variance = Array1::from(variances[..n_components].to_vec());
        let explained_variance_ratio = explained_variance.mapv(|v| v / total);

        tracing::info!(
            "PCA kept {} of {} components ({:.2}% variance)",
            n_components,
            d,
            explained_variance_ratio.sum() * 100.0
        );

        Ok(Self {
            mean,
            components,
            explained_variance,
            explained_variance_ratio,
        })
    }

    pub fn n_components(&self) -> usize {
        self.components.nrows()
    }

    /// 投影到主成分上
    pub fn transform(&self, x: &Array2<f64>) -> MLResult<Array2<f64>> {
        if x.ncols() != self.mean.len() {
            return Err(MLError::dimension("FeatureSelector", self.mean.len(), x.ncols()));
        }

        let mut projected = Array2::<f64>::zeros((x.nrows(), self.n_components()));
        for (i, row) in x.axis_iter(Axis(0)).enumerate() {
            let centered = &row - &self.mean;
            for (c, component) in self.components.axis_iter(Axis(0)).enumerate() {
                projected[[i, c]] = dot(centered.view(), component);
            }
        }
        Ok(projected)
    }
}

/// 逐元素顺序求和的点积，保证同一行在任何批次中结果一致
pub(crate) fn dot(a: ArrayView1<'_, f64>, b: ArrayView1<'_, f64>) -> f64 {
    a.iter().zip(b.iter()).fold(0.0, |acc, (x, y)| acc + x * y)
}
