//! 模型评估模块

use crate::config::LeakageMode;
use crate::search::{CandidateFailure, SearchResult};
use crate::types::{CandidateKind, FeaturePath, MLError, MLResult, Metrics};
use ndarray::Array1;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// 模型评估器
pub struct Evaluator;

impl Evaluator {
    fn check(y_true: &Array1<f64>, y_pred: &Array1<f64>) -> MLResult<()> {
        if y_true.len() != y_pred.len() {
            return Err(MLError::dimension("Evaluator", y_true.len(), y_pred.len()));
        }
        if y_true.is_empty() {
            return Err(MLError::insufficient("Evaluator", "评估数据为空"));
        }
        Ok(())
    }

    /// 计算评估指标
    pub fn evaluate(y_true: &Array1<f64>, y_pred: &Array1<f64>) -> MLResult<Metrics> {
        let mse = Self::mean_squared_error(y_true, y_pred)?;
        let rmse = mse.sqrt();
        let mae = Self::mean_absolute_error(y_true, y_pred)?;
        let r2 = Self::r2_score(y_true, y_pred)?;

        Ok(Metrics::new(mse, rmse, mae, r2))
    }

    /// 均方误差 (MSE)
    pub fn mean_squared_error(y_true: &Array1<f64>, y_pred: &Array1<f64>) -> MLResult<f64> {
        Self::check(y_true, y_pred)?;
        let diff = y_true - y_pred;
        Ok(diff.mapv(|x| x * x).mean().unwrap_or(0.0))
    }

    /// 平均绝对误差 (MAE)
    pub fn mean_absolute_error(y_true: &Array1<f64>, y_pred: &Array1<f64>) -> MLResult<f64> {
        Self::check(y_true, y_pred)?;
        let diff = y_true - y_pred;
        Ok(diff.mapv(|x| x.abs()).mean().unwrap_or(0.0))
    }

    /// R² 分数，真实值为常数时返回 0
    pub fn r2_score(y_true: &Array1<f64>, y_pred: &Array1<f64>) -> MLResult<f64> {
        Self::check(y_true, y_pred)?;
        let y_mean = y_true.mean().unwrap_or(0.0);

        let ss_res: f64 = (y_true - y_pred).mapv(|x| x * x).sum();
        let ss_tot: f64 = y_true.mapv(|x| (x - y_mean).powi(2)).sum();

        if ss_tot == 0.0 {
            return Ok(0.0);
        }

        Ok(1.0 - (ss_res / ss_tot))
    }

    /// 残差（真实值 - 预测值）的均值和标准差
    pub fn residual_summary(y_true: &Array1<f64>, y_pred: &Array1<f64>) -> MLResult<ResidualSummary> {
        Self::check(y_true, y_pred)?;
        let residuals = y_true - y_pred;
        let mean = residuals.mean().unwrap_or(0.0);
        let std = residuals.std(0.0);
        let max_abs = residuals.iter().fold(0.0_f64, |m, r| m.max(r.abs()));
        Ok(ResidualSummary { mean, std, max_abs })
    }

    /// 按测试集 RMSE 升序稳定排序
    ///
    /// 输入顺序即注册顺序：先单变量筛选路径，再 PCA 路径，各自按候选注册顺序。
    pub fn rank(mut results: Vec<SearchResult>) -> Vec<SearchResult> {
        results.sort_by(|a, b| a.metrics.rmse.total_cmp(&b.metrics.rmse));
        results
    }
}

/// 残差统计
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResidualSummary {
    pub mean: f64,
    pub std: f64,
    pub max_abs: f64,
}

/// 报告中的一行
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportEntry {
    pub rank: usize,
    pub candidate: CandidateKind,
    pub path: FeaturePath,
    pub metrics: Metrics,
    pub cv_score: f64,
    pub best_params: String,
}

impl ReportEntry {
    pub fn from_result(rank: usize, result: &SearchResult) -> Self {
        Self {
            rank,
            candidate: result.candidate,
            path: result.path,
            metrics: result.metrics,
            cv_score: result.cv_score,
            best_params: result.best_params.to_string(),
        }
    }
}

/// 一次运行的汇总报告
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub property: String,
    pub run_type: String,
    pub leakage_mode: LeakageMode,
    pub n_train: usize,
    pub n_test: usize,
    /// 单变量筛选保留的特征
    pub selected_features: Vec<String>,
    /// PCA 保留的成分数
    pub pca_components: usize,
    /// 按 RMSE 排序后的结果
    pub entries: Vec<ReportEntry>,
    pub failures: Vec<CandidateFailure>,
    pub selected: ReportEntry,
    pub residuals: ResidualSummary,
}

impl RunReport {
    /// 打印报告
    pub fn print_report(&self) {
        println!("========== 入住率模型报告 ==========");
        println!("酒店: {} ({})", self.property, self.run_type);
        println!("训练样本: {}, 测试样本: {}", self.n_train, self.n_test);
        println!("选中特征 ({}): {}", self.selected_features.len(), self.selected_features.join(", "));
        println!("PCA 成分数: {}", self.pca_components);

        for path in [FeaturePath::Selected, FeaturePath::Projected] {
            println!("\n--- {} ---", path);
            for entry in self.entries.iter().filter(|e| e.path == path) {
                println!("{}:", entry.candidate);
                println!("  RMSE: {:.3}", entry.metrics.rmse);
                println!("  R2: {:.3}", entry.metrics.r2_score);
                println!("  MAE: {:.3}", entry.metrics.mae);
                println!("  最佳参数: {}", entry.best_params);
            }
        }

        if !self.failures.is_empty() {
            println!("\n--- 排除的模型 ---");
            for failure in &self.failures {
                println!("{}", failure);
            }
        }

        println!(
            "\n残差: 均值 {:.4}, 标准差 {:.4}, 最大绝对值 {:.4}",
            self.residuals.mean, self.residuals.std, self.residuals.max_abs
        );
        println!(
            "选中模型: {} ({}) RMSE {:.3}, R2 {:.3}, MAE {:.3}",
            self.selected.candidate,
            self.selected.path,
            self.selected.metrics.rmse,
            self.selected.metrics.r2_score,
            self.selected.metrics.mae
        );
        println!("====================================");
    }

    pub fn to_json(&self) -> MLResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| MLError::Serialization(e.to_string()))
    }

    /// 写出 JSON 报告
    pub fn save_json(&self, path: impl AsRef<Path>) -> MLResult<()> {
        std::fs::write(path.as_ref(), self.to_json()?)?;
        Ok(())
    }
}
