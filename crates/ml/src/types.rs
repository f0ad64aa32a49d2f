//! 核心类型定义

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type MLResult<T> = Result<T, MLError>;

#[derive(Debug, Error)]
pub enum MLError {
    #[error("数据加载失败: {0}")]
    Etl(#[from] etl::ETLError),

    #[error("特征计算错误: {0}")]
    FeatureComputation(String),

    #[error("数据预处理错误: {0}")]
    Preprocessing(String),

    #[error("特征选择错误: {0}")]
    Selection(String),

    #[error("模型训练错误: {0}")]
    Training(String),

    #[error("模型预测错误: {0}")]
    Prediction(String),

    #[error("数据维度不匹配 [{stage}]: expected {expected}, got {actual}")]
    DimensionMismatch {
        stage: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("数据量不足 [{stage}]: {reason}")]
    InsufficientData { stage: &'static str, reason: String },

    #[error("无效的配置: {0}")]
    InvalidConfig(String),

    #[error("模型持久化失败: {0}")]
    Persistence(String),

    #[error("序列化错误: {0}")]
    Serialization(String),

    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),
}

impl MLError {
    pub fn dimension(stage: &'static str, expected: usize, actual: usize) -> Self {
        MLError::DimensionMismatch {
            stage,
            expected,
            actual,
        }
    }

    pub fn insufficient(stage: &'static str, reason: impl Into<String>) -> Self {
        MLError::InsufficientData {
            stage,
            reason: reason.into(),
        }
    }

    /// 出错所在的处理阶段
    pub fn stage(&self) -> &'static str {
        match self {
            MLError::Etl(e) => e.stage(),
            MLError::FeatureComputation(_) => "FeatureEngineer",
            MLError::Preprocessing(_) => "Preprocessing",
            MLError::Selection(_) => "FeatureSelector",
            MLError::Training(_) | MLError::Prediction(_) => "ModelSearch",
            MLError::DimensionMismatch { stage, .. } | MLError::InsufficientData { stage, .. } => {
                stage
            }
            MLError::InvalidConfig(_) => "Config",
            MLError::Persistence(_) | MLError::Serialization(_) | MLError::Io(_) => {
                "ArtifactStore"
            }
        }
    }
}

/// 评估指标
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    /// 均方误差
    pub mse: f64,
    /// 均方根误差
    pub rmse: f64,
    /// 平均绝对误差
    pub mae: f64,
    /// R² 分数
    pub r2_score: f64,
}

impl Metrics {
    pub fn new(mse: f64, rmse: f64, mae: f64, r2_score: f64) -> Self {
        Self {
            mse,
            rmse,
            mae,
            r2_score,
        }
    }

    pub fn is_finite(&self) -> bool {
        self.mse.is_finite() && self.rmse.is_finite() && self.mae.is_finite() && self.r2_score.is_finite()
    }
}

/// 候选模型（封闭注册表，按注册顺序排列）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CandidateKind {
    LinearRegression,
    Ridge,
    ElasticNet,
    RandomForest,
    GradientBoosting,
}

impl CandidateKind {
    pub const ALL: [CandidateKind; 5] = [
        CandidateKind::LinearRegression,
        CandidateKind::Ridge,
        CandidateKind::ElasticNet,
        CandidateKind::RandomForest,
        CandidateKind::GradientBoosting,
    ];

    /// 按名称查找（大小写不敏感）
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|k| k.to_string().eq_ignore_ascii_case(name.trim()))
    }
}

impl std::fmt::Display for CandidateKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CandidateKind::LinearRegression => write!(f, "LinearRegression"),
            CandidateKind::Ridge => write!(f, "Ridge"),
            CandidateKind::ElasticNet => write!(f, "ElasticNet"),
            CandidateKind::RandomForest => write!(f, "RandomForest"),
            CandidateKind::GradientBoosting => write!(f, "GradientBoosting"),
        }
    }
}

/// 特征路径：单变量筛选或主成分投影
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FeaturePath {
    Selected,
    Projected,
}

impl FeaturePath {
    /// 持久化时使用的方法标签
    pub fn method_tag(&self) -> &'static str {
        match self {
            FeaturePath::Selected => "Selected",
            FeaturePath::Projected => "Pca",
        }
    }
}

impl std::fmt::Display for FeaturePath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.method_tag())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_candidate_registry_order() {
        assert_eq!(CandidateKind::ALL[0], CandidateKind::LinearRegression);
        assert_eq!(CandidateKind::ALL[4], CandidateKind::GradientBoosting);
        assert_eq!(
            CandidateKind::from_name("randomforest"),
            Some(CandidateKind::RandomForest)
        );
        assert_eq!(CandidateKind::from_name("xgboost"), None);
    }

    #[test]
    fn test_error_stage() {
        let err = MLError::from(etl::ETLError::schema("ppc", "缺少日期列"));
        assert_eq!(err.stage(), "TableJoiner");

        let err = MLError::FeatureComputation("日期未严格递增".to_string());
        assert_eq!(err.stage(), "FeatureEngineer");

        assert_eq!(MLError::Training("奇异矩阵".to_string()).stage(), "ModelSearch");
        assert_eq!(MLError::Persistence("rename".to_string()).stage(), "ArtifactStore");
    }

    #[test]
    fn test_shape_errors_keep_their_stage() {
        let err = MLError::insufficient("FeatureSelector", "样本数 2 少于 3");
        assert_eq!(err.stage(), "FeatureSelector");
        assert!(err.to_string().contains("[FeatureSelector]"));

        let err = MLError::dimension("Evaluator", 10, 8);
        assert_eq!(err.stage(), "Evaluator");
        assert!(matches!(
            err,
            MLError::DimensionMismatch { expected: 10, actual: 8, .. }
        ));
    }
}
