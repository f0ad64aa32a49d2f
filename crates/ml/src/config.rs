//! 管道配置
//!
//! 所有阶段的可调参数集中在 [`PipelineConfig`]，支持 TOML / JSON 文件，
//! 命令行参数在加载后覆盖文件中的值。

use crate::preprocessing::MissingDataPolicy;
use crate::types::{CandidateKind, MLError, MLResult};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// 标准化、增强与切分的先后顺序
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LeakageMode {
    /// 先增强、在全部行上拟合标准化，再切分（保留历史行为，测试集信息会泄漏）
    Legacy,
    /// 先切分，只增强训练集，标准化只在训练集上拟合
    Strict,
}

impl Default for LeakageMode {
    fn default() -> Self {
        LeakageMode::Legacy
    }
}

/// 特征工程参数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    /// 滚动窗口（天）
    pub rolling_windows: Vec<usize>,
    /// 滞后步数（行）
    pub lags: Vec<usize>,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            rolling_windows: vec![3, 7, 14],
            lags: vec![7, 14],
        }
    }
}

/// 噪声增强参数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AugmentConfig {
    pub enabled: bool,
    /// 高斯噪声标准差
    pub noise_std: f64,
}

impl Default for AugmentConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            noise_std: 0.1,
        }
    }
}

/// 特征选择参数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectionConfig {
    /// 单变量筛选保留的特征数
    pub k_best: usize,
    /// PCA 累计解释方差阈值
    pub variance_threshold: f64,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            k_best: 20,
            variance_threshold: 0.95,
        }
    }
}

/// 模型搜索参数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// 时间序列交叉验证折数
    pub cv_folds: usize,
    /// 参与搜索的候选模型（按注册顺序运行）
    pub candidates: Vec<CandidateKind>,
    /// 是否用 rayon 并行执行 (参数组合 × 折) 任务
    pub parallel: bool,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            cv_folds: 5,
            candidates: CandidateKind::ALL.to_vec(),
            parallel: true,
        }
    }
}

/// 管道配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// 酒店标识，用于模型文件名
    pub property: String,
    /// 运行类型，用于模型文件名
    pub run_type: String,
    /// 随机种子
    pub random_seed: u64,
    /// 测试集比例（按时间顺序取最后一段）
    pub test_ratio: f64,
    /// 模型文件输出目录
    pub artifact_dir: PathBuf,
    pub leakage_mode: LeakageMode,
    pub features: FeatureConfig,
    pub missing: MissingDataPolicy,
    pub augment: AugmentConfig,
    pub selection: SelectionConfig,
    pub search: SearchConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            property: "hotel_2".to_string(),
            run_type: "daily".to_string(),
            random_seed: 42,
            test_ratio: 0.2,
            artifact_dir: PathBuf::from("models"),
            leakage_mode: LeakageMode::default(),
            features: FeatureConfig::default(),
            missing: MissingDataPolicy::default(),
            augment: AugmentConfig::default(),
            selection: SelectionConfig::default(),
            search: SearchConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// 从 TOML 文件加载
    pub fn from_toml(path: impl AsRef<Path>) -> MLResult<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config: PipelineConfig = toml::from_str(&content)
            .map_err(|e| MLError::InvalidConfig(format!("TOML 解析失败: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// 保存为 TOML 文件
    pub fn save_toml(&self, path: impl AsRef<Path>) -> MLResult<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| MLError::Serialization(e.to_string()))?;
        std::fs::write(path.as_ref(), content)?;
        Ok(())
    }

    /// 从 JSON 文件加载
    pub fn from_json(path: impl AsRef<Path>) -> MLResult<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config: PipelineConfig = serde_json::from_str(&content)
            .map_err(|e| MLError::InvalidConfig(format!("JSON 解析失败: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// 按扩展名选择格式加载
    pub fn load(path: impl AsRef<Path>) -> MLResult<Self> {
        let path = path.as_ref();
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json(path),
            _ => Self::from_toml(path),
        }
    }

    /// 校验配置
    pub fn validate(&self) -> MLResult<()> {
        if self.property.trim().is_empty() || self.run_type.trim().is_empty() {
            return Err(MLError::InvalidConfig(
                "property 和 run_type 不能为空".to_string(),
            ));
        }
        if !(self.test_ratio > 0.0 && self.test_ratio < 1.0) {
            return Err(MLError::InvalidConfig(format!(
                "test_ratio 必须在 (0, 1) 之间，实际为 {}",
                self.test_ratio
            )));
        }
        if self.features.rolling_windows.is_empty()
            || self.features.rolling_windows.contains(&0)
        {
            return Err(MLError::InvalidConfig(
                "rolling_windows 必须非空且均大于 0".to_string(),
            ));
        }
        if self.features.lags.contains(&0) {
            return Err(MLError::InvalidConfig("lags 必须大于 0".to_string()));
        }
        if !self.augment.noise_std.is_finite() || self.augment.noise_std < 0.0 {
            return Err(MLError::InvalidConfig(format!(
                "noise_std 必须为非负有限数，实际为 {}",
                self.augment.noise_std
            )));
        }
        if self.selection.k_best == 0 {
            return Err(MLError::InvalidConfig("k_best 必须大于 0".to_string()));
        }
        if !(self.selection.variance_threshold > 0.0 && self.selection.variance_threshold <= 1.0) {
            return Err(MLError::InvalidConfig(format!(
                "variance_threshold 必须在 (0, 1] 之间，实际为 {}",
                self.selection.variance_threshold
            )));
        }
        if self.search.cv_folds < 2 {
            return Err(MLError::InvalidConfig("cv_folds 至少为 2".to_string()));
        }
        if self.search.candidates.is_empty() {
            return Err(MLError::InvalidConfig("candidates 不能为空".to_string()));
        }
        let unique: HashSet<_> = self.search.candidates.iter().collect();
        if unique.len() != self.search.candidates.len() {
            return Err(MLError::InvalidConfig("candidates 存在重复项".to_string()));
        }
        Ok(())
    }

    /// 按注册顺序排列的候选模型
    pub fn ordered_candidates(&self) -> Vec<CandidateKind> {
        CandidateKind::ALL
            .iter()
            .copied()
            .filter(|k| self.search.candidates.contains(k))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preprocessing::FillStrategy;

    #[test]
    fn test_config_default() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.random_seed, 42);
        assert_eq!(config.search.candidates.len(), 5);
        assert_eq!(config.leakage_mode, LeakageMode::Legacy);
    }

    #[test]
    fn test_config_toml_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.toml");

        let mut config = PipelineConfig::default();
        config.leakage_mode = LeakageMode::Strict;
        config.missing.lag = FillStrategy::ZeroFill;
        config.search.candidates = vec![CandidateKind::Ridge];
        config.save_toml(&path).unwrap();

        let loaded = PipelineConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_config_partial_toml_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.toml");
        std::fs::write(
            &path,
            "property = \"hotel_3\"\n[search]\ncandidates = [\"LinearRegression\"]\n",
        )
        .unwrap();

        let config = PipelineConfig::from_toml(&path).unwrap();
        assert_eq!(config.property, "hotel_3");
        assert_eq!(config.search.cv_folds, 5);
        assert_eq!(config.features.lags, vec![7, 14]);
    }

    #[test]
    fn test_config_validation() {
        let mut config = PipelineConfig::default();
        config.test_ratio = 1.0;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.search.candidates = vec![CandidateKind::Ridge, CandidateKind::Ridge];
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.features.rolling_windows = vec![0];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_ordered_candidates_follow_registry() {
        let mut config = PipelineConfig::default();
        config.search.candidates = vec![CandidateKind::GradientBoosting, CandidateKind::LinearRegression];
        assert_eq!(
            config.ordered_candidates(),
            vec![CandidateKind::LinearRegression, CandidateKind::GradientBoosting]
        );
    }
}
