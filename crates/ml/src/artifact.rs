//! 模型持久化
//!
//! 产物包含估计器、标准化参数、特征路径描述和方法标签，
//! 加载后可直接对原始特征做完整的推理变换。

use crate::models::{Estimator, Model};
use crate::preprocessing::ScalerParams;
use crate::search::ParamSet;
use crate::selection::{Pca, SelectKBest};
use crate::types::{CandidateKind, FeaturePath, MLError, MLResult, Metrics};
use chrono::{DateTime, Utc};
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

/// 特征路径描述
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FeaturePathDescriptor {
    /// 按列名保留的特征
    Selected { names: Vec<String>, indices: Vec<usize> },
    /// 主成分投影
    Projected { pca: Pca },
}

impl FeaturePathDescriptor {
    pub fn selected(selector: &SelectKBest) -> Self {
        FeaturePathDescriptor::Selected {
            names: selector.names.clone(),
            indices: selector.indices.clone(),
        }
    }

    pub fn path(&self) -> FeaturePath {
        match self {
            FeaturePathDescriptor::Selected { .. } => FeaturePath::Selected,
            FeaturePathDescriptor::Projected { .. } => FeaturePath::Projected,
        }
    }

    /// 把标准化后的特征映射到模型输入
    pub fn transform(&self, x: &Array2<f64>) -> MLResult<Array2<f64>> {
        match self {
            FeaturePathDescriptor::Selected { indices, .. } => {
                if let Some(&bad) = indices.iter().find(|&&i| i >= x.ncols()) {
                    return Err(MLError::dimension("FeatureSelector", bad + 1, x.ncols()));
                }
                Ok(x.select(ndarray::Axis(1), indices))
            }
            FeaturePathDescriptor::Projected { pca } => pca.transform(x),
        }
    }
}

/// 产物元数据
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactMetadata {
    pub property: String,
    pub run_type: String,
    pub candidate: CandidateKind,
    pub best_params: ParamSet,
    pub metrics: Metrics,
    pub created_at: DateTime<Utc>,
    /// 全部工程特征名（标准化输入的列顺序）
    pub feature_names: Vec<String>,
}

/// 持久化的模型包
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    pub estimator: Estimator,
    pub scaler: ScalerParams,
    pub feature_path: FeaturePathDescriptor,
    /// `Selected` 或 `Pca`
    pub method: String,
    pub metadata: ArtifactMetadata,
}

impl Artifact {
    /// 对原始工程特征做 标准化 → 路径变换 → 模型预测
    pub fn predict(&self, features: &Array2<f64>) -> MLResult<Array1<f64>> {
        let scaled = self.scaler.transform(features)?;
        let inputs = self.feature_path.transform(&scaled)?;
        self.estimator.predict(&inputs)
    }

    pub fn to_bytes(&self) -> MLResult<Vec<u8>> {
        bincode::serialize(self).map_err(|e| MLError::Serialization(e.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> MLResult<Self> {
        bincode::deserialize(bytes).map_err(|e| MLError::Serialization(e.to_string()))
    }
}

/// 产物存储目录
pub struct ArtifactStore {
    dir: PathBuf,
}

impl ArtifactStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// `{property}_{run_type}_occupancy_model.bin`
    pub fn file_name(property: &str, run_type: &str) -> String {
        format!("{}_{}_occupancy_model.bin", property, run_type)
    }

    pub fn path_for(&self, property: &str, run_type: &str) -> PathBuf {
        self.dir.join(Self::file_name(property, run_type))
    }

    /// 原子写入：先写同目录下的 `.tmp` 文件并 fsync，再重命名覆盖
    pub async fn save(&self, artifact: &Artifact) -> MLResult<PathBuf> {
        let final_path = self.path_for(&artifact.metadata.property, &artifact.metadata.run_type);
        let bytes = artifact
            .to_bytes()
            .map_err(|e| MLError::Persistence(format!("序列化失败: {}", e)))?;

        tokio::fs::create_dir_all(&self.dir).await.map_err(|e| {
            MLError::Persistence(format!("无法创建目录 {}: {}", self.dir.display(), e))
        })?;

        let mut tmp_name = final_path.as_os_str().to_owned();
        tmp_name.push(".tmp");
        let tmp_path = PathBuf::from(tmp_name);

        if let Err(e) = Self::write_and_rename(&tmp_path, &final_path, &bytes).await {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(MLError::Persistence(format!(
                "写入 {} 失败: {}",
                final_path.display(),
                e
            )));
        }

        tracing::info!(
            "Artifact saved to {} ({} bytes)",
            final_path.display(),
            bytes.len()
        );
        Ok(final_path)
    }

    async fn write_and_rename(tmp: &Path, target: &Path, bytes: &[u8]) -> std::io::Result<()> {
        let mut file = tokio::fs::File::create(tmp).await?;
        file.write_all(bytes).await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(tmp, target).await
    }

    /// 按酒店和运行类型加载
    pub async fn load(&self, property: &str, run_type: &str) -> MLResult<Artifact> {
        Self::load_path(self.path_for(property, run_type)).await
    }

    pub async fn load_path(path: impl AsRef<Path>) -> MLResult<Artifact> {
        let path = path.as_ref();
        let bytes = tokio::fs::read(path).await.map_err(|e| {
            MLError::Persistence(format!("无法读取 {}: {}", path.display(), e))
        })?;
        let artifact = Artifact::from_bytes(&bytes)?;
        tracing::info!(
            "Artifact loaded from {}: {} ({})",
            path.display(),
            artifact.metadata.candidate,
            artifact.method
        );
        Ok(artifact)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::FeatureTable;
    use crate::models::LinearRegression;
    use crate::preprocessing::Normalizer;
    use chrono::NaiveDate;
    use ndarray::{array, Axis};

    fn artifact(projected: bool) -> (Artifact, Array2<f64>) {
        let d = |day| NaiveDate::from_ymd_opt(2024, 6, day).unwrap();
        let values = array![
            [10.0, 1.0, 3.0],
            [12.0, 2.0, 1.0],
            [15.0, 3.0, 4.0],
            [11.0, 4.0, 1.0],
            [18.0, 5.0, 5.0],
            [14.0, 6.0, 9.0]
        ];
        let target: Array1<f64> = values.axis_iter(Axis(0)).map(|r| 2.0 * r[0] + r[2]).collect();
        let table = FeatureTable::new(
            (1..=6).map(d).collect(),
            vec!["user_count".into(), "weekday".into(), "total_ppc_spend".into()],
            values.clone(),
            target.clone(),
        )
        .unwrap();

        let (scaler, scaled) = Normalizer::fit_transform(&table).unwrap();
        let feature_path = if projected {
            FeaturePathDescriptor::Projected {
                pca: Pca::fit(&scaled.values, 0.95).unwrap(),
            }
        } else {
            FeaturePathDescriptor::Selected {
                names: vec!["user_count".into(), "total_ppc_spend".into()],
                indices: vec![0, 2],
            }
        };

        let mut model = LinearRegression::new();
        model
            .fit(&feature_path.transform(&scaled.values).unwrap(), &target)
            .unwrap();

        let artifact = Artifact {
            estimator: Estimator::LinearRegression(model),
            scaler,
            method: feature_path.path().method_tag().to_string(),
            feature_path,
            metadata: ArtifactMetadata {
                property: "hotel_2".into(),
                run_type: "daily".into(),
                candidate: CandidateKind::LinearRegression,
                best_params: ParamSet::default(),
                metrics: Metrics::new(0.0, 0.0, 0.0, 1.0),
                created_at: Utc::now(),
                feature_names: table.names.clone(),
            },
        };
        (artifact, values)
    }

    #[test]
    fn test_file_name() {
        assert_eq!(
            ArtifactStore::file_name("hotel_2", "daily"),
            "hotel_2_daily_occupancy_model.bin"
        );
    }

    #[test]
    fn test_artifact_predict_applies_full_transform() {
        let (artifact, values) = artifact(false);
        let pred = artifact.predict(&values).unwrap();
        let expected: Vec<f64> = values.axis_iter(Axis(0)).map(|r| 2.0 * r[0] + r[2]).collect();
        for (p, e) in pred.iter().zip(&expected) {
            assert!((p - e).abs() < 1e-9);
        }
    }

    #[tokio::test]
    async fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path().join("models"));

        for projected in [false, true] {
            let (artifact, values) = artifact(projected);
            let path = store.save(&artifact).await.unwrap();
            assert!(path.ends_with("hotel_2_daily_occupancy_model.bin"));

            let loaded = store.load("hotel_2", "daily").await.unwrap();
            assert_eq!(loaded.method, if projected { "Pca" } else { "Selected" });
            assert_eq!(loaded.metadata, artifact.metadata);
            assert_eq!(loaded.scaler, artifact.scaler);
            assert_eq!(loaded.feature_path, artifact.feature_path);

            // 预测逐位一致
            let before = artifact.predict(&values).unwrap();
            let after = loaded.predict(&values).unwrap();
            let bits = |a: &Array1<f64>| a.iter().map(|v| v.to_bits()).collect::<Vec<_>>();
            assert_eq!(bits(&before), bits(&after));
        }

        let leftovers: Vec<_> = std::fs::read_dir(dir.path().join("models"))
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().map_or(false, |x| x == "tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn test_failed_write_leaves_no_partial_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        // 目标路径被目录占用，rename 会失败
        let final_path = store.path_for("hotel_2", "daily");
        std::fs::create_dir_all(final_path.join("occupied")).unwrap();

        let (artifact, _) = artifact(false);
        let err = store.save(&artifact).await.unwrap_err();
        assert!(matches!(err, MLError::Persistence(_)));
        assert_eq!(err.stage(), "ArtifactStore");

        let mut tmp = final_path.as_os_str().to_owned();
        tmp.push(".tmp");
        assert!(!PathBuf::from(tmp).exists());
        assert!(final_path.is_dir());
    }

    #[tokio::test]
    async fn test_load_missing_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let err = store.load("nope", "daily").await.unwrap_err();
        assert!(matches!(err, MLError::Persistence(_)));
    }
}
