//! 入住率预测管道
//!
//! 特征工程 → 噪声增强 → 标准化 → 特征选择（两条路径）→ 模型搜索 → 评估 → 持久化。
//! 数据严格向前流动，每个阶段产出新的表。

use crate::artifact::{Artifact, ArtifactMetadata, ArtifactStore, FeaturePathDescriptor};
use crate::config::{LeakageMode, PipelineConfig};
use crate::evaluation::{Evaluator, ReportEntry, RunReport};
use crate::features::{FeatureEngine, FeatureTable};
use crate::preprocessing::{Augmenter, Normalizer, ScalerParams};
use crate::search::{CandidateFailure, GridSearch, SearchData, SearchResult};
use crate::selection::{Pca, SelectKBest};
use crate::timeseries::TimeSeriesSplitter;
use crate::types::{FeaturePath, MLError, MLResult};
use chrono::{NaiveDate, Utc};
use etl::JoinedTable;
use ndarray::Array2;
use std::path::PathBuf;

/// 一次运行的结果
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub report: RunReport,
    /// 排名第一的结果
    pub selected: SearchResult,
    pub artifact: Artifact,
    /// 保存后的产物路径
    pub artifact_path: Option<PathBuf>,
    /// 测试集预测值，与 `test_actuals` 逐项对齐
    pub test_predictions: Vec<f64>,
    pub test_actuals: Vec<f64>,
    pub train_dates: Vec<NaiveDate>,
    pub test_dates: Vec<NaiveDate>,
    /// 测试集的原始（未标准化）工程特征
    pub test_inputs: Array2<f64>,
}

/// 标准化并切分后的数据
struct Prepared {
    scaler: ScalerParams,
    train: FeatureTable,
    test: FeatureTable,
    test_raw: FeatureTable,
}

/// 入住率预测管道
pub struct OccupancyPipeline {
    config: PipelineConfig,
}

impl OccupancyPipeline {
    pub fn new(config: PipelineConfig) -> MLResult<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    fn augment(&self, table: &FeatureTable) -> MLResult<FeatureTable> {
        if self.config.augment.enabled {
            Augmenter::new(self.config.augment.noise_std, self.config.random_seed).augment(table)
        } else {
            Ok(table.clone())
        }
    }

    /// 按泄漏模式完成增强、标准化和切分
    fn prepare(&self, table: &FeatureTable) -> MLResult<Prepared> {
        match self.config.leakage_mode {
            LeakageMode::Legacy => {
                tracing::warn!(
                    "Legacy leakage mode: augmentation and normalization see test rows before the split"
                );
                let augmented = self.augment(table)?;
                let (scaler, scaled) = Normalizer::fit_transform(&augmented)?;
                let (train_range, test_range) =
                    TimeSeriesSplitter::train_test_split(scaled.n_rows(), self.config.test_ratio)?;
                Ok(Prepared {
                    scaler,
                    train: scaled.rows(train_range),
                    test: scaled.rows(test_range.clone()),
                    test_raw: augmented.rows(test_range),
                })
            }
            LeakageMode::Strict => {
                let (train_range, test_range) =
                    TimeSeriesSplitter::train_test_split(table.n_rows(), self.config.test_ratio)?;
                let train_raw = self.augment(&table.rows(train_range))?;
                let test_raw = table.rows(test_range);
                let (scaler, train) = Normalizer::fit_transform(&train_raw)?;
                let test = scaler.transform_table(&test_raw)?;
                Ok(Prepared {
                    scaler,
                    train,
                    test,
                    test_raw,
                })
            }
        }
    }

    /// 训练并选择模型（不写文件）
    pub fn train(&self, joined: &JoinedTable) -> MLResult<RunOutcome> {
        let config = &self.config;
        tracing::info!(
            "Running occupancy pipeline for {} ({}) on {} dates",
            config.property,
            config.run_type,
            joined.n_rows()
        );

        // 1. 特征工程
        let engine = FeatureEngine::new(&config.features, config.missing)?;
        let table = engine.compute(joined)?;

        // 2. 增强、标准化、切分
        let Prepared {
            scaler,
            train,
            test,
            test_raw,
        } = self.prepare(&table)?;
        tracing::info!("Split: {} train rows, {} test rows", train.n_rows(), test.n_rows());

        // 3. 特征选择，只在训练集上拟合
        let selector = SelectKBest::fit(&train.values, &train.target, &train.names, config.selection.k_best)?;
        let pca = Pca::fit(&train.values, config.selection.variance_threshold)?;
        let paths = [
            FeaturePathDescriptor::selected(&selector),
            FeaturePathDescriptor::Projected { pca: pca.clone() },
        ];

        // 4. 模型搜索
        let search = GridSearch::new(config.search.cv_folds, config.random_seed, config.search.parallel);
        let candidates = config.ordered_candidates();
        let mut results: Vec<SearchResult> = Vec::new();
        let mut failures: Vec<CandidateFailure> = Vec::new();

        for descriptor in &paths {
            let x_train = descriptor.transform(&train.values)?;
            let x_test = descriptor.transform(&test.values)?;
            let data = SearchData {
                x_train: &x_train,
                y_train: &train.target,
                x_test: &x_test,
                y_test: &test.target,
            };
            for outcome in search.search_all(&candidates, descriptor.path(), &data)? {
                match outcome {
                    Ok(result) => results.push(result),
                    Err(failure) => failures.push(failure),
                }
            }
        }

        // 5. 评估与排名
        let ranked = Evaluator::rank(results);
        let selected = best_ranked(&ranked, &failures)?;

        let predictions = ndarray::Array1::from(selected.test_predictions.clone());
        let residuals = Evaluator::residual_summary(&test.target, &predictions)?;

        let entries: Vec<ReportEntry> = ranked
            .iter()
            .enumerate()
            .map(|(i, r)| ReportEntry::from_result(i + 1, r))
            .collect();

        let report = RunReport {
            property: config.property.clone(),
            run_type: config.run_type.clone(),
            leakage_mode: config.leakage_mode,
            n_train: train.n_rows(),
            n_test: test.n_rows(),
            selected_features: selector.names.clone(),
            pca_components: pca.n_components(),
            selected: ReportEntry::from_result(1, &selected),
            entries,
            failures,
            residuals,
        };

        tracing::info!(
            "Selected model: {} ({}) RMSE {:.4}, R2 {:.4}",
            selected.candidate,
            selected.path,
            selected.metrics.rmse,
            selected.metrics.r2_score
        );

        // 6. 组装产物（使用已拟合的标准化参数）
        let feature_path = match selected.path {
            FeaturePath::Selected => paths[0].clone(),
            FeaturePath::Projected => paths[1].clone(),
        };
        let artifact = Artifact {
            estimator: selected.estimator.clone(),
            scaler,
            method: selected.path.method_tag().to_string(),
            feature_path,
            metadata: ArtifactMetadata {
                property: config.property.clone(),
                run_type: config.run_type.clone(),
                candidate: selected.candidate,
                best_params: selected.best_params.clone(),
                metrics: selected.metrics,
                created_at: Utc::now(),
                feature_names: table.names.clone(),
            },
        };

        Ok(RunOutcome {
            report,
            test_predictions: selected.test_predictions.clone(),
            test_actuals: test.target.to_vec(),
            train_dates: train.dates.clone(),
            test_dates: test.dates.clone(),
            test_inputs: test_raw.values,
            selected,
            artifact,
            artifact_path: None,
        })
    }

    /// 训练、选择并原子写入产物
    pub async fn run(&self, joined: &JoinedTable) -> MLResult<RunOutcome> {
        let mut outcome = self.train(joined)?;
        let store = ArtifactStore::new(&self.config.artifact_dir);
        outcome.artifact_path = Some(store.save(&outcome.artifact).await?);
        Ok(outcome)
    }
}

/// 排名第一的结果；没有成功的候选时整个搜索失败
fn best_ranked(ranked: &[SearchResult], failures: &[CandidateFailure]) -> MLResult<SearchResult> {
    ranked
        .first()
        .cloned()
        .ok_or_else(|| MLError::Training(format!("全部 {} 个候选结果均失败", failures.len())))
}

/// 生成线性关系的合成日表（示例与测试共用）
///
/// `fill_rate = 0.4 * user_count + 0.005 * total_ppc_spend + 5 + ε`
pub fn synthetic_joined(days: usize, seed: u64) -> JoinedTable {
    use chrono::Duration;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use rand_distr::StandardNormal;

    let mut rng = StdRng::seed_from_u64(seed);
    let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap_or_default();

    let mut dates = Vec::with_capacity(days);
    let mut users = Vec::with_capacity(days);
    let mut sessions = Vec::with_capacity(days);
    let mut spend = Vec::with_capacity(days);
    let mut fill = Vec::with_capacity(days);
    for i in 0..days {
        let t = i as f64;
        let u = 80.0 + 30.0 * (1.3 * t).sin();
        let s = 200.0 + 50.0 * (0.7 * t).cos();
        dates.push(start + Duration::days(i as i64));
        users.push(Some(u));
        sessions.push(Some(u * 1.3 + 2.0 * (0.9 * t).sin()));
        spend.push(Some(s));
        fill.push(Some(0.4 * u + 0.005 * s + 5.0 + 0.01 * rng.sample::<f64, _>(StandardNormal)));
    }

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
