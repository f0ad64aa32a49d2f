//! 模型搜索
//!
//! 每个候选模型在自己的参数网格上做穷举搜索，用扩展窗口的时间序列交叉验证打分
//! （负 MSE 的折平均），最佳参数在整个训练集上重新拟合。
//! (参数组合 × 折) 任务在 rayon 线程池上执行，结果按任务顺序收集。

use crate::evaluation::Evaluator;
use crate::models::{
    ElasticNet, Estimator, GradientBoostingRegressor, LinearRegression, Model, RandomForestRegressor,
    Ridge, RidgeSolver,
};
use crate::timeseries::{Fold, TimeSeriesSplit};
use crate::types::{CandidateKind, FeaturePath, MLError, MLResult, Metrics};
use ndarray::{s, Array1, Array2};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// 超参数取值
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ParamValue {
    Float(f64),
    Int(usize),
    Text(String),
    None,
}

impl std::fmt::Display for ParamValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParamValue::Float(v) => write!(f, "{}", v),
            ParamValue::Int(v) => write!(f, "{}", v),
            ParamValue::Text(v) => write!(f, "{}", v),
            ParamValue::None => write!(f, "None"),
        }
    }
}

/// 一组超参数，按名称排序
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParamSet(pub BTreeMap<String, ParamValue>);

impl ParamSet {
    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.0.get(name)
    }

    fn float(&self, name: &str) -> MLResult<f64> {
        match self.get(name) {
            Some(ParamValue::Float(v)) => Ok(*v),
            Some(ParamValue::Int(v)) => Ok(*v as f64),
            other => Err(MLError::InvalidConfig(format!("参数 {} 应为数值，实际为 {:?}", name, other))),
        }
    }

    fn int(&self, name: &str) -> MLResult<usize> {
        match self.get(name) {
            Some(ParamValue::Int(v)) => Ok(*v),
            other => Err(MLError::InvalidConfig(format!("参数 {} 应为整数，实际为 {:?}", name, other))),
        }
    }

    fn optional_int(&self, name: &str) -> MLResult<Option<usize>> {
        match self.get(name) {
            Some(ParamValue::None) => Ok(None),
            _ => self.int(name).map(Some),
        }
    }

    fn text(&self, name: &str) -> MLResult<&str> {
        match self.get(name) {
            Some(ParamValue::Text(v)) => Ok(v),
            other => Err(MLError::InvalidConfig(format!("参数 {} 应为文本，实际为 {:?}", name, other))),
        }
    }
}

impl std::fmt::Display for ParamSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.0.is_empty() {
            return write!(f, "{{}}");
        }
        let parts: Vec<String> = self.0.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
        write!(f, "{{{}}}", parts.join(", "))
    }
}

/// 参数网格：参数名按字母序，每个参数一组候选值
pub type ParamGrid = Vec<(&'static str, Vec<ParamValue>)>;

fn floats(values: &[f64]) -> Vec<ParamValue> {
    values.iter().map(|&v| ParamValue::Float(v)).collect()
}

fn ints(values: &[usize]) -> Vec<ParamValue> {
    values.iter().map(|&v| ParamValue::Int(v)).collect()
}

impl CandidateKind {
    /// 超参数网格（参数名按字母序）
    pub fn grid(&self) -> ParamGrid {
        match self {
            CandidateKind::LinearRegression => vec![],
            CandidateKind::Ridge => vec![
                ("alpha", floats(&[0.1, 1.0, 10.0])),
                (
                    "solver",
                    ["auto", "svd", "cholesky"]
                        .iter()
                        .map(|s| ParamValue::Text(s.to_string()))
                        .collect(),
                ),
            ],
            CandidateKind::ElasticNet => vec![
                ("alpha", floats(&[0.1, 0.5, 1.0])),
                ("l1_ratio", floats(&[0.1, 0.5, 0.9])),
                ("max_iter", ints(&[10_000])),
                ("tol", floats(&[1e-4, 1e-3])),
            ],
            CandidateKind::RandomForest => vec![
                (
                    "max_depth",
                    vec![ParamValue::Int(10), ParamValue::Int(20), ParamValue::None],
                ),
                ("min_samples_leaf", ints(&[1, 2])),
                ("min_samples_split", ints(&[2, 5])),
                ("n_estimators", ints(&[100, 200])),
            ],
            CandidateKind::GradientBoosting => vec![
                ("learning_rate", floats(&[0.01, 0.1])),
                ("max_depth", ints(&[3, 5])),
                ("min_samples_split", ints(&[2, 5])),
                ("n_estimators", ints(&[100, 200])),
            ],
        }
    }

    /// 网格展开为参数组合，最后一个参数变化最快
    pub fn combinations(&self) -> Vec<ParamSet> {
        let mut combos = vec![ParamSet::default()];
        for (name, values) in self.grid() {
            combos = combos
                .into_iter()
                .flat_map(|base| {
                    values.iter().map(move |v| {
                        let mut next = base.clone();
                        next.0.insert(name.to_string(), v.clone());
                        next
                    })
                })
                .collect();
        }
        combos
    }
}

impl Estimator {
    /// 根据候选类型和参数构造未训练的估计器
    pub fn from_params(kind: CandidateKind, params: &ParamSet, seed: u64) -> MLResult<Self> {
        let estimator = match kind {
            CandidateKind::LinearRegression => Estimator::LinearRegression(LinearRegression::new()),
            CandidateKind::Ridge => {
                let solver_name = params.text("solver")?;
                let solver = RidgeSolver::parse(solver_name)
                    .ok_or_else(|| MLError::InvalidConfig(format!("未知的 solver: {}", solver_name)))?;
                Estimator::Ridge(Ridge::new(params.float("alpha")?, solver))
            }
            CandidateKind::ElasticNet => Estimator::ElasticNet(ElasticNet::new(
                params.float("alpha")?,
                params.float("l1_ratio")?,
                params.int("max_iter")?,
                params.float("tol")?,
            )),
            CandidateKind::RandomForest => Estimator::RandomForest(RandomForestRegressor::new(
                params.int("n_estimators")?,
                params.optional_int("max_depth")?,
                params.int("min_samples_split")?,
                params.int("min_samples_leaf")?,
                seed,
            )),
            CandidateKind::GradientBoosting => {
                Estimator::GradientBoosting(GradientBoostingRegressor::new(
                    params.int("n_estimators")?,
                    params.float("learning_rate")?,
                    params.int("max_depth")?,
                    params.int("min_samples_split")?,
                ))
            }
        };
        Ok(estimator)
    }
}

/// 候选模型失败的原因
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Error)]
pub enum FailureReason {
    #[error("参数 {params} 在第 {fold} 折拟合失败: {message}")]
    FoldFit {
        params: String,
        fold: usize,
        message: String,
    },

    #[error("参数 {params} 的交叉验证得分非有限值")]
    NonFiniteScore { params: String },

    #[error("最佳参数在完整训练集上重新拟合失败: {message}")]
    Refit { message: String },

    #[error("测试集评估失败: {message}")]
    Evaluation { message: String },
}

/// 候选模型失败（不终止运行，记录到报告中）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Error)]
#[error("{candidate} ({path}) 被排除: {reason}")]
pub struct CandidateFailure {
    pub candidate: CandidateKind,
    pub path: FeaturePath,
    pub reason: FailureReason,
}

/// 单个候选模型在一条特征路径上的搜索结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub candidate: CandidateKind,
    pub path: FeaturePath,
    pub best_params: ParamSet,
    /// 最佳参数的交叉验证得分（负 MSE）
    pub cv_score: f64,
    /// 在完整训练集上重新拟合的估计器
    pub estimator: Estimator,
    /// 测试集指标
    pub metrics: Metrics,
    pub test_predictions: Vec<f64>,
    pub n_combinations: usize,
}

/// 训练集与测试集
pub struct SearchData<'a> {
    pub x_train: &'a Array2<f64>,
    pub y_train: &'a Array1<f64>,
    pub x_test: &'a Array2<f64>,
    pub y_test: &'a Array1<f64>,
}

/// 网格搜索
pub struct GridSearch {
    cv: TimeSeriesSplit,
    seed: u64,
    parallel: bool,
}

/// 单个 (参数组合, 折) 任务
struct FoldTask {
    combo: usize,
    fold: usize,
    x_train: Array2<f64>,
    y_train: Array1<f64>,
    x_val: Array2<f64>,
    y_val: Array1<f64>,
}

impl GridSearch {
    pub fn new(cv_folds: usize, seed: u64, parallel: bool) -> Self {
        Self {
            cv: TimeSeriesSplit::new(cv_folds),
            seed,
            parallel,
        }
    }

    /// 检查训练集行数足够做交叉验证；不足时为致命错误
    pub fn folds(&self, n_train: usize) -> MLResult<Vec<Fold>> {
        self.cv.folds(n_train)
    }

    /// 在一条特征路径上依次搜索各候选模型
    pub fn search_all(
        &self,
        candidates: &[CandidateKind],
        path: FeaturePath,
        data: &SearchData<'_>,
    ) -> MLResult<Vec<Result<SearchResult, CandidateFailure>>> {
        let folds = self.folds(data.x_train.nrows())?;
        Ok(candidates
            .iter()
            .map(|&kind| self.search(kind, path, data, &folds))
            .collect())
    }

    /// 单个候选模型的网格搜索
    pub fn search(
        &self,
        kind: CandidateKind,
        path: FeaturePath,
        data: &SearchData<'_>,
        folds: &[Fold],
    ) -> Result<SearchResult, CandidateFailure> {
        let fail = |reason: FailureReason| {
            tracing::warn!("{} ({}) excluded: {}", kind, path, reason);
            CandidateFailure {
                candidate: kind,
                path,
                reason,
            }
        };

        let combos = kind.combinations();
        tracing::info!(
            "Searching {} on {} path: {} combinations x {} folds",
            kind,
            path,
            combos.len(),
            folds.len()
        );

        let tasks: Vec<FoldTask> = (0..combos.len())
            .flat_map(|combo| {
                folds.iter().enumerate().map(move |(fold, f)| FoldTask {
                    combo,
                    fold,
                    x_train: data.x_train.slice(s![f.train.clone(), ..]).to_owned(),
                    y_train: data.y_train.slice(s![f.train.clone()]).to_owned(),
                    x_val: data.x_train.slice(s![f.validation.clone(), ..]).to_owned(),
                    y_val: data.y_train.slice(s![f.validation.clone()]).to_owned(),
                })
            })
            .collect();

        let run = |task: FoldTask| -> (usize, usize, MLResult<f64>) {
            let score = Estimator::from_params(kind, &combos[task.combo], self.seed).and_then(|mut est| {
                est.fit(&task.x_train, &task.y_train)?;
                let pred = est.predict(&task.x_val)?;
                Evaluator::mean_squared_error(&task.y_val, &pred)
            });
            (task.combo, task.fold, score)
        };

        let outcomes: Vec<(usize, usize, MLResult<f64>)> = if self.parallel {
            tasks.into_par_iter().map(run).collect()
        } else {
            tasks.into_iter().map(run).collect()
        };

        // 按参数组合汇总折得分
        let mut fold_mse: Vec<Vec<f64>> = vec![Vec::with_capacity(folds.len()); combos.len()];
        for (combo, fold, outcome) in outcomes {
            match outcome {
                Ok(mse) => fold_mse[combo].push(mse),
                Err(e) => {
                    return Err(fail(FailureReason::FoldFit {
                        params: combos[combo].to_string(),
                        fold,
                        message: e.to_string(),
                    }))
                }
            }
        }

        let mut best: Option<(usize, f64)> = None;
        for (combo, mses) in fold_mse.iter().enumerate() {
            let score = -(mses.iter().sum::<f64>() / mses.len() as f64);
            if !score.is_finite() {
                return Err(fail(FailureReason::NonFiniteScore {
                    params: combos[combo].to_string(),
                }));
            }
            tracing::debug!("{} {} cv score {:.6}", kind, combos[combo], score);
            if best.map_or(true, |(_, s)| score > s) {
                best = Some((combo, score));
            }
        }

        let (best_combo, cv_score) = match best {
            Some(b) => b,
            None => {
                return Err(fail(FailureReason::NonFiniteScore {
                    params: "{}".to_string(),
                }))
            }
        };
        let best_params = combos[best_combo].clone();

        let mut estimator = Estimator::from_params(kind, &best_params, self.seed)
            .map_err(|e| fail(FailureReason::Refit { message: e.to_string() }))?;
        estimator
            .fit(data.x_train, data.y_train)
            .map_err(|e| fail(FailureReason::Refit { message: e.to_string() }))?;

        let evaluated = estimator.predict(data.x_test).and_then(|pred| {
            let metrics = Evaluator::evaluate(data.y_test, &pred)?;
            Ok((pred, metrics))
        });
        let (predictions, metrics) = match evaluated {
            Ok((pred, metrics)) if metrics.is_finite() => (pred, metrics),
            Ok(_) => {
                return Err(fail(FailureReason::Evaluation {
                    message: "测试集指标非有限值".to_string(),
                }))
            }
            Err(e) => return Err(fail(FailureReason::Evaluation { message: e.to_string() })),
        };

        tracing::info!(
            "{} ({}) best params {} cv score {:.6}, test RMSE {:.4}",
            kind,
            path,
            best_params,
            cv_score,
            metrics.rmse
        );

        Ok(SearchResult {
            candidate: kind,
            path,
            best_params,
            cv_score,
            estimator,
            metrics,
            test_predictions: predictions.to_vec(),
            n_combinations: combos.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Axis;

    fn linear_data(n: usize) -> (Array2<f64>, Array1<f64>) {
        let x = Array2::from_shape_fn((n, 2), |(i, j)| ((i * 7 + j * 3) % 11) as f64 + i as f64 * 0.1);
        let y = x.axis_iter(Axis(0)).map(|r| 3.0 * r[0] - 2.0 * r[1] + 1.0).collect();
        (x, y)
    }

    #[test]
    fn test_grid_sizes_and_order() {
        assert_eq!(CandidateKind::LinearRegression.combinations().len(), 1);
        assert_eq!(CandidateKind::Ridge.combinations().len(), 9);
        assert_eq!(CandidateKind::ElasticNet.combinations().len(), 18);
        assert_eq!(CandidateKind::RandomForest.combinations().len(), 24);
        assert_eq!(CandidateKind::GradientBoosting.combinations().len(), 16);

        for kind in CandidateKind::ALL {
            let names: Vec<&str> = kind.grid().iter().map(|(n, _)| *n).collect();
            let mut sorted = names.clone();
            sorted.sort_unstable();
            assert_eq!(names, sorted);
        }

        // 最后一个参数变化最快
        let combos = CandidateKind::Ridge.combinations();
        assert_eq!(combos[0].to_string(), "{alpha=0.1, solver=auto}");
        assert_eq!(combos[1].to_string(), "{alpha=0.1, solver=svd}");
        assert_eq!(combos[3].to_string(), "{alpha=1, solver=auto}");
    }

    #[test]
    fn test_every_combination_builds() {
        for kind in CandidateKind::ALL {
            for params in kind.combinations() {
                let estimator = Estimator::from_params(kind, &params, 42).unwrap();
                assert_eq!(estimator.kind(), kind);
            }
        }
    }

    #[test]
    fn test_gradient_boosting_ignores_seed() {
        let (x, y) = linear_data(30);
        let params = &CandidateKind::GradientBoosting.combinations()[0];
        let fit = |seed: u64| {
            let mut est = Estimator::from_params(CandidateKind::GradientBoosting, params, seed).unwrap();
            est.fit(&x, &y).unwrap();
            est.predict(&x).unwrap()
        };
        assert_eq!(fit(1), fit(2));
    }

    #[test]
    fn test_search_linear_regression() {
        let (x, y) = linear_data(40);
        let (x_train, x_test) = (x.slice(s![..32, ..]).to_owned(), x.slice(s![32.., ..]).to_owned());
        let (y_train, y_test) = (y.slice(s![..32]).to_owned(), y.slice(s![32..]).to_owned());
        let data = SearchData {
            x_train: &x_train,
            y_train: &y_train,
            x_test: &x_test,
            y_test: &y_test,
        };

        let search = GridSearch::new(5, 42, true);
        let results = search
            .search_all(&[CandidateKind::LinearRegression, CandidateKind::Ridge], FeaturePath::Selected, &data)
            .unwrap();

        let lr = results[0].as_ref().unwrap();
        assert!(lr.cv_score.abs() < 1e-12);
        assert!(lr.metrics.rmse < 1e-8);
        assert_eq!(lr.test_predictions.len(), 8);

        let ridge = results[1].as_ref().unwrap();
        assert_eq!(ridge.n_combinations, 9);
        assert_eq!(ridge.best_params.get("alpha"), Some(&ParamValue::Float(0.1)));
    }

    #[test]
    fn test_parallel_and_sequential_agree() {
        let (x, y) = linear_data(36);
        let (x_train, x_test) = (x.slice(s![..30, ..]).to_owned(), x.slice(s![30.., ..]).to_owned());
        let (y_train, y_test) = (y.slice(s![..30]).to_owned(), y.slice(s![30..]).to_owned());
        let data = SearchData {
            x_train: &x_train,
            y_train: &y_train,
            x_test: &x_test,
            y_test: &y_test,
        };

        let kinds = [CandidateKind::ElasticNet];
        let a = GridSearch::new(3, 42, true).search_all(&kinds, FeaturePath::Projected, &data).unwrap();
        let b = GridSearch::new(3, 42, false).search_all(&kinds, FeaturePath::Projected, &data).unwrap();

        let (a, b) = (a[0].as_ref().unwrap(), b[0].as_ref().unwrap());
        assert_eq!(a.best_params, b.best_params);
        assert_eq!(a.cv_score, b.cv_score);
        assert_eq!(a.test_predictions, b.test_predictions);
    }

    #[test]
    fn test_fold_failure_is_typed_and_non_fatal() {
        let (x, mut y) = linear_data(30);
        y[3] = f64::NAN;
        let (x_test, y_test) = (x.clone(), Array1::zeros(30));
        let data = SearchData {
            x_train: &x,
            y_train: &y,
            x_test: &x_test,
            y_test: &y_test,
        };

        let results = GridSearch::new(5, 42, false)
            .search_all(&[CandidateKind::LinearRegression], FeaturePath::Selected, &data)
            .unwrap();
        let failure = results[0].as_ref().unwrap_err();
        assert_eq!(failure.candidate, CandidateKind::LinearRegression);
        assert!(matches!(failure.reason, FailureReason::FoldFit { fold: 0, .. }));
    }

    #[test]
    fn test_too_few_rows_is_fatal() {
        let (x, y) = linear_data(4);
        let data = SearchData {
            x_train: &x,
            y_train: &y,
            x_test: &x,
            y_test: &y,
        };
        let err = GridSearch::new(5, 42, false)
            .search_all(&[CandidateKind::LinearRegression], FeaturePath::Selected, &data)
            .unwrap_err();
        assert!(matches!(err, MLError::InsufficientData { .. }));
        assert_eq!(err.stage(), "ModelSearch");
    }
}
