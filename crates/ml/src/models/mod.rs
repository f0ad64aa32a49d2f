//! 回归模型模块

pub mod linear;
pub mod traditional;

use crate::types::{CandidateKind, MLError, MLResult};
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

pub use linear::{ElasticNet, LinearRegression, Ridge, RidgeSolver};
pub use traditional::{DecisionTree, GradientBoostingRegressor, RandomForestRegressor};

/// 模型训练接口
pub trait Model: Send + Sync {
    /// 训练模型
    fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> MLResult<()>;

    /// 预测
    fn predict(&self, x: &Array2<f64>) -> MLResult<Array1<f64>>;
}

/// 训练前检查样本数一致且非空
pub(crate) fn check_training_data(x: &Array2<f64>, y: &Array1<f64>) -> MLResult<()> {
    if x.nrows() != y.len() {
        return Err(MLError::dimension("ModelSearch", x.nrows(), y.len()));
    }
    if x.nrows() == 0 {
        return Err(MLError::Training("训练数据为空".to_string()));
    }
    if x.iter().chain(y.iter()).any(|v| !v.is_finite()) {
        return Err(MLError::Training("训练数据包含非有限值".to_string()));
    }
    Ok(())
}

/// 已配置的估计器（封闭集合，可序列化）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Estimator {
    LinearRegression(LinearRegression),
    Ridge(Ridge),
    ElasticNet(ElasticNet),
    RandomForest(RandomForestRegressor),
    GradientBoosting(GradientBoostingRegressor),
}

impl Estimator {
    pub fn kind(&self) -> CandidateKind {
        match self {
            Estimator::LinearRegression(_) => CandidateKind::LinearRegression,
            Estimator::Ridge(_) => CandidateKind::Ridge,
            Estimator::ElasticNet(_) => CandidateKind::ElasticNet,
            Estimator::RandomForest(_) => CandidateKind::RandomForest,
            Estimator::GradientBoosting(_) => CandidateKind::GradientBoosting,
        }
    }

    fn inner(&self) -> &dyn Model {
        match self {
            Estimator::LinearRegression(m) => m,
            Estimator::Ridge(m) => m,
            Estimator::ElasticNet(m) => m,
            Estimator::RandomForest(m) => m,
            Estimator::GradientBoosting(m) => m,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn Model {
        match self {
            Estimator::LinearRegression(m) => m,
            Estimator::Ridge(m) => m,
            Estimator::ElasticNet(m) => m,
            Estimator::RandomForest(m) => m,
            Estimator::GradientBoosting(m) => m,
        }
    }
}

impl Model for Estimator {
    fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> MLResult<()> {
        self.inner_mut().fit(x, y)
    }

    fn predict(&self, x: &Array2<f64>) -> MLResult<Array1<f64>> {
        self.inner().predict(x)
    }
}
