//! 线性模型：普通最小二乘、Ridge 和 ElasticNet
//!
//! 三者都在中心化后的数据上求解系数，截距由均值恢复。

use crate::models::{check_training_data, Model};
use crate::selection::dot;
use crate::types::{MLError, MLResult};
use nalgebra::{DMatrix, DVector};
use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};

/// 中心化：返回 (X - x̄, y - ȳ, x̄, ȳ)
fn center(x: &Array2<f64>, y: &Array1<f64>) -> MLResult<(Array2<f64>, Array1<f64>, Array1<f64>, f64)> {
    let x_mean = x
        .mean_axis(Axis(0))
        .ok_or_else(|| MLError::Training("无法计算均值".to_string()))?;
    let y_mean = y
        .mean()
        .ok_or_else(|| MLError::Training("无法计算均值".to_string()))?;
    Ok((x - &x_mean, y - y_mean, x_mean, y_mean))
}

fn to_matrix(x: &Array2<f64>) -> DMatrix<f64> {
    DMatrix::from_fn(x.nrows(), x.ncols(), |i, j| x[[i, j]])
}

fn to_vector(y: &Array1<f64>) -> DVector<f64> {
    DVector::from_iterator(y.len(), y.iter().cloned())
}

/// 逐行预测 `x · w + b`
fn linear_predict(
    x: &Array2<f64>,
    coefficients: &Option<Array1<f64>>,
    intercept: Option<f64>,
) -> MLResult<Array1<f64>> {
    let (w, b) = match (coefficients, intercept) {
        (Some(w), Some(b)) => (w, b),
        _ => return Err(MLError::Prediction("模型未训练".to_string())),
    };
    if x.ncols() != w.len() {
        return Err(MLError::dimension("ModelSearch", w.len(), x.ncols()));
    }
    Ok(x.axis_iter(Axis(0)).map(|row| dot(row, w.view()) + b).collect())
}

fn check_coefficients(w: &Array1<f64>) -> MLResult<()> {
    if w.iter().any(|v| !v.is_finite()) {
        return Err(MLError::Training("求解得到非有限系数".to_string()));
    }
    Ok(())
}

/// 线性回归模型（SVD 最小二乘，秩亏时取最小范数解）
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LinearRegression {
    coefficients: Option<Array1<f64>>,
    intercept: Option<f64>,
}

impl LinearRegression {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn coefficients(&self) -> Option<&Array1<f64>> {
        self.coefficients.as_ref()
    }

    pub fn intercept(&self) -> Option<f64> {
        self.intercept
    }
}

impl Model for LinearRegression {
    fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> MLResult<()> {
        check_training_data(x, y)?;
        let (xc, yc, x_mean, y_mean) = center(x, y)?;

        let a = to_matrix(&xc);
        let b = to_vector(&yc);

        // 使用 SVD 求解最小二乘
        let svd = a.svd(true, true);
        let max_sv = svd.singular_values.iter().cloned().fold(0.0_f64, f64::max);
        let eps = max_sv * xc.nrows().max(xc.ncols()) as f64 * f64::EPSILON;
        let solution = svd
            .solve(&b, eps)
            .map_err(|e| MLError::Training(format!("最小二乘求解失败: {}", e)))?;

        let w: Array1<f64> = solution.iter().cloned().collect();
        check_coefficients(&w)?;

        self.intercept = Some(y_mean - dot(x_mean.view(), w.view()));
        self.coefficients = Some(w);
        Ok(())
    }

    fn predict(&self, x: &Array2<f64>) -> MLResult<Array1<f64>> {
        linear_predict(x, &self.coefficients, self.intercept)
    }
}

/// Ridge 求解方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RidgeSolver {
    /// 稠密数据下等同于 Cholesky
    Auto,
    Svd,
    Cholesky,
}

impl RidgeSolver {
    pub fn as_str(&self) -> &'static str {
        match self {
            RidgeSolver::Auto => "auto",
            RidgeSolver::Svd => "svd",
            RidgeSolver::Cholesky => "cholesky",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "auto" => Some(RidgeSolver::Auto),
            "svd" => Some(RidgeSolver::Svd),
            "cholesky" => Some(RidgeSolver::Cholesky),
            _ => None,
        }
    }
}

/// Ridge 回归，最小化 `||y - Xw||² + α||w||²`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ridge {
    alpha: f64,
    solver: RidgeSolver,
    coefficients: Option<Array1<f64>>,
    intercept: Option<f64>,
}

impl Ridge {
    pub fn new(alpha: f64, solver: RidgeSolver) -> Self {
        Self {
            alpha,
            solver,
            coefficients: None,
            intercept: None,
        }
    }

    pub fn coefficients(&self) -> Option<&Array1<f64>> {
        self.coefficients.as_ref()
    }

    fn solve_cholesky(&self, a: &DMatrix<f64>, b: &DVector<f64>) -> MLResult<DVector<f64>> {
        let d = a.ncols();
        let mut gram = a.transpose() * a;
        for i in 0..d {
            gram[(i, i)] += self.alpha;
        }
        let rhs = a.transpose() * b;
        let chol = gram
            .cholesky()
            .ok_or_else(|| MLError::Training("矩阵非正定，Cholesky 分解失败".to_string()))?;
        Ok(chol.solve(&rhs))
    }

    fn solve_svd(&self, a: &DMatrix<f64>, b: &DVector<f64>) -> MLResult<DVector<f64>> {
        let svd = a.clone().svd(true, true);
        let (u, v_t) = match (&svd.u, &svd.v_t) {
            (Some(u), Some(v_t)) => (u, v_t),
            _ => return Err(MLError::Training("SVD 分解失败".to_string())),
        };
        let mut uty = u.transpose() * b;
        for (i, s) in svd.singular_values.iter().enumerate() {
            let denom = s * s + self.alpha;
            uty[i] = if denom > 0.0 { uty[i] * s / denom } else { 0.0 };
        }
        Ok(v_t.transpose() * uty)
    }
}

impl Model for Ridge {
    fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> MLResult<()> {
        if !(self.alpha >= 0.0) {
            return Err(MLError::Training(format!("无效的 alpha: {}", self.alpha)));
        }
        check_training_data(x, y)?;
        let (xc, yc, x_mean, y_mean) = center(x, y)?;

        let a = to_matrix(&xc);
        let b = to_vector(&yc);
        let solution = match self.solver {
            RidgeSolver::Auto | RidgeSolver::Cholesky => self.solve_cholesky(&a, &b)?,
            RidgeSolver::Svd => self.solve_svd(&a, &b)?,
        };

        let w: Array1<f64> = solution.iter().cloned().collect();
        check_coefficients(&w)?;

        self.intercept = Some(y_mean - dot(x_mean.view(), w.view()));
        self.coefficients = Some(w);
        Ok(())
    }

    fn predict(&self, x: &Array2<f64>) -> MLResult<Array1<f64>> {
        linear_predict(x, &self.coefficients, self.intercept)
    }
}

/// ElasticNet 回归（坐标下降）
///
/// 目标函数: `1/(2n) ||y - Xw||² + α·ρ·||w||₁ + α·(1-ρ)/2 ·||w||²`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElasticNet {
    alpha: f64,
    l1_ratio: f64,
    max_iter: usize,
    tol: f64,
    coefficients: Option<Array1<f64>>,
    intercept: Option<f64>,
    n_iter: usize,
    converged: bool,
}

impl ElasticNet {
    pub fn new(alpha: f64, l1_ratio: f64, max_iter: usize, tol: f64) -> Self {
        Self {
            alpha,
            l1_ratio,
            max_iter,
            tol,
            coefficients: None,
            intercept: None,
            n_iter: 0,
            converged: false,
        }
    }

    pub fn coefficients(&self) -> Option<&Array1<f64>> {
        self.coefficients.as_ref()
    }

    pub fn n_iter(&self) -> usize {
        self.n_iter
    }

    pub fn converged(&self) -> bool {
        self.converged
    }
}

/// 软阈值算子
fn soft_threshold(value: f64, lambda: f64) -> f64 {
    if value > lambda {
        value - lambda
    } else if value < -lambda {
        value + lambda
    } else {
        0.0
    }
}

impl Model for ElasticNet {
    fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> MLResult<()> {
        if !(self.alpha >= 0.0) || !(0.0..=1.0).contains(&self.l1_ratio) || self.max_iter == 0 {
            return Err(MLError::Training(format!(
                "无效的参数: alpha={}, l1_ratio={}, max_iter={}",
                self.alpha, self.l1_ratio, self.max_iter
            )));
        }
        check_training_data(x, y)?;
        let (xc, yc, x_mean, y_mean) = center(x, y)?;

        let n = xc.nrows() as f64;
        let d = xc.ncols();
        let l1 = self.alpha * self.l1_ratio * n;
        let l2 = self.alpha * (1.0 - self.l1_ratio) * n;
        let col_ss: Vec<f64> = xc.axis_iter(Axis(1)).map(|c| c.dot(&c)).collect();

        let mut w = Array1::<f64>::zeros(d);
        let mut residual = yc;
        self.converged = false;
        self.n_iter = 0;

        for iter in 0..self.max_iter {
            let mut max_delta = 0.0_f64;
            let mut max_w = 0.0_f64;

            for j in 0..d {
                let denom = col_ss[j] + l2;
                if denom <= 0.0 {
                    continue;
                }
                let column = xc.column(j);
                let w_old = w[j];
                let rho = column.dot(&residual) + w_old * col_ss[j];
                let w_new = soft_threshold(rho, l1) / denom;

                if w_new != w_old {
                    residual.scaled_add(w_old - w_new, &column);
                    w[j] = w_new;
                }
                max_delta = max_delta.max((w_new - w_old).abs());
                max_w = max_w.max(w_new.abs());
            }

            self.n_iter = iter + 1;
            if !max_delta.is_finite() {
                return Err(MLError::Training("坐标下降发散".to_string()));
            }
            if max_delta <= self.tol * max_w {
                self.converged = true;
                break;
            }
        }

        if !self.converged {
            tracing::warn!(
                "ElasticNet did not converge after {} iterations (alpha={}, l1_ratio={}, tol={})",
                self.max_iter,
                self.alpha,
                self.l1_ratio,
                self.tol
            );
        }

        check_coefficients(&w)?;
        self.intercept = Some(y_mean - dot(x_mean.view(), w.view()));
        self.coefficients = Some(w);
        Ok(())
    }

    fn predict(&self, x: &Array2<f64>) -> MLResult<Array1<f64>> {
        linear_predict(x, &self.coefficients, self.intercept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn data() -> (Array2<f64>, Array1<f64>) {
        let x = array![
            [1.0, 2.0],
            [2.0, 1.0],
            [3.0, 4.0],
            [4.0, 3.0],
            [5.0, 6.0],
            [6.0, 5.0]
        ];
        // y = 2 x0 - x1 + 3
        let y = x.axis_iter(Axis(0)).map(|r| 2.0 * r[0] - r[1] + 3.0).collect();
        (x, y)
    }

    #[test]
    fn test_linear_regression_exact_fit() {
        let (x, y) = data();
        let mut model = LinearRegression::new();
        model.fit(&x, &y).unwrap();

        let w = model.coefficients().unwrap();
        assert!((w[0] - 2.0).abs() < 1e-9);
        assert!((w[1] + 1.0).abs() < 1e-9);
        assert!((model.intercept().unwrap() - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_linear_regression_collinear_min_norm() {
        // 第二列是第一列的两倍
        let x = array![[1.0, 2.0], [2.0, 4.0], [3.0, 6.0], [4.0, 8.0]];
        let y = array![5.0, 10.0, 15.0, 20.0];
        let mut model = LinearRegression::new();
        model.fit(&x, &y).unwrap();

        // 最小范数解: w ∝ (1, 2)，且 w0 + 2 w1 = 5
        let w = model.coefficients().unwrap();
        assert!((w[0] - 1.0).abs() < 1e-8);
        assert!((w[1] - 2.0).abs() < 1e-8);
        let pred = model.predict(&x).unwrap();
        assert!((pred - &y).mapv(f64::abs).sum() < 1e-8);
    }

    #[test]
    fn test_predict_before_fit() {
        let model = LinearRegression::new();
        assert!(matches!(
            model.predict(&array![[1.0, 2.0]]),
            Err(MLError::Prediction(_))
        ));
    }

    #[test]
    fn test_ridge_solvers_agree() {
        let (x, y) = data();
        let mut chol = Ridge::new(1.0, RidgeSolver::Cholesky);
        let mut svd = Ridge::new(1.0, RidgeSolver::Svd);
        let mut auto = Ridge::new(1.0, RidgeSolver::Auto);
        chol.fit(&x, &y).unwrap();
        svd.fit(&x, &y).unwrap();
        auto.fit(&x, &y).unwrap();

        let a = chol.coefficients().unwrap();
        let b = svd.coefficients().unwrap();
        assert!((a - b).mapv(f64::abs).sum() < 1e-9);
        assert_eq!(a, auto.coefficients().unwrap());
    }

    #[test]
    fn test_ridge_shrinks_coefficients() {
        let (x, y) = data();
        let mut weak = Ridge::new(0.1, RidgeSolver::Auto);
        let mut strong = Ridge::new(10.0, RidgeSolver::Auto);
        weak.fit(&x, &y).unwrap();
        strong.fit(&x, &y).unwrap();

        let norm = |w: &Array1<f64>| w.dot(w).sqrt();
        assert!(norm(strong.coefficients().unwrap()) < norm(weak.coefficients().unwrap()));
    }

    #[test]
    fn test_soft_threshold() {
        assert_eq!(soft_threshold(3.0, 1.0), 2.0);
        assert_eq!(soft_threshold(-3.0, 1.0), -2.0);
        assert_eq!(soft_threshold(0.5, 1.0), 0.0);
    }

    #[test]
    fn test_elastic_net_converges_near_ols_for_small_alpha() {
        let (x, y) = data();
        let mut model = ElasticNet::new(1e-6, 0.5, 10_000, 1e-8);
        model.fit(&x, &y).unwrap();
        assert!(model.converged());

        let w = model.coefficients().unwrap();
        assert!((w[0] - 2.0).abs() < 1e-3);
        assert!((w[1] + 1.0).abs() < 1e-3);
    }

    #[test]
    fn test_elastic_net_large_alpha_zeroes_coefficients() {
        let (x, y) = data();
        let mut model = ElasticNet::new(100.0, 0.9, 10_000, 1e-4);
        model.fit(&x, &y).unwrap();

        assert!(model.coefficients().unwrap().iter().all(|w| *w == 0.0));
        let pred = model.predict(&x).unwrap();
        let mean = y.mean().unwrap();
        assert!(pred.iter().all(|p| (p - mean).abs() < 1e-12));
    }
}
