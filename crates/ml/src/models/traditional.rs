//! 树模型：决策树、随机森林和梯度提升

use crate::models::{check_training_data, Model};
use crate::types::{MLError, MLResult};
use ndarray::{Array1, Array2, ArrayView1, Axis};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

/// 决策树节点
#[derive(Debug, Clone, Serialize, Deserialize)]
enum TreeNode {
    Leaf {
        value: f64,
    },
    Internal {
        feature_idx: usize,
        threshold: f64,
        left: Box<TreeNode>,
        right: Box<TreeNode>,
    },
}

/// 最佳分割
struct Split {
    feature_idx: usize,
    threshold: f64,
    sse: f64,
}

/// 决策树回归模型（CART，平方误差）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionTree {
    max_depth: Option<usize>,
    min_samples_split: usize,
    min_samples_leaf: usize,
    root: Option<TreeNode>,
}

impl DecisionTree {
    pub fn new(max_depth: Option<usize>, min_samples_split: usize, min_samples_leaf: usize) -> Self {
        Self {
            max_depth,
            min_samples_split,
            min_samples_leaf,
            root: None,
        }
    }

    fn validate(&self) -> MLResult<()> {
        if self.min_samples_split < 2 || self.min_samples_leaf < 1 {
            return Err(MLError::Training(format!(
                "无效的树参数: min_samples_split={}, min_samples_leaf={}",
                self.min_samples_split, self.min_samples_leaf
            )));
        }
        Ok(())
    }

    fn build_tree(&self, x: &Array2<f64>, y: &Array1<f64>, indices: Vec<usize>, depth: usize) -> TreeNode {
        let n_samples = indices.len();
        let sum: f64 = indices.iter().map(|&i| y[i]).sum();
        let mean = sum / n_samples as f64;

        // 停止条件
        let depth_reached = self.max_depth.map_or(false, |max| depth >= max);
        if depth_reached
            || n_samples < self.min_samples_split
            || n_samples < 2 * self.min_samples_leaf
        {
            return TreeNode::Leaf { value: mean };
        }

        let sse: f64 = indices.iter().map(|&i| (y[i] - mean).powi(2)).sum();
        if sse <= 1e-12 {
            return TreeNode::Leaf { value: mean };
        }

        // 如果找不到有效的分割，创建叶子节点
        let split = match self.find_best_split(x, y, &indices) {
            Some(split) => split,
            None => return TreeNode::Leaf { value: mean },
        };

        let (left_indices, right_indices): (Vec<usize>, Vec<usize>) = indices
            .into_iter()
            .partition(|&i| x[[i, split.feature_idx]] <= split.threshold);

        if left_indices.is_empty() || right_indices.is_empty() {
            return TreeNode::Leaf { value: mean };
        }

        let left = Box::new(self.build_tree(x, y, left_indices, depth + 1));
        let right = Box::new(self.build_tree(x, y, right_indices, depth + 1));

        TreeNode::Internal {
            feature_idx: split.feature_idx,
            threshold: split.threshold,
            left,
            right,
        }
    }

    /// 每个特征排序后用前缀和扫描所有分割点
    fn find_best_split(&self, x: &Array2<f64>, y: &Array1<f64>, indices: &[usize]) -> Option<Split> {
        let n = indices.len();
        let min_leaf = self.min_samples_leaf;
        let total_sum: f64 = indices.iter().map(|&i| y[i]).sum();
        let total_sq: f64 = indices.iter().map(|&i| y[i] * y[i]).sum();

        let mut best: Option<Split> = None;
        let mut sorted = indices.to_vec();

        for feature_idx in 0..x.ncols() {
            sorted.sort_by(|&a, &b| x[[a, feature_idx]].total_cmp(&x[[b, feature_idx]]));

            let mut left_sum = 0.0;
            let mut left_sq = 0.0;
            for p in 1..n {
                let prev = sorted[p - 1];
                left_sum += y[prev];
                left_sq += y[prev] * y[prev];

                if p < min_leaf || n - p < min_leaf {
                    continue;
                }
                let lo = x[[prev, feature_idx]];
                let hi = x[[sorted[p], feature_idx]];
                if lo >= hi {
                    continue;
                }

                let n_left = p as f64;
                let n_right = (n - p) as f64;
                let right_sum = total_sum - left_sum;
                let right_sq = total_sq - left_sq;
                let sse = (left_sq - left_sum * left_sum / n_left)
                    + (right_sq - right_sum * right_sum / n_right);

                if best.as_ref().map_or(true, |b| sse < b.sse) {
                    let mut threshold = lo / 2.0 + hi / 2.0;
                    if threshold >= hi || !threshold.is_finite() {
                        threshold = lo;
                    }
                    best = Some(Split {
                        feature_idx,
                        threshold,
                        sse,
                    });
                }
            }
        }

        best
    }

    fn predict_single(&self, x: &ArrayView1<f64>, node: &TreeNode) -> f64 {
        match node {
            TreeNode::Leaf { value } => *value,
            TreeNode::Internal {
                feature_idx,
                threshold,
                left,
                right,
            } => {
                if x[*feature_idx] <= *threshold {
                    self.predict_single(x, left)
                } else {
                    self.predict_single(x, right)
                }
            }
        }
    }
}

impl Model for DecisionTree {
    fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> MLResult<()> {
        self.validate()?;
        check_training_data(x, y)?;
        self.root = Some(self.build_tree(x, y, (0..x.nrows()).collect(), 0));
        Ok(())
    }

    fn predict(&self, x: &Array2<f64>) -> MLResult<Array1<f64>> {
        let root = self
            .root
            .as_ref()
            .ok_or_else(|| MLError::Prediction("模型未训练".to_string()))?;
        Ok(x.axis_iter(Axis(0))
            .map(|row| self.predict_single(&row, root))
            .collect())
    }
}

/// 随机森林回归模型
///
/// 每棵树使用种子 `seed + i` 做自助采样，所有特征参与分割。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RandomForestRegressor {
    n_estimators: usize,
    max_depth: Option<usize>,
    min_samples_split: usize,
    min_samples_leaf: usize,
    seed: u64,
    trees: Vec<DecisionTree>,
}

impl RandomForestRegressor {
    pub fn new(
        n_estimators: usize,
        max_depth: Option<usize>,
        min_samples_split: usize,
        min_samples_leaf: usize,
        seed: u64,
    ) -> Self {
        Self {
            n_estimators,
            max_depth,
            min_samples_split,
            min_samples_leaf,
            seed,
            trees: Vec::new(),
        }
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    fn bootstrap_sample(
        x: &Array2<f64>,
        y: &Array1<f64>,
        rng: &mut impl Rng,
    ) -> (Array2<f64>, Array1<f64>) {
        let n_samples = x.nrows();
        let indices: Vec<usize> = (0..n_samples)
            .map(|_| rng.gen_range(0..n_samples))
            .collect();

        (x.select(Axis(0), &indices), y.select(Axis(0), &indices))
    }
}

impl Model for RandomForestRegressor {
    fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> MLResult<()> {
        if self.n_estimators == 0 {
            return Err(MLError::Training("n_estimators 必须大于 0".to_string()));
        }
        check_training_data(x, y)?;

        self.trees.clear();
        for i in 0..self.n_estimators {
            let mut rng = StdRng::seed_from_u64(self.seed.wrapping_add(i as u64));
            let (x_boot, y_boot) = Self::bootstrap_sample(x, y, &mut rng);

            let mut tree = DecisionTree::new(self.max_depth, self.min_samples_split, self.min_samples_leaf);
            tree.fit(&x_boot, &y_boot)?;
            self.trees.push(tree);
        }

        Ok(())
    }

    fn predict(&self, x: &Array2<f64>) -> MLResult<Array1<f64>> {
        if self.trees.is_empty() {
            return Err(MLError::Prediction("模型未训练".to_string()));
        }

        // 对每棵树的预测求平均
        let mut predictions = Array1::<f64>::zeros(x.nrows());
        for tree in &self.trees {
            predictions = predictions + tree.predict(x)?;
        }

        Ok(predictions / self.trees.len() as f64)
    }
}

/// 梯度提升回归（平方损失，从均值开始）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GradientBoostingRegressor {
    n_estimators: usize,
    learning_rate: f64,
    max_depth: usize,
    min_samples_split: usize,
    min_samples_leaf: usize,
    init: Option<f64>,
    trees: Vec<DecisionTree>,
}

impl GradientBoostingRegressor {
    pub fn new(
        n_estimators: usize,
        learning_rate: f64,
        max_depth: usize,
        min_samples_split: usize,
    ) -> Self {
        Self {
            n_estimators,
            learning_rate,
            max_depth,
            min_samples_split,
            min_samples_leaf: 1,
            init: None,
            trees: Vec::new(),
        }
    }
}

impl Model for GradientBoostingRegressor {
    fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> MLResult<()> {
        if self.n_estimators == 0 || !(self.learning_rate > 0.0) {
            return Err(MLError::Training(format!(
                "无效的参数: n_estimators={}, learning_rate={}",
                self.n_estimators, self.learning_rate
            )));
        }
        check_training_data(x, y)?;

        let init = y
            .mean()
            .ok_or_else(|| MLError::Training("无法计算均值".to_string()))?;
        let mut current = Array1::from_elem(y.len(), init);

        self.trees.clear();
        for _ in 0..self.n_estimators {
            let residuals = y - &current;
            let mut tree = DecisionTree::new(Some(self.max_depth), self.min_samples_split, self.min_samples_leaf);
            tree.fit(x, &residuals)?;
            current.scaled_add(self.learning_rate, &tree.predict(x)?);
            self.trees.push(tree);
        }

        self.init = Some(init);
        Ok(())
    }

    fn predict(&self, x: &Array2<f64>) -> MLResult<Array1<f64>> {
        let init = self
            .init
            .ok_or_else(|| MLError::Prediction("模型未训练".to_string()))?;

        let mut predictions = Array1::from_elem(x.nrows(), init);
        for tree in &self.trees {
            predictions.scaled_add(self.learning_rate, &tree.predict(x)?);
        }
        Ok(predictions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn step_data() -> (Array2<f64>, Array1<f64>) {
        let x = array![[1.0], [2.0], [3.0], [4.0], [5.0], [6.0]];
        let y = array![1.0, 1.0, 1.0, 5.0, 5.0, 5.0];
        (x, y)
    }

    #[test]
    fn test_tree_learns_step() {
        let (x, y) = step_data();
        let mut tree = DecisionTree::new(Some(3), 2, 1);
        tree.fit(&x, &y).unwrap();

        let pred = tree.predict(&array![[0.0], [3.4], [3.6], [10.0]]).unwrap();
        assert_eq!(pred.to_vec(), vec![1.0, 1.0, 5.0, 5.0]);
    }

    #[test]
    fn test_tree_min_samples_leaf() {
        let x = array![[1.0], [2.0], [3.0], [4.0]];
        let y = array![0.0, 0.0, 0.0, 10.0];
        let mut tree = DecisionTree::new(None, 2, 2);
        tree.fit(&x, &y).unwrap();

        // 每个叶子至少两个样本，只能在 2 和 3 之间分割
        let pred = tree.predict(&x).unwrap();
        assert_eq!(pred.to_vec(), vec![0.0, 0.0, 5.0, 5.0]);
    }

    #[test]
    fn test_tree_depth_zero_is_mean() {
        let (x, y) = step_data();
        let mut tree = DecisionTree::new(Some(0), 2, 1);
        tree.fit(&x, &y).unwrap();
        assert!(tree.predict(&x).unwrap().iter().all(|p| (*p - 3.0).abs() < 1e-12));
    }

    #[test]
    fn test_invalid_tree_params() {
        let (x, y) = step_data();
        let mut tree = DecisionTree::new(None, 1, 1);
        assert!(tree.fit(&x, &y).is_err());
    }

    #[test]
    fn test_random_forest_is_seeded() {
        let x = Array2::from_shape_fn((30, 2), |(i, j)| (i * (j + 1)) as f64 % 7.0);
        let y: Array1<f64> = x.axis_iter(Axis(0)).map(|r| r[0] * 2.0 + r[1]).collect();

        let mut a = RandomForestRegressor::new(10, Some(5), 2, 1, 42);
        let mut b = RandomForestRegressor::new(10, Some(5), 2, 1, 42);
        a.fit(&x, &y).unwrap();
        b.fit(&x, &y).unwrap();

        assert_eq!(a.n_trees(), 10);
        assert_eq!(a.predict(&x).unwrap(), b.predict(&x).unwrap());
    }

    #[test]
    fn test_gradient_boosting_reduces_error() {
        let (x, y) = step_data();
        let mut gb = GradientBoostingRegressor::new(50, 0.1, 2, 2);
        gb.fit(&x, &y).unwrap();

        let pred = gb.predict(&x).unwrap();
        let mse: f64 = (&pred - &y).mapv(|e| e * e).mean().unwrap();
        assert!(mse < 0.01);
    }

    #[test]
    fn test_predict_before_fit() {
        let forest = RandomForestRegressor::new(5, None, 2, 1, 0);
        assert!(forest.predict(&array![[1.0]]).is_err());
        let gb = GradientBoostingRegressor::new(5, 0.1, 3, 2);
        assert!(gb.predict(&array![[1.0]]).is_err());
    }
}
