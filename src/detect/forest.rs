//! Isolation Forest.
//!
//! Anomalies are few and different, so random axis-aligned splits separate
//! them from the bulk in fewer steps. Each tree is grown on a subsample drawn
//! without replacement; a point's score is derived from its mean path length
//! across the ensemble, normalized by the expected path length of an
//! unsuccessful BST search over the subsample size.
//!
//! Scores follow the negated convention: values lie in `[-1, 0]` and lower is
//! more anomalous. The decision offset is the `contamination` quantile of the
//! training scores, so roughly that fraction of the training set predicts `-1`.

use rand::rngs::StdRng;
use rand::seq::index;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::DetectError;

const EULER_GAMMA: f64 = 0.577_215_664_901_532_9;

/// Score used when the subsample is a single row and path lengths carry no signal.
const NEUTRAL_SCORE: f64 = -0.5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IsolationForest {
    n_estimators: usize,
    max_samples: usize,
    contamination: f64,
    random_state: u64,
    /// Set by `fit`.
    n_features: usize,
    sample_size: usize,
    offset: f64,
    trees: Vec<IsolationTree>,
}

impl Default for IsolationForest {
    fn default() -> Self {
        Self::new()
    }
}

impl IsolationForest {
    pub fn new() -> Self {
        Self {
            n_estimators: 100,
            max_samples: 256,
            contamination: 0.05,
            random_state: 42,
            n_features: 0,
            sample_size: 0,
            offset: NEUTRAL_SCORE,
            trees: Vec::new(),
        }
    }

    pub fn with_n_estimators(mut self, n: usize) -> Self {
        self.n_estimators = n;
        self
    }

    pub fn with_max_samples(mut self, n: usize) -> Self {
        self.max_samples = n;
        self
    }

    pub fn with_contamination(mut self, c: f64) -> Self {
        self.contamination = c;
        self
    }

    pub fn with_random_state(mut self, seed: u64) -> Self {
        self.random_state = seed;
        self
    }

    pub fn n_estimators(&self) -> usize {
        self.n_estimators
    }

    pub fn contamination(&self) -> f64 {
        self.contamination
    }

    pub fn random_state(&self) -> u64 {
        self.random_state
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    pub fn sample_size(&self) -> usize {
        self.sample_size
    }

    /// Decision threshold on `score_samples`.
    pub fn offset(&self) -> f64 {
        self.offset
    }

    pub fn is_fitted(&self) -> bool {
        !self.trees.is_empty()
    }

    /// Expected path length of an unsuccessful BST search over `n` points, c(n).
    pub fn average_path_length(n: usize) -> f64 {
        match n {
            0 | 1 => 0.0,
            2 => 1.0,
            _ => {
                let n = n as f64;
                2.0 * ((n - 1.0).ln() + EULER_GAMMA) - 2.0 * (n - 1.0) / n
            }
        }
    }

    fn validate_params(&self) -> Result<(), DetectError> {
        if self.n_estimators == 0 {
            return Err(DetectError::InvalidParams("n_estimators must be at least 1".into()));
        }
        if self.max_samples == 0 {
            return Err(DetectError::InvalidParams("max_samples must be at least 1".into()));
        }
        if !(self.contamination > 0.0 && self.contamination <= 0.5) {
            return Err(DetectError::InvalidParams(format!(
                "contamination must be in (0, 0.5], got {}",
                self.contamination
            )));
        }
        Ok(())
    }

    /// Check shape and finiteness of a matrix against `expected` columns.
    fn validate_rows<R: AsRef<[f64]>>(data: &[R], expected: usize) -> Result<(), DetectError> {
        for (row_idx, row) in data.iter().enumerate() {
            let row = row.as_ref();
            if row.len() != expected {
                return Err(DetectError::ArityMismatch {
                    expected,
                    got: row.len(),
                });
            }
            if let Some(column) = row.iter().position(|v| !v.is_finite()) {
                return Err(DetectError::NonNumeric { row: row_idx, column });
            }
        }
        Ok(())
    }

    /// Grow the ensemble on `data` and set the contamination offset.
    pub fn fit<R: AsRef<[f64]>>(&mut self, data: &[R]) -> Result<(), DetectError> {
        self.validate_params()?;
        let first = data.first().ok_or(DetectError::EmptyBatch)?;
        let n_features = first.as_ref().len();
        if n_features == 0 {
            return Err(DetectError::InvalidParams("rows have no features".into()));
        }
        Self::validate_rows(data, n_features)?;

        let rows: Vec<&[f64]> = data.iter().map(|r| r.as_ref()).collect();
        let sample_size = self.max_samples.min(rows.len());
        let max_depth = (sample_size as f64).log2().ceil() as usize;
        let mut rng = StdRng::seed_from_u64(self.random_state);

        let trees = (0..self.n_estimators)
            .map(|_| {
                let sample = index::sample(&mut rng, rows.len(), sample_size).into_vec();
                IsolationTree::grow(&rows, sample, n_features, max_depth, &mut rng)
            })
            .collect();

        self.trees = trees;
        self.n_features = n_features;
        self.sample_size = sample_size;

        let scores: Vec<f64> = rows.iter().map(|r| self.score_row(r)).collect();
        self.offset = percentile(&scores, 100.0 * self.contamination);

        debug!(
            trees = self.trees.len(),
            sample_size,
            max_depth,
            offset = self.offset,
            "Isolation forest fitted"
        );
        Ok(())
    }

    /// Check a deserialized forest before it is used for scoring.
    ///
    /// Every split must name a column below `n_features` and carry a finite
    /// threshold, otherwise scoring would index out of bounds.
    pub fn check_structure(&self) -> Result<(), String> {
        if self.trees.is_empty() {
            return Err("forest has no trees".into());
        }
        if self.n_features == 0 {
            return Err("forest has no features".into());
        }
        if self.sample_size == 0 {
            return Err("sample size must be at least 1".into());
        }
        if !self.offset.is_finite() {
            return Err(format!("offset {} is not finite", self.offset));
        }
        for (i, tree) in self.trees.iter().enumerate() {
            tree.root
                .check(self.n_features)
                .map_err(|reason| format!("tree {i}: {reason}"))?;
        }
        Ok(())
    }

    fn score_row(&self, row: &[f64]) -> f64 {
        let normalizer = Self::average_path_length(self.sample_size);
        if self.trees.is_empty() || normalizer == 0.0 {
            return NEUTRAL_SCORE;
        }
        let total: f64 = self.trees.iter().map(|t| t.path_length(row)).sum();
        let mean = total / self.trees.len() as f64;
        -(2.0_f64.powf(-mean / normalizer))
    }

    fn ensure_fitted(&self) -> Result<(), DetectError> {
        if self.is_fitted() {
            Ok(())
        } else {
            Err(DetectError::InvalidParams("isolation forest has not been fitted".into()))
        }
    }

    /// Anomaly score per row, in `[-1, 0]`; lower is more anomalous.
    pub fn score_samples<R: AsRef<[f64]>>(&self, data: &[R]) -> Result<Vec<f64>, DetectError> {
        self.ensure_fitted()?;
        Self::validate_rows(data, self.n_features)?;
        Ok(data.iter().map(|r| self.score_row(r.as_ref())).collect())
    }

    /// `score_samples - offset`; negative values are outliers.
    pub fn decision_function<R: AsRef<[f64]>>(&self, data: &[R]) -> Result<Vec<f64>, DetectError> {
        Ok(self
            .score_samples(data)?
            .into_iter()
            .map(|s| s - self.offset)
            .collect())
    }

    /// `-1` for outliers, `+1` for inliers.
    pub fn predict<R: AsRef<[f64]>>(&self, data: &[R]) -> Result<Vec<i8>, DetectError> {
        Ok(self
            .decision_function(data)?
            .into_iter()
            .map(|d| if d < 0.0 { -1 } else { 1 })
            .collect())
    }
}

/// Linear-interpolated percentile, `q` in [0, 100].
fn percentile(values: &[f64], q: f64) -> f64 {
    if values.is_empty() {
        return NEUTRAL_SCORE;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let rank = (q / 100.0).clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    sorted[lo] + (sorted[hi] - sorted[lo]) * (rank - lo as f64)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct IsolationTree {
    root: IsolationNode,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
enum IsolationNode {
    Internal {
        feature: usize,
        split: f64,
        left: Box<IsolationNode>,
        right: Box<IsolationNode>,
    },
    Leaf {
        size: usize,
    },
}

impl IsolationNode {
    fn check(&self, n_features: usize) -> Result<(), String> {
        match self {
            IsolationNode::Leaf { .. } => Ok(()),
            IsolationNode::Internal {
                feature,
                split,
                left,
                right,
            } => {
                if *feature >= n_features {
                    return Err(format!("split on feature {feature} but the forest has {n_features}"));
                }
                if !split.is_finite() {
                    return Err(format!("split value {split} is not finite"));
                }
                left.check(n_features)?;
                right.check(n_features)
            }
        }
    }
}

impl IsolationTree {
    fn grow(rows: &[&[f64]], sample: Vec<usize>, n_features: usize, max_depth: usize, rng: &mut StdRng) -> Self {
        Self {
            root: Self::grow_node(rows, sample, n_features, 0, max_depth, rng),
        }
    }

    fn grow_node(
        rows: &[&[f64]],
        sample: Vec<usize>,
        n_features: usize,
        depth: usize,
        max_depth: usize,
        rng: &mut StdRng,
    ) -> IsolationNode {
        if depth >= max_depth || sample.len() <= 1 {
            return IsolationNode::Leaf { size: sample.len() };
        }

        // Only features that still vary inside this node can split it.
        let candidates: Vec<(usize, f64, f64)> = (0..n_features)
            .filter_map(|f| {
                let (lo, hi) = sample.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &i| {
                    let v = rows[i][f];
                    (lo.min(v), hi.max(v))
                });
                (hi > lo).then_some((f, lo, hi))
            })
            .collect();

        if candidates.is_empty() {
            return IsolationNode::Leaf { size: sample.len() };
        }

        let (feature, lo, hi) = candidates[rng.gen_range(0..candidates.len())];
        let split = rng.gen_range(lo..hi);
        let (left, right): (Vec<usize>, Vec<usize>) = sample.into_iter().partition(|&i| rows[i][feature] < split);

        IsolationNode::Internal {
            feature,
            split,
            left: Box::new(Self::grow_node(rows, left, n_features, depth + 1, max_depth, rng)),
            right: Box::new(Self::grow_node(rows, right, n_features, depth + 1, max_depth, rng)),
        }
    }

    fn path_length(&self, row: &[f64]) -> f64 {
        let mut node = &self.root;
        let mut depth = 0usize;
        loop {
            match node {
                IsolationNode::Leaf { size } => {
                    return depth as f64 + IsolationForest::average_path_length(*size);
                }
                IsolationNode::Internal {
                    feature,
                    split,
                    left,
                    right,
                } => {
                    node = if row[*feature] < *split { left } else { right };
                    depth += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 100 distinct points in a small patch plus one far-away point at the end.
    fn cluster_with_outlier() -> Vec<Vec<f64>> {
        let mut data: Vec<Vec<f64>> = (0..99)
            .map(|i| {
                let t = i as f64;
                vec![21.5 + (t * 0.37).sin() * 0.01, 72.9 + (t * 0.73).cos() * 0.01, (i % 3) as f64]
            })
            .collect();
        data.push(vec![35.0, 60.0, 2.0]);
        data
    }

    #[test]
    fn test_average_path_length() {
        assert_eq!(IsolationForest::average_path_length(1), 0.0);
        assert_eq!(IsolationForest::average_path_length(2), 1.0);
        let c_256 = IsolationForest::average_path_length(256);
        assert!((c_256 - 10.2448).abs() < 1e-3, "c(256) = {}", c_256);
        assert!(IsolationForest::average_path_length(100) > IsolationForest::average_path_length(10));
    }

    #[test]
    fn test_percentile_interpolates() {
        let v = [4.0, 1.0, 3.0, 2.0, 5.0];
        assert_eq!(percentile(&v, 0.0), 1.0);
        assert_eq!(percentile(&v, 50.0), 3.0);
        assert_eq!(percentile(&v, 100.0), 5.0);
        assert!((percentile(&v, 10.0) - 1.4).abs() < 1e-12);
    }

    #[test]
    fn test_fit_rejects_empty() {
        let mut forest = IsolationForest::new();
        let empty: Vec<Vec<f64>> = Vec::new();
        assert!(matches!(forest.fit(&empty), Err(DetectError::EmptyBatch)));
        assert!(!forest.is_fitted());
    }

    #[test]
    fn test_fit_rejects_non_numeric() {
        let mut forest = IsolationForest::new();
        let data = vec![vec![1.0, 2.0], vec![1.5, f64::NAN]];
        assert!(matches!(
            forest.fit(&data),
            Err(DetectError::NonNumeric { row: 1, column: 1 })
        ));
    }

    #[test]
    fn test_fit_rejects_ragged_rows() {
        let mut forest = IsolationForest::new();
        let data = vec![vec![1.0, 2.0, 3.0], vec![1.0, 2.0]];
        assert!(matches!(
            forest.fit(&data),
            Err(DetectError::ArityMismatch { expected: 3, got: 2 })
        ));
    }

    #[test]
    fn test_contamination_bounds() {
        let data = cluster_with_outlier();
        for c in [0.0, -0.1, 0.51, f64::NAN] {
            let mut forest = IsolationForest::new().with_contamination(c);
            assert!(matches!(forest.fit(&data), Err(DetectError::InvalidParams(_))), "c = {}", c);
        }
        let mut forest = IsolationForest::new().with_contamination(0.5);
        assert!(forest.fit(&data).is_ok());
    }

    #[test]
    fn test_scores_bounded_and_outlier_flagged() {
        let data = cluster_with_outlier();
        let mut forest = IsolationForest::new().with_n_estimators(100).with_random_state(7);
        forest.fit(&data).unwrap();

        let scores = forest.score_samples(&data).unwrap();
        assert!(scores.iter().all(|s| (-1.0..=0.0).contains(s)));

        let outlier = scores[99];
        let inlier_mean = scores[..99].iter().sum::<f64>() / 99.0;
        assert!(outlier < inlier_mean, "outlier {} vs inlier mean {}", outlier, inlier_mean);

        let preds = forest.predict(&data).unwrap();
        assert_eq!(preds[99], -1);
        assert!(preds.iter().all(|&p| p == 1 || p == -1));
    }

    #[test]
    fn test_contamination_sets_anomaly_fraction() {
        let data = cluster_with_outlier();
        let mut forest = IsolationForest::new().with_contamination(0.05);
        forest.fit(&data).unwrap();

        let anomalies = forest.predict(&data).unwrap().iter().filter(|&&p| p == -1).count();
        assert!((3..=7).contains(&anomalies), "anomalies = {}", anomalies);
    }

    #[test]
    fn test_same_seed_same_forest() {
        let data = cluster_with_outlier();
        let mut a = IsolationForest::new().with_random_state(42);
        let mut b = IsolationForest::new().with_random_state(42);
        a.fit(&data).unwrap();
        b.fit(&data).unwrap();

        assert_eq!(a, b);
        assert_eq!(serde_json::to_string(&a).unwrap(), serde_json::to_string(&b).unwrap());
        assert_eq!(a.predict(&data).unwrap(), b.predict(&data).unwrap());
    }

    #[test]
    fn test_different_seed_different_trees() {
        let data = cluster_with_outlier();
        let mut a = IsolationForest::new().with_random_state(1);
        let mut b = IsolationForest::new().with_random_state(2);
        a.fit(&data).unwrap();
        b.fit(&data).unwrap();
        assert_ne!(a.trees, b.trees);
    }

    #[test]
    fn test_single_row_is_neutral() {
        let mut forest = IsolationForest::new();
        forest.fit(&[vec![1.0, 2.0, 3.0]]).unwrap();
        assert_eq!(forest.sample_size(), 1);
        assert_eq!(forest.predict(&[vec![1.0, 2.0, 3.0]]).unwrap(), vec![1]);
    }

    #[test]
    fn test_predict_before_fit_errors() {
        let forest = IsolationForest::new();
        assert!(forest.predict(&[vec![1.0]]).is_err());
    }

    #[test]
    fn test_predict_checks_arity() {
        let mut forest = IsolationForest::new();
        forest.fit(&cluster_with_outlier()).unwrap();
        assert!(matches!(
            forest.predict(&[vec![1.0, 2.0]]),
            Err(DetectError::ArityMismatch { expected: 3, got: 2 })
        ));
    }

    #[test]
    fn test_check_structure() {
        let mut forest = IsolationForest::new().with_n_estimators(5);
        assert!(forest.check_structure().is_err());

        forest.fit(&cluster_with_outlier()).unwrap();
        assert!(forest.check_structure().is_ok());

        forest.trees.push(IsolationTree {
            root: IsolationNode::Internal {
                feature: 7,
                split: 0.5,
                left: Box::new(IsolationNode::Leaf { size: 1 }),
                right: Box::new(IsolationNode::Leaf { size: 1 }),
            },
        });
        let reason = forest.check_structure().unwrap_err();
        assert!(reason.contains("feature 7"), "{}", reason);
    }

    #[test]
    fn test_json_round_trip_preserves_predictions() {
        let data = cluster_with_outlier();
        let mut forest = IsolationForest::new();
        forest.fit(&data).unwrap();

        let json = serde_json::to_string(&forest).unwrap();
        let restored: IsolationForest = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, forest);
        assert_eq!(restored.predict(&data).unwrap(), forest.predict(&data).unwrap());
    }
}
