//! Classifier plug-point for steering.
//!
//! The steering loop only needs `fit` over labeled feature vectors and a
//! boolean `predict`; any decision-tree-like implementation can sit behind
//! the trait. The default is a linfa CART tree with balanced class
//! weights, which trains deterministically for a fixed dataset.

use linfa::prelude::*;
use linfa_trees::DecisionTree;
use ndarray::{Array1, Array2};

use crate::error::{EngineError, Result};

/// Binary classifier over vulnerability feature vectors.
pub trait Classifier: Send {
    /// Train on the given feature rows; `labels[i]` tells whether row `i`
    /// came from a query-satisfying path.
    fn fit(&mut self, features: &Array2<f64>, labels: &[bool]) -> Result<()>;

    /// Predict query membership for each feature row.
    fn predict(&self, features: &Array2<f64>) -> Result<Vec<bool>>;
}

/// Decision-tree classifier with balanced class weights.
#[derive(Debug, Default)]
pub struct DecisionTreeClassifier {
    tree: Option<DecisionTree<f64, usize>>,
}

impl DecisionTreeClassifier {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Classifier for DecisionTreeClassifier {
    fn fit(&mut self, features: &Array2<f64>, labels: &[bool]) -> Result<()> {
        debug_assert_eq!(features.nrows(), labels.len());

        let targets: Array1<usize> = labels.iter().map(|&label| label as usize).collect();

        // Balanced class weighting: weight = n / (2 · n_class).
        let total = labels.len() as f32;
        let positives = labels.iter().filter(|&&label| label).count() as f32;
        let negatives = total - positives;
        let weights: Array1<f32> = labels
            .iter()
            .map(|&label| {
                let class_count = if label { positives } else { negatives };
                if class_count > 0.0 {
                    total / (2.0 * class_count)
                } else {
                    1.0
                }
            })
            .collect();

        let dataset = Dataset::new(features.clone(), targets).with_weights(weights);
        let tree = DecisionTree::params()
            .fit(&dataset)
            .map_err(|e| EngineError::Classifier(e.to_string()))?;
        self.tree = Some(tree);
        Ok(())
    }

    fn predict(&self, features: &Array2<f64>) -> Result<Vec<bool>> {
        let tree = self.tree.as_ref().ok_or(EngineError::ClassifierNotTrained)?;
        let predictions = tree.predict(features);
        Ok(predictions.iter().map(|&class| class == 1).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr2;

    fn separable_dataset() -> (Array2<f64>, Vec<bool>) {
        // High exploitability (column 2) marks the positive class.
        let features = arr2(&[
            [5.0, 5.0, 9.0, 1.0, 1.0, 0.0, 1.0, 1.0, 1.0, 2.0],
            [5.0, 5.0, 8.5, 1.0, 1.0, 0.0, 1.0, 1.0, 1.0, 2.0],
            [5.0, 5.0, 8.0, 1.0, 2.0, 0.0, 1.0, 1.0, 1.0, 2.0],
            [5.0, 5.0, 2.0, 1.0, 1.0, 0.0, 1.0, 1.0, 1.0, 2.0],
            [5.0, 5.0, 1.5, 1.0, 2.0, 0.0, 1.0, 1.0, 1.0, 2.0],
            [5.0, 5.0, 1.0, 1.0, 1.0, 0.0, 1.0, 1.0, 1.0, 2.0],
        ]);
        let labels = vec![true, true, true, false, false, false];
        (features, labels)
    }

    #[test]
    fn learns_a_separable_split() {
        let (features, labels) = separable_dataset();
        let mut classifier = DecisionTreeClassifier::new();
        classifier.fit(&features, &labels).unwrap();

        let predictions = classifier.predict(&features).unwrap();
        assert_eq!(predictions, labels);
    }

    #[test]
    fn training_is_deterministic() {
        let (features, labels) = separable_dataset();
        let probe = arr2(&[
            [5.0, 5.0, 7.0, 1.0, 1.0, 0.0, 1.0, 1.0, 1.0, 2.0],
            [5.0, 5.0, 3.0, 1.0, 1.0, 0.0, 1.0, 1.0, 1.0, 2.0],
        ]);

        let mut first = DecisionTreeClassifier::new();
        first.fit(&features, &labels).unwrap();
        let mut second = DecisionTreeClassifier::new();
        second.fit(&features, &labels).unwrap();

        assert_eq!(
            first.predict(&probe).unwrap(),
            second.predict(&probe).unwrap()
        );
    }

    #[test]
    fn predict_before_fit_fails() {
        let classifier = DecisionTreeClassifier::new();
        let probe = arr2(&[[0.0; 10]]);
        assert!(matches!(
            classifier.predict(&probe),
            Err(EngineError::ClassifierNotTrained)
        ));
    }
}
