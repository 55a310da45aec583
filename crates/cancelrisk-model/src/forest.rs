//! Random forest classifier over flat-array decision trees.
//!
//! Each tree is stored the way the training library exposes fitted trees:
//! parallel arrays indexed by node id. A node is a leaf when
//! `children_left[node] == -1`; otherwise the sample goes left when
//! `x[feature[node]] <= threshold[node]`. `value[node]` holds the class
//! weights `[not_cancelled, cancelled]` observed at that node.
//!
//! The forest probability is the mean of the per-tree leaf probabilities,
//! and the forest class is the arg-max of the mean class probabilities
//! (ties resolve to class 0).

use cancelrisk_core::{Classifier, FeatureRow, InferenceError, ModelInfo};
use serde::{Deserialize, Serialize};

use crate::encoding::DesignEncoder;
use crate::ModelError;

/// Sentinel child index marking a leaf.
const LEAF: i64 = -1;

/// A fitted tree as it appears in the artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeArtifact {
    /// Left child per node, `-1` for leaves.
    pub children_left: Vec<i64>,
    /// Right child per node, `-1` for leaves.
    pub children_right: Vec<i64>,
    /// Design-vector index tested at each split node.
    pub feature: Vec<i64>,
    /// Split threshold per node.
    pub threshold: Vec<f64>,
    /// Class weights per node.
    pub value: Vec<[f64; 2]>,
}

#[derive(Debug, Clone, PartialEq)]
enum Node {
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
    Leaf {
        cancelled: f64,
    },
}

/// A validated decision tree.
#[derive(Debug, Clone, PartialEq)]
pub struct DecisionTree {
    nodes: Vec<Node>,
}

impl DecisionTree {
    /// Validate a [`TreeArtifact`] against a design of `width` slots.
    ///
    /// Children must point forward (child id greater than parent id), which
    /// rules out cycles; leaves must carry a positive, finite class weight.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::Invalid`] describing the first bad node.
    pub fn from_artifact(tree: TreeArtifact, width: usize) -> Result<Self, ModelError> {
        let n = tree.children_left.len();
        if n == 0 {
            return Err(ModelError::Invalid("tree has no nodes".to_string()));
        }
        if [
            tree.children_right.len(),
            tree.feature.len(),
            tree.threshold.len(),
            tree.value.len(),
        ]
        .iter()
        .any(|&len| len != n)
        {
            return Err(ModelError::Invalid(format!(
                "tree arrays disagree on node count (children_left has {n})"
            )));
        }

        let mut nodes = Vec::with_capacity(n);
        for id in 0..n {
            let (left, right) = (tree.children_left[id], tree.children_right[id]);
            if left == LEAF {
                if right != LEAF {
                    return Err(ModelError::Invalid(format!(
                        "node {id} has a right child but no left child"
                    )));
                }
                let [not_cancelled, cancelled] = tree.value[id];
                let total = not_cancelled + cancelled;
                if !(not_cancelled >= 0.0 && cancelled >= 0.0 && total > 0.0 && total.is_finite())
                {
                    return Err(ModelError::Invalid(format!(
                        "leaf {id} has invalid class weights {:?}",
                        tree.value[id]
                    )));
                }
                nodes.push(Node::Leaf {
                    cancelled: cancelled / total,
                });
                continue;
            }

            let child = |c: i64| -> Result<usize, ModelError> {
                usize::try_from(c)
                    .ok()
                    .filter(|&c| c > id && c < n)
                    .ok_or_else(|| {
                        ModelError::Invalid(format!("node {id} has out-of-order child {c}"))
                    })
            };
            let feature = usize::try_from(tree.feature[id])
                .ok()
                .filter(|&f| f < width)
                .ok_or_else(|| {
                    ModelError::Invalid(format!(
                        "node {id} splits on feature {} outside design width {width}",
                        tree.feature[id]
                    ))
                })?;
            let threshold = tree.threshold[id];
            if !threshold.is_finite() {
                return Err(ModelError::Invalid(format!(
                    "node {id} has non-finite threshold"
                )));
            }
            nodes.push(Node::Split {
                feature,
                threshold,
                left: child(left)?,
                right: child(right)?,
            });
        }
        Ok(Self { nodes })
    }

    #[cfg(test)]
    fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Probability of the cancelled class at the leaf `design` falls into.
    pub fn predict_proba(&self, design: &[f64]) -> f64 {
        let mut id = 0;
        loop {
            match self.nodes[id] {
                Node::Leaf { cancelled } => return cancelled,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    id = if design[feature] <= threshold { left } else { right };
                }
            }
        }
    }
}

/// Ensemble of decision trees with probability averaging.
#[derive(Debug, Clone)]
pub struct RandomForestClassifier {
    encoder: DesignEncoder,
    trees: Vec<DecisionTree>,
}

impl RandomForestClassifier {
    /// Validate every tree and build the classifier.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::Invalid`] if there are no trees or any tree is
    /// malformed.
    pub fn new(encoder: DesignEncoder, trees: Vec<TreeArtifact>) -> Result<Self, ModelError> {
        if trees.is_empty() {
            return Err(ModelError::Invalid("forest has no trees".to_string()));
        }
        let width = encoder.width();
        let trees = trees
            .into_iter()
            .enumerate()
            .map(|(i, tree)| {
                DecisionTree::from_artifact(tree, width)
                    .map_err(|e| ModelError::Invalid(format!("tree {i}: {e}")))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { encoder, trees })
    }

    /// Number of trees.
    pub fn n_estimators(&self) -> usize {
        self.trees.len()
    }

    /// Mean `(not_cancelled, cancelled)` probabilities over all trees.
    fn mean_proba(&self, row: &FeatureRow) -> Result<(f64, f64), InferenceError> {
        let design = self.encoder.encode(row)?;
        let n = self.trees.len() as f64;
        let (not_cancelled, cancelled) =
            self.trees.iter().fold((0.0, 0.0), |(p0, p1), tree| {
                let p = tree.predict_proba(&design);
                (p0 + (1.0 - p), p1 + p)
            });
        Ok((not_cancelled / n, cancelled / n))
    }
}

impl Classifier for RandomForestClassifier {
    fn classify(&self, row: &FeatureRow) -> Result<u8, InferenceError> {
        let (not_cancelled, cancelled) = self.mean_proba(row)?;
        Ok(u8::from(cancelled > not_cancelled))
    }

    fn score_probability(&self, row: &FeatureRow) -> Result<f64, InferenceError> {
        self.mean_proba(row).map(|(_, cancelled)| cancelled)
    }

    fn info(&self) -> ModelInfo {
        ModelInfo {
            model_type: "random_forest".to_string(),
            columns: self.encoder.columns().iter().map(|c| c.as_field()).collect(),
            estimators: self.n_estimators(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
