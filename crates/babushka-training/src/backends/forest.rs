//! Random forest of CART classification trees.
//!
//! Trees are fitted independently on bootstrap samples, in parallel. Each
//! tree's randomness derives from the forest seed and the tree's index, so a
//! forest grown in several warm-start steps matches one grown in a single call.

use crate::dataset::Dataset;
use crate::error::{TrainingError, TrainingResult};
use ndarray::{ArrayView1, ArrayView2};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "node", rename_all = "snake_case")]
enum Node {
    Leaf { class: u32 },
    Split { feature: usize, threshold: f32, left: usize, right: usize },
}

/// A fitted tree stored as a flat node array; the root is node 0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionTree {
    nodes: Vec<Node>,
}

impl DecisionTree {
    fn fit_bootstrap(data: &Dataset, n_classes: usize, max_depth: usize, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let n = data.len();
        let mut rows: Vec<usize> = (0..n).map(|_| rng.gen_range(0..n)).collect();

        let n_features = data.n_features();
        let max_features = ((n_features as f64).sqrt().round() as usize).clamp(1, n_features);

        let mut builder = TreeBuilder {
            x: data.features(),
            y: data.labels(),
            n_classes,
            max_depth,
            max_features,
            rng,
            nodes: Vec::new(),
        };
        builder.build(&mut rows, 0);
        Self { nodes: builder.nodes }
    }

    pub fn predict_row(&self, row: ArrayView1<'_, f32>) -> u32 {
        let mut index = 0;
        loop {
            match self.nodes[index] {
                Node::Leaf { class } => return class,
                Node::Split { feature, threshold, left, right } => {
                    index = if row[feature] <= threshold { left } else { right };
                }
            }
        }
    }

    pub fn depth(&self) -> usize {
        fn walk(nodes: &[Node], index: usize) -> usize {
            match nodes[index] {
                Node::Leaf { .. } => 0,
                Node::Split { left, right, .. } => 1 + walk(nodes, left).max(walk(nodes, right)),
            }
        }
        walk(&self.nodes, 0)
    }
}

struct TreeBuilder<'a> {
    x: ArrayView2<'a, f32>,
    y: &'a [u32],
    n_classes: usize,
    max_depth: usize,
    max_features: usize,
    rng: StdRng,
    nodes: Vec<Node>,
}

impl TreeBuilder<'_> {
    /// Grow the subtree for `rows` and return its node index.
    fn build(&mut self, rows: &mut [usize], depth: usize) -> usize {
        let counts = self.class_counts(rows);
        let majority = majority_class(&counts);
        let pure = counts.iter().filter(|&&c| c > 0).count() <= 1;

        if depth >= self.max_depth || rows.len() < 2 || pure {
            return self.push(Node::Leaf { class: majority });
        }
        let Some((feature, threshold)) = self.best_split(rows, &counts) else {
            return self.push(Node::Leaf { class: majority });
        };

        let mid = partition(rows, |r| self.x[[r, feature]] <= threshold);
        if mid == 0 || mid == rows.len() {
            return self.push(Node::Leaf { class: majority });
        }

        // Reserve the slot so children land after their parent.
        let index = self.push(Node::Leaf { class: majority });
        let (left_rows, right_rows) = rows.split_at_mut(mid);
        let left = self.build(left_rows, depth + 1);
        let right = self.build(right_rows, depth + 1);
        self.nodes[index] = Node::Split { feature, threshold, left, right };
        index
    }

    fn push(&mut self, node: Node) -> usize {
        self.nodes.push(node);
        self.nodes.len() - 1
    }

    fn class_counts(&self, rows: &[usize]) -> Vec<usize> {
        let mut counts = vec![0; self.n_classes];
        for &r in rows {
            counts[self.y[r] as usize] += 1;
        }
        counts
    }

    /// Lowest weighted gini over a random subset of features, if any split
    /// improves on the parent.
    fn best_split(&mut self, rows: &[usize], parent_counts: &[usize]) -> Option<(usize, f32)> {
        let n_features = self.x.ncols();
        let candidates = rand::seq::index::sample(&mut self.rng, n_features, self.max_features);
        let total = rows.len();
        let parent = gini(parent_counts, total);

        let mut best: Option<(usize, f32, f64)> = None;
        let mut sorted = rows.to_vec();
        for feature in candidates.iter() {
            sorted.sort_by(|&a, &b| self.x[[a, feature]].total_cmp(&self.x[[b, feature]]));

            let mut left = vec![0usize; self.n_classes];
            let mut right = parent_counts.to_vec();
            for i in 0..total - 1 {
                let class = self.y[sorted[i]] as usize;
                left[class] += 1;
                right[class] -= 1;

                let value = self.x[[sorted[i], feature]];
                let next = self.x[[sorted[i + 1], feature]];
                if next <= value {
                    continue;
                }

                let n_left = i + 1;
                let n_right = total - n_left;
                let impurity = (n_left as f64 * gini(&left, n_left) + n_right as f64 * gini(&right, n_right))
                    / total as f64;
                let to_beat = best.map_or(parent, |(_, _, b)| b);
                if impurity < to_beat - f64::EPSILON {
                    best = Some((feature, value + (next - value) / 2.0, impurity));
                }
            }
        }
        best.map(|(feature, threshold, _)| (feature, threshold))
    }
}

fn gini(counts: &[usize], total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let total = total as f64;
    1.0 - counts.iter().map(|&c| (c as f64 / total).powi(2)).sum::<f64>()
}

/// Most frequent class; ties go to the lowest class id.
fn majority_class(counts: &[usize]) -> u32 {
    let mut best = 0;
    for (class, &count) in counts.iter().enumerate() {
        if count > counts[best] {
            best = class;
        }
    }
    best as u32
}

/// Move rows matching `pred` to the front; returns how many matched.
fn partition(rows: &mut [usize], pred: impl Fn(usize) -> bool) -> usize {
    let mut mid = 0;
    for i in 0..rows.len() {
        if pred(rows[i]) {
            rows.swap(i, mid);
            mid += 1;
        }
    }
    mid
}

fn tree_seed(seed: u64, index: usize) -> u64 {
    seed.wrapping_add((index as u64 + 1).wrapping_mul(0x9E37_79B9_7F4A_7C15))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForestParams {
    pub max_depth: usize,
    pub seed: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomForest {
    params: ForestParams,
    n_classes: usize,
    n_features: usize,
    trees: Vec<DecisionTree>,
}

impl RandomForest {
    pub fn new(params: ForestParams, n_classes: usize) -> Self {
        Self { params, n_classes: n_classes.max(2), n_features: 0, trees: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.trees.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trees.is_empty()
    }

    pub fn trees(&self) -> &[DecisionTree] {
        &self.trees
    }

    /// Warm start: keep the existing trees and fit new ones until the forest
    /// holds `n_trees`. Shrinking is a no-op.
    pub fn grow_to(&mut self, data: &Dataset, n_trees: usize) -> TrainingResult<()> {
        if data.is_empty() || data.n_features() == 0 {
            return Err(TrainingError::Trainer("cannot fit a forest on an empty dataset".to_string()));
        }
        if !self.trees.is_empty() && data.n_features() != self.n_features {
            return Err(TrainingError::Trainer(format!(
                "forest was fitted on {} features, got {}",
                self.n_features,
                data.n_features()
            )));
        }
        if let Some(&label) = data.labels().iter().find(|&&l| l as usize >= self.n_classes) {
            return Err(TrainingError::Trainer(format!(
                "label {label} out of range for {} classes",
                self.n_classes
            )));
        }
        if n_trees <= self.trees.len() {
            return Ok(());
        }

        let ForestParams { max_depth, seed } = self.params;
        let n_classes = self.n_classes;
        let fitted: Vec<DecisionTree> = (self.trees.len()..n_trees)
            .into_par_iter()
            .map(|index| DecisionTree::fit_bootstrap(data, n_classes, max_depth, tree_seed(seed, index)))
            .collect();

        self.n_features = data.n_features();
        self.trees.extend(fitted);
        tracing::trace!(trees = self.trees.len(), "forest grown");
        Ok(())
    }

    /// Majority vote over all trees, one class per row.
    pub fn predict(&self, x: ArrayView2<'_, f32>) -> Vec<u32> {
        x.outer_iter()
            .map(|row| {
                let mut votes = vec![0usize; self.n_classes];
                for tree in &self.trees {
                    votes[tree.predict_row(row) as usize] += 1;
                }
                majority_class(&votes)
            })
            .collect()
    }

    pub fn save(&self, path: &Path) -> TrainingResult<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer(&mut writer, self)?;
        writer.flush()?;
        Ok(())
    }

    pub fn load(path: &Path) -> TrainingResult<Self> {
        let reader = BufReader::new(File::open(path)?);
        Ok(serde_json::from_reader(reader)?)
    }
}
