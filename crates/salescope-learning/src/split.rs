//! Deterministic train/test index splitting.
//!
//! Both functions return `(train_indices, test_indices)` over row positions.
//! The same seed always produces the same split for the same input length,
//! which keeps pipeline runs reproducible.

use crate::error::{LearningError, Result};
use rand::prelude::*;

/// Shuffled train/test split of `n_rows` row indices.
///
/// `test_size` is the fraction of rows held out, rounded up so that any
/// non-zero fraction yields at least one test row.
pub fn train_test_split(
    n_rows: usize,
    test_size: f64,
    seed: u64,
) -> Result<(Vec<usize>, Vec<usize>)> {
    if n_rows < 2 {
        return Err(LearningError::InvalidData(format!(
            "need at least 2 rows to split, got {n_rows}"
        )));
    }
    if !(0.0..1.0).contains(&test_size) || test_size == 0.0 {
        return Err(LearningError::InvalidData(format!(
            "test_size must be in (0, 1), got {test_size}"
        )));
    }

    let mut indices: Vec<usize> = (0..n_rows).collect();
    let mut rng = StdRng::seed_from_u64(seed);
    indices.shuffle(&mut rng);

    let n_test = ((n_rows as f64) * test_size).ceil() as usize;
    let n_test = n_test.clamp(1, n_rows - 1);
    let test = indices[..n_test].to_vec();
    let train = indices[n_test..].to_vec();
    Ok((train, test))
}

/// Stratified train/test split: rows are grouped by label and each group is
/// split separately, so class proportions carry over to both sides.
///
/// Classes too small to contribute a test row stay entirely in the training
/// set.
pub fn stratified_split(
    labels: &[i64],
    test_size: f64,
    seed: u64,
) -> Result<(Vec<usize>, Vec<usize>)> {
    if labels.len() < 2 {
        return Err(LearningError::InvalidData(format!(
            "need at least 2 rows to split, got {}",
            labels.len()
        )));
    }
    if !(0.0..1.0).contains(&test_size) || test_size == 0.0 {
        return Err(LearningError::InvalidData(format!(
            "test_size must be in (0, 1), got {test_size}"
        )));
    }

    // Group row positions per label, preserving first-seen class order.
    let mut classes: Vec<i64> = Vec::new();
    let mut groups: Vec<Vec<usize>> = Vec::new();
    for (idx, &label) in labels.iter().enumerate() {
        match classes.iter().position(|&c| c == label) {
            Some(pos) => groups[pos].push(idx),
            None => {
                classes.push(label);
                groups.push(vec![idx]);
            }
        }
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let mut train = Vec::with_capacity(labels.len());
    let mut test = Vec::new();
    for mut group in groups {
        group.shuffle(&mut rng);
        let n_test = ((group.len() as f64) * test_size).round() as usize;
        let n_test = n_test.min(group.len().saturating_sub(1));
        test.extend_from_slice(&group[..n_test]);
        train.extend_from_slice(&group[n_test..]);
    }

    if test.is_empty() {
        return Err(LearningError::InvalidData(
            "stratified split produced an empty test set".to_string(),
        ));
    }
    Ok((train, test))
}
