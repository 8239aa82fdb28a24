// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Injected similarity function.

use thiserror::Error;

/// Prevents division by zero in cosine similarity calculation
const COSINE_EPSILON: f32 = 1e-8;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ComparatorError {
    #[error("comparator failed: {0}")]
    Failed(String),
    #[error("descriptor dimensions differ: {left} vs {right}")]
    DimensionMismatch { left: usize, right: usize },
    #[error("similarity {0} outside [0, 1]")]
    OutOfRange(f64),
}

/// Scores two descriptors in `[0, 1]`. Treated as a pure function.
///
/// Any `Fn(&[f32], &[f32]) -> Result<f64, ComparatorError>` closure works:
///
/// ```
/// use bridge_router::{ComparatorError, PatternComparator};
///
/// let exact = |a: &[f32], b: &[f32]| -> Result<f64, ComparatorError> {
///     Ok(if a == b { 1.0 } else { 0.0 })
/// };
/// assert_eq!(exact.similarity(&[1.0], &[1.0]).unwrap(), 1.0);
/// ```
pub trait PatternComparator: Send + Sync {
    fn similarity(&self, a: &[f32], b: &[f32]) -> Result<f64, ComparatorError>;
}

impl<F> PatternComparator for F
where
    F: Fn(&[f32], &[f32]) -> Result<f64, ComparatorError> + Send + Sync,
{
    fn similarity(&self, a: &[f32], b: &[f32]) -> Result<f64, ComparatorError> {
        self(a, b)
    }
}

/// Cosine similarity rescaled from `[-1, 1]` to `[0, 1]`.
#[derive(Debug, Clone, Copy, Default)]
pub struct CosineComparator;

impl PatternComparator for CosineComparator {
    fn similarity(&self, a: &[f32], b: &[f32]) -> Result<f64, ComparatorError> {
        if a.len() != b.len() {
            return Err(ComparatorError::DimensionMismatch {
                left: a.len(),
                right: b.len(),
            });
        }
        let (dot, norm_a, norm_b) = a.iter().zip(b).fold((0.0f32, 0.0f32, 0.0f32), |(d, na, nb), (x, y)| {
            (d + x * y, na + x * x, nb + y * y)
        });
        let magnitude = norm_a.sqrt() * norm_b.sqrt();
        if magnitude < COSINE_EPSILON {
            return Err(ComparatorError::Failed("zero-magnitude descriptor".into()));
        }
        let cosine = f64::from((dot / magnitude).clamp(-1.0, 1.0));
        Ok((cosine + 1.0) / 2.0)
    }
}
