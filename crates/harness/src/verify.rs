//! Output comparison

use serde::Serialize;
use tracing::info;

use fixcnn_model::Tensor;

use crate::error::{HarnessError, Result};

/// Element-wise agreement between two outputs
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Comparison {
    pub total: usize,
    /// Elements whose absolute error exceeds the tolerance
    pub mismatches: usize,
    pub max_abs_error: f64,
    pub mean_abs_error: f64,
    pub tolerance: f64,
}

impl Comparison {
    pub fn passed(&self) -> bool {
        self.mismatches == 0
    }
}

/// Compare `candidate` against `reference`; shapes must match
pub fn compare_outputs(
    reference: &Tensor,
    candidate: &Tensor,
    tolerance: f64,
) -> Result<Comparison> {
    if reference.shape() != candidate.shape() {
        return Err(HarnessError::InvalidInput(format!(
            "shape mismatch: reference {:?}, candidate {:?}",
            reference.shape(),
            candidate.shape()
        )));
    }
    let expected = reference.to_f64_vec();
    let actual = candidate.to_f64_vec();

    let mut comparison = Comparison {
        total: expected.len(),
        mismatches: 0,
        max_abs_error: 0.0,
        mean_abs_error: 0.0,
        tolerance,
    };
    let mut sum = 0.0;
    for (e, a) in expected.iter().zip(&actual) {
        let err = (e - a).abs();
        // NaN never compares within tolerance
        if !(err <= tolerance) {
            comparison.mismatches += 1;
        }
        comparison.max_abs_error = comparison.max_abs_error.max(err);
        sum += err;
    }
    if comparison.total > 0 {
        comparison.mean_abs_error = sum / comparison.total as f64;
    }
    Ok(comparison)
}

/// Compare and fail with `VerificationFailed` on any mismatch
pub fn ensure_within(reference: &Tensor, candidate: &Tensor, tolerance: f64) -> Result<Comparison> {
    let comparison = compare_outputs(reference, candidate, tolerance)?;
    if !comparison.passed() {
        return Err(HarnessError::VerificationFailed {
            message: format!(
                "{}/{} elements differ by more than {} (max error {})",
                comparison.mismatches, comparison.total, tolerance, comparison.max_abs_error
            ),
        });
    }
    info!(
        total = comparison.total,
        max_abs_error = comparison.max_abs_error,
        "outputs match"
    );
    Ok(comparison)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(values: &[f64]) -> Tensor {
        Tensor::float(vec![values.len()], values.to_vec()).unwrap()
    }

    #[test]
    fn test_compare() {
        let c = compare_outputs(&t(&[1.0, 2.0, 3.0]), &t(&[1.0, 2.5, 3.0]), 0.25).unwrap();
        assert_eq!(c.total, 3);
        assert_eq!(c.mismatches, 1);
        assert_eq!(c.max_abs_error, 0.5);
        assert!(!c.passed());
    }

    #[test]
    fn test_ensure_within() {
        assert!(ensure_within(&t(&[1.0]), &t(&[1.1]), 0.25).is_ok());
        assert!(matches!(
            ensure_within(&t(&[1.0]), &t(&[2.0]), 0.25),
            Err(HarnessError::VerificationFailed { .. })
        ));
        assert!(matches!(
            ensure_within(&t(&[1.0]), &t(&[f64::NAN]), 0.25),
            Err(HarnessError::VerificationFailed { .. })
        ));
    }

    #[test]
    fn test_shape_mismatch() {
        assert!(matches!(
            compare_outputs(&t(&[1.0]), &t(&[1.0, 2.0]), 0.0),
            Err(HarnessError::InvalidInput(_))
        ));
    }
}
