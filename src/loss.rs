use ndarray::{Array1, ArrayView1, Zip};

use crate::config::SoftmaxMode;

/// Host reference of the output layer's normalization.
pub fn softmax(x: ArrayView1<f32>, mode: SoftmaxMode) -> Array1<f32> {
    let shift = match mode {
        SoftmaxMode::Unstabilized => 0.0,
        SoftmaxMode::Stabilized => x.iter().fold(f32::NEG_INFINITY, |v, &w| v.max(w)),
    };
    let exp_each = x.mapv(|v| (v - shift).exp());
    let exp_sum = exp_each.sum();
    exp_each / exp_sum
}

/// `-sum(t * ln(y))` of one output distribution `y` against a one-hot target `t`.
///
/// Probabilities are clamped to the smallest positive `f32`, so a confidently wrong output
/// yields a large finite loss instead of `inf`.
pub fn cross_entropy(distribution: ArrayView1<f32>, target: ArrayView1<f32>) -> f32 {
    assert_eq!(distribution.len(), target.len());
    -Zip::from(&distribution)
        .and(&target)
        .fold(0.0, |loss, &y, &t| loss + t * y.max(f32::MIN_POSITIVE).ln())
}

#[cfg(test)]
mod tests {
    use crate::assert_rel_eq_arr1;

    use super::*;

    use approx::assert_relative_eq;
    use ndarray::arr1;

    #[test]
    fn compute_softmax() {
        let x = arr1(&[1.0, 0.5, -0.1, 0.5, 0.2, 3.0]);
        let expected = arr1(&[
            0.09629906,
            0.05840833,
            0.03205517,
            0.05840833,
            0.04326996,
            0.71155915,
        ]);
        assert_rel_eq_arr1!(softmax(x.view(), SoftmaxMode::Unstabilized), expected, epsilon = 1e-6);
        assert_rel_eq_arr1!(softmax(x.view(), SoftmaxMode::Stabilized), expected, epsilon = 1e-6);
    }

    #[test]
    fn stabilized_softmax_handles_large_logits() {
        let x = arr1(&[1000.0, 1000.0]);
        assert!(softmax(x.view(), SoftmaxMode::Unstabilized)[0].is_nan());
        assert_rel_eq_arr1!(softmax(x.view(), SoftmaxMode::Stabilized), arr1(&[0.5, 0.5]));
    }

    #[test]
    fn compute_cross_entropy() {
        let y = arr1(&[0.7, 0.2, 0.1]);
        assert_relative_eq!(
            cross_entropy(y.view(), arr1(&[1.0, 0.0, 0.0]).view()),
            0.35667494,
            epsilon = 1e-6
        );
        assert_relative_eq!(
            cross_entropy(y.view(), arr1(&[0.0, 0.0, 1.0]).view()),
            2.3025851,
            epsilon = 1e-6
        );
    }

    #[test]
    fn cross_entropy_of_zero_probability_is_finite() {
        let loss = cross_entropy(arr1(&[1.0, 0.0]).view(), arr1(&[0.0, 1.0]).view());
        assert!(loss.is_finite());
        assert!(loss > 80.0);
    }
}
