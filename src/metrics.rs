/// Fraction of positions where `y_pred` agrees with `y_true`. An empty input scores `0.0`.
pub fn accuracy<Label>(y_true: &[Label], y_pred: &[Label]) -> f32
where
    Label: Eq,
{
    assert_eq!(y_true.len(), y_pred.len());
    if y_true.is_empty() {
        return 0.0;
    }
    let n_corrects = y_true
        .iter()
        .zip(y_pred.iter())
        .filter(|(t, p)| t == p)
        .count();
    n_corrects as f32 / y_true.len() as f32
}

/// Counts of predicted classes per true class.
/// The item in the i-th row and j-th column is the number of samples of class i predicted as j.
pub fn confusion_matrix(y_true: &[usize], y_pred: &[usize], num_classes: usize) -> Vec<Vec<usize>> {
    assert_eq!(y_true.len(), y_pred.len());
    let mut matrix = vec![vec![0; num_classes]; num_classes];
    for (&t, &p) in y_true.iter().zip(y_pred.iter()) {
        matrix[t][p] += 1;
    }
    matrix
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    #[test]
    fn test_accuracy() {
        let y_true = vec![0, 0, 0, 0, 1, 1, 1, 1, 2, 2, 2, 2];
        let y_pred = vec![0, 0, 0, 1, 0, 1, 1, 2, 0, 1, 1, 2];
        assert_relative_eq!(0.5, accuracy(&y_true, &y_pred))
    }

    #[test]
    fn accuracy_of_nothing_is_zero() {
        let empty: [usize; 0] = [];
        assert_eq!(accuracy(&empty, &empty), 0.0);
    }

    #[test]
    fn test_confusion_matrix() {
        let y_true = vec![0, 0, 0, 0, 1, 1, 1, 1, 2, 2, 2, 2];
        let y_pred = vec![0, 0, 0, 1, 0, 1, 1, 2, 0, 1, 1, 2];
        assert_eq!(
            vec![vec![3, 1, 0], vec![1, 2, 1], vec![1, 2, 1]],
            confusion_matrix(&y_true, &y_pred, 3)
        );
    }

    #[test]
    fn unseen_classes_stay_zero() {
        assert_eq!(
            vec![vec![0, 0, 0], vec![0, 2, 0], vec![0, 0, 0]],
            confusion_matrix(&[1, 1], &[1, 1], 3)
        );
    }
}
