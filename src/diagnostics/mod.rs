//! Accuracy and clustering diagnostics over evaluation outputs
//!
//! Host-side, pure computations for failure-case analysis: per-class
//! accuracy, confusion matrix, clustering agreement between true and
//! predicted labelings, and a ranking of the most confidently misclassified
//! samples. Plotting is out of scope; everything here returns plain data.

use crate::eval::EvalOutput;
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

/// Per-class accuracy entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassAccuracy {
    /// Class index
    pub class_index: usize,
    /// Display name, when one is known
    pub name: String,
    /// Correct predictions
    pub correct: usize,
    /// Wrong predictions
    pub wrong: usize,
    /// Samples of this class
    pub total: usize,
    /// correct / total
    pub accuracy: f64,
}

/// Clustering agreement between true and predicted labelings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusteringReport {
    /// Adjusted Rand index, chance-corrected pair agreement
    pub adjusted_rand_index: f64,
    /// Each predicted cluster contains members of a single true class
    pub homogeneity: f64,
    /// Each true class maps into a single predicted cluster
    pub completeness: f64,
    /// Harmonic mean of homogeneity and completeness
    pub v_measure: f64,
}

/// A confidently misclassified sample
#[derive(Debug, Clone)]
pub struct FailureCase {
    /// Sample index in loader-iteration order
    pub index: usize,
    /// True label
    pub target: u32,
    /// Predicted label
    pub prediction: u32,
    /// Similarity score of the (wrong) predicted class
    pub similarity: f32,
}

/// Confusion matrix; rows are true classes, columns predicted classes
pub fn confusion_matrix(
    targets: &Array1<u32>,
    predictions: &Array1<u32>,
    num_classes: usize,
) -> Array2<usize> {
    let mut matrix = Array2::zeros((num_classes, num_classes));
    for (&t, &p) in targets.iter().zip(predictions.iter()) {
        let (t, p) = (t as usize, p as usize);
        if t < num_classes && p < num_classes {
            matrix[[t, p]] += 1;
        }
    }
    matrix
}

/// Per-class accuracy table, one entry per class index
pub fn per_class_accuracy(
    targets: &Array1<u32>,
    predictions: &Array1<u32>,
    class_names: &[String],
) -> Vec<ClassAccuracy> {
    let num_classes = class_names.len();
    let mut correct = vec![0usize; num_classes];
    let mut total = vec![0usize; num_classes];

    for (&t, &p) in targets.iter().zip(predictions.iter()) {
        let t = t as usize;
        if t >= num_classes {
            continue;
        }
        total[t] += 1;
        if t == p as usize {
            correct[t] += 1;
        }
    }

    (0..num_classes)
        .map(|class_index| ClassAccuracy {
            class_index,
            name: class_names[class_index].clone(),
            correct: correct[class_index],
            wrong: total[class_index] - correct[class_index],
            total: total[class_index],
            accuracy: if total[class_index] > 0 {
                correct[class_index] as f64 / total[class_index] as f64
            } else {
                0.0
            },
        })
        .collect()
}

fn pairs(n: usize) -> f64 {
    (n as f64) * (n as f64 - 1.0) / 2.0
}

fn contingency(targets: &Array1<u32>, predictions: &Array1<u32>) -> (Array2<usize>, usize) {
    let max_label = targets
        .iter()
        .chain(predictions.iter())
        .map(|&v| v as usize)
        .max()
        .unwrap_or(0);
    let k = max_label + 1;
    (confusion_matrix(targets, predictions, k), k)
}

/// Adjusted Rand index between two labelings
///
/// Chance-corrected: 1.0 for identical partitions, around 0.0 for random
/// assignments, robust to cluster imbalance.
pub fn adjusted_rand_index(targets: &Array1<u32>, predictions: &Array1<u32>) -> f64 {
    let n = targets.len();
    if n < 2 {
        return 1.0;
    }
    let (table, k) = contingency(targets, predictions);

    let mut index = 0.0;
    let mut row_sum = vec![0usize; k];
    let mut col_sum = vec![0usize; k];
    for i in 0..k {
        for j in 0..k {
            let count = table[[i, j]];
            index += pairs(count);
            row_sum[i] += count;
            col_sum[j] += count;
        }
    }
    let a: f64 = row_sum.iter().map(|&c| pairs(c)).sum();
    let b: f64 = col_sum.iter().map(|&c| pairs(c)).sum();

    let expected = a * b / pairs(n);
    let max_index = 0.5 * (a + b);
    if (max_index - expected).abs() < f64::EPSILON {
        return 1.0;
    }
    (index - expected) / (max_index - expected)
}

fn entropy(counts: &[usize], n: f64) -> f64 {
    counts
        .iter()
        .filter(|&&c| c > 0)
        .map(|&c| {
            let p = c as f64 / n;
            -p * p.ln()
        })
        .sum()
}

/// Homogeneity, completeness and V-measure between two labelings
pub fn clustering_report(targets: &Array1<u32>, predictions: &Array1<u32>) -> ClusteringReport {
    let n = targets.len();
    if n == 0 {
        return ClusteringReport {
            adjusted_rand_index: 1.0,
            homogeneity: 1.0,
            completeness: 1.0,
            v_measure: 1.0,
        };
    }
    let nf = n as f64;
    let (table, k) = contingency(targets, predictions);

    let mut row_sum = vec![0usize; k];
    let mut col_sum = vec![0usize; k];
    for i in 0..k {
        for j in 0..k {
            row_sum[i] += table[[i, j]];
            col_sum[j] += table[[i, j]];
        }
    }

    let h_classes = entropy(&row_sum, nf);
    let h_clusters = entropy(&col_sum, nf);

    // H(C|K): uncertainty about the true class within each predicted cluster.
    let mut h_classes_given = 0.0;
    let mut h_clusters_given = 0.0;
    for i in 0..k {
        for j in 0..k {
            let count = table[[i, j]];
            if count == 0 {
                continue;
            }
            let joint = count as f64 / nf;
            h_classes_given -= joint * (count as f64 / col_sum[j] as f64).ln();
            h_clusters_given -= joint * (count as f64 / row_sum[i] as f64).ln();
        }
    }

    let homogeneity = if h_classes > 0.0 {
        1.0 - h_classes_given / h_classes
    } else {
        1.0
    };
    let completeness = if h_clusters > 0.0 {
        1.0 - h_clusters_given / h_clusters
    } else {
        1.0
    };
    let v_measure = if homogeneity + completeness > 0.0 {
        2.0 * homogeneity * completeness / (homogeneity + completeness)
    } else {
        0.0
    };

    ClusteringReport {
        adjusted_rand_index: adjusted_rand_index(targets, predictions),
        homogeneity,
        completeness,
        v_measure,
    }
}

/// The `k` most confidently misclassified samples
///
/// Failures are ranked by the similarity score assigned to the wrong
/// predicted class, descending; the head of the list is where the model is
/// most confidently wrong.
pub fn top_misclassified(output: &EvalOutput, k: usize) -> Vec<FailureCase> {
    let mut failures: Vec<FailureCase> = output
        .targets
        .iter()
        .zip(output.predictions.iter())
        .enumerate()
        .filter(|(_, (t, p))| t != p)
        .map(|(index, (&target, &prediction))| FailureCase {
            index,
            target,
            prediction,
            similarity: output.similarities[[index, prediction as usize]],
        })
        .collect();

    failures.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    failures.truncate(k);
    failures
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::{arr1, Array4};

    #[test]
    fn test_confusion_matrix_row_sums() {
        let targets = arr1(&[0u32, 0, 1, 1, 2, 2]);
        let predictions = arr1(&[0u32, 1, 1, 1, 2, 0]);

        let matrix = confusion_matrix(&targets, &predictions, 3);
        assert_eq!(matrix[[0, 0]], 1);
        assert_eq!(matrix[[0, 1]], 1);
        assert_eq!(matrix[[2, 0]], 1);

        // Row sums equal per-class totals.
        for class_idx in 0..3 {
            let row_sum: usize = matrix.row(class_idx).sum();
            assert_eq!(row_sum, 2);
        }
    }

    #[test]
    fn test_per_class_accuracy() {
        let targets = arr1(&[0u32, 0, 1, 1]);
        let predictions = arr1(&[0u32, 1, 1, 1]);
        let names = vec!["first".to_string(), "second".to_string()];

        let table = per_class_accuracy(&targets, &predictions, &names);
        assert_eq!(table.len(), 2);
        assert_eq!(table[0].correct, 1);
        assert_eq!(table[0].wrong, 1);
        assert_relative_eq!(table[0].accuracy, 0.5);
        assert_relative_eq!(table[1].accuracy, 1.0);
    }

    #[test]
    fn test_ari_identical_labelings() {
        let labels = arr1(&[0u32, 0, 1, 1, 2, 2]);
        assert_relative_eq!(adjusted_rand_index(&labels, &labels), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_ari_disagreement_is_below_one() {
        let targets = arr1(&[0u32, 0, 0, 1, 1, 1]);
        let predictions = arr1(&[0u32, 0, 1, 1, 0, 1]);
        let ari = adjusted_rand_index(&targets, &predictions);
        assert!(ari < 1.0);
        assert!(ari > -1.0);
    }

    #[test]
    fn test_clustering_report_perfect() {
        let labels = arr1(&[0u32, 0, 1, 1, 2, 2]);
        let report = clustering_report(&labels, &labels);
        assert_relative_eq!(report.homogeneity, 1.0, epsilon = 1e-12);
        assert_relative_eq!(report.completeness, 1.0, epsilon = 1e-12);
        assert_relative_eq!(report.v_measure, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_clustering_report_merged_clusters() {
        // Everything predicted as one cluster: completeness is perfect,
        // homogeneity is not.
        let targets = arr1(&[0u32, 0, 1, 1]);
        let predictions = arr1(&[0u32, 0, 0, 0]);
        let report = clustering_report(&targets, &predictions);
        assert!(report.homogeneity < 1e-9);
        assert_relative_eq!(report.completeness, 1.0, epsilon = 1e-9);
    }

    #[test]
    fn test_top_misclassified_ranking() {
        let output = EvalOutput {
            accuracy: 0.5,
            images: Array4::zeros((4, 1, 1, 1)),
            targets: arr1(&[0u32, 1, 0, 1]),
            predictions: arr1(&[0u32, 0, 1, 0]),
            similarities: ndarray::arr2(&[
                [0.9f32, 0.1],
                [0.4, 0.2],
                [0.1, 0.8],
                [0.6, 0.3],
            ]),
        };

        let failures = top_misclassified(&output, 2);
        assert_eq!(failures.len(), 2);
        // Sample 2 is wrong with similarity 0.8, sample 3 with 0.6.
        assert_eq!(failures[0].index, 2);
        assert_relative_eq!(failures[0].similarity, 0.8);
        assert_eq!(failures[1].index, 3);
    }
}
