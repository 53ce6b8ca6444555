//! Dense matrix helpers for the optimizer. Matrices are row-major
//! `Vec<Vec<f64>>`, sized for portfolios of tens of assets.

/// Matrix-vector multiplication.
pub(crate) fn mat_vec_multiply(mat: &[Vec<f64>], v: &[f64]) -> Vec<f64> {
    mat.iter().map(|row| vec_dot(row, v)).collect()
}

/// Dot product.
pub(crate) fn vec_dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

pub(crate) fn norm_inf(v: &[f64]) -> f64 {
    v.iter().fold(0.0, |m, x| m.max(x.abs()))
}

fn max_abs_entry(mat: &[Vec<f64>]) -> f64 {
    mat.iter().map(|row| norm_inf(row)).fold(0.0, f64::max)
}

/// Solve `a x = b` by Gaussian elimination with partial pivoting.
///
/// Returns `None` when a pivot falls below `rel_tol` times the largest entry
/// of `a`.
#[allow(clippy::needless_range_loop)]
pub(crate) fn solve_linear_system(mut a: Vec<Vec<f64>>, mut b: Vec<f64>, rel_tol: f64) -> Option<Vec<f64>> {
    let n = a.len();
    if n == 0 {
        return Some(Vec::new());
    }
    let threshold = rel_tol * max_abs_entry(&a).max(f64::MIN_POSITIVE);

    for col in 0..n {
        let mut max_row = col;
        let mut max_val = a[col][col].abs();
        for row in (col + 1)..n {
            let val = a[row][col].abs();
            if val > max_val {
                max_val = val;
                max_row = row;
            }
        }
        if max_val <= threshold {
            return None;
        }
        if max_row != col {
            a.swap(col, max_row);
            b.swap(col, max_row);
        }

        let pivot = a[col][col];
        for row in (col + 1)..n {
            let factor = a[row][col] / pivot;
            if factor == 0.0 {
                continue;
            }
            for k in col..n {
                a[row][k] -= factor * a[col][k];
            }
            b[row] -= factor * b[col];
        }
    }

    let mut x = vec![0.0; n];
    for row in (0..n).rev() {
        let tail: f64 = ((row + 1)..n).map(|k| a[row][k] * x[k]).sum();
        x[row] = (b[row] - tail) / a[row][row];
    }
    Some(x)
}

/// Matrix inverse via Gauss-Jordan with partial pivoting. `None` when the
/// matrix is singular to within `rel_tol`.
#[allow(clippy::needless_range_loop)]
pub(crate) fn mat_inverse(mat: &[Vec<f64>], rel_tol: f64) -> Option<Vec<Vec<f64>>> {
    let n = mat.len();
    if n == 0 {
        return Some(Vec::new());
    }
    let threshold = rel_tol * max_abs_entry(mat).max(f64::MIN_POSITIVE);

    let mut aug: Vec<Vec<f64>> = Vec::with_capacity(n);
    for i in 0..n {
        let mut row = Vec::with_capacity(2 * n);
        row.extend_from_slice(&mat[i]);
        for j in 0..n {
            row.push(if i == j { 1.0 } else { 0.0 });
        }
        aug.push(row);
    }

    for col in 0..n {
        let mut max_row = col;
        let mut max_val = aug[col][col].abs();
        for row in (col + 1)..n {
            let val = aug[row][col].abs();
            if val > max_val {
                max_val = val;
                max_row = row;
            }
        }
        if max_val <= threshold {
            return None;
        }
        if max_row != col {
            aug.swap(col, max_row);
        }

        let pivot = aug[col][col];
        for cell in aug[col].iter_mut() {
            *cell /= pivot;
        }

        let pivot_row = aug[col].clone();
        for row in 0..n {
            if row == col {
                continue;
            }
            let factor = aug[row][col];
            if factor == 0.0 {
                continue;
            }
            for (cell, &pv) in aug[row].iter_mut().zip(pivot_row.iter()) {
                *cell -= factor * pv;
            }
        }
    }

    Some(aug.iter().map(|row| row[n..].to_vec()).collect())
}

/// Indices of a maximal linearly independent subset of `rows`, found by
/// Gram-Schmidt in input order.
pub(crate) fn independent_rows(rows: &[Vec<f64>], rel_tol: f64) -> Vec<usize> {
    let mut basis: Vec<Vec<f64>> = Vec::new();
    let mut kept = Vec::new();
    for (i, row) in rows.iter().enumerate() {
        let scale = norm_inf(row);
        if scale == 0.0 {
            continue;
        }
        let mut r = row.clone();
        for q in &basis {
            let proj = vec_dot(&r, q);
            for (x, qx) in r.iter_mut().zip(q.iter()) {
                *x -= proj * qx;
            }
        }
        let norm = vec_dot(&r, &r).sqrt();
        if norm > rel_tol * scale {
            basis.push(r.iter().map(|x| x / norm).collect());
            kept.push(i);
        }
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_solve_linear_system() {
        let a = vec![vec![2.0, 1.0], vec![1.0, 3.0]];
        let x = solve_linear_system(a, vec![3.0, 5.0], 1e-14).unwrap();
        assert!((x[0] - 0.8).abs() < 1e-12);
        assert!((x[1] - 1.4).abs() < 1e-12);
    }

    #[test]
    fn test_singular_system_detected() {
        let a = vec![vec![1.0, 2.0], vec![2.0, 4.0]];
        assert!(solve_linear_system(a.clone(), vec![1.0, 2.0], 1e-12).is_none());
        assert!(mat_inverse(&a, 1e-12).is_none());
    }

    #[test]
    fn test_inverse_roundtrip() {
        let a = vec![
            vec![4.0, 1.0, 0.5],
            vec![1.0, 3.0, 0.2],
            vec![0.5, 0.2, 2.0],
        ];
        let inv = mat_inverse(&a, 1e-14).unwrap();
        for i in 0..3 {
            let col: Vec<f64> = (0..3).map(|k| inv[k][i]).collect();
            let e = mat_vec_multiply(&a, &col);
            for (j, v) in e.iter().enumerate() {
                let expected = if i == j { 1.0 } else { 0.0 };
                assert!((v - expected).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn test_independent_rows_drops_parallel() {
        let rows = vec![vec![1.0, 1.0, 1.0], vec![0.1, 0.1, 0.1], vec![0.1, 0.2, 0.3]];
        assert_eq!(independent_rows(&rows, 1e-10), vec![0, 2]);
    }
}
