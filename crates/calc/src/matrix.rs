//! Small dense matrix algebra for `Complex` queries.

use abacus_core::CalcError;

pub type Matrix = Vec<Vec<f64>>;

const SINGULAR_EPSILON: f64 = 1e-12;

fn square_size(m: &[Vec<f64>]) -> Result<usize, CalcError> {
    let n = m.len();
    if n == 0 {
        return Err(CalcError::missing("matrix"));
    }
    if m.iter().any(|row| row.len() != n) {
        return Err(CalcError::domain("matrix must be square"));
    }
    Ok(n)
}

/// Determinant by Gaussian elimination with partial pivoting.
pub fn determinant(m: &[Vec<f64>]) -> Result<f64, CalcError> {
    let n = square_size(m)?;
    let mut a = m.to_vec();
    let mut det = 1.0;

    for col in 0..n {
        let pivot = pivot_row(&a, col);
        if a[pivot][col].abs() < SINGULAR_EPSILON {
            return Ok(0.0);
        }
        if pivot != col {
            a.swap(pivot, col);
            det = -det;
        }
        det *= a[col][col];
        for row in col + 1..n {
            let factor = a[row][col] / a[col][col];
            for k in col..n {
                a[row][k] -= factor * a[col][k];
            }
        }
    }
    Ok(det)
}

/// Inverse by Gauss–Jordan elimination. A pivot below 1e-12 is singular.
pub fn inverse(m: &[Vec<f64>]) -> Result<Matrix, CalcError> {
    let n = square_size(m)?;
    let mut a = m.to_vec();
    let mut inv: Matrix = (0..n)
        .map(|i| (0..n).map(|j| if i == j { 1.0 } else { 0.0 }).collect())
        .collect();

    for col in 0..n {
        let pivot = pivot_row(&a, col);
        if a[pivot][col].abs() < SINGULAR_EPSILON {
            return Err(CalcError::domain("matrix is singular"));
        }
        a.swap(pivot, col);
        inv.swap(pivot, col);

        let p = a[col][col];
        for k in 0..n {
            a[col][k] /= p;
            inv[col][k] /= p;
        }

        for row in 0..n {
            if row == col {
                continue;
            }
            let factor = a[row][col];
            if factor == 0.0 {
                continue;
            }
            for k in 0..n {
                a[row][k] -= factor * a[col][k];
                inv[row][k] -= factor * inv[col][k];
            }
        }
    }
    Ok(inv)
}

pub fn multiply(a: &[Vec<f64>], b: &[Vec<f64>]) -> Result<Matrix, CalcError> {
    let inner = a.first().map(Vec::len).ok_or_else(|| CalcError::missing("matrix"))?;
    let cols = b.first().map(Vec::len).ok_or_else(|| CalcError::missing("matrix"))?;
    if a.iter().any(|r| r.len() != inner) || b.iter().any(|r| r.len() != cols) {
        return Err(CalcError::domain("ragged matrix"));
    }
    if inner != b.len() {
        return Err(CalcError::evaluation(format!(
            "cannot multiply {}x{} by {}x{}",
            a.len(),
            inner,
            b.len(),
            cols
        )));
    }
    Ok(a.iter()
        .map(|row| {
            (0..cols)
                .map(|j| row.iter().zip(b).map(|(x, brow)| x * brow[j]).sum())
                .collect()
        })
        .collect())
}

fn pivot_row(a: &[Vec<f64>], col: usize) -> usize {
    (col..a.len())
        .max_by(|&i, &j| a[i][col].abs().total_cmp(&a[j][col].abs()))
        .unwrap_or(col)
}
