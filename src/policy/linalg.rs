//! Dense symmetric positive-definite helpers for the per-action ridge models.
//!
//! Every `A` the policy produces is `lambda*I + sum(x*x^T)` with `lambda > 0`,
//! so Cholesky always applies.

use ndarray::{Array1, Array2, ArrayView1, Axis};

/// Pivot floor guarding against round-off on near-degenerate diagonals
const MIN_PIVOT: f64 = 1e-12;

/// Lower-triangular Cholesky factor `L` with `A = L*L^T`
#[derive(Debug, Clone)]
pub struct Cholesky {
    l: Array2<f64>,
}

impl Cholesky {
    pub fn factor(a: &Array2<f64>) -> Self {
        debug_assert_eq!(a.nrows(), a.ncols());
        let n = a.nrows();
        let mut l = Array2::<f64>::zeros((n, n));

        for i in 0..n {
            for j in 0..=i {
                let mut sum = a[[i, j]];
                for k in 0..j {
                    sum -= l[[i, k]] * l[[j, k]];
                }
                if i == j {
                    l[[i, i]] = sum.max(MIN_PIVOT).sqrt();
                } else {
                    l[[i, j]] = sum / l[[j, j]];
                }
            }
        }

        Self { l }
    }

    fn dim(&self) -> usize {
        self.l.nrows()
    }

    /// Solve `L*y = b`
    fn forward(&self, b: ArrayView1<f64>) -> Array1<f64> {
        let n = self.dim();
        let mut y = Array1::<f64>::zeros(n);
        for i in 0..n {
            let mut sum = b[i];
            for k in 0..i {
                sum -= self.l[[i, k]] * y[k];
            }
            y[i] = sum / self.l[[i, i]];
        }
        y
    }

    /// Solve `L^T*x = y`
    fn backward(&self, y: &Array1<f64>) -> Array1<f64> {
        let n = self.dim();
        let mut x = Array1::<f64>::zeros(n);
        for i in (0..n).rev() {
            let mut sum = y[i];
            for k in (i + 1)..n {
                sum -= self.l[[k, i]] * x[k];
            }
            x[i] = sum / self.l[[i, i]];
        }
        x
    }

    /// `A^-1 * b`
    pub fn solve(&self, b: ArrayView1<f64>) -> Array1<f64> {
        self.backward(&self.forward(b))
    }

    /// `x^T * A^-1 * x`, never negative
    pub fn inverse_quadratic_form(&self, x: ArrayView1<f64>) -> f64 {
        let y = self.forward(x);
        y.dot(&y)
    }

    /// Smallest diagonal entry of `L`; positive for any factored SPD matrix
    pub fn min_pivot(&self) -> f64 {
        self.l.diag().iter().copied().fold(f64::INFINITY, f64::min)
    }
}

/// `n*n` identity scaled by `lambda`
pub fn scaled_identity(n: usize, lambda: f64) -> Array2<f64> {
    Array2::<f64>::eye(n) * lambda
}

/// `A += x*x^T`
pub fn add_outer_product(a: &mut Array2<f64>, x: ArrayView1<f64>) {
    let column = x.insert_axis(Axis(1));
    let row = x.insert_axis(Axis(0));
    *a += &column.dot(&row);
}
