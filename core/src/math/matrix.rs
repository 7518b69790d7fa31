use nalgebra::{DMatrix, DVector};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};

pub struct MatrixHelper;

impl MatrixHelper {
    pub fn multiply(lhs: ArrayView2<f64>, rhs: ArrayView2<f64>) -> Array2<f64> {
        lhs.dot(&rhs)
    }

    /// `JᵀJ` for a Jacobian with one row per observation.
    pub fn gram(jacobian: ArrayView2<f64>) -> Array2<f64> {
        Self::multiply(jacobian.t(), jacobian)
    }

    /// `Jᵀr` for a Jacobian and a residual vector.
    pub fn project(jacobian: ArrayView2<f64>, residual: ArrayView1<f64>) -> Array1<f64> {
        jacobian.t().dot(&residual)
    }

    /// Solves the square system `a·x = b` through an LU decomposition.
    ///
    /// Returns `None` for singular or non-finite systems.
    pub fn solve(a: ArrayView2<f64>, b: ArrayView1<f64>) -> Option<Array1<f64>> {
        let n = b.len();
        if a.nrows() != n || a.ncols() != n {
            return None;
        }
        if a.iter().chain(b.iter()).any(|v| !v.is_finite()) {
            return None;
        }

        let lhs = DMatrix::from_fn(n, n, |row, col| a[[row, col]]);
        let rhs = DVector::from_iterator(n, b.iter().copied());
        let x = lhs.lu().solve(&rhs)?;

        if x.iter().all(|v| v.is_finite()) {
            Some(Array1::from_iter(x.iter().copied()))
        } else {
            None
        }
    }
}
