use anyhow::{anyhow, Result};
use faer::{prelude::*, solvers::PartialPivLu, Mat};

/// Trait for solving dense linear systems (Ax = b).
///
/// The proportional allocator builds a small square system per repair
/// iteration and hands it to a backend. Implementations must report a
/// singular (or numerically useless) system as an error instead of
/// returning non-finite values.
pub trait LinearSystemBackend: Send + Sync {
    /// Solve the linear system Ax = b
    fn solve(&self, matrix: &[Vec<f64>], rhs: &[f64]) -> Result<Vec<f64>>;
}

fn check_shape(matrix: &[Vec<f64>], rhs: &[f64]) -> Result<usize> {
    let n = matrix.len();
    if rhs.len() != n {
        return Err(anyhow!(
            "rhs length ({}) does not match matrix dimension {}",
            rhs.len(),
            n
        ));
    }
    if matrix.iter().any(|row| row.len() != n) {
        return Err(anyhow!("matrix must be square"));
    }
    Ok(n)
}

/// Dense LU decomposition with partial pivoting (faer).
///
/// faer does not flag singular pivots, so the solution is checked after the
/// fact: non-finite entries or a residual `‖Ax − b‖∞` above
/// `residual_tolerance · max(1, ‖b‖∞)` are treated as a singular system.
#[derive(Debug, Clone)]
pub struct LuSolver {
    pub residual_tolerance: f64,
}

impl Default for LuSolver {
    fn default() -> Self {
        Self {
            residual_tolerance: 1e-6,
        }
    }
}

impl LuSolver {
    pub fn with_residual_tolerance(residual_tolerance: f64) -> Self {
        Self { residual_tolerance }
    }
}

impl LinearSystemBackend for LuSolver {
    fn solve(&self, matrix: &[Vec<f64>], rhs: &[f64]) -> Result<Vec<f64>> {
        let n = check_shape(matrix, rhs)?;
        if n == 0 {
            return Ok(Vec::new());
        }

        let mat = Mat::from_fn(n, n, |i, j| matrix[i][j]);
        let rhs_mat = Mat::from_fn(n, 1, |i, _| rhs[i]);
        let lu = PartialPivLu::new(mat.as_ref());
        let sol = lu.solve(&rhs_mat);

        let mut solution = Vec::with_capacity(n);
        for i in 0..n {
            solution.push(sol.read(i, 0));
        }

        if solution.iter().any(|v| !v.is_finite()) {
            return Err(anyhow!("singular matrix (non-finite solution)"));
        }

        let scale = rhs.iter().fold(1.0_f64, |acc, b| acc.max(b.abs()));
        let residual = matrix
            .iter()
            .zip(rhs)
            .map(|(row, b)| {
                let ax: f64 = row.iter().zip(&solution).map(|(a, x)| a * x).sum();
                (ax - b).abs()
            })
            .fold(0.0_f64, f64::max);
        if residual > self.residual_tolerance * scale {
            return Err(anyhow!(
                "singular matrix (residual {:.3e} exceeds {:.3e})",
                residual,
                self.residual_tolerance * scale
            ));
        }

        Ok(solution)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lu_solves_diagonal_system() {
        let matrix = vec![vec![2.0, 0.0], vec![0.0, 3.0]];
        let rhs = vec![4.0, 6.0];

        let x = LuSolver::default().solve(&matrix, &rhs).unwrap();
        assert!((x[0] - 2.0).abs() < 1e-12);
        assert!((x[1] - 2.0).abs() < 1e-12);
    }

    #[test]
    fn lu_solves_proportionality_system() {
        // 0.8·x0 − 0.5·x1 = 0, x0 + x1 = 1300
        let matrix = vec![vec![0.8, -0.5], vec![1.0, 1.0]];
        let rhs = vec![0.0, 1300.0];

        let x = LuSolver::default().solve(&matrix, &rhs).unwrap();
        assert!((x[0] - 500.0).abs() < 1e-9);
        assert!((x[1] - 800.0).abs() < 1e-9);
    }

    #[test]
    fn lu_rejects_singular_matrix() {
        let matrix = vec![vec![0.0, 0.0], vec![1.0, 1.0]];
        let rhs = vec![0.0, 10.0];
        assert!(LuSolver::default().solve(&matrix, &rhs).is_err());
    }

    #[test]
    fn lu_rejects_shape_mismatch() {
        let matrix = vec![vec![1.0, 0.0], vec![0.0, 1.0]];
        assert!(LuSolver::default().solve(&matrix, &[1.0]).is_err());
        assert!(LuSolver::default()
            .solve(&[vec![1.0, 0.0], vec![1.0]], &[1.0, 1.0])
            .is_err());
    }

    #[test]
    fn lu_empty_system_is_empty() {
        assert!(LuSolver::default().solve(&[], &[]).unwrap().is_empty());
    }
}
