use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;

use crate::diagnostics::ConvergenceMonitor;
use crate::error::{PccaError, Result};
use crate::matrix::dense;
use crate::types::DenseMatrix;

use super::builder::PccaBuilder;
use super::report::FitReport;

/// Probabilistic canonical correlation analysis: a Gaussian factor model
/// with two observed blocks sharing one latent variable.
///
/// Generative model for the stacked observation x = [x1; x2] of one trial:
///
///   z ~ N(0, I_k),   x | z ~ N(W z, Psi),   Psi = blockdiag(Psi1, Psi2)
///
/// Trial-to-trial covariance across the two blocks is carried entirely by
/// the shared latent z; the noise of the two blocks is independent by
/// construction. Fitting alternates the closed-form E- and M-steps of
/// Ghahramani & Hinton (1996), with the block constraint on Psi applied at
/// every M-step.
///
/// The model does not center the data; callers pre-scale and pre-center as
/// needed.
pub struct Pcca {
    n_components: usize,
    max_iter: usize,
    regularization: f64,
    tolerance: f64,
    seed: u64,
    state: Option<FittedState>,
}

/// Parameters and cached training data for one fitted model.
struct FittedState {
    /// Loading matrix, (p1 + p2) x k. Rows [0, p1) belong to block 1.
    w: DenseMatrix,
    /// Noise covariance of block 1, p1 x p1.
    psi1: DenseMatrix,
    /// Noise covariance of block 2, p2 x p2.
    psi2: DenseMatrix,
    /// Stacked training data, (p1 + p2) x n; column i is trial i.
    x: DenseMatrix,
    n: usize,
    p1: usize,
    p2: usize,
}

/// Posterior latent statistics under a fixed (W, Psi), shared by the
/// E-step, `transform` and `reconstruct`.
struct Posterior {
    /// Posterior covariance of z given one observation, k x k. Identical
    /// across trials because the model is linear-Gaussian.
    m: DenseMatrix,
    /// Posterior mean latents, k x n.
    z: DenseMatrix,
    /// Marginal log-likelihood of the data under (W, Psi).
    log_likelihood: f64,
}

impl Pcca {
    /// Create a model with the given latent dimension, EM iteration cap and
    /// diagonal regularization. Equivalent to the builder with default
    /// tolerance and seed.
    pub fn new(n_components: usize, n_iters: usize, regularization: f64) -> Result<Self> {
        PccaBuilder::new()
            .components(n_components)
            .max_iterations(n_iters)
            .regularization(regularization)
            .build()
    }

    pub(super) fn from_builder(b: PccaBuilder) -> Self {
        Self {
            n_components: b.components,
            max_iter: b.max_iter,
            regularization: b.regularization,
            tolerance: b.tolerance,
            seed: b.seed,
            state: None,
        }
    }

    /// Fit the model via EM.
    ///
    /// `x1` and `x2` are (n_trials, p1) and (n_trials, p2) block matrices
    /// with matching row counts. Runs EM steps until the relative change in
    /// both the log-likelihood and the noise covariance falls below the
    /// tolerance, bounded by `max_iterations`. Initialization is
    /// deterministic given the configured seed.
    pub fn fit(&mut self, x1: &DenseMatrix, x2: &DenseMatrix) -> Result<FitReport> {
        let x = stack_blocks(x1, x2)?;
        let n = x1.nrows();
        let p1 = x1.ncols();
        let p2 = x2.ncols();
        let k = self.n_components;

        let non_identifiable = k > p1.min(p2);
        if non_identifiable {
            log::warn!(
                "latent dimension {} exceeds the smaller block width {}; loadings are not identifiable",
                k,
                p1.min(p2)
            );
        }

        // W from uniform [0, 1), Psi blocks at identity.
        let mut rng = StdRng::seed_from_u64(self.seed);
        let w = DenseMatrix::from_fn(p1 + p2, k, |_, _| rng.gen::<f64>());
        let mut state = FittedState {
            w,
            psi1: DenseMatrix::identity(p1, p1),
            psi2: DenseMatrix::identity(p2, p2),
            x,
            n,
            p1,
            p2,
        };

        let mut monitor = ConvergenceMonitor::new(self.tolerance, self.max_iter);
        while !monitor.max_reached() {
            let post = posterior(&state.w, &state.psi1, &state.psi2, &state.x)?;
            let change = self.m_step(&mut state, &post)?;
            monitor.record(post.log_likelihood, change);
            if monitor.is_converged() {
                break;
            }
        }

        let final_post = posterior(&state.w, &state.psi1, &state.psi2, &state.x)?;
        let report = FitReport {
            n_components: k,
            n_trials: n,
            p1,
            p2,
            n_iterations: monitor.n_iterations(),
            converged: monitor.is_converged(),
            log_likelihood: final_post.log_likelihood,
            final_change: monitor.last_change().unwrap_or(f64::INFINITY),
            non_identifiable,
            history: monitor.into_history(),
        };
        self.state = Some(state);
        Ok(report)
    }

    /// One closed-form M-step. Returns the relative Frobenius change of the
    /// noise covariance blocks, which drives the convergence check.
    fn m_step(&self, state: &mut FittedState, post: &Posterior) -> Result<f64> {
        let nf = state.n as f64;

        // E[zz'] summed over trials; the n*M term carries the posterior
        // uncertainty beyond the point estimates.
        let ezz = &post.z * post.z.transpose() + post.m.scale(nf);
        let ezz_inv = dense::inverse_spd(&ezz, "E[zz']")?;
        let w_new = (&state.x * post.z.transpose()) * ezz_inv;

        let residual = &state.x - &w_new * &post.z;
        let r1 = residual.rows(0, state.p1).into_owned();
        let r2 = residual.rows(state.p1, state.p2).into_owned();

        let psi1_new = (&r1 * r1.transpose()).scale(1.0 / nf)
            + DenseMatrix::from_diagonal_element(state.p1, state.p1, self.regularization);
        let psi2_new = (&r2 * r2.transpose()).scale(1.0 / nf)
            + DenseMatrix::from_diagonal_element(state.p2, state.p2, self.regularization);

        let diff = ((&psi1_new - &state.psi1).norm_squared()
            + (&psi2_new - &state.psi2).norm_squared())
        .sqrt();
        let norm = (state.psi1.norm_squared() + state.psi2.norm_squared())
            .sqrt()
            .max(1e-10);
        let change = diff / norm;

        state.w = w_new;
        state.psi1 = psi1_new;
        state.psi2 = psi2_new;
        Ok(change)
    }

    /// Embed data under the fitted model: the posterior mean of the latent
    /// variable for each trial, returned as (n_trials, n_components).
    ///
    /// Deterministic given fitted parameters; calling twice on the same
    /// input yields identical output.
    pub fn transform(&self, x1: &DenseMatrix, x2: &DenseMatrix) -> Result<DenseMatrix> {
        let state = self.fitted("transform")?;
        state.check_block_widths(x1, x2)?;
        let x = stack_blocks(x1, x2)?;
        let post = posterior(&state.w, &state.psi1, &state.psi2, &x)?;
        Ok(post.z.transpose())
    }

    /// Fit, then embed the same data.
    pub fn fit_transform(&mut self, x1: &DenseMatrix, x2: &DenseMatrix) -> Result<DenseMatrix> {
        self.fit(x1, x2)?;
        self.transform(x1, x2)
    }

    /// Noisy reconstructions of the training trials: the posterior-mean
    /// latent of each cached trial mapped through W, plus Gaussian noise
    /// drawn from the fitted Psi. Always returns exactly (n_trials, p1) and
    /// (n_trials, p2) — this is a diagnostic tied to the training data, not
    /// a draw from the generative prior; see [`Pcca::sample`] for that.
    pub fn reconstruct(&self, seed: u64) -> Result<(DenseMatrix, DenseMatrix)> {
        let state = self.fitted("reconstruct")?;
        let post = posterior(&state.w, &state.psi1, &state.psi2, &state.x)?;
        let mean = &state.w * &post.z;
        let mut rng = StdRng::seed_from_u64(seed);
        state.add_block_noise(&mean, &mut rng)
    }

    /// Draw fresh trials from the fitted generative model: `n_samples`
    /// latents from N(0, I_k), forward-mapped through W with Psi noise.
    /// `None` defaults to the training trial count.
    pub fn sample(
        &self,
        n_samples: Option<usize>,
        seed: u64,
    ) -> Result<(DenseMatrix, DenseMatrix)> {
        let state = self.fitted("sample")?;
        let n = n_samples.unwrap_or(state.n);
        if n == 0 {
            return Err(PccaError::InvalidParameter(
                "n_samples must be at least 1".into(),
            ));
        }
        let mut rng = StdRng::seed_from_u64(seed);
        let z = DenseMatrix::from_fn(self.n_components, n, |_, _| {
            rng.sample::<f64, _>(StandardNormal)
        });
        let mean = &state.w * &z;
        state.add_block_noise(&mean, &mut rng)
    }

    pub fn is_fitted(&self) -> bool {
        self.state.is_some()
    }

    pub fn n_components(&self) -> usize {
        self.n_components
    }

    /// Fitted loading matrix, (p1 + p2) x k.
    pub fn loadings(&self) -> Option<&DenseMatrix> {
        self.state.as_ref().map(|s| &s.w)
    }

    /// Fitted noise covariance blocks (Psi1, Psi2).
    pub fn noise_cov_blocks(&self) -> Option<(&DenseMatrix, &DenseMatrix)> {
        self.state.as_ref().map(|s| (&s.psi1, &s.psi2))
    }

    /// Full (p1 + p2) square noise covariance, assembled block-diagonally.
    pub fn noise_cov(&self) -> Option<DenseMatrix> {
        let s = self.state.as_ref()?;
        let p = s.p1 + s.p2;
        let mut psi = DenseMatrix::zeros(p, p);
        psi.view_mut((0, 0), (s.p1, s.p1)).copy_from(&s.psi1);
        psi.view_mut((s.p1, s.p1), (s.p2, s.p2)).copy_from(&s.psi2);
        Some(psi)
    }

    pub fn n_trials(&self) -> Option<usize> {
        self.state.as_ref().map(|s| s.n)
    }

    /// Feature widths (p1, p2) of the fitted blocks.
    pub fn block_dims(&self) -> Option<(usize, usize)> {
        self.state.as_ref().map(|s| (s.p1, s.p2))
    }

    fn fitted(&self, operation: &str) -> Result<&FittedState> {
        self.state.as_ref().ok_or_else(|| PccaError::NotFitted {
            operation: operation.to_string(),
        })
    }
}

impl FittedState {
    fn check_block_widths(&self, x1: &DenseMatrix, x2: &DenseMatrix) -> Result<()> {
        if x1.ncols() != self.p1 {
            return Err(PccaError::DimensionMismatch {
                expected: self.p1,
                got: x1.ncols(),
                context: "block 1 feature count".into(),
            });
        }
        if x2.ncols() != self.p2 {
            return Err(PccaError::DimensionMismatch {
                expected: self.p2,
                got: x2.ncols(),
                context: "block 2 feature count".into(),
            });
        }
        Ok(())
    }

    /// Add per-trial Gaussian noise from the fitted Psi to stacked trial
    /// means, and split the result back into (n, p1) / (n, p2) blocks.
    fn add_block_noise(
        &self,
        mean: &DenseMatrix,
        rng: &mut StdRng,
    ) -> Result<(DenseMatrix, DenseMatrix)> {
        let n = mean.ncols();
        let l1 = dense::cholesky_lower(&self.psi1).ok_or_else(|| {
            PccaError::NumericalInstability {
                context: "Psi1".into(),
            }
        })?;
        let l2 = dense::cholesky_lower(&self.psi2).ok_or_else(|| {
            PccaError::NumericalInstability {
                context: "Psi2".into(),
            }
        })?;

        let e1 = DenseMatrix::from_fn(self.p1, n, |_, _| rng.sample::<f64, _>(StandardNormal));
        let e2 = DenseMatrix::from_fn(self.p2, n, |_, _| rng.sample::<f64, _>(StandardNormal));

        let x1 = (mean.rows(0, self.p1).into_owned() + l1 * e1).transpose();
        let x2 = (mean.rows(self.p1, self.p2).into_owned() + l2 * e2).transpose();
        Ok((x1, x2))
    }
}

/// Posterior latent statistics and marginal log-likelihood under (W, Psi).
///
/// With Psi_inv applied blockwise:
///   M = (I_k + W' Psi^{-1} W)^{-1}
///   Z = M W' Psi^{-1} X
/// The log-likelihood uses the matrix determinant lemma and Woodbury, so no
/// (p1 + p2)-dimensional inversion ever happens:
///   log|Sigma| = log|Psi1| + log|Psi2| + log|I_k + W' Psi^{-1} W|
///   tr(X' Sigma^{-1} X) = tr(X' Psi^{-1} X) - tr(B' M B),  B = W' Psi^{-1} X
fn posterior(
    w: &DenseMatrix,
    psi1: &DenseMatrix,
    psi2: &DenseMatrix,
    x: &DenseMatrix,
) -> Result<Posterior> {
    let p1 = psi1.nrows();
    let p2 = psi2.nrows();
    let k = w.ncols();
    let n = x.ncols();

    let psi1_inv = dense::inverse_spd(psi1, "Psi1")?;
    let psi2_inv = dense::inverse_spd(psi2, "Psi2")?;

    let w1 = w.rows(0, p1).into_owned();
    let w2 = w.rows(p1, p2).into_owned();
    let x1 = x.rows(0, p1).into_owned();
    let x2 = x.rows(p1, p2).into_owned();

    let a1 = &psi1_inv * &w1;
    let a2 = &psi2_inv * &w2;

    let precision =
        DenseMatrix::identity(k, k) + w1.transpose() * &a1 + w2.transpose() * &a2;
    let m = dense::inverse_spd(&precision, "I + W'Psi^{-1}W")?;

    let b = a1.transpose() * &x1 + a2.transpose() * &x2;
    let z = &m * &b;

    let log_det_sigma = dense::log_determinant_spd(psi1, "Psi1")?
        + dense::log_determinant_spd(psi2, "Psi2")?
        + dense::log_determinant_spd(&precision, "I + W'Psi^{-1}W")?;

    let px1 = &psi1_inv * &x1;
    let px2 = &psi2_inv * &x2;
    let trace_term = x1.dot(&px1) + x2.dot(&px2) - b.dot(&z);

    let pf = (p1 + p2) as f64;
    let nf = n as f64;
    let log_likelihood = -0.5
        * (nf * pf * (2.0 * std::f64::consts::PI).ln() + nf * log_det_sigma + trace_term);

    Ok(Posterior {
        m,
        z,
        log_likelihood,
    })
}

/// Validate two block matrices and stack their transposes into the combined
/// (p1 + p2) x n observation matrix; column i is the joint trial i.
fn stack_blocks(x1: &DenseMatrix, x2: &DenseMatrix) -> Result<DenseMatrix> {
    if x1.nrows() != x2.nrows() {
        return Err(PccaError::DimensionMismatch {
            expected: x1.nrows(),
            got: x2.nrows(),
            context: "trial counts of block 1 and block 2".into(),
        });
    }
    if x1.nrows() == 0 {
        return Err(PccaError::Data("blocks contain no trials".into()));
    }
    if x1.ncols() == 0 || x2.ncols() == 0 {
        return Err(PccaError::Data(
            "each block needs at least one feature column".into(),
        ));
    }
    for (name, m) in [("block 1", x1), ("block 2", x2)] {
        if m.iter().any(|v| !v.is_finite()) {
            return Err(PccaError::NonFiniteData {
                context: name.to_string(),
            });
        }
    }

    let n = x1.nrows();
    let p1 = x1.ncols();
    let p2 = x2.ncols();
    Ok(DenseMatrix::from_fn(p1 + p2, n, |r, c| {
        if r < p1 {
            x1[(c, r)]
        } else {
            x2[(c, r - p1)]
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn small_blocks() -> (DenseMatrix, DenseMatrix) {
        let x1 = DenseMatrix::from_row_slice(
            4,
            2,
            &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0],
        );
        let x2 = DenseMatrix::from_row_slice(
            4,
            3,
            &[
                0.5, 1.5, 2.5, 3.5, 4.5, 5.5, 6.5, 7.5, 8.5, 9.5, 10.5, 11.5,
            ],
        );
        (x1, x2)
    }

    #[test]
    fn test_stack_blocks_layout() {
        let (x1, x2) = small_blocks();
        let x = stack_blocks(&x1, &x2).unwrap();
        assert_eq!(x.shape(), (5, 4));
        // Column i is trial i: block 1 features on top.
        assert_relative_eq!(x[(0, 0)], x1[(0, 0)]);
        assert_relative_eq!(x[(1, 2)], x1[(2, 1)]);
        assert_relative_eq!(x[(2, 0)], x2[(0, 0)]);
        assert_relative_eq!(x[(4, 3)], x2[(3, 2)]);
    }

    #[test]
    fn test_stack_blocks_row_mismatch() {
        let x1 = DenseMatrix::zeros(4, 2);
        let x2 = DenseMatrix::zeros(3, 2);
        match stack_blocks(&x1, &x2).unwrap_err() {
            PccaError::DimensionMismatch { expected, got, .. } => {
                assert_eq!(expected, 4);
                assert_eq!(got, 3);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_stack_blocks_rejects_nan() {
        let (x1, mut x2) = small_blocks();
        x2[(1, 1)] = f64::NAN;
        assert!(matches!(
            stack_blocks(&x1, &x2),
            Err(PccaError::NonFiniteData { .. })
        ));
    }

    #[test]
    fn test_transform_before_fit_errors() {
        let (x1, x2) = small_blocks();
        let model = Pcca::new(2, 10, 0.1).unwrap();
        match model.transform(&x1, &x2).unwrap_err() {
            PccaError::NotFitted { operation } => assert_eq!(operation, "transform"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_sample_before_fit_errors() {
        let model = Pcca::new(2, 10, 0.1).unwrap();
        assert!(matches!(
            model.sample(Some(5), 0),
            Err(PccaError::NotFitted { .. })
        ));
        assert!(matches!(
            model.reconstruct(0),
            Err(PccaError::NotFitted { .. })
        ));
    }

    #[test]
    fn test_fit_transform_shapes() {
        let (x1, x2) = small_blocks();
        let mut model = Pcca::new(2, 20, 0.5).unwrap();
        let embedding = model.fit_transform(&x1, &x2).unwrap();
        assert_eq!(embedding.shape(), (4, 2));
        assert!(embedding.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_transform_wrong_width_errors() {
        let (x1, x2) = small_blocks();
        let mut model = Pcca::new(1, 5, 0.5).unwrap();
        model.fit(&x1, &x2).unwrap();
        let narrow = DenseMatrix::zeros(4, 1);
        match model.transform(&narrow, &x2).unwrap_err() {
            PccaError::DimensionMismatch {
                expected, got, ..
            } => {
                assert_eq!(expected, 2);
                assert_eq!(got, 1);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_sample_count_is_honored() {
        let (x1, x2) = small_blocks();
        let mut model = Pcca::new(2, 10, 0.5).unwrap();
        model.fit(&x1, &x2).unwrap();

        let (s1, s2) = model.sample(Some(7), 99).unwrap();
        assert_eq!(s1.shape(), (7, 2));
        assert_eq!(s2.shape(), (7, 3));

        // Default matches the training trial count.
        let (d1, d2) = model.sample(None, 99).unwrap();
        assert_eq!(d1.nrows(), 4);
        assert_eq!(d2.nrows(), 4);
    }

    #[test]
    fn test_sample_zero_errors() {
        let (x1, x2) = small_blocks();
        let mut model = Pcca::new(2, 10, 0.5).unwrap();
        model.fit(&x1, &x2).unwrap();
        assert!(matches!(
            model.sample(Some(0), 0),
            Err(PccaError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_noise_cov_is_block_diagonal() {
        let (x1, x2) = small_blocks();
        let mut model = Pcca::new(1, 10, 0.5).unwrap();
        model.fit(&x1, &x2).unwrap();
        let psi = model.noise_cov().unwrap();
        assert_eq!(psi.shape(), (5, 5));
        for i in 0..2 {
            for j in 2..5 {
                assert_relative_eq!(psi[(i, j)], 0.0);
                assert_relative_eq!(psi[(j, i)], 0.0);
            }
        }
    }

    #[test]
    fn test_accessors_after_fit() {
        let (x1, x2) = small_blocks();
        let mut model = Pcca::new(2, 10, 0.5).unwrap();
        assert!(model.loadings().is_none());
        model.fit(&x1, &x2).unwrap();
        assert!(model.is_fitted());
        assert_eq!(model.loadings().unwrap().shape(), (5, 2));
        assert_eq!(model.n_trials(), Some(4));
        assert_eq!(model.block_dims(), Some((2, 3)));
        let (psi1, psi2) = model.noise_cov_blocks().unwrap();
        assert_eq!(psi1.shape(), (2, 2));
        assert_eq!(psi2.shape(), (3, 3));
    }

    #[test]
    fn test_unregularized_singular_fit_surfaces_error() {
        // A feature that never fires and no regularization: the first
        // M-step leaves an exact zero on the Psi1 diagonal, so the next
        // inversion must fail loudly instead of propagating NaNs.
        let x1 = DenseMatrix::from_row_slice(
            4,
            2,
            &[0.0, 1.0, 0.0, 2.0, 0.0, 3.0, 0.0, 4.0],
        );
        let x2 = DenseMatrix::from_row_slice(
            4,
            2,
            &[1.0, 2.0, 2.0, 1.0, 3.0, 2.0, 4.0, 1.0],
        );
        let mut model = PccaBuilder::new()
            .components(1)
            .max_iterations(5)
            .regularization(0.0)
            .tolerance(0.0)
            .build()
            .unwrap();
        match model.fit(&x1, &x2) {
            Err(PccaError::NumericalInstability { .. }) => {}
            other => panic!("expected numerical instability, got {other:?}"),
        }
    }
}
