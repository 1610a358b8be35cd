//! # Factor Diffusers
//!
//! Marginal diffusion processes for the two factors of SE(3): rotations on SO(3)
//! and translations in ℝ³. The orchestrator only talks to them through the
//! [`RotationDiffuser`] and [`TranslationDiffuser`] traits, so alternative noise
//! schedules can be plugged in without touching the orchestration logic.
//!
//! - **Rotations** ([`so3`]) - IGSO(3) Brownian motion with a cached inverse-CDF sampler
//!   and score table ([`igso3`] holds the series expansions).
//! - **Translations** ([`r3`]) - variance-preserving SDE with an affine coordinate rescaling.
//!
//! All rotation states and scores are rotation vectors; all translation scores are
//! expressed in the translation diffuser's working (scaled) coordinates.

pub mod igso3;
pub mod r3;
pub mod so3;

use crate::core::batch::{Batch, ShapeError};
use nalgebra::Vector3;
use rand::Rng;
use rand_distr::{Distribution, StandardNormal};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ScheduleError {
    #[error("Invalid value for '{name}': {reason}")]
    InvalidParameter { name: &'static str, reason: String },
}

/// Contract for a diffusion process on SO(3) over rotation vectors.
pub trait RotationDiffuser {
    /// Samples `x_t` given `x_0` and returns it with the score of the sampled perturbation.
    fn forward_marginal<R: Rng + ?Sized>(
        &self,
        rot_0: &Batch<Vector3<f64>>,
        t: f64,
        rng: &mut R,
    ) -> (Batch<Vector3<f64>>, Batch<Vector3<f64>>);

    /// Closed-form score of `rot_t` given both endpoints.
    fn score(
        &self,
        rot_t: &Batch<Vector3<f64>>,
        rot_0: &Batch<Vector3<f64>>,
        t: f64,
    ) -> Result<Batch<Vector3<f64>>, ShapeError>;

    /// Score of an already-formed relative rotation `R_t · R_0⁻¹`, given as a rotation vector.
    fn score_rotvec(&self, rotvec: &Batch<Vector3<f64>>, t: f64) -> Batch<Vector3<f64>>;

    fn score_scaling(&self, t: f64) -> f64;

    fn reverse<R: Rng + ?Sized>(
        &self,
        rot_t: &Batch<Vector3<f64>>,
        score_t: &Batch<Vector3<f64>>,
        t: f64,
        dt: f64,
        noise_scale: f64,
        rng: &mut R,
    ) -> Result<Batch<Vector3<f64>>, ShapeError>;

    fn sample_ref<R: Rng + ?Sized>(
        &self,
        n_samples: usize,
        seq_len: Option<usize>,
        rng: &mut R,
    ) -> Batch<Vector3<f64>>;
}

/// Contract for a diffusion process on ℝ³.
///
/// States passed in and returned are in the caller's coordinates; scores and
/// reference samples live in the working coordinates produced by [`TranslationDiffuser::scale`].
pub trait TranslationDiffuser {
    fn scale(&self, x: &Batch<Vector3<f64>>) -> Batch<Vector3<f64>>;

    fn unscale(&self, x: &Batch<Vector3<f64>>) -> Batch<Vector3<f64>>;

    fn forward_marginal<R: Rng + ?Sized>(
        &self,
        x_0: &Batch<Vector3<f64>>,
        t: f64,
        rng: &mut R,
    ) -> (Batch<Vector3<f64>>, Batch<Vector3<f64>>);

    /// Closed-form score of `x_t` given `x_0`; both are rescaled before scoring.
    fn score(
        &self,
        x_t: &Batch<Vector3<f64>>,
        x_0: &Batch<Vector3<f64>>,
        t: f64,
    ) -> Result<Batch<Vector3<f64>>, ShapeError>;

    /// Same as [`TranslationDiffuser::score`] for inputs already in working coordinates.
    fn score_working(
        &self,
        x_t: &Batch<Vector3<f64>>,
        x_0: &Batch<Vector3<f64>>,
        t: f64,
    ) -> Result<Batch<Vector3<f64>>, ShapeError>;

    fn score_scaling(&self, t: f64) -> f64;

    #[allow(clippy::too_many_arguments)]
    fn reverse<R: Rng + ?Sized>(
        &self,
        x_t: &Batch<Vector3<f64>>,
        score_t: &Batch<Vector3<f64>>,
        t: f64,
        dt: f64,
        center: bool,
        noise_scale: f64,
        rng: &mut R,
    ) -> Result<Batch<Vector3<f64>>, ShapeError>;

    /// Reference samples in working coordinates.
    fn sample_ref<R: Rng + ?Sized>(
        &self,
        n_samples: usize,
        seq_len: Option<usize>,
        rng: &mut R,
    ) -> Batch<Vector3<f64>>;

    /// Posterior mean of `x_0` given `x_t` and its score.
    fn calc_trans_0(
        &self,
        score_t: &Batch<Vector3<f64>>,
        x_t: &Batch<Vector3<f64>>,
        t: f64,
    ) -> Result<Batch<Vector3<f64>>, ShapeError>;

    /// Mean (working coordinates) and standard deviation of the Gaussian reverse transition.
    fn distribution(
        &self,
        x_t: &Batch<Vector3<f64>>,
        score_t: &Batch<Vector3<f64>>,
        t: f64,
        dt: f64,
        mask: Option<&Batch<f64>>,
    ) -> Result<(Batch<Vector3<f64>>, f64), ShapeError>;
}

pub(crate) fn reference_shape(n_samples: usize, seq_len: Option<usize>) -> Vec<usize> {
    match seq_len {
        Some(len) => vec![n_samples, len],
        None => vec![n_samples],
    }
}

pub(crate) fn standard_normal_vector<R: Rng + ?Sized>(rng: &mut R) -> Vector3<f64> {
    let x: f64 = StandardNormal.sample(rng);
    let y: f64 = StandardNormal.sample(rng);
    let z: f64 = StandardNormal.sample(rng);
    Vector3::new(x, y, z)
}

pub(crate) fn standard_normal_batch<R: Rng + ?Sized>(
    shape: Vec<usize>,
    rng: &mut R,
) -> Batch<Vector3<f64>> {
    Batch::from_fn(shape, |_| standard_normal_vector(rng))
}

pub(crate) fn require_positive(name: &'static str, value: f64) -> Result<(), ScheduleError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ScheduleError::InvalidParameter {
            name,
            reason: format!("must be a positive finite number, got {}", value),
        })
    }
}
