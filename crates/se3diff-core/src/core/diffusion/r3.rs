use super::{
    ScheduleError, TranslationDiffuser, reference_shape, require_positive, standard_normal_batch,
    standard_normal_vector,
};
use crate::core::batch::{Batch, ShapeError};
use nalgebra::Vector3;
use ndarray::Axis;
use rand::Rng;
use serde::Deserialize;

// Floor on the conditional variance so that t = 0 yields finite scores.
const MIN_CONDITIONAL_VARIANCE: f64 = 1e-12;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct R3Config {
    pub min_b: f64,
    pub max_b: f64,
    pub coordinate_scaling: f64,
}

impl Default for R3Config {
    fn default() -> Self {
        Self {
            min_b: 0.1,
            max_b: 20.0,
            coordinate_scaling: 0.1,
        }
    }
}

impl R3Config {
    pub fn validate(&self) -> Result<(), ScheduleError> {
        require_positive("r3.min-b", self.min_b)?;
        require_positive("r3.max-b", self.max_b)?;
        require_positive("r3.coordinate-scaling", self.coordinate_scaling)?;
        if self.max_b < self.min_b {
            return Err(ScheduleError::InvalidParameter {
                name: "r3.max-b",
                reason: format!("must not be below min-b ({} < {})", self.max_b, self.min_b),
            });
        }
        Ok(())
    }
}

/// Variance-preserving SDE on ℝ³ with a linear `b(t)` schedule.
#[derive(Debug, Clone)]
pub struct R3Diffuser {
    config: R3Config,
}

impl R3Diffuser {
    pub fn new(config: R3Config) -> Result<Self, ScheduleError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &R3Config {
        &self.config
    }

    pub fn b_t(&self, t: f64) -> f64 {
        self.config.min_b + t * (self.config.max_b - self.config.min_b)
    }

    pub fn diffusion_coef(&self, t: f64) -> f64 {
        self.b_t(t).sqrt()
    }

    pub fn drift_coef(&self, x: &Vector3<f64>, t: f64) -> Vector3<f64> {
        x * (-0.5 * self.b_t(t))
    }

    /// Integrated schedule `β(t) = ∫₀ᵗ b(s) ds`.
    pub fn marginal_b_t(&self, t: f64) -> f64 {
        t * self.config.min_b + 0.5 * t * t * (self.config.max_b - self.config.min_b)
    }

    pub fn conditional_var(&self, t: f64) -> f64 {
        (1.0 - (-self.marginal_b_t(t)).exp()).max(MIN_CONDITIONAL_VARIANCE)
    }

    fn mean_coef(&self, t: f64) -> f64 {
        (-0.5 * self.marginal_b_t(t)).exp()
    }
}

/// Subtracts the mean over the last leading axis from every lane along it.
fn center_last_axis(x: Batch<Vector3<f64>>) -> Batch<Vector3<f64>> {
    let mut data = x.into_array();
    match data.ndim() {
        0 => data.fill(Vector3::zeros()),
        ndim => {
            for mut lane in data.lanes_mut(Axis(ndim - 1)) {
                let com = lane.iter().sum::<Vector3<f64>>() / lane.len() as f64;
                lane.map_inplace(|v| *v -= com);
            }
        }
    }
    Batch::from_array(data)
}

impl TranslationDiffuser for R3Diffuser {
    fn scale(&self, x: &Batch<Vector3<f64>>) -> Batch<Vector3<f64>> {
        let s = self.config.coordinate_scaling;
        x.map(|v| v * s)
    }

    fn unscale(&self, x: &Batch<Vector3<f64>>) -> Batch<Vector3<f64>> {
        let s = self.config.coordinate_scaling;
        x.map(|v| v / s)
    }

    fn forward_marginal<R: Rng + ?Sized>(
        &self,
        x_0: &Batch<Vector3<f64>>,
        t: f64,
        rng: &mut R,
    ) -> (Batch<Vector3<f64>>, Batch<Vector3<f64>>) {
        let x_0 = self.scale(x_0);
        let mean_coef = self.mean_coef(t);
        let std = self.conditional_var(t).sqrt();

        // x_t = c·x_0 + std·z, whose score is -z / std.
        let drawn = x_0.map(|v| {
            let z = standard_normal_vector(rng);
            (v * mean_coef + z * std, -z / std)
        });
        let x_t = drawn.map(|(x, _)| *x);
        let score = drawn.map(|(_, s)| *s);
        (self.unscale(&x_t), score)
    }

    fn score(
        &self,
        x_t: &Batch<Vector3<f64>>,
        x_0: &Batch<Vector3<f64>>,
        t: f64,
    ) -> Result<Batch<Vector3<f64>>, ShapeError> {
        self.score_working(&self.scale(x_t), &self.scale(x_0), t)
    }

    fn score_working(
        &self,
        x_t: &Batch<Vector3<f64>>,
        x_0: &Batch<Vector3<f64>>,
        t: f64,
    ) -> Result<Batch<Vector3<f64>>, ShapeError> {
        let mean_coef = self.mean_coef(t);
        let var = self.conditional_var(t);
        x_t.try_zip_map(x_0, |xt, x0| -(xt - x0 * mean_coef) / var)
    }

    fn score_scaling(&self, t: f64) -> f64 {
        1.0 / self.conditional_var(t).sqrt()
    }

    fn reverse<R: Rng + ?Sized>(
        &self,
        x_t: &Batch<Vector3<f64>>,
        score_t: &Batch<Vector3<f64>>,
        t: f64,
        dt: f64,
        center: bool,
        noise_scale: f64,
        rng: &mut R,
    ) -> Result<Batch<Vector3<f64>>, ShapeError> {
        x_t.ensure_same_shape(score_t)?;
        let x_t = self.scale(x_t);
        let b = self.b_t(t);
        let g_t = b.sqrt();

        let x_prev = x_t.try_zip_map(score_t, |x, s| {
            let z = standard_normal_vector(rng) * noise_scale;
            let f_t = self.drift_coef(x, t);
            let perturb = (f_t - s * (g_t * g_t)) * dt + z * (g_t * dt.sqrt());
            x - perturb
        })?;
        let x_prev = if center {
            center_last_axis(x_prev)
        } else {
            x_prev
        };
        Ok(self.unscale(&x_prev))
    }

    fn sample_ref<R: Rng + ?Sized>(
        &self,
        n_samples: usize,
        seq_len: Option<usize>,
        rng: &mut R,
    ) -> Batch<Vector3<f64>> {
        standard_normal_batch(reference_shape(n_samples, seq_len), rng)
    }

    fn calc_trans_0(
        &self,
        score_t: &Batch<Vector3<f64>>,
        x_t: &Batch<Vector3<f64>>,
        t: f64,
    ) -> Result<Batch<Vector3<f64>>, ShapeError> {
        let var = self.conditional_var(t);
        let mean_coef = self.mean_coef(t);
        let x_0 = self
            .scale(x_t)
            .try_zip_map(score_t, |x, s| (s * var + x) / mean_coef)?;
        Ok(self.unscale(&x_0))
    }

    fn distribution(
        &self,
        x_t: &Batch<Vector3<f64>>,
        score_t: &Batch<Vector3<f64>>,
        t: f64,
        dt: f64,
        mask: Option<&Batch<f64>>,
    ) -> Result<(Batch<Vector3<f64>>, f64), ShapeError> {
        let x_t = self.scale(x_t);
        let g_t = self.diffusion_coef(t);
        let std = g_t * dt.sqrt();
        let mu = x_t.try_zip_map(score_t, |x, s| {
            x - (self.drift_coef(x, t) - s * (g_t * g_t)) * dt
        })?;
        let mu = match mask {
            Some(mask) => {
                let mask = mask.broadcast_to(mu.shape())?;
                mu.try_zip_map(&mask, |m, &w| m * w)?
            }
            None => mu,
        };
        Ok((mu, std))
    }
}
