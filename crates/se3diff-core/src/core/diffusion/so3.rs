use super::{
    RotationDiffuser, ScheduleError, igso3, reference_shape, require_positive,
    standard_normal_vector,
};
use crate::core::batch::{Batch, ShapeError};
use crate::core::geometry::rotation::{Rotation, compose_rotvec};
use nalgebra::Vector3;
use rand::Rng;
use rand::distributions::{Distribution, Standard};
use serde::Deserialize;
use std::f64::consts::PI;
use tracing::{debug, info, instrument};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

const SCORE_DIRECTION_EPS: f64 = 1e-6;
const MIN_OMEGA: f64 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Schedule {
    /// `σ(t) = ln(t·e^σmax + (1 − t)·e^σmin)`
    #[default]
    Logarithmic,
    /// `σ(t) = σmin + t·(σmax − σmin)`
    Linear,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct So3Config {
    pub schedule: Schedule,
    pub min_sigma: f64,
    pub max_sigma: f64,
    pub num_sigma: usize,
    pub num_omega: usize,
    pub use_cached_score: bool,
    pub num_expansion_terms: usize,
}

impl Default for So3Config {
    fn default() -> Self {
        Self {
            schedule: Schedule::Logarithmic,
            min_sigma: 0.1,
            max_sigma: 1.5,
            num_sigma: 1000,
            num_omega: 1000,
            use_cached_score: false,
            num_expansion_terms: 1000,
        }
    }
}

impl So3Config {
    pub fn validate(&self) -> Result<(), ScheduleError> {
        require_positive("so3.min-sigma", self.min_sigma)?;
        require_positive("so3.max-sigma", self.max_sigma)?;
        if self.max_sigma <= self.min_sigma {
            return Err(ScheduleError::InvalidParameter {
                name: "so3.max-sigma",
                reason: format!(
                    "must exceed min-sigma ({} <= {})",
                    self.max_sigma, self.min_sigma
                ),
            });
        }
        for (name, value) in [
            ("so3.num-sigma", self.num_sigma),
            ("so3.num-omega", self.num_omega),
        ] {
            if value < 2 {
                return Err(ScheduleError::InvalidParameter {
                    name,
                    reason: format!("grid needs at least 2 points, got {}", value),
                });
            }
        }
        if self.num_expansion_terms == 0 {
            return Err(ScheduleError::InvalidParameter {
                name: "so3.num-expansion-terms",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

/// Precomputed IGSO(3) quantities on a `(σ, ω)` grid.
#[derive(Debug, Clone)]
struct Igso3Table {
    discrete_sigma: Vec<f64>,
    discrete_omega: Vec<f64>,
    cdf: Vec<Vec<f64>>,
    score_norms: Vec<Vec<f64>>,
    score_scaling: Vec<f64>,
}

struct TableRow {
    cdf: Vec<f64>,
    score_norms: Vec<f64>,
    score_scaling: f64,
}

fn build_row(sigma: f64, discrete_omega: &[f64], max_terms: usize) -> TableRow {
    let num_omega = discrete_omega.len() as f64;
    let mut cdf = Vec::with_capacity(discrete_omega.len());
    let mut score_norms = Vec::with_capacity(discrete_omega.len());
    let mut running = 0.0;
    let mut weighted_sq = 0.0;
    let mut total_pdf = 0.0;

    for &omega in discrete_omega {
        let exp_val = igso3::expansion(omega, sigma, max_terms);
        let pdf = igso3::marginal_density(exp_val, omega).max(0.0);
        let score = igso3::score(exp_val, omega, sigma, max_terms);

        running += pdf / num_omega * PI;
        cdf.push(running);
        score_norms.push(score);
        weighted_sq += score * score * pdf;
        total_pdf += pdf;
    }

    let score_scaling = (weighted_sq / total_pdf).abs().sqrt() / 3f64.sqrt();
    TableRow {
        cdf,
        score_norms,
        score_scaling,
    }
}

impl Igso3Table {
    fn build(discrete_sigma: Vec<f64>, num_omega: usize, max_terms: usize) -> Self {
        let discrete_omega: Vec<f64> = (1..=num_omega)
            .map(|i| PI * i as f64 / num_omega as f64)
            .collect();

        #[cfg(not(feature = "parallel"))]
        let iterator = discrete_sigma.iter();

        #[cfg(feature = "parallel")]
        let iterator = discrete_sigma.par_iter();

        let rows: Vec<TableRow> = iterator
            .map(|&sigma| build_row(sigma, &discrete_omega, max_terms))
            .collect();

        let mut cdf = Vec::with_capacity(rows.len());
        let mut score_norms = Vec::with_capacity(rows.len());
        let mut score_scaling = Vec::with_capacity(rows.len());
        for row in rows {
            cdf.push(row.cdf);
            score_norms.push(row.score_norms);
            score_scaling.push(row.score_scaling);
        }

        Self {
            discrete_sigma,
            discrete_omega,
            cdf,
            score_norms,
            score_scaling,
        }
    }
}

/// Piecewise-linear interpolation of `(xp, fp)` at `x`, clamped to the end points.
fn interp(x: f64, xp: &[f64], fp: &[f64]) -> f64 {
    let last = xp.len() - 1;
    if x <= xp[0] {
        return fp[0];
    }
    if x >= xp[last] {
        return fp[last];
    }
    let i = xp.partition_point(|&v| v <= x).clamp(1, last);
    let (x0, x1) = (xp[i - 1], xp[i]);
    if x1 <= x0 {
        return fp[i];
    }
    fp[i - 1] + (x - x0) * (fp[i] - fp[i - 1]) / (x1 - x0)
}

/// Brownian motion on SO(3) with an IGSO(3) marginal.
///
/// The noised rotation is `R_t = R(ε)·R_0` with `ε` drawn from IGSO(3) at noise
/// level `σ(t)`, and reverse steps are applied on the same (left) side.
#[derive(Debug, Clone)]
pub struct So3Diffuser {
    config: So3Config,
    table: Igso3Table,
}

impl So3Diffuser {
    #[instrument(skip_all, name = "so3_diffuser_init", fields(num_sigma = config.num_sigma, num_omega = config.num_omega))]
    pub fn new(config: So3Config) -> Result<Self, ScheduleError> {
        config.validate()?;

        let n = config.num_sigma;
        let discrete_sigma: Vec<f64> = (0..n)
            .map(|i| sigma_at(&config, i as f64 / (n - 1) as f64))
            .collect();

        info!("Building IGSO(3) cache.");
        let table = Igso3Table::build(discrete_sigma, config.num_omega, config.num_expansion_terms);
        debug!(
            min_scaling = table.score_scaling.first().copied(),
            max_scaling = table.score_scaling.last().copied(),
            "IGSO(3) cache ready."
        );

        Ok(Self { config, table })
    }

    pub fn config(&self) -> &So3Config {
        &self.config
    }

    pub fn discrete_sigma(&self) -> &[f64] {
        &self.table.discrete_sigma
    }

    pub fn discrete_omega(&self) -> &[f64] {
        &self.table.discrete_omega
    }

    pub fn sigma(&self, t: f64) -> f64 {
        sigma_at(&self.config, t)
    }

    /// `g(t) = sqrt(dσ²/dt)`.
    pub fn diffusion_coef(&self, t: f64) -> f64 {
        let sigma = self.sigma(t);
        match self.config.schedule {
            Schedule::Logarithmic => {
                let span = self.config.max_sigma.exp() - self.config.min_sigma.exp();
                (2.0 * span * sigma / sigma.exp()).sqrt()
            }
            Schedule::Linear => (2.0 * sigma * (self.config.max_sigma - self.config.min_sigma)).sqrt(),
        }
    }

    /// Index of the last grid σ that does not exceed `σ(t)`.
    pub fn t_to_idx(&self, t: f64) -> usize {
        let sigma = self.sigma(t);
        let grid = &self.table.discrete_sigma;
        grid.partition_point(|&s| s <= sigma)
            .saturating_sub(1)
            .min(grid.len() - 1)
    }

    fn omega_to_idx(&self, omega: f64) -> usize {
        let grid = &self.table.discrete_omega;
        grid[..grid.len() - 1].partition_point(|&w| w <= omega)
    }

    fn draw_angle<R: Rng + ?Sized>(&self, t_idx: usize, rng: &mut R) -> f64 {
        let u: f64 = Standard.sample(rng);
        interp(u, &self.table.cdf[t_idx], &self.table.discrete_omega)
    }

    fn draw_rotvec<R: Rng + ?Sized>(&self, t_idx: usize, rng: &mut R) -> Vector3<f64> {
        let angle = self.draw_angle(t_idx, rng);
        random_unit_vector(rng) * angle
    }

    fn score_norm(&self, omega: f64, t_idx: usize) -> f64 {
        if self.config.use_cached_score {
            self.table.score_norms[t_idx][self.omega_to_idx(omega)]
        } else {
            let sigma = self.table.discrete_sigma[t_idx];
            let omega = omega.max(MIN_OMEGA);
            let max_terms = self.config.num_expansion_terms;
            igso3::score(igso3::expansion(omega, sigma, max_terms), omega, sigma, max_terms)
        }
    }
}

fn sigma_at(config: &So3Config, t: f64) -> f64 {
    match config.schedule {
        Schedule::Logarithmic => {
            (t * config.max_sigma.exp() + (1.0 - t) * config.min_sigma.exp()).ln()
        }
        Schedule::Linear => config.min_sigma + t * (config.max_sigma - config.min_sigma),
    }
}

fn random_unit_vector<R: Rng + ?Sized>(rng: &mut R) -> Vector3<f64> {
    loop {
        let v = standard_normal_vector(rng);
        let norm = v.norm();
        if norm > f64::EPSILON {
            return v / norm;
        }
    }
}

impl RotationDiffuser for So3Diffuser {
    fn forward_marginal<R: Rng + ?Sized>(
        &self,
        rot_0: &Batch<Vector3<f64>>,
        t: f64,
        rng: &mut R,
    ) -> (Batch<Vector3<f64>>, Batch<Vector3<f64>>) {
        let t_idx = self.t_to_idx(t);
        let drawn = rot_0.map(|r0| {
            let noise = self.draw_rotvec(t_idx, rng);
            let rot_t = Rotation::from_rotvec(&noise).compose(&Rotation::from_rotvec(r0));
            (noise, rot_t.to_rotvec())
        });
        let noise = drawn.map(|(noise, _)| *noise);
        let rot_t = drawn.map(|(_, rot_t)| *rot_t);
        let rot_score = self.score_rotvec(&noise, t);
        (rot_t, rot_score)
    }

    fn score(
        &self,
        rot_t: &Batch<Vector3<f64>>,
        rot_0: &Batch<Vector3<f64>>,
        t: f64,
    ) -> Result<Batch<Vector3<f64>>, ShapeError> {
        let relative = rot_t.try_zip_map(rot_0, |vt, v0| {
            Rotation::from_rotvec(vt)
                .compose(&Rotation::from_rotvec(v0).inverse())
                .to_rotvec()
        })?;
        Ok(self.score_rotvec(&relative, t))
    }

    fn score_rotvec(&self, rotvec: &Batch<Vector3<f64>>, t: f64) -> Batch<Vector3<f64>> {
        let t_idx = self.t_to_idx(t);
        rotvec.par_map(|v| {
            let omega = v.norm();
            v * (self.score_norm(omega, t_idx) / (omega + SCORE_DIRECTION_EPS))
        })
    }

    fn score_scaling(&self, t: f64) -> f64 {
        self.table.score_scaling[self.t_to_idx(t)]
    }

    fn reverse<R: Rng + ?Sized>(
        &self,
        rot_t: &Batch<Vector3<f64>>,
        score_t: &Batch<Vector3<f64>>,
        t: f64,
        dt: f64,
        noise_scale: f64,
        rng: &mut R,
    ) -> Result<Batch<Vector3<f64>>, ShapeError> {
        rot_t.ensure_same_shape(score_t)?;
        let g_t = self.diffusion_coef(t);
        let perturb = score_t.map(|score| {
            let z = standard_normal_vector(rng) * noise_scale;
            score * (g_t * g_t * dt) + z * (g_t * dt.sqrt())
        });
        compose_rotvec(&perturb, rot_t)
    }

    fn sample_ref<R: Rng + ?Sized>(
        &self,
        n_samples: usize,
        seq_len: Option<usize>,
        rng: &mut R,
    ) -> Batch<Vector3<f64>> {
        let shape = reference_shape(n_samples, seq_len);
        let t_idx = self.t_to_idx(1.0);
        Batch::from_fn(shape, |_| self.draw_rotvec(t_idx, rng))
    }
}
