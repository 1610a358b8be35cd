use super::config::{ConfigError, Se3DiffuserConfig};
use super::error::DiffusionError;
use super::factor::Factor;
use super::mask;
use crate::core::batch::{Batch, ShapeError};
use crate::core::diffusion::r3::R3Diffuser;
use crate::core::diffusion::so3::So3Diffuser;
use crate::core::diffusion::{RotationDiffuser, TranslationDiffuser, reference_shape};
use crate::core::geometry::rigid::{Device, Rigid, RigidBatch, decompose};
use crate::core::geometry::rotation::{
    QUATERNION_EPS, Rotation, quaternion_to_rotvec, rotvec_to_rotation,
};
use nalgebra::Vector3;
use rand::Rng;
use tracing::{Span, debug, info, instrument, trace};

/// Noised frames in either the structured or the flat `(w, x, y, z, tx, ty, tz)` form.
#[derive(Debug, Clone, PartialEq)]
pub enum RigidRepr {
    Structured(RigidBatch),
    Flat(Batch<[f64; 7]>),
}

impl RigidRepr {
    fn new(rigids: RigidBatch, as_flat: bool) -> Self {
        if as_flat {
            RigidRepr::Flat(rigids.to_tensor_7())
        } else {
            RigidRepr::Structured(rigids)
        }
    }

    pub fn as_structured(&self) -> Option<&RigidBatch> {
        match self {
            RigidRepr::Structured(rigids) => Some(rigids),
            RigidRepr::Flat(_) => None,
        }
    }

    pub fn as_flat(&self) -> Option<&Batch<[f64; 7]>> {
        match self {
            RigidRepr::Structured(_) => None,
            RigidRepr::Flat(flat) => Some(flat),
        }
    }

    /// Structured frames; flat values are decoded onto `device`.
    pub fn into_structured(self, device: Device) -> RigidBatch {
        match self {
            RigidRepr::Structured(rigids) => rigids,
            RigidRepr::Flat(flat) => RigidBatch::from_tensor_7(&flat, device),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ForwardMarginal {
    pub rigids_t: RigidRepr,
    pub trans_score: Batch<Vector3<f64>>,
    pub rot_score: Batch<Vector3<f64>>,
    pub trans_score_scaling: f64,
    pub rot_score_scaling: f64,
}

/// Imputation values aligned with the reference shape.
struct Imputation {
    translations: Batch<Vector3<f64>>,
    rotvecs: Batch<Vector3<f64>>,
    rotations: Batch<Rotation>,
}

/// Diffusion over SE(3) factorized into independent rotation and translation processes.
///
/// Every operation decomposes frames into rotation vectors and translations, dispatches
/// each factor to its collaborator (or passes it through when disabled) and recomposes.
#[derive(Debug)]
pub struct Se3Diffuser<R = So3Diffuser, T = R3Diffuser> {
    rot: Factor<R>,
    trans: Factor<T>,
    span: Span,
}

impl Se3Diffuser {
    #[instrument(skip_all, name = "se3_diffuser_init")]
    pub fn new(config: &Se3DiffuserConfig) -> Result<Self, DiffusionError> {
        config.validate()?;
        let rot = Factor::resolve(config.diffuse_rot, || So3Diffuser::new(config.so3.clone()))
            .map_err(ConfigError::from)?;
        let trans = Factor::resolve(config.diffuse_trans, || R3Diffuser::new(config.r3.clone()))
            .map_err(ConfigError::from)?;
        info!(
            diffuse_rot = config.diffuse_rot,
            diffuse_trans = config.diffuse_trans,
            "SE(3) diffuser ready."
        );
        Ok(Self::from_parts(rot, trans))
    }
}

impl<R, T> Se3Diffuser<R, T>
where
    R: RotationDiffuser,
    T: TranslationDiffuser,
{
    pub fn from_parts(rot: Factor<R>, trans: Factor<T>) -> Self {
        Self {
            rot,
            trans,
            span: tracing::info_span!("se3_diffuser"),
        }
    }

    /// Replaces the span that scopes every log record emitted by this diffuser.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    pub fn rotation_factor(&self) -> &Factor<R> {
        &self.rot
    }

    pub fn translation_factor(&self) -> &Factor<T> {
        &self.trans
    }

    fn translation_diffuser(&self) -> Result<&T, DiffusionError> {
        self.trans
            .as_enabled()
            .ok_or(DiffusionError::FactorDisabled { factor: "translation" })
    }

    fn rotation_diffuser(&self) -> Result<&R, DiffusionError> {
        self.rot
            .as_enabled()
            .ok_or(DiffusionError::FactorDisabled { factor: "rotation" })
    }

    /// Noises `rigids_0` to time `t`.
    ///
    /// Entries where `diffuse_mask` is zero keep their original frame and report a
    /// zero score. A disabled factor passes through unchanged with zero score and
    /// unit score scaling.
    pub fn forward_marginal<G: Rng + ?Sized>(
        &self,
        rigids_0: &RigidBatch,
        t: f64,
        diffuse_mask: Option<&Batch<f64>>,
        as_flat: bool,
        rng: &mut G,
    ) -> Result<ForwardMarginal, DiffusionError> {
        let _entered = self.span.enter();
        debug!(t, entries = rigids_0.len(), masked = diffuse_mask.is_some(), "Forward marginal.");

        let mask = mask::resolve(diffuse_mask, rigids_0.shape())?;
        let (trans_0, rot_0) = decompose(rigids_0);
        let rotations_0 = rigids_0.rotations();
        let zeros = || Batch::from_elem(rigids_0.shape().to_vec(), Vector3::zeros());

        let (rot_t, rotations_t, rot_score, rot_score_scaling) = match &self.rot {
            Factor::Enabled(so3) => {
                let (rot_t, rot_score) = so3.forward_marginal(&rot_0, t, rng);
                let rotations_t = rotvec_to_rotation(&rot_t);
                (rot_t, rotations_t, rot_score, so3.score_scaling(t))
            }
            Factor::Disabled => (rot_0.clone(), rotations_0.clone(), zeros(), 1.0),
        };

        let (trans_t, trans_score, trans_score_scaling) = match &self.trans {
            Factor::Enabled(r3) => {
                let (trans_t, trans_score) = r3.forward_marginal(&trans_0, t, rng);
                (trans_t, trans_score, r3.score_scaling(t))
            }
            Factor::Disabled => (trans_0.clone(), zeros(), 1.0),
        };

        let (rotations_t, trans_t, rot_score, trans_score) = match &mask {
            Some(mask) => (
                mask::blend_rotations(mask, &rot_t, &rotations_t, &rot_0, &rotations_0)?,
                mask::blend(mask, &trans_t, &trans_0)?,
                mask::blend_score(mask, &rot_score)?,
                mask::blend_score(mask, &trans_score)?,
            ),
            None => (rotations_t, trans_t, rot_score, trans_score),
        };

        let rigids_t = assemble(&rotations_t, &trans_t, rigids_0.device())?;
        Ok(ForwardMarginal {
            rigids_t: RigidRepr::new(rigids_t, as_flat),
            trans_score,
            rot_score,
            trans_score_scaling,
            rot_score_scaling,
        })
    }

    /// Closed-form `(translation, rotation)` scores of `rigids_t` given `rigids_0`.
    pub fn score(
        &self,
        rigids_0: &RigidBatch,
        rigids_t: &RigidBatch,
        t: f64,
    ) -> Result<(Batch<Vector3<f64>>, Batch<Vector3<f64>>), DiffusionError> {
        let _entered = self.span.enter();
        let (trans_0, rot_0) = decompose(rigids_0);
        let (trans_t, rot_t) = decompose(rigids_t);
        trans_0.ensure_same_shape(&trans_t)?;

        let rot_score = match &self.rot {
            Factor::Enabled(so3) => so3.score(&rot_t, &rot_0, t)?,
            Factor::Disabled => Batch::from_elem(rot_0.shape().to_vec(), Vector3::zeros()),
        };
        let trans_score = match &self.trans {
            Factor::Enabled(r3) => r3.score(&trans_t, &trans_0, t)?,
            Factor::Disabled => Batch::from_elem(trans_0.shape().to_vec(), Vector3::zeros()),
        };
        Ok((trans_score, rot_score))
    }

    /// `(rotation, translation)` score scaling at `t`; a disabled factor reports 1.
    pub fn score_scaling(&self, t: f64) -> (f64, f64) {
        let rot = self.rot.as_enabled().map_or(1.0, |so3| so3.score_scaling(t));
        let trans = self.trans.as_enabled().map_or(1.0, |r3| r3.score_scaling(t));
        (rot, trans)
    }

    /// Rotation score of `rotations_t` relative to `rotations_0`, formed as `q_t ∘ q_0⁻¹`.
    pub fn calc_rotation_score(
        &self,
        rotations_t: &Batch<Rotation>,
        rotations_0: &Batch<Rotation>,
        t: f64,
    ) -> Result<Batch<Vector3<f64>>, DiffusionError> {
        let _entered = self.span.enter();
        let so3 = self.rotation_diffuser()?;
        let relative = rotations_t.try_zip_map(rotations_0, |rt, r0| {
            (rt.to_quaternion() * r0.to_quaternion().inverse()).into_inner()
        })?;
        let rotvecs = quaternion_to_rotvec(&relative, QUATERNION_EPS);
        Ok(so3.score_rotvec(&rotvecs, t))
    }

    /// Posterior-mean estimate of clean translations from a translation score.
    pub fn calc_trans_0(
        &self,
        trans_score: &Batch<Vector3<f64>>,
        trans_t: &Batch<Vector3<f64>>,
        t: f64,
    ) -> Result<Batch<Vector3<f64>>, DiffusionError> {
        let r3 = self.translation_diffuser()?;
        Ok(r3.calc_trans_0(trans_score, trans_t, t)?)
    }

    /// Translation score; with `scale` the inputs are first mapped to working coordinates.
    pub fn calc_trans_score(
        &self,
        trans_t: &Batch<Vector3<f64>>,
        trans_0: &Batch<Vector3<f64>>,
        t: f64,
        scale: bool,
    ) -> Result<Batch<Vector3<f64>>, DiffusionError> {
        let r3 = self.translation_diffuser()?;
        let score = if scale {
            r3.score(trans_t, trans_0, t)?
        } else {
            r3.score_working(trans_t, trans_0, t)?
        };
        Ok(score)
    }

    /// Mean and standard deviation of the Gaussian reverse transition for translations.
    pub fn trans_parameters(
        &self,
        trans_t: &Batch<Vector3<f64>>,
        score_t: &Batch<Vector3<f64>>,
        t: f64,
        dt: f64,
        mask: Option<&Batch<f64>>,
    ) -> Result<(Batch<Vector3<f64>>, f64), DiffusionError> {
        let r3 = self.translation_diffuser()?;
        Ok(r3.distribution(trans_t, score_t, t, dt, mask)?)
    }

    /// One reverse step from `t` to `t - dt`.
    ///
    /// Entries where `diffuse_mask` is zero keep their pre-step frame. The result is
    /// placed on the device of `rigids_t`.
    #[allow(clippy::too_many_arguments)]
    pub fn reverse<G: Rng + ?Sized>(
        &self,
        rigids_t: &RigidBatch,
        rot_score: &Batch<Vector3<f64>>,
        trans_score: &Batch<Vector3<f64>>,
        t: f64,
        dt: f64,
        diffuse_mask: Option<&Batch<f64>>,
        center: bool,
        noise_scale: f64,
        rng: &mut G,
    ) -> Result<RigidBatch, DiffusionError> {
        let _entered = self.span.enter();
        trace!(t, dt, noise_scale, center, "Reverse step.");

        let mask = mask::resolve(diffuse_mask, rigids_t.shape())?;
        let (trans_t, rot_t) = decompose(rigids_t);
        let rotations_t = rigids_t.rotations();

        let (rot_prev, rotations_prev) = match &self.rot {
            Factor::Enabled(so3) => {
                let rot_prev = so3.reverse(&rot_t, rot_score, t, dt, noise_scale, rng)?;
                let rotations_prev = rotvec_to_rotation(&rot_prev);
                (rot_prev, rotations_prev)
            }
            Factor::Disabled => (rot_t.clone(), rotations_t.clone()),
        };
        let trans_prev = match &self.trans {
            Factor::Enabled(r3) => {
                r3.reverse(&trans_t, trans_score, t, dt, center, noise_scale, rng)?
            }
            Factor::Disabled => trans_t.clone(),
        };

        let (rotations_prev, trans_prev) = match &mask {
            Some(mask) => (
                mask::blend_rotations(mask, &rot_prev, &rotations_prev, &rot_t, &rotations_t)?,
                mask::blend(mask, &trans_prev, &trans_t)?,
            ),
            None => (rotations_prev, trans_prev),
        };
        Ok(assemble(&rotations_prev, &trans_prev, rigids_t.device())?)
    }

    /// Draws frames from the reference distribution at `t = 1`.
    ///
    /// `impute` supplies values for a disabled factor and for entries where
    /// `diffuse_mask` is zero; its leading dimension must equal `n_samples`.
    #[allow(clippy::too_many_arguments)]
    pub fn sample_ref<G: Rng + ?Sized>(
        &self,
        n_samples: usize,
        seq_len: Option<usize>,
        impute: Option<&RigidBatch>,
        diffuse_mask: Option<&Batch<f64>>,
        as_flat: bool,
        device: Option<Device>,
        rng: &mut G,
    ) -> Result<RigidRepr, DiffusionError> {
        let _entered = self.span.enter();
        let shape = reference_shape(n_samples, seq_len);

        let impute = match impute {
            Some(rigids) => Some(self.prepare_imputation(rigids, n_samples, &shape)?),
            None => None,
        };
        if impute.is_none() {
            if diffuse_mask.is_some() {
                return Err(DiffusionError::InvalidArgument(
                    "a diffuse mask requires imputation values".to_string(),
                ));
            }
            if !self.rot.is_enabled() {
                return Err(DiffusionError::InvalidArgument(
                    "rotation diffusion is disabled; imputation values are required".to_string(),
                ));
            }
            if !self.trans.is_enabled() {
                return Err(DiffusionError::InvalidArgument(
                    "translation diffusion is disabled; imputation values are required"
                        .to_string(),
                ));
            }
        }
        let mask = mask::resolve(diffuse_mask, &shape)?;
        debug!(n_samples, ?seq_len, masked = mask.is_some(), "Sampling reference frames.");

        let rotations = match &self.rot {
            Factor::Enabled(so3) => {
                let rot_ref = so3.sample_ref(n_samples, seq_len, rng);
                let rotations_ref = rotvec_to_rotation(&rot_ref);
                match (&mask, &impute) {
                    (Some(mask), Some(imp)) => mask::blend_rotations(
                        mask,
                        &rot_ref,
                        &rotations_ref,
                        &imp.rotvecs,
                        &imp.rotations,
                    )?,
                    _ => rotations_ref,
                }
            }
            Factor::Disabled => required(&impute)?.rotations.clone(),
        };

        let translations = match &self.trans {
            Factor::Enabled(r3) => {
                let trans_ref = r3.sample_ref(n_samples, seq_len, rng);
                let trans_ref = match (&mask, &impute) {
                    (Some(mask), Some(imp)) => mask::blend(mask, &trans_ref, &imp.translations)?,
                    _ => trans_ref,
                };
                r3.unscale(&trans_ref)
            }
            Factor::Disabled => required(&impute)?.translations.clone(),
        };

        let rigids = assemble(&rotations, &translations, device.unwrap_or_default())?;
        Ok(RigidRepr::new(rigids, as_flat))
    }

    fn prepare_imputation(
        &self,
        rigids: &RigidBatch,
        n_samples: usize,
        shape: &[usize],
    ) -> Result<Imputation, DiffusionError> {
        if rigids.shape().first() != Some(&n_samples) {
            return Err(DiffusionError::InvalidArgument(format!(
                "imputation has leading dimension {:?} but {} samples were requested",
                rigids.shape().first(),
                n_samples
            )));
        }
        if rigids.shape() != shape {
            return Err(ShapeError::Mismatch {
                left: rigids.shape().to_vec(),
                right: shape.to_vec(),
            }
            .into());
        }
        let (translations, rotvecs) = decompose(rigids);
        let translations = match &self.trans {
            Factor::Enabled(r3) => r3.scale(&translations),
            Factor::Disabled => translations,
        };
        Ok(Imputation {
            translations,
            rotvecs,
            rotations: rigids.rotations(),
        })
    }
}

fn required(impute: &Option<Imputation>) -> Result<&Imputation, DiffusionError> {
    impute.as_ref().ok_or_else(|| {
        DiffusionError::InvalidArgument("imputation values are required".to_string())
    })
}

fn assemble(
    rotations: &Batch<Rotation>,
    translations: &Batch<Vector3<f64>>,
    device: Device,
) -> Result<RigidBatch, ShapeError> {
    let rigids = rotations.try_zip_map(translations, |r, t| Rigid::new(*r, *t))?;
    Ok(RigidBatch::new(rigids, device))
}
