use crate::core::batch::Batch;
use crate::core::diffusion::{RotationDiffuser, TranslationDiffuser};
use crate::core::geometry::metrics::se3_deviation;
use crate::core::geometry::rigid::{Device, RigidBatch};
use crate::engine::config::SamplingConfig;
use crate::engine::error::DiffusionError;
use crate::engine::progress::{Progress, ProgressReporter};
use crate::engine::se3::Se3Diffuser;
use nalgebra::Vector3;
use rand::Rng;
use std::fmt::Display;
use tracing::{Level, debug, info, instrument};

/// Scores predicted for the frames at one diffusion time.
///
/// Translation scores are expected in the translation diffuser's working coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct PredictedScores {
    pub rot_score: Batch<Vector3<f64>>,
    pub trans_score: Batch<Vector3<f64>>,
}

/// Anything that can predict SE(3) scores for noised frames, typically a trained network.
pub trait ScoreModel {
    type Error: Display;

    fn predict(&self, rigids: &RigidBatch, t: f64) -> Result<PredictedScores, Self::Error>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct SamplingRequest {
    pub n_samples: usize,
    pub seq_len: Option<usize>,
    pub impute: Option<RigidBatch>,
    pub diffuse_mask: Option<Batch<f64>>,
    pub device: Option<Device>,
}

impl SamplingRequest {
    pub fn new(n_samples: usize) -> Self {
        Self {
            n_samples,
            seq_len: None,
            impute: None,
            diffuse_mask: None,
            device: None,
        }
    }

    pub fn seq_len(mut self, seq_len: usize) -> Self {
        self.seq_len = Some(seq_len);
        self
    }

    /// Frames to keep fixed (where `diffuse_mask` is zero) or to use for a disabled factor.
    pub fn impute(mut self, impute: RigidBatch, diffuse_mask: Option<Batch<f64>>) -> Self {
        self.impute = Some(impute);
        self.diffuse_mask = diffuse_mask;
        self
    }

    pub fn device(mut self, device: Device) -> Self {
        self.device = Some(device);
        self
    }
}

#[derive(Debug, Clone)]
pub struct SamplingResult {
    pub rigids: RigidBatch,
    /// Reference frames followed by the frames after every step; empty unless requested.
    pub trajectory: Vec<RigidBatch>,
    pub num_steps: usize,
}

#[instrument(skip_all, name = "sampling_workflow")]
pub fn run<R, T, M, G>(
    diffuser: &Se3Diffuser<R, T>,
    model: &M,
    request: &SamplingRequest,
    config: &SamplingConfig,
    reporter: &ProgressReporter,
    rng: &mut G,
) -> Result<SamplingResult, DiffusionError>
where
    R: RotationDiffuser,
    T: TranslationDiffuser,
    M: ScoreModel,
    G: Rng + ?Sized,
{
    config.validate()?;
    let total_steps = config.num_steps;
    reporter.report(Progress::SamplingStart { total_steps });
    info!(
        n_samples = request.n_samples,
        seq_len = ?request.seq_len,
        num_steps = total_steps,
        "Starting reverse sampling."
    );

    let device = request.device.unwrap_or_default();
    let mut rigids = diffuser
        .sample_ref(
            request.n_samples,
            request.seq_len,
            request.impute.as_ref(),
            request.diffuse_mask.as_ref(),
            false,
            Some(device),
            rng,
        )?
        .into_structured(device);

    let mut trajectory = Vec::new();
    if config.keep_trajectory {
        trajectory.push(rigids.clone());
    }

    let dt = config.dt();
    for (step, t) in config.time_grid().into_iter().enumerate() {
        reporter.report(Progress::StepStart { step, t, dt });

        let scores = model
            .predict(&rigids, t)
            .map_err(|e| DiffusionError::ScoreModel {
                t,
                message: e.to_string(),
            })?;
        let next = diffuser.reverse(
            &rigids,
            &scores.rot_score,
            &scores.trans_score,
            t,
            dt,
            request.diffuse_mask.as_ref(),
            config.center,
            config.noise_scale,
            rng,
        )?;
        if tracing::enabled!(Level::DEBUG) {
            if let Some(change) = se3_deviation(&next, &rigids) {
                debug!(
                    step,
                    t,
                    rotation_rad = change.rotation_rad,
                    translation = change.translation,
                    "Reverse step complete."
                );
            }
        }
        rigids = next;
        if config.keep_trajectory {
            trajectory.push(rigids.clone());
        }

        reporter.report(Progress::StepFinish {
            step: step + 1,
            total_steps,
        });
    }

    reporter.report(Progress::SamplingFinish);
    info!("Reverse sampling complete.");
    Ok(SamplingResult {
        rigids,
        trajectory,
        num_steps: total_steps,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::diffusion::so3::So3Config;
    use crate::core::geometry::rigid::compose;
    use crate::engine::config::Se3DiffuserConfigBuilder;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use std::sync::Mutex;

    struct OracleModel<'a> {
        diffuser: &'a Se3Diffuser,
        target: RigidBatch,
    }

    impl ScoreModel for OracleModel<'_> {
        type Error = DiffusionError;

        fn predict(&self, rigids: &RigidBatch, t: f64) -> Result<PredictedScores, DiffusionError> {
            let (trans_score, rot_score) = self.diffuser.score(&self.target, rigids, t)?;
            Ok(PredictedScores {
                rot_score,
                trans_score,
            })
        }
    }

    struct FailingModel;

    impl ScoreModel for FailingModel {
        type Error = String;

        fn predict(&self, _rigids: &RigidBatch, _t: f64) -> Result<PredictedScores, String> {
            Err("weights not loaded".to_string())
        }
    }

    fn diffuser() -> Se3Diffuser {
        let config = Se3DiffuserConfigBuilder::new()
            .so3(So3Config {
                num_sigma: 100,
                num_omega: 200,
                ..So3Config::default()
            })
            .build()
            .unwrap();
        Se3Diffuser::new(&config).unwrap()
    }

    fn target(n: usize) -> RigidBatch {
        let rotvecs = Batch::from_fn(vec![n], |i| Vector3::new(0.2, -0.1 * i as f64, 0.5));
        let translations =
            Batch::from_fn(vec![n], |i| Vector3::new(3.8 * i as f64 - 6.0, 1.5, -0.5 * i as f64));
        compose(&rotvecs, &translations, None).unwrap()
    }

    fn config(num_steps: usize) -> SamplingConfig {
        SamplingConfig {
            num_steps,
            noise_scale: 0.0,
            center: false,
            ..SamplingConfig::default()
        }
    }

    #[test]
    fn oracle_scores_drive_samples_to_target() {
        let se3 = diffuser();
        let model = OracleModel {
            diffuser: &se3,
            target: target(6),
        };
        let mut rng = ChaCha8Rng::seed_from_u64(10);
        let result = run(
            &se3,
            &model,
            &SamplingRequest::new(6),
            &config(100),
            &ProgressReporter::new(),
            &mut rng,
        )
        .unwrap();

        let deviation = se3_deviation(&result.rigids, &model.target).unwrap();
        assert!(deviation.rotation_rad / 6.0 < 0.1, "{:?}", deviation);
        assert!(deviation.translation / 6.0 < 0.5, "{:?}", deviation);
    }

    #[test]
    fn progress_events_follow_decreasing_time_grid() {
        let se3 = diffuser();
        let model = OracleModel {
            diffuser: &se3,
            target: target(3),
        };
        let sink = Mutex::new(Vec::new());
        let reporter = ProgressReporter::collecting(&sink);
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        run(&se3, &model, &SamplingRequest::new(3), &config(4), &reporter, &mut rng).unwrap();
        drop(reporter);

        let events = sink.into_inner().unwrap();
        assert_eq!(events.len(), 2 + 2 * 4);
        assert_eq!(events[0], Progress::SamplingStart { total_steps: 4 });
        assert_eq!(events.last(), Some(&Progress::SamplingFinish));

        let times: Vec<f64> = events
            .iter()
            .filter_map(|e| match e {
                Progress::StepStart { t, .. } => Some(*t),
                _ => None,
            })
            .collect();
        assert_eq!(times.len(), 4);
        assert!((times[0] - 1.0).abs() < 1e-12);
        assert!(times.windows(2).all(|w| w[0] > w[1]));
        assert_eq!(
            events[events.len() - 2],
            Progress::StepFinish {
                step: 4,
                total_steps: 4
            }
        );
    }

    #[test]
    fn trajectory_holds_reference_and_every_step() {
        let se3 = diffuser();
        let model = OracleModel {
            diffuser: &se3,
            target: target(2),
        };
        let config = SamplingConfig {
            keep_trajectory: true,
            ..config(5)
        };
        let mut rng = ChaCha8Rng::seed_from_u64(2);
        let result = run(
            &se3,
            &model,
            &SamplingRequest::new(2).device(Device::Accelerator(3)),
            &config,
            &ProgressReporter::new(),
            &mut rng,
        )
        .unwrap();
        assert_eq!(result.trajectory.len(), 6);
        assert_eq!(result.trajectory.last(), Some(&result.rigids));
        assert_eq!(result.rigids.device(), Device::Accelerator(3));
    }

    #[test]
    fn masked_frames_stay_at_imputed_values() {
        let se3 = diffuser();
        let fixed = target(4);
        let model = OracleModel {
            diffuser: &se3,
            target: fixed.clone(),
        };
        let mask = Batch::from_bools(vec![4], &[true, false, true, false]).unwrap();
        let request = SamplingRequest::new(4).impute(fixed.clone(), Some(mask));
        let config = SamplingConfig {
            noise_scale: 1.0,
            center: true,
            ..config(10)
        };
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let result = run(&se3, &model, &request, &config, &ProgressReporter::new(), &mut rng).unwrap();

        for i in [1, 3] {
            let got = result.rigids.rigids()[i];
            let expected = fixed.rigids()[i];
            assert_eq!(got.rotation, expected.rotation);
            assert!((got.translation - expected.translation).norm() < 1e-9);
        }
    }

    #[test]
    fn model_failure_is_reported_with_time() {
        let se3 = diffuser();
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let result = run(
            &se3,
            &FailingModel,
            &SamplingRequest::new(2),
            &config(3),
            &ProgressReporter::new(),
            &mut rng,
        );
        match result {
            Err(DiffusionError::ScoreModel { t, message }) => {
                assert_eq!(t, 1.0);
                assert_eq!(message, "weights not loaded");
            }
            other => panic!("unexpected result: {:?}", other.map(|r| r.num_steps)),
        }
    }

    #[test]
    fn invalid_sampling_config_is_rejected_before_sampling() {
        let se3 = diffuser();
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let result = run(
            &se3,
            &FailingModel,
            &SamplingRequest::new(2),
            &config(0),
            &ProgressReporter::new(),
            &mut rng,
        );
        assert!(matches!(result, Err(DiffusionError::Config { .. })));
    }
}
