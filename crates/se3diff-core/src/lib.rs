//! # se3diff
//!
//! Diffusion over batches of rigid frames on SE(3) = SO(3) × ℝ³, the noising and
//! denoising protocol used by generative models of protein backbones.
//!
//! ## Architectural Philosophy
//!
//! The library follows a three-layer architecture.
//!
//! - **[`core`]: The Foundation.** Batched containers, the `Rotation` value type with its
//!   rotation-vector and quaternion conversions, rigid frames, and the IGSO(3) and
//!   variance-preserving diffusers for the two factors.
//!
//! - **[`engine`]: The Logic Core.** `Se3Diffuser` orchestrates both factors at a shared
//!   diffusion time: forward marginals, scores and their scaling, reverse steps and
//!   reference sampling with masked imputation. Configuration, errors and progress
//!   reporting live here too.
//!
//! - **[`workflows`]: The Public API.** Complete procedures built on the engine, such as
//!   reverse sampling driven by an external score model.
//!
//! All randomness comes from a caller-supplied [`rand::Rng`], so runs are reproducible
//! from a seed. Logging goes through `tracing`; the library installs no subscriber.

pub mod core;
pub mod engine;
pub mod workflows;
