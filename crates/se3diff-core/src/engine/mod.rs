//! # Engine Module
//!
//! The stateful layer of the library: it owns the configured diffusers and
//! orchestrates them over batches of rigid frames.
//!
//! ## Overview
//!
//! [`se3::Se3Diffuser`] combines a rotation diffuser and a translation diffuser into
//! one protocol on SE(3). Frames are decomposed into rotation vectors and
//! translations, each factor is noised, scored or stepped by its own collaborator at
//! a shared diffusion time, and the results are recomposed.
//!
//! ## Architecture
//!
//! - **Orchestration** ([`se3`]) - Forward marginals, scores, score scaling, reverse
//!   steps and reference sampling with imputation
//! - **Configuration** ([`config`]) - TOML-backed settings for the diffusers and the
//!   sampling loop, plus a builder for programmatic use
//! - **Factors** ([`factor`]) - Per-factor on/off switch resolved at construction
//! - **Progress Monitoring** ([`progress`]) - Callback-based reporting for long runs
//! - **Error Handling** ([`error`]) - The error type returned by every engine operation
//!
//! ## Masking
//!
//! A diffuse mask selects, per frame, whether it takes part in diffusion. States
//! are blended against the value they had before the operation, while scores are
//! blended against zero, so a fixed frame keeps its geometry and reports no score.

pub mod config;
pub mod error;
pub mod factor;
pub(crate) mod mask;
pub mod progress;
pub mod se3;
