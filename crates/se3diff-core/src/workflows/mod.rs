//! # Workflows Module
//!
//! High-level entry points that drive the engine through complete procedures.
//!
//! ## Overview
//!
//! - **Reverse Sampling** ([`sample`]) - Draws reference frames, then integrates the
//!   reverse process from `t = 1` down to a small terminal time, asking a pluggable
//!   [`sample::ScoreModel`] for scores at every step. Supports imputation of fixed
//!   frames through a diffuse mask, optional trajectories and progress reporting.

pub mod sample;
