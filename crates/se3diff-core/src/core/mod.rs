//! # Core Module
//!
//! Stateless numerics underneath the SE(3) diffusion engine: batched containers,
//! rotation and rigid-frame representations, and the per-factor diffusion processes.
//!
//! ## Architecture
//!
//! - **Batches** ([`batch`]) - Row-major containers over arbitrary leading shapes,
//!   plus right-aligned broadcasting for masks
//! - **Geometry** ([`geometry`]) - The `Rotation` value type, rotation-vector and
//!   quaternion conversions, rigid frames and frame deviation metrics
//! - **Diffusion** ([`diffusion`]) - Rotation and translation diffusers behind the
//!   contracts the orchestrator relies on
//!
//! Nothing in this module keeps mutable state after construction. Every stochastic
//! function takes the caller's random number generator explicitly.

pub mod batch;
pub mod diffusion;
pub mod geometry;
