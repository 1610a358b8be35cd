pub mod metrics;
pub mod rigid;
pub mod rotation;
