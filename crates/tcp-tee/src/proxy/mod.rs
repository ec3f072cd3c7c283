//! Connection duplication: per-session engine, tee copier, and correlation.

pub mod correlation;
pub mod session;
pub mod tee;
