//! Kinematic regime detection.
//!
//! Converts a rolling price/volatility series into a multi-timescale motion
//! state (velocity, acceleration, jerk, oscillation intensity) and classifies
//! it into a kinematic micro-state and a trading regime.

pub mod bank;
pub mod detector;
pub mod state;

pub use bank::DetectorBank;
pub use detector::RegimeDetector;
pub use state::{KinematicState, LearningRegime, MicroState, Regime};
