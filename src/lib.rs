pub mod breaker;
pub mod config;
pub mod domain;
pub mod edge;
pub mod engine;
pub mod error;
pub mod kinematics;
pub mod learner;
pub mod math;
pub mod persistence;
pub mod prelude;
pub mod report;
pub mod ring_buffer;

mod macros;
