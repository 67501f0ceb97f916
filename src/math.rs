pub mod indicator;
pub mod stats;
