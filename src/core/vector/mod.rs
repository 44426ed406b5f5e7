pub mod distance;

pub use distance::{DistanceFunction, DistanceMetric, VectorTable};
