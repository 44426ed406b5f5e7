pub mod polynomial;

pub use polynomial::{evaluate, fit, FitError};
