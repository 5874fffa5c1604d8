mod error;

pub mod dashboard;
pub mod env;
pub mod utils;

pub use env::Env;
pub use error::{DashboardError, Result};
