pub mod catalog;
pub mod pricing;
pub mod types;

pub use catalog::ModelCatalog;
pub use types::*;
