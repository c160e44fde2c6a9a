pub mod dirichlet;
pub mod traits;
