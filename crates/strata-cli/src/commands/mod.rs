pub mod build;
pub mod deps;
pub mod list;
