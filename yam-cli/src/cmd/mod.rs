pub mod build;
pub mod clean;
pub mod compress;
pub mod start;
