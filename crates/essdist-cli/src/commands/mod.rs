pub mod config;
pub mod solve;
