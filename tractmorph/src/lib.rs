pub mod cli;
pub mod collect;
pub mod commands;
pub mod commons;
pub mod config;
pub mod error;
pub mod features;
pub mod geo_core;
pub mod geometric;
pub mod pipeline;

pub use error::TractError;
