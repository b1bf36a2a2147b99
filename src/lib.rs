pub mod adapters;
pub mod cli;
pub mod config;
pub mod db;
pub mod domain;
pub mod error;
pub mod listener;
pub mod metrics;
pub mod ports;
pub mod provider;
pub mod services;
pub mod startup;
pub mod use_cases;
pub mod utils;
pub mod validation;

pub use config::Config;
pub use error::AppError;
