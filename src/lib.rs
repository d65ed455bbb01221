pub mod artifacts;
pub mod backtest;
pub mod blend;
pub mod calibration;
pub mod config;
pub mod elo;
pub mod error;
pub mod logging;
pub mod market;
pub mod metrics;
pub mod predict;
pub mod prob;
pub mod records;
pub mod signals;
pub mod staking;
pub mod store;
pub mod synthetic;
pub mod tables;
pub mod training;
