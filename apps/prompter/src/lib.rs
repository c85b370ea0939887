pub mod app;
pub mod cli;
pub mod config;
pub mod display;
pub mod error;
pub mod remote;
pub mod scroll;
pub mod session;
pub mod state;
pub mod store;
pub mod sync;
pub mod telemetry;
