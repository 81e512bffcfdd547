pub mod checkpoint;
pub mod collaborators;
pub mod config;
pub mod controller;
pub mod error;
pub mod host;
pub mod models;
pub mod phase;
pub mod report;
pub mod session;
pub mod simulator;
pub mod state;
pub mod transitions;
pub mod turns;
