//! Application setup and command dispatch

pub mod options;
pub mod run;
