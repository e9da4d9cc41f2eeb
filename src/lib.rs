//! RPi4 boot image builder.
//!
//! Drives kernel, Buildroot and image builds inside a Docker container and
//! retries failed steps after classifying the failure and applying a fix.

pub mod artifact;
pub mod classify;
pub mod commands;
pub mod config;
pub mod container;
pub mod error;
pub mod logging;
pub mod pipeline;
pub mod preflight;
pub mod process;
pub mod remedy;
pub mod retry;
pub mod steps;
pub mod timing;
