//! # Resource Sample App Library
//!
//! This library exposes the sample application's modules for integration testing.

pub mod clients;
pub mod lifecycle;
pub mod model;
