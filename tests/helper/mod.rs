//! Shared fakes for engine integration tests
#![allow(dead_code)]

pub mod catalog;
pub mod engine;
pub mod installer;
