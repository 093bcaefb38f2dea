//! Shared helpers for the core integration tests

#![allow(dead_code)]

pub mod generators;
