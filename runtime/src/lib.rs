// Copyright 2026 Slothound Contributors
// SPDX-License-Identifier: Apache-2.0

//! Slothound runtime library — appointment slot acquisition for 91160.com.
//!
//! This library crate exposes the core modules for integration testing.

pub mod acquisition;
pub mod cli;
pub mod config;
pub mod error;
pub mod logging;
