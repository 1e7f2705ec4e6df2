//! # molset-core
//!
//! Types shared by every molset crate.
//!
//! This crate provides:
//! - [`Sample`] — one molecular configuration (positions, atomic numbers,
//!   optional energy and forces)
//! - [`Error`] / [`Result`] — the single error type used across molset

pub mod error;
pub mod sample;

pub use error::{Error, Result};
pub use sample::Sample;
