//! # molset-data
//!
//! Molecular datasets for machine-learning pipelines.
//!
//! This crate provides:
//! - [`Dataset`] trait — unified interface for any molecular data source
//! - [`GlobDataset`] — samples assembled eagerly from glob-matched `.npy`
//!   files (coordinates, atomic numbers, energies, forces)
//! - [`Hdf5Dataset`] — lazily opened HDF5 store with one file handle per
//!   worker process (cargo feature `hdf5`)
//! - [`ProcessLocal`] — the per-process handle registry behind it
//! - [`DataLoader`] — batching, shuffling, parallel fetching
//   - Dataset combinators — SubsetDataset, ConcatDataset
//   - Train/val/test splitting with reproducible seeding
//   - `.npy` read/write helpers

pub mod combinators;
pub mod dataset;
pub mod glob_dataset;
#[cfg(feature = "hdf5")]
pub mod hdf5_dataset;
pub mod loader;
pub mod npy;
pub mod process_local;

pub use combinators::{train_val_test_split, ConcatDataset, SubsetDataset};
pub use dataset::{Dataset, Sample};
pub use glob_dataset::{GlobDataset, GlobDatasetConfig, GlobFiles};
pub use loader::{Batch, DataLoader, DataLoaderConfig};
pub use molset_core::{Error, Result};
pub use process_local::{HandleId, ProcessHandle, ProcessLocal};

#[cfg(feature = "hdf5")]
pub use hdf5_dataset::Hdf5Dataset;
