// Dataset trait — unified interface for any molecular data source

use std::sync::Arc;

pub use molset_core::Sample;
use molset_core::Result;

/// A dataset is an indexed collection of samples.
///
/// Implementations must be `Send + Sync` so a DataLoader can read from
/// several threads at once. Both methods return `Result` because lazily
/// opened stores only touch the disk on first use.
pub trait Dataset: Send + Sync {
    /// Total number of samples in the dataset.
    fn len(&self) -> Result<usize>;

    /// Whether the dataset is empty.
    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Retrieve the sample at position `index`.
    ///
    /// Fails with `Error::IndexOutOfBounds` if `index >= self.len()`.
    fn get(&self, index: usize) -> Result<Sample>;

    /// Optional human-readable name.
    fn name(&self) -> &str {
        "dataset"
    }
}

impl<D: Dataset + ?Sized> Dataset for Box<D> {
    fn len(&self) -> Result<usize> {
        (**self).len()
    }

    fn get(&self, index: usize) -> Result<Sample> {
        (**self).get(index)
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

impl<D: Dataset + ?Sized> Dataset for Arc<D> {
    fn len(&self) -> Result<usize> {
        (**self).len()
    }

    fn get(&self, index: usize) -> Result<Sample> {
        (**self).get(index)
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

/// Shared bounds check used by every dataset in this crate.
pub(crate) fn check_index(index: usize, len: usize) -> Result<()> {
    if index >= len {
        return Err(molset_core::Error::IndexOutOfBounds { index, len });
    }
    Ok(())
}
