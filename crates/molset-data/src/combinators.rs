// Dataset Combinators — subset, concatenate, split datasets

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use molset_core::{config_bail, Result};

use crate::dataset::{check_index, Dataset, Sample};

// SubsetDataset — view of selected indices

/// A dataset that exposes only the samples at the given indices.
///
/// This is useful for train/val/test splitting.
pub struct SubsetDataset<D: Dataset> {
    inner: D,
    indices: Vec<usize>,
}

impl<D: Dataset> SubsetDataset<D> {
    /// Create a subset of `inner` containing only the samples at `indices`.
    ///
    /// Indices are checked lazily: an index past the end of `inner` fails at
    /// `get` time with `IndexOutOfBounds`.
    pub fn new(inner: D, indices: Vec<usize>) -> Self {
        Self { inner, indices }
    }

    /// The indices into the wrapped dataset, in subset order.
    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    pub fn inner(&self) -> &D {
        &self.inner
    }
}

impl<D: Dataset> Dataset for SubsetDataset<D> {
    fn len(&self) -> Result<usize> {
        Ok(self.indices.len())
    }

    fn get(&self, index: usize) -> Result<Sample> {
        check_index(index, self.indices.len())?;
        self.inner.get(self.indices[index])
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}

// ConcatDataset — concatenate multiple datasets

/// Concatenate two or more datasets end-to-end.
pub struct ConcatDataset {
    datasets: Vec<Box<dyn Dataset>>,
    cumulative_sizes: Vec<usize>,
}

impl ConcatDataset {
    /// Create a concatenation of the given datasets.
    ///
    /// Asks every dataset for its length, so lazily opened stores are opened
    /// in the calling process.
    pub fn new(datasets: Vec<Box<dyn Dataset>>) -> Result<Self> {
        if datasets.is_empty() {
            config_bail!("ConcatDataset: need at least one dataset");
        }

        let mut cumulative_sizes = Vec::with_capacity(datasets.len());
        let mut total = 0;
        for ds in &datasets {
            total += ds.len()?;
            cumulative_sizes.push(total);
        }

        Ok(Self {
            datasets,
            cumulative_sizes,
        })
    }

    /// Locate which dataset and local index a global index maps to.
    fn locate(&self, index: usize) -> (usize, usize) {
        let ds_idx = self.cumulative_sizes.partition_point(|&cum| cum <= index);
        let offset = if ds_idx == 0 {
            0
        } else {
            self.cumulative_sizes[ds_idx - 1]
        };
        (ds_idx, index - offset)
    }

    fn total(&self) -> usize {
        self.cumulative_sizes.last().copied().unwrap_or(0)
    }
}

impl Dataset for ConcatDataset {
    fn len(&self) -> Result<usize> {
        Ok(self.total())
    }

    fn get(&self, index: usize) -> Result<Sample> {
        check_index(index, self.total())?;
        let (ds_idx, local_idx) = self.locate(index);
        self.datasets[ds_idx].get(local_idx)
    }

    fn name(&self) -> &str {
        "concat"
    }
}

// Train / Validation / Test Split

/// Split a dataset into (train, val) or (train, val, test) subsets.
///
/// Returns `SubsetDataset` views over clones of `dataset`; pass an `Arc` to
/// share one copy between the splits.
///
/// # Arguments
/// * `dataset` — the source dataset
/// * `ratios` — slice of 2 or 3 non-negative floats that sum to 1.0, e.g.
///   `[0.8, 0.2]` or `[0.7, 0.15, 0.15]`
/// * `seed` — random seed for reproducible shuffling of indices
pub fn train_val_test_split<D>(
    dataset: D,
    ratios: &[f64],
    seed: u64,
) -> Result<Vec<SubsetDataset<D>>>
where
    D: Dataset + Clone,
{
    if ratios.len() < 2 || ratios.len() > 3 {
        config_bail!("split ratios must have 2 or 3 elements, got {}", ratios.len());
    }
    if ratios.iter().any(|r| !(0.0..=1.0).contains(r)) {
        config_bail!("split ratios must lie in [0, 1], got {ratios:?}");
    }
    let sum: f64 = ratios.iter().sum();
    if (sum - 1.0).abs() > 1e-6 {
        config_bail!("split ratios must sum to 1.0, got {sum}");
    }

    let n = dataset.len()?;
    let mut indices: Vec<usize> = (0..n).collect();
    let mut rng = StdRng::seed_from_u64(seed);
    indices.shuffle(&mut rng);

    let mut splits = Vec::with_capacity(ratios.len());
    let mut offset = 0;
    for (i, &ratio) in ratios.iter().enumerate() {
        let count = if i == ratios.len() - 1 {
            n - offset // give remainder to last split
        } else {
            (n as f64 * ratio).round() as usize
        };
        let end = (offset + count).min(n);
        splits.push(SubsetDataset::new(
            dataset.clone(),
            indices[offset..end].to_vec(),
        ));
        offset = end;
    }

    Ok(splits)
}

// Tests
