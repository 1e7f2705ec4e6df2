// DataLoader — batching, shuffling, iteration
//
// Molecules differ in atom count, so a batch is not a stack of equal-shaped
// samples. Atoms of all samples are laid end to end and `batch[k]` records
// which sample atom k came from.

use ndarray::{concatenate, Array1, Array2, ArrayView1, ArrayView2, Axis};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{thread_rng, SeedableRng};
use rayon::prelude::*;

use molset_core::{config_bail, Error, Result};

use crate::dataset::{Dataset, Sample};

/// Configuration for the DataLoader.
#[derive(Debug, Clone)]
pub struct DataLoaderConfig {
    /// Number of samples per batch.
    pub batch_size: usize,
    /// Whether to shuffle indices each epoch.
    pub shuffle: bool,
    /// Whether to drop the last incomplete batch.
    pub drop_last: bool,
    /// Number of parallel workers for sample fetching (0 = sequential).
    pub num_workers: usize,
    /// Optional random seed for reproducible shuffling.
    pub seed: Option<u64>,
}

impl Default for DataLoaderConfig {
    fn default() -> Self {
        Self {
            batch_size: 32,
            shuffle: true,
            drop_last: false,
            num_workers: 0,
            seed: None,
        }
    }
}

impl DataLoaderConfig {
    pub fn batch_size(mut self, bs: usize) -> Self {
        self.batch_size = bs;
        self
    }

    pub fn shuffle(mut self, s: bool) -> Self {
        self.shuffle = s;
        self
    }

    pub fn drop_last(mut self, d: bool) -> Self {
        self.drop_last = d;
        self
    }

    pub fn num_workers(mut self, n: usize) -> Self {
        self.num_workers = n;
        self
    }

    pub fn seed(mut self, s: u64) -> Self {
        self.seed = Some(s);
        self
    }
}

/// Several samples collated for one forward pass.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    /// Positions of every atom, `[total_atoms, 3]`.
    pub pos: Array2<f64>,
    /// Atomic numbers, `[total_atoms]`.
    pub z: Array1<i64>,
    /// Owning sample of each atom, `[total_atoms]`.
    pub batch: Array1<usize>,
    /// Energies, `[num_samples, 1]`, when every sample has one.
    pub y: Option<Array2<f64>>,
    /// Forces, `[total_atoms, 3]`, when every sample has them.
    pub dy: Option<Array2<f64>>,
}

impl Batch {
    /// Collate samples into a batch.
    pub fn collate(samples: &[Sample]) -> Result<Self> {
        if samples.is_empty() {
            config_bail!("cannot collate an empty batch");
        }

        let pos_views: Vec<ArrayView2<f64>> = samples.iter().map(|s| s.pos.view()).collect();
        let z_views: Vec<ArrayView1<i64>> = samples.iter().map(|s| s.z.view()).collect();
        let pos = concatenate(Axis(0), &pos_views).map_err(|e| Error::msg(e.to_string()))?;
        let z = concatenate(Axis(0), &z_views).map_err(|e| Error::msg(e.to_string()))?;

        let batch = samples
            .iter()
            .enumerate()
            .flat_map(|(i, s)| std::iter::repeat(i).take(s.num_atoms()))
            .collect::<Array1<usize>>();

        let y = if samples.iter().all(Sample::has_energy) {
            let energies = samples
                .iter()
                .filter_map(|s| s.energy())
                .collect::<Vec<f64>>();
            Some(
                Array2::from_shape_vec((samples.len(), 1), energies)
                    .map_err(|e| Error::msg(e.to_string()))?,
            )
        } else {
            None
        };

        let dy = if samples.iter().all(Sample::has_forces) {
            let views: Vec<ArrayView2<f64>> = samples
                .iter()
                .filter_map(|s| s.dy.as_ref().map(|d| d.view()))
                .collect();
            Some(concatenate(Axis(0), &views).map_err(|e| Error::msg(e.to_string()))?)
        } else {
            None
        };

        Ok(Self { pos, z, batch, y, dy })
    }

    pub fn num_samples(&self) -> usize {
        self.batch.last().map_or(0, |&last| last + 1)
    }

    pub fn num_atoms(&self) -> usize {
        self.z.len()
    }
}

/// A DataLoader wraps a Dataset and produces batches.
pub struct DataLoader<'a> {
    dataset: &'a dyn Dataset,
    config: DataLoaderConfig,
    indices: Vec<usize>,
}

impl<'a> DataLoader<'a> {
    /// Create a new DataLoader over a dataset.
    pub fn new(dataset: &'a dyn Dataset, config: DataLoaderConfig) -> Result<Self> {
        if config.batch_size == 0 {
            config_bail!("batch_size must be at least 1");
        }
        let indices: Vec<usize> = (0..dataset.len()?).collect();
        Ok(Self {
            dataset,
            config,
            indices,
        })
    }

    /// The number of batches per epoch.
    pub fn num_batches(&self) -> usize {
        if self.config.drop_last {
            self.indices.len() / self.config.batch_size
        } else {
            self.indices.len().div_ceil(self.config.batch_size)
        }
    }

    /// Total number of samples.
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    /// Whether the dataset is empty.
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Reshuffle indices (call at the start of each epoch).
    pub fn reshuffle(&mut self) {
        if self.config.shuffle {
            match self.config.seed {
                Some(seed) => {
                    let mut rng = StdRng::seed_from_u64(seed);
                    self.indices.shuffle(&mut rng);
                }
                None => {
                    let mut rng = thread_rng();
                    self.indices.shuffle(&mut rng);
                }
            }
        }
    }

    /// Fetch a slice of samples, optionally in parallel via rayon.
    fn fetch_samples(&self, indices: &[usize]) -> Result<Vec<Sample>> {
        if self.config.num_workers > 0 && indices.len() > 1 {
            indices.par_iter().map(|&i| self.dataset.get(i)).collect()
        } else {
            indices.iter().map(|&i| self.dataset.get(i)).collect()
        }
    }

    fn batch_at(&self, batch_idx: usize) -> Option<Result<Batch>> {
        let bs = self.config.batch_size;
        let n = self.indices.len();
        let start = batch_idx * bs;
        if start >= n || (self.config.drop_last && start + bs > n) {
            return None;
        }
        let end = (start + bs).min(n);
        Some(
            self.fetch_samples(&self.indices[start..end])
                .and_then(|samples| Batch::collate(&samples)),
        )
    }

    /// Produce all batches for one epoch.
    pub fn epoch_batches(&mut self) -> Result<Vec<Batch>> {
        self.reshuffle();
        (0..self.num_batches())
            .filter_map(|b| self.batch_at(b))
            .collect()
    }

    /// Iterate over batches one at a time (lower memory than `epoch_batches`).
    pub fn iter_batches(&mut self) -> BatchIterator<'_, 'a> {
        self.reshuffle();
        BatchIterator {
            loader: self,
            batch_idx: 0,
        }
    }
}

/// Iterator that yields one batch at a time.
pub struct BatchIterator<'l, 'a> {
    loader: &'l DataLoader<'a>,
    batch_idx: usize,
}

impl Iterator for BatchIterator<'_, '_> {
    type Item = Result<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        let item = self.loader.batch_at(self.batch_idx)?;
        self.batch_idx += 1;
        Some(item)
    }
}
