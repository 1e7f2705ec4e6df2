// GlobDataset — samples assembled from glob-matched .npy files
//
// Each glob resolves to a sorted list of files. File i of the coordinate glob
// belongs with file i of every other glob; nothing beyond the sort order ties
// them together, so filenames must line up.
//
// Per file:
//   coords  [n, atoms, 3]   one block of n samples
//   embed   [atoms]          atomic numbers shared by the block
//   energy  [n, 1] or [n]    optional
//   forces  [n, atoms, 3]    optional
//
// Everything is loaded and checked in `new`; `get` only slices memory.

use std::path::{Path, PathBuf};

use ndarray::{Array1, Array2, Array3, Axis, Ix1, Ix2, Ix3};
use rayon::prelude::*;
use serde::Deserialize;
use tracing::{debug, info};

use molset_core::{config_bail, Error, Result};

use crate::dataset::{check_index, Dataset, Sample};
use crate::npy;

/// Glob patterns describing where a [`GlobDataset`] finds its arrays.
///
/// At least one of `energy_glob` / `force_glob` must be set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct GlobDatasetConfig {
    /// Pattern for coordinate files, `[n, atoms, 3]` each.
    #[serde(alias = "coordglob")]
    pub coord_glob: String,
    /// Pattern for atomic-number files, `[atoms]` each.
    #[serde(alias = "embedglob")]
    pub embed_glob: String,
    /// Pattern for energy files, `[n, 1]` each.
    #[serde(default, alias = "energyglob")]
    pub energy_glob: Option<String>,
    /// Pattern for force files, `[n, atoms, 3]` each.
    #[serde(default, alias = "forceglob")]
    pub force_glob: Option<String>,
}

impl GlobDatasetConfig {
    pub fn new(coord_glob: impl Into<String>, embed_glob: impl Into<String>) -> Self {
        Self {
            coord_glob: coord_glob.into(),
            embed_glob: embed_glob.into(),
            energy_glob: None,
            force_glob: None,
        }
    }

    pub fn energy_glob(mut self, pattern: impl Into<String>) -> Self {
        self.energy_glob = Some(pattern.into());
        self
    }

    pub fn force_glob(mut self, pattern: impl Into<String>) -> Self {
        self.force_glob = Some(pattern.into());
        self
    }
}

/// The sorted file lists a [`GlobDataset`] was built from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GlobFiles {
    pub coords: Vec<PathBuf>,
    pub embed: Vec<PathBuf>,
    pub energy: Option<Vec<PathBuf>>,
    pub forces: Option<Vec<PathBuf>>,
}

/// All arrays contributed by one file index.
#[derive(Debug, Clone)]
struct Block {
    coords: Array3<f64>,
    embed: Array1<i64>,
    energy: Option<Array2<f64>>,
    forces: Option<Array3<f64>>,
}

impl Block {
    fn num_samples(&self) -> usize {
        self.coords.len_of(Axis(0))
    }
}

/// A dataset assembled eagerly from glob-matched `.npy` files.
///
/// Blocks may differ in atom count (one molecule per file), so samples are
/// kept per block and addressed through cumulative offsets rather than one
/// dense array.
///
/// # Example
/// ```ignore
/// let ds = GlobDataset::new(
///     GlobDatasetConfig::new("data/coords_*.npy", "data/embed_*.npy")
///         .energy_glob("data/energy_*.npy"),
/// )?;
/// let s = ds.get(0)?;
/// assert!(s.has_energy());
/// ```
#[derive(Debug, Clone)]
pub struct GlobDataset {
    blocks: Vec<Block>,
    /// `ends[k]` is one past the last global index held by block `k`.
    ends: Vec<usize>,
    files: GlobFiles,
}

impl GlobDataset {
    /// Resolve the globs, load every file, and validate shapes.
    pub fn new(config: GlobDatasetConfig) -> Result<Self> {
        if config.energy_glob.is_none() && config.force_glob.is_none() {
            config_bail!("at least one of energy_glob or force_glob must be given");
        }

        let files = GlobFiles {
            coords: resolve_glob(&config.coord_glob)?,
            embed: resolve_glob(&config.embed_glob)?,
            energy: config.energy_glob.as_deref().map(resolve_glob).transpose()?,
            forces: config.force_glob.as_deref().map(resolve_glob).transpose()?,
        };

        let num_files = files.coords.len();
        check_file_count("embed", num_files, files.embed.len())?;
        if let Some(energy) = &files.energy {
            check_file_count("energy", num_files, energy.len())?;
        }
        if let Some(forces) = &files.forces {
            check_file_count("forces", num_files, forces.len())?;
        }

        let blocks = (0..num_files)
            .into_par_iter()
            .map(|i| {
                load_block(
                    &files.coords[i],
                    &files.embed[i],
                    files.energy.as_ref().map(|f| f[i].as_path()),
                    files.forces.as_ref().map(|f| f[i].as_path()),
                )
            })
            .collect::<Result<Vec<Block>>>()?;

        let ends = blocks
            .iter()
            .scan(0usize, |total, b| {
                *total += b.num_samples();
                Some(*total)
            })
            .collect::<Vec<_>>();

        let ds = Self {
            blocks,
            ends,
            files,
        };
        info!(
            files = num_files,
            samples = ds.num_samples(),
            energy = ds.has_energy(),
            forces = ds.has_forces(),
            "assembled glob dataset"
        );
        Ok(ds)
    }

    pub fn num_samples(&self) -> usize {
        self.ends.last().copied().unwrap_or(0)
    }

    pub fn num_files(&self) -> usize {
        self.blocks.len()
    }

    pub fn has_energy(&self) -> bool {
        self.files.energy.is_some()
    }

    pub fn has_forces(&self) -> bool {
        self.files.forces.is_some()
    }

    /// The resolved, sorted file lists.
    pub fn files(&self) -> &GlobFiles {
        &self.files
    }

    /// Map a global index to (block, index within block).
    fn locate(&self, index: usize) -> (usize, usize) {
        let block = self.ends.partition_point(|&end| end <= index);
        let start = if block == 0 { 0 } else { self.ends[block - 1] };
        (block, index - start)
    }
}

impl Dataset for GlobDataset {
    fn len(&self) -> Result<usize> {
        Ok(self.num_samples())
    }

    fn get(&self, index: usize) -> Result<Sample> {
        check_index(index, self.num_samples())?;
        let (b, local) = self.locate(index);
        let block = &self.blocks[b];

        Ok(Sample {
            pos: block.coords.index_axis(Axis(0), local).to_owned(),
            z: block.embed.clone(),
            y: block
                .energy
                .as_ref()
                .map(|e| e.index_axis(Axis(0), local).to_owned()),
            dy: block
                .forces
                .as_ref()
                .map(|f| f.index_axis(Axis(0), local).to_owned()),
        })
    }

    fn name(&self) -> &str {
        "glob"
    }
}

/// Expand a glob pattern into a lexicographically sorted path list.
///
/// An empty match is a configuration error: a typo in a pattern would
/// otherwise silently produce an empty dataset.
pub fn resolve_glob(pattern: &str) -> Result<Vec<PathBuf>> {
    let entries = glob::glob(pattern).map_err(|e| Error::Glob {
        pattern: pattern.to_string(),
        reason: e.to_string(),
    })?;

    let mut paths = entries
        .map(|entry| {
            entry.map_err(|e| Error::Glob {
                pattern: pattern.to_string(),
                reason: e.to_string(),
            })
        })
        .collect::<Result<Vec<PathBuf>>>()?;
    paths.sort();

    if paths.is_empty() {
        config_bail!("glob {pattern:?} matched no files");
    }
    debug!(pattern, matched = paths.len(), "resolved glob");
    Ok(paths)
}

fn check_file_count(what: &str, expected: usize, got: usize) -> Result<()> {
    if expected != got {
        return Err(Error::shape_mismatch(
            format!("number of {what} files"),
            vec![expected],
            vec![got],
        ));
    }
    Ok(())
}

fn load_block(
    coords_path: &Path,
    embed_path: &Path,
    energy_path: Option<&Path>,
    forces_path: Option<&Path>,
) -> Result<Block> {
    debug!(file = %coords_path.display(), "loading block");

    let coords = npy::read_f64(coords_path)?;
    let coords = coords
        .into_dimensionality::<Ix3>()
        .map_err(|e| Error::format(coords_path, format!("coordinates must be [n, atoms, 3]: {e}")))?;
    let (n, atoms, xyz) = coords.dim();
    if xyz != 3 {
        return Err(Error::shape_mismatch(
            format!("coordinates of {}", coords_path.display()),
            vec![n, atoms, 3],
            vec![n, atoms, xyz],
        ));
    }

    let embed = npy::read_i64(embed_path)?
        .into_dimensionality::<Ix1>()
        .map_err(|e| Error::format(embed_path, format!("atomic numbers must be [atoms]: {e}")))?;
    if embed.len() != atoms {
        return Err(Error::shape_mismatch(
            format!("atomic numbers of {}", embed_path.display()),
            vec![atoms],
            vec![embed.len()],
        ));
    }

    let energy = energy_path.map(|p| load_energy(p, n)).transpose()?;

    let forces = forces_path
        .map(|p| -> Result<Array3<f64>> {
            let f = npy::read_f64(p)?;
            if f.shape() != coords.shape() {
                return Err(Error::shape_mismatch(
                    format!("forces of {}", p.display()),
                    coords.shape(),
                    f.shape(),
                ));
            }
            f.into_dimensionality::<Ix3>()
                .map_err(|e| Error::format(p, e.to_string()))
        })
        .transpose()?;

    Ok(Block {
        coords,
        embed,
        energy,
        forces,
    })
}

/// Energies come as `[n, 1]` or flat `[n]`; both become `[n, 1]`.
fn load_energy(path: &Path, n: usize) -> Result<Array2<f64>> {
    let e = npy::read_f64(path)?;
    let e = match e.ndim() {
        1 => e.insert_axis(Axis(1)),
        _ => e,
    };
    if e.shape() != [n, 1] {
        return Err(Error::shape_mismatch(
            format!("energies of {}", path.display()),
            vec![n, 1],
            e.shape(),
        ));
    }
    e.into_dimensionality::<Ix2>()
        .map_err(|err| Error::format(path, err.to_string()))
}
