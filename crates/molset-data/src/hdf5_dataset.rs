// Hdf5Dataset — lazily opened HDF5 store, one handle per worker process
//
// Layout of each file:
//   /<group>/types   [n] or [n, atoms]        atomic numbers
//   /<group>/pos     [n, 3] or [n, atoms, 3]  positions
//   /<group>/energy  [n] or [n, 1]
//   /<group>/forces  same shape as pos        optional
//
// `types` may be stored as integers or as whole-valued floats.
//
// Usually a file holds a single group. Several files may be chained with ';'
// in the path; rows are numbered across files in path order, then across
// groups in name order. Groups whose name starts with '_' are metadata and
// are skipped.
//
// Constructing the dataset does no I/O. The first `len`/`get` in a process
// opens the files for that process only; see `process_local`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use hdf5::types::{H5Type, TypeDescriptor};
use ndarray::{s, Array1, Array2};
use serde::{Deserialize, Serialize};
use tracing::debug;

use molset_core::{Error, Result};

use crate::dataset::{check_index, Dataset, Sample};
use crate::npy::integral_to_i64;
use crate::process_local::{HandleId, IdentityFn, ProcessHandle, ProcessLocal};

/// Separator between file names in an [`Hdf5Dataset`] path.
pub const PATH_SEPARATOR: char = ';';

/// A dataset backed by one or more HDF5 files, opened lazily per process.
///
/// Clone it or send it through serde to hand it to a worker; the copy opens
/// its own handle on first access in that worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hdf5Dataset {
    path: String,
    #[serde(skip)]
    store: ProcessLocal<Hdf5Store>,
}

impl Hdf5Dataset {
    /// Wrap `path` without touching the filesystem.
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            store: ProcessLocal::new(),
        }
    }

    /// Like [`new`](Self::new), with a custom process identity source.
    pub fn with_identity(path: impl Into<String>, identity: IdentityFn) -> Self {
        Self {
            path: path.into(),
            store: ProcessLocal::with_identity(identity),
        }
    }

    /// The path string as given, possibly several files joined by `;`.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The individual file paths.
    pub fn paths(&self) -> Vec<PathBuf> {
        split_paths(&self.path)
    }

    /// Identity of the handle the calling process uses, opening it if needed.
    pub fn handle_id(&self) -> Result<HandleId> {
        Ok(self.store()?.id())
    }

    /// Whether the calling process has already opened its handle.
    pub fn is_open(&self) -> bool {
        self.store.current().is_some()
    }

    fn store(&self) -> Result<Arc<ProcessHandle<Hdf5Store>>> {
        self.store.get_or_try_open(|| Hdf5Store::open(&self.path))
    }
}

impl Dataset for Hdf5Dataset {
    fn len(&self) -> Result<usize> {
        Ok(self.store()?.num_rows())
    }

    fn get(&self, index: usize) -> Result<Sample> {
        let store = self.store()?;
        check_index(index, store.num_rows())?;
        let (g, row) = store.locate(index);
        store.groups[g].read_sample(row)
    }

    fn name(&self) -> &str {
        "hdf5"
    }
}

fn split_paths(spec: &str) -> Vec<PathBuf> {
    spec.split(PATH_SEPARATOR)
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(PathBuf::from)
        .collect()
}

/// Everything one process holds open.
struct Hdf5Store {
    // Declared before `files` so the datasets close first.
    groups: Vec<GroupRows>,
    ends: Vec<usize>,
    _files: Vec<hdf5::File>,
}

impl Hdf5Store {
    fn open(spec: &str) -> Result<Self> {
        let paths = split_paths(spec);
        if paths.is_empty() {
            return Err(Error::file_access(spec, "empty path"));
        }

        let mut files = Vec::with_capacity(paths.len());
        let mut groups = Vec::new();
        for path in &paths {
            let file = hdf5::File::open(path).map_err(|e| Error::file_access(path, e))?;
            let mut names = file
                .member_names()
                .map_err(|e| Error::file_access(path, e))?;
            names.sort();

            for name in names.iter().filter(|n| !n.starts_with('_')) {
                // Top-level datasets are not sample groups.
                if let Ok(group) = file.group(name) {
                    groups.push(GroupRows::open(path, name, &group)?);
                }
            }
            files.push(file);
        }

        if groups.is_empty() {
            return Err(Error::file_access(&paths[0], "no sample groups found"));
        }

        let ends = groups
            .iter()
            .scan(0usize, |total, g| {
                *total += g.rows;
                Some(*total)
            })
            .collect::<Vec<_>>();

        debug!(
            files = files.len(),
            groups = groups.len(),
            rows = ends.last().copied().unwrap_or(0),
            "indexed hdf5 store"
        );
        Ok(Self {
            groups,
            ends,
            _files: files,
        })
    }

    fn num_rows(&self) -> usize {
        self.ends.last().copied().unwrap_or(0)
    }

    fn locate(&self, index: usize) -> (usize, usize) {
        let g = self.ends.partition_point(|&end| end <= index);
        let start = if g == 0 { 0 } else { self.ends[g - 1] };
        (g, index - start)
    }
}

/// The datasets of one sample group.
struct GroupRows {
    path: PathBuf,
    types: hdf5::Dataset,
    types_are_float: bool,
    pos: hdf5::Dataset,
    energy: hdf5::Dataset,
    forces: Option<hdf5::Dataset>,
    rows: usize,
}

impl GroupRows {
    fn open(path: &Path, name: &str, group: &hdf5::Group) -> Result<Self> {
        let broken = |what: String| Error::file_access(path, format!("group {name}: {what}"));
        let field = |f: &str| {
            group
                .dataset(f)
                .map_err(|e| broken(format!("field {f}: {e}")))
        };

        let types = field("types")?;
        let pos = field("pos")?;
        let energy = field("energy")?;
        let forces = if group.link_exists("forces") {
            Some(field("forces")?)
        } else {
            None
        };

        let rows = energy.shape().first().copied().unwrap_or(0);
        let check = |what: &str, ds: &hdf5::Dataset| -> Result<()> {
            let got = ds.shape().first().copied().unwrap_or(0);
            if got != rows {
                return Err(Error::shape_mismatch(
                    format!("rows of {name}/{what} in {}", path.display()),
                    vec![rows],
                    vec![got],
                ));
            }
            Ok(())
        };
        check("types", &types)?;
        check("pos", &pos)?;
        if let Some(f) = &forces {
            check("forces", f)?;
        }

        // Per-row layout: types [atoms] or scalar, pos [atoms, 3] or [3].
        let atoms = match types.shape().as_slice() {
            [_] => 1,
            [_, a] => *a,
            other => return Err(broken(format!("types must be [n] or [n, atoms], got {other:?}"))),
        };
        let pos_shape = pos.shape();
        let pos_atoms = match pos_shape.as_slice() {
            [_, 3] => 1,
            [_, a, 3] => *a,
            other => return Err(broken(format!("pos must be [n, 3] or [n, atoms, 3], got {other:?}"))),
        };
        if pos_atoms != atoms {
            return Err(Error::shape_mismatch(
                format!("atoms of {name}/pos in {}", path.display()),
                vec![atoms],
                vec![pos_atoms],
            ));
        }
        if let Some(f) = &forces {
            if f.shape() != pos_shape {
                return Err(Error::shape_mismatch(
                    format!("{name}/forces in {}", path.display()),
                    pos_shape.clone(),
                    f.shape(),
                ));
            }
        }
        if !matches!(energy.shape().as_slice(), [_] | [_, 1]) {
            return Err(broken(format!("energy must be [n] or [n, 1], got {:?}", energy.shape())));
        }

        let types_are_float = types
            .dtype()
            .and_then(|t| t.to_descriptor())
            .map(|desc| matches!(desc, TypeDescriptor::Float(_)))
            .map_err(|e| broken(format!("dtype of types: {e}")))?;

        Ok(Self {
            path: path.to_path_buf(),
            types,
            types_are_float,
            pos,
            energy,
            forces,
            rows,
        })
    }

    fn read_sample(&self, row: usize) -> Result<Sample> {
        let z = if self.types_are_float {
            read_row_1d::<f64>(&self.types, row)
                .map_err(|e| self.read_error(e))?
                .iter()
                .map(|&v| integral_to_i64(v, &self.path))
                .collect::<Result<Array1<i64>>>()?
        } else {
            read_row_1d::<i64>(&self.types, row).map_err(|e| self.read_error(e))?
        };
        let pos = read_row_2d(&self.pos, row).map_err(|e| self.read_error(e))?;
        let y = read_row_1d::<f64>(&self.energy, row).map_err(|e| self.read_error(e))?;

        let sample = Sample::new(pos, z)?.with_energy(y)?;
        match &self.forces {
            Some(f) => {
                let dy = read_row_2d(f, row).map_err(|e| self.read_error(e))?;
                sample.with_forces(dy)
            }
            None => Ok(sample),
        }
    }

    fn read_error(&self, e: hdf5::Error) -> Error {
        Error::file_access(&self.path, e)
    }
}

/// Row `row` of a `[n]` or `[n, k]` dataset as a 1-D array.
fn read_row_1d<T: H5Type>(ds: &hdf5::Dataset, row: usize) -> hdf5::Result<Array1<T>> {
    if ds.ndim() == 1 {
        ds.read_slice_1d(s![row..row + 1])
    } else {
        ds.read_slice_1d(s![row, ..])
    }
}

/// Row `row` of a `[n, 3]` or `[n, atoms, 3]` dataset as `[atoms, 3]`.
fn read_row_2d(ds: &hdf5::Dataset, row: usize) -> hdf5::Result<Array2<f64>> {
    if ds.ndim() == 2 {
        ds.read_slice_2d(s![row..row + 1, ..])
    } else {
        ds.read_slice_2d(s![row, .., ..])
    }
}
