// Sample — one training example handed to the pipeline

use ndarray::{Array1, Array2};

use crate::error::{Error, Result};

/// One molecular configuration.
///
/// `pos` and `z` are always present. Energy (`y`) and forces (`dy`) are
/// optional and depend on which targets the source dataset carries; query
/// them with [`has_energy`](Sample::has_energy) and
/// [`has_forces`](Sample::has_forces).
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    /// Atomic positions, shape `[n_atoms, 3]`.
    pub pos: Array2<f64>,
    /// Atomic numbers, shape `[n_atoms]`.
    pub z: Array1<i64>,
    /// Energy, shape `[1]`.
    pub y: Option<Array1<f64>>,
    /// Forces, shape `[n_atoms, 3]`.
    pub dy: Option<Array2<f64>>,
}

impl Sample {
    /// Build a sample from positions and atomic numbers.
    ///
    /// Fails with [`Error::ShapeMismatch`] unless `pos` is `[n, 3]` and `z`
    /// has `n` entries.
    pub fn new(pos: Array2<f64>, z: Array1<i64>) -> Result<Self> {
        let (n, cols) = pos.dim();
        if cols != 3 || z.len() != n {
            return Err(Error::shape_mismatch(
                "sample positions",
                vec![z.len(), 3],
                vec![n, cols],
            ));
        }
        Ok(Self {
            pos,
            z,
            y: None,
            dy: None,
        })
    }

    /// Attach an energy target. Accepts any one-element array.
    pub fn with_energy(mut self, y: Array1<f64>) -> Result<Self> {
        if y.len() != 1 {
            return Err(Error::shape_mismatch("sample energy", vec![1], vec![y.len()]));
        }
        self.y = Some(y);
        Ok(self)
    }

    /// Attach a force target, which must have the same shape as `pos`.
    pub fn with_forces(mut self, dy: Array2<f64>) -> Result<Self> {
        if dy.dim() != self.pos.dim() {
            let (n, c) = self.pos.dim();
            let (fn_, fc) = dy.dim();
            return Err(Error::shape_mismatch("sample forces", vec![n, c], vec![fn_, fc]));
        }
        self.dy = Some(dy);
        Ok(self)
    }

    pub fn num_atoms(&self) -> usize {
        self.z.len()
    }

    pub fn has_energy(&self) -> bool {
        self.y.is_some()
    }

    pub fn has_forces(&self) -> bool {
        self.dy.is_some()
    }

    /// The scalar energy, if present.
    pub fn energy(&self) -> Option<f64> {
        self.y.as_ref().and_then(|y| y.first().copied())
    }
}
