//! Flush (purge) volume matrix.

use serde::{Deserialize, Serialize};

use super::{FilamentId, ToolOrderError, ToolOrderResult};

/// Matrix of flush volumes between filament pairs.
///
/// `get(from, to)` is the volume purged when switching the loaded filament
/// from `from` to `to`. The matrix is asymmetric; the diagonal is usually 0.
/// Serialized as a list of rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Vec<f32>>", into = "Vec<Vec<f32>>")]
pub struct FlushMatrix {
    /// Number of filaments
    size: usize,
    /// Flush volumes, row-major `[from * size + to]`, in mm³
    volumes: Vec<f32>,
}

impl FlushMatrix {
    /// Create a matrix with `default_volume` everywhere except a zero diagonal.
    pub fn new(size: usize, default_volume: f32) -> Self {
        let mut volumes = vec![default_volume; size * size];
        for i in 0..size {
            volumes[i * size + i] = 0.0;
        }
        Self { size, volumes }
    }

    /// Create from a flat slice in row-major order.
    ///
    /// # Panics
    ///
    /// Panics if `values` holds fewer than `size * size` entries.
    pub fn from_flat(size: usize, values: &[f32]) -> Self {
        assert!(values.len() >= size * size);
        Self {
            size,
            volumes: values[..size * size].to_vec(),
        }
    }

    /// Create from explicit rows; every row must have one entry per row.
    pub fn from_rows(rows: Vec<Vec<f32>>) -> ToolOrderResult<Self> {
        let size = rows.len();
        let mut volumes = Vec::with_capacity(size * size);
        for (row, values) in rows.into_iter().enumerate() {
            if values.len() != size {
                return Err(ToolOrderError::NonSquareFlushMatrix {
                    row,
                    len: values.len(),
                    size,
                });
            }
            volumes.extend(values);
        }
        Ok(Self { size, volumes })
    }

    /// Flush volume from one filament to another.
    ///
    /// Both ids must be below [`size`](Self::size); schedulers check this
    /// with [`check_covers`](Self::check_covers) before solving.
    pub fn get(&self, from: FilamentId, to: FilamentId) -> f32 {
        self.volumes[from as usize * self.size + to as usize]
    }

    /// Set the flush volume from one filament to another. Out-of-range ids are ignored.
    pub fn set(&mut self, from: FilamentId, to: FilamentId, volume: f32) {
        let (from, to) = (from as usize, to as usize);
        if from < self.size && to < self.size {
            self.volumes[from * self.size + to] = volume;
        }
    }

    /// Get the matrix size (number of filaments)
    pub fn size(&self) -> usize {
        self.size
    }

    /// Apply a multiplier to all flush volumes
    pub fn apply_multiplier(&mut self, multiplier: f32) {
        for vol in &mut self.volumes {
            *vol *= multiplier;
        }
    }

    /// Whether `filament` has a row and column in this matrix.
    pub fn covers(&self, filament: FilamentId) -> bool {
        (filament as usize) < self.size
    }

    /// Fail if any of `filaments` cannot be priced.
    pub fn check_covers(&self, filaments: impl IntoIterator<Item = FilamentId>) -> ToolOrderResult<()> {
        match filaments.into_iter().find(|&f| !self.covers(f)) {
            Some(filament) => Err(ToolOrderError::FlushMatrixTooSmall {
                size: self.size,
                filament,
            }),
            None => Ok(()),
        }
    }

    /// Total flush volume for a sequence of filaments, without a start filament.
    pub fn total_flush_for_sequence(&self, sequence: &[FilamentId]) -> f32 {
        calculate_flush_volume(sequence, None, self)
    }
}

impl Default for FlushMatrix {
    fn default() -> Self {
        Self::new(0, 0.0)
    }
}

impl TryFrom<Vec<Vec<f32>>> for FlushMatrix {
    type Error = ToolOrderError;

    fn try_from(rows: Vec<Vec<f32>>) -> Result<Self, Self::Error> {
        Self::from_rows(rows)
    }
}

impl From<FlushMatrix> for Vec<Vec<f32>> {
    fn from(matrix: FlushMatrix) -> Self {
        if matrix.size == 0 {
            return Vec::new();
        }
        matrix.volumes.chunks(matrix.size).map(<[f32]>::to_vec).collect()
    }
}

/// Flush volume of loading `sequence` in order, starting from `start`.
///
/// The transition out of `start` is included when a start filament is
/// given; an undefined start contributes nothing.
pub fn calculate_flush_volume(sequence: &[FilamentId], start: Option<FilamentId>, flush_matrix: &FlushMatrix) -> f32 {
    let mut total = 0.0;
    let mut prev = start;
    for &filament in sequence {
        if let Some(p) = prev {
            total += flush_matrix.get(p, filament);
        }
        prev = Some(filament);
    }
    total
}
