use super::bc::PeriodicBox;
use crate::core::models::ids::ParticleKey;
use itertools::Itertools;
use nalgebra::{Point3, Vector3};

/// Uniform periodic cell grid over the whole box.
///
/// Every cell edge is at least the requested interaction range, so all pairs
/// within that range are found among a cell and its 26 periodic neighbors.
#[derive(Debug, Clone)]
pub struct CellGrid {
    dims: [usize; 3],
    cell_lengths: Vector3<f64>,
    cells: Vec<Vec<ParticleKey>>,
    /// For each cell, the distinct neighbor cells (itself included) with an
    /// index not below its own.
    forward_neighbors: Vec<Vec<usize>>,
}

impl CellGrid {
    pub fn new(bc: &PeriodicBox, min_cell_size: f64) -> Self {
        let lengths = bc.lengths();
        let mut dims = [1usize; 3];
        if min_cell_size > 0.0 && min_cell_size.is_finite() {
            for axis in 0..3 {
                dims[axis] = ((lengths[axis] / min_cell_size).floor() as usize).max(1);
            }
        }
        let cell_lengths = Vector3::new(
            lengths.x / dims[0] as f64,
            lengths.y / dims[1] as f64,
            lengths.z / dims[2] as f64,
        );
        let total = dims[0] * dims[1] * dims[2];

        let mut forward_neighbors = Vec::with_capacity(total);
        for index in 0..total {
            let [cx, cy, cz] = Self::unflatten(dims, index);
            let neighbors: Vec<usize> = (-1isize..=1)
                .cartesian_product(-1isize..=1)
                .cartesian_product(-1isize..=1)
                .map(|((dx, dy), dz)| {
                    let nx = (cx as isize + dx).rem_euclid(dims[0] as isize) as usize;
                    let ny = (cy as isize + dy).rem_euclid(dims[1] as isize) as usize;
                    let nz = (cz as isize + dz).rem_euclid(dims[2] as isize) as usize;
                    Self::flatten(dims, [nx, ny, nz])
                })
                .filter(|&neighbor| neighbor >= index)
                .sorted_unstable()
                .dedup()
                .collect();
            forward_neighbors.push(neighbors);
        }

        Self {
            dims,
            cell_lengths,
            cells: vec![Vec::new(); total],
            forward_neighbors,
        }
    }

    #[inline]
    pub fn dims(&self) -> [usize; 3] {
        self.dims
    }

    pub fn clear(&mut self) {
        self.cells.iter_mut().for_each(Vec::clear);
    }

    pub fn insert(&mut self, key: ParticleKey, position: &Point3<f64>, bc: &PeriodicBox) {
        let wrapped = bc.wrap(position);
        let mut coords = [0usize; 3];
        for axis in 0..3 {
            let c = (wrapped[axis] / self.cell_lengths[axis]) as usize;
            coords[axis] = c.min(self.dims[axis] - 1);
        }
        let index = Self::flatten(self.dims, coords);
        self.cells[index].push(key);
    }

    pub fn len(&self) -> usize {
        self.cells.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.iter().all(Vec::is_empty)
    }

    /// Every unordered pair of keys in the same or adjacent cells, exactly once.
    pub fn candidate_pairs(&self) -> Vec<(ParticleKey, ParticleKey)> {
        let mut pairs = Vec::new();
        for (index, cell) in self.cells.iter().enumerate() {
            if cell.is_empty() {
                continue;
            }
            for &neighbor in &self.forward_neighbors[index] {
                if neighbor == index {
                    pairs.extend(cell.iter().copied().tuple_combinations::<(_, _)>());
                } else {
                    let other = &self.cells[neighbor];
                    pairs.extend(cell.iter().copied().cartesian_product(other.iter().copied()));
                }
            }
        }
        pairs
    }

    #[inline]
    fn flatten(dims: [usize; 3], [x, y, z]: [usize; 3]) -> usize {
        (x * dims[1] + y) * dims[2] + z
    }

    #[inline]
    fn unflatten(dims: [usize; 3], index: usize) -> [usize; 3] {
        let z = index % dims[2];
        let y = (index / dims[2]) % dims[1];
        let x = index / (dims[1] * dims[2]);
        [x, y, z]
    }
}
