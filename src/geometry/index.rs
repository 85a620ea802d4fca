#![allow(clippy::needless_range_loop)]

use std::array;

use super::Face;

/// Describes an abstract index space. Allows for iteration of indices
/// in N dimensions, and transformations between cartesian and linear
/// indices. Linear indices run with the first axis fastest.
#[derive(Debug, Clone, Copy)]
pub struct IndexSpace<const N: usize> {
    size: [usize; N],
}

impl<const N: usize> IndexSpace<N> {
    /// Constructs a new index space.
    pub const fn new(size: [usize; N]) -> Self {
        Self { size }
    }

    /// Constructs the cell space of a block with `nc` interior cells and one
    /// ghost layer per face, so indices run over `[0, nc + 1]` on every axis.
    pub const fn cells(nc: usize) -> Self {
        Self::new([nc + 2; N])
    }

    /// Returns the number of indices in the index space.
    pub fn index_count(&self) -> usize {
        let mut result = 1;

        for i in 0..N {
            result *= self.size[i]
        }

        result
    }

    /// Returns the dimensions of the index space along each axis.
    pub fn size(self) -> [usize; N] {
        self.size
    }

    /// Converts a linear index into a cartesian index. This
    /// will likely be an order of magnitude slower than
    /// `linear_from_cartesian()` due to several
    /// modulus operations.
    pub fn cartesian_from_linear(self, mut linear: usize) -> [usize; N] {
        debug_assert!(linear < self.size.iter().product());

        let mut result = [0; N];

        for i in 0..N {
            result[i] = linear % self.size[i];
            linear /= self.size[i];
        }

        result
    }

    /// Converts a cartesian index into a linear index.
    pub fn linear_from_cartesian(self, cartesian: [usize; N]) -> usize {
        for axis in 0..N {
            debug_assert!(cartesian[axis] < self.size[axis]);
        }

        let mut result = 0;
        let mut stride = 1;

        for i in 0..N {
            result += stride * cartesian[i];
            stride *= self.size[i];
        }

        result
    }

    /// Iterates all cartesian indices in the index space.
    pub const fn iter(self) -> CartesianIter<N> {
        CartesianIter {
            size: self.size,
            cursor: [0; N],
        }
    }

    /// Returns an index window corresponding to the entire IndexSpace.
    pub fn window(self) -> IndexWindow<N> {
        IndexWindow {
            origin: [0; N],
            size: self.size,
        }
    }

    /// The window of interior cells of a cell space built by [`IndexSpace::cells`].
    pub fn interior(self) -> IndexWindow<N> {
        IndexWindow {
            origin: [1; N],
            size: array::from_fn(|axis| self.size[axis] - 2),
        }
    }

    /// The window of a one-cell-thick slab of a cell space, parallel to `face`
    /// with the face axis pinned at `coord`. The in-plane axes cover the
    /// interior range `1..=nc`; iteration order is the canonical exchange
    /// order (first in-plane axis fastest).
    pub fn face_slab(self, face: Face, coord: usize) -> IndexWindow<N> {
        let mut origin = [1; N];
        origin[face.axis] = coord;

        let mut size = array::from_fn(|axis| self.size[axis] - 2);
        size[face.axis] = 1;

        IndexWindow { origin, size }
    }

    /// The interior slab adjacent to `face` (the cells shipped to a neighbor).
    pub fn face_interior(self, face: Face) -> IndexWindow<N> {
        let coord = if face.side { self.size[face.axis] - 2 } else { 1 };
        self.face_slab(face, coord)
    }

    /// The ghost slab on `face` (the cells filled from a neighbor).
    pub fn face_ghost(self, face: Face) -> IndexWindow<N> {
        let coord = if face.side { self.size[face.axis] - 1 } else { 0 };
        self.face_slab(face, coord)
    }
}

impl<const N: usize> IntoIterator for IndexSpace<N> {
    type IntoIter = CartesianIter<N>;
    type Item = [usize; N];

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Represents a subset of an index space, and provides utilities for iterating over this window.
#[derive(Debug, Clone, Copy)]
pub struct IndexWindow<const N: usize> {
    /// Stores the origin (bottom-left corner) of the index window
    pub origin: [usize; N],
    /// Stores the size along each axis of the index window.
    pub size: [usize; N],
}

impl<const N: usize> IndexWindow<N> {
    /// Constructs a new index window.
    pub fn new(origin: [usize; N], size: [usize; N]) -> Self {
        Self { origin, size }
    }

    /// Returns the number of indices in the window.
    pub fn index_count(&self) -> usize {
        self.size.iter().product()
    }

    /// Iterates over indices in the index window.
    pub fn iter(&self) -> CartesianWindowIter<N> {
        CartesianWindowIter {
            origin: self.origin,
            inner: IndexSpace::new(self.size).iter(),
        }
    }
}

impl<const N: usize> IntoIterator for IndexWindow<N> {
    type IntoIter = CartesianWindowIter<N>;
    type Item = [usize; N];

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[derive(Debug, Clone)]
/// An iterator over the cartesian indices of an `IndexSpace`.
pub struct CartesianIter<const N: usize> {
    size: [usize; N],
    cursor: [usize; N],
}

impl<const N: usize> Iterator for CartesianIter<N> {
    type Item = [usize; N];

    fn next(&mut self) -> Option<Self::Item> {
        // Last index was incremented, iteration is complete
        if self.cursor[N - 1] == self.size[N - 1] {
            return None;
        }

        // Store current cursor value (this is what we will return)
        let result = self.cursor;

        for i in 0..N {
            if self.size[i] == 0 {
                // Short circuit if any of the dimensions are zero.
                return None;
            }

            // If we need to increment this axis, we add to the cursor value
            self.cursor[i] += 1;
            // If the cursor is equal to size, we wrap.
            // However, if we have reached the final axis,
            // this indicates we are at the end of iteration,
            // and will return None on the next call of next().
            if self.cursor[i] == self.size[i] && i < N - 1 {
                self.cursor[i] = 0;
                // Continue looping over axes
                continue;
            }

            break;
        }

        Some(result)
    }
}

#[derive(Debug, Clone)]
/// An iterator over the cartesian indices of an `IndexWindow`.
pub struct CartesianWindowIter<const N: usize> {
    origin: [usize; N],
    inner: CartesianIter<N>,
}

impl<const N: usize> Iterator for CartesianWindowIter<N> {
    type Item = [usize; N];

    fn next(&mut self) -> Option<Self::Item> {
        let offset = self.inner.next()?;
        Some(array::from_fn(|i| self.origin[i] + offset[i]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// First axis fastest. The ghost exchange leans on this: it is the wire
    /// layout of every packed face slab, on both sides of a message.
    #[test]
    fn iteration_is_first_axis_fastest() {
        let space = IndexSpace::new([2, 3]);
        let indices: Vec<_> = space.iter().collect();

        assert_eq!(
            indices,
            vec![[0, 0], [1, 0], [0, 1], [1, 1], [0, 2], [1, 2]]
        );

        assert_eq!(IndexSpace::new([0, 4]).iter().next(), None);
    }

    /// Linear and cartesian indices round-trip over a full cell space
    /// (interior plus ghost frame), with strides following the axis order.
    #[test]
    fn linear_round_trip_over_a_cell_space() {
        let space = IndexSpace::<3>::cells(4);
        assert_eq!(space.size(), [6, 6, 6]);
        assert_eq!(space.index_count(), 216);

        for (linear, cell) in space.iter().enumerate() {
            assert_eq!(space.linear_from_cartesian(cell), linear);
            assert_eq!(space.cartesian_from_linear(linear), cell);
        }

        assert_eq!(space.linear_from_cartesian([1, 0, 0]), 1);
        assert_eq!(space.linear_from_cartesian([0, 1, 0]), 6);
        assert_eq!(space.linear_from_cartesian([0, 0, 1]), 36);
    }

    #[test]
    fn interior_excludes_the_ghost_frame() {
        let space = IndexSpace::<2>::cells(4);
        let interior = space.interior();

        assert_eq!(interior.origin, [1, 1]);
        assert_eq!(interior.size, [4, 4]);
        assert_eq!(interior.index_count(), 16);
        assert!(interior
            .iter()
            .all(|cell| (1..=4).contains(&cell[0]) && (1..=4).contains(&cell[1])));
    }

    #[test]
    fn slab_windows() {
        // 4 interior cells per axis, ghosts at 0 and 5.
        let space = IndexSpace::<2>::cells(4);

        let ghost = space.face_ghost(Face::positive(0));
        assert_eq!(ghost.origin, [5, 1]);
        assert_eq!(ghost.size, [1, 4]);

        let interior = space.face_interior(Face::positive(0));
        assert_eq!(interior.origin, [4, 1]);

        let low = space.face_interior(Face::negative(1));
        assert_eq!(low.origin, [1, 1]);
        assert_eq!(low.size, [4, 1]);
        assert_eq!(low.index_count(), 4);

        let cells: Vec<_> = low.iter().collect();
        assert_eq!(cells, vec![[1, 1], [2, 1], [3, 1], [4, 1]]);
    }
}
