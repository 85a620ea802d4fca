/// A face of a rectangular block.
///
/// Faces are numbered in the fixed exchange order `2 * axis + side`
/// (low-x, high-x, low-y, high-y, [low-z, high-z]); this order is part of the
/// wire format of the ghost-cell exchange, since record sort keys embed it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Face {
    pub axis: usize,
    pub side: bool,
}

impl Face {
    /// Face on negative side of axis.
    pub fn negative(axis: usize) -> Self {
        Self { axis, side: false }
    }

    /// Face on positive side of axis.
    pub fn positive(axis: usize) -> Self {
        Self { axis, side: true }
    }

    /// Position of this face in the fixed exchange order.
    pub fn index(self) -> usize {
        2 * self.axis + self.side as usize
    }

    /// Inverse of [`Face::index`].
    pub fn from_index(index: usize) -> Self {
        Self {
            axis: index / 2,
            side: index % 2 == 1,
        }
    }

    /// The face a neighbor sees when looking back across this one.
    pub fn opposite(self) -> Self {
        Self {
            axis: self.axis,
            side: !self.side,
        }
    }
}

/// The number of faces of an `N`-dimensional block.
pub const fn num_faces<const N: usize>() -> usize {
    2 * N
}

/// Iterator over all faces in a given number of dimensions.
pub struct FaceIter<const N: usize> {
    axis: usize,
    side: bool,
}

impl<const N: usize> Iterator for FaceIter<N> {
    type Item = Face;

    fn next(&mut self) -> Option<Self::Item> {
        if self.axis >= N {
            return None;
        }

        let result = Face {
            axis: self.axis,
            side: self.side,
        };

        self.axis += self.side as usize;
        self.side = !self.side;

        Some(result)
    }
}

/// Iterates over all faces in a given number of dimensions, in exchange order.
pub fn faces<const N: usize>() -> FaceIter<N> {
    FaceIter {
        axis: 0,
        side: false,
    }
}
