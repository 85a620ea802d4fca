//! The discretized Laplacian and residual evaluation.
//!
//! `L φ` at a cell is the standard 5-point (2D) / 7-point (3D) stencil with
//! the uniform per-level spacing: `(Σ φ_nbr − 2N·φ) / dr²`. Ghost layers must
//! be valid; the kernels read one cell past the interior on every axis.

use crate::comm::Transport;
use crate::field::Field;
use crate::geometry::IndexSpace;

use super::Multigrid;

impl<const N: usize, T: Transport> Multigrid<N, T> {
    /// Writes `L φ` into `out` on the interior of one owned block.
    pub fn box_lpl(&mut self, id: usize, out: Field) {
        let level = self.forest.box_node(id).level;
        let space = self.forest.cell_space(level);
        let spacing = self.forest.level(level).spacing;
        let src = self.forest.field_offset(level, Field::Phi);
        let dst = self.forest.field_offset(level, out);

        laplacian(space, spacing, self.forest.cc_all_mut(id), src, dst);
    }

    /// Writes `res = ρ − L φ` on the interior of one owned block and returns
    /// the block's `max|res|`.
    pub(super) fn box_residual(&mut self, id: usize) -> f64 {
        let level = self.forest.box_node(id).level;
        let space = self.forest.cell_space(level);
        let spacing = self.forest.level(level).spacing;
        let phi = self.forest.field_offset(level, Field::Phi);
        let rhs = self.forest.field_offset(level, Field::Rhs);
        let res = self.forest.field_offset(level, Field::Res);

        let idr2 = 1.0 / (spacing * spacing);
        let cc = self.forest.cc_all_mut(id);
        let mut result: f64 = 0.0;

        for cell in space.interior().iter() {
            let at = space.linear_from_cartesian(cell);
            let lap = (stencil_sum(space, cc, phi, cell) - (2 * N) as f64 * cc[phi + at]) * idr2;
            cc[res + at] = cc[rhs + at] - lap;
            result = result.max(cc[res + at].abs());
        }

        result
    }

    /// Computes `res = ρ − L φ` on every owned block of a level; returns the
    /// rank-local `max|res|`.
    pub fn residual_lvl(&mut self, level: usize) -> f64 {
        let ids = self.forest.level(level).my_ids.clone();
        let mut result: f64 = 0.0;

        for id in ids {
            result = result.max(self.box_residual(id));
        }

        result
    }

    /// The maximum interior `|ρ − L φ|` over owned blocks of a level. Local
    /// to this rank; nothing is reduced.
    pub fn max_residual_lvl(&mut self, level: usize) -> f64 {
        let space = self.forest.cell_space(level);
        let spacing = self.forest.level(level).spacing;
        let phi = self.forest.field_offset(level, Field::Phi);
        let rhs = self.forest.field_offset(level, Field::Rhs);
        let idr2 = 1.0 / (spacing * spacing);

        let ids = self.forest.level(level).my_ids.clone();
        let mut result: f64 = 0.0;

        for id in ids {
            let cc = self.forest.cc_all_mut(id);

            for cell in space.interior().iter() {
                let at = space.linear_from_cartesian(cell);
                let lap =
                    (stencil_sum(space, cc, phi, cell) - (2 * N) as f64 * cc[phi + at]) * idr2;
                result = result.max((cc[rhs + at] - lap).abs());
            }
        }

        result
    }
}

/// Sum of the 2N face-neighbor values of a cell.
#[inline]
pub(super) fn stencil_sum<const N: usize>(
    space: IndexSpace<N>,
    cc: &[f64],
    offset: usize,
    cell: [usize; N],
) -> f64 {
    let mut sum = 0.0;

    for axis in 0..N {
        let mut probe = cell;
        probe[axis] -= 1;
        sum += cc[offset + space.linear_from_cartesian(probe)];
        probe[axis] += 2;
        sum += cc[offset + space.linear_from_cartesian(probe)];
    }

    sum
}

/// `dst = L src` on the interior.
pub(super) fn laplacian<const N: usize>(
    space: IndexSpace<N>,
    spacing: f64,
    cc: &mut [f64],
    src: usize,
    dst: usize,
) {
    let idr2 = 1.0 / (spacing * spacing);

    for cell in space.interior().iter() {
        let at = space.linear_from_cartesian(cell);
        cc[dst + at] = (stencil_sum(space, cc, src, cell) - (2 * N) as f64 * cc[src + at]) * idr2;
    }
}
