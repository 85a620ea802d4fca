//! Grid transfers between adjacent levels.
//!
//! Restriction averages each owned fine block 2^N-to-1 and lands it in the
//! child's region of the parent; prolongation interpolates a parent's data
//! onto each child and delivers a full fine block per child. Either side of a
//! transfer may live on another rank, in which case the record travels
//! through the same key-sorted buffer pool as the ghost exchange, keyed by
//! the fine block id. Receivers walk parents (and their children) or fine
//! blocks in ascending id, which is exactly ascending key order.
//!
//! The single-block chain below the base level runs through the same code:
//! its one "child" covers the whole parent at offset zero.

use crate::comm::{CommError, Transport};
use crate::field::Field;
use crate::forest::Forest;
use crate::geometry::{num_children, IndexSpace};

use super::Multigrid;

impl<const N: usize, T: Transport> Multigrid<N, T> {
    /// Restricts a field from `level` onto the child regions of the parents
    /// one level down.
    pub fn restrict_lvl(&mut self, field: Field, level: usize) -> Result<(), CommError> {
        assert!(level > 0, "cannot restrict below the coarsest level");

        let me = self.forest.my_rank();
        let record = restricted_len::<N>(&self.forest, level);

        self.buffers.reset_cursors();

        let ids = self.forest.level(level).my_ids.clone();
        for id in ids {
            let Some(parent) = self.forest.box_node(id).parent else {
                continue;
            };

            restrict_block(&self.forest, id, field, &mut self.snap);

            let peer = self.forest.rank_of(parent);
            if peer == me {
                write_restricted(&mut self.forest, parent, id, field, &self.snap);
            } else {
                self.buffers.push_record(peer, id, &self.snap);
            }
        }

        for peer in 0..self.forest.num_ranks() {
            if peer != me {
                debug_assert_eq!(
                    self.buffers.send_count(peer),
                    self.plan.restrict_send[level][peer]
                );
                self.buffers
                    .set_expected_recv(peer, self.plan.restrict_recv[level][peer]);
            }
        }

        self.buffers.sort_and_transfer(&mut self.transport, record)?;
        self.buffers.reset_read();

        let parents = self.forest.level(level - 1).my_parents.clone();
        for parent in parents {
            let children = self.forest.box_node(parent).children.clone();

            for child in children {
                let peer = self.forest.rank_of(child);
                if peer == me {
                    continue;
                }

                let data = self.buffers.take_recv(peer, record);
                self.snap.clear();
                self.snap.extend_from_slice(data);

                write_restricted(&mut self.forest, parent, child, field, &self.snap);
            }
        }

        Ok(())
    }

    /// Prolongs a field from `level` onto the children one level up, either
    /// overwriting or adding (the FAS correction is additive).
    pub fn prolong_lvl(
        &mut self,
        level: usize,
        src: Field,
        dst: Field,
        add: bool,
    ) -> Result<(), CommError> {
        assert!(
            level + 1 < self.forest.num_levels(),
            "cannot prolong above the finest level"
        );

        let me = self.forest.my_rank();
        let record = block_len::<N>(&self.forest, level + 1);

        self.buffers.reset_cursors();

        let parents = self.forest.level(level).my_parents.clone();
        for parent in parents {
            let children = self.forest.box_node(parent).children.clone();

            for child in children {
                prolong_block(&self.forest, parent, child, src, &mut self.snap);

                let peer = self.forest.rank_of(child);
                if peer == me {
                    apply_prolonged(&mut self.forest, child, dst, &self.snap, add);
                } else {
                    self.buffers.push_record(peer, child, &self.snap);
                }
            }
        }

        for peer in 0..self.forest.num_ranks() {
            if peer != me {
                debug_assert_eq!(
                    self.buffers.send_count(peer),
                    self.plan.prolong_send[level][peer]
                );
                self.buffers
                    .set_expected_recv(peer, self.plan.prolong_recv[level][peer]);
            }
        }

        self.buffers.sort_and_transfer(&mut self.transport, record)?;
        self.buffers.reset_read();

        let ids = self.forest.level(level + 1).my_ids.clone();
        for id in ids {
            let Some(parent) = self.forest.box_node(id).parent else {
                continue;
            };

            let peer = self.forest.rank_of(parent);
            if peer == me {
                continue;
            }

            let data = self.buffers.take_recv(peer, record);
            self.snap.clear();
            self.snap.extend_from_slice(data);

            apply_prolonged(&mut self.forest, id, dst, &self.snap, add);
        }

        Ok(())
    }
}

/// Floats in one restriction record at a fine level.
fn restricted_len<const N: usize>(forest: &Forest<N>, level: usize) -> usize {
    (forest.level(level).block_size / 2).pow(N as u32)
}

/// Floats in one prolongation record at a fine level.
fn block_len<const N: usize>(forest: &Forest<N>, level: usize) -> usize {
    forest.level(level).block_size.pow(N as u32)
}

/// Sizing pass for the restriction exchange at a fine level.
pub(super) fn restrict_counts<const N: usize>(
    forest: &Forest<N>,
    level: usize,
) -> (Vec<usize>, Vec<usize>) {
    let me = forest.my_rank();
    let record = restricted_len(forest, level);
    let mut send = vec![0; forest.num_ranks()];
    let mut recv = vec![0; forest.num_ranks()];

    for &id in &forest.level(level).my_ids {
        if let Some(parent) = forest.box_node(id).parent {
            let peer = forest.rank_of(parent);
            if peer != me {
                send[peer] += record;
            }
        }
    }

    for &parent in &forest.level(level - 1).my_parents {
        for &child in &forest.box_node(parent).children {
            let peer = forest.rank_of(child);
            if peer != me {
                recv[peer] += record;
            }
        }
    }

    (send, recv)
}

/// Sizing pass for the prolongation exchange from a coarse level.
pub(super) fn prolong_counts<const N: usize>(
    forest: &Forest<N>,
    level: usize,
) -> (Vec<usize>, Vec<usize>) {
    let me = forest.my_rank();
    let record = block_len(forest, level + 1);
    let mut send = vec![0; forest.num_ranks()];
    let mut recv = vec![0; forest.num_ranks()];

    for &parent in &forest.level(level).my_parents {
        for &child in &forest.box_node(parent).children {
            let peer = forest.rank_of(child);
            if peer != me {
                send[peer] += record;
            }
        }
    }

    for &id in &forest.level(level + 1).my_ids {
        if let Some(parent) = forest.box_node(id).parent {
            let peer = forest.rank_of(parent);
            if peer != me {
                recv[peer] += record;
            }
        }
    }

    (send, recv)
}

/// Averages the `2^N` fine cells under each coarse cell of a block into a
/// restriction record, ordered like the child's region in the parent.
fn restrict_block<const N: usize>(
    forest: &Forest<N>,
    id: usize,
    field: Field,
    out: &mut Vec<f64>,
) {
    let level = forest.box_node(id).level;
    let space = forest.cell_space(level);
    let half = forest.level(level).block_size / 2;
    let scale = 1.0 / num_children::<N>() as f64;
    let cc = forest.cc(id, field);

    out.clear();

    for coarse in IndexSpace::<N>::new([half; N]).iter() {
        let mut sum = 0.0;

        for corner in 0..num_children::<N>() {
            let mut fine = [0usize; N];
            for axis in 0..N {
                fine[axis] = 2 * coarse[axis] + 1 + ((corner >> axis) & 1);
            }
            sum += cc[space.linear_from_cartesian(fine)];
        }

        out.push(sum * scale);
    }
}

/// Writes a restriction record into the child's region of the parent.
fn write_restricted<const N: usize>(
    forest: &mut Forest<N>,
    parent: usize,
    child: usize,
    field: Field,
    data: &[f64],
) {
    let child_level = forest.box_node(child).level;
    let half = forest.level(child_level).block_size / 2;
    let parent_space = forest.cell_space(child_level - 1);
    let offset = forest.child_offset(child);

    let cc = forest.cc_mut(parent, field);

    for (k, coarse) in IndexSpace::<N>::new([half; N]).iter().enumerate() {
        let mut target = [0usize; N];
        for axis in 0..N {
            target[axis] = coarse[axis] + 1 + if offset.is_high(axis) { half } else { 0 };
        }

        cc[parent_space.linear_from_cartesian(target)] = data[k];
    }
}

/// Interpolates a parent's data onto one child.
///
/// Each fine cell mixes its co-located coarse cell with the parity-chosen
/// coarse neighbor per axis (weights 1/2 and 1/4 each in 2D, 1/4 across the
/// board in 3D), reading parent ghosts at the block edge, so the source
/// field's ghost layer must be coherent.
fn prolong_block<const N: usize>(
    forest: &Forest<N>,
    parent: usize,
    child: usize,
    field: Field,
    out: &mut Vec<f64>,
) {
    let child_level = forest.box_node(child).level;
    let fine_nc = forest.level(child_level).block_size;
    let half = fine_nc / 2;
    let parent_space = forest.cell_space(child_level - 1);
    let offset = forest.child_offset(child);
    let cc = forest.cc(parent, field);

    let center_weight = match N {
        2 => 0.5,
        3 => 0.25,
        _ => unimplemented!("prolongation is 2D/3D only"),
    };

    out.clear();

    for cell in IndexSpace::<N>::new([fine_nc; N]).iter() {
        let mut coarse = [0usize; N];
        for axis in 0..N {
            let i = cell[axis] + 1;
            coarse[axis] = (i + 1) / 2 + if offset.is_high(axis) { half } else { 0 };
        }

        let mut value = center_weight * cc[parent_space.linear_from_cartesian(coarse)];

        for axis in 0..N {
            let i = cell[axis] + 1;
            // Odd fine cells sit in the low half of their coarse cell.
            let towards: isize = if i % 2 == 1 { -1 } else { 1 };

            let mut probe = coarse;
            probe[axis] = (coarse[axis] as isize + towards) as usize;
            value += 0.25 * cc[parent_space.linear_from_cartesian(probe)];
        }

        out.push(value);
    }
}

/// Writes (or adds) a prolongation record into a fine block's interior.
fn apply_prolonged<const N: usize>(
    forest: &mut Forest<N>,
    id: usize,
    field: Field,
    data: &[f64],
    add: bool,
) {
    let level = forest.box_node(id).level;
    let space = forest.cell_space(level);
    let nc = forest.level(level).block_size;

    let cc = forest.cc_mut(id, field);

    for (k, cell) in IndexSpace::<N>::new([nc; N]).iter().enumerate() {
        let mut target = [0usize; N];
        for axis in 0..N {
            target[axis] = cell[axis] + 1;
        }

        let at = space.linear_from_cartesian(target);
        if add {
            cc[at] += data[k];
        } else {
            cc[at] = data[k];
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::LocalCluster;
    use crate::forest::ForestBuilder;
    use crate::geometry::Rectangle;
    use crate::solver::{BoundarySet, CycleConfig, FaceCondition};

    fn refined_mg() -> Multigrid<2, crate::comm::LocalTransport> {
        let mut builder = ForestBuilder::new(Rectangle::<2>::UNIT, [1, 1], 4);
        builder.refine_all(1);
        let forest = builder.build(1, 0);

        let transport = LocalCluster::new(1).pop().unwrap();
        Multigrid::new(
            forest,
            transport,
            BoundarySet::uniform(FaceCondition::continuous()),
            CycleConfig::default(),
        )
    }

    /// Restriction averages children into the right parent regions, and both
    /// transfers reproduce constants.
    #[test]
    fn transfers_preserve_constants() {
        let mut mg = refined_mg();
        let top = mg.forest().num_levels() - 1;
        let base = top - 1;

        mg.forest_mut().project(Field::Phi, |_| 3.5);
        // Poison the coarse level so the check sees restriction output only.
        for &id in &mg.forest().level(base).my_ids.clone() {
            mg.forest_mut().cc_mut(id, Field::Phi).fill(-1.0);
        }
        mg.restrict_lvl(Field::Phi, top).unwrap();
        let space = mg.forest().cell_space(base);
        for &id in &mg.forest().level(base).my_parents.clone() {
            let cc = mg.forest().cc(id, Field::Phi);
            for cell in space.interior().iter() {
                assert_eq!(cc[space.linear_from_cartesian(cell)], 3.5);
            }
        }

        // Prolongation of a constant (ghosts included) is the constant.
        mg.fill_ghost_cells_lvl(base, Field::Phi).unwrap();
        mg.prolong_lvl(base, Field::Phi, Field::Res, false).unwrap();

        let fine_space = mg.forest().cell_space(top);
        for &id in &mg.forest().level(top).my_ids.clone() {
            let cc = mg.forest().cc(id, Field::Res);
            for cell in fine_space.interior().iter() {
                let value = cc[fine_space.linear_from_cartesian(cell)];
                assert!((value - 3.5).abs() < 1e-13);
            }
        }
    }

    /// Restriction of a linear field is exact (cell averages of a linear
    /// function equal its value at the coarse cell center).
    #[test]
    fn restriction_is_exact_on_linear_fields() {
        let mut mg = refined_mg();
        let top = mg.forest().num_levels() - 1;

        let base = top - 1;
        mg.forest_mut().project(Field::Phi, |p| 2.0 * p[0] - p[1]);
        for &id in &mg.forest().level(base).my_ids.clone() {
            mg.forest_mut().cc_mut(id, Field::Phi).fill(0.0);
        }
        mg.restrict_lvl(Field::Phi, top).unwrap();
        let space = mg.forest().cell_space(base);
        for &id in &mg.forest().level(base).my_parents.clone() {
            let cc = mg.forest().cc(id, Field::Phi);
            for cell in space.interior().iter() {
                let center = mg.forest().cell_center(id, cell);
                let value = cc[space.linear_from_cartesian(cell)];
                assert!((value - (2.0 * center[0] - center[1])).abs() < 1e-13);
            }
        }
    }
}
