use std::array;

use super::{BoxNode, Forest, Level, Neighbor};
use crate::geometry::{faces, num_faces, ChildIndex, IndexSpace, Rectangle};

/// Constructs a [`Forest`]: a uniform base grid of blocks over a rectangular
/// domain, optional whole-block refinement passes on the finest level, and a
/// single-block coarse chain below a single-block base.
///
/// Every rank builds the identical forest (ids are a deterministic function of
/// the construction calls), so the partition never has to be communicated.
/// Blocks are numbered level by level in creation order; children of ascending
/// parents therefore have ascending ids, which the exchange sort keys rely on.
pub struct ForestBuilder<const N: usize> {
    domain: Rectangle<N>,
    block_size: usize,
    first_normal_level: usize,
    boxes: Vec<BoxNode<N>>,
    levels: Vec<LevelProto>,
}

struct LevelProto {
    ids: Vec<usize>,
    block_size: usize,
    spacing: f64,
}

impl<const N: usize> ForestBuilder<N> {
    /// Lays out `base_blocks` blocks of `block_size^N` cells over the domain.
    ///
    /// Cells must come out square: the domain extent divided by the cell count
    /// has to agree on every axis. `block_size` must be even (the refinement
    /// ratio is 2) and at least 2.
    pub fn new(domain: Rectangle<N>, base_blocks: [usize; N], block_size: usize) -> Self {
        assert!(block_size >= 2 && block_size % 2 == 0);
        assert!(base_blocks.iter().all(|&blocks| blocks > 0));

        let spacing =
            domain.cell_spacing(array::from_fn(|axis| base_blocks[axis] * block_size));

        let mut builder = Self {
            domain,
            block_size,
            first_normal_level: 0,
            boxes: Vec::new(),
            levels: Vec::new(),
        };

        if base_blocks.iter().all(|&blocks| blocks == 1) {
            builder.build_coarse_chain();
        }

        builder.build_base(base_blocks, spacing);
        builder
    }

    /// The single-block levels below a single-block base: block size halves
    /// down to 2 while it stays even, all covering the whole domain.
    fn build_coarse_chain(&mut self) {
        let mut sizes = Vec::new();
        let mut nc = self.block_size;

        while nc > 2 && nc % 2 == 0 {
            nc /= 2;
            sizes.push(nc);
        }

        sizes.reverse();
        self.first_normal_level = sizes.len();

        for nc in sizes {
            let id = self.boxes.len();
            let parent = id.checked_sub(1);

            if let Some(parent) = parent {
                self.boxes[parent].children.push(id);
            }

            self.boxes.push(BoxNode {
                rank: 0,
                level: self.levels.len(),
                parent,
                children: Vec::new(),
                neighbors: vec![Neighbor::Physical; num_faces::<N>()],
                origin: self.domain.origin,
                cc: Vec::new(),
            });

            self.levels.push(LevelProto {
                ids: vec![id],
                block_size: nc,
                spacing: self.domain.cell_spacing([nc; N]),
            });
        }
    }

    fn build_base(&mut self, base_blocks: [usize; N], spacing: f64) {
        let grid = IndexSpace::new(base_blocks);
        let level = self.levels.len();
        let first = self.boxes.len();
        let width = self.block_size as f64 * spacing;

        // The finest chain block, if any, becomes the parent of the base.
        let parent = first.checked_sub(1);

        let mut ids = Vec::new();

        for position in grid.iter() {
            let id = self.boxes.len();
            ids.push(id);

            let origin = self.domain.block_origin(position, width);

            let neighbors = faces::<N>()
                .map(|face| {
                    let mut adjacent = position;

                    if face.side {
                        adjacent[face.axis] += 1;
                        if adjacent[face.axis] == base_blocks[face.axis] {
                            return Neighbor::Physical;
                        }
                    } else {
                        if adjacent[face.axis] == 0 {
                            return Neighbor::Physical;
                        }
                        adjacent[face.axis] -= 1;
                    }

                    Neighbor::Block(first + grid.linear_from_cartesian(adjacent))
                })
                .collect();

            self.boxes.push(BoxNode {
                rank: 0,
                level,
                parent,
                children: Vec::new(),
                neighbors,
                origin,
                cc: Vec::new(),
            });
        }

        if let Some(parent) = parent {
            self.boxes[parent].children = ids.clone();
        }

        self.levels.push(LevelProto {
            ids,
            block_size: self.block_size,
            spacing,
        });
    }

    /// Refines every block on the current finest level whose low corner and
    /// physical width satisfy the predicate, creating the next level. Returns
    /// the number of blocks refined.
    ///
    /// Panics if a selected block touches a refinement boundary: refining it
    /// would put a level-2 jump across that face.
    pub fn refine<F>(&mut self, predicate: F) -> usize
    where
        F: Fn([f64; N], f64) -> bool,
    {
        let finest = self.levels.len() - 1;
        let spacing = self.levels[finest].spacing;
        let width = self.block_size as f64 * spacing;

        let selected: Vec<usize> = self.levels[finest]
            .ids
            .iter()
            .copied()
            .filter(|&id| predicate(self.boxes[id].origin, width))
            .collect();

        if selected.is_empty() {
            return 0;
        }

        for &id in &selected {
            assert!(
                !self.boxes[id]
                    .neighbors
                    .iter()
                    .any(|&nb| nb == Neighbor::Refinement),
                "refining block {id} would create a level-2 jump"
            );
        }

        // First pass: create all children so cross-parent links can resolve.
        let level = self.levels.len();
        let mut ids = Vec::new();

        for &parent in &selected {
            for child in ChildIndex::<N>::enumerate() {
                let id = self.boxes.len();
                ids.push(id);
                self.boxes[parent].children.push(id);

                let origin = array::from_fn(|axis| {
                    let mut value = self.boxes[parent].origin[axis];
                    if child.is_high(axis) {
                        value += width / 2.0;
                    }
                    value
                });

                self.boxes.push(BoxNode {
                    rank: 0,
                    level,
                    parent: Some(parent),
                    children: Vec::new(),
                    neighbors: vec![Neighbor::Physical; num_faces::<N>()],
                    origin,
                    cc: Vec::new(),
                });
            }
        }

        // Second pass: resolve neighbors.
        for &id in &ids {
            let parent = self.boxes[id].parent.unwrap();
            let offset = ChildIndex::<N>::from_linear(
                self.boxes[parent]
                    .children
                    .iter()
                    .position(|&child| child == id)
                    .unwrap(),
            );

            for face in faces::<N>() {
                let sibling = offset.flip(face.axis);

                let neighbor = if !offset.touches(face) {
                    Neighbor::Block(self.boxes[parent].children[sibling.to_linear()])
                } else {
                    match self.boxes[parent].neighbors[face.index()] {
                        Neighbor::Physical => Neighbor::Physical,
                        Neighbor::Block(other) if self.boxes[other].has_children() => {
                            Neighbor::Block(self.boxes[other].children[sibling.to_linear()])
                        }
                        Neighbor::Block(_) => Neighbor::Refinement,
                        Neighbor::Refinement => unreachable!("guarded above"),
                    }
                };

                self.boxes[id].neighbors[face.index()] = neighbor;
            }
        }

        self.levels.push(LevelProto {
            ids,
            block_size: self.block_size,
            spacing: spacing / 2.0,
        });

        selected.len()
    }

    /// Refines the entire finest level `times` over.
    pub fn refine_all(&mut self, times: usize) {
        for _ in 0..times {
            self.refine(|_, _| true);
        }
    }

    /// Partitions the forest over `num_ranks` and produces the view for
    /// `my_rank`. Each level is split into contiguous runs of ascending ids;
    /// single-block levels land on rank 0.
    pub fn build(mut self, num_ranks: usize, my_rank: usize) -> Forest<N> {
        assert!(num_ranks > 0 && my_rank < num_ranks);

        for level in &self.levels {
            let count = level.ids.len();

            for (i, &id) in level.ids.iter().enumerate() {
                self.boxes[id].rank = i * num_ranks / count;
            }
        }

        let levels = self
            .levels
            .into_iter()
            .map(|proto| Level {
                ids: proto.ids,
                my_ids: Vec::new(),
                my_ref_bnds: Vec::new(),
                my_parents: Vec::new(),
                block_size: proto.block_size,
                spacing: proto.spacing,
            })
            .collect();

        Forest::from_parts(
            self.boxes,
            levels,
            self.block_size,
            self.first_normal_level,
            num_ranks,
            my_rank,
        )
    }
}
