//! The block forest: a flat store of fixed-size cell-centered blocks organized
//! into refinement levels, partitioned across ranks.
//!
//! The forest is produced by [`ForestBuilder`] before any solver call and is
//! immutable under the solver except for cell contents. Every rank holds the
//! full topology (ids, levels, neighbor links, ownership) but allocates cell
//! data only for the blocks it owns.

use crate::field::Field;
use crate::geometry::{num_faces, ChildIndex, Face, IndexSpace};

mod builder;

pub use builder::ForestBuilder;

/// What lies across a face of a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Neighbor {
    /// A block at the same level.
    Block(usize),
    /// A coarser region: the face is a refinement boundary and ghost data is
    /// reconstructed from the parent's neighbor.
    Refinement,
    /// The domain boundary.
    Physical,
}

/// A single block: `nc^N` cells plus one ghost layer per face, storing one
/// value per [`Field`] per cell.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct BoxNode<const N: usize> {
    /// Owning rank.
    pub rank: usize,
    /// Refinement level (0 is the coarsest).
    pub level: usize,
    /// Parent block, if any.
    pub parent: Option<usize>,
    /// Children in [`ChildIndex`] storage order: empty, the full `2^N` set,
    /// or a single entry on the coarse single-block chain below the base
    /// level.
    pub children: Vec<usize>,
    /// Face neighbors in exchange order.
    pub neighbors: Vec<Neighbor>,
    /// Physical position of the low corner.
    #[serde(with = "crate::array")]
    pub origin: [f64; N],
    /// Cell data, `[field][cell]`, allocated only on the owning rank.
    #[serde(skip)]
    pub cc: Vec<f64>,
}

impl<const N: usize> BoxNode<N> {
    pub fn has_children(&self) -> bool {
        !self.children.is_empty()
    }
}

/// One refinement level of the forest, with the derived per-rank views the
/// solver iterates over.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Level {
    /// All block ids on this level, ascending.
    pub ids: Vec<usize>,
    /// The subset owned by this rank, ascending.
    pub my_ids: Vec<usize>,
    /// Owned leaf blocks with at least one refined neighbor; their face data
    /// is shipped to the fine side of the refinement boundary.
    pub my_ref_bnds: Vec<usize>,
    /// Owned blocks with children, the targets of coarse-grid correction.
    pub my_parents: Vec<usize>,
    /// Interior cells per axis of every block on this level.
    pub block_size: usize,
    /// Grid spacing on this level.
    pub spacing: f64,
}

/// The block forest shared by all solver components.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Forest<const N: usize> {
    boxes: Vec<BoxNode<N>>,
    levels: Vec<Level>,
    block_size: usize,
    first_normal_level: usize,
    num_ranks: usize,
    my_rank: usize,
}

impl<const N: usize> Forest<N> {
    pub fn num_levels(&self) -> usize {
        self.levels.len()
    }

    pub fn num_boxes(&self) -> usize {
        self.boxes.len()
    }

    pub fn level(&self, level: usize) -> &Level {
        &self.levels[level]
    }

    pub fn levels(&self) -> &[Level] {
        &self.levels
    }

    pub fn box_node(&self, id: usize) -> &BoxNode<N> {
        &self.boxes[id]
    }

    /// Interior cells per axis of full-size blocks.
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// The coarsest level whose blocks have the full `block_size`; levels
    /// below it form the single-block chain with halved sizes.
    pub fn first_normal_level(&self) -> usize {
        self.first_normal_level
    }

    pub fn num_ranks(&self) -> usize {
        self.num_ranks
    }

    pub fn my_rank(&self) -> usize {
        self.my_rank
    }

    pub fn rank_of(&self, id: usize) -> usize {
        self.boxes[id].rank
    }

    pub fn is_mine(&self, id: usize) -> bool {
        self.boxes[id].rank == self.my_rank
    }

    pub fn neighbor(&self, id: usize, face: Face) -> Neighbor {
        debug_assert!(face.index() < num_faces::<N>());
        self.boxes[id].neighbors[face.index()]
    }

    /// The child's placement within its parent. Blocks on the single-block
    /// coarse chain sit at the low corner.
    pub fn child_offset(&self, id: usize) -> ChildIndex<N> {
        let parent = self.boxes[id].parent.expect("block has no parent");
        let position = self.boxes[parent]
            .children
            .iter()
            .position(|&child| child == id)
            .expect("parent does not list block as a child");

        ChildIndex::from_linear(position)
    }

    /// The cell index space of blocks on a level (interior plus ghost layer).
    pub fn cell_space(&self, level: usize) -> IndexSpace<N> {
        IndexSpace::cells(self.levels[level].block_size)
    }

    /// Cell data of one field of an owned block.
    pub fn cc(&self, id: usize, field: Field) -> &[f64] {
        let cells = self.cell_space(self.boxes[id].level).index_count();
        let start = field.index() * cells;

        debug_assert!(self.is_mine(id), "cell data only lives on the owner");
        &self.boxes[id].cc[start..start + cells]
    }

    /// Mutable cell data of one field of an owned block.
    pub fn cc_mut(&mut self, id: usize, field: Field) -> &mut [f64] {
        let cells = self.cell_space(self.boxes[id].level).index_count();
        let start = field.index() * cells;

        debug_assert!(self.is_mine(id), "cell data only lives on the owner");
        &mut self.boxes[id].cc[start..start + cells]
    }

    /// The whole cell array of an owned block, all fields. Kernels that mix
    /// fields index it through [`Forest::field_offset`].
    pub fn cc_all_mut(&mut self, id: usize) -> &mut [f64] {
        debug_assert!(self.is_mine(id), "cell data only lives on the owner");
        &mut self.boxes[id].cc
    }

    /// Offset of a field within [`Forest::cc_all_mut`] storage at a level.
    pub fn field_offset(&self, level: usize, field: Field) -> usize {
        field.index() * self.cell_space(level).index_count()
    }

    /// Copies one field of an owned block into another.
    pub fn copy_field(&mut self, id: usize, from: Field, to: Field) {
        let level = self.boxes[id].level;
        let cells = self.cell_space(level).index_count();
        let src = self.field_offset(level, from);
        let dst = self.field_offset(level, to);

        let cc = self.cc_all_mut(id);
        let (a, b) = (src.min(dst), src.max(dst));
        let (head, tail) = cc.split_at_mut(b);

        if src < dst {
            tail[..cells].copy_from_slice(&head[a..a + cells]);
        } else {
            head[a..a + cells].copy_from_slice(&tail[..cells]);
        }
    }

    /// Physical center of a cell of an owned or remote block, `cell` in the
    /// 1-based interior convention.
    pub fn cell_center(&self, id: usize, cell: [usize; N]) -> [f64; N] {
        let level = self.boxes[id].level;
        let spacing = self.levels[level].spacing;
        let origin = self.boxes[id].origin;

        std::array::from_fn(|axis| origin[axis] + (cell[axis] as f64 - 0.5) * spacing)
    }

    /// Evaluates a function of position into a field on the interior of every
    /// owned block on every level.
    pub fn project<F>(&mut self, field: Field, f: F)
    where
        F: Fn([f64; N]) -> f64,
    {
        for level in 0..self.levels.len() {
            let space = self.cell_space(level);
            let ids = self.levels[level].my_ids.clone();

            for id in ids {
                for cell in space.interior().iter() {
                    let position = self.cell_center(id, cell);
                    self.cc_mut(id, field)[space.linear_from_cartesian(cell)] = f(position);
                }
            }
        }
    }

    /// Rebuilds the derived per-rank level views (`my_ids`, `my_ref_bnds`,
    /// `my_parents`) from ownership and topology.
    pub(crate) fn build_views(&mut self) {
        for level in 0..self.levels.len() {
            let ids = self.levels[level].ids.clone();

            let my_ids: Vec<usize> = ids
                .iter()
                .copied()
                .filter(|&id| self.boxes[id].rank == self.my_rank)
                .collect();

            let my_parents = my_ids
                .iter()
                .copied()
                .filter(|&id| self.boxes[id].has_children())
                .collect();

            let my_ref_bnds = my_ids
                .iter()
                .copied()
                .filter(|&id| {
                    !self.boxes[id].has_children()
                        && self.boxes[id].neighbors.iter().any(|&nb| match nb {
                            Neighbor::Block(other) => self.boxes[other].has_children(),
                            _ => false,
                        })
                })
                .collect();

            let entry = &mut self.levels[level];
            entry.my_ids = my_ids;
            entry.my_parents = my_parents;
            entry.my_ref_bnds = my_ref_bnds;
        }
    }

    pub(crate) fn from_parts(
        boxes: Vec<BoxNode<N>>,
        levels: Vec<Level>,
        block_size: usize,
        first_normal_level: usize,
        num_ranks: usize,
        my_rank: usize,
    ) -> Self {
        let mut forest = Self {
            boxes,
            levels,
            block_size,
            first_normal_level,
            num_ranks,
            my_rank,
        };

        forest.allocate();
        forest.build_views();
        forest
    }

    /// Allocates (zeroed) cell storage for every owned block.
    fn allocate(&mut self) {
        for id in 0..self.boxes.len() {
            if self.boxes[id].rank != self.my_rank {
                continue;
            }

            let cells = self.cell_space(self.boxes[id].level).index_count();
            self.boxes[id].cc = vec![0.0; Field::COUNT * cells];
        }
    }
}
