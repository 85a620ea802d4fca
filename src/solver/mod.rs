//! The multigrid solver: the [`Multigrid`] driver object plus the ghost-cell
//! engine, grid transfers, smoothers, and the FAS cycle logic implemented on
//! it in the submodules.

use crate::comm::{RankBuffers, Transport};
use crate::field::Field;
use crate::forest::Forest;

mod boundary;
mod config;
mod cycle;
mod ghost;
mod operator;
mod smoother;
mod transfer;

pub use boundary::{BcKind, BcValue, BoundarySet, FaceCondition};
pub use config::{ConfigError, CycleConfig, SmootherKind};

/// The distributed FAS multigrid driver.
///
/// Owns this rank's slice of the forest, the transport endpoint, and the
/// staging buffers; all exchanges are planned once at construction and the
/// buffers are reused for the lifetime of the solver.
pub struct Multigrid<const N: usize, T: Transport> {
    forest: Forest<N>,
    transport: T,
    buffers: RankBuffers,
    boundary: BoundarySet<N>,
    config: CycleConfig,
    plan: ExchangePlan,
    /// Scratch for one face slab (gathered locally or copied off the wire).
    slab: Vec<f64>,
    /// Scratch for one block of cells (smoother snapshots, transfer records).
    snap: Vec<f64>,
}

/// Precomputed float counts per `[level][peer]` for every exchange family.
/// Send counts double as a cross-check against the cursors the real pack
/// advances; recv counts are what lets both sides skip handshaking.
struct ExchangePlan {
    ghost_send: Vec<Vec<usize>>,
    ghost_recv: Vec<Vec<usize>>,
    restrict_send: Vec<Vec<usize>>,
    restrict_recv: Vec<Vec<usize>>,
    prolong_send: Vec<Vec<usize>>,
    prolong_recv: Vec<Vec<usize>>,
}

impl<const N: usize, T: Transport> Multigrid<N, T> {
    pub fn new(
        forest: Forest<N>,
        transport: T,
        boundary: BoundarySet<N>,
        config: CycleConfig,
    ) -> Self {
        assert_eq!(forest.num_ranks(), transport.num_ranks());
        assert_eq!(forest.my_rank(), transport.my_rank());

        let plan = Self::plan_exchanges(&forest);
        let ranks = forest.num_ranks();
        let levels = forest.num_levels();

        // Per-peer capacities: the maximum any exchange at any level stages.
        let mut send_floats = vec![0; ranks];
        let mut recv_floats = vec![0; ranks];
        let mut records = vec![0; ranks];

        for level in 0..levels {
            let nc = forest.level(level).block_size;
            let dsize = nc.pow(N as u32 - 1);
            let restricted = (nc / 2).pow(N as u32);
            let block = nc.pow(N as u32);

            for peer in 0..ranks {
                send_floats[peer] = send_floats[peer]
                    .max(plan.ghost_send[level][peer])
                    .max(plan.restrict_send[level][peer])
                    .max(plan.prolong_send[level][peer]);
                recv_floats[peer] = recv_floats[peer]
                    .max(plan.ghost_recv[level][peer])
                    .max(plan.restrict_recv[level][peer])
                    .max(plan.prolong_recv[level][peer]);
                records[peer] = records[peer]
                    .max(plan.ghost_send[level][peer] / dsize)
                    .max(plan.restrict_send[level][peer] / restricted)
                    .max(plan.prolong_send[level][peer] / block);
            }
        }

        let mut buffers = RankBuffers::new(ranks);
        buffers.allocate(&send_floats, &recv_floats, &records);

        log::debug!(
            "rank {}: staging {} send / {} recv floats across {} peers",
            forest.my_rank(),
            send_floats.iter().sum::<usize>(),
            recv_floats.iter().sum::<usize>(),
            ranks - 1,
        );

        let top = levels - 1;
        let max_cells = forest.cell_space(top).index_count();
        let max_slab = forest.level(top).block_size.pow(N as u32 - 1);

        Self {
            forest,
            transport,
            buffers,
            boundary,
            config,
            plan,
            slab: Vec::with_capacity(max_slab),
            snap: Vec::with_capacity(max_cells),
        }
    }

    /// Dry-runs every exchange once to learn its per-peer message sizes.
    fn plan_exchanges(forest: &Forest<N>) -> ExchangePlan {
        let ranks = forest.num_ranks();
        let levels = forest.num_levels();

        let mut plan = ExchangePlan {
            ghost_send: vec![vec![0; ranks]; levels],
            ghost_recv: vec![vec![0; ranks]; levels],
            restrict_send: vec![vec![0; ranks]; levels],
            restrict_recv: vec![vec![0; ranks]; levels],
            prolong_send: vec![vec![0; ranks]; levels],
            prolong_recv: vec![vec![0; ranks]; levels],
        };

        // The counting pass advances cursors through an unallocated pool,
        // exactly as the real pack will through the allocated one.
        let mut probe = RankBuffers::new(ranks);
        let mut slab = Vec::new();

        for level in 0..levels {
            probe.reset_cursors();
            ghost::pack_level(
                forest,
                &mut probe,
                &mut slab,
                level,
                Field::Phi,
                ghost::PackMode::Count,
            );

            for peer in 0..ranks {
                plan.ghost_send[level][peer] = probe.send_count(peer);
            }

            plan.ghost_recv[level] = ghost::recv_counts(forest, level);

            if level > 0 {
                let (send, recv) = transfer::restrict_counts(forest, level);
                plan.restrict_send[level] = send;
                plan.restrict_recv[level] = recv;
            }

            if level + 1 < levels {
                let (send, recv) = transfer::prolong_counts(forest, level);
                plan.prolong_send[level] = send;
                plan.prolong_recv[level] = recv;
            }
        }

        plan
    }

    pub fn forest(&self) -> &Forest<N> {
        &self.forest
    }

    pub fn forest_mut(&mut self) -> &mut Forest<N> {
        &mut self.forest
    }

    pub fn config(&self) -> &CycleConfig {
        &self.config
    }

    pub fn boundary(&self) -> &BoundarySet<N> {
        &self.boundary
    }

    /// Ghost-exchange buffer requirements: per-peer send and recv record
    /// counts (maxima over levels) and the largest record size.
    pub fn ghost_cell_buffer_size(&self) -> (Vec<usize>, Vec<usize>, usize) {
        let ranks = self.forest.num_ranks();
        let mut n_send = vec![0; ranks];
        let mut n_recv = vec![0; ranks];
        let mut max_dsize = 0;

        for level in 0..self.forest.num_levels() {
            let dsize = self.dsize(level);
            max_dsize = max_dsize.max(dsize);

            for peer in 0..ranks {
                n_send[peer] = n_send[peer].max(self.plan.ghost_send[level][peer] / dsize);
                n_recv[peer] = n_recv[peer].max(self.plan.ghost_recv[level][peer] / dsize);
            }
        }

        (n_send, n_recv, max_dsize)
    }

    /// Face-slab record size at a level.
    fn dsize(&self, level: usize) -> usize {
        self.forest.level(level).block_size.pow(N as u32 - 1)
    }
}
