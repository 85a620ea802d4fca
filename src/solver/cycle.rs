//! The FAS cycle driver: V-cycles, the guarded coarse solve, and full
//! multigrid.
//!
//! FAS carries the full solution (not just the error) on every level, which
//! is what makes the scheme correct in the presence of refinement
//! boundaries: coarse levels solve `L φ_c = L(restrict φ) + restrict(ρ − L φ)`
//! and the correction `φ_c − old` is prolonged back additively.

use crate::comm::{CommError, Transport};
use crate::field::Field;

use super::Multigrid;

impl<const N: usize, T: Transport> Multigrid<N, T> {
    /// One V-cycle: descend with smoothing and coarse-grid updates, solve the
    /// coarsest level, ascend with corrections and smoothing.
    ///
    /// On entry the φ ghost layer of every level in use must be coherent
    /// (construction-fresh zeros count; so does any earlier cycle or fill).
    /// With `set_residual` the residual field is recomputed everywhere and
    /// the global `max|res|` is returned.
    ///
    /// `max_level` bounds the cycle from above (FMG uses this); `None` means
    /// the finest level.
    pub fn fas_vcycle(
        &mut self,
        set_residual: bool,
        max_level: Option<usize>,
    ) -> Result<Option<f64>, CommError> {
        let top = max_level.unwrap_or(self.forest.num_levels() - 1);
        assert!(top < self.forest.num_levels(), "level out of range");

        for level in (1..=top).rev() {
            self.smooth_lvl(level, self.config.n_cycle_down)?;
            self.update_coarse(level)?;
        }

        self.solve_coarse()?;

        for level in 1..=top {
            self.correct_children(level - 1)?;
            self.fill_ghost_cells_lvl(level, Field::Phi)?;
            self.smooth_lvl(level, self.config.n_cycle_up)?;
        }

        if set_residual {
            let mut local: f64 = 0.0;

            for level in 0..=top {
                local = local.max(self.residual_lvl(level));
            }

            Ok(Some(self.transport.all_reduce_max(local)?))
        } else {
            Ok(None)
        }
    }

    /// Full multigrid: restrict the problem to the coarsest level, then work
    /// back up, seeding each level from the one below and running a V-cycle
    /// capped at it. One pass gives an O(1)-cycle-accurate initial guess;
    /// the residual (if requested) is set only by the final, full-depth
    /// cycle.
    pub fn fas_fmg(
        &mut self,
        set_residual: bool,
        have_guess: bool,
    ) -> Result<Option<f64>, CommError> {
        let top = self.forest.num_levels() - 1;

        if !have_guess {
            for level in 0..=top {
                let ids = self.forest.level(level).my_ids.clone();

                for id in ids {
                    self.forest.cc_mut(id, Field::Phi).fill(0.0);
                }
            }
        }

        self.fill_ghost_cells_lvl(top, Field::Phi)?;

        for level in (1..=top).rev() {
            self.update_coarse(level)?;
        }

        let mut result = None;

        for level in 0..=top {
            let ids = self.forest.level(level).my_ids.clone();
            for id in ids {
                self.forest.copy_field(id, Field::Phi, Field::Old);
            }

            if level > 0 {
                self.correct_children(level - 1)?;
                self.fill_ghost_cells_lvl(level, Field::Phi)?;
            }

            result = self.fas_vcycle(set_residual && level == top, Some(level))?;
        }

        Ok(result)
    }

    /// The global `max|res|` over every level, recomputing the residual
    /// field along the way.
    pub fn max_residual(&mut self) -> Result<f64, CommError> {
        let mut local: f64 = 0.0;

        for level in 0..self.forest.num_levels() {
            local = local.max(self.residual_lvl(level));
        }

        self.transport.all_reduce_max(local)
    }

    /// Builds the coarse-grid problem below `level`: residual on the fine
    /// side, φ and res restricted down, coarse ghosts refreshed, then on
    /// every owned parent `ρ_c = L φ_c + restrict(res)` over the refined
    /// region (parents are fully covered by their children) and the
    /// pre-correction `old` saved, ghosts included.
    fn update_coarse(&mut self, level: usize) -> Result<(), CommError> {
        self.residual_lvl(level);
        self.restrict_lvl(Field::Phi, level)?;
        self.restrict_lvl(Field::Res, level)?;
        self.fill_ghost_cells_lvl(level - 1, Field::Phi)?;

        let coarse = level - 1;
        let space = self.forest.cell_space(coarse);
        let rhs = self.forest.field_offset(coarse, Field::Rhs);
        let res = self.forest.field_offset(coarse, Field::Res);
        let parents = self.forest.level(coarse).my_parents.clone();

        for id in parents {
            self.box_lpl(id, Field::Rhs);

            let cc = self.forest.cc_all_mut(id);
            for cell in space.interior().iter() {
                let at = space.linear_from_cartesian(cell);
                cc[rhs + at] += cc[res + at];
            }

            self.forest.copy_field(id, Field::Phi, Field::Old);
        }

        Ok(())
    }

    /// Prolongs the coarse correction `φ − old` additively into the children
    /// of every owned parent on `level`.
    fn correct_children(&mut self, level: usize) -> Result<(), CommError> {
        let cells = self.forest.cell_space(level).index_count();
        let phi = self.forest.field_offset(level, Field::Phi);
        let old = self.forest.field_offset(level, Field::Old);
        let res = self.forest.field_offset(level, Field::Res);
        let parents = self.forest.level(level).my_parents.clone();

        for id in parents {
            let cc = self.forest.cc_all_mut(id);

            // Ghosts included: the prolongation stencil reads one cell out.
            for k in 0..cells {
                cc[res + k] = cc[phi + k] - cc[old + k];
            }
        }

        self.prolong_lvl(level, Field::Res, Field::Phi, true)
    }

    /// The coarsest-level solve: guarded smoother sweeps until `max|res|`
    /// drops below `max(rel·initial, abs)` or the cycle cap is hit.
    ///
    /// The coarsest level must be owned whole by one rank (in practice rank
    /// 0); partial ownership is a structural error. Ranks owning nothing
    /// pass through immediately, and since every block is local to the
    /// owner, no exchange below involves a message.
    fn solve_coarse(&mut self) -> Result<(), CommError> {
        let owned = self.forest.level(0).my_ids.len();
        let total = self.forest.level(0).ids.len();
        assert!(
            owned == 0 || owned == total,
            "rank {} owns {owned} of {total} coarsest-level blocks; \
             the coarsest level must live on a single rank",
            self.forest.my_rank()
        );

        let cycles = self.config.n_cycle_down + self.config.n_cycle_up;
        let initial = self.max_residual_lvl(0);
        let tolerance = (self.config.coarse_rel_tol * initial).max(self.config.coarse_abs_tol);

        for cycle in 0..self.config.max_coarse_cycles {
            self.smooth_lvl(0, cycles)?;

            let residual = self.max_residual_lvl(0);
            if residual <= tolerance {
                log::trace!(
                    "coarse solve converged to {residual:.3e} in {} cycles",
                    cycle + 1
                );
                return Ok(());
            }
        }

        if owned > 0 {
            log::warn!(
                "coarse solve hit max_coarse_cycles = {} above tolerance {tolerance:.3e}",
                self.config.max_coarse_cycles
            );
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::LocalCluster;
    use crate::forest::ForestBuilder;
    use crate::geometry::{IndexSpace, Rectangle};
    use crate::solver::{BoundarySet, CycleConfig, FaceCondition};

    fn solver<const N: usize>(
        forest: crate::forest::Forest<N>,
        boundary: BoundarySet<N>,
    ) -> Multigrid<N, crate::comm::LocalTransport> {
        let transport = LocalCluster::new(1).pop().unwrap();
        Multigrid::new(forest, transport, boundary, CycleConfig::default())
    }

    /// A constant φ with ρ = 0 is a fixed point of the whole V-cycle to
    /// roundoff: every stencil in the chain reproduces constants.
    #[test]
    fn vcycle_preserves_constants() {
        let constant = 11.0;

        let mut builder = ForestBuilder::new(Rectangle::<2>::UNIT, [2, 2], 8);
        builder.refine(|origin, _| origin[0] < 0.5 && origin[1] < 0.5);
        let forest = builder.build(1, 0);

        let mut mg = solver(
            forest,
            BoundarySet::uniform(FaceCondition::dirichlet(constant)),
        );

        mg.forest_mut().project(Field::Phi, |_| constant);
        mg.fill_ghost_cells(Field::Phi).unwrap();
        mg.fas_vcycle(false, None).unwrap();

        for level in 0..mg.forest().num_levels() {
            let space = mg.forest().cell_space(level);
            for &id in &mg.forest().level(level).my_ids.clone() {
                let cc = mg.forest().cc(id, Field::Phi);
                for cell in space.interior().iter() {
                    let value = cc[space.linear_from_cartesian(cell)];
                    assert!(
                        (value - constant).abs() <= 10.0 * f64::EPSILON * constant,
                        "level {level} block {id}: {value}"
                    );
                }
            }
        }
    }

    /// V-cycles on the single-block Poisson problem converge to the exact
    /// discrete solution (residual at rounding level).
    #[test]
    fn vcycles_solve_single_block_poisson() {
        let forest = ForestBuilder::new(Rectangle::<2>::UNIT, [1, 1], 8).build(1, 0);
        let mut mg = solver(forest, BoundarySet::zero());

        mg.forest_mut().project(Field::Rhs, |_| 1.0);
        mg.fill_ghost_cells(Field::Phi).unwrap();

        let mut residual = f64::INFINITY;
        for _ in 0..12 {
            residual = mg.fas_vcycle(true, None).unwrap().unwrap();
            if residual <= 1e-10 {
                break;
            }
        }

        assert!(residual <= 1e-10, "stalled at {residual:.3e}");

        // Direct check against the stencil equation on the fine level.
        let top = mg.forest().num_levels() - 1;
        let space = mg.forest().cell_space(top);
        let spacing = mg.forest().level(top).spacing;
        let id = mg.forest().level(top).ids[0];
        let cc = mg.forest().cc(id, Field::Phi).to_vec();

        for cell in space.interior().iter() {
            let sum = crate::solver::operator::stencil_sum(space, &cc, 0, cell);
            let lap = (sum - 4.0 * cc[space.linear_from_cartesian(cell)])
                / (spacing * spacing);
            assert!((lap - 1.0).abs() < 1e-8);
        }
    }

    /// FMG alone lands within a small factor of the converged residual
    /// without any extra V-cycles.
    #[test]
    fn fmg_reaches_discretization_accuracy() {
        use std::f64::consts::PI;

        let mut builder = ForestBuilder::new(Rectangle::<2>::UNIT, [1, 1], 8);
        builder.refine_all(2);
        let forest = builder.build(1, 0);
        let mut mg = solver(forest, BoundarySet::zero());

        let rhs = |p: [f64; 2]| -2.0 * PI * PI * (PI * p[0]).sin() * (PI * p[1]).sin();
        mg.forest_mut().project(Field::Rhs, |p| rhs(p));

        let residual = mg.fas_fmg(true, false).unwrap().unwrap();

        // Truncation error of the 5-point stencil on this rhs is O(h²·|ρ|'');
        // FMG should be within a small constant of it.
        let top = mg.forest().num_levels() - 1;
        let h = mg.forest().level(top).spacing;
        let truncation = 4.0 * PI.powi(4) * h * h;

        assert!(
            residual <= 10.0 * truncation,
            "FMG residual {residual:.3e} vs truncation scale {truncation:.3e}"
        );

        // And the solution is close to the manufactured field.
        let space = mg.forest().cell_space(top);
        let mut worst: f64 = 0.0;
        for &id in &mg.forest().level(top).my_ids.clone() {
            let cc = mg.forest().cc(id, Field::Phi);
            for cell in space.interior().iter() {
                let p = mg.forest().cell_center(id, cell);
                let exact = (PI * p[0]).sin() * (PI * p[1]).sin();
                worst = worst.max((cc[space.linear_from_cartesian(cell)] - exact).abs());
            }
        }

        assert!(worst < 5e-3, "max pointwise error {worst:.3e}");
    }

    /// The coarse solve refuses a partially-owned coarsest level.
    #[test]
    #[should_panic(expected = "coarsest level")]
    fn partial_coarse_ownership_is_fatal() {
        // 2 base blocks over 2 ranks: rank 0 owns only half the coarsest
        // level. Drive rank 1 from a thread so rank 0's panic is observed.
        let transports = LocalCluster::new(2);
        let mut handles = Vec::new();

        for transport in transports.into_iter().rev() {
            let rank = transport.my_rank();
            handles.push(std::thread::spawn(move || {
                let domain = Rectangle {
                    origin: [0.0, 0.0],
                    size: [2.0, 1.0],
                };
                let forest = ForestBuilder::new(domain, [2, 1], 4).build(2, rank);
                let mut mg = Multigrid::new(
                    forest,
                    transport,
                    BoundarySet::zero(),
                    CycleConfig::default(),
                );
                mg.fas_vcycle(false, None).unwrap();
            }));
        }

        let results: Vec<_> = handles.into_iter().map(|h| h.join()).collect();
        for result in results {
            if let Err(panic) = result {
                std::panic::resume_unwind(panic);
            }
        }
    }

    /// `IndexSpace` sanity for the cycle tests' direct stencil checks.
    #[test]
    fn interior_window_matches_block_size() {
        let space = IndexSpace::<2>::cells(8);
        assert_eq!(space.interior().index_count(), 64);
    }
}
