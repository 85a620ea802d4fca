//! Relaxation sweeps: weighted Jacobi, Gauss-Seidel, and red-black
//! Gauss-Seidel, all sharing the operator stencil and solving the cell
//! equation `φ = (Σ φ_nbr − dr²·ρ) / 2N` in place.

use crate::comm::{CommError, Transport};
use crate::field::Field;

use super::config::SmootherKind;
use super::operator::stencil_sum;
use super::Multigrid;

impl<const N: usize, T: Transport> Multigrid<N, T> {
    /// Runs `cycles` smoother cycles over the owned blocks of a level,
    /// refilling φ ghosts after every sweep. Red-black runs two colored half
    /// sweeps per cycle, each followed by its own refill; on half sweep `s`
    /// the cells with `(s + Σ index)` even are swept, red first.
    pub fn smooth_lvl(&mut self, level: usize, cycles: usize) -> Result<(), CommError> {
        match self.config.smoother {
            SmootherKind::Jacobi | SmootherKind::GaussSeidel => {
                for _ in 0..cycles {
                    let ids = self.forest.level(level).my_ids.clone();

                    for id in ids {
                        self.smooth_box(id, None);
                    }

                    self.fill_ghost_cells_lvl(level, Field::Phi)?;
                }
            }
            SmootherKind::RedBlack => {
                for sweep in 0..2 * cycles {
                    let ids = self.forest.level(level).my_ids.clone();

                    for id in ids {
                        self.smooth_box(id, Some(sweep % 2));
                    }

                    self.fill_ghost_cells_lvl(level, Field::Phi)?;
                }
            }
        }

        Ok(())
    }

    fn smooth_box(&mut self, id: usize, color: Option<usize>) {
        let level = self.forest.box_node(id).level;
        let space = self.forest.cell_space(level);
        let spacing = self.forest.level(level).spacing;
        let dr2 = spacing * spacing;
        let phi = self.forest.field_offset(level, Field::Phi);
        let rhs = self.forest.field_offset(level, Field::Rhs);
        let over = 1.0 / (2 * N) as f64;

        match self.config.smoother {
            SmootherKind::Jacobi => {
                let weight = 2.0 / 3.0;
                let cells = space.index_count();

                let Multigrid { forest, snap, .. } = self;
                let cc = forest.cc_all_mut(id);

                snap.clear();
                snap.extend_from_slice(&cc[phi..phi + cells]);

                for cell in space.interior().iter() {
                    let at = space.linear_from_cartesian(cell);
                    let sum = stencil_sum(space, snap, 0, cell);

                    cc[phi + at] = (1.0 - weight) * snap[at]
                        + weight * over * (sum - dr2 * cc[rhs + at]);
                }
            }
            SmootherKind::GaussSeidel | SmootherKind::RedBlack => {
                let cc = self.forest.cc_all_mut(id);

                for cell in space.interior().iter() {
                    if let Some(parity) = color {
                        if (cell.iter().sum::<usize>() + parity) % 2 != 0 {
                            continue;
                        }
                    }

                    let at = space.linear_from_cartesian(cell);
                    let sum = stencil_sum(space, cc, phi, cell);

                    cc[phi + at] = over * (sum - dr2 * cc[rhs + at]);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::comm::LocalCluster;
    use crate::field::Field;
    use crate::forest::ForestBuilder;
    use crate::geometry::Rectangle;
    use crate::solver::{BoundarySet, CycleConfig, Multigrid, SmootherKind};

    fn smoothed_residual(kind: SmootherKind) -> (f64, f64) {
        let forest = ForestBuilder::new(Rectangle::<2>::UNIT, [1, 1], 8).build(1, 0);
        let transport = LocalCluster::new(1).pop().unwrap();
        let config = CycleConfig {
            smoother: kind,
            ..CycleConfig::default()
        };

        let mut mg = Multigrid::new(forest, transport, BoundarySet::zero(), config);
        let top = mg.forest().num_levels() - 1;

        mg.forest_mut().project(Field::Rhs, |_| 1.0);
        mg.fill_ghost_cells_lvl(top, Field::Phi).unwrap();

        let before = mg.max_residual_lvl(top);
        mg.smooth_lvl(top, 200).unwrap();
        let after = mg.max_residual_lvl(top);

        (before, after)
    }

    /// Every smoother drives the residual of the single-block Poisson
    /// problem down by orders of magnitude. 200 cycles leaves plenty of
    /// margin even for Jacobi, whose lowest-mode factor on an 8×8 grid is
    /// about 0.96 per sweep.
    #[test]
    fn smoothers_reduce_residual() {
        for kind in [
            SmootherKind::Jacobi,
            SmootherKind::GaussSeidel,
            SmootherKind::RedBlack,
        ] {
            let (before, after) = smoothed_residual(kind);

            assert_eq!(before, 1.0);
            assert!(
                after < 5e-3 * before,
                "{kind:?}: residual only fell from {before} to {after}"
            );
        }
    }

    /// The fixed point of the relaxation is the discrete solution; on a
    /// converged field another sweep is a no-op.
    #[test]
    fn smoother_fixed_point_is_stable() {
        let forest = ForestBuilder::new(Rectangle::<2>::UNIT, [1, 1], 4).build(1, 0);
        let transport = LocalCluster::new(1).pop().unwrap();
        let mut mg = Multigrid::new(
            forest,
            transport,
            BoundarySet::zero(),
            CycleConfig::default(),
        );
        let top = mg.forest().num_levels() - 1;

        mg.forest_mut().project(Field::Rhs, |_| 1.0);
        mg.fill_ghost_cells_lvl(top, Field::Phi).unwrap();
        mg.smooth_lvl(top, 400).unwrap();

        let id = mg.forest().level(top).ids[0];
        let before = mg.forest().cc(id, Field::Phi).to_vec();
        mg.smooth_lvl(top, 1).unwrap();
        let after = mg.forest().cc(id, Field::Phi).to_vec();

        for (a, b) in before.iter().zip(&after) {
            assert!((a - b).abs() < 1e-12);
        }
    }
}
