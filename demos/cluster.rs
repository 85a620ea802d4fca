//! The same solve on one rank and on four, side by side: every rank of the
//! in-process cluster runs the SPMD program on its slice of the forest, and
//! the reduced residuals come out identical.

use std::f64::consts::PI;
use std::thread;

use strata::prelude::*;

fn solve(ranks: usize, rank: usize, transport: impl Transport) -> f64 {
    let mut builder = ForestBuilder::new(Rectangle::UNIT, [1, 1], 8);
    builder.refine_all(2);
    let forest = builder.build(ranks, rank);

    let mut mg = Multigrid::new(
        forest,
        transport,
        BoundarySet::zero(),
        CycleConfig::default(),
    );

    mg.forest_mut().project(Field::Rhs, |p| {
        -2.0 * PI * PI * (PI * p[0]).sin() * (PI * p[1]).sin()
    });

    let mut residual = mg.fas_fmg(true, false).unwrap().unwrap();
    for _ in 0..4 {
        residual = mg.fas_vcycle(true, None).unwrap().unwrap();
    }

    residual
}

fn main() {
    env_logger::builder()
        .format_timestamp(None)
        .filter_level(log::LevelFilter::Info)
        .init();

    let serial = solve(1, 0, LocalCluster::new(1).pop().unwrap());
    log::info!("1 rank:  max|res| = {serial:.6e}");

    let ranks = 4;
    let handles: Vec<_> = LocalCluster::new(ranks)
        .into_iter()
        .map(|transport| {
            let rank = transport.my_rank();
            thread::spawn(move || solve(ranks, rank, transport))
        })
        .collect();

    for (rank, handle) in handles.into_iter().enumerate() {
        let residual = handle.join().unwrap();
        log::info!("rank {rank}/4: max|res| = {residual:.6e}");
        assert_eq!(
            residual.to_bits(),
            serial.to_bits(),
            "partitioning changed the answer"
        );
    }

    log::info!("4-rank solve is bit-identical to the serial solve");
}
