//! End-to-end scenarios exercised as top-level integration tests: full
//! write/read round trips across mode conversion, reduction, resharding,
//! and the peer-access fallback.

use distarray::prelude::*;
use ndarray::array;

fn full(start: i64, stop: i64) -> IndexTerm {
    IndexTerm::Slice {
        start: Some(start),
        stop: Some(stop),
        step: None,
    }
}

#[test]
fn scenario_1_replica_add() -> anyhow::Result<()> {
    let shape = [4u64];
    let map = IndexMapBuilder::new()
        .shard(0, normalize(&shape, &[full(0, 3)])?)
        .shard(1, normalize(&shape, &[full(1, 4)])?)
        .build();
    let a = DistributedArray::new(array![1.0, 2.0, 3.0, 4.0].into_dyn(), map.clone(), Mode::Replica)?;
    let b = DistributedArray::new(
        array![10.0, 20.0, 30.0, 40.0].into_dyn(),
        map,
        Mode::Replica,
    )?;
    let add = ElementwiseKernel::binary("add", |x: f64, y: f64| x + y);
    let mut sum = elementwise(&add, &[Operand::Distributed(&a), Operand::Distributed(&b)])?;
    assert_eq!(sum.materialize()?, array![11.0, 22.0, 33.0, 44.0].into_dyn());
    Ok(())
}

#[test]
fn scenario_2_sum_mode_reduction() -> anyhow::Result<()> {
    let shape = [2u64, 3];
    let map = IndexMapBuilder::new()
        .shard(0, normalize(&shape, &[full(0, 2), full(0, 3)])?)
        .build();
    let x = DistributedArray::new(
        array![[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]].into_dyn(),
        map,
        Mode::Replica,
    )?;
    let reducer = ReductionKernel::new(OpKind::Sum, 1);
    let mut reduced = reduce(&reducer, &x)?;
    assert_eq!(reduced.materialize()?, array![6.0, 15.0].into_dyn());
    Ok(())
}

#[test]
fn scenario_3_strided_overlap_round_trip() -> anyhow::Result<()> {
    let shape = [6u64];
    let map = IndexMapBuilder::new()
        .shard(
            0,
            normalize(
                &shape,
                &[IndexTerm::Slice {
                    start: Some(0),
                    stop: None,
                    step: Some(2),
                }],
            )?,
        )
        .shard(
            1,
            normalize(
                &shape,
                &[IndexTerm::Slice {
                    start: Some(1),
                    stop: None,
                    step: Some(2),
                }],
            )?,
        )
        .build();
    let x = array![0.0, 1.0, 2.0, 3.0, 4.0, 5.0].into_dyn();
    let a = DistributedArray::new(x.clone(), map, Mode::Replica)?;
    let summed = a.to_mode(Mode::Op(OpKind::Sum))?;
    let mut back = summed.to_mode(Mode::Replica)?;
    assert_eq!(back.materialize()?, x);
    Ok(())
}

#[test]
fn scenario_4_overlapping_replica_to_sum() -> anyhow::Result<()> {
    let shape = [4u64];
    let map = IndexMapBuilder::new()
        .shard(0, normalize(&shape, &[full(0, 3)])?)
        .shard(1, normalize(&shape, &[full(1, 4)])?)
        .build();
    let x = array![1.0, 2.0, 3.0, 4.0].into_dyn();
    let a = DistributedArray::new(x.clone(), map, Mode::Replica)?;
    let summed = a.to_mode(Mode::Op(OpKind::Sum))?;

    // Per-shard contents (device 0 -> [1,0,0], device 1 -> [2,3,4]) are
    // covered at the unit-test level in `array.rs`, where shard buffers are
    // directly reachable; this crate's only public view of array state is
    // via `materialize`, so the end-to-end property checked here is the
    // fold-then-broadcast round trip.
    let mut back = summed.to_mode(Mode::Replica)?;
    assert_eq!(back.materialize()?, x);
    Ok(())
}

#[test]
fn scenario_5_reshard() -> anyhow::Result<()> {
    let shape = [4u64];
    let map = IndexMapBuilder::new()
        .shard(0, normalize(&shape, &[full(0, 3)])?)
        .shard(1, normalize(&shape, &[full(1, 4)])?)
        .build();
    let a = DistributedArray::new(array![1.0, 2.0, 3.0, 4.0].into_dyn(), map, Mode::Replica)?;

    let new_map = IndexMapBuilder::new()
        .shard(0, normalize(&shape, &[full(0, 4)])?)
        .build();
    let mut resharded = a.reshard(new_map)?;
    assert_eq!(
        resharded.materialize()?,
        array![1.0, 2.0, 3.0, 4.0].into_dyn()
    );
    Ok(())
}

#[test]
fn scenario_6_peer_access_fallback() -> anyhow::Result<()> {
    let shape = [4u64];
    let a_map = IndexMapBuilder::new()
        .shard(0, normalize(&shape, &[full(0, 4)])?)
        .build();
    let b_map = IndexMapBuilder::new()
        .shard(1, normalize(&shape, &[full(0, 4)])?)
        .build();
    let a = DistributedArray::new(array![1.0, 2.0, 3.0, 4.0].into_dyn(), a_map, Mode::Replica)?;
    let b = DistributedArray::new(
        array![10.0, 20.0, 30.0, 40.0].into_dyn(),
        b_map,
        Mode::Replica,
    )?;
    let mul = ElementwiseKernel::binary("mul", |x: f64, y: f64| x * y);
    let mut product = elementwise(&mul, &[Operand::Distributed(&a), Operand::Distributed(&b)])?;
    assert_eq!(
        product.materialize()?,
        array![10.0, 40.0, 90.0, 160.0].into_dyn()
    );
    Ok(())
}
