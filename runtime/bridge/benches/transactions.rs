//! Bridge simulation benchmarks
//!
//! Measures simulated host bus cycles per second for a few clock ratios.

use std::hint::black_box;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use rhino_bridge::{BridgeConfig, BusBridge, ClockConfig, RegisterFile, Simulation};
use rhino_csr::{BusAccess, Field, LayoutConfig, Registry, ResourceShape, ResourceTable};

fn benchmark_round_trip(c: &mut Criterion) {
    let mut registry = Registry::new();
    let comp = registry.add_component("bench");
    registry
        .register(
            comp,
            "scratch",
            ResourceShape::register(vec![Field::new("value", 8, BusAccess::ReadWrite)]),
        )
        .unwrap();
    let table = ResourceTable::build(&registry, &LayoutConfig::default()).unwrap();

    let mut group = c.benchmark_group("bridge_write_read");
    for internal_period_ps in [4_000u64, 10_000, 40_000] {
        let clocks = ClockConfig {
            internal_period_ps,
            ..ClockConfig::default()
        };
        group.bench_with_input(
            BenchmarkId::from_parameter(internal_period_ps),
            &clocks,
            |b, clocks| {
                let bridge = BusBridge::new(BridgeConfig::default(), &table).unwrap();
                let mut sim =
                    Simulation::new(bridge, RegisterFile::new(&table), clocks.clone()).unwrap();
                b.iter(|| {
                    sim.write(0, 0x5a).unwrap();
                    black_box(sim.read(0).unwrap());
                });
            },
        );
    }
    group.finish();
}

criterion_group!(benches, benchmark_round_trip);
criterion_main!(benches);
