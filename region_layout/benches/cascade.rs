// benches/cascade.rs

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use region_layout::{Binding, DeclArgs, Layout, NumericSpec};

fn bench_front_growth(c: &mut Criterion) {
    let mut group = c.benchmark_group("front_growth");
    for entries in [16usize, 256] {
        group.bench_with_input(
            BenchmarkId::from_parameter(entries),
            &entries,
            |b, &entries| {
                b.iter(|| {
                    let mut layout = Layout::default();
                    let list = layout.list(DeclArgs::new());
                    let head = layout.bitfield(8).unwrap();
                    layout.append(list, head).unwrap();
                    for _ in 0..entries {
                        let id = layout.numeric(NumericSpec::be(16)).unwrap();
                        layout.append(list, id).unwrap();
                    }
                    let region = layout.instantiate_with(list, Binding::unbound()).unwrap();

                    // every growth of the head pushes all later entries
                    for bits in [16u64, 24, 32] {
                        layout.resize_declaration(head, black_box(bits)).unwrap();
                    }
                    layout.bytes(region).unwrap().len()
                });
            },
        );
    }
    group.finish();
}

fn bench_array_resize(c: &mut Criterion) {
    let mut group = c.benchmark_group("array_resize");
    for steps in [16u64, 256] {
        group.bench_with_input(BenchmarkId::from_parameter(steps), &steps, |b, &steps| {
            b.iter(|| {
                let mut layout = Layout::default();
                let byte = layout.numeric(NumericSpec::u8()).unwrap();
                let array = layout.array(byte, 0, DeclArgs::new()).unwrap();
                let region = layout.instantiate(array).unwrap();
                for _ in 0..steps {
                    layout.add_elements(region, black_box(1)).unwrap();
                }
                layout.elements(region).unwrap()
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_front_growth, bench_array_resize);
criterion_main!(benches);
