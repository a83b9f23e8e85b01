use criterion::{
    BenchmarkId, Criterion, black_box, criterion_group, criterion_main,
};
use nalgebra::Vector3;
use std::sync::Arc;

use rsl::{
    asm::Shader,
    grid::{Grid, GridLayout},
    vm::{Lighting, ShaderInstance, shade_all},
};

const PLASTIC: &str = "
surface plastic(float Ka = 1; float Kd = 0.5; float freq = 8;)
{
    normal Nf = faceforward(normalize(N), I);
    float n = noise(P * freq);
    Oi = Os;
    Ci = Os * Cs * n * (Ka * ambient() + Kd * diffuse(Nf));
}
";

fn lighting() -> Lighting {
    Lighting::new(Vector3::repeat(0.1))
        .with_light(Vector3::new(0.3, 0.3, 1.0), Vector3::repeat(1.0))
}

pub fn compile(c: &mut Criterion) {
    c.bench_function("compile plastic", |b| {
        b.iter(|| black_box(rsl::compiler::compile(PLASTIC, "plastic.sl")))
    });
    let asm = rsl::compiler::compile(PLASTIC, "plastic.sl").unwrap();
    c.bench_function("assemble plastic", |b| {
        b.iter(|| black_box(Shader::from_asm(&asm, "plastic")))
    });
}

pub fn grid_size_sweep(c: &mut Criterion) {
    let shader = Arc::new(Shader::from_rsl(PLASTIC, "plastic").unwrap());
    let inst = &ShaderInstance::new(shader);
    let lights = &lighting();

    let mut group = c.benchmark_group("speed vs grid size (plastic)");
    for size in [8, 16, 32, 64, 128] {
        let grid = &Grid::plane(GridLayout::new(size, size));
        group.bench_function(BenchmarkId::new("vm", size), move |b| {
            b.iter(|| {
                let mut g = grid.clone();
                black_box(inst.shade(&mut g, lights))
            })
        });
    }
}

pub fn grid_count_sweep(c: &mut Criterion) {
    let shader = Arc::new(Shader::from_rsl(PLASTIC, "plastic").unwrap());
    let inst = &ShaderInstance::new(shader);
    let lights = &lighting();

    let mut group = c.benchmark_group("speed vs grid count (plastic, 16x16)");
    for count in [1, 4, 16, 64] {
        let grids = &vec![Grid::plane(GridLayout::new(16, 16)); count];
        group.bench_function(BenchmarkId::new("shade_all", count), move |b| {
            b.iter(|| {
                let mut gs = grids.clone();
                black_box(shade_all(inst, &mut gs, lights))
            })
        });
    }
}

criterion_group!(benches, compile, grid_size_sweep, grid_count_sweep);
criterion_main!(benches);
