use criterion::{black_box, criterion_group, criterion_main, Criterion};
use light_minded::volume::Affine;
use light_minded::{BrainMesh, IsosurfaceExtractor, MarchingTetrahedra, MeshExportOptions, MeshExporter, Volume};
use ndarray::Array3;

/// A ball of radius 20 voxels in a 48^3 grid.
fn ball() -> Array3<f32> {
    Array3::from_shape_fn((48, 48, 48), |(i, j, k)| {
        let d = [i as f32 - 24.0, j as f32 - 24.0, k as f32 - 24.0];
        if d[0] * d[0] + d[1] * d[1] + d[2] * d[2] < 400.0 { 1.0 } else { 0.0 }
    })
}

/// Eight labeled octants of the ball.
fn octant_atlas() -> Volume {
    let ball = ball();
    let data = Array3::from_shape_fn((48, 48, 48), |(i, j, k)| {
        if ball[[i, j, k]] == 0.0 {
            0.0
        } else {
            (1 + (i / 24) + 2 * (j / 24) + 4 * (k / 24)) as f32
        }
    });
    Volume::new(data, Affine::identity())
}

fn extract(field: &Array3<f32>) -> BrainMesh {
    MarchingTetrahedra.extract(field.view(), 0.5).unwrap()
}

fn bench_isosurface(c: &mut Criterion) {
    let field = ball();
    c.bench_function("marching_tetrahedra_ball", |b| {
        b.iter(|| extract(black_box(&field)))
    });

    let atlas = octant_atlas();
    let exporter = MeshExporter::new(MeshExportOptions::default());
    c.bench_function("region_mesh_octant", |b| {
        b.iter(|| exporter.region_mesh(black_box(&atlas), 5).unwrap())
    });
}

criterion_group!(benches, bench_isosurface);
criterion_main!(benches);
