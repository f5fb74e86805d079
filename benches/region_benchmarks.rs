use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use retouch::{
    fill_masked, grow_region, MaskPolygon, PixelBuffer, Point, RegionConfig, RegionEngine,
    TileProgress,
};
use tokio::runtime::Runtime;
use tokio_util::sync::CancellationToken;

/// Gradient with a flat square in the middle, so growth stops at an edge
fn scene(size: u32) -> PixelBuffer {
    let mut pixels = PixelBuffer::filled(size, size, [0, 0, 0, 255]);
    let (lo, hi) = (i64::from(size / 4), i64::from(size * 3 / 4));
    for y in 0..i64::from(size) {
        for x in 0..i64::from(size) {
            let color = if (lo..hi).contains(&x) && (lo..hi).contains(&y) {
                [200, 40, 40, 255]
            } else {
                [(x % 256) as u8, (y % 256) as u8, 128, 255]
            };
            pixels.set_pixel(x, y, color);
        }
    }
    pixels
}

fn centre_mask(size: u32) -> MaskPolygon {
    let (lo, hi) = ((size / 3) as i32, (size * 2 / 3) as i32);
    MaskPolygon::new(vec![
        Point::new(lo, lo),
        Point::new(hi, lo + 4),
        Point::new(hi - 2, hi),
        Point::new(lo + 3, hi - 1),
    ])
    .unwrap()
}

fn bench_region_growing(c: &mut Criterion) {
    let mut group = c.benchmark_group("region_growing");
    for size in [128u32, 256, 512] {
        let pixels = scene(size);
        let seed = Point::new((size / 2) as i32, (size / 2) as i32);
        let config = RegionConfig {
            max_region_pixels: usize::MAX,
            ..RegionConfig::default()
        };
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| grow_region(black_box(&pixels), seed, &config).unwrap());
        });
    }
    group.finish();
}

fn bench_masked_fill(c: &mut Criterion) {
    let mut group = c.benchmark_group("masked_fill");
    group.sample_size(20);
    for radius in [3u32, 5, 9] {
        let pixels = scene(256);
        let mask = centre_mask(256);
        group.bench_with_input(BenchmarkId::new("radius", radius), &radius, |b, &radius| {
            b.iter(|| fill_masked(black_box(&pixels), &mask, radius).unwrap());
        });
    }
    group.finish();
}

fn bench_tile_size(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let pixels = scene(256);
    let mask = centre_mask(256);
    let token = CancellationToken::new();

    let mut group = c.benchmark_group("tiled_fill");
    group.sample_size(20);
    for tile_size in [32u32, 100, 256] {
        let engine = RegionEngine::new(RegionConfig {
            tile_size,
            ..RegionConfig::default()
        });
        group.bench_with_input(BenchmarkId::new("tile", tile_size), &tile_size, |b, _| {
            b.iter(|| {
                rt.block_on(engine.remove(&pixels, &mask, &token, &mut |_: TileProgress| {}))
                    .unwrap()
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_region_growing, bench_masked_fill, bench_tile_size);
criterion_main!(benches);
