use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use preprocess::{ChannelOrder, CpuPreProcessor, PixelBuffer, Preprocess};

/// Gradient frame so the resizer does real work on every row.
fn create_test_frame(width: u32, height: u32, order: ChannelOrder) -> PixelBuffer {
    let mut pixels = PixelBuffer::new();
    let bytes = pixels.prepare(width, height, order);
    for y in 0..height {
        for x in 0..width {
            let idx = ((y * width + x) * 3) as usize;
            bytes[idx] = (x % 256) as u8;
            bytes[idx + 1] = (y % 256) as u8;
            bytes[idx + 2] = ((x + y) % 256) as u8;
        }
    }
    pixels
}

fn benchmark_letterbox(c: &mut Criterion) {
    let mut group = c.benchmark_group("cpu_letterbox");

    let resolutions = [(640, 480), (1280, 720), (1920, 1080), (3840, 2160)];

    let mut preprocessor = CpuPreProcessor::new((640, 640));
    let mut tensor = preprocessor.allocate_tensor();

    for (width, height) in resolutions.iter() {
        let frame = create_test_frame(*width, *height, ChannelOrder::Rgb);

        group.bench_with_input(
            BenchmarkId::new("rgb", format!("{}x{}", width, height)),
            &frame,
            |b, frame| {
                b.iter(|| {
                    preprocessor
                        .letterbox(black_box(frame), &mut tensor)
                        .unwrap()
                });
            },
        );
    }

    group.finish();
}

fn benchmark_channel_order(c: &mut Criterion) {
    let mut group = c.benchmark_group("cpu_channel_order");

    let mut preprocessor = CpuPreProcessor::default();
    let mut tensor = preprocessor.allocate_tensor();

    for order in [ChannelOrder::Rgb, ChannelOrder::Bgr] {
        let frame = create_test_frame(1280, 720, order);

        group.bench_with_input(
            BenchmarkId::new("720p", format!("{:?}", order)),
            &frame,
            |b, frame| {
                b.iter(|| {
                    preprocessor
                        .letterbox(black_box(frame), &mut tensor)
                        .unwrap()
                });
            },
        );
    }

    group.finish();
}

criterion_group!(benches, benchmark_letterbox, benchmark_channel_order);
criterion_main!(benches);
