use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use face_harvest::FaceBuffer;
use face_harvest::detector::FaceRect;
use face_harvest::face::{FaceImage, RunContext, crop_faces};
use image::{Rgb, RgbImage};

fn create_frame() -> RgbImage {
    RgbImage::from_fn(1920, 1080, |x, y| Rgb([(x % 256) as u8, (y % 256) as u8, 128]))
}

fn create_faces(count: usize) -> Vec<FaceRect> {
    (0..count)
        .map(|i| FaceRect::new(100 + 150 * i as i32, 200, 120, 140))
        .collect()
}

fn benchmark_cropping(c: &mut Criterion) {
    let mut group = c.benchmark_group("face_cropping");
    let frame = create_frame();

    for face_count in [1, 3, 5, 10].iter() {
        let rects = create_faces(*face_count);
        group.bench_with_input(BenchmarkId::new("crop_faces", face_count), &rects, |b, rects| {
            b.iter(|| black_box(crop_faces(black_box(&frame), black_box(rects))))
        });
    }

    // Rectangles hanging off the frame edge get clamped
    let edge = vec![FaceRect::new(-40, -40, 200, 200), FaceRect::new(1850, 1000, 200, 200)];
    group.bench_function("crop_faces_clamped", |b| {
        b.iter(|| black_box(crop_faces(black_box(&frame), black_box(&edge))))
    });

    group.bench_function("grayscale_frame", |b| {
        b.iter(|| black_box(image::imageops::grayscale(black_box(&frame))))
    });

    group.finish();
}

fn benchmark_buffer(c: &mut Criterion) {
    let mut group = c.benchmark_group("face_buffer");
    let crop = RgbImage::new(120, 140);

    for size in [10usize, 100, 1000].iter() {
        group.bench_with_input(BenchmarkId::new("fill_and_classify", size), size, |b, &size| {
            b.iter(|| {
                let run = RunContext::with_timestamp("20240101_000000");
                let buffer = FaceBuffer::new();
                for _ in 0..size {
                    buffer.push(FaceImage::detected(crop.clone(), run.next_file_name()));
                }
                for position in (1..=size).step_by(2) {
                    buffer.set_folder(position, "cat");
                }
                while buffer.remove(1).is_some() {}
                black_box(buffer.len())
            })
        });
    }

    group.finish();
}

criterion_group!(benches, benchmark_cropping, benchmark_buffer);
criterion_main!(benches);
