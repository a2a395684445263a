use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use strata::{Point, Timestamp};

pub const DEFAULT_SEED: u64 = 0x_5354_5241_5441_4245; // fixed seed for stable benchmarks

/// `count` points one `step` apart ending at `end`, in time order. Roughly `gap_ratio`
/// of the slots are skipped so propagation sees partially known buckets.
pub fn generate_points(seed: u64, count: usize, end: Timestamp, step: u32, gap_ratio: f64) -> Vec<Point> {
    assert!(step > 0);
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let first = end - (count as u32 - 1) * step;
    (0..count as u32)
        .filter_map(|i| {
            let keep = rng.random::<f64>() >= gap_ratio;
            let value = rng.random::<u32>() as f64 * 0.001;
            keep.then(|| Point::new(first + i * step, value))
        })
        .collect()
}

/// Metric names `bench.host_<i>.cpu` for `series_count` hosts.
pub fn metric_names(series_count: usize) -> Vec<String> {
    (0..series_count).map(|i| format!("bench.host_{:02}.cpu", i)).collect()
}
