use std::{hint::black_box, time::Duration};

use chrono::{TimeDelta, Utc};
use criterion::{
    BenchmarkGroup, BenchmarkId, Criterion, criterion_group, criterion_main, measurement::WallTime,
};
use kafkalens::{
    engine::Engine,
    metrics::{self, MetricSeries, TimeRange},
    random::RandomSource,
    record::ConsumeRequest,
};
use parking_lot::Once;
use tokio::runtime::Runtime;

const SERIES_LENGTHS: [usize; 3] = [20, 1_000, 100_000];

pub fn criterion_benchmark(c: &mut Criterion) {
    maybe_start_logging();

    {
        let mut group = benchmark_group(c, "series");

        for len in SERIES_LENGTHS {
            let series = series(len);

            group.bench_with_input(BenchmarkId::new("aggregate", len), &series, |b, series| {
                b.iter(|| metrics::aggregate(black_box(series), TimeDelta::minutes(5)))
            });
            group.bench_with_input(BenchmarkId::new("smooth", len), &series, |b, series| {
                b.iter(|| metrics::smooth(black_box(series), 5))
            });
        }
    }

    {
        let mut group = benchmark_group(c, "engine");
        let engine = &Engine::builder().no_latency().seed(42).build();

        for range in [TimeRange::FiveMinutes, TimeRange::OneDay] {
            group.bench_with_input(
                BenchmarkId::new("cluster_metrics", range),
                &range,
                |b, range| {
                    b.to_async(runtime()).iter(|| async move {
                        engine
                            .get_cluster_metrics("cluster-1", *range)
                            .await
                            .unwrap()
                    })
                },
            );
        }

        group.bench_function("consume_10", |b| {
            b.to_async(runtime()).iter(|| async move {
                let topic = engine.list_topics("cluster-1").await.unwrap().remove(0);
                engine
                    .consume_messages(
                        "cluster-1",
                        ConsumeRequest::new(topic.name),
                    )
                    .await
                    .unwrap()
            })
        });
    }
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);

fn series(len: usize) -> MetricSeries {
    let mut random = RandomSource::seeded(7);
    metrics::generate_series(&mut random, 500.0, 200.0, len, TimeDelta::seconds(15), Utc::now())
}

fn benchmark_group<'a>(c: &'a mut Criterion, name: &str) -> BenchmarkGroup<'a, WallTime> {
    let mut group = c.benchmark_group(name);
    group.measurement_time(Duration::from_secs(5));
    group
}

fn runtime() -> Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .unwrap()
}

static LOG_SETUP: Once = Once::new();

/// Enables debug logging if the `RUST_LOG` environment variable is
/// set. Does nothing if `RUST_LOG` is not set.
pub fn maybe_start_logging() {
    if std::env::var("RUST_LOG").is_ok() {
        start_logging()
    }
}

/// Start logging.
pub fn start_logging() {
    use tracing_log::LogTracer;
    use tracing_subscriber::{FmtSubscriber, filter::EnvFilter};

    LOG_SETUP.call_once(|| {
        LogTracer::init().unwrap();

        let subscriber = FmtSubscriber::builder()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .finish();

        tracing::subscriber::set_global_default(subscriber)
            .expect("setting default subscriber failed");
    });
}
