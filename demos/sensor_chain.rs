//! Sensor frame chain demonstrating stage concurrency and timing statistics
//!
//! Pipeline:
//! 1. Normalize: Scale raw readings to 0..1 (2 workers)
//! 2. Smooth: Moving average over each frame (4 workers)
//! 3. Threshold: Count readings above 0.5 (1 worker)
//!
//! Usage: cargo run --example sensor_chain --release

use frame_pipeline::{
    drive, statistics, AppContext, Application, Daemon, IteratorSource, Module,
    Pipeline, PipelineConfig, Result as PipelineResult, DATAFRAME_EOL, GRAPH_INPUT,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// One frame of sensor readings, shared between stages by handle
type Readings = Arc<Mutex<Vec<f32>>>;

struct Normalize;

impl Module<Readings> for Normalize {
    fn update(&self, frame: Readings) -> Readings {
        {
            let mut values = frame.lock();
            let max = values.iter().cloned().fold(f32::MIN, f32::max).max(1.0);
            values.iter_mut().for_each(|v| *v /= max);
        }
        frame
    }
}

struct Smooth {
    width: usize,
}

impl Module<Readings> for Smooth {
    fn post_initialize(&mut self) {
        self.width = self.width.max(1);
    }

    fn update(&self, frame: Readings) -> Readings {
        {
            let mut values = frame.lock();
            let smoothed: Vec<f32> = (0..values.len())
                .map(|i| {
                    let start = i.saturating_sub(self.width / 2);
                    let end = (i + self.width / 2 + 1).min(values.len());
                    values[start..end].iter().sum::<f32>() / (end - start) as f32
                })
                .collect();
            *values = smoothed;
        }
        frame
    }
}

struct Threshold {
    hits: Arc<AtomicU64>,
}

impl Module<Readings> for Threshold {
    fn update(&self, frame: Readings) -> Readings {
        let above = frame.lock().iter().filter(|&&v| v > 0.5).count();
        self.hits.fetch_add(above as u64, Ordering::Relaxed);
        frame
    }
}

/// Starts and stops statistics collection around the run
struct StatisticsDaemon;

impl Daemon for StatisticsDaemon {
    fn name(&self) -> &str {
        "statistics"
    }

    fn start(&mut self) -> PipelineResult<()> {
        statistics::start_recording();
        Ok(())
    }

    fn stop(&mut self) -> PipelineResult<()> {
        statistics::stop_recording();
        println!("{}", statistics::Recorder::global().summary());
        Ok(())
    }
}

struct SensorApp {
    frames: u64,
}

impl Application for SensorApp {
    fn run(&mut self, _ctx: &mut AppContext) -> PipelineResult<()> {
        let hits = Arc::new(AtomicU64::new(0));

        let mut pipeline = Pipeline::with_config(PipelineConfig::with_max_capacity(32))?;
        pipeline.add_module("normalize", 2, Normalize)?;
        pipeline.add_module("smooth", 4, Smooth { width: 5 })?;
        pipeline.add_module("threshold", 1, Threshold { hits: Arc::clone(&hits) })?;
        pipeline.connect_module(GRAPH_INPUT, "normalize")?;
        pipeline.connect_module("normalize", "smooth")?;
        pipeline.connect_module("smooth", "threshold")?;
        pipeline.connect_module("threshold", DATAFRAME_EOL)?;
        pipeline.construct()?;

        let frames = (0..self.frames).map(|n| {
            let values = (0..1024).map(|i| ((n + i) % 97) as f32).collect();
            Arc::new(Mutex::new(values))
        });
        let mut source = IteratorSource::new(frames, 64);

        let start = Instant::now();
        let report = drive(&mut source, &pipeline)?;
        let elapsed = start.elapsed();

        println!("\n=== Sensor Chain Results ===");
        println!("Frames admitted: {}", report.admitted);
        println!("Throttled pushes: {}", report.throttled);
        println!("Readings above threshold: {}", hits.load(Ordering::Relaxed));
        println!("Elapsed: {:.2?}", elapsed);
        println!(
            "Throughput: {:.0} frames/s\n",
            report.admitted as f64 / elapsed.as_secs_f64()
        );
        Ok(())
    }
}

fn main() -> PipelineResult<()> {
    tracing_subscriber::fmt::init();

    let mut ctx = AppContext::new();
    ctx.add_daemon(StatisticsDaemon);
    ctx.run(&mut SensorApp { frames: 2000 })
}
