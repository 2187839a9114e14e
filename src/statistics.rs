use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::fmt::Write as _;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

/// Default number of samples kept per name
pub const DEFAULT_WINDOW_LENGTH: usize = 500;

/// Rolling window of the most recent samples for one name, in milliseconds
#[derive(Debug, Default)]
struct Window {
    samples: VecDeque<f64>,
    /// Not bounded by the window
    count: u64,
}

impl Window {
    fn record(&mut self, millis: f64, max_len: usize) {
        self.count += 1;
        self.samples.push_back(millis);
        while self.samples.len() > max_len {
            self.samples.pop_front();
        }
    }

    fn clear(&mut self) {
        self.samples.clear();
        self.count = 0;
    }

    fn statistic(&self, name: &str) -> Option<StageStatistic> {
        if self.samples.is_empty() {
            return None;
        }

        let n = self.samples.len() as f64;
        let mut sum = 0.0;
        let mut min = f64::MAX;
        let mut max = f64::MIN;
        for &s in &self.samples {
            sum += s;
            min = min.min(s);
            max = max.max(s);
        }
        let mean = sum / n;
        let variance = self
            .samples
            .iter()
            .map(|s| (s - mean) * (s - mean))
            .sum::<f64>()
            / n;

        Some(StageStatistic {
            name: name.to_string(),
            mean,
            std_dev: variance.max(0.0).sqrt(),
            min,
            max,
            count: self.count,
        })
    }
}

/// Timing summary for one named entity over its current window.
/// All durations are in milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageStatistic {
    pub name: String,
    pub mean: f64,
    /// Population standard deviation
    pub std_dev: f64,
    pub min: f64,
    pub max: f64,
    /// Total invocations since recording started
    pub count: u64,
}

impl StageStatistic {
    /// Format as a single human-readable line
    pub fn format(&self) -> String {
        format!(
            "{:<24} {:>10.4} {:>10.4} {:>10.4} {:>10.4} {:>10}",
            self.name, self.mean, self.std_dev, self.min, self.max, self.count
        )
    }
}

/// Per-name rolling-window runtime recorder.
///
/// Each name owns its own lock, so stages recording concurrently only
/// contend with invocations of the same stage. A snapshot taken while
/// stages are running may mix samples from slightly different instants.
#[derive(Debug)]
pub struct Recorder {
    windows: RwLock<HashMap<String, Arc<Mutex<Window>>>>,
    recording: AtomicBool,
    window_length: AtomicUsize,
}

impl Recorder {
    /// Create a recorder with the default window length. It starts recording.
    pub fn new() -> Self {
        Self::with_window_length(DEFAULT_WINDOW_LENGTH)
    }

    /// Create a recorder keeping `window_length` samples per name
    pub fn with_window_length(window_length: usize) -> Self {
        Self {
            windows: RwLock::new(HashMap::new()),
            recording: AtomicBool::new(true),
            window_length: AtomicUsize::new(window_length.max(1)),
        }
    }

    /// The process-wide recorder
    pub fn global() -> Arc<Recorder> {
        static GLOBAL: OnceLock<Arc<Recorder>> = OnceLock::new();
        Arc::clone(GLOBAL.get_or_init(|| Arc::new(Recorder::new())))
    }

    /// Clear every window and counter, then enable sampling.
    ///
    /// Windows are reset in place: stages holding a window across the restart
    /// keep recording into the series the next snapshot reads.
    pub fn start_recording(&self) {
        for window in self.windows.read().values() {
            window.lock().clear();
        }
        self.recording.store(true, Ordering::Release);
        tracing::debug!("statistics recording started");
    }

    /// Disable sampling. Existing windows are kept.
    pub fn stop_recording(&self) {
        self.recording.store(false, Ordering::Release);
        tracing::debug!("statistics recording stopped");
    }

    pub fn is_recording(&self) -> bool {
        self.recording.load(Ordering::Relaxed)
    }

    pub fn window_length(&self) -> usize {
        self.window_length.load(Ordering::Relaxed)
    }

    /// Change the window length. Longer windows are trimmed on their next sample.
    pub fn set_window_length(&self, window_length: usize) {
        self.window_length.store(window_length.max(1), Ordering::Relaxed);
    }

    /// Record one runtime sample for `name`. No-op while not recording.
    pub fn record_runtime(&self, name: &str, elapsed: Duration) {
        if !self.is_recording() {
            return;
        }

        let millis = elapsed.as_secs_f64() * 1000.0;
        let max_len = self.window_length();

        let existing = self.windows.read().get(name).cloned();
        let window = match existing {
            Some(window) => window,
            None => Arc::clone(
                self.windows
                    .write()
                    .entry(name.to_string())
                    .or_default(),
            ),
        };

        window.lock().record(millis, max_len);
    }

    /// Compute a fresh snapshot for every name with at least one sample,
    /// sorted by name
    pub fn get_statistic(&self) -> Vec<StageStatistic> {
        let windows: Vec<(String, Arc<Mutex<Window>>)> = self
            .windows
            .read()
            .iter()
            .map(|(name, window)| (name.clone(), Arc::clone(window)))
            .collect();

        let mut stats: Vec<StageStatistic> = windows
            .iter()
            .filter_map(|(name, window)| window.lock().statistic(name))
            .collect();
        stats.sort_by(|a, b| a.name.cmp(&b.name));
        stats
    }

    /// Render the current snapshot as a table
    pub fn summary(&self) -> String {
        let mut out = String::from("================= Module Runtime (ms) ====================\n");
        let _ = writeln!(
            out,
            "{:<24} {:>10} {:>10} {:>10} {:>10} {:>10}",
            "Name", "Average", "StdDev", "Min", "Max", "Count"
        );
        for stat in self.get_statistic() {
            out.push_str(&stat.format());
            out.push('\n');
        }
        out
    }
}

impl Default for Recorder {
    fn default() -> Self {
        Self::new()
    }
}

/// Clear and enable the global recorder
pub fn start_recording() {
    Recorder::global().start_recording();
}

/// Disable the global recorder
pub fn stop_recording() {
    Recorder::global().stop_recording();
}

/// Record a sample on the global recorder
pub fn record_runtime(name: &str, elapsed: Duration) {
    Recorder::global().record_runtime(name, elapsed);
}

/// Snapshot of the global recorder
pub fn get_statistic() -> Vec<StageStatistic> {
    Recorder::global().get_statistic()
}

/// Window length of the global recorder
pub fn window_length() -> usize {
    Recorder::global().window_length()
}

/// Set the window length of the global recorder
pub fn set_window_length(window_length: usize) {
    Recorder::global().set_window_length(window_length);
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    #[test]
    fn test_mean_std_min_max() {
        let recorder = Recorder::new();
        for v in [2, 4, 4, 4, 5, 5, 7, 9] {
            recorder.record_runtime("decode", ms(v));
        }

        let stats = recorder.get_statistic();
        assert_eq!(stats.len(), 1);
        let s = &stats[0];
        assert_eq!(s.name, "decode");
        assert!((s.mean - 5.0).abs() < 1e-9);
        assert!((s.std_dev - 2.0).abs() < 1e-9);
        assert!((s.min - 2.0).abs() < 1e-9);
        assert!((s.max - 9.0).abs() < 1e-9);
        assert_eq!(s.count, 8);
    }

    #[test]
    fn test_window_evicts_oldest() {
        let recorder = Recorder::with_window_length(3);
        for v in 1..=5 {
            recorder.record_runtime("x", ms(v));
        }

        let s = &recorder.get_statistic()[0];
        assert!((s.min - 3.0).abs() < 1e-9);
        assert!((s.max - 5.0).abs() < 1e-9);
        assert_eq!(s.count, 5);
    }

    #[test]
    fn test_stop_freezes_snapshot() {
        let recorder = Recorder::new();
        recorder.record_runtime("a", ms(1));
        recorder.stop_recording();
        let before = recorder.get_statistic();

        recorder.record_runtime("a", ms(100));
        recorder.record_runtime("b", ms(100));

        assert_eq!(recorder.get_statistic(), before);
        assert_eq!(recorder.get_statistic(), before);
    }

    #[test]
    fn test_start_clears() {
        let recorder = Recorder::new();
        recorder.record_runtime("a", ms(1));
        recorder.start_recording();
        assert!(recorder.get_statistic().is_empty());

        recorder.record_runtime("a", ms(3));
        assert_eq!(recorder.get_statistic()[0].count, 1);
    }

    #[test]
    fn test_restart_keeps_window_shared() {
        let recorder = Recorder::new();
        recorder.record_runtime("a", ms(1));
        let held = recorder.windows.read().get("a").cloned().unwrap();

        recorder.start_recording();
        held.lock().record(4.0, recorder.window_length());

        let stats = recorder.get_statistic();
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].count, 1);
        assert!((stats[0].mean - 4.0).abs() < 1e-9);
    }

    #[test]
    fn test_snapshot_sorted_by_name() {
        let recorder = Recorder::new();
        recorder.record_runtime("zeta", ms(1));
        recorder.record_runtime("alpha", ms(1));
        let names: Vec<_> = recorder.get_statistic().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
    }

    #[test]
    fn test_shrinking_window() {
        let recorder = Recorder::with_window_length(10);
        for v in 1..=10 {
            recorder.record_runtime("x", ms(v));
        }
        recorder.set_window_length(2);
        recorder.record_runtime("x", ms(11));

        let s = &recorder.get_statistic()[0];
        assert!((s.min - 10.0).abs() < 1e-9);
        assert_eq!(s.count, 11);
    }

    #[test]
    fn test_concurrent_names() {
        let recorder = Arc::new(Recorder::new());
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let recorder = Arc::clone(&recorder);
                std::thread::spawn(move || {
                    let name = format!("stage{}", i);
                    for _ in 0..1000 {
                        recorder.record_runtime(&name, Duration::from_micros(10));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let stats = recorder.get_statistic();
        assert_eq!(stats.len(), 4);
        assert!(stats.iter().all(|s| s.count == 1000));
    }

    #[test]
    fn test_summary_lists_names() {
        let recorder = Recorder::new();
        recorder.record_runtime("resize", ms(2));
        let summary = recorder.summary();
        assert!(summary.contains("resize"));
        assert!(summary.contains("Average"));
    }

    proptest! {
        #[test]
        fn prop_window_keeps_most_recent(samples in proptest::collection::vec(1u64..1000, 501..1200)) {
            let recorder = Recorder::new();
            for &s in &samples {
                recorder.record_runtime("X", Duration::from_micros(s));
            }

            let tail = &samples[samples.len() - DEFAULT_WINDOW_LENGTH..];
            let min = *tail.iter().min().unwrap() as f64 / 1000.0;
            let max = *tail.iter().max().unwrap() as f64 / 1000.0;

            let stat = &recorder.get_statistic()[0];
            prop_assert_eq!(stat.count, samples.len() as u64);
            prop_assert!((stat.min - min).abs() < 1e-9);
            prop_assert!((stat.max - max).abs() < 1e-9);
        }
    }
}
