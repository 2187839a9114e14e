use crate::config::PipelineConfig;
use crate::error::{PipelineError, PushError, Result};
use crate::frame::Frame;
use crate::stage::{Module, StageRunner};
use crate::statistics::{Recorder, DEFAULT_WINDOW_LENGTH};
use crossbeam::channel::{bounded, Sender, TrySendError};
use parking_lot::{Condvar, Mutex};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicIsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, error, info, trace, warn};

/// Reserved name of the chain entry point
pub const GRAPH_INPUT: &str = "[Graph_Input]";

/// Reserved name of the chain exit point, where frames are disposed
pub const DATAFRAME_EOL: &str = "[DataFrame_EOL]";

/// Frames admitted but not yet disposed.
///
/// Admission counts a frame only after the entry queue accepted it, so a fast
/// chain may retire the frame first and leave the count briefly at -1.
pub(crate) struct LoadCounter {
    load: AtomicIsize,
    idle: Mutex<()>,
    drained: Condvar,
}

impl LoadCounter {
    pub(crate) fn new() -> Self {
        Self {
            load: AtomicIsize::new(0),
            idle: Mutex::new(()),
            drained: Condvar::new(),
        }
    }

    pub(crate) fn acquire(&self) {
        if self.load.fetch_add(1, Ordering::AcqRel) == -1 {
            self.notify_idle();
        }
    }

    pub(crate) fn release(&self) {
        if self.load.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.notify_idle();
        }
    }

    fn notify_idle(&self) {
        let _guard = self.idle.lock();
        self.drained.notify_all();
    }

    /// Frames in flight, never negative
    pub(crate) fn current(&self) -> usize {
        self.load.load(Ordering::Acquire).max(0) as usize
    }

    /// Block until no frame is in flight
    pub(crate) fn wait_idle(&self) {
        let mut guard = self.idle.lock();
        while self.load.load(Ordering::Acquire) > 0 {
            self.drained.wait(&mut guard);
        }
    }
}

struct Registration<F> {
    module: Box<dyn Module<F>>,
    concurrency: usize,
}

/// Worker threads of one materialized stage
struct StageNode {
    name: String,
    workers: Vec<JoinHandle<()>>,
}

/// A linear chain of concurrently executing stages.
///
/// Assembly is two-phase: register modules with [`add_module`](Self::add_module)
/// and edges with [`connect_module`](Self::connect_module), then validate and
/// start the chain with [`construct`](Self::construct). Frames are admitted
/// with [`push_frame`](Self::push_frame) and disposed exactly once after the
/// last stage.
pub struct Pipeline<F: Frame> {
    config: PipelineConfig,
    load: Arc<LoadCounter>,
    recorder: Arc<Recorder>,
    modules: HashMap<String, Registration<F>>,
    connections: HashMap<String, String>,
    chain: Vec<String>,
    entry: Option<Sender<F>>,
    nodes: Vec<StageNode>,
}

impl<F: Frame> Pipeline<F> {
    /// Create an empty pipeline reporting overload above `max_capacity`
    /// frames in flight. Timing goes to the global recorder.
    pub fn new(max_capacity: usize) -> Self {
        Self::build(PipelineConfig::with_max_capacity(max_capacity), Recorder::global())
    }

    /// Create an empty pipeline from a full configuration
    pub fn with_config(config: PipelineConfig) -> Result<Self> {
        Self::with_recorder(config, Recorder::global())
    }

    /// Create an empty pipeline timing its stages into `recorder`
    pub fn with_recorder(config: PipelineConfig, recorder: Arc<Recorder>) -> Result<Self> {
        config.validate()?;
        if config.statistics_window != DEFAULT_WINDOW_LENGTH {
            recorder.set_window_length(config.statistics_window);
        }
        Ok(Self::build(config, recorder))
    }

    fn build(config: PipelineConfig, recorder: Arc<Recorder>) -> Self {
        Self {
            config,
            load: Arc::new(LoadCounter::new()),
            recorder,
            modules: HashMap::new(),
            connections: HashMap::new(),
            chain: Vec::new(),
            entry: None,
            nodes: Vec::new(),
        }
    }

    /// Register a module under `name` with up to `concurrency` simultaneous
    /// `update` calls. Re-registering a name replaces the earlier module.
    pub fn add_module<M>(&mut self, name: impl Into<String>, concurrency: usize, module: M) -> Result<()>
    where
        M: Module<F>,
    {
        let name = name.into();
        if self.is_constructed() {
            return Err(PipelineError::AlreadyConstructed);
        }
        if name == GRAPH_INPUT || name == DATAFRAME_EOL {
            return Err(PipelineError::ConfigError(format!("'{}' is a reserved name", name)));
        }
        if concurrency == 0 {
            return Err(PipelineError::InvalidConcurrency { name });
        }

        debug!(module = %name, concurrency, "registering module");
        let previous = self.modules.insert(
            name.clone(),
            Registration {
                module: Box::new(module),
                concurrency,
            },
        );
        if previous.is_some() {
            debug!(module = %name, "replaced earlier registration");
        }
        Ok(())
    }

    /// Record the edge `from -> to`.
    ///
    /// Allowed edges are entry -> module, module -> exit and module -> module.
    /// Each `from` has a single successor: connecting it again replaces the edge.
    pub fn connect_module(&mut self, from: &str, to: &str) -> Result<()> {
        if self.is_constructed() {
            return Err(PipelineError::AlreadyConstructed);
        }

        let from_registered = self.modules.contains_key(from);
        let to_registered = self.modules.contains_key(to);
        let valid = (from == GRAPH_INPUT && to_registered)
            || (from_registered && to == DATAFRAME_EOL)
            || (from_registered && to_registered);

        if !valid {
            warn!(from, to, "rejected connection");
            if from != GRAPH_INPUT && !from_registered {
                return Err(PipelineError::UnknownModule { name: from.to_string() });
            }
            if to != DATAFRAME_EOL && !to_registered {
                return Err(PipelineError::UnknownModule { name: to.to_string() });
            }
            return Err(PipelineError::InvalidConnection {
                from: from.to_string(),
                to: to.to_string(),
            });
        }

        debug!(from, to, "connected");
        self.connections.insert(from.to_string(), to.to_string());
        Ok(())
    }

    /// Walk the edges from the entry point and return the ordered chain,
    /// sentinels included
    fn check_connection(&self) -> Result<Vec<String>> {
        let mut chain = vec![GRAPH_INPUT.to_string()];
        let mut visited = HashSet::new();
        let mut current = GRAPH_INPUT;

        while let Some(next) = self.connections.get(current) {
            if !visited.insert(next.as_str()) {
                warn!(stage = %next, "chain revisits a stage");
                return Err(PipelineError::BrokenChain { last: next.clone() });
            }
            chain.push(next.clone());
            current = next.as_str();
        }

        if current != DATAFRAME_EOL {
            warn!(last = current, "chain does not reach the exit point");
            return Err(PipelineError::BrokenChain {
                last: current.to_string(),
            });
        }
        if chain.len() <= 2 {
            return Err(PipelineError::EmptyChain);
        }
        Ok(chain)
    }

    /// Validate the topology, initialize every module in chain order and
    /// start the worker threads.
    pub fn construct(&mut self) -> Result<()> {
        if self.is_constructed() {
            return Err(PipelineError::AlreadyConstructed);
        }

        let chain = self.check_connection()?;
        let stages = &chain[1..chain.len() - 1];

        let mut modules = Vec::with_capacity(stages.len());
        for name in stages {
            let Registration {
                mut module,
                concurrency,
            } = self
                .modules
                .remove(name)
                .ok_or_else(|| PipelineError::UnknownModule { name: name.clone() })?;
            module.post_initialize();
            modules.push((name, Arc::<dyn Module<F>>::from(module), concurrency));
        }

        let (senders, receivers): (Vec<_>, Vec<_>) = (0..modules.len())
            .map(|_| bounded::<F>(self.config.queue_capacity))
            .unzip();

        for (index, (name, module, concurrency)) in modules.into_iter().enumerate() {
            let runner = StageRunner::new(
                name,
                module,
                receivers[index].clone(),
                senders.get(index + 1).cloned(),
                Arc::clone(&self.load),
                &self.recorder,
            );

            let mut workers = Vec::with_capacity(concurrency);
            for worker in 0..concurrency {
                match runner.clone().spawn(worker) {
                    Ok(handle) => workers.push(handle),
                    Err(e) => {
                        error!(stage = %name, "failed to spawn worker: {}", e);
                        self.nodes.push(StageNode {
                            name: name.clone(),
                            workers,
                        });
                        drop(runner);
                        drop(senders);
                        drop(receivers);
                        self.join_nodes();
                        return Err(PipelineError::ThreadError(e.to_string()));
                    }
                }
            }
            self.nodes.push(StageNode {
                name: name.clone(),
                workers,
            });
        }

        self.entry = senders.into_iter().next();
        self.chain = chain;
        info!(chain = ?self.chain, "pipeline constructed");
        Ok(())
    }

    /// Try to admit a frame without blocking.
    ///
    /// On failure nothing changes and the frame is handed back in the error.
    pub fn push_frame(&self, frame: F) -> std::result::Result<(), PushError<F>> {
        if frame.is_empty() {
            return Err(PushError::Empty(frame));
        }
        let Some(entry) = &self.entry else {
            return Err(PushError::Closed(frame));
        };

        match entry.try_send(frame) {
            Ok(()) => {
                self.load.acquire();
                Ok(())
            }
            Err(TrySendError::Full(frame)) => {
                trace!("entry queue full, frame rejected");
                Err(PushError::Full(frame))
            }
            Err(TrySendError::Disconnected(frame)) => Err(PushError::Closed(frame)),
        }
    }

    /// Whether more frames are in flight than the configured maximum capacity.
    /// Advisory: admission does not consult it.
    pub fn overload(&self) -> bool {
        self.load.current() > self.config.max_capacity
    }

    /// Block until every admitted frame has been disposed
    pub fn wait_finish(&self) {
        self.load.wait_idle();
    }

    /// Drain in-flight frames, stop all workers and forget every registration
    /// and edge, leaving an empty pipeline that can be assembled again
    pub fn reset(&mut self) {
        // Closing the entry lets each stage drain and close the next one.
        self.entry = None;
        self.join_nodes();
        self.modules.clear();
        self.connections.clear();
        self.chain.clear();
    }

    fn join_nodes(&mut self) {
        for node in self.nodes.drain(..) {
            for worker in node.workers {
                if worker.join().is_err() {
                    error!(stage = %node.name, "worker thread panicked");
                }
            }
        }
    }

    /// Frames admitted but not yet disposed
    pub fn load(&self) -> usize {
        self.load.current()
    }

    pub fn max_capacity(&self) -> usize {
        self.config.max_capacity
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// The constructed chain from entry to exit, sentinels included.
    /// Empty until [`construct`](Self::construct) succeeds.
    pub fn chain(&self) -> &[String] {
        &self.chain
    }

    pub fn is_constructed(&self) -> bool {
        self.entry.is_some()
    }

    pub fn recorder(&self) -> &Arc<Recorder> {
        &self.recorder
    }
}

impl<F: Frame> Drop for Pipeline<F> {
    fn drop(&mut self) {
        self.wait_finish();
        self.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::PassthroughModule;

    #[derive(Debug)]
    struct Token(u32);

    impl Frame for Token {
        fn dispose(_frame: Self) {}

        fn is_empty(&self) -> bool {
            self.0 == 0
        }
    }

    fn pipeline() -> Pipeline<Token> {
        Pipeline::with_recorder(PipelineConfig::with_max_capacity(4), Arc::new(Recorder::new())).unwrap()
    }

    #[test]
    fn test_connect_rules() {
        let mut p = pipeline();
        p.add_module("a", 1, PassthroughModule).unwrap();
        p.add_module("b", 1, PassthroughModule).unwrap();

        assert!(p.connect_module(GRAPH_INPUT, "a").is_ok());
        assert!(p.connect_module("a", "b").is_ok());
        assert!(p.connect_module("b", DATAFRAME_EOL).is_ok());

        assert!(matches!(
            p.connect_module(GRAPH_INPUT, DATAFRAME_EOL),
            Err(PipelineError::InvalidConnection { .. })
        ));
        assert!(matches!(
            p.connect_module("a", "missing"),
            Err(PipelineError::UnknownModule { .. })
        ));
        assert!(matches!(
            p.connect_module(DATAFRAME_EOL, "a"),
            Err(PipelineError::InvalidConnection { .. })
        ));
        assert!(p.connect_module("a", GRAPH_INPUT).is_err());
    }

    #[test]
    fn test_check_connection_order() {
        let mut p = pipeline();
        for name in ["x", "y", "z"] {
            p.add_module(name, 1, PassthroughModule).unwrap();
        }
        p.connect_module("y", "z").unwrap();
        p.connect_module(GRAPH_INPUT, "x").unwrap();
        p.connect_module("z", DATAFRAME_EOL).unwrap();
        p.connect_module("x", "y").unwrap();

        assert_eq!(
            p.check_connection().unwrap(),
            vec![GRAPH_INPUT, "x", "y", "z", DATAFRAME_EOL]
        );
    }

    #[test]
    fn test_cycle_fails() {
        let mut p = pipeline();
        p.add_module("a", 1, PassthroughModule).unwrap();
        p.add_module("b", 1, PassthroughModule).unwrap();
        p.connect_module(GRAPH_INPUT, "a").unwrap();
        p.connect_module("a", "b").unwrap();
        p.connect_module("b", "a").unwrap();

        assert!(matches!(p.construct(), Err(PipelineError::BrokenChain { .. })));
        assert!(!p.is_constructed());
    }

    #[test]
    fn test_reserved_and_zero_concurrency_rejected() {
        let mut p = pipeline();
        assert!(p.add_module(GRAPH_INPUT, 1, PassthroughModule).is_err());
        assert!(matches!(
            p.add_module("a", 0, PassthroughModule),
            Err(PipelineError::InvalidConcurrency { .. })
        ));
    }

    #[test]
    fn test_push_before_construct_is_closed() {
        let p = pipeline();
        assert!(matches!(p.push_frame(Token(1)), Err(PushError::Closed(_))));
        assert_eq!(p.load(), 0);
    }

    #[test]
    fn test_reset_allows_reassembly() {
        let mut p = pipeline();
        p.add_module("a", 2, PassthroughModule).unwrap();
        p.connect_module(GRAPH_INPUT, "a").unwrap();
        p.connect_module("a", DATAFRAME_EOL).unwrap();
        p.construct().unwrap();
        assert!(matches!(p.construct(), Err(PipelineError::AlreadyConstructed)));
        assert!(p.push_frame(Token(1)).is_ok());

        p.reset();
        assert_eq!(p.load(), 0);
        assert!(!p.is_constructed());
        assert!(p.chain().is_empty());

        p.add_module("b", 1, PassthroughModule).unwrap();
        p.connect_module(GRAPH_INPUT, "b").unwrap();
        p.connect_module("b", DATAFRAME_EOL).unwrap();
        assert!(p.construct().is_ok());
    }

    #[test]
    fn test_load_counter_wakes_waiter() {
        let load = Arc::new(LoadCounter::new());
        load.acquire();
        let waiter = {
            let load = Arc::clone(&load);
            std::thread::spawn(move || load.wait_idle())
        };
        std::thread::sleep(std::time::Duration::from_millis(20));
        load.release();
        waiter.join().unwrap();
        assert_eq!(load.current(), 0);
    }

    #[test]
    fn test_load_counter_tolerates_release_before_acquire() {
        let load = LoadCounter::new();
        load.release();
        assert_eq!(load.current(), 0);
        load.wait_idle();

        load.acquire();
        assert_eq!(load.current(), 0);
        load.wait_idle();
    }

    #[test]
    fn test_default_window_leaves_recorder_alone() {
        let recorder = Arc::new(Recorder::with_window_length(7));
        let _p: Pipeline<Token> =
            Pipeline::with_recorder(PipelineConfig::default(), Arc::clone(&recorder)).unwrap();
        assert_eq!(recorder.window_length(), 7);

        let _q: Pipeline<Token> = Pipeline::with_recorder(
            PipelineConfig::default().statistics_window(3),
            Arc::clone(&recorder),
        )
        .unwrap();
        assert_eq!(recorder.window_length(), 3);
    }
}
