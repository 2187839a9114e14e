use crate::frame::Frame;
use crate::pipeline::LoadCounter;
#[cfg(feature = "timing")]
use crate::statistics::Recorder;
use crossbeam::channel::{Receiver, Sender};
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
#[cfg(feature = "timing")]
use std::time::Instant;

/// A unit of per-frame work in the chain.
///
/// `update` may run concurrently with itself up to the concurrency the
/// module was registered with, so it takes `&self`; modules with mutable
/// state keep it behind their own synchronization.
pub trait Module<F>: Send + Sync + 'static {
    /// Called once after the module is placed in the chain, before any frame flows
    fn post_initialize(&mut self) {}

    /// Process a frame and hand it (or a replacement handle) back.
    /// Modules must never dispose the frame themselves.
    fn update(&self, frame: F) -> F;
}

/// A module that returns every frame unchanged
#[derive(Debug, Default)]
pub struct PassthroughModule;

impl<F: Frame> Module<F> for PassthroughModule {
    fn update(&self, frame: F) -> F {
        frame
    }
}

/// A module built from a closure
pub struct FnModule<F, U>
where
    U: Fn(F) -> F + Send + Sync + 'static,
{
    update: U,
    _frame: std::marker::PhantomData<fn(F) -> F>,
}

impl<F, U> FnModule<F, U>
where
    U: Fn(F) -> F + Send + Sync + 'static,
{
    pub fn new(update: U) -> Self {
        Self {
            update,
            _frame: std::marker::PhantomData,
        }
    }
}

impl<F, U> Module<F> for FnModule<F, U>
where
    F: Frame,
    U: Fn(F) -> F + Send + Sync + 'static,
{
    fn update(&self, frame: F) -> F {
        (self.update)(frame)
    }
}

/// Execution node for one stage.
///
/// Each worker thread of a stage owns a clone of the runner. Workers pull
/// from the stage's input queue, run the module, and either hand the frame
/// to the next stage or, for the last stage, retire it.
pub(crate) struct StageRunner<F: Frame> {
    name: Arc<str>,
    module: Arc<dyn Module<F>>,
    input: Receiver<F>,
    /// `None` for the last stage: frames are retired instead of forwarded
    output: Option<Sender<F>>,
    load: Arc<LoadCounter>,
    #[cfg(feature = "timing")]
    recorder: Arc<Recorder>,
}

impl<F: Frame> Clone for StageRunner<F> {
    fn clone(&self) -> Self {
        Self {
            name: Arc::clone(&self.name),
            module: Arc::clone(&self.module),
            input: self.input.clone(),
            output: self.output.clone(),
            load: Arc::clone(&self.load),
            #[cfg(feature = "timing")]
            recorder: Arc::clone(&self.recorder),
        }
    }
}

impl<F: Frame> StageRunner<F> {
    pub(crate) fn new(
        name: &str,
        module: Arc<dyn Module<F>>,
        input: Receiver<F>,
        output: Option<Sender<F>>,
        load: Arc<LoadCounter>,
        #[cfg_attr(not(feature = "timing"), allow(unused_variables))]
        recorder: &Arc<crate::statistics::Recorder>,
    ) -> Self {
        Self {
            name: Arc::from(name),
            module,
            input,
            output,
            load,
            #[cfg(feature = "timing")]
            recorder: Arc::clone(recorder),
        }
    }

    /// Start one worker thread for this stage
    pub(crate) fn spawn(self, worker: usize) -> io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name(format!("{}#{}", self.name, worker))
            .spawn(move || self.run())
    }

    /// Process frames until every upstream sender is gone and the queue is drained
    fn run(self) {
        for frame in self.input.iter() {
            let frame = match panic::catch_unwind(AssertUnwindSafe(|| self.invoke(frame))) {
                Ok(frame) => frame,
                Err(_) => {
                    tracing::error!(stage = %self.name, "module panicked, frame dropped");
                    self.load.release();
                    continue;
                }
            };

            match &self.output {
                Some(next) => {
                    if let Err(err) = next.send(frame) {
                        tracing::error!(stage = %self.name, "downstream stage is gone, retiring frame early");
                        self.retire(err.into_inner());
                    }
                }
                None => self.retire(frame),
            }
        }
        tracing::trace!(stage = %self.name, "worker finished");
    }

    /// Terminal step: the single point where frames are disposed
    fn retire(&self, frame: F) {
        F::dispose(frame);
        self.load.release();
    }

    #[cfg(feature = "timing")]
    fn invoke(&self, frame: F) -> F {
        if !self.recorder.is_recording() {
            return self.module.update(frame);
        }
        let start = Instant::now();
        let frame = self.module.update(frame);
        self.recorder.record_runtime(&self.name, start.elapsed());
        frame
    }

    #[cfg(not(feature = "timing"))]
    fn invoke(&self, frame: F) -> F {
        self.module.update(frame)
    }
}
