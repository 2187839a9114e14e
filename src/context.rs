//! Explicit application context holding long-lived services.
//!
//! Daemons are started in registration order and stopped in reverse.
//! Utilities are passive shared values. Both are looked up by type.

use crate::error::{PipelineError, Result};
use std::any::{Any, TypeId};
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// Upcast helper so stored trait objects can be downcast by type
pub trait AsAny: Any {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// A background service with a start/stop lifecycle
pub trait Daemon: AsAny + Send {
    /// Name used in logs and errors
    fn name(&self) -> &str;

    fn start(&mut self) -> Result<()>;

    fn stop(&mut self) -> Result<()>;
}

/// The program body run inside an [`AppContext`]
pub trait Application {
    fn run(&mut self, ctx: &mut AppContext) -> Result<()>;

    /// Called after `run` returns, before daemons stop
    fn end(&mut self, _ctx: &mut AppContext) -> Result<()> {
        Ok(())
    }
}

#[derive(Default)]
pub struct AppContext {
    daemons: Vec<Box<dyn Daemon>>,
    daemon_index: HashMap<TypeId, usize>,
    utilities: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
    started: usize,
}

impl AppContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a daemon. A second daemon of the same type replaces the
    /// first in lookups but both keep their place in the start order.
    pub fn add_daemon<D: Daemon>(&mut self, daemon: D) {
        debug!(daemon = daemon.name(), "registering daemon");
        self.daemon_index.insert(TypeId::of::<D>(), self.daemons.len());
        self.daemons.push(Box::new(daemon));
    }

    /// Register a utility, replacing any earlier one of the same type
    pub fn add_utility<U: Any + Send + Sync>(&mut self, utility: U) {
        self.utilities.insert(TypeId::of::<U>(), Box::new(utility));
    }

    pub fn daemon<D: Daemon>(&self) -> Option<&D> {
        let index = *self.daemon_index.get(&TypeId::of::<D>())?;
        self.daemons[index].as_ref().as_any().downcast_ref::<D>()
    }

    pub fn daemon_mut<D: Daemon>(&mut self) -> Option<&mut D> {
        let index = *self.daemon_index.get(&TypeId::of::<D>())?;
        self.daemons[index].as_mut().as_any_mut().downcast_mut::<D>()
    }

    pub fn utility<U: Any + Send + Sync>(&self) -> Option<&U> {
        self.utilities.get(&TypeId::of::<U>())?.downcast_ref::<U>()
    }

    pub fn utility_mut<U: Any + Send + Sync>(&mut self) -> Option<&mut U> {
        self.utilities.get_mut(&TypeId::of::<U>())?.downcast_mut::<U>()
    }

    /// Start every daemon in registration order. On failure the daemons
    /// already started are stopped again in reverse.
    pub fn start_daemons(&mut self) -> Result<()> {
        while self.started < self.daemons.len() {
            let daemon = &mut self.daemons[self.started];
            if let Err(e) = daemon.start() {
                warn!(daemon = daemon.name(), "daemon failed to start: {}", e);
                let name = daemon.name().to_string();
                self.stop_daemons()?;
                return Err(PipelineError::Lifecycle {
                    name,
                    message: e.to_string(),
                });
            }
            info!(daemon = daemon.name(), "daemon started");
            self.started += 1;
        }
        Ok(())
    }

    /// Stop started daemons in reverse order. Every daemon is asked to stop;
    /// the first failure is returned.
    pub fn stop_daemons(&mut self) -> Result<()> {
        let mut first_error = None;
        while self.started > 0 {
            self.started -= 1;
            let daemon = &mut self.daemons[self.started];
            match daemon.stop() {
                Ok(()) => info!(daemon = daemon.name(), "daemon stopped"),
                Err(e) => {
                    warn!(daemon = daemon.name(), "daemon failed to stop: {}", e);
                    if first_error.is_none() {
                        first_error = Some(PipelineError::Lifecycle {
                            name: daemon.name().to_string(),
                            message: e.to_string(),
                        });
                    }
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Start daemons, run the application, stop daemons, then release
    /// everything held by the context
    pub fn run<A: Application>(mut self, app: &mut A) -> Result<()> {
        self.start_daemons()?;

        let outcome = app.run(&mut self).and_then(|()| app.end(&mut self));
        let stopped = self.stop_daemons();

        self.daemons.clear();
        self.daemon_index.clear();
        self.utilities.clear();

        outcome.and(stopped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    type Log = Arc<Mutex<Vec<String>>>;

    struct Recording {
        name: &'static str,
        log: Log,
        fail_start: bool,
    }

    impl Recording {
        fn new(name: &'static str, log: &Log) -> Self {
            Self {
                name,
                log: Arc::clone(log),
                fail_start: false,
            }
        }
    }

    impl Daemon for Recording {
        fn name(&self) -> &str {
            self.name
        }

        fn start(&mut self) -> Result<()> {
            if self.fail_start {
                return Err(PipelineError::ConfigError("refused".into()));
            }
            self.log.lock().push(format!("start {}", self.name));
            Ok(())
        }

        fn stop(&mut self) -> Result<()> {
            self.log.lock().push(format!("stop {}", self.name));
            Ok(())
        }
    }

    struct Other(Recording);

    impl Daemon for Other {
        fn name(&self) -> &str {
            self.0.name()
        }

        fn start(&mut self) -> Result<()> {
            self.0.start()
        }

        fn stop(&mut self) -> Result<()> {
            self.0.stop()
        }
    }

    struct App {
        log: Log,
    }

    impl Application for App {
        fn run(&mut self, ctx: &mut AppContext) -> Result<()> {
            let limit = ctx.utility::<usize>().copied().unwrap_or_default();
            self.log.lock().push(format!("run {}", limit));
            Ok(())
        }

        fn end(&mut self, _ctx: &mut AppContext) -> Result<()> {
            self.log.lock().push("end".into());
            Ok(())
        }
    }

    #[test]
    fn test_lifecycle_order() {
        let log: Log = Arc::default();
        let mut ctx = AppContext::new();
        ctx.add_daemon(Recording::new("a", &log));
        ctx.add_daemon(Other(Recording::new("b", &log)));
        ctx.add_utility(7usize);

        ctx.run(&mut App { log: Arc::clone(&log) }).unwrap();

        assert_eq!(
            *log.lock(),
            vec!["start a", "start b", "run 7", "end", "stop b", "stop a"]
        );
    }

    #[test]
    fn test_start_failure_unwinds() {
        let log: Log = Arc::default();
        let mut ctx = AppContext::new();
        ctx.add_daemon(Recording::new("a", &log));
        let mut failing = Recording::new("b", &log);
        failing.fail_start = true;
        ctx.add_daemon(Other(failing));

        let result = ctx.run(&mut App { log: Arc::clone(&log) });
        assert!(matches!(result, Err(PipelineError::Lifecycle { .. })));
        assert_eq!(*log.lock(), vec!["start a", "stop a"]);
    }

    #[test]
    fn test_typed_lookup() {
        let log: Log = Arc::default();
        let mut ctx = AppContext::new();
        ctx.add_daemon(Recording::new("a", &log));
        ctx.add_utility(String::from("shared"));

        assert_eq!(ctx.daemon::<Recording>().map(|d| d.name()), Some("a"));
        assert!(ctx.daemon::<Other>().is_none());
        assert_eq!(ctx.utility::<String>().map(String::as_str), Some("shared"));
        assert!(ctx.utility::<u64>().is_none());

        ctx.daemon_mut::<Recording>().unwrap().fail_start = true;
        assert!(ctx.daemon::<Recording>().unwrap().fail_start);
    }
}
