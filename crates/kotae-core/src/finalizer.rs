#![forbid(unsafe_code)]

//! Dependency-ordered cleanup.
//!
//! A destroy cascade sometimes discovers objects whose teardown must happen
//! in an order the ownership tree does not capture. Instead of destroying
//! them on the spot, callers register a task per object with a
//! [`CleanupExecutor`] and let one [`execute`](CleanupExecutor::execute) pass
//! run the tasks in dependency order.
//!
//! `register(target, blocks, task)` means: `task` runs before the task of
//! every object in `blocks`.
//!
//! # Invariants
//!
//! 1. Every object is processed at most once per pass.
//! 2. The run order is a topological order of the declared edges.
//! 3. A failing task never blocks the objects it was declared before.
//! 4. After a pass the executor is empty and may be reused.
//!
//! # Failure Modes
//!
//! | Mode | Condition | Behavior |
//! |------|-----------|----------|
//! | Task error | task returns `Err` or panics | logged, counted in `failed`, dependents still run |
//! | Cycle | objects block each other | tasks skipped, reported in `unresolved` |
//! | Dangling edge | blocked by an object that never runs | same as cycle |
//! | Late registration | `register` during a pass | `RegisterDuringExecute` |
//!
//! # Complexity
//!
//! `execute` is O(V + E): the ready list is processed by index while it grows.
//!
//! # Example
//!
//! ```
//! use std::cell::RefCell;
//! use std::rc::Rc;
//! use kotae_core::{CleanupExecutor, Runtime};
//!
//! let rt = Runtime::default();
//! let order = Rc::new(RefCell::new(Vec::new()));
//! let cx = CleanupExecutor::<&str>::new(&rt);
//! for (target, blocks) in [("c", vec![]), ("b", vec!["c"]), ("a", vec!["b"])] {
//!     let order = Rc::clone(&order);
//!     cx.register(target, blocks, move || {
//!         order.borrow_mut().push(target);
//!         Ok(())
//!     })
//!     .unwrap();
//! }
//! let report = cx.execute().unwrap();
//! assert!(report.is_clean());
//! assert_eq!(*order.borrow(), ["a", "b", "c"]);
//! ```

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::error::Error;
use std::fmt;
use std::hash::Hash;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::rc::Rc;

use tracing::{debug, debug_span, error, warn};

use crate::array_set::ArraySet;
use crate::config::RuntimeConfig;
use crate::contract::ContractViolation;
use crate::logging::panic_message;
use crate::part::PartId;
use crate::scope::Scope;

/// Error type returned by cleanup tasks.
pub type TaskError = Box<dyn Error>;
/// Result type returned by cleanup tasks.
pub type TaskResult = Result<(), TaskError>;

type Task = Box<dyn FnOnce() -> TaskResult>;

struct CleanupMeta<K> {
    /// Number of registered objects that must run before this one.
    blocked_rc: usize,
    /// Objects that wait on this one.
    blocking: Vec<K>,
    task: Option<Task>,
}

impl<K> Default for CleanupMeta<K> {
    fn default() -> Self {
        Self {
            blocked_rc: 0,
            blocking: Vec::new(),
            task: None,
        }
    }
}

struct ExecutorState<K> {
    meta: HashMap<K, CleanupMeta<K>>,
    ready: ArraySet<K>,
    not_ready: ArraySet<K>,
}

impl<K: Eq + Hash + Clone> ExecutorState<K> {
    fn new() -> Self {
        Self {
            meta: HashMap::new(),
            ready: ArraySet::new(),
            not_ready: ArraySet::new(),
        }
    }

    fn meta_or_attach(&mut self, target: &K) -> &mut CleanupMeta<K> {
        if !self.meta.contains_key(target) {
            self.ready.add(target.clone());
        }
        self.meta.entry(target.clone()).or_default()
    }

    fn increment(&mut self, target: &K) {
        let meta = self.meta_or_attach(target);
        meta.blocked_rc += 1;
        if meta.blocked_rc == 1 {
            self.ready.delete(target);
            self.not_ready.add(target.clone());
        }
    }

    fn decrement(&mut self, target: &K) {
        let Some(meta) = self.meta.get_mut(target) else {
            return;
        };
        meta.blocked_rc = meta.blocked_rc.saturating_sub(1);
        if meta.blocked_rc == 0 {
            self.not_ready.delete(target);
            self.ready.add(target.clone());
        }
    }

    fn reset(&mut self) {
        self.meta.clear();
        self.ready.clear();
        self.not_ready.clear();
    }
}

/// Outcome of one [`CleanupExecutor::execute`] pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecuteReport<K> {
    /// Objects whose task completed, in run order.
    pub ran: Vec<K>,
    /// Objects whose task returned `Err` or panicked, in run order.
    pub failed: Vec<K>,
    /// Objects left blocked when the pass drained; their tasks were skipped.
    pub unresolved: Vec<K>,
}

impl<K> Default for ExecuteReport<K> {
    fn default() -> Self {
        Self {
            ran: Vec::new(),
            failed: Vec::new(),
            unresolved: Vec::new(),
        }
    }
}

impl<K> ExecuteReport<K> {
    /// No failures and no skipped objects.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty() && self.unresolved.is_empty()
    }
}

/// Runs registered cleanup tasks in dependency order.
pub struct CleanupExecutor<K = PartId> {
    config: Rc<RuntimeConfig>,
    state: RefCell<ExecutorState<K>>,
    executing: Cell<bool>,
}

impl<K> fmt::Debug for CleanupExecutor<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CleanupExecutor")
            .field("pending", &self.state.try_borrow().map(|s| s.meta.len()).ok())
            .field("executing", &self.executing.get())
            .finish()
    }
}

impl<K: Eq + Hash + Clone + fmt::Debug> CleanupExecutor<K> {
    /// Create an empty executor using `scope`'s configuration.
    #[must_use]
    pub fn new(scope: &(impl Scope + ?Sized)) -> Self {
        Self::with_config(Rc::clone(scope.config()))
    }

    #[must_use]
    pub fn with_config(config: Rc<RuntimeConfig>) -> Self {
        Self {
            config,
            state: RefCell::new(ExecutorState::new()),
            executing: Cell::new(false),
        }
    }

    /// Construct an executor, hand it to `cb`, then execute the pass.
    ///
    /// The pass runs on the way out even when `cb` panics.
    pub fn run<R>(scope: &(impl Scope + ?Sized), cb: impl FnOnce(&Self) -> R) -> R {
        let executor = Self::new(scope);
        let pass = ExecuteOnDrop {
            executor: &executor,
        };
        let result = cb(&executor);
        drop(pass);
        result
    }

    #[inline]
    #[must_use]
    pub fn is_executing(&self) -> bool {
        self.executing.get()
    }

    /// Objects currently known to the executor, with or without a task.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.state.borrow().meta.len()
    }

    /// Declare that `task` (for `target`) runs before the tasks of `blocks`.
    ///
    /// # Errors
    ///
    /// - [`ContractViolation::RegisterDuringExecute`] while a pass runs.
    /// - [`ContractViolation::DuplicateTask`] if `target` already has a task.
    pub fn register(
        &self,
        target: K,
        blocks: impl IntoIterator<Item = K>,
        task: impl FnOnce() -> TaskResult + 'static,
    ) -> Result<(), ContractViolation> {
        if self.executing.get() {
            return self.config.violation(ContractViolation::RegisterDuringExecute {
                target: format!("{target:?}"),
            });
        }

        let mut state = self.state.borrow_mut();
        let meta = state.meta_or_attach(&target);
        if meta.task.is_some() {
            drop(state);
            return self.config.violation(ContractViolation::DuplicateTask {
                target: format!("{target:?}"),
            });
        }
        meta.task = Some(Box::new(task));

        let blocks: Vec<K> = blocks.into_iter().collect();
        meta.blocking.extend(blocks.iter().cloned());
        for blocked in &blocks {
            state.increment(blocked);
        }
        debug!(object = ?target, blocks = blocks.len(), "cleanup task registered");
        Ok(())
    }

    /// Run every registered task in dependency order, then reset.
    ///
    /// # Errors
    ///
    /// [`ContractViolation::ExecuteReentered`] if called from inside a task.
    /// Task failures and cycles never produce an `Err`; they are logged and
    /// recorded in the returned report.
    pub fn execute(&self) -> Result<ExecuteReport<K>, ContractViolation> {
        if self.executing.replace(true) {
            return self.config.violation(ContractViolation::ExecuteReentered);
        }
        let _reset = ResetOnDrop { executor: self };

        let registered = self.state.borrow().meta.len();
        let span = debug_span!("finalizer_execute", registered);
        let _enter = span.enter();

        let mut report = ExecuteReport::default();
        let mut cursor = 0;
        loop {
            let (target, meta) = {
                let mut state = self.state.borrow_mut();
                let Some(target) = state.ready.get(cursor).cloned() else {
                    break;
                };
                cursor += 1;
                let meta = state.meta.remove(&target);
                (target, meta)
            };
            let Some(meta) = meta else {
                continue;
            };
            debug_assert_eq!(meta.blocked_rc, 0, "{target:?} ran while blocked");

            if let Some(task) = meta.task {
                match catch_unwind(AssertUnwindSafe(task)) {
                    Ok(Ok(())) => report.ran.push(target.clone()),
                    Ok(Err(err)) => {
                        error!(object = ?target, error = %err, "cleanup task failed");
                        report.failed.push(target.clone());
                    }
                    Err(payload) => {
                        error!(
                            object = ?target,
                            panic = panic_message(payload.as_ref()),
                            "cleanup task panicked"
                        );
                        report.failed.push(target.clone());
                    }
                }
            }

            let mut state = self.state.borrow_mut();
            for blocked in &meta.blocking {
                state.decrement(blocked);
            }
        }

        let unresolved = self.state.borrow_mut().not_ready.clear();
        if !unresolved.is_empty() && self.config.report_unresolved {
            for target in &unresolved {
                warn!(object = ?target, "cleanup task skipped: unresolved dependency");
            }
            warn!(count = unresolved.len(), "finalizer pass left objects unresolved");
        }
        report.unresolved = unresolved;

        debug!(
            ran = report.ran.len(),
            failed = report.failed.len(),
            unresolved = report.unresolved.len(),
            "finalizer pass complete"
        );
        Ok(report)
    }
}

/// Clears the executor and the executing flag when a pass ends.
struct ResetOnDrop<'a, K: Eq + Hash + Clone> {
    executor: &'a CleanupExecutor<K>,
}

impl<K: Eq + Hash + Clone> Drop for ResetOnDrop<'_, K> {
    fn drop(&mut self) {
        if let Ok(mut state) = self.executor.state.try_borrow_mut() {
            state.reset();
        }
        self.executor.executing.set(false);
    }
}

/// Executes the pass when [`CleanupExecutor::run`] leaves its scope.
struct ExecuteOnDrop<'a, K: Eq + Hash + Clone + fmt::Debug> {
    executor: &'a CleanupExecutor<K>,
}

impl<K: Eq + Hash + Clone + fmt::Debug> Drop for ExecuteOnDrop<'_, K> {
    fn drop(&mut self) {
        if let Err(err) = self.executor.execute() {
            debug!(error = %err, "scoped finalizer pass did not run");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scope::Runtime;

    type Log = Rc<RefCell<Vec<&'static str>>>;

    fn lenient() -> Runtime {
        Runtime::new(RuntimeConfig::new().with_strict_contracts(false))
    }

    fn recording(log: &Log, name: &'static str) -> impl FnOnce() -> TaskResult + 'static {
        let log = Rc::clone(log);
        move || {
            log.borrow_mut().push(name);
            Ok(())
        }
    }

    #[test]
    fn runs_in_topological_order_regardless_of_registration_order() {
        let rt = lenient();
        let log = Log::default();
        let cx = CleanupExecutor::<&str>::new(&rt);

        cx.register("c", [], recording(&log, "c")).unwrap();
        cx.register("b", ["c"], recording(&log, "b")).unwrap();
        cx.register("a", ["b"], recording(&log, "a")).unwrap();

        let report = cx.execute().unwrap();
        assert_eq!(*log.borrow(), vec!["a", "b", "c"]);
        assert_eq!(report.ran, vec!["a", "b", "c"]);
        assert!(report.is_clean());
    }

    #[test]
    fn cycle_completes_without_running_either_task() {
        let rt = lenient();
        let log = Log::default();
        let cx = CleanupExecutor::<&str>::new(&rt);

        cx.register("a", ["b"], recording(&log, "a")).unwrap();
        cx.register("b", ["a"], recording(&log, "b")).unwrap();

        let report = cx.execute().unwrap();
        assert!(log.borrow().is_empty());
        let mut unresolved = report.unresolved.clone();
        unresolved.sort_unstable();
        assert_eq!(unresolved, vec!["a", "b"]);
        assert_eq!(cx.pending_len(), 0);
    }

    #[test]
    fn failing_task_does_not_block_dependents() {
        let rt = lenient();
        let log = Log::default();
        let cx = CleanupExecutor::<&str>::new(&rt);

        cx.register("a", ["b"], || Err("disk on fire".into())).unwrap();
        cx.register("b", [], recording(&log, "b")).unwrap();
        cx.register("c", [], recording(&log, "c")).unwrap();

        let report = cx.execute().unwrap();
        let mut ran = log.borrow().clone();
        ran.sort_unstable();
        assert_eq!(ran, vec!["b", "c"]);
        assert_eq!(report.failed, vec!["a"]);
    }

    #[test]
    fn panicking_task_is_isolated() {
        let rt = lenient();
        let log = Log::default();
        let cx = CleanupExecutor::<&str>::new(&rt);

        cx.register("a", ["b"], || panic!("boom")).unwrap();
        cx.register("b", [], recording(&log, "b")).unwrap();

        let report = cx.execute().unwrap();
        assert_eq!(*log.borrow(), vec!["b"]);
        assert_eq!(report.failed, vec!["a"]);
        assert!(!cx.is_executing());
    }

    #[test]
    fn unregistered_blocked_object_is_still_processed() {
        let rt = lenient();
        let log = Log::default();
        let cx = CleanupExecutor::<&str>::new(&rt);

        cx.register("a", ["ghost"], recording(&log, "a")).unwrap();
        assert_eq!(cx.pending_len(), 2);

        let report = cx.execute().unwrap();
        assert_eq!(report.ran, vec!["a"]);
        assert!(report.unresolved.is_empty());
    }

    #[test]
    fn duplicate_task_is_a_violation() {
        let rt = lenient();
        let cx = CleanupExecutor::<&str>::new(&rt);
        cx.register("a", [], || Ok(())).unwrap();
        assert!(matches!(
            cx.register("a", [], || Ok(())),
            Err(ContractViolation::DuplicateTask { .. })
        ));
    }

    #[test]
    fn blocked_object_may_register_its_own_task_later() {
        let rt = lenient();
        let log = Log::default();
        let cx = CleanupExecutor::<&str>::new(&rt);

        cx.register("a", ["b"], recording(&log, "a")).unwrap();
        cx.register("b", [], recording(&log, "b")).unwrap();
        cx.execute().unwrap();
        assert_eq!(*log.borrow(), vec!["a", "b"]);
    }

    #[test]
    fn registration_and_reentry_rejected_mid_pass() {
        let rt = lenient();
        let cx = Rc::new(CleanupExecutor::<&str>::new(&rt));
        let seen = Rc::new(RefCell::new(Vec::new()));

        let inner = Rc::clone(&cx);
        let sink = Rc::clone(&seen);
        cx.register("a", [], move || {
            sink.borrow_mut().push(inner.register("late", [], || Ok(())).unwrap_err());
            sink.borrow_mut().push(inner.execute().unwrap_err());
            Ok(())
        })
        .unwrap();

        cx.execute().unwrap();
        let seen = seen.borrow();
        assert!(matches!(
            seen[0],
            ContractViolation::RegisterDuringExecute { .. }
        ));
        assert_eq!(seen[1], ContractViolation::ExecuteReentered);
    }

    #[test]
    fn executor_is_reusable_after_a_pass() {
        let rt = lenient();
        let log = Log::default();
        let cx = CleanupExecutor::<&str>::new(&rt);

        cx.register("a", [], recording(&log, "a")).unwrap();
        cx.execute().unwrap();
        cx.register("a", [], recording(&log, "a again")).unwrap();
        cx.execute().unwrap();

        assert_eq!(*log.borrow(), vec!["a", "a again"]);
        assert_eq!(cx.pending_len(), 0);
    }

    #[test]
    fn run_executes_even_when_callback_panics() {
        let rt = lenient();
        let log = Log::default();
        let task_log = Rc::clone(&log);

        let result = catch_unwind(AssertUnwindSafe(|| {
            let _: () = CleanupExecutor::<&str>::run(&rt, |cx| {
                cx.register("a", [], recording(&task_log, "a")).unwrap();
                panic!("callback failure");
            });
        }));

        assert!(result.is_err());
        assert_eq!(*log.borrow(), vec!["a"]);
    }

    #[test]
    fn run_returns_callback_value() {
        let rt = lenient();
        let value = CleanupExecutor::<PartId>::run(&rt, |cx| {
            assert!(!cx.is_executing());
            7
        });
        assert_eq!(value, 7);
    }
}
