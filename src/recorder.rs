//! RAII guards used at call sites
//!
//! - [`Scope`] times the region between its creation and its drop and
//!   records it as a leaf.
//! - [`Task`] wraps a callable; every `run` is timed and the summed time is
//!   recorded as a single leaf when the task is dropped.
//! - [`Bunch`] opens a nested subtree for as long as it lives. Its elapsed
//!   time is the sum of everything recorded inside it.
//! - [`ScopedTimer`] adds its lifetime to a plain `Duration` accumulator.
//!
//! Guards are bound to the thread that created them (`!Send`), so open and
//! close always hit the same thread's tree. Errors cannot be propagated from
//! `Drop`; they are reported through `tracing`. Tree errors mean the guards
//! were misused (a [`Bunch`] dropped while a bunch opened after it is still
//! alive) and also panic in debug builds.

use crate::environment::{EnvError, Environment};
use crate::record::{CommentValue, Record};
use crate::tree::{NodeId, TreeError};
use std::borrow::Cow;
use std::marker::PhantomData;
use std::time::{Duration, Instant};

/// Marker making guards `!Send` and `!Sync`
type ThreadBound = PhantomData<*const ()>;

fn report_drop_error(guard: &str, name: &str, err: EnvError) {
    match err {
        EnvError::Disabled => {}
        EnvError::ThreadExiting => {
            tracing::debug!(guard, name, "dropped while the thread is exiting")
        }
        err @ EnvError::Tree(_) => {
            tracing::error!(guard, name, "failed to record: {}", err);
            // A second panic while unwinding would abort
            if cfg!(debug_assertions) && !std::thread::panicking() {
                panic!("{} {}: {}", guard, name, err);
            }
        }
        err => tracing::error!(guard, name, "failed to record: {}", err),
    }
}

/// Adds the time between creation and drop to an accumulator
///
/// # Example
/// ```
/// use benchtree::recorder::ScopedTimer;
/// use std::time::Duration;
///
/// let mut elapsed = Duration::ZERO;
/// {
///     let _timer = ScopedTimer::new(&mut elapsed);
///     std::hint::black_box((0..100).sum::<u32>());
/// }
/// assert!(elapsed > Duration::ZERO);
/// ```
#[must_use = "the timer measures until it is dropped"]
pub struct ScopedTimer<'a> {
    acc: &'a mut Duration,
    start: Instant,
}

impl<'a> ScopedTimer<'a> {
    pub fn new(acc: &'a mut Duration) -> Self {
        ScopedTimer {
            acc,
            start: Instant::now(),
        }
    }
}

impl Drop for ScopedTimer<'_> {
    fn drop(&mut self) {
        *self.acc = self.acc.saturating_add(self.start.elapsed());
    }
}

/// Times a lexical scope and records it as a leaf on drop
#[must_use = "dropping the scope immediately records ~0ns; bind it with `let _scope = ...`"]
pub struct Scope<'e> {
    env: &'e Environment,
    record: Option<Record>,
    start: Instant,
    _thread: ThreadBound,
}

impl Scope<'static> {
    /// Start timing into the global environment
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Scope::in_env(Environment::global(), name)
    }
}

impl<'e> Scope<'e> {
    /// Start timing into `env`
    pub fn in_env(env: &'e Environment, name: impl Into<Cow<'static, str>>) -> Self {
        let record = env.is_enabled().then(|| Record::new(name));
        // Taken last so that building the record is not measured
        let start = Instant::now();
        Scope {
            env,
            record,
            start,
            _thread: PhantomData,
        }
    }

    /// Annotate the scope; the time spent here is not measured
    pub fn add_comment<K, V>(&mut self, key: K, value: V)
    where
        K: Into<Cow<'static, str>>,
        V: CommentValue,
    {
        let Some(record) = self.record.as_mut() else {
            return;
        };
        record.elapsed = record.elapsed.saturating_add(self.start.elapsed());
        record.add_comment(key, value);
        self.start = Instant::now();
    }
}

impl Drop for Scope<'_> {
    fn drop(&mut self) {
        let now = Instant::now();
        if let Some(mut record) = self.record.take() {
            record.elapsed = record.elapsed.saturating_add(now.duration_since(self.start));
            let name = record.name.clone();
            if let Err(err) = self.env.record_leaf(record) {
                report_drop_error("scope", &name, err);
            }
        }
    }
}

/// A named callable whose invocations are timed
///
/// # Example
/// ```
/// use benchtree::recorder::Task;
/// use benchtree::environment::Environment;
/// use benchtree::config::Config;
///
/// fn fibo(n: u64) -> u64 { if n < 2 { n } else { fibo(n - 1) + fibo(n - 2) } }
///
/// let env = Environment::new(Config::default());
/// {
///     let mut task = Task::in_env(&env, "fibo", fibo);
///     task.add_comment("N", 20);
///     assert_eq!(task.run_with(20), 6765);
/// }
/// assert!(env.flush_to_string().unwrap().contains(r#""name":"fibo","N":"20""#));
/// ```
#[must_use = "a task records nothing until it is run"]
pub struct Task<'e, F> {
    env: &'e Environment,
    record: Option<Record>,
    task: F,
    _thread: ThreadBound,
}

impl<F> Task<'static, F> {
    /// Create a task recording into the global environment
    pub fn new(name: impl Into<Cow<'static, str>>, task: F) -> Self {
        Task::in_env(Environment::global(), name, task)
    }
}

impl<'e, F> Task<'e, F> {
    /// Create a task recording into `env`
    pub fn in_env(env: &'e Environment, name: impl Into<Cow<'static, str>>, task: F) -> Self {
        Task {
            env,
            record: env.is_enabled().then(|| Record::new(name)),
            task,
            _thread: PhantomData,
        }
    }

    /// Run the task without arguments
    pub fn run<R>(&mut self) -> R
    where
        F: FnMut() -> R,
    {
        match self.record.as_mut() {
            Some(record) => {
                let _timer = ScopedTimer::new(&mut record.elapsed);
                (self.task)()
            }
            None => (self.task)(),
        }
    }

    /// Run the task with `args` (use a tuple for several arguments)
    pub fn run_with<A, R>(&mut self, args: A) -> R
    where
        F: FnMut(A) -> R,
    {
        match self.record.as_mut() {
            Some(record) => {
                let _timer = ScopedTimer::new(&mut record.elapsed);
                (self.task)(args)
            }
            None => (self.task)(args),
        }
    }

    pub fn add_comment<K, V>(&mut self, key: K, value: V)
    where
        K: Into<Cow<'static, str>>,
        V: CommentValue,
    {
        if let Some(record) = self.record.as_mut() {
            record.add_comment(key, value);
        }
    }

    /// Time accumulated by the runs so far
    pub fn elapsed(&self) -> Duration {
        self.record
            .as_ref()
            .map(|r| r.elapsed)
            .unwrap_or_default()
    }
}

impl<F> Drop for Task<'_, F> {
    fn drop(&mut self) {
        if let Some(record) = self.record.take() {
            let name = record.name.clone();
            if let Err(err) = self.env.record_leaf(record) {
                report_drop_error("task", &name, err);
            }
        }
    }
}

/// Groups everything recorded during its lifetime under one subtree
///
/// # Example
/// ```
/// use benchtree::recorder::{Bunch, Scope};
/// use benchtree::environment::Environment;
/// use benchtree::config::Config;
///
/// let env = Environment::new(Config::default());
/// {
///     let mut bunch = Bunch::in_env(&env, "to_string");
///     bunch.add_comment("N", 3);
///     for i in 0..3 {
///         let _scope = Scope::in_env(&env, "push_back");
///         std::hint::black_box(i.to_string());
///     }
/// }
/// let report = env.flush_to_string().unwrap();
/// assert_eq!(report.matches("push_back").count(), 3);
/// ```
#[must_use = "the subtree is closed as soon as the bunch is dropped"]
pub struct Bunch<'e> {
    env: &'e Environment,
    node: Option<NodeId>,
    _thread: ThreadBound,
}

impl Bunch<'static> {
    /// Open a subtree in the global environment
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Bunch::in_env(Environment::global(), name)
    }
}

impl<'e> Bunch<'e> {
    /// Open a subtree in `env`
    pub fn in_env(env: &'e Environment, name: impl Into<Cow<'static, str>>) -> Self {
        let node = if env.is_enabled() {
            match env.record_subtree_open(Record::new(name)) {
                Ok(id) => Some(id),
                Err(err) => {
                    tracing::error!("failed to open bunch: {}", err);
                    None
                }
            }
        } else {
            None
        };
        Bunch {
            env,
            node,
            _thread: PhantomData,
        }
    }

    /// Annotate the subtree's record
    pub fn add_comment<K, V>(&mut self, key: K, value: V)
    where
        K: Into<Cow<'static, str>>,
        V: CommentValue,
    {
        if let Some(id) = self.node {
            if let Err(err) = self.env.annotate(id, key, value) {
                tracing::warn!("failed to annotate bunch: {}", err);
            }
        }
    }

    /// Tree node backing this bunch, if recording
    pub fn node(&self) -> Option<NodeId> {
        self.node
    }
}

impl Drop for Bunch<'_> {
    /// Closes the subtree. If bunches opened later are still open, they are
    /// closed together with this one; their own drop then finds nothing left
    /// to close.
    fn drop(&mut self) {
        let Some(id) = self.node.take() else {
            return;
        };
        let Err(err) = self.env.close_subtree_at(id) else {
            return;
        };
        let name = format!("{:?}", id);
        if !matches!(err, EnvError::Tree(_)) {
            report_drop_error("bunch", &name, err);
            return;
        }

        match self.env.unwind_subtree(id) {
            Ok(closed) => {
                tracing::warn!(bunch = %name, closed, "closed subtrees left open inside bunch");
                report_drop_error("bunch", &name, err);
            }
            Err(EnvError::Tree(TreeError::NotOpen(_))) => {
                tracing::warn!(bunch = %name, "subtree already closed by an enclosing bunch")
            }
            Err(unwind_err) => report_drop_error("bunch", &name, unwind_err),
        }
    }
}

/// Name of the enclosing function, as a `&'static str` path
#[doc(hidden)]
#[macro_export]
macro_rules! __function_path {
    () => {{
        fn __here() {}
        fn __type_name_of<T>(_: T) -> &'static str {
            ::std::any::type_name::<T>()
        }
        let name = __type_name_of(__here);
        let mut name = &name[..name.len() - "::__here".len()];
        while let Some(stripped) = name.strip_suffix("::{{closure}}") {
            name = stripped;
        }
        name
    }};
}

/// Time the rest of the enclosing block as a leaf of the global environment
///
/// ```
/// fn work() {
///     benchtree::bench_scope!("work");
///     std::hint::black_box(42);
/// }
/// work();
/// ```
#[macro_export]
macro_rules! bench_scope {
    ($env:expr, $name:expr) => {
        let _bench_scope = $crate::recorder::Scope::in_env($env, $name);
    };
    ($name:expr) => {
        let _bench_scope = $crate::recorder::Scope::new($name);
    };
}

/// Time the rest of the enclosing function, named after its path
///
/// ```
/// fn fibo(n: u64) -> u64 {
///     benchtree::bench_function!();
///     (1..=n).product()
/// }
/// assert_eq!(fibo(5), 120);
/// ```
#[macro_export]
macro_rules! bench_function {
    () => {
        let _bench_function = $crate::recorder::Scope::new($crate::__function_path!());
    };
    ($env:expr) => {
        let _bench_function =
            $crate::recorder::Scope::in_env($env, $crate::__function_path!());
    };
}

/// Evaluate a block, timing it as a leaf; evaluates to the block's value
///
/// ```
/// let out = benchtree::bench_snippet!("sum", { (1..=10).sum::<u32>() });
/// assert_eq!(out, 55);
/// ```
#[macro_export]
macro_rules! bench_snippet {
    ($env:expr, $name:expr, $body:block) => {{
        let _bench_snippet = $crate::recorder::Scope::in_env($env, $name);
        $body
    }};
    ($name:expr, $body:block) => {{
        let _bench_snippet = $crate::recorder::Scope::new($name);
        $body
    }};
}
