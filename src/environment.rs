//! Process-wide timing environment and per-thread trees
//!
//! An [`Environment`] owns the shared output buffer and a registry mapping
//! every thread that recorded something to that thread's [`Tree`]. Trees
//! themselves are owned by the threads: the first mutation on a thread
//! creates a thread-local entry holding the tree, and the registry only keeps
//! a weak link to it.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │ Environment (Arc<Shared>)                                    │
//! │   Mutex<Output> ─┬─ JsonWriter (shared output buffer)        │
//! │                  └─ registry: ThreadId → Weak<Mutex<Tree>>   │
//! └──────────────────────────────────────────────────────────────┘
//!          ▲ weak                              ▲ weak
//! ┌────────┴──────────┐              ┌─────────┴─────────┐
//! │ thread A (TLS)    │              │ thread B (TLS)    │
//! │ LocalEnv → Tree   │              │ LocalEnv → Tree   │
//! └───────────────────┘              └───────────────────┘
//! ```
//!
//! Locking: the output mutex guards the buffer, the registry and every read
//! of a foreign tree. Each tree additionally sits behind its own mutex, which
//! its owning thread takes (uncontended) for every mutation, so a dump never
//! observes a tree in the middle of an update. Lock order is always
//! output → tree.
//!
//! Thread exit: when a thread terminates its thread-local entry is dropped,
//! which serializes the tree into the shared buffer and removes the thread
//! from the registry. Thread-local entries only hold a weak link back to the
//! environment: entries of dropped environments are pruned on the next
//! mutation on that thread, and capture nothing at thread exit. A later [`Environment::flush_all`] therefore still
//! reports threads that are gone. The main thread's thread-locals are not
//! guaranteed to be destroyed at process exit, so the main thread should
//! flush explicitly.

use crate::config::Config;
use crate::json_writer::{dump_tree, JsonWriter, WriterError};
use crate::record::{CommentValue, Record};
use crate::tree::{NodeId, Tree, TreeError};
use std::borrow::Cow;
use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, Weak};
use std::thread::ThreadId;
use thiserror::Error;

/// Errors returned by environment operations
#[derive(Error, Debug)]
pub enum EnvError {
    #[error("recording is disabled for this environment")]
    Disabled,

    #[error("thread-local storage is unavailable (thread is shutting down)")]
    ThreadExiting,

    #[error("the calling thread is inspecting this environment's tree")]
    Reentrant,

    #[error(transparent)]
    Tree(#[from] TreeError),

    #[error(transparent)]
    Writer(#[from] WriterError),
}

type SharedTree = Arc<Mutex<Tree>>;

struct Registration {
    key: String,
    tree: Weak<Mutex<Tree>>,
}

/// State guarded by the environment lock
#[derive(Default)]
struct Output {
    writer: JsonWriter,
    registry: HashMap<ThreadId, Registration>,
}

impl Output {
    /// Append one thread's tree to the document, opening it if needed
    fn write_tree(&mut self, key: &str, tree: &Tree) -> Result<(), WriterError> {
        let result = Self::append(&mut self.writer, key, tree);
        if result.is_err() {
            self.writer.reset();
        }
        result
    }

    fn append(writer: &mut JsonWriter, key: &str, tree: &Tree) -> Result<(), WriterError> {
        if writer.depth() == 0 {
            writer.push_map_start()?;
        }
        dump_tree(writer, key, tree)
    }

    /// Close the document and hand it out, leaving the writer empty
    fn finish(&mut self) -> Result<String, WriterError> {
        if self.writer.depth() == 0 {
            self.writer.push_map_start()?;
        }
        if let Err(err) = self.writer.push_map_end() {
            self.writer.reset();
            return Err(err);
        }
        Ok(self.writer.take())
    }
}

struct Shared {
    config: Config,
    output: Mutex<Output>,
}

/// Per-thread, per-environment state, dropped at thread exit
struct LocalEnv {
    shared: Weak<Shared>,
    thread: ThreadId,
    tree: SharedTree,
}

impl LocalEnv {
    fn belongs_to(&self, shared: &Arc<Shared>) -> bool {
        std::ptr::eq(self.shared.as_ptr(), Arc::as_ptr(shared))
    }

    fn is_orphaned(&self) -> bool {
        self.shared.strong_count() == 0
    }
}

impl Drop for LocalEnv {
    fn drop(&mut self) {
        // Environment already gone: nobody can flush this tree any more
        let Some(shared) = self.shared.upgrade() else {
            return;
        };
        let mut output = lock(&shared.output);
        let Some(registration) = output.registry.remove(&self.thread) else {
            return;
        };
        let tree = lock(&self.tree);
        match output.write_tree(&registration.key, &tree) {
            Ok(()) => tracing::debug!(
                thread = %registration.key,
                nodes = tree.size(),
                "thread exited, tree captured"
            ),
            Err(err) => tracing::error!(
                thread = %registration.key,
                "failed to capture tree of exiting thread: {}",
                err
            ),
        }
    }
}

thread_local! {
    static LOCALS: RefCell<Vec<LocalEnv>> = const { RefCell::new(Vec::new()) };

    /// Environments whose tree the calling thread is currently inspecting
    static INSPECTING: RefCell<Vec<usize>> = const { RefCell::new(Vec::new()) };
}

/// Marks an environment as inspected by the calling thread until dropped
struct Inspecting(usize);

impl Inspecting {
    fn enter(shared: &Arc<Shared>) -> Self {
        let addr = Arc::as_ptr(shared) as usize;
        let _ = INSPECTING.try_with(|inspecting| inspecting.borrow_mut().push(addr));
        Inspecting(addr)
    }
}

impl Drop for Inspecting {
    fn drop(&mut self) {
        let _ = INSPECTING.try_with(|inspecting| {
            let mut inspecting = inspecting.borrow_mut();
            if let Some(pos) = inspecting.iter().rposition(|addr| *addr == self.0) {
                inspecting.remove(pos);
            }
        });
    }
}

/// Lock a mutex, recovering the data if another thread panicked with it held
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Handle to a timing environment
///
/// Cloning is cheap and every clone refers to the same registry and buffer.
///
/// # Example
/// ```
/// use benchtree::environment::Environment;
/// use benchtree::config::Config;
/// use benchtree::record::Record;
/// use std::time::Duration;
///
/// let env = Environment::new(Config::default());
/// env.record_subtree_open(Record::new("bunch")).unwrap();
/// env.record_leaf(Record::new("scope").with_elapsed(Duration::from_nanos(100))).unwrap();
/// env.record_subtree_close().unwrap();
///
/// let report = env.flush_to_string().unwrap();
/// assert!(report.contains(r#""name":"bunch","elapsed":"100ns""#));
/// ```
#[derive(Clone)]
pub struct Environment {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Environment")
            .field("config", &self.shared.config)
            .finish_non_exhaustive()
    }
}

static GLOBAL: OnceLock<Environment> = OnceLock::new();

impl Environment {
    /// Create an independent environment
    pub fn new(config: Config) -> Self {
        Environment {
            shared: Arc::new(Shared {
                config,
                output: Mutex::new(Output::default()),
            }),
        }
    }

    /// The process-wide environment, configured from `BENCHTREE_*` variables
    /// on first use
    pub fn global() -> &'static Environment {
        GLOBAL.get_or_init(|| Environment::new(Config::from_env()))
    }

    pub fn config(&self) -> &Config {
        &self.shared.config
    }

    pub fn is_enabled(&self) -> bool {
        self.shared.config.enabled
    }

    /// Whether the calling thread is inside [`Environment::with_current_tree`]
    /// for this environment
    fn is_inspecting(&self) -> bool {
        let addr = Arc::as_ptr(&self.shared) as usize;
        INSPECTING
            .try_with(|inspecting| inspecting.borrow().contains(&addr))
            .unwrap_or(false)
    }

    fn check_not_inspecting(&self) -> Result<(), EnvError> {
        if self.is_inspecting() {
            return Err(EnvError::Reentrant);
        }
        Ok(())
    }

    /// The calling thread's tree, created and registered on first use
    ///
    /// Entries left behind by dropped environments are pruned here.
    fn local_tree(&self) -> Result<SharedTree, EnvError> {
        if !self.is_enabled() {
            return Err(EnvError::Disabled);
        }
        self.check_not_inspecting()?;

        let (tree, created) = LOCALS
            .try_with(|locals| {
                let mut locals = locals.borrow_mut();
                locals.retain(|l| !l.is_orphaned());
                if let Some(local) = locals.iter().find(|l| l.belongs_to(&self.shared)) {
                    return (Arc::clone(&local.tree), false);
                }

                let tree = Arc::new(Mutex::new(Tree::with_chunk_capacity(
                    self.shared.config.chunk_capacity,
                )));
                locals.push(LocalEnv {
                    shared: Arc::downgrade(&self.shared),
                    thread: std::thread::current().id(),
                    tree: Arc::clone(&tree),
                });
                (tree, true)
            })
            .map_err(|_| EnvError::ThreadExiting)?;

        if created {
            self.register(&tree);
        }
        Ok(tree)
    }

    /// The calling thread's tree if it already exists
    fn existing_local_tree(&self) -> Option<SharedTree> {
        LOCALS
            .try_with(|locals| {
                locals
                    .borrow()
                    .iter()
                    .find(|l| l.belongs_to(&self.shared))
                    .map(|l| Arc::clone(&l.tree))
            })
            .ok()
            .flatten()
    }

    /// Insert the calling thread in the registry (no-op if already present)
    fn register(&self, tree: &SharedTree) {
        let thread = std::thread::current();
        let key = self.shared.config.thread_key(&thread);

        let inserted = {
            let mut output = lock(&self.shared.output);
            let before = output.registry.len();
            output
                .registry
                .entry(thread.id())
                .or_insert_with(|| Registration {
                    key: key.clone(),
                    tree: Arc::downgrade(tree),
                });
            output.registry.len() > before
        };

        if inserted {
            tracing::debug!(thread = %key, "registered thread tree");
        }
    }

    /// Add a completed leaf under the current subtree of the calling thread
    ///
    /// The leaf's elapsed time is added to every open ancestor.
    pub fn record_leaf(&self, record: Record) -> Result<NodeId, EnvError> {
        let shared = self.local_tree()?;
        let mut tree = lock(&shared);

        let elapsed = record.elapsed;
        let id = tree.add_leaf(record)?;
        let cursor = tree.cursor();
        tree.bubble(cursor, elapsed);
        Ok(id)
    }

    /// Open a nested subtree on the calling thread
    ///
    /// The new node accumulates the time of everything recorded below it
    /// until it is closed; its initial elapsed time (usually zero) is added
    /// to the open ancestors right away.
    pub fn record_subtree_open(&self, record: Record) -> Result<NodeId, EnvError> {
        let shared = self.local_tree()?;
        let mut tree = lock(&shared);

        let father = tree.cursor();
        let elapsed = record.elapsed;
        let id = tree.open_subtree(record)?;
        tree.bubble(father, elapsed);
        Ok(id)
    }

    /// Close the innermost open subtree of the calling thread
    ///
    /// Ancestors already received every descendant's time as it was
    /// recorded, so closing adds nothing to them.
    pub fn record_subtree_close(&self) -> Result<NodeId, EnvError> {
        let shared = self.local_tree()?;
        let closed = lock(&shared).close_subtree()?;
        Ok(closed)
    }

    /// Close `id`, which must be the innermost open subtree
    pub fn close_subtree_at(&self, id: NodeId) -> Result<(), EnvError> {
        let shared = self.local_tree()?;
        lock(&shared).close_subtree_at(id)?;
        Ok(())
    }

    /// Close `id` and every subtree still open inside it
    ///
    /// Recovery path for out-of-order closes. Returns the number of subtrees
    /// closed, or [`TreeError::NotOpen`] when `id` was already closed.
    pub fn unwind_subtree(&self, id: NodeId) -> Result<usize, EnvError> {
        let shared = self.local_tree()?;
        let closed = lock(&shared).unwind_to(id)?;
        Ok(closed)
    }

    /// Attach a comment to a node of the calling thread's tree
    pub fn annotate<K, V>(&self, id: NodeId, key: K, value: V) -> Result<(), EnvError>
    where
        K: Into<Cow<'static, str>>,
        V: CommentValue,
    {
        let shared = self.local_tree()?;
        let mut tree = lock(&shared);
        tree.record_mut(id)
            .ok_or(TreeError::UnknownNode(id))?
            .add_comment(key, value);
        Ok(())
    }

    /// Run `inspect` against the calling thread's tree, if it has one
    ///
    /// The tree lock is held while `inspect` runs. Inside it, the mutation
    /// entry points of the same environment ([`record_leaf`],
    /// [`record_subtree_open`], [`record_subtree_close`],
    /// [`close_subtree_at`], [`unwind_subtree`], [`annotate`]) and
    /// [`dump_one`], [`dump_current`], [`flush_all`] and [`flush_to_string`]
    /// fail with [`EnvError::Reentrant`], and a nested `with_current_tree`
    /// returns `None`. The guards in [`crate::recorder`] go through those
    /// entry points, so a guard created or dropped inside `inspect` records
    /// nothing. [`pending`], [`registered_threads`] and [`is_registered`]
    /// take the output lock and must not be called from `inspect` either.
    ///
    /// [`record_leaf`]: Environment::record_leaf
    /// [`record_subtree_open`]: Environment::record_subtree_open
    /// [`record_subtree_close`]: Environment::record_subtree_close
    /// [`close_subtree_at`]: Environment::close_subtree_at
    /// [`unwind_subtree`]: Environment::unwind_subtree
    /// [`annotate`]: Environment::annotate
    /// [`dump_one`]: Environment::dump_one
    /// [`dump_current`]: Environment::dump_current
    /// [`flush_all`]: Environment::flush_all
    /// [`flush_to_string`]: Environment::flush_to_string
    /// [`pending`]: Environment::pending
    /// [`registered_threads`]: Environment::registered_threads
    /// [`is_registered`]: Environment::is_registered
    pub fn with_current_tree<R>(&self, inspect: impl FnOnce(&Tree) -> R) -> Option<R> {
        if self.is_inspecting() {
            return None;
        }
        let shared = self.existing_local_tree()?;
        let _inspecting = Inspecting::enter(&self.shared);
        let tree = lock(&shared);
        Some(inspect(&tree))
    }

    /// Serialize the tree of `thread` into the shared buffer
    ///
    /// Returns `Ok(false)` without touching the buffer when the thread is
    /// not registered.
    pub fn dump_one(&self, thread: ThreadId) -> Result<bool, EnvError> {
        self.check_not_inspecting()?;
        let mut output = lock(&self.shared.output);
        let Some(registration) = output.registry.get(&thread) else {
            return Ok(false);
        };
        let Some(shared) = registration.tree.upgrade() else {
            return Ok(false);
        };
        let key = registration.key.clone();

        let tree = lock(&shared);
        output.write_tree(&key, &tree)?;
        Ok(true)
    }

    /// [`Environment::dump_one`] for the calling thread
    pub fn dump_current(&self) -> Result<bool, EnvError> {
        self.dump_one(std::thread::current().id())
    }

    /// Serialize every registered thread and hand the complete report to
    /// `sink`
    ///
    /// The report also contains the trees captured from threads that exited
    /// and any earlier [`Environment::dump_one`] output. The shared buffer is
    /// emptied before `sink` runs, so `sink` may itself record or flush.
    /// Registry entries are kept.
    pub fn flush_all<R>(&self, sink: impl FnOnce(&str) -> R) -> Result<R, EnvError> {
        self.check_not_inspecting()?;
        let document = {
            let mut output = lock(&self.shared.output);
            let live: Vec<(String, SharedTree)> = output
                .registry
                .values()
                .filter_map(|r| r.tree.upgrade().map(|tree| (r.key.clone(), tree)))
                .collect();

            for (key, shared) in &live {
                let tree = lock(shared);
                output.write_tree(key, &tree)?;
            }
            output.finish()?
        };

        tracing::trace!(bytes = document.len(), "flushed timing report");
        Ok(sink(&document))
    }

    /// [`Environment::flush_all`] returning the report as a string
    pub fn flush_to_string(&self) -> Result<String, EnvError> {
        self.flush_all(str::to_owned)
    }

    /// Current (unfinished) contents of the shared buffer
    pub fn pending(&self) -> String {
        lock(&self.shared.output).writer.as_str().to_owned()
    }

    /// Threads currently present in the registry
    pub fn registered_threads(&self) -> Vec<ThreadId> {
        lock(&self.shared.output).registry.keys().copied().collect()
    }

    pub fn is_registered(&self, thread: ThreadId) -> bool {
        lock(&self.shared.output).registry.contains_key(&thread)
    }
}
