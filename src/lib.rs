//! benchtree - Hierarchical per-thread timing instrumentation
//!
//! This library records wall-clock timings of code regions into one timing
//! tree per thread, nests them with [`Bunch`] guards, and serializes every
//! thread's tree into a single JSON report on demand. Trees of threads that
//! exit are captured automatically.
//!
//! ```
//! use benchtree::{Bunch, Config, Environment, Scope};
//!
//! let env = Environment::new(Config::default());
//! {
//!     let mut bunch = Bunch::in_env(&env, "fill");
//!     bunch.add_comment("N", 2);
//!     for _ in 0..2 {
//!         let _scope = Scope::in_env(&env, "push");
//!     }
//! }
//! let report = env.flush_to_string().unwrap();
//! assert!(report.starts_with(r#"{"ThreadId("#));
//! ```

pub mod cli;
pub mod config;
pub mod environment;
pub mod json_writer;
pub mod pretty;
pub mod record;
pub mod recorder;
pub mod report;
pub mod stable_store;
pub mod tree;
pub mod workloads;

pub use config::Config;
pub use environment::{EnvError, Environment};
pub use record::Record;
pub use recorder::{Bunch, Scope, ScopedTimer, Task};
pub use report::Report;
pub use tree::{NodeId, Tree};
