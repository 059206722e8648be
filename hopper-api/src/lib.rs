//! # Hopper API
//!
//! The vocabulary shared between the hopper scheduler and the code embedding
//! it: jobs, priorities, executor capabilities and runtime hooks.
//!
//! ## Core Components
//!
//! - **Job**: an intrusive header carried by every schedulable record
//! - **Priority**: ordered priority classes grouped into buckets
//! - **Executors**: capability traits for serial, task and global executors
//! - **Hooks**: callbacks for reference counting, priority overrides and
//!   ambient context
//!
//! ## Usage Example
//!
//! ```rust
//! use hopper_api::job::ClosureJob;
//! use hopper_api::priority::JobPriority;
//!
//! let job = ClosureJob::new(JobPriority::Default, || println!("hello"));
//! assert_eq!(job.priority(), JobPriority::Default);
//! job.run();
//! ```
//!
//! ## Module Organization
//!
//! - [`job`]: job header, vtable and owning references
//! - [`priority`]: priority classes
//! - [`executor`]: executor capability traits
//! - [`hooks`]: runtime callbacks
//! - [`errors`]: error types
//! - [`types`]: identifiers and actor states

pub mod errors;
pub mod executor;
pub mod hooks;
pub mod job;
pub mod priority;
pub mod types;

pub use errors::{RuntimeViolation, TaskError};
pub use executor::{GlobalExecutor, IsolationDecision, SerialExecutor, TaskExecutor};
pub use hooks::{NoopHooks, RuntimeHooks};
pub use job::{ClosureJob, Job, JobKind, JobRef, JobVtable};
pub use priority::{JobPriority, BUCKET_COUNT};
pub use types::{ActorId, ActorState, DrainerId, TaskId};
