//! Worker layer that runs signing jobs.
//!
//! - **Dispatch**: [`WorkerPool`] pulls jobs from the shared queue and bounds
//!   how many run at once
//! - **Per-user ordering**: [`UserSerializer`] makes jobs of the same signer
//!   run one after another, in queue order
//!
//! # Execution Flow
//!
//! 1. The pool leases the next ready job from the queue
//! 2. The job is admitted to its signer's line in the serializer
//! 3. When its turn arrives it takes an execution permit
//! 4. The [`JobHandler`] runs in its own task; panics are contained
//! 5. The outcome is reported back to the queue, which applies the retry
//!    policy

pub mod pool;
pub mod serializer;

pub use pool::{JobHandler, WorkerPool};
pub use serializer::{Turn, TurnGuard, UserSerializer};
