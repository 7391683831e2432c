//! Reconciliation: event queue, backoff, the pass itself and the loop driving it
//!
//! Exactly one pass runs at a time. Events arriving during a pass are
//! coalesced and folded into the workload unit before the next one.

mod backoff;
mod r#loop;
mod pass;
mod queue;
mod state;


pub use backoff::{Backoff, BackoffPolicy};
pub use pass::{Intent, PassResult, Reconciler, ReconcilerConfig};
pub use queue::{CoalescingQueue, EventKey, OperatorEvent, PushOutcome};
pub use r#loop::{LoopConfig, OperatorHandle, ReconcileLoop, ReconcileLoopBuilder};
pub use state::WorkloadUnit;
