//! # Session Machinery
//!
//! Everything bound to one primary connection: the FIFO event queue that
//! decouples socket receive from processing, the mutable session state,
//! and the dispatcher loop that consumes the queue one event at a time.
//!
//! ## Ordering Model:
//! Exactly one consumer task per session. Inbound events are dispatched in
//! strict arrival order; no ordering is guaranteed (or needed) across
//! sessions. The dispatcher task is the sole owner of [`SessionState`], so
//! session mutation needs no lock at all.

pub mod dispatcher;
pub mod queue;
pub mod state;

pub use dispatcher::run_dispatcher;
pub use queue::EventQueue;
