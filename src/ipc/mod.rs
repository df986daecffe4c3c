//! # IPC Primitives
//!
//! The wait dispatcher and the primitive families built on it: events,
//! mutexes, semaphores, timers, pipes, shared sections, and priority message
//! queues. Waitable bodies share one dispatch-header contract; the engine in
//! [`dispatch`] owns all blocking and waking.

pub mod dispatch;
pub mod event;
pub mod mqueue;
pub mod mutex;
pub mod pipe;
pub mod section;
pub mod semaphore;
pub mod timer;

pub use dispatch::{DispatchHeader, WaitStatus, Waiter};
pub use event::Event;
pub use mqueue::MessageQueue;
pub use mutex::Mutex;
pub use pipe::Pipe;
pub use section::Section;
pub use semaphore::Semaphore;
pub use timer::Timer;
