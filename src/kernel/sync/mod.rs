//! Synchronization primitives, layered bottom-up: `Semaphore` and `Lock`
//! sit directly on interrupt disabling and the scheduler's thread
//! queues; the condition variables sit on those; `Communicator` and
//! `SynchList` sit on the conditions.

pub mod communicator;
pub mod condition;
pub mod lock;
pub mod semaphore;
pub mod synch_list;

pub use communicator::Communicator;
pub use condition::{Condition, InterruptsCondition, SemaphoresCondition};
pub use lock::Lock;
pub use semaphore::Semaphore;
pub use synch_list::SynchList;
