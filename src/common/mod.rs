// Shared infrastructure: clock and task-execution abstractions used by
// every layer above the hash table.

pub mod exec;
pub mod time;

pub use exec::{CallerRunsExecutor, DeferredExecutor, Executor, Scheduler, ThreadScheduler};
pub use time::{ManualTicker, SystemTicker, Ticker};
