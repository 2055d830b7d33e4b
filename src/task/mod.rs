//! Background tasks and the scheduler that drives them.

pub mod scheduler;

use async_trait::async_trait;

pub use scheduler::Scheduler;

/// A unit of periodic work.
#[async_trait]
pub trait Task: Send + Sync {
    fn name(&self) -> &str;

    /// Runs one iteration. Errors are logged by the scheduler and never stop the loop.
    async fn run(&self) -> anyhow::Result<()>;
}
