//! Seam onto the upstream Scheduler's command queue. `MasterServer` only
//! consumes `Command` rows already enqueued for it; what enqueues them (a
//! cron-style trigger, an operator action) is out of scope here and modeled
//! as an external trait, the same way `ProcessStore` and `CoordService` model
//! their own external systems.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use dagmaster_model::Command;

/// Pull-based source of `Command` rows ready to run. A real deployment backs
/// this with the same relational store `ProcessStore` wraps (a `SELECT ...
/// FOR UPDATE SKIP LOCKED`-style claim query); tests use the in-memory queue
/// below.
#[async_trait]
pub trait CommandSource: Send + Sync + std::fmt::Debug {
    /// Returns the next command ready to run, if any, without blocking.
    async fn poll_next(&self) -> Option<Command>;
}

/// Test/dev double: a FIFO queue seeded up front.
#[derive(Debug, Default)]
pub struct InMemoryCommandSource {
    queue: Mutex<VecDeque<Command>>,
}

impl InMemoryCommandSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, command: Command) {
        self.queue.lock().unwrap().push_back(command);
    }
}

#[async_trait]
impl CommandSource for InMemoryCommandSource {
    async fn poll_next(&self) -> Option<Command> {
        self.queue.lock().unwrap().pop_front()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dagmaster_model::CommandType;

    #[tokio::test]
    async fn drains_commands_in_fifo_order() {
        let source = InMemoryCommandSource::new();
        source.push(Command::new(1, CommandType::Start));
        source.push(Command::new(2, CommandType::Start));

        let first = source.poll_next().await.unwrap();
        assert_eq!(first.process_definition_id, 1);
        let second = source.poll_next().await.unwrap();
        assert_eq!(second.process_definition_id, 2);
        assert!(source.poll_next().await.is_none());
    }
}
