//! Outbound command queue.
//!
//! Any number of [`CommandSender`]s feed one [`CommandQueue`], which the
//! active connection drains without blocking. The queue outlives individual
//! connection attempts, so commands issued while disconnected are sent after
//! the next successful connect.

use crate::domain::models::OutboundCommand;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::warn;

/// Clonable producer side; safe to use from any thread.
#[derive(Debug, Clone)]
pub struct CommandSender {
    tx: mpsc::UnboundedSender<OutboundCommand>,
}

impl CommandSender {
    /// Queue a command. Returns `false` once the link has shut down.
    pub fn enqueue(&self, command: impl Into<OutboundCommand>) -> bool {
        let command = command.into();
        match self.tx.send(command) {
            Ok(()) => true,
            Err(mpsc::error::SendError(command)) => {
                warn!("Dropping command {:?}: link is shut down", command);
                false
            }
        }
    }
}

/// Consumer side, handed from one connection attempt to the next.
#[derive(Debug, Clone)]
pub struct CommandQueue {
    rx: Arc<Mutex<mpsc::UnboundedReceiver<OutboundCommand>>>,
}

impl CommandQueue {
    /// Take the oldest queued command, if any.
    pub fn try_dequeue(&self) -> Option<OutboundCommand> {
        let mut rx = self.rx.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        rx.try_recv().ok()
    }
}

pub fn command_channel() -> (CommandSender, CommandQueue) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        CommandSender { tx },
        CommandQueue {
            rx: Arc::new(Mutex::new(rx)),
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::bluetooth::protocol::DeviceCommand;

    #[test]
    fn test_fifo_order() {
        let (sender, queue) = command_channel();
        assert!(queue.try_dequeue().is_none());

        sender.enqueue("A");
        sender.clone().enqueue("B");
        sender.enqueue(DeviceCommand::ResetGust);

        assert_eq!(queue.try_dequeue(), Some(OutboundCommand::from("A")));
        assert_eq!(queue.try_dequeue(), Some(OutboundCommand::from("B")));
        assert_eq!(queue.try_dequeue(), Some(OutboundCommand::from("@R@")));
        assert!(queue.try_dequeue().is_none());
    }

    #[test]
    fn test_enqueue_from_other_threads() {
        let (sender, queue) = command_channel();
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let sender = sender.clone();
                std::thread::spawn(move || {
                    for _ in 0..10 {
                        sender.enqueue(DeviceCommand::ToggleLights);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let mut count = 0;
        while queue.try_dequeue().is_some() {
            count += 1;
        }
        assert_eq!(count, 40);
    }

    #[test]
    fn test_enqueue_after_shutdown() {
        let (sender, queue) = command_channel();
        drop(queue);
        assert!(!sender.enqueue("A"));
    }
}
