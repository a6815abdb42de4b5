//! Single-threaded actor harness over `tokio::sync::mpsc` (§5, §9).
//!
//! The teacher keeps long-lived shared state behind
//! `once_cell::sync::Lazy<Mutex<_>>` globals (`crypto/replay_cache.rs`'s
//! `REPLAY_CACHE`, `crypto/encryption.rs`'s `PENDING_RATCHETS`). Spec.md
//! §9 explicitly forbids that pattern here: every long-lived piece of
//! state is owned by exactly one task and reached only through a
//! channel, never a lazily-initialized global mutex. This module is
//! that replacement primitive: implement [`Actor`] for your state,
//! [`spawn`] it onto a dedicated task, and talk to it through the
//! returned [`ActorHandle`].

use tokio::sync::{mpsc, oneshot};

/// One unit of work an actor can receive. `Response` carries whatever
/// the caller needs back; handlers that have nothing to return use
/// `()`.
pub trait Actor: Send + 'static {
    type Message: Send + 'static;
    type Response: Send + 'static;

    fn handle(&mut self, msg: Self::Message) -> Self::Response;
}

struct Envelope<M, R> {
    message: M,
    reply: oneshot::Sender<R>,
}

/// A channel-backed reference to a running actor. Cloning shares the
/// same underlying task; the task exits once every handle is dropped.
pub struct ActorHandle<A: Actor> {
    tx: mpsc::Sender<Envelope<A::Message, A::Response>>,
}

impl<A: Actor> Clone for ActorHandle<A> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ActorError {
    #[error("actor task has shut down")]
    Closed,
}

impl<A: Actor> ActorHandle<A> {
    /// Send `msg` and await the actor's reply. Errors only if the
    /// actor's task has already exited.
    pub async fn send(&self, msg: A::Message) -> Result<A::Response, ActorError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(Envelope {
                message: msg,
                reply: reply_tx,
            })
            .await
            .map_err(|_| ActorError::Closed)?;
        reply_rx.await.map_err(|_| ActorError::Closed)
    }
}

/// Mailbox capacity for [`spawn`]. Bounded rather than unbounded so a
/// stalled actor applies backpressure instead of growing memory
/// without limit.
const DEFAULT_MAILBOX_CAPACITY: usize = 256;

/// Move `actor` onto a dedicated tokio task and return a handle to it.
/// The task runs until every [`ActorHandle`] clone is dropped.
pub fn spawn<A: Actor>(actor: A) -> ActorHandle<A> {
    spawn_with_capacity(actor, DEFAULT_MAILBOX_CAPACITY)
}

pub fn spawn_with_capacity<A: Actor>(mut actor: A, capacity: usize) -> ActorHandle<A> {
    let (tx, mut rx) = mpsc::channel::<Envelope<A::Message, A::Response>>(capacity);
    tokio::spawn(async move {
        while let Some(envelope) = rx.recv().await {
            let response = actor.handle(envelope.message);
            let _ = envelope.reply.send(response);
        }
    });
    ActorHandle { tx }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Counter {
        value: i64,
    }

    enum CounterMsg {
        Add(i64),
        Get,
    }

    impl Actor for Counter {
        type Message = CounterMsg;
        type Response = i64;

        fn handle(&mut self, msg: Self::Message) -> Self::Response {
            match msg {
                CounterMsg::Add(n) => {
                    self.value += n;
                    self.value
                }
                CounterMsg::Get => self.value,
            }
        }
    }

    #[tokio::test]
    async fn messages_are_applied_in_order() {
        let handle = spawn(Counter { value: 0 });
        assert_eq!(handle.send(CounterMsg::Add(5)).await.unwrap(), 5);
        assert_eq!(handle.send(CounterMsg::Add(3)).await.unwrap(), 8);
        assert_eq!(handle.send(CounterMsg::Get).await.unwrap(), 8);
    }

    #[tokio::test]
    async fn cloned_handles_share_one_actor() {
        let handle = spawn(Counter { value: 0 });
        let other = handle.clone();
        handle.send(CounterMsg::Add(1)).await.unwrap();
        other.send(CounterMsg::Add(1)).await.unwrap();
        assert_eq!(handle.send(CounterMsg::Get).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn dropping_all_handles_ends_the_task() {
        let handle = spawn(Counter { value: 0 });
        drop(handle);
        // no assertion beyond "this test doesn't hang": the task's
        // recv loop exits once the mpsc::Sender side is gone.
    }
}
