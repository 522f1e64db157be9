//! The approval queue and the interceptor implementations.

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use gatehouse_types::traits::ApprovalInterceptor;

/// A pending approval: one tool call waiting for a yes/no decision.
///
/// The consumer must send on `reply` exactly once. If the waiting caller has
/// already gone away (deadline fired, connection dropped), the send fails
/// and the decision is discarded.
#[derive(Debug)]
pub struct ApprovalRequest {
    pub upstream: String,
    pub tool: String,
    /// The call's argument object, serialized to JSON text.
    pub arguments: String,
    pub reply: oneshot::Sender<bool>,
}

/// Consumer end of the approval queue. Requests arrive in enqueue order.
pub type ApprovalReceiver = mpsc::UnboundedReceiver<ApprovalRequest>;

/// Create the approval channel: the queue-backed interceptor for the
/// dispatch path and the receiver for the consumer.
pub fn approval_channel() -> (QueueInterceptor, ApprovalReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (QueueInterceptor { tx }, rx)
}

/// Interceptor that parks each call on the approval queue and awaits the
/// consumer's decision. Blocks indefinitely while a consumer exists; a
/// vanished consumer denies.
#[derive(Clone)]
pub struct QueueInterceptor {
    tx: mpsc::UnboundedSender<ApprovalRequest>,
}

#[async_trait]
impl ApprovalInterceptor for QueueInterceptor {
    async fn approve(&self, upstream: &str, tool: &str, arguments: &str) -> bool {
        let (reply, decision) = oneshot::channel();
        let request = ApprovalRequest {
            upstream: upstream.to_string(),
            tool: tool.to_string(),
            arguments: arguments.to_string(),
            reply,
        };
        if self.tx.send(request).is_err() {
            warn!(upstream, tool, "approval consumer is gone, denying call");
            return false;
        }
        debug!(upstream, tool, "awaiting approval decision");
        // A dropped reply sender means the consumer died mid-decision.
        decision.await.unwrap_or(false)
    }
}

/// Permissive interceptor: approves everything. Used by the headless and
/// stdio modes.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

#[async_trait]
impl ApprovalInterceptor for AllowAll {
    async fn approve(&self, _upstream: &str, _tool: &str, _arguments: &str) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn consumer_decision_reaches_caller() {
        let (interceptor, mut rx) = approval_channel();

        let caller = tokio::spawn(async move {
            interceptor.approve("files", "delete", "{\"path\":\"/tmp/x\"}").await
        });

        let request = rx.recv().await.unwrap();
        assert_eq!(request.upstream, "files");
        assert_eq!(request.tool, "delete");
        request.reply.send(true).unwrap();

        assert!(caller.await.unwrap());
    }

    #[tokio::test]
    async fn deny_reaches_caller() {
        let (interceptor, mut rx) = approval_channel();
        let caller = tokio::spawn(async move { interceptor.approve("files", "delete", "{}").await });
        rx.recv().await.unwrap().reply.send(false).unwrap();
        assert!(!caller.await.unwrap());
    }

    #[tokio::test]
    async fn requests_arrive_in_enqueue_order() {
        let (interceptor, mut rx) = approval_channel();
        let first = interceptor.clone();
        let second = interceptor.clone();

        let a = tokio::spawn(async move { first.approve("u", "first", "{}").await });
        // Let the first enqueue land before the second.
        tokio::task::yield_now().await;
        let b = tokio::spawn(async move { second.approve("u", "second", "{}").await });

        let one = rx.recv().await.unwrap();
        assert_eq!(one.tool, "first");
        one.reply.send(true).unwrap();
        let two = rx.recv().await.unwrap();
        assert_eq!(two.tool, "second");
        two.reply.send(false).unwrap();

        assert!(a.await.unwrap());
        assert!(!b.await.unwrap());
    }

    #[tokio::test]
    async fn dropped_receiver_denies() {
        let (interceptor, rx) = approval_channel();
        drop(rx);
        assert!(!interceptor.approve("u", "t", "{}").await);
    }

    #[tokio::test]
    async fn dropped_reply_denies() {
        let (interceptor, mut rx) = approval_channel();
        let caller = tokio::spawn(async move { interceptor.approve("u", "t", "{}").await });
        let request = rx.recv().await.unwrap();
        drop(request.reply);
        assert!(!caller.await.unwrap());
    }

    #[tokio::test]
    async fn abandoned_caller_drops_reply_silently() {
        let (interceptor, mut rx) = approval_channel();
        let caller =
            tokio::spawn(async move { interceptor.approve("u", "t", "{}").await });
        let request = rx.recv().await.unwrap();
        // Caller gives up before the consumer answers.
        caller.abort();
        let _ = caller.await;
        // The late reply is discarded without panicking.
        let _ = request.reply.send(true);
    }

    #[tokio::test]
    async fn allow_all_approves() {
        assert!(AllowAll.approve("u", "t", "{}").await);
    }
}
