//! Interactive console approver.
//!
//! Consumes the approval queue and asks the operator on the terminal. This
//! deliberately avoids any UI toolkit: prompts go to stderr, answers are
//! read line-by-line from stdin.

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::channel::ApprovalReceiver;

/// Line-oriented approver bound to the process's terminal.
pub struct ConsoleApprover {
    rx: ApprovalReceiver,
}

impl ConsoleApprover {
    pub fn new(rx: ApprovalReceiver) -> Self {
        Self { rx }
    }

    /// Serve approval requests until the queue closes or shutdown is
    /// signalled. Requests are answered strictly in arrival order.
    pub async fn run(mut self, shutdown: CancellationToken) {
        let mut stdin = BufReader::new(tokio::io::stdin()).lines();
        loop {
            let request = tokio::select! {
                _ = shutdown.cancelled() => break,
                request = self.rx.recv() => match request {
                    Some(request) => request,
                    None => break,
                },
            };

            eprintln!(
                "[?] approval required\n    upstream: {}\n    tool:     {}\n    args:     {}\nallow? [y/N]: ",
                request.upstream, request.tool, request.arguments
            );

            let allowed = tokio::select! {
                _ = shutdown.cancelled() => false,
                line = stdin.next_line() => match line {
                    Ok(Some(answer)) => {
                        let answer = answer.trim().to_ascii_lowercase();
                        answer == "y" || answer == "yes"
                    }
                    // EOF or a broken terminal denies.
                    _ => false,
                },
            };

            debug!(
                upstream = %request.upstream,
                tool = %request.tool,
                allowed,
                "approval decision"
            );
            // The caller may have timed out already; a failed send is fine.
            let _ = request.reply.send(allowed);
        }
    }
}
