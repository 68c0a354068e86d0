//! One-shot delivery of a request's result.
//!
//! Every submitted request owns exactly one [`Completion`]. Settling consumes
//! it, so a second settlement cannot be expressed; dropping it unsettled
//! (a bug, or a teardown path that forgot it) settles with 502 so the caller
//! is never left waiting on a dead request.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::oneshot;

use crate::proxy::response::ProxyResponse;

/// Settle-once sender half of a request's result.
#[derive(Debug)]
pub struct Completion {
    tx: Option<oneshot::Sender<ProxyResponse>>,
}

impl Completion {
    /// Create a linked completion / future pair.
    pub fn channel() -> (Completion, ResponseFuture) {
        let (tx, rx) = oneshot::channel();
        (Completion { tx: Some(tx) }, ResponseFuture { rx })
    }

    /// Deliver `response`. Returns false if the caller already went away.
    pub fn settle(mut self, response: ProxyResponse) -> bool {
        match self.tx.take() {
            Some(tx) => tx.send(response).is_ok(),
            None => false,
        }
    }
}

impl Drop for Completion {
    fn drop(&mut self) {
        if let Some(tx) = self.tx.take() {
            tracing::warn!("Completion dropped unsettled, answering 502");
            let _ = tx.send(ProxyResponse::bad_gateway());
        }
    }
}

/// Receiving half: resolves to the response exactly once.
#[derive(Debug)]
pub struct ResponseFuture {
    rx: oneshot::Receiver<ProxyResponse>,
}

impl ResponseFuture {
    /// Take the response if it has already been settled.
    pub fn try_take(&mut self) -> Option<ProxyResponse> {
        self.rx.try_recv().ok()
    }
}

impl Future for ResponseFuture {
    type Output = ProxyResponse;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|result| result.unwrap_or_else(|_| ProxyResponse::bad_gateway()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    #[test]
    fn settles_once() {
        let (completion, mut future) = Completion::channel();
        assert!(future.try_take().is_none());

        assert!(completion.settle(ProxyResponse::service_unavailable()));
        let response = future.try_take().unwrap();
        assert_eq!(response.status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn dropping_unsettled_completion_answers_bad_gateway() {
        let (completion, mut future) = Completion::channel();
        drop(completion);
        assert_eq!(future.try_take().unwrap().status, StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn settle_reports_departed_caller() {
        let (completion, future) = Completion::channel();
        drop(future);
        assert!(!completion.settle(ProxyResponse::bad_gateway()));
    }

    #[tokio::test]
    async fn future_resolves_to_settled_response() {
        let (completion, future) = Completion::channel();
        tokio::spawn(async move {
            completion.settle(ProxyResponse::bad_gateway());
        });
        assert_eq!(future.await.status, StatusCode::BAD_GATEWAY);
    }
}
