/// Mock operation for tests and local demos
///
/// Replies from a script: queued replies are served first, then the fallback
/// reply forever. An optional delay simulates slow upstreams so timeout and
/// cancellation paths can be exercised.
///
/// # Example
///
/// ```
/// use docgate_pipeline::adapters::{ExternalOperation, MockOperation, MockReply, OperationRequest};
///
/// # async fn example() {
/// let op = MockOperation::new("face-detect", MockReply::success(serde_json::json!({"faces": 1})));
/// op.push(MockReply::failure("no face detected"));
///
/// let first = op.invoke(OperationRequest::new("r-1", Default::default())).await.unwrap();
/// assert!(!first.success);
/// let second = op.invoke(OperationRequest::new("r-2", Default::default())).await.unwrap();
/// assert!(second.success);
/// assert_eq!(op.call_count(), 2);
/// # }
/// ```

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::sleep;

use super::{ExternalOperation, OperationError, OperationRequest, UpstreamResult};

/// One scripted reply
#[derive(Debug, Clone)]
pub enum MockReply {
    /// Body returned as-is (parsed like a real upstream body)
    Body(Value),

    /// Transport failure
    TransportError(String),
}

impl MockReply {
    /// `{"success": true, <fields>}`
    pub fn success(fields: Value) -> Self {
        let mut body = json!({ "success": true });
        if let (Some(target), Some(extra)) = (body.as_object_mut(), fields.as_object()) {
            for (key, value) in extra {
                target.insert(key.clone(), value.clone());
            }
        }
        MockReply::Body(body)
    }

    /// `{"success": false, "error_message": <message>}`
    pub fn failure(message: &str) -> Self {
        MockReply::Body(json!({ "success": false, "error_message": message }))
    }
}

/// Scripted upstream
pub struct MockOperation {
    name: String,
    queued: Mutex<VecDeque<MockReply>>,
    fallback: MockReply,
    delay: Duration,
    calls: AtomicUsize,
    requests: Mutex<Vec<OperationRequest>>,
}

impl MockOperation {
    pub fn new(name: impl Into<String>, fallback: MockReply) -> Self {
        Self {
            name: name.into(),
            queued: Mutex::new(VecDeque::new()),
            fallback,
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Delays every reply
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Queues a reply ahead of the fallback
    pub fn push(&self, reply: MockReply) {
        if let Ok(mut queued) = self.queued.lock() {
            queued.push_back(reply);
        }
    }

    /// Number of invocations that reached the mock
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Requests received so far
    pub fn requests(&self) -> Vec<OperationRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    fn next_reply(&self) -> MockReply {
        self.queued
            .lock()
            .ok()
            .and_then(|mut queued| queued.pop_front())
            .unwrap_or_else(|| self.fallback.clone())
    }
}

#[async_trait]
impl ExternalOperation for MockOperation {
    fn name(&self) -> &str {
        &self.name
    }

    async fn invoke(&self, request: OperationRequest) -> Result<UpstreamResult, OperationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let req_id = request.req_id.clone();
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request);
        }

        if !self.delay.is_zero() {
            sleep(self.delay).await;
        }

        match self.next_reply() {
            MockReply::Body(mut body) => {
                if let Some(object) = body.as_object_mut() {
                    object.entry("req_id").or_insert_with(|| Value::String(req_id));
                }
                UpstreamResult::from_body(body)
            }
            MockReply::TransportError(message) => Err(OperationError::Transport(message)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fallback_reply() {
        let op = MockOperation::new("qr-masking", MockReply::success(json!({"masked": "xyz"})));

        let result = op.invoke(OperationRequest::new("r-9", Default::default())).await.unwrap();
        assert!(result.success);
        assert_eq!(result.raw["masked"], "xyz");
        assert_eq!(result.req_id.as_deref(), Some("r-9"));
    }

    #[tokio::test]
    async fn test_queued_replies_first() {
        let op = MockOperation::new("qr-masking", MockReply::success(json!({})));
        op.push(MockReply::TransportError("connection refused".to_string()));

        assert!(matches!(
            op.invoke(OperationRequest::new("r-1", Default::default())).await,
            Err(OperationError::Transport(_))
        ));
        assert!(op.invoke(OperationRequest::new("r-2", Default::default())).await.is_ok());
        assert_eq!(op.call_count(), 2);
        assert_eq!(op.requests().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delay() {
        let op = MockOperation::new("slow", MockReply::success(json!({}))).with_delay(Duration::from_secs(5));

        let started = tokio::time::Instant::now();
        op.invoke(OperationRequest::new("r-1", Default::default())).await.unwrap();
        assert!(started.elapsed() >= Duration::from_secs(5));
    }
}
