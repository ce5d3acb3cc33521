/// Upstream operation adapters
///
/// # Adapter Types
///
/// - **Http**: POSTs to the configured upstream URL
/// - **Mock**: Scripted replies for tests and demos
///
/// # Example
///
/// ```no_run
/// use docgate_pipeline::adapters::{ExternalOperation, HttpOperation, OperationRequest};
/// use std::time::Duration;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let op = HttpOperation::new("qr-masking", "http://qr-masking:8000/mask", Duration::from_secs(30))?;
///
/// let mut body = serde_json::Map::new();
/// body.insert("req_id".to_string(), "r-1".into());
/// body.insert("base64_str".to_string(), "aGVsbG8gd29ybGQ=".into());
///
/// let result = op.invoke(OperationRequest::new("r-1", body)).await?;
/// println!("success = {}", result.success);
/// # Ok(())
/// # }
/// ```

pub mod adapter_trait;
pub mod http;
pub mod mock;

// Re-export main types
pub use adapter_trait::{ExternalOperation, OperationError, OperationRequest, UpstreamResult};
pub use http::HttpOperation;
pub use mock::{MockOperation, MockReply};
