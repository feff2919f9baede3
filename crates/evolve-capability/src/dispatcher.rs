//! The `MethodDispatcher` capability: the JSON-RPC bridge contract (§6.6 of
//! the design), represented here purely as request/response/notification
//! shapes. A native implementation may dispense with any concrete
//! transport entirely; a future polyglot binding implements against this
//! seam.

use async_trait::async_trait;
use evolve_error::Result;
use serde_json::Value;

/// An outbound JSON-RPC request.
#[derive(Debug, Clone)]
pub struct RpcRequest {
    /// The RPC method name (e.g. `"initialize"`, `"run"`).
    pub method: String,
    /// Method parameters, already filtered of `null`/absent optional
    /// fields by the caller.
    pub params: Value,
}

/// An inbound JSON-RPC response.
#[derive(Debug, Clone)]
pub struct RpcResponse {
    /// The result payload on success.
    pub result: Option<Value>,
    /// An error message on failure.
    pub error: Option<String>,
}

/// An inbound JSON-RPC notification (stdout/stderr/content/lifecycle
/// fan-out).
#[derive(Debug, Clone)]
pub struct RpcNotification {
    /// The notification's channel (`"stdout"`, `"stderr"`, `"content"`,
    /// `"lifecycle"`).
    pub channel: String,
    /// The notification payload.
    pub payload: Value,
}

/// Dispatches JSON-RPC method calls to a bridge process and demultiplexes
/// its notifications.
///
/// A conforming implementation runs a single reader task that maps
/// inbound responses to pending callers by request id, and fans out
/// notifications to registered channel listeners; this trait only
/// specifies the call surface, not that machinery.
#[async_trait]
pub trait MethodDispatcher: Send + Sync {
    /// Issue a request and await its matching response.
    async fn call(&self, request: RpcRequest) -> Result<RpcResponse>;

    /// Whether the underlying transport is still connected.
    fn is_connected(&self) -> bool;
}
