//! MCP server with stdio transport
//!
//! Implements JSON-RPC 2.0 server that communicates over stdin/stdout.
//! Each request line is handled on its own task so a tool waiting on a
//! generation job does not hold up other calls; responses funnel through a
//! single writer so lines never interleave.

use super::prompts::{self, PromptName};
use super::protocol::{JsonRpcError, JsonRpcRequest, JsonRpcResponse, PROTOCOL_VERSION};
use super::tools::{ToolHandler, ToolName};
use crate::error::Result;
use crate::format;
use serde_json::Value;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Responses buffered for the writer before request tasks wait
const RESPONSE_QUEUE: usize = 64;

/// MCP server that handles JSON-RPC requests over stdio
pub struct McpServer {
    tool_handler: Arc<ToolHandler>,
}

impl McpServer {
    /// Create a new MCP server
    pub fn new(tool_handler: ToolHandler) -> Self {
        Self {
            tool_handler: Arc::new(tool_handler),
        }
    }

    /// Run the server on stdin/stdout until stdin closes
    pub async fn run(&self) -> Result<()> {
        info!("MCP server started, listening on stdin...");
        self.serve(tokio::io::stdin(), tokio::io::stdout()).await?;
        info!("MCP server shutting down");
        Ok(())
    }

    /// Serve newline-delimited JSON-RPC from `reader`, answering on `writer`.
    /// Returns once the reader hits EOF and every in-flight request has been
    /// answered.
    pub async fn serve<R, W>(&self, reader: R, writer: W) -> Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::channel::<String>(RESPONSE_QUEUE);
        let writer_task = tokio::spawn(write_responses(writer, rx));

        let mut lines = BufReader::new(reader).lines();
        loop {
            let line = match lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => {
                    debug!("Received EOF, shutting down");
                    break;
                }
                Err(e) => {
                    error!("Failed to read request: {}", e);
                    break;
                }
            };

            let line = line.trim().to_string();
            if line.is_empty() {
                continue;
            }
            debug!("Received request: {}", line);

            let handler = Arc::clone(&self.tool_handler);
            let tx = tx.clone();
            tokio::spawn(async move {
                if let Some(response) = process_request(&handler, &line).await {
                    let encoded = encode(&response);
                    if tx.send(encoded).await.is_err() {
                        warn!("Response dropped: writer closed");
                    }
                }
            });
        }

        drop(tx);
        match writer_task.await {
            Ok(result) => result,
            Err(e) => {
                error!("Response writer stopped abnormally: {}", e);
                Ok(())
            }
        }
    }
}

async fn write_responses<W>(mut writer: W, mut rx: mpsc::Receiver<String>) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(line) = rx.recv().await {
        debug!("Sending response: {}", line);
        writer.write_all(line.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
    }
    Ok(())
}

fn encode(response: &JsonRpcResponse) -> String {
    serde_json::to_string(response).unwrap_or_else(|e| {
        error!("Failed to serialize response: {}", e);
        let id = response
            .id
            .as_ref()
            .map(Value::to_string)
            .unwrap_or_else(|| "null".to_string());
        format!(
            r#"{{"jsonrpc":"2.0","error":{{"code":-32603,"message":"Serialization error"}},"id":{}}}"#,
            id
        )
    })
}

/// Process a single JSON-RPC line; notifications yield no response
async fn process_request(handler: &ToolHandler, line: &str) -> Option<JsonRpcResponse> {
    let request: JsonRpcRequest = match serde_json::from_str(line) {
        Ok(req) => req,
        Err(e) => {
            return Some(JsonRpcResponse::error(
                None,
                JsonRpcError::parse_error(format!("Invalid JSON: {}", e)),
            ));
        }
    };

    if !request.has_valid_version() {
        return Some(JsonRpcResponse::error(
            request.id,
            JsonRpcError::invalid_request("jsonrpc must be '2.0'"),
        ));
    }

    if request.is_notification() {
        debug!("Notification: {}", request.method);
        return None;
    }

    let id = request.id.clone();
    let outcome = match request.method.as_str() {
        "initialize" => Ok(handle_initialize()),
        "ping" => Ok(serde_json::json!({})),
        "tools/list" => Ok(serde_json::json!({ "tools": handler.list_tools() })),
        "tools/call" => handle_tools_call(handler, request.params).await,
        "prompts/list" => Ok(serde_json::json!({ "prompts": prompts::list_prompts() })),
        "prompts/get" => handle_prompts_get(request.params),
        _ => Err(JsonRpcError::method_not_found(&request.method)),
    };

    Some(JsonRpcResponse::new(id, outcome))
}

fn handle_initialize() -> Value {
    debug!("Handling initialize");

    serde_json::json!({
        "protocolVersion": PROTOCOL_VERSION,
        "serverInfo": {
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION")
        },
        "capabilities": {
            "tools": {},
            "prompts": {}
        }
    })
}

fn name_and_arguments(params: &Value) -> std::result::Result<(&str, Value), JsonRpcError> {
    let params = params
        .as_object()
        .ok_or_else(|| JsonRpcError::invalid_params("params must be an object"))?;

    let name = params
        .get("name")
        .and_then(Value::as_str)
        .ok_or_else(|| JsonRpcError::invalid_params("missing 'name' field"))?;

    let arguments = params
        .get("arguments")
        .cloned()
        .unwrap_or(Value::Object(serde_json::Map::new()));

    Ok((name, arguments))
}

/// Tool failures are reported inside the result with `isError` set, so the
/// calling model sees the error envelope
async fn handle_tools_call(
    handler: &ToolHandler,
    params: Value,
) -> std::result::Result<Value, JsonRpcError> {
    let (name, arguments) = name_and_arguments(&params)?;
    let tool: ToolName = name
        .parse()
        .map_err(|unknown| JsonRpcError::invalid_params(format!("Unknown tool: {}", unknown)))?;

    let (payload, is_error) = match handler.execute(tool, arguments).await {
        Ok(result) => (result, false),
        Err(e) => {
            if e.is_caller_error() {
                debug!("Tool {} rejected call: {}", tool, e);
            } else {
                warn!("Tool {} failed: {}", tool, e);
            }
            (format::format_error(&e), true)
        }
    };

    let text = serde_json::to_string_pretty(&payload).unwrap_or_else(|_| payload.to_string());
    Ok(serde_json::json!({
        "content": [
            {
                "type": "text",
                "text": text
            }
        ],
        "isError": is_error
    }))
}

fn handle_prompts_get(params: Value) -> std::result::Result<Value, JsonRpcError> {
    let (name, arguments) = name_and_arguments(&params)?;
    let prompt: PromptName = name
        .parse()
        .map_err(|unknown| JsonRpcError::invalid_params(format!("Unknown prompt: {}", unknown)))?;

    prompts::get_prompt(prompt, &arguments).map_err(|e| JsonRpcError::invalid_params(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_and_arguments_defaults() {
        let params = serde_json::json!({"name": "list_memories"});
        let (name, arguments) = name_and_arguments(&params).unwrap();
        assert_eq!(name, "list_memories");
        assert_eq!(arguments, serde_json::json!({}));

        let err = name_and_arguments(&serde_json::json!([1, 2])).unwrap_err();
        assert_eq!(err.code, -32602);
    }

    #[test]
    fn test_unknown_prompt_is_invalid_params() {
        let err = handle_prompts_get(serde_json::json!({"name": "nope"})).unwrap_err();
        assert_eq!(err.code, -32602);
        assert!(err.message.contains("nope"));
    }

    #[test]
    fn test_initialize_advertises_capabilities() {
        let result = handle_initialize();
        assert_eq!(result["protocolVersion"], PROTOCOL_VERSION);
        assert!(result["capabilities"]["tools"].is_object());
        assert!(result["capabilities"]["prompts"].is_object());
    }
}
