//! Model Context Protocol host over stdio.
//!
//! JSON-RPC 2.0, one message per line. Stdout carries only protocol responses;
//! logs go to stderr.

use crate::prompt::{ASSISTANT_PROMPT, PROMPT_DESCRIPTION, PROMPT_NAME};
use crate::provider::FlightProvider;
use crate::tools::{FilterFlightsTool, SearchFlightsTool};
use rig::tool::Tool;
use serde::Serialize;
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, info, warn};

const DEFAULT_PROTOCOL_VERSION: &str = "2024-11-05";

const PARSE_ERROR: i64 = -32700;
const INVALID_REQUEST: i64 = -32600;
const METHOD_NOT_FOUND: i64 = -32601;
const INVALID_PARAMS: i64 = -32602;
const INTERNAL_ERROR: i64 = -32603;

#[derive(Debug)]
struct RpcError {
    code: i64,
    message: String,
}

impl RpcError {
    fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Tool and prompt registry exposed to the protocol client
pub struct McpServer<P> {
    search: SearchFlightsTool<P>,
    filter: FilterFlightsTool,
}

impl<P: FlightProvider + 'static> McpServer<P> {
    pub fn new(search: SearchFlightsTool<P>, filter: FilterFlightsTool) -> Self {
        Self { search, filter }
    }

    /// Serves requests from stdin until it closes.
    pub async fn run(&self) -> anyhow::Result<()> {
        let stdin = tokio::io::stdin();
        let stdout = tokio::io::stdout();
        let mut reader = BufReader::new(stdin).lines();
        let mut out = tokio::io::BufWriter::new(stdout);
        info!("Flight assistant ready, listening on stdio");

        while let Some(line) = reader.next_line().await? {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if let Some(response) = self.dispatch(line).await {
                let bytes = serde_json::to_vec(&response)?;
                out.write_all(&bytes).await?;
                out.write_all(b"\n").await?;
                out.flush().await?;
            }
        }

        info!("Stdin closed, shutting down");
        Ok(())
    }

    /// Handles one incoming message. Notifications get no response.
    pub async fn dispatch(&self, line: &str) -> Option<Value> {
        let msg: Value = match serde_json::from_str(line) {
            Ok(v) => v,
            Err(e) => {
                warn!("Parse error: {}", e);
                return Some(error_response(
                    Value::Null,
                    RpcError::new(PARSE_ERROR, format!("Parse error: {}", e)),
                ));
            }
        };
        if msg.is_array() {
            warn!("Rejecting batch request");
            return Some(error_response(
                Value::Null,
                RpcError::new(INVALID_REQUEST, "Batch requests are not supported"),
            ));
        }
        if !msg.is_object() {
            return Some(error_response(
                Value::Null,
                RpcError::new(INVALID_REQUEST, "Request must be a JSON object"),
            ));
        }
        let id = msg.get("id")?.clone();
        let Some(method) = msg.get("method").and_then(|m| m.as_str()) else {
            return Some(error_response(
                id,
                RpcError::new(INVALID_REQUEST, "Request without a method"),
            ));
        };
        let params = msg.get("params").cloned().unwrap_or_else(|| json!({}));
        debug!("Handling {}", method);

        Some(match self.route(method, &params).await {
            Ok(result) => json!({ "jsonrpc": "2.0", "id": id, "result": result }),
            Err(e) => {
                warn!("Error in {}: {}", method, e.message);
                error_response(id, e)
            }
        })
    }

    async fn route(&self, method: &str, params: &Value) -> Result<Value, RpcError> {
        match method {
            "initialize" => Ok(json!({
                "protocolVersion": params
                    .get("protocolVersion")
                    .and_then(|v| v.as_str())
                    .unwrap_or(DEFAULT_PROTOCOL_VERSION),
                "capabilities": { "tools": {}, "prompts": {} },
                "serverInfo": {
                    "name": env!("CARGO_PKG_NAME"),
                    "version": env!("CARGO_PKG_VERSION"),
                },
            })),
            "ping" => Ok(json!({})),
            "tools/list" => Ok(self.list_tools().await),
            "tools/call" => self.call_tool(params).await,
            "prompts/list" => Ok(json!({
                "prompts": [{
                    "name": PROMPT_NAME,
                    "description": PROMPT_DESCRIPTION,
                    "arguments": [],
                }]
            })),
            "prompts/get" => get_prompt(params),
            other => Err(RpcError::new(
                METHOD_NOT_FOUND,
                format!("Unknown method: {}", other),
            )),
        }
    }

    async fn list_tools(&self) -> Value {
        let definitions = [
            self.search.definition(String::new()).await,
            self.filter.definition(String::new()).await,
        ];
        let tools: Vec<Value> = definitions
            .into_iter()
            .map(|d| {
                json!({
                    "name": d.name,
                    "description": d.description,
                    "inputSchema": d.parameters,
                })
            })
            .collect();
        json!({ "tools": tools })
    }

    async fn call_tool(&self, params: &Value) -> Result<Value, RpcError> {
        let name = params
            .get("name")
            .and_then(|n| n.as_str())
            .ok_or_else(|| RpcError::new(INVALID_PARAMS, "Missing tool name"))?;
        let arguments = params
            .get("arguments")
            .cloned()
            .unwrap_or_else(|| json!({}));
        info!("Calling tool {}", name);
        match name {
            n if n == SearchFlightsTool::<P>::NAME => invoke(&self.search, arguments).await,
            n if n == FilterFlightsTool::NAME => invoke(&self.filter, arguments).await,
            other => Err(RpcError::new(
                INVALID_PARAMS,
                format!("Unknown tool: {}", other),
            )),
        }
    }
}

/// Decodes arguments for `tool`, runs it and wraps the reply as text content.
async fn invoke<T: Tool>(tool: &T, arguments: Value) -> Result<Value, RpcError> {
    let args: T::Args = serde_json::from_value(arguments).map_err(|e| {
        RpcError::new(
            INVALID_PARAMS,
            format!("Invalid arguments for {}: {}", T::NAME, e),
        )
    })?;
    let output = tool
        .call(args)
        .await
        .map_err(|e| RpcError::new(INTERNAL_ERROR, e.to_string()))?;
    tool_content(&output)
}

fn tool_content<T: Serialize>(output: &T) -> Result<Value, RpcError> {
    let value =
        serde_json::to_value(output).map_err(|e| RpcError::new(INTERNAL_ERROR, e.to_string()))?;
    let is_error = value.get("status").and_then(|s| s.as_str()) == Some("error");
    Ok(json!({
        "content": [{ "type": "text", "text": value.to_string() }],
        "isError": is_error,
    }))
}

fn get_prompt(params: &Value) -> Result<Value, RpcError> {
    let name = params.get("name").and_then(|n| n.as_str()).unwrap_or("");
    if name != PROMPT_NAME {
        return Err(RpcError::new(
            INVALID_PARAMS,
            format!("Unknown prompt: {}", name),
        ));
    }
    Ok(json!({
        "description": PROMPT_DESCRIPTION,
        "messages": [{
            "role": "user",
            "content": { "type": "text", "text": ASSISTANT_PROMPT },
        }]
    }))
}

fn error_response(id: Value, error: RpcError) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": { "code": error.code, "message": error.message },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FlightSearchError;
    use crate::filter::FlightFilter;
    use crate::search::SearchClient;
    use crate::search::tests::{FakeProvider, provider_body};
    use crate::storage::FlightSearchStorage;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn server(
        response: Result<Value, fn() -> FlightSearchError>,
    ) -> (TempDir, McpServer<FakeProvider>) {
        let dir = TempDir::new().unwrap();
        let storage = Arc::new(FlightSearchStorage::new(dir.path()).unwrap());
        let client = SearchClient::new(
            FakeProvider { response },
            storage.clone(),
            "USD",
            chrono::Duration::hours(24),
        );
        let server = McpServer::new(
            SearchFlightsTool::new(Arc::new(client)),
            FilterFlightsTool::new(Arc::new(FlightFilter::new(storage))),
        );
        (dir, server)
    }

    async fn request(server: &McpServer<FakeProvider>, method: &str, params: Value) -> Value {
        let line = json!({ "jsonrpc": "2.0", "id": 1, "method": method, "params": params });
        server.dispatch(&line.to_string()).await.unwrap()
    }

    fn tool_text(response: &Value) -> Value {
        let text = response["result"]["content"][0]["text"].as_str().unwrap();
        serde_json::from_str(text).unwrap()
    }

    #[tokio::test]
    async fn test_initialize_and_list() {
        let (_dir, server) = server(Ok(provider_body()));
        let init = request(&server, "initialize", json!({ "protocolVersion": "2025-03-26" })).await;
        assert_eq!(init["result"]["protocolVersion"], "2025-03-26");
        assert!(init["result"]["capabilities"]["tools"].is_object());

        let tools = request(&server, "tools/list", json!({})).await;
        let names: Vec<&str> = tools["result"]["tools"]
            .as_array()
            .unwrap()
            .iter()
            .map(|t| t["name"].as_str().unwrap())
            .collect();
        assert_eq!(names, vec!["search_flights", "filter_flights"]);

        let prompts = request(&server, "prompts/list", json!({})).await;
        assert_eq!(prompts["result"]["prompts"][0]["name"], PROMPT_NAME);
        let prompt = request(&server, "prompts/get", json!({ "name": PROMPT_NAME })).await;
        assert_eq!(
            prompt["result"]["messages"][0]["content"]["text"],
            ASSISTANT_PROMPT
        );
    }

    #[tokio::test]
    async fn test_search_and_filter_calls() {
        let (_dir, server) = server(Ok(provider_body()));
        let search = request(
            &server,
            "tools/call",
            json!({
                "name": "search_flights",
                "arguments": { "origin": "AUS", "destination": "BCN", "date": "2025-03-14" }
            }),
        )
        .await;
        assert_eq!(search["result"]["isError"], false);
        let reply = tool_text(&search);
        let search_id = reply["search_id"].as_str().unwrap();

        let filter = request(
            &server,
            "tools/call",
            json!({
                "name": "filter_flights",
                "arguments": { "search_id": search_id, "max_price": 100 }
            }),
        )
        .await;
        let reply = tool_text(&filter);
        assert_eq!(reply["filtered_count"], 2);
    }

    #[tokio::test]
    async fn test_errors_stay_inside_the_protocol() {
        let (_dir, server) = server(Err(|| {
            FlightSearchError::HttpRequestFailed("provider request timed out".to_string())
        }));
        let failed = request(
            &server,
            "tools/call",
            json!({
                "name": "search_flights",
                "arguments": { "origin": "AUS", "destination": "BCN", "date": "2025-03-14" }
            }),
        )
        .await;
        assert_eq!(failed["result"]["isError"], true);
        assert_eq!(tool_text(&failed)["status"], "error");

        let bad_args = request(
            &server,
            "tools/call",
            json!({ "name": "search_flights", "arguments": { "origin": 7 } }),
        )
        .await;
        assert_eq!(bad_args["error"]["code"], INVALID_PARAMS);

        let unknown_tool = request(&server, "tools/call", json!({ "name": "book_flight" })).await;
        assert_eq!(unknown_tool["error"]["code"], INVALID_PARAMS);

        let unknown_method = request(&server, "resources/list", json!({})).await;
        assert_eq!(unknown_method["error"]["code"], METHOD_NOT_FOUND);

        let garbage = server.dispatch("{not json").await.unwrap();
        assert_eq!(garbage["error"]["code"], PARSE_ERROR);
    }

    #[tokio::test]
    async fn test_batch_and_non_object_messages_are_invalid_requests() {
        let (_dir, server) = server(Ok(provider_body()));
        let batch = json!([
            { "jsonrpc": "2.0", "id": 1, "method": "ping" },
            { "jsonrpc": "2.0", "id": 2, "method": "tools/list" }
        ]);
        let response = server.dispatch(&batch.to_string()).await.unwrap();
        assert_eq!(response["error"]["code"], INVALID_REQUEST);
        assert_eq!(response["id"], Value::Null);

        let empty_batch = server.dispatch("[]").await.unwrap();
        assert_eq!(empty_batch["error"]["code"], INVALID_REQUEST);

        let scalar = server.dispatch("42").await.unwrap();
        assert_eq!(scalar["error"]["code"], INVALID_REQUEST);
    }

    #[tokio::test]
    async fn test_notifications_get_no_response() {
        let (_dir, server) = server(Ok(provider_body()));
        let note = json!({ "jsonrpc": "2.0", "method": "notifications/initialized" });
        assert!(server.dispatch(&note.to_string()).await.is_none());
    }
}
