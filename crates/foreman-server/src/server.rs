//! MCP server over stdio: newline-delimited JSON-RPC 2.0 on stdin/stdout.
//! Stdout carries nothing but protocol messages; diagnostics go through
//! `tracing` (stderr and the supervisor log file).

use std::sync::Arc;

use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;

use crate::protocol::{
    self, INTERNAL_ERROR, INVALID_PARAMS, INVALID_REQUEST, JsonRpcRequest, METHOD_NOT_FOUND,
    PARSE_ERROR, jsonrpc_error, jsonrpc_result,
};
use crate::tools::{Tools, tool_schemas};

/// Read JSON-RPC messages from stdin until EOF or shutdown, answering each
/// on stdout.
pub async fn run(tools: &Arc<Tools>, shutdown: CancellationToken) -> anyhow::Result<()> {
    let stdin = tokio::io::stdin();
    let mut lines = BufReader::new(stdin).lines();

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                tracing::info!("shutdown requested; leaving the read loop");
                break;
            }
            line = lines.next_line() => {
                match line {
                    Ok(Some(line)) => {
                        let line = line.trim();
                        if line.is_empty() {
                            continue;
                        }
                        if let Some(response) = handle_line(tools, line).await {
                            write_message(&response);
                        }
                    }
                    Ok(None) => {
                        tracing::info!("stdin closed; client disconnected");
                        break;
                    }
                    Err(err) => {
                        tracing::error!(%err, "stdin read error");
                        break;
                    }
                }
            }
        }
    }

    Ok(())
}

async fn handle_line(tools: &Arc<Tools>, line: &str) -> Option<Value> {
    let raw: Value = match serde_json::from_str(line) {
        Ok(value) => value,
        Err(err) => {
            tracing::error!(%err, "invalid JSON on stdin");
            return Some(jsonrpc_error(
                &Value::Null,
                PARSE_ERROR,
                &format!("Parse error: {err}"),
            ));
        }
    };

    let request: JsonRpcRequest = match serde_json::from_value(raw) {
        Ok(request) => request,
        Err(err) => {
            return Some(jsonrpc_error(
                &Value::Null,
                INVALID_REQUEST,
                &format!("Invalid request: {err}"),
            ));
        }
    };

    handle_request(tools, request).await
}

async fn handle_request(tools: &Arc<Tools>, request: JsonRpcRequest) -> Option<Value> {
    let id = request.id.clone().unwrap_or(Value::Null);

    match request.method.as_str() {
        "initialize" => Some(jsonrpc_result(
            &id,
            json!({
                "protocolVersion": protocol::PROTOCOL_VERSION,
                "serverInfo": {
                    "name": protocol::SERVER_NAME,
                    "version": protocol::SERVER_VERSION,
                },
                "capabilities": {
                    "tools": {},
                },
            }),
        )),
        "notifications/initialized" => {
            tracing::info!("client completed initialization");
            None
        }
        "tools/list" => Some(jsonrpc_result(&id, json!({"tools": tool_schemas()}))),
        "tools/call" => {
            let params = request.params.unwrap_or(Value::Null);
            let tool_name = params
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let arguments = params
                .get("arguments")
                .cloned()
                .unwrap_or_else(|| json!({}));

            // Each call runs in its own task: a handler that violates an
            // internal invariant and panics takes out the call, never the
            // supervisor.
            let task = {
                let tools = Arc::clone(tools);
                let tool_name = tool_name.clone();
                tokio::spawn(async move { tools.call(&tool_name, arguments).await })
            };

            match task.await {
                Ok(Some(outcome)) => Some(jsonrpc_result(&id, outcome.into_value())),
                Ok(None) => Some(jsonrpc_error(
                    &id,
                    INVALID_PARAMS,
                    &format!("Unknown tool: {tool_name}"),
                )),
                Err(err) => {
                    tracing::error!(tool = %tool_name, %err, "tool handler crashed");
                    Some(jsonrpc_error(
                        &id,
                        INTERNAL_ERROR,
                        &format!("tool handler crashed: {err}"),
                    ))
                }
            }
        }
        method => {
            // Unknown notifications are silently dropped (JSON-RPC rule);
            // unknown requests get an error.
            if request.is_notification() {
                tracing::debug!(method, "ignoring unknown notification");
                None
            } else {
                Some(jsonrpc_error(
                    &id,
                    METHOD_NOT_FOUND,
                    &format!("Method not found: {method}"),
                ))
            }
        }
    }
}

/// One message per line on stdout, flushed immediately.
fn write_message(msg: &Value) {
    use std::io::Write;

    let serialized = serde_json::to_string(msg).unwrap_or_else(|err| {
        tracing::error!(%err, "failed to serialize response");
        r#"{"jsonrpc":"2.0","id":null,"error":{"code":-32603,"message":"serialization error"}}"#
            .to_string()
    });

    let stdout = std::io::stdout();
    let mut handle = stdout.lock();
    // Write errors mean the client hung up; nothing useful to do.
    let _ = writeln!(handle, "{serialized}");
    let _ = handle.flush();
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::process_manager::ProcessManager;

    fn tools() -> Arc<Tools> {
        Arc::new(Tools::new(ProcessManager::default()))
    }

    #[tokio::test]
    async fn initialize_reports_server_info_and_tools_capability() {
        let response = handle_line(&tools(), r#"{"jsonrpc":"2.0","id":1,"method":"initialize"}"#)
            .await
            .unwrap();
        assert_eq!(response["id"], 1);
        assert_eq!(
            response["result"]["protocolVersion"],
            protocol::PROTOCOL_VERSION
        );
        assert_eq!(response["result"]["serverInfo"]["name"], "foreman");
        assert!(response["result"]["capabilities"]["tools"].is_object());
    }

    #[tokio::test]
    async fn tools_list_contains_the_process_tools() {
        let response = handle_line(&tools(), r#"{"jsonrpc":"2.0","id":2,"method":"tools/list"}"#)
            .await
            .unwrap();
        let listed = response["result"]["tools"].as_array().unwrap();
        let names: Vec<&str> = listed
            .iter()
            .filter_map(|t| t["name"].as_str())
            .collect();
        assert!(names.contains(&"start_process"));
        assert!(names.contains(&"request_with_logs"));
        assert!(names.contains(&"kill_process"));
    }

    #[tokio::test]
    async fn parse_error_answers_with_null_id() {
        let response = handle_line(&tools(), "{not json").await.unwrap();
        assert!(response["id"].is_null());
        assert_eq!(response["error"]["code"], PARSE_ERROR);
    }

    #[tokio::test]
    async fn unknown_method_is_an_error_only_for_requests() {
        let response = handle_line(
            &tools(),
            r#"{"jsonrpc":"2.0","id":3,"method":"resources/list"}"#,
        )
        .await
        .unwrap();
        assert_eq!(response["error"]["code"], METHOD_NOT_FOUND);

        let none = handle_line(
            &tools(),
            r#"{"jsonrpc":"2.0","method":"notifications/whatever"}"#,
        )
        .await;
        assert!(none.is_none());
    }

    #[tokio::test]
    async fn initialized_notification_gets_no_response() {
        let none = handle_line(
            &tools(),
            r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#,
        )
        .await;
        assert!(none.is_none());
    }

    #[tokio::test]
    async fn unknown_tool_call_is_invalid_params() {
        let response = handle_line(
            &tools(),
            r#"{"jsonrpc":"2.0","id":4,"method":"tools/call","params":{"name":"bogus","arguments":{}}}"#,
        )
        .await
        .unwrap();
        assert_eq!(response["error"]["code"], INVALID_PARAMS);
    }

    #[tokio::test]
    async fn tool_error_is_a_result_with_is_error() {
        // Tool-level misuse must come back as a result, not a JSON-RPC error.
        let response = handle_line(
            &tools(),
            r#"{"jsonrpc":"2.0","id":5,"method":"tools/call","params":{"name":"kill_process","arguments":{}}}"#,
        )
        .await
        .unwrap();
        assert!(response.get("error").is_none());
        assert_eq!(response["result"]["isError"], true);
    }
}
