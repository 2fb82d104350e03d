//! MCP server sessions.
//!
//! This module implements the MCP server lifecycle:
//!
//! 1. **Initialisation**: Capability negotiation and version agreement
//! 2. **Operation**: Handling tool calls, resources and prompts
//! 3. **Shutdown**: End of input or a shutdown signal
//!
//! Requests that reach the relay (`tools/call`, `resources/read`) run as
//! separate tasks and are answered as they finish, so one slow host call
//! does not hold up the rest of the session. Everything else is answered
//! inline.

use std::future::Future;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info, trace, warn};

use crate::catalog::{self, PromptRole};
use crate::endpoint::Bridge;
use crate::exchange::CommandName;
use crate::mcp::protocol::{
    parse_message, IncomingMessage, JsonRpcError, JsonRpcNotification, JsonRpcRequest,
    JsonRpcResponse, Reply, RequestId, MCP_PROTOCOL_VERSION, SERVER_NAME, SERVER_VERSION,
};
use crate::mcp::tools::{self, ToolCallParams};
use crate::mcp::transport::{self, LineReader, LineWriter};

const INSTRUCTIONS: &str = "This server connects to Autodesk Fusion 360 via a bridge add-in. \
                            Make sure Fusion 360 is running with the MCPserve add-in active.";

/// Server state in the MCP lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    /// Waiting for initialize request.
    AwaitingInit,
    /// Initialize received, waiting for initialized notification.
    Initialising,
    /// Ready for normal operation.
    Running,
    /// Shutdown in progress.
    ShuttingDown,
}

/// Client information received during initialisation.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientInfo {
    /// Client name.
    pub name: String,
    /// Client version.
    #[serde(default)]
    pub version: Option<String>,
}

/// Parameters for the initialize request.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    /// Protocol version requested by client.
    pub protocol_version: String,
    /// Client information.
    #[serde(default)]
    pub client_info: Option<ClientInfo>,
}

#[derive(Debug, Deserialize)]
struct ReadResourceParams {
    uri: String,
}

#[derive(Debug, Deserialize)]
struct GetPromptParams {
    name: String,
    #[serde(default)]
    arguments: Map<String, Value>,
}

#[derive(Debug, Serialize)]
struct PromptContent<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    text: &'a str,
}

/// One MCP session over a line transport.
pub struct McpServer<R, W> {
    state: ServerState,
    reader: LineReader<R>,
    writer: LineWriter<W>,
    bridge: Arc<Bridge>,
    in_flight: JoinSet<Reply>,
}

impl<R, W> McpServer<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    /// Creates a session reading from `reader` and replying on `writer`.
    pub fn new(reader: LineReader<R>, writer: LineWriter<W>, bridge: Arc<Bridge>) -> Self {
        Self {
            state: ServerState::AwaitingInit,
            reader,
            writer,
            bridge,
            in_flight: JoinSet::new(),
        }
    }

    /// Returns the current server state.
    #[must_use]
    pub const fn state(&self) -> ServerState {
        self.state
    }

    /// Serves the session until end of input or until `shutdown` resolves.
    ///
    /// At end of input, requests still in flight are answered before
    /// returning. On shutdown they are abandoned and their commands withdrawn.
    ///
    /// # Errors
    ///
    /// Returns an error if transport I/O fails.
    pub async fn run_until(&mut self, shutdown: impl Future<Output = ()>) -> std::io::Result<()> {
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                () = &mut shutdown => {
                    info!(pending = self.in_flight.len(), "Session shutting down");
                    self.state = ServerState::ShuttingDown;
                    self.in_flight.shutdown().await;
                    return Ok(());
                }

                Some(done) = self.in_flight.join_next(), if !self.in_flight.is_empty() => {
                    self.write_finished(done).await?;
                }

                line = self.reader.next_line() => {
                    let Some(line) = line? else {
                        break;
                    };
                    if let Some(reply) = self.handle_line(&line) {
                        self.writer.write_reply(&reply).await?;
                    }
                }
            }
        }

        debug!(pending = self.in_flight.len(), "Input closed, draining requests");
        self.state = ServerState::ShuttingDown;
        while let Some(done) = self.in_flight.join_next().await {
            self.write_finished(done).await?;
        }
        Ok(())
    }

    async fn write_finished(&mut self, done: Result<Reply, JoinError>) -> std::io::Result<()> {
        match done {
            Ok(reply) => self.writer.write_reply(&reply).await,
            Err(e) => {
                error!(error = %e, "Request task failed");
                Ok(())
            }
        }
    }

    /// Handles one input line. Returns the reply to write now, if any.
    fn handle_line(&mut self, line: &str) -> Option<Reply> {
        let message = parse_message(line);
        if let Ok(msg) = &message {
            trace!(method = msg.method(), "Message received");
        }
        match message {
            Ok(IncomingMessage::Request(req)) => self.handle_request(req),
            Ok(IncomingMessage::Notification(notif)) => {
                self.handle_notification(&notif);
                None
            }
            Err(error) => {
                debug!(code = error.error.code, "Rejected malformed message");
                Some(error.into())
            }
        }
    }

    fn handle_request(&mut self, req: JsonRpcRequest) -> Option<Reply> {
        debug!(id = %req.id, method = %req.method, "Request received");

        let reply = match req.method.as_str() {
            "initialize" => self.handle_initialize(&req),
            "ping" => Ok(JsonRpcResponse::success(req.id.clone(), json!({}))),
            "tools/list" => self.handle_tools_list(&req),
            "tools/call" => return self.spawn_tool_call(req),
            "resources/list" => self.handle_resources_list(&req),
            "resources/read" => return self.spawn_resource_read(req),
            "prompts/list" => self.handle_prompts_list(&req),
            "prompts/get" => self.handle_prompts_get(&req),
            _ => Err(JsonRpcError::method_not_found(req.id.clone(), &req.method)),
        };

        Some(match reply {
            Ok(response) => response.into(),
            Err(error) => error.into(),
        })
    }

    fn handle_notification(&mut self, notif: &JsonRpcNotification) {
        match notif.method.as_str() {
            "notifications/initialized" if self.state == ServerState::Initialising => {
                info!("Session initialised");
                self.state = ServerState::Running;
            }
            "notifications/cancelled" => {
                debug!(params = ?notif.params, "Client cancelled a request");
            }
            other => debug!(method = other, "Ignoring notification"),
        }
    }

    fn handle_initialize(&mut self, req: &JsonRpcRequest) -> Result<JsonRpcResponse, JsonRpcError> {
        if self.state != ServerState::AwaitingInit {
            return Err(JsonRpcError::invalid_request(
                Some(req.id.clone()),
                "Server already initialised",
            ));
        }

        let params: InitializeParams = parse_params(req, "initialize")?;
        if let Some(client) = &params.client_info {
            info!(
                client = %client.name,
                version = client.version.as_deref().unwrap_or("unknown"),
                requested = %params.protocol_version,
                "Client connected"
            );
        }

        self.state = ServerState::Initialising;

        Ok(JsonRpcResponse::success(
            req.id.clone(),
            json!({
                "protocolVersion": MCP_PROTOCOL_VERSION,
                "capabilities": {
                    "tools": {},
                    "resources": {},
                    "prompts": {}
                },
                "serverInfo": {
                    "name": SERVER_NAME,
                    "version": SERVER_VERSION
                },
                "instructions": INSTRUCTIONS,
            }),
        ))
    }

    fn handle_tools_list(&self, req: &JsonRpcRequest) -> Result<JsonRpcResponse, JsonRpcError> {
        self.require_running(&req.id)?;
        Ok(JsonRpcResponse::success(
            req.id.clone(),
            json!({ "tools": tools::definitions() }),
        ))
    }

    fn spawn_tool_call(&mut self, req: JsonRpcRequest) -> Option<Reply> {
        if let Err(e) = self.require_running(&req.id) {
            return Some(e.into());
        }
        let params: ToolCallParams = match parse_params(&req, "tool call") {
            Ok(params) => params,
            Err(e) => return Some(e.into()),
        };

        let bridge = Arc::clone(&self.bridge);
        let id = req.id;
        self.in_flight.spawn(async move {
            let tool = params.name.clone();
            let result = tools::call(&bridge, params).await;
            if result.is_error {
                warn!(id = %id, tool = %tool, "Tool call failed");
            }
            match serde_json::to_value(&result) {
                Ok(value) => JsonRpcResponse::success(id, value).into(),
                Err(e) => {
                    error!(error = %e, "Failed to serialise tool call result");
                    JsonRpcError::internal_error(id, "Internal error: failed to serialise result")
                        .into()
                }
            }
        });
        None
    }

    fn handle_resources_list(&self, req: &JsonRpcRequest) -> Result<JsonRpcResponse, JsonRpcError> {
        self.require_running(&req.id)?;
        let resources: Vec<Value> = catalog::RESOURCES
            .iter()
            .map(|r| {
                json!({
                    "uri": r.uri,
                    "name": r.name,
                    "description": r.description,
                    "mimeType": "application/json",
                })
            })
            .collect();
        Ok(JsonRpcResponse::success(
            req.id.clone(),
            json!({ "resources": resources }),
        ))
    }

    fn spawn_resource_read(&mut self, req: JsonRpcRequest) -> Option<Reply> {
        if let Err(e) = self.require_running(&req.id) {
            return Some(e.into());
        }
        let params: ReadResourceParams = match parse_params(&req, "resource read") {
            Ok(params) => params,
            Err(e) => return Some(e.into()),
        };
        if catalog::resource(&params.uri).is_none() {
            return Some(
                JsonRpcError::invalid_params(req.id, format!("Unknown resource: {}", params.uri))
                    .into(),
            );
        }

        let bridge = Arc::clone(&self.bridge);
        let id = req.id;
        self.in_flight.spawn(async move {
            let mut args = Map::new();
            args.insert("uri".to_string(), Value::String(params.uri.clone()));

            match bridge.send(CommandName::ReadResource, args).await {
                Ok(value) => JsonRpcResponse::success(
                    id,
                    json!({
                        "contents": [{
                            "uri": params.uri,
                            "mimeType": "application/json",
                            "text": tools::render_value(value),
                        }]
                    }),
                )
                .into(),
                Err(e) => {
                    warn!(id = %id, uri = %params.uri, error = %e, "Resource read failed");
                    JsonRpcError::internal_error(id, e.to_string()).into()
                }
            }
        });
        None
    }

    fn handle_prompts_list(&self, req: &JsonRpcRequest) -> Result<JsonRpcResponse, JsonRpcError> {
        self.require_running(&req.id)?;
        let prompts: Vec<Value> = catalog::PROMPTS
            .iter()
            .map(|p| {
                json!({
                    "name": p.name,
                    "description": p.description,
                    "arguments": [{
                        "name": catalog::PROMPT_ARGUMENT,
                        "description": "What you want to design",
                        "required": true,
                    }],
                })
            })
            .collect();
        Ok(JsonRpcResponse::success(
            req.id.clone(),
            json!({ "prompts": prompts }),
        ))
    }

    fn handle_prompts_get(&self, req: &JsonRpcRequest) -> Result<JsonRpcResponse, JsonRpcError> {
        self.require_running(&req.id)?;
        let params: GetPromptParams = parse_params(req, "prompt")?;
        let description = params
            .arguments
            .get(catalog::PROMPT_ARGUMENT)
            .and_then(Value::as_str);

        let messages = catalog::render_prompt(&params.name, description).ok_or_else(|| {
            JsonRpcError::invalid_params(req.id.clone(), format!("Unknown prompt: {}", params.name))
        })?;

        // MCP prompt messages only know "user" and "assistant".
        let messages: Vec<Value> = messages
            .iter()
            .map(|m| {
                let role = match m.role {
                    PromptRole::System => "assistant",
                    PromptRole::User => "user",
                };
                json!({
                    "role": role,
                    "content": PromptContent { kind: "text", text: &m.content },
                })
            })
            .collect();

        let description = catalog::PROMPTS
            .iter()
            .find(|p| p.name == params.name)
            .map(|p| p.description);

        Ok(JsonRpcResponse::success(
            req.id.clone(),
            json!({ "description": description, "messages": messages }),
        ))
    }

    /// Ensures the server is in the Running state.
    fn require_running(&self, id: &RequestId) -> Result<(), JsonRpcError> {
        if self.state != ServerState::Running {
            return Err(JsonRpcError::invalid_request(
                Some(id.clone()),
                "Server not initialised",
            ));
        }
        Ok(())
    }
}

/// Decodes request params, treating absent params as an empty object.
fn parse_params<T: serde::de::DeserializeOwned>(
    req: &JsonRpcRequest,
    what: &str,
) -> Result<T, JsonRpcError> {
    let params = req.params.clone().unwrap_or_else(|| json!({}));
    serde_json::from_value(params).map_err(|e| {
        JsonRpcError::invalid_params(req.id.clone(), format!("Invalid {what} params: {e}"))
    })
}

/// Serves a single session on stdin/stdout.
///
/// # Errors
///
/// Returns an error if stdio fails.
pub async fn serve_stdio(
    bridge: Arc<Bridge>,
    shutdown: impl Future<Output = ()>,
) -> std::io::Result<()> {
    let (reader, writer) = transport::stdio();
    McpServer::new(reader, writer, bridge)
        .run_until(shutdown)
        .await
}

/// Accepts TCP connections until `shutdown` resolves. Each connection is
/// an independent session sharing `bridge`.
///
/// # Errors
///
/// Currently always `Ok`; failed accepts are logged and skipped.
pub async fn serve_tcp(
    listener: TcpListener,
    bridge: Arc<Bridge>,
    shutdown: impl Future<Output = ()>,
) -> std::io::Result<()> {
    tokio::pin!(shutdown);
    let mut sessions = JoinSet::new();

    loop {
        tokio::select! {
            () = &mut shutdown => break,

            Some(finished) = sessions.join_next(), if !sessions.is_empty() => {
                if let Err(e) = finished {
                    error!(error = %e, "Session task failed");
                }
            }

            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        warn!(error = %e, "Failed to accept connection");
                        continue;
                    }
                };
                info!(%peer, "Client connected");
                let bridge = Arc::clone(&bridge);
                sessions.spawn(async move {
                    let (reader, writer) = transport::tcp(stream);
                    let mut server = McpServer::new(reader, writer, bridge);
                    if let Err(e) = server.run_until(std::future::pending::<()>()).await {
                        warn!(%peer, error = %e, "Session ended with an error");
                    }
                    info!(%peer, "Client disconnected");
                });
            }
        }
    }

    info!(sessions = sessions.len(), "Closing open sessions");
    sessions.shutdown().await;
    Ok(())
}

/// Resolves on SIGINT or SIGTERM.
#[cfg(unix)]
pub async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let (Ok(mut sigint), Ok(mut sigterm)) = (
        signal(SignalKind::interrupt()),
        signal(SignalKind::terminate()),
    ) else {
        warn!("Failed to install signal handlers; shutdown only at end of input");
        std::future::pending::<()>().await;
        return;
    };

    tokio::select! {
        _ = sigint.recv() => info!("Received SIGINT, initiating graceful shutdown"),
        _ = sigterm.recv() => info!("Received SIGTERM, initiating graceful shutdown"),
    }
}

/// Resolves on Ctrl+C.
#[cfg(windows)]
pub async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("Received Ctrl+C, initiating graceful shutdown");
    } else {
        warn!("Failed to listen for Ctrl+C; shutdown only at end of input");
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::EndpointSettings;
    use crate::exchange::CommDir;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

    fn test_server(
        dir: &std::path::Path,
    ) -> McpServer<tokio::io::Empty, tokio::io::Sink> {
        McpServer::new(
            LineReader::new(tokio::io::empty()),
            LineWriter::new(tokio::io::sink()),
            Arc::new(Bridge::new(CommDir::new(dir), EndpointSettings::default())),
        )
    }

    fn line(server: &mut McpServer<tokio::io::Empty, tokio::io::Sink>, text: &str) -> Value {
        let reply = server.handle_line(text).expect("reply");
        serde_json::to_value(&reply).unwrap()
    }

    fn initialise(server: &mut McpServer<tokio::io::Empty, tokio::io::Sink>) {
        line(
            server,
            r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{"protocolVersion":"2024-11-05","capabilities":{},"clientInfo":{"name":"test"}}}"#,
        );
        assert!(server
            .handle_line(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#)
            .is_none());
    }

    #[test]
    fn lifecycle_states() {
        let temp = tempfile::tempdir().unwrap();
        let mut server = test_server(temp.path());
        assert_eq!(server.state(), ServerState::AwaitingInit);

        let early = line(&mut server, r#"{"jsonrpc":"2.0","id":0,"method":"tools/list"}"#);
        assert_eq!(early["error"]["message"], "Server not initialised");

        let init = line(
            &mut server,
            r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{"protocolVersion":"2024-11-05"}}"#,
        );
        assert_eq!(init["result"]["protocolVersion"], MCP_PROTOCOL_VERSION);
        assert_eq!(init["result"]["serverInfo"]["name"], SERVER_NAME);
        assert_eq!(server.state(), ServerState::Initialising);

        server.handle_line(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#);
        assert_eq!(server.state(), ServerState::Running);

        let again = line(
            &mut server,
            r#"{"jsonrpc":"2.0","id":2,"method":"initialize","params":{"protocolVersion":"2024-11-05"}}"#,
        );
        assert_eq!(again["error"]["code"], -32600);
    }

    #[test]
    fn listings_come_from_catalog() {
        let temp = tempfile::tempdir().unwrap();
        let mut server = test_server(temp.path());
        initialise(&mut server);

        let tools = line(&mut server, r#"{"jsonrpc":"2.0","id":2,"method":"tools/list"}"#);
        assert_eq!(tools["result"]["tools"].as_array().unwrap().len(), catalog::TOOLS.len());

        let resources = line(&mut server, r#"{"jsonrpc":"2.0","id":3,"method":"resources/list"}"#);
        assert_eq!(
            resources["result"]["resources"][0]["uri"],
            catalog::ACTIVE_DOCUMENT_URI
        );

        let prompts = line(&mut server, r#"{"jsonrpc":"2.0","id":4,"method":"prompts/list"}"#);
        assert_eq!(prompts["result"]["prompts"][1]["name"], "parameter_setup_prompt");
    }

    #[test]
    fn prompts_get_renders_locally() {
        let temp = tempfile::tempdir().unwrap();
        let mut server = test_server(temp.path());
        initialise(&mut server);

        let prompt = line(
            &mut server,
            r#"{"jsonrpc":"2.0","id":5,"method":"prompts/get","params":{"name":"create_sketch_prompt","arguments":{"description":"a bracket"}}}"#,
        );
        let messages = prompt["result"]["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0]["role"], "assistant");
        assert_eq!(messages[1]["role"], "user");
        assert!(messages[1]["content"]["text"].as_str().unwrap().contains("a bracket"));

        let unknown = line(
            &mut server,
            r#"{"jsonrpc":"2.0","id":6,"method":"prompts/get","params":{"name":"nope"}}"#,
        );
        assert_eq!(unknown["error"]["code"], -32602);
    }

    #[test]
    fn protocol_errors() {
        let temp = tempfile::tempdir().unwrap();
        let mut server = test_server(temp.path());
        initialise(&mut server);

        let parse = line(&mut server, "{oops");
        assert_eq!(parse["error"]["code"], -32700);

        let missing = line(&mut server, r#"{"jsonrpc":"2.0","id":7,"method":"nope/nope"}"#);
        assert_eq!(missing["error"]["code"], -32601);
        assert_eq!(missing["id"], 7);

        let bad_resource = line(
            &mut server,
            r#"{"jsonrpc":"2.0","id":8,"method":"resources/read","params":{"uri":"fusion://nope"}}"#,
        );
        assert_eq!(bad_resource["error"]["code"], -32602);

        let bad_call = line(
            &mut server,
            r#"{"jsonrpc":"2.0","id":9,"method":"tools/call","params":{"arguments":{}}}"#,
        );
        assert_eq!(bad_call["error"]["code"], -32602);
    }

    #[tokio::test]
    async fn session_over_duplex_answers_in_order_of_completion() {
        let temp = tempfile::tempdir().unwrap();
        let bridge = Arc::new(Bridge::new(
            CommDir::new(temp.path()),
            EndpointSettings {
                command_timeout: std::time::Duration::from_millis(100),
                poll_interval: std::time::Duration::from_millis(5),
                ..EndpointSettings::default()
            },
        ));

        let (client, server_io) = tokio::io::duplex(64 * 1024);
        let (server_read, server_write) = tokio::io::split(server_io);
        let mut server = McpServer::new(
            LineReader::new(server_read),
            LineWriter::new(server_write),
            bridge,
        );
        let session = tokio::spawn(async move {
            server.run_until(std::future::pending::<()>()).await.unwrap();
        });

        let (client_read, mut client_write) = tokio::io::split(client);
        let requests = [
            r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{"protocolVersion":"2024-11-05"}}"#,
            r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#,
            r#"{"jsonrpc":"2.0","id":2,"method":"tools/call","params":{"name":"message_box","arguments":{"message":"hi"}}}"#,
            r#"{"jsonrpc":"2.0","id":3,"method":"ping"}"#,
        ];
        for request in requests {
            client_write.write_all(request.as_bytes()).await.unwrap();
            client_write.write_all(b"\n").await.unwrap();
        }
        client_write.shutdown().await.unwrap();

        let mut lines = BufReader::new(client_read).lines();
        let mut replies = Vec::new();
        while let Some(line) = lines.next_line().await.unwrap() {
            replies.push(serde_json::from_str::<Value>(&line).unwrap());
        }
        session.await.unwrap();

        let ids: Vec<_> = replies.iter().map(|r| r["id"].clone()).collect();
        assert_eq!(ids, vec![json!(1), json!(3), json!(2)]);
        assert_eq!(replies[2]["result"]["isError"], true);
    }
}
