//! Bridge to the `@mariozechner/pi-ai` Node.js library.
//!
//! One external process is spawned per call. The full request is written to
//! the process's stdin as a single JSON document, stdin is closed, and
//! stdout is consumed one newline-delimited JSON record at a time, each
//! parsed record yielded immediately as a [`ProviderEvent`]. The consumer
//! blocks only on the next line becoming available.

use crate::canonical::{CanonicalRequest, ModelInfo, ProviderEvent, ToolDefinition, Turn};
use crate::config::ProviderConfig;
use crate::error::{ProxyError, Result};

use futures::future::BoxFuture;
use futures::stream::Stream;
use futures::StreamExt;
use serde::Serialize;
use std::path::PathBuf;
use std::pin::Pin;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, Command};
use tokio_stream::wrappers::LinesStream;

/// Lazy event sequence from one provider invocation. Infinite until the
/// terminal `done` event; not restartable.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<ProviderEvent>> + Send>>;

/// The narrow capability the request handlers depend on. One bridge is
/// constructed at process start and passed to handlers via state; there are
/// no global instances.
pub trait CompletionProvider: Send + Sync {
    /// Invoke the provider once and stream its events. Errors surface as a
    /// single [`ProxyError::Bridge`] item; events emitted before a failure
    /// are never discarded.
    fn stream_events(&self, request: CanonicalRequest, api_key: Option<String>) -> EventStream;

    /// List the provider's models. Degrades to an empty list on any
    /// failure; model listing must never block client usability.
    fn list_models(&self) -> BoxFuture<'_, Vec<ModelInfo>>;
}

const STREAM_SCRIPT: &str = r#"
const { getModel, stream } = require('@mariozechner/pi-ai');

async function main() {
    try {
        const input = JSON.parse(require('fs').readFileSync(0, 'utf-8'));
        const model = getModel('github-copilot', input.model);

        const options = {};
        if (input.apiKey) options.apiKey = input.apiKey;
        if (input.temperature !== undefined) options.temperature = input.temperature;
        if (input.maxTokens !== undefined) options.maxTokens = input.maxTokens;

        for await (const event of stream(model, input.context, options)) {
            console.log(JSON.stringify(event));
        }
    } catch (error) {
        console.error(error.message || String(error));
        process.exit(1);
    }
}

main();
"#;

const MODELS_SCRIPT: &str = r#"
const { getModels } = require('@mariozechner/pi-ai');

try {
    console.log(JSON.stringify(getModels('github-copilot')));
} catch (error) {
    console.error(error.message || String(error));
    process.exit(1);
}
"#;

/// The single JSON document written to the provider process's stdin.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WireRequest<'a> {
    model: &'a str,
    context: WireContext<'a>,
    #[serde(skip_serializing_if = "Option::is_none")]
    api_key: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WireContext<'a> {
    messages: &'a [Turn],
    tools: &'a [ToolDefinition],
    #[serde(skip_serializing_if = "Option::is_none")]
    system_prompt: Option<&'a str>,
}

/// Spawns one `node --eval` process per call.
pub struct NodeBridge {
    program: String,
    stream_args: Vec<String>,
    models_args: Vec<String>,
    working_dir: Option<PathBuf>,
}

impl NodeBridge {
    pub fn new(config: &ProviderConfig) -> Self {
        let working_dir = config.module_path.as_ref().and_then(|path| {
            if path.exists() {
                Some(path.clone())
            } else {
                tracing::warn!(
                    path = %path.display(),
                    "pi-ai module path not found, relying on runtime module resolution"
                );
                None
            }
        });

        Self {
            program: config.node_path.clone(),
            stream_args: vec!["--eval".to_string(), STREAM_SCRIPT.to_string()],
            models_args: vec!["--eval".to_string(), MODELS_SCRIPT.to_string()],
            working_dir,
        }
    }

    /// Build a bridge around an arbitrary command speaking the same stdio
    /// protocol. Used by tests to substitute a scripted process.
    pub fn with_command(
        program: impl Into<String>,
        stream_args: Vec<String>,
        models_args: Vec<String>,
    ) -> Self {
        Self {
            program: program.into(),
            stream_args,
            models_args,
            working_dir: None,
        }
    }

    fn command(&self, args: &[String]) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(args);
        if let Some(ref dir) = self.working_dir {
            cmd.current_dir(dir);
        }
        cmd
    }
}

impl CompletionProvider for NodeBridge {
    fn stream_events(&self, request: CanonicalRequest, api_key: Option<String>) -> EventStream {
        let payload = serde_json::to_string(&WireRequest {
            model: &request.model,
            context: WireContext {
                messages: &request.turns,
                tools: &request.tools,
                system_prompt: request.system_prompt.as_deref(),
            },
            api_key: api_key.as_deref(),
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        });

        let mut cmd = self.command(&self.stream_args);
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        Box::pin(async_stream::stream! {
            let payload = match payload {
                Ok(p) => p,
                Err(e) => {
                    yield Err(ProxyError::bridge(format!("Failed to serialize request: {e}")));
                    return;
                }
            };

            let mut child = match cmd.spawn() {
                Ok(c) => c,
                Err(e) => {
                    yield Err(ProxyError::bridge(format!("Failed to spawn provider process: {e}")));
                    return;
                }
            };

            // One JSON document, then EOF. No further writes.
            if let Some(mut stdin) = child.stdin.take() {
                if let Err(e) = stdin.write_all(payload.as_bytes()).await {
                    tracing::warn!(error = %e, "Failed to write request to provider stdin");
                }
                drop(stdin);
            }

            let stdout = match child.stdout.take() {
                Some(s) => s,
                None => {
                    yield Err(ProxyError::bridge("Provider process has no stdout"));
                    return;
                }
            };
            let stderr = child.stderr.take();
            let mut guard = ChildGuard(Some(child));

            let mut lines = LinesStream::new(BufReader::new(stdout).lines());
            while let Some(line) = lines.next().await {
                let line = match line {
                    Ok(l) => l,
                    Err(e) => {
                        yield Err(ProxyError::bridge(format!("Failed to read provider output: {e}")));
                        break;
                    }
                };
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                // Downstream framing can be noisy; a bad line is not fatal.
                match serde_json::from_str::<ProviderEvent>(trimmed) {
                    Ok(event) => yield Ok(event),
                    Err(e) => {
                        tracing::warn!(error = %e, line = trimmed, "Skipping unparseable provider output");
                    }
                }
            }

            // stdout is drained; reap the process and classify its exit.
            if let Some(mut child) = guard.0.take() {
                match child.wait().await {
                    Ok(status) if status.success() => {}
                    Ok(status) => {
                        let diagnostics = read_stderr(stderr).await;
                        tracing::error!(code = ?status.code(), %diagnostics, "Provider process failed");
                        yield Err(ProxyError::bridge(if diagnostics.is_empty() {
                            format!("Provider process exited with status {status}")
                        } else {
                            diagnostics
                        }));
                    }
                    Err(e) => {
                        yield Err(ProxyError::bridge(format!("Failed to await provider exit: {e}")));
                    }
                }
            }
        })
    }

    fn list_models(&self) -> BoxFuture<'_, Vec<ModelInfo>> {
        Box::pin(async move {
            let mut cmd = self.command(&self.models_args);
            cmd.stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped());

            let output = match cmd.output().await {
                Ok(o) => o,
                Err(e) => {
                    tracing::error!(error = %e, "Failed to execute provider model listing");
                    return Vec::new();
                }
            };

            if !output.status.success() {
                let diagnostics = String::from_utf8_lossy(&output.stderr);
                tracing::error!(
                    code = ?output.status.code(),
                    diagnostics = %diagnostics.trim(),
                    "Provider model listing failed"
                );
                return Vec::new();
            }

            match serde_json::from_slice::<Vec<ModelInfo>>(&output.stdout) {
                Ok(models) => models,
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to parse provider model listing");
                    Vec::new()
                }
            }
        })
    }
}

/// Owns the child for the duration of the stream. If the consuming request
/// is cancelled and the stream dropped mid-flight, the child is killed and
/// its exit awaited, never orphaned.
struct ChildGuard(Option<Child>);

impl Drop for ChildGuard {
    fn drop(&mut self) {
        if let Some(mut child) = self.0.take() {
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                handle.spawn(async move {
                    let _ = child.kill().await;
                    let _ = child.wait().await;
                });
            } else {
                let _ = child.start_kill();
            }
        }
    }
}

async fn read_stderr(stderr: Option<ChildStderr>) -> String {
    let Some(mut stderr) = stderr else {
        return String::new();
    };
    let mut buf = String::new();
    let _ = stderr.read_to_string(&mut buf).await;
    buf.trim().to_string()
}
