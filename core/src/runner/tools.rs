//! Workspace toolbelt exposed to the model.

use serde::Deserialize;
use serde_json::json;

use crate::env::{Env, Output};
use crate::error::{Error, Result};
use crate::workspace::Workspace;

use super::{ToolCall, ToolDefinition};

/// Tool that stores the working workspace into a named output.
pub const SAVE_TOOL: &str = "save";

#[derive(Debug, Deserialize)]
struct AddPackagesArgs {
    packages: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct WithExecArgs {
    args: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ReadArgs {
    path: String,
}

#[derive(Debug, Deserialize)]
struct WriteArgs {
    path: String,
    contents: String,
}

#[derive(Debug, Deserialize)]
struct SaveArgs {
    name: String,
}

fn tool(name: &str, description: &str, parameters: serde_json::Value) -> ToolDefinition {
    ToolDefinition {
        name: name.to_string(),
        description: description.to_string(),
        parameters,
    }
}

/// Builds the tool definitions for a workspace and the given outputs.
pub fn workspace_tools(outputs: &[Output]) -> Vec<ToolDefinition> {
    let output_names: Vec<&str> = outputs.iter().map(|o| o.name.as_str()).collect();

    vec![
        tool(
            "add_packages",
            "Install system packages using apk to the alpine workspace. \
             Use this to install system packages like `python3`, `git`, etc. \
             You cannot install project dependencies with this tool.",
            json!({
                "type": "object",
                "properties": {
                    "packages": {
                        "type": "array",
                        "items": { "type": "string" },
                        "minItems": 1,
                        "description": "List of alpine packages to install"
                    }
                },
                "required": ["packages"]
            }),
        ),
        tool(
            "with_exec",
            "Run any command inside the alpine workspace. \
             Use this to install project dependencies, run tests, etc.",
            json!({
                "type": "object",
                "properties": {
                    "args": {
                        "type": "array",
                        "items": { "type": "string" },
                        "minItems": 1,
                        "description": "Command to run, executable first"
                    }
                },
                "required": ["args"]
            }),
        ),
        tool(
            "read",
            "Read a file at a given path and returns its content",
            json!({
                "type": "object",
                "properties": {
                    "path": { "type": "string", "description": "Path to read the file at" }
                },
                "required": ["path"]
            }),
        ),
        tool(
            "write",
            "Write a file at a given path with the provided content",
            json!({
                "type": "object",
                "properties": {
                    "path": { "type": "string", "description": "Path to write the file at" },
                    "contents": { "type": "string", "description": "Contents to write" }
                },
                "required": ["path", "contents"]
            }),
        ),
        tool(
            "tree",
            "List the available files in tree format",
            json!({ "type": "object", "properties": {} }),
        ),
        tool(
            SAVE_TOOL,
            "Save the current workspace as a named output of the environment. \
             Call this once the workspace is ready.",
            json!({
                "type": "object",
                "properties": {
                    "name": {
                        "type": "string",
                        "enum": output_names,
                        "description": "Output to save the workspace to"
                    }
                },
                "required": ["name"]
            }),
        ),
    ]
}

fn parse<T: for<'de> Deserialize<'de>>(call: &ToolCall) -> Result<T> {
    serde_json::from_value(call.arguments.clone())
        .map_err(|e| Error::InvalidArgument(format!("{}: {}", call.name, e)))
}

/// Runs one tool call against `workspace`, returning the text for the model.
///
/// Errors keep their kind so the caller can tell recoverable failures from
/// runtime failures.
pub async fn dispatch(workspace: &mut Workspace, env: &mut Env, call: &ToolCall) -> Result<String> {
    tracing::info!(tool = %call.name, arguments = %call.arguments, "dispatching tool call");

    match call.name.as_str() {
        "add_packages" => {
            let args: AddPackagesArgs = parse(call)?;
            workspace.add_packages(args.packages.as_slice()).await?;
            Ok(format!("installed {}", args.packages.join(", ")))
        }
        "with_exec" => {
            let args: WithExecArgs = parse(call)?;
            workspace.with_exec(args.args).await?;
            let stdout = workspace.container().stdout().await?;
            Ok(format!("exit code 0, out: {}", stdout))
        }
        "read" => {
            let args: ReadArgs = parse(call)?;
            workspace.read(&args.path).await
        }
        "write" => {
            let args: WriteArgs = parse(call)?;
            if args.path.is_empty() {
                return Err(Error::InvalidArgument("path cannot be empty".to_string()));
            }
            // Resolved eagerly; a failed write leaves the workspace unchanged.
            let previous = workspace.clone();
            workspace.write(&args.path, &args.contents);
            if let Err(e) = workspace.container().sync().await {
                *workspace = previous;
                return Err(e);
            }
            Ok(format!("wrote {} bytes to {}", args.contents.len(), args.path))
        }
        "tree" => workspace.tree().await,
        SAVE_TOOL => {
            let args: SaveArgs = parse(call)?;
            env.set_output(&args.name, workspace.clone())
                .map_err(|_| Error::InvalidArgument(format!("no output named '{}'", args.name)))?;
            Ok(format!("saved workspace to output '{}'", args.name))
        }
        other => Err(Error::UnknownTool(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::{Client, MemoryRuntime};

    fn call(name: &str, arguments: serde_json::Value) -> ToolCall {
        ToolCall {
            id: format!("call_{}", name),
            name: name.to_string(),
            arguments,
        }
    }

    fn setup() -> (Workspace, Env) {
        let client = Client::new(MemoryRuntime::new());
        let ws = Workspace::from_container(
            client.container().from("alpine:3").with_workdir("/workspace"),
        );
        let env = Env::new()
            .with_workspace_input("workspace", ws.clone(), "input")
            .with_workspace_output("result", "output");
        (ws, env)
    }

    #[test]
    fn tools_cover_the_workspace_toolbelt() {
        let (_, env) = setup();
        let names: Vec<String> = workspace_tools(env.outputs())
            .into_iter()
            .map(|t| t.name)
            .collect();

        assert_eq!(
            names,
            vec!["add_packages", "with_exec", "read", "write", "tree", "save"]
        );
    }

    #[test]
    fn save_tool_enumerates_outputs() {
        let (_, env) = setup();
        let tools = workspace_tools(env.outputs());
        let save = tools.iter().find(|t| t.name == SAVE_TOOL).unwrap();

        assert_eq!(
            save.parameters["properties"]["name"]["enum"],
            serde_json::json!(["result"])
        );
    }

    #[tokio::test]
    async fn write_then_read_through_tools() {
        let (mut ws, mut env) = setup();

        dispatch(
            &mut ws,
            &mut env,
            &call("write", json!({"path": "notes.txt", "contents": "hi"})),
        )
        .await
        .unwrap();
        let contents = dispatch(&mut ws, &mut env, &call("read", json!({"path": "notes.txt"})))
            .await
            .unwrap();

        assert_eq!(contents, "hi");
    }

    #[tokio::test]
    async fn failed_write_is_recoverable_and_rolled_back() {
        let (mut ws, mut env) = setup();
        dispatch(
            &mut ws,
            &mut env,
            &call("write", json!({"path": "dir/b.txt", "contents": "beta"})),
        )
        .await
        .unwrap();

        let err = dispatch(
            &mut ws,
            &mut env,
            &call("write", json!({"path": "dir", "contents": "clobber"})),
        )
        .await
        .unwrap_err();
        assert!(err.is_recoverable());

        let text = dispatch(&mut ws, &mut env, &call("with_exec", json!({"args": ["true"]})))
            .await
            .unwrap();
        assert_eq!(text, "exit code 0, out: ");
        assert_eq!(ws.read("dir/b.txt").await.unwrap(), "beta");
    }

    #[tokio::test]
    async fn with_exec_reports_stdout() {
        let (mut ws, mut env) = setup();

        let text = dispatch(
            &mut ws,
            &mut env,
            &call("with_exec", json!({"args": ["echo", "hello"]})),
        )
        .await
        .unwrap();

        assert_eq!(text, "exit code 0, out: hello\n");
    }

    #[tokio::test]
    async fn malformed_arguments_are_recoverable() {
        let (mut ws, mut env) = setup();

        let err = dispatch(&mut ws, &mut env, &call("read", json!({"file": 1})))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::InvalidArgument(_)));
        assert!(err.is_recoverable());
    }

    #[tokio::test]
    async fn unknown_tool_is_reported() {
        let (mut ws, mut env) = setup();

        let err = dispatch(&mut ws, &mut env, &call("rm_rf", json!({})))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::UnknownTool(name) if name == "rm_rf"));
    }

    #[tokio::test]
    async fn save_fills_output() {
        let (mut ws, mut env) = setup();

        dispatch(&mut ws, &mut env, &call("save", json!({"name": "result"})))
            .await
            .unwrap();

        assert!(env.output("result").is_ok());
    }

    #[tokio::test]
    async fn save_to_unknown_output_is_recoverable() {
        let (mut ws, mut env) = setup();

        let err = dispatch(&mut ws, &mut env, &call("save", json!({"name": "other"})))
            .await
            .unwrap_err();

        assert!(err.is_recoverable());
    }
}
