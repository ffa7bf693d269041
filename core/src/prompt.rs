//! Fixed prompts and binding descriptions.

use crate::env::Env;

/// Instruction given to the agent when building a development environment.
pub const DEV_ENVIRONMENT_PROMPT: &str = "do what you need to do";

/// Name of the workspace input binding.
pub const WORKSPACE_INPUT: &str = "workspace";

/// Description of the workspace input binding.
pub const WORKSPACE_INPUT_DESCRIPTION: &str =
    "An alpine workspace containing the source code directory.";

/// Name of the result output binding.
pub const RESULT_OUTPUT: &str = "result";

/// Description of the result output binding.
pub const RESULT_OUTPUT_DESCRIPTION: &str = "The updated alpine workspace with the necessary development tools and project dependencies installed, based on the analyzed source directory";

/// Builds the system prompt describing the environment's bindings.
pub fn system_prompt(env: &Env) -> String {
    let mut prompt = String::from(
        "You operate on a workspace through the tools provided. \
         Every tool acts on the current workspace and changes persist between calls.\n",
    );

    if !env.inputs().is_empty() {
        prompt.push_str("\nInputs:\n");
        for input in env.inputs() {
            prompt.push_str(&format!("- ${}: {}\n", input.name, input.description));
        }
    }

    if !env.outputs().is_empty() {
        prompt.push_str("\nExpected outputs (store each with the `save` tool when done):\n");
        for output in env.outputs() {
            prompt.push_str(&format!("- ${}: {}\n", output.name, output.description));
        }
    }

    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::{Client, MemoryRuntime};
    use crate::workspace::Workspace;

    #[test]
    fn system_prompt_lists_bindings() {
        let client = Client::new(MemoryRuntime::new());
        let ws = Workspace::from_container(client.container());
        let env = Env::new()
            .with_workspace_input(WORKSPACE_INPUT, ws, WORKSPACE_INPUT_DESCRIPTION)
            .with_workspace_output(RESULT_OUTPUT, RESULT_OUTPUT_DESCRIPTION);

        let prompt = system_prompt(&env);

        assert!(prompt.contains("$workspace: An alpine workspace"));
        assert!(prompt.contains("$result: The updated alpine workspace"));
        assert!(prompt.contains("`save`"));
    }

    #[test]
    fn system_prompt_skips_empty_sections() {
        let prompt = system_prompt(&Env::new());

        assert!(!prompt.contains("Inputs:"));
        assert!(!prompt.contains("Expected outputs"));
    }

    #[test]
    fn instruction_matches_expected_text() {
        assert_eq!(DEV_ENVIRONMENT_PROMPT, "do what you need to do");
    }
}
