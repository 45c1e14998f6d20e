use std::ffi::OsStr;
use std::process::{Command, Output};

use crate::error::AssistantError;

/// Fails with [`AssistantError::ToolMissing`] unless `program --version` runs.
pub fn ensure_available(program: &str, hint: &str) -> Result<(), AssistantError> {
    Command::new(program)
        .arg("--version")
        .output()
        .map(|_| ())
        .map_err(|_| AssistantError::ToolMissing {
            program: program.to_string(),
            hint: hint.to_string(),
        })
}

/// Run `program` to completion, turning a non-zero exit into
/// [`AssistantError::ToolFailed`].
pub fn run<I, S>(program: &str, args: I) -> Result<Output, AssistantError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let output = Command::new(program)
        .args(args)
        .output()
        .map_err(|e| AssistantError::ToolFailed {
            program: program.to_string(),
            status: "spawn error".to_string(),
            stderr: e.to_string(),
        })?;

    if !output.status.success() {
        return Err(AssistantError::ToolFailed {
            program: program.to_string(),
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_program() {
        let err = ensure_available("definitely-not-a-real-tool-4821", "install it").unwrap_err();
        assert!(matches!(err, AssistantError::ToolMissing { .. }));
        assert!(err.to_string().contains("install it"));
    }

    #[test]
    fn test_spawn_failure_is_tool_failed() {
        let err = run("definitely-not-a-real-tool-4821", ["x"]).unwrap_err();
        assert!(matches!(err, AssistantError::ToolFailed { .. }));
    }
}
