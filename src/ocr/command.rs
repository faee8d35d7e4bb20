//! Running external tools.

use std::process::{ExitStatus, Output};

use super::backend::OcrError;

/// Check if a binary is available in PATH.
pub fn check_binary(name: &str) -> bool {
    which::which(name).is_ok()
}

/// Stdout of a successful command, or the matching error.
pub fn handle_cmd_output(
    result: std::io::Result<Output>,
    tool_name: &str,
    error_prefix: &str,
) -> Result<String, OcrError> {
    match result {
        Ok(output) if output.status.success() => {
            Ok(String::from_utf8_lossy(&output.stdout).into_owned())
        }
        Ok(output) => Err(OcrError::Failed(format!(
            "{}: {}",
            error_prefix,
            String::from_utf8_lossy(&output.stderr).trim()
        ))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(OcrError::ToolNotFound(tool_name.to_string()))
        }
        Err(e) => Err(OcrError::Io(e)),
    }
}

pub fn check_cmd_status(
    result: std::io::Result<ExitStatus>,
    tool_name: &str,
    error_msg: &str,
) -> Result<(), OcrError> {
    match result {
        Ok(s) if s.success() => Ok(()),
        Ok(_) => Err(OcrError::Failed(error_msg.to_string())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(OcrError::ToolNotFound(tool_name.to_string()))
        }
        Err(e) => Err(OcrError::Io(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command;

    #[test]
    fn test_missing_tool_is_reported() {
        let result = Command::new("definitely-not-a-real-tool-xyz").output();
        assert!(matches!(
            handle_cmd_output(result, "xyz", "xyz failed"),
            Err(OcrError::ToolNotFound(t)) if t == "xyz"
        ));
    }

    #[test]
    fn test_check_binary_missing() {
        assert!(!check_binary("definitely-not-a-real-tool-xyz"));
    }
}
