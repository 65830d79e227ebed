//! External command execution

use std::process::{Command, Stdio};

use tracing::debug;

use crate::{Result, SystemError};

/// Run `program args...` to completion and return its stdout.
///
/// A non-zero exit is an error carrying the trimmed stderr.
pub(crate) fn run(program: &str, args: &[&str]) -> Result<String> {
    debug!("Running {} {}", program, args.join(" "));

    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .output()
        .map_err(|source| SystemError::Spawn {
            program: program.to_string(),
            source,
        })?;

    if !output.status.success() {
        return Err(SystemError::CommandFailed {
            command: format!("{} {}", program, args.join(" ")),
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_captures_stdout() {
        let out = run("sh", &["-c", "echo hello"]).unwrap();
        assert_eq!(out.trim(), "hello");
    }

    #[test]
    fn test_run_reports_failure() {
        let err = run("sh", &["-c", "echo broken >&2; exit 3"]).unwrap_err();
        match err {
            SystemError::CommandFailed { stderr, .. } => assert_eq!(stderr, "broken"),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_run_missing_program() {
        let err = run("chimera-definitely-not-installed", &[]).unwrap_err();
        assert!(matches!(err, SystemError::Spawn { .. }));
    }
}
