use std::{
    ffi::OsStr,
    io,
    path::PathBuf,
    process::{Output, Stdio},
    time::Duration,
};

use log::debug;
use thiserror::Error;
use tokio::{process::Command, time};

#[derive(Error, Debug)]
pub enum CommandError {
    #[error("could not find {program}: {source}")]
    NotFound {
        program: String,
        #[source]
        source: which::Error,
    },

    #[error("could not execute {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("{program} did not finish within {timeout:?}")]
    Timeout { program: String, timeout: Duration },
}

/// Resolves the given program name (or path) to an executable.
fn resolve<S: AsRef<OsStr>>(program: S) -> Result<PathBuf, CommandError> {
    let program = program.as_ref();
    which::which(program).map_err(|source| CommandError::NotFound {
        program: program.to_string_lossy().into_owned(),
        source,
    })
}

/// Runs the program to completion and returns its output, with both stdout
/// and stderr captured. The exit status is not interpreted here.
///
/// The child is killed if it does not exit before `timeout` expires.
pub async fn run<S, I, A>(program: S, args: I, timeout: Duration) -> Result<Output, CommandError>
where
    S: AsRef<OsStr>,
    I: IntoIterator<Item = A>,
    A: AsRef<OsStr>,
{
    let path = resolve(&program)?;
    let name = program.as_ref().to_string_lossy().into_owned();

    let mut cmd = Command::new(&path);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    debug!("running {:?}", cmd);

    match time::timeout(timeout, cmd.output()).await {
        Ok(res) => res.map_err(|source| CommandError::Spawn {
            program: name,
            source,
        }),
        Err(_) => Err(CommandError::Timeout {
            program: name,
            timeout,
        }),
    }
}

/// Trimmed, lossily decoded stderr of a finished command.
pub fn stderr_text(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    static TIMEOUT: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn run_should_capture_stdout() {
        let output = run("printf", ["ayy"], TIMEOUT).await.unwrap();
        assert!(output.status.success());
        assert_eq!(output.stdout, b"ayy");
    }

    #[tokio::test]
    async fn run_should_report_missing_program() {
        let err = run("/nonexistent/pidtrack-test-binary", ["x"], TIMEOUT)
            .await
            .unwrap_err();
        assert!(matches!(err, CommandError::NotFound { .. }));
    }

    #[tokio::test]
    async fn run_should_time_out() {
        let err = run("sleep", ["5"], Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, CommandError::Timeout { .. }));
    }

    #[tokio::test]
    async fn run_should_not_interpret_exit_status() {
        let output = run("false", Vec::<&str>::new(), TIMEOUT).await.unwrap();
        assert!(!output.status.success());
    }
}
