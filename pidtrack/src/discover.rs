use std::{collections::HashSet, process::ExitStatus, time::Duration};

use futures::future::{BoxFuture, FutureExt};
use lazy_static::lazy_static;
use log::debug;
use regex::Regex;
use thiserror::Error;

use crate::command::{self, CommandError};

/// Distinct PIDs owning at least one socket at the moment of discovery.
pub type ActivePidSet = HashSet<i64>;

// -p: process info, -t: TCP, -u: UDP, -n: numeric, -a: all sockets
static SS_ARGS: &[&str] = &["-ptuna"];

lazy_static! {
    static ref PID_MARKER: Regex = Regex::new(r"\bpid=([^,\s]*)").unwrap();
}

#[derive(Error, Debug)]
pub enum DiscoveryError {
    #[error(transparent)]
    Command(#[from] CommandError),

    #[error("{program} exited with {status}: {stderr}")]
    Status {
        program: String,
        status: ExitStatus,
        stderr: String,
    },
}

/// Source of the set of PIDs which currently hold network sockets.
pub trait PidSource {
    fn discover(&self) -> BoxFuture<'_, Result<ActivePidSet, DiscoveryError>>;
}

/// Extracts PIDs from `ss -p` output.
///
/// Every `pid=` marker counts, since sockets shared between processes list
/// several `("name",pid=N,fd=M)` groups on one line. Markers whose value is
/// not purely numeric are skipped.
pub fn parse_pids<'a, I>(lines: I) -> impl Iterator<Item = i64> + 'a
where
    I: IntoIterator<Item = &'a str>,
    I::IntoIter: 'a,
{
    lines.into_iter().flat_map(|line| {
        PID_MARKER.captures_iter(line).filter_map(|caps| {
            let token = caps.get(1)?.as_str();
            if token.is_empty() || !token.bytes().all(|b| b.is_ascii_digit()) {
                return None;
            }
            token.parse::<i64>().ok()
        })
    })
}

/// Discovers PIDs by running `ss`.
pub struct SsDiscoverer {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl SsDiscoverer {
    pub fn new<S: Into<String>>(program: S, timeout: Duration) -> Self {
        let args = SS_ARGS.iter().map(|a| a.to_string()).collect();
        Self::with_args(program, args, timeout)
    }

    /// Runs `program` with custom arguments instead of `-ptuna`. The output
    /// still has to look like `ss -p` output.
    pub fn with_args<S: Into<String>>(program: S, args: Vec<String>, timeout: Duration) -> Self {
        SsDiscoverer {
            program: program.into(),
            args,
            timeout,
        }
    }

    async fn run(&self) -> Result<ActivePidSet, DiscoveryError> {
        let output = command::run(&self.program, &self.args, self.timeout).await?;
        if !output.status.success() {
            return Err(DiscoveryError::Status {
                program: self.program.clone(),
                status: output.status,
                stderr: command::stderr_text(&output),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let pids: ActivePidSet = parse_pids(stdout.lines()).collect();
        debug!("{} reported {} distinct PIDs", self.program, pids.len());

        Ok(pids)
    }
}

impl PidSource for SsDiscoverer {
    fn discover(&self) -> BoxFuture<'_, Result<ActivePidSet, DiscoveryError>> {
        self.run().boxed()
    }
}
