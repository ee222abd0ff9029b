use std::{ffi::OsString, path::Path, process::ExitStatus, time::Duration};

use futures::future::{BoxFuture, FutureExt};
use log::{debug, info};
use thiserror::Error;

use crate::{
    command::{self, CommandError},
    encode::{encode_key, encode_zero_value, to_hex, to_hex_args, EncodingError},
};

#[derive(Error, Debug)]
pub enum MapWriteError {
    #[error(transparent)]
    Command(#[from] CommandError),

    #[error("{program} exited with {status}: {stderr}")]
    Status {
        program: String,
        status: ExitStatus,
        stderr: String,
    },
}

/// Inserts (or overwrites) one entry of a pinned BPF map, given the raw key
/// and value bytes.
pub trait MapUpdater {
    fn update<'a>(
        &'a self,
        map_path: &'a Path,
        key: &'a [u8],
        value: &'a [u8],
    ) -> BoxFuture<'a, Result<(), MapWriteError>>;
}

/// [`MapUpdater`] backed by `bpftool map update pinned`.
pub struct Bpftool {
    program: String,
    timeout: Duration,
    dry_run: bool,
}

impl Bpftool {
    pub fn new<S: Into<String>>(program: S, timeout: Duration) -> Self {
        Bpftool {
            program: program.into(),
            timeout,
            dry_run: false,
        }
    }

    /// In dry-run mode the command line is only logged, never executed.
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    fn args(map_path: &Path, key: &[u8], value: &[u8]) -> Vec<OsString> {
        let mut args: Vec<OsString> = ["map", "update", "pinned"]
            .iter()
            .map(OsString::from)
            .collect();
        args.push(map_path.as_os_str().to_owned());
        args.push("key".into());
        args.push("hex".into());
        args.extend(to_hex_args(key).into_iter().map(OsString::from));
        args.push("value".into());
        args.push("hex".into());
        args.extend(to_hex_args(value).into_iter().map(OsString::from));
        args
    }

    async fn run(&self, map_path: &Path, key: &[u8], value: &[u8]) -> Result<(), MapWriteError> {
        let cmdline = format!(
            "{} map update pinned {} key hex {} value hex {}",
            self.program,
            map_path.display(),
            to_hex(key),
            to_hex(value)
        );
        if self.dry_run {
            info!("dry run: {}", cmdline);
            return Ok(());
        }
        debug!("{}", cmdline);

        let output = command::run(
            &self.program,
            Self::args(map_path, key, value),
            self.timeout,
        )
        .await?;
        if !output.status.success() {
            return Err(MapWriteError::Status {
                program: self.program.clone(),
                status: output.status,
                stderr: command::stderr_text(&output),
            });
        }

        Ok(())
    }
}

impl MapUpdater for Bpftool {
    fn update<'a>(
        &'a self,
        map_path: &'a Path,
        key: &'a [u8],
        value: &'a [u8],
    ) -> BoxFuture<'a, Result<(), MapWriteError>> {
        self.run(map_path, key, value).boxed()
    }
}

#[derive(Error, Debug)]
pub enum WriteError {
    #[error(transparent)]
    Encoding(#[from] EncodingError),

    #[error(transparent)]
    MapWrite(#[from] MapWriteError),
}

/// Seeds `pid_traffic_map` entries with zeroed traffic stats.
pub struct MapWriter<U> {
    updater: U,
}

impl<U: MapUpdater> MapWriter<U> {
    pub fn new(updater: U) -> Self {
        MapWriter { updater }
    }

    #[cfg(test)]
    pub(crate) fn updater(&self) -> &U {
        &self.updater
    }

    /// Inserts a zeroed entry for `pid`. An existing entry gets reset to zero.
    pub async fn write(&self, map_path: &Path, pid: i64) -> Result<(), WriteError> {
        let key = encode_key(pid)?;
        let value = encode_zero_value();

        self.updater.update(map_path, &key, &value).await?;
        debug!("added PID {} to {}", pid, map_path.display());

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    static TIMEOUT: Duration = Duration::from_secs(5);
    static MAP_PATH: &str = "/sys/fs/bpf/pid_traffic_map";

    #[derive(Default)]
    struct RecordingUpdater {
        calls: Mutex<Vec<(Vec<u8>, Vec<u8>)>>,
    }

    impl MapUpdater for RecordingUpdater {
        fn update<'a>(
            &'a self,
            _map_path: &'a Path,
            key: &'a [u8],
            value: &'a [u8],
        ) -> BoxFuture<'a, Result<(), MapWriteError>> {
            self.calls
                .lock()
                .unwrap()
                .push((key.to_vec(), value.to_vec()));
            futures::future::ready(Ok(())).boxed()
        }
    }

    #[test]
    fn args_should_follow_bpftool_syntax() {
        let args = Bpftool::args(
            Path::new(MAP_PATH),
            &encode_key(1234).unwrap(),
            &encode_zero_value(),
        );
        let args: Vec<String> = args
            .into_iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();

        let mut expected = vec![
            "map", "update", "pinned", MAP_PATH, "key", "hex", "d2", "04", "00", "00", "value",
            "hex",
        ];
        expected.extend(std::iter::repeat("00").take(16));
        assert_eq!(args, expected);
    }

    #[tokio::test]
    async fn bpftool_should_succeed_on_zero_exit() {
        let bpftool = Bpftool::new("true", TIMEOUT);
        let res = bpftool
            .update(Path::new(MAP_PATH), &[0; 4], &[0; 16])
            .await;
        assert!(res.is_ok());
    }

    #[tokio::test]
    async fn bpftool_should_fail_on_non_zero_exit() {
        let bpftool = Bpftool::new("false", TIMEOUT);
        let err = bpftool
            .update(Path::new(MAP_PATH), &[0; 4], &[0; 16])
            .await
            .unwrap_err();
        assert!(matches!(err, MapWriteError::Status { .. }));
    }

    #[tokio::test]
    async fn bpftool_should_capture_stderr() {
        // `ls` complains on stderr about the non-existent "map" operand.
        let bpftool = Bpftool::new("ls", TIMEOUT);
        let err = bpftool
            .update(Path::new("/nonexistent/pidtrack"), &[0; 4], &[0; 16])
            .await
            .unwrap_err();
        match err {
            MapWriteError::Status { stderr, .. } => assert!(!stderr.is_empty()),
            e => panic!("unexpected error: {:?}", e),
        }
    }

    #[tokio::test]
    async fn bpftool_should_fail_when_binary_is_missing() {
        let bpftool = Bpftool::new("/nonexistent/bpftool", TIMEOUT);
        let err = bpftool
            .update(Path::new(MAP_PATH), &[0; 4], &[0; 16])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            MapWriteError::Command(CommandError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn bpftool_should_not_spawn_in_dry_run() {
        let bpftool = Bpftool::new("/nonexistent/bpftool", TIMEOUT).dry_run(true);
        let res = bpftool
            .update(Path::new(MAP_PATH), &[0; 4], &[0; 16])
            .await;
        assert!(res.is_ok());
    }

    #[tokio::test]
    async fn write_should_pass_encoded_entry() {
        let writer = MapWriter::new(RecordingUpdater::default());
        writer.write(Path::new(MAP_PATH), 1234).await.unwrap();

        let calls = writer.updater().calls.lock().unwrap();
        assert_eq!(*calls, vec![(vec![0xd2, 0x04, 0, 0], vec![0; 16])]);
    }

    #[tokio::test]
    async fn write_should_not_update_when_pid_out_of_range() {
        let writer = MapWriter::new(RecordingUpdater::default());
        let err = writer.write(Path::new(MAP_PATH), -1).await.unwrap_err();
        assert!(matches!(
            err,
            WriteError::Encoding(EncodingError::OutOfRange(-1))
        ));
        assert!(writer.updater().calls.lock().unwrap().is_empty());
    }
}
