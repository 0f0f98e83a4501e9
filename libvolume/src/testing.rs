//! In-process stand-in for the cluster CLI and the host mount tools.
//!
//! [`FakeCluster`] answers `ceph fs ls`, `ceph osd pool ls`, `ceph fs new`,
//! `mount`, `umount`, `ls -1` and `df` from in-memory state. Mounts are
//! recorded in a mount-table file under the scratch directory so the code
//! under test sees them through its normal mount-table reads. Every
//! invocation is recorded.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::VolumeError;
use crate::runner::{CommandRunner, command_line};

#[derive(Default)]
struct State {
    filesystems: Vec<(String, String, String)>,
    pools: Vec<String>,
    mounts: Vec<(String, String)>,
    failures: Vec<(String, String)>,
    calls: Vec<String>,
}

pub(crate) struct FakeCluster {
    state: Mutex<State>,
    mount_table: PathBuf,
    ignore_fs_new: bool,
}

impl FakeCluster {
    pub(crate) fn new(scratch: &Path) -> Self {
        let mount_table = scratch.join("fake-mounts");
        std::fs::write(&mount_table, "").expect("write fake mount table");
        Self {
            state: Mutex::new(State::default()),
            mount_table,
            ignore_fs_new: false,
        }
    }

    pub(crate) fn with_pools(self, pools: &[&str]) -> Self {
        self.state
            .lock()
            .unwrap()
            .pools
            .extend(pools.iter().map(|p| (*p).to_owned()));
        self
    }

    pub(crate) fn with_filesystem(self, name: &str, meta: &str, data: &str) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            state
                .filesystems
                .push((name.to_owned(), meta.to_owned(), data.to_owned()));
            for pool in [meta, data] {
                if !state.pools.iter().any(|p| p == pool) {
                    state.pools.push(pool.to_owned());
                }
            }
        }
        self
    }

    /// Make `ceph fs new` exit zero without creating anything.
    pub(crate) fn ignoring_fs_new(mut self) -> Self {
        self.ignore_fs_new = true;
        self
    }

    /// Fail every command whose line starts with `prefix`.
    pub(crate) fn fail_on(&self, prefix: &str, output: &str) {
        self.state
            .lock()
            .unwrap()
            .failures
            .push((prefix.to_owned(), output.to_owned()));
    }

    pub(crate) fn clear_failures(&self) {
        self.state.lock().unwrap().failures.clear();
    }

    pub(crate) fn mount_table_path(&self) -> PathBuf {
        self.mount_table.clone()
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Number of recorded invocations matching `prefix` on a word boundary.
    pub(crate) fn count(&self, prefix: &str) -> usize {
        self.calls()
            .iter()
            .filter(|line| matches_prefix(line, prefix))
            .count()
    }

    pub(crate) fn reset_calls(&self) {
        self.state.lock().unwrap().calls.clear();
    }

    fn write_mount_table(&self, state: &State) {
        let contents: String = state
            .mounts
            .iter()
            .map(|(source, target)| format!("{source} {target} ceph rw,relatime 0 0\n"))
            .collect();
        std::fs::write(&self.mount_table, contents).expect("write fake mount table");
    }
}

fn matches_prefix(line: &str, prefix: &str) -> bool {
    line == prefix || line.starts_with(&format!("{prefix} "))
}

fn failed(command: String, output: &str) -> VolumeError {
    VolumeError::ExternalCommandFailed {
        command,
        output: output.to_owned(),
    }
}

#[async_trait]
impl CommandRunner for FakeCluster {
    async fn run(&self, program: &str, args: &[&str]) -> Result<String, VolumeError> {
        let line = command_line(program, args);
        let mut state = self.state.lock().unwrap();
        state.calls.push(line.clone());

        if let Some((_, output)) = state
            .failures
            .iter()
            .find(|(prefix, _)| matches_prefix(&line, prefix))
        {
            let output = output.clone();
            return Err(failed(line, &output));
        }

        match (program, args) {
            ("ceph", ["fs", "ls"]) => {
                if state.filesystems.is_empty() {
                    return Ok("No filesystems enabled\n".to_owned());
                }
                Ok(state
                    .filesystems
                    .iter()
                    .map(|(name, meta, data)| {
                        format!("name: {name}, metadata pool: {meta}, data pools: [{data} ]\n")
                    })
                    .collect())
            }
            ("ceph", ["osd", "pool", "ls"]) => Ok(state
                .pools
                .iter()
                .map(|p| format!("{p}\n"))
                .collect()),
            ("ceph", ["fs", "new", name, meta, data]) => {
                if !self.ignore_fs_new {
                    state
                        .filesystems
                        .push(((*name).to_owned(), (*meta).to_owned(), (*data).to_owned()));
                }
                Ok("new fs with metadata pool 1 and data pool 2\n".to_owned())
            }
            ("mount", ["-t", _, source, target, "-o", _]) => {
                if !Path::new(target).is_dir() {
                    return Err(failed(
                        line.clone(),
                        &format!("mount: {target}: mount point does not exist."),
                    ));
                }
                state.mounts.push(((*source).to_owned(), (*target).to_owned()));
                self.write_mount_table(&state);
                Ok(String::new())
            }
            ("umount", [target]) => {
                let Some(idx) = state.mounts.iter().rposition(|(_, t)| t == target) else {
                    return Err(failed(line.clone(), &format!("umount: {target}: not mounted.")));
                };
                state.mounts.remove(idx);
                self.write_mount_table(&state);
                Ok(String::new())
            }
            ("ls", ["-1", path]) => {
                let mut names: Vec<String> = std::fs::read_dir(path)
                    .map_err(|e| failed(line.clone(), &format!("ls: cannot access '{path}': {e}")))?
                    .filter_map(|entry| entry.ok())
                    .map(|entry| entry.file_name().to_string_lossy().into_owned())
                    .collect();
                names.sort();
                Ok(names.into_iter().map(|n| format!("{n}\n")).collect())
            }
            ("df", _) => Ok("Type\nceph\n".to_owned()),
            _ => Err(failed(line.clone(), "fake cluster: unsupported command")),
        }
    }
}
