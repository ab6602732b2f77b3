//! Demo ("screen hack") subprocesses.
//!
//! One demo runs at a time, as `<shell> -c <command>`. Starting a demo
//! kills and reaps the previous one first.

use std::process::Stdio;

use guard_core::{DemoSelection, Preferences};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

struct RunningDemo {
    index: usize,
    child: Child,
}

pub struct DemoRunner {
    shell: String,
    programs: Vec<String>,
    nice: i32,
    capture_stderr: bool,
    running: Option<RunningDemo>,
    /// Index of the last demo started, kept across stops for NEXT/PREV.
    last: Option<usize>,
    rng: StdRng,
}

impl DemoRunner {
    pub fn new(shell: impl Into<String>, prefs: &Preferences) -> Self {
        let mut runner = Self {
            shell: shell.into(),
            programs: Vec::new(),
            nice: 0,
            capture_stderr: false,
            running: None,
            last: None,
            rng: StdRng::from_entropy(),
        };
        runner.set_preferences(prefs);
        runner
    }

    /// Picks up a new program list. The running demo is left alone.
    pub fn set_preferences(&mut self, prefs: &Preferences) {
        self.programs = prefs.enabled_programs().into_iter().map(str::to_string).collect();
        self.nice = prefs.nice;
        self.capture_stderr = prefs.capture_stderr;
        if self.last.is_some_and(|i| i >= self.programs.len()) {
            self.last = None;
        }
    }

    pub fn program_count(&self) -> usize {
        self.programs.len()
    }

    /// Zero-based index of the running demo.
    pub fn running(&self) -> Option<usize> {
        self.running.as_ref().map(|d| d.index)
    }

    /// The `_SCREENSAVER_STATUS` program number: 1-based, 0 for none.
    pub fn program_number(&self) -> u32 {
        self.running()
            .and_then(|i| u32::try_from(i + 1).ok())
            .unwrap_or(0)
    }

    /// Stops the current demo and starts the one `selection` names.
    ///
    /// Ends up blank when the selection resolves to nothing or the
    /// program cannot be started.
    pub async fn start(&mut self, selection: DemoSelection) -> Option<usize> {
        self.stop().await;

        let index = self.resolve(selection)?;
        let command = self.programs.get(index)?.clone();

        match self.spawn(&command) {
            Ok(child) => {
                info!(program = index + 1, command = %command, pid = ?child.id(), "Demo started");
                self.running = Some(RunningDemo { index, child });
                self.last = Some(index);
                Some(index)
            }
            Err(e) => {
                warn!(program = index + 1, command = %command, error = %e, "Failed to start demo");
                None
            }
        }
    }

    /// Kills the running demo and waits for it.
    pub async fn stop(&mut self) {
        let Some(mut demo) = self.running.take() else {
            return;
        };
        match demo.child.try_wait() {
            Ok(Some(status)) => {
                debug!(program = demo.index + 1, ?status, "Demo had already exited");
            }
            _ => {
                if let Err(e) = demo.child.kill().await {
                    warn!(program = demo.index + 1, error = %e, "Failed to kill demo");
                } else {
                    debug!(program = demo.index + 1, "Demo stopped");
                }
            }
        }
    }

    fn resolve(&mut self, selection: DemoSelection) -> Option<usize> {
        let count = self.programs.len();
        if count == 0 {
            return None;
        }

        match selection {
            DemoSelection::Blank => None,
            DemoSelection::Index(i) if i < count => Some(i),
            DemoSelection::Index(i) => {
                warn!(program = i + 1, available = count, "No such program; blanking");
                None
            }
            DemoSelection::Random => {
                if count == 1 {
                    return Some(0);
                }
                // Avoid repeating the previous demo.
                let mut pick = self.rng.gen_range(0..count - 1);
                if self.last.is_some_and(|last| pick >= last) {
                    pick += 1;
                }
                Some(pick)
            }
            DemoSelection::Next => Some(self.last.map_or(0, |last| (last + 1) % count)),
            DemoSelection::Prev => Some(self.last.map_or(count - 1, |last| (last + count - 1) % count)),
        }
    }

    fn spawn(&self, command: &str) -> std::io::Result<Child> {
        let mut cmd = Command::new(&self.shell);
        cmd.arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(if self.capture_stderr {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .kill_on_drop(true);

        let nice = self.nice;
        if nice != 0 {
            // SAFETY: nice(2) is async-signal-safe and touches no memory.
            unsafe {
                cmd.pre_exec(move || {
                    libc::nice(nice);
                    Ok(())
                });
            }
        }

        let mut child = cmd.spawn()?;
        if let Some(stderr) = child.stderr.take() {
            let label = command.to_string();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    info!(demo = %label, "{line}");
                }
            });
        }
        Ok(child)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use guard_core::ProgramEntry;

    fn prefs(programs: &[&str]) -> Preferences {
        Preferences {
            programs: programs.iter().map(|p| ProgramEntry::new(*p)).collect(),
            nice: 0,
            capture_stderr: false,
            ..Preferences::default()
        }
    }

    #[tokio::test]
    async fn test_start_and_stop() {
        let mut runner = DemoRunner::new("/bin/sh", &prefs(&["sleep 30", "sleep 31"]));
        assert_eq!(runner.program_number(), 0);

        assert_eq!(runner.start(DemoSelection::Index(1)).await, Some(1));
        assert_eq!(runner.program_number(), 2);

        runner.stop().await;
        assert_eq!(runner.running(), None);
        assert_eq!(runner.program_number(), 0);
    }

    #[tokio::test]
    async fn test_next_prev_wrap() {
        let mut runner = DemoRunner::new("/bin/sh", &prefs(&["sleep 30", "sleep 30", "sleep 30"]));
        assert_eq!(runner.start(DemoSelection::Next).await, Some(0));
        assert_eq!(runner.start(DemoSelection::Prev).await, Some(2));
        assert_eq!(runner.start(DemoSelection::Next).await, Some(0));
        runner.stop().await;
        // Stopping keeps the position.
        assert_eq!(runner.start(DemoSelection::Next).await, Some(1));
        runner.stop().await;
    }

    #[tokio::test]
    async fn test_random_avoids_repeat() {
        let mut runner = DemoRunner::new("/bin/sh", &prefs(&["sleep 30", "sleep 30"]));
        let mut previous = runner.start(DemoSelection::Random).await.unwrap();
        for _ in 0..5 {
            let next = runner.start(DemoSelection::Random).await.unwrap();
            assert_ne!(next, previous);
            previous = next;
        }
        runner.stop().await;
    }

    #[tokio::test]
    async fn test_blank_and_out_of_range() {
        let mut runner = DemoRunner::new("/bin/sh", &prefs(&["sleep 30"]));
        assert_eq!(runner.start(DemoSelection::Blank).await, None);
        assert_eq!(runner.start(DemoSelection::Index(4)).await, None);

        let mut empty = DemoRunner::new("/bin/sh", &prefs(&[]));
        assert_eq!(empty.start(DemoSelection::Random).await, None);
    }

    #[test]
    fn test_disabled_programs_skipped() {
        let mut p = prefs(&["sleep 30"]);
        p.programs.push(ProgramEntry {
            command: "sleep 40".into(),
            enabled: false,
        });
        let runner = DemoRunner::new("/bin/sh", &p);
        assert_eq!(runner.program_count(), 1);
    }
}
