use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fs;
use std::io::Write;
#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

/// Wraps one external command: working directory, captured stdout/stderr,
/// resource hints, and the run/poll/wait/kill lifecycle. All commands the
/// sweep driver hands to the shell pass through here.
#[derive(Debug)]
pub struct CommandSpec {
    pub cmd: String,
    pub name: Option<String>,
    pub run_dir: Option<PathBuf>,
    pub results_dir: PathBuf,
    pub stdout: Option<PathBuf>,
    pub stderr: Option<PathBuf>,
    pub hints: ResourceHints,
    pub snapshot_log: Option<PathBuf>,
    jobfile_path: Option<PathBuf>,
    process: Option<Child>,
    returncode: Option<i32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceHints {
    /// Max wall-clock time before the queue kills the job, e.g. "24:00:00".
    pub walltime: Option<String>,
    /// Expected memory per core, e.g. "4gb".
    pub memory_per_core: Option<String>,
    pub cores: Option<usize>,
}

const POLL_INTERVAL: Duration = Duration::from_secs(1);

impl CommandSpec {
    pub fn new(cmd: impl Into<String>, results_dir: impl Into<PathBuf>) -> Self {
        Self {
            cmd: cmd.into(),
            name: None,
            run_dir: None,
            results_dir: results_dir.into(),
            stdout: None,
            stderr: None,
            hints: ResourceHints::default(),
            snapshot_log: None,
            jobfile_path: None,
            process: None,
            returncode: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_run_dir(mut self, run_dir: impl Into<PathBuf>) -> Self {
        self.run_dir = Some(run_dir.into());
        self
    }

    /// Redirection targets are file names resolved inside the results dir.
    pub fn with_stdout(mut self, file_name: impl AsRef<Path>) -> Self {
        self.stdout = Some(self.results_dir.join(file_name));
        self
    }

    pub fn with_stderr(mut self, file_name: impl AsRef<Path>) -> Self {
        self.stderr = Some(self.results_dir.join(file_name));
        self
    }

    pub fn with_hints(mut self, hints: ResourceHints) -> Self {
        self.hints = hints;
        self
    }

    pub fn with_snapshot_log(mut self, path: impl Into<PathBuf>) -> Self {
        self.snapshot_log = Some(path.into());
        self
    }

    pub fn returncode(&self) -> Option<i32> {
        self.returncode
    }

    pub fn jobfile_path(&self) -> Option<&Path> {
        self.jobfile_path.as_deref()
    }

    fn build(&self) -> Result<Command> {
        let argv = split_command(&self.cmd)?;
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| anyhow!("empty command line"))?;
        let mut command = Command::new(program);
        command.args(args);
        if let Some(run_dir) = &self.run_dir {
            command.current_dir(run_dir);
        }
        if let Some(stdout) = &self.stdout {
            command.stdout(Stdio::from(fs::File::create(stdout)?));
        }
        if let Some(stderr) = &self.stderr {
            command.stderr(Stdio::from(fs::File::create(stderr)?));
        }
        Ok(command)
    }

    /// Runs the command synchronously and returns its exit code. A non-zero
    /// exit is reported back, never raised.
    pub fn run(&mut self) -> Result<i32> {
        let status = self.build()?.status()?;
        let code = status.code().unwrap_or(-1);
        self.returncode = Some(code);
        Ok(code)
    }

    pub fn run_in_background(&mut self) -> Result<()> {
        let child = self.build()?.spawn()?;
        self.process = Some(child);
        Ok(())
    }

    /// Non-blocking check of the exit code. Launch-before-observe is a
    /// programmer error, enforced loudly.
    pub fn poll(&mut self) -> Option<i32> {
        let process = self
            .process
            .as_mut()
            .expect("cannot poll a command that has not been launched");
        if self.returncode.is_none() {
            if let Ok(Some(status)) = process.try_wait() {
                self.returncode = Some(status.code().unwrap_or(-1));
            }
        }
        self.returncode
    }

    /// Blocks until the process exits, polling at a fixed interval.
    pub fn wait(&mut self) -> i32 {
        assert!(
            self.process.is_some(),
            "cannot wait on a command that has not been launched"
        );
        loop {
            if let Some(code) = self.poll() {
                if code != 0 {
                    tracing::error!(cmd = %self.cmd, code, "non-zero return code");
                }
                return code;
            }
            thread::sleep(POLL_INTERVAL);
        }
    }

    /// Idempotent: a no-op if the process has already exited.
    pub fn kill(&mut self) {
        let process = self
            .process
            .as_mut()
            .expect("cannot kill a command that has not been launched");
        if let Ok(None) = process.try_wait() {
            let _ = process.kill();
        }
    }

    /// Appends one `(launch id, results dir)` line to the audit log.
    pub fn write_to_snapshot_log(&self, job_id: &str) -> Result<()> {
        if let Some(log) = &self.snapshot_log {
            append_snapshot_line(log, job_id, &self.results_dir)?;
        }
        Ok(())
    }

    /// Writes the command into a standalone jobfile inside the results dir,
    /// wrapped by an optional header and trailer, and marks it executable.
    pub fn write_jobfile(&mut self, prefix: Option<&str>, suffix: Option<&str>) -> Result<PathBuf> {
        let file_name = match &self.name {
            Some(name) => format!("{name}.jobfile"),
            None => "jobfile".to_string(),
        };
        let path = self.results_dir.join(file_name);
        let mut file = fs::File::create(&path)?;
        if let Some(prefix) = prefix {
            file.write_all(prefix.as_bytes())?;
        }
        file.write_all(self.cmd.as_bytes())?;
        file.write_all(b"\n")?;
        if let Some(suffix) = suffix {
            file.write_all(suffix.as_bytes())?;
        }
        #[cfg(unix)]
        fs::set_permissions(&path, fs::Permissions::from_mode(0o760))?;
        self.jobfile_path = Some(path.clone());
        Ok(path)
    }
}

pub fn append_snapshot_line(log: &Path, job_id: &str, results_dir: &Path) -> Result<()> {
    let mut file = fs::OpenOptions::new().create(true).append(true).open(log)?;
    writeln!(file, "{job_id}\t{}", results_dir.display())?;
    Ok(())
}

/// Splits a command line into argv, honoring single and double quotes.
pub fn split_command(cmd: &str) -> Result<Vec<String>> {
    let mut argv = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut quote: Option<char> = None;
    for ch in cmd.chars() {
        match quote {
            Some(q) => {
                if ch == q {
                    quote = None;
                } else {
                    current.push(ch);
                }
            }
            None => match ch {
                '\'' | '"' => {
                    quote = Some(ch);
                    in_word = true;
                }
                c if c.is_whitespace() => {
                    if in_word {
                        argv.push(std::mem::take(&mut current));
                        in_word = false;
                    }
                }
                c => {
                    current.push(c);
                    in_word = true;
                }
            },
        }
    }
    if quote.is_some() {
        return Err(anyhow!("unterminated quote in command: {cmd}"));
    }
    if in_word {
        argv.push(current);
    }
    Ok(argv)
}

/// Tracks a set of in-flight commands by polling them round-robin. The first
/// non-zero exit marks the whole set failed, but every process is still
/// drained to completion so partial output is never torn mid-write.
#[derive(Debug, Default)]
pub struct CommandTracker {
    commands: Vec<CommandSpec>,
    poll_interval: Option<Duration>,
}

impl CommandTracker {
    pub fn new() -> Self {
        Self::default()
    }

    #[doc(hidden)]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = Some(interval);
        self
    }

    pub fn push(&mut self, command: CommandSpec) {
        self.commands.push(command);
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Returns 0 if every tracked process exited cleanly, 1 otherwise.
    pub fn wait_on_processes(&mut self) -> i32 {
        assert!(
            !self.commands.is_empty(),
            "cannot wait on an empty list of commands"
        );
        let interval = self.poll_interval.unwrap_or(POLL_INTERVAL);
        let mut done = vec![false; self.commands.len()];
        let mut failed = false;
        while done.iter().any(|d| !d) {
            for (i, command) in self.commands.iter_mut().enumerate() {
                if done[i] {
                    continue;
                }
                if let Some(code) = command.poll() {
                    done[i] = true;
                    tracing::info!(cmd = %command.cmd, code, "process finished");
                    if code != 0 {
                        tracing::error!(cmd = %command.cmd, code, "marking batch failed");
                        failed = true;
                    }
                }
            }
            if done.iter().any(|d| !d) {
                thread::sleep(interval);
            }
        }
        i32::from(failed)
    }

    /// Safe to invoke unconditionally from a cleanup path; processes that
    /// already exited or were never launched are skipped.
    pub fn kill_all_processes(&mut self) {
        for command in &mut self.commands {
            if command.process.is_some() {
                command.kill();
            }
        }
    }
}

/// An interrupted driver must not leave orphaned processes behind.
impl Drop for CommandTracker {
    fn drop(&mut self) {
        self.kill_all_processes();
    }
}

/// An unordered batch of commands that may run in any order or in parallel.
/// Phases themselves run strictly in sequence.
#[derive(Debug, Default)]
pub struct Phase {
    pub name: Option<String>,
    pub commands: Vec<CommandSpec>,
}

impl Phase {
    pub fn new(commands: Vec<CommandSpec>) -> Self {
        Self {
            name: None,
            commands,
        }
    }

    pub fn named(name: impl Into<String>, commands: Vec<CommandSpec>) -> Self {
        Self {
            name: Some(name.into()),
            commands,
        }
    }

    pub fn push(&mut self, command: CommandSpec) {
        self.commands.push(command);
    }
}

/// Executes phases in order on a fixed-size worker pool. A phase completes
/// only when every command in it has terminated, success or failure; there
/// is no early abort on partial failure because independent runs within a
/// phase are expected to fail independently.
#[derive(Debug)]
pub struct BatchManager {
    phases: Vec<Phase>,
    cores: Option<usize>,
}

impl BatchManager {
    pub fn new(phases: Vec<Phase>) -> Self {
        Self {
            phases,
            cores: None,
        }
    }

    pub fn with_cores(mut self, cores: usize) -> Self {
        self.cores = Some(cores.max(1));
        self
    }

    pub fn push(&mut self, phase: Phase) {
        self.phases.push(phase);
    }

    fn pool_size(&self) -> usize {
        self.cores.unwrap_or_else(|| {
            thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        })
    }

    /// Runs every phase to completion and returns the worst exit code seen.
    pub fn run(&mut self) -> Result<i32> {
        let pool_size = self.pool_size();
        let mut worst = 0;
        for (phase_id, phase) in self.phases.iter_mut().enumerate() {
            match &phase.name {
                Some(name) => tracing::info!(phase = %name, "starting phase"),
                None => tracing::info!(phase = phase_id, "starting phase"),
            }
            let commands = std::mem::take(&mut phase.commands);
            tracing::info!(
                num_cmds = commands.len(),
                num_workers = pool_size,
                "dispatching phase to worker pool"
            );
            let queue = Mutex::new(commands.into_iter().collect::<VecDeque<_>>());
            let results = Mutex::new(Vec::new());
            thread::scope(|scope| {
                for _ in 0..pool_size {
                    scope.spawn(|| loop {
                        let Some(mut command) = queue.lock().unwrap().pop_front() else {
                            break;
                        };
                        let code = run_one(&mut command);
                        results.lock().unwrap().push((command, code));
                    });
                }
            });
            let mut finished = results.into_inner().unwrap();
            for (command, code) in &finished {
                if *code != 0 {
                    tracing::error!(cmd = %command.cmd, code, "command failed");
                    if worst == 0 {
                        worst = *code;
                    }
                }
            }
            phase.commands = finished.drain(..).map(|(command, _)| command).collect();
        }
        Ok(worst)
    }
}

fn run_one(command: &mut CommandSpec) -> i32 {
    if let Err(err) = command.write_to_snapshot_log("0") {
        tracing::warn!(error = %err, "failed to append to snapshot log");
    }
    match command.run() {
        Ok(code) => {
            tracing::info!(cmd = %command.cmd, code, "finished command");
            code
        }
        Err(err) => {
            tracing::error!(cmd = %command.cmd, error = %err, "failed to launch command");
            -1
        }
    }
}

/// Settings for a remote batch queue submission backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Submission command prefix; the jobfile path is appended.
    pub submit_command: String,
    pub queue: Option<String>,
    pub email: Option<String>,
    pub processor_cores_per_node: Option<usize>,
    pub precommands: String,
    pub postcommands: String,
    pub trapcommands: String,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            submit_command: "qsub -V".to_string(),
            queue: None,
            email: None,
            processor_cores_per_node: None,
            precommands: "echo Start Job".to_string(),
            postcommands: "echo End Job".to_string(),
            trapcommands: "echo Job Terminated Early!!!".to_string(),
        }
    }
}

/// Submits every job to the remote queue up front. Phase ordering is
/// expressed as job-dependency metadata: each job of phase N defers start
/// until every job id of phase N-1 has terminated for any reason, so a
/// failed upstream job never stalls the chain.
#[derive(Debug)]
pub struct ClusterBatchManager {
    phases: Vec<Phase>,
    config: ClusterConfig,
}

impl ClusterBatchManager {
    pub fn new(phases: Vec<Phase>, config: ClusterConfig) -> Self {
        Self { phases, config }
    }

    pub fn push(&mut self, phase: Phase) {
        self.phases.push(phase);
    }

    /// Submits all phases and returns the job ids of the final phase.
    pub fn run(&mut self) -> Result<Vec<String>> {
        let mut dep_ids = Vec::new();
        let mut phases = std::mem::take(&mut self.phases);
        for phase in &mut phases {
            let mut phase_ids = Vec::new();
            for command in &mut phase.commands {
                let id = self.submit(command, &dep_ids)?;
                phase_ids.push(id);
            }
            dep_ids = phase_ids;
        }
        self.phases = phases;
        Ok(dep_ids)
    }

    fn submit(&self, command: &mut CommandSpec, dep_ids: &[String]) -> Result<String> {
        let header = self.jobfile_header(command);
        let trailer = format!("\n{}\n", self.config.postcommands);
        let jobfile = command.write_jobfile(Some(&header), Some(&trailer))?;

        let mut submit = self.config.submit_command.clone();
        if !dep_ids.is_empty() {
            // afterany: start once the listed jobs terminated for any reason.
            submit.push_str(" -W depend=afterany:");
            submit.push_str(&dep_ids.join(":"));
        }
        submit.push(' ');
        submit.push_str(&jobfile.to_string_lossy());
        tracing::info!(cmd = %submit, "submitting job");

        let argv = split_command(&submit)?;
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| anyhow!("empty submit command"))?;
        let mut child = Command::new(program);
        child.args(args);
        if let Some(run_dir) = &command.run_dir {
            child.current_dir(run_dir);
        }
        let output = child.stdout(Stdio::piped()).output()?;
        if !output.status.success() {
            return Err(anyhow!(
                "job submission failed with status {}",
                output.status.code().unwrap_or(-1)
            ));
        }
        let job_id = String::from_utf8_lossy(&output.stdout).trim().to_string();
        tracing::info!(job_id = %job_id, "job accepted by queue");
        command.write_to_snapshot_log(&job_id)?;
        Ok(job_id)
    }

    fn jobfile_header(&self, command: &CommandSpec) -> String {
        let mut directives = String::new();
        let mut job_name = String::new();
        if let Some(name) = &command.name {
            job_name.push_str(name);
            job_name.push('-');
        }
        if let Some(base) = command.results_dir.file_name() {
            job_name.push_str(&base.to_string_lossy());
        }
        if !job_name.is_empty() {
            directives.push_str(&format!("#PBS -N {job_name}\n"));
        }
        if let Some(queue) = &self.config.queue {
            directives.push_str(&format!("#PBS -q {queue}\n"));
        }
        if let Some(email) = &self.config.email {
            // abe: mail on abort, begin, end.
            directives.push_str("#PBS -m abe\n");
            directives.push_str(&format!("#PBS -M {email}\n"));
        }
        if let Some(stdout) = &command.stdout {
            directives.push_str(&format!("#PBS -o {}\n", stdout.display()));
        }
        if let Some(stderr) = &command.stderr {
            directives.push_str(&format!("#PBS -e {}\n", stderr.display()));
        }
        if let Some(walltime) = &command.hints.walltime {
            directives.push_str(&format!("#PBS -l walltime={walltime}\n"));
        }
        if let Some(mem) = &command.hints.memory_per_core {
            directives.push_str(&format!("#PBS -l pmem={mem}\n"));
        }
        let cores = command.hints.cores.or(self.config.processor_cores_per_node);
        if let Some(cores) = cores {
            directives.push_str(&format!("#PBS -l nodes=1:ppn={cores}\n"));
        }

        let trap = if self.config.trapcommands.is_empty() {
            String::new()
        } else {
            format!("trap \"{}\" TERM\n", self.config.trapcommands)
        };

        format!(
            "{directives}\n{SYSTEM_INFO_FUNC}\n{trap}\nprint_system_info\ncd $PBS_O_WORKDIR\n{precommands}\n\n",
            precommands = self.config.precommands
        )
    }
}

// Diagnostic dump emitted at the top of every generated jobfile, so a run
// can be traced back to the queue node that executed it.
const SYSTEM_INFO_FUNC: &str = r#"print_system_info() {
  echo ------------------------------------------------------
  echo -n 'Starting Job on '; date
  echo -n 'Job is running on node '; cat $PBS_NODEFILE /dev/null
  echo ------------------------------------------------------
  echo PBS: qsub is running on $PBS_O_HOST
  echo PBS: executing queue is $PBS_QUEUE
  echo PBS: working directory is $PBS_O_WORKDIR
  echo PBS: job identifier is $PBS_JOBID
  echo PBS: job name is $PBS_JOBNAME
  echo PBS: node file is $PBS_NODEFILE
  echo ------------------------------------------------------
}
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn short_poll() -> Duration {
        Duration::from_millis(20)
    }

    #[test]
    fn split_command_honors_quotes() {
        let argv = split_command("launch --args \"a b c\" --x 'd e'").unwrap();
        assert_eq!(argv, vec!["launch", "--args", "a b c", "--x", "d e"]);
    }

    #[test]
    fn split_command_rejects_unterminated_quote() {
        assert!(split_command("echo \"oops").is_err());
    }

    #[test]
    fn run_captures_exit_code_and_stdout() {
        let dir = TempDir::new().unwrap();
        let mut cmd = CommandSpec::new("echo hello", dir.path()).with_stdout("run.stdout");
        let code = cmd.run().unwrap();
        assert_eq!(code, 0);
        assert_eq!(cmd.returncode(), Some(0));
        let out = fs::read_to_string(dir.path().join("run.stdout")).unwrap();
        assert_eq!(out.trim(), "hello");
    }

    #[test]
    fn run_reports_nonzero_exit_without_error() {
        let dir = TempDir::new().unwrap();
        let mut cmd = CommandSpec::new("false", dir.path());
        assert_eq!(cmd.run().unwrap(), 1);
    }

    #[test]
    #[should_panic(expected = "has not been launched")]
    fn poll_before_launch_panics() {
        let dir = TempDir::new().unwrap();
        let mut cmd = CommandSpec::new("true", dir.path());
        cmd.poll();
    }

    #[test]
    fn background_run_polls_to_completion() {
        let dir = TempDir::new().unwrap();
        let mut cmd = CommandSpec::new("true", dir.path());
        cmd.run_in_background().unwrap();
        assert_eq!(cmd.wait(), 0);
    }

    #[test]
    fn kill_is_idempotent_after_exit() {
        let dir = TempDir::new().unwrap();
        let mut cmd = CommandSpec::new("true", dir.path());
        cmd.run_in_background().unwrap();
        cmd.wait();
        cmd.kill();
        cmd.kill();
    }

    #[test]
    fn tracker_drains_all_processes_after_one_failure() {
        let dir = TempDir::new().unwrap();
        let mut tracker = CommandTracker::new().with_poll_interval(short_poll());
        for cmd_str in ["sleep 0.2", "false", "sleep 0.2"] {
            let mut cmd = CommandSpec::new(cmd_str, dir.path());
            cmd.run_in_background().unwrap();
            tracker.push(cmd);
        }
        assert_eq!(tracker.wait_on_processes(), 1);
        // Every process must have an observed exit code by the time the
        // tracker reports failure.
        for cmd in &tracker.commands {
            assert!(cmd.returncode().is_some());
        }
    }

    #[test]
    #[should_panic(expected = "empty list")]
    fn tracker_rejects_empty_wait() {
        CommandTracker::new().wait_on_processes();
    }

    #[test]
    fn batch_manager_runs_phases_in_order() {
        let dir = TempDir::new().unwrap();
        let marker = dir.path().join("first");
        let phase1 = Phase::new(vec![CommandSpec::new(
            format!("touch {}", marker.display()),
            dir.path(),
        )]);
        // The second phase reads the artifact produced by the first; it only
        // succeeds if phase ordering held.
        let phase2 = Phase::new(vec![CommandSpec::new(
            format!("ls {}", marker.display()),
            dir.path(),
        )]);
        let mut manager = BatchManager::new(vec![phase1, phase2]).with_cores(2);
        assert_eq!(manager.run().unwrap(), 0);
    }

    #[test]
    fn batch_manager_completes_phase_despite_failures() {
        let dir = TempDir::new().unwrap();
        let survivor = dir.path().join("survivor");
        let phase = Phase::new(vec![
            CommandSpec::new("false", dir.path()),
            CommandSpec::new(format!("touch {}", survivor.display()), dir.path()),
        ]);
        let mut manager = BatchManager::new(vec![phase]).with_cores(1);
        let worst = manager.run().unwrap();
        assert_eq!(worst, 1);
        assert!(survivor.exists());
    }

    #[test]
    fn snapshot_log_appends_one_line_per_launch() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("job.log");
        let cmd = CommandSpec::new("true", dir.path()).with_snapshot_log(&log);
        cmd.write_to_snapshot_log("42.queue").unwrap();
        cmd.write_to_snapshot_log("43.queue").unwrap();
        let contents = fs::read_to_string(&log).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("42.queue\t"));
    }

    #[test]
    fn jobfile_wraps_command_with_header_and_trailer() {
        let dir = TempDir::new().unwrap();
        let mut cmd = CommandSpec::new("launch --flag", dir.path()).with_name("gcc");
        let path = cmd.write_jobfile(Some("#header\n"), Some("#trailer\n")).unwrap();
        assert!(path.ends_with("gcc.jobfile"));
        let body = fs::read_to_string(&path).unwrap();
        assert_eq!(body, "#header\nlaunch --flag\n#trailer\n");
    }

    #[test]
    fn cluster_header_carries_resource_directives() {
        let dir = TempDir::new().unwrap();
        let cmd = CommandSpec::new("launch", dir.path().join("bench"))
            .with_name("gcc")
            .with_hints(ResourceHints {
                walltime: Some("12:00:00".to_string()),
                memory_per_core: Some("4gb".to_string()),
                cores: Some(8),
            });
        let config = ClusterConfig {
            queue: Some("batch".to_string()),
            ..ClusterConfig::default()
        };
        let manager = ClusterBatchManager::new(Vec::new(), config);
        let header = manager.jobfile_header(&cmd);
        assert!(header.contains("#PBS -N gcc-bench"));
        assert!(header.contains("#PBS -q batch"));
        assert!(header.contains("#PBS -l walltime=12:00:00"));
        assert!(header.contains("#PBS -l pmem=4gb"));
        assert!(header.contains("#PBS -l nodes=1:ppn=8"));
        assert!(header.contains("trap \"echo Job Terminated Early!!!\" TERM"));
        assert!(header.contains("print_system_info"));
    }

    #[test]
    fn cluster_run_chains_phases_with_afterany() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("a")).unwrap();
        fs::create_dir_all(dir.path().join("b")).unwrap();
        // Stand-in queue: echoes a fake job id derived from its arguments.
        let config = ClusterConfig {
            submit_command: "echo submitted".to_string(),
            ..ClusterConfig::default()
        };
        let phase1 = Phase::new(vec![CommandSpec::new("launch one", dir.path().join("a"))]);
        let phase2 = Phase::new(vec![CommandSpec::new("launch two", dir.path().join("b"))]);
        let mut manager = ClusterBatchManager::new(vec![phase1, phase2], config);
        let final_ids = manager.run().unwrap();
        assert_eq!(final_ids.len(), 1);
        // The second phase's jobfile exists and the snapshot of the submit
        // output proves the dependency string was threaded through.
        let jobfile_b = dir.path().join("b").join("jobfile");
        assert!(jobfile_b.exists());
        assert!(final_ids[0].contains("-W depend=afterany:"));
    }
}
