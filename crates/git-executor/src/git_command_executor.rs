use crate::git_info::GitInfo;
use std::io::Write;
use std::path::Path;
use std::process::{Command, Stdio};
use std::sync::{Arc, OnceLock};
use tracing::instrument;

/// Error raised when spawning git or when git exits non-zero.
#[derive(Debug)]
pub enum GitError {
  Spawn { command: String, source: std::io::Error },
  Failed { command: String, stderr: String, code: Option<i32> },
}

impl GitError {
  pub fn command(&self) -> &str {
    match self {
      GitError::Spawn { command, .. } | GitError::Failed { command, .. } => command,
    }
  }

  pub fn stderr(&self) -> &str {
    match self {
      GitError::Spawn { .. } => "",
      GitError::Failed { stderr, .. } => stderr,
    }
  }
}

impl std::fmt::Display for GitError {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      GitError::Spawn { command, source } => write!(f, "failed to spawn `git {command}`: {source}"),
      GitError::Failed { command, stderr, code } => {
        write!(f, "`git {command}` exited with {}", code.map_or_else(|| "signal".to_string(), |c| c.to_string()))?;
        if !stderr.is_empty() {
          write!(f, ": {stderr}")?;
        }
        Ok(())
      }
    }
  }
}

impl std::error::Error for GitError {
  fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
    match self {
      GitError::Spawn { source, .. } => Some(source),
      GitError::Failed { .. } => None,
    }
  }
}

pub type Result<T> = std::result::Result<T, GitError>;

/// Spawns the git binary for plumbing commands.
///
/// The executable path is discovered once and reused for the life of the
/// process. Output-producing objects may not be valid UTF-8, so the byte
/// variants must be used for anything that touches object bodies.
#[derive(Clone, Debug, Default)]
pub struct GitCommandExecutor {
  info: Arc<OnceLock<GitInfo>>,
}

impl GitCommandExecutor {
  #[must_use]
  pub fn new() -> Self {
    Self { info: Arc::new(OnceLock::new()) }
  }

  pub fn get_info(&self) -> Result<&GitInfo> {
    if let Some(info) = self.info.get() {
      return Ok(info);
    }
    let info = GitInfo::discover().map_err(|e| GitError::Spawn {
      command: "version".to_string(),
      source: std::io::Error::other(e),
    })?;
    tracing::info!(git_version = %info.version, git_path = %info.path, "discovered git info");
    Ok(self.info.get_or_init(|| info))
  }

  fn spawn_error(args: &[&str], source: std::io::Error) -> GitError {
    GitError::Spawn { command: args.join(" "), source }
  }

  fn command(&self, args: &[&str], cwd: &Path, env: &[(&str, &str)]) -> Result<Command> {
    let info = self.get_info()?;
    let mut cmd = Command::new(&info.path);
    cmd.args(args).current_dir(cwd);
    for (key, value) in env {
      cmd.env(key, value);
    }
    Ok(cmd)
  }

  /// Run git and capture output, failing on non-zero exit.
  #[instrument(skip(self, input), fields(git_command = args.join(" ")))]
  fn run_captured(&self, args: &[&str], cwd: &Path, env: &[(&str, &str)], input: Option<&[u8]>) -> Result<Vec<u8>> {
    let (stdout, stderr, code) = self.run_with_status(args, cwd, env, input)?;
    if code == 0 {
      Ok(stdout)
    } else {
      tracing::error!(stderr = %stderr, code, "git command failed");
      Err(GitError::Failed { command: args.join(" "), stderr, code: Some(code) })
    }
  }

  /// Run git and report the exit code instead of failing on it.
  ///
  /// Used for commands where a non-zero exit is part of the protocol:
  /// `merge-file` exits with the number of conflicts, `config --get`
  /// exits 1 when the key is absent.
  pub fn run_with_status(&self, args: &[&str], cwd: &Path, env: &[(&str, &str)], input: Option<&[u8]>) -> Result<(Vec<u8>, String, i32)> {
    let mut cmd = self.command(args, cwd, env)?;
    cmd.stdin(if input.is_some() { Stdio::piped() } else { Stdio::null() });
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());

    let mut child = cmd.spawn().map_err(|e| Self::spawn_error(args, e))?;
    if let Some(bytes) = input
      && let Some(mut stdin) = child.stdin.take()
    {
      stdin.write_all(bytes).map_err(|e| Self::spawn_error(args, e))?;
    }

    let output = child.wait_with_output().map_err(|e| Self::spawn_error(args, e))?;
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    Ok((output.stdout, stderr, output.status.code().unwrap_or(-1)))
  }

  /// Run git with stdio inherited from this process.
  ///
  /// Required for interactive plumbing (`add -p`, `reset --patch`) which
  /// talks to the user's terminal directly.
  #[instrument(skip(self), fields(git_command = args.join(" ")))]
  pub fn execute_interactive(&self, args: &[&str], cwd: &Path, env: &[(&str, &str)]) -> Result<()> {
    let mut cmd = self.command(args, cwd, env)?;
    cmd.stdin(Stdio::inherit()).stdout(Stdio::inherit()).stderr(Stdio::inherit());
    let status = cmd.status().map_err(|e| Self::spawn_error(args, e))?;
    if status.success() {
      Ok(())
    } else {
      Err(GitError::Failed { command: args.join(" "), stderr: String::new(), code: status.code() })
    }
  }

  /// Run git and return trimmed stdout as a string.
  pub fn execute(&self, args: &[&str], cwd: &Path) -> Result<String> {
    let stdout = self.run_captured(args, cwd, &[], None)?;
    Ok(String::from_utf8_lossy(&stdout).trim().to_string())
  }

  /// Run git and return raw stdout bytes, untrimmed.
  pub fn execute_bytes(&self, args: &[&str], cwd: &Path) -> Result<Vec<u8>> {
    self.run_captured(args, cwd, &[], None)
  }

  /// Run git with extra environment variables, returning trimmed stdout.
  pub fn execute_with_env(&self, args: &[&str], cwd: &Path, env: &[(&str, &str)]) -> Result<String> {
    let stdout = self.run_captured(args, cwd, env, None)?;
    Ok(String::from_utf8_lossy(&stdout).trim().to_string())
  }

  /// Run git feeding bytes to stdin, returning raw stdout bytes.
  pub fn execute_with_input(&self, args: &[&str], cwd: &Path, input: &[u8]) -> Result<Vec<u8>> {
    self.run_captured(args, cwd, &[], Some(input))
  }

  /// Run git with env and stdin bytes, returning raw stdout bytes.
  pub fn execute_with_env_input(&self, args: &[&str], cwd: &Path, env: &[(&str, &str)], input: &[u8]) -> Result<Vec<u8>> {
    self.run_captured(args, cwd, env, Some(input))
  }

  /// Run git and split stdout into non-empty trimmed lines.
  pub fn execute_lines(&self, args: &[&str], cwd: &Path) -> Result<Vec<String>> {
    let stdout = self.run_captured(args, cwd, &[], None)?;
    Ok(parse_lines(&stdout))
  }
}

/// Parse output into non-empty trimmed lines.
pub fn parse_lines(output: &[u8]) -> Vec<String> {
  output
    .split(|&b| b == b'\n')
    .filter_map(|line| {
      let line_str = String::from_utf8_lossy(line);
      let trimmed = line_str.trim();
      if !trimmed.is_empty() { Some(trimmed.to_string()) } else { None }
    })
    .collect()
}
