use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

/// Git test repository wrapper with helper methods
pub struct TestRepo {
  dir: TempDir,
}

impl Default for TestRepo {
  fn default() -> Self {
    Self::new()
  }
}

impl TestRepo {
  /// Creates a new test repository with a deterministic identity
  pub fn new() -> Self {
    let dir = tempfile::tempdir().unwrap();
    let repo = Self { dir };

    repo.git(&["init", "-q", "-b", "main"]);
    repo.git(&["config", "user.name", "Test User"]);
    repo.git(&["config", "user.email", "test@example.com"]);
    // Keep commits reproducible across the test run
    repo.git(&["config", "commit.gpgsign", "false"]);
    repo
  }

  /// Get the repository path
  pub fn path(&self) -> &Path {
    self.dir.path()
  }

  /// Run git in the repository, panicking on failure
  pub fn git(&self, args: &[&str]) -> String {
    let output = Command::new("git").arg("--no-pager").args(args).current_dir(self.path()).output().unwrap();
    if !output.status.success() {
      panic!("git {args:?} failed: {}", String::from_utf8_lossy(&output.stderr));
    }
    String::from_utf8_lossy(&output.stdout).trim().to_string()
  }

  /// Write a file and stage it, without committing
  pub fn stage(&self, filename: &str, content: &str) {
    let file_path = self.path().join(filename);
    if let Some(parent) = file_path.parent() {
      fs::create_dir_all(parent).unwrap();
    }
    fs::write(&file_path, content).unwrap();
    self.git(&["add", filename]);
  }

  /// Creates a commit with a file, returning the commit hash
  pub fn create_commit(&self, message: &str, filename: &str, content: &str) -> String {
    self.stage(filename, content);
    self.git(&["commit", "-q", "-m", message]);
    self.head()
  }

  /// Creates a commit touching multiple files, returning the commit hash
  pub fn create_commit_with_files(&self, message: &str, files: &[(&str, &str)]) -> String {
    for (filename, content) in files {
      self.stage(filename, content);
    }
    self.git(&["commit", "-q", "-m", message]);
    self.head()
  }

  pub fn set_config(&self, key: &str, value: &str) {
    self.git(&["config", key, value]);
  }

  /// Get the current HEAD commit hash
  pub fn head(&self) -> String {
    self.git(&["rev-parse", "HEAD"])
  }

  /// Get the commit hash of a reference
  pub fn rev_parse(&self, ref_name: &str) -> String {
    self.git(&["rev-parse", ref_name])
  }

  /// Commit subjects, newest first
  pub fn log_subjects(&self) -> Vec<String> {
    self.git(&["log", "--pretty=%s"]).lines().map(str::to_string).collect()
  }

  /// File content at a revision
  pub fn file_at(&self, revision: &str, filename: &str) -> String {
    self.git(&["show", &format!("{revision}:{filename}")])
  }

  /// Install a shell script usable as an editor and return its path.
  ///
  /// The script receives the file to edit as `$1`.
  pub fn install_editor(&self, name: &str, body: &str) -> PathBuf {
    let path = self.path().join(name);
    fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    #[cfg(unix)]
    {
      use std::os::unix::fs::PermissionsExt;
      fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    }
    path
  }
}
