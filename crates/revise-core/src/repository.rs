use crate::error::{Result, RewriteError};
use crate::object::{Commit, Signature, Tree};
use crate::odb::Odb;
use crate::oid::{HashAlgo, Oid};
use git_executor::git_command_executor::GitCommandExecutor;
use std::cell::{Cell, RefCell};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tempfile::TempDir;
use tracing::{debug, instrument, warn};

/// Handle on a git repository: directories, config, refs, idents, scratch
/// space, and the plumbing subprocess layer. Lives for the whole process.
pub struct Repository {
  git: GitCommandExecutor,
  workdir: PathBuf,
  gitdir: PathBuf,
  commondir: PathBuf,
  odb: Odb,
  default_author: Signature,
  default_committer: Signature,
  sign_commits: Cell<bool>,
  scratch: RefCell<Option<TempDir>>,
}

/// A resolved ref name with the target it had when read.
///
/// The stale target doubles as the compare-and-swap expectation when the
/// ref is finally updated.
#[derive(Clone, Debug)]
pub struct CommitRef {
  pub name: String,
  pub target: Option<Oid>,
}

impl Repository {
  /// Open the repository containing `cwd` (or the process cwd).
  pub fn open(cwd: Option<&Path>) -> Result<Self> {
    let git = GitCommandExecutor::new();
    let probe = cwd.map_or_else(|| std::env::current_dir().map_err(RewriteError::from), |p| Ok(p.to_path_buf()))?;

    let workdir = PathBuf::from(git.execute(&["rev-parse", "--show-toplevel"], &probe)?);
    let gitdir = absolute(&workdir, &git.execute(&["rev-parse", "--git-dir"], &workdir)?);
    let commondir = absolute(&workdir, &git.execute(&["rev-parse", "--git-common-dir"], &workdir)?);

    let (stdout, _, code) = git.run_with_status(&["config", "--get", "extensions.objectFormat"], &workdir, &[], None)?;
    let algo = if code == 0 {
      HashAlgo::from_object_format(String::from_utf8_lossy(&stdout).trim())?
    } else {
      HashAlgo::Sha1
    };
    let odb = Odb::open(commondir.join("objects"), algo)?;

    let default_author = Signature::new(git.execute(&["var", "GIT_AUTHOR_IDENT"], &workdir)?.into_bytes());
    let default_committer = Signature::new(git.execute(&["var", "GIT_COMMITTER_IDENT"], &workdir)?.into_bytes());

    let repo = Self {
      git,
      workdir,
      gitdir,
      commondir,
      odb,
      default_author,
      default_committer,
      sign_commits: Cell::new(false),
      scratch: RefCell::new(None),
    };
    let sign = repo.bool_config("revise.gpgSign")?.or(repo.bool_config("commit.gpgSign")?).unwrap_or(false);
    repo.sign_commits.set(sign);
    Ok(repo)
  }

  pub fn odb(&self) -> &Odb {
    &self.odb
  }

  pub fn git(&self) -> &GitCommandExecutor {
    &self.git
  }

  pub fn workdir(&self) -> &Path {
    &self.workdir
  }

  pub fn gitdir(&self) -> &Path {
    &self.gitdir
  }

  /// The shared .git directory when this is a linked worktree.
  pub fn commondir(&self) -> &Path {
    &self.commondir
  }

  pub fn default_author(&self) -> &Signature {
    &self.default_author
  }

  pub fn default_committer(&self) -> &Signature {
    &self.default_committer
  }

  pub fn sign_commits(&self) -> bool {
    self.sign_commits.get()
  }

  pub fn set_sign_commits(&self, sign: bool) {
    self.sign_commits.set(sign);
  }

  /// Read a config value; `None` when the key is unset.
  pub fn config(&self, key: &str) -> Result<Option<String>> {
    let (stdout, _, code) = self.git.run_with_status(&["config", "--get", key], &self.workdir, &[], None)?;
    if code == 0 {
      Ok(Some(String::from_utf8_lossy(&stdout).trim_end_matches('\n').to_string()))
    } else {
      Ok(None)
    }
  }

  pub fn bool_config(&self, key: &str) -> Result<Option<bool>> {
    let (stdout, _, code) = self.git.run_with_status(&["config", "--get", "--bool", key], &self.workdir, &[], None)?;
    if code == 0 {
      Ok(Some(String::from_utf8_lossy(&stdout).trim() == "true"))
    } else {
      Ok(None)
    }
  }

  /// Path to a file inside the .git directory, respecting worktrees.
  pub fn git_path(&self, name: &str) -> Result<PathBuf> {
    let path = self.git.execute(&["rev-parse", "--git-path", name], &self.workdir)?;
    Ok(absolute(&self.workdir, &path))
  }

  /// Per-invocation scratch directory inside the .git dir, removed on drop.
  pub fn scratch_dir(&self) -> Result<PathBuf> {
    let mut scratch = self.scratch.borrow_mut();
    if scratch.is_none() {
      *scratch = Some(tempfile::Builder::new().prefix("revise.").tempdir_in(&self.gitdir)?);
    }
    Ok(scratch.as_ref().expect("just created").path().to_path_buf())
  }

  /// Resolve a ref-ish name to a `CommitRef` with its current target.
  pub fn get_commit_ref(&self, name: &str) -> Result<CommitRef> {
    let full = {
      let (stdout, _, code) = self.git.run_with_status(&["rev-parse", "--symbolic-full-name", name], &self.workdir, &[], None)?;
      let full = String::from_utf8_lossy(&stdout).trim().to_string();
      if code == 0 && !full.is_empty() { full } else { name.to_string() }
    };

    let (stdout, _, code) = self.git.run_with_status(&["rev-parse", "--verify", "--quiet", &format!("{full}^{{commit}}")], &self.workdir, &[], None)?;
    let target = if code == 0 {
      Some(Oid::from_hex(String::from_utf8_lossy(&stdout).trim())?)
    } else {
      None
    };
    Ok(CommitRef { name: full, target })
  }

  /// Compare-and-swap a ref to `new`, with a reflog message.
  ///
  /// The expected old value is the target captured when `reference` was
  /// read; a concurrent update loses the race and surfaces as
  /// `RefUpdateFailed` without any other on-disk change.
  #[instrument(skip(self, reference), fields(name = %reference.name, new = %new))]
  pub fn update_ref(&self, reference: &CommitRef, new: Oid, reason: &str) -> Result<()> {
    let old = reference.target.unwrap_or_else(|| Oid::zero(self.odb.algo()));
    let new_hex = new.to_hex();
    let old_hex = old.to_hex();
    let args = ["update-ref", "-m", reason, &reference.name, &new_hex, &old_hex];
    let (_, stderr, code) = self.git.run_with_status(&args, &self.workdir, &[], None)?;
    if code != 0 {
      return Err(RewriteError::RefUpdateFailed { name: reference.name.clone(), reason: stderr });
    }
    Ok(())
  }

  /// Build a commit object in memory, signing it when enabled.
  ///
  /// Returns the new oid; nothing is written to disk until flush.
  pub fn new_commit(&self, tree: Oid, parents: Vec<Oid>, message: Vec<u8>, author: Option<Signature>, extra_headers: Vec<(Vec<u8>, Vec<u8>)>) -> Result<Oid> {
    let mut commit = Commit {
      tree,
      parents,
      author: author.unwrap_or_else(|| self.default_author.clone()),
      committer: self.default_committer.clone(),
      gpgsig: None,
      extra_headers,
      message,
    };
    if self.sign_commits.get() {
      commit.gpgsig = Some(self.sign_buffer(&commit.serialize_unsigned())?);
    }
    Ok(self.odb.new_commit(&commit))
  }

  pub fn new_tree(&self, tree: &Tree) -> Oid {
    self.odb.new_tree(tree)
  }

  /// Derive a commit from `original` with specific fields replaced.
  ///
  /// When nothing observable changes (and `recommit` is false) the
  /// original oid is returned so an untouched commit is never re-created
  /// just because the committer would differ.
  pub fn update_commit(&self, original: Oid, tree: Option<Oid>, parents: Option<Vec<Oid>>, message: Option<Vec<u8>>, author: Option<Signature>, recommit: bool) -> Result<Oid> {
    let commit = self.odb.get_commit(original)?;
    let tree = tree.unwrap_or(commit.tree);
    let parents = parents.unwrap_or_else(|| commit.parents.clone());
    let message = message.unwrap_or_else(|| commit.message.clone());
    let author = author.unwrap_or_else(|| commit.author.clone());

    let unchanged = tree == commit.tree && parents == commit.parents && message == commit.message && author == commit.author;
    if unchanged && !recommit {
      return Ok(original);
    }
    self.new_commit(tree, parents, message, Some(author), commit.extra_headers.clone())
  }

  /// Tree currently staged in the index (honors `GIT_INDEX_FILE`).
  pub fn index_tree(&self) -> Result<Oid> {
    let hex = self.git.execute(&["write-tree"], &self.workdir)?;
    Oid::from_hex(&hex)
  }

  /// Three-way blob merge via `git merge-file`.
  ///
  /// Returns `(clean, merged_bytes)`; a conflicted merge still produces
  /// marker-bearing output. The labels name the commits being combined so
  /// the user can see which patch failed, not just a file path.
  pub fn merge_file(&self, labels: (&str, &str, &str), current: &[u8], base: &[u8], other: &[u8]) -> Result<(bool, Vec<u8>)> {
    let dir = self.scratch_dir()?;
    let current_path = dir.join("current");
    let base_path = dir.join("base");
    let other_path = dir.join("other");
    fs::write(&current_path, current)?;
    fs::write(&base_path, base)?;
    fs::write(&other_path, other)?;

    let label_args = [format!("-L{}", labels.0), format!("-L{}", labels.1), format!("-L{}", labels.2)];
    let args = [
      "merge-file",
      "-q",
      "-p",
      &label_args[0],
      &label_args[1],
      &label_args[2],
      current_path.to_str().expect("scratch path is utf-8"),
      base_path.to_str().expect("scratch path is utf-8"),
      other_path.to_str().expect("scratch path is utf-8"),
    ];
    let (stdout, stderr, code) = self.git.run_with_status(&args, &self.workdir, &[], None)?;
    match code {
      0 => Ok((true, stdout)),
      // Positive exit is the number of conflicts found.
      1..=127 => Ok((false, stdout)),
      _ => Err(RewriteError::VcsFailed { command: "merge-file".into(), stderr }),
    }
  }

  /// Unified diff between two trees, as raw patch bytes.
  pub fn diff_tree_patch(&self, old_tree: Oid, new_tree: Oid) -> Result<Vec<u8>> {
    self.odb.flush(old_tree)?;
    self.odb.flush(new_tree)?;
    let old_hex = old_tree.to_hex();
    let new_hex = new_tree.to_hex();
    Ok(self.git.execute_bytes(&["diff-tree", "-p", &old_hex, &new_hex], &self.workdir)?)
  }

  /// `diff-tree --stat` text used in commit-message editor comments.
  pub fn diff_tree_stat(&self, old_tree: Oid, new_tree: Oid) -> Result<String> {
    self.odb.flush(old_tree)?;
    self.odb.flush(new_tree)?;
    let old_hex = old_tree.to_hex();
    let new_hex = new_tree.to_hex();
    Ok(self.git.execute(&["diff-tree", "--stat", &old_hex, &new_hex], &self.workdir)?)
  }

  /// Sign a commit pre-image, returning the `gpgsig` header value.
  pub fn sign_buffer(&self, buffer: &[u8]) -> Result<Vec<u8>> {
    let key = match self.config("user.signingKey")? {
      Some(key) => key,
      None => String::from_utf8_lossy(self.default_committer.signing_key().unwrap_or_default()).to_string(),
    };
    match self.config("gpg.format")?.as_deref() {
      None | Some("openpgp") => self.sign_with_gpg(&key, buffer),
      Some("ssh") => self.sign_with_ssh(&key, buffer),
      Some(other) => Err(RewriteError::SignFailed(format!("unsupported gpg.format '{other}'"))),
    }
  }

  fn sign_with_gpg(&self, key: &str, buffer: &[u8]) -> Result<Vec<u8>> {
    let program = self.config("gpg.program")?.unwrap_or_else(|| "gpg".to_string());
    let mut child = Command::new(&program)
      .args(["--status-fd=2", "-bsau", key])
      .stdin(Stdio::piped())
      .stdout(Stdio::piped())
      .stderr(Stdio::piped())
      .spawn()
      .map_err(|e| RewriteError::SignFailed(format!("failed to spawn {program}: {e}")))?;
    use std::io::Write;
    child.stdin.take().expect("stdin piped").write_all(buffer)?;
    let output = child.wait_with_output()?;

    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    if !output.status.success() || !stderr.contains("[GNUPG:] SIG_CREATED ") {
      return Err(RewriteError::SignFailed(stderr));
    }
    Ok(trim_trailing_newlines(output.stdout))
  }

  fn sign_with_ssh(&self, key: &str, buffer: &[u8]) -> Result<Vec<u8>> {
    let program = self.config("gpg.ssh.program")?.unwrap_or_else(|| "ssh-keygen".to_string());
    let dir = self.scratch_dir()?;

    // user.signingKey is either a path or a literal public key
    let key_path = if key.starts_with("ssh-") || key.starts_with("sk-") || key.starts_with("ecdsa-") {
      let path = dir.join("signing_key.pub");
      fs::write(&path, format!("{key}\n"))?;
      path
    } else {
      PathBuf::from(key)
    };

    let payload = dir.join("sign_payload");
    fs::write(&payload, buffer)?;
    let output = Command::new(&program)
      .args(["-Y", "sign", "-n", "git", "-f"])
      .arg(&key_path)
      .arg(&payload)
      .stdout(Stdio::piped())
      .stderr(Stdio::piped())
      .output()
      .map_err(|e| RewriteError::SignFailed(format!("failed to spawn {program}: {e}")))?;
    if !output.status.success() {
      return Err(RewriteError::SignFailed(String::from_utf8_lossy(&output.stderr).to_string()));
    }
    let signature = fs::read(payload.with_extension("sig"))?;
    Ok(trim_trailing_newlines(signature))
  }

  /// Run the commit-msg hook on a message when enabled by config.
  ///
  /// The hook may rewrite the file; the possibly-updated bytes are
  /// returned. A non-zero hook exit rejects the message.
  pub fn run_commit_msg_hook(&self, message: Vec<u8>) -> Result<Vec<u8>> {
    if !self.bool_config("revise.run-hooks.commit-msg")?.unwrap_or(false) {
      return Ok(message);
    }
    let hook = self.git_path("hooks/commit-msg")?;
    if !hook.exists() {
      return Ok(message);
    }

    let msg_path = self.scratch_dir()?.join("COMMIT_MSG");
    fs::write(&msg_path, &message)?;
    debug!(hook = %hook.display(), "running commit-msg hook");
    let status = Command::new("/bin/sh")
      .arg("-ec")
      .arg(format!("{} \"$@\"", hook.display()))
      .arg(hook.as_os_str())
      .arg(&msg_path)
      .current_dir(&self.workdir)
      .status()?;
    if !status.success() {
      return Err(RewriteError::HookDeclined(String::from_utf8_lossy(&message).lines().next().unwrap_or("").to_string()));
    }
    Ok(fs::read(&msg_path)?)
  }

  /// Warn when the rewritten head's tree is not what the caller expected.
  pub fn check_final_tree(&self, new_head: Oid, expected_tree: Oid) -> Result<()> {
    let actual = self.odb.get_commit(new_head)?.tree;
    if actual != expected_tree {
      warn!(expected = %expected_tree, actual = %actual, "unexpected final tree; working directory and index were not updated");
    }
    Ok(())
  }
}

fn absolute(base: &Path, path: &str) -> PathBuf {
  let p = PathBuf::from(path);
  if p.is_absolute() { p } else { base.join(p) }
}

fn trim_trailing_newlines(mut bytes: Vec<u8>) -> Vec<u8> {
  while bytes.last() == Some(&b'\n') {
    bytes.pop();
  }
  bytes
}
