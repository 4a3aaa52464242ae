use git_executor::git_command_executor::GitError;
use thiserror::Error;

/// Everything that can go wrong while rewriting history.
///
/// Most variants are fatal and unwind to the CLI without any on-disk ref
/// change; `UserAbort` exits quietly and `VcsFailed` maps to exit code 128.
#[derive(Debug, Error)]
pub enum RewriteError {
  #[error("corrupt object {oid}: {reason}")]
  CorruptObject { oid: String, reason: String },

  #[error("object {0} does not exist")]
  MissingObject(String),

  #[error("abbreviation {0} matches more than one object")]
  AmbiguousOid(String),

  #[error("cannot parse revision '{0}'")]
  BadRevision(String),

  #[error("commit {0} is a merge; merge commits cannot be rewritten")]
  MergeInRange(String),

  #[error("conflict for '{0}' was not resolved")]
  UnresolvedConflict(String),

  #[error("aborted")]
  UserAbort,

  #[error("git {command} failed: {stderr}")]
  VcsFailed { command: String, stderr: String },

  #[error("failed to update ref {name}: {reason}")]
  RefUpdateFailed { name: String, reason: String },

  #[error("invalid todo list: {0}")]
  TodoInvalid(String),

  #[error("commit-msg hook declined the message: {0}")]
  HookDeclined(String),

  #[error("unable to sign object: {0}")]
  SignFailed(String),

  #[error("{0}")]
  Invalid(String),

  #[error(transparent)]
  Io(#[from] std::io::Error),
}

impl From<GitError> for RewriteError {
  fn from(err: GitError) -> Self {
    match err {
      GitError::Spawn { command, source } => RewriteError::VcsFailed { command, stderr: source.to_string() },
      GitError::Failed { command, stderr, .. } => RewriteError::VcsFailed { command, stderr },
    }
  }
}

pub type Result<T> = std::result::Result<T, RewriteError>;
