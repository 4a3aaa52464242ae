use crate::editor::{comment_char, run_editor, run_sequence_editor};
use crate::error::{Result, RewriteError};
use crate::oid::Oid;
use crate::prompt::prompt;
use crate::repository::Repository;
use std::collections::HashSet;
use tracing::debug;

/// A todo command.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StepKind {
  Pick,
  Fixup,
  Squash,
  Reword,
  Cut,
  Index,
}

impl StepKind {
  /// Parse a command word, accepting unambiguous prefixes (`p`, `fix`, …).
  pub fn parse(word: &str) -> Result<Self> {
    if !word.is_empty() {
      for (name, kind) in [
        ("pick", StepKind::Pick),
        ("fixup", StepKind::Fixup),
        ("squash", StepKind::Squash),
        ("reword", StepKind::Reword),
        ("cut", StepKind::Cut),
        ("index", StepKind::Index),
      ] {
        if name.starts_with(word) {
          return Ok(kind);
        }
      }
    }
    Err(RewriteError::TodoInvalid(format!("step kind '{word}' must be one of: pick, fixup, squash, reword, cut, or index")))
  }

  pub fn as_str(self) -> &'static str {
    match self {
      StepKind::Pick => "pick",
      StepKind::Fixup => "fixup",
      StepKind::Squash => "squash",
      StepKind::Reword => "reword",
      StepKind::Cut => "cut",
      StepKind::Index => "index",
    }
  }
}

impl std::fmt::Display for StepKind {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.as_str())
  }
}

/// One step of the todo program.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Step {
  pub kind: StepKind,
  pub commit: Oid,
  /// Replacement message captured in `--edit` mode.
  pub message: Option<Vec<u8>>,
}

impl Step {
  pub fn new(kind: StepKind, commit: Oid) -> Self {
    Self { kind, commit, message: None }
  }

  fn parse(repo: &Repository, line: &str) -> Result<Self> {
    let mut words = line.split_whitespace();
    let (Some(command), Some(hash)) = (words.next(), words.next()) else {
      return Err(RewriteError::TodoInvalid(format!("todo entry '{line}' must follow format <keyword> <sha> <optional message>")));
    };
    let kind = StepKind::parse(command)?;
    let oid = resolve_todo_commit(repo, hash)?;
    Ok(Step::new(kind, oid))
  }
}

fn resolve_todo_commit(repo: &Repository, hash: &str) -> Result<Oid> {
  let odb = repo.odb();
  let oid = if hash.len() == odb.algo().oid_len() * 2 {
    Oid::from_hex(hash).map_err(|_| RewriteError::TodoInvalid(format!("cannot resolve '{hash}'")))?
  } else {
    odb.resolve_abbrev(hash).map_err(|e| match e {
      RewriteError::AmbiguousOid(_) => e,
      _ => RewriteError::TodoInvalid(format!("cannot resolve '{hash}'")),
    })?
  };
  odb.get_commit(oid).map_err(|_| RewriteError::TodoInvalid(format!("'{hash}' is not a commit")))?;
  Ok(oid)
}

/// Initial todo program: pick everything, then an optional index step for
/// content that should stay staged rather than committed.
pub fn build_todos(commits: &[Oid], index: Option<Oid>) -> Vec<Step> {
  let mut steps: Vec<Step> = commits.iter().map(|&oid| Step::new(StepKind::Pick, oid)).collect();
  if let Some(index) = index {
    steps.push(Step::new(StepKind::Index, index));
  }
  steps
}

/// Reject todo lists that cannot be executed.
///
/// The edited list must reference exactly the original commits, with no
/// duplicates, `index` steps only at the tail, and something to squash
/// into before any fixup/squash step.
pub fn validate_todos(old: &[Step], new: &[Step]) -> Result<()> {
  let old_set: HashSet<Oid> = old.iter().map(|s| s.commit).collect();
  let new_set: HashSet<Oid> = new.iter().map(|s| s.commit).collect();
  debug_assert_eq!(old_set.len(), old.len(), "original todo list contains duplicates");

  if new_set.len() != new.len() {
    return Err(RewriteError::TodoInvalid("duplicate commit found in todo list".into()));
  }
  if new_set.difference(&old_set).next().is_some() {
    return Err(RewriteError::TodoInvalid("todo list references commits outside the original list".into()));
  }
  if old_set.difference(&new_set).next().is_some() {
    return Err(RewriteError::TodoInvalid("commits missing from todo list; delete is not supported, use cut or drop the rewrite".into()));
  }

  let mut saw_index = false;
  for step in new {
    if step.kind == StepKind::Index {
      saw_index = true;
    } else if saw_index {
      return Err(RewriteError::TodoInvalid("'index' steps must come after all other steps".into()));
    }
  }

  if let Some(first) = new.iter().find(|s| s.kind != StepKind::Index)
    && matches!(first.kind, StepKind::Fixup | StepKind::Squash)
  {
    return Err(RewriteError::TodoInvalid(format!("cannot {} as the first step: there is nothing to combine into", first.kind)));
  }
  Ok(())
}

/// Move `fixup!`/`squash!` commits directly after their targets.
///
/// Targets are located by subject prefix among the commits already seen in
/// the list; chains (`fixup!` of a `fixup!`) follow their transitive
/// target, and fixups of the same target keep their relative order. A
/// target outside the rewrite range is an error rather than a silent pick.
pub fn autosquash_todos(repo: &Repository, todos: &[Step]) -> Result<Vec<Step>> {
  let mut groups: Vec<(String, Vec<Step>)> = Vec::new();

  for step in todos {
    let summary = repo.odb().get_commit(step.commit)?.summary();
    let mut needle = summary.as_str();
    while let Some(rest) = needle.strip_prefix("fixup! ").or_else(|| needle.strip_prefix("squash! ")) {
      needle = rest.trim_start();
    }

    if needle != summary {
      let kind = if summary.starts_with("fixup!") { StepKind::Fixup } else { StepKind::Squash };
      let new_step = Step { kind, commit: step.commit, message: step.message.clone() };
      match groups.iter_mut().find(|(leader, _)| leader.starts_with(needle)) {
        Some((_, group)) => {
          debug!(commit = %step.commit.short(), target = needle, "autosquash moved commit after its target");
          group.push(new_step);
          continue;
        }
        None => {
          return Err(RewriteError::TodoInvalid(format!("target of '{summary}' is not in the range being rewritten")));
        }
      }
    }
    groups.push((summary, vec![step.clone()]));
  }

  Ok(groups.into_iter().flat_map(|(_, group)| group).collect())
}

fn plain_comments(count: usize) -> String {
  format!(
    "Interactive Revise Todos ({count} commands)\n\
     \n\
     Commands:\n \
     p, pick <commit> = use commit\n \
     r, reword <commit> = use commit, but edit the commit message\n \
     s, squash <commit> = use commit, but meld into previous commit\n \
     f, fixup <commit> = like squash, but discard this commit's log message\n \
     c, cut <commit> = interactively split commit into two smaller commits\n \
     i, index <commit> = leave commit changes staged, but uncommitted\n\
     \n\
     These lines are executed from top to bottom. They can be re-ordered and\n\
     their commands can be changed, however the number of lines must remain\n\
     identical. If present, index lines must be at the bottom of the list,\n\
     i.e. they can not be followed by non-index lines.\n\
     \n\
     If you remove everything, the revising process will be aborted."
  )
}

fn msgedit_comments(count: usize) -> String {
  format!(
    "Interactive Revise Todos ({count} commands)\n\
     \n\
     Commands:\n \
     p, pick <commit> = use commit\n \
     r, reword <commit> = use commit, but edit the commit message\n \
     s, squash <commit> = use commit, but meld into previous commit\n \
     f, fixup <commit> = like squash, but discard this commit's message\n \
     c, cut <commit> = interactively split commit into two smaller commits\n \
     i, index <commit> = leave commit changes staged, but uncommitted\n\
     \n\
     Each command block is prefixed by a '++' marker, followed by the command to\n\
     run, the commit hash and after a newline the complete commit message until\n\
     the next '++' marker or the end of the file.\n\
     \n\
     Commit messages will be reworded to match the provided message before the\n\
     command is performed.\n\
     \n\
     These blocks are executed from top to bottom. They can be re-ordered and\n\
     their commands can be changed, however the number of blocks must remain\n\
     identical. If present, index blocks must be at the bottom of the list,\n\
     i.e. they can not be followed by non-index blocks.\n\
     \n\
     If you remove everything, the revising process will be aborted."
  )
}

/// Serialize todos the way the editor presents them.
pub fn serialize_todos(repo: &Repository, todos: &[Step], msgedit: bool) -> Result<Vec<u8>> {
  let mut out = Vec::new();
  for step in todos {
    let commit = repo.odb().get_commit(step.commit)?;
    if msgedit {
      out.extend_from_slice(format!("++ {} {}\n", step.kind, step.commit.short()).as_bytes());
      out.extend_from_slice(&commit.message);
      if !commit.message.ends_with(b"\n") {
        out.push(b'\n');
      }
    } else {
      out.extend_from_slice(format!("{} {} {}\n", step.kind, step.commit.short(), commit.summary()).as_bytes());
    }
  }
  Ok(out)
}

/// Parse an edited todo file back into steps.
pub fn parse_todos(repo: &Repository, text: &[u8], comment: u8, msgedit: bool) -> Result<Vec<Step>> {
  let mut result = Vec::new();
  if msgedit {
    let mut current: Option<Step> = None;
    let mut message = Vec::new();
    for line in text.split_inclusive(|&b| b == b'\n') {
      if line.starts_with(b"++ ") {
        if let Some(mut step) = current.take() {
          step.message = Some(finish_message(std::mem::take(&mut message)));
          result.push(step);
        }
        let header = String::from_utf8_lossy(&line[3..]);
        current = Some(Step::parse(repo, header.trim())?);
      } else if current.is_some() {
        message.extend_from_slice(line);
      } else if !line.trim_ascii().is_empty() && line.first() != Some(&comment) {
        return Err(RewriteError::TodoInvalid("expected '++ <command> <hash>' block".into()));
      }
    }
    if let Some(mut step) = current.take() {
      step.message = Some(finish_message(message));
      result.push(step);
    }
  } else {
    for line in text.split(|&b| b == b'\n') {
      let line = String::from_utf8_lossy(line);
      let trimmed = line.trim();
      if trimmed.is_empty() || trimmed.as_bytes()[0] == comment {
        continue;
      }
      result.push(Step::parse(repo, trimmed)?);
    }
  }
  Ok(result)
}

fn finish_message(raw: Vec<u8>) -> Vec<u8> {
  let mut message = raw.trim_ascii().to_vec();
  message.push(b'\n');
  message
}

/// Round-trip the todo list through the user's editor, re-prompting on
/// semantic errors so a typo does not throw away the whole edit.
pub fn edit_todos(repo: &Repository, todos: &[Step], msgedit: bool) -> Result<Vec<Step>> {
  let mut text = serialize_todos(repo, todos, msgedit)?;
  let comments = if msgedit { msgedit_comments(todos.len()) } else { plain_comments(todos.len()) };

  loop {
    let response = if msgedit {
      run_editor(repo, "revise-todo", &text, Some(&comments))?
    } else {
      run_sequence_editor(repo, "revise-todo", &text, Some(&comments))?
    };
    if response.is_empty() {
      return Err(RewriteError::UserAbort);
    }

    let comment = comment_char(repo, &response)?;
    match parse_todos(repo, &response, comment, msgedit).and_then(|new| validate_todos(todos, &new).map(|()| new)) {
      Ok(new) => return Ok(new),
      Err(err @ RewriteError::TodoInvalid(_)) => {
        eprintln!("error: {err}");
        if prompt("Edit the todo list again? (Y/n) ")?.eq_ignore_ascii_case("n") {
          return Err(err);
        }
        text = response;
      }
      Err(err) => return Err(err),
    }
  }
}
