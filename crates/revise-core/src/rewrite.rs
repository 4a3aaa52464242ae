//! The history rewrite engine.
//!
//! Replays a range of commits onto rewritten parents, one todo step at a
//! time. All intermediate objects stay in memory; the batch is flushed and
//! the target ref updated only once the final head commit is known, so an
//! aborted rewrite leaves the repository untouched apart from rerere
//! entries and garbage-collectable scratch objects.

use crate::editor::{comment_char, run_editor};
use crate::error::{Result, RewriteError};
use crate::merge;
use crate::object::Commit;
use crate::oid::Oid;
use crate::repository::{CommitRef, Repository};
use crate::revparse;
use crate::todo::{self, Step, StepKind};
use std::collections::HashSet;
use tracing::{debug, info, instrument};

/// Everything the CLI hands to the engine.
#[derive(Clone, Debug, Default)]
pub struct RewriteOptions {
  pub target: Option<String>,
  pub root: bool,
  pub ref_name: String,
  pub reauthor: bool,
  pub edit: bool,
  pub interactive: bool,
  /// `--autosquash` / `--no-autosquash`; `None` falls back to config.
  pub autosquash: Option<bool>,
  pub cut: bool,
  pub messages: Vec<String>,
  pub stage_all: bool,
  pub stage_patch: bool,
  pub no_index: bool,
  /// `-S` / `--no-gpg-sign`; `None` falls back to config.
  pub sign: Option<bool>,
}

/// Entry point: stage, pick the mode, rewrite, update the ref.
#[instrument(skip(repo, opts), fields(target_commit = opts.target.as_deref().unwrap_or("HEAD"), updated_ref = %opts.ref_name))]
pub fn run(repo: &Repository, opts: &RewriteOptions) -> Result<()> {
  if opts.stage_all {
    repo.git().execute(&["add", "-u"], repo.workdir())?;
  }
  if opts.stage_patch {
    repo.git().execute_interactive(&["add", "-p"], repo.workdir(), &[])?;
  }
  if let Some(sign) = opts.sign {
    repo.set_sign_commits(sign);
  }

  let head = repo.get_commit_ref(&opts.ref_name)?;
  let head_oid = head.target.ok_or_else(|| RewriteError::Invalid(format!("head reference '{}' not found", opts.ref_name)))?;

  // Capture the staged content as a throwaway commit on top of HEAD.
  let staged = if opts.no_index { None } else { staged_commit(repo)? };

  if opts.interactive || opts.autosquash == Some(true) {
    interactive(repo, opts, staged, &head, head_oid)
  } else {
    noninteractive(repo, opts, staged, &head, head_oid)
  }
}

/// Commit the current index on top of HEAD, or `None` when it matches.
fn staged_commit(repo: &Repository) -> Result<Option<Oid>> {
  let head = repo.get_commit_ref("HEAD")?;
  let Some(head_oid) = head.target else {
    return Ok(None); // unborn branch, nothing staged against it
  };
  let staged_tree = repo.index_tree()?;
  if staged_tree == repo.odb().get_commit(head_oid)?.tree {
    return Ok(None);
  }
  debug!(%staged_tree, "captured staged changes");
  Ok(Some(repo.new_commit(staged_tree, vec![head_oid], b"<git index>".to_vec(), None, Vec::new())?))
}

fn autosquash_enabled(repo: &Repository, opts: &RewriteOptions) -> Result<bool> {
  if let Some(flag) = opts.autosquash {
    return Ok(flag);
  }
  if let Some(set) = repo.bool_config("revise.autoSquash")? {
    return Ok(set);
  }
  Ok(repo.bool_config("rebase.autoSquash")?.unwrap_or(false))
}

fn interactive(repo: &Repository, opts: &RewriteOptions, staged: Option<Oid>, head: &CommitRef, head_oid: Oid) -> Result<()> {
  let (base, to_rebase) = if opts.root {
    (None, commit_range(repo, None, head_oid)?)
  } else if let Some(target) = &opts.target {
    let base = revparse::resolve_commit(repo, target)?;
    (Some(base), commit_range(repo, Some(base), head_oid)?)
  } else {
    local_commits(repo, head_oid)?
  };

  let original = todo::build_todos(&to_rebase, staged);
  let mut todos = original.clone();
  if autosquash_enabled(repo, opts)? {
    todos = todo::autosquash_todos(repo, &todos)?;
  }
  if opts.interactive {
    todos = todo::edit_todos(repo, &todos, opts.edit)?;
  }

  if todos == original {
    eprintln!("(warning) no changes performed");
    return Ok(());
  }

  let (new_head, index_tree) = apply_todos(repo, base, &original, &todos, opts.reauthor)?;
  update_head(repo, head, head_oid, new_head, None, index_tree)
}

fn noninteractive(repo: &Repository, opts: &RewriteOptions, staged: Option<Oid>, head: &CommitRef, head_oid: Oid) -> Result<()> {
  if opts.root {
    return Err(RewriteError::Invalid("--root may only be used with --autosquash or --interactive".into()));
  }
  let target = opts.target.as_deref().ok_or_else(|| RewriteError::Invalid("<target> is a required argument".into()))?;

  let replaced = revparse::resolve_commit(repo, target)?;
  let mut current = replaced;
  let to_rebase = commit_range(repo, Some(current), head_oid)?;

  // Splice the staged changes into the target commit.
  let mut final_tree = repo.odb().get_commit(head_oid)?.tree;
  if let Some(staged) = staged {
    info!(target_commit = target, "applying staged changes");
    let staged_on_target = merge::rebase(repo, staged, Some(current), None)?;
    let tree = repo.odb().get_commit(staged_on_target)?.tree;
    current = repo.update_commit(current, Some(tree), None, None, None, false)?;
    final_tree = repo.odb().get_commit(merge::rebase(repo, staged, Some(head_oid), None)?)?.tree;
  }

  if !opts.messages.is_empty() {
    let mut message = Vec::new();
    for paragraph in &opts.messages {
      if !message.is_empty() {
        message.push(b'\n');
      }
      message.extend_from_slice(paragraph.as_bytes());
      message.push(b'\n');
    }
    let message = repo.run_commit_msg_hook(message)?;
    current = repo.update_commit(current, None, None, Some(message), None, false)?;
  }

  if opts.edit {
    current = edit_commit_message(repo, current)?;
  }
  if opts.reauthor {
    current = repo.update_commit(current, None, None, None, Some(repo.default_author().clone()), false)?;
  }
  if opts.cut {
    current = cut_commit(repo, current)?;
  }

  // Re-commit when the signing state no longer matches configuration.
  let sign = repo.sign_commits();
  if sign != repo.odb().get_commit(current)?.gpgsig.is_some() {
    current = repo.update_commit(current, None, None, None, None, true)?;
  }
  let mut change_signature = false;
  for &oid in &to_rebase {
    if sign != repo.odb().get_commit(oid)?.gpgsig.is_some() {
      change_signature = true;
    }
  }

  if current == replaced && !change_signature {
    eprintln!("(warning) no changes performed");
    return Ok(());
  }

  print_step("pick", current, &repo.odb().get_commit(current)?);
  for &oid in &to_rebase {
    let mut commit_oid = oid;
    if sign != repo.odb().get_commit(commit_oid)?.gpgsig.is_some() {
      commit_oid = repo.update_commit(commit_oid, None, None, None, None, true)?;
    }
    current = merge::rebase(repo, commit_oid, Some(current), None)?;
    print_step("pick", current, &repo.odb().get_commit(current)?);
  }

  update_head(repo, head, head_oid, current, Some(final_tree), None)
}

/// First-parent chain from `tip` back to (exclusive) `base`, oldest first.
///
/// Any merge commit inside the range is fatal; this engine only rewrites
/// linear history.
pub fn commit_range(repo: &Repository, base: Option<Oid>, tip: Oid) -> Result<Vec<Oid>> {
  let mut commits = Vec::new();
  let mut cursor = tip;
  loop {
    if Some(cursor) == base {
      break;
    }
    let commit = repo.odb().get_commit(cursor)?;
    if commit.parents.len() > 1 {
      return Err(RewriteError::MergeInRange(cursor.short()));
    }
    commits.push(cursor);
    match commit.parents.first() {
      Some(&parent) => cursor = parent,
      None if base.is_none() => break,
      None => return Err(RewriteError::BadRevision("target is not an ancestor of the rewritten ref".into())),
    }
  }
  commits.reverse();
  Ok(commits)
}

/// Commits on `tip` that no remote ref can reach, plus the base under them.
///
/// The walk stops early at merges or history shared with a remote, so an
/// interactive session without a target only ever touches unpublished
/// linear commits.
pub fn local_commits(repo: &Repository, tip: Oid) -> Result<(Option<Oid>, Vec<Oid>)> {
  let tip_hex = tip.to_hex();
  let log = repo.git().execute_lines(&["log", &tip_hex, "--not", "--remotes", "--pretty=%H"], repo.workdir())?;

  let mut base = tip;
  let mut commits = Vec::new();
  for line in log {
    let oid = Oid::from_hex(&line)?;
    let commit = repo.odb().get_commit(oid)?;
    if commit.parents.len() != 1 || oid != base {
      break;
    }
    base = commit.parents[0];
    commits.push(oid);
  }
  commits.reverse();
  Ok((Some(base), commits))
}

/// Execute an edited todo list on top of `base`.
///
/// Returns the new head plus the tree an `index` step wants written back
/// to the index file. Zipping the edited list against the original lets a
/// pure reorder reuse the known final tree once the same set of commits
/// has been applied, sparing the user a re-resolution of conflicts.
pub fn apply_todos(repo: &Repository, base: Option<Oid>, original: &[Step], edited: &[Step], reauthor: bool) -> Result<(Oid, Option<Oid>)> {
  let mut current = base;
  let mut applied_old: HashSet<Oid> = HashSet::new();
  let mut applied_new: HashSet<Oid> = HashSet::new();
  let mut index_tree = None;

  for (known_state, step) in original.iter().zip(edited) {
    applied_old.insert(known_state.commit);
    applied_new.insert(step.commit);
    let deja_vu = applied_old == applied_new;
    let tree_to_keep = if deja_vu { Some(repo.odb().get_commit(known_state.commit)?.tree) } else { None };

    let mut rebased = merge::rebase(repo, step.commit, current, tree_to_keep)?;
    if let Some(message) = &step.message {
      rebased = repo.update_commit(rebased, None, None, Some(message.clone()), None, false)?;
    }

    let next = match step.kind {
      StepKind::Pick => rebased,
      StepKind::Fixup => {
        let head = current.ok_or_else(|| RewriteError::TodoInvalid("cannot apply fixup as the first commit".into()))?;
        let tree = repo.odb().get_commit(rebased)?.tree;
        repo.update_commit(head, Some(tree), None, None, None, false)?
      }
      StepKind::Squash => {
        let head = current.ok_or_else(|| RewriteError::TodoInvalid("cannot apply squash as the first commit".into()))?;
        let fused = fuse_messages(repo, &repo.odb().get_commit(head)?, &repo.odb().get_commit(rebased)?)?;
        let tree = repo.odb().get_commit(rebased)?.tree;
        let combined = repo.update_commit(head, Some(tree), None, Some(fused), None, false)?;
        edit_commit_message(repo, combined)?
      }
      StepKind::Reword => edit_commit_message(repo, rebased)?,
      StepKind::Cut => cut_commit(repo, rebased)?,
      StepKind::Index => {
        // Tail only (validated): the content stays staged, not committed.
        index_tree = Some(repo.odb().get_commit(rebased)?.tree);
        break;
      }
    };

    let next = if reauthor {
      repo.update_commit(next, None, None, None, Some(repo.default_author().clone()), false)?
    } else {
      next
    };
    current = Some(next);
    print_step(step.kind.as_str(), next, &repo.odb().get_commit(next)?);
  }

  let head = current.ok_or_else(|| RewriteError::Invalid("no commits introduced on top of root commit".into()))?;
  Ok((head, index_tree))
}

/// Squash-message pre-image: both messages with a comment rule between.
fn fuse_messages(repo: &Repository, first: &Commit, second: &Commit) -> Result<Vec<u8>> {
  let comment = comment_char(repo, &first.message)?;
  let mut fused = first.message.clone();
  if !fused.ends_with(b"\n") {
    fused.push(b'\n');
  }
  fused.push(b'\n');
  fused.push(comment);
  fused.extend_from_slice(b" ---\n\n");
  fused.extend_from_slice(&second.message);
  Ok(fused)
}

/// Open the editor on a commit's message and apply the result.
pub fn edit_commit_message(repo: &Repository, commit_oid: Oid) -> Result<Oid> {
  let commit = repo.odb().get_commit(commit_oid)?;
  let mut comments = String::from(
    "Please enter the commit message for your changes. Lines starting\n\
     with the comment character will be ignored, and an empty message\n\
     aborts the commit.\n",
  );

  // Show a diffstat of what this commit changes, like `git commit` does.
  if commit.parents.len() < 2 {
    let parent_tree = match commit.parents.first() {
      Some(&parent) => repo.odb().get_commit(parent)?.tree,
      None => repo.new_tree(&crate::object::Tree::empty()),
    };
    let stat = repo.diff_tree_stat(parent_tree, commit.tree)?;
    if !stat.is_empty() {
      comments.push('\n');
      comments.push_str(&stat);
    }
  }

  let message = run_editor(repo, "COMMIT_EDITMSG", &commit.message, Some(&comments))?;
  let message = repo.run_commit_msg_hook(message)?;
  repo.update_commit(commit_oid, None, None, Some(message), None, false)
}

/// Split one commit into two by interactively picking hunks.
///
/// The parent tree is materialized into a temporary index, `git reset
/// --patch` selects what belongs in part one, and both halves get their
/// messages edited.
pub fn cut_commit(repo: &Repository, commit_oid: Oid) -> Result<Oid> {
  let commit = repo.odb().get_commit(commit_oid)?;
  println!("Cutting commit {}", commit_oid.short());
  println!("Select changes to be included in part [1]:");

  let base_tree = match commit.parents.first() {
    Some(&parent) => repo.odb().get_commit(parent)?.tree,
    None => repo.new_tree(&crate::object::Tree::empty()),
  };
  let final_tree = commit.tree;

  // The spawned git processes need both trees on disk.
  repo.odb().flush(base_tree)?;
  repo.odb().flush(final_tree)?;

  let index_path = repo.scratch_dir()?.join("TEMP_INDEX");
  let index_env: &[(&str, &str)] = &[("GIT_INDEX_FILE", index_path.to_str().expect("scratch path is utf-8"))];
  let base_hex = base_tree.to_hex();
  let final_hex = final_tree.to_hex();

  repo.git().execute_with_env(&["read-tree", &base_hex], repo.workdir(), index_env)?;
  // Mark everything skip-worktree so the interactive reset does not try
  // to refresh stat data against the working copy.
  let files = repo.git().execute_with_env(&["ls-files"], repo.workdir(), index_env)?;
  repo
    .git()
    .execute_with_env_input(&["update-index", "--skip-worktree", "--stdin"], repo.workdir(), index_env, files.as_bytes())?;
  repo.git().execute_interactive(&["reset", "--patch", &final_hex, "--", "."], repo.workdir(), index_env)?;

  let mid_tree = Oid::from_hex(&repo.git().execute_with_env(&["write-tree"], repo.workdir(), index_env)?)?;
  if mid_tree == base_tree {
    return Err(RewriteError::Invalid("cut part [1] is empty - aborting".into()));
  }
  if mid_tree == final_tree {
    return Err(RewriteError::Invalid("cut part [2] is empty - aborting".into()));
  }

  let mut part1_message = b"[1] ".to_vec();
  part1_message.extend_from_slice(&commit.message);
  let part1 = repo.update_commit(commit_oid, Some(mid_tree), None, Some(part1_message), None, false)?;
  let part1 = edit_commit_message(repo, part1)?;

  let mut part2_message = b"[2] ".to_vec();
  part2_message.extend_from_slice(&commit.message);
  let part2 = repo.update_commit(commit_oid, None, Some(vec![part1]), Some(part2_message), None, false)?;
  edit_commit_message(repo, part2)
}

/// Flush the batch and compare-and-swap the ref, then write any `index`
/// step's tree back into the index file.
fn update_head(repo: &Repository, reference: &CommitRef, old_head: Oid, new_head: Oid, expected_tree: Option<Oid>, index_tree: Option<Oid>) -> Result<()> {
  if new_head == old_head && index_tree.is_none() {
    eprintln!("(warning) no changes performed");
    return Ok(());
  }

  // Persistence is the first durable side effect, the ref update the last.
  repo.odb().flush(new_head)?;

  let summary = repo.odb().get_commit(new_head)?.summary();
  let reason = format!("revise ({}): {summary}", old_head.short());
  println!("Updating {} ({} => {})", reference.name, old_head, new_head);
  repo.update_ref(reference, new_head, &reason)?;

  if let Some(tree) = index_tree {
    repo.odb().flush(tree)?;
    let tree_hex = tree.to_hex();
    repo.git().execute(&["read-tree", &tree_hex], repo.workdir())?;
  }

  if let Some(expected) = expected_tree {
    repo.check_final_tree(new_head, expected)?;
  }
  Ok(())
}

fn print_step(kind: &str, oid: Oid, commit: &Commit) {
  println!("{kind:6} {}  {}", oid.short(), commit.summary());
}
