//! In-memory three-way tree merge.
//!
//! Works entirely on cached objects so no index file is ever read or
//! written; unmodified subtrees are taken wholesale without being visited.
//! Blob-level conflicts fall back to `git merge-file`, then to recorded
//! rerere resolutions, then to the user's editor.

use crate::error::{Result, RewriteError};
use crate::object::{FileMode, Tree, TreeEntry};
use crate::oid::Oid;
use crate::prompt::prompt;
use crate::rerere;
use crate::repository::Repository;
use crate::{editor, odb::Odb};
use std::collections::BTreeSet;
use std::fs;
use tracing::{debug, info, instrument};

/// Re-create `commit` with `new_parent` as its parent.
///
/// A root commit is produced when `new_parent` is `None`. When
/// `tree_to_keep` is given the merge is skipped entirely and that tree is
/// used; the rewrite engine passes it when reordering has provably
/// converged back to a known state.
#[instrument(skip(repo), fields(commit = %commit_oid.short()))]
pub fn rebase(repo: &Repository, commit_oid: Oid, new_parent: Option<Oid>, tree_to_keep: Option<Oid>) -> Result<Oid> {
  let commit = repo.odb().get_commit(commit_oid)?;
  if commit.parents.len() > 1 {
    return Err(RewriteError::MergeInRange(commit_oid.short()));
  }
  let orig_parent = commit.parents.first().copied();
  if orig_parent == new_parent {
    return Ok(commit_oid);
  }

  let tree = if let Some(keep) = tree_to_keep {
    debug!("reusing known tree for reordered commit");
    keep
  } else {
    let new_parent_tree = parent_tree(repo, new_parent)?;
    let orig_parent_tree = parent_tree(repo, orig_parent)?;
    if new_parent_tree == orig_parent_tree {
      // Same starting point; the commit's own tree applies unchanged.
      commit.tree
    } else {
      let labels = (summary_of(repo, new_parent)?, summary_of(repo, orig_parent)?, commit.summary());
      let merged = merge_trees(
        repo,
        "",
        &labels,
        &repo.odb().get_tree(new_parent_tree)?,
        &repo.odb().get_tree(orig_parent_tree)?,
        &repo.odb().get_tree(commit.tree)?,
      )?;
      repo.new_tree(&merged)
    }
  };

  let parents = new_parent.into_iter().collect();
  repo.update_commit(commit_oid, Some(tree), Some(parents), None, None, false)
}

fn parent_tree(repo: &Repository, commit: Option<Oid>) -> Result<Oid> {
  match commit {
    Some(oid) => Ok(repo.odb().get_commit(oid)?.tree),
    None => Ok(repo.new_tree(&Tree::empty())),
  }
}

fn summary_of(repo: &Repository, commit: Option<Oid>) -> Result<String> {
  match commit {
    Some(oid) => Ok(repo.odb().get_commit(oid)?.summary()),
    None => Ok("<root>".to_string()),
  }
}

/// Merge three trees entry by entry, recursing into subtrees.
pub fn merge_trees(repo: &Repository, path: &str, labels: &(String, String, String), ours: &Tree, base: &Tree, theirs: &Tree) -> Result<Tree> {
  let mut names: BTreeSet<&[u8]> = BTreeSet::new();
  for tree in [ours, base, theirs] {
    names.extend(tree.entries().iter().map(|e| e.name.as_slice()));
  }

  let mut entries = Vec::new();
  for name in names {
    let child_path = join_path(path, name);
    let merged = merge_entries(repo, &child_path, labels, ours.get(name), base.get(name), theirs.get(name))?;
    entries.extend(merged);
  }
  Ok(Tree::new(entries))
}

fn same(a: Option<&TreeEntry>, b: Option<&TreeEntry>) -> bool {
  match (a, b) {
    (None, None) => true,
    (Some(x), Some(y)) => x.mode == y.mode && x.oid == y.oid,
    _ => false,
  }
}

fn merge_entries(repo: &Repository, path: &str, labels: &(String, String, String), ours: Option<&TreeEntry>, base: Option<&TreeEntry>, theirs: Option<&TreeEntry>) -> Result<Option<TreeEntry>> {
  if same(base, ours) {
    return Ok(theirs.cloned()); // no change from base -> ours
  }
  if same(base, theirs) {
    return Ok(ours.cloned()); // no change from base -> theirs
  }
  if same(ours, theirs) {
    return Ok(ours.cloned()); // both sides made the same change
  }

  // One side deleted while the other modified.
  let (ours, theirs) = match (ours, theirs) {
    (None, Some(theirs)) => return conflict_prompt(path, "Deletion", labels, None, "deleted", Some(theirs.clone()), "modified"),
    (Some(ours), None) => return conflict_prompt(path, "Deletion", labels, Some(ours.clone()), "modified", None, "deleted"),
    (Some(ours), Some(theirs)) => (ours, theirs),
    (None, None) => unreachable!("both absent is handled by the base comparisons"),
  };

  let mode = if ours.mode == theirs.mode {
    ours.mode
  } else if ours.mode.is_file() && theirs.mode.is_file() {
    // Exec-vs-regular: prefer whichever side moved away from base.
    match base.map(|b| b.mode) {
      Some(m) if m == ours.mode => theirs.mode,
      Some(m) if m == theirs.mode => ours.mode,
      _ => {
        let chosen = conflict_prompt(path, "File mode", labels, Some(ours.clone()), &ours.mode.to_string(), Some(theirs.clone()), &theirs.mode.to_string())?;
        chosen.expect("mode prompt offers two real entries").mode
      }
    }
  } else {
    // Blob vs tree, symlink vs file, and friends: pick a whole side.
    return conflict_prompt(path, "Entry type", labels, Some(ours.clone()), &ours.mode.to_string(), Some(theirs.clone()), &theirs.mode.to_string());
  };

  if mode.is_file() {
    let base_blob = match base {
      Some(entry) if entry.mode.is_file() => entry_blob(repo.odb(), Some(entry))?,
      _ => Vec::new(),
    };
    let merged = merge_blobs(repo, path, labels, &entry_blob(repo.odb(), Some(ours))?, &base_blob, &entry_blob(repo.odb(), Some(theirs))?)?;
    return Ok(Some(TreeEntry { mode, name: ours.name.clone(), oid: merged }));
  }

  if mode == FileMode::Tree {
    let base_tree = match base {
      Some(entry) if entry.mode == FileMode::Tree => repo.odb().get_tree(entry.oid)?,
      _ => Tree::empty(),
    };
    let merged = merge_trees(repo, path, labels, &repo.odb().get_tree(ours.oid)?, &base_tree, &repo.odb().get_tree(theirs.oid)?)?;
    let oid = repo.new_tree(&merged);
    return Ok(Some(TreeEntry { mode, name: ours.name.clone(), oid }));
  }

  // Symlinks and submodules are opaque; a three-way diff of their targets
  // is not meaningful, so the user picks a side.
  let (ours_descr, theirs_descr) = if mode == FileMode::Symlink {
    (
      String::from_utf8_lossy(&entry_blob(repo.odb(), Some(ours))?).to_string(),
      String::from_utf8_lossy(&entry_blob(repo.odb(), Some(theirs))?).to_string(),
    )
  } else {
    (ours.oid.to_hex(), theirs.oid.to_hex())
  };
  let kind = if mode == FileMode::Symlink { "Symlink" } else { "Submodule" };
  conflict_prompt(path, kind, labels, Some(ours.clone()), &ours_descr, Some(theirs.clone()), &theirs_descr)
}

fn entry_blob(odb: &Odb, entry: Option<&TreeEntry>) -> Result<Vec<u8>> {
  match entry {
    Some(entry) if entry.mode.is_file() || entry.mode == FileMode::Symlink => odb.get_blob(entry.oid),
    _ => Ok(Vec::new()),
  }
}

/// Merge blob contents, falling back to rerere and then the user's editor.
fn merge_blobs(repo: &Repository, path: &str, labels: &(String, String, String), ours: &[u8], base: &[u8], theirs: &[u8]) -> Result<Oid> {
  let annotated = (
    format!("{path} (new parent): {}", labels.0),
    format!("{path} (old parent): {}", labels.1),
    format!("{path} (current): {}", labels.2),
  );
  let (clean, merged) = repo.merge_file((&annotated.0, &annotated.1, &annotated.2), ours, base, theirs)?;
  if clean {
    return Ok(repo.odb().new_blob(merged));
  }

  println!("Conflict applying '{}'", labels.2);
  println!("  Path: '{path}'");

  let preimage = merged;
  let replay = rerere::replay_recorded_resolution(repo, &preimage)?;
  if let Some(resolution) = replay.resolution {
    info!(path, "replayed recorded conflict resolution");
    return Ok(repo.odb().new_blob(resolution));
  }

  if prompt("  Edit conflicted file? (Y/n) ")?.eq_ignore_ascii_case("n") {
    return Err(RewriteError::UserAbort);
  }

  // Keep the on-disk file name aligned with the conflicted path so the
  // editor shows something recognizable.
  let conflict_path = repo.scratch_dir()?.join("conflict").join(path.trim_start_matches('/'));
  fs::create_dir_all(conflict_path.parent().expect("conflict path has parent"))?;
  fs::write(&conflict_path, &preimage)?;
  let resolved = editor::edit_file_with_editor(&editor::git_editor(repo)?, &conflict_path)?;

  if resolved == preimage {
    println!("(note) conflicted file is unchanged");
  }
  let has_markers = contains_conflict_markers(&resolved);
  if has_markers {
    println!("(note) conflict markers found in the merged file");
  }

  if !prompt("  Merge successful? (y/N) ")?.eq_ignore_ascii_case("y") {
    if has_markers {
      return Err(RewriteError::UnresolvedConflict(path.to_string()));
    }
    return Err(RewriteError::UserAbort);
  }

  rerere::record_resolution(repo, replay.conflict_id, &replay.normalized_preimage, &resolved);
  Ok(repo.odb().new_blob(resolved))
}

fn contains_conflict_markers(data: &[u8]) -> bool {
  data.split(|&b| b == b'\n').any(|line| line.starts_with(b"<<<<<<<") || line.starts_with(b"=======") || line.starts_with(b">>>>>>>"))
}

/// Ask the user to pick a side of an unmergeable conflict.
fn conflict_prompt(path: &str, kind: &str, labels: &(String, String, String), ours: Option<TreeEntry>, ours_descr: &str, theirs: Option<TreeEntry>, theirs_descr: &str) -> Result<Option<TreeEntry>> {
  println!("{kind} conflict for '{path}'");
  println!("  (1) {}: {ours_descr}", labels.0);
  println!("  (2) {}: {theirs_descr}", labels.2);
  match prompt("Resolution or (A)bort? ")?.as_str() {
    "1" => Ok(ours),
    "2" => Ok(theirs),
    _ => Err(RewriteError::UserAbort),
  }
}

fn join_path(path: &str, name: &[u8]) -> String {
  let name = String::from_utf8_lossy(name);
  if path.is_empty() { name.to_string() } else { format!("{path}/{name}") }
}
