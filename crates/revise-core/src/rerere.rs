//! Reuse-recorded-resolution support.
//!
//! Conflicted files are normalized (hunks sorted, diff3 base sections
//! dropped, nested conflicts folded in) and fingerprinted; hand-made
//! resolutions are stored under `rr-cache/<fingerprint>/` and replayed the
//! next time the same conflict appears. Recording failures are warnings,
//! never fatal, and entries survive an aborted rewrite on purpose.

use crate::error::Result;
use crate::oid::HashAlgo;
use crate::prompt::prompt;
use crate::repository::Repository;
use std::fs;
use tracing::{debug, info, warn};

/// Outcome of a replay attempt for one conflicted file.
pub struct Replay {
  /// Preimage with conflict hunks rewritten to their normal form.
  pub normalized_preimage: Vec<u8>,
  /// Fingerprint to record a new resolution under, when known.
  pub conflict_id: Option<String>,
  /// Fully merged bytes when a recorded resolution applied cleanly.
  pub resolution: Option<Vec<u8>>,
}

impl Replay {
  fn miss(normalized_preimage: Vec<u8>, conflict_id: Option<String>) -> Self {
    Self { normalized_preimage, conflict_id, resolution: None }
  }
}

fn enabled(repo: &Repository) -> Result<bool> {
  if let Some(set) = repo.bool_config("revise.rerere")? {
    return Ok(set);
  }
  if let Some(set) = repo.bool_config("rerere.enabled")? {
    return Ok(set);
  }
  Ok(repo.git_path("rr-cache")?.is_dir())
}

/// Try to resolve a conflicted preimage from the rerere store.
pub fn replay_recorded_resolution(repo: &Repository, preimage: &[u8]) -> Result<Replay> {
  if !enabled(repo)? {
    return Ok(Replay::miss(Vec::new(), None));
  }

  let (normalized_preimage, conflict_id) = match normalize_conflicted_file(preimage) {
    Ok(pair) => pair,
    Err(reason) => {
      warn!(reason, "failed to normalize conflict; rerere disabled for this file");
      return Ok(Replay::miss(Vec::new(), None));
    }
  };

  let conflict_dir = repo.git_path("rr-cache")?.join(&conflict_id);
  if !conflict_dir.is_dir() {
    debug!(%conflict_id, "no recorded resolution");
    return Ok(Replay::miss(normalized_preimage, Some(conflict_id)));
  }
  if !repo.bool_config("rerere.autoUpdate")?.unwrap_or(false) && !prompt("  Apply recorded resolution? (y/N) ")?.eq_ignore_ascii_case("y") {
    return Ok(Replay::miss(Vec::new(), None));
  }

  let postimage_path = conflict_dir.join("postimage");
  let (recorded_postimage, recorded_preimage) = match (fs::read(&postimage_path), fs::read(conflict_dir.join("preimage"))) {
    (Ok(post), Ok(pre)) => (post, pre),
    (post, pre) => {
      let err = post.err().or(pre.err()).expect("at least one read failed");
      warn!(%err, "failed to read rerere cache");
      return Ok(Replay::miss(normalized_preimage, Some(conflict_id)));
    }
  };

  // Merge the recorded resolution onto the new conflict shape.
  let labels = ("recorded postimage", "recorded preimage", "new preimage");
  let (clean, merged) = repo.merge_file(labels, &recorded_postimage, &recorded_preimage, &normalized_preimage)?;
  if !clean {
    // Asking the user to resolve the replay itself would be confusing;
    // fall back to resolving the original conflict by hand.
    return Ok(Replay::miss(normalized_preimage, Some(conflict_id)));
  }

  info!(%conflict_id, "replayed recorded resolution");
  // Freshen the postimage so git's rerere gc keeps the entry alive.
  let _ = fs::write(&postimage_path, &recorded_postimage);
  Ok(Replay {
    normalized_preimage,
    conflict_id: Some(conflict_id),
    resolution: Some(merged),
  })
}

/// Store a hand-made resolution keyed by the conflict fingerprint.
pub fn record_resolution(repo: &Repository, conflict_id: Option<String>, normalized_preimage: &[u8], postimage: &[u8]) {
  let Some(conflict_id) = conflict_id else {
    return;
  };
  info!(%conflict_id, "recording conflict resolution");
  let result = (|| -> std::io::Result<()> {
    let conflict_dir = repo.git_path("rr-cache").map_err(std::io::Error::other)?.join(&conflict_id);
    fs::create_dir_all(&conflict_dir)?;
    fs::write(conflict_dir.join("preimage"), normalized_preimage)?;
    fs::write(conflict_dir.join("postimage"), postimage)?;
    Ok(())
  })();
  if let Err(err) = result {
    warn!(%err, "failed to write rerere cache");
  }
}

/// Rewrite every conflict in a file to normal form and fingerprint it.
///
/// Hunks inside each conflict are sorted so ours/theirs order does not
/// change the fingerprint, and `|||||||` base sections are dropped. The
/// fingerprint always uses SHA-1 to match the directory names git's own
/// rerere produces.
pub fn normalize_conflicted_file(body: &[u8]) -> std::result::Result<(Vec<u8>, String), &'static str> {
  let mut digest_input = Vec::new();
  let mut normalized = Vec::new();

  let mut lines = body.split_inclusive(|&b| b == b'\n');
  while let Some(line) = lines.next() {
    if line.starts_with(b"<<<<<<<") {
      normalized.extend_from_slice(&normalize_conflict(&mut lines, Some(&mut digest_input))?);
    } else {
      normalized.extend_from_slice(line);
    }
  }
  Ok((normalized, HashAlgo::Sha1.hash(&digest_input).to_hex()))
}

/// Normalize a single conflict, consuming lines up to its closing marker.
fn normalize_conflict<'a, I>(lines: &mut I, mut digest: Option<&mut Vec<u8>>) -> std::result::Result<Vec<u8>, &'static str>
where
  I: Iterator<Item = &'a [u8]>,
{
  let mut cur_hunk: Option<Vec<u8>> = Some(Vec::new());
  let mut other_hunk: Option<Vec<u8>> = None;
  loop {
    let line = lines.next().ok_or("unexpected eof inside conflict")?;
    if line.starts_with(b"<<<<<<<") {
      // Nested conflict: include its normalized output in the current hunk.
      let nested = normalize_conflict(lines, None)?;
      if let Some(hunk) = cur_hunk.as_mut() {
        hunk.extend_from_slice(&nested);
      }
    } else if line.starts_with(b"|||||||") {
      // diff3 base section begins; it is discarded entirely.
      if other_hunk.is_some() {
        return Err("unexpected ||||||| conflict marker");
      }
      other_hunk = cur_hunk.take();
    } else if line.starts_with(b"=======") {
      if let Some(hunk) = cur_hunk.take() {
        if other_hunk.is_some() {
          return Err("unexpected ======= conflict marker");
        }
        other_hunk = Some(hunk);
      }
      cur_hunk = Some(Vec::new());
    } else if line.starts_with(b">>>>>>>") {
      let (Some(second), Some(first)) = (cur_hunk, other_hunk) else {
        return Err("unexpected >>>>>>> conflict marker");
      };
      let (hunk1, hunk2) = if first <= second { (first, second) } else { (second, first) };
      if let Some(digest) = digest.as_mut() {
        digest.extend_from_slice(&hunk1);
        digest.push(0);
        digest.extend_from_slice(&hunk2);
        digest.push(0);
      }
      let mut out = Vec::new();
      out.extend_from_slice(b"<<<<<<<\n");
      out.extend_from_slice(&hunk1);
      out.extend_from_slice(b"=======\n");
      out.extend_from_slice(&hunk2);
      out.extend_from_slice(b">>>>>>>\n");
      return Ok(out);
    } else if let Some(hunk) = cur_hunk.as_mut() {
      hunk.extend_from_slice(line);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use pretty_assertions::assert_eq;

  #[test]
  fn normalizes_marker_labels_away() {
    let body = b"start\n<<<<<<< ours label\nalpha\n======= \nbeta\n>>>>>>> theirs label\nend\n";
    let (normalized, id) = normalize_conflicted_file(body).unwrap();
    assert_eq!(normalized, b"start\n<<<<<<<\nalpha\n=======\nbeta\n>>>>>>>\nend\n");
    assert_eq!(id.len(), 40);
  }

  #[test]
  fn hunk_order_does_not_change_fingerprint() {
    let one = b"<<<<<<< a\nfirst\n=======\nsecond\n>>>>>>> b\n";
    let two = b"<<<<<<< a\nsecond\n=======\nfirst\n>>>>>>> b\n";
    let (norm1, id1) = normalize_conflicted_file(one).unwrap();
    let (norm2, id2) = normalize_conflicted_file(two).unwrap();
    assert_eq!(id1, id2);
    assert_eq!(norm1, norm2);
  }

  #[test]
  fn diff3_base_section_is_dropped() {
    let body = b"<<<<<<< ours\nmine\n||||||| base\noriginal\n=======\ntheirs\n>>>>>>> other\n";
    let (normalized, _) = normalize_conflicted_file(body).unwrap();
    assert_eq!(normalized, b"<<<<<<<\nmine\n=======\ntheirs\n>>>>>>>\n");
  }

  #[test]
  fn distinct_conflicts_have_distinct_fingerprints() {
    let (_, id1) = normalize_conflicted_file(b"<<<<<<<\na\n=======\nb\n>>>>>>>\n").unwrap();
    let (_, id2) = normalize_conflicted_file(b"<<<<<<<\na\n=======\nc\n>>>>>>>\n").unwrap();
    assert_ne!(id1, id2);
  }

  #[test]
  fn truncated_conflict_is_an_error() {
    assert!(normalize_conflicted_file(b"<<<<<<<\nabandoned\n").is_err());
    assert!(normalize_conflicted_file(b"=======\n>>>>>>>\n").is_ok()); // stray markers outside a conflict pass through
  }

  #[test]
  fn files_without_conflicts_pass_through() {
    let (normalized, _) = normalize_conflicted_file(b"plain\ncontent\n").unwrap();
    assert_eq!(normalized, b"plain\ncontent\n");
  }
}
