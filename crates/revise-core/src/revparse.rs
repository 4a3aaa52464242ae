use crate::error::{Result, RewriteError};
use crate::object::{Object, ObjectKind};
use crate::oid::Oid;
use crate::repository::Repository;

/// Resolve a revision expression to an object id.
///
/// Supports the subset of git's revision grammar the rewrite engine needs:
/// full and abbreviated hex oids, ref names, `^{<kind>}` / `^{}` peeling,
/// `^` / `^N` parent steps, and `~N` ancestor steps, in any combination.
pub fn resolve(repo: &Repository, expr: &str) -> Result<Oid> {
  let bad = || RewriteError::BadRevision(expr.to_string());
  let split = expr.find(['^', '~']).unwrap_or(expr.len());
  let (base, mut rest) = expr.split_at(split);
  if base.is_empty() {
    return Err(bad());
  }

  let mut oid = resolve_base(repo, base)?;

  while !rest.is_empty() {
    if let Some(after) = rest.strip_prefix("^{") {
      let close = after.find('}').ok_or_else(bad)?;
      let kind = &after[..close];
      rest = &after[close + 1..];
      oid = match kind {
        "" => peel_tags(repo, oid)?,
        "commit" => peel_to_commit(repo, oid)?,
        "tree" => peel_to_tree(repo, oid)?,
        "blob" => peel_to_kind(repo, oid, ObjectKind::Blob).ok_or_else(bad)?,
        "tag" => peel_to_kind(repo, oid, ObjectKind::Tag).ok_or_else(bad)?,
        _ => return Err(bad()),
      };
    } else if let Some(after) = rest.strip_prefix('^') {
      let (count, after) = take_number(after);
      rest = after;
      let commit_oid = peel_to_commit(repo, oid)?;
      match count.unwrap_or(1) {
        0 => oid = commit_oid,
        n => {
          let commit = repo.odb().get_commit(commit_oid)?;
          oid = *commit.parents.get(n - 1).ok_or_else(bad)?;
        }
      }
    } else if let Some(after) = rest.strip_prefix('~') {
      let (count, after) = take_number(after);
      rest = after;
      for _ in 0..count.unwrap_or(1) {
        let commit = repo.odb().get_commit(peel_to_commit(repo, oid)?)?;
        oid = *commit.parents.first().ok_or_else(bad)?;
      }
    } else {
      return Err(bad());
    }
  }

  Ok(oid)
}

/// Resolve an expression and peel the result to a commit.
pub fn resolve_commit(repo: &Repository, expr: &str) -> Result<Oid> {
  peel_to_commit(repo, resolve(repo, expr)?)
}

fn resolve_base(repo: &Repository, base: &str) -> Result<Oid> {
  let odb = repo.odb();
  let is_hex = base.bytes().all(|b| b.is_ascii_hexdigit());

  if is_hex
    && base.len() == odb.algo().oid_len() * 2
    && let Ok(oid) = Oid::from_hex(base)
    && odb.contains(oid)
  {
    return Ok(oid);
  }

  // Ref names win over abbreviations, as in git itself.
  let (stdout, _, code) = repo.git().run_with_status(&["rev-parse", "--verify", "--quiet", base], repo.workdir(), &[], None)?;
  if code == 0 {
    return Oid::from_hex(String::from_utf8_lossy(&stdout).trim());
  }

  if is_hex && base.len() >= 4 {
    return odb.resolve_abbrev(base);
  }
  Err(RewriteError::BadRevision(base.to_string()))
}

fn take_number(s: &str) -> (Option<usize>, &str) {
  let digits = s.len() - s.trim_start_matches(|c: char| c.is_ascii_digit()).len();
  if digits == 0 {
    (None, s)
  } else {
    (s[..digits].parse().ok(), &s[digits..])
  }
}

fn peel_tags(repo: &Repository, mut oid: Oid) -> Result<Oid> {
  loop {
    match repo.odb().get(oid)? {
      Object::Tag(tag) => oid = tag.object,
      _ => return Ok(oid),
    }
  }
}

fn peel_to_commit(repo: &Repository, oid: Oid) -> Result<Oid> {
  let peeled = peel_tags(repo, oid)?;
  match repo.odb().get(peeled)? {
    Object::Commit(_) => Ok(peeled),
    other => Err(RewriteError::BadRevision(format!("{oid} points at a {}, not a commit", other.kind()))),
  }
}

fn peel_to_tree(repo: &Repository, oid: Oid) -> Result<Oid> {
  let peeled = peel_tags(repo, oid)?;
  match repo.odb().get(peeled)? {
    Object::Tree(_) => Ok(peeled),
    Object::Commit(commit) => Ok(commit.tree),
    other => Err(RewriteError::BadRevision(format!("{oid} points at a {}, not a tree", other.kind()))),
  }
}

fn peel_to_kind(repo: &Repository, oid: Oid, kind: ObjectKind) -> Option<Oid> {
  let peeled = peel_tags(repo, oid).ok()?;
  let obj = repo.odb().get(peeled).ok()?;
  (obj.kind() == kind).then_some(peeled)
}
