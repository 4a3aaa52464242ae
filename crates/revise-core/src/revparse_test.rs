use crate::error::RewriteError;
use crate::oid::Oid;
use crate::repository::Repository;
use crate::revparse::{resolve, resolve_commit};
use pretty_assertions::assert_eq;
use test_log::test;
use test_utils::TestRepo;

fn fixture() -> (TestRepo, Repository, Vec<Oid>) {
  let repo = TestRepo::new();
  let a = repo.create_commit("commit a", "a.txt", "a\n");
  let b = repo.create_commit("commit b", "b.txt", "b\n");
  let c = repo.create_commit("commit c", "c.txt", "c\n");
  let handle = Repository::open(Some(repo.path())).unwrap();
  let oids = [a, b, c].iter().map(|hex| Oid::from_hex(hex).unwrap()).collect();
  (repo, handle, oids)
}

#[test]
fn resolves_head_and_parents() {
  let (_repo, handle, oids) = fixture();
  assert_eq!(resolve(&handle, "HEAD").unwrap(), oids[2]);
  assert_eq!(resolve(&handle, "HEAD^").unwrap(), oids[1]);
  assert_eq!(resolve(&handle, "HEAD^^").unwrap(), oids[0]);
  assert_eq!(resolve(&handle, "HEAD~2").unwrap(), oids[0]);
  assert_eq!(resolve(&handle, "HEAD^1~1").unwrap(), oids[0]);
  assert_eq!(resolve(&handle, "HEAD^0").unwrap(), oids[2]);
}

#[test]
fn resolves_branch_names_and_full_refs() {
  let (_repo, handle, oids) = fixture();
  assert_eq!(resolve(&handle, "main").unwrap(), oids[2]);
  assert_eq!(resolve(&handle, "refs/heads/main~1").unwrap(), oids[1]);
}

#[test]
fn resolves_full_and_abbreviated_oids() {
  let (_repo, handle, oids) = fixture();
  let full = oids[1].to_hex();
  assert_eq!(resolve(&handle, &full).unwrap(), oids[1]);
  assert_eq!(resolve(&handle, &full[..7]).unwrap(), oids[1]);
  assert_eq!(resolve(&handle, &format!("{}^", &full[..10])).unwrap(), oids[0]);
}

#[test]
fn peels_to_tree() {
  let (_repo, handle, oids) = fixture();
  let head = handle.odb().get_commit(oids[2]).unwrap();
  assert_eq!(resolve(&handle, "HEAD^{tree}").unwrap(), head.tree);
}

#[test]
fn peels_annotated_tags() {
  let (repo, _old_handle, oids) = fixture();
  repo.git(&["tag", "-a", "-m", "release", "v1"]);
  // Re-open so the tag ref is visible through a fresh handle.
  let handle = Repository::open(Some(repo.path())).unwrap();

  let tag_oid = resolve(&handle, "v1").unwrap();
  assert_ne!(tag_oid, oids[2], "tag object should not be peeled without a suffix");
  assert_eq!(resolve(&handle, "v1^{}").unwrap(), oids[2]);
  assert_eq!(resolve(&handle, "v1^{commit}").unwrap(), oids[2]);
  assert_eq!(resolve_commit(&handle, "v1").unwrap(), oids[2]);
}

#[test]
fn walking_past_the_root_is_an_error() {
  let (_repo, handle, _oids) = fixture();
  assert!(matches!(resolve(&handle, "HEAD~10"), Err(RewriteError::BadRevision(_))));
}

#[test]
fn nonsense_is_a_bad_revision() {
  let (_repo, handle, _oids) = fixture();
  assert!(matches!(resolve(&handle, "no-such-ref"), Err(RewriteError::BadRevision(_))));
  assert!(matches!(resolve(&handle, "HEAD^{garbage}"), Err(RewriteError::BadRevision(_))));
  assert!(matches!(resolve(&handle, ""), Err(RewriteError::BadRevision(_))));
}
