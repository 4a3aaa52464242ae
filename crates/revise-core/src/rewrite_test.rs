use crate::error::RewriteError;
use crate::oid::Oid;
use crate::repository::Repository;
use crate::rewrite::{self, RewriteOptions, apply_todos, commit_range};
use crate::todo::{Step, StepKind, build_todos};
use pretty_assertions::assert_eq;
use test_log::test;
use test_utils::TestRepo;

fn options(target: Option<&str>) -> RewriteOptions {
  RewriteOptions {
    target: target.map(str::to_string),
    ref_name: "HEAD".to_string(),
    ..RewriteOptions::default()
  }
}

fn oid(hex: &str) -> Oid {
  Oid::from_hex(hex).unwrap()
}

#[test]
fn simple_fixup_splices_staged_changes_into_target() {
  let repo = TestRepo::new();
  repo.create_commit("commit a", "a.txt", "a\n");
  let b = repo.create_commit("commit b", "b.txt", "b v1\n");
  let c = repo.create_commit("commit c", "c.txt", "c\n");

  // Stage an edit to b.txt and splice it into commit b.
  repo.stage("b.txt", "b v2\n");
  let handle = Repository::open(Some(repo.path())).unwrap();
  rewrite::run(&handle, &options(Some(&b))).unwrap();

  // Same shape, same messages, new ids from b onward.
  assert_eq!(repo.log_subjects(), vec!["commit c", "commit b", "commit a"]);
  let new_head = repo.head();
  assert_ne!(new_head, c);
  assert_ne!(repo.rev_parse("HEAD^"), b);

  // The staged change landed in b, and c still applies on top.
  assert_eq!(repo.file_at("HEAD^", "b.txt"), "b v2");
  assert_eq!(repo.file_at("HEAD", "c.txt"), "c");

  // Reflog records an undo point in the revise format.
  let reflog = repo.git(&["reflog", "-1", "--format=%gs"]);
  assert_eq!(reflog, format!("revise ({}): commit c", &c[..12]));
}

#[test]
fn all_pick_todo_in_original_order_reuses_commits() {
  let repo = TestRepo::new();
  let a = repo.create_commit("commit a", "a.txt", "a\n");
  repo.create_commit("commit b", "b.txt", "b\n");
  let c = repo.create_commit("commit c", "c.txt", "c\n");
  let handle = Repository::open(Some(repo.path())).unwrap();

  let range = commit_range(&handle, Some(oid(&a)), oid(&c)).unwrap();
  let todos = build_todos(&range, None);
  let (new_head, index_tree) = apply_todos(&handle, Some(oid(&a)), &todos, &todos, false).unwrap();

  // Nothing changed, so no commit was rebuilt at all.
  assert_eq!(new_head, oid(&c));
  assert!(index_tree.is_none());
}

#[test]
fn reorder_swaps_commits_and_restores_the_final_tree() {
  let repo = TestRepo::new();
  let a = repo.create_commit("commit a", "a.txt", "a\n");
  let b = repo.create_commit("commit b", "b.txt", "b\n");
  let c = repo.create_commit("commit c", "c.txt", "c\n");
  let handle = Repository::open(Some(repo.path())).unwrap();

  let original = build_todos(&[oid(&b), oid(&c)], None);
  let reordered = vec![Step::new(StepKind::Pick, oid(&c)), Step::new(StepKind::Pick, oid(&b))];
  let (new_head, _) = apply_todos(&handle, Some(oid(&a)), &original, &reordered, false).unwrap();

  let top = handle.odb().get_commit(new_head).unwrap();
  assert_eq!(top.summary(), "commit b");
  let middle = handle.odb().get_commit(top.parents[0]).unwrap();
  assert_eq!(middle.summary(), "commit c");
  assert_eq!(middle.parents, vec![oid(&a)]);

  // Once both commits are applied the tree matches the original head's.
  assert_eq!(top.tree, handle.odb().get_commit(oid(&c)).unwrap().tree);
  // Midway through, only c's file exists on top of a.
  let mid_tree = handle.odb().get_tree(middle.tree).unwrap();
  assert!(mid_tree.get(b"c.txt").is_some());
  assert!(mid_tree.get(b"b.txt").is_none());
}

#[test]
fn autosquash_folds_fixup_chain_into_target() {
  let repo = TestRepo::new();
  repo.create_commit("commit a", "a.txt", "a\n");
  let b = repo.create_commit("commit b", "b.txt", "b v1\n");
  repo.create_commit("commit c", "c.txt", "c\n");
  repo.create_commit("fixup! commit b", "b.txt", "b v2\n");
  repo.create_commit("fixup! fixup! commit b", "b.txt", "b v3\n");

  let handle = Repository::open(Some(repo.path())).unwrap();
  let mut opts = options(None);
  opts.root = true;
  opts.autosquash = Some(true);
  rewrite::run(&handle, &opts).unwrap();

  // Both fixups disappeared into b; message and order are unchanged.
  assert_eq!(repo.log_subjects(), vec!["commit c", "commit b", "commit a"]);
  assert_eq!(repo.file_at("HEAD^", "b.txt"), "b v3");
  assert_ne!(repo.rev_parse("HEAD^"), b);
}

#[test]
fn fixup_step_melds_tree_without_touching_message() {
  let repo = TestRepo::new();
  let a = repo.create_commit("commit a", "a.txt", "a\n");
  let b = repo.create_commit("commit b", "b.txt", "b v1\n");
  let f = repo.create_commit("tweak b", "b.txt", "b v2\n");
  let handle = Repository::open(Some(repo.path())).unwrap();

  let original = build_todos(&[oid(&b), oid(&f)], None);
  let edited = vec![Step::new(StepKind::Pick, oid(&b)), Step::new(StepKind::Fixup, oid(&f))];
  let (new_head, _) = apply_todos(&handle, Some(oid(&a)), &original, &edited, false).unwrap();

  let head = handle.odb().get_commit(new_head).unwrap();
  assert_eq!(head.summary(), "commit b");
  assert_eq!(head.parents, vec![oid(&a)]);
  let tree = handle.odb().get_tree(head.tree).unwrap();
  let blob = handle.odb().get_blob(tree.get(b"b.txt").unwrap().oid).unwrap();
  assert_eq!(blob, b"b v2\n");
}

#[test]
fn merge_commit_in_range_is_fatal_and_leaves_ref_alone() {
  let repo = TestRepo::new();
  let a = repo.create_commit("commit a", "a.txt", "a\n");
  repo.create_commit("commit b", "b.txt", "b\n");
  repo.git(&["checkout", "-q", "-b", "side", &a]);
  repo.create_commit("side work", "side.txt", "s\n");
  repo.git(&["checkout", "-q", "main"]);
  repo.git(&["merge", "-q", "--no-ff", "-m", "merge side", "side"]);
  let head_before = repo.head();

  let handle = Repository::open(Some(repo.path())).unwrap();
  let err = rewrite::run(&handle, &options(Some(&a))).unwrap_err();
  assert!(matches!(err, RewriteError::MergeInRange(_)), "got {err:?}");
  assert_eq!(repo.head(), head_before);
}

#[test]
fn reword_through_editor_rewrites_message() {
  let repo = TestRepo::new();
  repo.create_commit("commit a", "a.txt", "a\n");
  let old_head = repo.create_commit("old message", "b.txt", "b\n");

  let editor = repo.install_editor("reword.sh", "printf 'new message\\n' > \"$1\"");
  repo.set_config("core.editor", editor.to_str().unwrap());

  let handle = Repository::open(Some(repo.path())).unwrap();
  let mut opts = options(Some("HEAD"));
  opts.edit = true;
  rewrite::run(&handle, &opts).unwrap();

  assert_eq!(repo.log_subjects()[0], "new message");
  assert_eq!(repo.file_at("HEAD", "b.txt"), "b");
  let reflog = repo.git(&["reflog", "-1", "--format=%gs"]);
  assert_eq!(reflog, format!("revise ({}): new message", &old_head[..12]));
}

#[test]
fn message_flag_replaces_message_without_editor() {
  let repo = TestRepo::new();
  repo.create_commit("commit a", "a.txt", "a\n");
  repo.create_commit("old subject", "b.txt", "b\n");

  let handle = Repository::open(Some(repo.path())).unwrap();
  let mut opts = options(Some("HEAD"));
  opts.messages = vec!["new subject".to_string(), "and a body".to_string()];
  rewrite::run(&handle, &opts).unwrap();

  assert_eq!(repo.log_subjects()[0], "new subject");
  let body = repo.git(&["log", "-1", "--format=%b"]);
  assert_eq!(body, "and a body");
}

#[test]
fn aborted_todo_editor_leaves_repository_untouched() {
  let repo = TestRepo::new();
  repo.create_commit("commit a", "a.txt", "a\n");
  repo.create_commit("commit b", "b.txt", "b\n");
  let head_before = repo.head();

  let editor = repo.install_editor("abort.sh", "exit 1");
  repo.set_config("sequence.editor", editor.to_str().unwrap());

  let handle = Repository::open(Some(repo.path())).unwrap();
  let mut opts = options(None);
  opts.root = true;
  opts.interactive = true;
  let err = rewrite::run(&handle, &opts).unwrap_err();
  assert!(matches!(err, RewriteError::UserAbort), "got {err:?}");

  assert_eq!(repo.head(), head_before);
  assert_eq!(repo.log_subjects(), vec!["commit b", "commit a"]);
}

#[test]
fn emptied_todo_list_aborts() {
  let repo = TestRepo::new();
  repo.create_commit("commit a", "a.txt", "a\n");
  repo.create_commit("commit b", "b.txt", "b\n");
  let head_before = repo.head();

  // The editor comments every line out; cleanup leaves nothing.
  let editor = repo.install_editor("comment-out.sh", "sed -i -e 's/^/# /' \"$1\"");
  repo.set_config("sequence.editor", editor.to_str().unwrap());

  let handle = Repository::open(Some(repo.path())).unwrap();
  let mut opts = options(None);
  opts.root = true;
  opts.interactive = true;
  let err = rewrite::run(&handle, &opts).unwrap_err();
  assert!(matches!(err, RewriteError::UserAbort), "got {err:?}");
  assert_eq!(repo.head(), head_before);
}

#[test]
fn interactive_reorder_through_editor() {
  let repo = TestRepo::new();
  repo.create_commit("commit a", "a.txt", "a\n");
  let b = repo.create_commit("commit b", "b.txt", "b\n");
  repo.create_commit("commit c", "c.txt", "c\n");

  // Swap the two todo lines (the file also holds appended comments).
  let editor = repo.install_editor(
    "swap.sh",
    "awk 'BEGIN{n=0} /^pick /{lines[n++]=$0; next} {rest=rest $0 \"\\n\"} END{print lines[1]; print lines[0]; printf \"%s\", rest}' \"$1\" > \"$1.tmp\" && mv \"$1.tmp\" \"$1\"",
  );
  repo.set_config("sequence.editor", editor.to_str().unwrap());

  let handle = Repository::open(Some(repo.path())).unwrap();
  let mut opts = options(None);
  opts.target = Some(format!("{b}^"));
  opts.interactive = true;
  rewrite::run(&handle, &opts).unwrap();

  assert_eq!(repo.log_subjects(), vec!["commit b", "commit c", "commit a"]);
  // Both files exist at the new head; the final tree is restored.
  assert_eq!(repo.file_at("HEAD", "b.txt"), "b");
  assert_eq!(repo.file_at("HEAD", "c.txt"), "c");
}

#[test]
fn no_staged_changes_and_no_edit_is_a_noop() {
  let repo = TestRepo::new();
  repo.create_commit("commit a", "a.txt", "a\n");
  repo.create_commit("commit b", "b.txt", "b\n");
  let head_before = repo.head();

  let handle = Repository::open(Some(repo.path())).unwrap();
  rewrite::run(&handle, &options(Some("HEAD^"))).unwrap();
  assert_eq!(repo.head(), head_before);
}

#[test]
fn commit_range_stops_at_base_and_rejects_merges() {
  let repo = TestRepo::new();
  let a = repo.create_commit("commit a", "a.txt", "a\n");
  let b = repo.create_commit("commit b", "b.txt", "b\n");
  let c = repo.create_commit("commit c", "c.txt", "c\n");
  let handle = Repository::open(Some(repo.path())).unwrap();

  let range = commit_range(&handle, Some(oid(&a)), oid(&c)).unwrap();
  assert_eq!(range, vec![oid(&b), oid(&c)]);

  let full = commit_range(&handle, None, oid(&c)).unwrap();
  assert_eq!(full.len(), 3);

  // A target that is not an ancestor cannot delimit a range.
  let unrelated = handle.new_commit(handle.odb().get_commit(oid(&a)).unwrap().tree, vec![], b"orphan\n".to_vec(), None, Vec::new()).unwrap();
  assert!(commit_range(&handle, Some(unrelated), oid(&c)).is_err());
}

#[test]
fn staged_changes_replayed_as_index_step_stay_staged() {
  let repo = TestRepo::new();
  repo.create_commit("commit a", "a.txt", "a\n");
  repo.create_commit("commit b", "b.txt", "b\n");
  repo.stage("staged.txt", "staged\n");

  // Reword b so the todo differs from the original and the rewrite runs.
  let seq = repo.install_editor("reword-picks.sh", "sed -i -e 's/^pick/reword/' \"$1\"");
  repo.set_config("sequence.editor", seq.to_str().unwrap());
  let editor = repo.install_editor("new-message.sh", "printf 'commit b reworded\\n' > \"$1\"");
  repo.set_config("core.editor", editor.to_str().unwrap());

  let handle = Repository::open(Some(repo.path())).unwrap();

  let mut opts = options(Some("HEAD^"));
  opts.interactive = true;
  rewrite::run(&handle, &opts).unwrap();

  assert_eq!(repo.log_subjects()[0], "commit b reworded");
  // The staged file is still staged, not committed.
  let staged = repo.git(&["diff", "--cached", "--name-only"]);
  assert_eq!(staged, "staged.txt");
  assert!(repo.git(&["ls-tree", "HEAD", "staged.txt"]).is_empty());
}

fn binary_available(name: &str) -> bool {
  std::process::Command::new(name).arg("--version").output().is_ok()
}

fn head_signature(repo: &TestRepo, handle: &Repository) -> Option<Vec<u8>> {
  handle.odb().get_commit(oid(&repo.head())).unwrap().gpgsig
}

#[test]
fn sign_config_precedence_follows_revise_then_commit() {
  let repo = TestRepo::new();
  repo.create_commit("commit a", "a.txt", "a\n");

  repo.set_config("commit.gpgSign", "true");
  let handle = Repository::open(Some(repo.path())).unwrap();
  assert!(handle.sign_commits(), "commit.gpgSign activates signing");

  repo.set_config("revise.gpgSign", "false");
  let handle = Repository::open(Some(repo.path())).unwrap();
  assert!(!handle.sign_commits(), "revise.gpgSign overrides commit.gpgSign");

  repo.set_config("revise.gpgSign", "true");
  repo.set_config("commit.gpgSign", "false");
  let handle = Repository::open(Some(repo.path())).unwrap();
  assert!(handle.sign_commits());

  // The command-line flags win over both keys.
  handle.set_sign_commits(false);
  assert!(!handle.sign_commits());
}

#[test]
fn gpg_signing_follows_config_and_flags() {
  if !binary_available("gpg") {
    eprintln!("skipping: gpg not available");
    return;
  }

  let repo = TestRepo::new();
  repo.create_commit("commit a", "a.txt", "a\n");
  let b = repo.create_commit("commit b", "b.txt", "b\n");
  repo.create_commit("commit c", "c.txt", "c\n");

  // Throwaway keyring; gpg-agent needs the directory to be private.
  let gnupghome = repo.path().join("gnupg");
  std::fs::create_dir(&gnupghome).unwrap();
  #[cfg(unix)]
  {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(&gnupghome, std::fs::Permissions::from_mode(0o700)).unwrap();
  }
  std::fs::write(gnupghome.join("gpg.conf"), "pinentry-mode loopback\n").unwrap();
  let generated = std::process::Command::new("gpg")
    .env("GNUPGHOME", &gnupghome)
    .args(["--batch", "--passphrase", "", "--quick-gen-key", "Test User <test@example.com>"])
    .output()
    .unwrap();
  if !generated.status.success() {
    eprintln!("skipping: gpg key generation failed: {}", String::from_utf8_lossy(&generated.stderr));
    return;
  }

  // Route every gpg invocation (ours and git's) at the throwaway keyring.
  let wrapper = repo.install_editor("gpg-wrapper.sh", &format!("GNUPGHOME={} exec gpg \"$@\"", gnupghome.display()));
  repo.set_config("gpg.program", wrapper.to_str().unwrap());
  repo.set_config("commit.gpgSign", "true");

  // A sign-state mismatch alone is enough to rewrite the commit.
  let handle = Repository::open(Some(repo.path())).unwrap();
  rewrite::run(&handle, &options(Some("HEAD"))).unwrap();
  let signature = head_signature(&repo, &handle).expect("commit.gpgSign activates signing");
  assert!(signature.starts_with(b"-----BEGIN PGP SIGNATURE-----"));
  repo.git(&["verify-commit", "HEAD"]);
  assert_eq!(repo.rev_parse("HEAD^"), b, "only the target commit was rewritten");

  // Signing a lower commit re-signs everything replayed on top of it.
  rewrite::run(&handle, &options(Some("HEAD~1"))).unwrap();
  assert!(handle.odb().get_commit(oid(&repo.rev_parse("HEAD~1"))).unwrap().gpgsig.is_some());
  assert!(head_signature(&repo, &handle).is_some());

  // revise.gpgSign overrides commit.gpgSign.
  repo.set_config("revise.gpgSign", "false");
  let handle = Repository::open(Some(repo.path())).unwrap();
  rewrite::run(&handle, &options(Some("HEAD"))).unwrap();
  assert!(head_signature(&repo, &handle).is_none());

  // And the flags override both config keys.
  let mut opts = options(Some("HEAD"));
  opts.sign = Some(true);
  rewrite::run(&handle, &opts).unwrap();
  assert!(head_signature(&repo, &handle).is_some());

  let mut opts = options(Some("HEAD"));
  opts.sign = Some(false);
  rewrite::run(&handle, &opts).unwrap();
  assert!(head_signature(&repo, &handle).is_none());

  assert_eq!(repo.log_subjects(), vec!["commit c", "commit b", "commit a"]);
}

#[test]
fn ssh_signing_attaches_an_ssh_signature() {
  if !binary_available("ssh-keygen") {
    eprintln!("skipping: ssh-keygen not available");
    return;
  }

  let repo = TestRepo::new();
  repo.create_commit("commit a", "a.txt", "a\n");
  repo.create_commit("commit b", "b.txt", "b\n");

  let key_path = repo.path().join("signing_key");
  let generated = std::process::Command::new("ssh-keygen")
    .args(["-q", "-t", "ed25519", "-N", ""])
    .arg("-f")
    .arg(&key_path)
    .output()
    .unwrap();
  if !generated.status.success() {
    eprintln!("skipping: ssh key generation failed: {}", String::from_utf8_lossy(&generated.stderr));
    return;
  }

  repo.set_config("gpg.format", "ssh");
  repo.set_config("user.signingKey", key_path.to_str().unwrap());
  repo.set_config("commit.gpgSign", "true");

  let handle = Repository::open(Some(repo.path())).unwrap();
  rewrite::run(&handle, &options(Some("HEAD"))).unwrap();
  let signature = head_signature(&repo, &handle).expect("gpg.format=ssh signs with the ssh backend");
  assert!(signature.starts_with(b"-----BEGIN SSH SIGNATURE-----"));
  assert_eq!(repo.log_subjects(), vec!["commit b", "commit a"]);

  // --no-gpg-sign strips the signature again.
  let mut opts = options(Some("HEAD"));
  opts.sign = Some(false);
  rewrite::run(&handle, &opts).unwrap();
  assert!(head_signature(&repo, &handle).is_none());
}
