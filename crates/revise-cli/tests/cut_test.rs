//! End-to-end coverage for `revise --cut`.
//!
//! The patch-mode hunk selection reads its y/n answers from stdin, so these
//! tests spawn the real binary with a piped stdin instead of calling into
//! the library; the commit-message edits go through a scripted editor.

use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Output, Stdio};
use test_log::test;
use test_utils::TestRepo;

fn run_revise(repo: &TestRepo, args: &[&str], stdin: &str, editor: &str) -> Output {
  let mut child = Command::new(env!("CARGO_BIN_EXE_revise"))
    .args(args)
    .current_dir(repo.path())
    .env("GIT_EDITOR", editor)
    .stdin(Stdio::piped())
    .stdout(Stdio::piped())
    .stderr(Stdio::piped())
    .spawn()
    .unwrap();
  child.stdin.take().unwrap().write_all(stdin.as_bytes()).unwrap();
  child.wait_with_output().unwrap()
}

/// Editor that writes "part 1" on its first invocation and "part 2" on the
/// second, the way the cut flow edits both halves in sequence.
fn install_part_editor(repo: &TestRepo) -> PathBuf {
  repo.install_editor(
    "part-editor.sh",
    "if [ -e \"$0.ran\" ]; then printf 'part 2\\n' > \"$1\"; else : > \"$0.ran\"; printf 'part 1\\n' > \"$1\"; fi",
  )
}

/// History with a two-hunk middle commit: an append to file1 plus a new
/// file2, each its own patch prompt.
fn two_hunk_fixture() -> TestRepo {
  let repo = TestRepo::new();
  repo.create_commit("commit 1", "file1", "Hello, World\n");
  repo.create_commit_with_files("commit 2", &[("file1", "Hello, World\nAppend f1\n"), ("file2", "Make f2\n")]);
  repo.create_commit("commit 3", "file2", "Make f2\nAppend f3\n");
  repo
}

#[test]
fn cut_splits_commit_into_two() {
  let repo = two_hunk_fixture();
  let commit1 = repo.rev_parse("HEAD~2");
  let head_before = repo.head();
  let editor = install_part_editor(&repo);

  // Keep the file1 hunk in part [1], leave the file2 addition for part [2].
  let output = run_revise(&repo, &["--cut", "HEAD~"], "y\nn\n", editor.to_str().unwrap());
  assert!(output.status.success(), "revise failed: {}", String::from_utf8_lossy(&output.stderr));

  assert_eq!(repo.log_subjects(), vec!["commit 3", "part 2", "part 1", "commit 1"]);
  assert_ne!(repo.head(), head_before);
  // Everything below the cut commit is untouched.
  assert_eq!(repo.rev_parse("HEAD~3"), commit1);

  // Part [1] carries only the file1 change; file2 appears in part [2].
  assert_eq!(repo.file_at("HEAD~2", "file1"), "Hello, World\nAppend f1");
  assert_eq!(repo.git(&["ls-tree", "--name-only", "HEAD~2"]), "file1");
  assert_eq!(repo.file_at("HEAD~1", "file2"), "Make f2");
  // And the commit on top still applies cleanly with its own message.
  assert_eq!(repo.file_at("HEAD", "file2"), "Make f2\nAppend f3");
}

#[test]
fn cut_splits_a_root_commit() {
  let repo = TestRepo::new();
  repo.create_commit_with_files("root commit", &[("file1", "Hello, World\n"), ("file2", "Make f2\n")]);
  let editor = install_part_editor(&repo);

  let output = run_revise(&repo, &["--cut", "HEAD"], "y\nn\n", editor.to_str().unwrap());
  assert!(output.status.success(), "revise failed: {}", String::from_utf8_lossy(&output.stderr));

  assert_eq!(repo.log_subjects(), vec!["part 2", "part 1"]);
  assert_eq!(repo.git(&["rev-list", "--count", "HEAD"]), "2");
  // The first half is the new root and holds only the selected file.
  assert_eq!(repo.git(&["ls-tree", "--name-only", "HEAD~1"]), "file1");
  assert_eq!(repo.git(&["ls-tree", "--name-only", "HEAD"]), "file1\nfile2");
}

#[test]
fn cut_with_an_empty_half_aborts_without_touching_the_ref() {
  let repo = two_hunk_fixture();
  let head_before = repo.head();

  // Selecting nothing leaves part [1] empty.
  let output = run_revise(&repo, &["--cut", "HEAD~"], "n\nn\n", "false");
  assert!(!output.status.success());
  assert!(String::from_utf8_lossy(&output.stderr).contains("cut part [1] is empty"), "stderr: {}", String::from_utf8_lossy(&output.stderr));
  assert_eq!(repo.head(), head_before);

  // Selecting everything leaves part [2] empty.
  let output = run_revise(&repo, &["--cut", "HEAD~"], "y\ny\n", "false");
  assert!(!output.status.success());
  assert!(String::from_utf8_lossy(&output.stderr).contains("cut part [2] is empty"), "stderr: {}", String::from_utf8_lossy(&output.stderr));
  assert_eq!(repo.head(), head_before);
  assert_eq!(repo.log_subjects(), vec!["commit 3", "commit 2", "commit 1"]);
}
