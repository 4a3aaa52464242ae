use crate::git_command_executor::{GitCommandExecutor, parse_lines};
use test_log::test;

fn init_repo() -> tempfile::TempDir {
  let dir = tempfile::tempdir().unwrap();
  let git = GitCommandExecutor::new();
  git.execute(&["init", "-q"], dir.path()).unwrap();
  git.execute(&["config", "user.name", "Test User"], dir.path()).unwrap();
  git.execute(&["config", "user.email", "test@example.com"], dir.path()).unwrap();
  dir
}

#[test]
fn execute_trims_output() {
  let dir = init_repo();
  let git = GitCommandExecutor::new();
  let name = git.execute(&["config", "user.name"], dir.path()).unwrap();
  assert_eq!(name, "Test User");
}

#[test]
fn execute_surfaces_stderr_on_failure() {
  let dir = init_repo();
  let git = GitCommandExecutor::new();
  let err = git.execute(&["rev-parse", "--verify", "does-not-exist"], dir.path()).unwrap_err();
  assert!(!err.stderr().is_empty());
  assert_eq!(err.command(), "rev-parse --verify does-not-exist");
}

#[test]
fn run_with_status_reports_exit_code() {
  let dir = init_repo();
  let git = GitCommandExecutor::new();
  let (_, _, code) = git.run_with_status(&["config", "--get", "no.such.key"], dir.path(), &[], None).unwrap();
  assert_eq!(code, 1);
}

#[test]
fn execute_with_input_round_trips_bytes() {
  let dir = init_repo();
  let git = GitCommandExecutor::new();
  let body: &[u8] = b"some\xffbinary\ncontent";
  let oid = git.execute_with_input(&["hash-object", "-w", "--stdin"], dir.path(), body).unwrap();
  let oid = String::from_utf8_lossy(&oid).trim().to_string();
  let back = git.execute_bytes(&["cat-file", "blob", &oid], dir.path()).unwrap();
  assert_eq!(back, body);
}

#[test]
fn parse_lines_filters_blanks() {
  let lines = parse_lines(b"one\n\n  two  \n");
  assert_eq!(lines, vec!["one".to_string(), "two".to_string()]);
}
