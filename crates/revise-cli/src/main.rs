use clap::Parser;
use revise_core::repository::Repository;
use revise_core::rewrite::{self, RewriteOptions};
use revise_core::RewriteError;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

/// Rebase staged changes onto the given commit and rewrite history to
/// incorporate them, without touching the working directory or the index.
#[derive(Debug, Parser)]
#[command(name = "revise", version, about)]
struct Cli {
  /// Target commit to apply fixups to
  #[arg(conflicts_with = "root")]
  target: Option<String>,

  /// Revise starting at the root commit
  #[arg(long)]
  root: bool,

  /// Reference to update
  #[arg(long, default_value = "HEAD", value_name = "ref")]
  r#ref: String,

  /// Reset the author of the targeted commit
  #[arg(long)]
  reauthor: bool,

  /// Edit commit message of targeted commit(s)
  #[arg(short, long)]
  edit: bool,

  /// Interactively edit the commit stack
  #[arg(short, long, conflicts_with_all = ["message", "cut"])]
  interactive: bool,

  /// Automatically apply fixup! and squash! commits to their targets
  #[arg(long, conflicts_with = "no_autosquash")]
  autosquash: bool,

  /// Force-disable revise.autoSquash behaviour
  #[arg(long)]
  no_autosquash: bool,

  /// Interactively cut a commit into two smaller commits
  #[arg(short, long, conflicts_with = "message")]
  cut: bool,

  /// Specify the commit message on the command line (repeatable)
  #[arg(short, long, value_name = "msg")]
  message: Vec<String>,

  /// Stage all tracked files before running
  #[arg(short, long, conflicts_with_all = ["patch", "no_index"])]
  all: bool,

  /// Interactively stage hunks before running
  #[arg(short, long, conflicts_with = "no_index")]
  patch: bool,

  /// Ignore the index while rewriting history
  #[arg(long)]
  no_index: bool,

  /// GPG sign commits
  #[arg(short = 'S', long = "gpg-sign", conflicts_with = "no_gpg_sign")]
  gpg_sign: bool,

  /// Do not GPG sign commits
  #[arg(long)]
  no_gpg_sign: bool,
}

impl Cli {
  fn into_options(self) -> RewriteOptions {
    RewriteOptions {
      target: self.target,
      root: self.root,
      ref_name: self.r#ref,
      reauthor: self.reauthor,
      edit: self.edit,
      interactive: self.interactive,
      autosquash: match (self.autosquash, self.no_autosquash) {
        (true, _) => Some(true),
        (_, true) => Some(false),
        _ => None,
      },
      cut: self.cut,
      messages: self.message,
      stage_all: self.all,
      stage_patch: self.patch,
      no_index: self.no_index,
      sign: match (self.gpg_sign, self.no_gpg_sign) {
        (true, _) => Some(true),
        (_, true) => Some(false),
        _ => None,
      },
    }
  }
}

fn main() -> ExitCode {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::from_default_env())
    .with_writer(std::io::stderr)
    .init();

  let cli = Cli::parse();
  let result = Repository::open(None).and_then(|repo| rewrite::run(&repo, &cli.into_options()));

  match result {
    Ok(()) => ExitCode::SUCCESS,
    // The user backed out; they do not need to be told twice.
    Err(RewriteError::UserAbort) => ExitCode::from(1),
    Err(err @ RewriteError::VcsFailed { .. }) => {
      eprintln!("error: {err}");
      ExitCode::from(128)
    }
    Err(err) => {
      eprintln!("error: {err}");
      ExitCode::from(1)
    }
  }
}
