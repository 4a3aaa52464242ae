use crate::error::{Result, RewriteError};
use crate::repository::Repository;
use std::fs;
use std::path::Path;
use std::process::Command;
use tracing::debug;

const AUTO_COMMENT_CHARS: &[u8] = b"#;@!$%^&|:";

/// Pick the comment character for editor files.
///
/// `core.commentChar = auto` selects a character not already starting any
/// line of the text being edited.
pub fn comment_char(repo: &Repository, text: &[u8]) -> Result<u8> {
  let configured = repo.config("core.commentChar")?;
  match configured.as_deref() {
    None => Ok(b'#'),
    Some("auto") => {
      let mut candidates: Vec<u8> = AUTO_COMMENT_CHARS.to_vec();
      for line in text.split(|&b| b == b'\n') {
        if let Some(&first) = line.first() {
          candidates.retain(|&c| c != first);
        }
      }
      candidates.first().copied().ok_or_else(|| RewriteError::Invalid("unable to automatically select a comment character".into()))
    }
    Some("") => Err(RewriteError::Invalid("core.commentChar must not be empty".into())),
    Some(other) => Ok(other.as_bytes()[0]),
  }
}

/// Remove comment lines and trailing blank lines from editor output.
///
/// Trailing whitespace inside kept lines is preserved; the result ends
/// with exactly one newline unless it is empty.
pub fn cleanup_editor_content(data: &[u8], comment: u8, allow_preceding_whitespace: bool) -> Vec<u8> {
  let is_comment = |line: &[u8]| -> bool {
    let probe = if allow_preceding_whitespace { line.trim_ascii_start() } else { line };
    probe.first() == Some(&comment)
  };

  let mut lines: Vec<&[u8]> = data.split(|&b| b == b'\n').filter(|line| !is_comment(line)).collect();
  // A trailing newline produces one empty trailing element; drop blanks.
  while lines.last().is_some_and(|line| line.trim_ascii().is_empty()) {
    lines.pop();
  }

  let mut out = Vec::new();
  for line in lines {
    out.extend_from_slice(line);
    out.push(b'\n');
  }
  out
}

/// Invoke an editor on a file through a POSIX shell.
///
/// The shell indirection lets quoted editor configuration like
/// `"C:/Program Files/editor" --wait` parse the way git would parse it.
pub fn edit_file_with_editor(editor: &str, path: &Path) -> Result<Vec<u8>> {
  let dir = path.parent().ok_or_else(|| RewriteError::Invalid("editor file has no parent directory".into()))?;
  let filename = path.file_name().ok_or_else(|| RewriteError::Invalid("editor file has no name".into()))?;

  debug!(editor, file = %path.display(), "launching editor");
  let status = Command::new("/bin/sh")
    .arg("-ec")
    .arg(format!("{editor} \"$@\""))
    .arg(editor)
    .arg(filename)
    .current_dir(dir)
    .status()?;
  if !status.success() {
    return Err(RewriteError::UserAbort);
  }
  Ok(fs::read(path)?)
}

pub fn git_editor(repo: &Repository) -> Result<String> {
  if let Ok(editor) = std::env::var("GIT_EDITOR") {
    return Ok(editor);
  }
  // git var applies the core.editor / VISUAL / EDITOR fallback chain
  Ok(repo.git().execute(&["var", "GIT_EDITOR"], repo.workdir())?)
}

/// Editor used for todo lists; mirrors git's sequence-editor lookup order.
pub fn git_sequence_editor(repo: &Repository) -> Result<String> {
  if let Ok(editor) = std::env::var("GIT_SEQUENCE_EDITOR") {
    return Ok(editor);
  }
  if let Some(editor) = repo.config("sequence.editor")? {
    return Ok(editor);
  }
  git_editor(repo)
}

pub struct EditOptions<'a> {
  pub filename: &'a str,
  pub comments: Option<&'a str>,
  pub allow_empty: bool,
  pub allow_whitespace_before_comments: bool,
}

/// Write `text` (plus a comment block) to a scratch file, run an editor on
/// it, and return the cleaned-up result.
pub fn run_specific_editor(repo: &Repository, editor: &str, text: &[u8], opts: &EditOptions<'_>) -> Result<Vec<u8>> {
  let comment = comment_char(repo, text)?;
  let path = repo.scratch_dir()?.join(opts.filename);

  let mut contents = Vec::new();
  if !text.is_empty() {
    for line in text.split(|&b| b == b'\n') {
      contents.extend_from_slice(line);
      contents.push(b'\n');
    }
    // text.split leaves one empty element for a trailing newline
    if text.ends_with(b"\n") {
      contents.pop();
    }
  }
  if let Some(comments) = opts.comments {
    contents.push(b'\n');
    for line in comments.lines() {
      contents.push(comment);
      if !line.is_empty() {
        contents.push(b' ');
        contents.extend_from_slice(line.as_bytes());
      }
      contents.push(b'\n');
    }
  }
  fs::write(&path, &contents)?;

  let mut data = edit_file_with_editor(editor, &path)?;
  if opts.comments.is_some() {
    data = cleanup_editor_content(&data, comment, opts.allow_whitespace_before_comments);
  }

  if data.is_empty() && !opts.allow_empty {
    return Err(RewriteError::UserAbort);
  }
  Ok(data)
}

pub fn run_editor(repo: &Repository, filename: &str, text: &[u8], comments: Option<&str>) -> Result<Vec<u8>> {
  let editor = git_editor(repo)?;
  run_specific_editor(
    repo,
    &editor,
    text,
    &EditOptions {
      filename,
      comments,
      allow_empty: false,
      allow_whitespace_before_comments: false,
    },
  )
}

pub fn run_sequence_editor(repo: &Repository, filename: &str, text: &[u8], comments: Option<&str>) -> Result<Vec<u8>> {
  let editor = git_sequence_editor(repo)?;
  run_specific_editor(
    repo,
    &editor,
    text,
    &EditOptions {
      filename,
      comments,
      allow_empty: true,
      allow_whitespace_before_comments: true,
    },
  )
}
