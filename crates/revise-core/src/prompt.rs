use crate::error::{Result, RewriteError};
use std::io::{BufRead, Write};

/// Ask the user a question on the terminal and return the trimmed answer.
///
/// A closed stdin counts as an abort; there is no timeout, conflict
/// resolution blocks on the user indefinitely.
pub(crate) fn prompt(message: &str) -> Result<String> {
  print!("{message}");
  std::io::stdout().flush()?;
  let mut line = String::new();
  if std::io::stdin().lock().read_line(&mut line)? == 0 {
    return Err(RewriteError::UserAbort);
  }
  Ok(line.trim().to_string())
}
