use crate::error::{Error, Result};

/// Split an input line into tokens using POSIX shell quoting.
///
/// Single quotes keep everything literally; double quotes allow `\"` and
/// `\\` escapes; a backslash outside quotes escapes the next character.
/// A word starting with `#` begins a comment.
pub fn tokenize(line: &str) -> Result<Vec<String>> {
    shell_words::split(line).map_err(|e| Error::malformed("input", e.to_string()))
}

/// Split a line into command name and raw arguments. `None` for a blank line.
pub fn split_command(line: &str) -> Result<Option<(String, Vec<String>)>> {
    let mut tokens = tokenize(line)?.into_iter();
    Ok(tokens.next().map(|name| (name, tokens.collect())))
}
