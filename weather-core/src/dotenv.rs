//! Minimal reader/writer for `KEY=VALUE` env files such as `.weather.env`.
//!
//! Malformed lines are skipped rather than reported; a broken file must not
//! stop the CLI from starting.

use std::{
    collections::HashMap,
    fs, io,
    path::Path,
};

pub type DotenvVars = HashMap<String, String>;

/// Parse env-file contents. Later duplicates win.
pub fn parse(contents: &str) -> DotenvVars {
    let mut vars = DotenvVars::new();

    for (index, line) in contents.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        match parse_line(trimmed) {
            Some((key, value)) => {
                vars.insert(key, value);
            }
            None => tracing::debug!(line = index + 1, "Skipping malformed env file line"),
        }
    }

    vars
}

fn parse_line(line: &str) -> Option<(String, String)> {
    let line = line.strip_prefix("export ").unwrap_or(line);
    let (key, value) = line.split_once('=')?;

    let key = key.trim();
    if !is_valid_key(key) {
        return None;
    }

    Some((key.to_string(), unquote(value.trim())?))
}

fn is_valid_key(key: &str) -> bool {
    let mut chars = key.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Strip matching quotes; unquoted values lose a trailing ` # comment`.
/// An unterminated quote makes the line malformed.
fn unquote(value: &str) -> Option<String> {
    for quote in ['"', '\''] {
        if let Some(rest) = value.strip_prefix(quote) {
            return rest.strip_suffix(quote).map(str::to_string);
        }
    }

    let value = match value.find(" #") {
        Some(pos) => value[..pos].trim_end(),
        None => value,
    };
    Some(value.to_string())
}

/// Load an env file. A missing or unreadable file yields no variables.
pub fn load(path: &Path) -> DotenvVars {
    match fs::read_to_string(path) {
        Ok(contents) => parse(&contents),
        Err(err) if err.kind() == io::ErrorKind::NotFound => DotenvVars::new(),
        Err(err) => {
            tracing::warn!(path = %path.display(), error = %err, "Ignoring unreadable env file");
            DotenvVars::new()
        }
    }
}

/// Set `key` in the file, replacing an existing assignment or appending a new
/// line. Other lines (comments included) are preserved.
pub fn upsert(path: &Path, key: &str, value: &str) -> io::Result<()> {
    let existing = read_or_empty(path)?;
    let assignment = format!("{key}={value}");

    let mut replaced = false;
    let mut lines: Vec<String> = existing
        .lines()
        .map(|line| {
            if assigns(line, key) {
                replaced = true;
                assignment.clone()
            } else {
                line.to_string()
            }
        })
        .collect();

    if !replaced {
        lines.push(assignment);
    }

    write_private(path, &(lines.join("\n") + "\n"))
}

/// Remove every assignment of `key`. Returns whether anything was removed.
pub fn remove(path: &Path, key: &str) -> io::Result<bool> {
    let existing = read_or_empty(path)?;
    let kept: Vec<&str> = existing.lines().filter(|line| !assigns(line, key)).collect();

    if kept.len() == existing.lines().count() {
        return Ok(false);
    }

    let mut contents = kept.join("\n");
    if !contents.is_empty() {
        contents.push('\n');
    }
    write_private(path, &contents)?;
    Ok(true)
}

fn assigns(line: &str, key: &str) -> bool {
    parse_line(line.trim()).is_some_and(|(k, _)| k == key)
}

fn read_or_empty(path: &Path) -> io::Result<String> {
    match fs::read_to_string(path) {
        Ok(contents) => Ok(contents),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(String::new()),
        Err(err) => Err(err),
    }
}

/// The file can hold the API key, so it is written owner-only on Unix.
fn write_private(path: &Path, contents: &str) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    fs::write(path, contents)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_skips_comments_blanks_and_malformed_lines() {
        let vars = parse(
            "# settings\n\
             \n\
             CACHE_TTL=300\n\
             this line is garbage\n\
             =novalue\n\
             1BAD=x\n\
             export OWM_UNITS=imperial\n",
        );

        assert_eq!(vars.len(), 2);
        assert_eq!(vars["CACHE_TTL"], "300");
        assert_eq!(vars["OWM_UNITS"], "imperial");
    }

    #[test]
    fn parse_handles_quotes_and_inline_comments() {
        let vars = parse(
            "A=\"quoted value\"\n\
             B='single # not a comment'\n\
             C=plain # trailing comment\n\
             D=\"unterminated\n",
        );

        assert_eq!(vars["A"], "quoted value");
        assert_eq!(vars["B"], "single # not a comment");
        assert_eq!(vars["C"], "plain");
        assert!(!vars.contains_key("D"));
    }

    #[test]
    fn later_duplicates_win() {
        let vars = parse("CACHE_TTL=1\nCACHE_TTL=2\n");
        assert_eq!(vars["CACHE_TTL"], "2");
    }

    #[test]
    fn load_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load(&dir.path().join("absent.env")).is_empty());
    }

    #[test]
    fn upsert_replaces_and_preserves_other_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".weather.env");
        fs::write(&path, "# mine\nOWM_API_KEY=old\nCACHE_TTL=60\n").unwrap();

        upsert(&path, "OWM_API_KEY", "new").unwrap();

        let contents = fs::read_to_string(&path).unwrap();
        assert_eq!(contents, "# mine\nOWM_API_KEY=new\nCACHE_TTL=60\n");
    }

    #[test]
    fn upsert_creates_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(".weather.env");

        upsert(&path, "CACHE_TTL", "5").unwrap();

        assert_eq!(load(&path)["CACHE_TTL"], "5");
    }

    #[test]
    fn remove_reports_whether_key_was_present() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".weather.env");
        fs::write(&path, "OWM_API_KEY=abc\nCACHE_TTL=60\n").unwrap();

        assert!(remove(&path, "OWM_API_KEY").unwrap());
        assert!(!remove(&path, "OWM_API_KEY").unwrap());
        assert_eq!(fs::read_to_string(&path).unwrap(), "CACHE_TTL=60\n");
    }
}
