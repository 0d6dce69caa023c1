//! Problem statement documents.
//!
//! A problem is a markdown file. An optional frontmatter `id` names the run
//! record; otherwise the file stem is used.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};

use crate::core::types::ProblemStatement;

/// Load a problem statement, stripping frontmatter from its text.
pub fn load_problem(path: &Path) -> Result<ProblemStatement> {
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let (frontmatter, body) = split_frontmatter(&contents);

    let id = match frontmatter.and_then(frontmatter_id) {
        Some(id) => id,
        None => path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .ok_or_else(|| anyhow!("cannot derive problem id from {}", path.display()))?,
    };
    validate_id(&id).with_context(|| format!("problem id in {}", path.display()))?;

    Ok(ProblemStatement::new(id, body.trim()))
}

/// Validate that an id is safe to use as a file name.
pub fn validate_id(id: &str) -> Result<()> {
    if id.is_empty() {
        return Err(anyhow!("id must not be empty"));
    }
    if id.contains('/') {
        return Err(anyhow!("id must not contain '/'"));
    }
    if id
        .chars()
        .any(|c| !(c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-'))
    {
        return Err(anyhow!("id must be [A-Za-z0-9._-] only (got '{id}')"));
    }
    if id.starts_with('.') {
        return Err(anyhow!("id must not start with '.'"));
    }
    Ok(())
}

fn frontmatter_id(frontmatter: &str) -> Option<String> {
    frontmatter.lines().find_map(|line| {
        let (key, value) = line.trim().split_once(':')?;
        if key.trim() != "id" {
            return None;
        }
        let value = value.trim().trim_matches(|c| c == '"' || c == '\'');
        (!value.is_empty()).then(|| value.to_string())
    })
}

/// Split a document into (frontmatter, body).
fn split_frontmatter(contents: &str) -> (Option<&str>, &str) {
    let Some(after) = contents.strip_prefix("---\n") else {
        return (None, contents);
    };
    match after.find("\n---\n") {
        Some(end) => (Some(&after[..end]), &after[end + 5..]),
        None => (None, contents),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_id_from_frontmatter_and_strips_it() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("issue.md");
        fs::write(&path, "---\nid: \"django-1234\"\n---\n\nFix the crash.\n").expect("write");

        let problem = load_problem(&path).expect("load");
        assert_eq!(problem.id, "django-1234");
        assert_eq!(problem.text, "Fix the crash.");
    }

    #[test]
    fn falls_back_to_file_stem() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("astropy-42.md");
        fs::write(&path, "# Bug\n\nIt breaks.\n").expect("write");

        let problem = load_problem(&path).expect("load");
        assert_eq!(problem.id, "astropy-42");
        assert!(problem.text.starts_with("# Bug"));
    }

    #[test]
    fn validate_id_rejects_path_like_ids() {
        assert!(validate_id("bad/id").is_err());
        assert!(validate_id("..").is_err());
        assert!(validate_id("has space").is_err());
        assert!(validate_id("ok-id_1.2").is_ok());
    }
}
