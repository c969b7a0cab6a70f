//! Validation of configuration paths.
//!
//! A *path* is a UTF-8 string starting with `/` and containing no empty
//! segments (`//`). A *key* is a path that does not end with `/`; a *dir* is
//! a path that does. A *relative path* is the portion after some dir: no
//! leading `/`, no `//`, and possibly empty (a dir's own entry).
//!
//! Validation is total: every string is either accepted or rejected with a
//! [`PathError`] naming the offending condition.

use thiserror::Error;

/// Why a string failed path validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PathError {
	#[error("{0} may not be empty")]
	Empty(PathKind),

	#[error("{0} must begin with a slash: {1:?}")]
	MissingLeadingSlash(PathKind, String),

	#[error("{0} may not begin with a slash: {1:?}")]
	LeadingSlash(PathKind, String),

	#[error("{0} may not contain two adjacent slashes: {1:?}")]
	DoubleSlash(PathKind, String),

	#[error("key may not end with a slash: {0:?}")]
	TrailingSlash(String),

	#[error("dir must end with a slash: {0:?}")]
	MissingTrailingSlash(String),
}

/// The flavour of path an entry point expected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathKind {
	Path,
	Key,
	Dir,
	Relative,
}

impl std::fmt::Display for PathKind {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(match self {
			PathKind::Path => "path",
			PathKind::Key => "key",
			PathKind::Dir => "dir",
			PathKind::Relative => "relative path",
		})
	}
}

fn check_absolute(s: &str, kind: PathKind) -> Result<(), PathError> {
	if s.is_empty() {
		return Err(PathError::Empty(kind));
	}
	if !s.starts_with('/') {
		return Err(PathError::MissingLeadingSlash(kind, s.to_string()));
	}
	if s.contains("//") {
		return Err(PathError::DoubleSlash(kind, s.to_string()));
	}
	Ok(())
}

/// Checks that `s` is a well-formed path (key or dir).
pub fn check_path(s: &str) -> Result<(), PathError> {
	check_absolute(s, PathKind::Path)
}

/// Checks that `s` is a well-formed key: a path with no trailing slash.
pub fn check_key(s: &str) -> Result<(), PathError> {
	check_absolute(s, PathKind::Key)?;
	if s.ends_with('/') {
		return Err(PathError::TrailingSlash(s.to_string()));
	}
	Ok(())
}

/// Checks that `s` is a well-formed dir: a path ending with a slash.
pub fn check_dir(s: &str) -> Result<(), PathError> {
	check_absolute(s, PathKind::Dir)?;
	if !s.ends_with('/') {
		return Err(PathError::MissingTrailingSlash(s.to_string()));
	}
	Ok(())
}

/// Checks that `s` is a well-formed relative path.
///
/// The empty string is a valid relative path: it names the dir itself and is
/// the conventional single entry of a change list whose prefix is a key.
pub fn check_rel_path(s: &str) -> Result<(), PathError> {
	if s.starts_with('/') {
		return Err(PathError::LeadingSlash(PathKind::Relative, s.to_string()));
	}
	if s.contains("//") {
		return Err(PathError::DoubleSlash(PathKind::Relative, s.to_string()));
	}
	Ok(())
}

/// Whether `s` is a well-formed path.
#[must_use]
pub fn is_path(s: &str) -> bool {
	check_path(s).is_ok()
}

/// Whether `s` is a well-formed key.
#[must_use]
pub fn is_key(s: &str) -> bool {
	check_key(s).is_ok()
}

/// Whether `s` is a well-formed dir.
#[must_use]
pub fn is_dir(s: &str) -> bool {
	check_dir(s).is_ok()
}

/// Whether `s` is a well-formed relative path.
#[must_use]
pub fn is_rel_path(s: &str) -> bool {
	check_rel_path(s).is_ok()
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn keys_and_dirs() {
		assert!(is_key("/a"));
		assert!(is_key("/a/b"));
		assert!(!is_key("/a/"));
		assert!(!is_key("a"));
		assert!(!is_key(""));
		assert!(!is_key("/a//b"));

		assert!(is_dir("/"));
		assert!(is_dir("/a/"));
		assert!(!is_dir("/a"));
		assert!(!is_dir("a/"));
		assert!(!is_dir("/a//"));

		assert!(is_path("/a"));
		assert!(is_path("/a/"));
		assert!(!is_path("//"));
	}

	#[test]
	fn relative_paths() {
		assert!(is_rel_path(""));
		assert!(is_rel_path("a"));
		assert!(is_rel_path("a/b"));
		assert!(is_rel_path("a/"));
		assert!(!is_rel_path("/a"));
		assert!(!is_rel_path("a//b"));
	}

	#[test]
	fn errors_name_the_condition() {
		assert_eq!(check_key(""), Err(PathError::Empty(PathKind::Key)));
		assert!(matches!(
			check_key("a"),
			Err(PathError::MissingLeadingSlash(PathKind::Key, _))
		));
		assert!(matches!(check_key("/a/"), Err(PathError::TrailingSlash(_))));
		assert!(matches!(
			check_dir("/a"),
			Err(PathError::MissingTrailingSlash(_))
		));
		assert!(matches!(
			check_rel_path("/a"),
			Err(PathError::LeadingSlash(PathKind::Relative, _))
		));
	}
}
