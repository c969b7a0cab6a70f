//! Profile files: the ordered list of sources an engine stacks.
//!
//! A profile is plain UTF-8 text, one source per non-empty non-comment
//! line, of the form `<kind>-db:<name-or-path>`. The first line decides
//! whether the profile is writable at all.
//!
//! Profile *selection* walks a fixed precedence: an explicit selector from
//! the caller, the mandatory per-uid file, the `STRATUM_PROFILE`
//! environment variable, the per-user runtime profile, a profile named
//! `user` on the search path, and finally a built-in single-user default.

use std::path::PathBuf;

use crate::dirs::Dirs;
use crate::source::Source;

/// Environment variable naming the profile to use.
pub const PROFILE_ENV: &str = "STRATUM_PROFILE";

/// An assembled, ordered source stack.
#[derive(Debug, Default)]
pub struct Profile {
	sources: Vec<Source>,
}

impl Profile {
	/// The built-in default: one writable user database.
	#[must_use]
	pub fn default_profile() -> Profile {
		Profile::assemble(vec![Source::user("user")])
	}

	/// The null profile: no sources at all.
	#[must_use]
	pub fn null() -> Profile {
		Profile::default()
	}

	/// A profile from an explicit source list (for tests and embedders).
	#[must_use]
	pub fn assemble(sources: Vec<Source>) -> Profile {
		let mut profile = Profile { sources };
		if let Some(first) = profile.sources.first_mut()
			&& first.kind_may_write()
		{
			first.set_writable(true);
		}
		profile
	}

	/// Select and load the profile for this process.
	///
	/// `selector` is the caller-supplied profile name or absolute path;
	/// when `None`, the precedence chain of the module documentation
	/// applies. Selection never fails: a named-but-unreadable profile
	/// degrades to the null profile with one warning.
	#[must_use]
	pub fn open(selector: Option<&str>, dirs: &Dirs) -> Profile {
		// Files found implicitly are read directly; only selectors go
		// through the search path.
		let explicit_selector = selector
			.map(str::to_string)
			.or_else(|| {
				let mandatory = dirs.mandatory_profile();
				mandatory
					.exists()
					.then(|| mandatory.to_string_lossy().into_owned())
			})
			.or_else(|| std::env::var(PROFILE_ENV).ok());

		let (candidates, explicit) = match explicit_selector {
			Some(selector) if selector.starts_with('/') => {
				(vec![PathBuf::from(selector)], true)
			}
			Some(selector) => (dirs.profile_candidates(&selector), true),
			None => {
				let runtime = dirs.runtime_profile();
				if runtime.exists() {
					(vec![runtime], true)
				} else {
					(dirs.profile_candidates("user"), false)
				}
			}
		};

		for path in &candidates {
			match std::fs::read_to_string(path) {
				Ok(text) => return Profile::parse(&text),
				Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
				Err(err) => {
					tracing::warn!(
						path = %path.display(),
						%err,
						"cannot read profile; continuing with no sources"
					);
					return Profile::null();
				}
			}
		}

		if explicit {
			tracing::warn!(
				?candidates,
				"profile not found; continuing with no sources"
			);
			Profile::null()
		} else {
			Profile::default_profile()
		}
	}

	/// Parse profile text into a source stack.
	#[must_use]
	pub fn parse(text: &str) -> Profile {
		let mut sources = Vec::new();
		for line in text.lines() {
			let line = line.split('#').next().unwrap_or("").trim();
			if line.is_empty() {
				continue;
			}
			let Some((kind, name)) = line.split_once(':') else {
				tracing::warn!(line, "malformed profile line; skipping");
				continue;
			};
			match kind {
				"user-db" => sources.push(Source::user(name)),
				"system-db" => sources.push(Source::system(name)),
				"service-db" => sources.push(Source::service(name)),
				"file-db" => sources.push(Source::file(name)),
				"proxied-db" => sources.push(Source::proxied(name)),
				other => {
					tracing::warn!(kind = other, "unknown database kind; skipping");
				}
			}
		}
		Profile::assemble(sources)
	}

	#[must_use]
	pub fn sources(&self) -> &[Source] {
		&self.sources
	}

	pub(crate) fn into_sources(self) -> Vec<Source> {
		self.sources
	}

	/// Whether writes can ever succeed against this profile.
	#[must_use]
	pub fn is_writable(&self) -> bool {
		self.sources.first().is_some_and(Source::is_writable)
	}
}
