//! Resolution of the well-known directories the engine reads from.
//!
//! All filesystem coordinates are resolved once into a [`Dirs`] value at
//! engine construction. Production code uses [`Dirs::from_env`]; tests build
//! a `Dirs` pointing into a temporary directory instead of mutating the
//! process environment.

use std::path::{Path, PathBuf};

/// Resolved filesystem roots for one engine instance.
#[derive(Debug, Clone)]
pub struct Dirs {
	/// `$XDG_RUNTIME_DIR`, falling back to the system temp directory.
	pub runtime_dir: PathBuf,
	/// `$XDG_CONFIG_HOME`, falling back to `~/.config`.
	pub config_home: PathBuf,
	/// System configuration root, normally `/etc`.
	pub sysconf_dir: PathBuf,
	/// Early-boot runtime root, normally `/run`.
	pub run_dir: PathBuf,
	/// `$XDG_DATA_DIRS` entries, in search order.
	pub data_dirs: Vec<PathBuf>,
	/// The calling user's uid, for the mandatory per-uid profile.
	pub uid: u32,
}

impl Dirs {
	/// Resolve from the process environment.
	#[must_use]
	pub fn from_env() -> Self {
		let runtime_dir = std::env::var_os("XDG_RUNTIME_DIR")
			.map(PathBuf::from)
			.or_else(dirs::runtime_dir)
			.unwrap_or_else(std::env::temp_dir);

		let config_home = std::env::var_os("XDG_CONFIG_HOME")
			.map(PathBuf::from)
			.or_else(dirs::config_dir)
			.unwrap_or_else(|| PathBuf::from("/"));

		let data_dirs = match std::env::var("XDG_DATA_DIRS") {
			Ok(list) if !list.is_empty() => list.split(':').map(PathBuf::from).collect(),
			_ => vec![
				PathBuf::from("/usr/local/share"),
				PathBuf::from("/usr/share"),
			],
		};

		Self {
			runtime_dir,
			config_home,
			sysconf_dir: PathBuf::from("/etc"),
			run_dir: PathBuf::from("/run"),
			data_dirs,
			uid: rustix::process::getuid().as_raw(),
		}
	}

	/// Directory holding the one-byte invalidation flag files.
	#[must_use]
	pub fn shm_dir(&self) -> PathBuf {
		self.runtime_dir.join("stratum/shm")
	}

	/// Backing file for a user database.
	#[must_use]
	pub fn user_db(&self, name: &str) -> PathBuf {
		self.config_home.join("stratum").join(name)
	}

	/// Backing file for a system database.
	#[must_use]
	pub fn system_db(&self, name: &str) -> PathBuf {
		self.sysconf_dir.join("stratum/db").join(name)
	}

	/// Backing file a service writer materialises on demand.
	#[must_use]
	pub fn service_db(&self, name: &str) -> PathBuf {
		self.runtime_dir.join("stratum").join(name)
	}

	/// Backing file for a confined application's proxied database.
	#[must_use]
	pub fn proxied_db(&self, app_id: &str) -> PathBuf {
		self.runtime_dir.join("stratum/app").join(app_id)
	}

	/// The mandatory per-uid profile installed by the system.
	#[must_use]
	pub fn mandatory_profile(&self) -> PathBuf {
		self.run_dir.join("stratum/user").join(self.uid.to_string())
	}

	/// The per-user runtime profile.
	#[must_use]
	pub fn runtime_profile(&self) -> PathBuf {
		self.runtime_dir.join("stratum/profile")
	}

	/// Candidate files for a named profile, in search order: the system
	/// configuration directory first, then each data directory.
	#[must_use]
	pub fn profile_candidates(&self, name: &str) -> Vec<PathBuf> {
		let mut candidates = vec![self.sysconf_dir.join("stratum/profile").join(name)];
		for data_dir in &self.data_dirs {
			candidates.push(data_dir.join("stratum/profile").join(name));
		}
		candidates
	}

	/// A `Dirs` rooted entirely under `root`, for tests.
	#[must_use]
	pub fn rooted_at(root: &Path) -> Self {
		Self {
			runtime_dir: root.join("runtime"),
			config_home: root.join("config"),
			sysconf_dir: root.join("etc"),
			run_dir: root.join("run"),
			data_dirs: vec![root.join("share")],
			uid: rustix::process::getuid().as_raw(),
		}
	}
}
