//! One layer of the configuration stack.
//!
//! A [`Source`] couples static coordinates (name, kind, bus address) with a
//! database handle that is opened lazily and reopened when the backing file
//! is replaced. The static attributes never change after construction; only
//! the open [`Table`] and per-kind bookkeeping do.
//!
//! Kind-specific behaviour lives behind the small `SourceOps` capability
//! trait: each kind decides when its table is stale (`needs_reopen`), how to
//! produce a fresh one (`reopen`), and what to tear down (`finalize`).

use std::path::{Path, PathBuf};

use stratum_proto::wire::{
	BusCall, BusKind, MethodCall, proxied_object_path, writer_object_path,
};

use crate::bus::Bus;
use crate::db::{FileIdentity, Table};
use crate::dirs::Dirs;
use crate::shm::ShmFlag;

/// Everything a kind needs while (re)opening its table.
pub(crate) struct SourceCtx<'a> {
	pub name: &'a str,
	pub file_path: &'a Path,
	pub dirs: &'a Dirs,
	pub bus: &'a dyn Bus,
	pub bus_kind: Option<BusKind>,
	pub object_path: Option<&'a str>,
}

/// Per-kind open/reopen behaviour.
pub(crate) trait SourceOps {
	/// Prepare kind state once, before the first refresh.
	fn init(&mut self, _ctx: &SourceCtx<'_>) {}

	/// Whether the currently open table (if any) is stale.
	fn needs_reopen(&self, ctx: &SourceCtx<'_>, current: Option<&Table>) -> bool;

	/// Produce a fresh table, or `None` to enter the "no values" steady
	/// state.
	fn reopen(&mut self, ctx: &SourceCtx<'_>) -> Option<Table>;

	/// Release kind state at engine teardown.
	fn finalize(&mut self) {}
}

/// The user's own database, invalidated through the SHM flag.
#[derive(Debug, Default)]
struct UserSource {
	flag: Option<ShmFlag>,
	opened: bool,
}

impl SourceOps for UserSource {
	fn init(&mut self, ctx: &SourceCtx<'_>) {
		self.flag = ShmFlag::open(&ctx.dirs.shm_dir(), ctx.name);
	}

	fn needs_reopen(&self, _ctx: &SourceCtx<'_>, _current: Option<&Table>) -> bool {
		if !self.opened {
			return true;
		}
		// A missing flag mapping means we cannot observe invalidation, so
		// every refresh reopens.
		match &self.flag {
			Some(flag) => flag.is_flagged(),
			None => true,
		}
	}

	fn reopen(&mut self, ctx: &SourceCtx<'_>) -> Option<Table> {
		self.opened = true;
		self.flag = ShmFlag::open(&ctx.dirs.shm_dir(), ctx.name);
		Table::open(ctx.file_path).ok()
	}

	fn finalize(&mut self) {
		self.flag = None;
	}
}

/// A read-only database backed by a plain file (`system` and `file` kinds).
#[derive(Debug, Default)]
struct FileSource {
	attempted: bool,
	warned: bool,
}

impl FileSource {
	fn identity_changed(current: Option<&Table>, path: &Path) -> bool {
		match (current, FileIdentity::stat(path)) {
			(Some(table), Some(identity)) => table.identity() != identity,
			(Some(_), None) | (None, Some(_)) => true,
			(None, None) => false,
		}
	}
}

impl SourceOps for FileSource {
	fn needs_reopen(&self, ctx: &SourceCtx<'_>, current: Option<&Table>) -> bool {
		!self.attempted || Self::identity_changed(current, ctx.file_path)
	}

	fn reopen(&mut self, ctx: &SourceCtx<'_>) -> Option<Table> {
		let first = !self.attempted;
		self.attempted = true;
		match Table::open(ctx.file_path) {
			Ok(table) => Some(table),
			Err(err) => {
				if first && !self.warned {
					self.warned = true;
					tracing::warn!(
						name = ctx.name,
						path = %ctx.file_path.display(),
						%err,
						"cannot open database; treating it as empty"
					);
				}
				None
			}
		}
	}
}

/// A database materialised on demand by the writer (`service` and `proxied`
/// kinds).
#[derive(Debug, Default)]
struct ServiceSource {
	attempted: bool,
	init_sent: bool,
}

impl SourceOps for ServiceSource {
	fn needs_reopen(&self, ctx: &SourceCtx<'_>, current: Option<&Table>) -> bool {
		!self.attempted || FileSource::identity_changed(current, ctx.file_path)
	}

	fn reopen(&mut self, ctx: &SourceCtx<'_>) -> Option<Table> {
		self.attempted = true;
		if let Ok(table) = Table::open(ctx.file_path) {
			return Some(table);
		}
		// Ask the writer to materialise the file, once, then retry.
		if self.init_sent {
			return None;
		}
		self.init_sent = true;
		let (bus_kind, object_path) = (ctx.bus_kind?, ctx.object_path?);
		let call = BusCall::writer(bus_kind, object_path, MethodCall::Init);
		if let Err(err) = ctx.bus.call_sync(call, None) {
			tracing::debug!(name = ctx.name, %err, "writer Init failed");
		}
		Table::open(ctx.file_path).ok()
	}
}

/// The kind tag plus kind-owned state.
#[derive(Debug)]
enum SourceKind {
	User(UserSource),
	System(FileSource),
	File(FileSource),
	Service(ServiceSource),
	Proxied(ServiceSource),
}

impl SourceKind {
	fn ops(&mut self) -> &mut dyn SourceOps {
		match self {
			SourceKind::User(state) => state,
			SourceKind::System(state) | SourceKind::File(state) => state,
			SourceKind::Service(state) | SourceKind::Proxied(state) => state,
		}
	}

	fn ops_ref(&self) -> &dyn SourceOps {
		match self {
			SourceKind::User(state) => state,
			SourceKind::System(state) | SourceKind::File(state) => state,
			SourceKind::Service(state) | SourceKind::Proxied(state) => state,
		}
	}

	fn label(&self) -> &'static str {
		match self {
			SourceKind::User(_) => "user",
			SourceKind::System(_) => "system",
			SourceKind::File(_) => "file",
			SourceKind::Service(_) => "service",
			SourceKind::Proxied(_) => "proxied",
		}
	}
}

/// One layer of the stack.
#[derive(Debug)]
pub struct Source {
	name: String,
	kind: SourceKind,
	writable: bool,
	bus_kind: Option<BusKind>,
	object_path: Option<String>,
	file_path: PathBuf,
	values: Option<Table>,
}

impl Source {
	fn new(name: String, kind: SourceKind) -> Source {
		let (bus_kind, object_path) = match &kind {
			SourceKind::User(_) | SourceKind::Service(_) => {
				(Some(BusKind::Session), Some(writer_object_path(&name)))
			}
			SourceKind::Proxied(_) => {
				(Some(BusKind::Session), Some(proxied_object_path(&name)))
			}
			SourceKind::System(_) | SourceKind::File(_) => (None, None),
		};
		Source {
			name,
			kind,
			writable: false,
			bus_kind,
			object_path,
			file_path: PathBuf::new(),
			values: None,
		}
	}

	/// The user's writable database.
	#[must_use]
	pub fn user(name: &str) -> Source {
		Self::new(name.to_string(), SourceKind::User(UserSource::default()))
	}

	/// A read-only system database.
	#[must_use]
	pub fn system(name: &str) -> Source {
		Self::new(name.to_string(), SourceKind::System(FileSource::default()))
	}

	/// A read-only database at an absolute path.
	#[must_use]
	pub fn file(path: &str) -> Source {
		Self::new(path.to_string(), SourceKind::File(FileSource::default()))
	}

	/// A database the writer materialises on first access.
	#[must_use]
	pub fn service(name: &str) -> Source {
		Self::new(
			name.to_string(),
			SourceKind::Service(ServiceSource::default()),
		)
	}

	/// A confined application's per-app database.
	#[must_use]
	pub fn proxied(app_id: &str) -> Source {
		Self::new(
			app_id.to_string(),
			SourceKind::Proxied(ServiceSource::default()),
		)
	}

	/// Whether this kind may ever accept writes (only relevant for the
	/// first source of a profile).
	#[must_use]
	pub(crate) fn kind_may_write(&self) -> bool {
		matches!(self.kind, SourceKind::User(_) | SourceKind::Proxied(_))
	}

	pub(crate) fn set_writable(&mut self, writable: bool) {
		self.writable = writable;
	}

	/// Resolve the backing file path and prepare kind state.
	pub(crate) fn init(&mut self, dirs: &Dirs, bus: &dyn Bus) {
		self.file_path = match &self.kind {
			SourceKind::User(_) => dirs.user_db(&self.name),
			SourceKind::System(_) => dirs.system_db(&self.name),
			SourceKind::File(_) => PathBuf::from(&self.name),
			SourceKind::Service(_) => dirs.service_db(&self.name),
			SourceKind::Proxied(_) => dirs.proxied_db(&self.name),
		};
		let ctx = SourceCtx {
			name: &self.name,
			file_path: &self.file_path,
			dirs,
			bus,
			bus_kind: self.bus_kind,
			object_path: self.object_path.as_deref(),
		};
		self.kind.ops().init(&ctx);
	}

	/// Re-examine the backing file, reopening it if stale.
	///
	/// Returns `true` iff the open database identity changed.
	pub(crate) fn refresh(&mut self, dirs: &Dirs, bus: &dyn Bus) -> bool {
		let ctx = SourceCtx {
			name: &self.name,
			file_path: &self.file_path,
			dirs,
			bus,
			bus_kind: self.bus_kind,
			object_path: self.object_path.as_deref(),
		};
		if !self.kind.ops_ref().needs_reopen(&ctx, self.values.as_ref()) {
			return false;
		}
		let before = self.values.as_ref().map(Table::identity);
		self.values = self.kind.ops().reopen(&ctx);
		let after = self.values.as_ref().map(Table::identity);
		before != after
	}

	#[must_use]
	pub fn name(&self) -> &str {
		&self.name
	}

	/// Stable label for the kind, for diagnostics.
	#[must_use]
	pub fn kind_label(&self) -> &'static str {
		self.kind.label()
	}

	#[must_use]
	pub fn is_writable(&self) -> bool {
		self.writable
	}

	/// The bus this source's writer lives on, with its object path.
	#[must_use]
	pub fn bus_coords(&self) -> Option<(BusKind, &str)> {
		Some((self.bus_kind?, self.object_path.as_deref()?))
	}

	/// The currently open table, if any.
	#[must_use]
	pub fn values(&self) -> Option<&Table> {
		self.values.as_ref()
	}

	/// Whether this layer locks `key`.
	#[must_use]
	pub fn locks_key(&self, key: &str) -> bool {
		self.values
			.as_ref()
			.and_then(Table::locks)
			.is_some_and(|locks| locks.has(key))
	}
}

impl Drop for Source {
	fn drop(&mut self) {
		self.kind.ops().finalize();
	}
}
