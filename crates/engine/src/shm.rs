//! One-byte invalidation flags shared with the writer service.
//!
//! For a database named `N` there is a one-byte file `<shm-dir>/N`. The
//! reader maps it and polls the byte; the writer sets the byte to `0xff`
//! through a plain file-descriptor write after rewriting the database, then
//! unlinks the file so the next reader open starts from a fresh zero byte.
//!
//! The mapping never moves for the lifetime of a [`ShmFlag`]. A reader that
//! cannot create its flag file treats the database as permanently flagged
//! and reopens on every refresh.

use std::fs::OpenOptions;
use std::io;
use std::os::unix::fs::FileExt;
use std::path::Path;

use memmap2::Mmap;

/// A read-side mapping of one invalidation flag byte.
#[derive(Debug)]
pub struct ShmFlag {
	map: Mmap,
}

impl ShmFlag {
	/// Create (zeroed) and map the flag file for `name`.
	///
	/// Returns `None` when the file cannot be created or mapped; the
	/// caller must then treat the database as permanently flagged.
	pub fn open(shm_dir: &Path, name: &str) -> Option<ShmFlag> {
		match Self::try_open(shm_dir, name) {
			Ok(flag) => Some(flag),
			Err(err) => {
				tracing::error!(name, %err, "cannot establish invalidation flag");
				None
			}
		}
	}

	fn try_open(shm_dir: &Path, name: &str) -> io::Result<ShmFlag> {
		std::fs::create_dir_all(shm_dir)?;
		let file = OpenOptions::new()
			.read(true)
			.write(true)
			.create(true)
			.truncate(false)
			.open(shm_dir.join(name))?;
		if file.metadata()?.len() < 1 {
			file.set_len(1)?;
		}
		// Safety note is the usual mmap one: the writer only ever stores a
		// single byte at offset 0, which we re-read through the mapping.
		let map = unsafe { Mmap::map(&file)? };
		Ok(ShmFlag { map })
	}

	/// Whether the writer has flagged this database since the mapping was
	/// established.
	#[must_use]
	pub fn is_flagged(&self) -> bool {
		self.map[0] != 0
	}
}

/// Writer-side primitive: set the flag byte for `name` and retire the file.
///
/// Idempotent; flagging a missing file is a no-op since any future reader
/// open observes the rewritten database anyway.
pub fn flag(shm_dir: &Path, name: &str) -> io::Result<()> {
	let path = shm_dir.join(name);
	let file = match OpenOptions::new().write(true).open(&path) {
		Ok(file) => file,
		Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(()),
		Err(err) => return Err(err),
	};
	file.write_at(&[0xff], 0)?;
	std::fs::remove_file(&path)
}
