//! The typed value stored under a configuration key.
//!
//! Values are tagged variants carried opaquely through the engine: the engine
//! compares them structurally (for redundant-write suppression and diffs) but
//! never interprets the contents. The writer and the consuming application
//! agree on the schema out of band.

use serde::{Deserialize, Serialize};

/// A configuration value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
	Bool(bool),
	Byte(u8),
	I16(i16),
	U16(u16),
	I32(i32),
	U32(u32),
	I64(i64),
	U64(u64),
	F64(f64),
	Str(String),
	/// A homogeneous list. The engine does not enforce homogeneity; the
	/// writer does.
	List(Vec<Value>),
}

/// The type tag of a [`Value`], without its contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValueKind {
	Bool,
	Byte,
	I16,
	U16,
	I32,
	U32,
	I64,
	U64,
	F64,
	Str,
	List,
}

impl Value {
	/// The type tag for this value.
	#[must_use]
	pub fn kind(&self) -> ValueKind {
		match self {
			Value::Bool(_) => ValueKind::Bool,
			Value::Byte(_) => ValueKind::Byte,
			Value::I16(_) => ValueKind::I16,
			Value::U16(_) => ValueKind::U16,
			Value::I32(_) => ValueKind::I32,
			Value::U32(_) => ValueKind::U32,
			Value::I64(_) => ValueKind::I64,
			Value::U64(_) => ValueKind::U64,
			Value::F64(_) => ValueKind::F64,
			Value::Str(_) => ValueKind::Str,
			Value::List(_) => ValueKind::List,
		}
	}

	/// Borrow the string contents, if this is a `Str`.
	#[must_use]
	pub fn as_str(&self) -> Option<&str> {
		match self {
			Value::Str(s) => Some(s.as_str()),
			_ => None,
		}
	}
}

impl From<bool> for Value {
	fn from(v: bool) -> Self {
		Value::Bool(v)
	}
}

impl From<i32> for Value {
	fn from(v: i32) -> Self {
		Value::I32(v)
	}
}

impl From<i64> for Value {
	fn from(v: i64) -> Self {
		Value::I64(v)
	}
}

impl From<u32> for Value {
	fn from(v: u32) -> Self {
		Value::U32(v)
	}
}

impl From<u64> for Value {
	fn from(v: u64) -> Self {
		Value::U64(v)
	}
}

impl From<f64> for Value {
	fn from(v: f64) -> Self {
		Value::F64(v)
	}
}

impl From<&str> for Value {
	fn from(v: &str) -> Self {
		Value::Str(v.to_string())
	}
}

impl From<String> for Value {
	fn from(v: String) -> Self {
		Value::Str(v)
	}
}
