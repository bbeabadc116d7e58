//! Conversion between [`WireValue`] and native [`Value`].
//!
//! Both directions are partial. Failures carry a [`ValuePath`] pointing at the
//! offending element so callers can report which field or argument was bad.

use std::fmt;

use keyhost_proto::{WireMapEntry, WireValue};
use thiserror::Error;

use crate::value::{Map, Value};

/// One step into a nested value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
	/// Position in a list.
	Index(usize),
	/// Key in a map.
	Key(String),
}

/// Location of an element inside a nested value; empty means the root.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ValuePath(Vec<PathSegment>);

impl ValuePath {
	/// Returns the segments, outermost first.
	#[must_use]
	pub fn segments(&self) -> &[PathSegment] {
		&self.0
	}

	/// Returns true for the root path.
	#[must_use]
	pub fn is_root(&self) -> bool {
		self.0.is_empty()
	}
}

impl fmt::Display for ValuePath {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		if self.0.is_empty() {
			return f.write_str("<root>");
		}
		for (i, seg) in self.0.iter().enumerate() {
			match seg {
				PathSegment::Index(idx) => write!(f, "[{idx}]")?,
				PathSegment::Key(key) if i == 0 => write!(f, "{key}")?,
				PathSegment::Key(key) => write!(f, ".{key}")?,
			}
		}
		Ok(())
	}
}

/// Why a conversion failed.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConversionErrorKind {
	/// `Undefined` has no native counterpart.
	#[error("undefined value has no native representation")]
	Undefined,
	/// Native maps are keyed by strings only.
	#[error("map key must be a string, found {found}")]
	NonStringKey {
		/// Kind of the key that was found.
		found: &'static str,
	},
	/// The same key appeared twice in one wire map.
	#[error("duplicate map key {0:?}")]
	DuplicateKey(String),
	/// NaN and infinities are not representable on the wire.
	#[error("non-finite float {0} cannot be encoded")]
	NonFiniteFloat(f64),
	/// A map was required at this position.
	#[error("expected a map, found {found}")]
	NotAMap {
		/// Kind of the value that was found.
		found: &'static str,
	},
}

/// A value could not be converted to or from its wire form.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{kind} at {path}")]
pub struct ConversionError {
	path: ValuePath,
	kind: ConversionErrorKind,
}

impl ConversionError {
	fn at(path: &[PathSegment], kind: ConversionErrorKind) -> Self {
		Self {
			path: ValuePath(path.to_vec()),
			kind,
		}
	}

	/// Location of the offending element.
	#[must_use]
	pub fn path(&self) -> &ValuePath {
		&self.path
	}

	/// Failure reason.
	#[must_use]
	pub fn kind(&self) -> &ConversionErrorKind {
		&self.kind
	}
}

/// Decodes a wire value into a native value.
///
/// # Errors
///
/// Fails on `Undefined`, on non-string map keys, and on duplicated map keys.
pub fn wire_to_value(wire: &WireValue) -> Result<Value, ConversionError> {
	decode(wire, &mut Vec::new())
}

/// Decodes an import configuration, which must be a string-keyed map.
///
/// # Errors
///
/// Fails like [`wire_to_value`], and with [`ConversionErrorKind::NotAMap`]
/// when the top-level value is not a map.
pub fn wire_to_config(wire: &WireValue) -> Result<Map, ConversionError> {
	match decode(wire, &mut Vec::new())? {
		Value::Map(map) => Ok(map),
		// Null is how an empty configuration block arrives.
		Value::Null => Ok(Map::new()),
		other => Err(ConversionError::at(&[], ConversionErrorKind::NotAMap { found: other.kind() })),
	}
}

/// Encodes a native value for the wire.
///
/// # Errors
///
/// Fails on NaN or infinite floats.
pub fn value_to_wire(value: &Value) -> Result<WireValue, ConversionError> {
	encode(value, &mut Vec::new())
}

fn decode(wire: &WireValue, path: &mut Vec<PathSegment>) -> Result<Value, ConversionError> {
	Ok(match wire {
		WireValue::Undefined => return Err(ConversionError::at(path, ConversionErrorKind::Undefined)),
		WireValue::Null => Value::Null,
		WireValue::Bool(b) => Value::Bool(*b),
		WireValue::Int(i) => Value::Int(*i),
		WireValue::Float(f) => Value::Float(*f),
		WireValue::String(s) => Value::String(s.clone()),
		WireValue::List(items) => {
			let mut out = Vec::with_capacity(items.len());
			for (idx, item) in items.iter().enumerate() {
				path.push(PathSegment::Index(idx));
				out.push(decode(item, path)?);
				path.pop();
			}
			Value::List(out)
		}
		WireValue::Map(entries) => {
			let mut out = Map::new();
			for WireMapEntry { key, value } in entries {
				let WireValue::String(key) = key else {
					return Err(ConversionError::at(
						path,
						ConversionErrorKind::NonStringKey { found: wire_kind(key) },
					));
				};
				path.push(PathSegment::Key(key.clone()));
				let value = decode(value, path)?;
				if out.insert(key.clone(), value).is_some() {
					return Err(ConversionError::at(path, ConversionErrorKind::DuplicateKey(key.clone())));
				}
				path.pop();
			}
			Value::Map(out)
		}
	})
}

fn encode(value: &Value, path: &mut Vec<PathSegment>) -> Result<WireValue, ConversionError> {
	Ok(match value {
		Value::Null => WireValue::Null,
		Value::Bool(b) => WireValue::Bool(*b),
		Value::Int(i) => WireValue::Int(*i),
		Value::Float(f) if !f.is_finite() => {
			return Err(ConversionError::at(path, ConversionErrorKind::NonFiniteFloat(*f)));
		}
		Value::Float(f) => WireValue::Float(*f),
		Value::String(s) => WireValue::String(s.clone()),
		Value::List(items) => {
			let mut out = Vec::with_capacity(items.len());
			for (idx, item) in items.iter().enumerate() {
				path.push(PathSegment::Index(idx));
				out.push(encode(item, path)?);
				path.pop();
			}
			WireValue::List(out)
		}
		Value::Map(map) => {
			let mut out = Vec::with_capacity(map.len());
			for (key, item) in map {
				path.push(PathSegment::Key(key.clone()));
				out.push(WireMapEntry::new(key.clone(), encode(item, path)?));
				path.pop();
			}
			WireValue::Map(out)
		}
	})
}

fn wire_kind(wire: &WireValue) -> &'static str {
	match wire {
		WireValue::Undefined => "undefined",
		WireValue::Null => "null",
		WireValue::Bool(_) => "bool",
		WireValue::Int(_) => "int",
		WireValue::Float(_) => "float",
		WireValue::String(_) => "string",
		WireValue::List(_) => "list",
		WireValue::Map(_) => "map",
	}
}
