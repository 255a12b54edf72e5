//! Transaction annotation merging.

use std::{
	collections::HashMap,
	sync::{Arc, Mutex},
};

use serde_json::Value;

use crate::models::Meta;

/// Merges `source` into `target`
///
/// Objects merge recursively, arrays merge index by index and any other
/// value in `source` overwrites the one in `target`.
pub fn deep_merge(target: &mut Meta, source: &Meta) {
	for (key, value) in source {
		match target.get_mut(key) {
			Some(existing) => merge_value(existing, value),
			None => {
				target.insert(key.clone(), value.clone());
			}
		}
	}
}

fn merge_value(target: &mut Value, source: &Value) {
	match (target, source) {
		(Value::Object(target), Value::Object(source)) => deep_merge(target, source),
		(Value::Array(target), Value::Array(source)) => {
			for (index, value) in source.iter().enumerate() {
				match target.get_mut(index) {
					Some(existing) => merge_value(existing, value),
					None => target.push(value.clone()),
				}
			}
		}
		(target, source) => *target = source.clone(),
	}
}

/// Per-hash annotations accumulated across flushes
///
/// Keys are lowercase transaction hashes.
#[derive(Clone, Default)]
pub struct MetaCache {
	entries: Arc<Mutex<HashMap<String, Meta>>>,
}

impl MetaCache {
	pub fn new() -> Self {
		Self::default()
	}

	/// Merges annotations into the cached one and returns the result
	pub fn merge<'a>(&self, hash: &str, metas: impl IntoIterator<Item = &'a Meta>) -> Meta {
		let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
		let cached = entries.entry(hash.to_lowercase()).or_default();
		for meta in metas {
			deep_merge(cached, meta);
		}
		cached.clone()
	}

	pub fn get(&self, hash: &str) -> Option<Meta> {
		self.entries
			.lock()
			.unwrap_or_else(|e| e.into_inner())
			.get(&hash.to_lowercase())
			.cloned()
	}

	pub fn len(&self) -> usize {
		self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}
}
