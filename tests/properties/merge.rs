use proptest::{prelude::*, test_runner::Config};
use serde_json::{Map, Value};

use wallet_tx_sync::services::queue::{deep_merge, MetaCache};

use crate::properties::strategies::meta_strategy;

/// Whether every value of `source` is reflected in `merged`
///
/// Arrays of `merged` may be longer than the ones of `source`.
fn reflects(merged: &Value, source: &Value) -> bool {
	match (merged, source) {
		(Value::Object(merged), Value::Object(source)) => reflects_meta(merged, source),
		(Value::Array(merged), Value::Array(source)) => {
			merged.len() >= source.len()
				&& merged
					.iter()
					.zip(source)
					.all(|(merged, source)| reflects(merged, source))
		}
		(merged, source) => merged == source,
	}
}

fn reflects_meta(merged: &Map<String, Value>, source: &Map<String, Value>) -> bool {
	source
		.iter()
		.all(|(key, value)| merged.get(key).is_some_and(|merged| reflects(merged, value)))
}

fn prefixed(meta: Map<String, Value>, prefix: &str) -> Map<String, Value> {
	meta.into_iter()
		.map(|(key, value)| (format!("{}{}", prefix, key), value))
		.collect()
}

proptest! {
	#![proptest_config(Config {
		failure_persistence: None,
		..Config::default()
	})]

	#[test]
	fn test_merge_is_idempotent(target in meta_strategy(), source in meta_strategy()) {
		let mut once = target.clone();
		deep_merge(&mut once, &source);
		let mut twice = once.clone();
		deep_merge(&mut twice, &source);
		prop_assert_eq!(once, twice);
	}

	#[test]
	fn test_merged_meta_reflects_the_source(target in meta_strategy(), source in meta_strategy()) {
		let mut merged = target.clone();
		deep_merge(&mut merged, &source);
		prop_assert!(reflects_meta(&merged, &source));
		// keys are never dropped
		for key in target.keys() {
			prop_assert!(merged.contains_key(key));
		}
	}

	#[test]
	fn test_empty_source_changes_nothing(target in meta_strategy()) {
		let mut merged = target.clone();
		deep_merge(&mut merged, &Map::new());
		prop_assert_eq!(merged, target);
	}

	#[test]
	fn test_disjoint_metas_merge_in_any_order(first in meta_strategy(), second in meta_strategy()) {
		let first = prefixed(first, "first_");
		let second = prefixed(second, "second_");

		let forward = MetaCache::new().merge("0xab", [&first, &second]);
		let backward = MetaCache::new().merge("0xAB", [&second, &first]);
		prop_assert_eq!(forward, backward);
	}

	#[test]
	fn test_cache_accumulates_across_merges(first in meta_strategy(), second in meta_strategy()) {
		let cache = MetaCache::new();
		cache.merge("0xab", [&first]);
		let accumulated = cache.merge("0xAB", [&second]);

		let mut expected = first.clone();
		deep_merge(&mut expected, &second);
		prop_assert_eq!(&accumulated, &expected);
		prop_assert_eq!(cache.get("0xab"), Some(expected));
		prop_assert_eq!(cache.len(), 1);
	}
}
