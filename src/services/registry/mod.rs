//! Event registry.
//!
//! Holds the contract event registrations the engine watches. Registrations
//! are address-parameterized factories materialized lazily per synced
//! address. The list is append-only for the lifetime of the process.

use std::sync::{Arc, RwLock};

use tracing::debug;

use crate::models::{DescriptorFactory, EventDescriptor};

/// Append-only list of event descriptor factories
#[derive(Clone, Default)]
pub struct EventRegistry {
	factories: Arc<RwLock<Vec<DescriptorFactory>>>,
}

impl EventRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	/// Appends a descriptor factory
	pub fn register(&self, factory: DescriptorFactory) {
		let mut factories = self.factories.write().unwrap_or_else(|e| e.into_inner());
		factories.push(factory);
		debug!(registrations = factories.len(), "event registered");
	}

	/// Returns a snapshot of every registered factory
	pub fn get_all(&self) -> Vec<DescriptorFactory> {
		self.factories
			.read()
			.unwrap_or_else(|e| e.into_inner())
			.clone()
	}

	/// Materializes every registration for an address
	pub fn descriptors_for(&self, address: &str) -> Vec<EventDescriptor> {
		self.get_all()
			.iter()
			.map(|factory| factory(address))
			.collect()
	}

	pub fn len(&self) -> usize {
		self.factories.read().unwrap_or_else(|e| e.into_inner()).len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}
}
