//! Matching of receipt logs against registered events.

use tracing::debug;

use crate::{
	models::{EventDescriptor, EvmLog, RawEvent},
	services::blockchain::CoinAdapter,
};

/// Decodes a receipt log for every descriptor it belongs to
///
/// A log belongs to a descriptor when it was emitted by the descriptor's
/// contract, its first topic is the event selector and its decoded
/// parameters satisfy the descriptor filter. Logs that fail to decode are
/// skipped.
pub fn try_parse_event_log<'a>(
	adapter: &dyn CoinAdapter,
	descriptors: &'a [EventDescriptor],
	log: &EvmLog,
	tx_hash: &str,
) -> Vec<(&'a EventDescriptor, RawEvent)> {
	descriptors
		.iter()
		.filter_map(|descriptor| {
			let schema = descriptor.event_schema()?;
			if schema.anonymous
				|| !log
					.address
					.to_string()
					.eq_ignore_ascii_case(&descriptor.contract_address)
				|| log.topics.first() != Some(&schema.selector())
			{
				return None;
			}

			let return_values = match adapter.parse_return_values(log, schema) {
				Ok(values) => values,
				Err(e) => {
					debug!(tx_hash = %tx_hash, event = %descriptor.event_name, "log not decodable: {}", e);
					return None;
				}
			};
			if !descriptor.matches(&return_values) {
				return None;
			}

			Some((
				descriptor,
				RawEvent {
					address: descriptor.contract_address.clone(),
					event: descriptor.event_name.clone(),
					return_values,
					transaction_hash: tx_hash.to_string(),
					block_number: log.block_number.map(|number| number.to::<u64>()),
					log_index: log.log_index.map(|index| index.to::<u64>()),
				},
			))
		})
		.collect()
}
