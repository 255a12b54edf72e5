//! Realtime transaction feed.
//!
//! One websocket per subscribed address, opened at `{ws_url}/v1` with the
//! session cookie. Protocol, one JSON object per text frame:
//!
//! - client: `{"type":"subscribe","payload":{"type":"txs","addresses":[address]}}`
//! - server: `{"type":"tx","payload":{"type":"eth","txid":"0x…"}}`
//! - server: `{"type":"error","payload":…}` when a subscription is refused
//!
//! A close or transport failure yields a `FeedEvent::Error`; the socket is then
//! reopened with capped backoff and a `FeedEvent::Resync` is yielded once the
//! new connection is up. Malformed frames yield data errors and the
//! connection stays open.

use std::pin::Pin;

use backon::BackoffBuilder;
use futures::{stream, SinkExt, Stream, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::{sync::mpsc, task::JoinHandle, time::timeout};
use tokio_tungstenite::{
	connect_async,
	tungstenite::{
		client::IntoClientRequest,
		http::{header::COOKIE, HeaderValue},
		Message,
	},
	MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, info, warn};

use crate::{
	services::indexer::{IndexerClient, IndexerError},
	utils::metrics::INDEXER_RECONNECTS,
};

/// Length of a 0x-prefixed 32 byte transaction id
const TXID_LENGTH: usize = 66;

/// Item of the realtime feed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedEvent {
	/// A transaction involving the address was indexed
	Tx(String),
	/// Transport or data failure, see [`IndexerError::interrupts_feed`]
	Error(IndexerError),
	/// The socket reconnected, notifications may have been missed
	Resync,
}

/// Stream of feed events; dropping it closes the socket
pub type FeedStream = Pin<Box<dyn Stream<Item = FeedEvent> + Send>>;

#[derive(Debug, Deserialize)]
struct ServerMessage {
	#[serde(rename = "type")]
	kind: String,
	#[serde(default)]
	payload: Value,
}

/// Interprets a text frame sent by the indexer
///
/// Returns `None` for frames that carry nothing for the feed (acks, other
/// chains, unknown message types).
pub fn parse_feed_message(text: &str) -> Option<FeedEvent> {
	let message: ServerMessage = match serde_json::from_str(text) {
		Ok(message) => message,
		Err(e) => {
			return Some(FeedEvent::Error(IndexerError::data_error(format!(
				"Indexer sent malformed message: {}",
				e
			))))
		}
	};

	match message.kind.as_str() {
		"tx" => {
			if message.payload.is_null() {
				return Some(FeedEvent::Error(IndexerError::data_error(
					"Indexer sent no tx event data",
				)));
			}
			if message.payload.get("type").and_then(Value::as_str) != Some("eth") {
				return None;
			}
			match message.payload.get("txid").and_then(Value::as_str) {
				Some(txid) if txid.len() == TXID_LENGTH => Some(FeedEvent::Tx(txid.to_string())),
				_ => Some(FeedEvent::Error(IndexerError::data_error(
					"Indexer sent bad tx event data",
				))),
			}
		}
		"error" => Some(FeedEvent::Error(IndexerError::request_error(format!(
			"Indexer refused subscription: {}",
			message.payload
		)))),
		_ => None,
	}
}

struct AbortOnDrop(JoinHandle<()>);

impl Drop for AbortOnDrop {
	fn drop(&mut self) {
		self.0.abort();
	}
}

/// Spawns the socket task of `address` and returns its event stream
pub(crate) fn spawn_feed(client: IndexerClient, address: String) -> FeedStream {
	let (sender, receiver) = mpsc::unbounded_channel();
	let task = AbortOnDrop(tokio::spawn(run_feed(client, address, sender)));

	stream::unfold((receiver, task), |(mut receiver, task)| async move {
		let event = receiver.recv().await?;
		Some((event, (receiver, task)))
	})
	.boxed()
}

enum SessionEnd {
	/// The feed consumer went away
	Abandoned,
	/// The socket closed, with the reason
	Closed(String),
}

async fn run_feed(
	client: IndexerClient,
	address: String,
	sender: mpsc::UnboundedSender<FeedEvent>,
) {
	let cookie = match client.ensure_session().await {
		Ok(cookie) => cookie,
		Err(e) => {
			let _ = sender.send(FeedEvent::Error(e));
			return;
		}
	};

	let mut delays = client.config().backoff().build();
	let mut reconnecting = false;

	loop {
		match connect(&client, &cookie).await {
			Ok(socket) => {
				info!(address = %address, "Indexer connected");
				delays = client.config().backoff().build();
				client.bus().publish_connection_status(true);

				if reconnecting {
					INDEXER_RECONNECTS.inc();
					if sender.send(FeedEvent::Resync).is_err() {
						return;
					}
				}

				match run_session(socket, &address, &sender).await {
					SessionEnd::Abandoned => {
						debug!(address = %address, "feed dropped, closing indexer socket");
						return;
					}
					SessionEnd::Closed(reason) => {
						warn!(address = %address, reason = %reason, "Indexer disconnected");
						client.bus().publish_connection_status(false);
						let error = IndexerError::connection_error(format!(
							"Indexer disconnected with {}",
							reason
						));
						if sender.send(FeedEvent::Error(error)).is_err() {
							return;
						}
					}
				}
			}
			Err(e) => {
				if sender.send(FeedEvent::Error(e)).is_err() {
					return;
				}
			}
		}

		reconnecting = true;
		let delay = delays.next().unwrap_or(client.config().backoff_max);
		tokio::select! {
			_ = sender.closed() => return,
			_ = tokio::time::sleep(delay) => {}
		}
	}
}

async fn connect(
	client: &IndexerClient,
	cookie: &str,
) -> Result<WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>, IndexerError> {
	let url = format!("{}/v1", client.config().ws_url);
	let mut request = url.as_str().into_client_request()?;
	if !cookie.is_empty() {
		let value = HeaderValue::from_str(cookie)
			.map_err(|e| IndexerError::session_error(format!("Invalid cookie: {}", e)))?;
		request.headers_mut().insert(COOKIE, value);
	}

	match timeout(client.config().connect_timeout, connect_async(request)).await {
		Ok(Ok((socket, _))) => Ok(socket),
		Ok(Err(e)) => Err(e.into()),
		Err(_) => Err(IndexerError::connection_error(format!(
			"Timed out connecting to {}",
			url
		))),
	}
}

async fn run_session(
	socket: WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>,
	address: &str,
	sender: &mpsc::UnboundedSender<FeedEvent>,
) -> SessionEnd {
	let (mut write, mut read) = socket.split();

	let subscribe = json!({
		"type": "subscribe",
		"payload": {"type": "txs", "addresses": [address]},
	});
	if let Err(e) = write.send(Message::Text(subscribe.to_string().into())).await {
		return SessionEnd::Closed(e.to_string());
	}

	loop {
		let frame = tokio::select! {
			_ = sender.closed() => return SessionEnd::Abandoned,
			frame = read.next() => frame,
		};

		match frame {
			Some(Ok(Message::Text(text))) => {
				if let Some(event) = parse_feed_message(&text) {
					if sender.send(event).is_err() {
						return SessionEnd::Abandoned;
					}
				}
			}
			Some(Ok(Message::Ping(data))) => {
				if let Err(e) = write.send(Message::Pong(data)).await {
					return SessionEnd::Closed(e.to_string());
				}
			}
			Some(Ok(Message::Close(frame))) => {
				let reason = frame
					.map(|frame| frame.reason.to_string())
					.filter(|reason| !reason.is_empty())
					.unwrap_or_else(|| "io server disconnect".to_string());
				return SessionEnd::Closed(reason);
			}
			Some(Ok(_)) => {}
			Some(Err(e)) => return SessionEnd::Closed(e.to_string()),
			None => return SessionEnd::Closed("transport close".to_string()),
		}
	}
}
