//! The broadcast hub: persistent bidirectional subscriber connections.
//!
//! Every subscriber gets the same contract: a `connection_ack`, then a
//! `bulk` frame holding the active set, then each store change as its own
//! frame, in store-writer order. Back-pressure is per subscriber — the
//! store enqueues into this subscriber's bounded queue and drops the
//! subscriber when it fills — so one stuck consumer can never stall the
//! pipeline or starve its peers.

use crate::alert::Alert;
use crate::store::{AlertStore, StoreEvent};
use axum::extract::ws::{Message, WebSocket};
use chrono::{DateTime, Utc};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Per-subscriber outbound queue bound; reaching it disconnects the
/// subscriber as a slow consumer.
pub const SUBSCRIBER_QUEUE_BOUND: usize = 256;

/// Server-side ping after this much inbound silence.
const INBOUND_IDLE: Duration = Duration::from_secs(45);
/// Close after a ping goes unanswered this long.
const PING_GRACE: Duration = Duration::from_secs(30);
/// Per-subscriber drain deadline during shutdown.
const SHUTDOWN_DRAIN: Duration = Duration::from_secs(5);

/// The kind tag of an outbound frame.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameType {
    /// First frame after connect
    ConnectionAck,
    /// Snapshot of the active set
    Bulk,
    /// An alert entered the active set
    New,
    /// An alert was replaced by a newer product
    Update,
    /// An alert left the active set
    Remove,
    /// Server lifecycle notices
    SystemStatus,
    /// Reply to an application-level ping
    Pong,
    /// The inbound frame was not understood
    Error,
}

/// One outbound frame: `{type, data, timestamp}`.
#[derive(Debug, Clone, Serialize)]
pub struct Frame {
    /// Frame kind
    #[serde(rename = "type")]
    pub frame_type: FrameType,
    /// Kind-specific payload
    pub data: serde_json::Value,
    /// When the frame was built
    pub timestamp: DateTime<Utc>,
}

impl Frame {
    fn new(frame_type: FrameType, data: serde_json::Value) -> Self {
        Self {
            frame_type,
            data,
            timestamp: Utc::now(),
        }
    }

    /// The `connection_ack` frame.
    pub fn connection_ack(subscriber_id: u64) -> Self {
        Self::new(
            FrameType::ConnectionAck,
            json!({ "subscriber_id": subscriber_id }),
        )
    }

    /// The `bulk` snapshot frame.
    pub fn bulk(alerts: &[Alert]) -> Self {
        Self::new(
            FrameType::Bulk,
            json!({ "count": alerts.len(), "alerts": alerts }),
        )
    }

    /// A store event as its outbound frame.
    pub fn for_event(event: &StoreEvent) -> Self {
        match event {
            StoreEvent::Added(alert) => Self::new(FrameType::New, json!({ "alert": alert })),
            StoreEvent::Updated { alert, previous_id } => Self::new(
                FrameType::Update,
                json!({ "alert": alert, "previous_product_id": previous_id }),
            ),
            StoreEvent::Removed { alert, reason } => Self::new(
                FrameType::Remove,
                json!({
                    "product_id": alert.product_id,
                    "event_name": alert.event_name,
                    "reason": reason,
                }),
            ),
        }
    }

    /// A `system_status` frame.
    pub fn system_status(status: &str) -> Self {
        Self::new(FrameType::SystemStatus, json!({ "status": status }))
    }

    /// The `pong` frame.
    pub fn pong() -> Self {
        Self::new(FrameType::Pong, serde_json::Value::Null)
    }

    /// An `error` frame.
    pub fn error(reason: &str) -> Self {
        Self::new(FrameType::Error, json!({ "reason": reason }))
    }

    fn into_message(self) -> Message {
        Message::Text(serde_json::to_string(&self).expect("frames serialize"))
    }
}

/// A server-side subscription filter, settable via the `subscribe` inbound
/// frame. Empty lists accept everything.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SubscriberFilter {
    /// Keep alerts touching any of these two-letter states
    #[serde(default)]
    pub states: Vec<String>,
    /// Keep alerts with any of these phenomenon codes
    #[serde(default)]
    pub phenomena: Vec<String>,
}

impl SubscriberFilter {
    fn matches(&self, alert: &Alert) -> bool {
        let state_ok = self.states.is_empty()
            || alert
                .affected_areas
                .iter()
                .any(|zone| self.states.iter().any(|s| zone.state() == s.as_str()));
        let phenomenon_ok = self.phenomena.is_empty()
            || self
                .phenomena
                .iter()
                .any(|p| alert.phenomenon.as_code() == p.as_str());
        state_ok && phenomenon_ok
    }

    fn event_matches(&self, event: &StoreEvent) -> bool {
        match event {
            StoreEvent::Added(alert) => self.matches(alert),
            StoreEvent::Updated { alert, .. } => self.matches(alert),
            StoreEvent::Removed { alert, .. } => self.matches(alert),
        }
    }
}

/// Inbound control frames. Anything else is answered `error:unsupported`.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum InboundFrame {
    /// Application-level keep-alive
    Ping,
    /// Install a server-side filter
    Subscribe {
        #[serde(default)]
        filter: SubscriberFilter,
    },
    /// Position report passed through to the side channel
    ChaserPositionUpdate {
        #[serde(default)]
        data: serde_json::Value,
    },
    /// Any other type tag
    #[serde(other)]
    Unsupported,
}

/// Shared context for subscriber sessions.
#[derive(Clone)]
pub struct Hub {
    /// The store subscribers attach to
    pub store: Arc<AlertStore>,
    /// Side channel for `chaser_position_update` frames
    pub chaser: mpsc::Sender<serde_json::Value>,
    /// Cascading shutdown signal
    pub shutdown: CancellationToken,
}

impl Hub {
    /// Drive one subscriber connection to completion.
    ///
    /// Protocol: `connection_ack`, `bulk`, then events in store order.
    /// Heartbeat: after 45 s of inbound silence a protocol ping goes out;
    /// 30 more silent seconds close the connection. On shutdown the
    /// subscriber gets `system_status: shutting_down` and a 5 s drain.
    pub async fn serve_subscriber(self, socket: WebSocket) {
        let subscription = self.store.subscribe();
        let subscriber_id = subscription.id;
        info!(subscriber = subscriber_id, "subscriber connected");

        let (mut sink, mut stream) = socket.split();
        let mut events = subscription.events;
        let mut filter = SubscriberFilter::default();

        let hello = async {
            sink.send(Frame::connection_ack(subscriber_id).into_message())
                .await?;
            sink.send(Frame::bulk(&subscription.snapshot).into_message())
                .await
        };
        if hello.await.is_err() {
            debug!(subscriber = subscriber_id, "subscriber left during hello");
            self.store.unsubscribe(subscriber_id);
            return;
        }

        let mut last_inbound = Instant::now();
        let mut ping_deadline: Option<Instant> = None;

        let disconnect_reason = loop {
            let idle_deadline = match ping_deadline {
                Some(deadline) => deadline,
                None => last_inbound + INBOUND_IDLE,
            };

            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    let goodbye = Frame::system_status("shutting_down").into_message();
                    let _ = tokio::time::timeout(SHUTDOWN_DRAIN, sink.send(goodbye)).await;
                    let _ = tokio::time::timeout(SHUTDOWN_DRAIN, sink.close()).await;
                    break "shutdown";
                }

                event = events.recv() => {
                    match event {
                        Some(event) => {
                            if !filter.event_matches(&event) {
                                continue;
                            }
                            if sink.send(Frame::for_event(&event).into_message()).await.is_err() {
                                break "socket closed";
                            }
                        }
                        // The store dropped us: the queue overflowed.
                        None => {
                            let notice = Frame::error("slow_consumer").into_message();
                            let _ = sink.send(notice).await;
                            let _ = sink.close().await;
                            break "slow_consumer";
                        }
                    }
                }

                inbound = stream.next() => {
                    last_inbound = Instant::now();
                    ping_deadline = None;
                    match inbound {
                        None | Some(Err(_)) => break "socket closed",
                        Some(Ok(Message::Close(_))) => break "client close",
                        Some(Ok(Message::Text(text))) => {
                            if let Err(reason) = self
                                .handle_inbound(&text, &mut filter, &mut sink)
                                .await
                            {
                                break reason;
                            }
                        }
                        // Protocol ping/pong and binary frames are traffic,
                        // nothing more.
                        Some(Ok(_)) => {}
                    }
                }

                _ = tokio::time::sleep_until(idle_deadline) => {
                    match ping_deadline {
                        None => {
                            // Quiet too long: ping, then wait a grace period.
                            if sink.send(Message::Ping(Vec::new())).await.is_err() {
                                break "socket closed";
                            }
                            ping_deadline = Some(Instant::now() + PING_GRACE);
                        }
                        Some(_) => break "heartbeat timeout",
                    }
                }
            }
        };

        self.store.unsubscribe(subscriber_id);
        info!(
            subscriber = subscriber_id,
            reason = disconnect_reason,
            "subscriber disconnected"
        );
    }

    async fn handle_inbound(
        &self,
        text: &str,
        filter: &mut SubscriberFilter,
        sink: &mut (impl futures::Sink<Message, Error = axum::Error> + Unpin),
    ) -> Result<(), &'static str> {
        let frame = match serde_json::from_str::<InboundFrame>(text) {
            Ok(frame) => frame,
            Err(_) => {
                return sink
                    .send(Frame::error("unsupported").into_message())
                    .await
                    .map_err(|_| "socket closed");
            }
        };

        match frame {
            InboundFrame::Ping => sink
                .send(Frame::pong().into_message())
                .await
                .map_err(|_| "socket closed"),
            InboundFrame::Subscribe { filter: requested } => {
                debug!(?requested, "subscriber filter installed");
                *filter = requested;
                Ok(())
            }
            InboundFrame::ChaserPositionUpdate { data } => {
                // Out of scope here; hand to the side channel if anyone
                // is listening.
                if self.chaser.try_send(data).is_err() {
                    warn!("chaser side channel full or absent");
                }
                Ok(())
            }
            InboundFrame::Unsupported => sink
                .send(Frame::error("unsupported").into_message())
                .await
                .map_err(|_| "socket closed"),
        }
    }
}
