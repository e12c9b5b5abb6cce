//! The push source: a long-lived NWWS-OI XMPP client.
//!
//! NWWS-OI (NOAA Weather Wire Service Open Interface) is an XMPP server
//! whose `nwws@conference` multi-user chat room broadcasts every product
//! the NWS issues, near real time. Each room message carries an
//! `<x xmlns="nwws-oi">` payload whose text is the raw product body.
//!
//! The client runs in its own task. It reconnects forever with jittered
//! exponential backoff; only an authentication failure is fatal, surfaced
//! to the supervisor through the run result. Received product bodies are
//! handed off in room-delivery order.

use crate::config::NwwsConfig;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use rand::Rng;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use xmpp_parsers::message::{Message, MessageType};
use xmpp_parsers::muc::Muc;
use xmpp_parsers::presence::{Presence, Type as PresenceType};
use xmpp_parsers::{Element, FullJid, Jid};

/// A raw product body received from the wire, not yet parsed.
#[derive(Debug, Clone)]
pub struct RawProduct {
    /// The product text as broadcast
    pub body: String,
    /// When this process received it
    pub received_at: DateTime<Utc>,
}

/// Shared liveness view of one source, readable without blocking it.
#[derive(Debug, Default)]
pub struct SourceHealth {
    connected: AtomicBool,
    received: AtomicU64,
}

impl SourceHealth {
    /// True while the source's transport is up.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    /// Monotonic count of products (or polls) received.
    pub fn received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }

    /// Mark the transport up or down.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::Relaxed);
    }

    /// Count one received product or poll.
    pub fn count_received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }
}

/// The error that ends the push source for good.
#[derive(thiserror::Error, Debug)]
pub enum WireError {
    /// The configured account is not usable; retrying would loop forever
    #[error("NWWS authentication failed: {0}")]
    Authentication(String),
    /// The configured account JID cannot be constructed
    #[error("invalid NWWS account: {0}")]
    InvalidAccount(String),
    /// The receiving side of the pipeline went away
    #[error("product channel closed")]
    ChannelClosed,
}

const INITIAL_BACKOFF: Duration = Duration::from_secs(2);
const MAX_BACKOFF: Duration = Duration::from_secs(60);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(20);
const SHUTDOWN_DRAIN: Duration = Duration::from_secs(2);

/// The NWWS-OI client. See the [module docs](self).
pub struct NwwsSource {
    config: NwwsConfig,
    health: Arc<SourceHealth>,
}

impl NwwsSource {
    /// Build a source and the health handle that outlives it.
    pub fn new(config: NwwsConfig) -> (Self, Arc<SourceHealth>) {
        let health = Arc::new(SourceHealth::default());
        (
            Self {
                config,
                health: health.clone(),
            },
            health,
        )
    }

    /// Run until shutdown, forwarding each product body into `products`.
    ///
    /// Transport drops reconnect with exponential backoff (2 s doubling to
    /// a 60 s ceiling, full jitter). Authentication failures return
    /// [`WireError::Authentication`] instead of retrying.
    pub async fn run(
        self,
        products: mpsc::Sender<RawProduct>,
        shutdown: CancellationToken,
    ) -> Result<(), WireError> {
        let mut backoff = INITIAL_BACKOFF;

        loop {
            if shutdown.is_cancelled() {
                return Ok(());
            }

            info!(host = %self.config.host, room = %self.config.room, "connecting to NWWS-OI");
            let session = self.run_session(&products, &shutdown).await;
            self.health.set_connected(false);

            match session {
                SessionEnd::Shutdown => return Ok(()),
                SessionEnd::Fatal(e) => return Err(e),
                SessionEnd::Disconnected { was_online } => {
                    if was_online {
                        // A healthy session resets the backoff schedule.
                        backoff = INITIAL_BACKOFF;
                    }
                    // Full jitter: sleep a uniform fraction of the window.
                    let delay = rand::thread_rng().gen_range(Duration::ZERO..=backoff);
                    warn!(delay = ?delay, "NWWS-OI disconnected, reconnecting");
                    tokio::select! {
                        _ = shutdown.cancelled() => return Ok(()),
                        _ = tokio::time::sleep(delay) => {}
                    }
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                }
            }
        }
    }

    async fn run_session(
        &self,
        products: &mpsc::Sender<RawProduct>,
        shutdown: &CancellationToken,
    ) -> SessionEnd {
        let account = format!("{}@{}", self.config.username, self.config.host);
        let jid: Jid = match account.parse() {
            Ok(jid) => jid,
            Err(e) => {
                return SessionEnd::Fatal(WireError::InvalidAccount(format!("{account}: {e}")))
            }
        };

        let mut client = tokio_xmpp::AsyncClient::new(jid, self.config.password.clone());
        client.set_reconnect(false);

        let mut was_online = false;

        loop {
            let event = if was_online {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        self.leave(&mut client).await;
                        return SessionEnd::Shutdown;
                    }
                    event = client.next() => event,
                }
            } else {
                // Still connecting: bound the wait.
                tokio::select! {
                    _ = shutdown.cancelled() => return SessionEnd::Shutdown,
                    event = tokio::time::timeout(CONNECT_TIMEOUT, client.next()) => {
                        match event {
                            Ok(event) => event,
                            Err(_) => {
                                debug!("connect timed out");
                                return SessionEnd::Disconnected { was_online };
                            }
                        }
                    }
                }
            };

            let Some(event) = event else {
                return SessionEnd::Disconnected { was_online };
            };

            match event {
                tokio_xmpp::Event::Online { .. } => {
                    info!("NWWS-OI session established");
                    was_online = true;
                    self.health.set_connected(true);
                    if let Err(e) = self.join_room(&mut client).await {
                        warn!(error = %e, "failed to join room");
                        return SessionEnd::Disconnected { was_online };
                    }
                }
                tokio_xmpp::Event::Disconnected(tokio_xmpp::Error::Auth(e)) => {
                    return SessionEnd::Fatal(WireError::Authentication(e.to_string()));
                }
                tokio_xmpp::Event::Disconnected(e) => {
                    debug!(error = %e, "transport dropped");
                    return SessionEnd::Disconnected { was_online };
                }
                tokio_xmpp::Event::Stanza(element) => {
                    if let Some(body) = product_body(element) {
                        self.health.count_received();
                        let product = RawProduct {
                            body,
                            received_at: Utc::now(),
                        };
                        if products.send(product).await.is_err() {
                            return SessionEnd::Fatal(WireError::ChannelClosed);
                        }
                    }
                }
            }
        }
    }

    async fn join_room(&self, client: &mut tokio_xmpp::AsyncClient) -> Result<(), String> {
        // A uuid-suffixed nickname keeps concurrent deployments of the same
        // account from fighting over the room resource.
        let nick = format!("{}/{}", self.config.username, uuid::Uuid::new_v4());
        let occupant: FullJid = format!("{}/{}", self.config.room, nick)
            .parse()
            .map_err(|e| format!("room jid: {e}"))?;

        let mut presence = Presence::new(PresenceType::None);
        presence.to = Some(Jid::Full(occupant));
        presence.add_payload(Muc::new());

        client
            .send_stanza(presence.into())
            .await
            .map_err(|e| e.to_string())
    }

    /// Orderly exit: presence-unavailable, a short drain, then transport
    /// close.
    async fn leave(&self, client: &mut tokio_xmpp::AsyncClient) {
        let presence = Presence::new(PresenceType::Unavailable);
        if client.send_stanza(presence.into()).await.is_ok() {
            let _ = tokio::time::timeout(SHUTDOWN_DRAIN, client.send_end()).await;
        }
        info!("NWWS-OI session closed");
    }
}

enum SessionEnd {
    Shutdown,
    Fatal(WireError),
    Disconnected { was_online: bool },
}

/// Extract a product body from a room stanza.
///
/// Only groupchat messages carrying the `<x xmlns="nwws-oi">` payload count;
/// subject lines, the terms-of-use banner, and private messages do not.
fn product_body(element: Element) -> Option<String> {
    let message = Message::try_from(element).ok()?;
    if message.type_ != MessageType::Groupchat {
        return None;
    }
    let oi = message.payloads.iter().find(|p| p.is("x", "nwws-oi"))?;
    Some(normalize_body(oi.text()))
}

/// Undo the transport's newline doubling and strip the LDM sequence-number
/// preamble.
fn normalize_body(text: String) -> String {
    // Some messages have every \n replaced with \n\n; detect and undo.
    let text = if text.matches('\n').count() == text.matches("\n\n").count() * 2 {
        text.replace("\n\n", "\n")
    } else {
        text
    };

    // An LDM preamble is a blank line, a bare sequence number, then the
    // product.
    match {
        let mut i = text.splitn(3, '\n');
        (i.next(), i.next().map(str::trim), i.next())
    } {
        (Some(""), Some(seq), Some(rest))
            if !seq.is_empty() && seq.bytes().all(|b| b.is_ascii_digit()) =>
        {
            rest.to_string()
        }
        _ => text,
    }
}
