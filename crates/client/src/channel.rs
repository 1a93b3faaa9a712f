//! Per-model WebSocket session channel.
//!
//! The socket is driven by a background task that reports typed events
//! (`Opened`, `Reply`, `Closed`) onto an mpsc queue owned by the
//! session. Every event carries the [`ChannelTag`] of the channel that
//! produced it, and nothing is delivered once the channel is closed.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures_util::{SinkExt, StreamExt};
use proto::{ChannelError, InboundFrame, ModelName, OutboundFrame};
use reqwest::Url;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};
use tracing::{debug, info, warn};

use crate::credential::CredentialSource;

/// Identity of one channel instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelTag {
    /// Model the channel is bound to.
    pub model: ModelName,
    /// Incremented on every model activation.
    pub generation: u64,
}

/// Connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Closed,
    Connecting,
    Open,
}

/// Event reported by the socket driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// Handshake completed.
    Opened,
    /// One decoded inbound frame.
    Reply(InboundFrame),
    /// A text frame that matched neither reply shape.
    Unreadable { reason: String },
    /// Connection ended without the client asking for it.
    Closed { reason: String },
}

/// A [`ChannelEvent`] together with the channel that emitted it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaggedEvent {
    pub tag: ChannelTag,
    pub event: ChannelEvent,
}

/// Outbound half used by the submission controller.
pub trait FrameSink {
    /// Sends one frame; fails synchronously when not open.
    fn send_frame(&mut self, frame: OutboundFrame) -> Result<(), ChannelError>;
}

/// Handle to one logical connection for one model.
pub struct SessionChannel {
    tag: ChannelTag,
    state: ChannelState,
    active: Arc<AtomicBool>,
    outbound: Option<mpsc::UnboundedSender<OutboundFrame>>,
}

impl SessionChannel {
    /// Starts connecting to `ws_url` (closed → connecting).
    ///
    /// The bearer token is read from `credential` now; without one no
    /// channel is created. Must be called inside a Tokio runtime.
    pub fn connect(
        ws_url: &Url,
        tag: ChannelTag,
        credential: &dyn CredentialSource,
        events: mpsc::UnboundedSender<TaggedEvent>,
    ) -> Result<Self, ChannelError> {
        let token = credential
            .bearer_token()
            .ok_or(ChannelError::MissingCredential)?;
        let mut url = ws_url.clone();
        url.query_pairs_mut().append_pair("token", &token);

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let active = Arc::new(AtomicBool::new(true));
        let emitter = EventEmitter {
            tag: tag.clone(),
            active: active.clone(),
            events,
        };

        info!(model = %tag.model, generation = tag.generation, "Session channel connecting");
        tokio::spawn(drive(url, outbound_rx, emitter));

        Ok(Self {
            tag,
            state: ChannelState::Connecting,
            active,
            outbound: Some(outbound_tx),
        })
    }

    pub fn tag(&self) -> &ChannelTag {
        &self.tag
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == ChannelState::Open
    }

    /// Records the driver's handshake confirmation (connecting → open).
    pub fn mark_open(&mut self) {
        if self.state == ChannelState::Connecting {
            self.state = ChannelState::Open;
            info!(model = %self.tag.model, generation = self.tag.generation, "Session channel open");
        }
    }

    /// Records an unsolicited close reported by the driver.
    pub fn mark_closed(&mut self) {
        self.state = ChannelState::Closed;
        self.outbound = None;
    }

    /// Closes the channel from any state. No event is delivered afterwards,
    /// even if the transport still produces one.
    pub fn close(&mut self) {
        self.active.store(false, Ordering::Release);
        if self.outbound.take().is_some() || self.state != ChannelState::Closed {
            info!(model = %self.tag.model, generation = self.tag.generation, "Session channel closed");
        }
        self.state = ChannelState::Closed;
    }

    /// Queues `frame` for the socket. Fails with `NotOpen` unless open.
    pub fn send(&mut self, frame: OutboundFrame) -> Result<(), ChannelError> {
        if self.state != ChannelState::Open {
            return Err(ChannelError::NotOpen);
        }
        let Some(outbound) = &self.outbound else {
            return Err(ChannelError::NotOpen);
        };
        if outbound.send(frame).is_err() {
            warn!(model = %self.tag.model, "Socket driver gone; marking channel closed");
            self.mark_closed();
            return Err(ChannelError::NotOpen);
        }
        debug!(model = %self.tag.model, "Frame queued");
        Ok(())
    }
}

impl FrameSink for SessionChannel {
    fn send_frame(&mut self, frame: OutboundFrame) -> Result<(), ChannelError> {
        self.send(frame)
    }
}

impl Drop for SessionChannel {
    fn drop(&mut self) {
        self.active.store(false, Ordering::Release);
    }
}

/// Delivers driver events while the owning channel is still active.
struct EventEmitter {
    tag: ChannelTag,
    active: Arc<AtomicBool>,
    events: mpsc::UnboundedSender<TaggedEvent>,
}

impl EventEmitter {
    fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    fn emit(&self, event: ChannelEvent) {
        if !self.is_active() {
            debug!(model = %self.tag.model, generation = self.tag.generation, "Dropping event from closed channel");
            return;
        }
        let _ = self.events.send(TaggedEvent {
            tag: self.tag.clone(),
            event,
        });
    }
}

/// Socket task: connect, then pump frames both ways until either side ends.
async fn drive(
    url: Url,
    mut outbound: mpsc::UnboundedReceiver<OutboundFrame>,
    emitter: EventEmitter,
) {
    let socket = match connect_async(url.as_str()).await {
        Ok((socket, _)) => socket,
        Err(e) => {
            warn!(model = %emitter.tag.model, "Session channel connect failed: {e}");
            emitter.emit(ChannelEvent::Closed {
                reason: e.to_string(),
            });
            return;
        }
    };
    let (mut sink, mut stream) = socket.split();

    if !emitter.is_active() {
        let _ = sink.close().await;
        return;
    }
    emitter.emit(ChannelEvent::Opened);

    let reason = loop {
        tokio::select! {
            frame = outbound.recv() => match frame {
                Some(frame) => {
                    let json = match serde_json::to_string(&frame) {
                        Ok(json) => json,
                        Err(e) => {
                            warn!("Failed to encode outbound frame: {e}");
                            continue;
                        }
                    };
                    if let Err(e) = sink.send(WsMessage::Text(json.into())).await {
                        break Some(format!("send failed: {e}"));
                    }
                }
                None => {
                    let _ = sink.close().await;
                    break None;
                }
            },
            incoming = stream.next() => match incoming {
                Some(Ok(WsMessage::Text(text))) => {
                    let text: &str = &text;
                    match InboundFrame::from_json(text) {
                        Ok(frame) => emitter.emit(ChannelEvent::Reply(frame)),
                        Err(e) => {
                            warn!(model = %emitter.tag.model, "Undecodable frame: {e}");
                            emitter.emit(ChannelEvent::Unreadable { reason: e.to_string() });
                        }
                    }
                }
                Some(Ok(WsMessage::Close(frame))) => {
                    let reason = match frame {
                        Some(frame) => {
                            let text: &str = &frame.reason;
                            format!("closed by server ({}): {text}", u16::from(frame.code))
                        }
                        None => "closed by server".to_string(),
                    };
                    break Some(reason);
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => break Some(e.to_string()),
                None => break Some("connection ended".to_string()),
            },
        }
    };

    if let Some(reason) = reason {
        info!(model = %emitter.tag.model, generation = emitter.tag.generation, %reason, "Session channel dropped");
        emitter.emit(ChannelEvent::Closed { reason });
    }
}
