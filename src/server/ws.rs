// Copyright 2018-2026 the Deno authors. MIT license.

//! The HMR message channel.
//!
//! A single upgrade endpoint on the HTTP origin accepts persistent
//! WebSocket connections speaking the `vite-hmr` subprotocol. Every
//! connection gets its own unbounded outbound queue, so the order in
//! which payloads are enqueued is the order each client receives them.

use std::collections::HashMap;
use std::time::Duration;

use fastwebsockets::Frame;
use fastwebsockets::OpCode;
use fastwebsockets::Payload;
use fastwebsockets::WebSocket;
use hyper::upgrade::Upgraded;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::mpsc::UnboundedSender;
use uuid::Uuid;

use crate::errors::ErrorPayload;

use super::hmr::HmrClientMessage;
use super::hmr::HmrPayload;

/// Subprotocol token clients must offer on upgrade.
pub const HMR_SUBPROTOCOL: &str = "vite-hmr";

/// Path of the upgrade endpoint on the HTTP origin.
pub const HMR_PATH: &str = "/__esdev_hmr";

/// A client that stays silent longer than this is assumed gone.
const KEEP_ALIVE_TIMEOUT: Duration = Duration::from_secs(60);

/// Close the connection after this many unparseable messages.
const MAX_PROTOCOL_ERRORS: u32 = 5;

type CustomListener = Box<dyn Fn(Option<serde_json::Value>) + Send + Sync>;

pub struct HmrChannel {
  enabled: bool,
  clients: Mutex<HashMap<Uuid, UnboundedSender<HmrPayload>>>,
  /// An error produced before any client connected; flushed to the
  /// first connection so startup failures are not lost.
  buffered_error: Mutex<Option<ErrorPayload>>,
  custom_listeners: Mutex<HashMap<String, Vec<CustomListener>>>,
}

impl HmrChannel {
  pub fn new(enabled: bool) -> Self {
    Self {
      enabled,
      clients: Mutex::new(HashMap::new()),
      buffered_error: Mutex::new(None),
      custom_listeners: Mutex::new(HashMap::new()),
    }
  }

  pub fn is_enabled(&self) -> bool {
    self.enabled
  }

  pub fn client_count(&self) -> usize {
    self.clients.lock().len()
  }

  /// Attach an in-process observer that receives the same ordered
  /// payload stream a WebSocket client would.
  pub fn subscribe(&self) -> UnboundedReceiver<HmrPayload> {
    self.register_client(Uuid::new_v4())
  }

  /// Enqueue a payload for every connected client, preserving order
  /// per connection.
  pub fn broadcast(&self, payload: HmrPayload) {
    if !self.enabled {
      return;
    }
    let clients = self.clients.lock();
    for sender in clients.values() {
      let _ = sender.send(payload.clone());
    }
  }

  /// Deliver an error payload now, or buffer it for the first client.
  pub fn send_error(&self, err: ErrorPayload) {
    if !self.enabled {
      return;
    }
    if self.clients.lock().is_empty() {
      *self.buffered_error.lock() = Some(err);
    } else {
      self.broadcast(HmrPayload::Error { err });
    }
  }

  /// Register a listener for a custom client event.
  pub fn on(
    &self,
    event: impl Into<String>,
    listener: impl Fn(Option<serde_json::Value>) + Send + Sync + 'static,
  ) {
    self
      .custom_listeners
      .lock()
      .entry(event.into())
      .or_default()
      .push(Box::new(listener));
  }

  fn dispatch_custom(&self, event: &str, data: Option<serde_json::Value>) {
    let listeners = self.custom_listeners.lock();
    if let Some(handlers) = listeners.get(event) {
      for handler in handlers {
        handler(data.clone());
      }
    }
  }

  fn register_client(&self, id: Uuid) -> UnboundedReceiver<HmrPayload> {
    let (sender, receiver) = mpsc::unbounded_channel();
    // greet first; the flushed error (if any) follows in order
    let _ = sender.send(HmrPayload::Connected);
    if let Some(err) = self.buffered_error.lock().take() {
      let _ = sender.send(HmrPayload::Error { err });
    }
    self.clients.lock().insert(id, sender);
    receiver
  }

  fn deregister_client(&self, id: Uuid) {
    self.clients.lock().remove(&id);
  }

  /// Handle an HTTP upgrade request on the HMR endpoint.
  pub fn handle_upgrade(
    self: &std::sync::Arc<Self>,
    mut req: http::Request<hyper::Body>,
  ) -> http::Result<http::Response<hyper::Body>> {
    if !self.enabled {
      return http::Response::builder()
        .status(http::StatusCode::NOT_FOUND)
        .body("HMR is disabled".into());
    }

    let offers_subprotocol = req
      .headers()
      .get("sec-websocket-protocol")
      .and_then(|value| value.to_str().ok())
      .map(|protocols| {
        protocols
          .split(',')
          .any(|token| token.trim() == HMR_SUBPROTOCOL)
      })
      .unwrap_or(false);
    if !offers_subprotocol {
      return http::Response::builder()
        .status(http::StatusCode::BAD_REQUEST)
        .body(format!("Expected subprotocol {HMR_SUBPROTOCOL}").into());
    }

    let (mut resp, fut) = match fastwebsockets::upgrade::upgrade(&mut req) {
      Ok(pair) => pair,
      Err(_) => {
        return http::Response::builder()
          .status(http::StatusCode::BAD_REQUEST)
          .body("Not a valid WebSocket request".into());
      }
    };
    resp.headers_mut().insert(
      "sec-websocket-protocol",
      http::HeaderValue::from_static(HMR_SUBPROTOCOL),
    );

    let channel = self.clone();
    tokio::spawn(async move {
      let websocket = match fut.await {
        Ok(ws) => ws,
        Err(err) => {
          log::debug!("hmr upgrade failed: {err}");
          return;
        }
      };
      let id = Uuid::new_v4();
      let outbound_rx = channel.register_client(id);
      log::debug!("hmr client connected ({id})");
      pump_client(&channel, websocket, outbound_rx).await;
      channel.deregister_client(id);
      log::debug!("hmr client disconnected ({id})");
    });

    Ok(resp)
  }
}

/// Forward queued payloads to the socket and handle inbound messages
/// until either side goes away.
async fn pump_client(
  channel: &HmrChannel,
  mut websocket: WebSocket<Upgraded>,
  mut outbound_rx: UnboundedReceiver<HmrPayload>,
) {
  websocket.set_writev(false);
  websocket.set_auto_close(true);
  let mut protocol_errors: u32 = 0;

  enum Inbound {
    Message(Result<HmrClientMessage, serde_json::Error>),
    Ignore,
    Close,
  }

  'pump: loop {
    tokio::select! {
      maybe_payload = outbound_rx.recv() => {
        let Some(payload) = maybe_payload else {
          break 'pump;
        };
        let Ok(json) = serde_json::to_string(&payload) else {
          continue;
        };
        let frame = Frame::text(Payload::from(json.into_bytes()));
        if websocket.write_frame(frame).await.is_err() {
          break 'pump;
        }
      }
      frame = websocket.read_frame() => {
        let Ok(frame) = frame else {
          break 'pump;
        };
        // consume the frame into an owned action before touching the
        // socket again; the frame borrows the connection
        let inbound = match frame.opcode {
          OpCode::Text => match std::str::from_utf8(&frame.payload) {
            Ok(text) => {
              Inbound::Message(serde_json::from_str::<HmrClientMessage>(text))
            }
            Err(_) => Inbound::Ignore,
          },
          OpCode::Close => Inbound::Close,
          _ => Inbound::Ignore,
        };
        match inbound {
          Inbound::Message(Ok(HmrClientMessage::Ping)) => {
            let pong = serde_json::to_string(&HmrPayload::Ping)
              .unwrap_or_default();
            let frame = Frame::text(Payload::from(pong.into_bytes()));
            if websocket.write_frame(frame).await.is_err() {
              break 'pump;
            }
          }
          Inbound::Message(Ok(HmrClientMessage::Custom { event, data })) => {
            channel.dispatch_custom(&event, data);
          }
          Inbound::Message(Err(err)) => {
            // malformed messages are ignored; repeated failures close
            // the connection
            log::debug!("ignoring malformed hmr message: {err}");
            protocol_errors += 1;
            if protocol_errors >= MAX_PROTOCOL_ERRORS {
              break 'pump;
            }
          }
          Inbound::Ignore => {}
          Inbound::Close => {
            break 'pump;
          }
        }
      }
      _ = tokio::time::sleep(KEEP_ALIVE_TIMEOUT) => {
        log::debug!("closing silent hmr client");
        break 'pump;
      }
    }
  }
}
