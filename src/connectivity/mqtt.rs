//! rumqttc integration: options, error classification, the bus adapter and
//! the task that drives the event loop.
//!
//! `EventLoop::poll` only keeps a new connection once the whole TCP connect
//! and CONNACK exchange has finished, so it must never be cancelled midway.
//! It runs in its own task and reports back over a channel.

use std::time::Duration;

use log::debug;
use rumqttc::{
    AsyncClient, ConnectReturnCode, ConnectionError, Event, EventLoop, MqttOptions, Packet, QoS,
};
use tokio::{sync::mpsc, task::JoinHandle};

use super::ConnectFailure;
use crate::config::Broker;
use crate::telemetry::{BusClient, PublishError};

/// Capacity of the client's request channel
pub const REQUEST_CAPACITY: usize = 16;

pub fn options(broker: &Broker, client_id: &str) -> MqttOptions {
    let mut options = MqttOptions::new(client_id, broker.host.clone(), broker.port);
    options
        .set_keep_alive(Duration::from_secs(broker.keep_alive_secs))
        .set_clean_session(true);
    options
}

/// Map a transport error onto the numeric status convention
pub fn classify(error: &ConnectionError) -> ConnectFailure {
    match error {
        ConnectionError::ConnectionRefused(code) => ConnectFailure::Refused(refusal_code(code)),
        ConnectionError::NetworkTimeout | ConnectionError::FlushTimeout => ConnectFailure::Timeout,
        ConnectionError::MqttState(_) => ConnectFailure::ConnectionLost,
        ConnectionError::Io(e) => ConnectFailure::ConnectFailed(e.to_string()),
        other => ConnectFailure::ConnectFailed(other.to_string()),
    }
}

fn refusal_code(code: &ConnectReturnCode) -> u8 {
    match code {
        ConnectReturnCode::Success => 0,
        ConnectReturnCode::RefusedProtocolVersion => 1,
        ConnectReturnCode::BadClientId => 2,
        ConnectReturnCode::ServiceUnavailable => 3,
        ConnectReturnCode::BadUserNamePassword => 4,
        ConnectReturnCode::NotAuthorized => 5,
    }
}

/// What the device loop cares about in an event loop notification
#[derive(Debug, PartialEq, Eq)]
pub enum Inbound {
    Connected,
    Message { topic: String, payload: Vec<u8> },
    Disconnected,
    Other,
}

pub fn interpret(event: Event) -> Inbound {
    match event {
        Event::Incoming(Packet::ConnAck(ack)) if ack.code == ConnectReturnCode::Success => {
            Inbound::Connected
        }
        Event::Incoming(Packet::Publish(publish)) => Inbound::Message {
            topic: publish.topic,
            payload: publish.payload.to_vec(),
        },
        Event::Incoming(Packet::Disconnect) => Inbound::Disconnected,
        _ => Inbound::Other,
    }
}

/// What the poll task reports to the device loop
#[derive(Debug, PartialEq, Eq)]
pub enum LinkEvent {
    Inbound(Inbound),
    Failed(ConnectFailure),
}

/// Handle on the task that owns the event loop. The task only polls after
/// [`Link::attempt`], and goes idle again once a session ends, so retry
/// timing stays with the connection manager.
pub struct Link {
    attempts: mpsc::Sender<()>,
    events: mpsc::Receiver<LinkEvent>,
    task: JoinHandle<()>,
}

impl Link {
    pub fn spawn(eventloop: EventLoop) -> Self {
        let (attempts, attempt_rx) = mpsc::channel(1);
        let (event_tx, events) = mpsc::channel(REQUEST_CAPACITY);
        let task = tokio::spawn(drive(eventloop, attempt_rx, event_tx));
        Self {
            attempts,
            events,
            task,
        }
    }

    /// Start a connection attempt. An attempt already waiting is enough.
    pub fn attempt(&self) {
        let _ = self.attempts.try_send(());
    }

    pub async fn next(&mut self) -> Option<LinkEvent> {
        self.events.recv().await
    }
}

impl Drop for Link {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn drive(
    mut eventloop: EventLoop,
    mut attempts: mpsc::Receiver<()>,
    events: mpsc::Sender<LinkEvent>,
) {
    while attempts.recv().await.is_some() {
        loop {
            let event = match eventloop.poll().await {
                Ok(event) => match interpret(event) {
                    Inbound::Other => continue,
                    inbound => LinkEvent::Inbound(inbound),
                },
                Err(e) => LinkEvent::Failed(classify(&e)),
            };

            let session_over = matches!(
                event,
                LinkEvent::Failed(_) | LinkEvent::Inbound(Inbound::Disconnected)
            );
            if event == LinkEvent::Inbound(Inbound::Disconnected) {
                // A broker DISCONNECT leaves the socket in place; drop it so
                // the next attempt starts from a fresh connect
                eventloop.clean();
            }
            if events.send(event).await.is_err() {
                return;
            }
            if session_over {
                debug!("mqtt: link idle until the next attempt");
                break;
            }
        }
    }
}

/// Requests are queued without waiting; a full queue is a failed publish
impl BusClient for AsyncClient {
    fn publish(
        &mut self,
        topic: &str,
        payload: Vec<u8>,
        retain: bool,
    ) -> Result<(), PublishError> {
        self.try_publish(topic, QoS::AtMostOnce, retain, payload)
            .map_err(|e| PublishError::Client(e.to_string()))
    }

    fn subscribe(&mut self, topic: &str) -> Result<(), PublishError> {
        self.try_subscribe(topic, QoS::AtMostOnce)
            .map_err(|e| PublishError::Client(e.to_string()))
    }
}
