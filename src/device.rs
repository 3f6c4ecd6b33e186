use std::{future::Future, time::Duration};

use common::MessageKind;
use log::{info, warn};
use rumqttc::EventLoop;
use tokio::{
    sync::mpsc,
    time::{interval, MissedTickBehavior},
};

use crate::{
    command::{Command, CommandListener},
    connectivity::{
        mqtt::{Inbound, Link, LinkEvent},
        ConnectFailure, ConnectionManager, ConnectionState,
    },
    relay::{OutputPin, RelayDriver},
    system::{Clock, SystemProbe},
    telemetry::{BusClient, Identity, Telemetry},
    web::{render_status_page, WebRequest, WebRoute},
};

/// Interval between periodic status messages
pub const STATUS_INTERVAL_MS: u64 = 30_000;
/// How often the loop runs its periodic duties
pub const TICK_INTERVAL: Duration = Duration::from_millis(100);

/// Fires once per elapsed interval. The window advances whether or not the
/// message could be sent.
#[derive(Clone, Copy, Debug)]
pub struct StatusTimer {
    last: u64,
    interval: u64,
}

impl StatusTimer {
    pub fn new(start: u64, interval: u64) -> Self {
        Self {
            last: start,
            interval,
        }
    }

    pub fn due(&mut self, now: u64) -> bool {
        if now.saturating_sub(self.last) >= self.interval {
            self.last = now;
            true
        } else {
            false
        }
    }
}

/// Everything the plug knows about itself, owned in one place. The bus
/// command path and the web path both end in [`Device::set_state`].
pub struct Device<B, O, S, C> {
    telemetry: Telemetry,
    listener: CommandListener,
    relay: RelayDriver<O>,
    bus: B,
    probe: S,
    clock: C,
    connection: ConnectionManager,
    status_timer: StatusTimer,
}

impl<B, O, S, C> Device<B, O, S, C>
where
    B: BusClient,
    O: OutputPin,
    S: SystemProbe,
    C: Clock,
{
    pub fn new(identity: Identity, relay: RelayDriver<O>, bus: B, probe: S, clock: C) -> Self {
        // Status windows start with the loop, uptime counts from boot
        let now = clock.now_ms();
        let telemetry = Telemetry::new(identity);
        let listener = CommandListener::new(telemetry.topics());
        Self {
            telemetry,
            listener,
            relay,
            bus,
            probe,
            clock,
            connection: ConnectionManager::new(),
            status_timer: StatusTimer::new(now, STATUS_INTERVAL_MS),
        }
    }

    /// The single way to change the relay. Always followed by a state message.
    pub fn set_state(&mut self, on: bool) {
        self.relay.apply(on);
        self.send(MessageKind::State);
    }

    /// Inbound bus message
    pub fn handle_message(&mut self, topic: &str, payload: &[u8]) {
        if let Some(Command::SetState(on)) = self.listener.interpret(topic, payload) {
            self.set_state(on);
        }
    }

    /// Web request. Returns the page to send back.
    pub fn handle_web(&mut self, route: WebRoute) -> String {
        if let Some(on) = route.requested_state() {
            self.set_state(on);
        }
        render_status_page(self.relay.is_on())
    }

    /// Start a connection attempt if one is due. Returns true when the
    /// transport should begin connecting.
    pub fn connect_due(&mut self) -> bool {
        let now = self.clock.now_ms();
        self.connection.tick(now)
    }

    /// Broker handshake completed: subscribe, then start the announcement
    pub fn on_connected(&mut self) {
        let now = self.clock.now_ms();
        self.connection.on_connected(now);

        let topic = self.telemetry.topics().command_wildcard();
        match self.bus.subscribe(&topic) {
            Ok(()) => info!("mqtt: Subscribed to: {}", topic),
            Err(e) => warn!("mqtt: subscribe to {} failed: {}", topic, e),
        }
        self.tick();
    }

    pub fn on_transport_error(&mut self, failure: &ConnectFailure) {
        let now = self.clock.now_ms();
        self.connection.on_error(now, failure);
    }

    /// Periodic duties: due announcement steps, then the status timer
    pub fn tick(&mut self) {
        let now = self.clock.now_ms();
        for kind in self.connection.due_announcements(now) {
            self.send(kind);
        }
        if self.status_timer.due(now) && self.connection.is_connected() {
            self.send(MessageKind::Status);
        }
    }

    fn send(&mut self, kind: MessageKind) {
        let connected = self.connection.is_connected();
        let now = self.clock.now_ms();
        let uptime = self.uptime_ms();
        let telemetry = &self.telemetry;
        // Failures are logged inside publish and otherwise dropped
        let _ = match kind {
            MessageKind::Discovery => {
                let payload = telemetry.discovery(&self.probe, self.relay.state());
                telemetry.publish(&mut self.bus, connected, kind, &payload)
            }
            MessageKind::Status => {
                let payload = telemetry.status(&self.probe, uptime);
                telemetry.publish(&mut self.bus, connected, kind, &payload)
            }
            MessageKind::State => {
                let payload = telemetry.state(self.relay.state(), now);
                telemetry.publish(&mut self.bus, connected, kind, &payload)
            }
        };
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    /// True while the transport should be polled
    pub fn link_active(&self) -> bool {
        self.connection.link_active()
    }

    pub fn is_on(&self) -> bool {
        self.relay.is_on()
    }

    pub fn relay(&self) -> &RelayDriver<O> {
        &self.relay
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn bus_mut(&mut self) -> &mut B {
        &mut self.bus
    }

    /// The clock counts from boot, so its reading is the uptime
    pub fn uptime_ms(&self) -> u64 {
        self.clock.now_ms()
    }
}

/// Drive the device until `shutdown` resolves. Web requests, broker events
/// and the periodic tick are all handled here, one at a time. The broker
/// event loop runs in its own task so a slow handshake is never cut short.
pub async fn run<B, O, S, C>(
    device: &mut Device<B, O, S, C>,
    eventloop: EventLoop,
    mut web: mpsc::Receiver<WebRequest>,
    shutdown: impl Future<Output = ()>,
) where
    B: BusClient,
    O: OutputPin,
    S: SystemProbe,
    C: Clock,
{
    let mut link = Link::spawn(eventloop);

    let mut ticker = interval(TICK_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            Some(request) = web.recv() => {
                let page = device.handle_web(request.route);
                // The client may have gone away; nothing to do about it
                let _ = request.reply.send(page);
            }

            Some(event) = link.next() => match event {
                LinkEvent::Inbound(Inbound::Connected) => device.on_connected(),
                LinkEvent::Inbound(Inbound::Message { topic, payload }) => {
                    device.handle_message(&topic, &payload)
                }
                LinkEvent::Inbound(Inbound::Disconnected) => {
                    device.on_transport_error(&ConnectFailure::Disconnected)
                }
                LinkEvent::Inbound(Inbound::Other) => {}
                LinkEvent::Failed(failure) => device.on_transport_error(&failure),
            },

            _ = ticker.tick() => {
                if device.connect_due() {
                    link.attempt();
                }
                device.tick();
            }

            _ = &mut shutdown => {
                info!(
                    "Shutting down, relay left {}",
                    if device.is_on() { "ON" } else { "OFF" }
                );
                break;
            }
        }
    }
}
