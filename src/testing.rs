//! In-memory stand-ins for the bus and host readouts, and a minimal local
//! broker for driving the real client.

use std::{
    net::SocketAddr,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use bytes::BytesMut;
use rumqttc::{
    mqttbytes::{self, v4},
    ConnAck, ConnectReturnCode, Packet, PingResp, Publish, QoS, SubAck, SubscribeReasonCode,
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
};

use crate::system::SystemProbe;
use crate::telemetry::{BusClient, PublishError};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Published {
    pub topic: String,
    pub payload: String,
    pub retain: bool,
}

#[derive(Debug, Default)]
pub struct RecordingBus {
    pub published: Vec<Published>,
    pub subscriptions: Vec<String>,
    pub fail: bool,
}

impl RecordingBus {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    /// Topic suffixes in publish order, e.g. `["discovery", "status"]`
    pub fn kinds(&self) -> Vec<&str> {
        self.published
            .iter()
            .map(|p| p.topic.rsplit('/').next().unwrap_or(""))
            .collect()
    }

    pub fn last(&self) -> Option<&Published> {
        self.published.last()
    }

    pub fn clear(&mut self) {
        self.published.clear();
    }
}

impl BusClient for RecordingBus {
    fn publish(
        &mut self,
        topic: &str,
        payload: Vec<u8>,
        retain: bool,
    ) -> Result<(), PublishError> {
        if self.fail {
            return Err(PublishError::Client("request queue full".to_string()));
        }
        self.published.push(Published {
            topic: topic.to_string(),
            payload: String::from_utf8(payload).unwrap(),
            retain,
        });
        Ok(())
    }

    fn subscribe(&mut self, topic: &str) -> Result<(), PublishError> {
        if self.fail {
            return Err(PublishError::Client("request queue full".to_string()));
        }
        self.subscriptions.push(topic.to_string());
        Ok(())
    }
}

pub struct FixedProbe {
    pub rssi: i32,
    pub free: u64,
    pub ip: String,
    pub mac: String,
}

impl Default for FixedProbe {
    fn default() -> Self {
        Self {
            rssi: -58,
            free: 41_000,
            ip: "192.168.1.40".to_string(),
            mac: "AA:BB:CC:DD:EE:FF".to_string(),
        }
    }
}

impl SystemProbe for FixedProbe {
    fn signal_strength(&self) -> i32 {
        self.rssi
    }

    fn free_memory(&self) -> u64 {
        self.free
    }

    fn ip_address(&self) -> String {
        self.ip.clone()
    }

    fn mac_address(&self) -> String {
        self.mac.clone()
    }
}

/// How the local broker answers each client
#[derive(Clone, Debug)]
pub struct BrokerBehaviour {
    pub connack_delay: Duration,
    pub code: ConnectReturnCode,
    /// Sent to the client right after it subscribes
    pub command: Option<(String, Vec<u8>)>,
}

impl Default for BrokerBehaviour {
    fn default() -> Self {
        Self {
            connack_delay: Duration::ZERO,
            code: ConnectReturnCode::Success,
            command: None,
        }
    }
}

#[derive(Default)]
struct BrokerLog {
    accepts: AtomicUsize,
    subscriptions: Mutex<Vec<String>>,
    topics: Mutex<Vec<String>>,
}

/// Plain MQTT 3.1.1 broker on a loopback port. It records what clients do
/// and never routes anything between them.
pub struct FakeBroker {
    pub addr: SocketAddr,
    log: Arc<BrokerLog>,
}

impl FakeBroker {
    pub async fn start(behaviour: BrokerBehaviour) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let log = Arc::new(BrokerLog::default());

        let accept_log = log.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                accept_log.accepts.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(serve_client(stream, behaviour.clone(), accept_log.clone()));
            }
        });

        Self { addr, log }
    }

    /// TCP connections accepted so far
    pub fn accepts(&self) -> usize {
        self.log.accepts.load(Ordering::SeqCst)
    }

    pub fn subscriptions(&self) -> Vec<String> {
        self.log.subscriptions.lock().unwrap().clone()
    }

    /// Topics published to the broker, in arrival order
    pub fn topics(&self) -> Vec<String> {
        self.log.topics.lock().unwrap().clone()
    }
}

async fn serve_client(
    mut stream: TcpStream,
    behaviour: BrokerBehaviour,
    log: Arc<BrokerLog>,
) -> anyhow::Result<()> {
    let mut buf = BytesMut::with_capacity(4096);
    loop {
        let packet = match v4::read(&mut buf, 64 * 1024) {
            Ok(packet) => packet,
            Err(mqttbytes::Error::InsufficientBytes(_)) => {
                if stream.read_buf(&mut buf).await? == 0 {
                    return Ok(());
                }
                continue;
            }
            Err(e) => return Err(e.into()),
        };

        let mut out = BytesMut::new();
        match packet {
            Packet::Connect(_) => {
                tokio::time::sleep(behaviour.connack_delay).await;
                ConnAck::new(behaviour.code, false).write(&mut out)?;
                stream.write_all(&out).await?;
                if behaviour.code != ConnectReturnCode::Success {
                    return Ok(());
                }
            }
            Packet::Subscribe(subscribe) => {
                log.subscriptions
                    .lock()
                    .unwrap()
                    .extend(subscribe.filters.iter().map(|f| f.path.clone()));
                SubAck::new(
                    subscribe.pkid,
                    vec![SubscribeReasonCode::Success(QoS::AtMostOnce)],
                )
                .write(&mut out)?;
                if let Some((topic, payload)) = &behaviour.command {
                    Publish::new(topic.as_str(), QoS::AtMostOnce, payload.clone()).write(&mut out)?;
                }
                stream.write_all(&out).await?;
            }
            Packet::Publish(publish) => log.topics.lock().unwrap().push(publish.topic),
            Packet::PingReq => {
                PingResp.write(&mut out)?;
                stream.write_all(&out).await?;
            }
            _ => {}
        }
    }
}
