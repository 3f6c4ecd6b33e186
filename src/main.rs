use anyhow::Error;
use breeze_plug::{
    config::Config,
    connectivity::{
        mqtt,
        wifi::{InterfaceProvisioner, WifiProvisioner},
    },
    device::{self, Device},
    logging,
    relay::{self, RelayDriver},
    system::{HostProbe, MonotonicClock},
    telemetry::Identity,
    web::{self, WebRequest},
};
use log::{error, info};
use rumqttc::AsyncClient;
use tokio::{net::TcpListener, sync::mpsc};

fn main() -> Result<(), Error> {
    // Boot time; uptime and state timestamps count from here
    let clock = MonotonicClock::new();

    logging::init()?;

    let config = Config::load()?;

    // Relay off before anything else comes up
    let relay = RelayDriver::new(relay::open(&config.relay.pin)?);

    let route_target = format!("{}:{}", config.broker.host, config.broker.port);
    let mut provisioner =
        InterfaceProvisioner::new(HostProbe::new(&config.interface, &route_target));
    let network = provisioner.auto_connect(&config.portal_name)?;
    info!("MAC Address: {}", network.mac);
    info!("Connected! IP: {}", network.ip);

    let identity = Identity {
        device_id: config.device_id.clone(),
        hardware_type: config.hardware_type.clone(),
    };

    // One thread of control for the web server, the broker and the relay
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(async move {
        let (client, eventloop) = AsyncClient::new(
            mqtt::options(&config.broker, &config.device_id),
            mqtt::REQUEST_CAPACITY,
        );
        let mut device = Device::new(identity, relay, client, provisioner.into_probe(), clock);

        let (web_tx, web_rx) = mpsc::channel::<WebRequest>(8);
        let listener = TcpListener::bind(("0.0.0.0", config.http_port)).await?;
        tokio::spawn(async move {
            if let Err(e) = web::serve(listener, web_tx).await {
                error!("web: server stopped: {}", e);
            }
        });

        info!("Smart plug ready!");

        let shutdown = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Could not listen for Ctrl-C: {}", e);
                std::future::pending::<()>().await;
            }
        };
        device::run(&mut device, eventloop, web_rx, shutdown).await;

        Ok::<(), Error>(())
    })
}
