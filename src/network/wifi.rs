use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;

use anyhow::Result;
use esp_idf_hal::modem::Modem;
use esp_idf_svc::{
    eventloop::{EspSubscription, EspSystemEventLoop, System},
    netif::IpEvent,
    nvs::EspDefaultNvsPartition,
    wifi::{AuthMethod, BlockingWifi, ClientConfiguration, Configuration, EspWifi, WifiEvent},
};
use ota_core::{ConnectivityError, ConnectivityProvider, LinkEvent};

use super::wifi_reconnect;

type Subscribers = Arc<Mutex<Vec<Sender<LinkEvent>>>>;

/// Station-mode WiFi link for the update task.
///
/// System event loop callbacks only flip an atomic and forward a
/// [`LinkEvent`] to every subscriber; reconnection runs on the supervisor
/// thread.
pub struct WifiConnectivity {
    wifi: BlockingWifi<EspWifi<'static>>,
    sys_loop: EspSystemEventLoop,
    ssid: String,
    password: String,
    started: bool,
    up: Arc<AtomicBool>,
    stopping: Arc<AtomicBool>,
    subscribers: Subscribers,
    subscriptions: Vec<EspSubscription<'static, System>>,
    supervisor: Option<JoinHandle<()>>,
}

impl WifiConnectivity {
    pub fn new(
        modem: Modem,
        sys_loop: EspSystemEventLoop,
        nvs: EspDefaultNvsPartition,
        ssid: String,
        password: String,
    ) -> Result<Self> {
        log::info!("Initializing WiFi for SSID: '{}'", ssid);
        let esp_wifi = EspWifi::new(modem, sys_loop.clone(), Some(nvs))?;
        let wifi = BlockingWifi::wrap(esp_wifi, sys_loop.clone())?;

        Ok(Self {
            wifi,
            sys_loop,
            ssid,
            password,
            started: false,
            up: Arc::new(AtomicBool::new(false)),
            stopping: Arc::new(AtomicBool::new(false)),
            subscribers: Arc::new(Mutex::new(Vec::new())),
            subscriptions: Vec::new(),
            supervisor: None,
        })
    }

    fn configure(&mut self) -> Result<()> {
        let cfg = Configuration::Client(ClientConfiguration {
            ssid: self
                .ssid
                .as_str()
                .try_into()
                .map_err(|_| anyhow::anyhow!("Invalid SSID format: {}", self.ssid))?,
            password: self
                .password
                .as_str()
                .try_into()
                .map_err(|_| anyhow::anyhow!("Invalid password format"))?,
            auth_method: if self.password.is_empty() {
                log::warn!("WiFi password is empty, using open network");
                AuthMethod::None
            } else {
                AuthMethod::WPA2Personal
            },
            ..Default::default()
        });
        self.wifi.set_configuration(&cfg)?;
        Ok(())
    }

    /// Forward disconnect and DHCP events to subscribers
    fn watch_events(&mut self) -> Result<()> {
        let up = Arc::clone(&self.up);
        let subscribers = Arc::clone(&self.subscribers);
        let wifi_sub = self.sys_loop.subscribe::<WifiEvent, _>(move |event| {
            if matches!(event, WifiEvent::StaDisconnected { .. }) {
                up.store(false, Ordering::SeqCst);
                broadcast(&subscribers, LinkEvent::Down);
            }
        })?;

        let up = Arc::clone(&self.up);
        let subscribers = Arc::clone(&self.subscribers);
        let ip_sub = self.sys_loop.subscribe::<IpEvent, _>(move |event| match event {
            IpEvent::DhcpIpAssigned { .. } => {
                up.store(true, Ordering::SeqCst);
                broadcast(&subscribers, LinkEvent::Up);
            }
            IpEvent::DhcpIpDeassigned { .. } => {
                up.store(false, Ordering::SeqCst);
                broadcast(&subscribers, LinkEvent::Down);
            }
            _ => {}
        })?;

        self.subscriptions.push(wifi_sub);
        self.subscriptions.push(ip_sub);
        Ok(())
    }

    fn bring_up(&mut self) -> Result<()> {
        if self.subscriptions.is_empty() {
            self.watch_events()?;
        }
        self.configure()?;
        self.wifi.start()?;
        self.started = true;
        self.stopping.store(false, Ordering::SeqCst);

        if self.supervisor.is_none() {
            let events = self.subscribe();
            self.supervisor = Some(wifi_reconnect::spawn_supervisor(events, Arc::clone(&self.stopping))?);
        }

        log::info!("Connecting to {}...", self.ssid);
        self.wifi.connect()?;
        log::info!("Waiting for DHCP...");
        self.wifi.wait_netif_up()?;

        if let Ok(ip_info) = self.wifi.wifi().sta_netif().get_ip_info() {
            log::info!("WiFi connected, IP: {}", ip_info.ip);
        }
        self.up.store(true, Ordering::SeqCst);

        // Power save drops the link under sustained TLS traffic
        wifi_reconnect::disable_power_save();
        Ok(())
    }
}

impl ConnectivityProvider for WifiConnectivity {
    fn init(&mut self) -> Result<(), ConnectivityError> {
        if self.ssid.is_empty() {
            log::error!("WiFi SSID is empty! Check ota_config.h");
            return Err(ConnectivityError::Init("WiFi SSID is empty".into()));
        }

        if self.started {
            // Radio already running; the supervisor owns reconnection
            return if self.is_up() {
                Ok(())
            } else {
                Err(ConnectivityError::Init("waiting for WiFi reconnection".into()))
            };
        }

        self.bring_up().map_err(|e| {
            log::error!("WiFi bring-up failed: {:?}", e);
            ConnectivityError::Init(e.to_string())
        })
    }

    fn teardown(&mut self) {
        log::info!("Shutting down WiFi");
        self.stopping.store(true, Ordering::SeqCst);
        self.subscriptions.clear();
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        if let Some(handle) = self.supervisor.take() {
            let _ = handle.join();
        }
        if let Err(e) = self.wifi.disconnect() {
            log::debug!("WiFi disconnect: {:?}", e);
        }
        if let Err(e) = self.wifi.stop() {
            log::warn!("WiFi stop failed: {:?}", e);
        }
        self.started = false;
        self.up.store(false, Ordering::SeqCst);
    }

    fn is_up(&self) -> bool {
        self.up.load(Ordering::SeqCst)
    }

    fn subscribe(&mut self) -> Receiver<LinkEvent> {
        let (tx, rx) = channel();
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
        rx
    }
}

/// Send to every live subscriber, forgetting the ones that hung up
fn broadcast(subscribers: &Subscribers, event: LinkEvent) {
    subscribers
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .retain(|tx| tx.send(event).is_ok());
}
