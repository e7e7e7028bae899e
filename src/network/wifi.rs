use std::net::Ipv4Addr;
use std::sync::Arc;

use anyhow::{bail, Result};
use esp_idf_hal::modem::Modem;
use esp_idf_svc::{
    eventloop::{EspSubscription, EspSystemEventLoop, System},
    netif::IpEvent,
    nvs::EspDefaultNvsPartition,
    wifi::{AuthMethod, ClientConfiguration, Configuration, EspWifi, WifiEvent},
};

use station_core::{Config, LinkDriver, LinkError, LinkEvent, NetSession, StatusReporter};

use crate::status::StatusStrip;

/// Connect requests and the post-connect power-save tweak, issued from
/// the event-handler context.
pub struct EspLinkDriver;

impl LinkDriver for EspLinkDriver {
    fn connect(&mut self) -> Result<(), LinkError> {
        let err = unsafe { esp_idf_sys::esp_wifi_connect() };
        if err == 0 {
            Ok(())
        } else {
            Err(LinkError(err))
        }
    }

    fn disable_power_save(&mut self) {
        // MIN_MODEM power save causes disconnections under sustained
        // transfer load, which is exactly what an OTA download is.
        unsafe {
            use esp_idf_sys::*;
            let result = esp_wifi_set_ps(wifi_ps_type_t_WIFI_PS_NONE);
            if result == 0 {
                log::info!("WiFi power save disabled for stable transfers");
            } else {
                log::warn!("failed to set WiFi power save mode: {:?}", result);
            }
        }
    }
}

/// Owns the WiFi driver and the event subscriptions that feed the
/// connect/retry state machine.
pub struct WifiManager {
    wifi: EspWifi<'static>,
    session: Arc<NetSession>,
    _wifi_sub: EspSubscription<'static, System>,
    _ip_sub: EspSubscription<'static, System>,
}

impl WifiManager {
    pub fn new(
        modem: Modem,
        sysloop: EspSystemEventLoop,
        nvs: EspDefaultNvsPartition,
        config: &Config,
        status: Arc<StatusReporter<StatusStrip>>,
    ) -> Result<Self> {
        log::info!("initializing WiFi for SSID '{}'", config.wifi_ssid);

        if config.wifi_ssid.is_empty() {
            bail!("WiFi SSID cannot be empty");
        }

        let mut wifi = EspWifi::new(modem, sysloop.clone(), Some(nvs))?;

        let client_config = Configuration::Client(ClientConfiguration {
            ssid: config
                .wifi_ssid
                .as_str()
                .try_into()
                .map_err(|e| anyhow::anyhow!("invalid SSID '{}': {:?}", config.wifi_ssid, e))?,
            password: config
                .wifi_password
                .as_str()
                .try_into()
                .map_err(|e| anyhow::anyhow!("invalid password: {:?}", e))?,
            auth_method: if config.wifi_password.is_empty() {
                log::warn!("WiFi password is empty, using open network");
                AuthMethod::None
            } else {
                AuthMethod::WPA2Personal
            },
            ..Default::default()
        });
        wifi.set_configuration(&client_config)?;

        let session = Arc::new(NetSession::new(config.max_connect_retries));

        let wifi_sub = {
            let session = session.clone();
            let status = status.clone();
            sysloop.subscribe::<WifiEvent, _>(move |event| {
                let mut driver = EspLinkDriver;
                match event {
                    WifiEvent::StaStarted => {
                        session.handle_event(LinkEvent::LinkStarted, &mut driver, &status);
                    }
                    WifiEvent::StaDisconnected(_) => {
                        session.handle_event(LinkEvent::LinkLost, &mut driver, &status);
                    }
                    _ => {}
                }
            })?
        };

        let ip_sub = {
            let session = session.clone();
            let status = status.clone();
            sysloop.subscribe::<IpEvent, _>(move |event| {
                if let IpEvent::DhcpIpAssigned(assignment) = event {
                    let ip = Ipv4Addr::from(assignment.ip().octets());
                    let mut driver = EspLinkDriver;
                    session.handle_event(LinkEvent::AddressAcquired(ip), &mut driver, &status);
                }
            })?
        };

        Ok(Self {
            wifi,
            session,
            _wifi_sub: wifi_sub,
            _ip_sub: ip_sub,
        })
    }

    /// Starts the station interface; association and retries are driven
    /// by the event subscriptions from here on.
    pub fn start(&mut self) -> Result<()> {
        self.wifi.start()?;
        Ok(())
    }

    pub fn session(&self) -> Arc<NetSession> {
        self.session.clone()
    }

    pub fn ip(&self) -> Option<String> {
        self.wifi
            .sta_netif()
            .get_ip_info()
            .ok()
            .map(|info| format!("{}", info.ip))
    }
}
