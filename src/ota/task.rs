// Background update task

use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{bail, Result};
use esp_idf_hal::modem::Modem;
use esp_idf_svc::{eventloop::EspSystemEventLoop, nvs::EspDefaultNvsPartition};
use ota_core::{OtaConfig, UpdateController, VersionDescriptor};

use super::{EspBootSelector, EspRestart, EspTransport, FreeRtosDelay};
use crate::network::WifiConnectivity;

const OTA_TASK_STACK_SIZE: usize = 8192;

static OTA_TASK_STARTED: AtomicBool = AtomicBool::new(false);

pub struct OtaTaskParams {
    pub modem: Modem,
    pub sys_loop: EspSystemEventLoop,
    pub nvs: EspDefaultNvsPartition,
    pub wifi_ssid: String,
    pub wifi_password: String,
    pub config: OtaConfig,
    pub current: VersionDescriptor,
}

/// Start the update task. Only one may ever run; later calls fail.
pub fn spawn(params: OtaTaskParams) -> Result<()> {
    if OTA_TASK_STARTED.swap(true, Ordering::SeqCst) {
        bail!("OTA task already running");
    }

    let spawned = std::thread::Builder::new()
        .name("ota_task".into())
        .stack_size(OTA_TASK_STACK_SIZE)
        .spawn(move || {
            if let Err(e) = run(params) {
                log::error!("OTA task exited: {:?}", e);
            }
        });

    if let Err(e) = spawned {
        OTA_TASK_STARTED.store(false, Ordering::SeqCst);
        bail!("Failed to spawn OTA task: {}", e);
    }
    Ok(())
}

fn run(params: OtaTaskParams) -> Result<()> {
    let OtaTaskParams {
        modem,
        sys_loop,
        nvs,
        wifi_ssid,
        wifi_password,
        config,
        current,
    } = params;

    let link = WifiConnectivity::new(modem, sys_loop, nvs, wifi_ssid, wifi_password)?;
    let mut controller = UpdateController::new(config, current, link, EspTransport, EspBootSelector, EspRestart);
    controller.run(&mut FreeRtosDelay)
}
