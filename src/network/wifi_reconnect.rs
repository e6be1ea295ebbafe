use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::thread::JoinHandle;

use anyhow::{bail, Result};
use esp_idf_hal::delay::FreeRtos;
use ota_core::backoff::ReconnectBackoff;
use ota_core::{wait_for_link_up, LinkEvent, LinkWait};

const SUPERVISOR_STACK_SIZE: usize = 4096;

/// Start the thread that re-associates after every disconnect.
///
/// Delays follow [`ReconnectBackoff`]; every third attempt restarts the
/// radio. The thread exits once `stopping` is set or its event channel
/// closes.
pub fn spawn_supervisor(events: Receiver<LinkEvent>, stopping: Arc<AtomicBool>) -> Result<JoinHandle<()>> {
    let handle = std::thread::Builder::new()
        .name("wifi_supervisor".into())
        .stack_size(SUPERVISOR_STACK_SIZE)
        .spawn(move || supervise(events, stopping))?;
    Ok(handle)
}

fn supervise(events: Receiver<LinkEvent>, stopping: Arc<AtomicBool>) {
    log::info!("WiFi supervisor started");
    let mut backoff = ReconnectBackoff::new();

    while let Ok(event) = events.recv() {
        if event == LinkEvent::Up || stopping.load(Ordering::SeqCst) {
            continue;
        }
        log::warn!("WiFi disconnected! Starting reconnection process...");

        loop {
            let delay = backoff.next_delay();
            log::info!(
                "Backoff {}s before reconnection attempt #{}",
                delay.as_secs(),
                backoff.attempts()
            );
            match wait_for_link_up(&events, delay) {
                LinkWait::Up => {
                    if backoff.attempts() > 1 {
                        log::warn!("WiFi reconnected after {} attempts", backoff.attempts() - 1);
                    } else {
                        log::info!("WiFi reconnected");
                    }
                    backoff.reset();
                    disable_power_save();
                    break;
                }
                LinkWait::Closed => {
                    log::info!("WiFi supervisor stopped");
                    return;
                }
                LinkWait::TimedOut => {}
            }
            if stopping.load(Ordering::SeqCst) {
                break;
            }

            if backoff.should_cycle_radio() {
                cycle_radio();
            }
            if let Err(e) = force_reconnect() {
                log::error!("WiFi reconnection failed: {:?}", e);
            }
        }
    }

    log::info!("WiFi supervisor stopped");
}

/// Stop and restart the radio; clears driver state a plain reconnect keeps
fn cycle_radio() {
    log::warn!("Restarting WiFi radio");
    unsafe {
        let _ = esp_idf_sys::esp_wifi_stop();
        FreeRtos::delay_ms(500);
        let _ = esp_idf_sys::esp_wifi_start();
        FreeRtos::delay_ms(500);
    }
}

fn force_reconnect() -> Result<()> {
    let result = unsafe { esp_idf_sys::esp_wifi_connect() };
    if result == esp_idf_sys::ESP_OK {
        log::info!("WiFi reconnection initiated");
        Ok(())
    } else if result == esp_idf_sys::ESP_ERR_WIFI_CONN as i32 {
        // Already connecting - not an error
        log::info!("WiFi already connecting");
        Ok(())
    } else {
        bail!("Failed to initiate WiFi reconnection: {} (0x{:x})", result, result)
    }
}

pub fn disable_power_save() {
    unsafe {
        use esp_idf_sys::*;
        let result = esp_wifi_set_ps(wifi_ps_type_t_WIFI_PS_NONE);
        if result != ESP_OK {
            log::warn!("Failed to set WiFi power save mode: {:?}", result);
        }
    }
}
