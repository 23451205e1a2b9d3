use std::time::Duration;

use btleplug::api::{Central, CentralEvent, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::future::BoxFuture;
use futures::stream::{BoxStream, StreamExt};
use slog::{debug, info, warn, Logger};
use uuid::Uuid;

use crate::error::{CoreError, Result};

pub mod decoder;
pub mod mock;

pub use decoder::{Decoded, EcgFrame, FrameKind, HeartRateReport, PacketDecoder};

pub const PMD_SERVICE: Uuid = Uuid::from_u128(0xfb005c80_02e7_f387_1cad_8acd2d8df0c8);
pub const PMD_CONTROL_POINT: Uuid = Uuid::from_u128(0xfb005c81_02e7_f387_1cad_8acd2d8df0c8);
pub const PMD_DATA: Uuid = Uuid::from_u128(0xfb005c82_02e7_f387_1cad_8acd2d8df0c8);
pub const HEART_RATE_MEASUREMENT: Uuid = bluetooth_uuid(0x2A37);
pub const BATTERY_LEVEL: Uuid = bluetooth_uuid(0x2A19);

/// Request ECG at 130 Hz with 14-bit resolution.
pub const PMD_START_ECG: [u8; 10] = [0x02, 0x00, 0x00, 0x01, 0x82, 0x00, 0x01, 0x01, 0x0E, 0x00];
pub const PMD_STOP_ECG: [u8; 2] = [0x03, 0x00];

const DEVICE_NAME_PREFIX: &str = "Polar H10";

/// 16-bit SIG-assigned UUID expanded onto the Bluetooth base UUID.
const fn bluetooth_uuid(short: u16) -> Uuid {
    Uuid::from_u128(((short as u128) << 96) | 0x0000_0000_0000_1000_8000_0080_5f9b_34fb)
}

/// Frames as they arrive from the sensor, tagged with their channel. Ends when the link
/// drops.
pub type FrameStream = BoxStream<'static, (FrameKind, Vec<u8>)>;

/// A source of ECG and heart-rate frames.
pub trait Transport: Send {
    fn start(&mut self) -> BoxFuture<'_, Result<FrameStream>>;
    fn stop(&mut self) -> BoxFuture<'_, Result<()>>;
    fn battery_level(&mut self) -> BoxFuture<'_, Result<u8>>;
}

/// Polar H10 chest strap reached through the host's Bluetooth adapter.
pub struct PolarH10 {
    peripheral: Peripheral,
    pmd_control: Characteristic,
    pmd_data: Characteristic,
    heart_rate: Characteristic,
    battery: Option<Characteristic>,
    log: Logger,
}

impl PolarH10 {
    /// Scans until a strap advertises itself or `scan_timeout` passes, then connects and
    /// resolves the characteristics the stream needs.
    pub async fn connect(scan_timeout: Duration, log: Logger) -> Result<Self> {
        let manager = Manager::new().await?;
        let adapters = manager.adapters().await?;
        let central = adapters.into_iter().next().ok_or(CoreError::NoAdapter)?;

        let peripheral = match tokio::time::timeout(scan_timeout, Self::discover(&central, &log)).await {
            Ok(found) => found?,
            Err(_) => {
                warn!(log, "Scan timed out"; "timeout_s" => scan_timeout.as_secs());
                central.stop_scan().await?;
                return Err(CoreError::DeviceNotFound);
            }
        };
        central.stop_scan().await?;

        if !peripheral.is_connected().await? {
            peripheral.connect().await?;
        }
        peripheral.discover_services().await?;
        if !peripheral.services().iter().any(|service| service.uuid == PMD_SERVICE) {
            return Err(CoreError::CharacteristicMissing("PMD service".to_string()));
        }
        info!(log, "Connected"; "address" => %peripheral.address());

        let characteristics = peripheral.characteristics();
        let find = |uuid: Uuid| characteristics.iter().find(|c| c.uuid == uuid).cloned();
        let require = |uuid: Uuid, name: &str| find(uuid).ok_or_else(|| CoreError::CharacteristicMissing(name.to_string()));

        Ok(Self {
            pmd_control: require(PMD_CONTROL_POINT, "PMD control point")?,
            pmd_data: require(PMD_DATA, "PMD data")?,
            heart_rate: require(HEART_RATE_MEASUREMENT, "heart rate measurement")?,
            battery: find(BATTERY_LEVEL),
            peripheral,
            log,
        })
    }

    async fn discover(central: &Adapter, log: &Logger) -> Result<Peripheral> {
        let mut events = central.events().await?;
        central.start_scan(ScanFilter::default()).await?;
        debug!(log, "Scanning for devices...");

        while let Some(event) = events.next().await {
            let CentralEvent::DeviceDiscovered(id) = event else {
                continue;
            };
            let device = central.peripheral(&id).await?;
            let Some(properties) = device.properties().await? else {
                continue;
            };
            match properties.local_name {
                Some(name) if name.starts_with(DEVICE_NAME_PREFIX) => {
                    info!(log, "Found device"; "name" => name);
                    return Ok(device);
                }
                Some(name) => debug!(log, "Ignoring device"; "name" => name),
                None => {}
            }
        }
        Err(CoreError::DeviceNotFound)
    }

    async fn stop_ecg(&self) -> Result<()> {
        self.peripheral.unsubscribe(&self.pmd_data).await?;
        self.peripheral
            .write(&self.pmd_control, &PMD_STOP_ECG, WriteType::WithResponse)
            .await?;
        self.peripheral.unsubscribe(&self.heart_rate).await?;
        Ok(())
    }
}

impl Transport for PolarH10 {
    fn start(&mut self) -> BoxFuture<'_, Result<FrameStream>> {
        Box::pin(async move {
            if !self.peripheral.is_connected().await? {
                return Err(CoreError::NotConnected);
            }
            let notifications = self.peripheral.notifications().await?;

            self.peripheral.subscribe(&self.pmd_data).await?;
            self.peripheral
                .write(&self.pmd_control, &PMD_START_ECG, WriteType::WithResponse)
                .await?;
            self.peripheral.subscribe(&self.heart_rate).await?;
            info!(self.log, "ECG stream requested");

            let stream = notifications.filter_map(|notification| async move {
                match notification.uuid {
                    uuid if uuid == PMD_DATA => Some((FrameKind::Ecg, notification.value)),
                    uuid if uuid == HEART_RATE_MEASUREMENT => Some((FrameKind::HeartRate, notification.value)),
                    _ => None,
                }
            });
            Ok(stream.boxed())
        })
    }

    /// Stops the ECG stream and releases the link.
    fn stop(&mut self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            if !self.peripheral.is_connected().await? {
                debug!(self.log, "Link already down");
                return Ok(());
            }
            let stopped = self.stop_ecg().await;
            if let Err(err) = &stopped {
                warn!(self.log, "ECG stop command failed"; "error" => %err);
            }
            self.peripheral.disconnect().await?;
            info!(self.log, "Disconnected"; "address" => %self.peripheral.address());
            stopped
        })
    }

    fn battery_level(&mut self) -> BoxFuture<'_, Result<u8>> {
        Box::pin(async move {
            let characteristic = self
                .battery
                .as_ref()
                .ok_or_else(|| CoreError::CharacteristicMissing("battery level".to_string()))?;
            let value = self.peripheral.read(characteristic).await?;
            value
                .first()
                .copied()
                .ok_or_else(|| CoreError::Transport("empty battery reading".to_string()))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sig_uuids_expand_onto_the_base_uuid() {
        assert_eq!(
            HEART_RATE_MEASUREMENT,
            Uuid::parse_str("00002a37-0000-1000-8000-00805f9b34fb").unwrap()
        );
        assert_eq!(BATTERY_LEVEL, Uuid::parse_str("00002a19-0000-1000-8000-00805f9b34fb").unwrap());
        assert_eq!(PMD_DATA, Uuid::parse_str("fb005c82-02e7-f387-1cad-8acd2d8df0c8").unwrap());
    }

    #[tokio::test]
    #[ignore = "needs a Polar H10 in range"]
    async fn stop_releases_the_link() {
        let mut strap = PolarH10::connect(Duration::from_secs(20), crate::log::silent()).await.unwrap();
        let mut frames = strap.start().await.unwrap();
        assert!(frames.next().await.is_some());

        strap.stop().await.unwrap();
        assert!(!strap.peripheral.is_connected().await.unwrap());
        // stopping twice is harmless once the link is gone
        strap.stop().await.unwrap();
    }
}
