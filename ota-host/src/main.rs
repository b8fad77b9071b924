// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundation.xyz>
// SPDX-License-Identifier: GPL-3.0-or-later

use clap::{Parser, Subcommand, ValueEnum};
use consts::{APP_SIZE, BASE_APP_ADDR, COBS_MAX_MSG_SIZE, EXT_FLASH_SECTOR, FLASH_PAGE, STAGING_ADDR, STAGING_SIZE};
use crc::{Crc, CRC_32_ISO_HDLC};
use embassy_sync::blocking_mutex::raw::NoopRawMutex;
use ota::mem_flash::MemFlash;
use ota::transport::serial::SerialLink;
use ota::{
    BackupManager, BootDecision, FirmwareVersion, FlashLayout, HmacCtrCipher, OtaCommand, OtaConfig, OtaController,
    OtaObserver, OtaResponse, OtaState, Platform, SuspendCoordinator,
};
use ota_protocol::{ble, radio};
use std::error::Error;
use std::fs;
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Image CRC, the one the device computes over the staged image
const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// Default payload per chunk on the serial link
const SERIAL_CHUNK: usize = 256;

/// Key of the simulated device
const SIM_DEVICE_KEY: &[u8] = b"ota-host simulated device key";

const EXT_SIZE: usize = (STAGING_ADDR + STAGING_SIZE) as usize;
const APP_FLASH_SIZE: usize = (BASE_APP_ADDR + APP_SIZE) as usize;

// SPI NOR programs single bytes, the nRF NVMC whole words
type ExtFlash = MemFlash<EXT_SIZE, { EXT_FLASH_SECTOR as usize }, 1>;
type AppFlash = MemFlash<APP_FLASH_SIZE, { FLASH_PAGE as usize }, 4>;
type Tasks = SuspendCoordinator<NoopRawMutex, 4>;
type SimController<'a> = OtaController<'a, ExtFlash, AppFlash, HmacCtrCipher, SimPlatform, LogObserver>;

#[derive(Parser)]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write the command frames (start, chunks, finish) for one transport:
    /// serial: concatenated COBS frames
    /// radio, ble: frames prefixed with their length as u16 LE
    #[command(verbatim_doc_comment)]
    Package {
        /// Firmware image
        firmware: PathBuf,
        /// Version announced in the start command
        #[arg(long, value_parser = parse_version)]
        version: FirmwareVersion,
        #[arg(long, value_enum, default_value_t = Transport::Serial)]
        transport: Transport,
        /// Image bytes per chunk, defaults to the largest the link carries
        #[arg(long)]
        chunk_size: Option<usize>,
        #[arg(short, long)]
        out: PathBuf,
    },

    /// Run a full update on in-memory flash through the serial adapter,
    /// then reboot into the new image and confirm it or let it roll back
    #[command(verbatim_doc_comment)]
    Simulate {
        /// Firmware image
        firmware: PathBuf,
        #[arg(long, value_parser = parse_version)]
        version: FirmwareVersion,
        /// Version of the image the simulated device runs before the update
        #[arg(long, value_parser = parse_version, default_value = "0.1.0")]
        running: FirmwareVersion,
        /// Flip a byte in transit, the device must refuse the image
        #[arg(long)]
        corrupt: bool,
        /// Never confirm the new image, the device must roll back
        #[arg(long)]
        skip_confirm: bool,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, ValueEnum)]
enum Transport {
    Serial,
    Radio,
    Ble,
}

fn parse_version(s: &str) -> Result<FirmwareVersion, String> {
    FirmwareVersion::parse(s).ok_or_else(|| format!("`{s}` is not a major.minor.patch version"))
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    match args.command {
        Commands::Package {
            firmware,
            version,
            transport,
            chunk_size,
            out,
        } => {
            let image = fs::read(&firmware)?;
            let frames = command_frames(transport, &image, version, chunk_size, false)?;
            let mut output = Vec::new();
            for frame in &frames {
                if transport != Transport::Serial {
                    let len = u16::try_from(frame.len())?;
                    output.extend_from_slice(&len.to_le_bytes());
                }
                output.extend_from_slice(frame);
            }
            fs::write(&out, &output)?;
            tracing::info!(
                "{} frames, {} bytes, crc {:#010x} written to {}",
                frames.len(),
                output.len(),
                CRC32.checksum(&image),
                out.display()
            );
            Ok(())
        }
        Commands::Simulate {
            firmware,
            version,
            running,
            corrupt,
            skip_confirm,
        } => {
            let image = fs::read(&firmware)?;
            simulate(&image, version, running, corrupt, skip_confirm)
        }
    }
}

/// Start, chunks and finish for `transport`. With `corrupt` one image byte is
/// altered after the CRC was announced.
fn command_frames(
    transport: Transport,
    image: &[u8],
    version: FirmwareVersion,
    chunk_size: Option<usize>,
    corrupt: bool,
) -> Result<Vec<Vec<u8>>, Box<dyn Error>> {
    let size = u32::try_from(image.len())?;
    if size == 0 {
        return Err("empty firmware image".into());
    }
    let crc32 = CRC32.checksum(image);

    let max_chunk = match transport {
        Transport::Serial => SERIAL_CHUNK,
        Transport::Radio => radio::RADIO_MAX_CHUNK,
        Transport::Ble => ble::MAX_CHUNK,
    };
    let chunk_size = chunk_size.unwrap_or(max_chunk);
    if chunk_size == 0 || chunk_size > max_chunk {
        return Err(format!("chunk size must be within 1..={max_chunk} for {transport:?}").into());
    }
    if transport == Transport::Radio && chunk_size != radio::RADIO_MAX_CHUNK {
        return Err(format!("radio chunks are addressed by index and carry {} bytes", radio::RADIO_MAX_CHUNK).into());
    }

    let mut payload = image.to_vec();
    if corrupt {
        let at = payload.len() / 2;
        payload[at] ^= 0x01;
    }

    let mut frames = vec![encode(transport, &OtaCommand::Start { size, crc32, version })?];
    for (i, data) in payload.chunks(chunk_size).enumerate() {
        let offset = u32::try_from(i * chunk_size)?;
        frames.push(encode(transport, &OtaCommand::Chunk { offset, data })?);
    }
    frames.push(encode(transport, &OtaCommand::Finish { crc32: Some(crc32) })?);
    Ok(frames)
}

fn encode(transport: Transport, cmd: &OtaCommand<'_>) -> Result<Vec<u8>, Box<dyn Error>> {
    let mut buf = [0u8; COBS_MAX_MSG_SIZE];
    let frame: &[u8] = match (transport, cmd) {
        (Transport::Serial, _) => postcard::to_slice_cobs(cmd, &mut buf).map_err(|e| e.to_string())?,
        (Transport::Radio, _) => radio::encode_command(cmd, &mut buf).map_err(|e| e.to_string())?,
        (Transport::Ble, OtaCommand::Chunk { offset, data }) => {
            ble::encode_data_write(*offset, data, &mut buf).map_err(|e| e.to_string())?
        }
        (Transport::Ble, _) => ble::encode_control(cmd, &mut buf).map_err(|e| e.to_string())?,
    };
    Ok(frame.to_vec())
}

/// Uptime is driven by the simulation, one second per exchanged frame.
struct SimPlatform {
    now: u32,
}

impl Platform for SimPlatform {
    fn uptime_secs(&self) -> u32 {
        self.now
    }

    fn delay_ms(&mut self, ms: u32) {
        tracing::debug!("delay {} ms", ms);
    }

    fn system_reset(&mut self) -> ! {
        tracing::info!("device reset");
        std::process::exit(0)
    }
}

struct LogObserver;

impl OtaObserver for LogObserver {
    fn on_state(&mut self, state: OtaState) {
        tracing::info!("state: {}", state);
    }

    fn on_progress(&mut self, percent: u8) {
        tracing::info!("progress: {}%", percent);
    }

    fn on_complete(&mut self, success: bool) {
        tracing::info!("complete: {}", if success { "ok" } else { "failed" });
    }
}

fn boot<'a>(
    mut ext: ExtFlash,
    mut app: AppFlash,
    tasks: &'a Tasks,
    running: FirmwareVersion,
) -> Result<SimController<'a>, Box<dyn Error>> {
    let cipher = HmacCtrCipher::new(SIM_DEVICE_KEY).ok_or("device key rejected")?;
    let mut backup = BackupManager::load(&mut ext, &app, FlashLayout::default(), OtaConfig::default(), cipher)
        .map_err(|e| e.to_string())?;
    let decision = backup.boot_check(&mut ext, &mut app, 0).map_err(|e| e.to_string())?;
    tracing::info!("boot check: {:?}", decision);
    if decision == BootDecision::RolledBack {
        tracing::warn!(
            "rolled back to {} ({} rollbacks so far)",
            backup.header().installed.version,
            backup.rollback_count()
        );
    }
    Ok(OtaController::new(
        ext,
        app,
        backup,
        SimPlatform { now: 0 },
        tasks,
        LogObserver,
        running,
    ))
}

/// Feed serial frames, returning the device answers.
fn exchange(
    link: &mut SerialLink<COBS_MAX_MSG_SIZE>,
    ctrl: &mut SimController<'_>,
    frames: &[Vec<u8>],
) -> Result<Vec<OtaResponse>, Box<dyn Error>> {
    let mut responses = Vec::new();
    let mut undecodable = 0;
    for frame in frames {
        ctrl.platform_mut().now += 1;
        link.feed(frame, ctrl, |bytes| {
            let mut bytes = bytes.to_vec();
            match postcard::from_bytes_cobs::<OtaResponse>(&mut bytes) {
                Ok(resp) => responses.push(resp),
                Err(_) => undecodable += 1,
            }
        });
        ctrl.poll().map_err(|e| e.to_string())?;
    }
    if undecodable > 0 {
        return Err(format!("{undecodable} undecodable responses").into());
    }
    Ok(responses)
}

fn simulate(
    image: &[u8],
    version: FirmwareVersion,
    running: FirmwareVersion,
    corrupt: bool,
    skip_confirm: bool,
) -> Result<(), Box<dyn Error>> {
    // Whatever was flashed at the factory
    let factory: Vec<u8> = (0..APP_SIZE).map(|i| (i % 251) as u8).collect();
    let mut app = AppFlash::new();
    app.load(BASE_APP_ADDR as usize, &factory);

    let tasks = Tasks::new();
    let mut sensor = tasks.register("sensor").ok_or("task registry full")?;
    let mut ctrl = boot(ExtFlash::new(), app, &tasks, running)?;
    let mut link = SerialLink::<COBS_MAX_MSG_SIZE>::new();

    let frames = command_frames(Transport::Serial, image, version, None, corrupt)?;
    tracing::info!("sending {} frames", frames.len());
    let responses = exchange(&mut link, &mut ctrl, &frames)?;
    for resp in &responses {
        tracing::debug!("response: {:?}", resp);
    }
    tracing::info!("sensor task paused: {}", sensor.is_paused());

    let app_region = BASE_APP_ADDR as usize..(BASE_APP_ADDR + APP_SIZE) as usize;
    if ctrl.status() != OtaState::PendingReboot {
        let error = ctrl.last_error().map(|e| e.to_string()).unwrap_or_default();
        tracing::warn!("update refused in state {}: {}", ctrl.status(), error);
        if ctrl.app_store().as_bytes()[app_region] != factory[..] {
            return Err("application store modified by a refused update".into());
        }
        tracing::info!("application store untouched");
        return Ok(());
    }

    tracing::info!("rebooting into {}", version);
    let (ext, app) = ctrl.into_stores();
    let mut ctrl = boot(ext, app, &tasks, version)?;

    if !skip_confirm {
        let confirm = encode(Transport::Serial, &OtaCommand::Confirm)?;
        let responses = exchange(&mut link, &mut ctrl, &[confirm])?;
        if responses != [OtaResponse::Confirmed] {
            return Err(format!("confirm answered with {responses:?}").into());
        }
        let installed = ctrl.backup().header().installed;
        tracing::info!("running {} ({} bytes) confirmed", installed.version, installed.size);
        return Ok(());
    }

    tracing::warn!("{} never confirms, rebooting again", version);
    let (ext, app) = ctrl.into_stores();
    let ctrl = boot(ext, app, &tasks, version)?;
    if ctrl.app_store().as_bytes()[app_region] != factory[..] {
        return Err("rollback did not restore the factory image".into());
    }
    tracing::info!(
        "factory image restored, failed version {}",
        ctrl.backup().header().failed_version
    );
    Ok(())
}
