// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

//! Complete updates driven through the transport adapters.

use embassy_sync::blocking_mutex::raw::NoopRawMutex;
use ota::mem_flash::MemFlash;
use ota::transport::{ble, radio, serial::SerialLink};
use ota::{
    BackupManager, BootDecision, ErrorCode, FirmwareVersion, FlashLayout, HmacCtrCipher, OtaCommand, OtaConfig,
    OtaController, OtaResponse, OtaState, Platform, Region, SuspendCoordinator, CRC32,
};
use ota_protocol::ble::{decode_status, encode_control, encode_data_write, MAX_CHUNK};
use ota_protocol::radio::{decode_response, encode_command, RADIO_MAX_CHUNK};
use ota_protocol::COBS_MAX_MSG_SIZE;

type Ext = MemFlash<16384, 1024, 4>;
type App = MemFlash<4096, 512, 4>;
type Coordinator = SuspendCoordinator<NoopRawMutex, 2>;
type Ctrl<'a> = OtaController<'a, Ext, App, HmacCtrCipher, Clock, ()>;

const APP_BASE: usize = 1024;
const RUNNING: FirmwareVersion = FirmwareVersion::new(2, 0, 0);
const NEW: FirmwareVersion = FirmwareVersion::new(2, 1, 0);

struct Clock(u32);

impl Platform for Clock {
    fn uptime_secs(&self) -> u32 {
        self.0
    }

    fn delay_ms(&mut self, _ms: u32) {}

    fn system_reset(&mut self) -> ! {
        panic!("system reset")
    }
}

fn layout() -> FlashLayout {
    FlashLayout {
        header: Region::new(0, 1024),
        slot_a: Region::new(1024, 3072),
        slot_b: Region::new(4096, 3072),
        staging: Region::new(7168, 3072),
        application: Region::new(APP_BASE as u32, 3072),
    }
}

fn image(len: usize, seed: u8) -> Vec<u8> {
    (0..len).map(|i| (i as u8).wrapping_mul(17) ^ seed).collect()
}

fn backup(ext: &mut Ext, app: &App) -> BackupManager<HmacCtrCipher> {
    let cipher = HmacCtrCipher::new(b"integration key").unwrap();
    BackupManager::load(ext, app, layout(), OtaConfig::default(), cipher).unwrap()
}

fn boot(mut ext: Ext, app: App, tasks: &Coordinator) -> Ctrl<'_> {
    let backup = backup(&mut ext, &app);
    OtaController::new(ext, app, backup, Clock(1), tasks, (), RUNNING)
}

fn fresh_device<'a>(tasks: &'a Coordinator, running: &[u8]) -> Ctrl<'a> {
    let mut app = App::new();
    app.load(APP_BASE, running);
    boot(Ext::new(), app, tasks)
}

fn installed(ctrl: &Ctrl<'_>, len: usize) -> Vec<u8> {
    ctrl.app_store().as_bytes()[APP_BASE..APP_BASE + len].to_vec()
}

fn cobs(cmd: &OtaCommand<'_>) -> Vec<u8> {
    let mut buf = [0u8; COBS_MAX_MSG_SIZE];
    postcard::to_slice_cobs(cmd, &mut buf).unwrap().to_vec()
}

fn radio_exchange(ctrl: &mut Ctrl<'_>, cmd: &OtaCommand<'_>) -> OtaResponse {
    let mut frame = [0u8; 256];
    let mut out = [0u8; 256];
    let frame = encode_command(cmd, &mut frame).unwrap();
    let resp = radio::on_frame(ctrl, frame, &mut out).unwrap();
    decode_response(resp).unwrap()
}

fn ble_control(ctrl: &mut Ctrl<'_>, cmd: OtaCommand<'_>) -> OtaResponse {
    let mut value = [0u8; 256];
    let mut notify = [0u8; 32];
    let value = encode_control(&cmd, &mut value).unwrap();
    decode_status(ble::on_control_write(ctrl, value, &mut notify).unwrap()).unwrap()
}

#[test]
fn serial_stream_update() {
    let tasks = Coordinator::new();
    let mut sensor = tasks.register("sensor").unwrap();
    let new = image(1000, 0x21);
    let crc = CRC32.checksum(&new);
    let mut ctrl = fresh_device(&tasks, &image(3072, 0x42));

    // Whole session in one buffer, plus a frame of garbage
    let mut stream = cobs(&OtaCommand::Start {
        size: 1000,
        crc32: crc,
        version: NEW,
    });
    for (i, piece) in new.chunks(128).enumerate() {
        stream.extend(cobs(&OtaCommand::Chunk {
            offset: (i * 128) as u32,
            data: piece,
        }));
    }
    stream.extend([0x03, 0xFF, 0xFF, 0x00]);
    stream.extend(cobs(&OtaCommand::Finish { crc32: Some(crc) }));

    let mut link = SerialLink::<COBS_MAX_MSG_SIZE>::new();
    let mut responses = Vec::new();
    // Split the stream to exercise reassembly across reads
    for part in stream.chunks(50) {
        link.feed(part, &mut ctrl, |frame| {
            let mut frame = frame.to_vec();
            responses.push(postcard::from_bytes_cobs::<OtaResponse>(&mut frame).unwrap());
        });
        if ctrl.status() == OtaState::Receiving {
            assert!(sensor.is_paused());
        }
    }

    assert_eq!(responses.len(), 1 + 8 + 1 + 1);
    assert_eq!(responses[0], OtaResponse::Ready);
    assert_eq!(responses[1], OtaResponse::Ack { progress: 12 });
    assert_eq!(responses[8], OtaResponse::Ack { progress: 100 });
    assert_eq!(responses[9], OtaResponse::Malformed);
    assert_eq!(responses[10], OtaResponse::Complete);
    assert_eq!(ctrl.status(), OtaState::PendingReboot);
    assert_eq!(installed(&ctrl, 1000), new);
}

#[test]
fn radio_update_then_confirm() {
    let tasks = Coordinator::new();
    let new = image(1234, 0x5A);
    let crc = CRC32.checksum(&new);
    let mut ctrl = fresh_device(&tasks, &image(3072, 0x11));

    let start = OtaCommand::Start {
        size: 1234,
        crc32: crc,
        version: NEW,
    };
    assert_eq!(radio_exchange(&mut ctrl, &start), OtaResponse::Ready);
    for (i, piece) in new.chunks(RADIO_MAX_CHUNK).enumerate() {
        let chunk = OtaCommand::Chunk {
            offset: (i * RADIO_MAX_CHUNK) as u32,
            data: piece,
        };
        assert!(matches!(radio_exchange(&mut ctrl, &chunk), OtaResponse::Ack { .. }));
    }
    assert_eq!(
        radio_exchange(&mut ctrl, &OtaCommand::Status),
        OtaResponse::Status {
            state: OtaState::Receiving,
            progress: 100,
            error: None
        }
    );
    assert_eq!(
        radio_exchange(&mut ctrl, &OtaCommand::Finish { crc32: None }),
        OtaResponse::Complete
    );

    // Reset into the new image
    let (mut ext, mut app) = ctrl.into_stores();
    let mut mgr = backup(&mut ext, &app);
    assert_eq!(mgr.boot_check(&mut ext, &mut app, 1), Ok(BootDecision::TrialBoot));
    let mut ctrl = boot(ext, app, &tasks);
    assert_eq!(ctrl.status(), OtaState::PendingConfirm);

    assert_eq!(radio_exchange(&mut ctrl, &OtaCommand::Confirm), OtaResponse::Confirmed);
    assert_eq!(ctrl.status(), OtaState::Idle);
    assert_eq!(ctrl.backup().header().installed.version, NEW);
}

#[test]
fn unconfirmed_radio_update_rolls_back() {
    let tasks = Coordinator::new();
    let running = image(3072, 0x33);
    let new = image(600, 0x44);
    let mut ctrl = fresh_device(&tasks, &running);

    let start = OtaCommand::Start {
        size: 600,
        crc32: CRC32.checksum(&new),
        version: NEW,
    };
    radio_exchange(&mut ctrl, &start);
    for (i, piece) in new.chunks(RADIO_MAX_CHUNK).enumerate() {
        let offset = (i * RADIO_MAX_CHUNK) as u32;
        radio_exchange(&mut ctrl, &OtaCommand::Chunk { offset, data: piece });
    }
    radio_exchange(&mut ctrl, &OtaCommand::Finish { crc32: None });

    let (mut ext, mut app) = ctrl.into_stores();
    // First boot of the new image, which never confirms
    let mut mgr = backup(&mut ext, &app);
    assert_eq!(mgr.boot_check(&mut ext, &mut app, 1), Ok(BootDecision::TrialBoot));
    // Second boot rolls back
    let mut mgr = backup(&mut ext, &app);
    assert_eq!(mgr.boot_check(&mut ext, &mut app, 1), Ok(BootDecision::RolledBack));
    assert_eq!(mgr.rollback_count(), 1);
    assert_eq!(mgr.header().failed_version, NEW);

    let ctrl = boot(ext, app, &tasks);
    assert_eq!(ctrl.status(), OtaState::Idle);
    assert_eq!(installed(&ctrl, 3072), running);
}

#[test]
fn ble_update_with_wrong_finish_crc() {
    let tasks = Coordinator::new();
    let new = image(700, 0x66);
    let crc = CRC32.checksum(&new);
    let running = image(3072, 0x77);
    let mut ctrl = fresh_device(&tasks, &running);
    let mut value = [0u8; 256];
    let mut notify = [0u8; 32];

    let start = OtaCommand::Start {
        size: 700,
        crc32: crc,
        version: NEW,
    };
    assert_eq!(ble_control(&mut ctrl, start.clone()), OtaResponse::Ready);

    // Chunks are refused on the control characteristic
    let misplaced = OtaCommand::Chunk {
        offset: 0,
        data: &new[..10],
    };
    assert_eq!(ble_control(&mut ctrl, misplaced), OtaResponse::Malformed);

    for (i, piece) in new.chunks(MAX_CHUNK).enumerate() {
        let write = encode_data_write((i * MAX_CHUNK) as u32, piece, &mut value).unwrap();
        let status = ble::on_data_write(&mut ctrl, write, &mut notify).unwrap();
        assert!(matches!(decode_status(status).unwrap(), OtaResponse::Ack { .. }));
    }

    // Short data write
    let status = ble::on_data_write(&mut ctrl, &[1, 2], &mut notify).unwrap();
    assert_eq!(decode_status(status).unwrap(), OtaResponse::Malformed);

    assert_eq!(
        ble_control(&mut ctrl, OtaCommand::Finish { crc32: Some(crc ^ 1) }),
        OtaResponse::Error(ErrorCode::CrcMismatch)
    );
    assert_eq!(
        ble_control(&mut ctrl, OtaCommand::Status),
        OtaResponse::Status {
            state: OtaState::Error,
            progress: 100,
            error: Some(ErrorCode::CrcMismatch)
        }
    );
    assert_eq!(installed(&ctrl, 3072), running);

    // The app starts over
    assert_eq!(ble_control(&mut ctrl, start), OtaResponse::Ready);
    for (i, piece) in new.chunks(MAX_CHUNK).enumerate() {
        let write = encode_data_write((i * MAX_CHUNK) as u32, piece, &mut value).unwrap();
        ble::on_data_write(&mut ctrl, write, &mut notify).unwrap();
    }
    assert_eq!(ble_control(&mut ctrl, OtaCommand::Finish { crc32: Some(crc) }), OtaResponse::Complete);
    assert_eq!(installed(&ctrl, 700), new);
}

#[test]
fn confirm_before_reboot_is_refused() {
    let tasks = Coordinator::new();
    let new = image(400, 0x29);
    let mut ctrl = fresh_device(&tasks, &image(3072, 0x13));

    let start = OtaCommand::Start {
        size: 400,
        crc32: CRC32.checksum(&new),
        version: NEW,
    };
    assert_eq!(radio_exchange(&mut ctrl, &start), OtaResponse::Ready);
    for (i, piece) in new.chunks(RADIO_MAX_CHUNK).enumerate() {
        let offset = (i * RADIO_MAX_CHUNK) as u32;
        radio_exchange(&mut ctrl, &OtaCommand::Chunk { offset, data: piece });
    }
    assert_eq!(
        radio_exchange(&mut ctrl, &OtaCommand::Finish { crc32: None }),
        OtaResponse::Complete
    );
    assert_eq!(
        radio_exchange(&mut ctrl, &OtaCommand::Confirm),
        OtaResponse::Error(ErrorCode::NotStarted)
    );
    assert_eq!(ctrl.status(), OtaState::PendingReboot);

    let (mut ext, mut app) = ctrl.into_stores();
    let mut mgr = backup(&mut ext, &app);
    assert_eq!(mgr.boot_check(&mut ext, &mut app, 1), Ok(BootDecision::TrialBoot));
}

#[test]
fn errors_reach_the_app() {
    let tasks = Coordinator::new();
    let mut ctrl = fresh_device(&tasks, &image(3072, 0x01));

    let chunk = OtaCommand::Chunk {
        offset: 0,
        data: &[1, 2, 3],
    };
    assert_eq!(
        radio_exchange(&mut ctrl, &chunk),
        OtaResponse::Error(ErrorCode::NotStarted)
    );

    let oversize = OtaCommand::Start {
        size: 4000,
        crc32: 0,
        version: NEW,
    };
    assert_eq!(
        radio_exchange(&mut ctrl, &oversize),
        OtaResponse::Error(ErrorCode::SizeMismatch)
    );
    assert_eq!(radio_exchange(&mut ctrl, &OtaCommand::Abort), OtaResponse::Aborted);
    assert_eq!(
        radio_exchange(&mut ctrl, &OtaCommand::Status),
        OtaResponse::Status {
            state: OtaState::Idle,
            progress: 0,
            error: None
        }
    );
}
