use super::*;

#[test]
fn version_parse() {
    assert_eq!(FirmwareVersion::parse("1.2.3"), Some(FirmwareVersion::new(1, 2, 3)));
    assert_eq!(FirmwareVersion::parse(" 10.0.255 "), Some(FirmwareVersion::new(10, 0, 255)));
    assert_eq!(FirmwareVersion::parse("1.2"), None);
    assert_eq!(FirmwareVersion::parse("1.2.3.4"), None);
    assert_eq!(FirmwareVersion::parse("1.256.0"), None);
    assert!(FirmwareVersion::new(1, 2, 3) < FirmwareVersion::new(1, 10, 0));
}

#[test]
fn error_code_numbering_is_stable() {
    assert_eq!(ErrorCode::AlreadyInProgress as u8, 1);
    assert_eq!(ErrorCode::Timeout as u8, 11);
    for code in 1..=13 {
        let parsed = ErrorCode::from_u8(code).unwrap();
        assert_eq!(parsed as u8, code);
    }
    assert_eq!(ErrorCode::from_u8(0), None);
    assert_eq!(ErrorCode::from_u8(14), None);
}

#[test]
fn serial_start_over_cobs() {
    let cmd = OtaCommand::Start {
        size: 1024,
        crc32: 0xDEAD_BEEF,
        version: FirmwareVersion::new(1, 2, 3),
    };
    let mut buf = [0u8; COBS_MAX_MSG_SIZE];
    let frame = postcard::to_slice_cobs(&cmd, &mut buf).unwrap();
    // COBS frames never contain zero except the terminator.
    assert_eq!(frame.last(), Some(&0));
    assert!(!frame[..frame.len() - 1].contains(&0));
    let decoded: OtaCommand = postcard::from_bytes_cobs(frame).unwrap();
    assert_eq!(decoded, cmd);
}

#[test]
fn radio_chunk_index_maps_to_offset() {
    let data = [0xA5u8; 16];
    let mut frame = [0u8; 32];
    frame[0] = radio::MSG_OTA_CHUNK;
    frame[1..3].copy_from_slice(&3u16.to_le_bytes());
    frame[3..19].copy_from_slice(&data);
    let cmd = radio::decode_command(&frame[..19]).unwrap();
    assert_eq!(
        cmd,
        OtaCommand::Chunk {
            offset: 3 * radio::RADIO_MAX_CHUNK as u32,
            data: &data,
        }
    );
}

#[test]
fn radio_start_layout() {
    let mut buf = [0u8; radio::RADIO_MAX_FRAME];
    let cmd = OtaCommand::Start {
        size: 0x0102_0304,
        crc32: 0xAABB_CCDD,
        version: FirmwareVersion::new(4, 5, 6),
    };
    let frame = radio::encode_command(&cmd, &mut buf).unwrap();
    assert_eq!(frame, &[0x50, 0x04, 0x03, 0x02, 0x01, 0xDD, 0xCC, 0xBB, 0xAA, 4, 5, 6]);
    assert_eq!(radio::decode_command(frame).unwrap(), cmd);
}

#[test]
fn radio_rejects_bad_frames() {
    assert_eq!(radio::decode_command(&[]), Err(DecodeError::Truncated));
    assert_eq!(radio::decode_command(&[0x50, 1, 2]), Err(DecodeError::Truncated));
    assert_eq!(radio::decode_command(&[0x42]), Err(DecodeError::UnknownMessage(0x42)));

    let oversized = [0u8; radio::RADIO_MAX_CHUNK + 1];
    let mut buf = [0u8; 512];
    let chunk = OtaCommand::Chunk { offset: 0, data: &oversized };
    assert_eq!(radio::encode_command(&chunk, &mut buf), Err(DecodeError::Oversized));

    // Offsets that are not on a chunk boundary cannot be expressed by index.
    let unaligned = OtaCommand::Chunk { offset: 7, data: &[1, 2, 3] };
    assert_eq!(radio::encode_command(&unaligned, &mut buf), Err(DecodeError::InvalidField));
}

#[test]
fn radio_finish_with_and_without_crc() {
    assert_eq!(radio::decode_command(&[0x52]).unwrap(), OtaCommand::Finish { crc32: None });
    assert_eq!(
        radio::decode_command(&[0x52, 0x78, 0x56, 0x34, 0x12]).unwrap(),
        OtaCommand::Finish { crc32: Some(0x1234_5678) }
    );
}

#[test]
fn radio_status_response() {
    let resp = OtaResponse::Status {
        state: OtaState::Receiving,
        progress: 42,
        error: None,
    };
    let mut buf = [0u8; 8];
    let frame = radio::encode_response(&resp, &mut buf).unwrap();
    assert_eq!(frame, &[0x5F, 5, 2, 42, 0]);
    assert_eq!(radio::decode_response(frame).unwrap(), resp);

    let err = OtaResponse::Error(ErrorCode::CrcMismatch);
    let frame = radio::encode_response(&err, &mut buf).unwrap();
    assert_eq!(radio::decode_response(frame).unwrap(), err);

    assert_eq!(radio::decode_response(&[0x5F, 6, 0]), Err(DecodeError::InvalidField));
}

#[test]
fn ble_data_write() {
    let mut buf = [0u8; ble::BLE_MAX_PAYLOAD];
    let value = ble::encode_data_write(0x200, &[1, 2, 3, 4], &mut buf).unwrap();
    assert_eq!(value, &[0x00, 0x02, 0x00, 0x00, 1, 2, 3, 4]);
    assert_eq!(
        ble::decode_data_write(value).unwrap(),
        OtaCommand::Chunk { offset: 0x200, data: &[1, 2, 3, 4] }
    );
    assert_eq!(ble::decode_data_write(&[1, 2]), Err(DecodeError::Truncated));

    let too_big = [0u8; ble::MAX_CHUNK + 1];
    assert_eq!(ble::encode_data_write(0, &too_big, &mut buf), Err(DecodeError::Oversized));
}

#[test]
fn ble_control_and_status() {
    let mut buf = [0u8; 64];
    let value = ble::encode_control(&OtaCommand::Finish { crc32: Some(7) }, &mut buf).unwrap();
    assert_eq!(ble::decode_control_write(value).unwrap(), OtaCommand::Finish { crc32: Some(7) });

    let value = ble::encode_status(&OtaResponse::Ack { progress: 60 }, &mut buf).unwrap();
    assert_eq!(ble::decode_status(value).unwrap(), OtaResponse::Ack { progress: 60 });
}
