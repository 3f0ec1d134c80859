//! Integration tests for the dxl-core packet codec.
//!
//! These tests drive complete frames through the public API of both protocol
//! versions: round trips, byte stuffing of frame markers, size limits and
//! integrity checking.

use dxl_core::{
    decode_instruction, decode_status, encode_instruction, encode_status,
    protocol::{
        messages::{MAX_PACKET_LEN_V1, MAX_PACKET_LEN_V2},
        params, PacketError,
    },
    DeviceStatus, Instruction, InstructionPacket, ProtocolVersion, StatusPacket, BROADCAST_ID,
};

const BOTH: [ProtocolVersion; 2] = [ProtocolVersion::V1, ProtocolVersion::V2];

fn roundtrip_instruction(version: ProtocolVersion, packet: InstructionPacket) -> InstructionPacket {
    let bytes = encode_instruction(version, &packet).expect("encode must succeed");
    let (decoded, consumed) = decode_instruction(version, &bytes).expect("decode must succeed");
    assert_eq!(consumed, bytes.len(), "all bytes must be consumed");
    decoded
}

fn roundtrip_status(version: ProtocolVersion, packet: StatusPacket) -> StatusPacket {
    let bytes = encode_status(version, &packet).expect("encode must succeed");
    let (decoded, consumed) = decode_status(version, &bytes).expect("decode must succeed");
    assert_eq!(consumed, bytes.len(), "all bytes must be consumed");
    decoded
}

#[test]
fn test_roundtrip_every_v2_instruction() {
    for instruction in [
        Instruction::Ping,
        Instruction::Read,
        Instruction::Write,
        Instruction::RegWrite,
        Instruction::Action,
        Instruction::FactoryReset,
        Instruction::Reboot,
        Instruction::Clear,
        Instruction::SyncRead,
        Instruction::SyncWrite,
        Instruction::FastSyncRead,
        Instruction::FastSyncWrite,
        Instruction::BulkRead,
        Instruction::BulkWrite,
    ] {
        let original = InstructionPacket::new(BROADCAST_ID, instruction, vec![0x84, 0x00, 0x04, 0x00, 0x01]);
        assert_eq!(original, roundtrip_instruction(ProtocolVersion::V2, original.clone()));
    }
}

#[test]
fn test_roundtrip_v1_read_built_from_params() {
    let read = params::read(ProtocolVersion::V1, 0x24, 2).unwrap();
    let original = InstructionPacket::new(5, Instruction::Read, read);

    assert_eq!(original, roundtrip_instruction(ProtocolVersion::V1, original.clone()));
}

#[test]
fn test_roundtrip_status_with_frame_marker_payloads() {
    let payloads: [&[u8]; 5] = [
        &[0xFF, 0xFF, 0xFD],
        &[0xFF, 0xFF, 0xFD, 0xFD],
        &[0xFF, 0xFF, 0xFF, 0xFD],
        &[0xFF, 0xFF, 0xFD, 0xFF, 0xFF, 0xFD, 0x00],
        &[0xFD, 0xFD, 0xFF, 0xFF],
    ];

    for version in BOTH {
        for payload in payloads {
            let original = StatusPacket::new(1, DeviceStatus::OK, payload.to_vec());
            assert_eq!(original, roundtrip_status(version, original.clone()));
        }
    }
}

#[test]
fn test_device_status_survives_roundtrip_as_bitmask() {
    let status = DeviceStatus(DeviceStatus::OVERLOAD | DeviceStatus::OVERHEATING);
    let original = StatusPacket::new(9, status, vec![]);

    let decoded = roundtrip_status(ProtocolVersion::V1, original);

    assert!(decoded.status.contains(DeviceStatus::OVERLOAD));
    assert!(decoded.status.contains(DeviceStatus::OVERHEATING));
}

#[test]
fn test_back_to_back_frames_decode_in_sequence() {
    // Arrange – two replies arriving in one read
    let first = StatusPacket::new(1, DeviceStatus::OK, vec![0x00, 0x02, 0x00, 0x00]);
    let second = StatusPacket::new(2, DeviceStatus::OK, vec![0xFF, 0xFF, 0xFD, 0x00]);
    let mut stream = encode_status(ProtocolVersion::V2, &first).unwrap();
    stream.extend(encode_status(ProtocolVersion::V2, &second).unwrap());

    // Act
    let (a, used) = decode_status(ProtocolVersion::V2, &stream).unwrap();
    let (b, rest) = decode_status(ProtocolVersion::V2, &stream[used..]).unwrap();

    // Assert
    assert_eq!(a, first);
    assert_eq!(b, second);
    assert_eq!(used + rest, stream.len());
}

#[test]
fn test_single_bit_flip_never_decodes_v1() {
    let packet = StatusPacket::new(2, DeviceStatus::OK, vec![0x10, 0x20, 0x30]);
    let frame = encode_status(ProtocolVersion::V1, &packet).unwrap();

    for index in 0..frame.len() {
        for bit in 0..8 {
            let mut corrupted = frame.clone();
            corrupted[index] ^= 1 << bit;
            assert!(
                decode_status(ProtocolVersion::V1, &corrupted).is_err(),
                "flip of bit {bit} in byte {index} went undetected"
            );
        }
    }
}

#[test]
fn test_largest_packet_fits_and_one_more_byte_does_not() {
    let cases = [
        (ProtocolVersion::V1, MAX_PACKET_LEN_V1 - 6),
        (ProtocolVersion::V2, MAX_PACKET_LEN_V2 - 10),
    ];

    for (version, max_params) in cases {
        let fits = InstructionPacket::new(1, Instruction::Write, vec![0u8; max_params]);
        let too_long = InstructionPacket::new(1, Instruction::Write, vec![0u8; max_params + 1]);

        assert_eq!(
            encode_instruction(version, &fits).unwrap().len(),
            version.max_packet_len()
        );
        assert!(matches!(
            encode_instruction(version, &too_long),
            Err(PacketError::PacketTooLong { .. })
        ));
    }
}

#[test]
fn test_stuffing_counts_against_the_size_limit() {
    // 1014 parameter bytes would fit unstuffed; 338 escapes push it over.
    let params = [0xFF, 0xFF, 0xFD].repeat(338);
    let packet = InstructionPacket::new(1, Instruction::Write, params);

    let result = encode_instruction(ProtocolVersion::V2, &packet);

    assert!(matches!(result, Err(PacketError::PacketTooLong { .. })));
}

#[test]
fn test_protocol_versions_do_not_understand_each_other() {
    let packet = StatusPacket::new(1, DeviceStatus::OK, vec![1, 2]);
    let v1 = encode_status(ProtocolVersion::V1, &packet).unwrap();
    let v2 = encode_status(ProtocolVersion::V2, &packet).unwrap();

    assert!(decode_status(ProtocolVersion::V2, &v1).is_err());
    assert!(decode_status(ProtocolVersion::V1, &v2).is_err());
}
