#![no_main]

use libfuzzer_sys::fuzz_target;
use vfd_modbus::codec::{self, Direction};
use vfd_modbus::{Catalog, Request, Response, SimulatedDrive, SimulatorConfig};

fuzz_target!(|data: &[u8]| {
    for direction in [Direction::Request, Direction::Response] {
        if let Some(len) = codec::expected_frame_len(direction, data) {
            assert!(len >= 4);
        }
    }

    if let Ok(frame) = codec::decode(data) {
        assert_eq!(frame.encode().as_ref(), data);
        for request in [Request::read(0x0000, 9), Request::write(0x0002, 255)] {
            let _ = Response::from_frame(&frame, &request, frame.station);
        }
    }

    let Ok(profile) = Catalog::builtin().and_then(|catalog| catalog.profile("CDE550")) else {
        return;
    };
    let mut drive = SimulatedDrive::new(profile, SimulatorConfig::default());

    // Raw bytes first, then the same body behind a valid CRC
    let _ = drive.handle_frame(data);
    if let [station, function, payload @ ..] = data {
        let frame = codec::encode(*station, *function, payload);
        if let Some(reply) = drive.handle_frame(&frame) {
            // CRC-16/Modbus over a frame and its own CRC leaves no residue
            assert_eq!(codec::crc16(&reply), 0);
        }
    }
});
