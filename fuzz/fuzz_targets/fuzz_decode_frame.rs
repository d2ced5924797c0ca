#![no_main]
use bytes::BytesMut;
use givenergy_local::codec::{FieldKind, decode};
use givenergy_local::modbus::framer::FrameCodec;
use givenergy_local::modbus::pdu::{Message, Response};
use libfuzzer_sys::fuzz_target;
use tokio_util::codec::Decoder;

fuzz_target!(|data: &[u8]| {
    // Feed the raw bytes through the stream decoder as a socket would
    let mut codec = FrameCodec::new();
    let mut buf = BytesMut::from(data);
    while let Ok(Some(frame)) = codec.decode(&mut buf) {
        if let Ok(Message::Transparent(Response::ReadRegisters { values, .. })) =
            Message::decode(&frame)
        {
            for kind in [FieldKind::TimeSlot, FieldKind::DateTime, FieldKind::Ascii(5)] {
                if values.len() >= kind.width() {
                    let _ = decode(kind, &values[..kind.width()]);
                }
            }
        }
    }
});
