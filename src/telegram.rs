//! Telegram acquisition primitives
//!
//! A P1 telegram travels through four stages before it becomes a
//! [`crate::snapshot::Snapshot`]:
//!
//! 1. [`frame::FrameAssembler`] cuts the serial byte stream into [`frame::RawFrame`]s
//! 2. [`crc::validate`] checks the CRC-16/ARC trailer
//! 3. [`decode::FieldDecoder`] turns the lines into typed [`decode::FieldRecord`]s
//! 4. the snapshot builder maps known OBIS codes (see [`obis`]) onto the model
//!
//! [`encode`] goes the other way and renders telegrams, which the replay
//! tooling and the tests rely on.

pub mod crc;
pub mod decode;
pub mod encode;
pub mod frame;
pub mod obis;

pub use crc::{ValidatedFrame, crc16, validate};
pub use decode::{
    DecodedTelegram, FieldDecoder, FieldRecord, FieldValue, FixedPoint, MeterTimestamp, Quantity,
};
pub use encode::{encode_quantity, encode_record, encode_telegram};
pub use frame::{FrameAssembler, RawFrame};
