// Copyright 2024 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Parameter persistence on one reserved flash page.
//!
//! The record is versioned and field-keyed: a small header, a run of
//! `(tag, len, value)` fields, and a CRC trailer. Fields may be reordered or
//! added without corrupting older firmware's values; unknown tags are
//! skipped. Anything that fails the magic, version, CRC, or parameter
//! validation loads defaults instead.
//!
//! Writes are assumed to succeed once confirmed; there is no wear leveling
//! and no redundancy. One page, one record, one writer.

use aligned::{Aligned, A4};
use as_slice::{AsMutSlice, AsSlice};
use bytemuck_derive::{Pod, Zeroable};
use crc::{Crc, CRC_32_ISCSI};
use embedded_storage::nor_flash::ReadNorFlash;
use embedded_storage_async::nor_flash::NorFlash as AsyncNorFlash;

use crate::params::CalParams;

/// Everything a parameter store backend has to offer: blocking reads plus
/// async erase/write, the way softdevice-style flash drivers expose it.
pub trait StoreBackend: ReadNorFlash + AsyncNorFlash {}
impl<T: ReadNorFlash + AsyncNorFlash> StoreBackend for T {}

/// Upper bound for one serialized record, header and CRC included.
pub const RECORD_CAPACITY: usize = 128;

const MAGIC: [u8; 4] = *b"BCEL";
const VERSION: u16 = 1;
const HEADER_LEN: usize = core::mem::size_of::<Header>();
const CRC_LEN: usize = 4;

#[derive(Copy, Clone, Pod, Zeroable)]
#[repr(C)]
struct Header {
    magic: [u8; 4],
    version: u16,
    payload_len: u16,
}

mod tags {
    pub const REFERENCE_SCALE: u8 = 1;
    pub const MAX_FORCE: u8 = 2;
    pub const MIN_FORCE: u8 = 3;
    pub const REDUCTION_PCT: u8 = 4;
    pub const MIN_CODE: u8 = 5;
    pub const MAX_CODE: u8 = 6;
    pub const LINEARIZE: u8 = 7;
    pub const GAMMA: u8 = 8;
}

fn crc32(bytes: &[u8]) -> [u8; 4] {
    let crc = Crc::<u32>::new(&CRC_32_ISCSI);
    crc.checksum(bytes).to_le_bytes()
}

fn put_field(buf: &mut [u8], at: usize, tag: u8, value: &[u8]) -> usize {
    buf[at] = tag;
    buf[at + 1] = value.len() as u8;
    buf[at + 2..at + 2 + value.len()].copy_from_slice(value);
    at + 2 + value.len()
}

/// Serialize `params` into `buf`, returning the record length.
fn encode(params: &CalParams, buf: &mut [u8; RECORD_CAPACITY]) -> usize {
    let mut at = HEADER_LEN;
    at = put_field(buf, at, tags::REFERENCE_SCALE, &params.reference_scale.to_le_bytes());
    at = put_field(buf, at, tags::MAX_FORCE, &params.max_force.to_le_bytes());
    at = put_field(buf, at, tags::MIN_FORCE, &params.min_force.to_le_bytes());
    at = put_field(buf, at, tags::REDUCTION_PCT, &params.reduction_pct.to_le_bytes());
    at = put_field(buf, at, tags::MIN_CODE, &[params.min_code]);
    at = put_field(buf, at, tags::MAX_CODE, &[params.max_code]);
    at = put_field(buf, at, tags::LINEARIZE, &[u8::from(params.linearize)]);
    at = put_field(buf, at, tags::GAMMA, &params.gamma.to_le_bytes());

    let header = Header {
        magic: MAGIC,
        version: VERSION,
        payload_len: (at - HEADER_LEN) as u16,
    };
    buf[..HEADER_LEN].copy_from_slice(bytemuck::bytes_of(&header));
    let checksum = crc32(&buf[..at]);
    buf[at..at + CRC_LEN].copy_from_slice(&checksum);
    at + CRC_LEN
}

fn f32_field(value: &[u8]) -> f32 {
    f32::from_le_bytes([value[0], value[1], value[2], value[3]])
}

fn apply_field(params: &mut CalParams, tag: u8, value: &[u8]) {
    match (tag, value.len()) {
        (tags::REFERENCE_SCALE, 4) => params.reference_scale = f32_field(value),
        (tags::MAX_FORCE, 4) => params.max_force = f32_field(value),
        (tags::MIN_FORCE, 4) => params.min_force = f32_field(value),
        (tags::REDUCTION_PCT, 4) => params.reduction_pct = f32_field(value),
        (tags::MIN_CODE, 1) => params.min_code = value[0],
        (tags::MAX_CODE, 1) => params.max_code = value[0],
        (tags::LINEARIZE, 1) => params.linearize = value[0] != 0,
        (tags::GAMMA, 4) => params.gamma = f32_field(value),
        _ => crate::debug!("skipping unknown parameter field tag {}", tag),
    }
}

fn decode(buf: &[u8]) -> Option<CalParams> {
    let header: Header = bytemuck::pod_read_unaligned(buf.get(..HEADER_LEN)?);
    if header.magic != MAGIC || header.version != VERSION {
        return None;
    }
    let payload_end = HEADER_LEN + usize::from(header.payload_len);
    let stored_crc = buf.get(payload_end..payload_end + CRC_LEN)?;
    if stored_crc != crc32(&buf[..payload_end]) {
        return None;
    }

    let mut params = CalParams::default();
    let mut at = HEADER_LEN;
    while at < payload_end {
        if at + 2 > payload_end {
            return None;
        }
        let tag = buf[at];
        let len = usize::from(buf[at + 1]);
        if at + 2 + len > payload_end {
            return None;
        }
        apply_field(&mut params, tag, &buf[at + 2..at + 2 + len]);
        at += 2 + len;
    }
    params.validate().ok()?;
    Some(params)
}

/// The calibration store: a RAM-side view of one flash page. Loaded at
/// startup, written only after an operator confirms a calibration result.
pub struct ParamStore<F> {
    flash: F,
}

impl<F: StoreBackend> ParamStore<F> {
    /// `flash` must start on an erase boundary and span at least one erase
    /// unit of `RECORD_CAPACITY` bytes or more.
    pub fn new(flash: F) -> Self {
        Self { flash }
    }

    /// Read the record, falling back to defaults when it does not verify.
    pub fn load(&mut self) -> CalParams {
        let mut buf: Aligned<A4, [u8; RECORD_CAPACITY]> = Aligned([0; RECORD_CAPACITY]);
        ReadNorFlash::read(&mut self.flash, 0, buf.as_mut_slice()).unwrap();
        match decode(buf.as_slice()) {
            Some(params) => params,
            None => {
                crate::info!("no valid parameter record, using defaults");
                CalParams::default()
            }
        }
    }

    pub async fn save(&mut self, params: &CalParams) {
        let mut buf: Aligned<A4, [u8; RECORD_CAPACITY]> = Aligned([0; RECORD_CAPACITY]);
        encode(params, &mut buf);
        self.flash
            .erase(0, F::ERASE_SIZE as u32)
            .await
            .expect("Erase to succeed");
        self.flash
            .write(0, buf.as_slice())
            .await
            .expect("Write to succeed");
        crate::info!("parameter record written");
    }
}


#[cfg(test)]
mod tests {
    use super::testutil::MockFlash;
    use super::*;
    use embassy_futures::block_on;

    fn sample_params() -> CalParams {
        CalParams {
            reference_scale: 42.17,
            max_force: 30_500.0,
            min_force: 2_250.5,
            reduction_pct: 85.0,
            min_code: 7,
            max_code: 243,
            linearize: false,
            gamma: 2.5,
        }
    }

    #[test]
    fn save_then_load_round_trips() {
        let mut store = ParamStore::new(MockFlash::blank());
        let params = sample_params();
        block_on(store.save(&params));
        assert_eq!(store.load(), params);
    }

    #[test]
    fn blank_flash_loads_defaults() {
        let mut store = ParamStore::new(MockFlash::blank());
        assert_eq!(store.load(), CalParams::default());
    }

    #[test]
    fn corrupt_payload_loads_defaults() {
        let mut store = ParamStore::new(MockFlash::blank());
        block_on(store.save(&sample_params()));
        store.flash.mem[HEADER_LEN + 3] ^= 0x40;
        assert_eq!(store.load(), CalParams::default());
    }

    #[test]
    fn version_mismatch_loads_defaults() {
        let mut store = ParamStore::new(MockFlash::blank());
        let mut buf = [0u8; RECORD_CAPACITY];
        let len = encode(&sample_params(), &mut buf);
        // Patch the version and fix the CRC back up so only the version gate
        // can reject the record.
        buf[4] = buf[4].wrapping_add(1);
        let checksum = crc32(&buf[..len - CRC_LEN]);
        buf[len - CRC_LEN..len].copy_from_slice(&checksum);
        store.flash.mem[..RECORD_CAPACITY].copy_from_slice(&buf);
        assert_eq!(store.load(), CalParams::default());
    }

    #[test]
    fn unknown_fields_are_skipped() {
        let mut store = ParamStore::new(MockFlash::blank());
        let mut buf = [0u8; RECORD_CAPACITY];
        let mut at = HEADER_LEN;
        at = put_field(&mut buf, at, 0x63, &[1, 2, 3, 4, 5]);
        at = put_field(&mut buf, at, tags::MIN_CODE, &[11]);
        let header = Header {
            magic: MAGIC,
            version: VERSION,
            payload_len: (at - HEADER_LEN) as u16,
        };
        buf[..HEADER_LEN].copy_from_slice(bytemuck::bytes_of(&header));
        let checksum = crc32(&buf[..at]);
        buf[at..at + CRC_LEN].copy_from_slice(&checksum);
        store.flash.mem[..RECORD_CAPACITY].copy_from_slice(&buf);

        let expected = CalParams {
            min_code: 11,
            ..CalParams::default()
        };
        assert_eq!(store.load(), expected);
    }

    #[test]
    fn truncated_field_loads_defaults() {
        let mut store = ParamStore::new(MockFlash::blank());
        let mut buf = [0u8; RECORD_CAPACITY];
        let mut at = HEADER_LEN;
        // A field claiming more bytes than the payload holds.
        buf[at] = tags::GAMMA;
        buf[at + 1] = 200;
        at += 2;
        let header = Header {
            magic: MAGIC,
            version: VERSION,
            payload_len: (at - HEADER_LEN) as u16,
        };
        buf[..HEADER_LEN].copy_from_slice(bytemuck::bytes_of(&header));
        let checksum = crc32(&buf[..at]);
        buf[at..at + CRC_LEN].copy_from_slice(&checksum);
        store.flash.mem[..RECORD_CAPACITY].copy_from_slice(&buf);
        assert_eq!(store.load(), CalParams::default());
    }

    #[test]
    fn nothing_is_written_until_save() {
        let mut store = ParamStore::new(MockFlash::blank());
        let _ = store.load();
        assert_eq!(store.flash.writes, 0);
    }
}
