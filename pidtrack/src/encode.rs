//! Binary layout of `pid_traffic_map` entries.
//!
//! The key is the PID as a little-endian `u32`. The value is a
//! `TrafficStats` record, two little-endian `u64` counters. Both are handed
//! to bpftool as hex text, which is why the rendering has to be exact.

use std::mem;

use byteorder::{ByteOrder, LittleEndian};
use thiserror::Error;

use pidtrack_common::{Pid, TrafficStats};

pub const KEY_LEN: usize = mem::size_of::<Pid>();
pub const VALUE_LEN: usize = mem::size_of::<TrafficStats>();

const _: () = assert!(KEY_LEN == 4);
const _: () = assert!(VALUE_LEN == 16);

#[derive(Error, Debug, PartialEq, Eq)]
pub enum EncodingError {
    #[error("PID {0} does not fit into an unsigned 32-bit map key")]
    OutOfRange(i64),
}

pub fn encode_key(pid: i64) -> Result<[u8; KEY_LEN], EncodingError> {
    let pid = Pid::try_from(pid).map_err(|_| EncodingError::OutOfRange(pid))?;

    let mut buf = [0; KEY_LEN];
    LittleEndian::write_u32(&mut buf, pid);
    Ok(buf)
}

fn encode_value(stats: &TrafficStats) -> [u8; VALUE_LEN] {
    let mut buf = [0; VALUE_LEN];
    LittleEndian::write_u64(&mut buf[0..8], stats.rx_bytes);
    LittleEndian::write_u64(&mut buf[8..16], stats.tx_bytes);
    buf
}

/// Initial value of every newly tracked PID.
pub fn encode_zero_value() -> [u8; VALUE_LEN] {
    encode_value(&TrafficStats::default())
}

/// Renders bytes the way `bpftool ... key hex` expects them: lowercase,
/// two digits per byte, separated by single spaces.
pub fn to_hex(bytes: &[u8]) -> String {
    to_hex_args(bytes).join(" ")
}

/// Same as [`to_hex`], but one element per byte, ready to be passed as
/// separate command line arguments.
pub fn to_hex_args(bytes: &[u8]) -> Vec<String> {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}
