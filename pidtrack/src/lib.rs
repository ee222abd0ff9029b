//! Seeds a pinned BPF map with a zeroed traffic record for every process
//! which currently holds a TCP or UDP socket, so the kernel probes have a
//! slot to count into before the process sends its first packet.

pub mod command;
pub mod discover;
pub mod encode;
pub mod reconcile;
pub mod settings;
pub mod writer;

pub use discover::{parse_pids, ActivePidSet, DiscoveryError, PidSource, SsDiscoverer};
pub use encode::{encode_key, encode_zero_value, to_hex, EncodingError};
pub use reconcile::{ReconciliationOutcome, ReconciliationSummary, Reconciler};
pub use settings::Settings;
pub use writer::{Bpftool, MapUpdater, MapWriteError, MapWriter, WriteError};
