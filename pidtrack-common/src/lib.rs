#![no_std]

/// Key type of `pid_traffic_map`.
pub type Pid = u32;

/// Value of `pid_traffic_map`. The kernel probes attached to
/// `tcp_sendmsg`, `tcp_cleanup_rbuf`, `udp_sendmsg` and `udp_recvmsg`
/// increment these counters; userspace only ever inserts the zeroed record.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[repr(C)]
pub struct TrafficStats {
    pub rx_bytes: u64,
    pub tx_bytes: u64,
}
