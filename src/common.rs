//! Pieces shared by the sync layer, the light engine and the client runtime.
pub mod box_error;
pub mod config;
pub mod room;
pub mod stream_time_stat;
pub mod sync_error;
pub mod websocket;

use std::time::{SystemTime, UNIX_EPOCH};

/// Wall clock in microseconds since the unix epoch.
///
/// Every timestamp that goes on the wire comes from here, so devices in a
/// session need roughly synchronized clocks (ntp is plenty).
pub fn get_micro_time() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros())
        .unwrap_or(0)
}

/// Same clock narrowed to the u64 used by wire timestamps
pub fn get_stamp() -> u64 {
    get_micro_time() as u64
}

#[cfg(test)]
mod test_clock {
    use super::*;

    #[test]
    fn clock_moves_forward() {
        let a = get_micro_time();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let b = get_micro_time();
        assert!(b > a);
        assert!(get_stamp() > 0);
    }
}
