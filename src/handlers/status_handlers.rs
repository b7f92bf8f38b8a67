//! Status handler.
//!
//! - GET / -> uptime, upstream count and per-connection load

use crate::services::stream_service::StreamService;
use serde::Serialize;
use std::collections::BTreeMap;

/// Body of `GET /`. Cheap: never touches the backend.
pub fn status_report(service: &StreamService) -> StatusResponse {
    let loads = service
        .pool
        .loads()
        .into_iter()
        .map(|(index, load)| (format!("upstream{}", index + 1), load))
        .collect();

    StatusResponse {
        server_status: "running",
        uptime: readable_time(service.uptime().num_seconds()),
        connected_upstreams: service.pool.len(),
        loads,
        version: env!("CARGO_PKG_VERSION"),
    }
}

/// Compact duration such as `2d:3h:0m:5s`; leading zero units are omitted.
pub fn readable_time(total_seconds: i64) -> String {
    let seconds = total_seconds.max(0);
    let units = [
        (seconds / 86_400, "d"),
        (seconds % 86_400 / 3_600, "h"),
        (seconds % 3_600 / 60, "m"),
        (seconds % 60, "s"),
    ];

    let parts: Vec<String> = units
        .iter()
        .skip_while(|(value, unit)| *value == 0 && *unit != "s")
        .map(|(value, unit)| format!("{value}{unit}"))
        .collect();
    parts.join(":")
}

#[derive(Serialize)]
pub struct StatusResponse {
    server_status: &'static str,
    uptime: String,
    connected_upstreams: usize,
    loads: BTreeMap<String, usize>,
    version: &'static str,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn readable_time_omits_leading_zero_units() {
        assert_eq!(readable_time(0), "0s");
        assert_eq!(readable_time(59), "59s");
        assert_eq!(readable_time(3_605), "1h:0m:5s");
        assert_eq!(readable_time(2 * 86_400 + 3 * 3_600 + 5), "2d:3h:0m:5s");
    }
}
