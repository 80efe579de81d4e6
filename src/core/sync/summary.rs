use once_cell::sync::Lazy;
use regex::Regex;

use crate::core::sync::progress::parse_size;

/// Totals rsync prints after a transfer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferSummary {
    pub sent_bytes: u64,
    pub received_bytes: u64,
    pub total_size_bytes: u64,
}

static RE_SENT_RECEIVED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"sent\s+([0-9][0-9.,]*[KMGT]?)\s+bytes\s+received\s+([0-9][0-9.,]*[KMGT]?)\s+bytes").unwrap()
});
static RE_TOTAL_SIZE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"total size is\s+([0-9][0-9.,]*[KMGT]?)").unwrap());

pub fn parse_transfer_summary(output: &str) -> Option<TransferSummary> {
    let sent_received = RE_SENT_RECEIVED.captures(output).and_then(|cap| {
        let sent = parse_size(cap.get(1)?.as_str())?;
        let received = parse_size(cap.get(2)?.as_str())?;
        Some((sent, received))
    });
    let total = RE_TOTAL_SIZE
        .captures(output)
        .and_then(|cap| cap.get(1))
        .and_then(|m| parse_size(m.as_str()));

    if sent_received.is_none() && total.is_none() {
        return None;
    }

    let (sent_bytes, received_bytes) = sent_received.unwrap_or((0, 0));
    Some(TransferSummary {
        sent_bytes,
        received_bytes,
        total_size_bytes: total.unwrap_or(0),
    })
}
