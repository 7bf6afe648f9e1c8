//! Human-readable status messages for constrained status fields

/// Maximum length in bytes of a status message
pub const MAX_STATUS_MESSAGE_LEN: usize = 1024;

const ELLIPSIS: &str = "...";

/// Cap `msg` at `max` bytes, ending truncated messages with `...`.
///
/// The cut lands on a UTF-8 character boundary, so the result may be a few
/// bytes shorter than `max`.
pub fn truncate_message(msg: &str, max: usize) -> String {
    if msg.len() <= max {
        return msg.to_string();
    }
    if max <= ELLIPSIS.len() {
        return ELLIPSIS[..max].to_string();
    }

    let mut cut = max - ELLIPSIS.len();
    while !msg.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}{}", &msg[..cut], ELLIPSIS)
}
