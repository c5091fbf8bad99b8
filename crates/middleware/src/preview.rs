/// Number of payload bytes shown when logging a rejected message
pub const PREVIEW_BYTES: usize = 32;

/// Render the first `max` bytes of a payload as space-separated hex pairs.
pub fn hex_preview(payload: &[u8], max: usize) -> String {
    let shown = &payload[..payload.len().min(max)];
    let mut out = String::with_capacity(shown.len() * 3);
    for (i, byte) in shown.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        out.push_str(&format!("{:02x}", byte));
    }
    out
}
