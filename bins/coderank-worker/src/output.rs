//! Byte budget for captured output fields.

/// Default per-field budget: 50 KiB.
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 50 * 1024;

const MARKER_PREFIX: &str = "\n\n... (truncated, total size: ";
const MARKER_SUFFIX: &str = " bytes)";

/// Cap `output` at `limit` bytes, replacing the excess with a marker that
/// records the original size. Applied per field, after demultiplexing and
/// before classification. Idempotent: feeding an already-truncated string
/// back in at the same budget returns it unchanged.
pub fn truncate_output(output: &str, limit: usize) -> String {
    if output.len() <= limit || is_truncated(output, limit) {
        return output.to_string();
    }

    // Cut on a char boundary at or below the byte budget.
    let mut cut = limit;
    while cut > 0 && !output.is_char_boundary(cut) {
        cut -= 1;
    }

    format!(
        "{}{}{}{}",
        &output[..cut],
        MARKER_PREFIX,
        output.len(),
        MARKER_SUFFIX
    )
}

/// A truncated string is at most `limit` bytes of content plus a marker; it
/// always exceeds the bare limit, so recognize the marker tail instead.
/// Accepted only when the content before the marker fits the budget and the
/// stated size is a number larger than the budget; anything else merely
/// resembles a marker and gets truncated like ordinary output.
fn is_truncated(output: &str, limit: usize) -> bool {
    let Some(at) = output.rfind(MARKER_PREFIX) else {
        return false;
    };
    if at > limit || !output.ends_with(MARKER_SUFFIX) {
        return false;
    }
    let size_start = at + MARKER_PREFIX.len();
    let size_end = output.len() - MARKER_SUFFIX.len();
    // The prefix and suffix can overlap in a crafted tail.
    if size_start > size_end {
        return false;
    }
    output[size_start..size_end]
        .parse::<usize>()
        .map(|stated| stated > limit)
        .unwrap_or(false)
}
