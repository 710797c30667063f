use stmpo_model::FrameRange;

use crate::error::ConfigError;

/// Partition an inclusive frame range into at most `n` contiguous sub-ranges.
///
/// `n` is clamped to the frame count so no empty sub-range is ever produced.
/// The base chunk is `total / n` frames and the first `total % n` chunks
/// carry one extra frame, so chunk lengths differ by at most one and the
/// longer chunks sit at the front. Output is ascending and exactly tiles the
/// input. Deterministic: identical inputs give identical partitions.
pub fn split(range: FrameRange, n: u32) -> Result<Vec<FrameRange>, ConfigError> {
    if range.end < range.start {
        return Err(ConfigError::InvalidFrameRange {
            start: range.start,
            end: range.end,
        });
    }

    let total = range.len();
    let parts = u64::from(n.max(1)).min(total);

    let base = total / parts;
    let rem = total % parts;

    let mut out = Vec::with_capacity(parts as usize);
    let mut cur = range.start;
    for i in 0..parts {
        let span = base + if i < rem { 1 } else { 0 };
        let end = cur + span as i64 - 1;
        out.push(FrameRange::new(cur, end));
        cur = end + 1;
    }
    Ok(out)
}
