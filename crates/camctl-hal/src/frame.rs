//! Raw frame assembly: interleaved RGB bytes → [`RgbFrame`] with software
//! channel levels applied.

use camctl_types::{CamError, ChannelLevels, RgbFrame};
use chrono::Utc;

/// Scale one channel value: `floor(raw * level / 255)`.
///
/// Exact integer arithmetic; `level = 255` is the identity and `level = 0`
/// blanks the channel.
#[inline]
pub fn scale_channel(raw: u8, level: u8) -> u8 {
    // 255 * 255 fits in u16.
    ((raw as u16 * level as u16) / 255) as u8
}

/// Number of bytes a `width × height` RGB24 frame occupies.
pub fn rgb_len(width: u32, height: u32) -> Option<usize> {
    (width as usize)
        .checked_mul(height as usize)
        .and_then(|px| px.checked_mul(3))
}

/// Build an [`RgbFrame`] from a raw device buffer.
///
/// Bytes beyond `width * height * 3` are ignored.
///
/// # Errors
///
/// [`CamError::FrameTooShort`] when `raw` holds fewer bytes than the frame
/// geometry requires, [`CamError::CaptureFailed`] when the geometry itself
/// overflows.
pub fn assemble_rgb(
    raw: &[u8],
    width: u32,
    height: u32,
    levels: ChannelLevels,
    sequence: u64,
) -> Result<RgbFrame, CamError> {
    let expected = rgb_len(width, height).ok_or_else(|| {
        CamError::CaptureFailed(format!("frame geometry {width}x{height} overflows"))
    })?;
    if raw.len() < expected {
        return Err(CamError::FrameTooShort {
            expected,
            actual: raw.len(),
        });
    }

    let raw = &raw[..expected];
    let data = if levels == ChannelLevels::FULL {
        raw.to_vec()
    } else {
        let mut out = Vec::with_capacity(expected);
        for px in raw.chunks_exact(3) {
            out.push(scale_channel(px[0], levels.red));
            out.push(scale_channel(px[1], levels.green));
            out.push(scale_channel(px[2], levels.blue));
        }
        out
    };

    Ok(RgbFrame {
        width,
        height,
        data,
        sequence,
        captured_at: Utc::now(),
    })
}
