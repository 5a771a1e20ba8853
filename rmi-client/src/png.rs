//! PNG header validation and the pixel decoder seam.
//!
//! The worker validates the PNG signature and reads the IHDR
//! dimensions itself so it can enforce the pixel bound before any
//! decoding happens. Full PNG-to-RGBA decoding is an external
//! collaborator: implement [`PngDecoder`] and install it with
//! [`RmiClient::with_decoder`].
//!
//! [`RmiClient::with_decoder`]: crate::RmiClient::with_decoder

/// The 8-byte PNG file signature.
pub const PNG_SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a];

/// Decoded pixel count bound for published screencaps.
pub const MAX_SCREENCAP_PIXELS: u64 = 4096 * 4096;

/// An RGBA image produced by a [`PngDecoder`].
#[derive(Debug, Clone)]
pub struct DecodedImage {
    /// Tightly packed RGBA, 4 bytes per pixel.
    pub pixels: Vec<u8>,
    pub width: i32,
    pub height: i32,
}

/// External PNG-to-RGBA decoder.
pub trait PngDecoder: Send + Sync {
    fn decode_rgba(&self, png: &[u8]) -> Result<DecodedImage, String>;
}

/// Whether the payload carries the PNG signature.
pub fn has_png_signature(data: &[u8]) -> bool {
    data.len() >= PNG_SIGNATURE.len() && data[..PNG_SIGNATURE.len()] == PNG_SIGNATURE
}

/// Read the image dimensions from the IHDR chunk.
///
/// IHDR is required to be the first chunk, so width and height sit at
/// fixed offsets (16 and 20, big-endian) right after the signature and
/// the chunk length/type words.
pub fn png_dimensions(data: &[u8]) -> Result<(i32, i32), String> {
    if !has_png_signature(data) {
        return Err("not a PNG".to_string());
    }
    if data.len() < 24 || &data[12..16] != b"IHDR" {
        return Err("failed to parse PNG header".to_string());
    }
    let width = u32::from_be_bytes(data[16..20].try_into().unwrap());
    let height = u32::from_be_bytes(data[20..24].try_into().unwrap());
    if width == 0 || height == 0 || width > i32::MAX as u32 || height > i32::MAX as u32 {
        return Err("invalid PNG dimensions".to_string());
    }
    Ok((width as i32, height as i32))
}

// ── Tests ─────────────────────────────────────────────────────────
