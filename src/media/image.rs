//! PNG helpers

use super::frame::VideoFrame;
use std::io::Cursor;
use thiserror::Error;

const PNG_SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

#[derive(Error, Debug, Clone)]
pub enum ImageDecodeError {
    #[error("PNG decode error: {0}")]
    Png(String),

    #[error("Unsupported PNG color type: {0}")]
    UnsupportedColor(String),
}

pub fn is_png(bytes: &[u8]) -> bool {
    bytes.starts_with(&PNG_SIGNATURE)
}

/// Decode a PNG into an RGBA frame
pub fn decode_png(bytes: &[u8]) -> Result<VideoFrame, ImageDecodeError> {
    let mut decoder = png::Decoder::new(Cursor::new(bytes));
    // Palette and low bit depths expand to 8-bit channels
    decoder.set_transformations(png::Transformations::EXPAND | png::Transformations::STRIP_16);
    let mut reader = decoder
        .read_info()
        .map_err(|e| ImageDecodeError::Png(e.to_string()))?;

    let mut buf = vec![0; reader.output_buffer_size()];
    let info = reader
        .next_frame(&mut buf)
        .map_err(|e| ImageDecodeError::Png(e.to_string()))?;
    let raw = &buf[..info.buffer_size()];

    let data = match info.color_type {
        png::ColorType::Rgba => raw.to_vec(),
        png::ColorType::Rgb => {
            let mut rgba = Vec::with_capacity(raw.len() / 3 * 4);
            for chunk in raw.chunks_exact(3) {
                rgba.extend_from_slice(chunk);
                rgba.push(255);
            }
            rgba
        }
        png::ColorType::Grayscale => raw.iter().flat_map(|&v| [v, v, v, 255]).collect(),
        png::ColorType::GrayscaleAlpha => raw
            .chunks_exact(2)
            .flat_map(|ga| [ga[0], ga[0], ga[0], ga[1]])
            .collect(),
        other => return Err(ImageDecodeError::UnsupportedColor(format!("{:?}", other))),
    };

    VideoFrame::from_rgba(info.width, info.height, data).map_err(|e| ImageDecodeError::Png(e.to_string()))
}

/// Encode an RGBA frame as PNG
pub fn encode_png(frame: &VideoFrame) -> Result<Vec<u8>, ImageDecodeError> {
    let mut out = Vec::new();
    {
        let mut encoder = png::Encoder::new(&mut out, frame.width(), frame.height());
        encoder.set_color(png::ColorType::Rgba);
        encoder.set_depth(png::BitDepth::Eight);
        let mut writer = encoder
            .write_header()
            .map_err(|e| ImageDecodeError::Png(e.to_string()))?;
        writer
            .write_image_data(frame.data())
            .map_err(|e| ImageDecodeError::Png(e.to_string()))?;
    }
    Ok(out)
}
