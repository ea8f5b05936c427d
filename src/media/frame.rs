//! RGBA video frames and the raster operations the compositor draws with

use thiserror::Error;

/// Frame construction errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("Frame buffer is {actual} bytes, expected {expected} for {width}x{height} RGBA")]
    SizeMismatch {
        width: u32,
        height: u32,
        expected: usize,
        actual: usize,
    },
}

/// A single RGBA8 frame, row-major, no padding
#[derive(Clone, PartialEq, Eq)]
pub struct VideoFrame {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl std::fmt::Debug for VideoFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VideoFrame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.data.len())
            .finish()
    }
}

impl VideoFrame {
    /// Create a fully transparent frame
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            data: vec![0; width as usize * height as usize * 4],
        }
    }

    /// Create a frame filled with one color
    pub fn solid(width: u32, height: u32, rgba: [u8; 4]) -> Self {
        let mut frame = Self::new(width, height);
        frame.fill(rgba);
        frame
    }

    /// Wrap an existing RGBA buffer
    pub fn from_rgba(width: u32, height: u32, data: Vec<u8>) -> Result<Self, FrameError> {
        let expected = width as usize * height as usize * 4;
        if data.len() != expected {
            return Err(FrameError::SizeMismatch {
                width,
                height,
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn into_raw(self) -> Vec<u8> {
        self.data
    }

    /// A frame with no pixels cannot be drawn
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let idx = (y as usize * self.width as usize + x as usize) * 4;
        Some([
            self.data[idx],
            self.data[idx + 1],
            self.data[idx + 2],
            self.data[idx + 3],
        ])
    }

    /// Reset every pixel to transparent black
    pub fn clear(&mut self) {
        self.data.fill(0);
    }

    pub fn fill(&mut self, rgba: [u8; 4]) {
        for px in self.data.chunks_exact_mut(4) {
            px.copy_from_slice(&rgba);
        }
    }

    /// Draw `src` stretched over the whole frame (nearest neighbour) at the
    /// given opacity, alpha-blending onto what is already there.
    pub fn draw_scaled(&mut self, src: &VideoFrame, opacity: f32) {
        if src.is_empty() || self.is_empty() {
            return;
        }

        let alpha_scale = (opacity.clamp(0.0, 1.0) * 255.0).round() as u32;
        if alpha_scale == 0 {
            return;
        }

        let dst_w = self.width as usize;
        let dst_h = self.height as usize;
        let src_w = src.width as usize;
        let src_h = src.height as usize;

        // Column lookup is the same for every row
        let src_cols: Vec<usize> = (0..dst_w).map(|dx| (dx * src_w / dst_w).min(src_w - 1)).collect();

        for dy in 0..dst_h {
            let sy = (dy * src_h / dst_h).min(src_h - 1);
            let src_row = sy * src_w * 4;
            let dst_row = dy * dst_w * 4;

            for (dx, &sx) in src_cols.iter().enumerate() {
                let s = src_row + sx * 4;
                let d = dst_row + dx * 4;
                let a = alpha_scale * src.data[s + 3] as u32 / 255;

                if a == 255 {
                    self.data[d..d + 4].copy_from_slice(&src.data[s..s + 4]);
                    continue;
                }
                if a == 0 {
                    continue;
                }

                let inv = 255 - a;
                for c in 0..3 {
                    let blended = src.data[s + c] as u32 * a + self.data[d + c] as u32 * inv;
                    self.data[d + c] = ((blended + 127) / 255) as u8;
                }
                let dst_a = self.data[d + 3] as u32;
                self.data[d + 3] = (a + (dst_a * inv + 127) / 255).min(255) as u8;
            }
        }
    }

    /// Return a copy resampled to the given size
    pub fn scaled(&self, width: u32, height: u32) -> VideoFrame {
        if self.width == width && self.height == height {
            return self.clone();
        }
        let mut out = VideoFrame::new(width, height);
        out.draw_scaled(self, 1.0);
        out
    }

    /// Gaussian blur with standard deviation `sigma` pixels.
    ///
    /// Approximated with three successive box blurs. Radii wider than the
    /// frame are capped to it, so the cost stays bounded by the frame size.
    pub fn gaussian_blur(&mut self, sigma: f32) {
        if sigma <= 0.0 || self.is_empty() {
            return;
        }

        let w = self.width as usize;
        let h = self.height as usize;
        let mut scratch = vec![0u8; self.data.len()];

        for size in box_sizes_for_gaussian(sigma, 3) {
            let radius = ((size - 1) / 2).min(w.max(h));
            if radius == 0 {
                continue;
            }
            box_blur_horizontal(&self.data, &mut scratch, w, h, radius);
            box_blur_vertical(&scratch, &mut self.data, w, h, radius);
        }
    }
}

/// Box widths whose repeated application approximates a Gaussian
fn box_sizes_for_gaussian(sigma: f32, passes: usize) -> Vec<usize> {
    let n = passes as f32;
    let ideal = ((12.0 * sigma * sigma / n) + 1.0).sqrt();
    let mut lower = ideal.floor() as i64;
    if lower % 2 == 0 {
        lower -= 1;
    }
    let lower = lower.max(1);
    let upper = lower + 2;

    let lf = lower as f32;
    let m_ideal = (12.0 * sigma * sigma - n * lf * lf - 4.0 * n * lf - 3.0 * n) / (-4.0 * lf - 4.0);
    let m = m_ideal.round().max(0.0) as usize;

    (0..passes)
        .map(|i| if i < m { lower as usize } else { upper as usize })
        .collect()
}

fn box_blur_horizontal(src: &[u8], dst: &mut [u8], w: usize, h: usize, radius: usize) {
    let window = 2 * radius as u64 + 1;
    let last = w as isize - 1;

    for y in 0..h {
        let row = y * w * 4;
        for c in 0..4 {
            let at = |x: isize| src[row + (x.clamp(0, last) as usize) * 4 + c] as u64;

            let mut acc: u64 = (-(radius as isize)..=radius as isize).map(at).sum();
            for x in 0..w as isize {
                dst[row + x as usize * 4 + c] = ((acc + window / 2) / window) as u8;
                acc += at(x + radius as isize + 1);
                acc -= at(x - radius as isize);
            }
        }
    }
}

fn box_blur_vertical(src: &[u8], dst: &mut [u8], w: usize, h: usize, radius: usize) {
    let window = 2 * radius as u64 + 1;
    let last = h as isize - 1;

    for x in 0..w {
        for c in 0..4 {
            let at = |y: isize| src[((y.clamp(0, last) as usize) * w + x) * 4 + c] as u64;

            let mut acc: u64 = (-(radius as isize)..=radius as isize).map(at).sum();
            for y in 0..h as isize {
                dst[(y as usize * w + x) * 4 + c] = ((acc + window / 2) / window) as u8;
                acc += at(y + radius as isize + 1);
                acc -= at(y - radius as isize);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_rgba_checks_size() {
        assert!(VideoFrame::from_rgba(2, 2, vec![0; 16]).is_ok());
        let err = VideoFrame::from_rgba(2, 2, vec![0; 15]).unwrap_err();
        assert!(matches!(err, FrameError::SizeMismatch { expected: 16, actual: 15, .. }));
    }

    #[test]
    fn test_draw_scaled_full_opacity_copies() {
        let src = VideoFrame::solid(2, 2, [10, 20, 30, 255]);
        let mut dst = VideoFrame::new(4, 4);
        dst.draw_scaled(&src, 1.0);
        assert_eq!(dst.pixel(3, 3), Some([10, 20, 30, 255]));
        assert_eq!(dst.pixel(0, 0), Some([10, 20, 30, 255]));
    }

    #[test]
    fn test_draw_scaled_nearest_neighbour_keeps_quadrants() {
        // Left column red, right column blue
        let src = VideoFrame::from_rgba(
            2,
            1,
            vec![255, 0, 0, 255, 0, 0, 255, 255],
        )
        .unwrap();
        let mut dst = VideoFrame::new(4, 2);
        dst.draw_scaled(&src, 1.0);
        assert_eq!(dst.pixel(1, 1), Some([255, 0, 0, 255]));
        assert_eq!(dst.pixel(2, 0), Some([0, 0, 255, 255]));
    }

    #[test]
    fn test_draw_scaled_partial_opacity_blends() {
        let mut dst = VideoFrame::solid(1, 1, [255, 0, 0, 255]);
        let src = VideoFrame::solid(1, 1, [0, 0, 255, 255]);
        dst.draw_scaled(&src, 0.8);
        let [r, g, b, a] = dst.pixel(0, 0).unwrap();
        // 80% blue over red
        assert!((50..=52).contains(&r), "r = {r}");
        assert_eq!(g, 0);
        assert!((203..=205).contains(&b), "b = {b}");
        assert_eq!(a, 255);
    }

    #[test]
    fn test_blur_preserves_uniform_frame() {
        let mut frame = VideoFrame::solid(16, 8, [100, 150, 200, 255]);
        frame.gaussian_blur(4.0);
        assert_eq!(frame.pixel(8, 4), Some([100, 150, 200, 255]));
        assert_eq!(frame.pixel(0, 0), Some([100, 150, 200, 255]));
    }

    #[test]
    fn test_blur_spreads_a_bright_pixel() {
        let mut frame = VideoFrame::solid(21, 21, [0, 0, 0, 255]);
        let centre = (10 * 21 + 10) * 4;
        frame.data[centre] = 255;

        frame.gaussian_blur(2.0);

        let centre_r = frame.pixel(10, 10).unwrap()[0];
        let near_r = frame.pixel(11, 10).unwrap()[0];
        let far_r = frame.pixel(20, 10).unwrap()[0];
        assert!(centre_r < 255);
        assert!(near_r > 0);
        assert!(centre_r >= near_r);
        assert_eq!(far_r, 0);
    }

    #[test]
    fn test_blur_radius_wider_than_frame() {
        let mut frame = VideoFrame::solid(8, 6, [255, 255, 255, 255]);
        frame.gaussian_blur(9_000_000.0);
        assert_eq!(frame.pixel(0, 0), Some([255, 255, 255, 255]));
        assert_eq!(frame.pixel(7, 5), Some([255, 255, 255, 255]));
    }

    #[test]
    fn test_blur_zero_sigma_is_noop() {
        let original = VideoFrame::from_rgba(1, 2, vec![1, 2, 3, 4, 5, 6, 7, 8]).unwrap();
        let mut frame = original.clone();
        frame.gaussian_blur(0.0);
        assert_eq!(frame, original);
    }

    #[test]
    fn test_box_sizes_are_odd() {
        for sigma in [1.0, 2.5, 10.0, 25.0] {
            for size in box_sizes_for_gaussian(sigma, 3) {
                assert_eq!(size % 2, 1, "sigma {sigma} gave even box {size}");
            }
        }
    }
}
