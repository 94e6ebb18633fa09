//! Offscreen render target
//!
//! The intermediate RGBA surface every decoded frame is redrawn onto before
//! capture. The redraw is where scaling happens, so the surface always holds
//! upright pixels at the target dimensions regardless of what the source
//! declared. The surface is exclusively owned by the pipeline; nothing else
//! reads it.

/// Offscreen RGBA pixel surface at the target dimensions
pub struct RenderTarget {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
    frames_drawn: u64,
    has_content: bool,
}

impl RenderTarget {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixels: vec![0u8; (width * height * 4) as usize],
            frames_drawn: 0,
            has_content: false,
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn frames_drawn(&self) -> u64 {
        self.frames_drawn
    }

    /// Whether the surface has received at least one non-empty frame
    pub fn has_content(&self) -> bool {
        self.has_content
    }

    /// Redraw the surface from a source RGBA frame, scaling to fit
    pub fn draw_frame(&mut self, src: &[u8], src_width: u32, src_height: u32) {
        if src_width == self.width && src_height == self.height {
            let len = self.pixels.len().min(src.len());
            self.pixels[..len].copy_from_slice(&src[..len]);
        } else {
            self.scale_into(src, src_width, src_height);
        }

        self.frames_drawn += 1;
        if !self.has_content {
            self.has_content = frame_has_content(&self.pixels);
        }
    }

    /// Nearest-neighbor scale of the source frame onto the surface
    fn scale_into(&mut self, src: &[u8], src_width: u32, src_height: u32) {
        for dy in 0..self.height {
            let src_y = (dy as u64 * src_height as u64 / self.height as u64) as u32;
            let src_y = src_y.min(src_height.saturating_sub(1));

            for dx in 0..self.width {
                let src_x = (dx as u64 * src_width as u64 / self.width as u64) as u32;
                let src_x = src_x.min(src_width.saturating_sub(1));

                let src_idx = ((src_y * src_width + src_x) * 4) as usize;
                let dst_idx = ((dy * self.width + dx) * 4) as usize;

                if src_idx + 3 >= src.len() {
                    continue;
                }

                self.pixels[dst_idx] = src[src_idx];
                self.pixels[dst_idx + 1] = src[src_idx + 1];
                self.pixels[dst_idx + 2] = src[src_idx + 2];
                self.pixels[dst_idx + 3] = 255;
            }
        }
    }
}

/// A frame counts as non-empty when any color channel carries signal
fn frame_has_content(pixels: &[u8]) -> bool {
    pixels
        .chunks_exact(4)
        .any(|px| px[0] != 0 || px[1] != 0 || px[2] != 0)
}

/// Compute target dimensions from the upright source dimensions
///
/// When a cap is given, the longer edge is limited to it while preserving
/// aspect ratio. Both dimensions are rounded down to even values for the
/// encoder's chroma subsampling.
pub fn target_dimensions(src_width: u32, src_height: u32, max_dimension: Option<u32>) -> (u32, u32) {
    let (mut width, mut height) = (src_width.max(2), src_height.max(2));

    if let Some(cap) = max_dimension {
        if width > cap || height > cap {
            if width >= height {
                height = (height as u64 * cap as u64 / width as u64) as u32;
                width = cap;
            } else {
                width = (width as u64 * cap as u64 / height as u64) as u32;
                height = cap;
            }
            tracing::info!(
                src_width,
                src_height,
                width,
                height,
                "Downscaling for constrained host"
            );
        }
    }

    (even(width), even(height))
}

fn even(value: u32) -> u32 {
    (value & !1).max(2)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_cap_keeps_native_dimensions() {
        assert_eq!(target_dimensions(1920, 1080, None), (1920, 1080));
        assert_eq!(target_dimensions(640, 480, None), (640, 480));
    }

    #[test]
    fn test_cap_preserves_aspect_ratio() {
        let (w, h) = target_dimensions(3840, 2160, Some(1280));
        assert_eq!((w, h), (1280, 720));

        // Portrait sources cap the height
        let (w, h) = target_dimensions(1080, 1920, Some(1280));
        assert_eq!((w, h), (720, 1280));
    }

    #[test]
    fn test_cap_not_applied_to_small_sources() {
        assert_eq!(target_dimensions(640, 480, Some(1280)), (640, 480));
    }

    #[test]
    fn test_dimensions_are_even() {
        let (w, h) = target_dimensions(1281, 721, None);
        assert_eq!(w % 2, 0);
        assert_eq!(h % 2, 0);

        let (w, h) = target_dimensions(1365, 767, Some(1280));
        assert_eq!(w % 2, 0);
        assert_eq!(h % 2, 0);
        assert!(w <= 1280 && h <= 1280);
    }

    #[test]
    fn test_draw_same_size_copies() {
        let mut surface = RenderTarget::new(2, 2);
        let frame = [10u8; 16];
        surface.draw_frame(&frame, 2, 2);
        assert_eq!(surface.pixels()[0], 10);
        assert_eq!(surface.frames_drawn(), 1);
        assert!(surface.has_content());
    }

    #[test]
    fn test_draw_scales_down() {
        let mut surface = RenderTarget::new(2, 2);
        // 4x4 source, uniform gray
        let frame = vec![128u8; 4 * 4 * 4];
        surface.draw_frame(&frame, 4, 4);
        assert!(surface.pixels().chunks_exact(4).all(|px| px[0] == 128));
        // Alpha forced opaque
        assert!(surface.pixels().chunks_exact(4).all(|px| px[3] == 255));
    }

    #[test]
    fn test_black_frames_are_empty() {
        let mut surface = RenderTarget::new(2, 2);
        // All-black RGBA with opaque alpha must not count as content
        let black: Vec<u8> = [0u8, 0, 0, 255].repeat(4);
        surface.draw_frame(&black, 2, 2);
        assert!(!surface.has_content());
        assert_eq!(surface.frames_drawn(), 1);

        let lit: Vec<u8> = [0u8, 7, 0, 255].repeat(4);
        surface.draw_frame(&lit, 2, 2);
        assert!(surface.has_content());
    }
}
