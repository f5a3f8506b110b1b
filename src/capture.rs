//! Screen sampling and region capture.
//!
//! The raw pixel grab is a capability behind [`ScreenSource`]; the xcap
//! backend is the production implementation. [`PixelSampler`] and
//! [`RegionCapture`] translate window-relative coordinates through a
//! [`WindowAnchor`] before touching the screen.

use crate::types::{CaptureError, CapturePoint, Point, Rgb, WindowAnchor};
use image::{DynamicImage, ImageFormat, Rgb as Pixel, RgbImage};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, trace};

/// Side of the square patch written by [`RegionCapture::save_point_patch`]
const POINT_PATCH_SIZE: i32 = 10;

/// Half-length of a cross-hair arm in debug dumps
const CROSS_ARM: i32 = 5;

/// Screen-capture capability: read pixels at absolute screen coordinates
pub trait ScreenSource: Send + Sync {
    /// RGB of the pixel at an absolute screen coordinate
    fn grab_pixel(&self, x: i32, y: i32) -> Result<Rgb, CaptureError> {
        let image = self.grab_region(x, y, 1, 1)?;
        let px = image
            .get_pixel_checked(0, 0)
            .ok_or(CaptureError::OutOfBounds { x, y })?;
        Ok(Rgb::from(px.0))
    }

    /// Image of an absolute screen rectangle
    fn grab_region(
        &self,
        x: i32,
        y: i32,
        width: u32,
        height: u32,
    ) -> Result<RgbImage, CaptureError>;
}

/// xcap-backed screen source
pub struct XcapScreen;

impl XcapScreen {
    pub fn new() -> Self {
        Self
    }
}

impl Default for XcapScreen {
    fn default() -> Self {
        Self::new()
    }
}

impl ScreenSource for XcapScreen {
    fn grab_region(
        &self,
        x: i32,
        y: i32,
        width: u32,
        height: u32,
    ) -> Result<RgbImage, CaptureError> {
        let monitor =
            xcap::Monitor::from_point(x, y).map_err(|_| CaptureError::OutOfBounds { x, y })?;

        let origin_x = monitor
            .x()
            .map_err(|e| CaptureError::Backend(format!("monitor origin: {e}")))?;
        let origin_y = monitor
            .y()
            .map_err(|e| CaptureError::Backend(format!("monitor origin: {e}")))?;

        // from_point guarantees the point lies on this monitor
        let local_x = u32::try_from(x - origin_x).map_err(|_| CaptureError::OutOfBounds { x, y })?;
        let local_y = u32::try_from(y - origin_y).map_err(|_| CaptureError::OutOfBounds { x, y })?;

        let image = monitor
            .capture_region(local_x, local_y, width, height)
            .map_err(|e| CaptureError::Backend(e.to_string()))?;

        Ok(DynamicImage::ImageRgba8(image).to_rgb8())
    }
}

/// Reads single pixels relative to the monitored window
#[derive(Clone)]
pub struct PixelSampler {
    source: Arc<dyn ScreenSource>,
}

impl PixelSampler {
    pub fn new(source: Arc<dyn ScreenSource>) -> Self {
        Self { source }
    }

    /// Current colour at `anchor + point`
    pub fn sample(&self, anchor: WindowAnchor, point: Point) -> Result<Rgb, CaptureError> {
        let abs = anchor.absolute(point).ok_or(CaptureError::OutOfBounds {
            x: point.x,
            y: point.y,
        })?;
        let rgb = self.source.grab_pixel(abs.x, abs.y)?;
        trace!("Sampled ({}, {}) -> {}", abs.x, abs.y, rgb);
        Ok(rgb)
    }
}

/// Captures window-relative rectangles for signal images and debug dumps
#[derive(Clone)]
pub struct RegionCapture {
    source: Arc<dyn ScreenSource>,
}

impl RegionCapture {
    pub fn new(source: Arc<dyn ScreenSource>) -> Self {
        Self { source }
    }

    /// Capture a region into memory.
    ///
    /// Non-positive sizes fail with `InvalidRegion` before the screen is touched.
    pub fn capture_region(
        &self,
        anchor: WindowAnchor,
        region: &CapturePoint,
    ) -> Result<RgbImage, CaptureError> {
        if !region.is_valid() {
            return Err(CaptureError::InvalidRegion {
                width: region.w,
                height: region.h,
            });
        }

        let origin = anchor
            .absolute(Point::new(region.x, region.y))
            .ok_or(CaptureError::OutOfBounds {
                x: region.x,
                y: region.y,
            })?;

        let start = std::time::Instant::now();
        let image = self
            .source
            .grab_region(origin.x, origin.y, region.w as u32, region.h as u32)?;
        trace!(
            "Captured {}x{} at ({}, {}) in {:?}",
            region.w,
            region.h,
            origin.x,
            origin.y,
            start.elapsed()
        );

        Ok(image)
    }

    /// Capture a region and encode it as PNG, for attaching to a signal
    pub fn capture_png(
        &self,
        anchor: WindowAnchor,
        region: &CapturePoint,
    ) -> Result<Vec<u8>, CaptureError> {
        let image = self.capture_region(anchor, region)?;
        encode_png(image)
    }

    /// Capture a region, mark the given window-relative points with
    /// cross-hairs, and write it to `path`
    pub fn save_region(
        &self,
        anchor: WindowAnchor,
        region: &CapturePoint,
        markers: &[Point],
        path: &Path,
    ) -> Result<PathBuf, CaptureError> {
        let mut image = self.capture_region(anchor, region)?;

        for marker in markers {
            draw_cross(&mut image, region.local(*marker), Pixel([0, 0, 0]));
        }

        write_image(&image, path)?;
        info!("Saved region capture with {} markers to {:?}", markers.len(), path);
        Ok(path.to_path_buf())
    }

    /// Write a small patch centred on a window-relative point
    pub fn save_point_patch(
        &self,
        anchor: WindowAnchor,
        point: Point,
        path: &Path,
    ) -> Result<PathBuf, CaptureError> {
        let half = POINT_PATCH_SIZE / 2;
        let region = CapturePoint::new(
            point.x - half,
            point.y - half,
            POINT_PATCH_SIZE,
            POINT_PATCH_SIZE,
        );
        let image = self.capture_region(anchor, &region)?;
        write_image(&image, path)?;
        debug!("Saved point patch around ({}, {}) to {:?}", point.x, point.y, path);
        Ok(path.to_path_buf())
    }
}

/// Encode an image as PNG bytes
pub fn encode_png(image: RgbImage) -> Result<Vec<u8>, CaptureError> {
    let mut buf = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(image)
        .write_to(&mut buf, ImageFormat::Png)
        .map_err(|e| CaptureError::Encode(e.to_string()))?;
    Ok(buf.into_inner())
}

fn write_image(image: &RgbImage, path: &Path) -> Result<(), CaptureError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    image
        .save_with_format(path, ImageFormat::Png)
        .map_err(|e| CaptureError::Encode(e.to_string()))
}

/// Draw a `+` (arms of CROSS_ARM px, 2 px thick) centred on `center`.
/// Parts falling outside the image are clipped.
pub fn draw_cross(image: &mut RgbImage, center: Point, color: Pixel<u8>) {
    let mut put = |x: i32, y: i32| {
        if x >= 0 && y >= 0 && (x as u32) < image.width() && (y as u32) < image.height() {
            image.put_pixel(x as u32, y as u32, color);
        }
    };

    for d in -CROSS_ARM..=CROSS_ARM {
        for t in 0..2 {
            put(center.x + d, center.y + t);
            put(center.x + t, center.y + d);
        }
    }
}
