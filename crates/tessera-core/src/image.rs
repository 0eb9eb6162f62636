//! Image storage pool with grid-cell rasterization.
//!
//! Images uploaded by applications are stored once and shared: cells hold
//! [`ImageFragment`]s that reference a [`RasterizedImage`], which in turn
//! references the [`Image`]. Lifetime is purely reference-counted — when the
//! last fragment, named link, and rasterization drop, the image's backing
//! data is freed and the pool's `on_remove` callback fires so GPU-side
//! caches can release their tiles.
//!
//! Rasterization is lazy: a [`RasterizedImage`] binds an image to a cell
//! span/size and policy set, and `fragment()` computes the RGBA bytes of a
//! single cell on demand.

use std::fmt;
use std::io::Cursor;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use tessera_support::LruCache;

/// Capacity of the name → image link cache.
const NAME_LINK_CAPACITY: usize = 100;

/// Pixel encoding of uploaded image data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImageFormat {
    /// Packed 24-bit RGB.
    Rgb,
    /// Packed 32-bit RGBA.
    Rgba,
    /// PNG container bytes; decoded to RGBA at rasterization time.
    Png,
}

/// Unique numeric image identifier, monotonic per pool.
pub type ImageId = u32;

/// Width/height in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PixelSize {
    pub width: u32,
    pub height: u32,
}

impl PixelSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn area(&self) -> usize {
        self.width as usize * self.height as usize
    }
}

/// Width/height in grid cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CellSpan {
    pub cols: u16,
    pub rows: u16,
}

impl CellSpan {
    pub fn new(cols: u16, rows: u16) -> Self {
        Self { cols, rows }
    }
}

/// RGBA color used to pad fragments outside the image area.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Rgba {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Rgba {
    pub const TRANSPARENT: Self = Self {
        r: 0,
        g: 0,
        b: 0,
        a: 0,
    };
}

/// How the image is scaled into its cell span.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ResizePolicy {
    /// Use original pixels, clipped to the span.
    NoResize,
    /// Scale preserving aspect ratio so the image fits inside the span.
    #[default]
    ResizeToFit,
    /// Scale preserving aspect ratio so the image covers the span.
    ResizeToFill,
    /// Scale each axis independently to exactly the span.
    StretchToFill,
}

/// Where the scaled image sits inside its cell span (nine-grid).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AlignmentPolicy {
    TopStart,
    TopCenter,
    TopEnd,
    MiddleStart,
    #[default]
    MiddleCenter,
    MiddleEnd,
    BottomStart,
    BottomCenter,
    BottomEnd,
}

/// Errors surfaced by image creation and rasterization.
#[derive(Debug, thiserror::Error)]
pub enum ImageError {
    #[error("image dimensions {width}x{height} exceed the {max_width}x{max_height} cap")]
    TooLarge {
        width: u32,
        height: u32,
        max_width: u32,
        max_height: u32,
    },
    #[error("image data length {actual} does not match {expected} for the declared size")]
    DataSizeMismatch { expected: usize, actual: usize },
    #[error("png decode failed: {0}")]
    PngDecode(String),
}

/// Live-instance counters for diagnostics, owned by the pool.
#[derive(Debug, Default)]
pub struct ImageStats {
    instances: AtomicU32,
    rasterized: AtomicU32,
    fragments: AtomicU32,
}

impl ImageStats {
    pub fn instances(&self) -> u32 {
        self.instances.load(Ordering::Relaxed)
    }

    pub fn rasterized(&self) -> u32 {
        self.rasterized.load(Ordering::Relaxed)
    }

    pub fn fragments(&self) -> u32 {
        self.fragments.load(Ordering::Relaxed)
    }
}

impl fmt::Display for ImageStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} instances, {} rasterized, {} fragments",
            self.instances(),
            self.rasterized(),
            self.fragments()
        )
    }
}

/// Callback invoked when an image's last handle drops (GPU caches release
/// their tiles keyed by [`ImageId`]).
pub type OnRemove = Arc<dyn Fn(ImageId) + Send + Sync>;

/// An uploaded image: raw bytes plus pixel metadata.
///
/// Shared via `Arc`; dropping the last handle fires the pool's `on_remove`
/// callback (GPU caches key their tiles by [`ImageId`]).
pub struct Image {
    id: ImageId,
    format: ImageFormat,
    data: Vec<u8>,
    size: PixelSize,
    stats: Arc<ImageStats>,
    on_remove: OnRemove,
}

impl fmt::Debug for Image {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Image")
            .field("id", &self.id)
            .field("format", &self.format)
            .field("size", &self.size)
            .field("data_len", &self.data.len())
            .finish()
    }
}

impl Image {
    pub fn id(&self) -> ImageId {
        self.id
    }

    pub fn format(&self) -> ImageFormat {
        self.format
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn size(&self) -> PixelSize {
        self.size
    }

    /// The image's pixels as packed RGBA rows.
    ///
    /// RGB is expanded, PNG is decoded. Returns the pixel size actually
    /// decoded (PNG headers win over the declared size).
    pub fn to_rgba(&self) -> Result<(Vec<u8>, PixelSize), ImageError> {
        match self.format {
            ImageFormat::Rgba => Ok((self.data.clone(), self.size)),
            ImageFormat::Rgb => {
                let mut rgba = Vec::with_capacity(self.size.area() * 4);
                for px in self.data.chunks_exact(3) {
                    rgba.extend_from_slice(&[px[0], px[1], px[2], 0xFF]);
                }
                Ok((rgba, self.size))
            }
            ImageFormat::Png => decode_png(&self.data),
        }
    }
}

impl Drop for Image {
    fn drop(&mut self) {
        self.stats.instances.fetch_sub(1, Ordering::Relaxed);
        (self.on_remove)(self.id);
    }
}

fn decode_png(data: &[u8]) -> Result<(Vec<u8>, PixelSize), ImageError> {
    let decoder = png::Decoder::new(Cursor::new(data));
    let mut reader = decoder
        .read_info()
        .map_err(|e| ImageError::PngDecode(e.to_string()))?;
    let mut buf = vec![0; reader.output_buffer_size()];
    let info = reader
        .next_frame(&mut buf)
        .map_err(|e| ImageError::PngDecode(e.to_string()))?;
    buf.truncate(info.buffer_size());
    let size = PixelSize::new(info.width, info.height);

    let rgba = match info.color_type {
        png::ColorType::Rgba => buf,
        png::ColorType::Rgb => {
            let mut out = Vec::with_capacity(size.area() * 4);
            for px in buf.chunks_exact(3) {
                out.extend_from_slice(&[px[0], px[1], px[2], 0xFF]);
            }
            out
        }
        png::ColorType::Grayscale => {
            let mut out = Vec::with_capacity(size.area() * 4);
            for &g in &buf {
                out.extend_from_slice(&[g, g, g, 0xFF]);
            }
            out
        }
        png::ColorType::GrayscaleAlpha => {
            let mut out = Vec::with_capacity(size.area() * 4);
            for px in buf.chunks_exact(2) {
                out.extend_from_slice(&[px[0], px[0], px[0], px[1]]);
            }
            out
        }
        other => {
            return Err(ImageError::PngDecode(format!(
                "unsupported color type {other:?}"
            )));
        }
    };
    Ok((rgba, size))
}

/// An [`Image`] bound to a cell raster: span, per-cell pixel size,
/// alignment/resize policies, and a pad color.
///
/// Pixel expansion happens per cell in [`RasterizedImage::fragment`]; the
/// binding itself stores no pixels beyond the shared source image.
pub struct RasterizedImage {
    image: Arc<Image>,
    alignment: AlignmentPolicy,
    resize: ResizePolicy,
    default_color: Rgba,
    cell_span: CellSpan,
    cell_size: PixelSize,
    stats: Arc<ImageStats>,
}

impl fmt::Debug for RasterizedImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RasterizedImage")
            .field("image", &self.image.id())
            .field("cell_span", &self.cell_span)
            .field("cell_size", &self.cell_size)
            .field("resize", &self.resize)
            .field("alignment", &self.alignment)
            .finish()
    }
}

impl Drop for RasterizedImage {
    fn drop(&mut self) {
        self.stats.rasterized.fetch_sub(1, Ordering::Relaxed);
    }
}

impl RasterizedImage {
    pub fn image(&self) -> &Arc<Image> {
        &self.image
    }

    pub fn cell_span(&self) -> CellSpan {
        self.cell_span
    }

    pub fn cell_size(&self) -> PixelSize {
        self.cell_size
    }

    /// Total pixel area covered by the cell span.
    fn span_pixels(&self) -> PixelSize {
        PixelSize::new(
            self.cell_span.cols as u32 * self.cell_size.width,
            self.cell_span.rows as u32 * self.cell_size.height,
        )
    }

    /// Target rectangle of the scaled image inside the span, as
    /// `(x_offset, y_offset, width, height)`.
    fn target_rect(&self, source: PixelSize) -> (i64, i64, u32, u32) {
        let span = self.span_pixels();
        let (tw, th) = match self.resize {
            ResizePolicy::NoResize => (source.width, source.height),
            ResizePolicy::StretchToFill => (span.width, span.height),
            ResizePolicy::ResizeToFit | ResizePolicy::ResizeToFill => {
                if source.width == 0 || source.height == 0 {
                    (0, 0)
                } else {
                    let sx = span.width as f64 / source.width as f64;
                    let sy = span.height as f64 / source.height as f64;
                    let scale = if self.resize == ResizePolicy::ResizeToFit {
                        sx.min(sy)
                    } else {
                        sx.max(sy)
                    };
                    (
                        (source.width as f64 * scale).round().max(1.0) as u32,
                        (source.height as f64 * scale).round().max(1.0) as u32,
                    )
                }
            }
        };

        let x = match self.alignment {
            AlignmentPolicy::TopStart
            | AlignmentPolicy::MiddleStart
            | AlignmentPolicy::BottomStart => 0,
            AlignmentPolicy::TopCenter
            | AlignmentPolicy::MiddleCenter
            | AlignmentPolicy::BottomCenter => (span.width as i64 - tw as i64) / 2,
            AlignmentPolicy::TopEnd | AlignmentPolicy::MiddleEnd | AlignmentPolicy::BottomEnd => {
                span.width as i64 - tw as i64
            }
        };
        let y = match self.alignment {
            AlignmentPolicy::TopStart | AlignmentPolicy::TopCenter | AlignmentPolicy::TopEnd => 0,
            AlignmentPolicy::MiddleStart
            | AlignmentPolicy::MiddleCenter
            | AlignmentPolicy::MiddleEnd => (span.height as i64 - th as i64) / 2,
            AlignmentPolicy::BottomStart
            | AlignmentPolicy::BottomCenter
            | AlignmentPolicy::BottomEnd => span.height as i64 - th as i64,
        };
        (x, y, tw, th)
    }

    /// RGBA bytes for the cell at `(col, row)` within the span.
    ///
    /// Out-of-image pixels are filled with the default color. A decode
    /// failure produces a fully padded fragment (and a log record at the
    /// placement site).
    pub fn fragment(&self, col: u16, row: u16) -> Vec<u8> {
        let cw = self.cell_size.width as usize;
        let ch = self.cell_size.height as usize;
        let mut out = Vec::with_capacity(cw * ch * 4);

        let decoded = self.image.to_rgba();
        let (pixels, source) = match &decoded {
            Ok((pixels, size)) => (pixels.as_slice(), *size),
            Err(_) => (&[][..], PixelSize::default()),
        };

        let (tx, ty, tw, th) = self.target_rect(source);

        let cell_x0 = col as i64 * cw as i64;
        let cell_y0 = row as i64 * ch as i64;
        let pad = self.default_color;

        for y in 0..ch as i64 {
            for x in 0..cw as i64 {
                // Position within the span, then within the target rect.
                let sx = cell_x0 + x - tx;
                let sy = cell_y0 + y - ty;
                let px = if sx < 0 || sy < 0 || sx >= tw as i64 || sy >= th as i64 || tw == 0 {
                    pad
                } else {
                    // Sample the source (nearest neighbour).
                    let ix = (sx as u64 * source.width as u64 / tw as u64) as usize;
                    let iy = (sy as u64 * source.height as u64 / th.max(1) as u64) as usize;
                    let idx = (iy * source.width as usize + ix) * 4;
                    if idx + 3 < pixels.len() {
                        Rgba {
                            r: pixels[idx],
                            g: pixels[idx + 1],
                            b: pixels[idx + 2],
                            a: pixels[idx + 3],
                        }
                    } else {
                        pad
                    }
                };
                out.extend_from_slice(&[px.r, px.g, px.b, px.a]);
            }
        }
        out
    }
}

/// A reference to one cell's worth of a rasterized image.
///
/// Two fragments compare equal iff their image id and offset agree.
#[derive(Debug)]
pub struct ImageFragment {
    rasterized: Arc<RasterizedImage>,
    col: u16,
    row: u16,
    stats: Arc<ImageStats>,
}

impl Clone for ImageFragment {
    fn clone(&self) -> Self {
        // Clones are live fragments too; keep the counter symmetric with Drop.
        self.stats.fragments.fetch_add(1, Ordering::Relaxed);
        Self {
            rasterized: self.rasterized.clone(),
            col: self.col,
            row: self.row,
            stats: self.stats.clone(),
        }
    }
}

impl ImageFragment {
    pub fn new(rasterized: Arc<RasterizedImage>, col: u16, row: u16) -> Self {
        let stats = rasterized.stats.clone();
        stats.fragments.fetch_add(1, Ordering::Relaxed);
        Self {
            rasterized,
            col,
            row,
            stats,
        }
    }

    pub fn rasterized(&self) -> &Arc<RasterizedImage> {
        &self.rasterized
    }

    pub fn image_id(&self) -> ImageId {
        self.rasterized.image.id()
    }

    /// Offset within the rasterized span as `(col, row)`.
    pub fn offset(&self) -> (u16, u16) {
        (self.col, self.row)
    }

    /// RGBA bytes for this fragment's cell.
    pub fn data(&self) -> Vec<u8> {
        self.rasterized.fragment(self.col, self.row)
    }
}

impl Drop for ImageFragment {
    fn drop(&mut self) {
        self.stats.fragments.fetch_sub(1, Ordering::Relaxed);
    }
}

impl PartialEq for ImageFragment {
    fn eq(&self, other: &Self) -> bool {
        self.image_id() == other.image_id() && self.offset() == other.offset()
    }
}

impl Eq for ImageFragment {}

/// Size caps for uploaded images.
#[derive(Debug, Clone, Copy)]
pub struct ImageLimits {
    pub max_width: u32,
    pub max_height: u32,
}

impl Default for ImageLimits {
    fn default() -> Self {
        Self {
            max_width: 10_000,
            max_height: 10_000,
        }
    }
}

/// High-level image storage pool.
///
/// Shared between the screen (producer) and the render sink (consumer);
/// the internal tables are mutex-protected, handles are `Arc`s.
pub struct ImagePool {
    next_id: AtomicU32,
    name_links: Mutex<LruCache<String, Arc<Image>>>,
    limits: ImageLimits,
    stats: Arc<ImageStats>,
    on_remove: OnRemove,
}

impl fmt::Debug for ImagePool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImagePool")
            .field("next_id", &self.next_id.load(Ordering::Relaxed))
            .field("stats", &self.stats)
            .finish()
    }
}

impl Default for ImagePool {
    fn default() -> Self {
        Self::new(ImageLimits::default(), Arc::new(|_| {}))
    }
}

impl ImagePool {
    pub fn new(limits: ImageLimits, on_remove: OnRemove) -> Self {
        Self {
            next_id: AtomicU32::new(1),
            name_links: Mutex::new(LruCache::new(NAME_LINK_CAPACITY)),
            limits,
            stats: Arc::new(ImageStats::default()),
            on_remove,
        }
    }

    pub fn stats(&self) -> &ImageStats {
        &self.stats
    }

    /// Store a new image, assigning the next monotonic id.
    ///
    /// Oversized or inconsistent uploads are rejected with a logged
    /// warning; nothing is placed.
    pub fn create(
        &self,
        format: ImageFormat,
        pixel_size: PixelSize,
        data: Vec<u8>,
    ) -> Result<Arc<Image>, ImageError> {
        if pixel_size.width > self.limits.max_width || pixel_size.height > self.limits.max_height {
            warn!(
                width = pixel_size.width,
                height = pixel_size.height,
                "rejecting oversized image upload"
            );
            return Err(ImageError::TooLarge {
                width: pixel_size.width,
                height: pixel_size.height,
                max_width: self.limits.max_width,
                max_height: self.limits.max_height,
            });
        }
        let expected = match format {
            ImageFormat::Rgb => pixel_size.area() * 3,
            ImageFormat::Rgba => pixel_size.area() * 4,
            ImageFormat::Png => data.len(), // validated at decode time
        };
        if data.len() != expected {
            return Err(ImageError::DataSizeMismatch {
                expected,
                actual: data.len(),
            });
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.stats.instances.fetch_add(1, Ordering::Relaxed);
        Ok(Arc::new(Image {
            id,
            format,
            data,
            size: pixel_size,
            stats: self.stats.clone(),
            on_remove: self.on_remove.clone(),
        }))
    }

    /// Bind an image to a cell raster. No pixel expansion happens here.
    pub fn rasterize(
        &self,
        image: Arc<Image>,
        alignment: AlignmentPolicy,
        resize: ResizePolicy,
        default_color: Rgba,
        cell_span: CellSpan,
        cell_size: PixelSize,
    ) -> Arc<RasterizedImage> {
        self.stats.rasterized.fetch_add(1, Ordering::Relaxed);
        Arc::new(RasterizedImage {
            image,
            alignment,
            resize,
            default_color,
            cell_span,
            cell_size,
            stats: self.stats.clone(),
        })
    }

    /// Bind `name` to an image so later uploads can re-reference it.
    ///
    /// The cache is LRU-bounded: evicting a name drops only the binding;
    /// the image survives while cells or rasterizations reference it.
    pub fn link(&self, name: impl Into<String>, image: Arc<Image>) {
        self.name_links.lock().insert(name.into(), image);
    }

    /// Look up a named image, refreshing its recency.
    pub fn find_by_name(&self, name: &str) -> Option<Arc<Image>> {
        self.name_links.lock().get(&name.to_string()).cloned()
    }

    /// Remove a name binding.
    pub fn unlink(&self, name: &str) {
        let _ = self.name_links.lock().remove(&name.to_string());
    }

    /// Drop all name bindings.
    pub fn clear(&self) {
        self.name_links.lock().clear();
    }
}
