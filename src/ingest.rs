//! Upload ingestion: PDF/image rasterization and page normalization.
//!
//! One upload becomes an ordered set of normalized page JPEGs plus one
//! thumbnail. PDF pages are rendered through MuPDF at a fixed scale; raw
//! images are decoded, flattened onto white and re-encoded. Page numbers are
//! always assigned by source order, dense over the successfully processed
//! items.
//!
//! Everything here is CPU-bound and synchronous; callers run it inside
//! `tokio::task::spawn_blocking`.

use crate::db::NewPage;
use crate::error::{AppError, Result};
use crate::storage::{ArtifactStore, Bucket};
use image::imageops::FilterType;
use image::{DynamicImage, Rgb, RgbImage};
use mupdf::{Colorspace, Matrix};
use rayon::prelude::*;
use std::path::PathBuf;

/// Maximum page width after normalization.
pub const PAGE_MAX_WIDTH: u32 = 1200;
/// Maximum page height after normalization.
pub const PAGE_MAX_HEIGHT: u32 = 1600;
/// Exact thumbnail width.
pub const THUMB_WIDTH: u32 = 400;
/// Exact thumbnail height.
pub const THUMB_HEIGHT: u32 = 533;
/// JPEG encoding quality for pages and thumbnails.
pub const JPEG_QUALITY: u8 = 90;
/// Fixed render scale over PDF native resolution.
pub const PDF_RENDER_SCALE: f32 = 2.0;

/// One raw image from an upload batch.
#[derive(Debug, Clone)]
pub struct UploadedImage {
    /// Original client filename (informational only).
    pub filename: String,
    /// Raw file bytes.
    pub data: Vec<u8>,
}

/// Resolved upload source. Exactly one branch runs per ingestion.
#[derive(Debug)]
pub enum UploadSource {
    /// A stored PDF document.
    Pdf(PathBuf),
    /// An ordered batch of raster images.
    Images(Vec<UploadedImage>),
}

impl UploadSource {
    /// Resolve the source once at the start of ingestion. When both a PDF
    /// and images are supplied, the PDF wins and the images are ignored.
    pub fn resolve(pdf: Option<PathBuf>, images: Vec<UploadedImage>) -> Result<Self> {
        if let Some(path) = pdf {
            if !images.is_empty() {
                tracing::warn!(
                    ignored = images.len(),
                    "Both PDF and images uploaded; ignoring images"
                );
            }
            return Ok(UploadSource::Pdf(path));
        }

        if images.is_empty() {
            return Err(AppError::Validation(
                "PDF or image files are required".to_string(),
            ));
        }

        Ok(UploadSource::Images(images))
    }
}

/// Outcome of a successful ingestion run.
#[derive(Debug)]
pub struct IngestResult {
    /// Page records in page-number order, web paths filled in.
    pub pages: Vec<NewPage>,
    /// Web path of the thumbnail, when one was generated.
    pub thumbnail_path: Option<String>,
    /// Every file written, for compensating cleanup if the database commit
    /// fails afterwards.
    pub written_files: Vec<PathBuf>,
}

/// Run the rasterization stage for one upload.
///
/// `batch_id` is the fresh unique name prefix for this upload's artifacts;
/// `workers` bounds the decode/encode pool for image batches.
pub fn run(
    source: &UploadSource,
    store: &ArtifactStore,
    batch_id: &str,
    workers: usize,
) -> Result<IngestResult> {
    let page_files = match source {
        UploadSource::Pdf(path) => rasterize_pdf(path, store, batch_id)?,
        UploadSource::Images(images) => process_image_batch(images, store, batch_id, workers)?,
    };

    let mut written_files = page_files.clone();

    // Thumbnail from page 1, cover-cropped to exactly 400x533
    let thumbnail_path = match page_files.first() {
        Some(first_page) => {
            let thumb_name = format!("{}_thumb.jpg", batch_id);
            let thumb_file = store.fs_path(Bucket::Thumbnails, &thumb_name);
            match generate_thumbnail(first_page, &thumb_file) {
                Ok(()) => {
                    written_files.push(thumb_file);
                    Some(store.web_path(Bucket::Thumbnails, &thumb_name))
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to generate thumbnail");
                    let _ = store.remove_if_exists(&thumb_file);
                    None
                }
            }
        }
        None => None,
    };

    let pages = page_files
        .iter()
        .enumerate()
        .map(|(i, path)| {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            NewPage {
                page_number: i as i64 + 1,
                image_path: store.web_path(Bucket::Pages, &name),
            }
        })
        .collect();

    Ok(IngestResult {
        pages,
        thumbnail_path,
        written_files,
    })
}

/// Render every PDF page to a normalized JPEG. Any page failure aborts the
/// whole ingestion; files written so far are removed.
fn rasterize_pdf(path: &PathBuf, store: &ArtifactStore, batch_id: &str) -> Result<Vec<PathBuf>> {
    let mut written: Vec<PathBuf> = Vec::new();

    let result = (|| -> Result<()> {
        let filename = path
            .to_str()
            .ok_or_else(|| AppError::Pdf("Non-UTF8 source path".to_string()))?;
        let doc = mupdf::Document::open(filename).map_err(|e| AppError::Pdf(e.to_string()))?;
        let page_count = doc.page_count().map_err(|e| AppError::Pdf(e.to_string()))?;

        for index in 0..page_count {
            let page = doc
                .load_page(index)
                .map_err(|e| AppError::Pdf(e.to_string()))?;

            let matrix = Matrix::new_scale(PDF_RENDER_SCALE, PDF_RENDER_SCALE);
            let colorspace = Colorspace::device_rgb();
            let pixmap = page
                .to_pixmap(&matrix, &colorspace, false, true)
                .map_err(|e| AppError::Pdf(e.to_string()))?;

            let rendered = pixmap_to_image(&pixmap)?;
            // PDF-derived pages may be enlarged up to the page bounds
            let normalized = fit_within_page(&rendered, true);
            let jpeg = encode_jpeg(&normalized)?;

            let page_file = store.fs_path(Bucket::Pages, &format!("{}-{}.jpg", batch_id, index + 1));
            std::fs::write(&page_file, &jpeg)?;
            written.push(page_file);

            tracing::debug!(page = index + 1, total = page_count, "Rendered PDF page");
        }

        Ok(())
    })();

    match result {
        Ok(()) => Ok(written),
        Err(e) => {
            for file in &written {
                let _ = store.remove_if_exists(file);
            }
            Err(e)
        }
    }
}

/// Normalize a raw-image batch. Failing images are skipped and the batch
/// continues; page numbering stays dense over the survivors.
fn process_image_batch(
    images: &[UploadedImage],
    store: &ArtifactStore,
    batch_id: &str,
    workers: usize,
) -> Result<Vec<PathBuf>> {
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers.max(1))
        .build()
        .unwrap_or_else(|_| rayon::ThreadPoolBuilder::new().build().unwrap());

    // Decode and encode in parallel, keeping input order; numbering happens
    // afterwards so it reflects source order, never completion order.
    let encoded: Vec<Option<Vec<u8>>> = pool.install(|| {
        images
            .par_iter()
            .map(|img| match normalize_raw_image(&img.data) {
                Ok(jpeg) => Some(jpeg),
                Err(e) => {
                    tracing::error!(file = %img.filename, error = %e, "Skipping unprocessable image");
                    None
                }
            })
            .collect()
    });

    let mut written: Vec<PathBuf> = Vec::new();

    for jpeg in encoded.into_iter().flatten() {
        let page_number = written.len() + 1;
        let page_file = store.fs_path(Bucket::Pages, &format!("{}-{}.jpg", batch_id, page_number));

        match std::fs::write(&page_file, &jpeg) {
            Ok(()) => written.push(page_file),
            Err(e) => {
                tracing::error!(path = %page_file.display(), error = %e, "Failed to write page");
                let _ = store.remove_if_exists(&page_file);
            }
        }
    }

    Ok(written)
}

/// Decode one raw image and normalize it: flatten transparency onto white,
/// fit within the page bounds without enlarging, JPEG-encode.
fn normalize_raw_image(data: &[u8]) -> Result<Vec<u8>> {
    let img = image::load_from_memory(data)?;
    let flattened = DynamicImage::ImageRgb8(flatten_onto_white(&img));
    let normalized = fit_within_page(&flattened, false);
    encode_jpeg(&normalized)
}

/// Composite any transparency onto a white background, yielding sRGB.
fn flatten_onto_white(img: &DynamicImage) -> RgbImage {
    let rgba = img.to_rgba8();
    let mut out = RgbImage::new(rgba.width(), rgba.height());

    for (x, y, pixel) in rgba.enumerate_pixels() {
        let alpha = pixel[3] as f32 / 255.0;
        let blend = |c: u8| (c as f32 * alpha + 255.0 * (1.0 - alpha)).round() as u8;
        out.put_pixel(x, y, Rgb([blend(pixel[0]), blend(pixel[1]), blend(pixel[2])]));
    }

    out
}

/// Resize to fit within the page bounds, preserving aspect ratio.
/// Enlargement is allowed for PDF renders and refused for raw images.
fn fit_within_page(img: &DynamicImage, allow_enlarge: bool) -> DynamicImage {
    let fits = img.width() <= PAGE_MAX_WIDTH && img.height() <= PAGE_MAX_HEIGHT;
    if fits && !allow_enlarge {
        return img.clone();
    }

    img.resize(PAGE_MAX_WIDTH, PAGE_MAX_HEIGHT, FilterType::Lanczos3)
}

/// Encode as JPEG at the fixed page quality.
fn encode_jpeg(img: &DynamicImage) -> Result<Vec<u8>> {
    let rgb = DynamicImage::ImageRgb8(img.to_rgb8());
    let mut out = Vec::new();
    let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(
        &mut std::io::Cursor::new(&mut out),
        JPEG_QUALITY,
    );
    rgb.write_with_encoder(encoder)?;
    Ok(out)
}

/// Generate the edition thumbnail from the first page image.
fn generate_thumbnail(first_page: &PathBuf, thumb_file: &PathBuf) -> Result<()> {
    let img = image::open(first_page)?;
    let thumb = img.resize_to_fill(THUMB_WIDTH, THUMB_HEIGHT, FilterType::Lanczos3);
    let jpeg = encode_jpeg(&thumb)?;
    std::fs::write(thumb_file, &jpeg)?;
    Ok(())
}

/// Convert a MuPDF pixmap to an RGB image buffer.
fn pixmap_to_image(pixmap: &mupdf::Pixmap) -> Result<DynamicImage> {
    let width = pixmap.width() as u32;
    let height = pixmap.height() as u32;
    let samples = pixmap.samples();
    let components = pixmap.n() as usize;

    let mut rgb = Vec::with_capacity((width * height * 3) as usize);
    for y in 0..height as usize {
        for x in 0..width as usize {
            let offset = (y * width as usize + x) * components;
            rgb.push(samples.get(offset).copied().unwrap_or(0));
            rgb.push(samples.get(offset + 1).copied().unwrap_or(0));
            rgb.push(samples.get(offset + 2).copied().unwrap_or(0));
        }
    }

    let img = RgbImage::from_raw(width, height, rgb)
        .ok_or_else(|| AppError::Pdf("Pixmap buffer size mismatch".to_string()))?;

    Ok(DynamicImage::ImageRgb8(img))
}

/// Extract a crop rectangle from a page image as JPEG bytes. Rectangles
/// reaching past the image bounds fail; nothing is clamped.
pub fn crop_page_image(page_file: &PathBuf, x: u32, y: u32, width: u32, height: u32) -> Result<Vec<u8>> {
    if width == 0 || height == 0 {
        return Err(AppError::Validation(
            "Crop rectangle must have positive size".to_string(),
        ));
    }

    let img = image::open(page_file)?;

    let (end_x, end_y) = (x.checked_add(width), y.checked_add(height));
    let in_bounds = matches!((end_x, end_y), (Some(ex), Some(ey)) if ex <= img.width() && ey <= img.height());
    if !in_bounds {
        return Err(AppError::Validation(format!(
            "Crop rectangle {}x{}+{}+{} exceeds image bounds {}x{}",
            width,
            height,
            x,
            y,
            img.width(),
            img.height()
        )));
    }

    let cropped = img.crop_imm(x, y, width, height);
    encode_jpeg(&cropped)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb([120, 40, 200])));
        let mut out = Vec::new();
        img.write_to(&mut std::io::Cursor::new(&mut out), image::ImageFormat::Png)
            .unwrap();
        out
    }

    #[test]
    fn resolve_prefers_pdf_over_images() {
        let images = vec![UploadedImage {
            filename: "a.png".to_string(),
            data: vec![],
        }];
        let source = UploadSource::resolve(Some(PathBuf::from("/tmp/a.pdf")), images).unwrap();
        assert!(matches!(source, UploadSource::Pdf(_)));
    }

    #[test]
    fn resolve_rejects_empty_upload() {
        assert!(UploadSource::resolve(None, Vec::new()).is_err());
    }

    #[test]
    fn raw_images_are_never_enlarged() {
        let small = image::load_from_memory(&png_bytes(300, 200)).unwrap();
        let out = fit_within_page(&small, false);
        assert_eq!((out.width(), out.height()), (300, 200));

        let large = image::load_from_memory(&png_bytes(2400, 3200)).unwrap();
        let out = fit_within_page(&large, false);
        assert!(out.width() <= PAGE_MAX_WIDTH && out.height() <= PAGE_MAX_HEIGHT);
    }

    #[test]
    fn pdf_pages_may_be_enlarged() {
        let small = image::load_from_memory(&png_bytes(300, 400)).unwrap();
        let out = fit_within_page(&small, true);
        assert_eq!((out.width(), out.height()), (PAGE_MAX_WIDTH, PAGE_MAX_HEIGHT));
    }

    #[test]
    fn flatten_replaces_transparency_with_white() {
        let mut rgba = image::RgbaImage::new(2, 1);
        rgba.put_pixel(0, 0, image::Rgba([0, 0, 0, 0]));
        rgba.put_pixel(1, 0, image::Rgba([10, 20, 30, 255]));

        let flat = flatten_onto_white(&DynamicImage::ImageRgba8(rgba));
        assert_eq!(flat.get_pixel(0, 0), &Rgb([255, 255, 255]));
        assert_eq!(flat.get_pixel(1, 0), &Rgb([10, 20, 30]));
    }

    #[test]
    fn crop_rejects_out_of_bounds() {
        let dir = tempfile::tempdir().unwrap();
        let page = dir.path().join("page.png");
        std::fs::write(&page, png_bytes(100, 80)).unwrap();

        assert!(crop_page_image(&page, 0, 0, 100, 80).is_ok());
        assert!(crop_page_image(&page, 50, 0, 60, 10).is_err());
        assert!(crop_page_image(&page, 0, 70, 10, 20).is_err());
        assert!(crop_page_image(&page, 0, 0, 0, 10).is_err());
    }

    #[test]
    fn crop_produces_requested_size() {
        let dir = tempfile::tempdir().unwrap();
        let page = dir.path().join("page.png");
        std::fs::write(&page, png_bytes(100, 80)).unwrap();

        let jpeg = crop_page_image(&page, 10, 10, 40, 30).unwrap();
        let out = image::load_from_memory(&jpeg).unwrap();
        assert_eq!((out.width(), out.height()), (40, 30));
    }
}
