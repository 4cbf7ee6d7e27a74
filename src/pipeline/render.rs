//! Document normalisation: turn an upload into ordered RGB page images.
//!
//! Images decode to a single page. PDFs are rasterised page by page via
//! pdfium, which needs a file-system path, so the bytes go through a
//! [`tempfile::NamedTempFile`] that is removed when it drops, on success,
//! on error and on panic alike.
//!
//! Everything here runs inside `spawn_blocking`: decoding and rendering are
//! CPU-bound and pdfium is not async-safe.
//!
//! Pages are capped by `max_rendered_pixels` on the longest edge rather than
//! by DPI, since scanned forms arrive at wildly different physical sizes.

use crate::error::FormError;
use crate::pipeline::input::DocumentKind;
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::io::Write;
use std::path::Path;
use tracing::{debug, info};

/// One normalised page, ready for encoding.
#[derive(Debug, Clone)]
pub struct PageImage {
    /// 1-indexed position in the source document.
    pub page_num: usize,
    /// Always `DynamicImage::ImageRgb8`.
    pub image: DynamicImage,
}

/// Normalise `bytes` of the given kind into a non-empty, ordered list of pages.
///
/// # Errors
/// - [`FormError::CorruptInput`] — empty input, undecodable image, missing
///   `%PDF` header, PDF pdfium cannot open, or a PDF with no pages
/// - [`FormError::PdfiumBindingFailed`] — no pdfium library available
pub async fn normalize(
    kind: DocumentKind,
    bytes: &[u8],
    max_pixels: u32,
) -> Result<Vec<PageImage>, FormError> {
    if bytes.is_empty() {
        return Err(FormError::CorruptInput {
            format: kind.to_string(),
            detail: "upload is empty".into(),
        });
    }

    let data = bytes.to_vec();
    tokio::task::spawn_blocking(move || normalize_blocking(kind, &data, max_pixels))
        .await
        .map_err(|e| FormError::Internal(format!("Normalise task panicked: {}", e)))?
}

fn normalize_blocking(
    kind: DocumentKind,
    bytes: &[u8],
    max_pixels: u32,
) -> Result<Vec<PageImage>, FormError> {
    match kind {
        DocumentKind::Png | DocumentKind::Jpeg => {
            let image = decode_image(kind, bytes)?;
            Ok(vec![PageImage { page_num: 1, image }])
        }
        DocumentKind::Pdf => render_pdf(bytes, max_pixels, &std::env::temp_dir()),
    }
}

/// Decode a PNG/JPEG upload to RGB8.
///
/// The decoder picks the codec from the magic bytes, so a `.png` that is
/// really a JPEG still decodes.
fn decode_image(kind: DocumentKind, bytes: &[u8]) -> Result<DynamicImage, FormError> {
    let img = image::load_from_memory(bytes).map_err(|e| FormError::CorruptInput {
        format: kind.to_string(),
        detail: e.to_string(),
    })?;
    debug!("Decoded {} image → {}x{} px", kind, img.width(), img.height());
    Ok(DynamicImage::ImageRgb8(img.to_rgb8()))
}

/// Bind to `PDFIUM_LIB_PATH` when set, else to the system library.
fn bind_pdfium() -> Result<Pdfium, FormError> {
    let bindings = match std::env::var("PDFIUM_LIB_PATH") {
        Ok(path) if !path.trim().is_empty() => Pdfium::bind_to_library(path.trim()),
        _ => Pdfium::bind_to_system_library(),
    }
    .map_err(|e| FormError::PdfiumBindingFailed(format!("{:?}", e)))?;
    Ok(Pdfium::new(bindings))
}

/// Rasterise every page of a PDF, staging the bytes in `tmp_dir`.
fn render_pdf(bytes: &[u8], max_pixels: u32, tmp_dir: &Path) -> Result<Vec<PageImage>, FormError> {
    let corrupt = |detail: String| FormError::CorruptInput {
        format: DocumentKind::Pdf.to_string(),
        detail,
    };

    if !bytes.starts_with(b"%PDF") {
        return Err(corrupt("missing %PDF header".into()));
    }

    let mut tmp = tempfile::Builder::new()
        .prefix("form2json-")
        .suffix(".pdf")
        .tempfile_in(tmp_dir)
        .map_err(|e| FormError::Internal(format!("tempfile: {e}")))?;
    tmp.write_all(bytes)
        .and_then(|_| tmp.flush())
        .map_err(|e| FormError::io(tmp.path(), e))?;

    let pdfium = bind_pdfium()?;
    let document = pdfium
        .load_pdf_from_file(tmp.path(), None)
        .map_err(|e| corrupt(format!("{:?}", e)))?;

    let pages = document.pages();
    let total_pages = pages.len() as usize;
    if total_pages == 0 {
        return Err(corrupt("document has no pages".into()));
    }
    info!("PDF loaded: {} pages", total_pages);

    let render_config = PdfRenderConfig::new()
        .set_target_width(max_pixels as i32)
        .set_maximum_height(max_pixels as i32);

    let mut results = Vec::with_capacity(total_pages);
    for idx in 0..total_pages {
        let page = pages
            .get(idx as u16)
            .map_err(|e| corrupt(format!("page {}: {:?}", idx + 1, e)))?;

        let bitmap = page
            .render_with_config(&render_config)
            .map_err(|e| corrupt(format!("page {}: {:?}", idx + 1, e)))?;

        let image = bitmap.as_image();
        debug!(
            "Rendered page {} → {}x{} px",
            idx + 1,
            image.width(),
            image.height()
        );

        results.push(PageImage {
            page_num: idx + 1,
            image: DynamicImage::ImageRgb8(image.to_rgb8()),
        });
    }

    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Rgba, RgbaImage};
    use std::io::Cursor;

    fn encoded(format: ImageFormat, w: u32, h: u32) -> Vec<u8> {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(w, h, Rgba([10, 20, 30, 255])));
        let img = DynamicImage::ImageRgb8(img.to_rgb8());
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), format).unwrap();
        buf
    }

    #[tokio::test]
    async fn png_becomes_single_rgb_page() {
        let bytes = encoded(ImageFormat::Png, 12, 7);
        let pages = normalize(DocumentKind::Png, &bytes, 2000).await.unwrap();
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].page_num, 1);
        assert!(matches!(pages[0].image, DynamicImage::ImageRgb8(_)));
        assert_eq!((pages[0].image.width(), pages[0].image.height()), (12, 7));
    }

    #[tokio::test]
    async fn mislabelled_jpeg_still_decodes() {
        let bytes = encoded(ImageFormat::Jpeg, 8, 8);
        let pages = normalize(DocumentKind::Png, &bytes, 2000).await.unwrap();
        assert_eq!(pages.len(), 1);
    }

    #[tokio::test]
    async fn truncated_image_is_corrupt() {
        let mut bytes = encoded(ImageFormat::Png, 16, 16);
        bytes.truncate(20);
        let err = normalize(DocumentKind::Png, &bytes, 2000).await.unwrap_err();
        assert!(matches!(err, FormError::CorruptInput { .. }), "got {err:?}");
    }

    #[tokio::test]
    async fn empty_upload_is_corrupt() {
        let err = normalize(DocumentKind::Jpeg, &[], 2000).await.unwrap_err();
        assert!(matches!(err, FormError::CorruptInput { .. }));
    }

    /// Minimal PDF whose pages have the given media boxes, in order.
    fn pdf_with_pages(sizes: &[(u32, u32)]) -> Vec<u8> {
        let first_page = 3;
        let kids: Vec<String> = (0..sizes.len())
            .map(|i| format!("{} 0 R", first_page + i))
            .collect();

        let mut objects = vec![
            "<< /Type /Catalog /Pages 2 0 R >>".to_string(),
            format!(
                "<< /Type /Pages /Kids [{}] /Count {} >>",
                kids.join(" "),
                sizes.len()
            ),
        ];
        for (w, h) in sizes {
            objects.push(format!(
                "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 {w} {h}] >>"
            ));
        }

        let mut out = b"%PDF-1.4\n".to_vec();
        let mut offsets = Vec::with_capacity(objects.len());
        for (i, body) in objects.iter().enumerate() {
            offsets.push(out.len());
            out.extend_from_slice(format!("{} 0 obj\n{}\nendobj\n", i + 1, body).as_bytes());
        }
        let xref_at = out.len();
        out.extend_from_slice(format!("xref\n0 {}\n0000000000 65535 f \n", objects.len() + 1).as_bytes());
        for off in offsets {
            out.extend_from_slice(format!("{off:010} 00000 n \n").as_bytes());
        }
        out.extend_from_slice(
            format!(
                "trailer\n<< /Size {} /Root 1 0 R >>\nstartxref\n{}\n%%EOF\n",
                objects.len() + 1,
                xref_at
            )
            .as_bytes(),
        );
        out
    }

    fn dir_is_empty(dir: &Path) -> bool {
        std::fs::read_dir(dir).unwrap().next().is_none()
    }

    #[test]
    fn pdf_pages_render_in_order() {
        let tmp = tempfile::tempdir().unwrap();
        let bytes = pdf_with_pages(&[(200, 100), (100, 200), (150, 150)]);
        let pages = match render_pdf(&bytes, 400, tmp.path()) {
            Err(FormError::PdfiumBindingFailed(e)) => {
                println!("SKIP — pdfium not available: {e}");
                return;
            }
            other => other.unwrap(),
        };

        assert_eq!(
            pages.iter().map(|p| p.page_num).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
        assert!(pages[0].image.width() > pages[0].image.height());
        assert!(pages[1].image.width() < pages[1].image.height());
        assert!(pages.iter().all(|p| matches!(p.image, DynamicImage::ImageRgb8(_))));
        assert!(dir_is_empty(tmp.path()));
    }

    #[test]
    fn pdf_without_pages_is_corrupt() {
        let tmp = tempfile::tempdir().unwrap();
        match render_pdf(&pdf_with_pages(&[]), 400, tmp.path()) {
            Err(FormError::PdfiumBindingFailed(e)) => println!("SKIP — pdfium not available: {e}"),
            Err(FormError::CorruptInput { .. }) => {}
            other => panic!("expected CorruptInput, got {other:?}"),
        }
        assert!(dir_is_empty(tmp.path()));
    }

    #[test]
    fn staged_pdf_is_removed_when_loading_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let err = render_pdf(b"%PDF-1.4 but nothing else", 400, tmp.path()).unwrap_err();
        assert!(
            matches!(
                err,
                FormError::CorruptInput { .. } | FormError::PdfiumBindingFailed(_)
            ),
            "got {err:?}"
        );
        assert!(dir_is_empty(tmp.path()));
    }

    #[tokio::test]
    async fn pdf_without_header_is_corrupt_before_binding() {
        let err = normalize(DocumentKind::Pdf, b"not a pdf at all", 2000)
            .await
            .unwrap_err();
        match err {
            FormError::CorruptInput { format, detail } => {
                assert_eq!(format, "PDF");
                assert!(detail.contains("%PDF"));
            }
            other => panic!("expected CorruptInput, got {other:?}"),
        }
    }
}
