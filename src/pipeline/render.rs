//! PDF access: page count, rasterisation and embedded text.
//!
//! Everything that touches pdfium sits behind the [`PdfBackend`] trait so the
//! analyzer and strategies can be exercised with an in-memory stub.
//!
//! ## Why spawn_blocking?
//!
//! `pdfium-render` wraps the pdfium C++ library, which is CPU-bound and keeps
//! thread-local state. [`run_blocking`] moves that work onto Tokio's blocking
//! pool so rendering a 36×48 in sheet never stalls the tile fan-out.
//!
//! ## Why cap pixels as well as DPI?
//!
//! Plan sheets range from letter to ARCH E. At 200 DPI an ARCH E sheet is
//! 7 200 × 9 600 px; at 300 DPI it is over 100 MP. `max_rendered_pixels`
//! caps the longest edge regardless of physical size, keeping memory bounded.

use crate::config::ParsingConfig;
use crate::error::TakeoffError;
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Read-only access to a PDF file. Page numbers are 1-based.
pub trait PdfBackend: Send + Sync {
    /// Number of pages in the document.
    fn page_count(&self, path: &Path) -> Result<usize, TakeoffError>;

    /// Rasterise one page at `dpi`.
    fn render_page(
        &self,
        path: &Path,
        page_number: usize,
        dpi: u32,
    ) -> Result<DynamicImage, TakeoffError>;

    /// Embedded text layer of one page (empty for scanned pages).
    fn page_text(&self, path: &Path, page_number: usize) -> Result<String, TakeoffError>;

    /// Rasterise several pages; each page succeeds or fails on its own.
    ///
    /// The default renders page by page; backends that can keep the
    /// document open across pages should override it.
    fn render_pages(
        &self,
        path: &Path,
        page_numbers: &[usize],
        dpi: u32,
    ) -> Vec<(usize, Result<DynamicImage, TakeoffError>)> {
        page_numbers
            .iter()
            .map(|&p| (p, self.render_page(path, p, dpi)))
            .collect()
    }
}

/// Run CPU-bound PDF/image work on the blocking pool.
pub async fn run_blocking<T, F>(what: &str, f: F) -> Result<T, TakeoffError>
where
    F: FnOnce() -> Result<T, TakeoffError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| TakeoffError::Internal(format!("{} task panicked: {}", what, e)))?
}

// ── pdfium ───────────────────────────────────────────────────────────────

/// Production backend over `pdfium-render`.
#[derive(Debug, Clone)]
pub struct PdfiumBackend {
    library_path: Option<PathBuf>,
    max_rendered_pixels: u32,
    password: Option<String>,
}

impl PdfiumBackend {
    pub fn new(
        library_path: Option<PathBuf>,
        max_rendered_pixels: u32,
        password: Option<String>,
    ) -> Self {
        Self {
            library_path,
            max_rendered_pixels,
            password,
        }
    }

    pub fn from_config(config: &ParsingConfig) -> Self {
        Self::new(
            config.pdfium_library_path.clone(),
            config.max_rendered_pixels,
            config.password.clone(),
        )
    }

    /// Bind to the configured library, then the working directory, then the
    /// system library.
    fn bind(&self) -> Result<Pdfium, TakeoffError> {
        let local = match &self.library_path {
            Some(p) if p.is_dir() => Pdfium::pdfium_platform_library_name_at_path(p),
            Some(p) => p.clone(),
            None => Pdfium::pdfium_platform_library_name_at_path("./"),
        };
        let bindings = Pdfium::bind_to_library(&local)
            .or_else(|_| Pdfium::bind_to_system_library())
            .map_err(|e| TakeoffError::PdfiumBindingFailed(format!("{:?}", e)))?;
        Ok(Pdfium::new(bindings))
    }

    fn open<'a>(&'a self, pdfium: &'a Pdfium, path: &Path) -> Result<PdfDocument<'a>, TakeoffError> {
        let password = self.password.as_deref();
        pdfium.load_pdf_from_file(path, password).map_err(|e| {
            let err_str = format!("{:?}", e);
            if err_str.contains("Password") || err_str.contains("password") {
                TakeoffError::PasswordRequired {
                    path: path.to_path_buf(),
                }
            } else {
                TakeoffError::CorruptPdf {
                    path: path.to_path_buf(),
                    detail: err_str,
                }
            }
        })
    }

    fn render_config(&self, dpi: u32) -> PdfRenderConfig {
        PdfRenderConfig::new()
            .scale_page_by_factor(dpi as f32 / 72.0)
            .set_maximum_width(self.max_rendered_pixels as i32)
            .set_maximum_height(self.max_rendered_pixels as i32)
    }

    fn render_one(
        document: &PdfDocument<'_>,
        cfg: &PdfRenderConfig,
        page_number: usize,
    ) -> Result<DynamicImage, TakeoffError> {
        let total = document.pages().len() as usize;
        if page_number == 0 || page_number > total {
            return Err(TakeoffError::PageOutOfRange {
                page: page_number,
                total,
            });
        }

        let page = document
            .pages()
            .get((page_number - 1) as u16)
            .map_err(|e| TakeoffError::RasterisationFailed {
                page: page_number,
                detail: format!("{:?}", e),
            })?;

        let bitmap =
            page.render_with_config(cfg)
                .map_err(|e| TakeoffError::RasterisationFailed {
                    page: page_number,
                    detail: format!("{:?}", e),
                })?;

        let image = bitmap.as_image();
        debug!(
            "Rendered page {} → {}x{} px",
            page_number,
            image.width(),
            image.height()
        );
        Ok(image)
    }
}

impl PdfBackend for PdfiumBackend {
    fn page_count(&self, path: &Path) -> Result<usize, TakeoffError> {
        let pdfium = self.bind()?;
        let document = self.open(&pdfium, path)?;
        let count = document.pages().len() as usize;
        info!("PDF loaded: {} pages", count);
        Ok(count)
    }

    fn render_page(
        &self,
        path: &Path,
        page_number: usize,
        dpi: u32,
    ) -> Result<DynamicImage, TakeoffError> {
        let pdfium = self.bind()?;
        let document = self.open(&pdfium, path)?;
        Self::render_one(&document, &self.render_config(dpi), page_number)
    }

    fn page_text(&self, path: &Path, page_number: usize) -> Result<String, TakeoffError> {
        let pdfium = self.bind()?;
        let document = self.open(&pdfium, path)?;
        let total = document.pages().len() as usize;
        if page_number == 0 || page_number > total {
            return Err(TakeoffError::PageOutOfRange {
                page: page_number,
                total,
            });
        }
        let page = document
            .pages()
            .get((page_number - 1) as u16)
            .map_err(|e| TakeoffError::CorruptPdf {
                path: path.to_path_buf(),
                detail: format!("{:?}", e),
            })?;
        let text = page.text().map_err(|e| TakeoffError::CorruptPdf {
            path: path.to_path_buf(),
            detail: format!("{:?}", e),
        })?;
        Ok(text.all())
    }

    fn render_pages(
        &self,
        path: &Path,
        page_numbers: &[usize],
        dpi: u32,
    ) -> Vec<(usize, Result<DynamicImage, TakeoffError>)> {
        let opened = self
            .bind()
            .and_then(|pdfium| {
                let cfg = self.render_config(dpi);
                let document = self.open(&pdfium, path)?;
                let rendered: Vec<_> = page_numbers
                    .iter()
                    .map(|&p| (p, Self::render_one(&document, &cfg, p)))
                    .collect();
                Ok(rendered)
            });

        match opened {
            Ok(rendered) => rendered,
            Err(e) => {
                let detail = e.to_string();
                page_numbers
                    .iter()
                    .map(|&p| {
                        (
                            p,
                            Err(TakeoffError::RasterisationFailed {
                                page: p,
                                detail: detail.clone(),
                            }),
                        )
                    })
                    .collect()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    struct Blank {
        pages: usize,
    }

    impl PdfBackend for Blank {
        fn page_count(&self, _path: &Path) -> Result<usize, TakeoffError> {
            Ok(self.pages)
        }

        fn render_page(
            &self,
            _path: &Path,
            page_number: usize,
            dpi: u32,
        ) -> Result<DynamicImage, TakeoffError> {
            if page_number > self.pages {
                return Err(TakeoffError::PageOutOfRange {
                    page: page_number,
                    total: self.pages,
                });
            }
            let w = (8.5 * dpi as f64) as u32;
            let h = (11.0 * dpi as f64) as u32;
            Ok(DynamicImage::ImageRgb8(RgbImage::from_pixel(w, h, Rgb([255, 255, 255]))))
        }

        fn page_text(&self, _path: &Path, _page_number: usize) -> Result<String, TakeoffError> {
            Ok(String::new())
        }
    }

    #[test]
    fn default_render_pages_keeps_per_page_results() {
        let backend = Blank { pages: 2 };
        let out = backend.render_pages(Path::new("x.pdf"), &[1, 2, 3], 10);
        assert_eq!(out.len(), 3);
        assert!(out[0].1.is_ok());
        assert!(out[1].1.is_ok());
        assert!(matches!(
            out[2].1,
            Err(TakeoffError::PageOutOfRange { page: 3, total: 2 })
        ));
    }

    #[tokio::test]
    async fn run_blocking_propagates_result() {
        let v = run_blocking("test", || Ok::<_, TakeoffError>(7)).await.unwrap();
        assert_eq!(v, 7);
        let err = run_blocking("test", || Err::<(), _>(TakeoffError::Internal("x".into())))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("x"));
    }

    #[test]
    fn pdfium_backend_takes_config_values() {
        let config = ParsingConfig::builder()
            .password("secret")
            .max_rendered_pixels(4000)
            .build()
            .unwrap();
        let backend = PdfiumBackend::from_config(&config);
        assert_eq!(backend.max_rendered_pixels, 4000);
        assert_eq!(backend.password.as_deref(), Some("secret"));
    }
}
