use std::path::{Path, PathBuf};

use async_trait::async_trait;
use common::error::AppError;

/// One rasterized page handed to the extraction collaborator.
#[derive(Debug, Clone)]
pub struct RawPage {
    pub page_number: u32,
    pub image_png: Vec<u8>,
    pub text: String,
}

#[derive(Debug, Clone)]
pub struct RawDocument {
    pub source_path: String,
    pub bytes: Vec<u8>,
    pub pages: Vec<RawPage>,
}

/// Supplies document bytes and rasterized pages. PDF rendering itself is an
/// external concern; implementations adapt whatever renderer is available.
#[async_trait]
pub trait DocumentReader: Send + Sync {
    async fn read(&self, path: &Path) -> Result<RawDocument, AppError>;
}

/// Reader for pre-rendered documents: next to `report.pdf` it expects a
/// `report.pages/` directory holding `page-<n>.png` files and optional
/// `page-<n>.txt` sidecars with the page text.
pub struct PageDirectoryReader;

impl PageDirectoryReader {
    fn pages_dir(path: &Path) -> PathBuf {
        path.with_extension("pages")
    }

    fn parse_page_number(file_stem: &str) -> Option<u32> {
        file_stem.strip_prefix("page-")?.parse().ok()
    }
}

#[async_trait]
impl DocumentReader for PageDirectoryReader {
    async fn read(&self, path: &Path) -> Result<RawDocument, AppError> {
        let bytes = tokio::fs::read(path).await?;

        let pages_dir = Self::pages_dir(path);
        if !pages_dir.is_dir() {
            return Err(AppError::Validation(format!(
                "no pre-rendered pages directory at {}",
                pages_dir.display()
            )));
        }

        let mut pages = Vec::new();
        let mut entries = tokio::fs::read_dir(&pages_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let entry_path = entry.path();
            if entry_path.extension().and_then(|e| e.to_str()) != Some("png") {
                continue;
            }
            let Some(stem) = entry_path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let Some(page_number) = Self::parse_page_number(stem) else {
                continue;
            };

            let image_png = tokio::fs::read(&entry_path).await?;
            let text_path = entry_path.with_extension("txt");
            let text = match tokio::fs::read_to_string(&text_path).await {
                Ok(text) => text,
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => String::new(),
                Err(err) => return Err(err.into()),
            };

            pages.push(RawPage {
                page_number,
                image_png,
                text,
            });
        }

        pages.sort_by_key(|page| page.page_number);

        Ok(RawDocument {
            source_path: path.display().to_string(),
            bytes,
            pages,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reads_pages_in_order_with_optional_text() {
        let dir = tempfile::tempdir().expect("tempdir");
        let pdf_path = dir.path().join("report.pdf");
        tokio::fs::write(&pdf_path, b"%PDF-fake").await.expect("write pdf");

        let pages_dir = dir.path().join("report.pages");
        tokio::fs::create_dir(&pages_dir).await.expect("mkdir");
        tokio::fs::write(pages_dir.join("page-2.png"), b"png2")
            .await
            .expect("write page 2");
        tokio::fs::write(pages_dir.join("page-1.png"), b"png1")
            .await
            .expect("write page 1");
        tokio::fs::write(pages_dir.join("page-1.txt"), "first page text")
            .await
            .expect("write page 1 text");

        let document = PageDirectoryReader
            .read(&pdf_path)
            .await
            .expect("read document");

        assert_eq!(document.bytes, b"%PDF-fake");
        assert_eq!(
            document
                .pages
                .iter()
                .map(|p| p.page_number)
                .collect::<Vec<_>>(),
            vec![1, 2]
        );
        assert_eq!(document.pages[0].text, "first page text");
        assert_eq!(document.pages[1].text, "");
    }

    #[tokio::test]
    async fn missing_pages_directory_is_a_validation_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let pdf_path = dir.path().join("orphan.pdf");
        tokio::fs::write(&pdf_path, b"%PDF-fake").await.expect("write pdf");

        match PageDirectoryReader.read(&pdf_path).await {
            Err(AppError::Validation(_)) => {}
            other => panic!("Expected validation error, got {other:?}"),
        }
    }
}
