use crate::error::IngestError;
use lopdf::Document;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct PageText {
    pub number: u32,
    pub text: String,
}

pub trait PdfExtractor: Send + Sync {
    fn extract_pages(&self, bytes: &[u8]) -> Result<Vec<PageText>, IngestError>;

    /// All page texts concatenated in page order.
    fn extract_text(&self, bytes: &[u8]) -> Result<String, IngestError> {
        let pages = self.extract_pages(bytes)?;
        Ok(pages.into_iter().map(|page| page.text).collect())
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LopdfExtractor;

impl PdfExtractor for LopdfExtractor {
    fn extract_pages(&self, bytes: &[u8]) -> Result<Vec<PageText>, IngestError> {
        let document =
            Document::load_mem(bytes).map_err(|error| IngestError::PdfParse(error.to_string()))?;

        let mut pages = Vec::new();
        for (page_no, _page_id) in document.get_pages() {
            // Scanned pages and unsupported encodings contribute nothing.
            let text = match document.extract_text(&[page_no]) {
                Ok(text) => text,
                Err(error) => {
                    debug!(page = page_no, %error, "page has no extractable text");
                    String::new()
                }
            };

            pages.push(PageText {
                number: page_no,
                text,
            });
        }

        Ok(pages)
    }
}

pub fn extract_page_texts(bytes: &[u8]) -> Result<Vec<PageText>, IngestError> {
    LopdfExtractor.extract_pages(bytes)
}
