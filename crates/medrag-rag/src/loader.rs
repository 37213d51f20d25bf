//! Corpus loading from a directory of text, markdown and HTML files

use pulldown_cmark::{Event, Parser, TagEnd};
use scraper::{Html, Selector};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use medrag_core::{Document, Result};

const PAGE_BREAK: char = '\x0c';
const HTML_BLOCKS: &str = "h1, h2, h3, h4, h5, h6, p, li, pre, blockquote, td, th";

/// Source formats the loader understands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    Text,
    Markdown,
    Html,
}

impl SourceFormat {
    /// Format by file extension, case-insensitive
    pub fn from_path(path: &Path) -> Option<Self> {
        let extension = path.extension()?.to_str()?.to_lowercase();
        match extension.as_str() {
            "txt" | "text" => Some(Self::Text),
            "md" | "markdown" => Some(Self::Markdown),
            "html" | "htm" => Some(Self::Html),
            _ => None,
        }
    }
}

/// Load every supported file under `dir`, in sorted path order.
///
/// Document ids are paths relative to `dir` with `/` separators, so they
/// stay stable across machines. Plain text splits into one document per
/// form-feed separated page with ids `{path}#p{n}`.
pub async fn load_directory(dir: &Path) -> Result<Vec<Document>> {
    let mut documents = Vec::new();

    for path in collect_files(dir).await? {
        let relative = relative_id(dir, &path);

        let Some(format) = SourceFormat::from_path(&path) else {
            if path
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"))
            {
                warn!(path = %path.display(), "PDF extraction is not supported, skipping");
            } else {
                debug!(path = %path.display(), "skipping unsupported file");
            }
            continue;
        };

        let content = tokio::fs::read_to_string(&path).await?;
        let loaded = parse_document(&relative, &content, format);
        debug!(path = %relative, documents = loaded.len(), "loaded file");
        documents.extend(loaded);
    }

    info!(dir = %dir.display(), documents = documents.len(), "loaded corpus");
    Ok(documents)
}

/// Turn one file's content into documents; empty documents are dropped
pub fn parse_document(source: &str, content: &str, format: SourceFormat) -> Vec<Document> {
    match format {
        SourceFormat::Text => {
            let pages: Vec<&str> = content.split(PAGE_BREAK).collect();
            if pages.len() == 1 {
                return non_empty(Document::new(source, content, source));
            }
            pages
                .into_iter()
                .enumerate()
                .filter_map(|(i, page)| {
                    let number = i as u32 + 1;
                    non_empty(
                        Document::new(format!("{}#p{}", source, number), page, source)
                            .with_page(number),
                    )
                    .pop()
                })
                .collect()
        }
        SourceFormat::Markdown => non_empty(Document::new(source, markdown_to_text(content), source)),
        SourceFormat::Html => non_empty(Document::new(source, html_to_text(content), source)),
    }
}

fn non_empty(document: Document) -> Vec<Document> {
    if document.text.trim().is_empty() {
        Vec::new()
    } else {
        vec![document]
    }
}

/// Plain text of a markdown document, one blank line between blocks
pub fn markdown_to_text(markdown: &str) -> String {
    let mut text = String::new();

    for event in Parser::new(markdown) {
        match event {
            Event::Text(t) | Event::Code(t) => text.push_str(&t),
            Event::SoftBreak | Event::HardBreak => text.push(' '),
            Event::End(
                TagEnd::Paragraph | TagEnd::Heading(_) | TagEnd::Item | TagEnd::CodeBlock,
            ) => text.push_str("\n\n"),
            _ => {}
        }
    }

    text.trim().to_string()
}

/// Visible text of block-level HTML elements, one blank line between blocks
pub fn html_to_text(html: &str) -> String {
    let document = Html::parse_document(html);
    let Ok(selector) = Selector::parse(HTML_BLOCKS) else {
        return String::new();
    };

    document
        .select(&selector)
        .map(|element| {
            element
                .text()
                .collect::<Vec<_>>()
                .join(" ")
                .split_whitespace()
                .collect::<Vec<_>>()
                .join(" ")
        })
        .filter(|text| !text.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}

async fn collect_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut pending = vec![dir.to_path_buf()];

    while let Some(current) = pending.pop() {
        let mut entries = tokio::fs::read_dir(&current).await?;
        while let Some(entry) = entries.next_entry().await? {
            let file_type = entry.file_type().await?;
            if file_type.is_dir() {
                pending.push(entry.path());
            } else if file_type.is_file() {
                files.push(entry.path());
            }
        }
    }

    files.sort();
    Ok(files)
}

fn relative_id(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_from_extension() {
        assert_eq!(SourceFormat::from_path(Path::new("a/b.TXT")), Some(SourceFormat::Text));
        assert_eq!(SourceFormat::from_path(Path::new("notes.md")), Some(SourceFormat::Markdown));
        assert_eq!(SourceFormat::from_path(Path::new("page.htm")), Some(SourceFormat::Html));
        assert_eq!(SourceFormat::from_path(Path::new("book.pdf")), None);
        assert_eq!(SourceFormat::from_path(Path::new("README")), None);
    }

    #[test]
    fn test_text_pages_split_on_form_feed() {
        let content = "Page one text.\x0c\x0cPage three text.";
        let documents = parse_document("book.txt", content, SourceFormat::Text);

        assert_eq!(documents.len(), 2);
        assert_eq!(documents[0].id, "book.txt#p1");
        assert_eq!(documents[0].page, Some(1));
        assert_eq!(documents[1].id, "book.txt#p3");
        assert_eq!(documents[1].text, "Page three text.");
        assert!(documents.iter().all(|d| d.source == "book.txt"));
    }

    #[test]
    fn test_plain_text_without_pages() {
        let documents = parse_document("notes.txt", "Just text.", SourceFormat::Text);
        assert_eq!(documents.len(), 1);
        assert_eq!(documents[0].id, "notes.txt");
        assert_eq!(documents[0].page, None);

        assert!(parse_document("empty.txt", "  \n ", SourceFormat::Text).is_empty());
    }

    #[test]
    fn test_markdown_to_text() {
        let markdown = "# Diabetes\n\nA *metabolic* disease\nwith `high` sugar.\n\n- thirst\n- fatigue\n";
        assert_eq!(
            markdown_to_text(markdown),
            "Diabetes\n\nA metabolic disease with high sugar.\n\nthirst\n\nfatigue"
        );
    }

    #[test]
    fn test_html_to_text() {
        let html = r#"<html><head><title>x</title><script>var a = 1;</script></head>
            <body><h1>Fractures</h1><p>Bones   break
            under stress.</p><div>ignored wrapper</div><p></p></body></html>"#;
        assert_eq!(html_to_text(html), "Fractures\n\nBones break under stress.");
    }

    #[tokio::test]
    async fn test_load_directory() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("guides");
        std::fs::create_dir_all(&nested).unwrap();

        std::fs::write(dir.path().join("diabetes.txt"), "Diabetes raises blood sugar.").unwrap();
        std::fs::write(nested.join("fracture.md"), "# Fracture\n\nImmobilize the limb.").unwrap();
        std::fs::write(dir.path().join("scan.pdf"), b"%PDF-1.4").unwrap();
        std::fs::write(dir.path().join("blank.txt"), "   ").unwrap();

        let documents = load_directory(dir.path()).await.unwrap();
        let ids: Vec<&str> = documents.iter().map(|d| d.id.as_str()).collect();

        assert_eq!(ids, vec!["diabetes.txt", "guides/fracture.md"]);
        assert_eq!(documents[1].text, "Fracture\n\nImmobilize the limb.");
    }

    #[tokio::test]
    async fn test_missing_directory_is_io_error() {
        let result = load_directory(Path::new("/nonexistent/medrag/corpus")).await;
        assert!(matches!(result, Err(medrag_core::Error::Io(_))));
    }
}
