//! Ranking and byte-budgeted cursor pagination over matched documents.

use ag_domain::config::retrieval::{DEFAULT_PAGE_LIMIT_BYTES, MAX_PAGE_LIMIT_BYTES};

use crate::augmenter::Document;

/// One emitted page.
#[derive(Debug, Clone, Default)]
pub struct Page {
    pub documents: Vec<Document>,
    pub content: String,
    pub size: usize,
}

/// Render a document the way it is counted against the page budget:
/// a `file: <path>` header, a fenced block tagged with the path's
/// extension, and a blank separator line.
pub fn format_document(doc: &Document) -> String {
    let path = doc.path();
    let ext = path.rsplit('.').next().filter(|e| *e != path).unwrap_or("");
    format!(
        "file: {path}\n```{ext}\n{content}\n````\n\n",
        content = doc.page_content
    )
}

/// Sort by descending score; ties keep input order.
pub fn rank(mut documents: Vec<Document>) -> Vec<Document> {
    documents.sort_by(|a, b| {
        b.score()
            .partial_cmp(&a.score())
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    documents
}

/// Clamp the requested byte budget to the default and ceiling.
pub fn effective_limit(limit_bytes: Option<usize>) -> usize {
    match limit_bytes {
        Some(0) | None => DEFAULT_PAGE_LIMIT_BYTES,
        Some(n) => n.min(MAX_PAGE_LIMIT_BYTES),
    }
}

/// Split ranked documents into pages of at most `limit_bytes` formatted
/// bytes; a single document over the budget forms its own page. Returns the
/// one-based `cursor` page, the next cursor (zero when the page holds the
/// last document), and the total formatted size across all documents.
pub fn paginate(ranked: &[Document], limit_bytes: usize, cursor: usize) -> (Page, usize, usize) {
    let mut pages: Vec<Page> = Vec::new();
    let mut current = Page::default();
    let mut total_size = 0usize;

    for doc in ranked {
        let formatted = format_document(doc);
        let size = formatted.len();
        total_size += size;

        if !current.documents.is_empty() && current.size + size > limit_bytes {
            pages.push(std::mem::take(&mut current));
        }
        current.documents.push(doc.clone());
        current.content.push_str(&formatted);
        current.size += size;

        // An oversized document closes its page immediately.
        if current.size > limit_bytes {
            pages.push(std::mem::take(&mut current));
        }
    }
    if !current.documents.is_empty() {
        pages.push(current);
    }

    let cursor = cursor.max(1);
    let page = pages.get(cursor - 1).cloned().unwrap_or_default();
    let next_cursor = if cursor < pages.len() { cursor + 1 } else { 0 };
    (page, next_cursor, total_size)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(path: &str, score: f64, content: &str) -> Document {
        Document::new(content, path, score)
    }

    #[test]
    fn ranking_is_descending_by_score() {
        let ranked = rank(vec![
            doc("a.txt", 0.9, "a"),
            doc("b.txt", 0.3, "b"),
            doc("c.txt", 0.4, "c"),
        ]);
        let paths: Vec<&str> = ranked.iter().map(|d| d.path()).collect();
        assert_eq!(paths, vec!["a.txt", "c.txt", "b.txt"]);
    }

    #[test]
    fn single_page_when_budget_fits_all() {
        let ranked = rank(vec![
            doc("a.txt", 0.9, "alpha"),
            doc("b.txt", 0.3, "bravo"),
            doc("c.txt", 0.4, "charlie"),
        ]);
        let (page, next_cursor, total) = paginate(&ranked, 100_000, 1);
        assert_eq!(page.documents.len(), 3);
        assert_eq!(next_cursor, 0);
        assert_eq!(total, page.size);
        // Content lists documents in rank order.
        let a = page.content.find("file: a.txt").unwrap();
        let c = page.content.find("file: c.txt").unwrap();
        let b = page.content.find("file: b.txt").unwrap();
        assert!(a < c && c < b);
    }

    #[test]
    fn pages_respect_byte_budget() {
        let docs: Vec<Document> = (0..6)
            .map(|i| doc(&format!("f{i}.txt"), 1.0 - i as f64 / 10.0, "x".repeat(40).as_str()))
            .collect();
        let per_doc = format_document(&docs[0]).len();
        let budget = per_doc * 2 + 1; // two documents per page

        let mut cursor = 1;
        let mut seen = 0;
        loop {
            let (page, next, _) = paginate(&docs, budget, cursor);
            assert!(page.size <= budget, "page over budget");
            assert_eq!(page.documents.len(), 2);
            seen += page.documents.len();
            if next == 0 {
                break;
            }
            cursor = next;
        }
        assert_eq!(seen, 6);
    }

    #[test]
    fn oversized_document_forms_its_own_page() {
        let docs = vec![
            doc("small1.txt", 0.9, "tiny"),
            doc("huge.txt", 0.8, &"z".repeat(500)),
            doc("small2.txt", 0.7, "tiny"),
        ];
        let budget = 120;

        let (first, next, _) = paginate(&docs, budget, 1);
        assert_eq!(first.documents.len(), 1);
        assert_eq!(first.documents[0].path(), "small1.txt");
        assert_eq!(next, 2);

        let (second, next, _) = paginate(&docs, budget, 2);
        assert_eq!(second.documents.len(), 1);
        assert_eq!(second.documents[0].path(), "huge.txt");
        assert!(second.size > budget);
        assert_eq!(next, 3);

        let (third, next, _) = paginate(&docs, budget, 3);
        assert_eq!(third.documents[0].path(), "small2.txt");
        assert_eq!(next, 0);
    }

    #[test]
    fn next_cursor_zero_only_on_last_page() {
        let docs: Vec<Document> = (0..3)
            .map(|i| doc(&format!("f{i}.txt"), 0.5, &"y".repeat(50)))
            .collect();
        let per_doc = format_document(&docs[0]).len();
        let (_, next1, _) = paginate(&docs, per_doc, 1);
        let (_, next2, _) = paginate(&docs, per_doc, 2);
        let (page3, next3, _) = paginate(&docs, per_doc, 3);
        assert_eq!(next1, 2);
        assert_eq!(next2, 3);
        assert_eq!(next3, 0);
        assert_eq!(page3.documents.len(), 1);
    }

    #[test]
    fn limit_clamping() {
        assert_eq!(effective_limit(None), DEFAULT_PAGE_LIMIT_BYTES);
        assert_eq!(effective_limit(Some(0)), DEFAULT_PAGE_LIMIT_BYTES);
        assert_eq!(effective_limit(Some(500)), 500);
        assert_eq!(effective_limit(Some(10_000_000)), MAX_PAGE_LIMIT_BYTES);
    }

    #[test]
    fn format_uses_extension_and_closing_fence() {
        let formatted = format_document(&doc("src/lib.rs", 1.0, "pub fn x() {}"));
        assert!(formatted.starts_with("file: src/lib.rs\n```rs\n"));
        assert!(formatted.ends_with("\n````\n\n"));
    }
}
