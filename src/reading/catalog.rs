//! Books and their ordered chapters

use std::collections::HashSet;

use crate::config::BookConfig;

/// A chapter with an optional explicit `ci` index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chapter {
    pub id: String,
    pub index: Option<u32>,
}

impl Chapter {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            index: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Book {
    pub id: String,
    pub name: String,
    pub chapters: Vec<Chapter>,
}

impl Book {
    pub fn new<I, S>(id: impl Into<String>, name: impl Into<String>, chapters: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            id: id.into(),
            name: name.into(),
            chapters: chapters.into_iter().map(Chapter::new).collect(),
        }
    }

    /// Offset of a chapter within this book
    pub fn chapter_offset(&self, chapter_id: &str) -> Option<usize> {
        self.chapters.iter().position(|c| c.id == chapter_id)
    }

    /// Value reported as `ci`: the configured index, else the offset
    pub fn chapter_ci(&self, offset: usize) -> u32 {
        self.chapters
            .get(offset)
            .and_then(|c| c.index)
            .unwrap_or(offset as u32)
    }
}

/// Ordered set of books; iteration order is the configured order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Catalog {
    books: Vec<Book>,
}

impl Catalog {
    pub fn new(books: Vec<Book>) -> Self {
        let mut catalog = Self::default();
        for book in books {
            catalog.add_book(book);
        }
        catalog
    }

    /// Build from the `[[reading.books]]` section
    pub fn from_config(books: &[BookConfig]) -> Self {
        let books = books
            .iter()
            .map(|b| Book {
                id: b.book_id.clone(),
                name: b.name.clone(),
                chapters: b
                    .chapters
                    .iter()
                    .map(|c| Chapter {
                        id: c.id().to_string(),
                        index: c.index(),
                    })
                    .collect(),
            })
            .collect();
        Self::new(books)
    }

    fn add_book(&mut self, mut book: Book) {
        if self.position_of(&book.id).is_some() {
            tracing::warn!(book_id = %book.id, "Duplicate book in catalog, keeping the first entry");
            return;
        }

        let mut seen: HashSet<String> = self
            .books
            .iter()
            .flat_map(|b| b.chapters.iter().map(|c| c.id.clone()))
            .collect();
        let before = book.chapters.len();
        book.chapters.retain(|c| seen.insert(c.id.clone()));
        if book.chapters.len() != before {
            tracing::warn!(
                book_id = %book.id,
                dropped = before - book.chapters.len(),
                "Chapters already listed elsewhere were dropped"
            );
        }
        if book.chapters.is_empty() {
            tracing::warn!(book_id = %book.id, "Book has no chapters left, skipping");
            return;
        }
        self.books.push(book);
    }

    pub fn is_empty(&self) -> bool {
        self.books.is_empty()
    }

    pub fn len(&self) -> usize {
        self.books.len()
    }

    pub fn books(&self) -> &[Book] {
        &self.books
    }

    pub fn get(&self, index: usize) -> Option<&Book> {
        self.books.get(index)
    }

    pub fn book(&self, book_id: &str) -> Option<&Book> {
        self.books.iter().find(|b| b.id == book_id)
    }

    pub fn position_of(&self, book_id: &str) -> Option<usize> {
        self.books.iter().position(|b| b.id == book_id)
    }

    /// Display name, or a placeholder for books not in the catalog
    pub fn book_name(&self, book_id: &str) -> String {
        self.book(book_id)
            .map(|b| b.name.clone())
            .unwrap_or_else(|| placeholder_name(book_id))
    }

    /// Book position and chapter offset of `chapter_id`, in whichever book lists it
    pub fn locate_chapter(&self, chapter_id: &str) -> Option<(usize, usize)> {
        self.books.iter().enumerate().find_map(|(book, b)| {
            b.chapter_offset(chapter_id).map(|chapter| (book, chapter))
        })
    }

    /// Append a chapter to a known book, returning its offset
    ///
    /// `None` when the book is unknown or the chapter is already listed.
    pub fn push_chapter(&mut self, book_id: &str, chapter_id: &str) -> Option<usize> {
        if self.locate_chapter(chapter_id).is_some() {
            return None;
        }
        let book = self.books.iter_mut().find(|b| b.id == book_id)?;
        book.chapters.push(Chapter::new(chapter_id));
        Some(book.chapters.len() - 1)
    }

    /// Add a single-chapter book under a placeholder name, returning its position
    ///
    /// `None` when the book or the chapter is already listed.
    pub fn insert_dynamic_book(&mut self, book_id: &str, chapter_id: &str) -> Option<usize> {
        if self.position_of(book_id).is_some() || self.locate_chapter(chapter_id).is_some() {
            return None;
        }
        self.books.push(Book {
            id: book_id.to_string(),
            name: placeholder_name(book_id),
            chapters: vec![Chapter::new(chapter_id)],
        });
        Some(self.books.len() - 1)
    }
}

/// Name given to books first seen in a captured request
pub fn placeholder_name(book_id: &str) -> String {
    let prefix: String = book_id.chars().take(10).collect();
    format!("Dynamic book ({prefix}...)")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BookConfig, ChapterEntry};

    fn two_books() -> Catalog {
        Catalog::new(vec![
            Book::new("b1", "First", ["c1", "c2"]),
            Book::new("b2", "Second", ["c3"]),
        ])
    }

    #[test]
    fn test_lookup_and_order() {
        let catalog = two_books();
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.position_of("b2"), Some(1));
        assert_eq!(catalog.book("b1").unwrap().chapter_offset("c2"), Some(1));
        assert!(catalog.book("zz").is_none());
    }

    #[test]
    fn test_placeholder_name_truncates_to_ten_chars() {
        assert_eq!(placeholder_name("abcdefghijklmnop"), "Dynamic book (abcdefghij...)");
        assert_eq!(two_books().book_name("b1"), "First");
        assert_eq!(two_books().book_name("short"), "Dynamic book (short...)");
    }

    #[test]
    fn test_chapter_ci_prefers_configured_index() {
        let catalog = Catalog::from_config(&[BookConfig {
            name: "Indexed".into(),
            book_id: "b1".into(),
            chapters: vec![
                ChapterEntry::Id("c1".into()),
                ChapterEntry::Detailed {
                    chapter_id: "c2".into(),
                    chapter_index: Some(42),
                },
            ],
        }]);
        let book = catalog.book("b1").unwrap();
        assert_eq!(book.chapter_ci(0), 0);
        assert_eq!(book.chapter_ci(1), 42);
    }

    #[test]
    fn test_dynamic_extension() {
        let mut catalog = two_books();
        assert_eq!(catalog.push_chapter("b2", "c9"), Some(1));
        assert_eq!(catalog.push_chapter("nope", "c10"), None);

        let pos = catalog.insert_dynamic_book("newbook", "x1");
        assert_eq!(pos, Some(2));
        assert_eq!(catalog.get(2).unwrap().name, "Dynamic book (newbook...)");
    }

    #[test]
    fn test_dynamic_extension_keeps_chapters_unique() {
        let mut catalog = two_books();
        assert_eq!(catalog.locate_chapter("c3"), Some((1, 0)));
        assert_eq!(catalog.locate_chapter("zz"), None);

        assert_eq!(catalog.push_chapter("b1", "c3"), None);
        assert_eq!(catalog.insert_dynamic_book("b3", "c1"), None);
        assert_eq!(catalog.insert_dynamic_book("b1", "x1"), None);
        assert_eq!(catalog.book("b1").unwrap().chapters.len(), 2);
        assert_eq!(catalog.len(), 2);
    }

    #[test]
    fn test_duplicate_chapters_and_books_are_dropped() {
        let catalog = Catalog::new(vec![
            Book::new("b1", "First", ["c1", "c2"]),
            Book::new("b2", "Second", ["c2", "c3"]),
            Book::new("b1", "Again", ["c4"]),
        ]);
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.book("b2").unwrap().chapters, vec![Chapter::new("c3")]);
    }
}
