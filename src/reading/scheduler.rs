//! Reading position scheduler
//!
//! Decides which (book, chapter) the next read ping reports. The scheduler
//! is a pure state machine: no I/O, randomness from an injectable RNG and
//! time from an injectable instant so the cooldown rule can be tested
//! without sleeping.

use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::catalog::Catalog;
use crate::config::{ReadingConfig, ReadingMode, SmartRandomConfig};
use crate::error::{Error, Result};

/// Position handed to the session client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Position {
    pub book_id: String,
    pub chapter_id: String,
    /// Offset of the chapter within its book
    pub chapter_offset: usize,
    /// Value sent as `ci`
    pub chapter_ci: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Cursor {
    book: usize,
    chapter: usize,
}

pub struct PositionScheduler<R = ChaCha8Rng> {
    catalog: Catalog,
    mode: ReadingMode,
    policy: SmartRandomConfig,
    fallback_to_config: bool,
    cursor: Option<Cursor>,
    last_switch: Option<Instant>,
    rng: R,
}

impl PositionScheduler<ChaCha8Rng> {
    pub fn new(catalog: Catalog, config: &ReadingConfig) -> Self {
        Self::with_rng(catalog, config, ChaCha8Rng::from_entropy())
    }
}

impl<R: Rng> PositionScheduler<R> {
    pub fn with_rng(catalog: Catalog, config: &ReadingConfig, rng: R) -> Self {
        Self {
            catalog,
            mode: config.mode,
            policy: config.smart_random.clone(),
            fallback_to_config: config.fallback_to_config,
            cursor: None,
            last_switch: None,
            rng,
        }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn mode(&self) -> ReadingMode {
        self.mode
    }

    /// Position currently held, if initialized
    pub fn current(&self) -> Option<Position> {
        self.cursor.map(|c| self.position(c))
    }

    /// Adopt a starting position
    ///
    /// Empty ids mean "no seed". A seed chapter already listed under some
    /// book starts there, even when the captured book id differs. A chapter
    /// missing from a known book is appended to it; an unknown book is added
    /// under a placeholder name. Without a usable seed the first configured book is used when
    /// `fallback_to_config` is enabled.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CatalogExhausted`] when nothing can be adopted.
    pub fn initialize(&mut self, seed_book: &str, seed_chapter: &str) -> Result<Position> {
        if seed_book.is_empty() || seed_chapter.is_empty() {
            warn!("No captured position, falling back to the configured catalog");
            return self.fallback();
        }

        let cursor = match (
            self.catalog.position_of(seed_book),
            self.catalog.locate_chapter(seed_chapter),
        ) {
            (Some(book), Some((owner, chapter))) if owner == book => Cursor { book, chapter },
            (_, Some((book, chapter))) => {
                warn!(
                    book_id = seed_book,
                    chapter_id = seed_chapter,
                    owner = %self.catalog.books()[book].id,
                    "Captured chapter belongs to another book, starting there"
                );
                Cursor { book, chapter }
            }
            (Some(book), None) => {
                warn!(
                    book_id = seed_book,
                    chapter_id = seed_chapter,
                    "Captured chapter not in book, appending it"
                );
                let chapter = self
                    .catalog
                    .push_chapter(seed_book, seed_chapter)
                    .ok_or(Error::CatalogExhausted)?;
                Cursor { book, chapter }
            }
            (None, None) => {
                let book = self
                    .catalog
                    .insert_dynamic_book(seed_book, seed_chapter)
                    .ok_or(Error::CatalogExhausted)?;
                info!(
                    book_id = seed_book,
                    name = %self.catalog.books()[book].name,
                    "Captured book not in catalog, added it"
                );
                Cursor { book, chapter: 0 }
            }
        };

        self.cursor = Some(cursor);
        let position = self.position(cursor);
        info!(
            book = %self.catalog.book_name(&position.book_id),
            chapter_id = %position.chapter_id,
            ci = position.chapter_ci,
            "Starting from captured position"
        );
        Ok(position)
    }

    fn fallback(&mut self) -> Result<Position> {
        if self.fallback_to_config && !self.catalog.is_empty() {
            let cursor = Cursor { book: 0, chapter: 0 };
            self.cursor = Some(cursor);
            info!(book = %self.catalog.books()[0].name, "Starting from the first configured book");
            return Ok(self.position(cursor));
        }

        tracing::error!("No captured position and no configured book to fall back to");
        Err(Error::CatalogExhausted)
    }

    /// Next position to report
    pub fn next(&mut self) -> Result<Position> {
        self.next_at(Instant::now())
    }

    /// Next position to report, with `now` used for the switch cooldown
    pub fn next_at(&mut self, now: Instant) -> Result<Position> {
        let cursor = match self.mode {
            ReadingMode::Sequential => {
                let cursor = self.ensure_cursor()?;
                self.advance_sequential(cursor)
            }
            ReadingMode::SmartRandom => match self.cursor {
                Some(cursor) => self.advance_smart(cursor, now),
                None => {
                    warn!("Smart random has no position, trying the configured catalog");
                    match self.fallback() {
                        Ok(_) => match self.cursor {
                            Some(cursor) => self.advance_smart(cursor, now),
                            None => self.pure_random()?,
                        },
                        Err(_) => self.pure_random()?,
                    }
                }
            },
            ReadingMode::PureRandom => self.pure_random()?,
        };

        self.cursor = Some(cursor);
        let position = self.position(cursor);
        debug!(
            mode = %self.mode,
            book_id = %position.book_id,
            chapter_id = %position.chapter_id,
            ci = position.chapter_ci,
            "Next reading position"
        );
        Ok(position)
    }

    fn ensure_cursor(&mut self) -> Result<Cursor> {
        if let Some(cursor) = self.cursor {
            return Ok(cursor);
        }
        self.fallback()?;
        self.cursor.ok_or(Error::CatalogExhausted)
    }

    fn chapter_count(&self, book: usize) -> usize {
        self.catalog.get(book).map_or(0, |b| b.chapters.len())
    }

    fn advance_sequential(&self, cursor: Cursor) -> Cursor {
        let next = cursor.chapter + 1;
        if next < self.chapter_count(cursor.book) {
            return Cursor {
                book: cursor.book,
                chapter: next,
            };
        }

        let book = (cursor.book + 1) % self.catalog.len();
        if book != cursor.book {
            info!(book = %self.catalog.books()[book].name, "Sequential reading moved to next book");
        }
        Cursor { book, chapter: 0 }
    }

    fn advance_smart(&mut self, mut cursor: Cursor, now: Instant) -> Cursor {
        let cooled_down = self
            .last_switch
            .map_or(true, |at| now.saturating_duration_since(at) > self.policy.cooldown());

        // Draw even when not eligible so the stream of draws does not depend on time
        let switch_draw: f64 = self.rng.gen();
        if cooled_down && switch_draw > self.policy.book_continuity && self.catalog.len() > 1 {
            let others: Vec<usize> = (0..self.catalog.len()).filter(|&b| b != cursor.book).collect();
            if let Some(&book) = others.choose(&mut self.rng) {
                cursor = Cursor { book, chapter: 0 };
                self.last_switch = Some(now);
                info!(book = %self.catalog.books()[book].name, "Switched book");
            }
        }

        let chapters = self.chapter_count(cursor.book);
        let skip_draw: f64 = self.rng.gen();
        if skip_draw > self.policy.chapter_continuity {
            if chapters > 1 {
                cursor.chapter = self.rng.gen_range(0..chapters);
                debug!(chapter = cursor.chapter, "Jumped to another chapter");
            } else {
                debug!("Book has a single chapter, no chapter jump");
            }
            return cursor;
        }

        // Sequential advance that stays inside the current book
        cursor.chapter = if cursor.chapter + 1 < chapters {
            cursor.chapter + 1
        } else {
            0
        };
        cursor
    }

    fn pure_random(&mut self) -> Result<Cursor> {
        if self.catalog.is_empty() {
            return Err(Error::CatalogExhausted);
        }
        let book = self.rng.gen_range(0..self.catalog.len());
        let chapter = self.rng.gen_range(0..self.chapter_count(book));
        Ok(Cursor { book, chapter })
    }

    fn position(&self, cursor: Cursor) -> Position {
        let book = &self.catalog.books()[cursor.book];
        Position {
            book_id: book.id.clone(),
            chapter_id: book.chapters[cursor.chapter].id.clone(),
            chapter_offset: cursor.chapter,
            chapter_ci: book.chapter_ci(cursor.chapter),
        }
    }
}
