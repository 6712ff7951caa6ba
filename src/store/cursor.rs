//! Paginated cursor over a collection.
//!
//! Pages are fetched by id ("keyset" pagination), so at most `batch_size`
//! documents are held at once and updates made while iterating do not shift
//! later pages.

use super::{DocumentStore, Filter};
use crate::document::{Document, DocumentId};
use crate::{Error, Result};
use std::collections::VecDeque;

pub struct Cursor<'a> {
    store: &'a dyn DocumentStore,
    collection: String,
    filter: Filter,
    batch_size: usize,
    last_id: Option<DocumentId>,
    buffer: VecDeque<Document>,
    exhausted: bool,
}

impl<'a> Cursor<'a> {
    pub fn new(
        store: &'a dyn DocumentStore,
        collection: impl Into<String>,
        filter: Filter,
        batch_size: usize,
    ) -> Result<Self> {
        if batch_size == 0 {
            return Err(Error::Config("batch size must be at least 1".to_string()));
        }
        Ok(Self {
            store,
            collection: collection.into(),
            filter,
            batch_size,
            last_id: None,
            buffer: VecDeque::new(),
            exhausted: false,
        })
    }

    /// Fetch the next page. `Ok(None)` once the collection is exhausted.
    pub fn next_batch(&mut self) -> Result<Option<Vec<Document>>> {
        if !self.buffer.is_empty() {
            return Ok(Some(self.buffer.drain(..).collect()));
        }
        if self.exhausted {
            return Ok(None);
        }

        let page = self.store.find_page(
            &self.collection,
            &self.filter,
            self.last_id.as_ref(),
            self.batch_size,
        )?;
        if page.len() < self.batch_size {
            self.exhausted = true;
        }
        match page.last() {
            Some(last) => {
                self.last_id = Some(last.id().clone());
                Ok(Some(page))
            }
            None => Ok(None),
        }
    }

    /// Run `f` on every remaining document, page by page. Returns how many
    /// documents were visited. The first error stops the walk.
    pub fn try_for_each<F>(mut self, mut f: F) -> Result<u64>
    where
        F: FnMut(Document) -> Result<()>,
    {
        let mut visited = 0;
        while let Some(batch) = self.next_batch()? {
            for document in batch {
                f(document)?;
                visited += 1;
            }
        }
        Ok(visited)
    }
}

impl Iterator for Cursor<'_> {
    type Item = Result<Document>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buffer.is_empty() {
            match self.next_batch() {
                Ok(Some(batch)) => self.buffer.extend(batch),
                Ok(None) => return None,
                Err(e) => {
                    self.exhausted = true;
                    return Some(Err(e));
                }
            }
        }
        self.buffer.pop_front().map(Ok)
    }
}
