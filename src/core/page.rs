//! Page descriptors for listing endpoints.
//!
//! Services fetch a window of items and a total count separately; the two are
//! not read atomically, so a page may briefly disagree with its total while the
//! repository is being written to.

use serde::Serialize;

use crate::error::{Error, Result};

/// A validated `(page, size)` request coming from query parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    page: u64,
    size: u64,
}

impl PageRequest {
    pub fn new(page: i64, size: i64) -> Result<Self> {
        if page < 0 {
            return Err(Error::InvalidPageRequest(format!(
                "page must be >= 0, got {}",
                page
            )));
        }
        if size <= 0 {
            return Err(Error::InvalidPageRequest(format!(
                "size must be > 0, got {}",
                size
            )));
        }
        Ok(Self {
            page: page as u64,
            size: size as u64,
        })
    }

    pub fn page(&self) -> u64 {
        self.page
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn offset(&self) -> u64 {
        self.page.saturating_mul(self.size)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub content: Vec<T>,
    pub page_number: u64,
    pub page_size: u64,
    pub total_elements: u64,
    pub total_pages: u64,
}

impl<T> Page<T> {
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            content: self.content.into_iter().map(f).collect(),
            page_number: self.page_number,
            page_size: self.page_size,
            total_elements: self.total_elements,
            total_pages: self.total_pages,
        }
    }

    pub fn has_next(&self) -> bool {
        self.page_number + 1 < self.total_pages
    }

    pub fn has_previous(&self) -> bool {
        self.page_number > 0
    }
}

/// Build a page from a window of `items` fetched at `offset` with at most `limit` entries.
pub fn paginate<T>(offset: i64, limit: i64, total_count: u64, items: Vec<T>) -> Result<Page<T>> {
    if offset < 0 {
        return Err(Error::InvalidPageRequest(format!(
            "offset must be >= 0, got {}",
            offset
        )));
    }
    if limit <= 0 {
        return Err(Error::InvalidPageRequest(format!(
            "limit must be > 0, got {}",
            limit
        )));
    }

    let (offset, limit) = (offset as u64, limit as u64);
    let mut content = items;
    content.truncate(limit as usize);

    Ok(Page {
        content,
        page_number: offset / limit,
        page_size: limit,
        total_elements: total_count,
        total_pages: total_count.div_ceil(limit),
    })
}

/// Convenience for services that already hold a validated [`PageRequest`].
pub fn paginate_request<T>(request: PageRequest, total_count: u64, items: Vec<T>) -> Page<T> {
    let mut content = items;
    content.truncate(request.size() as usize);

    Page {
        content,
        page_number: request.page(),
        page_size: request.size(),
        total_elements: total_count,
        total_pages: total_count.div_ceil(request.size()),
    }
}
