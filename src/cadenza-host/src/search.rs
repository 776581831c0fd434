use cadenza_core::SearchResult;
use parking_lot::Mutex;

/// Merged search results for the current query.
#[derive(Default)]
pub struct SearchCache {
    bucket: Mutex<Option<SearchResult>>,
}

impl SearchCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a fresh bucket for `query`.
    pub fn start(&self, query: &str) {
        *self.bucket.lock() = Some(SearchResult {
            query: query.to_string(),
            ..SearchResult::default()
        });
    }

    /// Folds one provider's answer into the bucket and returns the merged
    /// view. A result for another query replaces the bucket.
    pub fn merge(&self, result: SearchResult) -> SearchResult {
        let mut bucket = self.bucket.lock();
        match bucket.as_mut() {
            Some(current) if current.query == result.query => {
                union(&mut current.songs, result.songs);
                union(&mut current.albums, result.albums);
                union(&mut current.artists, result.artists);
                union(&mut current.playlists, result.playlists);
                current.identifier = result.identifier;
                current.clone()
            }
            _ => {
                *bucket = Some(result.clone());
                result
            }
        }
    }

    pub fn current(&self) -> Option<SearchResult> {
        self.bucket.lock().clone()
    }
}

fn union(into: &mut Vec<String>, incoming: Vec<String>) {
    for reference in incoming {
        if !into.contains(&reference) {
            into.push(reference);
        }
    }
}
