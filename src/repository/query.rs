//! Caller-shaped views over a filtered base set.

use std::cmp::Reverse;

/// An owned, already soft-delete-filtered result set that callers refine
/// with filter, ordering and paging steps.
///
/// Every `Repository::query` call builds a fresh `Query` from the backend.
#[derive(Debug, Clone)]
pub struct Query<T> {
    items: Vec<T>,
}

impl<T> Query<T> {
    pub(crate) fn new(items: Vec<T>) -> Self {
        Self { items }
    }

    pub fn filter(mut self, mut predicate: impl FnMut(&T) -> bool) -> Self {
        self.items.retain(|item| predicate(item));
        self
    }

    /// Stable ascending sort.
    pub fn order_by<K: Ord>(mut self, key: impl FnMut(&T) -> K) -> Self {
        self.items.sort_by_key(key);
        self
    }

    /// Stable descending sort.
    pub fn order_by_desc<K: Ord>(mut self, mut key: impl FnMut(&T) -> K) -> Self {
        self.items.sort_by_key(|item| Reverse(key(item)));
        self
    }

    pub fn skip(mut self, count: usize) -> Self {
        let count = count.min(self.items.len());
        self.items.drain(..count);
        self
    }

    pub fn take(mut self, count: usize) -> Self {
        self.items.truncate(count);
        self
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.items.iter()
    }

    pub fn into_vec(self) -> Vec<T> {
        self.items
    }
}

impl<T> IntoIterator for Query<T> {
    type Item = T;
    type IntoIter = std::vec::IntoIter<T>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paging_after_ordering() {
        let page = Query::new(vec![5, 1, 4, 2, 3])
            .filter(|n| *n != 4)
            .order_by_desc(|n| *n)
            .skip(1)
            .take(2)
            .into_vec();
        assert_eq!(page, vec![3, 2]);
    }

    #[test]
    fn test_skip_past_end_is_empty() {
        let q = Query::new(vec![1, 2]).skip(10);
        assert!(q.is_empty());
        assert_eq!(Query::new(vec![2, 1]).order_by(|n| *n).into_vec(), vec![1, 2]);
    }
}
