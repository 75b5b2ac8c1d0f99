//! K-way merge of independently sorted streams.
//!
//! Holds one buffered head per source and emits the least head each step,
//! advancing only the source it came from. Nothing is materialized beyond the
//! heads. Equal keys from different sources are all emitted, lowest source
//! index first. Cost is O(records x sources), fine for partition fan-out.

/// Key a merged stream is ordered by.
pub trait SortKey {
    fn sort_key(&self) -> &str;
}

impl SortKey for String {
    fn sort_key(&self) -> &str {
        self
    }
}

impl SortKey for &str {
    fn sort_key(&self) -> &str {
        self
    }
}

// Errors carry no key and sort first, so a merge hands them on as soon as
// it sees them.
impl<T: SortKey, E> SortKey for Result<T, E> {
    fn sort_key(&self) -> &str {
        match self {
            Ok(item) => item.sort_key(),
            Err(_) => "",
        }
    }
}

pub struct KMerge<I: Iterator> {
    sources: Vec<I>,
    heads: Vec<Option<I::Item>>,
    primed: bool,
}

impl<I> KMerge<I>
where
    I: Iterator,
    I::Item: SortKey,
{
    pub fn new(sources: impl IntoIterator<Item = I>) -> Self {
        KMerge {
            sources: sources.into_iter().collect(),
            heads: Vec::new(),
            primed: false,
        }
    }

    /// Add another source; only valid before the first item is pulled.
    pub fn push(&mut self, source: I) {
        debug_assert!(!self.primed, "source added after merge started");
        self.sources.push(source);
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    fn prime(&mut self) {
        self.heads = self.sources.iter_mut().map(Iterator::next).collect();
        self.primed = true;
    }
}

impl<I> Iterator for KMerge<I>
where
    I: Iterator,
    I::Item: SortKey,
{
    type Item = I::Item;

    fn next(&mut self) -> Option<I::Item> {
        if !self.primed {
            self.prime();
        }
        let mut least: Option<usize> = None;
        for (i, head) in self.heads.iter().enumerate() {
            if let Some(item) = head {
                let better = match least.and_then(|j| self.heads[j].as_ref()) {
                    Some(current) => item.sort_key() < current.sort_key(),
                    None => true,
                };
                if better {
                    least = Some(i);
                }
            }
        }
        let i = least?;
        let next = self.sources[i].next();
        std::mem::replace(&mut self.heads[i], next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn merge(inputs: Vec<Vec<&'static str>>) -> Vec<&'static str> {
        KMerge::new(inputs.into_iter().map(|v| v.into_iter())).collect()
    }

    #[test]
    fn test_merges_in_order() {
        let out = merge(vec![vec!["a", "d", "g"], vec!["b", "e"], vec!["c", "f", "h", "i"]]);
        assert_eq!(out, vec!["a", "b", "c", "d", "e", "f", "g", "h", "i"]);
    }

    #[test]
    fn test_keeps_duplicates() {
        let out = merge(vec![vec!["a", "b"], vec!["a", "b"], vec!["b"]]);
        assert_eq!(out, vec!["a", "a", "b", "b", "b"]);
    }

    #[test]
    fn test_empty_sources() {
        assert!(merge(vec![]).is_empty());
        assert_eq!(merge(vec![vec![], vec!["x"], vec![]]), vec!["x"]);
    }

    #[test]
    fn test_errors_are_passed_on_first() {
        let good: Vec<Result<&str, String>> = vec![Ok("a"), Ok("c")];
        let failing: Vec<Result<&str, String>> = vec![Ok("b"), Err("boom".to_string())];
        let out: Vec<Result<&str, String>> =
            KMerge::new(vec![good.into_iter(), failing.into_iter()]).collect();
        assert_eq!(
            out,
            vec![Ok("a"), Ok("b"), Err("boom".to_string()), Ok("c")]
        );
    }

    #[test]
    fn test_is_lazy() {
        use std::cell::Cell;
        let pulled = Cell::new(0);
        let counting = || {
            (0..1000).map(|i| {
                pulled.set(pulled.get() + 1);
                format!("{:04}", i)
            })
        };
        let first: Vec<String> = KMerge::new(vec![counting(), counting()]).take(3).collect();
        assert_eq!(first, vec!["0000", "0000", "0001"]);
        assert!(pulled.get() < 10);
    }
}
