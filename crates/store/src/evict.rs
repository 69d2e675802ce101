//! Bounded eviction: cap a collection at `|limit|` by trimming one end.

use vigil_core::{End, Entity, Limit};

/// Outcome of an eviction pass. Trimming is policy, not failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Evicted {
    pub count: usize,
    pub end: End,
}

/// Put new entities at the insert end of `items`. For front insertion each
/// new entity becomes position 0 in turn, so the newest arrival is first.
pub fn place(mut items: Vec<Entity>, mut fresh: Vec<Entity>, limit: Limit) -> Vec<Entity> {
    if fresh.is_empty() {
        return items;
    }
    match limit.insert_end() {
        End::Back => {
            items.append(&mut fresh);
            items
        }
        End::Front => {
            fresh.reverse();
            fresh.append(&mut items);
            fresh
        }
    }
}

/// Trim `items` down to the limit's capacity from its evict end.
pub fn enforce<T>(items: &mut Vec<T>, limit: Limit) -> Option<Evicted> {
    let cap = limit.cap()?;
    if items.len() <= cap {
        return None;
    }
    let count = items.len() - cap;
    let end = limit.evict_end();
    match end {
        End::Front => {
            items.drain(..count);
        }
        End::Back => items.truncate(cap),
    }
    Some(Evicted { count, end })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn positive_limit_drops_oldest_from_front() {
        let mut v: Vec<u32> = (1..=5).collect();
        let ev = enforce(&mut v, Limit(3)).unwrap();
        assert_eq!(ev, Evicted { count: 2, end: End::Front });
        assert_eq!(v, vec![3, 4, 5]);
    }

    #[test]
    fn negative_limit_drops_from_back() {
        let mut v: Vec<u32> = (1..=5).collect();
        let ev = enforce(&mut v, Limit(-2)).unwrap();
        assert_eq!(ev.end, End::Back);
        assert_eq!(v, vec![1, 2]);
    }

    #[test]
    fn unbounded_and_under_cap_are_untouched() {
        let mut v: Vec<u32> = (1..=5).collect();
        assert!(enforce(&mut v, Limit::UNBOUNDED).is_none());
        assert!(enforce(&mut v, Limit(5)).is_none());
        assert!(enforce(&mut v, Limit(-9)).is_none());
        assert_eq!(v.len(), 5);
    }
}
