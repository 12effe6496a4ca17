//! Batch-scoped deduplication by natural key
//!
//! Cross-run uniqueness is the writer's job (`ON CONFLICT DO NOTHING`);
//! this only collapses repeats inside one dataset's record set.

use crate::entities::Entity;
use std::collections::HashSet;
use std::hash::Hash;

/// Keep the first record for each key, preserving input order. Returns the
/// survivors and the number of later duplicates dropped.
pub fn first_wins<T, K, F>(records: Vec<T>, mut key: F) -> (Vec<T>, usize)
where
    K: Eq + Hash,
    F: FnMut(&T) -> K,
{
    let mut seen = HashSet::with_capacity(records.len());
    let total = records.len();
    let unique: Vec<T> = records
        .into_iter()
        .filter(|record| seen.insert(key(record)))
        .collect();
    let dropped = total - unique.len();
    (unique, dropped)
}

pub fn dedup_entities(records: Vec<Entity>) -> (Vec<Entity>, usize) {
    first_wins(records, |e| e.natural_key().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::Provider;

    fn provider(id: &str, specialty: &str) -> Entity {
        Entity::Provider(Provider {
            provider_id: id.to_string(),
            specialty: Some(specialty.to_string()),
        })
    }

    #[test]
    fn test_first_seen_specialty_wins() {
        let records = vec![
            provider("111", "Cardiology"),
            provider("111", "Internal Medicine"),
            provider("222", "Dermatology"),
        ];
        let (unique, dropped) = dedup_entities(records);

        assert_eq!(dropped, 1);
        assert_eq!(unique.len(), 2);
        assert_eq!(unique[0], provider("111", "Cardiology"));
        assert_eq!(unique[1], provider("222", "Dermatology"));
    }

    #[test]
    fn test_order_preserved() {
        let (unique, dropped) = first_wins(vec![3, 1, 3, 2, 1], |n| *n);
        assert_eq!(unique, vec![3, 1, 2]);
        assert_eq!(dropped, 2);
    }

    #[test]
    fn test_empty_batch() {
        let (unique, dropped) = dedup_entities(Vec::new());
        assert!(unique.is_empty());
        assert_eq!(dropped, 0);
    }
}
