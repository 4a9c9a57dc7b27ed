//! Retention policy for dbvault
//!
//! Keeps the `max_count` most recent artifacts and selects everything older
//! for deletion.

/// Select the artifacts beyond the retention ceiling
///
/// `sorted_newest_first` must already be ordered newest first, as returned by
/// [`ArtifactStore::list`](super::ArtifactStore::list). Applying the result and
/// calling this again with the same `max_count` yields an empty selection.
pub fn select_for_deletion<T: Clone>(sorted_newest_first: &[T], max_count: usize) -> Vec<T> {
    sorted_newest_first.iter().skip(max_count).cloned().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keeps_newest() {
        let artifacts = vec!["e", "d", "c", "b", "a"];
        assert_eq!(select_for_deletion(&artifacts, 3), vec!["b", "a"]);
    }

    #[test]
    fn test_under_ceiling_deletes_nothing() {
        let artifacts = vec!["b", "a"];
        assert!(select_for_deletion(&artifacts, 2).is_empty());
        assert!(select_for_deletion(&artifacts, 10).is_empty());
        assert!(select_for_deletion::<&str>(&[], 0).is_empty());
    }

    #[test]
    fn test_zero_ceiling_deletes_everything() {
        let artifacts = vec!["c", "b", "a"];
        assert_eq!(select_for_deletion(&artifacts, 0), artifacts);
    }

    #[test]
    fn test_idempotent_after_applying() {
        let artifacts: Vec<u32> = (0..32).rev().collect();
        let doomed = select_for_deletion(&artifacts, 30);
        assert_eq!(doomed, vec![1, 0]);

        let remaining: Vec<u32> = artifacts
            .into_iter()
            .filter(|a| !doomed.contains(a))
            .collect();
        assert!(select_for_deletion(&remaining, 30).is_empty());
    }
}
