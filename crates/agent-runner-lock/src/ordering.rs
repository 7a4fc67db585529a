/// Sort lock keys lexicographically so that acquiring multiple per-repo
/// locks in this order precludes deadlock (spec.md §4.1: "Acquiring
/// multiple per-repo locks uses deterministic lexicographic order").
pub fn lock_keys_in_order(mut keys: Vec<String>) -> Vec<String> {
    keys.sort();
    keys.dedup();
    keys
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_sorted_and_deduplicated() {
        let keys = vec!["b--repo".to_string(), "a--repo".to_string(), "b--repo".to_string()];
        assert_eq!(
            lock_keys_in_order(keys),
            vec!["a--repo".to_string(), "b--repo".to_string()]
        );
    }
}
