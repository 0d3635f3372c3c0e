//! Overlap accumulation tests.

#[cfg(test)]
mod tests {
    use crate::compaction::{CompactionError, OverlapStats, accumulate};
    use crate::registry::{Registry, TableRecord};
    use rand::Rng;

    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }

    fn counts(registry: &Registry, id: &str) -> (u64, u64) {
        let t = registry
            .tables()
            .iter()
            .find(|t| t.identifier == id)
            .unwrap();
        (t.live_count, t.tombstone_count)
    }

    /// # Scenario
    /// Disjoint key ranges never exchange counts.
    ///
    /// # Expected behavior
    /// Every table keeps its original counts and the window never holds
    /// more than nothing at admission time.
    #[test]
    fn disjoint_tables_are_untouched() {
        init_tracing();
        let mut registry = Registry::new();
        registry.add(TableRecord::new("c", 1, "g", "h", 3, 1));
        registry.add(TableRecord::new("a", 1, "a", "b", 5, 2));
        registry.add(TableRecord::new("b", 1, "c", "f", 7, 0));
        registry.sort_by_min_key();

        let stats = accumulate(&mut registry).unwrap();

        assert_eq!(counts(&registry, "a"), (5, 2));
        assert_eq!(counts(&registry, "b"), (7, 0));
        assert_eq!(counts(&registry, "c"), (3, 1));
        assert_eq!(
            stats,
            OverlapStats {
                tables: 3,
                propagations: 0,
                evictions: 2,
                max_window: 0,
            }
        );
    }

    /// # Scenario
    /// One table's range fully contains another's.
    ///
    /// # Expected behavior
    /// - The container absorbs the contained table's counts.
    /// - The contained table keeps only its own counts.
    #[test]
    fn contained_table_propagates_into_container_only() {
        init_tracing();
        let mut registry = Registry::new();
        registry.add(TableRecord::new("inner", 1, "c", "d", 2, 3));
        registry.add(TableRecord::new("outer", 1, "a", "z", 4, 1));
        registry.sort_by_min_key();

        accumulate(&mut registry).unwrap();

        assert_eq!(counts(&registry, "outer"), (6, 4));
        assert_eq!(counts(&registry, "inner"), (2, 3));
    }

    #[test]
    fn touching_ranges_overlap() {
        let mut registry = Registry::new();
        registry.add(TableRecord::new("left", 1, "a", "m", 1, 0));
        registry.add(TableRecord::new("right", 1, "m", "z", 0, 1));
        registry.sort_by_min_key();

        accumulate(&mut registry).unwrap();
        assert_eq!(counts(&registry, "left"), (1, 1));
        assert_eq!(counts(&registry, "right"), (0, 1));
    }

    #[test]
    fn earlier_table_does_not_receive_from_table_it_ended_before() {
        // "long" starts before "short" ends, but "short" starts first:
        // propagation only runs from later-starting tables.
        let mut registry = Registry::new();
        registry.add(TableRecord::new("short", 1, "a", "c", 1, 1));
        registry.add(TableRecord::new("long", 1, "b", "z", 10, 10));
        registry.add(TableRecord::new("tail", 1, "x", "y", 100, 0));
        registry.sort_by_min_key();

        accumulate(&mut registry).unwrap();

        assert_eq!(counts(&registry, "short"), (11, 11));
        assert_eq!(counts(&registry, "long"), (110, 10));
        assert_eq!(counts(&registry, "tail"), (100, 0));
    }

    #[test]
    fn only_original_counts_are_propagated() {
        // a ⊃ b ⊃ c: a must receive b and c once each, not c twice via b.
        let mut registry = Registry::new();
        registry.add(TableRecord::new("a", 1, "a", "z", 1, 0));
        registry.add(TableRecord::new("b", 1, "b", "y", 10, 0));
        registry.add(TableRecord::new("c", 1, "c", "x", 100, 0));
        registry.sort_by_min_key();

        let stats = accumulate(&mut registry).unwrap();

        assert_eq!(counts(&registry, "a"), (111, 0));
        assert_eq!(counts(&registry, "b"), (110, 0));
        assert_eq!(counts(&registry, "c"), (100, 0));
        assert_eq!(stats.propagations, 3);
        assert_eq!(stats.max_window, 2);
    }

    #[test]
    fn sequence_index_is_min_key_position() {
        let mut registry = Registry::new();
        registry.add(TableRecord::new("second", 1, "m", "n", 1, 0));
        registry.add(TableRecord::new("first", 1, "a", "b", 1, 0));
        registry.sort_by_min_key();
        assert!(registry.tables().iter().all(|t| t.sequence_index().is_none()));

        accumulate(&mut registry).unwrap();

        let positions: Vec<_> = registry
            .tables()
            .iter()
            .map(|t| (t.identifier.as_str(), t.sequence_index()))
            .collect();
        assert_eq!(positions, [("first", Some(0)), ("second", Some(1))]);
    }

    #[test]
    fn empty_tables_contribute_nothing() {
        let mut registry = Registry::new();
        registry.add(TableRecord::new("empty", 48, "", "", 0, 0));
        registry.add(TableRecord::new("full", 90, "a", "c", 4, 5));
        registry.add(TableRecord::new("inner", 90, "b", "b", 1, 1));
        registry.sort_by_min_key();

        accumulate(&mut registry).unwrap();

        assert_eq!(counts(&registry, "empty"), (0, 0));
        assert_eq!(counts(&registry, "full"), (5, 6));
    }

    #[test]
    fn aggregate_totals_are_unchanged() {
        let mut registry = Registry::new();
        registry.add(TableRecord::new("a", 10, "a", "z", 1, 2));
        registry.add(TableRecord::new("b", 20, "b", "c", 3, 4));
        registry.sort_by_min_key();
        let before = registry.stats();

        accumulate(&mut registry).unwrap();
        assert_eq!(registry.stats(), before);
    }

    #[test]
    fn empty_registry_accumulates_to_nothing() {
        let mut registry = Registry::new();
        registry.sort_by_min_key();
        let stats = accumulate(&mut registry).unwrap();
        assert_eq!(stats, OverlapStats::default());
        assert!(registry.is_accumulated());
    }

    #[test]
    fn requires_min_key_order() {
        let mut registry = Registry::new();
        registry.add(TableRecord::new("a", 1, "a", "b", 1, 0));
        assert_eq!(
            accumulate(&mut registry),
            Err(CompactionError::NotSortedByMinKey)
        );

        registry.sort_by_total_count_descending();
        assert_eq!(
            accumulate(&mut registry),
            Err(CompactionError::NotSortedByMinKey)
        );

        registry.sort_by_min_key();
        registry.add(TableRecord::new("b", 1, "0", "1", 1, 0));
        assert_eq!(
            accumulate(&mut registry),
            Err(CompactionError::NotSortedByMinKey)
        );
        assert!(!registry.is_accumulated());
    }

    #[test]
    fn refuses_to_run_twice() {
        let mut registry = Registry::new();
        registry.add(TableRecord::new("a", 1, "a", "z", 1, 0));
        registry.add(TableRecord::new("b", 1, "b", "c", 1, 0));
        registry.sort_by_min_key();

        accumulate(&mut registry).unwrap();
        assert_eq!(
            accumulate(&mut registry),
            Err(CompactionError::AlreadyAccumulated)
        );
        assert_eq!(counts(&registry, "a"), (2, 0));
    }

    /// # Scenario
    /// A table is added after the sweep has run.
    ///
    /// # Expected behavior
    /// - Earlier records keep their folded counts, the new one its own.
    /// - The registry stays marked as accumulated, so no second sweep runs
    ///   even once it is sorted again.
    #[test]
    fn add_after_accumulation_keeps_registry_accumulated() {
        let mut registry = Registry::new();
        registry.add(TableRecord::new("a", 1, "a", "z", 1, 0));
        registry.add(TableRecord::new("b", 1, "b", "c", 1, 0));
        registry.sort_by_min_key();
        accumulate(&mut registry).unwrap();

        registry.add(TableRecord::new("late", 1, "d", "e", 5, 5));
        assert!(registry.is_accumulated());
        assert_eq!(counts(&registry, "a"), (2, 0));
        assert_eq!(counts(&registry, "late"), (5, 5));
        let late = registry.tables().iter().find(|t| t.identifier == "late").unwrap();
        assert_eq!(late.sequence_index(), None);

        registry.sort_by_min_key();
        assert_eq!(
            accumulate(&mut registry),
            Err(CompactionError::AlreadyAccumulated)
        );
        assert_eq!(counts(&registry, "a"), (2, 0));
    }

    fn random_key(rng: &mut impl Rng) -> Vec<u8> {
        let len = rng.random_range(1..3);
        (0..len).map(|_| rng.random_range(b'a'..=b'j')).collect()
    }

    /// # Scenario
    /// Random registries compared against a quadratic reference.
    ///
    /// # Expected behavior
    /// Table `T` ends with its own counts plus the original counts of every
    /// later table `U` (in min-key order) with `U.min_key <= T.max_key`.
    /// Counts never decrease, and the sum grows by exactly one addition per
    /// overlapping forward pair.
    #[test]
    fn sweep_matches_pairwise_reference() {
        init_tracing();
        let mut rng = rand::rng();
        for _ in 0..200 {
            let mut registry = Registry::new();
            for i in 0..rng.random_range(0..40) {
                let (a, b) = (random_key(&mut rng), random_key(&mut rng));
                let (min, max) = if a <= b { (a, b) } else { (b, a) };
                let live = rng.random_range(0..1000);
                let tomb = rng.random_range(0..1000);
                registry.add(TableRecord::new(format!("t{i}"), 1, min, max, live, tomb));
            }
            registry.sort_by_min_key();
            let original: Vec<TableRecord> = registry.tables().to_vec();

            let stats = accumulate(&mut registry).unwrap();

            let mut pairs = 0u64;
            let mut extra = 0u64;
            for (t, table) in original.iter().enumerate() {
                let mut live = table.live_count;
                let mut tomb = table.tombstone_count;
                for later in &original[t + 1..] {
                    if later.min_key <= table.max_key {
                        live += later.live_count;
                        tomb += later.tombstone_count;
                        pairs += 1;
                        extra += later.total_count();
                    }
                }
                let got = &registry.tables()[t];
                assert_eq!(got.identifier, table.identifier);
                assert_eq!((got.live_count, got.tombstone_count), (live, tomb));
                assert!(got.total_count() >= table.total_count());
            }

            let before: u64 = original.iter().map(TableRecord::total_count).sum();
            let after: u64 = registry.tables().iter().map(TableRecord::total_count).sum();
            assert_eq!(after, before + extra);
            assert_eq!(stats.propagations, pairs);
        }
    }
}
