use trtree::{
    IndexConstraintType, IndexOptions, RTreeIndex, RowId, STBox, SpatialError, TYPE_NAME,
};
use trtree_int_test::test_util::{
    brute_force, cleanup, create_small_fanout_context, create_test_context,
    create_test_context_with, random_box, random_query, random_rows, run_test, sorted,
    whole_domain,
};

fn trip(x: f64, y: f64, size: f64, t: f64) -> STBox {
    STBox::xyt(x, y, x + size, y + size, t, t + 60.0)
}

#[test]
fn test_overlap_scenario() {
    run_test(
        create_test_context,
        |ctx| {
            let index = ctx.index();
            index.insert(&[
                (STBox::xyt(0.0, 0.0, 1.0, 1.0, 0.0, 10.0), 1),
                (STBox::xyt(5.0, 5.0, 6.0, 6.0, 0.0, 10.0), 2),
                (STBox::xyt(0.5, 0.5, 2.0, 2.0, 0.0, 10.0), 3),
            ])?;

            let found = sorted(index.search(&STBox::xyt(0.0, 0.0, 1.0, 1.0, 0.0, 10.0))?);
            assert_eq!(found, vec![1, 3]);
            assert!(!found.contains(&2));

            // same footprint, other time window
            let later = index.search(&STBox::xyt(0.0, 0.0, 1.0, 1.0, 20.0, 30.0))?;
            assert!(later.is_empty());
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_empty_index_scan() {
    run_test(
        create_test_context,
        |ctx| {
            let index = ctx.index();
            let mut scan = index.initialize_scan(&whole_domain())?;
            assert!(scan.is_exhausted());

            let mut out = Vec::new();
            assert_eq!(index.scan(&mut scan, &mut out)?, 0);
            assert!(out.is_empty());
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_scan_equals_search() {
    run_test(
        create_small_fanout_context,
        |ctx| {
            let index = ctx.index();
            let mut rng = ctx.rng();
            let rows = random_rows(&mut rng, 0, 3_000);
            index.insert(&rows)?;

            for _ in 0..50 {
                let query = random_query(&mut rng);
                let mut scan = index.initialize_scan(&query)?;
                let mut out = Vec::new();
                while index.scan(&mut scan, &mut out)? > 0 {}

                assert_eq!(sorted(out), brute_force(&rows, &query));
                assert_eq!(sorted(index.search(&query)?), brute_force(&rows, &query));
            }
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_random_batches_keep_invariants() {
    run_test(
        create_small_fanout_context,
        |ctx| {
            let index = ctx.index();
            let mut rng = ctx.rng();
            let mut live: Vec<(STBox, RowId)> = Vec::new();

            for round in 0..40 {
                let batch = random_rows(&mut rng, round * 100, 100);
                index.insert(&batch)?;
                live.extend(batch);

                let doomed: Vec<_> = live.drain(..live.len() / 3).collect();
                assert_eq!(index.delete(&doomed)?, doomed.len());
                for (bbox, row_id) in &doomed {
                    assert!(!index.search(bbox)?.contains(row_id));
                }

                index.verify_and_to_string(true)?;
                index.verify_allocations()?;
            }

            assert_eq!(index.len(), live.len());
            assert_eq!(
                sorted(index.search(&whole_domain())?),
                sorted(live.iter().map(|(_, id)| *id).collect())
            );
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_delete_absent_policy() {
    run_test(
        create_test_context,
        |ctx| {
            let index = ctx.index();
            index.insert(&[(trip(0.0, 0.0, 1.0, 0.0), 1)])?;

            // lenient by default: nothing removed, no error
            assert_eq!(index.delete(&[(trip(0.0, 0.0, 1.0, 0.0), 2)])?, 0);
            assert_eq!(index.delete(&[(trip(9.0, 9.0, 1.0, 0.0), 1)])?, 0);
            assert_eq!(index.len(), 1);
            Ok(())
        },
        cleanup,
    );

    run_test(
        || {
            create_test_context_with(
                IndexConstraintType::None,
                IndexOptions::from_pairs([("strict_delete", "yes")]),
            )
        },
        |ctx| {
            let index = ctx.index();
            index.insert(&[(trip(0.0, 0.0, 1.0, 0.0), 1), (trip(3.0, 3.0, 1.0, 0.0), 2)])?;

            let result = index.delete(&[(trip(0.0, 0.0, 1.0, 0.0), 1), (trip(0.0, 0.0, 1.0, 0.0), 2)]);
            assert!(matches!(result, Err(SpatialError::NotFound(_))));
            assert_eq!(index.len(), 2);
            assert_eq!(index.search(&trip(0.0, 0.0, 1.0, 0.0))?, vec![1]);
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_unique_constraint_is_recoverable() {
    run_test(
        || create_test_context_with(IndexConstraintType::Unique, IndexOptions::new()),
        |ctx| {
            let index = ctx.index();
            let mut rng = ctx.rng();
            index.insert(&random_rows(&mut rng, 0, 100))?;

            let clash = vec![(random_box(&mut rng), 1_000), (random_box(&mut rng), 42)];
            match index.insert(&clash) {
                Err(SpatialError::ConstraintViolation(message)) => {
                    assert_eq!(message, index.constraint_violation_message(42));
                }
                other => panic!("expected a constraint violation, got {:?}", other),
            }

            // the failed batch left nothing behind and the index stays usable
            assert_eq!(index.len(), 100);
            index.insert(&[(random_box(&mut rng), 1_000)])?;
            assert_eq!(index.len(), 101);
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_storage_info_restores_index() {
    run_test(
        create_small_fanout_context,
        |ctx| {
            let index = ctx.index();
            let mut rng = ctx.rng();
            let rows = random_rows(&mut rng, 0, 2_000);
            index.insert(&rows)?;
            index.delete(&rows[..500])?;

            let info = index.storage_info()?;
            let restored: RTreeIndex<4> =
                RTreeIndex::new(&info.name, IndexConstraintType::Unique, &IndexOptions::new(), Some(&info))?;

            assert_eq!(restored.len(), 1_500);
            assert_eq!(restored.stats(), index.stats());
            for _ in 0..20 {
                let query = random_query(&mut rng);
                assert_eq!(sorted(restored.search(&query)?), brute_force(&rows[500..], &query));
            }

            // corrupt one byte in the middle of the payload
            let mut damaged = info.clone();
            let middle = damaged.blob.len() / 2;
            damaged.blob[middle] ^= 0x40;
            let result = RTreeIndex::<4>::new(&info.name, IndexConstraintType::None, &IndexOptions::new(), Some(&damaged));
            assert!(matches!(result, Err(SpatialError::CorruptedIndex(_))));

            // a 2-d index cannot adopt a 4-d snapshot
            let result = RTreeIndex::<2>::new(&info.name, IndexConstraintType::None, &IndexOptions::new(), Some(&info));
            assert!(matches!(result, Err(SpatialError::InvalidArgument(_))));
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_merge_and_vacuum() {
    run_test(
        create_small_fanout_context,
        |ctx| {
            let index = ctx.index();
            let other: RTreeIndex<4> = RTreeIndex::new(
                "other",
                IndexConstraintType::None,
                &IndexOptions::from_pairs([("max_node_entries", "8")]),
                None,
            )?;
            let mut rng = ctx.rng();
            let mine = random_rows(&mut rng, 0, 800);
            let theirs = random_rows(&mut rng, 800, 400);
            index.insert(&mine)?;
            other.insert(&theirs)?;

            assert!(index.merge_indexes(&other)?);
            assert_eq!(index.len(), 1_200);
            assert_eq!(other.len(), 400);
            index.verify_and_to_string(true)?;

            index.delete(&mine)?;
            let before = index.fragmentation();
            let stats = index.vacuum()?;
            assert_eq!(stats.entries_reindexed, 400);
            assert!(stats.nodes_after <= stats.nodes_before);
            assert!(index.fragmentation().leaf_fill_percent >= before.leaf_fill_percent);
            assert_eq!(sorted(index.search(&whole_domain())?), (800..1_200).collect::<Vec<_>>());
            Ok(())
        },
        cleanup,
    )
}

#[test]
fn test_verify_report_names_index_type() {
    run_test(
        create_test_context,
        |ctx| {
            let index = ctx.index();
            let verdict = index.verify_and_to_string(true)?;
            assert!(verdict.starts_with(TYPE_NAME));

            index.insert(&[(trip(1.0, 1.0, 1.0, 0.0), 5)])?;
            let dump = index.verify_and_to_string(false)?;
            assert!(dump.contains("-> 5"));
            assert!(index.in_memory_size() > 0);
            Ok(())
        },
        cleanup,
    )
}
