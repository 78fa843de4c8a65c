use std::time::Instant;

use trtree::{IndexConstraintType, IndexOptions, RTreeIndex, RowId, STBox, SpatialResult};
use trtree_int_test::test_util::{init_logging, random_query, random_rows, whole_domain};

fn main() -> SpatialResult<()> {
    init_logging();
    println!("Starting stress test...");

    let count = 1_000_000;
    let mut rng = rand::thread_rng();
    let rows = random_rows(&mut rng, 0, count);
    let (boxes, row_ids): (Vec<STBox>, Vec<RowId>) = rows.iter().copied().unzip();

    let index: RTreeIndex<4> = RTreeIndex::new(
        "stress",
        IndexConstraintType::Primary,
        &IndexOptions::new(),
        None,
    )?;

    let start = Instant::now();
    index.bulk_construct(&boxes, &row_ids)?;
    println!("Bulk constructed {} boxes in {:?}", count, start.elapsed());

    let start = Instant::now();
    let mut matches = 0;
    for _ in 0..10_000 {
        matches += index.search(&random_query(&mut rng))?.len();
    }
    println!("10000 searches returned {} rows in {:?}", matches, start.elapsed());

    let start = Instant::now();
    let removed = index.delete(&rows[..count / 2])?;
    println!("Deleted {} boxes in {:?}", removed, start.elapsed());

    let start = Instant::now();
    let stats = index.vacuum()?;
    println!(
        "Vacuum: {} -> {} nodes, fill +{:.1}% in {:?}",
        stats.nodes_before,
        stats.nodes_after,
        stats.fill_factor_improvement,
        start.elapsed()
    );

    let remaining = index.search(&whole_domain())?.len();
    println!("{} boxes remain", remaining);
    println!("{}", index.verify_and_to_string(true)?);
    Ok(())
}
