use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Instant;
use trtree::{
    IndexConstraintType, IndexOptions, RTreeIndex, RowId, STBox, SpatialError, SpatialResult,
};

/// Side length of the square spatial domain used by the generators.
pub const DOMAIN: f64 = 1_000.0;
/// Length of the time axis used by the generators.
pub const TIME_SPAN: f64 = 86_400.0;

/// Initializes `env_logger` once per test binary.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Runs `test` against the context produced by `before`, always running
/// `after` on it, and panics with the first error encountered.
pub fn run_test<T, B, A>(before: B, test: T, after: A)
where
    B: Fn() -> SpatialResult<TestContext>,
    T: Fn(TestContext) -> SpatialResult<()>,
    A: Fn(TestContext) -> SpatialResult<()>,
{
    init_logging();
    let start_time = Instant::now();

    let ctx = match before() {
        Ok(ctx) => ctx,
        Err(e) => panic!("Before run failed: {:?}", e),
    };

    let result = catch_unwind(AssertUnwindSafe(|| test(ctx.clone())));
    let after_result = after(ctx);
    log::debug!("Test finished in {:?}", start_time.elapsed());

    match result {
        Ok(Ok(())) => {}
        Ok(Err(e)) => panic!("Test failed: {:?}", e),
        Err(panic) => std::panic::resume_unwind(panic),
    }
    if let Err(e) = after_result {
        panic!("After run failed: {:?}", e);
    }
}

#[derive(Clone)]
pub struct TestContext {
    index: RTreeIndex<4>,
    seed: u64,
}

impl TestContext {
    pub fn new(index: RTreeIndex<4>, seed: u64) -> Self {
        Self { index, seed }
    }

    pub fn index(&self) -> RTreeIndex<4> {
        self.index.clone()
    }

    /// A generator seeded identically on every call.
    pub fn rng(&self) -> StdRng {
        StdRng::seed_from_u64(self.seed)
    }
}

/// A context with an empty, non-unique index using default options.
pub fn create_test_context() -> SpatialResult<TestContext> {
    create_test_context_with(IndexConstraintType::None, IndexOptions::new())
}

/// A context with a small-fanout index, so that trees grow tall quickly.
pub fn create_small_fanout_context() -> SpatialResult<TestContext> {
    create_test_context_with(
        IndexConstraintType::None,
        IndexOptions::from_pairs([("max_node_entries", "8"), ("min_node_entries", "3")]),
    )
}

pub fn create_test_context_with(
    constraint: IndexConstraintType,
    options: IndexOptions,
) -> SpatialResult<TestContext> {
    let index = RTreeIndex::new("test_index", constraint, &options, None)?;
    Ok(TestContext::new(index, 0x5eed))
}

/// Drops the index and checks that it refuses further use.
pub fn cleanup(ctx: TestContext) -> SpatialResult<()> {
    let index = ctx.index();
    index.commit_drop()?;
    match index.search(&whole_domain()) {
        Err(SpatialError::Closed) => Ok(()),
        other => Err(SpatialError::InvalidOperation(format!(
            "dropped index still answers searches: {:?}",
            other
        ))),
    }
}

/// A box covering every box the generators produce.
pub fn whole_domain() -> STBox {
    STBox::xyt(-1.0, -1.0, DOMAIN + 100.0, DOMAIN + 100.0, -1.0, TIME_SPAN + 3_600.0)
}

/// A random trip box: a small spatial extent over a time window of up to an
/// hour.
pub fn random_box(rng: &mut impl Rng) -> STBox {
    let x = rng.gen_range(0.0..DOMAIN);
    let y = rng.gen_range(0.0..DOMAIN);
    let t = rng.gen_range(0.0..TIME_SPAN);
    STBox::xyt(
        x,
        y,
        x + rng.gen_range(0.0..10.0),
        y + rng.gen_range(0.0..10.0),
        t,
        t + rng.gen_range(0.0..3_600.0),
    )
}

/// A random query box, larger than the trip boxes.
pub fn random_query(rng: &mut impl Rng) -> STBox {
    let x = rng.gen_range(0.0..DOMAIN);
    let y = rng.gen_range(0.0..DOMAIN);
    let t = rng.gen_range(0.0..TIME_SPAN);
    STBox::xyt(x, y, x + 100.0, y + 100.0, t, t + 7_200.0)
}

/// `count` random boxes paired with row ids `first_id..`.
pub fn random_rows(rng: &mut impl Rng, first_id: RowId, count: usize) -> Vec<(STBox, RowId)> {
    (0..count)
        .map(|i| (random_box(rng), first_id + i as RowId))
        .collect()
}

/// Row ids of `rows` whose box overlaps `query`, sorted.
pub fn brute_force(rows: &[(STBox, RowId)], query: &STBox) -> Vec<RowId> {
    let mut ids: Vec<RowId> = rows
        .iter()
        .filter(|(bbox, _)| bbox.overlaps(query))
        .map(|(_, id)| *id)
        .collect();
    ids.sort_unstable();
    ids
}

pub fn sorted(mut ids: Vec<RowId>) -> Vec<RowId> {
    ids.sort_unstable();
    ids
}
