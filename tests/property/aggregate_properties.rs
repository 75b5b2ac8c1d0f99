//! Property-based tests for aggregates: cached summaries must agree with a
//! brute-force pass over the records, before and after deletions.

use proptest::prelude::*;
use std::rc::Rc;
use strata::buckets::Buckets;
use strata::cache::{Cache, Layout, DEFAULT_PARTITIONS};
use strata::filter::Filter;
use strata::info::{Info, InfoAccumulator};
use strata::pool::FilePool;
use strata::record::Record;
use strata::source::VecSource;
use tempfile::TempDir;

const WEEK: i64 = 7 * 24 * 60 * 60;
const BASE: i64 = 1_600_000_000;

fn records() -> impl Strategy<Value = Vec<Record>> {
    prop::collection::vec(
        (0usize..3, 0usize..3, 0u64..5000, 0i64..4),
        1..40,
    )
    .prop_map(|specs| {
        let mut records: Vec<Record> = specs
            .into_iter()
            .enumerate()
            .map(|(i, (user, dataset, size, week))| {
                Record::new(
                    format!("d{}/f{:03}", dataset, i),
                    format!("d{}", dataset),
                    format!("user{}", user),
                    "staff",
                    size,
                    BASE + week * WEEK,
                    "-rw-r--r--",
                )
            })
            .collect();
        records.sort_by(|a, b| a.path().cmp(b.path()));
        records
    })
}

fn filters() -> impl Strategy<Value = Filter> {
    (
        prop::option::of(0usize..3),
        prop::option::of(0usize..3),
        prop::option::of(prop::sample::select(vec![0u64, 100, 1024, 4096])),
        prop::option::of(0i64..5),
    )
        .prop_map(|(user, dataset, size, before)| {
            let mut f = Filter::default();
            if let Some(u) = user {
                f = f.intersect(&Filter::owner(format!("user{}", u)));
            }
            if let Some(d) = dataset {
                f = f.intersect(&Filter::dataset(format!("d{}", d)));
            }
            if let Some(s) = size {
                f = f.intersect(&Filter::size_geq(s));
            }
            if let Some(w) = before {
                f = f.intersect(&Filter::modified_before(BASE + w * WEEK));
            }
            f
        })
}

fn brute_force<'a>(records: impl Iterator<Item = &'a Record>, filter: &Filter) -> Info {
    let mut total = Info::default();
    for r in records.filter(|r| filter.selects(r)) {
        total.add(Info::of(r));
    }
    total
}

fn cache(temp: &TempDir, records: Vec<Record>) -> Cache {
    Cache::new(
        "prop",
        temp.path().join("cache"),
        temp.path().join("deltas"),
        Layout::new(DEFAULT_PARTITIONS.to_vec(), Buckets::new(vec![1024])),
        Box::new(VecSource::new(records)),
        FilePool::new(),
    )
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    /// Filtered totals and selections agree with a linear scan.
    #[test]
    fn cached_totals_match_brute_force(records in records(), filter in filters()) {
        let temp = TempDir::new().unwrap();
        let c = cache(&temp, records.clone());
        c.update().unwrap();

        prop_assert_eq!(c.info(Some(&filter)).unwrap().total(), brute_force(records.iter(), &filter));

        let selected: Vec<String> = c.select(Some(&filter)).unwrap().map(|r| r.unwrap().path().to_string()).collect();
        let expected: Vec<String> = records
            .iter()
            .filter(|r| filter.selects(r))
            .map(|r| r.path().to_string())
            .collect();
        prop_assert_eq!(selected, expected);
    }

    /// Deleting records nets them out of every aggregate, in memory and
    /// after reopening from saved deltas.
    #[test]
    fn deletions_net_out(records in records(), filter in filters(), stride in 1usize..4) {
        let temp = TempDir::new().unwrap();
        let c = cache(&temp, records.clone());
        c.update().unwrap();

        let doomed: Vec<Record> = c.select(None).unwrap().step_by(stride).map(Result::unwrap).collect();
        for r in &doomed {
            c.delete(r).unwrap();
        }
        let survivors: Vec<&Record> = records
            .iter()
            .filter(|r| !doomed.iter().any(|d| d.path() == r.path()))
            .collect();

        let expected = brute_force(survivors.iter().copied(), &filter);
        prop_assert_eq!(c.info(Some(&filter)).unwrap().total(), expected);

        c.save_deletions().unwrap();
        let reopened = cache(&temp, vec![]);
        prop_assert_eq!(reopened.info(Some(&filter)).unwrap().total(), expected);
        prop_assert_eq!(reopened.info(None).unwrap().total(), brute_force(survivors.iter().copied(), &Filter::default()));
    }

    /// Removing a record undoes adding it.
    #[test]
    fn accumulate_then_remove_is_identity(records in records(), keep in 0usize..40) {
        let buckets = Rc::new(Buckets::new(vec![1024]));
        let keep = keep.min(records.len());

        let mut expected = InfoAccumulator::new(Rc::clone(&buckets));
        for r in &records[..keep] {
            expected.add(r);
        }
        let mut acc = InfoAccumulator::new(buckets);
        for r in &records {
            acc.add(r);
        }
        for r in &records[keep..] {
            acc.remove(r);
        }

        prop_assert_eq!(acc.total(), expected.total());
        prop_assert_eq!(acc.users(), expected.users());
        prop_assert_eq!(acc.datasets(), expected.datasets());
        let occupied = |a: &InfoAccumulator| -> Vec<(usize, Info)> {
            a.sizes().iter().enumerate().filter_map(|(i, s)| s.map(|s| (i, s))).collect()
        };
        prop_assert_eq!(occupied(&acc), occupied(&expected));
    }
}
