#![cfg(test)]

use std::sync::Arc;

use rstest::rstest;
use tether::ops::{
    self, DropDuplicatesOptions, GroupByOptions, JoinOptions, PivotOptions, Renormalization,
    SampleOptions, SortOptions,
};
use tether::{Session, TableHandle};
use tether_array::arrays::{CategoricalArray, NullableArray, PrimitiveArray, VarBinArray};
use tether_array::{Array, IntoArray};
use tether_buffer::Bitmap;
use tether_dtype::{CategoricalDType, DType, PType};
use tether_native::{AggFunc, Keep, ReferenceEngine, ReferenceEngineOptions};

fn session_with(options: ReferenceEngineOptions) -> (Arc<ReferenceEngine>, Session) {
    let engine = Arc::new(ReferenceEngine::new(options));
    let session = Session::new(engine.clone());
    (engine, session)
}

fn session() -> (Arc<ReferenceEngine>, Session) {
    session_with(ReferenceEngineOptions::default())
}

fn i64s(values: &[i64]) -> Array {
    PrimitiveArray::from(values.to_vec()).into_array()
}

fn f64s(values: &[f64]) -> Array {
    PrimitiveArray::from(values.to_vec()).into_array()
}

fn strings(values: &[Option<&str>]) -> Array {
    VarBinArray::from_strs(values.iter().copied()).into_array()
}

fn table_of(session: &Session, arrays: &[Array]) -> TableHandle {
    let columns = arrays
        .iter()
        .map(|array| session.encode(array, &array.dtype()).unwrap())
        .collect();
    session.to_table(columns).unwrap()
}

fn columns_of(session: &Session, table: TableHandle, dtypes: &[DType]) -> Vec<Array> {
    let handles = session.from_table(table).unwrap();
    assert_eq!(handles.len(), dtypes.len());
    handles
        .iter()
        .zip(dtypes)
        .map(|(handle, dtype)| session.decode(handle, dtype).unwrap())
        .collect()
}

#[rstest]
#[case(vec![true], vec![false], vec![1, 2, 3], vec![Some("b"), Some("c"), Some("a")])]
#[case(vec![false], vec![false], vec![3, 2, 1], vec![Some("a"), Some("c"), Some("b")])]
fn sort_reorders_every_column(
    #[case] ascending: Vec<bool>,
    #[case] na_last: Vec<bool>,
    #[case] keys: Vec<i64>,
    #[case] values: Vec<Option<&str>>,
) {
    let (engine, session) = session();
    let input = table_of(&session, &[i64s(&[3, 1, 2]), strings(&[Some("a"), Some("b"), Some("c")])]);
    let options = SortOptions {
        ascending,
        na_last,
        is_parallel: false,
    };
    let sorted = ops::sort_values(&input, &options).unwrap();
    let columns = columns_of(&session, sorted, &[DType::Primitive(PType::I64), DType::Utf8]);
    assert_eq!(columns, vec![i64s(&keys), strings(&values)]);

    // The input survives the operation.
    let again = columns_of(&session, input, &[DType::Primitive(PType::I64), DType::Utf8]);
    assert_eq!(again[0], i64s(&[3, 1, 2]));
    assert_eq!(engine.live_tables(), 0);
}

#[test]
fn sort_options_must_agree() {
    let (engine, session) = session();
    let input = table_of(&session, &[i64s(&[1])]);
    let calls = engine.native_calls();
    let options = SortOptions {
        ascending: vec![true, true],
        na_last: vec![true],
        is_parallel: false,
    };
    assert!(ops::sort_values(&input, &options).is_err());
    assert_eq!(engine.native_calls(), calls);
}

#[test]
fn nulls_sort_last_when_asked() {
    let (_, session) = session();
    let keys = NullableArray::from_option_iter([Some(2i32), None, Some(1)]).into_array();
    let input = table_of(&session, &[keys.clone()]);
    let options = SortOptions {
        ascending: vec![true],
        na_last: vec![true],
        is_parallel: false,
    };
    let sorted = ops::sort_values(&input, &options).unwrap();
    let columns = columns_of(&session, sorted, &[keys.dtype()]);
    assert_eq!(
        columns[0],
        NullableArray::from_option_iter([Some(1i32), Some(2), None]).into_array()
    );
}

#[test]
fn inner_join_matches_keys() {
    let (_, session) = session();
    let left = table_of(&session, &[i64s(&[1, 2, 3]), f64s(&[10.0, 20.0, 30.0])]);
    let right = table_of(
        &session,
        &[i64s(&[4, 3, 2]), strings(&[Some("d"), Some("c"), Some("b")])],
    );
    let options = JoinOptions {
        n_keys: 1,
        n_data_left: 1,
        n_data_right: 1,
        is_join: true,
        ..Default::default()
    };
    let joined = ops::hash_join(&left, &right, &options).unwrap();
    let columns = columns_of(
        &session,
        joined,
        &[
            DType::Primitive(PType::I64),
            DType::Primitive(PType::F64),
            DType::Primitive(PType::I64),
            DType::Utf8,
        ],
    );
    assert_eq!(
        columns,
        vec![
            i64s(&[2, 3]),
            f64s(&[20.0, 30.0]),
            i64s(&[2, 3]),
            strings(&[Some("b"), Some("c")]),
        ]
    );
}

#[test]
fn left_join_with_indicator() {
    let (_, session) = session();
    let left = table_of(&session, &[i64s(&[1, 2])]);
    let right = table_of(&session, &[i64s(&[2, 5])]);
    let options = JoinOptions {
        n_keys: 1,
        is_left: true,
        is_join: true,
        indicator: true,
        ..Default::default()
    };
    let joined = ops::hash_join(&left, &right, &options).unwrap();
    let merge = CategoricalDType::new(
        vec!["left_only".into(), "right_only".into(), "both".into()].into(),
        false,
    );
    let columns = columns_of(
        &session,
        joined,
        &[
            DType::Primitive(PType::I64),
            DType::nullable(PType::I64),
            DType::Categorical(merge.clone()),
        ],
    );
    assert_eq!(columns[0], i64s(&[1, 2]));
    assert_eq!(
        columns[1],
        NullableArray::from_option_iter([None, Some(2i64)]).into_array()
    );
    assert_eq!(
        columns[2],
        CategoricalArray::from_labels([Some("left_only"), Some("both")], merge)
            .unwrap()
            .into_array()
    );
}

#[test]
fn join_rejects_conditions() {
    let (_, session) = session();
    let left = table_of(&session, &[i64s(&[1])]);
    let right = table_of(&session, &[i64s(&[1])]);
    let options = JoinOptions {
        n_keys: 1,
        left_cond_columns: vec![0],
        ..Default::default()
    };
    let err = ops::hash_join(&left, &right, &options).unwrap_err();
    assert!(err.is_native(), "{err}");
}

#[test]
fn join_requires_one_engine() {
    let (_, session) = session();
    let (_, other) = session_with(ReferenceEngineOptions::default());
    let left = table_of(&session, &[i64s(&[1])]);
    let right = table_of(&other, &[i64s(&[1])]);
    let options = JoinOptions {
        n_keys: 1,
        ..Default::default()
    };
    assert!(ops::hash_join(&left, &right, &options).is_err());
}

#[test]
fn groupby_aggregates_in_first_appearance_order() {
    let (_, session) = session();
    let input = table_of(
        &session,
        &[
            strings(&[Some("b"), Some("a"), Some("b"), Some("a")]),
            i64s(&[1, 2, 3, 4]),
        ],
    );
    let options = GroupByOptions {
        n_keys: 1,
        funcs: vec![vec![AggFunc::Sum, AggFunc::Mean]],
        skipdropna: true,
        return_keys: true,
        dropna: true,
        ..Default::default()
    };
    let grouped = ops::groupby_and_aggregate(&input, &options).unwrap();
    let columns = columns_of(
        &session,
        grouped,
        &[
            DType::Utf8,
            DType::Primitive(PType::I64),
            DType::Primitive(PType::F64),
        ],
    );
    assert_eq!(
        columns,
        vec![
            strings(&[Some("b"), Some("a")]),
            i64s(&[4, 6]),
            f64s(&[2.0, 3.0]),
        ]
    );
}

#[test]
fn groupby_rejects_unsupported_functions() {
    let (engine, session) = session();
    let input = table_of(&session, &[i64s(&[1]), i64s(&[1])]);
    let options = GroupByOptions {
        n_keys: 1,
        funcs: vec![vec![AggFunc::Cumsum]],
        ..Default::default()
    };
    let err = ops::groupby_and_aggregate(&input, &options).unwrap_err();
    assert!(err.is_native(), "{err}");
    drop(input);
    assert_eq!(engine.live_tables(), 0);
}

#[test]
fn crosstab_counts_pivot_values() {
    let (_, session) = session();
    let input = table_of(
        &session,
        &[
            i64s(&[1, 1, 2, 1]),
            strings(&[Some("x"), Some("y"), Some("x"), Some("x")]),
        ],
    );
    let dispatch = table_of(&session, &[strings(&[Some("x"), Some("y")])]);
    let options = PivotOptions {
        n_keys: 1,
        is_crosstab: true,
        return_keys: true,
        ..Default::default()
    };
    let pivoted = ops::pivot_groupby_and_aggregate(&input, &dispatch, &options).unwrap();
    let columns = columns_of(
        &session,
        pivoted,
        &[
            DType::Primitive(PType::I64),
            DType::Primitive(PType::I64),
            DType::Primitive(PType::I64),
        ],
    );
    assert_eq!(columns, vec![i64s(&[1, 2]), i64s(&[2, 1]), i64s(&[1, 0])]);
}

#[rstest]
#[case(Keep::First, vec![1, 2], vec![10.0, 20.0])]
#[case(Keep::Last, vec![1, 2], vec![30.0, 20.0])]
#[case(Keep::None, vec![2], vec![20.0])]
fn drop_duplicates_keeps(#[case] keep: Keep, #[case] keys: Vec<i64>, #[case] values: Vec<f64>) {
    let (_, session) = session();
    let input = table_of(&session, &[i64s(&[1, 2, 1]), f64s(&[10.0, 20.0, 30.0])]);
    let options = DropDuplicatesOptions {
        n_keys: 1,
        keep,
        ..Default::default()
    };
    let deduped = ops::drop_duplicates(&input, &options).unwrap();
    let columns = columns_of(
        &session,
        deduped,
        &[DType::Primitive(PType::I64), DType::Primitive(PType::F64)],
    );
    let mut rows = columns[0]
        .clone()
        .into_rows()
        .into_iter()
        .zip(columns[1].clone().into_rows())
        .collect::<Vec<_>>();
    rows.sort_by(|a, b| a.0.total_cmp(&b.0));
    assert_eq!(
        rows,
        keys.iter()
            .map(|&k| k as f64)
            .zip(values)
            .collect::<Vec<_>>()
    );
}

trait IntoRows {
    fn into_rows(self) -> Vec<f64>;
}

impl IntoRows for Array {
    fn into_rows(self) -> Vec<f64> {
        match self {
            Array::Primitive(a) => (0..a.len()).map(|i| a.value_f64(i)).collect(),
            other => panic!("expected a primitive array, found {}", other.dtype()),
        }
    }
}

#[rstest]
#[case(SampleOptions { n: 2, ..Default::default() }, 2)]
#[case(SampleOptions { frac: Some(0.5), ..Default::default() }, 2)]
#[case(SampleOptions { n: 6, replace: true, ..Default::default() }, 6)]
fn sample_sizes(#[case] options: SampleOptions, #[case] expected: usize) {
    let (_, session) = session();
    let input = table_of(&session, &[i64s(&[1, 2, 3, 4])]);
    let sampled = ops::sample(&input, &options).unwrap();
    let columns = columns_of(&session, sampled, &[DType::Primitive(PType::I64)]);
    assert_eq!(columns[0].len(), expected);
}

#[test]
fn negative_fraction_is_rejected() {
    let (engine, session) = session();
    let input = table_of(&session, &[i64s(&[1])]);
    let calls = engine.native_calls();
    let options = SampleOptions {
        frac: Some(-0.1),
        ..Default::default()
    };
    assert!(ops::sample(&input, &options).is_err());
    assert_eq!(engine.native_calls(), calls);
}

#[test]
fn shuffle_and_reverse() {
    let (engine, session) = session_with(ReferenceEngineOptions::default().with_num_ranks(3));
    let keys = i64s(&[5, 1, 4, 2, 3, 6, 0]);
    let input = table_of(&session, &[keys.clone(), strings(&[Some("a"); 7])]);

    let shuffled = ops::shuffle_table(&input, 1, true, true).unwrap();
    let info = ops::get_shuffle_info(&shuffled).unwrap().unwrap();
    let restored = ops::reverse_shuffle(&shuffled, &info).unwrap();
    info.delete_shuffle_metadata().unwrap();

    let columns = columns_of(&session, restored, &[DType::Primitive(PType::I64), DType::Utf8]);
    assert_eq!(columns[0], keys);
    drop((input, shuffled));
    assert_eq!(engine.live_tables(), 0);
    assert_eq!(engine.live_arrays(), 0);
}

#[test]
fn shuffle_without_metadata() {
    let (_, session) = session();
    let input = table_of(&session, &[i64s(&[1, 2])]);
    let shuffled = ops::shuffle_table(&input, 1, false, false).unwrap();
    assert!(ops::get_shuffle_info(&shuffled).unwrap().is_none());
}

#[rstest]
#[case(Renormalization::InPlace)]
#[case(Renormalization::Random)]
#[case(Renormalization::Seeded(7))]
fn renormalization_keeps_rows(#[case] order: Renormalization) {
    let (_, session) = session();
    let input = table_of(&session, &[i64s(&[1, 2, 3, 4, 5])]);
    let out = ops::shuffle_renormalization(&input, order, true).unwrap();
    let mut rows = columns_of(&session, out, &[DType::Primitive(PType::I64)])
        .remove(0)
        .into_rows();
    if order == Renormalization::InPlace {
        assert_eq!(rows, vec![1.0, 2.0, 3.0, 4.0, 5.0]);
    }
    rows.sort_by(f64::total_cmp);
    assert_eq!(rows, vec![1.0, 2.0, 3.0, 4.0, 5.0]);
}

#[test]
fn isin_flags_members() {
    let (_, session) = session();
    let input = session.encode(&i64s(&[1, 5, 3]), &DType::Primitive(PType::I64)).unwrap();
    let values = session.encode(&i64s(&[3, 4, 1]), &DType::Primitive(PType::I64)).unwrap();
    let out = ops::isin(&input, 3, &values, false).unwrap();
    assert_eq!(
        session.decode(&out, &DType::Primitive(PType::Bool)).unwrap(),
        PrimitiveArray::from_bools([true, false, true]).into_array()
    );
}

#[rstest]
#[case(true, [true, false, false])]
#[case(false, [true, true, false])]
fn regex_search(#[case] case_sensitive: bool, #[case] matched: [bool; 3]) {
    let (_, session) = session();
    let input = strings(&[Some("apple"), Some("APPLE"), Some("pear"), None]);
    let handle = session.encode(&input, &DType::Utf8).unwrap();
    let out = ops::search_regex(&handle, 4, "^app", case_sensitive).unwrap();

    let expected = NullableArray::try_new(
        PrimitiveArray::from_bools([matched[0], matched[1], matched[2], false]),
        Bitmap::from_iter([true, true, true, false]),
    )
    .unwrap()
    .into_array();
    assert_eq!(
        session.decode(&out, &DType::nullable(PType::Bool)).unwrap(),
        expected
    );
}

#[test]
fn invalid_pattern_fails_natively() {
    let (engine, session) = session();
    let handle = session
        .encode(&strings(&[Some("a")]), &DType::Utf8)
        .unwrap();
    let err = ops::search_regex(&handle, 1, "(", true).unwrap_err();
    assert!(err.is_native(), "{err}");
    drop(handle);
    assert_eq!(engine.live_arrays(), 0);
}

#[test]
fn allocated_outputs_start_empty() {
    let (_, session) = session();
    let zeros = session.alloc_numpy(2, PType::I32).unwrap();
    assert_eq!(
        session.decode(&zeros, &DType::Primitive(PType::I32)).unwrap(),
        PrimitiveArray::from(vec![0i32, 0]).into_array()
    );
    let nulls = session.alloc_nullable_array(2, PType::F64).unwrap();
    let Array::Nullable(nulls) = session.decode(&nulls, &DType::nullable(PType::F64)).unwrap()
    else {
        panic!("expected a nullable array");
    };
    assert_eq!(nulls.validity().null_count(), 2);
}

#[test]
fn allocated_strings_are_null() {
    let (_, session) = session();
    let handle = session.alloc_string_array(3, 8).unwrap();
    let Array::VarBin(strings) = session.decode(&handle, &DType::Utf8).unwrap() else {
        panic!("expected a string array");
    };
    assert_eq!(strings.len(), 3);
    assert_eq!(strings.validity().null_count(), 3);
    assert_eq!(strings.end_offset(), 0);
}

#[test]
fn renormalization_within_a_rank_group() {
    let (engine, session) = session_with(ReferenceEngineOptions::default().with_num_ranks(3));
    let input = table_of(&session, &[i64s(&[1, 2, 3, 4])]);
    let out = ops::shuffle_renormalization_group(&input, Renormalization::InPlace, true, &[0, 2])
        .unwrap();
    let rows = columns_of(&session, out, &[DType::Primitive(PType::I64)])
        .remove(0)
        .into_rows();
    assert_eq!(rows, vec![1.0, 2.0, 3.0, 4.0]);
    drop(input);
    assert_eq!(engine.live_tables(), 0);
}

#[rstest]
#[case::out_of_range(vec![0, 3])]
#[case::repeated(vec![1, 1])]
fn bad_rank_groups_fail_natively(#[case] ranks: Vec<i32>) {
    let (engine, session) = session_with(ReferenceEngineOptions::default().with_num_ranks(3));
    let input = table_of(&session, &[i64s(&[1, 2])]);
    let err = ops::shuffle_renormalization_group(&input, Renormalization::Random, true, &ranks)
        .unwrap_err();
    assert!(err.is_native(), "{err}");
    drop(input);
    assert_eq!(engine.live_tables(), 0);
    assert_eq!(engine.live_arrays(), 0);
}

#[test]
fn empty_rank_group_is_rejected_before_the_call() {
    let (engine, session) = session();
    let input = table_of(&session, &[i64s(&[1])]);
    let calls = engine.native_calls();
    let err = ops::shuffle_renormalization_group(&input, Renormalization::InPlace, false, &[])
        .unwrap_err();
    assert!(!err.is_native(), "{err}");
    assert_eq!(engine.native_calls(), calls);
}

#[rstest]
#[case::dropped(true, vec![0, -1, 0, 1, -1], vec![0, 2, 3, 1, 4], 2)]
#[case::kept(false, vec![0, 1, 0, 2, 1], vec![0, 2, 1, 4, 3], 3)]
fn groupby_labels_number_groups_by_first_appearance(
    #[case] dropna: bool,
    #[case] labels: Vec<i64>,
    #[case] sort_idx: Vec<i64>,
    #[case] ngroups: usize,
) {
    let (_, session) = session();
    let keys = strings(&[Some("b"), None, Some("b"), Some("a"), None]);
    let table = table_of(&session, &[keys]);
    let out = ops::get_groupby_labels(&table, dropna, false).unwrap();
    assert_eq!(
        out,
        ops::GroupLabels {
            labels,
            sort_idx,
            ngroups
        }
    );
}
