#![cfg(test)]

use std::sync::Arc;

use rstest::rstest;
use tether::{Session, SessionOptions, buffers_of, lengths_of, num_buffers, num_lengths, tags_of};
use tether_array::arrays::{
    CategoricalArray, DatetimeTzArray, DecimalArray, DictArray, IntervalArray, ListArray,
    MapArray, NullableArray, PrimitiveArray, StructArray, VarBinArray,
};
use tether_array::{Array, IntoArray};
use tether_buffer::{Bitmap, Buffer, ByteBuffer};
use tether_dtype::{CategoricalDType, DType, DecimalDType, PType};
use tether_native::ReferenceEngine;

fn session() -> (Arc<ReferenceEngine>, Session) {
    let engine = Arc::new(ReferenceEngine::default());
    let session = Session::new(engine.clone());
    (engine, session)
}

fn strings(values: &[Option<&str>]) -> Array {
    VarBinArray::from_strs(values.iter().copied()).into_array()
}

fn colors() -> CategoricalDType {
    CategoricalDType::new(vec!["red".into(), "green".into(), "blue".into()].into(), false)
}

fn people(names: &[&str], ages: &[Option<i32>]) -> Array {
    StructArray::from_fields(
        vec![
            ("name", strings(&names.iter().map(|&n| Some(n)).collect::<Vec<_>>())),
            ("age", NullableArray::from_option_iter(ages.iter().copied()).into_array()),
        ],
        names.len(),
    )
    .unwrap()
    .into_array()
}

fn lists(lengths: &[Option<usize>], elements: Array) -> Array {
    ListArray::from_lengths(lengths.iter().copied(), elements)
        .unwrap()
        .into_array()
}

fn map_of(lengths: &[usize], keys: &[&str], values: Vec<i64>) -> Array {
    let entries = StructArray::from_fields(
        vec![
            ("key", strings(&keys.iter().map(|&k| Some(k)).collect::<Vec<_>>())),
            ("value", PrimitiveArray::from(values).into_array()),
        ],
        keys.len(),
    )
    .unwrap();
    let list = ListArray::from_lengths(lengths.iter().map(|&l| Some(l)), entries.into_array())
        .unwrap();
    MapArray::try_new(list).unwrap().into_array()
}

#[rstest]
#[case::primitive(PrimitiveArray::from(vec![1i64, -2, 3]).into_array())]
#[case::float(PrimitiveArray::from(vec![0.5f64, f64::MAX]).into_array())]
#[case::bools(PrimitiveArray::from_bools([true, false, true]).into_array())]
#[case::date(PrimitiveArray::from(vec![19_000i64, 19_001]).with_ptype(PType::Date).unwrap().into_array())]
#[case::nullable(NullableArray::from_option_iter([Some(1u16), None, Some(3)]).into_array())]
#[case::utf8(strings(&[Some("a"), None, Some(""), Some("héllo")]))]
#[case::binary(VarBinArray::from_bytes([Some(&b"\x00\xff"[..]), None]).into_array())]
#[case::shifted_offsets(
    VarBinArray::try_new(
        Buffer::from_vec(vec![2u64, 4, 4]),
        ByteBuffer::copy_from(b"xxabyy"),
        Bitmap::from_iter([true, false]),
        false,
    )
    .unwrap()
    .into_array()
)]
#[case::decimal(
    DecimalArray::from_option_iter(DecimalDType::try_new(10, 2).unwrap(), [Some(12_345), None, Some(-1)])
        .into_array()
)]
#[case::interval(
    IntervalArray::try_new(
        PrimitiveArray::from(vec![0.0f64, 1.0]),
        PrimitiveArray::from(vec![1.0f64, 2.5]),
    )
    .unwrap()
    .into_array()
)]
#[case::categorical(
    CategoricalArray::from_labels([Some("blue"), None, Some("red")], colors()).unwrap().into_array()
)]
#[case::datetime_tz(
    DatetimeTzArray::try_new(
        PrimitiveArray::from(vec![1_600_000_000_000_000_000i64]).with_ptype(PType::Datetime).unwrap(),
        "Europe/Paris".into(),
    )
    .unwrap()
    .into_array()
)]
#[case::list(lists(&[Some(2), None, Some(0), Some(1)], PrimitiveArray::from(vec![1.5f64, 2.5, 3.5]).into_array()))]
#[case::list_of_strings(lists(&[Some(1), Some(2)], strings(&[Some("x"), None, Some("z")])))]
#[case::nested_lists(lists(
    &[Some(2), Some(1)],
    lists(&[Some(1), Some(0), Some(2)], NullableArray::from_option_iter([Some(1i8), None, Some(3)]).into_array()),
))]
#[case::struct_(people(&["ann", "bob"], &[Some(31), None]))]
#[case::list_of_struct(lists(&[Some(1), Some(2)], people(&["a", "b", "c"], &[Some(1), Some(2), None])))]
#[case::map(map_of(&[2, 0, 1], &["a", "b", "c"], vec![1, 2, 3]))]
#[case::tuple(
    Array::Tuple(
        StructArray::positional(
            vec![
                PrimitiveArray::from(vec![1u32, 2]).into_array(),
                VarBinArray::from_bytes([Some(&b"k"[..]), Some(&b""[..])]).into_array(),
            ],
            Bitmap::from_iter([true, false]),
        )
        .unwrap(),
    )
)]
#[case::struct_with_decimal(
    StructArray::from_fields(
        vec![(
            "price",
            DecimalArray::from_option_iter(DecimalDType::try_new(38, 4).unwrap(), [None, Some(10i128.pow(37))])
                .into_array(),
        )],
        2,
    )
    .unwrap()
    .into_array()
)]
fn round_trip(#[case] array: Array) {
    let (engine, session) = session();
    let dtype = array.dtype();
    let handle = session.encode(&array, &dtype).unwrap();
    assert_eq!(session.decode(&handle, &dtype).unwrap(), array);
    handle.delete_array().unwrap();
    assert_eq!(engine.live_arrays(), 0);
}

#[rstest]
#[case(false)]
#[case(true)]
fn dictionary_round_trip(#[case] global: bool) {
    let (_, session) = session();
    let values = Arc::new(strings(&[Some("x"), Some("y")]));
    let indices = NullableArray::from_option_iter([Some(1i32), None, Some(0), Some(1)]);
    let array = DictArray::try_new(indices, values, global).unwrap().into_array();
    let dtype = array.dtype();

    let handle = session.encode(&array, &dtype).unwrap();
    let Array::Dict(decoded) = session.decode(&handle, &dtype).unwrap() else {
        panic!("expected a dictionary");
    };
    assert_eq!(decoded.has_global_dictionary(), global);
    assert_eq!(Array::Dict(decoded), array);
}

#[test]
fn decoded_arrays_outlive_their_handle() {
    let (engine, session) = session();
    let array = strings(&[Some("kept"), Some("alive")]);
    let handle = session.encode_owned(array.clone(), &DType::Utf8).unwrap();
    let decoded = session.decode(&handle, &DType::Utf8).unwrap();
    drop(handle);
    assert_eq!(engine.live_arrays(), 0);
    assert_eq!(decoded, array);
}

#[test]
fn categorical_reuses_known_categories() {
    let (_, session) = session();
    let first = CategoricalArray::from_labels([Some("green"), Some("red")], colors()).unwrap();
    let second = CategoricalArray::from_labels([Some("blue")], colors()).unwrap();
    let handle = session
        .encode(&second.clone().into_array(), &second.dtype())
        .unwrap();

    let decoded = session.decode_categorical(&handle, &first).unwrap();
    assert_eq!(decoded, second);
    assert!(
        decoded
            .categorical_dtype()
            .shares_categories(first.categorical_dtype())
    );
}

#[test]
fn nullable_decodes_nulls_where_encoded() {
    let (_, session) = session();
    let array = NullableArray::from_option_iter([None, Some(7i64), None]).into_array();
    let handle = session.encode(&array, &array.dtype()).unwrap();
    let Array::Nullable(decoded) = session.decode(&handle, &array.dtype()).unwrap() else {
        panic!("expected a nullable array");
    };
    assert_eq!(decoded.validity().iter().collect::<Vec<_>>(), vec![false, true, false]);
}

#[rstest]
#[case(lists(&[Some(1)], people(&["a"], &[None])), lists(&[Some(0), Some(3), Some(2)], people(&["a", "b", "c", "d", "e"], &[Some(1), None, Some(3), None, Some(5)])))]
#[case(map_of(&[1], &["a"], vec![1]), map_of(&[0, 0, 2, 1], &["a", "b", "c"], vec![4, 5, 6]))]
fn flattened_shape_depends_on_type_only(#[case] short: Array, #[case] long: Array) {
    let dtype = short.dtype();
    assert_eq!(long.dtype(), dtype);

    let (short_lengths, long_lengths) = (
        lengths_of(&dtype, &short).unwrap(),
        lengths_of(&dtype, &long).unwrap(),
    );
    assert_eq!(short_lengths.len(), long_lengths.len());
    assert_eq!(short_lengths.len(), num_lengths(&dtype).unwrap());
    assert_ne!(short_lengths, long_lengths);

    let (short_buffers, long_buffers) = (
        buffers_of(&dtype, &short).unwrap(),
        buffers_of(&dtype, &long).unwrap(),
    );
    assert_eq!(short_buffers.len(), long_buffers.len());
    assert_eq!(short_buffers.len(), num_buffers(&dtype).unwrap());
    assert!(!tags_of(&dtype).unwrap().is_empty());
}

#[test]
fn unverified_shapes_still_round_trip() {
    let engine = Arc::new(ReferenceEngine::default());
    let session = Session::with_options(
        engine.clone(),
        SessionOptions::default().with_verify_shapes(false),
    );
    let array = map_of(&[1, 1], &["a", "b"], vec![10, 20]);
    let handle = session.encode(&array, &array.dtype()).unwrap();
    assert_eq!(session.decode(&handle, &array.dtype()).unwrap(), array);
}
