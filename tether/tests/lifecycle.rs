#![cfg(test)]

use std::sync::Arc;

use tether::Session;
use tether_array::arrays::{
    DictArray, ExtensionArray, ListArray, NullableArray, PrimitiveArray, VarBinArray,
};
use tether_array::{Array, IntoArray};
use tether_dtype::{DType, ExtDType, PType};
use tether_error::TetherError;
use tether_native::ReferenceEngine;

fn session() -> (Arc<ReferenceEngine>, Session) {
    let engine = Arc::new(ReferenceEngine::default());
    let session = Session::new(engine.clone());
    (engine, session)
}

#[test]
fn encoding_twice_restores_the_refcount() {
    let (engine, session) = session();
    let strings = VarBinArray::from_strs([Some("alpha"), None, Some("beta")]);
    let array = strings.clone().into_array();
    let baseline = strings.bytes().strong_count();

    let first = session.encode(&array, &DType::Utf8).unwrap();
    let second = session.encode(&array, &DType::Utf8).unwrap();
    assert!(strings.bytes().strong_count() > baseline);
    assert_eq!(engine.live_arrays(), 2);

    first.delete_array().unwrap();
    assert!(strings.bytes().strong_count() > baseline);
    second.delete_array().unwrap();
    assert_eq!(strings.bytes().strong_count(), baseline);
    assert_eq!(engine.live_arrays(), 0);
}

#[test]
fn dropped_handles_release_their_buffers() {
    let (engine, session) = session();
    let values = PrimitiveArray::from(vec![1i32, 2, 3]);
    let baseline = values.byte_buffer().strong_count();
    {
        let _handle = session
            .encode(&values.clone().into_array(), &values.dtype())
            .unwrap();
        assert!(values.byte_buffer().strong_count() > baseline);
    }
    assert_eq!(values.byte_buffer().strong_count(), baseline);
    assert_eq!(engine.live_arrays(), 0);
}

#[test]
fn owned_encoding_leaves_the_handle_as_owner() {
    let (_, session) = session();
    let values = PrimitiveArray::from(vec![5u64; 4]);
    let watched = values.byte_buffer().clone();
    let baseline = watched.strong_count();

    let handle = session
        .encode_owned(values.into_array(), &DType::Primitive(PType::U64))
        .unwrap();
    // The value moved into the call is gone, the handle's token took its place.
    assert_eq!(watched.strong_count(), baseline);
    drop(handle);
    assert_eq!(watched.strong_count(), baseline - 1);
}

#[test]
fn shared_dictionary_values_outlive_the_first_table() {
    let (engine, session) = session();
    let values = VarBinArray::from_strs([Some("x"), Some("y"), Some("z")]);
    let baseline = values.bytes().strong_count();
    let shared = Arc::new(values.clone().into_array());

    let dict = |codes: &[Option<i32>]| {
        DictArray::try_new(
            NullableArray::from_option_iter(codes.iter().copied()),
            shared.clone(),
            true,
        )
        .unwrap()
        .into_array()
    };
    let (a, b) = (dict(&[Some(0), Some(2)]), dict(&[None, Some(1), Some(1)]));

    let tables = [a, b]
        .iter()
        .map(|array| {
            let handle = session.encode(array, &array.dtype()).unwrap();
            session.to_table(vec![handle]).unwrap()
        })
        .collect::<Vec<_>>();
    drop(shared);
    assert_eq!(engine.live_tables(), 2);

    let mut tables = tables.into_iter();
    tables.next().unwrap().delete_table_decref_contents().unwrap();
    assert!(values.bytes().strong_count() > baseline);
    tables.next().unwrap().delete_table_decref_contents().unwrap();
    assert_eq!(values.bytes().strong_count(), baseline);
    assert_eq!(engine.live_tables(), 0);
    assert_eq!(engine.live_arrays(), 0);
}

#[test]
fn unsupported_type_makes_no_native_call() {
    let (engine, session) = session();
    let ext = ExtDType::new("uuid".into(), Arc::new(DType::Binary));
    let storage = VarBinArray::from_bytes([Some(&[0u8; 16][..])]).into_array();
    let array = ExtensionArray::try_new(ext.clone(), storage).unwrap().into_array();

    let calls = engine.native_calls();
    let err = session.encode(&array, &DType::Extension(ext)).unwrap_err();
    assert!(matches!(err, TetherError::UnsupportedType(..)), "{err}");

    let nested = DType::list(DType::Extension(ExtDType::new(
        "uuid".into(),
        Arc::new(DType::Binary),
    )));
    let list = ListArray::from_lengths([Some(1)], array).unwrap().into_array();
    let err = session.encode(&list, &nested).unwrap_err();
    assert!(matches!(err, TetherError::UnsupportedType(..)), "{err}");
    assert_eq!(engine.native_calls(), calls);
}

#[test]
fn mismatched_value_makes_no_native_call() {
    let (engine, session) = session();
    let calls = engine.native_calls();
    let array = PrimitiveArray::from(vec![1i32]).into_array();
    let err = session.encode(&array, &DType::Utf8).unwrap_err();
    assert!(matches!(err, TetherError::MismatchedTypes(..)), "{err}");
    assert_eq!(engine.native_calls(), calls);
}

#[test]
fn pending_error_becomes_native_call_failed() {
    let (engine, session) = session();
    let array = PrimitiveArray::from(vec![1.0f32, 2.0]).into_array();

    engine.fail_next("numpy_array_to_info", "out of memory");
    let err = session.encode(&array, &array.dtype()).unwrap_err();
    match err {
        TetherError::NativeCallFailed(entry, msg, _) => {
            assert_eq!(entry, "numpy_array_to_info");
            assert!(msg.contains("out of memory"));
        }
        other => panic!("unexpected error {other}"),
    }
    assert_eq!(engine.live_arrays(), 0);

    // The fault fired once, the next call succeeds.
    let handle = session.encode(&array, &array.dtype()).unwrap();
    assert_eq!(session.decode(&handle, &array.dtype()).unwrap(), array);
}

#[test]
fn failed_accessor_releases_nothing_twice() {
    let (engine, session) = session();
    let array = VarBinArray::from_strs([Some("q")]).into_array();
    let handle = session.encode(&array, &DType::Utf8).unwrap();

    engine.fail_next("info_to_string_array", "corrupt descriptor");
    let err = session.decode(&handle, &DType::Utf8).unwrap_err();
    assert!(err.is_native(), "{err}");
    assert_eq!(session.decode(&handle, &DType::Utf8).unwrap(), array);
    handle.delete_array().unwrap();
    assert_eq!(engine.live_arrays(), 0);
}

#[test]
fn failed_table_assembly_consumes_its_columns() {
    let (engine, session) = session();
    let columns = (0..3)
        .map(|i| {
            let array = PrimitiveArray::from(vec![i64::from(i); 2]).into_array();
            session.encode(&array, &array.dtype()).unwrap()
        })
        .collect::<Vec<_>>();

    engine.fail_next("arr_info_list_to_table", "no room");
    let err = session.to_table(columns).unwrap_err();
    assert!(err.is_native(), "{err}");
    assert_eq!(engine.live_arrays(), 0);
    assert_eq!(engine.live_tables(), 0);
}

#[test]
fn handles_are_bound_to_their_engine() {
    let (_, other) = session();
    let (_, session) = session();
    let array: Array = PrimitiveArray::from(vec![1u8]).into_array();
    let foreign = other.encode(&array, &array.dtype()).unwrap();
    assert!(session.to_table(vec![foreign]).is_err());
}
