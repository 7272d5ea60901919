//! Delta + varint adjacency list encoding

use proptest::prelude::*;
use rand::{rngs::StdRng, Rng, SeedableRng};

use cluso_storage::edge::compression::{decode_varint, encode_varint, HEADER_SIZE};
use cluso_storage::edge::{CompressedEdgeList, EdgeCodec};

#[test]
fn test_empty_list() {
    let list = CompressedEdgeList::compress(&[]).unwrap();
    assert!(list.is_empty());
    assert_eq!(list.len(), 0);
    assert!(list.decompress().unwrap().is_empty());
    assert!(!list.contains(0).unwrap());

    let bytes = list.to_bytes();
    assert_eq!(bytes.len(), HEADER_SIZE);
    assert_eq!(CompressedEdgeList::from_bytes(&bytes).unwrap(), list);
}

#[test]
fn test_unsorted_input_comes_back_sorted() {
    let list = CompressedEdgeList::compress(&[42, 7, 1_000_000, 8, 9]).unwrap();
    assert_eq!(list.base_id(), 7);
    assert_eq!(list.decompress().unwrap(), vec![7, 8, 9, 42, 1_000_000]);
    assert!(list.contains(42).unwrap());
    assert!(!list.contains(43).unwrap());
}

#[test]
fn test_ten_thousand_clustered_ids_compress_well() {
    let mut rng = StdRng::seed_from_u64(1);
    let mut id = 1_000_000u64;
    let ids: Vec<u64> = (0..10_000)
        .map(|_| {
            id += rng.gen_range(1..20);
            id
        })
        .collect();

    let list = CompressedEdgeList::compress(&ids).unwrap();
    assert_eq!(list.len(), 10_000);
    assert_eq!(list.decompress().unwrap(), ids);
    assert_eq!(list.uncompressed_size(), 80_000);
    assert!(
        list.compression_ratio() > 5.0,
        "ratio {} for clustered ids",
        list.compression_ratio()
    );

    let restored = CompressedEdgeList::from_bytes(&list.to_bytes()).unwrap();
    assert_eq!(restored.decompress().unwrap(), ids);
}

#[test]
fn test_add_and_remove_keep_order() {
    let list = CompressedEdgeList::compress(&[10, 30]).unwrap();
    let list = list.add(20).unwrap().add(5).unwrap().add(40).unwrap();
    assert_eq!(list.decompress().unwrap(), vec![5, 10, 20, 30, 40]);

    let list = list.remove(5).unwrap().remove(30).unwrap();
    assert_eq!(list.decompress().unwrap(), vec![10, 20, 40]);
    assert_eq!(list.base_id(), 10);

    let unchanged = list.remove(999).unwrap();
    assert_eq!(unchanged, list);
}

#[test]
fn test_extreme_ids() {
    let ids = vec![0, 1, u64::MAX / 2, u64::MAX - 1, u64::MAX];
    let list = CompressedEdgeList::compress(&ids).unwrap();
    assert_eq!(list.decompress().unwrap(), ids);
}

#[test]
fn test_truncated_bytes_are_rejected() {
    let list = CompressedEdgeList::compress(&[1, 200, 40_000, 9_000_000]).unwrap();
    let bytes = list.to_bytes();
    assert!(CompressedEdgeList::from_bytes(&bytes[..HEADER_SIZE - 1]).is_err());
    assert!(CompressedEdgeList::from_bytes(&bytes[..bytes.len() - 1]).is_err());
}

#[test]
fn test_varint_encoding_lengths() {
    let mut out = Vec::new();
    encode_varint(127, &mut out);
    assert_eq!(out.len(), 1);
    out.clear();
    encode_varint(128, &mut out);
    assert_eq!(out.len(), 2);
    out.clear();
    encode_varint(u64::MAX, &mut out);
    assert_eq!(out.len(), 10);

    let mut offset = 0;
    assert_eq!(decode_varint(&out, &mut offset).unwrap(), u64::MAX);
    assert_eq!(offset, 10);
    assert!(decode_varint(&out[..3], &mut 0).is_err());
}

#[test]
fn test_codec_reuses_buffers() {
    let codec = EdgeCodec::default();
    let list = codec.compress(&[3, 1, 2]).unwrap();
    let list = codec.insert(&list, 10).unwrap();
    let list = codec.remove(&list, 1).unwrap();
    assert_eq!(list.decompress().unwrap(), vec![2, 3, 10]);

    let (ids, bytes) = codec.pooled_buffers();
    assert!(ids >= 1);
    assert!(bytes >= 1);
}

proptest! {
    #[test]
    fn prop_compress_round_trip(mut ids in prop::collection::vec(any::<u64>(), 0..500)) {
        let list = CompressedEdgeList::compress(&ids).unwrap();
        let restored = CompressedEdgeList::from_bytes(&list.to_bytes()).unwrap();
        ids.sort_unstable();
        prop_assert_eq!(restored.decompress().unwrap(), ids);
    }

    #[test]
    fn prop_add_then_contains(
        ids in prop::collection::btree_set(0u64..1_000_000, 0..200),
        extra in 0u64..1_000_000,
    ) {
        let ids: Vec<u64> = ids.into_iter().collect();
        let list = CompressedEdgeList::compress(&ids).unwrap().add(extra).unwrap();
        prop_assert!(list.contains(extra).unwrap());
        prop_assert_eq!(list.len(), ids.len() + 1);
    }
}
