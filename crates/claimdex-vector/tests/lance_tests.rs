#![cfg(feature = "lance")]

use claimdex_core::traits::VectorIndex;
use claimdex_core::types::{Filter, Meta};
use claimdex_core::Error;
use claimdex_vector::LanceStore;

fn meta(section: &str, level: &str) -> Meta {
    [("section_title", section), ("chunk_level", level)].iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
}

fn filter(pairs: &[(&str, &str)]) -> Filter { pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect() }

#[test]
fn rows_are_visible_after_flush_and_filters_are_equality() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let store = LanceStore::open(tmp.path())?;
    let mut index = store.index("chunks_g1", 2)?;

    index.upsert("a", &[1.0, 0.0], &meta("POLICY INFORMATION", "small"))?;
    index.upsert("b", &[0.8, 0.6], &meta("O'Brien Statement", "small"))?;
    index.upsert("c", &[0.0, 1.0], &meta("O'Brien Statement", "medium"))?;
    assert!(index.query(&[1.0, 0.0], 3, None)?.is_empty(), "pending rows are not searchable");

    index.flush()?;
    assert_eq!(index.len(), 3);
    let hits = index.query(&[1.0, 0.0], 3, None)?;
    assert_eq!(hits[0].id, "a");
    assert!(hits[0].score > hits[2].score);

    let only = index.query(&[1.0, 0.0], 3, Some(&filter(&[("section_title", "O'Brien Statement"), ("chunk_level", "medium")])))?;
    assert_eq!(only.len(), 1);
    assert_eq!(only[0].id, "c");
    assert!(index.query(&[1.0, 0.0], 3, Some(&filter(&[("section_title", "policy information")])))?.is_empty());
    assert!(index.query(&[1.0, 0.0], 3, Some(&filter(&[("unknown", "x")])))?.is_empty());
    assert!(matches!(index.query(&[1.0, 0.0, 0.0], 3, None), Err(Error::Operation(_))));
    Ok(())
}

#[test]
fn reupsert_replaces_existing_row() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let store = LanceStore::open(tmp.path())?;
    let mut index = store.index("chunks_g1", 2)?;
    index.upsert("a", &[1.0, 0.0], &meta("POLICY INFORMATION", "small"))?;
    index.upsert("b", &[0.0, 1.0], &meta("POLICY INFORMATION", "small"))?;
    index.flush()?;

    index.upsert("a", &[0.0, 1.0], &meta("TIMELINE", "small"))?;
    index.flush()?;
    assert_eq!(index.len(), 2);
    let moved = index.query(&[0.0, 1.0], 2, Some(&filter(&[("section_title", "TIMELINE")])))?;
    assert_eq!(moved.len(), 1);
    assert_eq!(moved[0].id, "a");

    let reopened = store.index("chunks_g1", 2)?;
    assert_eq!(reopened.len(), 2);
    Ok(())
}

#[test]
fn meta_pointer_round_trip() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let store = LanceStore::open(tmp.path())?;
    assert_eq!(store.get_meta("active_generation")?, None);

    store.set_meta("active_generation", "1")?;
    store.set_meta("active_generation", "2")?;
    assert_eq!(store.get_meta("active_generation")?.as_deref(), Some("2"));

    let again = LanceStore::open(tmp.path())?;
    assert_eq!(again.get_meta("active_generation")?.as_deref(), Some("2"));
    Ok(())
}
