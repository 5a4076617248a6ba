//! Tests for the shared VNIC cache.

use std::thread;

use super::*;
use rstest::{fixture, rstest};
use tempfile::TempDir;

struct CacheFixture {
    _tmp: TempDir,
    path: Utf8PathBuf,
}

#[fixture]
fn cache_fixture() -> CacheFixture {
    let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
    let path = Utf8PathBuf::from_path_buf(tmp.path().join(CACHE_FILE_NAME))
        .unwrap_or_else(|err| panic!("temp path should be utf8: {}", err.display()));
    CacheFixture { _tmp: tmp, path }
}

fn vnic(id: &str, hostname: &str) -> Vnic {
    Vnic {
        id: id.to_owned(),
        public_ip: None,
        private_ip: Some(String::from("10.0.0.2")),
        hostname_label: Some(hostname.to_owned()),
    }
}

#[rstest]
fn set_then_get(cache_fixture: CacheFixture) {
    let mut cache = VnicCache::open(&cache_fixture.path)
        .unwrap_or_else(|err| panic!("open cache: {err}"));

    cache.set("vnic-a", vnic("vnic-a", "node-a"));

    assert_eq!(cache.get("vnic-a"), Some(&vnic("vnic-a", "node-a")));
    assert_eq!(cache.get("vnic-b"), None);
}

#[rstest]
fn close_is_idempotent(cache_fixture: CacheFixture) {
    let mut cache = VnicCache::open(&cache_fixture.path)
        .unwrap_or_else(|err| panic!("open cache: {err}"));

    cache.close().unwrap_or_else(|err| panic!("first close: {err}"));
    cache.close().unwrap_or_else(|err| panic!("second close: {err}"));
}

#[rstest]
fn entries_survive_reopen(cache_fixture: CacheFixture) {
    {
        let mut cache = VnicCache::open(&cache_fixture.path)
            .unwrap_or_else(|err| panic!("open cache: {err}"));
        cache.set("vnic-a", vnic("vnic-a", "node-a"));
        cache.close().unwrap_or_else(|err| panic!("close: {err}"));
    }

    let cache = VnicCache::open(&cache_fixture.path)
        .unwrap_or_else(|err| panic!("reopen cache: {err}"));
    assert_eq!(cache.len(), 1);
    assert_eq!(cache.get("vnic-a"), Some(&vnic("vnic-a", "node-a")));
}

#[rstest]
fn drop_persists_entries(cache_fixture: CacheFixture) {
    {
        let mut cache = VnicCache::open(&cache_fixture.path)
            .unwrap_or_else(|err| panic!("open cache: {err}"));
        cache.set("vnic-a", vnic("vnic-a", "node-a"));
    }

    let cache = VnicCache::open(&cache_fixture.path)
        .unwrap_or_else(|err| panic!("reopen cache: {err}"));
    assert!(cache.get("vnic-a").is_some());
}

#[rstest]
fn shrinking_rewrites_whole_file(cache_fixture: CacheFixture) {
    {
        let mut cache = VnicCache::open(&cache_fixture.path)
            .unwrap_or_else(|err| panic!("open cache: {err}"));
        cache.set("vnic-a", vnic("vnic-a", "a-very-long-hostname-label"));
    }
    std::fs::write(&cache_fixture.path, "{}").unwrap_or_else(|err| panic!("reset: {err}"));
    {
        let mut cache = VnicCache::open(&cache_fixture.path)
            .unwrap_or_else(|err| panic!("open cache: {err}"));
        cache.set("vnic-b", vnic("vnic-b", "b"));
    }

    let contents =
        std::fs::read_to_string(&cache_fixture.path).unwrap_or_else(|err| panic!("read: {err}"));
    let decoded: BTreeMap<String, Vnic> =
        serde_json::from_str(&contents).unwrap_or_else(|err| panic!("decode {contents}: {err}"));
    assert_eq!(decoded.len(), 1);
}

#[rstest]
fn corrupt_contents_start_empty(cache_fixture: CacheFixture) {
    std::fs::write(&cache_fixture.path, "not json").unwrap_or_else(|err| panic!("seed: {err}"));

    let mut cache = VnicCache::open(&cache_fixture.path)
        .unwrap_or_else(|err| panic!("open cache: {err}"));
    assert!(cache.is_empty());

    cache.set("vnic-a", vnic("vnic-a", "node-a"));
    cache.close().unwrap_or_else(|err| panic!("close: {err}"));

    let reopened = VnicCache::open(&cache_fixture.path)
        .unwrap_or_else(|err| panic!("reopen cache: {err}"));
    assert_eq!(reopened.len(), 1);
}

#[rstest]
fn missing_directory_fails_to_open(cache_fixture: CacheFixture) {
    let path = cache_fixture.path.with_file_name("missing").join(CACHE_FILE_NAME);

    let Err(err) = VnicCache::open(&path) else {
        panic!("open should fail for a missing directory");
    };
    assert!(matches!(err, CacheError::Open { .. }), "unexpected error: {err}");
}

#[rstest]
fn concurrent_writers_serialise_on_the_lock(cache_fixture: CacheFixture) {
    let workers: Vec<_> = (0..8)
        .map(|index| {
            let path = cache_fixture.path.clone();
            thread::spawn(move || {
                let mut cache =
                    VnicCache::open(&path).unwrap_or_else(|err| panic!("open cache: {err}"));
                let id = format!("vnic-{index}");
                cache.set(id.clone(), vnic(&id, &format!("node-{index}")));
                cache.close().unwrap_or_else(|err| panic!("close: {err}"));
            })
        })
        .collect();

    for worker in workers {
        worker
            .join()
            .unwrap_or_else(|_| panic!("cache worker panicked"));
    }

    let cache = VnicCache::open(&cache_fixture.path)
        .unwrap_or_else(|err| panic!("open cache: {err}"));
    assert_eq!(cache.len(), 8);
}
