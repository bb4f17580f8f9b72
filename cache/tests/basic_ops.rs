mod common;

use common::mem_cache;
use fibre_tiercache::{CacheError, WriteOptions};
use pretty_assertions::assert_eq;
use std::thread;
use std::time::Duration;

#[test]
fn test_set_get_remove() {
  let cache = mem_cache(1024);

  cache.set("k", b"0123456789", None).unwrap();
  assert!(cache.contains("k"));
  assert_eq!(cache.len(), 1);
  assert_eq!(cache.get("k", None).unwrap(), b"0123456789".to_vec());

  cache.remove("k").unwrap();
  assert!(matches!(cache.get("k", None), Err(CacheError::NotFound)));
  assert!(matches!(cache.remove("k"), Err(CacheError::NotFound)));
  assert_eq!(cache.mem_used_bytes(), 0);
}

#[test]
fn test_read_ranges() {
  let cache = mem_cache(1024);
  let value: Vec<u8> = (0u8..23).collect();
  cache.set("range", &value, None).unwrap();

  assert_eq!(cache.read("range", 0, 23, None).unwrap(), value);
  assert_eq!(cache.read("range", 5, 9, None).unwrap(), value[5..14].to_vec());
  // Ranges running past the end are clamped.
  assert_eq!(cache.read("range", 20, 50, None).unwrap(), value[20..].to_vec());
  assert!(cache.read("range", 23, 1, None).unwrap().is_empty());
  assert!(cache.read("range", 100, 1, None).unwrap().is_empty());

  assert!(matches!(
    cache.read("missing", 0, 1, None),
    Err(CacheError::NotFound)
  ));
}

#[test]
fn test_overwrite_and_already_exists() {
  let cache = mem_cache(1024);
  cache.set("k", b"first", None).unwrap();
  cache.set("k", b"second value", None).unwrap();
  assert_eq!(cache.get("k", None).unwrap(), b"second value".to_vec());
  assert_eq!(cache.mem_used_bytes(), 12);

  let no_overwrite = WriteOptions {
    overwrite: false,
    ..WriteOptions::default()
  };
  assert!(matches!(
    cache.set("k", b"third", Some(&no_overwrite)),
    Err(CacheError::AlreadyExists)
  ));
  assert_eq!(cache.get("k", None).unwrap(), b"second value".to_vec());

  // Without an existing object the flag does not matter.
  cache.set("fresh", b"v", Some(&no_overwrite)).unwrap();
}

#[test]
fn test_empty_value_is_rejected() {
  let cache = mem_cache(1024);
  assert!(matches!(
    cache.set("k", b"", None),
    Err(CacheError::InvalidArgument(_))
  ));
  assert!(!cache.contains("k"));
}

#[test]
fn test_keys_are_binary() {
  let cache = mem_cache(1024);
  let key = [0u8, 255, 7, 0];
  cache.set(key, b"binary", None).unwrap();
  assert_eq!(cache.get(key, None).unwrap(), b"binary".to_vec());
  assert!(!cache.contains([0u8, 255, 7]));
}

#[test]
fn test_ttl_expires_lazily() {
  let cache = mem_cache(1024);
  let ttl = WriteOptions {
    ttl_seconds: 1,
    ..WriteOptions::default()
  };
  cache.set("short", b"lived", Some(&ttl)).unwrap();
  cache.set("forever", b"lived", None).unwrap();
  assert_eq!(cache.get("short", None).unwrap(), b"lived".to_vec());

  thread::sleep(Duration::from_millis(2100));

  assert!(matches!(cache.get("short", None), Err(CacheError::NotFound)));
  assert_eq!(cache.len(), 1, "the expired object is removed on access");
  assert_eq!(cache.get("forever", None).unwrap(), b"lived".to_vec());
  assert_eq!(cache.mem_used_bytes(), 5);
}

#[test]
fn test_metrics_count_lookups() {
  let cache = mem_cache(1024);
  cache.set("a", b"abc", None).unwrap();
  cache.get("a", None).unwrap();
  cache.read("a", 1, 1, None).unwrap();
  cache.get("b", None).unwrap_err();
  cache.remove("a").unwrap();

  let metrics = cache.metrics();
  assert_eq!(metrics.writes, 1);
  assert_eq!(metrics.hits, 2);
  assert_eq!(metrics.misses, 1);
  assert_eq!(metrics.removes, 1);
  assert_eq!(metrics.mem_quota_bytes, 1024);
  assert_eq!(metrics.disk_quota_bytes, 0);
}

#[test]
fn test_clear_drops_everything() {
  let cache = mem_cache(1024);
  for i in 0..10 {
    cache.set(format!("key{}", i), b"12345", None).unwrap();
  }
  assert_eq!(cache.len(), 10);
  cache.clear();
  assert!(cache.is_empty());
  assert_eq!(cache.mem_used_bytes(), 0);
  assert_eq!(cache.evict_mem(100), 0, "the policies were emptied too");
  cache.set("key0", b"again", None).unwrap();
  assert_eq!(cache.get("key0", None).unwrap(), b"again".to_vec());
}
