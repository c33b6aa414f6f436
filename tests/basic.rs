use bloomlru::persist::{Loader, PersistError, Persister};
use bloomlru::{BloomCache, BloomCacheBuilder, BloomFilter, CacheError, FilterParams};
use parking_lot::Mutex;
use rand::Rng;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const BITS: u64 = 1 << 12;
const HASHES: u32 = 4;

fn params() -> FilterParams {
    FilterParams::new(BITS, HASHES).unwrap()
}

/// Every write-back in dispatch order.
type Log = Arc<Mutex<Vec<(String, Vec<u8>)>>>;

fn recording_cache(cap: usize) -> (BloomCache, Log) {
    let log: Log = Arc::default();
    let log2 = Arc::clone(&log);
    let cache = BloomCacheBuilder::new(cap)
        .filter_params(BITS, HASHES)
        .loader(|_key: &str| None)
        .persister(move |key: &str, state: &[u8]| {
            log2.lock().push((key.to_string(), state.to_vec()));
            Ok(())
        })
        .build()
        .unwrap();
    (cache, log)
}

/// In-memory backing store acting as both loader and persister.
#[derive(Clone, Default)]
struct MemoryBackend {
    blobs: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    loads: Arc<AtomicUsize>,
}

impl Loader for MemoryBackend {
    fn load(&self, key: &str) -> Option<Vec<u8>> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        self.blobs.lock().get(key).cloned()
    }
}

impl Persister for MemoryBackend {
    fn persist(&self, key: &str, state: &[u8]) -> Result<(), PersistError> {
        self.blobs.lock().insert(key.to_string(), state.to_vec());
        Ok(())
    }
}

fn backed_cache(cap: usize, backend: &MemoryBackend) -> BloomCache {
    BloomCacheBuilder::new(cap)
        .filter_params(BITS, HASHES)
        .loader_impl(backend.clone())
        .persister_impl(backend.clone())
        .build()
        .unwrap()
}

/// Polls `cond` until it holds or five seconds pass.
fn eventually(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    false
}

fn decode(state: &[u8]) -> BloomFilter {
    BloomFilter::from_bytes(state, params()).unwrap()
}

// ---------------------------------------------------------------------------
// Fundamental API correctness
// ---------------------------------------------------------------------------

#[test]
fn test_is_false_for_unknown_key() {
    let backend = MemoryBackend::default();
    let cache = backed_cache(10, &backend);
    assert!(!cache.test("never-seen", b"x").unwrap());
    assert_eq!(backend.loads.load(Ordering::SeqCst), 1, "miss must consult the loader");
    assert!(!cache.contains("never-seen"), "nothing to cache without prior state");
    assert!(!cache.is_dirty("never-seen"));
}

#[test]
fn put_then_test_finds_every_item() {
    let (cache, _log) = recording_cache(100);
    for i in 1..=100u8 {
        cache.put(&i.to_string(), &[i]).unwrap();
    }
    for i in 1..=100u8 {
        assert!(cache.test(&i.to_string(), &[i]).unwrap(), "false negative for key {i}");
    }
}

#[test]
fn test_and_put_adds_only_once() {
    let (cache, _log) = recording_cache(10);
    assert!(cache.test_and_put("k", b"item").unwrap());
    assert!(cache.is_dirty("k"));

    cache.flush().unwrap();
    assert!(!cache.is_dirty("k"));

    assert!(!cache.test_and_put("k", b"item").unwrap());
    assert!(!cache.test_and_put("k", b"item").unwrap());
    assert!(!cache.is_dirty("k"), "a rejected test_and_put must not mutate");
    assert!(cache.test("k", b"item").unwrap());
}

#[test]
fn test_does_not_mark_dirty() {
    let (cache, _log) = recording_cache(10);
    cache.put("k", b"a").unwrap();
    cache.flush().unwrap();
    assert!(cache.test("k", b"a").unwrap());
    assert!(!cache.is_dirty("k"));
}

#[test]
fn cache_is_clone_and_shared() {
    let (c1, _log) = recording_cache(10);
    let c2 = c1.clone();
    c1.put("shared", b"yes").unwrap();
    assert!(c2.test("shared", b"yes").unwrap(), "cloned handle must see the same entries");
}

#[test]
fn stats_track_hits_misses_and_loads() {
    let backend = MemoryBackend::default();
    backend.persist("warm", &BloomFilter::new(params()).unwrap().to_bytes().unwrap()).unwrap();
    let cache = backed_cache(10, &backend);

    cache.test("cold", b"x").unwrap(); // miss, nothing loaded
    cache.test("warm", b"x").unwrap(); // miss, loaded
    cache.test("warm", b"x").unwrap(); // hit

    let stats = cache.stats();
    assert_eq!(stats.misses, 2);
    assert_eq!(stats.loads, 1);
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.request_count(), 3);
}

// ---------------------------------------------------------------------------
// Capacity and eviction write-back
// ---------------------------------------------------------------------------

#[test]
fn inserting_past_capacity_evicts_lru_and_writes_it_back() {
    let (cache, log) = recording_cache(2);
    cache.put("a", b"x").unwrap();
    cache.put("b", b"y").unwrap();
    cache.put("c", b"z").unwrap();

    assert!(!cache.contains("a"));
    assert_eq!(cache.len(), 2);
    assert!(!cache.is_dirty("a"), "eviction clears the dirty marker");
    assert!(cache.test("b", b"y").unwrap());
    assert!(cache.test("c", b"z").unwrap());

    assert!(eventually(|| log.lock().len() == 1));
    let (key, state) = log.lock()[0].clone();
    assert_eq!(key, "a");
    assert!(decode(&state).test(b"x"), "write-back carries state at eviction");

    // The loader has nothing for "a", so the lazy load comes back empty.
    assert!(!cache.test("a", b"x").unwrap());
}

#[test]
fn access_order_decides_the_victim() {
    let (cache, log) = recording_cache(2);
    cache.put("a", b"1").unwrap();
    cache.put("b", b"2").unwrap();
    cache.test("a", b"1").unwrap(); // "a" becomes most recently used
    cache.put("c", b"3").unwrap();

    assert!(cache.contains("a"));
    assert!(!cache.contains("b"));
    assert!(eventually(|| log.lock().len() == 1));
    assert_eq!(log.lock()[0].0, "b");
}

#[test]
fn capacity_is_respected_under_churn() {
    let (cache, log) = recording_cache(8);
    for i in 0..200 {
        cache.put(&format!("key-{i}"), b"v").unwrap();
        assert!(cache.len() <= 8);
    }
    assert!(eventually(|| log.lock().len() == 192));
    assert_eq!(cache.stats().evictions, 192);
}

#[test]
fn evicted_state_is_reloaded_on_next_access() {
    let backend = MemoryBackend::default();
    let cache = backed_cache(1, &backend);

    cache.put("a", b"x").unwrap();
    cache.put("b", b"y").unwrap(); // evicts "a"
    assert!(eventually(|| backend.blobs.lock().contains_key("a")));

    assert!(cache.test("a", b"x").unwrap(), "state must survive eviction");
    assert!(!cache.is_dirty("a"), "a loaded key starts clean");
}

// ---------------------------------------------------------------------------
// Flush
// ---------------------------------------------------------------------------

#[test]
fn flush_writes_back_each_dirty_key_once() {
    let backend = MemoryBackend::default();
    backend.persist("clean", &BloomFilter::new(params()).unwrap().to_bytes().unwrap()).unwrap();

    let log: Log = Arc::default();
    let log2 = Arc::clone(&log);
    let loader = backend.clone();
    let cache = BloomCacheBuilder::new(10)
        .filter_params(BITS, HASHES)
        .loader_impl(loader)
        .persister(move |key: &str, state: &[u8]| {
            log2.lock().push((key.to_string(), state.to_vec()));
            Ok(())
        })
        .build()
        .unwrap();

    cache.put("k1", b"a").unwrap();
    cache.put("k1", b"b").unwrap();
    cache.put("k2", b"c").unwrap();
    assert!(!cache.test("clean", b"zzz").unwrap()); // resident, never mutated

    cache.flush().unwrap();
    assert!(eventually(|| log.lock().len() == 2));
    cache.flush().unwrap();
    thread::sleep(Duration::from_millis(50));

    let log = log.lock();
    let mut keys: Vec<&str> = log.iter().map(|(k, _)| k.as_str()).collect();
    keys.sort();
    assert_eq!(keys, vec!["k1", "k2"]);
    let k1 = &log.iter().find(|(k, _)| k == "k1").unwrap().1;
    assert!(decode(k1).test(b"a") && decode(k1).test(b"b"));
}

#[test]
fn flush_skips_dirty_key_already_evicted() {
    let (cache, log) = recording_cache(1);
    cache.put("a", b"x").unwrap();
    cache.put("b", b"y").unwrap(); // evicts the dirty "a"
    cache.flush().unwrap();

    assert!(eventually(|| log.lock().len() == 2));
    thread::sleep(Duration::from_millis(50));

    let log = log.lock();
    let count = |key: &str| log.iter().filter(|(k, _)| k == key).count();
    assert_eq!(count("a"), 1, "only the eviction writes \"a\" back");
    assert_eq!(count("b"), 1, "the flush writes \"b\" back once");
    assert_eq!(log.len(), 2);
    assert!(!cache.is_dirty("a") && !cache.is_dirty("b"));
}

#[test]
fn periodic_flush_writes_back_dirty_key() {
    let log: Log = Arc::default();
    let log2 = Arc::clone(&log);
    let cache = BloomCacheBuilder::new(100)
        .filter_params(BITS, HASHES)
        .flush_interval(Duration::from_millis(50))
        .persister(move |key: &str, state: &[u8]| {
            log2.lock().push((key.to_string(), state.to_vec()));
            Ok(())
        })
        .build()
        .unwrap();

    cache.put("k", b"v").unwrap();
    assert!(eventually(|| log.lock().len() == 1));
    assert!(!cache.is_dirty("k"));

    // Further ticks find nothing dirty.
    thread::sleep(Duration::from_millis(150));
    assert_eq!(log.lock().len(), 1);
    assert!(cache.stats().flushes >= 2);
}

#[test]
fn no_persister_means_no_write_back() {
    let cache = BloomCacheBuilder::new(1)
        .filter_params(BITS, HASHES)
        .flush_interval(Duration::from_millis(10))
        .build()
        .unwrap();
    cache.put("a", b"x").unwrap();
    cache.put("b", b"y").unwrap();
    cache.flush().unwrap();
    let stats = cache.stats();
    assert_eq!(stats.evictions, 1);
    assert_eq!(stats.persists, 0);
    assert!(!cache.is_dirty("b"));
}

// ---------------------------------------------------------------------------
// Close
// ---------------------------------------------------------------------------

#[test]
fn close_flushes_then_rejects_everything() {
    let (cache, log) = recording_cache(10);
    cache.put("a", b"1").unwrap();
    cache.put("b", b"2").unwrap();
    cache.put("c", b"3").unwrap();
    cache.flush().unwrap();
    assert!(eventually(|| log.lock().len() == 3));

    cache.put("a", b"4").unwrap();
    cache.close().unwrap();
    assert!(eventually(|| log.lock().len() == 4));
    assert_eq!(log.lock()[3].0, "a");

    // Purged entries are not written back.
    thread::sleep(Duration::from_millis(50));
    assert_eq!(log.lock().len(), 4);

    assert!(cache.is_closed());
    assert!(cache.is_empty());
    assert!(matches!(cache.put("a", b"x"), Err(CacheError::Closed)));
    assert!(matches!(cache.test("a", b"x"), Err(CacheError::Closed)));
    assert!(matches!(cache.test_and_put("a", b"x"), Err(CacheError::Closed)));
    assert!(matches!(cache.flush(), Err(CacheError::Closed)));
    assert!(matches!(cache.close(), Err(CacheError::Closed)));
}

#[test]
fn restart_recovers_state_written_on_close() {
    let backend = MemoryBackend::default();
    let first = backed_cache(10, &backend);
    first.put("user:1", b"seen").unwrap();
    first.close().unwrap();
    assert!(eventually(|| backend.blobs.lock().contains_key("user:1")));

    let second = backed_cache(10, &backend);
    assert!(second.test("user:1", b"seen").unwrap());
    assert!(!second.test_and_put("user:1", b"seen").unwrap());
}

// ---------------------------------------------------------------------------
// Error reporting
// ---------------------------------------------------------------------------

#[test]
fn corrupt_persisted_state_is_reported_not_cached() {
    let cache = BloomCacheBuilder::new(10)
        .filter_params(BITS, HASHES)
        .loader(|key: &str| (key == "bad").then(|| vec![1, 2, 3]))
        .build()
        .unwrap();

    let err = cache.put("bad", b"x").unwrap_err();
    assert!(matches!(err, CacheError::CorruptState { ref key, .. } if key == "bad"));
    assert!(matches!(cache.test("bad", b"x"), Err(CacheError::CorruptState { .. })));
    assert!(!cache.contains("bad"));

    cache.put("good", b"x").unwrap();
    assert!(cache.test("good", b"x").unwrap());
}

#[test]
fn state_from_other_parameters_is_corrupt() {
    let foreign = BloomFilter::new(FilterParams::new(BITS * 2, HASHES).unwrap())
        .unwrap()
        .to_bytes()
        .unwrap();
    let cache = BloomCacheBuilder::new(10)
        .filter_params(BITS, HASHES)
        .loader(move |_: &str| Some(foreign.clone()))
        .build()
        .unwrap();
    assert!(matches!(cache.test("k", b"x"), Err(CacheError::CorruptState { .. })));
}

#[test]
fn empty_loader_result_means_no_prior_state() {
    let cache = BloomCacheBuilder::new(10)
        .filter_params(BITS, HASHES)
        .loader(|_: &str| Some(Vec::new()))
        .build()
        .unwrap();
    assert!(!cache.test("k", b"x").unwrap());
    cache.put("k", b"x").unwrap();
    assert!(cache.test("k", b"x").unwrap());
}

// ---------------------------------------------------------------------------
// Concurrency
// ---------------------------------------------------------------------------

/// Runs `f` on another thread and fails the test if it does not finish in time.
fn within_deadline(f: impl FnOnce() + Send + 'static) {
    let done = Arc::new(AtomicBool::new(false));
    let done2 = Arc::clone(&done);
    let handle = thread::spawn(move || {
        f();
        done2.store(true, Ordering::SeqCst);
    });
    assert!(eventually(|| done.load(Ordering::SeqCst)), "deadlock: work did not finish");
    handle.join().unwrap();
}

#[test]
fn concurrent_put_and_test_over_small_key_space() {
    let (cache, _log) = recording_cache(10);
    let puts: Arc<Mutex<Vec<(String, u8)>>> = Arc::default();
    let over_capacity = Arc::new(AtomicBool::new(false));
    let stop = Arc::new(AtomicBool::new(false));

    let watcher = {
        let (cache, over, stop) = (cache.clone(), Arc::clone(&over_capacity), Arc::clone(&stop));
        thread::spawn(move || {
            while !stop.load(Ordering::SeqCst) {
                if cache.len() > 10 {
                    over.store(true, Ordering::SeqCst);
                }
                thread::yield_now();
            }
        })
    };

    let (c, p) = (cache.clone(), Arc::clone(&puts));
    within_deadline(move || {
        let mut handles = Vec::new();
        for _ in 0..8 {
            let (c, p) = (c.clone(), Arc::clone(&p));
            handles.push(thread::spawn(move || {
                let mut rng = rand::thread_rng();
                for _ in 0..125 {
                    let key = rng.gen_range(0..10).to_string();
                    let item: u8 = rng.gen();
                    if rng.gen_bool(0.5) {
                        c.put(&key, &[item]).unwrap();
                        p.lock().push((key, item));
                    } else {
                        c.test(&key, &[item]).unwrap();
                    }
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
    });
    stop.store(true, Ordering::SeqCst);
    watcher.join().unwrap();

    assert!(!over_capacity.load(Ordering::SeqCst), "capacity exceeded");
    for (key, item) in puts.lock().iter() {
        assert!(cache.test(key, &[*item]).unwrap(), "lost update for {key}/{item}");
    }
}

#[test]
fn concurrent_test_and_put_admits_each_item_once() {
    let (cache, _log) = recording_cache(4);
    let admitted = Arc::new(AtomicUsize::new(0));

    let (c, a) = (cache.clone(), Arc::clone(&admitted));
    within_deadline(move || {
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let (c, a) = (c.clone(), Arc::clone(&a));
                thread::spawn(move || {
                    for i in 0..50u32 {
                        if c.test_and_put("stream", &i.to_le_bytes()).unwrap() {
                            a.fetch_add(1, Ordering::SeqCst);
                        }
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
    });

    // Exactly one thread admits each item, modulo false positives.
    let admitted = admitted.load(Ordering::SeqCst);
    assert!((45..=50).contains(&admitted), "admitted {admitted}");
}

#[test]
fn slow_loader_does_not_block_other_keys() {
    let entered = Arc::new(AtomicBool::new(false));
    let release = Arc::new(AtomicBool::new(false));
    let (e, r) = (Arc::clone(&entered), Arc::clone(&release));

    let cache = BloomCacheBuilder::new(10)
        .filter_params(BITS, HASHES)
        .loader(move |key: &str| {
            if key == "slow" {
                e.store(true, Ordering::SeqCst);
                while !r.load(Ordering::SeqCst) {
                    thread::sleep(Duration::from_millis(1));
                }
            }
            None
        })
        .build()
        .unwrap();

    let slow = {
        let cache = cache.clone();
        thread::spawn(move || cache.put("slow", b"x").unwrap())
    };
    assert!(eventually(|| entered.load(Ordering::SeqCst)));

    let c = cache.clone();
    within_deadline(move || {
        c.put("fast", b"y").unwrap();
        assert!(c.test("fast", b"y").unwrap());
        c.flush().unwrap();
    });

    release.store(true, Ordering::SeqCst);
    slow.join().unwrap();
    assert!(cache.test("slow", b"x").unwrap());
}

#[test]
fn persister_may_call_back_into_the_cache() {
    let cell: Arc<Mutex<Option<BloomCache>>> = Arc::default();
    let seen = Arc::new(AtomicUsize::new(0));
    let (cell2, seen2) = (Arc::clone(&cell), Arc::clone(&seen));

    let cache = BloomCacheBuilder::new(1)
        .filter_params(BITS, HASHES)
        .persist_workers(1)
        .persist_queue_depth(1)
        .persister(move |key: &str, _: &[u8]| {
            let cache = cell2.lock().clone();
            if let Some(cache) = cache {
                // Re-entering from a write-back must not deadlock.
                let _ = cache.contains(key);
                let _ = cache.test("other", b"p");
            }
            seen2.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .build()
        .unwrap();
    *cell.lock() = Some(cache.clone());

    let c = cache.clone();
    within_deadline(move || {
        for i in 0..50 {
            c.put(&format!("k{i}"), b"v").unwrap();
        }
        c.flush().unwrap();
    });
    assert!(eventually(|| seen.load(Ordering::SeqCst) >= 49));
    // The persister's handle keeps the cache and its workers alive.
    cell.lock().take();
}
