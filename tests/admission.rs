use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use rand::Rng;
use shardgate::ratelimit::{LimiterSettings, ManualClock, RateLimiter};

fn manual_limiter(burst: usize) -> (Arc<RateLimiter>, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(1_000_000_000));
    let settings = LimiterSettings::new(Duration::from_secs(60), burst);
    let limiter = RateLimiter::with_clock(settings, clock.clone()).unwrap();
    (Arc::new(limiter), clock)
}

#[test]
fn concurrent_callers_never_exceed_burst_for_one_key() {
    let (limiter, _clock) = manual_limiter(10);
    let admitted = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let limiter = Arc::clone(&limiter);
            let admitted = Arc::clone(&admitted);
            thread::spawn(move || {
                for _ in 0..100 {
                    if limiter.allow_request(77) {
                        admitted.fetch_add(1, Ordering::SeqCst);
                    }
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(admitted.load(Ordering::SeqCst), 10);
    assert_eq!(limiter.queue_len(77), Some(10));
    assert_eq!(limiter.key_count(), 1);
}

#[test]
fn many_keys_each_get_their_full_budget() {
    let (limiter, _clock) = manual_limiter(5);
    let keys: Vec<i64> = (0..500).collect();

    let handles: Vec<_> = keys
        .chunks(50)
        .map(|chunk| {
            let limiter = Arc::clone(&limiter);
            let chunk = chunk.to_vec();
            thread::spawn(move || {
                let mut rng = rand::thread_rng();
                let mut admitted = 0;
                for _ in 0..chunk.len() * 10 {
                    let key = chunk[rng.gen_range(0..chunk.len())];
                    if limiter.allow_request(key) {
                        admitted += 1;
                    }
                }
                // Top up every key so each one is driven past its cap.
                for &key in &chunk {
                    for _ in 0..6 {
                        if limiter.allow_request(key) {
                            admitted += 1;
                        }
                    }
                }
                admitted
            })
        })
        .collect();

    let total: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
    assert_eq!(total, keys.len() * 5);
    assert_eq!(limiter.key_count(), keys.len());
    for key in keys {
        assert_eq!(limiter.queue_len(key), Some(5));
    }
}

#[test]
fn window_slides_after_oldest_entry_expires() {
    let (limiter, clock) = manual_limiter(10);

    let results: Vec<bool> = (0..11).map(|_| limiter.allow_request(1)).collect();
    assert_eq!(&results[..10], &[true; 10]);
    assert!(!results[10]);

    clock.advance(Duration::from_secs(61));
    assert!(limiter.allow_request(1));
}

#[test]
fn interleaved_keys_do_not_share_budget() {
    let (limiter, _clock) = manual_limiter(10);

    for _ in 0..10 {
        assert!(limiter.allow_request(1));
    }
    assert!(!limiter.allow_request(1));

    for _ in 0..10 {
        assert!(limiter.allow_request(2));
        assert!(!limiter.allow_request(1));
    }
    assert!(!limiter.allow_request(2));
}

#[test]
fn admissions_racing_a_sweep_stay_within_burst() {
    let (limiter, clock) = manual_limiter(3);
    let idle = Duration::from_secs(1);

    for round in 0..50 {
        // Age everything out so every sweep reclaims the key.
        clock.advance(Duration::from_secs(600));

        let admitted = Arc::new(AtomicUsize::new(0));
        let workers: Vec<_> = (0..4)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                let admitted = Arc::clone(&admitted);
                thread::spawn(move || {
                    for _ in 0..5 {
                        if limiter.allow_request(round) {
                            admitted.fetch_add(1, Ordering::SeqCst);
                        }
                    }
                })
            })
            .collect();

        let sweeper = {
            let limiter = Arc::clone(&limiter);
            thread::spawn(move || limiter.sweep_at(limiter.now_nanos(), idle))
        };

        for worker in workers {
            worker.join().unwrap();
        }
        sweeper.join().unwrap();

        // The sweep runs at the same instant as the admissions, so it can
        // never reclaim a key that has just been used.
        assert_eq!(admitted.load(Ordering::SeqCst), 3);
    }
}

#[test]
fn negative_keys_are_rejected_without_state() {
    let (limiter, _clock) = manual_limiter(10);
    assert!(!limiter.allow_request(-1));
    assert!(limiter.try_allow_request(i64::MIN).is_err());
    assert_eq!(limiter.key_count(), 0);
}
