use std::sync::Arc;
use std::sync::Barrier;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::thread;
use std::time::Duration;

use more_asserts::assert_ge;
use more_asserts::assert_le;
use tier_limit::GlobalLimiter;
use tier_limit::Key;
use tier_limit::LimitMode;
use tier_limit::Rule;
use tier_limit::ipv4_to_uint;

fn burst(rule: &Rule, key: &str, n: usize) -> usize {
    (0..n).filter(|_| rule.allow_visit(key)).count()
}

#[test]
fn single_rule_basic_cap() {
    let mut rule: Rule = Rule::new();
    rule.add_rule(Duration::from_secs(1), 3, None);

    let admitted = burst(&rule, "client", 10);
    assert_eq!(admitted, 3);
    assert_eq!(10 - admitted, 7);
}

#[test]
fn composite_rules_over_time() {
    let mut rule: Rule = Rule::new();
    rule.add_rule(Duration::from_secs(1), 3, None)
        .add_rule(Duration::from_secs(2), 4, Some(5));

    assert_eq!(burst(&rule, "client", 10), 3);
    assert_eq!(rule.remaining("client"), vec![0, 1]);

    thread::sleep(Duration::from_secs(1));
    assert_eq!(burst(&rule, "client", 10), 1);

    thread::sleep(Duration::from_secs(2));
    assert_eq!(burst(&rule, "client", 10), 3);
}

#[test]
fn ip_keying() {
    assert_eq!(ipv4_to_uint("192.168.1.1"), 3232235777);
    assert_eq!(ipv4_to_uint("invalid"), 0);

    let mut rule: Rule = Rule::new();
    rule.add_rule(Duration::from_secs(1), 3, None);
    assert!(rule.remaining_visits_by_ip("invalid").is_empty());
    assert!(rule.allow_visit_by_ip("192.168.1.1"));
    assert_eq!(rule.get_online(), vec!["192.168.1.1"]);
}

#[test]
fn slot_recovery_by_sweeper() {
    let window = Duration::from_millis(100);
    let mut rule: Rule = Rule::new();
    rule.add_rule(window, 2, Some(1));

    for n in 0..10u32 {
        assert!(rule.allow_visit(n));
    }
    let single = &rule.rules()[0];
    assert_eq!(single.slots(), 10);

    // Long enough for the deadlines to pass and one sweeper tick to run
    thread::sleep(window + single.cleanup_interval() + Duration::from_millis(300));

    assert_ge!(single.slots(), single.estimated());
    assert_eq!(single.used_slots(), 0);
    assert!(rule.get_online().is_empty());

    assert!(rule.allow_visit("newcomer"));
    assert_eq!(single.used_slots(), 1);
    assert_le!(single.slots(), 10);
}

#[test]
fn remaining_decreases_by_one_per_admission() {
    let mut rule: Rule = Rule::new();
    rule.add_rule(Duration::from_secs(5), 4, None)
        .add_rule(Duration::from_secs(10), 2, None);

    let key = Key::composite([Key::from("alice"), Key::from("/upload")]);
    let before = rule.remaining(key.clone());
    assert!(rule.allow_visit(key.clone()));
    let after = rule.remaining(key.clone());
    for (b, a) in before.iter().zip(&after) {
        assert_eq!(*b, a + 1);
    }
    assert_eq!(rule.get_online(), vec!["alice|/upload"]);
}

#[test]
fn capacity_holds_under_contention() {
    let mut rule: Rule = Rule::new();
    rule.add_rule(Duration::from_secs(10), 25, Some(4));
    let rule = Arc::new(rule);

    let barrier = Arc::new(Barrier::new(8));
    let handles: Vec<_> = (0..8)
        .map(|t| {
            let rule = Arc::clone(&rule);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                let mut admitted = [0usize; 4];
                for i in 0..100 {
                    let key = (i + t) % 4;
                    if rule.allow_visit(key as u64) {
                        admitted[key] += 1;
                    }
                }
                admitted
            })
        })
        .collect();

    let mut totals = [0usize; 4];
    for handle in handles {
        for (total, n) in totals.iter_mut().zip(handle.join().unwrap()) {
            *total += n;
        }
    }
    assert_eq!(totals, [25; 4]);
}

#[test]
fn global_limiter_with_start_barrier() {
    let limiter = Arc::new(GlobalLimiter::new(3).with_mode(LimitMode::Strict));
    let passed = Arc::new(AtomicUsize::new(0));
    let overflowed = Arc::new(AtomicUsize::new(0));
    let barrier = Arc::new(Barrier::new(10));

    let handles: Vec<_> = (0..10)
        .map(|_| {
            let limiter = Arc::clone(&limiter);
            let passed = Arc::clone(&passed);
            let overflowed = Arc::clone(&overflowed);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                match limiter.try_acquire() {
                    Some(_guard) => {
                        passed.fetch_add(1, Ordering::SeqCst);
                        thread::sleep(Duration::from_millis(100));
                    }
                    None => {
                        overflowed.fetch_add(1, Ordering::SeqCst);
                    }
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(passed.load(Ordering::SeqCst), 3);
    assert_eq!(overflowed.load(Ordering::SeqCst), 7);
    assert_eq!(limiter.in_flight(), 0);
}
