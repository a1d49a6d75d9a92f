use std::collections::BTreeSet;
use std::fmt;
use std::fmt::Display;
use std::hash::Hash;
use std::net::Ipv4Addr;
use std::ops::ControlFlow;
use std::time::Duration;

use quanta::Clock;
use serde::Deserialize;
use serde::Serialize;
use tracing::trace;

use super::Reason;
use super::Strategy;
use crate::Key;
use crate::SingleRule;
use crate::config::RuleConfig;
use crate::ip::parse_ipv4;
use crate::ip::ipv4_to_uint;

/// How a [`Rule`] treats earlier sub-rules when a later one rejects.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdmissionMode {
    /// Sub-rules are consulted in order and the first rejection stops the
    /// walk. Sub-rules that already admitted keep that admission.
    #[default]
    Independent,
    /// A rejection rolls back the admissions already recorded by earlier
    /// sub-rules, so a rejected call leaves no trace.
    Transactional,
}

/// An ordered set of sliding windows applied together, e.g. "5 per second
/// and 100 per hour". A key is admitted only if every window admits it.
///
/// ```rust
/// use std::time::Duration;
/// use tier_limit::Rule;
///
/// let mut rule: Rule = Rule::new();
/// rule.add_rule(Duration::from_secs(1), 5, None);
/// rule.add_rule(Duration::from_secs(3600), 100, Some(1000));
///
/// assert!(rule.allow_visit("user-1"));
/// assert_eq!(rule.remaining("user-1"), vec![4, 99]);
/// ```
pub struct Rule<K = Key> {
    rules: Vec<SingleRule<K>>,
    mode: AdmissionMode,
    clock: Clock,
}

impl<K> Rule<K>
where
    K: Eq + Hash + Clone + Send + 'static,
{
    /// Creates an empty rule on the system clock.
    ///
    /// An empty rule admits everything.
    pub fn new() -> Self {
        Self::with_clock(Clock::new())
    }

    /// Creates an empty rule whose windows read time from `clock`.
    pub fn with_clock(clock: Clock) -> Self {
        Self {
            rules: Vec::new(),
            mode: AdmissionMode::default(),
            clock,
        }
    }

    /// Builds a rule from configuration.
    pub fn from_config(config: &RuleConfig) -> Self {
        let mut rule = Self::new().with_mode(config.mode);
        for window in &config.rules {
            rule.add_rule(window.window, window.allowance, window.estimated);
        }
        rule
    }

    pub fn with_mode(mut self, mode: AdmissionMode) -> Self {
        self.mode = mode;
        self
    }

    /// Appends a window allowing `allowance` admissions per key per `window`.
    ///
    /// `estimated` is the expected number of concurrently active keys; it
    /// sizes the initial slot vector and the floor slots shrink back to.
    pub fn add_rule(
        &mut self,
        window: Duration,
        allowance: usize,
        estimated: Option<usize>,
    ) -> &mut Self {
        self.rules.push(SingleRule::with_clock(
            window,
            allowance,
            estimated,
            self.clock.clone(),
        ));
        self
    }
}

impl<K> Rule<K>
where
    K: Eq + Hash + Clone,
{
    /// Records a visit from `key`, returning whether it is allowed.
    ///
    /// Keys made of several parts should be passed as one composite key,
    /// e.g. [`Key::composite`] or a tuple key type.
    pub fn allow_visit(&self, key: impl Into<K>) -> bool {
        self.process(&key.into()).is_continue()
    }

    /// Like [`allow_visit`](Self::allow_visit) but reports when to retry.
    pub fn check(&self, key: impl Into<K>) -> ControlFlow<Reason> {
        self.process(&key.into())
    }

    /// Admissions still available to `key`, one entry per window, in the
    /// order the windows were added.
    pub fn remaining(&self, key: impl Into<K>) -> Vec<usize> {
        let key = key.into();
        self.rules.iter().map(|rule| rule.remaining(&key)).collect()
    }

    pub fn mode(&self) -> AdmissionMode {
        self.mode
    }

    /// The windows of this rule, in insertion order.
    pub fn rules(&self) -> &[SingleRule<K>] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl<K> Rule<K>
where
    K: Eq + Hash + Clone + From<Ipv4Addr>,
{
    /// Records a visit keyed by a dotted-decimal IPv4 address.
    ///
    /// Unparseable addresses all share the `0.0.0.0` key.
    pub fn allow_visit_by_ip(&self, ip: &str) -> bool {
        self.allow_visit(Ipv4Addr::from(ipv4_to_uint(ip)))
    }

    /// Remaining admissions for an IP key; empty if `ip` does not parse.
    pub fn remaining_visits_by_ip(&self, ip: &str) -> Vec<usize> {
        match parse_ipv4(ip) {
            Ok(n) => self.remaining(Ipv4Addr::from(n)),
            Err(err) => {
                trace!(ip, error = %err, "no remaining visits for unparseable address");
                Vec::new()
            }
        }
    }
}

impl<K> Rule<K>
where
    K: Eq + Hash + Clone + Display,
{
    /// Every key currently holding a slot in any window, rendered as strings,
    /// sorted and without duplicates.
    pub fn get_online(&self) -> Vec<String> {
        self.rules
            .iter()
            .flat_map(|rule| rule.online_keys())
            .map(|key| key.to_string())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}

impl<K> Strategy<K> for Rule<K>
where
    K: Eq + Hash + Clone,
{
    fn process(&self, key: &K) -> ControlFlow<Reason> {
        for (i, rule) in self.rules.iter().enumerate() {
            if let ControlFlow::Break(reason) = rule.process(key) {
                if self.mode == AdmissionMode::Transactional {
                    for admitted in &self.rules[..i] {
                        admitted.rollback(key);
                    }
                }
                return ControlFlow::Break(reason);
            }
        }
        ControlFlow::Continue(())
    }
}

impl<K> Default for Rule<K>
where
    K: Eq + Hash + Clone + Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K> fmt::Debug for Rule<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rule")
            .field("rules", &self.rules)
            .field("mode", &self.mode)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;

    use quanta::Mock;

    fn mocked() -> (Rule, Arc<Mock>) {
        let (clock, mock) = Clock::mock();
        (Rule::with_clock(clock), mock)
    }

    fn burst(rule: &Rule, key: &str, n: usize) -> usize {
        (0..n).filter(|_| rule.allow_visit(key)).count()
    }

    #[test]
    fn it_admits_everything_without_windows() {
        let rule: Rule = Rule::new();
        assert!(rule.is_empty());
        assert_eq!(burst(&rule, "k", 100), 100);
        assert!(rule.remaining("k").is_empty());
    }

    #[test]
    fn it_applies_every_window() {
        let (mut rule, mock) = mocked();
        rule.add_rule(Duration::from_secs(1), 3, None)
            .add_rule(Duration::from_secs(2), 4, Some(5));

        assert_eq!(burst(&rule, "k", 10), 3);
        assert_eq!(rule.remaining("k"), vec![0, 1]);

        mock.increment(Duration::from_millis(1001));
        assert_eq!(burst(&rule, "k", 10), 1);

        mock.increment(Duration::from_millis(2001));
        assert_eq!(burst(&rule, "k", 10), 3);
    }

    #[test]
    fn test_independent_mode_keeps_earlier_admissions() {
        let (mut rule, _mock) = mocked();
        rule.add_rule(Duration::from_secs(10), 5, None)
            .add_rule(Duration::from_secs(10), 1, None);

        assert!(rule.allow_visit("k"));
        assert!(!rule.allow_visit("k"));
        // The first window recorded the rejected call too
        assert_eq!(rule.remaining("k"), vec![3, 0]);
    }

    #[test]
    fn test_transactional_mode_rolls_back() {
        let (rule, _mock) = mocked();
        let mut rule = rule.with_mode(AdmissionMode::Transactional);
        rule.add_rule(Duration::from_secs(10), 5, None)
            .add_rule(Duration::from_secs(10), 1, None);

        assert!(rule.allow_visit("k"));
        assert!(!rule.allow_visit("k"));
        assert!(!rule.allow_visit("k"));
        assert_eq!(rule.remaining("k"), vec![4, 0]);
    }

    #[test]
    fn test_check_reports_rejecting_window() {
        let (mut rule, mock) = mocked();
        rule.add_rule(Duration::from_secs(1), 10, None)
            .add_rule(Duration::from_secs(60), 1, None);

        assert!(rule.check("k").is_continue());
        mock.increment(Duration::from_secs(20));
        let ControlFlow::Break(Reason::Overloaded { retry_after }) = rule.check("k") else {
            panic!("second visit should be rejected");
        };
        assert_eq!(retry_after, Duration::from_secs(40) + Duration::from_nanos(1));
    }

    #[test]
    fn test_keys_are_independent() {
        let (mut rule, _mock) = mocked();
        rule.add_rule(Duration::from_secs(1), 2, None);

        assert_eq!(burst(&rule, "a", 5), 2);
        assert_eq!(burst(&rule, "b", 5), 2);
        assert!(rule.allow_visit(Key::from(7u32)));
    }

    #[test]
    fn test_ip_keying() {
        let (mut rule, _mock) = mocked();
        rule.add_rule(Duration::from_secs(1), 2, None);

        assert!(rule.allow_visit_by_ip("192.168.1.1"));
        assert_eq!(rule.remaining_visits_by_ip("192.168.1.1"), vec![1]);
        assert!(rule.remaining_visits_by_ip("invalid").is_empty());

        // Every unparseable address lands in the same bucket
        assert!(rule.allow_visit_by_ip("invalid"));
        assert!(rule.allow_visit_by_ip("999.0.0.1"));
        assert!(!rule.allow_visit_by_ip("not-an-ip"));
        assert_eq!(rule.remaining_visits_by_ip("0.0.0.0"), vec![0]);
    }

    #[test]
    fn test_get_online_is_sorted_and_unique() {
        let (mut rule, _mock) = mocked();
        rule.add_rule(Duration::from_secs(1), 5, None)
            .add_rule(Duration::from_secs(2), 5, None);

        rule.allow_visit("zed");
        rule.allow_visit_by_ip("10.0.0.2");
        rule.allow_visit(42u64);
        rule.allow_visit("alice");

        assert_eq!(
            rule.get_online(),
            vec!["10.0.0.2", "42", "alice", "zed"]
        );
    }

    #[test]
    fn test_get_online_empty_after_expiry() {
        let (mut rule, mock) = mocked();
        rule.add_rule(Duration::from_millis(100), 5, None);

        rule.allow_visit("a");
        mock.increment(Duration::from_millis(101));
        for window in rule.rules() {
            window.sweep();
        }
        assert!(rule.get_online().is_empty());
    }

    #[test]
    fn test_generic_key_type() {
        let mut rule: Rule<(u32, &'static str)> = Rule::new();
        rule.add_rule(Duration::from_secs(1), 1, None);

        assert!(rule.allow_visit((1u32, "/login")));
        assert!(!rule.allow_visit((1u32, "/login")));
        assert!(rule.allow_visit((1u32, "/logout")));
    }
}
