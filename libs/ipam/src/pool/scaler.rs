use serde::{Deserialize, Serialize};

/// Fallback pool ceiling when the orchestrator does not announce one.
pub const DEFAULT_MAX_IP_COUNT: i64 = 250;

/// Scaling policy as observed from the NNC status. Raw values from the wire
/// must go through [`ScalerPolicy::normalized`] before use.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScalerPolicy {
    pub batch_size: i64,
    pub max_ip_count: i64,
    pub request_threshold_percent: i64,
    pub release_threshold_percent: i64,
}

impl ScalerPolicy {
    /// Clamp the policy into its invariants:
    ///
    /// - `max_ip_count >= 1`, falling back to [`DEFAULT_MAX_IP_COUNT`]
    /// - `1 <= batch_size <= max_ip_count`
    /// - `1 <= request_threshold_percent <= 100`
    /// - `release_threshold_percent >= request_threshold_percent + 100`, so
    ///   the release band sits at least one whole batch above the request
    ///   threshold and the pool cannot oscillate
    pub fn normalized(mut self) -> Self {
        if self.max_ip_count < 1 {
            self.max_ip_count = DEFAULT_MAX_IP_COUNT;
        }
        self.batch_size = self.batch_size.clamp(1, self.max_ip_count);
        self.request_threshold_percent = self.request_threshold_percent.clamp(1, 100);
        if self.release_threshold_percent < self.request_threshold_percent + 100 {
            self.release_threshold_percent = self.request_threshold_percent + 100;
        }
        self
    }

    /// Free-IP floor below which the pool scales up.
    pub fn min_free_ip_count(&self) -> i64 {
        percent_of_batch(self.batch_size, self.request_threshold_percent)
    }

    /// Free-IP ceiling at which the pool scales down.
    pub fn max_free_ip_count(&self) -> i64 {
        percent_of_batch(self.batch_size, self.release_threshold_percent)
    }
}

// .5 rounds up
fn percent_of_batch(batch: i64, percent: i64) -> i64 {
    (batch * percent + 50) / 100
}

#[cfg(test)]
mod test {
    use super::*;

    fn policy(batch: i64, request: i64, release: i64) -> ScalerPolicy {
        ScalerPolicy {
            batch_size: batch,
            max_ip_count: 250,
            request_threshold_percent: request,
            release_threshold_percent: release,
        }
        .normalized()
    }

    #[test]
    fn test_free_ip_counts() {
        let p = policy(16, 50, 150);
        assert_eq!(p.min_free_ip_count(), 8);
        assert_eq!(p.max_free_ip_count(), 24);
    }

    #[test]
    fn test_rounding_half_up() {
        let p = policy(3, 50, 150);
        // 1.5 rounds to 2, 4.5 rounds to 5
        assert_eq!(p.min_free_ip_count(), 2);
        assert_eq!(p.max_free_ip_count(), 5);
    }

    #[test]
    fn test_free_ip_counts_monotonic_in_batch() {
        let mut last_min = 0;
        let mut last_max = 0;
        for batch in 1..=64 {
            let p = policy(batch, 50, 150);
            assert!(p.min_free_ip_count() >= last_min);
            assert!(p.max_free_ip_count() >= last_max);
            last_min = p.min_free_ip_count();
            last_max = p.max_free_ip_count();
        }
    }

    #[test]
    fn test_normalized_is_idempotent() {
        let once = ScalerPolicy {
            batch_size: 0,
            max_ip_count: 0,
            request_threshold_percent: 0,
            release_threshold_percent: 0,
        }
        .normalized();
        assert_eq!(once, once.normalized());
        assert_eq!(once.max_ip_count, DEFAULT_MAX_IP_COUNT);
        assert_eq!(once.batch_size, 1);
        assert_eq!(once.request_threshold_percent, 1);
        assert_eq!(once.release_threshold_percent, 101);
    }

    #[test]
    fn test_batch_clamped_to_max() {
        let p = ScalerPolicy {
            batch_size: 500,
            max_ip_count: 100,
            request_threshold_percent: 50,
            release_threshold_percent: 150,
        }
        .normalized();
        assert_eq!(p.batch_size, 100);
    }

    #[test]
    fn test_release_band_kept_above_request_band() {
        let p = ScalerPolicy {
            batch_size: 10,
            max_ip_count: 100,
            request_threshold_percent: 80,
            release_threshold_percent: 120,
        }
        .normalized();
        assert_eq!(p.release_threshold_percent, 180);
    }
}
