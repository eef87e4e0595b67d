use crate::types::SessionPhase;
use std::time::Duration;

const MIN_DELAY_MS: u64 = 1000;
const JITTER_RATIO: f64 = 0.1;

pub(crate) fn should_pause_refresh(phase: SessionPhase) -> bool {
    matches!(phase, SessionPhase::LoggedOut | SessionPhase::Authenticating)
}

fn compute_next_delay_ms_with_nanos(base_ms: u64, ratio: f64, nanos: i128) -> u64 {
    let frac = ((nanos % 1000) as f64) / 1000.0;
    let delta = (frac * 2.0 - 1.0) * (base_ms as f64 * ratio);
    ((base_ms as f64 + delta).max(MIN_DELAY_MS as f64)) as u64
}

/// Time until the next proactive renewal, or `None` while there is no
/// session to keep alive.
pub(crate) fn compute_next_delay(interval: Duration, phase: SessionPhase) -> Option<Duration> {
    if should_pause_refresh(phase) {
        return None;
    }
    let base_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX / 2);
    let nanos = time::OffsetDateTime::now_utc().unix_timestamp_nanos();
    Some(Duration::from_millis(compute_next_delay_ms_with_nanos(
        base_ms,
        JITTER_RATIO,
        nanos,
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pauses_without_an_established_session() {
        assert!(should_pause_refresh(SessionPhase::LoggedOut));
        assert!(should_pause_refresh(SessionPhase::Authenticating));
        assert!(!should_pause_refresh(SessionPhase::Authenticated));
        assert!(!should_pause_refresh(SessionPhase::RefreshingToken));
    }

    #[test]
    fn compute_next_delay_ms_with_nanos_is_bounded() {
        let base_ms = 840_000_u64;

        let early = compute_next_delay_ms_with_nanos(base_ms, 0.1, 0);
        assert!(early <= base_ms);
        assert!(early >= 756_000);

        let late = compute_next_delay_ms_with_nanos(base_ms, 0.1, 999);
        assert!(late >= base_ms);
        assert!(late <= 924_000);

        let min = compute_next_delay_ms_with_nanos(500, 0.1, 0);
        assert!(min >= MIN_DELAY_MS);
    }

    #[test]
    fn compute_next_delay_returns_none_when_logged_out() {
        assert_eq!(
            compute_next_delay(Duration::from_secs(840), SessionPhase::LoggedOut),
            None
        );
        assert!(compute_next_delay(Duration::from_secs(840), SessionPhase::Authenticated).is_some());
    }
}
