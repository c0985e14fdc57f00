use chrono::{DateTime, Duration, FixedOffset, NaiveTime, TimeZone, Utc};

use parley_types::models::DeliveryMode;

use crate::config::ChatConfig;

/// A delivery mode pinned to a concrete point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolvedDelivery {
    Now,
    At(DateTime<Utc>),
}

impl ResolvedDelivery {
    pub fn scheduled_for(self) -> Option<DateTime<Utc>> {
        match self {
            Self::Now => None,
            Self::At(at) => Some(at),
        }
    }
}

pub fn resolve_delivery(mode: DeliveryMode, now: DateTime<Utc>, config: &ChatConfig) -> ResolvedDelivery {
    match mode {
        DeliveryMode::Immediate => ResolvedDelivery::Now,
        DeliveryMode::BreakTime => {
            ResolvedDelivery::At(next_occurrence(now, config.break_time, config.utc_offset))
        }
        DeliveryMode::AfterWork => {
            ResolvedDelivery::At(next_occurrence(now, config.after_work, config.utc_offset))
        }
        // A timestamp that is already due goes out right away.
        DeliveryMode::At { at } if at > now => ResolvedDelivery::At(at),
        DeliveryMode::At { .. } => ResolvedDelivery::Now,
    }
}

/// The next instant strictly after `now` at which the wall clock at `offset`
/// reads `time`: today if that is still ahead, otherwise tomorrow.
pub fn next_occurrence(now: DateTime<Utc>, time: NaiveTime, offset: FixedOffset) -> DateTime<Utc> {
    let local_date = now.with_timezone(&offset).date_naive();
    let local_target = local_date.and_time(time);
    let target = Utc.from_utc_datetime(
        &(local_target - Duration::seconds(i64::from(offset.local_minus_utc()))),
    );

    if target > now {
        target
    } else {
        target + Duration::days(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::time_of_day;

    fn at(day: u32, hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, day, hour, minute, 0).unwrap()
    }

    #[test]
    fn break_time_before_noon_is_today() {
        let config = ChatConfig::default();
        let resolved = resolve_delivery(DeliveryMode::BreakTime, at(9, 9, 0), &config);
        assert_eq!(resolved, ResolvedDelivery::At(at(9, 12, 0)));
    }

    #[test]
    fn break_time_after_noon_rolls_to_tomorrow() {
        let config = ChatConfig::default();
        let resolved = resolve_delivery(DeliveryMode::BreakTime, at(9, 13, 0), &config);
        assert_eq!(resolved, ResolvedDelivery::At(at(10, 12, 0)));
    }

    #[test]
    fn exactly_at_the_mark_rolls_over() {
        let config = ChatConfig::default();
        let resolved = resolve_delivery(DeliveryMode::AfterWork, at(9, 17, 0), &config);
        assert_eq!(resolved, ResolvedDelivery::At(at(10, 17, 0)));
    }

    #[test]
    fn after_work_rolls_across_month_end() {
        let config = ChatConfig::default();
        let now = Utc.with_ymd_and_hms(2026, 3, 31, 18, 30, 0).unwrap();
        let expected = Utc.with_ymd_and_hms(2026, 4, 1, 17, 0, 0).unwrap();
        assert_eq!(
            resolve_delivery(DeliveryMode::AfterWork, now, &config),
            ResolvedDelivery::At(expected)
        );
    }

    #[test]
    fn local_offset_is_honoured() {
        // UTC+2: local noon is 10:00 UTC.
        let config = ChatConfig {
            utc_offset: FixedOffset::east_opt(2 * 3600).unwrap(),
            break_time: time_of_day(12, 0),
            ..ChatConfig::default()
        };
        assert_eq!(
            resolve_delivery(DeliveryMode::BreakTime, at(9, 9, 0), &config),
            ResolvedDelivery::At(at(9, 10, 0))
        );
        // 23:30 UTC is already 01:30 on the 10th locally.
        assert_eq!(
            resolve_delivery(DeliveryMode::BreakTime, at(9, 23, 30), &config),
            ResolvedDelivery::At(at(10, 10, 0))
        );
    }

    #[test]
    fn explicit_timestamps_are_used_verbatim_unless_due() {
        let config = ChatConfig::default();
        let now = at(9, 9, 0);
        let later = at(11, 8, 15);
        assert_eq!(
            resolve_delivery(DeliveryMode::At { at: later }, now, &config),
            ResolvedDelivery::At(later)
        );
        assert_eq!(
            resolve_delivery(DeliveryMode::At { at: at(8, 9, 0) }, now, &config),
            ResolvedDelivery::Now
        );
        assert_eq!(resolve_delivery(DeliveryMode::Immediate, now, &config), ResolvedDelivery::Now);
    }
}
