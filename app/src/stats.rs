//! Practice statistics computed in memory from already-fetched sessions.
//!
//! Everything here is pure: callers pass "now" in the timezone whose
//! calendar days should be used.

use chrono::{DateTime, Datelike, NaiveDate, TimeZone, Weekday};
use serde::Serialize;
use serene_common::MeditationSession;

const WEEK: [Weekday; 7] = [
    Weekday::Mon,
    Weekday::Tue,
    Weekday::Wed,
    Weekday::Thu,
    Weekday::Fri,
    Weekday::Sat,
    Weekday::Sun,
];

/// Minutes practised on one weekday of the current week.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DayMinutes {
    pub day: Weekday,
    pub minutes: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PracticeStats {
    pub total_minutes: u64,
    pub completed_count: usize,
    pub streak_days: u32,
    /// Monday through Sunday of the week containing "now".
    pub weekly: [DayMinutes; 7],
}

impl PracticeStats {
    /// Minutes for one weekday of the current week.
    pub fn minutes_on(&self, day: Weekday) -> u64 {
        self.weekly[day.num_days_from_monday() as usize].minutes
    }
}

pub fn summarize<Tz: TimeZone>(sessions: &[MeditationSession], now: &DateTime<Tz>) -> PracticeStats {
    let tz = now.timezone();
    let today = now.date_naive();
    let dated: Vec<(NaiveDate, u32)> = sessions
        .iter()
        .map(|s| (s.completed_at.with_timezone(&tz).date_naive(), s.duration_minutes))
        .collect();

    PracticeStats {
        total_minutes: total_minutes(sessions),
        completed_count: completed_count(sessions),
        streak_days: streak_days(dated.iter().map(|(date, _)| *date), today),
        weekly: weekly_minutes(&dated, today),
    }
}

pub fn total_minutes(sessions: &[MeditationSession]) -> u64 {
    sessions.iter().map(|s| u64::from(s.duration_minutes)).sum()
}

pub fn completed_count(sessions: &[MeditationSession]) -> usize {
    sessions.iter().filter(|s| s.completed).count()
}

/// Consecutive practice days ending today or yesterday.
///
/// Zero when the most recent practice day is older than yesterday. Days
/// after `today` are ignored.
pub fn streak_days(dates: impl IntoIterator<Item = NaiveDate>, today: NaiveDate) -> u32 {
    let mut days: Vec<NaiveDate> = dates.into_iter().filter(|d| *d <= today).collect();
    days.sort_unstable_by(|a, b| b.cmp(a));
    days.dedup();

    let Some(&latest) = days.first() else {
        return 0;
    };
    if today.signed_duration_since(latest).num_days() > 1 {
        return 0;
    }

    let mut streak = 1;
    for pair in days.windows(2) {
        if pair[0].signed_duration_since(pair[1]).num_days() != 1 {
            break;
        }
        streak += 1;
    }
    streak
}

/// Minutes per weekday for the Monday-Sunday week containing `today`.
pub fn weekly_minutes(dated: &[(NaiveDate, u32)], today: NaiveDate) -> [DayMinutes; 7] {
    let mut weekly = WEEK.map(|day| DayMinutes { day, minutes: 0 });
    let week = today.week(Weekday::Mon);
    let (monday, sunday) = (week.first_day(), week.last_day());

    for (date, minutes) in dated {
        if *date >= monday && *date <= sunday {
            let bucket = &mut weekly[date.weekday().num_days_from_monday() as usize];
            bucket.minutes = bucket.minutes.saturating_add(u64::from(*minutes));
        }
    }
    weekly
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, FixedOffset, Utc};

    /// Wednesday 2026-10-14, 09:30 local at UTC+2.
    fn now() -> DateTime<FixedOffset> {
        FixedOffset::east_opt(2 * 3600)
            .unwrap()
            .with_ymd_and_hms(2026, 10, 14, 9, 30, 0)
            .unwrap()
    }

    fn session(days_ago: i64, minutes: u32, completed: bool) -> MeditationSession {
        MeditationSession {
            id: format!("s-{}-{}", days_ago, minutes),
            user_id: "u1".to_string(),
            completed_at: (now() - Duration::days(days_ago)).with_timezone(&Utc),
            duration_minutes: minutes,
            completed,
        }
    }

    fn today() -> NaiveDate {
        now().date_naive()
    }

    fn days_ago(n: i64) -> NaiveDate {
        today() - Duration::days(n)
    }

    #[test]
    fn test_streak_three_consecutive_days() {
        assert_eq!(streak_days([days_ago(0), days_ago(1), days_ago(2)], today()), 3);
    }

    #[test]
    fn test_streak_stops_at_first_gap() {
        assert_eq!(streak_days([days_ago(0), days_ago(3)], today()), 1);
        assert_eq!(streak_days([days_ago(1), days_ago(2), days_ago(4), days_ago(5)], today()), 2);
    }

    #[test]
    fn test_streak_zero_when_latest_is_older_than_yesterday() {
        assert_eq!(streak_days([days_ago(5)], today()), 0);
        assert_eq!(streak_days([days_ago(2), days_ago(3)], today()), 0);
        assert_eq!(streak_days(Vec::new(), today()), 0);
    }

    #[test]
    fn test_streak_counts_each_day_once() {
        assert_eq!(streak_days([days_ago(0), days_ago(0), days_ago(1), days_ago(1)], today()), 2);
    }

    #[test]
    fn test_streak_ignores_future_days() {
        assert_eq!(streak_days([today() + Duration::days(1), days_ago(0)], today()), 1);
    }

    #[test]
    fn test_wednesday_session_lands_in_wednesday_bucket() {
        let stats = summarize(&[session(0, 20, true)], &now());
        assert_eq!(stats.minutes_on(Weekday::Wed), 20);
        for day in WEEK.iter().filter(|d| **d != Weekday::Wed) {
            assert_eq!(stats.minutes_on(*day), 0);
        }
    }

    #[test]
    fn test_weekly_excludes_previous_week() {
        // Two days before Wednesday is Monday, three days is last Sunday.
        let stats = summarize(&[session(2, 10, true), session(3, 30, true)], &now());
        assert_eq!(stats.minutes_on(Weekday::Mon), 10);
        assert_eq!(stats.minutes_on(Weekday::Sun), 0);
        assert_eq!(stats.weekly.iter().map(|d| d.minutes).sum::<u64>(), 10);
    }

    #[test]
    fn test_calendar_day_uses_caller_timezone() {
        // 23:30 UTC on Tuesday is already Wednesday at UTC+2.
        let late = MeditationSession {
            completed_at: Utc.with_ymd_and_hms(2026, 10, 13, 23, 30, 0).unwrap(),
            ..session(0, 15, true)
        };
        let stats = summarize(&[late], &now());
        assert_eq!(stats.minutes_on(Weekday::Wed), 15);
        assert_eq!(stats.streak_days, 1);
    }

    #[test]
    fn test_totals() {
        let sessions = [session(0, 20, true), session(1, 10, false), session(9, 5, true)];
        let stats = summarize(&sessions, &now());
        assert_eq!(stats.total_minutes, 35);
        assert_eq!(stats.completed_count, 2);
        assert_eq!(stats.streak_days, 2);
    }

    #[test]
    fn test_empty_history() {
        let stats = summarize(&[], &now());
        assert_eq!(stats.total_minutes, 0);
        assert_eq!(stats.completed_count, 0);
        assert_eq!(stats.streak_days, 0);
        assert_eq!(stats.weekly[0].day, Weekday::Mon);
        assert_eq!(stats.weekly[6].day, Weekday::Sun);
    }

    #[test]
    fn test_large_durations_do_not_overflow() {
        let sessions = [session(0, u32::MAX, true), session(0, u32::MAX, true)];
        let stats = summarize(&sessions, &now());
        let expected = 2 * u64::from(u32::MAX);
        assert_eq!(stats.minutes_on(Weekday::Wed), expected);
        assert_eq!(stats.total_minutes, expected);
    }
}
