/// Calendar-day grouping and timestamp labels for the chat view
use crate::messenger_types::Message;
use chrono::{DateTime, Days, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Display;

/// Contiguous run of messages sharing one local calendar date
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateGroup {
    pub date: NaiveDate,
    pub messages: Vec<Message>,
}

impl DateGroup {
    /// "Today", "Yesterday" or e.g. "March 9, 2024"
    pub fn label(&self, today: NaiveDate) -> String {
        if self.date == today {
            "Today".to_string()
        } else if Some(self.date) == today.checked_sub_days(Days::new(1)) {
            "Yesterday".to_string()
        } else {
            self.date.format("%B %-d, %Y").to_string()
        }
    }
}

/// Split an ordered sequence into runs by local date in `tz`.
///
/// Only adjacent messages are merged, so order across and within groups is
/// exactly the input order.
pub fn group_by_day<Tz: TimeZone>(messages: &[Message], tz: &Tz) -> Vec<DateGroup> {
    let mut groups: Vec<DateGroup> = Vec::new();
    for message in messages {
        let date = message.created_at.with_timezone(tz).date_naive();
        match groups.last_mut() {
            Some(group) if group.date == date => group.messages.push(message.clone()),
            _ => groups.push(DateGroup {
                date,
                messages: vec![message.clone()],
            }),
        }
    }
    groups
}

/// `"14:05"` today, `"Yesterday, 14:05"`, otherwise `"Mar 9, 14:05"`
pub fn format_message_time<Tz>(at: DateTime<Utc>, now: DateTime<Utc>, tz: &Tz) -> String
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    let local = at.with_timezone(tz);
    let today = now.with_timezone(tz).date_naive();
    let date = local.date_naive();

    if date == today {
        local.format("%H:%M").to_string()
    } else if Some(date) == today.checked_sub_days(Days::new(1)) {
        format!("Yesterday, {}", local.format("%H:%M"))
    } else {
        local.format("%b %-d, %H:%M").to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::FixedOffset;

    fn msg(id: &str, at: DateTime<Utc>) -> Message {
        Message {
            id: id.to_string(),
            content: id.to_string(),
            sender_id: "a".to_string(),
            receiver_id: "b".to_string(),
            created_at: at,
            read_status: false,
        }
    }

    fn utc(d: u32, h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, d, h, m, 0).unwrap()
    }

    #[test]
    fn test_groups_follow_local_dates() {
        let messages = vec![
            msg("1", utc(9, 20, 0)),
            msg("2", utc(9, 23, 30)),
            msg("3", utc(10, 9, 0)),
        ];
        let groups = group_by_day(&messages, &Utc);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].messages.len(), 2);

        // UTC+2: 23:30 on the 9th is already the 10th
        let plus_two = FixedOffset::east_opt(2 * 3600).unwrap();
        let groups = group_by_day(&messages, &plus_two);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].messages.len(), 1);
        assert_eq!(groups[1].messages.len(), 2);
    }

    #[test]
    fn test_groups_preserve_order() {
        let messages = vec![msg("a", utc(1, 8, 0)), msg("b", utc(1, 9, 0)), msg("c", utc(2, 1, 0))];
        let flat: Vec<_> = group_by_day(&messages, &Utc)
            .into_iter()
            .flat_map(|g| g.messages)
            .map(|m| m.id)
            .collect();
        assert_eq!(flat, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_empty_sequence_has_no_groups() {
        assert!(group_by_day(&[], &Utc).is_empty());
    }

    #[test]
    fn test_labels() {
        let today = utc(10, 12, 0).date_naive();
        let group = |d| DateGroup { date: utc(d, 0, 0).date_naive(), messages: vec![] };
        assert_eq!(group(10).label(today), "Today");
        assert_eq!(group(9).label(today), "Yesterday");
        assert_eq!(group(2).label(today), "March 2, 2024");
    }

    #[test]
    fn test_format_message_time() {
        let now = utc(10, 18, 0);
        assert_eq!(format_message_time(utc(10, 14, 5), now, &Utc), "14:05");
        assert_eq!(format_message_time(utc(9, 14, 5), now, &Utc), "Yesterday, 14:05");
        assert_eq!(format_message_time(utc(3, 7, 45), now, &Utc), "Mar 3, 07:45");
    }
}
