//! Human-readable descriptions of six-field schedule cron expressions.
//!
//! Fields are `minute hour day-of-month month day-of-week year`, separated
//! by single spaces. Day-of-week numbers are read zero-based (`0` = Sunday)
//! when describing. The output is only used to build readable route names,
//! so unrecognised tokens are echoed rather than rejected.

use super::super::errors::TriggerError;

/// A parsed six-field cron expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronFields {
    pub minute: String,
    pub hour: String,
    pub day_of_month: String,
    pub month: String,
    pub day_of_week: String,
    pub year: String,
}

impl CronFields {
    pub fn parse(expression: &str) -> Result<Self, TriggerError> {
        let parts: Vec<&str> = expression.trim().split(' ').collect();
        let [minute, hour, day_of_month, month, day_of_week, year] = parts.as_slice() else {
            return Err(TriggerError::config(format!(
                "cron expression should contain 6 parts: '{expression}'"
            )));
        };
        Ok(Self {
            minute: minute.to_string(),
            hour: hour.to_string(),
            day_of_month: day_of_month.to_string(),
            month: month.to_string(),
            day_of_week: day_of_week.to_string(),
            year: year.to_string(),
        })
    }

    /// Shift plain, list and range hour values by `hours`, wrapping at 24.
    /// Steps and wildcards are left alone.
    pub fn shift_hours(mut self, hours: i32) -> Self {
        let shiftable = !self.hour.is_empty()
            && self
                .hour
                .chars()
                .all(|c| c.is_ascii_digit() || c == '-' || c == ',');
        if hours == 0 || !shiftable {
            return self;
        }
        self.hour = self
            .hour
            .split(',')
            .map(|item| {
                item.split('-')
                    .map(|h| match h.parse::<i32>() {
                        Ok(n) => (n + hours).rem_euclid(24).to_string(),
                        Err(_) => h.to_string(),
                    })
                    .collect::<Vec<_>>()
                    .join("-")
            })
            .collect::<Vec<_>>()
            .join(",");
        self
    }

    /// The fields in the layout the `cron` crate expects: a leading seconds
    /// field and `*` in place of `?`.
    pub fn to_seven_field(&self) -> String {
        let fields = [
            &self.minute,
            &self.hour,
            &self.day_of_month,
            &self.month,
            &self.day_of_week,
            &self.year,
        ];
        let converted: Vec<&str> = fields
            .iter()
            .map(|f| if f.as_str() == "?" { "*" } else { f.as_str() })
            .collect();
        format!("0 {}", converted.join(" "))
    }
}

/// Describe the expression, e.g. `At 10:00 AM, Monday through Friday`.
pub fn describe(fields: &CronFields) -> String {
    let mut description = time_of_day(&fields.minute, &fields.hour);
    description.push_str(&day_of_month_phrase(&fields.day_of_month));
    description.push_str(&day_of_week_phrase(&fields.day_of_week));
    description.push_str(&month_phrase(&fields.month));
    description.push_str(&year_phrase(&fields.year));
    capitalize(&description)
}

// ---------------------------------------------------------------------------
// Token helpers
// ---------------------------------------------------------------------------

fn is_number(token: &str) -> bool {
    !token.is_empty() && token.chars().all(|c| c.is_ascii_digit())
}

fn is_wildcard(token: &str) -> bool {
    matches!(token, "*" | "?" | "")
}

fn as_range(token: &str) -> Option<(&str, &str)> {
    if token.contains(',') || token.contains('/') {
        return None;
    }
    token.split_once('-')
}

fn as_step(token: &str) -> Option<(&str, &str)> {
    if token.contains(',') {
        return None;
    }
    token.split_once('/')
}

fn as_list(token: &str) -> Option<Vec<&str>> {
    token.contains(',').then(|| token.split(',').collect())
}

fn join_list(items: &[String]) -> String {
    match items {
        [] => String::new(),
        [only] => only.clone(),
        [init @ .., last] => format!("{} and {last}", init.join(", ")),
    }
}

fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn format_time(hour: &str, minute: &str) -> String {
    match (hour.parse::<u32>(), minute.parse::<u32>()) {
        (Ok(h), Ok(m)) => {
            let period = if h % 24 < 12 { "AM" } else { "PM" };
            let h12 = match h % 12 {
                0 => 12,
                n => n,
            };
            format!("{h12:02}:{m:02} {period}")
        }
        _ => format!("{hour}:{minute}"),
    }
}

fn ordinal(n: &str) -> String {
    match n {
        "1" => "first".into(),
        "2" => "second".into(),
        "3" => "third".into(),
        "4" => "fourth".into(),
        "5" => "fifth".into(),
        other => format!("{other}th"),
    }
}

fn day_name(token: &str) -> String {
    let name = match token.to_ascii_uppercase().as_str() {
        "0" | "7" | "SUN" => "Sunday",
        "1" | "MON" => "Monday",
        "2" | "TUE" => "Tuesday",
        "3" | "WED" => "Wednesday",
        "4" | "THU" => "Thursday",
        "5" | "FRI" => "Friday",
        "6" | "SAT" => "Saturday",
        _ => return token.to_string(),
    };
    name.to_string()
}

fn month_name(token: &str) -> String {
    const MONTHS: [&str; 12] = [
        "January", "February", "March", "April", "May", "June", "July", "August", "September",
        "October", "November", "December",
    ];
    if let Ok(n) = token.parse::<usize>() {
        if (1..=12).contains(&n) {
            return MONTHS[n - 1].to_string();
        }
    }
    let upper = token.to_ascii_uppercase();
    MONTHS
        .iter()
        .find(|m| m[..3].eq_ignore_ascii_case(&upper))
        .map(|m| m.to_string())
        .unwrap_or_else(|| token.to_string())
}

// ---------------------------------------------------------------------------
// Field phrases
// ---------------------------------------------------------------------------

fn time_of_day(minute: &str, hour: &str) -> String {
    if is_number(minute) && is_number(hour) {
        return format!("at {}", format_time(hour, minute));
    }
    if is_number(hour) {
        if let Some((from, to)) = as_range(minute).filter(|(a, b)| is_number(a) && is_number(b)) {
            return format!(
                "every minute between {} and {}",
                format_time(hour, from),
                format_time(hour, to)
            );
        }
    }
    if is_number(minute) {
        if let Some(hours) = as_list(hour).filter(|l| l.iter().all(|h| is_number(h))) {
            let times: Vec<String> = hours.iter().map(|h| format_time(h, minute)).collect();
            return format!("at {}", join_list(&times));
        }
    }

    let minutes = minutes_phrase(minute);
    let hours = hours_phrase(hour);
    match (minutes.is_empty(), hours.is_empty()) {
        (true, true) => "every hour".into(),
        (false, true) => minutes,
        (true, false) => hours,
        (false, false) => format!("{minutes}, {hours}"),
    }
}

fn minutes_phrase(minute: &str) -> String {
    if minute == "*" {
        return "every minute".into();
    }
    if let Some((start, step)) = as_step(minute) {
        let mut phrase = if step == "1" {
            "every minute".to_string()
        } else {
            format!("every {step} minutes")
        };
        if let Some((from, to)) = as_range(start) {
            phrase.push_str(&format!(", minutes {from} through {to} past the hour"));
        } else if is_number(start) && start.parse::<u32>().unwrap_or(0) != 0 {
            phrase.push_str(&format!(", starting at {start} minutes past the hour"));
        }
        return phrase;
    }
    if let Some((from, to)) = as_range(minute) {
        return format!("minutes {from} through {to} past the hour");
    }
    if let Some(items) = as_list(minute) {
        let items: Vec<String> = items.iter().map(|s| s.to_string()).collect();
        return format!("at {} minutes past the hour", join_list(&items));
    }
    if minute == "0" {
        return String::new();
    }
    format!("at {minute} minutes past the hour")
}

fn hours_phrase(hour: &str) -> String {
    if is_wildcard(hour) {
        return String::new();
    }
    if let Some((start, step)) = as_step(hour) {
        let mut phrase = if step == "1" {
            "every hour".to_string()
        } else {
            format!("every {step} hours")
        };
        if let Some((from, to)) = as_range(start) {
            phrase.push_str(&format!(
                ", between {} and {}",
                format_time(from, "00"),
                format_time(to, "59")
            ));
        } else if is_number(start) && start.parse::<u32>().unwrap_or(0) != 0 {
            phrase.push_str(&format!(", starting at {}", format_time(start, "00")));
        }
        return phrase;
    }
    if let Some((from, to)) = as_range(hour) {
        return format!(
            "between {} and {}",
            format_time(from, "00"),
            format_time(to, "59")
        );
    }
    if let Some(items) = as_list(hour) {
        let times: Vec<String> = items.iter().map(|h| format_time(h, "00")).collect();
        return format!("at {}", join_list(&times));
    }
    format!("at {}", format_time(hour, "00"))
}

fn day_of_month_phrase(dom: &str) -> String {
    if is_wildcard(dom) {
        return String::new();
    }
    match dom {
        "L" => return ", on the last day of the month".into(),
        "LW" | "WL" => return ", on the last weekday of the month".into(),
        _ => {}
    }
    if let Some(day) = dom.strip_suffix('W').filter(|d| is_number(d)) {
        return format!(", on the weekday nearest day {day} of the month");
    }
    if let Some((start, step)) = as_step(dom) {
        let mut phrase = format!(", every {step} days");
        if is_number(start) && start != "1" {
            phrase.push_str(&format!(", starting on day {start} of the month"));
        }
        return phrase;
    }
    if let Some((from, to)) = as_range(dom) {
        return format!(", between day {from} and {to} of the month");
    }
    if let Some(items) = as_list(dom) {
        let items: Vec<String> = items.iter().map(|s| s.to_string()).collect();
        return format!(", on day {} of the month", join_list(&items));
    }
    format!(", on day {dom} of the month")
}

fn day_of_week_phrase(dow: &str) -> String {
    if is_wildcard(dow) {
        return String::new();
    }
    if let Some((day, nth)) = dow.split_once('#') {
        return format!(", on the {} {} of the month", ordinal(nth), day_name(day));
    }
    if let Some(day) = dow.strip_suffix('L').filter(|d| !d.is_empty()) {
        return format!(", on the last {} of the month", day_name(day));
    }
    if let Some((_, step)) = as_step(dow) {
        return format!(", every {step} days of the week");
    }
    if let Some((from, to)) = as_range(dow) {
        return format!(", {} through {}", day_name(from), day_name(to));
    }
    if let Some(items) = as_list(dow) {
        let days: Vec<String> = items.iter().map(|d| day_name(d)).collect();
        return format!(", only on {}", join_list(&days));
    }
    format!(", only on {}", day_name(dow))
}

fn month_phrase(month: &str) -> String {
    if is_wildcard(month) {
        return String::new();
    }
    if let Some((_, step)) = as_step(month) {
        return format!(", every {step} months");
    }
    if let Some((from, to)) = as_range(month) {
        return format!(", {} through {}", month_name(from), month_name(to));
    }
    if let Some(items) = as_list(month) {
        let months: Vec<String> = items.iter().map(|m| month_name(m)).collect();
        return format!(", only in {}", join_list(&months));
    }
    format!(", only in {}", month_name(month))
}

fn year_phrase(year: &str) -> String {
    if is_wildcard(year) {
        return String::new();
    }
    if let Some((_, step)) = as_step(year) {
        return format!(", every {step} years");
    }
    if let Some((from, to)) = as_range(year) {
        return format!(", {from} through {to}");
    }
    if let Some(items) = as_list(year) {
        let items: Vec<String> = items.iter().map(|s| s.to_string()).collect();
        return format!(", only in {}", join_list(&items));
    }
    format!(", only in {year}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn describe_str(expr: &str) -> String {
        describe(&CronFields::parse(expr).expect("six fields"))
    }

    #[test]
    fn test_fixed_times() {
        assert_eq!(describe_str("0 10 * * ? *"), "At 10:00 AM");
        assert_eq!(describe_str("15 12 * * ? *"), "At 12:15 PM");
        assert_eq!(describe_str("0 0 * * ? *"), "At 12:00 AM");
    }

    #[test]
    fn test_weekday_ranges_and_nth() {
        assert_eq!(
            describe_str("0 18 ? * MON-FRI *"),
            "At 06:00 PM, Monday through Friday"
        );
        assert_eq!(
            describe_str("0 9 ? * 2#1 *"),
            "At 09:00 AM, on the first Tuesday of the month"
        );
        assert_eq!(describe_str("0 9 ? * 6L *"), "At 09:00 AM, on the last Saturday of the month");
    }

    #[test]
    fn test_steps_and_hour_ranges() {
        assert_eq!(
            describe_str("0/10 * ? * MON-FRI *"),
            "Every 10 minutes, Monday through Friday"
        );
        assert_eq!(
            describe_str("0/5 8-17 ? * MON-FRI *"),
            "Every 5 minutes, between 08:00 AM and 05:59 PM, Monday through Friday"
        );
        assert_eq!(describe_str("* * * * ? *"), "Every minute");
        assert_eq!(describe_str("0 * * * ? *"), "Every hour");
        assert_eq!(describe_str("0 */2 * * ? *"), "Every 2 hours");
    }

    #[test]
    fn test_day_of_month_month_and_year() {
        assert_eq!(
            describe_str("0 8 1 * ? *"),
            "At 08:00 AM, on day 1 of the month"
        );
        assert_eq!(
            describe_str("30 6 L JAN,JUL ? 2030"),
            "At 06:30 AM, on the last day of the month, only in January and July, only in 2030"
        );
        assert_eq!(describe_str("0 12 1,15 * ? *"), "At 12:00 PM, on day 1 and 15 of the month");
    }

    #[test]
    fn test_wrong_field_count_rejected() {
        let err = CronFields::parse("0 10 * * ?").expect_err("five fields");
        assert!(err.to_string().contains("6 parts"));
    }

    #[test]
    fn test_fields_separated_by_single_spaces() {
        let err = CronFields::parse("0  12 * * ? *").expect_err("doubled space");
        assert!(err.to_string().contains("6 parts"));
        assert!(CronFields::parse("0\t12 * * ? *").is_err());
    }

    #[test]
    fn test_shift_hours_wraps() {
        let fields = CronFields::parse("0 22 * * ? *").expect("valid").shift_hours(3);
        assert_eq!(fields.hour, "1");
        let fields = CronFields::parse("0 1,8-17 * * ? *").expect("valid").shift_hours(-2);
        assert_eq!(fields.hour, "23,6-15");
        let fields = CronFields::parse("0 */2 * * ? *").expect("valid").shift_hours(5);
        assert_eq!(fields.hour, "*/2");
    }

    #[test]
    fn test_seven_field_conversion() {
        let fields = CronFields::parse("0/5 8-17 ? * MON-FRI *").expect("valid");
        assert_eq!(fields.to_seven_field(), "0 0/5 8-17 * * MON-FRI *");
    }
}
