//! Compact duration expressions such as `1h30m` or `2d`.

const SECS_PER_MINUTE: u64 = 60;
const SECS_PER_HOUR: u64 = 3_600;
const SECS_PER_DAY: u64 = 86_400;

/// Parse a duration expression into seconds.
///
/// Sums every `<digits><unit>` pair where unit is one of `s`, `m`, `h`, `d`
/// (any case, any order, no separators needed). Anything else in the input
/// is skipped, so `"every 2h 15m please"` parses as 8100.
///
/// Returns `None` when no pair is found or the total is zero. The reminder
/// minimum is not checked here.
#[must_use]
pub fn parse_interval(expr: &str) -> Option<u64> {
    let mut total: u64 = 0;
    let mut matched = false;
    let mut chars = expr.chars().peekable();

    while let Some(c) = chars.next() {
        let Some(first) = c.to_digit(10) else {
            continue;
        };

        let mut value = u64::from(first);
        while let Some(digit) = chars.peek().and_then(|next| next.to_digit(10)) {
            value = value.saturating_mul(10).saturating_add(u64::from(digit));
            chars.next();
        }

        let Some(unit_secs) = chars.peek().copied().and_then(unit_seconds) else {
            continue;
        };
        chars.next();
        matched = true;
        total = total.saturating_add(value.saturating_mul(unit_secs));
    }

    (matched && total > 0).then_some(total)
}

fn unit_seconds(unit: char) -> Option<u64> {
    match unit.to_ascii_lowercase() {
        's' => Some(1),
        'm' => Some(SECS_PER_MINUTE),
        'h' => Some(SECS_PER_HOUR),
        'd' => Some(SECS_PER_DAY),
        _ => None,
    }
}

/// Render seconds as `"1d 2h 3m 4s"`, omitting zero parts (`"0s"` for zero).
#[must_use]
pub fn format_duration(seconds: u64) -> String {
    let days = seconds / SECS_PER_DAY;
    let hours = (seconds % SECS_PER_DAY) / SECS_PER_HOUR;
    let minutes = (seconds % SECS_PER_HOUR) / SECS_PER_MINUTE;
    let secs = seconds % SECS_PER_MINUTE;

    let parts: Vec<String> = [(days, 'd'), (hours, 'h'), (minutes, 'm'), (secs, 's')]
        .into_iter()
        .filter(|(value, _)| *value > 0)
        .map(|(value, unit)| format!("{value}{unit}"))
        .collect();

    if parts.is_empty() {
        "0s".to_owned()
    } else {
        parts.join(" ")
    }
}
