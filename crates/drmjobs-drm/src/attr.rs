//! Job template attribute vocabulary on the wire, and value-format helpers.
//!
//! Names follow DRMAA 1.0. Scalar attributes carry one string; vector
//! attributes (`drmaa_v_*`) carry an ordered list.

use std::path::PathBuf;
use std::time::Duration;

pub const REMOTE_COMMAND: &str = "drmaa_remote_command";
pub const JS_STATE: &str = "drmaa_js_state";
pub const WD: &str = "drmaa_wd";
pub const JOB_CATEGORY: &str = "drmaa_job_category";
pub const NATIVE_SPECIFICATION: &str = "drmaa_native_specification";
pub const BLOCK_EMAIL: &str = "drmaa_block_email";
pub const START_TIME: &str = "drmaa_start_time";
pub const JOB_NAME: &str = "drmaa_job_name";
pub const INPUT_PATH: &str = "drmaa_input_path";
pub const OUTPUT_PATH: &str = "drmaa_output_path";
pub const ERROR_PATH: &str = "drmaa_error_path";
pub const JOIN_FILES: &str = "drmaa_join_files";
pub const TRANSFER_FILES: &str = "drmaa_transfer_files";
pub const DEADLINE_TIME: &str = "drmaa_deadline_time";
pub const WCT_HLIMIT: &str = "drmaa_wct_hlimit";
pub const WCT_SLIMIT: &str = "drmaa_wct_slimit";
pub const DURATION_HLIMIT: &str = "drmaa_duration_hlimit";
pub const DURATION_SLIMIT: &str = "drmaa_duration_slimit";

pub const V_ARGV: &str = "drmaa_v_argv";
pub const V_ENV: &str = "drmaa_v_env";
pub const V_EMAIL: &str = "drmaa_v_email";

/// `drmaa_js_state` value that submits a job on hold.
pub const JS_STATE_HOLD: &str = "drmaa_hold";
/// `drmaa_js_state` value that submits a job ready to run.
pub const JS_STATE_ACTIVE: &str = "drmaa_active";

/// Parse a DRMAA duration `[[h:]m:]s` into a [`Duration`].
///
/// Each component is a run of decimal digits; minutes and seconds are not
/// range-checked beyond the component count, as in DRMAA.
pub fn parse_duration_spec(value: &str) -> Result<Duration, String> {
    let parts: Vec<&str> = value.trim().split(':').collect();
    if parts.is_empty() || parts.len() > 3 {
        return Err(format!("'{value}' is not a duration ([[h:]m:]s)"));
    }

    let mut seconds: u64 = 0;
    for part in &parts {
        if part.is_empty() || !part.chars().all(|c| c.is_ascii_digit()) {
            return Err(format!("'{value}' is not a duration ([[h:]m:]s)"));
        }
        let n: u64 = part
            .parse()
            .map_err(|_| format!("'{value}': component '{part}' out of range"))?;
        seconds = seconds
            .checked_mul(60)
            .and_then(|s| s.checked_add(n))
            .ok_or_else(|| format!("'{value}': duration out of range"))?;
    }

    Ok(Duration::from_secs(seconds))
}

/// Split a DRMAA path `[hostname]:file_path` into host and path.
pub fn parse_path_spec(value: &str) -> Result<(Option<String>, PathBuf), String> {
    let (host, path) = value
        .split_once(':')
        .ok_or_else(|| format!("'{value}' is not a path specification ([hostname]:file_path)"))?;
    if path.is_empty() {
        return Err(format!("'{value}': empty file path"));
    }
    let host = (!host.is_empty()).then(|| host.to_string());
    Ok((host, PathBuf::from(path)))
}

/// Check a DRMAA absolute time `[[[[CC]YY/]MM/]DD] hh:mm[:ss] [{-|+}UU:uu]`.
pub fn validate_time_spec(value: &str) -> Result<(), String> {
    let bad = |why: &str| format!("'{value}' is not a time specification: {why}");
    let tokens: Vec<&str> = value.split_whitespace().collect();

    let (date, time, zone) = match tokens.as_slice() {
        [time] => (None, *time, None),
        [a, b] if a.contains(':') => (None, *a, Some(*b)),
        [a, b] => (Some(*a), *b, None),
        [date, time, zone] => (Some(*date), *time, Some(*zone)),
        _ => return Err(bad("expected [date] hh:mm[:ss] [zone]")),
    };

    if let Some(date) = date {
        let fields: Vec<&str> = date.split('/').collect();
        if fields.len() > 3 || fields.iter().any(|f| !is_digits(f)) {
            return Err(bad("malformed date"));
        }
        let day = fields[fields.len() - 1];
        check_range(day, 2, 1, 31).map_err(|e| bad(&format!("day {e}")))?;
        if fields.len() >= 2 {
            check_range(fields[fields.len() - 2], 2, 1, 12).map_err(|e| bad(&format!("month {e}")))?;
        }
        if fields.len() == 3 && !matches!(fields[0].len(), 2 | 4) {
            return Err(bad("year must have 2 or 4 digits"));
        }
    }

    let clock: Vec<&str> = time.split(':').collect();
    if !(2..=3).contains(&clock.len()) {
        return Err(bad("expected hh:mm[:ss]"));
    }
    check_range(clock[0], 2, 0, 23).map_err(|e| bad(&format!("hour {e}")))?;
    check_range(clock[1], 2, 0, 59).map_err(|e| bad(&format!("minute {e}")))?;
    if let Some(sec) = clock.get(2) {
        check_range(sec, 2, 0, 59).map_err(|e| bad(&format!("second {e}")))?;
    }

    if let Some(zone) = zone {
        let offset = zone
            .strip_prefix('+')
            .or_else(|| zone.strip_prefix('-'))
            .ok_or_else(|| bad("zone must start with + or -"))?;
        let (hours, minutes) = offset
            .split_once(':')
            .ok_or_else(|| bad("zone must be UU:uu"))?;
        check_range(hours, 2, 0, 23).map_err(|e| bad(&format!("zone hours {e}")))?;
        check_range(minutes, 2, 0, 59).map_err(|e| bad(&format!("zone minutes {e}")))?;
    }

    Ok(())
}

fn is_digits(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_digit())
}

fn check_range(field: &str, width: usize, min: u32, max: u32) -> Result<(), String> {
    if field.len() != width || !is_digits(field) {
        return Err(format!("'{field}' must be {width} digits"));
    }
    let n: u32 = field.parse().map_err(|_| format!("'{field}' is not a number"))?;
    if n < min || n > max {
        return Err(format!("{n} out of range {min}..={max}"));
    }
    Ok(())
}
