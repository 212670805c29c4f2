//! Topic name and topic filter rules (MQTT 3.1.1 §4.7).

use crate::error::{Error, Result};

const MAX_TOPIC_LEN: usize = 65_535;

/// Validate a topic name used for publishing.
///
/// # Errors
///
/// Returns `Error::InvalidTopic` if the name is empty, too long, contains a
/// NUL character, or contains a wildcard.
pub fn validate_topic_name(topic: &str) -> Result<()> {
    check_common(topic)?;
    if topic.contains(['+', '#']) {
        return Err(Error::InvalidTopic(format!(
            "'{}' contains a wildcard",
            topic
        )));
    }
    Ok(())
}

/// Validate a topic filter used for subscribing.
///
/// # Errors
///
/// Returns `Error::InvalidTopic` if a wildcard does not occupy a whole
/// level, or `#` is not the last level.
pub fn validate_topic_filter(filter: &str) -> Result<()> {
    check_common(filter)?;
    let levels: Vec<&str> = filter.split('/').collect();
    let last = levels.len() - 1;
    for (i, level) in levels.iter().enumerate() {
        let bad = match *level {
            "#" => i != last,
            "+" => false,
            other => other.contains(['+', '#']),
        };
        if bad {
            return Err(Error::InvalidTopic(format!(
                "'{}' has a misplaced wildcard",
                filter
            )));
        }
    }
    Ok(())
}

fn check_common(topic: &str) -> Result<()> {
    if topic.is_empty() {
        return Err(Error::InvalidTopic("empty topic".into()));
    }
    if topic.len() > MAX_TOPIC_LEN {
        return Err(Error::InvalidTopic(format!(
            "{} bytes exceeds {}",
            topic.len(),
            MAX_TOPIC_LEN
        )));
    }
    if topic.contains('\0') {
        return Err(Error::InvalidTopic("contains NUL".into()));
    }
    Ok(())
}

/// Check whether `topic` is matched by `filter`.
///
/// Wildcards at the first level never match topics starting with `$`.
#[must_use]
pub fn matches(filter: &str, topic: &str) -> bool {
    if topic.starts_with('$') && (filter.starts_with('+') || filter.starts_with('#')) {
        return false;
    }

    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');

    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => {}
            (Some(f), Some(t)) if f == t => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}
