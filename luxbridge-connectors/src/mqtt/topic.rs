//! Topic names and filters
//!
//! Standard MQTT matching: levels split on `/`, `+` matches exactly one
//! level, `#` matches the remaining levels (including none) and must come
//! last. Topics starting with `$` are not matched by a leading wildcard.

use super::MqttError;

/// Whether `topic` matches `filter`
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

/// Check a subscription filter
pub fn validate_filter(filter: &str) -> Result<(), MqttError> {
    if filter.is_empty() {
        return Err(MqttError::Config("topic filter is empty".into()));
    }
    let levels: Vec<&str> = filter.split('/').collect();
    for (i, level) in levels.iter().enumerate() {
        if level.contains('#') && (*level != "#" || i != levels.len() - 1) {
            return Err(MqttError::Config(format!(
                "'#' must be the whole last level in {filter:?}"
            )));
        }
        if level.contains('+') && *level != "+" {
            return Err(MqttError::Config(format!(
                "'+' must occupy a whole level in {filter:?}"
            )));
        }
    }
    Ok(())
}

/// Check a topic name used for publishing
pub fn validate_topic(topic: &str) -> Result<(), MqttError> {
    if topic.is_empty() {
        return Err(MqttError::Config("topic is empty".into()));
    }
    if topic.contains(['+', '#']) {
        return Err(MqttError::Config(format!(
            "wildcards are not allowed in topic {topic:?}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_level_wildcard() {
        assert!(matches("sensors/+/light", "sensors/3/light"));
        assert!(!matches("sensors/+/light", "sensors/3/3/light"));
        assert!(!matches("sensors/+/light", "sensors/light"));
        assert!(matches("sensors/+", "sensors/"));
    }

    #[test]
    fn multi_level_wildcard() {
        assert!(matches("sensors/#", "sensors/3/light"));
        assert!(matches("sensors/#", "sensors"));
        assert!(matches("#", "anything/at/all"));
        assert!(!matches("sensors/#", "actuators/1"));
    }

    #[test]
    fn exact_match() {
        assert!(matches("sensornetwork/ldr/light", "sensornetwork/ldr/light"));
        assert!(!matches("sensornetwork/ldr/light", "sensornetwork/ldr/light/raw"));
        assert!(!matches("sensornetwork/ldr", "sensornetwork/ldr/light"));
    }

    #[test]
    fn system_topics_hidden_from_wildcards() {
        assert!(!matches("#", "$SYS/broker/uptime"));
        assert!(!matches("+/broker/uptime", "$SYS/broker/uptime"));
        assert!(matches("$SYS/#", "$SYS/broker/uptime"));
    }

    #[test]
    fn filter_validation() {
        for ok in ["a/b", "a/+/c", "a/#", "#", "+", "+/+"] {
            assert!(validate_filter(ok).is_ok(), "{ok}");
        }
        for bad in ["", "a/#/c", "a/b#", "a+/b", "##"] {
            assert!(validate_filter(bad).is_err(), "{bad}");
        }
        assert!(validate_topic("a/b").is_ok());
        assert!(validate_topic("a/+").is_err());
    }
}
