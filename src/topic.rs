/// Reasons a topic name cannot be used in a PUBLISH packet
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TopicError {
    #[error("Topic name is empty")]
    Empty,
    #[error("Topic name contains wildcard character `{0}`")]
    Wildcard(char),
    #[error("Topic name contains null character")]
    NullCharacter,
    #[error("Topic name is longer than 65535 bytes")]
    TooLong,
}

/// Check that topic name is suitable for publishing.
///
/// Topic names must be non-empty, must not contain `+`/`#` wildcards
/// or `U+0000`, and must fit into a length-prefixed string.
pub fn validate_topic(topic: &str) -> Result<(), TopicError> {
    ensure!(!topic.is_empty(), TopicError::Empty);
    ensure!(topic.len() <= u16::MAX as usize, TopicError::TooLong);

    for c in topic.chars() {
        match c {
            '+' | '#' => return Err(TopicError::Wildcard(c)),
            '\0' => return Err(TopicError::NullCharacter),
            _ => (),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    #[test_case("t" ; "single char")]
    #[test_case("sensors/room1/temp" ; "levels")]
    #[test_case("/leading" ; "leading separator")]
    #[test_case("$SYS/broker" ; "system topic")]
    #[test_case("a//b" ; "empty level")]
    fn test_valid_topic(topic: &str) {
        assert_eq!(validate_topic(topic), Ok(()));
    }

    #[test_case("", TopicError::Empty ; "empty")]
    #[test_case("a/+/b", TopicError::Wildcard('+') ; "single level wildcard")]
    #[test_case("a/#", TopicError::Wildcard('#') ; "multi level wildcard")]
    #[test_case("a\0b", TopicError::NullCharacter ; "null char")]
    fn test_invalid_topic(topic: &str, err: TopicError) {
        assert_eq!(validate_topic(topic), Err(err));
    }

    #[test]
    fn test_topic_too_long() {
        let topic = "a".repeat(u16::MAX as usize + 1);
        assert_eq!(validate_topic(&topic), Err(TopicError::TooLong));
        let topic = "a".repeat(u16::MAX as usize);
        assert_eq!(validate_topic(&topic), Ok(()));
    }
}
