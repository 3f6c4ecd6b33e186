use common::Topics;
use log::info;

/// Tokens that select a relay state, checked in order. "on" always wins when
/// a payload contains both.
const ON_TOKENS: [&str; 2] = ["\"on\"", ":\"on\""];
const OFF_TOKENS: [&str; 2] = ["\"off\"", ":\"off\""];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
    SetState(bool),
}

/// Turns inbound bus messages into commands. The subscription is the
/// `command/+` wildcard, but only `command/set_state` is acted on.
pub struct CommandListener {
    set_state_topic: String,
}

impl CommandListener {
    pub fn new(topics: &Topics) -> Self {
        Self {
            set_state_topic: topics.command_set_state(),
        }
    }

    pub fn interpret(&self, topic: &str, payload: &[u8]) -> Option<Command> {
        let message = String::from_utf8_lossy(payload);
        info!("mqtt: message arrived [{}] {}", topic, message);

        if topic != self.set_state_topic {
            return None;
        }
        parse_set_state(&message).map(Command::SetState)
    }
}

/// Substring match, not a JSON parse: `{"set_state":"on"}`, `"on"` and
/// `{"x":"off","y":"on"}` all mean on.
pub fn parse_set_state(message: &str) -> Option<bool> {
    if ON_TOKENS.iter().any(|token| message.contains(token)) {
        Some(true)
    } else if OFF_TOKENS.iter().any(|token| message.contains(token)) {
        Some(false)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn listener() -> CommandListener {
        CommandListener::new(&Topics::new("esp8266-001"))
    }

    const SET_STATE: &str = "breeze/devices/esp8266-001/command/set_state";

    #[test]
    fn test_set_state_payloads() {
        let listener = listener();
        assert_eq!(
            listener.interpret(SET_STATE, br#"{"set_state":"on"}"#),
            Some(Command::SetState(true))
        );
        assert_eq!(
            listener.interpret(SET_STATE, br#"{"state": "off"}"#),
            Some(Command::SetState(false))
        );
        assert_eq!(
            listener.interpret(SET_STATE, br#""on""#),
            Some(Command::SetState(true))
        );
    }

    #[test]
    fn test_on_wins_over_off() {
        assert_eq!(
            parse_set_state(r#"{"set_state":"on","previous":"off"}"#),
            Some(true)
        );
        assert_eq!(
            parse_set_state(r#"{"previous":"off","set_state":"on"}"#),
            Some(true)
        );
    }

    #[test]
    fn test_unrecognized_payloads_are_ignored() {
        let listener = listener();
        assert_eq!(listener.interpret(SET_STATE, b"on"), None);
        assert_eq!(listener.interpret(SET_STATE, br#"{"set_state":"ON"}"#), None);
        assert_eq!(listener.interpret(SET_STATE, br#"{"set_state":"toggle"}"#), None);
        assert_eq!(listener.interpret(SET_STATE, &[0xff, 0xfe]), None);
        assert_eq!(listener.interpret(SET_STATE, b""), None);
    }

    #[test]
    fn test_other_topics_are_ignored() {
        let listener = listener();
        let payload = br#"{"set_state":"on"}"#;
        assert_eq!(
            listener.interpret("breeze/devices/esp8266-001/command/reboot", payload),
            None
        );
        assert_eq!(
            listener.interpret("breeze/devices/esp8266-002/command/set_state", payload),
            None
        );
        assert_eq!(
            listener.interpret("breeze/devices/esp8266-001/command/set_state/extra", payload),
            None
        );
    }
}
