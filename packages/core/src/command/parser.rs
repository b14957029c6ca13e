//! Purely syntactic chat-command parsing. No I/O, no state.

use crate::model::{ChatMessage, Command};

/// Parses a chat message into a [`Command`], or `None` if it isn't one.
#[must_use]
pub fn parse_command(msg: &ChatMessage) -> Option<Command> {
    let text = msg.text.trim();
    if !text.starts_with('!') {
        return None;
    }

    let mut tokens = text.split_whitespace();
    let head = tokens.next()?.to_lowercase();

    match head.as_str() {
        "!watch" => parse_watch(tokens, msg),
        "!stop" => Some(Command::Stop { origin: msg.clone() }),
        "!replay" => Some(Command::Replay { origin: msg.clone() }),
        "!so" | "!shoutout" => {
            let target = tokens.next()?.trim_start_matches('@').to_string();
            Some(Command::Shoutout {
                target_username: target,
                origin: msg.clone(),
            })
        }
        _ => None,
    }
}

fn parse_watch<'a>(mut tokens: impl Iterator<Item = &'a str>, msg: &ChatMessage) -> Option<Command> {
    let remainder: Vec<&str> = tokens.by_ref().collect();
    if remainder.is_empty() {
        return None;
    }
    let joined = remainder.join(" ");

    if let Some(id) = extract_url_clip_id(&joined) {
        return Some(Command::WatchClip {
            clip_identifier: id,
            origin: msg.clone(),
        });
    }

    if let Some(first) = remainder.first() {
        if let Some(broadcaster) = first.strip_prefix('@') {
            let terms: Vec<&str> = remainder[1..].to_vec();
            if terms.is_empty() {
                return None;
            }
            return Some(Command::WatchSearch {
                broadcaster_name: broadcaster.to_string(),
                search_terms: terms.join(" "),
                origin: msg.clone(),
            });
        }
    }

    Some(Command::WatchClip {
        clip_identifier: remainder[0].to_string(),
        origin: msg.clone(),
    })
}

/// Recognizes `(https?://)?(www\.)?(clips\.twitch\.tv/|twitch\.tv/\w+/clip/)([A-Za-z0-9_-]+)`.
fn extract_url_clip_id(text: &str) -> Option<String> {
    let lower = text.to_lowercase();
    let start = lower.find("clips.twitch.tv/").or_else(|| lower.find("/clip/"))?;

    let marker_len = if lower[start..].starts_with("clips.twitch.tv/") {
        "clips.twitch.tv/".len()
    } else {
        "/clip/".len()
    };

    let after = &text[start + marker_len..];
    let id: String = after
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
        .collect();

    if id.is_empty() {
        None
    } else {
        Some(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(text: &str) -> ChatMessage {
        ChatMessage {
            author_login: "viewer".into(),
            author_display: "Viewer".into(),
            author_id: "1".into(),
            channel_login: "bc".into(),
            channel_id: "2".into(),
            text: text.into(),
            is_broadcaster: false,
            is_moderator: false,
            is_vip: false,
            is_subscriber: false,
        }
    }

    #[test]
    fn non_bang_text_is_not_a_command() {
        assert!(parse_command(&msg("hello there")).is_none());
    }

    #[test]
    fn unknown_bang_command_is_not_a_command() {
        assert!(parse_command(&msg("!unknown foo")).is_none());
    }

    #[test]
    fn watch_with_clip_url() {
        let cmd = parse_command(&msg("!watch https://clips.twitch.tv/ABC-xyz_1")).unwrap();
        assert_eq!(
            cmd,
            Command::WatchClip {
                clip_identifier: "ABC-xyz_1".into(),
                origin: msg("!watch https://clips.twitch.tv/ABC-xyz_1"),
            }
        );
    }

    #[test]
    fn watch_with_channel_clip_path() {
        let cmd = parse_command(&msg("!watch twitch.tv/streamerX/clip/Foo_123")).unwrap();
        match cmd {
            Command::WatchClip { clip_identifier, .. } => assert_eq!(clip_identifier, "Foo_123"),
            _ => panic!("expected WatchClip"),
        }
    }

    #[test]
    fn watch_with_broadcaster_and_search_terms() {
        let cmd = parse_command(&msg("!watch @streamerX epic block steal")).unwrap();
        match cmd {
            Command::WatchSearch {
                broadcaster_name,
                search_terms,
                ..
            } => {
                assert_eq!(broadcaster_name, "streamerX");
                assert_eq!(search_terms, "epic block steal");
            }
            _ => panic!("expected WatchSearch"),
        }
    }

    #[test]
    fn watch_with_broadcaster_but_no_terms_is_not_a_command() {
        assert!(parse_command(&msg("!watch @streamerX")).is_none());
    }

    #[test]
    fn watch_with_opaque_identifier() {
        let cmd = parse_command(&msg("!watch ABC-xyz_1")).unwrap();
        match cmd {
            Command::WatchClip { clip_identifier, .. } => assert_eq!(clip_identifier, "ABC-xyz_1"),
            _ => panic!("expected WatchClip"),
        }
    }

    #[test]
    fn stop_and_replay_are_recognized() {
        assert!(matches!(parse_command(&msg("!stop")), Some(Command::Stop { .. })));
        assert!(matches!(parse_command(&msg("!replay")), Some(Command::Replay { .. })));
    }

    #[test]
    fn shoutout_strips_leading_at() {
        let cmd = parse_command(&msg("!so @someone")).unwrap();
        match cmd {
            Command::Shoutout { target_username, .. } => assert_eq!(target_username, "someone"),
            _ => panic!("expected Shoutout"),
        }
        assert!(matches!(parse_command(&msg("!shoutout someone")), Some(Command::Shoutout { .. })));
    }

    #[test]
    fn shoutout_without_target_is_not_a_command() {
        assert!(parse_command(&msg("!so")).is_none());
    }
}
