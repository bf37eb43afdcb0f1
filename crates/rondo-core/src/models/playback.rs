//! Playback commands and transport state.
//!
//! PlaybackCommand is a tagged enum so a front end can ship it as JSON or
//! parse it from a typed line (`FromStr`). PlaybackState is what the engine
//! reports: exactly one of idle, playing, paused.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Transport state reported by the engine. Idle means no current track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackState {
    #[default]
    Idle,
    Playing,
    Paused,
}

/// A user command, as issued by a front end.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum PlaybackCommand {
    /// Append a file to the back of the queue.
    Add { path: String },
    /// Put a file at the front of the queue.
    PlayNext { path: String },
    Play,
    Pause,
    Toggle,
    Skip,
    /// Relative seek; the caller clamps the result to the track length.
    Seek { delta_secs: i64 },
    /// Relative volume change on the 0-100 scale.
    Volume { delta_percent: i64 },
    Loop,
    Shuffle,
    Delete { index: isize },
    Clear,
    List,
    Now,
    Quit,
}

impl FromStr for PlaybackCommand {
    type Err = String;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim();
        let (word, rest) = match line.split_once(char::is_whitespace) {
            Some((w, r)) => (w, r.trim()),
            None => (line, ""),
        };

        let need_arg = |usage: &str| -> Result<String, String> {
            if rest.is_empty() {
                Err(format!("usage: {}", usage))
            } else {
                Ok(rest.to_string())
            }
        };

        let cmd = match word {
            "add" | "a" => PlaybackCommand::Add { path: need_arg("add <file>")? },
            "playnext" | "pn" => PlaybackCommand::PlayNext { path: need_arg("playnext <file>")? },
            "play" => PlaybackCommand::Play,
            "pause" => PlaybackCommand::Pause,
            "toggle" | "p" | "" => PlaybackCommand::Toggle,
            "skip" | "n" => PlaybackCommand::Skip,
            "seek" | "f" => {
                let arg = need_arg("seek <+/-seconds>")?;
                PlaybackCommand::Seek { delta_secs: parse_signed(&arg)? }
            }
            "vol" | "v" => {
                let arg = need_arg("vol <+/-percent>")?;
                PlaybackCommand::Volume { delta_percent: parse_signed(&arg)? }
            }
            "loop" | "l" => PlaybackCommand::Loop,
            "shuffle" => PlaybackCommand::Shuffle,
            "del" | "d" => {
                let arg = need_arg("del <index>")?;
                let index = arg
                    .parse::<isize>()
                    .map_err(|_| format!("invalid index: {}", arg))?;
                PlaybackCommand::Delete { index }
            }
            "clear" => PlaybackCommand::Clear,
            "list" | "ls" => PlaybackCommand::List,
            "now" => PlaybackCommand::Now,
            "quit" | "q" | "exit" => PlaybackCommand::Quit,
            other => return Err(format!("unknown command: {}", other)),
        };
        Ok(cmd)
    }
}

fn parse_signed(arg: &str) -> Result<i64, String> {
    arg.trim_start_matches('+')
        .parse::<i64>()
        .map_err(|_| format!("invalid number: {}", arg))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_relative_arguments() {
        assert_eq!(
            "seek +10".parse::<PlaybackCommand>(),
            Ok(PlaybackCommand::Seek { delta_secs: 10 })
        );
        assert_eq!(
            "vol -5".parse::<PlaybackCommand>(),
            Ok(PlaybackCommand::Volume { delta_percent: -5 })
        );
        assert_eq!(
            "del -1".parse::<PlaybackCommand>(),
            Ok(PlaybackCommand::Delete { index: -1 })
        );
    }

    #[test]
    fn paths_keep_their_spaces() {
        assert_eq!(
            "add /music/Some Album/01 Intro.flac".parse::<PlaybackCommand>(),
            Ok(PlaybackCommand::Add {
                path: "/music/Some Album/01 Intro.flac".into()
            })
        );
    }

    #[test]
    fn empty_line_toggles() {
        assert_eq!("".parse::<PlaybackCommand>(), Ok(PlaybackCommand::Toggle));
    }

    #[test]
    fn missing_arguments_report_usage() {
        let err = "seek".parse::<PlaybackCommand>().unwrap_err();
        assert!(err.starts_with("usage:"));
        assert!("bogus".parse::<PlaybackCommand>().is_err());
    }

    #[test]
    fn json_shape_is_action_tagged() {
        let v = serde_json::to_value(PlaybackCommand::Seek { delta_secs: -3 }).unwrap();
        assert_eq!(v["action"], "seek");
        assert_eq!(v["delta_secs"], -3);
        let skip: PlaybackCommand =
            serde_json::from_value(serde_json::json!({"action": "skip"})).unwrap();
        assert_eq!(skip, PlaybackCommand::Skip);
    }
}
