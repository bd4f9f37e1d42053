//! Строчный протокол qmon.
//!
//! Один фрейм на строку, UTF-8, завершается `\n` (допускается `\r\n`).
//! Команды клиента регистронезависимы, аргументы разделяются пробелами.
//!
//! Клиент → сервер:
//!
//! ```text
//! ATTACH <session> <link> [address]
//! DETACH <link>
//! END <session>
//! CLOSE
//! PING
//! ```
//!
//! Сервер → клиент:
//!
//! ```text
//! OPEN <container-id>
//! ATTACHED <link> <address>
//! MSG <link> <message-id> <text>
//! ERR <description>
//! CLOSED
//! PONG
//! ```

use qmon_error::ProtocolError;

use crate::pubsub::{LinkId, Message};

/// Фрейм, принятый от клиента.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientFrame {
    Attach {
        session: String,
        link: String,
        address: String,
    },
    Detach {
        link: String,
    },
    End {
        session: String,
    },
    Close,
    Ping,
}

/// Фрейм, отправляемый клиенту.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerFrame {
    Open { container: String },
    Attached { link: LinkId, address: String },
    Message { link: LinkId, message: Message },
    Error(String),
    Closed,
    Pong,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl ClientFrame {
    /// Разбирает одну строку без завершающего перевода строки.
    pub fn parse(line: &str) -> Result<Self, ProtocolError> {
        let line = line.strip_suffix('\r').unwrap_or(line);
        let mut parts = line.split_whitespace();
        let Some(command) = parts.next() else {
            return Err(ProtocolError::EmptyFrame);
        };

        let frame = match command.to_ascii_uppercase().as_str() {
            "ATTACH" => {
                let session = required(&mut parts, "ATTACH", "session")?;
                let link = required(&mut parts, "ATTACH", "link")?;
                let address = parts.next().unwrap_or_default().to_string();
                Self::Attach {
                    session,
                    link,
                    address,
                }
            }
            "DETACH" => Self::Detach {
                link: required(&mut parts, "DETACH", "link")?,
            },
            "END" => Self::End {
                session: required(&mut parts, "END", "session")?,
            },
            "CLOSE" => Self::Close,
            "PING" => Self::Ping,
            _ => {
                return Err(ProtocolError::UnknownCommand {
                    command: command.to_string(),
                })
            }
        };

        if parts.next().is_some() {
            return Err(ProtocolError::TrailingArguments {
                command: frame.name(),
            });
        }
        Ok(frame)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Attach { .. } => "ATTACH",
            Self::Detach { .. } => "DETACH",
            Self::End { .. } => "END",
            Self::Close => "CLOSE",
            Self::Ping => "PING",
        }
    }
}

impl ServerFrame {
    /// Кодирует фрейм в строку вместе с завершающим `\n`.
    pub fn encode(&self) -> String {
        match self {
            Self::Open { container } => format!("OPEN {container}\n"),
            Self::Attached { link, address } => format!("ATTACHED {link} {address}\n"),
            Self::Message { link, message } => format!(
                "MSG {link} {} {}\n",
                message.id,
                escape_text(message.text())
            ),
            Self::Error(description) => format!("ERR {}\n", escape_text(description)),
            Self::Closed => "CLOSED\n".to_string(),
            Self::Pong => "PONG\n".to_string(),
        }
    }
}

fn required<'a>(
    parts: &mut impl Iterator<Item = &'a str>,
    command: &'static str,
    argument: &'static str,
) -> Result<String, ProtocolError> {
    parts
        .next()
        .map(str::to_string)
        .ok_or(ProtocolError::MissingArgument { command, argument })
}

/// Экранирует `\` и перевод строки, чтобы текст занимал одну строку.
pub fn escape_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            c => out.push(c),
        }
    }
    out
}

/// Обратное к [`escape_text`]. Неизвестные последовательности остаются как
/// есть.
pub fn unescape_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use rstest::rstest;

    use super::*;
    use crate::pubsub::MessageId;

    #[rstest]
    #[case("ATTACH s1 l1 alerts", ClientFrame::Attach { session: "s1".into(), link: "l1".into(), address: "alerts".into() })]
    #[case("attach s1 l1", ClientFrame::Attach { session: "s1".into(), link: "l1".into(), address: String::new() })]
    #[case("DETACH l1\r", ClientFrame::Detach { link: "l1".into() })]
    #[case("End s1", ClientFrame::End { session: "s1".into() })]
    #[case("  CLOSE  ", ClientFrame::Close)]
    #[case("ping", ClientFrame::Ping)]
    fn test_parse_valid(
        #[case] line: &str,
        #[case] expected: ClientFrame,
    ) {
        assert_eq!(ClientFrame::parse(line), Ok(expected));
    }

    #[rstest]
    #[case("", ProtocolError::EmptyFrame)]
    #[case("   ", ProtocolError::EmptyFrame)]
    #[case("SUBSCRIBE x", ProtocolError::UnknownCommand { command: "SUBSCRIBE".into() })]
    #[case("ATTACH s1", ProtocolError::MissingArgument { command: "ATTACH", argument: "link" })]
    #[case("DETACH", ProtocolError::MissingArgument { command: "DETACH", argument: "link" })]
    #[case("END", ProtocolError::MissingArgument { command: "END", argument: "session" })]
    #[case("ATTACH s l a extra", ProtocolError::TrailingArguments { command: "ATTACH" })]
    #[case("PING now", ProtocolError::TrailingArguments { command: "PING" })]
    fn test_parse_invalid(
        #[case] line: &str,
        #[case] expected: ProtocolError,
    ) {
        assert_eq!(ClientFrame::parse(line), Err(expected));
    }

    /// Тест проверяет кодирование доставки с экранированием текста.
    #[test]
    fn test_encode_message_escapes_text() {
        let frame = ServerFrame::Message {
            link: "l1".into(),
            message: Message::new(MessageId::new(0x2A), "a\nb\\c"),
        };
        assert_eq!(frame.encode(), "MSG l1 ID:0000002A a\\nb\\\\c\n");
    }

    #[test]
    fn test_encode_control_frames() {
        assert_eq!(
            ServerFrame::Open {
                container: "qmon".into()
            }
            .encode(),
            "OPEN qmon\n"
        );
        assert_eq!(
            ServerFrame::Attached {
                link: "l1".into(),
                address: "tick".into()
            }
            .encode(),
            "ATTACHED l1 tick\n"
        );
        assert_eq!(ServerFrame::Closed.encode(), "CLOSED\n");
        assert_eq!(ServerFrame::Pong.encode(), "PONG\n");
    }

    proptest! {
        /// Тест проверяет, что экранированный текст всегда занимает одну
        /// строку и восстанавливается без потерь.
        #[test]
        fn prop_escape_is_single_line_and_reversible(text in any::<String>()) {
            let escaped = escape_text(&text);
            prop_assert!(!escaped.contains('\n'));
            prop_assert_eq!(unescape_text(&escaped), text);
        }

        /// Тест проверяет, что разбор произвольной строки никогда не
        /// паникует.
        #[test]
        fn prop_parse_never_panics(line in "\\PC*") {
            let _ = ClientFrame::parse(&line);
        }
    }
}
