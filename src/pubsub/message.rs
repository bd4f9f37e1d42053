use std::{fmt, sync::Arc};

/// Идентификатор сообщения вида `ID:0000002A`.
///
/// Уникален в пределах одного запуска процесса, но не между перезапусками.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MessageId(u64);

/// Текстовое сообщение, публикуемое в очередь.
///
/// Тело разделяется между всеми получателями без копирования.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    pub body: Arc<str>,
}

impl MessageId {
    pub fn new(seq: u64) -> Self {
        Self(seq)
    }

    /// Порядковый номер, из которого получен идентификатор.
    pub fn seq(self) -> u64 {
        self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "ID:{:08X}", self.0)
    }
}

impl Message {
    pub fn new(
        id: MessageId,
        body: impl Into<Arc<str>>,
    ) -> Self {
        Self {
            id,
            body: body.into(),
        }
    }

    pub fn text(&self) -> &str {
        &self.body
    }
}
