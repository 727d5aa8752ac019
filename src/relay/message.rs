//! Transport-neutral views of chats and inbound messages.

use crate::relay::store::WatchedChat;

/// Kind of chat a message or command came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatKind {
    Private,
    Group,
    Supergroup,
    Channel,
}

impl ChatKind {
    /// Groups, supergroups and channels can be watched; private chats cannot.
    pub fn is_watchable(self) -> bool {
        !matches!(self, ChatKind::Private)
    }
}

/// The chat a message arrived in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceChat {
    pub id: i64,
    pub kind: ChatKind,
    /// Group/channel title, or the full name for private chats.
    pub title: Option<String>,
    pub username: Option<String>,
}

impl SourceChat {
    /// Title if known, otherwise the numeric id.
    pub fn display_title(&self) -> String {
        match &self.title {
            Some(title) if !title.is_empty() => title.clone(),
            _ => self.id.to_string(),
        }
    }

    /// Same link the chat gets once watched.
    pub fn link(&self) -> String {
        self.to_watched().link()
    }

    pub fn to_watched(&self) -> WatchedChat {
        WatchedChat {
            id: self.id,
            title: self.title.clone().unwrap_or_default(),
            username: self.username.clone(),
        }
    }
}

/// An inbound message from a (possibly watched) chat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingMessage {
    pub message_id: i32,
    /// Display name of whoever posted it, when known.
    pub author: Option<String>,
    pub text: Option<String>,
    /// Caption of photos, videos and documents.
    pub caption: Option<String>,
}

impl IncomingMessage {
    /// Body text, falling back to the media caption. `None` when both are empty.
    pub fn matchable_text(&self) -> Option<&str> {
        [self.text.as_deref(), self.caption.as_deref()]
            .into_iter()
            .flatten()
            .find(|s| !s.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(text: Option<&str>, caption: Option<&str>) -> IncomingMessage {
        IncomingMessage {
            message_id: 1,
            author: None,
            text: text.map(str::to_string),
            caption: caption.map(str::to_string),
        }
    }

    #[test]
    fn test_matchable_text_prefers_body() {
        assert_eq!(message(Some("body"), Some("cap")).matchable_text(), Some("body"));
    }

    #[test]
    fn test_matchable_text_falls_back_to_caption() {
        assert_eq!(message(None, Some("cap")).matchable_text(), Some("cap"));
        assert_eq!(message(Some(""), Some("cap")).matchable_text(), Some("cap"));
    }

    #[test]
    fn test_matchable_text_empty() {
        assert_eq!(message(None, None).matchable_text(), None);
        assert_eq!(message(Some(""), Some("")).matchable_text(), None);
    }

    #[test]
    fn test_display_title_and_link() {
        let chat = SourceChat { id: -42, kind: ChatKind::Group, title: None, username: None };
        assert_eq!(chat.display_title(), "-42");
        assert_eq!(chat.link(), "id:-42");

        let chat = SourceChat {
            id: -43,
            kind: ChatKind::Channel,
            title: Some("Ofertas".into()),
            username: Some("ofertas".into()),
        };
        assert_eq!(chat.display_title(), "Ofertas");
        assert_eq!(chat.link(), "t.me/ofertas");
        assert_eq!(chat.to_watched().username.as_deref(), Some("ofertas"));
        assert_eq!(chat.link(), chat.to_watched().link());
    }
}
