use std::collections::HashSet;

use crate::error::NotifyError;
use async_trait::async_trait;
use log::{info, warn};
use reqwest::{Client, Url};
use serde::Deserialize;

pub type ChatId = i64;

#[async_trait]
pub trait Messenger: Send + Sync {
    async fn send_message(&self, chat_id: ChatId, text: &str) -> Result<(), NotifyError>;
    async fn pending_chat_ids(&self) -> Result<Vec<ChatId>, NotifyError>;
}

pub struct TelegramBot {
    client: Client,
    send_message_url: Url,
    get_updates_url: Url,
}

impl TelegramBot {
    pub fn new(client: Client, api_base: &Url, token: &str) -> Result<Self, url::ParseError> {
        // "./" keeps a `digits:` token from parsing as a url scheme
        let bot = api_base.join(&format!("./bot{token}/"))?;
        Ok(Self {
            client,
            send_message_url: bot.join("sendMessage")?,
            get_updates_url: bot.join("getUpdates")?,
        })
    }
}

#[derive(Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
    result: Option<T>,
}

impl<T> ApiResponse<T> {
    fn into_result(self) -> Result<Option<T>, NotifyError> {
        if self.ok {
            Ok(self.result)
        } else {
            Err(NotifyError::Rejected(
                self.description.unwrap_or_else(|| "no description".into()),
            ))
        }
    }
}

#[derive(Deserialize)]
struct Update {
    #[serde(default)]
    message: Option<UpdateMessage>,
}

#[derive(Deserialize)]
struct UpdateMessage {
    chat: Chat,
}

#[derive(Deserialize)]
struct Chat {
    id: ChatId,
}

fn chats_from_updates(updates: Vec<Update>) -> Vec<ChatId> {
    let mut seen = HashSet::new();
    updates
        .into_iter()
        .filter_map(|u| u.message.map(|m| m.chat.id))
        .filter(|id| seen.insert(*id))
        .collect()
}

#[async_trait]
impl Messenger for TelegramBot {
    async fn send_message(&self, chat_id: ChatId, text: &str) -> Result<(), NotifyError> {
        let chat_id = chat_id.to_string();
        let res: ApiResponse<serde_json::Value> = self
            .client
            .post(self.send_message_url.clone())
            .form(&[
                ("chat_id", chat_id.as_str()),
                ("text", text),
                ("parse_mode", "Markdown"),
            ])
            .send()
            .await?
            .json()
            .await?;
        res.into_result().map(|_| ())
    }

    async fn pending_chat_ids(&self) -> Result<Vec<ChatId>, NotifyError> {
        let res: ApiResponse<Vec<Update>> = self
            .client
            .get(self.get_updates_url.clone())
            .send()
            .await?
            .json()
            .await?;
        Ok(chats_from_updates(res.into_result()?.unwrap_or_default()))
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct Delivery {
    pub sent: usize,
    pub failed_chats: Vec<ChatId>,
}

/// A chat that fails gets no further messages; the others still get theirs.
pub async fn dispatch(
    messenger: &dyn Messenger,
    chats: &HashSet<ChatId>,
    messages: &[String],
) -> Delivery {
    let mut chats: Vec<_> = chats.iter().copied().collect();
    chats.sort_unstable();

    let mut delivery = Delivery::default();
    for chat in chats {
        for message in messages {
            match messenger.send_message(chat, message).await {
                Ok(()) => delivery.sent += 1,
                Err(err) => {
                    warn!("Failed to notify chat {chat}: {err}");
                    delivery.failed_chats.push(chat);
                    break;
                }
            }
        }
    }

    info!(
        "Sent {} messages, {} chats failed",
        delivery.sent,
        delivery.failed_chats.len()
    );
    delivery
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    pub(crate) struct FakeMessenger {
        pub sent: Mutex<Vec<(ChatId, String)>>,
        pub broken_chats: HashSet<ChatId>,
        pub pending: Vec<ChatId>,
    }

    #[async_trait]
    impl Messenger for FakeMessenger {
        async fn send_message(&self, chat_id: ChatId, text: &str) -> Result<(), NotifyError> {
            if self.broken_chats.contains(&chat_id) {
                return Err(NotifyError::Rejected("Forbidden: bot was blocked by the user".into()));
            }
            self.sent.lock().unwrap().push((chat_id, text.to_string()));
            Ok(())
        }

        async fn pending_chat_ids(&self) -> Result<Vec<ChatId>, NotifyError> {
            Ok(self.pending.clone())
        }
    }

    #[tokio::test]
    async fn failing_chat_does_not_block_others() {
        let messenger = FakeMessenger {
            broken_chats: HashSet::from([2]),
            ..Default::default()
        };
        let messages = vec!["new".to_string(), "restock".to_string()];

        let delivery = dispatch(&messenger, &HashSet::from([3, 1, 2]), &messages).await;

        assert_eq!(
            delivery,
            Delivery {
                sent: 4,
                failed_chats: vec![2],
            }
        );
        let sent = messenger.sent.lock().unwrap();
        assert_eq!(
            sent.iter().map(|(chat, _)| *chat).collect::<Vec<_>>(),
            [1, 1, 3, 3]
        );
    }

    #[tokio::test]
    async fn no_chats_no_sends() {
        let messenger = FakeMessenger::default();
        let delivery = dispatch(&messenger, &HashSet::new(), &["hi".to_string()]).await;
        assert_eq!(delivery, Delivery::default());
    }

    #[test]
    fn bot_urls_embed_token() {
        let bot = TelegramBot::new(
            Client::new(),
            &Url::parse("https://api.telegram.org/").unwrap(),
            "123456789:AAHdqTcvCH1vGWJxfSeofSAs0K5PALDsaw",
        )
        .unwrap();
        assert_eq!(
            bot.send_message_url.as_str(),
            "https://api.telegram.org/bot123456789:AAHdqTcvCH1vGWJxfSeofSAs0K5PALDsaw/sendMessage"
        );
        assert_eq!(
            bot.get_updates_url.as_str(),
            "https://api.telegram.org/bot123456789:AAHdqTcvCH1vGWJxfSeofSAs0K5PALDsaw/getUpdates"
        );
    }

    #[test]
    fn collects_chats_from_updates() {
        let body = r#"{
            "ok": true,
            "result": [
                {"update_id": 1, "message": {"message_id": 5, "chat": {"id": 111, "type": "private"}, "text": "/start"}},
                {"update_id": 2, "my_chat_member": {"chat": {"id": -500}}},
                {"update_id": 3, "message": {"message_id": 6, "chat": {"id": -222, "type": "group"}}},
                {"update_id": 4, "message": {"message_id": 7, "chat": {"id": 111, "type": "private"}}}
            ]
        }"#;
        let res: ApiResponse<Vec<Update>> = serde_json::from_str(body).unwrap();
        let chats = chats_from_updates(res.into_result().unwrap().unwrap());
        assert_eq!(chats, [111, -222]);
    }

    #[test]
    fn rejected_calls_carry_description() {
        let body = r#"{"ok": false, "error_code": 400, "description": "Bad Request: can't parse entities"}"#;
        let res: ApiResponse<serde_json::Value> = serde_json::from_str(body).unwrap();
        let err = res.into_result().unwrap_err();
        assert!(err.to_string().contains("can't parse entities"));
    }
}
