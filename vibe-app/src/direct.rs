//! `DirectChannel` over a chat adapter's private channels.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use vibe_channels::{ChannelAdapter, OutboundMessage, UserId};
use vibe_clarify::{CollectOptions, CollectorHub, DirectChannel, ReplyCollector};

pub struct AdapterDirectChannel {
    adapter: Arc<dyn ChannelAdapter>,
    hub: CollectorHub,
}

impl AdapterDirectChannel {
    pub fn new(adapter: Arc<dyn ChannelAdapter>, hub: CollectorHub) -> Self {
        Self { adapter, hub }
    }
}

#[async_trait]
impl DirectChannel for AdapterDirectChannel {
    #[tracing::instrument(level = "debug", skip_all, fields(user_id = %user_id))]
    async fn send(&self, user_id: &UserId, text: &str) -> Result<()> {
        self.adapter
            .send_direct(user_id, OutboundMessage::text(text))
            .await
    }

    async fn collect(&self, user_id: &UserId, options: CollectOptions) -> Result<ReplyCollector> {
        let channel_id = self
            .adapter
            .open_direct(user_id)
            .await
            .map_err(|e| anyhow::anyhow!("open direct channel for {user_id}: {e}"))?;
        Ok(self.hub.subscribe(user_id.clone(), Some(channel_id), options))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::sync::mpsc;
    use vibe_channels::{ChannelId, InboundMessage, MessageId};
    use vibe_clarify::DirectReply;

    #[derive(Default)]
    struct RecordingAdapter {
        sent: Mutex<Vec<(ChannelId, String)>>,
    }

    #[async_trait]
    impl ChannelAdapter for RecordingAdapter {
        fn channel_id(&self) -> &str {
            "test"
        }

        async fn start(&self, _tx: mpsc::Sender<InboundMessage>) -> Result<()> {
            Ok(())
        }

        async fn send(&self, channel_id: &ChannelId, message: OutboundMessage) -> Result<()> {
            self.sent
                .lock()
                .unwrap()
                .push((channel_id.clone(), message.content));
            Ok(())
        }

        async fn open_direct(&self, user_id: &UserId) -> Result<ChannelId> {
            if user_id.as_str() == "closed" {
                anyhow::bail!("Cannot send messages to this user");
            }
            Ok(ChannelId::new(format!("dm-{user_id}")))
        }
    }

    fn reply_in(channel: &str) -> DirectReply {
        DirectReply {
            message_id: MessageId::new("1"),
            channel_id: ChannelId::new(channel),
            author_id: UserId::new("alice"),
            content: "2".to_string(),
        }
    }

    #[tokio::test]
    async fn send_goes_to_the_users_private_channel() {
        let adapter = Arc::new(RecordingAdapter::default());
        let direct = AdapterDirectChannel::new(adapter.clone(), CollectorHub::new());
        direct
            .send(&UserId::new("alice"), "hello")
            .await
            .expect("send");
        let sent = adapter.sent.lock().unwrap().clone();
        assert_eq!(sent, vec![(ChannelId::new("dm-alice"), "hello".to_string())]);
    }

    #[tokio::test]
    async fn collector_only_accepts_the_private_channel() {
        let hub = CollectorHub::new();
        let direct = AdapterDirectChannel::new(Arc::new(RecordingAdapter::default()), hub.clone());
        let mut collector = direct
            .collect(&UserId::new("alice"), CollectOptions::within(Duration::from_secs(5)))
            .await
            .expect("collect");

        assert!(!hub.dispatch(reply_in("general")));
        assert!(hub.dispatch(reply_in("dm-alice")));
        let reply = collector.next().await.expect("reply");
        assert_eq!(reply.channel_id.as_str(), "dm-alice");
    }

    #[tokio::test]
    async fn closed_direct_messages_fail_collect() {
        let hub = CollectorHub::new();
        let direct = AdapterDirectChannel::new(Arc::new(RecordingAdapter::default()), hub.clone());
        let result = direct
            .collect(&UserId::new("closed"), CollectOptions::within(Duration::from_secs(5)))
            .await;
        assert!(result.is_err());
        assert_eq!(hub.active_collectors(), 0);
    }
}
