//! Reply collectors: time- and count-bounded subscriptions to one user's
//! messages in their private channel.
//!
//! The transport pushes every inbound direct message into
//! [`CollectorHub::dispatch`]; the hub hands it to the collector registered
//! for that author, if any. A user has at most one live collector; a new
//! subscription replaces the old one.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use uuid::Uuid;
use vibe_channels::{ChannelId, MessageId, UserId};

/// A message a user sent in their private channel with the bot.
#[derive(Debug, Clone)]
pub struct DirectReply {
    pub message_id: MessageId,
    pub channel_id: ChannelId,
    pub author_id: UserId,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollectOptions {
    pub max_messages: Option<usize>,
    pub timeout: Duration,
}

impl CollectOptions {
    pub fn within(timeout: Duration) -> Self {
        Self {
            max_messages: None,
            timeout,
        }
    }

    pub fn max_messages(mut self, max_messages: usize) -> Self {
        self.max_messages = Some(max_messages);
        self
    }
}

/// Why a collector stopped yielding messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectEnd {
    /// The deadline passed.
    Time,
    /// `max_messages` were collected.
    Limit,
    /// The owner called [`ReplyCollector::stop`].
    Stopped,
    /// A newer collector took over the same user.
    Replaced,
}

struct Route {
    id: Uuid,
    channel_id: Option<ChannelId>,
    tx: mpsc::UnboundedSender<DirectReply>,
}

#[derive(Clone, Default)]
pub struct CollectorHub {
    routes: Arc<DashMap<UserId, Route>>,
}

impl CollectorHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a collector for `user_id`. When `channel_id` is set, only
    /// messages posted in that channel qualify.
    pub fn subscribe(
        &self,
        user_id: UserId,
        channel_id: Option<ChannelId>,
        options: CollectOptions,
    ) -> ReplyCollector {
        let (tx, rx) = mpsc::unbounded_channel();
        let route_id = Uuid::new_v4();
        let previous = self.routes.insert(
            user_id.clone(),
            Route {
                id: route_id,
                channel_id,
                tx,
            },
        );
        if previous.is_some() {
            tracing::debug!(user_id = %user_id, "replaced stale reply collector");
        }
        ReplyCollector {
            user_id,
            route_id,
            routes: self.routes.clone(),
            rx,
            deadline: Instant::now() + options.timeout,
            max_messages: options.max_messages,
            collected: 0,
            ended: None,
        }
    }

    /// Offer an inbound direct message. Returns true when a collector took it.
    pub fn dispatch(&self, reply: DirectReply) -> bool {
        let Some(route) = self.routes.get(&reply.author_id) else {
            return false;
        };
        if let Some(expected) = route.channel_id.as_ref() {
            if expected != &reply.channel_id {
                return false;
            }
        }
        route.tx.send(reply).is_ok()
    }

    pub fn is_collecting(&self, user_id: &UserId) -> bool {
        self.routes.contains_key(user_id)
    }

    pub fn active_collectors(&self) -> usize {
        self.routes.len()
    }
}

pub struct ReplyCollector {
    user_id: UserId,
    route_id: Uuid,
    routes: Arc<DashMap<UserId, Route>>,
    rx: mpsc::UnboundedReceiver<DirectReply>,
    deadline: Instant,
    max_messages: Option<usize>,
    collected: usize,
    ended: Option<CollectEnd>,
}

impl ReplyCollector {
    /// Next qualifying reply, or `None` once the collector has ended.
    pub async fn next(&mut self) -> Option<DirectReply> {
        if self.ended.is_some() {
            return None;
        }
        if self.max_messages.is_some_and(|max| self.collected >= max) {
            self.finish(CollectEnd::Limit);
            return None;
        }

        match tokio::time::timeout_at(self.deadline, self.rx.recv()).await {
            Ok(Some(reply)) => {
                self.collected += 1;
                if self.max_messages.is_some_and(|max| self.collected >= max) {
                    self.finish(CollectEnd::Limit);
                }
                Some(reply)
            }
            Ok(None) => {
                self.finish(CollectEnd::Replaced);
                None
            }
            Err(_) => {
                self.finish(CollectEnd::Time);
                None
            }
        }
    }

    /// Stop listening. Idempotent; an earlier end reason is kept.
    pub fn stop(&mut self) {
        if self.ended.is_none() {
            self.finish(CollectEnd::Stopped);
        }
    }

    pub fn end_reason(&self) -> Option<CollectEnd> {
        self.ended
    }

    pub fn collected(&self) -> usize {
        self.collected
    }

    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    fn finish(&mut self, reason: CollectEnd) {
        self.ended = Some(reason);
        self.unregister();
        self.rx.close();
    }

    fn unregister(&self) {
        self.routes
            .remove_if(&self.user_id, |_, route| route.id == self.route_id);
    }
}

impl Drop for ReplyCollector {
    fn drop(&mut self) {
        self.unregister();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reply(author: &str, channel: &str, content: &str) -> DirectReply {
        DirectReply {
            message_id: MessageId::new(format!("{author}-{content}")),
            channel_id: ChannelId::new(channel),
            author_id: UserId::new(author),
            content: content.to_string(),
        }
    }

    #[tokio::test]
    async fn only_the_subscribed_author_in_its_channel_is_collected() {
        let hub = CollectorHub::new();
        let mut collector = hub.subscribe(
            UserId::new("u"),
            Some(ChannelId::new("dm-u")),
            CollectOptions::within(Duration::from_secs(5)),
        );

        assert!(!hub.dispatch(reply("someone-else", "dm-u", "1")));
        assert!(!hub.dispatch(reply("u", "guild-channel", "1")));
        assert!(hub.dispatch(reply("u", "dm-u", "2")));

        let got = collector.next().await.expect("reply delivered");
        assert_eq!(got.content, "2");
        assert_eq!(collector.collected(), 1);
    }

    #[tokio::test]
    async fn limit_ends_collector_and_releases_route() {
        let hub = CollectorHub::new();
        let mut collector = hub.subscribe(
            UserId::new("u"),
            None,
            CollectOptions::within(Duration::from_secs(5)).max_messages(1),
        );
        assert!(hub.dispatch(reply("u", "dm", "first")));

        assert!(collector.next().await.is_some());
        assert_eq!(collector.end_reason(), Some(CollectEnd::Limit));
        assert!(!hub.is_collecting(&UserId::new("u")));
        assert!(collector.next().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn silence_ends_with_time() {
        let hub = CollectorHub::new();
        let mut collector = hub.subscribe(
            UserId::new("u"),
            None,
            CollectOptions::within(Duration::from_secs(60)),
        );

        assert!(collector.next().await.is_none());
        assert_eq!(collector.end_reason(), Some(CollectEnd::Time));
        assert_eq!(collector.collected(), 0);
        assert_eq!(hub.active_collectors(), 0);
    }

    #[tokio::test]
    async fn newer_subscription_replaces_older() {
        let hub = CollectorHub::new();
        let options = CollectOptions::within(Duration::from_secs(5));
        let mut stale = hub.subscribe(UserId::new("u"), None, options);
        let mut fresh = hub.subscribe(UserId::new("u"), None, options);

        assert!(hub.dispatch(reply("u", "dm", "hello")));
        assert!(stale.next().await.is_none());
        assert_eq!(stale.end_reason(), Some(CollectEnd::Replaced));

        // The stale collector going away must not unregister the fresh one.
        drop(stale);
        assert!(hub.is_collecting(&UserId::new("u")));
        assert_eq!(fresh.next().await.map(|r| r.content), Some("hello".to_string()));
    }

    #[test]
    fn stop_and_drop_release_the_route() {
        let hub = CollectorHub::new();
        let options = CollectOptions::within(Duration::from_secs(5));

        let mut stopped = hub.subscribe(UserId::new("a"), None, options);
        stopped.stop();
        stopped.stop();
        assert_eq!(stopped.end_reason(), Some(CollectEnd::Stopped));
        assert!(!hub.is_collecting(&UserId::new("a")));

        let dropped = hub.subscribe(UserId::new("b"), None, options);
        assert!(hub.is_collecting(&UserId::new("b")));
        drop(dropped);
        assert_eq!(hub.active_collectors(), 0);
    }
}
