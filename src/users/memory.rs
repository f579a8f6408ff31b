//! In-memory `UserStore` used by the unit and router tests.

use std::collections::HashMap;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::repo::{StoreError, StoreResult, UserStore};
use super::repo_types::{
    ChannelProfile, NewUser, ProfileUpdate, PublicUser, User, VideoOwner, WatchedVideo,
};

#[derive(Debug, Clone)]
struct Video {
    id: Uuid,
    owner: Uuid,
    title: String,
    created_at: OffsetDateTime,
}

#[derive(Default)]
struct Inner {
    users: HashMap<Uuid, User>,
    videos: HashMap<Uuid, Video>,
    history: HashMap<Uuid, Vec<Uuid>>,
    subscriptions: Vec<(Uuid, Uuid)>, // (subscriber, channel)
}

#[derive(Default)]
pub struct MemoryUserStore {
    inner: RwLock<Inner>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_video(&self, owner: Uuid, title: &str) -> Uuid {
        let id = Uuid::new_v4();
        let video = Video {
            id,
            owner,
            title: title.to_string(),
            created_at: OffsetDateTime::now_utc(),
        };
        self.inner.write().await.videos.insert(id, video);
        id
    }

    pub async fn record_view(&self, user_id: Uuid, video_id: Uuid) {
        self.inner
            .write()
            .await
            .history
            .entry(user_id)
            .or_default()
            .push(video_id);
    }

    pub async fn subscribe(&self, subscriber: Uuid, channel: Uuid) {
        let mut inner = self.inner.write().await;
        if !inner.subscriptions.contains(&(subscriber, channel)) {
            inner.subscriptions.push((subscriber, channel));
        }
    }

    pub async fn stored_refresh_token(&self, id: Uuid) -> Option<String> {
        self.inner
            .read()
            .await
            .users
            .get(&id)
            .and_then(|u| u.refresh_token.clone())
    }

    pub async fn stored_password_hash(&self, id: Uuid) -> Option<String> {
        self.inner
            .read()
            .await
            .users
            .get(&id)
            .map(|u| u.password_hash.clone())
    }
}

fn touch(user: &mut User) {
    user.updated_at = OffsetDateTime::now_utc();
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn create(&self, new: NewUser) -> StoreResult<User> {
        let mut inner = self.inner.write().await;
        if inner.users.values().any(|u| u.user_name == new.user_name) {
            return Err(StoreError::Conflict("userName"));
        }
        if inner.users.values().any(|u| u.email == new.email) {
            return Err(StoreError::Conflict("email"));
        }
        let now = OffsetDateTime::now_utc();
        let user = User {
            id: Uuid::new_v4(),
            user_name: new.user_name,
            email: new.email,
            full_name: new.full_name,
            avatar: new.avatar,
            cover_image: new.cover_image,
            password_hash: new.password_hash,
            refresh_token: None,
            created_at: now,
            updated_at: now,
        };
        inner.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn find_by_handle_or_email(
        &self,
        user_name: Option<&str>,
        email: Option<&str>,
    ) -> StoreResult<Option<User>> {
        let inner = self.inner.read().await;
        let by_handle = inner
            .users
            .values()
            .find(|u| Some(u.user_name.as_str()) == user_name);
        let by_email = || inner.users.values().find(|u| Some(u.email.as_str()) == email);
        Ok(by_handle.or_else(by_email).cloned())
    }

    async fn find_by_id(&self, id: Uuid) -> StoreResult<Option<User>> {
        Ok(self.inner.read().await.users.get(&id).cloned())
    }

    async fn find_public_by_id(&self, id: Uuid) -> StoreResult<Option<PublicUser>> {
        Ok(self.inner.read().await.users.get(&id).map(PublicUser::from))
    }

    async fn update_refresh_token(&self, id: Uuid, token: Option<&str>) -> StoreResult<()> {
        if let Some(user) = self.inner.write().await.users.get_mut(&id) {
            user.refresh_token = token.map(str::to_string);
            touch(user);
        }
        Ok(())
    }

    async fn replace_refresh_token(&self, id: Uuid, expected: &str, new: &str) -> StoreResult<bool> {
        let mut inner = self.inner.write().await;
        match inner.users.get_mut(&id) {
            Some(user) if user.refresh_token.as_deref() == Some(expected) => {
                user.refresh_token = Some(new.to_string());
                touch(user);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn update_password(&self, id: Uuid, password_hash: &str) -> StoreResult<()> {
        if let Some(user) = self.inner.write().await.users.get_mut(&id) {
            user.password_hash = password_hash.to_string();
            touch(user);
        }
        Ok(())
    }

    async fn update_profile(&self, id: Uuid, update: ProfileUpdate) -> StoreResult<Option<PublicUser>> {
        let mut inner = self.inner.write().await;
        if let Some(email) = &update.email {
            if inner.users.values().any(|u| u.id != id && &u.email == email) {
                return Err(StoreError::Conflict("email"));
            }
        }
        Ok(inner.users.get_mut(&id).map(|user| {
            if let Some(full_name) = update.full_name {
                user.full_name = full_name;
            }
            if let Some(email) = update.email {
                user.email = email;
            }
            touch(user);
            PublicUser::from(&*user)
        }))
    }

    async fn update_avatar(&self, id: Uuid, url: &str) -> StoreResult<Option<PublicUser>> {
        Ok(self.inner.write().await.users.get_mut(&id).map(|user| {
            user.avatar = url.to_string();
            touch(user);
            PublicUser::from(&*user)
        }))
    }

    async fn update_cover(&self, id: Uuid, url: &str) -> StoreResult<Option<PublicUser>> {
        Ok(self.inner.write().await.users.get_mut(&id).map(|user| {
            user.cover_image = Some(url.to_string());
            touch(user);
            PublicUser::from(&*user)
        }))
    }

    async fn channel_profile(&self, user_name: &str, viewer: Uuid) -> StoreResult<Option<ChannelProfile>> {
        let inner = self.inner.read().await;
        let Some(u) = inner.users.values().find(|u| u.user_name == user_name) else {
            return Ok(None);
        };
        let subs = &inner.subscriptions;
        Ok(Some(ChannelProfile {
            id: u.id,
            user_name: u.user_name.clone(),
            full_name: u.full_name.clone(),
            email: u.email.clone(),
            avatar: u.avatar.clone(),
            cover_image: u.cover_image.clone(),
            subscribers_count: subs.iter().filter(|(_, c)| *c == u.id).count() as i64,
            channels_subscribed_to_count: subs.iter().filter(|(s, _)| *s == u.id).count() as i64,
            is_subscribed: subs.contains(&(viewer, u.id)),
        }))
    }

    async fn watch_history(&self, user_id: Uuid) -> StoreResult<Option<Vec<WatchedVideo>>> {
        let inner = self.inner.read().await;
        if !inner.users.contains_key(&user_id) {
            return Ok(None);
        }
        let ids = inner.history.get(&user_id).cloned().unwrap_or_default();
        let videos = ids
            .iter()
            .rev()
            .filter_map(|id| inner.videos.get(id))
            .filter_map(|v| {
                let owner = inner.users.get(&v.owner)?;
                Some(WatchedVideo {
                    id: v.id,
                    title: v.title.clone(),
                    description: String::new(),
                    video_file: format!("https://cdn.local/videos/{}.mp4", v.id),
                    thumbnail: format!("https://cdn.local/thumbs/{}.jpg", v.id),
                    duration: 0.0,
                    views: 0,
                    created_at: v.created_at,
                    owner: VideoOwner {
                        user_name: owner.user_name.clone(),
                        full_name: owner.full_name.clone(),
                        avatar: owner.avatar.clone(),
                    },
                })
            })
            .collect();
        Ok(Some(videos))
    }
}
