//! Jellyfin inventory source
//!
//! Reads server health and per-library item counts from the Jellyfin HTTP API
//! and folds them into an [InventorySnapshot]. Failures are degraded rather than
//! propagated: an unreachable server reports as offline, a library whose counts
//! cannot be read is marked degraded, and the rest of the snapshot is kept.

use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::services::rate_limiter::RateLimitedClient;

/// Window in which an item counts as recently added
pub const RECENT_WINDOW_HOURS: i64 = 24;

/// Upper bound on recency pages fetched per library and cycle
const MAX_RECENT_PAGES: u32 = 100;

/// Jellyfin connection and inventory settings
#[derive(Debug, Clone)]
pub struct JellyfinConfig {
    /// Base URL without trailing slash
    pub base_url: String,
    /// Static API token sent as `X-Emby-Token`
    pub api_key: String,
    /// Fixed user to enumerate libraries as; first listed user when unset
    pub user_id: Option<String>,
    /// Library names (exact, case-sensitive) left out of the snapshot
    pub ignored_libraries: Vec<String>,
    pub request_timeout: Duration,
    pub health_timeout: Duration,
    /// How many libraries are counted at the same time
    pub library_concurrency: usize,
    /// Newest items inspected per library when counting recent additions
    pub recent_scan_limit: u32,
}

/// Display classification of a library
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LibraryKind {
    Movies,
    Shows,
    MusicVideos,
    Unknown,
}

impl LibraryKind {
    /// Classify by declared collection type, then by name, else [LibraryKind::Unknown].
    pub fn classify(collection_type: Option<&str>, name: &str) -> Self {
        match collection_type.map(str::to_ascii_lowercase).as_deref() {
            Some("movies") => return LibraryKind::Movies,
            Some("tvshows") => return LibraryKind::Shows,
            Some("musicvideos") => return LibraryKind::MusicVideos,
            _ => {}
        }

        let name = name.to_lowercase();
        if name.contains("music video") || name.contains("musicvideo") {
            LibraryKind::MusicVideos
        } else if name.contains("movie") || name.contains("film") {
            LibraryKind::Movies
        } else if name.contains("show") || name.contains("series") || name.contains("tv") {
            LibraryKind::Shows
        } else {
            LibraryKind::Unknown
        }
    }
}

/// Item types that are counted per library
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ItemCategory {
    Movie,
    Series,
    Episode,
    MusicVideo,
}

impl ItemCategory {
    pub const ALL: [ItemCategory; 4] = [
        ItemCategory::Movie,
        ItemCategory::Series,
        ItemCategory::Episode,
        ItemCategory::MusicVideo,
    ];

    /// Name used by the `IncludeItemTypes` filter
    pub fn api_name(self) -> &'static str {
        match self {
            ItemCategory::Movie => "Movie",
            ItemCategory::Series => "Series",
            ItemCategory::Episode => "Episode",
            ItemCategory::MusicVideo => "MusicVideo",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LibrarySummary {
    pub name: String,
    pub kind: LibraryKind,
    pub counts: BTreeMap<ItemCategory, u64>,
    pub recently_added: u64,
    /// Counting failed; `counts` is empty and should not be trusted
    pub degraded: bool,
}

impl LibrarySummary {
    pub fn count(&self, category: ItemCategory) -> u64 {
        self.counts.get(&category).copied().unwrap_or(0)
    }
}

/// Why a snapshot carries no libraries
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InventoryIssue {
    /// No user identity was configured or listed
    NoIdentity,
    /// Users or libraries could not be listed
    ListingFailed(String),
}

/// Point-in-time read of the media server. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InventorySnapshot {
    pub server_online: bool,
    pub libraries: Vec<LibrarySummary>,
    pub issue: Option<InventoryIssue>,
}

/// A top-level library folder as listed by the server
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LibraryFolder {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub collection_type: Option<String>,
    #[serde(default)]
    pub is_folder: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct JellyfinUser {
    id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ItemsResponse<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
    #[serde(default)]
    total_record_count: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CreatedItem {
    #[serde(default)]
    date_created: Option<String>,
}

/// Raw calls against the media server API
#[async_trait]
pub trait InventoryApi: Send + Sync {
    /// Bounded health check; never fails, an unreachable server is `false`
    async fn ping(&self) -> bool;

    async fn first_user_id(&self) -> Result<Option<String>>;

    async fn libraries(&self, user_id: &str) -> Result<Vec<LibraryFolder>>;

    async fn count_items(
        &self,
        user_id: &str,
        library_id: &str,
        category: ItemCategory,
    ) -> Result<u64>;

    /// One page of creation timestamps, newest first, starting at
    /// `start_index` and holding at most `limit` entries
    async fn recent_created(
        &self,
        user_id: &str,
        library_id: &str,
        start_index: u32,
        limit: u32,
    ) -> Result<Vec<String>>;
}

/// Produces one [InventorySnapshot] per cycle
#[async_trait]
pub trait InventorySource: Send + Sync {
    async fn fetch_snapshot(&self) -> Result<InventorySnapshot>;
}

/// Jellyfin HTTP API client
pub struct JellyfinClient {
    http: RateLimitedClient,
    base_url: String,
    api_key: String,
    health_timeout: Duration,
}

impl JellyfinClient {
    pub fn new(config: &JellyfinConfig) -> anyhow::Result<Self> {
        Ok(Self {
            http: RateLimitedClient::for_jellyfin(config.request_timeout)
                .context("Failed to build Jellyfin client")?,
            base_url: config.base_url.clone(),
            api_key: config.api_key.clone(),
            health_timeout: config.health_timeout,
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .http
            .get_with_headers_and_query(
                &url,
                &[("X-Emby-Token", self.api_key.as_str()), ("Accept", "application/json")],
                query,
            )
            .await
            .map_err(|e| Error::upstream(format!("GET {path}: {e:#}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::upstream(format!("GET {path} returned {status}")));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| Error::malformed(format!("GET {path}: {e}")))
    }
}

#[async_trait]
impl InventoryApi for JellyfinClient {
    async fn ping(&self) -> bool {
        let url = format!("{}/health", self.base_url);
        self.http.wait_for_permit().await;
        match self
            .http
            .inner()
            .get(&url)
            .timeout(self.health_timeout)
            .send()
            .await
        {
            Ok(response) if response.status().is_success() => true,
            Ok(response) => {
                warn!(status = %response.status(), "Jellyfin health check returned non-success");
                false
            }
            Err(e) => {
                warn!(error = %e, "Jellyfin health check failed");
                false
            }
        }
    }

    async fn first_user_id(&self) -> Result<Option<String>> {
        let users: Vec<JellyfinUser> = self.get_json("/Users", &[]).await?;
        Ok(users.into_iter().next().map(|u| u.id))
    }

    async fn libraries(&self, user_id: &str) -> Result<Vec<LibraryFolder>> {
        let response: ItemsResponse<LibraryFolder> = self
            .get_json(
                &format!("/Users/{user_id}/Items"),
                &[("Recursive", "false".to_string())],
            )
            .await?;
        Ok(response.items)
    }

    async fn count_items(
        &self,
        user_id: &str,
        library_id: &str,
        category: ItemCategory,
    ) -> Result<u64> {
        let response: ItemsResponse<serde_json::Value> = self
            .get_json(
                &format!("/Users/{user_id}/Items"),
                &[
                    ("Recursive", "true".to_string()),
                    ("ParentId", library_id.to_string()),
                    ("IncludeItemTypes", category.api_name().to_string()),
                    ("Fields", "Id".to_string()),
                    ("Limit", "0".to_string()),
                ],
            )
            .await?;
        response
            .total_record_count
            .ok_or_else(|| Error::malformed("item listing without TotalRecordCount"))
    }

    async fn recent_created(
        &self,
        user_id: &str,
        library_id: &str,
        start_index: u32,
        limit: u32,
    ) -> Result<Vec<String>> {
        let response: ItemsResponse<CreatedItem> = self
            .get_json(
                &format!("/Users/{user_id}/Items"),
                &[
                    ("Recursive", "true".to_string()),
                    ("ParentId", library_id.to_string()),
                    ("IncludeItemTypes", "Movie,Episode,MusicVideo".to_string()),
                    ("Fields", "DateCreated".to_string()),
                    ("SortBy", "DateCreated".to_string()),
                    ("SortOrder", "Descending".to_string()),
                    ("StartIndex", start_index.to_string()),
                    ("Limit", limit.to_string()),
                ],
            )
            .await?;
        Ok(response
            .items
            .into_iter()
            // Keep undated items so page sizes stay comparable with `limit`
            .map(|item| item.date_created.unwrap_or_default())
            .collect())
    }
}

/// Assembles snapshots from an [InventoryApi]
pub struct Inventory<A> {
    api: A,
    user_id: Option<String>,
    ignored_libraries: Vec<String>,
    concurrency: usize,
    recent_page_size: u32,
}

impl<A: InventoryApi> Inventory<A> {
    pub fn new(api: A, config: &JellyfinConfig) -> Self {
        Self {
            api,
            user_id: config.user_id.clone(),
            ignored_libraries: config.ignored_libraries.clone(),
            concurrency: config.library_concurrency.max(1),
            recent_page_size: config.recent_scan_limit.max(1),
        }
    }

    /// Build a snapshot, judging recency against `now`.
    pub async fn snapshot_at(&self, now: DateTime<Utc>) -> InventorySnapshot {
        let server_online = self.api.ping().await;

        let user_id = match &self.user_id {
            Some(id) => id.clone(),
            None => match self.api.first_user_id().await {
                Ok(Some(id)) => id,
                Ok(None) => {
                    warn!("Jellyfin returned no users; libraries cannot be listed");
                    return InventorySnapshot {
                        server_online,
                        libraries: Vec::new(),
                        issue: Some(InventoryIssue::NoIdentity),
                    };
                }
                Err(e) => {
                    warn!(error = %e, "Failed to list Jellyfin users");
                    return InventorySnapshot {
                        server_online,
                        libraries: Vec::new(),
                        issue: Some(InventoryIssue::ListingFailed(e.to_string())),
                    };
                }
            },
        };

        let folders = match self.api.libraries(&user_id).await {
            Ok(folders) => folders,
            Err(e) => {
                warn!(error = %e, "Failed to list Jellyfin libraries");
                return InventorySnapshot {
                    server_online,
                    libraries: Vec::new(),
                    issue: Some(InventoryIssue::ListingFailed(e.to_string())),
                };
            }
        };

        let retained: Vec<LibraryFolder> = folders
            .into_iter()
            .filter(|f| f.is_folder.unwrap_or(true))
            .filter(|f| !self.ignored_libraries.iter().any(|name| *name == f.name))
            .collect();

        debug!(libraries = retained.len(), "Counting Jellyfin libraries");

        // buffered() yields in input order, so completion order cannot reshuffle counts
        let user_id = user_id.as_str();
        let libraries: Vec<LibrarySummary> = stream::iter(retained)
            .map(|folder| async move { self.summarize(user_id, &folder, now).await })
            .buffered(self.concurrency)
            .collect()
            .await;

        info!(
            online = server_online,
            libraries = libraries.len(),
            degraded = libraries.iter().filter(|l| l.degraded).count(),
            "Jellyfin snapshot collected"
        );

        InventorySnapshot {
            server_online,
            libraries,
            issue: None,
        }
    }

    async fn summarize(
        &self,
        user_id: &str,
        folder: &LibraryFolder,
        now: DateTime<Utc>,
    ) -> LibrarySummary {
        let kind = LibraryKind::classify(folder.collection_type.as_deref(), &folder.name);

        match self.collect_counts(user_id, &folder.id, now).await {
            Ok((counts, recently_added)) => LibrarySummary {
                name: folder.name.clone(),
                kind,
                counts,
                recently_added,
                degraded: false,
            },
            Err(e) => {
                warn!(library = %folder.name, error = %e, "Failed to count library items");
                LibrarySummary {
                    name: folder.name.clone(),
                    kind,
                    counts: BTreeMap::new(),
                    recently_added: 0,
                    degraded: true,
                }
            }
        }
    }

    async fn collect_counts(
        &self,
        user_id: &str,
        library_id: &str,
        now: DateTime<Utc>,
    ) -> Result<(BTreeMap<ItemCategory, u64>, u64)> {
        let mut counts = BTreeMap::new();
        for category in ItemCategory::ALL {
            let n = self.api.count_items(user_id, library_id, category).await?;
            counts.insert(category, n);
        }

        let recent = self.count_recent_pages(user_id, library_id, now).await?;
        Ok((counts, recent))
    }

    /// Page through items newest first until one falls outside the window.
    async fn count_recent_pages(
        &self,
        user_id: &str,
        library_id: &str,
        now: DateTime<Utc>,
    ) -> Result<u64> {
        let mut total = 0;
        let mut start_index = 0u32;

        for _ in 0..MAX_RECENT_PAGES {
            let page = self
                .api
                .recent_created(user_id, library_id, start_index, self.recent_page_size)
                .await?;
            let (recent, window_closed) = tally_recent(&page, now);
            total += recent;

            if window_closed || page.len() < self.recent_page_size as usize {
                return Ok(total);
            }
            start_index = start_index.saturating_add(self.recent_page_size);
        }

        warn!(
            library_id,
            counted = total,
            pages = MAX_RECENT_PAGES,
            "Stopped paging recently added items; count is a lower bound"
        );
        Ok(total)
    }
}

#[async_trait]
impl<A: InventoryApi> InventorySource for Inventory<A> {
    async fn fetch_snapshot(&self) -> Result<InventorySnapshot> {
        Ok(self.snapshot_at(Utc::now()).await)
    }
}

/// Parse a Jellyfin `DateCreated`; values without an offset are UTC.
pub fn parse_created(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

/// Count timestamps at or after `now - 24h`. Unparseable values are skipped.
pub fn count_recent(created: &[String], now: DateTime<Utc>) -> u64 {
    tally_recent(created, now).0
}

/// Recent count for one page, plus whether an item older than the window
/// was seen (so later pages cannot contain recent items).
fn tally_recent(created: &[String], now: DateTime<Utc>) -> (u64, bool) {
    let cutoff = now - chrono::Duration::hours(RECENT_WINDOW_HOURS);
    let mut recent = 0;
    let mut window_closed = false;
    for raw in created {
        match parse_created(raw) {
            Some(at) if at >= cutoff => recent += 1,
            Some(_) => window_closed = true,
            None => warn!(value = %raw, "Skipping malformed DateCreated"),
        }
    }
    (recent, window_closed)
}

#[cfg(test)]
pub mod testing {
    //! Scriptable [InventoryApi] for snapshot and board tests.

    use std::collections::{HashMap, HashSet};

    use parking_lot::Mutex;

    use super::*;

    #[derive(Default)]
    pub struct FakeInventoryApi {
        pub online: bool,
        pub users: Vec<String>,
        pub fail_users: bool,
        pub folders: Vec<LibraryFolder>,
        pub counts: HashMap<(String, ItemCategory), u64>,
        pub created: HashMap<String, Vec<String>>,
        pub failing_libraries: HashSet<String>,
        pub calls: Mutex<Vec<String>>,
        /// `start_index` of every recency page requested
        pub recent_pages: Mutex<Vec<u32>>,
    }

    impl FakeInventoryApi {
        pub fn folder(id: &str, name: &str, collection_type: Option<&str>) -> LibraryFolder {
            LibraryFolder {
                id: id.to_string(),
                name: name.to_string(),
                collection_type: collection_type.map(str::to_string),
                is_folder: Some(true),
            }
        }

        pub fn set_count(&mut self, library_id: &str, category: ItemCategory, n: u64) {
            self.counts.insert((library_id.to_string(), category), n);
        }
    }

    #[async_trait]
    impl InventoryApi for FakeInventoryApi {
        async fn ping(&self) -> bool {
            self.online
        }

        async fn first_user_id(&self) -> Result<Option<String>> {
            if self.fail_users {
                return Err(Error::upstream("connection refused"));
            }
            Ok(self.users.first().cloned())
        }

        async fn libraries(&self, user_id: &str) -> Result<Vec<LibraryFolder>> {
            self.calls.lock().push(format!("libraries:{user_id}"));
            Ok(self.folders.clone())
        }

        async fn count_items(
            &self,
            _user_id: &str,
            library_id: &str,
            category: ItemCategory,
        ) -> Result<u64> {
            if self.failing_libraries.contains(library_id) {
                return Err(Error::upstream("500 Internal Server Error"));
            }
            Ok(self
                .counts
                .get(&(library_id.to_string(), category))
                .copied()
                .unwrap_or(0))
        }

        async fn recent_created(
            &self,
            _user_id: &str,
            library_id: &str,
            start_index: u32,
            limit: u32,
        ) -> Result<Vec<String>> {
            self.recent_pages.lock().push(start_index);
            Ok(self
                .created
                .get(library_id)
                .map(|items| {
                    items
                        .iter()
                        .skip(start_index as usize)
                        .take(limit as usize)
                        .cloned()
                        .collect()
                })
                .unwrap_or_default())
        }
    }
}
