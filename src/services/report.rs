//! Status report rendering.
//!
//! [ReportBuilder::build] turns an [InventorySnapshot] into a [ReportDocument].
//! It is pure: no I/O and no failure path. Anything it cannot make sense of is
//! rendered as a minimal placeholder document that states the problem.

use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;

use crate::services::jellyfin::{
    InventoryIssue, InventorySnapshot, ItemCategory, LibraryKind, LibrarySummary,
};

/// How a section should be laid out by the chat sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayHint {
    Inline,
    Block,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportSection {
    pub heading: String,
    pub body: String,
    pub display: DisplayHint,
}

impl ReportSection {
    fn inline(heading: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            heading: heading.into(),
            body: body.into(),
            display: DisplayHint::Inline,
        }
    }

    fn block(heading: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            heading: heading.into(),
            body: body.into(),
            display: DisplayHint::Block,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorTag {
    Healthy,
    Unhealthy,
    Neutral,
}

/// A rendered status report, immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportDocument {
    pub title: String,
    pub sections: Vec<ReportSection>,
    pub color: ColorTag,
    pub generated_at: DateTime<Utc>,
    pub footer: String,
    pub thumbnail_url: Option<String>,
    pub footer_icon_url: Option<String>,
}

impl ReportDocument {
    pub fn section(&self, heading: &str) -> Option<&ReportSection> {
        self.sections.iter().find(|s| s.heading == heading)
    }
}

/// Presentation settings for the report.
#[derive(Debug, Clone)]
pub struct ReportConfig {
    pub title: String,
    pub thumbnail_url: Option<String>,
    pub footer_icon_url: Option<String>,
    /// Timezone the footer timestamp is rendered in
    pub timezone: Tz,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            title: "Jellyfin Server Status & Media Library Counts".to_string(),
            thumbnail_url: None,
            footer_icon_url: None,
            timezone: Tz::UTC,
        }
    }
}

pub const STATUS_HEADING: &str = "Status";
pub const LIBRARIES_HEADING: &str = "Libraries";
pub const RECENT_HEADING: &str = "Recently Added (24h)";
pub const NOTHING_RECENT: &str = "Nothing new in the last 24 hours";

pub struct ReportBuilder {
    config: ReportConfig,
    ignored_libraries: Vec<String>,
}

impl ReportBuilder {
    pub fn new(config: ReportConfig, ignored_libraries: Vec<String>) -> Self {
        Self {
            config,
            ignored_libraries,
        }
    }

    /// Render a snapshot taken for the cycle stamped `generated_at`.
    pub fn build(&self, snapshot: &InventorySnapshot, generated_at: DateTime<Utc>) -> ReportDocument {
        if snapshot.libraries.iter().any(|l| l.name.trim().is_empty()) {
            return self.placeholder("Inventory contained a library without a name", generated_at);
        }

        let libraries: Vec<&LibrarySummary> = snapshot
            .libraries
            .iter()
            .filter(|l| !self.ignored_libraries.iter().any(|ignored| *ignored == l.name))
            .collect();

        let mut sections = vec![ReportSection::block(
            STATUS_HEADING,
            status_line(snapshot.server_online),
        )];

        match &snapshot.issue {
            Some(InventoryIssue::NoIdentity) => sections.push(ReportSection::block(
                LIBRARIES_HEADING,
                "No users found or error retrieving user ID.",
            )),
            Some(InventoryIssue::ListingFailed(reason)) => sections.push(ReportSection::block(
                LIBRARIES_HEADING,
                format!("Library listing unavailable: {reason}"),
            )),
            None if libraries.is_empty() => {
                sections.push(ReportSection::block(LIBRARIES_HEADING, "No libraries found."))
            }
            None => sections.extend(
                libraries
                    .iter()
                    .map(|l| ReportSection::inline(l.name.clone(), format_counts(l))),
            ),
        }

        sections.push(ReportSection::block(RECENT_HEADING, recent_lines(&libraries)));

        ReportDocument {
            title: self.config.title.clone(),
            sections,
            color: if snapshot.server_online {
                ColorTag::Healthy
            } else {
                ColorTag::Unhealthy
            },
            generated_at,
            footer: self.footer(generated_at),
            thumbnail_url: self.config.thumbnail_url.clone(),
            footer_icon_url: self.config.footer_icon_url.clone(),
        }
    }

    /// Minimal document used when no usable inventory is available.
    pub fn placeholder(&self, reason: &str, generated_at: DateTime<Utc>) -> ReportDocument {
        ReportDocument {
            title: self.config.title.clone(),
            sections: vec![ReportSection::block(
                STATUS_HEADING,
                format!("⚠️ **Status unavailable:** {reason}"),
            )],
            color: ColorTag::Neutral,
            generated_at,
            footer: self.footer(generated_at),
            thumbnail_url: self.config.thumbnail_url.clone(),
            footer_icon_url: self.config.footer_icon_url.clone(),
        }
    }

    fn footer(&self, at: DateTime<Utc>) -> String {
        format!(
            "Last updated {}",
            at.with_timezone(&self.config.timezone)
                .format("%Y-%m-%d %H:%M:%S %Z")
        )
    }
}

pub fn status_line(server_online: bool) -> &'static str {
    if server_online {
        "🟢 **Server Status:** Online"
    } else {
        "🔴 **Server Status:** Offline"
    }
}

/// Value shown for a library field, based on its classified kind.
pub fn format_counts(library: &LibrarySummary) -> String {
    if library.degraded {
        return "Counts unavailable".to_string();
    }

    let movies = library.count(ItemCategory::Movie);
    let series = library.count(ItemCategory::Series);
    let episodes = library.count(ItemCategory::Episode);
    let music_videos = library.count(ItemCategory::MusicVideo);

    match library.kind {
        LibraryKind::Movies => plural(movies, "Movie", "Movies"),
        LibraryKind::Shows if episodes > 0 => format!(
            "{} / {}",
            plural(series, "Show", "Shows"),
            plural(episodes, "Episode", "Episodes")
        ),
        LibraryKind::Shows => plural(series, "Show", "Shows"),
        LibraryKind::MusicVideos => plural(music_videos, "Music Video", "Music Videos"),
        LibraryKind::Unknown => {
            let parts: Vec<String> = [
                (movies, "Movie", "Movies"),
                (series, "Show", "Shows"),
                (episodes, "Episode", "Episodes"),
                (music_videos, "Music Video", "Music Videos"),
            ]
            .into_iter()
            .filter(|(n, _, _)| *n > 0)
            .map(|(n, one, many)| plural(n, one, many))
            .collect();

            if parts.is_empty() {
                "No items".to_string()
            } else {
                parts.join(" / ")
            }
        }
    }
}

fn plural(n: u64, one: &str, many: &str) -> String {
    if n == 1 {
        format!("{n} {one}")
    } else {
        format!("{n} {many}")
    }
}

fn recent_lines(libraries: &[&LibrarySummary]) -> String {
    let lines: Vec<String> = libraries
        .iter()
        .filter(|l| l.recently_added > 0)
        .map(|l| format!("**{}:** +{}", l.name, l.recently_added))
        .collect();

    if lines.is_empty() {
        NOTHING_RECENT.to_string()
    } else {
        lines.join("\n")
    }
}

/// Per-process clock whose stamps strictly increase, even if the wall clock
/// steps backwards between cycles.
#[derive(Debug, Default)]
pub struct MonotonicClock {
    last: Option<DateTime<Utc>>,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn now(&mut self) -> DateTime<Utc> {
        self.stamp(Utc::now())
    }

    pub fn stamp(&mut self, candidate: DateTime<Utc>) -> DateTime<Utc> {
        let next = match self.last {
            Some(last) if candidate <= last => last + Duration::milliseconds(1),
            _ => candidate,
        };
        self.last = Some(next);
        next
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    use super::*;

    fn library(name: &str, kind: LibraryKind, counts: &[(ItemCategory, u64)]) -> LibrarySummary {
        LibrarySummary {
            name: name.to_string(),
            kind,
            counts: counts.iter().copied().collect::<BTreeMap<_, _>>(),
            recently_added: 0,
            degraded: false,
        }
    }

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 15, 12, 0, 0).unwrap()
    }

    fn builder() -> ReportBuilder {
        ReportBuilder::new(
            ReportConfig::default(),
            vec!["Playlists".to_string(), "Collections".to_string()],
        )
    }

    #[test]
    fn test_classified_formatting() {
        let movies = library(
            "Films",
            LibraryKind::classify(Some("movies"), "Films"),
            &[
                (ItemCategory::Movie, 12),
                (ItemCategory::Series, 0),
                (ItemCategory::Episode, 0),
                (ItemCategory::MusicVideo, 0),
            ],
        );
        assert_eq!(format_counts(&movies), "12 Movies");

        let shows = library(
            "TV",
            LibraryKind::classify(Some("tvshows"), "TV"),
            &[(ItemCategory::Series, 3), (ItemCategory::Episode, 30)],
        );
        assert_eq!(format_counts(&shows), "3 Shows / 30 Episodes");

        let no_episodes = library(
            "TV",
            LibraryKind::Shows,
            &[(ItemCategory::Series, 3), (ItemCategory::Episode, 0)],
        );
        assert_eq!(format_counts(&no_episodes), "3 Shows");

        let clips = library("Clips", LibraryKind::MusicVideos, &[(ItemCategory::MusicVideo, 1)]);
        assert_eq!(format_counts(&clips), "1 Music Video");
    }

    #[test]
    fn test_mixed_fallback() {
        let mixed = library(
            "Stuff",
            LibraryKind::Unknown,
            &[(ItemCategory::Movie, 2), (ItemCategory::Episode, 7)],
        );
        assert_eq!(format_counts(&mixed), "2 Movies / 7 Episodes");
        assert_eq!(format_counts(&library("Empty", LibraryKind::Unknown, &[])), "No items");
    }

    #[test]
    fn test_degraded_library_is_marked() {
        let mut broken = library("Films", LibraryKind::Movies, &[]);
        broken.degraded = true;
        assert_eq!(format_counts(&broken), "Counts unavailable");
    }

    #[test]
    fn test_build_online_report() {
        let mut films = library("Films", LibraryKind::Movies, &[(ItemCategory::Movie, 12)]);
        films.recently_added = 2;
        let snapshot = InventorySnapshot {
            server_online: true,
            libraries: vec![
                films,
                library("Collections", LibraryKind::Unknown, &[(ItemCategory::Movie, 99)]),
                library("TV", LibraryKind::Shows, &[(ItemCategory::Series, 3)]),
            ],
            issue: None,
        };

        let doc = builder().build(&snapshot, at());
        assert_eq!(doc.color, ColorTag::Healthy);
        assert_eq!(
            doc.sections,
            vec![
                ReportSection::block(STATUS_HEADING, "🟢 **Server Status:** Online"),
                ReportSection::inline("Films", "12 Movies"),
                ReportSection::inline("TV", "3 Shows"),
                ReportSection::block(RECENT_HEADING, "**Films:** +2"),
            ]
        );
        assert!(doc.section("Collections").is_none());
        assert_eq!(doc.footer, "Last updated 2026-10-15 12:00:00 UTC");
    }

    #[test]
    fn test_recent_section_never_omitted() {
        let snapshot = InventorySnapshot {
            server_online: false,
            libraries: vec![],
            issue: Some(InventoryIssue::NoIdentity),
        };
        let doc = builder().build(&snapshot, at());
        assert_eq!(doc.color, ColorTag::Unhealthy);
        assert_eq!(
            doc.section(STATUS_HEADING).map(|s| s.body.as_str()),
            Some("🔴 **Server Status:** Offline")
        );
        assert_eq!(
            doc.section(RECENT_HEADING).map(|s| s.body.as_str()),
            Some(NOTHING_RECENT)
        );
        assert!(doc.section(LIBRARIES_HEADING).is_some());
    }

    #[test]
    fn test_invalid_snapshot_yields_placeholder() {
        let snapshot = InventorySnapshot {
            server_online: true,
            libraries: vec![library("  ", LibraryKind::Movies, &[])],
            issue: None,
        };
        let doc = builder().build(&snapshot, at());
        assert_eq!(doc.color, ColorTag::Neutral);
        assert_eq!(doc.sections.len(), 1);
    }

    #[test]
    fn test_footer_uses_configured_timezone() {
        let builder = ReportBuilder::new(
            ReportConfig {
                timezone: chrono_tz::Europe::Berlin,
                ..ReportConfig::default()
            },
            vec![],
        );
        let doc = builder.placeholder("down", at());
        assert_eq!(doc.footer, "Last updated 2026-10-15 14:00:00 CEST");
    }

    #[test]
    fn test_monotonic_clock() {
        let mut clock = MonotonicClock::new();
        let first = clock.stamp(at());
        let second = clock.stamp(at());
        let third = clock.stamp(at() - Duration::seconds(30));
        assert!(first < second);
        assert!(second < third);
        assert_eq!(clock.stamp(at() + Duration::hours(1)), at() + Duration::hours(1));
    }
}
