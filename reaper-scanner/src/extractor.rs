//! Recovers structured records from a raw markup snapshot.
//!
//! The heuristic extractor never looks at the DOM. It scans the markup text
//! for CDN asset URLs and, for each one, searches the surrounding text for the
//! link of the entity that owns it. Sites reshuffle their class names often;
//! asset URLs and entity hrefs change far less.

use crate::error::Result;
use crate::result::{EntityLink, IdSource, Record, RecordStatus, SizeTag};
use chrono::{DateTime, Utc};
use rand::Rng;
use regex::{NoExpand, Regex};
use std::collections::{BTreeMap, HashSet};
use tracing::debug;

/// Point-in-time capture of a page's full markup.
#[derive(Debug, Clone, Copy)]
pub struct Snapshot<'a> {
    pub markup: &'a str,
    pub source_url: &'a str,
    pub captured_at: DateTime<Utc>,
}

impl<'a> Snapshot<'a> {
    pub fn new(markup: &'a str, source_url: &'a str) -> Self {
        Self {
            markup,
            source_url,
            captured_at: Utc::now(),
        }
    }
}

/// Turns a snapshot into candidate records.
///
/// Implementations must not touch the network or keep state between calls;
/// the harvester may call `extract` many times over overlapping snapshots.
pub trait MarkupExtractor: Send + Sync {
    fn extract(&self, snapshot: &Snapshot<'_>) -> Vec<Record>;
}

/// Character windows used by the proximity search around an asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProximityWindows {
    /// Text before the asset scanned for the closest preceding anchor.
    pub preceding: usize,
    pub tight_before: usize,
    pub tight_after: usize,
    /// Symmetric window used by the remaining fallbacks.
    pub broad: usize,
}

impl Default for ProximityWindows {
    fn default() -> Self {
        Self {
            preceding: 3000,
            tight_before: 1500,
            tight_after: 500,
            broad: 3000,
        }
    }
}

/// Site-specific knobs of the heuristic extractor.
#[derive(Debug, Clone)]
pub struct ExtractorProfile {
    pub asset_host: String,
    pub extensions: Vec<String>,
    /// Substrings marking small renditions that are not worth harvesting.
    pub thumbnail_tokens: Vec<String>,
    /// Regex for the path of an entity link inside `href="..."`.
    pub entity_path_pattern: String,
    pub entity_base_url: String,
    /// Path built from a bare numeric id; `{id}` is substituted.
    pub entity_id_template: String,
    pub sidecar_attributes: Vec<String>,
    pub json_id_field: String,
    pub windows: ProximityWindows,
    pub size_tags: Vec<SizeTag>,
    /// Path segments that denote a rendition size and get swapped per tag.
    pub size_segments: Vec<String>,
    /// Suffix marker stripped from size-variant urls.
    pub size_suffix_marker: String,
    pub fallback_id_prefix: String,
    pub max_path_id_len: usize,
}

impl Default for ExtractorProfile {
    fn default() -> Self {
        let strings = |items: &[&str]| items.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        Self {
            asset_host: "i.pinimg.com".to_string(),
            extensions: strings(&["jpg", "png", "webp"]),
            thumbnail_tokens: strings(&["/60x60/", "/75x75/", "/30x30/", "/50x/", "_RS/"]),
            entity_path_pattern: r#"/pin/\d+[^"]*?"#.to_string(),
            entity_base_url: "https://pinterest.com".to_string(),
            entity_id_template: "/pin/{id}/".to_string(),
            sidecar_attributes: strings(&["data-pin-id", "data-pin"]),
            json_id_field: "id".to_string(),
            windows: ProximityWindows::default(),
            size_tags: ["170x", "236x", "474x", "564x", "736x", "originals"]
                .into_iter()
                .map(SizeTag::new)
                .collect(),
            size_segments: strings(&[
                "originals",
                "236x",
                "474x",
                "564x",
                "736x",
                "170x",
                "videos/thumbnails",
            ]),
            size_suffix_marker: "_RS/".to_string(),
            fallback_id_prefix: "pin".to_string(),
            max_path_id_len: 50,
        }
    }
}

/// Text-proximity implementation of [`MarkupExtractor`].
pub struct HeuristicExtractor {
    profile: ExtractorProfile,
    asset_re: Regex,
    hash_id_re: Regex,
    path_id_re: Regex,
    link_re: Regex,
    sidecar_res: Vec<Regex>,
    json_id_re: Regex,
    size_segment_re: Regex,
    dimensions_re: Regex,
}

impl HeuristicExtractor {
    pub fn new(profile: ExtractorProfile) -> Result<Self> {
        let host = regex::escape(&profile.asset_host);
        let extensions = profile
            .extensions
            .iter()
            .map(|e| regex::escape(e))
            .collect::<Vec<_>>()
            .join("|");

        let asset_re = Regex::new(&format!(
            r#"(?i)https://{host}/[^"'\s]+\.(?:{extensions})"#
        ))?;
        let hash_id_re = Regex::new(r"(?i)/([a-f0-9]{32,})\.")?;
        let path_id_re = Regex::new(&format!(r"(?i){host}/[^/]+/(.+?)\.(?:{extensions})"))?;
        let link_re = Regex::new(&format!(r#"href="({})""#, profile.entity_path_pattern))?;
        let sidecar_res = profile
            .sidecar_attributes
            .iter()
            .map(|attr| Regex::new(&format!(r#"{}="(\d+)""#, regex::escape(attr))))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let json_id_re = Regex::new(&format!(
            r#""{}":"(\d+)""#,
            regex::escape(&profile.json_id_field)
        ))?;
        let segments = profile
            .size_segments
            .iter()
            .map(|s| regex::escape(s))
            .collect::<Vec<_>>()
            .join("|");
        let size_segment_re = Regex::new(&format!("/(?:{segments})/"))?;
        let dimensions_re = Regex::new(r"/\d+x\d+/")?;

        Ok(Self {
            profile,
            asset_re,
            hash_id_re,
            path_id_re,
            link_re,
            sidecar_res,
            json_id_re,
            size_segment_re,
            dimensions_re,
        })
    }

    pub fn profile(&self) -> &ExtractorProfile {
        &self.profile
    }

    fn is_thumbnail(&self, url: &str) -> bool {
        self.profile
            .thumbnail_tokens
            .iter()
            .any(|token| url.contains(token.as_str()))
    }

    /// Derive a content id from an asset url.
    ///
    /// Hash segment first, then the path tail. Only when neither is present
    /// does it fall back to a clock + random id, which is not stable across
    /// passes.
    pub fn content_id(&self, url: &str, captured_at: DateTime<Utc>) -> (String, IdSource) {
        if let Some(caps) = self.hash_id_re.captures(url) {
            return (caps[1].to_string(), IdSource::ContentHash);
        }

        if let Some(caps) = self.path_id_re.captures(url) {
            let id: String = caps[1]
                .replace('/', "_")
                .chars()
                .take(self.profile.max_path_id_len)
                .collect();
            return (id, IdSource::PathTail);
        }

        let id = format!(
            "{}_{}_{}",
            self.profile.fallback_id_prefix,
            captured_at.timestamp_millis(),
            random_salt(9)
        );
        debug!("Synthesized non-deterministic id {} for {}", id, url);
        (id, IdSource::Synthesized)
    }

    /// Locate the entity owning the asset that starts at `offset`.
    pub fn resolve_link(&self, markup: &str, offset: usize) -> EntityLink {
        let windows = &self.profile.windows;

        // Containers open before their asset, so the closest preceding anchor wins.
        let before = window(markup, offset, windows.preceding, 0);
        if let Some(caps) = self.link_re.captures_iter(before).last() {
            return self.entity_from_path(&caps[1]);
        }

        let tight = window(markup, offset, windows.tight_before, windows.tight_after);
        if let Some(caps) = self.link_re.captures(tight) {
            return self.entity_from_path(&caps[1]);
        }

        let broad = window(markup, offset, windows.broad, windows.broad);
        if let Some(caps) = self.link_re.captures(broad) {
            return self.entity_from_path(&caps[1]);
        }

        for sidecar in &self.sidecar_res {
            if let Some(caps) = sidecar.captures(broad) {
                return self.entity_from_id(&caps[1]);
            }
        }

        if let Some(caps) = self.json_id_re.captures(broad) {
            return self.entity_from_id(&caps[1]);
        }

        EntityLink::Unresolved
    }

    fn entity_from_path(&self, path: &str) -> EntityLink {
        EntityLink::Resolved(format!("{}{}", self.profile.entity_base_url, path))
    }

    fn entity_from_id(&self, id: &str) -> EntityLink {
        let path = self.profile.entity_id_template.replace("{id}", id);
        self.entity_from_path(&path)
    }

    /// Url of the asset rendered at `tag`.
    pub fn size_variant(&self, url: &str, tag: &SizeTag) -> String {
        let segment = format!("/{}/", tag);
        let swapped = self
            .size_segment_re
            .replacen(url, 1, NoExpand(&segment))
            .into_owned();
        let unmarked = swapped.replacen(&self.profile.size_suffix_marker, "/", 1);
        self.dimensions_re
            .replacen(&unmarked, 1, NoExpand(&segment))
            .into_owned()
    }

    pub fn size_variants(&self, url: &str) -> BTreeMap<SizeTag, String> {
        self.profile
            .size_tags
            .iter()
            .map(|tag| (tag.clone(), self.size_variant(url, tag)))
            .collect()
    }
}

impl MarkupExtractor for HeuristicExtractor {
    fn extract(&self, snapshot: &Snapshot<'_>) -> Vec<Record> {
        let markup = snapshot.markup;
        let mut records = Vec::new();
        let mut in_snapshot = HashSet::new();

        for found in self.asset_re.find_iter(markup) {
            let url = found.as_str();
            if self.is_thumbnail(url) {
                continue;
            }

            let (id, id_source) = self.content_id(url, snapshot.captured_at);
            // srcset lists repeat the same asset; resolve each id once per snapshot
            if !in_snapshot.insert(id.clone()) {
                continue;
            }

            records.push(Record {
                id,
                id_source,
                entity_link: self.resolve_link(markup, found.start()),
                asset_urls: self.size_variants(url),
                source_url: snapshot.source_url.to_string(),
                scraped_at: snapshot.captured_at,
                status: RecordStatus::Success,
            });
        }

        records
    }
}

/// Slice of `text` reaching `before` bytes back and `after` bytes forward
/// from `offset`, widened to the nearest char boundaries.
fn window(text: &str, offset: usize, before: usize, after: usize) -> &str {
    let start = floor_char_boundary(text, offset.saturating_sub(before));
    let end = ceil_char_boundary(text, offset.saturating_add(after));
    &text[start..end]
}

fn floor_char_boundary(text: &str, index: usize) -> usize {
    let mut i = index.min(text.len());
    while !text.is_char_boundary(i) {
        i -= 1;
    }
    i
}

fn ceil_char_boundary(text: &str, index: usize) -> usize {
    let mut i = index.min(text.len());
    while !text.is_char_boundary(i) {
        i += 1;
    }
    i
}

fn random_salt(len: usize) -> String {
    const ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const HASH_A: &str = "0123456789abcdef0123456789abcdef";
    const HASH_B: &str = "fedcba9876543210fedcba9876543210";

    fn extractor() -> HeuristicExtractor {
        HeuristicExtractor::new(ExtractorProfile::default()).unwrap()
    }

    fn asset(size: &str, hash: &str) -> String {
        format!("https://i.pinimg.com/{}/01/23/{}.jpg", size, hash)
    }

    fn snapshot(markup: &str) -> Snapshot<'_> {
        Snapshot::new(markup, "https://pinterest.com/board/")
    }

    #[test]
    fn test_extracts_asset_with_hash_id() {
        let markup = format!(
            r#"<div><a href="/pin/111/"></a><img src="{}"></div>"#,
            asset("236x", HASH_A)
        );
        let records = extractor().extract(&snapshot(&markup));

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, HASH_A);
        assert_eq!(records[0].id_source, IdSource::ContentHash);
        assert_eq!(
            records[0].entity_link,
            EntityLink::Resolved("https://pinterest.com/pin/111/".to_string())
        );
        assert_eq!(records[0].source_url, "https://pinterest.com/board/");
        assert_eq!(records[0].status, RecordStatus::Success);
    }

    #[test]
    fn test_skips_thumbnails() {
        let markup = format!(
            r#"<img src="{}"><img src="{}"><img src="https://i.pinimg.com/236x_RS/aa/{}.jpg">"#,
            asset("60x60", HASH_A),
            asset("75x75", HASH_B),
            HASH_A
        );
        assert!(extractor().extract(&snapshot(&markup)).is_empty());
    }

    #[test]
    fn test_ignores_other_hosts_and_extensions() {
        let markup = format!(
            r#"<img src="https://cdn.example.com/236x/{}.jpg"><img src="https://i.pinimg.com/236x/{}.gif">"#,
            HASH_A, HASH_B
        );
        assert!(extractor().extract(&snapshot(&markup)).is_empty());
    }

    #[test]
    fn test_path_tail_id_when_no_hash() {
        let markup = r#"<img src="https://i.pinimg.com/736x/ab/cd/short-name.png">"#;
        let records = extractor().extract(&snapshot(markup));

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, "ab_cd_short-name");
        assert_eq!(records[0].id_source, IdSource::PathTail);
    }

    #[test]
    fn test_path_tail_id_is_capped() {
        let long = "x".repeat(80);
        let markup = format!(r#"<img src="https://i.pinimg.com/736x/{}.webp">"#, long);
        let records = extractor().extract(&snapshot(&markup));

        assert_eq!(records[0].id.len(), 50);
    }

    #[test]
    fn test_synthesized_id_as_last_resort() {
        let markup = r#"<img src="https://i.pinimg.com/loose.jpg">"#;
        let records = extractor().extract(&snapshot(markup));

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id_source, IdSource::Synthesized);
        assert!(records[0].id.starts_with("pin_"));
        assert!(!records[0].id_source.is_stable());
    }

    #[test]
    fn test_same_markup_yields_same_ids() {
        let markup = format!(
            r#"<a href="/pin/1/"></a><img src="{}"><a href="/pin/2/"></a><img src="{}">"#,
            asset("474x", HASH_A),
            asset("474x", HASH_B)
        );
        let ex = extractor();
        let first: Vec<String> = ex.extract(&snapshot(&markup)).into_iter().map(|r| r.id).collect();
        let second: Vec<String> = ex.extract(&snapshot(&markup)).into_iter().map(|r| r.id).collect();

        assert_eq!(first, vec![HASH_A.to_string(), HASH_B.to_string()]);
        assert_eq!(first, second);
    }

    #[test]
    fn test_repeated_asset_in_snapshot_emitted_once() {
        let markup = format!(
            r#"<img src="{}" srcset="{} 1x, {} 2x">"#,
            asset("236x", HASH_A),
            asset("474x", HASH_A),
            asset("736x", HASH_A)
        );
        assert_eq!(extractor().extract(&snapshot(&markup)).len(), 1);
    }

    #[test]
    fn test_nearest_preceding_anchor_wins() {
        let img = asset("236x", HASH_A);
        let markup = format!(
            r#"<a href="/pin/999/">far</a>{}<a href="/pin/123/">near</a><img src="{}">"#,
            " ".repeat(500),
            img
        );
        let ex = extractor();
        let offset = markup.find(&img).unwrap();

        assert_eq!(
            ex.resolve_link(&markup, offset),
            EntityLink::Resolved("https://pinterest.com/pin/123/".to_string())
        );
    }

    #[test]
    fn test_anchor_beyond_preceding_window_ignored_in_favor_of_following() {
        let img = asset("236x", HASH_A);
        let markup = format!(
            r#"<a href="/pin/1/"></a>{}<img src="{}"><a href="/pin/2/"></a>"#,
            " ".repeat(3500),
            img
        );
        let ex = extractor();
        let offset = markup.find(&img).unwrap();

        assert_eq!(
            ex.resolve_link(&markup, offset),
            EntityLink::Resolved("https://pinterest.com/pin/2/".to_string())
        );
    }

    #[test]
    fn test_broad_window_after_asset() {
        let img = asset("236x", HASH_A);
        let markup = format!(r#"<img src="{}">{}<a href="/pin/77/"></a>"#, img, " ".repeat(1000));
        let ex = extractor();

        assert_eq!(
            ex.resolve_link(&markup, markup.find(&img).unwrap()),
            EntityLink::Resolved("https://pinterest.com/pin/77/".to_string())
        );
    }

    #[test]
    fn test_sidecar_attribute_fallback() {
        let img = asset("236x", HASH_A);
        let markup = format!(r#"<div data-pin-id="4242"><img src="{}"></div>"#, img);
        let ex = extractor();

        assert_eq!(
            ex.resolve_link(&markup, markup.find(&img).unwrap()),
            EntityLink::Resolved("https://pinterest.com/pin/4242/".to_string())
        );
    }

    #[test]
    fn test_embedded_json_id_fallback() {
        let img = asset("236x", HASH_A);
        let markup = format!(r#"<script>{{"id":"5150","x":1}}</script><img src="{}">"#, img);
        let ex = extractor();

        assert_eq!(
            ex.resolve_link(&markup, markup.find(&img).unwrap()),
            EntityLink::Resolved("https://pinterest.com/pin/5150/".to_string())
        );
    }

    #[test]
    fn test_unresolved_when_nothing_nearby() {
        let markup = format!(r#"<img src="{}">"#, asset("236x", HASH_A));
        let records = extractor().extract(&snapshot(&markup));

        assert_eq!(records[0].entity_link, EntityLink::Unresolved);
        assert_eq!(records[0].entity_link.as_str(), "unresolved");
    }

    #[test]
    fn test_windows_respect_char_boundaries() {
        let img = asset("236x", HASH_A);
        let markup = format!("{}<img src=\"{}\">{}", "é".repeat(2000), img, "ü".repeat(2000));
        let records = extractor().extract(&snapshot(&markup));

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].entity_link, EntityLink::Unresolved);
    }

    #[test]
    fn test_size_variants() {
        let ex = extractor();
        let url = asset("236x", HASH_A);
        let variants = ex.size_variants(&url);

        assert_eq!(variants.len(), 6);
        assert_eq!(
            variants[&SizeTag::new("originals")],
            format!("https://i.pinimg.com/originals/01/23/{}.jpg", HASH_A)
        );
        assert_eq!(
            variants[&SizeTag::new("736x")],
            format!("https://i.pinimg.com/736x/01/23/{}.jpg", HASH_A)
        );
    }

    #[test]
    fn test_size_variant_from_dimension_segment() {
        let ex = extractor();
        let url = format!("https://i.pinimg.com/1200x800/01/{}.jpg", HASH_A);

        assert_eq!(
            ex.size_variant(&url, &SizeTag::new("originals")),
            format!("https://i.pinimg.com/originals/01/{}.jpg", HASH_A)
        );
    }

    #[test]
    fn test_size_variant_is_deterministic() {
        let ex = extractor();
        let url = format!("https://i.pinimg.com/videos/thumbnails/01/{}.jpg", HASH_B);
        let tag = SizeTag::new("564x");

        let first = ex.size_variant(&url, &tag);
        for _ in 0..10 {
            assert_eq!(ex.size_variant(&url, &tag), first);
        }
        assert_eq!(first, format!("https://i.pinimg.com/564x/01/{}.jpg", HASH_B));
    }

    #[test]
    fn test_invalid_profile_pattern_is_an_error() {
        let profile = ExtractorProfile {
            entity_path_pattern: "(unclosed".to_string(),
            ..Default::default()
        };
        assert!(HeuristicExtractor::new(profile).is_err());
    }
}
