//! The unified cursor pagination engine — the heart of the crate. A
//! [`Cursor`] is the wire-opaque resume token; the free functions below
//! implement the filter/truncate/derive steps, kept generic over item type
//! so the boundary-ID logic is testable without a `stac::Item` in hand.

use crate::cursor_store::CursorStore;
use crate::{Error, Result};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

const REF_PREFIX: &str = "ref:";

/// The single direction this engine supports; reverse pagination is out of
/// scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    /// The only direction.
    #[serde(rename = "next")]
    Next,
}

/// An opaque pagination resume token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cursor {
    /// The earliest `start_datetime` seen on the page this cursor follows.
    pub start_time: DateTime<Utc>,
    /// Always [`Direction::Next`].
    pub direction: Direction,
    /// IDs of every item seen so far whose `start_datetime` equals
    /// `start_time`.
    pub seen_ids: Vec<String>,
}

impl Cursor {
    /// Builds a fresh outbound cursor.
    pub fn new(start_time: DateTime<Utc>, seen_ids: Vec<String>) -> Cursor {
        Cursor {
            start_time,
            direction: Direction::Next,
            seen_ids,
        }
    }

    fn to_json_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    fn from_json_bytes(bytes: &[u8]) -> Result<Cursor> {
        serde_json::from_slice(bytes)
            .map_err(|err| Error::InvalidCursor(format!("malformed cursor: {err}")))
    }

    /// Encodes this cursor for the wire: URL-safe base64 inline, or a
    /// `ref:<token>` spill into `store` if the inline form would exceed
    /// `max_inline_bytes`.
    pub async fn encode(&self, store: &CursorStore, max_inline_bytes: usize) -> Result<String> {
        let json = self.to_json_bytes()?;
        let inline = URL_SAFE_NO_PAD.encode(&json);
        if inline.len() <= max_inline_bytes {
            Ok(inline)
        } else {
            let token = store.store(self.clone()).await;
            Ok(format!("{REF_PREFIX}{token}"))
        }
    }

    /// Decodes a wire cursor, consulting `store` for `ref:`-prefixed tokens.
    pub async fn decode(value: &str, store: &CursorStore) -> Result<Cursor> {
        if let Some(token) = value.strip_prefix(REF_PREFIX) {
            store.retrieve(token).await
        } else {
            let bytes = URL_SAFE_NO_PAD
                .decode(value)
                .map_err(|err| Error::InvalidCursor(format!("malformed cursor: {err}")))?;
            Cursor::from_json_bytes(&bytes)
        }
    }
}

/// The upstream request limit to use given an inbound cursor's accumulated
/// `seen_ids`: over-fetch by that many items to compensate for the
/// post-fetch filtering, capped at `max_limit`.
///
/// # Examples
///
/// ```
/// use stac_granule_gateway::cursor::{effective_limit, Cursor};
/// use chrono::Utc;
///
/// let cursor = Cursor::new(Utc::now(), vec!["a".into(), "b".into()]);
/// assert_eq!(effective_limit(10, Some(&cursor), 1_000), 12);
/// assert_eq!(effective_limit(10, None, 1_000), 10);
/// assert_eq!(effective_limit(10, Some(&cursor), 11), 11);
/// ```
pub fn effective_limit(limit: u64, cursor: Option<&Cursor>, max_limit: u64) -> u64 {
    let seen = cursor.map(|c| c.seen_ids.len() as u64).unwrap_or(0);
    limit.saturating_add(seen).min(max_limit)
}

/// Narrows an upstream `end` bound using an inbound cursor: `end = min(end,
/// cursor.start_time + 1s)`.
pub fn narrow_end(end: Option<DateTime<Utc>>, cursor: Option<&Cursor>) -> Option<DateTime<Utc>> {
    let Some(cursor) = cursor else { return end };
    let adjusted = cursor.start_time + Duration::seconds(1);
    Some(match end {
        Some(end) => end.min(adjusted),
        None => adjusted,
    })
}

/// Applies the cursor engine's filter/truncate/derive steps to a page of
/// upstream items, returning the trimmed page and the outbound cursor
/// (`None` if there is no next page).
///
/// `upstream_requested` is the (possibly capped) limit the backend was
/// actually asked for — the caller must pass through [`effective_limit`]'s
/// result so the "did the upstream likely have more" decision is accurate.
pub fn paginate<T>(
    upstream_items: Vec<T>,
    upstream_requested: u64,
    limit: u64,
    inbound: Option<&Cursor>,
    start_datetime: impl Fn(&T) -> DateTime<Utc>,
    id: impl Fn(&T) -> String,
) -> (Vec<T>, Option<Cursor>) {
    let upstream_count = upstream_items.len() as u64;
    let seen_ids: &[String] = inbound.map(|c| c.seen_ids.as_slice()).unwrap_or(&[]);

    let mut page: Vec<T> = upstream_items
        .into_iter()
        .filter(|item| !seen_ids.iter().any(|seen| *seen == id(item)))
        .collect();
    let filtered_count = page.len() as u64;
    page.truncate(limit as usize);

    if page.is_empty() {
        return (page, None);
    }

    let min_time = page
        .iter()
        .map(&start_datetime)
        .min()
        .expect("page is non-empty");

    let mut boundary_ids: Vec<String> = page
        .iter()
        .filter(|item| start_datetime(item) == min_time)
        .map(&id)
        .collect();

    if let Some(inbound) = inbound {
        if inbound.start_time == min_time {
            for seen in &inbound.seen_ids {
                if !boundary_ids.contains(seen) {
                    boundary_ids.push(seen.clone());
                }
            }
        }
    }

    let more_data_likely = upstream_count >= upstream_requested || filtered_count >= limit;
    let next = if more_data_likely {
        Some(Cursor::new(min_time, boundary_ids))
    } else {
        None
    };
    (page, next)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GatewayConfig;

    #[derive(Clone, Debug, PartialEq)]
    struct Granule {
        id: String,
        start: DateTime<Utc>,
    }

    fn granule(id: &str, start: DateTime<Utc>) -> Granule {
        Granule {
            id: id.to_string(),
            start,
        }
    }

    fn start(g: &Granule) -> DateTime<Utc> {
        g.start
    }

    fn id(g: &Granule) -> String {
        g.id.clone()
    }

    #[test]
    fn homogeneous_burst_paginates_without_loss_or_duplication() {
        let t: DateTime<Utc> = "2024-01-15T12:00:00Z".parse().unwrap();
        let all: Vec<Granule> = (0..300).map(|i| granule(&format!("g{i}"), t)).collect();
        let limit = 100;
        let max_limit = 10_000;

        let mut cursor: Option<Cursor> = None;
        let mut seen_sizes = Vec::new();
        let mut total_emitted = 0;
        for _ in 0..4 {
            let requested = effective_limit(limit, cursor.as_ref(), max_limit);
            // The upstream always returns the top `requested` items by its
            // own (stable) sort order; it has no notion of `seen_ids`.
            let upstream_page: Vec<Granule> = all.iter().take(requested as usize).cloned().collect();
            let (page, next) = paginate(upstream_page, requested, limit, cursor.as_ref(), start, id);
            total_emitted += page.len();
            if let Some(ref next) = next {
                seen_sizes.push(next.seen_ids.len());
            }
            cursor = next;
            if cursor.is_none() {
                break;
            }
        }
        assert_eq!(total_emitted, 300);
        assert_eq!(seen_sizes, vec![100, 200, 300]);
    }

    #[test]
    fn effective_limit_caps_at_max() {
        let cursor = Cursor::new(Utc::now(), vec!["a".into(); 20]);
        assert_eq!(effective_limit(10, Some(&cursor), 15), 15);
    }

    #[test]
    fn narrow_end_applies_one_second_shift() {
        let t: DateTime<Utc> = "2024-01-15T12:00:00Z".parse().unwrap();
        let cursor = Cursor::new(t, vec![]);
        let narrowed = narrow_end(None, Some(&cursor)).unwrap();
        assert_eq!(narrowed, t + Duration::seconds(1));
    }

    #[test]
    fn boundary_straddle_resets_seen_ids() {
        let earlier: DateTime<Utc> = "2024-01-15T11:00:00Z".parse().unwrap();
        let later: DateTime<Utc> = "2024-01-15T12:00:00Z".parse().unwrap();
        let inbound = Cursor::new(later, vec!["old-1".into(), "old-2".into()]);
        let page = vec![granule("new-1", earlier), granule("new-2", earlier)];
        let (trimmed, next) = paginate(page, 10, 10, Some(&inbound), start, id);
        assert_eq!(trimmed.len(), 2);
        let next = next.unwrap();
        assert_eq!(next.start_time, earlier);
        assert_eq!(next.seen_ids.len(), 2);
        assert!(!next.seen_ids.contains(&"old-1".to_string()));
    }

    #[tokio::test]
    async fn large_cursor_spills_to_store() {
        let store = CursorStore::new(GatewayConfig::default().cursor_ttl);
        let t = Utc::now();
        let seen_ids: Vec<String> = (0..50).map(|i| format!("{i:080}")).collect();
        let cursor = Cursor::new(t, seen_ids.clone());
        let encoded = cursor.encode(&store, 2_048).await.unwrap();
        assert!(encoded.starts_with("ref:"));
        let decoded = Cursor::decode(&encoded, &store).await.unwrap();
        assert_eq!(decoded.seen_ids, seen_ids);
    }

    #[tokio::test]
    async fn small_cursor_stays_inline() {
        let store = CursorStore::new(GatewayConfig::default().cursor_ttl);
        let cursor = Cursor::new(Utc::now(), vec!["a".into()]);
        let encoded = cursor.encode(&store, 2_048).await.unwrap();
        assert!(!encoded.starts_with("ref:"));
        let decoded = Cursor::decode(&encoded, &store).await.unwrap();
        assert_eq!(decoded, cursor);
    }

    #[tokio::test]
    async fn decode_rejects_unknown_ref_token() {
        let store = CursorStore::new(GatewayConfig::default().cursor_ttl);
        let err = Cursor::decode("ref:does-not-exist", &store).await.unwrap_err();
        assert!(matches!(err, Error::InvalidCursor(_)));
    }
}
