//! Range computation over the aggregate tables.
//!
//! Every sub-table of a range is read inside the same transaction with the
//! same day bounds, so a snapshot never mixes two states of the store.

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::{DateTime, Utc};
use rusqlite::{Connection, Result, Transaction, params};

use crate::TimeRange;
use crate::snapshot::{
    ClientShare, KindCount, KindDayPoint, KindDistribution, KindShare, Overview, RangeStats,
    RelayRow, TimelinePoint, TopRelay,
};

/// Compute every sub-table of `range` as of `pass_start`.
pub fn compute_range(
    tx: &Transaction<'_>,
    range: TimeRange,
    pass_start: DateTime<Utc>,
    top_n: usize,
) -> Result<RangeStats> {
    let window = range.window(pass_start);
    let (start, end) = window.bounds();
    let bounds = DayBounds {
        start: &start,
        end: &end,
    };

    let overview = overview(tx, bounds)?;
    let relays = relay_table(tx, bounds)?;
    let kinds = kind_distribution(tx, bounds, overview.events, top_n)?;
    let clients = client_ranking(tx, bounds, top_n)?;
    let top_relays = top_relays(tx, bounds, &relays, top_n)?;
    let timeline = timeline(tx, bounds)?;

    Ok(RangeStats {
        start_day: window.start.map(relaywatch_core::day_key),
        end_day: end,
        overview,
        relays,
        kinds,
        clients,
        top_relays,
        timeline,
    })
}

#[derive(Clone, Copy)]
struct DayBounds<'a> {
    start: &'a str,
    end: &'a str,
}

fn count(value: i64) -> u64 {
    value.max(0) as u64
}

fn share(part: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 / total as f64
    }
}

fn overview(conn: &Connection, b: DayBounds<'_>) -> Result<Overview> {
    let (known_relays, active_relays, mean_latency_ms) = conn.query_row(
        "SELECT COUNT(*), COALESCE(SUM(active), 0), AVG(latency_ms) FROM relays",
        [],
        |row| {
            Ok((
                count(row.get(0)?),
                count(row.get(1)?),
                row.get::<_, Option<f64>>(2)?,
            ))
        },
    )?;

    let (relays_with_events, events, value_sum) = conn.query_row(
        "SELECT COUNT(DISTINCT relay_url), COALESCE(SUM(event_count), 0), COALESCE(SUM(value_sum), 0)
         FROM daily_aggregates WHERE day BETWEEN ?1 AND ?2",
        params![b.start, b.end],
        |row| Ok((count(row.get(0)?), count(row.get(1)?), count(row.get(2)?))),
    )?;

    let distinct_authors: i64 = conn.query_row(
        "SELECT COUNT(DISTINCT author) FROM active_user_days WHERE day BETWEEN ?1 AND ?2",
        params![b.start, b.end],
        |row| row.get(0),
    )?;

    Ok(Overview {
        known_relays,
        active_relays,
        relays_with_events,
        events,
        distinct_authors: count(distinct_authors),
        mean_latency_ms,
        value_sum,
    })
}

fn relay_table(conn: &Connection, b: DayBounds<'_>) -> Result<Vec<RelayRow>> {
    let mut stmt = conn.prepare_cached(
        "SELECT r.url, r.tier, r.active, r.latency_ms, r.health_score,
                COALESCE(e.events, 0), COALESCE(a.authors, 0)
         FROM relays r
         LEFT JOIN (
            SELECT relay_url, SUM(event_count) AS events FROM daily_aggregates
            WHERE day BETWEEN ?1 AND ?2 GROUP BY relay_url
         ) e ON e.relay_url = r.url
         LEFT JOIN (
            SELECT relay_url, COUNT(DISTINCT author) AS authors FROM daily_authors
            WHERE day BETWEEN ?1 AND ?2 GROUP BY relay_url
         ) a ON a.relay_url = r.url
         ORDER BY COALESCE(e.events, 0) DESC, r.url",
    )?;
    let rows = stmt
        .query_map(params![b.start, b.end], |row| {
            Ok(RelayRow {
                url: row.get(0)?,
                tier: row.get(1)?,
                active: row.get::<_, i64>(2)? != 0,
                latency_ms: row.get(3)?,
                health_score: row.get(4)?,
                events: count(row.get(5)?),
                unique_authors: count(row.get(6)?),
            })
        })?
        .collect::<Result<Vec<_>>>()?;
    Ok(rows)
}

fn kind_distribution(
    conn: &Connection,
    b: DayBounds<'_>,
    total_events: u64,
    top_n: usize,
) -> Result<KindDistribution> {
    let mut stmt = conn.prepare_cached(
        "SELECT kind, SUM(event_count) AS events FROM daily_aggregates
         WHERE day BETWEEN ?1 AND ?2
         GROUP BY kind ORDER BY events DESC, kind LIMIT ?3",
    )?;
    let top = stmt
        .query_map(params![b.start, b.end, top_n as i64], |row| {
            let events = count(row.get(1)?);
            Ok(KindShare {
                kind: row.get(0)?,
                events,
                share: share(events, total_events),
            })
        })?
        .collect::<Result<Vec<_>>>()?;

    let top_kinds: HashSet<u32> = top.iter().map(|k| k.kind).collect();
    let mut stmt = conn.prepare_cached(
        "SELECT day, kind, SUM(event_count) FROM daily_aggregates
         WHERE day BETWEEN ?1 AND ?2
         GROUP BY day, kind ORDER BY day, kind",
    )?;
    let series = stmt
        .query_map(params![b.start, b.end], |row| {
            Ok(KindDayPoint {
                day: row.get(0)?,
                kind: row.get(1)?,
                events: count(row.get(2)?),
            })
        })?
        .filter(|point| point.as_ref().map_or(true, |p| top_kinds.contains(&p.kind)))
        .collect::<Result<Vec<_>>>()?;

    Ok(KindDistribution { top, series })
}

fn client_ranking(conn: &Connection, b: DayBounds<'_>, top_n: usize) -> Result<Vec<ClientShare>> {
    let attributed: i64 = conn.query_row(
        "SELECT COALESCE(SUM(event_count), 0) FROM client_daily WHERE day BETWEEN ?1 AND ?2",
        params![b.start, b.end],
        |row| row.get(0),
    )?;
    let attributed = count(attributed);

    let mut stmt = conn.prepare_cached(
        "SELECT client, SUM(event_count) AS events FROM client_daily
         WHERE day BETWEEN ?1 AND ?2
         GROUP BY client ORDER BY events DESC, client LIMIT ?3",
    )?;
    let mut clients = stmt
        .query_map(params![b.start, b.end, top_n as i64], |row| {
            let events = count(row.get(1)?);
            Ok(ClientShare {
                name: row.get(0)?,
                events,
                share: share(events, attributed),
                kinds: Vec::new(),
            })
        })?
        .collect::<Result<Vec<_>>>()?;

    let mut stmt = conn.prepare_cached(
        "SELECT client, kind, SUM(event_count) AS events FROM client_daily
         WHERE day BETWEEN ?1 AND ?2
         GROUP BY client, kind ORDER BY events DESC, kind",
    )?;
    let mut breakdown = group_kinds(stmt.query_map(params![b.start, b.end], |row| {
        Ok((row.get::<_, String>(0)?, row.get(1)?, count(row.get(2)?)))
    })?)?;
    for client in &mut clients {
        client.kinds = breakdown.remove(&client.name).unwrap_or_default();
    }

    Ok(clients)
}

fn top_relays(
    conn: &Connection,
    b: DayBounds<'_>,
    relays: &[RelayRow],
    top_n: usize,
) -> Result<Vec<TopRelay>> {
    // `relays` is already ordered by events
    let mut top: Vec<TopRelay> = relays
        .iter()
        .filter(|r| r.events > 0)
        .take(top_n)
        .zip(1u32..)
        .map(|(r, rank)| TopRelay {
            rank,
            url: r.url.clone(),
            events: r.events,
            active_users: r.unique_authors,
            kinds: Vec::new(),
        })
        .collect();
    if top.is_empty() {
        return Ok(top);
    }

    let mut stmt = conn.prepare_cached(
        "SELECT relay_url, kind, SUM(event_count) AS events FROM daily_aggregates
         WHERE day BETWEEN ?1 AND ?2
         GROUP BY relay_url, kind ORDER BY events DESC, kind",
    )?;
    let mut breakdown = group_kinds(stmt.query_map(params![b.start, b.end], |row| {
        Ok((row.get::<_, String>(0)?, row.get(1)?, count(row.get(2)?)))
    })?)?;
    for relay in &mut top {
        relay.kinds = breakdown.remove(&relay.url).unwrap_or_default();
    }

    Ok(top)
}

fn group_kinds(
    rows: impl Iterator<Item = Result<(String, u32, u64)>>,
) -> Result<HashMap<String, Vec<KindCount>>> {
    let mut grouped: HashMap<String, Vec<KindCount>> = HashMap::new();
    for row in rows {
        let (key, kind, events) = row?;
        grouped.entry(key).or_default().push(KindCount { kind, events });
    }
    Ok(grouped)
}

fn timeline(conn: &Connection, b: DayBounds<'_>) -> Result<Vec<TimelinePoint>> {
    let mut days: BTreeMap<String, TimelinePoint> = BTreeMap::new();

    let mut stmt = conn.prepare_cached(
        "SELECT day, SUM(event_count) FROM daily_aggregates
         WHERE day BETWEEN ?1 AND ?2 GROUP BY day",
    )?;
    let mut rows = stmt.query(params![b.start, b.end])?;
    while let Some(row) = rows.next()? {
        let day: String = row.get(0)?;
        days.entry(day.clone())
            .or_insert_with(|| TimelinePoint {
                day,
                events: 0,
                active_authors: 0,
            })
            .events = count(row.get(1)?);
    }

    let mut stmt = conn.prepare_cached(
        "SELECT day, COUNT(*) FROM active_user_days
         WHERE day BETWEEN ?1 AND ?2 GROUP BY day",
    )?;
    let mut rows = stmt.query(params![b.start, b.end])?;
    while let Some(row) = rows.next()? {
        let day: String = row.get(0)?;
        days.entry(day.clone())
            .or_insert_with(|| TimelinePoint {
                day,
                events: 0,
                active_authors: 0,
            })
            .active_authors = count(row.get(1)?);
    }

    Ok(days.into_values().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use relaywatch_core::{BufferedEvent, FlushBatch, RawEvent, Store};

    const RELAY_A: &str = "wss://a.example.com";
    const RELAY_B: &str = "wss://b.example.com";

    fn pass_start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 10, 12, 0, 0).unwrap()
    }

    fn buffered(
        n: u32,
        author: char,
        kind: u32,
        days_ago: i64,
        relay: &str,
        client: Option<&str>,
    ) -> BufferedEvent {
        let created = pass_start() - chrono::Duration::days(days_ago);
        let tags = client
            .map(|c| vec![vec!["client".to_string(), c.to_string()]])
            .unwrap_or_default();
        BufferedEvent {
            relay_url: relay.to_string(),
            event: RawEvent {
                id: format!("{:064x}", n),
                pubkey: author.to_string().repeat(64),
                created_at: created.timestamp() as u64,
                kind,
                tags,
                content: String::new(),
                sig: "f".repeat(128),
            },
            received_at: pass_start().timestamp(),
        }
    }

    fn seeded_store() -> Store {
        let store = Store::open_in_memory().unwrap();
        let events = vec![
            // Today
            buffered(1, 'a', 1, 0, RELAY_A, Some("Damus")),
            buffered(2, 'a', 1, 0, RELAY_A, Some("Damus")),
            buffered(3, 'b', 7, 0, RELAY_A, Some("Amethyst")),
            buffered(4, 'c', 1, 0, RELAY_B, None),
            // Yesterday, still inside 24h by day bounds
            buffered(5, 'b', 1, 1, RELAY_B, Some("Damus")),
            // Three days ago, outside 24h
            buffered(6, 'd', 3, 3, RELAY_B, Some("Amethyst")),
            buffered(7, 'd', 3, 3, RELAY_B, None),
            // Forty days ago
            buffered(8, 'e', 1, 40, RELAY_A, None),
        ];
        store
            .apply_batch(&FlushBatch {
                events,
                ..Default::default()
            })
            .unwrap();
        store
    }

    fn compute(store: &Store, range: TimeRange, top_n: usize) -> RangeStats {
        store
            .read_tx(|tx| Ok(compute_range(tx, range, pass_start(), top_n)?))
            .unwrap()
    }

    #[test]
    fn test_day_window_excludes_older_rows() {
        let store = seeded_store();
        let stats = compute(&store, TimeRange::Day, 10);

        assert_eq!(stats.start_day.as_deref(), Some("2025-03-09"));
        assert_eq!(stats.end_day, "2025-03-10");
        assert_eq!(stats.overview.events, 5);
        assert_eq!(stats.overview.distinct_authors, 3);
        assert_eq!(stats.overview.relays_with_events, 2);
        assert_eq!(stats.overview.known_relays, 2);
        assert!(stats.timeline.iter().all(|p| p.day.as_str() >= "2025-03-09"));
        assert!(!stats.kinds.top.iter().any(|k| k.kind == 3));
    }

    #[test]
    fn test_wider_ranges_include_more() {
        let store = seeded_store();
        assert_eq!(compute(&store, TimeRange::Week, 10).overview.events, 7);
        assert_eq!(compute(&store, TimeRange::Month, 10).overview.events, 7);
        let all = compute(&store, TimeRange::All, 10);
        assert_eq!(all.overview.events, 8);
        assert_eq!(all.start_day, None);
        assert_eq!(all.overview.distinct_authors, 5);
    }

    #[test]
    fn test_relay_table_and_top_relays() {
        let store = seeded_store();
        let stats = compute(&store, TimeRange::Day, 10);

        assert_eq!(stats.relays.len(), 2);
        assert_eq!(stats.relays[0].url, RELAY_A);
        assert_eq!(stats.relays[0].events, 3);
        assert_eq!(stats.relays[0].unique_authors, 2);
        assert_eq!(stats.relays[1].events, 2);

        assert_eq!(stats.top_relays.len(), 2);
        assert_eq!(stats.top_relays[0].rank, 1);
        assert_eq!(stats.top_relays[0].url, RELAY_A);
        assert_eq!(stats.top_relays[0].active_users, 2);
        assert_eq!(
            stats.top_relays[0].kinds,
            vec![KindCount { kind: 1, events: 2 }, KindCount { kind: 7, events: 1 }]
        );
        assert_eq!(stats.top_relays[1].rank, 2);
    }

    #[test]
    fn test_top_n_limits_tables() {
        let store = seeded_store();
        let stats = compute(&store, TimeRange::All, 1);

        assert_eq!(stats.top_relays.len(), 1);
        assert_eq!(stats.kinds.top.len(), 1);
        assert_eq!(stats.kinds.top[0].kind, 1);
        assert!(stats.kinds.series.iter().all(|p| p.kind == 1));
        assert_eq!(stats.clients.len(), 1);
        // Full relay table regardless of top_n
        assert_eq!(stats.relays.len(), 2);
    }

    #[test]
    fn test_kind_shares() {
        let store = seeded_store();
        let stats = compute(&store, TimeRange::Day, 10);

        let kind1 = stats.kinds.top.iter().find(|k| k.kind == 1).unwrap();
        assert_eq!(kind1.events, 4);
        assert!((kind1.share - 0.8).abs() < 1e-9);
        let total: u64 = stats
            .kinds
            .series
            .iter()
            .filter(|p| p.kind == 1)
            .map(|p| p.events)
            .sum();
        assert_eq!(total, 4);
    }

    #[test]
    fn test_client_ranking_is_range_scoped() {
        let store = seeded_store();

        let day = compute(&store, TimeRange::Day, 10);
        assert_eq!(day.clients[0].name, "Damus");
        assert_eq!(day.clients[0].events, 3);
        assert!((day.clients[0].share - 0.75).abs() < 1e-9);
        assert_eq!(day.clients[1].name, "Amethyst");
        assert_eq!(day.clients[1].kinds, vec![KindCount { kind: 7, events: 1 }]);

        let week = compute(&store, TimeRange::Week, 10);
        let amethyst = week.clients.iter().find(|c| c.name == "Amethyst").unwrap();
        assert_eq!(amethyst.events, 2);
    }

    #[test]
    fn test_timeline() {
        let store = seeded_store();
        let stats = compute(&store, TimeRange::Week, 10);

        assert_eq!(
            stats.timeline,
            vec![
                TimelinePoint {
                    day: "2025-03-07".into(),
                    events: 2,
                    active_authors: 1
                },
                TimelinePoint {
                    day: "2025-03-09".into(),
                    events: 1,
                    active_authors: 1
                },
                TimelinePoint {
                    day: "2025-03-10".into(),
                    events: 4,
                    active_authors: 3
                },
            ]
        );
    }

    #[test]
    fn test_empty_store() {
        let store = Store::open_in_memory().unwrap();
        let stats = compute(&store, TimeRange::Day, 10);
        assert_eq!(stats.overview, Overview::default());
        assert!(stats.relays.is_empty());
        assert!(stats.top_relays.is_empty());
        assert!(stats.timeline.is_empty());
    }
}
