//! The static rebuild job: derives the aggregate collections and stop
//! documents from the reference tables and swaps them in wholesale.

use std::collections::{BTreeMap, HashMap, HashSet};

use tracing::{info, warn};

use crate::context::Context;
use crate::error::JobError;
use crate::jobs::{CycleOutcome, REBUILD_LEASE, run_cycle};
use crate::model::{Arrival, CountEntry, StaticAggregate, StopRecord};
use crate::reference::{self, RouteInfo, StopInfo, StopTime};

pub const TRANSPORT_PER_AGENCIES: &str = "transport_per_agencies";
pub const TRANSPORT_PER_TYPE: &str = "transport_per_type";
pub const TRANSPORT_PER_ROUTES: &str = "transport_per_routes";
pub const STOPS_PER_ROUTES: &str = "stops_per_routes";

#[derive(Debug, PartialEq, Eq)]
pub struct RebuildReport {
    pub aggregates: usize,
    pub stops: usize,
}

/// Run one rebuild cycle under the rebuild lease.
pub async fn run(ctx: &Context) -> CycleOutcome {
    run_cycle(
        ctx.cache.as_ref(),
        "rebuild",
        REBUILD_LEASE,
        ctx.config.rebuild_max_attempts,
        ctx.config.retry_delay,
        ctx.config.run_budget,
        || run_once(ctx),
    )
    .await
}

/// One attempt: reload every reference table, recompute the aggregates and
/// stop documents, replace both collections.
///
/// Each collection swap is transactional, readers see the previous set or
/// the new one, never a half-replaced mix. Region polygons need no store
/// write at all; ingestion re-reads them from disk every run.
#[tracing::instrument(skip(ctx))]
pub async fn run_once(ctx: &Context) -> Result<RebuildReport, JobError> {
    let dir = &ctx.config.static_dir;
    let routes = reference::routes(dir)?;
    let route_names = reference::route_names(dir)?;
    let route_blocks = reference::route_blocks(dir)?;
    let trip_routes = reference::trip_routes(dir)?;
    let stops = reference::stops(dir)?;
    let stop_times = reference::stop_times(dir)?;

    let aggregates = static_aggregates(&routes, &route_names, &route_blocks, &stop_times);
    let stop_records = stop_records(stops, &trip_routes, &route_names, &stop_times);

    ctx.store.replace_aggregates(&aggregates).await?;
    ctx.store.replace_stops(&stop_records).await?;

    info!(
        aggregates = aggregates.len(),
        stops = stop_records.len(),
        "static collections rebuilt"
    );

    Ok(RebuildReport {
        aggregates: aggregates.len(),
        stops: stop_records.len(),
    })
}

/// The four count tables served to dashboard clients.
fn static_aggregates(
    routes: &[RouteInfo],
    route_names: &HashMap<String, String>,
    route_blocks: &HashMap<String, HashSet<String>>,
    stop_times: &[StopTime],
) -> Vec<StaticAggregate> {
    let mut per_agency: BTreeMap<&str, i64> = BTreeMap::new();
    let mut per_type: BTreeMap<&str, i64> = BTreeMap::new();
    for route in routes {
        *per_agency.entry(route.agency_name.as_str()).or_default() += 1;
        *per_type.entry(route.category.as_str()).or_default() += 1;
    }

    // Vehicle count per route approximated by its distinct block ids.
    let mut per_route: BTreeMap<&str, i64> = BTreeMap::new();
    for (route_id, blocks) in route_blocks {
        let Some(name) = route_names.get(route_id) else {
            warn!(route_id = %route_id, "trips reference a route missing from the route table, skipping");
            continue;
        };
        *per_route.entry(name.as_str()).or_default() += blocks.len() as i64;
    }

    vec![
        StaticAggregate {
            name: TRANSPORT_PER_AGENCIES.to_string(),
            entries: count_entries(per_agency),
        },
        StaticAggregate {
            name: TRANSPORT_PER_TYPE.to_string(),
            entries: count_entries(per_type),
        },
        StaticAggregate {
            name: TRANSPORT_PER_ROUTES.to_string(),
            entries: count_entries(per_route),
        },
        StaticAggregate {
            name: STOPS_PER_ROUTES.to_string(),
            entries: count_entries(stops_per_routes(route_names, route_blocks, stop_times)),
        },
    ]
}

/// Distinct stops served per route.
///
/// Schedule trip ids are block-scoped (`<block>_<departure>`), so the id is
/// truncated at the first underscore before the block → route lookup.
/// Every route name starts at zero; routes without schedule rows stay
/// there instead of disappearing from the table.
fn stops_per_routes<'a>(
    route_names: &'a HashMap<String, String>,
    route_blocks: &HashMap<String, HashSet<String>>,
    stop_times: &[StopTime],
) -> BTreeMap<&'a str, i64> {
    let mut block_routes: HashMap<&str, &str> = HashMap::new();
    for (route_id, blocks) in route_blocks {
        for block in blocks {
            block_routes.insert(block.as_str(), route_id.as_str());
        }
    }

    let mut served: HashSet<(&str, &str)> = HashSet::new();
    for stop_time in stop_times {
        let block = stop_time
            .trip_id
            .split('_')
            .next()
            .unwrap_or(stop_time.trip_id.as_str());
        let Some(route_id) = block_routes.get(block) else {
            warn!(trip_id = %stop_time.trip_id, "schedule row references unknown block, skipping");
            continue;
        };
        let Some(route_name) = route_names.get(*route_id) else {
            warn!(route_id = %route_id, "schedule row references unknown route, skipping");
            continue;
        };
        served.insert((route_name.as_str(), stop_time.stop_id.as_str()));
    }

    let mut counts: BTreeMap<&str, i64> = route_names
        .values()
        .map(|name| (name.as_str(), 0))
        .collect();
    for (route_name, _stop_id) in served {
        *counts.entry(route_name).or_default() += 1;
    }
    counts
}

fn count_entries(counts: BTreeMap<&str, i64>) -> Vec<CountEntry> {
    counts
        .into_iter()
        .map(|(id, value)| CountEntry {
            id: id.to_string(),
            value,
        })
        .collect()
}

/// Stop documents with their embedded arrival schedules, sorted by stop id.
///
/// Unlike [`stops_per_routes`], arrivals join on the full trip id. Rows
/// referencing unknown trips, unknown stops or unparsable times are
/// dropped with a warning; the remaining schedule keeps file order.
fn stop_records(
    stops: HashMap<String, StopInfo>,
    trip_routes: &HashMap<String, String>,
    route_names: &HashMap<String, String>,
    stop_times: &[StopTime],
) -> Vec<StopRecord> {
    let mut arrivals: HashMap<&str, Vec<Arrival>> = HashMap::new();
    for stop_time in stop_times {
        let Some((stop_id, _)) = stops.get_key_value(&stop_time.stop_id) else {
            warn!(stop_id = %stop_time.stop_id, "schedule row references unknown stop, skipping");
            continue;
        };
        let Some(route_id) = trip_routes.get(&stop_time.trip_id) else {
            warn!(trip_id = %stop_time.trip_id, "schedule row references unknown trip, skipping");
            continue;
        };
        let Some(route_name) = route_names.get(route_id) else {
            warn!(route_id = %route_id, "schedule row references unknown route, skipping");
            continue;
        };
        let Some(arrival_seconds) = reference::arrival_seconds(&stop_time.arrival_time) else {
            warn!(
                trip_id = %stop_time.trip_id,
                arrival_time = %stop_time.arrival_time,
                "unparsable arrival time, skipping"
            );
            continue;
        };
        arrivals.entry(stop_id.as_str()).or_default().push(Arrival {
            route_name: route_name.clone(),
            arrival_time: stop_time.arrival_time.clone(),
            arrival_seconds,
        });
    }

    let mut arrivals: HashMap<String, Vec<Arrival>> = arrivals
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();

    let mut records: Vec<StopRecord> = stops
        .into_values()
        .map(|info| StopRecord {
            arrivals: arrivals.remove(&info.stop_id).unwrap_or_default(),
            stop_id: info.stop_id,
            name: info.name,
            description: info.description,
            latitude: info.latitude,
            longitude: info.longitude,
        })
        .collect();
    records.sort_by(|a, b| a.stop_id.cmp(&b.stop_id));
    records
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RouteCategory;

    fn route(route_id: &str, short_name: &str, agency: &str) -> RouteInfo {
        RouteInfo {
            route_id: route_id.into(),
            short_name: short_name.into(),
            agency_name: agency.into(),
            category: RouteCategory::from_short_name(short_name),
        }
    }

    fn stop_time(trip_id: &str, stop_id: &str, arrival: &str) -> StopTime {
        StopTime {
            trip_id: trip_id.into(),
            stop_id: stop_id.into(),
            arrival_time: arrival.into(),
        }
    }

    fn entries_map(aggregate: &StaticAggregate) -> HashMap<String, i64> {
        aggregate
            .entries
            .iter()
            .map(|e| (e.id.clone(), e.value))
            .collect()
    }

    #[test]
    fn test_transport_counts() {
        let routes = vec![
            route("r1", "А18", "ATP-1"),
            route("r2", "А40", "ATP-1"),
            route("r3", "Т3", "Tramway"),
        ];
        let names = HashMap::from([
            ("r1".to_string(), "А18".to_string()),
            ("r2".to_string(), "А40".to_string()),
            ("r3".to_string(), "Т3".to_string()),
        ]);
        let blocks = HashMap::from([
            (
                "r1".to_string(),
                HashSet::from(["b1".to_string(), "b2".to_string()]),
            ),
            ("r3".to_string(), HashSet::from(["b3".to_string()])),
        ]);

        let aggregates = static_aggregates(&routes, &names, &blocks, &[]);
        assert_eq!(aggregates.len(), 4);

        let per_agency = entries_map(&aggregates[0]);
        assert_eq!(aggregates[0].name, TRANSPORT_PER_AGENCIES);
        assert_eq!(per_agency["ATP-1"], 2);
        assert_eq!(per_agency["Tramway"], 1);

        let per_type = entries_map(&aggregates[1]);
        assert_eq!(per_type["bus"], 2);
        assert_eq!(per_type["tram"], 1);

        let per_route = entries_map(&aggregates[2]);
        assert_eq!(per_route["А18"], 2);
        assert_eq!(per_route["Т3"], 1);
        // r2 has no trips and therefore no vehicle count entry.
        assert!(!per_route.contains_key("А40"));
    }

    #[test]
    fn test_stops_per_routes_counts_distinct_pairs() {
        let names = HashMap::from([
            ("r1".to_string(), "А18".to_string()),
            ("r2".to_string(), "Т3".to_string()),
        ]);
        let blocks = HashMap::from([
            ("r1".to_string(), HashSet::from(["b1".to_string()])),
            ("r2".to_string(), HashSet::from(["b2".to_string()])),
        ]);
        let stop_times = vec![
            stop_time("b1_0", "s1", "08:00:00"),
            stop_time("b1_1", "s1", "09:00:00"),
            stop_time("b1_0", "s2", "08:05:00"),
            stop_time("ghost_0", "s9", "10:00:00"),
        ];

        let counts = stops_per_routes(&names, &blocks, &stop_times);
        // Two distinct stops for А18 despite three rows; Т3 initialized to 0.
        assert_eq!(counts["А18"], 2);
        assert_eq!(counts["Т3"], 0);
    }

    #[test]
    fn test_stop_records_embed_arrivals() {
        let stops = HashMap::from([
            (
                "s1".to_string(),
                StopInfo {
                    stop_id: "s1".into(),
                    name: "Opera".into(),
                    description: "".into(),
                    latitude: 49.844,
                    longitude: 24.026,
                },
            ),
            (
                "s2".to_string(),
                StopInfo {
                    stop_id: "s2".into(),
                    name: "Rynok".into(),
                    description: "old town".into(),
                    latitude: 49.841,
                    longitude: 24.032,
                },
            ),
        ]);
        let trips = HashMap::from([("b1_0".to_string(), "r1".to_string())]);
        let names = HashMap::from([("r1".to_string(), "А18".to_string())]);
        let stop_times = vec![
            stop_time("b1_0", "s1", "08:30:00"),
            stop_time("b1_0", "s1", "25:10:00"),
            stop_time("b1_0", "s1", "garbage"),
            stop_time("unknown", "s1", "09:00:00"),
        ];

        let records = stop_records(stops, &trips, &names, &stop_times);
        assert_eq!(records.len(), 2);

        let s1 = &records[0];
        assert_eq!(s1.stop_id, "s1");
        assert_eq!(s1.arrivals.len(), 2);
        assert_eq!(s1.arrivals[0].route_name, "А18");
        assert_eq!(s1.arrivals[0].arrival_seconds, 30600);
        assert_eq!(s1.arrivals[1].arrival_time, "25:10:00");
        assert_eq!(s1.arrivals[1].arrival_seconds, 90600);

        // s2 has no schedule rows but keeps its document.
        assert_eq!(records[1].stop_id, "s2");
        assert!(records[1].arrivals.is_empty());
    }
}
