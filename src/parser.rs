//! Protobuf decoding of GTFS Realtime vehicle position feeds.

use prost::Message;

use crate::gtfs_rt::FeedMessage;

/// Conversion factor from the wire's m/s speed to km/h.
const MS_TO_KMH: f64 = 3.6;

/// One vehicle position lifted out of the feed envelope, before any route
/// metadata or movement enrichment.
#[derive(Debug, Clone, PartialEq)]
pub struct VehicleUpdate {
    pub route_id: String,
    pub vehicle_id: String,
    pub license_plate: String,
    pub latitude: f64,
    pub longitude: f64,
    pub bearing: f64,
    /// Ground speed in km/h.
    pub speed_kmh: f64,
    /// Cumulative odometer reading in meters.
    pub odometer: f64,
}

/// Decodes a feed snapshot into the vehicle updates it carries.
///
/// Entities without a vehicle position are skipped. Optional fields fall
/// back to protobuf defaults, so a vehicle with no odometer reports `0.0`.
///
/// # Errors
///
/// Returns an error if the bytes are not valid protobuf for a `FeedMessage`.
pub fn decode_feed(bytes: &[u8]) -> Result<Vec<VehicleUpdate>, prost::DecodeError> {
    let feed = FeedMessage::decode(bytes)?;

    let updates = feed
        .entity
        .into_iter()
        .filter_map(|entity| {
            let vehicle = entity.vehicle?;
            let position = vehicle.position?;
            let trip = vehicle.trip.unwrap_or_default();
            let descriptor = vehicle.vehicle.unwrap_or_default();

            Some(VehicleUpdate {
                route_id: trip.route_id().to_string(),
                vehicle_id: descriptor.id().to_string(),
                license_plate: sanitize_plate(descriptor.license_plate()),
                latitude: position.latitude as f64,
                longitude: position.longitude as f64,
                bearing: position.bearing() as f64,
                speed_kmh: position.speed() as f64 * MS_TO_KMH,
                odometer: position.odometer(),
            })
        })
        .collect();

    Ok(updates)
}

/// Plates arrive as `BC-1234-AB` or with stray spaces; storage and display
/// both want the compact form.
fn sanitize_plate(plate: &str) -> String {
    plate.chars().filter(|c| *c != '-' && *c != ' ').collect()
}
