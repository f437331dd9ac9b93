pub mod baseline;
pub mod cache;
pub mod config;
pub mod congestion;
pub mod context;
pub mod error;
pub mod fetch;
pub mod jobs;
pub mod model;
pub mod odometer;
pub mod outliers;
pub mod parser;
pub mod reference;
pub mod regions;
pub mod store;

pub mod gtfs_rt {
    include!(concat!(env!("OUT_DIR"), "/transit_realtime.rs"));
}
