pub mod geocoder;

pub use geocoder::{BlockingGeocoder, Geocoder};
