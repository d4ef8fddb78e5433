//! AIS data providers
//!
//! Every provider normalizes its vendor payloads into [`PositionRecord`]s and
//! reports them through the callback given to [`AisProvider::start_tracking`].

pub mod aisstream;
pub mod digitraffic;
pub mod marinesia;
pub mod myshiptracking;
pub mod polling;

use std::collections::HashMap;
use std::sync::Arc;

use crate::errors::TrackerError;
use crate::models::{Mmsi, PositionRecord};

/// Callback receiving every normalized position of a tracked vessel
pub type PositionCallback = Arc<dyn Fn(PositionRecord) + Send + Sync>;

pub const AISSTREAM: &str = "aisstream";
pub const MARINESIA: &str = "marinesia";
pub const MYSHIPTRACKING: &str = "myshiptracking";
pub const DIGITRAFFIC: &str = "digitraffic";

/// Common capabilities of an AIS provider
pub trait AisProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Whether subscriptions for this provider must carry credentials
    fn requires_credentials(&self) -> bool;

    /// Start tracking a vessel. Tracking an already tracked vessel is a no-op.
    fn start_tracking(
        &self,
        mmsi: Mmsi,
        credentials: Option<&str>,
        on_update: PositionCallback,
    ) -> Result<(), TrackerError>;

    /// Stop tracking a vessel, no-op if not tracked
    fn stop_tracking(&self, mmsi: &Mmsi);

    fn is_tracking(&self, mmsi: &Mmsi) -> bool;

    /// Last position seen by this provider
    fn position(&self, mmsi: &Mmsi) -> Option<PositionRecord>;

    fn all_positions(&self) -> HashMap<String, PositionRecord>;

    /// Stop all tracking and forget cached positions
    fn stop_all(&self);
}

/// Canonical registry name of a provider.
///
/// Matching ignores case and `_`, `-` or space separators, and folds the
/// `...api` aliases used in stored configuration onto the provider name.
pub fn canonical_provider_name(name: &str) -> String {
    let folded: String = name
        .trim()
        .chars()
        .filter(|c| !matches!(c, '_' | '-' | ' '))
        .flat_map(char::to_lowercase)
        .collect();

    match folded.as_str() {
        "aisstream" | "aisstreamio" => AISSTREAM.to_string(),
        "marinesia" | "marinesiaapi" => MARINESIA.to_string(),
        "myshiptracking" | "myshiptrackingapi" => MYSHIPTRACKING.to_string(),
        "digitraffic" | "digitrafficmarine" => DIGITRAFFIC.to_string(),
        _ => folded,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_aliases() {
        assert_eq!(canonical_provider_name("AisStream"), AISSTREAM);
        assert_eq!(canonical_provider_name("ais_stream"), AISSTREAM);
        assert_eq!(canonical_provider_name("MarinesiaAPI"), MARINESIA);
        assert_eq!(canonical_provider_name(" marinesia "), MARINESIA);
        assert_eq!(canonical_provider_name("MyShipTrackingApi"), MYSHIPTRACKING);
        assert_eq!(canonical_provider_name("Digitraffic"), DIGITRAFFIC);
        assert_eq!(canonical_provider_name("Other-Vendor"), "othervendor");
    }
}
